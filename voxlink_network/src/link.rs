//! State shared between the supervisor and the workers.

use std::{
    fmt,
    net::TcpStream,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU8, Ordering},
    },
};

use crate::{Shutdown, transport::Channel};

/// The supervisor's position in the connection lifecycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    Disconnected,
    Resolving,
    Handshaking,
    Connected,
    BackingOff,
}

impl SupervisorState {
    #[inline(always)]
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Resolving,
            2 => Self::Handshaking,
            3 => Self::Connected,
            4 => Self::BackingOff,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The current session's channel, if any, and the supervisor's state.
///
/// The supervisor is the only writer of both. Workers fetch the channel with
/// [`current`](Self::current) whenever they are about to use it, and don't keep it
/// across queue waits or delays.
pub struct Link<S = TcpStream> {
    slot: RwLock<Option<Arc<Channel<S>>>>,
    state: AtomicU8,
    shutdown: Shutdown,
}

impl<S> fmt::Debug for Link<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("state", &self.state())
            .field("shutdown", &self.shutdown.is_requested())
            .finish_non_exhaustive()
    }
}

impl<S> Link<S> {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            slot: RwLock::new(None),
            state: AtomicU8::new(SupervisorState::Disconnected as u8),
            shutdown,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Publishes a new lifecycle state. Meant for the supervisor and its connector.
    #[inline(always)]
    pub fn set_state(&self, state: SupervisorState) {
        let prev = self.state.swap(state as u8, Ordering::AcqRel);

        if prev != state as u8 {
            log::debug!("{} -> {state}", SupervisorState::from_u8(prev));
        }
    }

    #[inline(always)]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    #[inline(always)]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// The channel currently installed, live or not.
    pub fn installed(&self) -> Option<Arc<Channel<S>>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `channel` as the current one, returning the previous one.
    pub(crate) fn install(&self, channel: Arc<Channel<S>>) -> Option<Arc<Channel<S>>> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(channel)
    }

    /// Removes the current channel.
    pub(crate) fn take(&self) -> Option<Arc<Channel<S>>> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl<S: crate::Stream> Link<S> {
    /// The current channel, if there is one and it hasn't been reported lost.
    pub fn current(&self) -> Option<Arc<Channel<S>>> {
        self.installed().filter(|channel| channel.is_live())
    }
}
