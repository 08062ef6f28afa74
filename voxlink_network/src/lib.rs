//! Streaming transport for real-time audio over a single persistent socket.
//!
//! This crate connects the fixed-frame audio queues of `voxlink_utils` to a remote
//! audio server, using the framing implemented in `voxlink_proto` on top of a TCP
//! connection upgraded with a WebSocket handshake.
//!
//! ## Threads
//!
//! Three long-lived threads cooperate, sharing nothing but a [`Link`]:
//!
//! - the [`Supervisor`] owns the connection lifecycle: it negotiates a channel,
//!   publishes it in the link, watches for loss and reconnects with back-off.
//! - the [`Outbound`](worker::Outbound) worker drains the audio-in queue and writes one
//!   binary frame per audio frame.
//! - the [`Inbound`](worker::Inbound) worker reads frames, routing audio to the
//!   audio-out queue and text to a [`MessageHandler`](worker::MessageHandler).
//!
//! Workers never reconnect: when they hit an unrecoverable error they invalidate the
//! channel they were using, and carry on idling until the supervisor publishes a new
//! one.
//!
//! ## Blocking
//!
//! Every blocking operation in this crate is bounded: socket operations by the
//! configured socket timeout, queue operations by explicit timeouts and back-off
//! delays by the [`Shutdown`] token.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

pub mod config;
pub mod error;
pub mod handshake;
pub mod link;
pub mod supervisor;
pub mod transport;
pub mod uri;
pub mod worker;

mod client;

pub use voxlink_proto as proto;
pub use voxlink_utils as utils;

pub use client::{AudioQueues, Client};
pub use config::ClientConfig;
pub use error::{Error, HandshakeError};
pub use handshake::Negotiator;
pub use link::{Link, SupervisorState};
pub use supervisor::Supervisor;
pub use transport::{Channel, Stream};
pub use uri::WsUri;

/// Draws mask keys from the thread-local random number generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomMask;

impl proto::MaskKeySource for RandomMask {
    #[inline(always)]
    fn next_key(&mut self) -> proto::MaskKey {
        rand::random()
    }
}

/// A cancellation flag shared by all threads of a client.
///
/// Once requested, every thread returns at its next suspension point.
#[derive(Debug, Default, Clone)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Source of delays for the reconnection logic.
///
/// Abstracted so back-off sequences can be driven deterministically in tests.
pub trait Clock {
    /// Sleeps for `duration`, returning early if `shutdown` is requested.
    fn sleep(&mut self, duration: core::time::Duration, shutdown: &Shutdown);
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    // granularity at which shutdown requests are noticed
    const SLICE: core::time::Duration = core::time::Duration::from_millis(50);
}

impl Clock for SystemClock {
    fn sleep(&mut self, duration: core::time::Duration, shutdown: &Shutdown) {
        let deadline = std::time::Instant::now() + duration;

        while !shutdown.is_requested() {
            let Some(rem) = deadline.checked_duration_since(std::time::Instant::now()) else {
                break;
            };

            if rem.is_zero() {
                break;
            }

            std::thread::sleep(rem.min(Self::SLICE));
        }
    }
}

/// Returns `true` if the given I/O error kind represents a socket timeout.
///
/// Depending on the platform, an expired read or write timeout surfaces as either
/// `WouldBlock` or `TimedOut`.
#[inline(always)]
pub fn io_err_is_timeout(e: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    [WouldBlock, TimedOut].contains(&e)
}

/// Returns `true` if an operation that failed with `e` may simply be retried.
#[inline(always)]
pub(crate) fn io_err_is_transient(e: std::io::ErrorKind) -> bool {
    io_err_is_timeout(e) || e == std::io::ErrorKind::Interrupted
}
