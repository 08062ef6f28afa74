//! The connection lifecycle.
//!
//! The [`Supervisor`] is a state machine, advanced one transition at a time by
//! [`Supervisor::step`]:
//!
//! ```text
//!                  start
//!                    |
//!                    v
//!   +-------> Disconnected
//!   |                |
//!   |                v
//!   |   +---> Handshaking (Resolving) ----+
//!   |   |        |       ^  |             | negotiation failed
//!   |   |        |       +--+ failed,     | too many times
//!   |   |        |       retry interval   v
//!   |   |        |                    BackingOff
//!   |   +--------|----------------------- + failed delay
//!   |            | negotiated
//!   |            v
//!   +------- Connected
//!  lost,
//!  reconnect delay
//! ```

use core::{num::NonZeroU32, time::Duration};
use std::sync::Arc;

use voxlink_utils::ConnectionTimer;

use crate::{
    ClientConfig, Clock, Error, RandomMask, SystemClock,
    link::{Link, SupervisorState},
    proto::{Encoder, Opcode},
    transport::{Channel, Stream},
};

/// Establishes new sessions on behalf of the supervisor.
pub trait Connect {
    type Stream: Stream;

    /// Makes one attempt at establishing a session.
    ///
    /// Implementations may report intermediate states (e.g.
    /// [`SupervisorState::Resolving`]) through `link`.
    fn connect(
        &mut self,
        session: u64,
        link: &Link<Self::Stream>,
    ) -> Result<Channel<Self::Stream>, Error>;
}

/// Reports whether the host currently has network connectivity.
pub trait NetworkReady {
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReady;

impl NetworkReady for AlwaysReady {
    #[inline(always)]
    fn is_ready(&self) -> bool {
        true
    }
}

impl<F: Fn() -> bool> NetworkReady for F {
    #[inline(always)]
    fn is_ready(&self) -> bool {
        self()
    }
}

/// Timing of the reconnection logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts before backing off.
    pub max_attempts: NonZeroU32,
    /// Delay between two failed attempts.
    pub retry_interval: Duration,
    /// Delay between losing a session and the next attempt.
    pub reconnect_delay: Duration,
    /// Back-off delay.
    pub failed_delay: Duration,
    /// Liveness polling period while connected.
    pub watch_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.handshake_max_retry,
            retry_interval: config.handshake_retry_interval(),
            reconnect_delay: config.reconnect_delay(),
            failed_delay: config.reconnect_failed_delay(),
            watch_interval: config.watch_interval(),
        }
    }
}

pub struct Supervisor<C: Connect, K = SystemClock> {
    link: Arc<Link<C::Stream>>,
    connector: C,
    clock: K,
    probe: Box<dyn NetworkReady + Send>,
    policy: RetryPolicy,
    failures: u32,
    next_session: u64,
    session_timer: ConnectionTimer,
    encoder: Encoder<RandomMask>,
}

impl<C: Connect> Supervisor<C> {
    pub fn new(link: Arc<Link<C::Stream>>, connector: C, policy: RetryPolicy) -> Self {
        Self::with_clock(link, connector, policy, SystemClock)
    }
}

impl<C: Connect, K: Clock> Supervisor<C, K> {
    pub fn with_clock(
        link: Arc<Link<C::Stream>>,
        connector: C,
        policy: RetryPolicy,
        clock: K,
    ) -> Self {
        Self {
            link,
            connector,
            clock,
            probe: Box::new(AlwaysReady),
            policy,
            failures: 0,
            next_session: 1,
            session_timer: ConnectionTimer::new(),
            encoder: Encoder::new(RandomMask),
        }
    }

    /// Polls `probe` before every attempt, attempts made while it reports no
    /// connectivity fail immediately.
    pub fn with_probe(mut self, probe: impl NetworkReady + Send + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    #[inline(always)]
    pub fn link(&self) -> &Arc<Link<C::Stream>> {
        &self.link
    }

    /// Performs the action associated with the current state, returning the new
    /// state.
    ///
    /// Every step either makes one negotiation attempt or waits for one delay.
    pub fn step(&mut self) -> SupervisorState {
        match self.link.state() {
            SupervisorState::Disconnected => self.link.set_state(SupervisorState::Handshaking),
            SupervisorState::Resolving | SupervisorState::Handshaking => self.attempt(),
            SupervisorState::Connected => self.watch(),
            SupervisorState::BackingOff => {
                self.delay(self.policy.failed_delay);
                self.failures = 0;
                self.link.set_state(SupervisorState::Handshaking);
            }
        }

        self.link.state()
    }

    /// Runs until shutdown is requested, then closes the current session, if any.
    pub fn run(mut self) {
        log::info!("supervisor started");

        while !self.link.is_shutdown() {
            self.step();
        }

        self.teardown();
        log::info!("supervisor stopped");
    }

    #[inline(always)]
    fn delay(&mut self, duration: Duration) {
        self.clock.sleep(duration, self.link.shutdown());
    }

    fn attempt(&mut self) {
        if self.failures > 0 {
            self.delay(self.policy.retry_interval);

            if self.link.is_shutdown() {
                return;
            }
        }

        self.link.set_state(SupervisorState::Handshaking);

        let session = self.next_session;
        self.next_session += 1;

        let result = if self.probe.is_ready() {
            self.connector.connect(session, &self.link)
        } else {
            Err(Error::NotReady)
        };

        let max = self.policy.max_attempts.get();

        match result {
            Ok(channel) => {
                log::info!("session {session}: connected");

                self.failures = 0;
                self.session_timer.reset();

                if let Some(stale) = self.link.install(Arc::new(channel)) {
                    stale.close();
                }

                self.link.set_state(SupervisorState::Connected);
            }
            Err(e) => {
                self.failures += 1;

                if self.failures >= max {
                    log::error!(
                        "session {session}: attempt {}/{max} failed: {e}, retrying in {:?}",
                        self.failures,
                        self.policy.failed_delay,
                    );
                    self.link.set_state(SupervisorState::BackingOff);
                } else {
                    log::warn!(
                        "session {session}: attempt {}/{max} failed: {e}",
                        self.failures
                    );
                    self.link.set_state(SupervisorState::Handshaking);
                }
            }
        }
    }

    fn watch(&mut self) {
        if self.link.current().is_some() {
            self.delay(self.policy.watch_interval);
            return;
        }

        if let Some(channel) = self.link.take() {
            channel.close();

            log::warn!(
                "session {}: connection lost after {:?}, reconnecting in {:?}",
                channel.session(),
                self.session_timer.elapsed(),
                self.policy.reconnect_delay,
            );
        }

        self.link.set_state(SupervisorState::Disconnected);
        self.delay(self.policy.reconnect_delay);
    }

    fn teardown(&mut self) {
        if let Some(channel) = self.link.take() {
            if channel.is_live() {
                let close = self.encoder.encode_to_vec(Opcode::Close, &[]);

                // no audio frame may follow the close frame
                if let Err(e) = channel.send_last(&close) {
                    log::debug!("session {}: failed to send close frame: {e}", channel.session());
                }
            }

            channel.close();
            log::info!(
                "session {}: closed after {:?}",
                channel.session(),
                self.session_timer.elapsed()
            );
        }

        self.link.set_state(SupervisorState::Disconnected);
    }
}
