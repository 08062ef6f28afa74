//! Utilities for moving fixed-size audio frames between real-time threads and
//! network threads.
//!
//! This crate provides:
//! - bounded, fixed-frame-size queues with bounded blocking waits ([`queue`]),
//! - the sample conditioning stages applied around the network ([`signal`]),
//! - small timing helpers shared by the network crate.

use std::{sync, thread, time};

pub mod queue;
pub mod signal;

/// A lightweight wrapper around [`std::time::Instant`] used to measure how long
/// something (a session, a stall) has been going on.
///
/// ```ignore
/// let timer = ConnectionTimer::new();
///
/// // ... session ends
/// log::info!("session lasted {:?}", timer.elapsed());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionTimer(time::Instant);

impl Default for ConnectionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTimer {
    /// Creates a new timer starting at the current instant.
    #[inline(always)]
    pub fn new() -> Self {
        Self(time::Instant::now())
    }

    /// Restarts the timer from now.
    #[inline(always)]
    pub fn reset(&mut self) {
        *self = Self::new()
    }

    /// Returns the amount of time elapsed since the last reset.
    #[inline(always)]
    pub fn elapsed(&self) -> time::Duration {
        self.0.elapsed()
    }
}

/// Wakes a thread blocked on one end of a queue.
///
/// The waiting thread registers itself the first time it blocks. Each queue endpoint
/// is meant to be waited on from one thread only, which is the case for all pipelines
/// in this workspace (one capture thread, one network worker, one playback thread).
#[derive(Debug, Default)]
pub struct Waker {
    thread: sync::OnceLock<thread::Thread>,
}

impl Waker {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            thread: sync::OnceLock::new(),
        }
    }

    /// Registers the current thread as the one to wake, if none was registered yet.
    #[inline(always)]
    pub fn register_current(&self) {
        let _ = self.thread.get_or_init(thread::current);
    }

    /// Unparks the registered thread, if any.
    #[inline(always)]
    pub fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }
}

/// Upper bound on a single park, so waiters periodically re-check conditions
/// (abandoned peers, deadlines) that are not signalled through a [`Waker`].
const MAX_PARK: time::Duration = time::Duration::from_millis(50);

/// Blocks the current thread until `ready` returns `true` or `deadline` passes.
///
/// Returns whether `ready` returned `true`. `waker` is registered before the first
/// check, so a wake-up between the check and the park is never lost.
pub fn park_until(
    waker: &Waker,
    deadline: Option<time::Instant>,
    mut ready: impl FnMut() -> bool,
) -> bool {
    waker.register_current();

    loop {
        if ready() {
            return true;
        }

        let park_for = match deadline {
            Some(deadline) => match deadline.checked_duration_since(time::Instant::now()) {
                Some(rem) if !rem.is_zero() => rem.min(MAX_PARK),
                _ => return false,
            },
            None => MAX_PARK,
        };

        thread::park_timeout(park_for);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn park_until_times_out() {
        let waker = Waker::new();
        let start = time::Instant::now();

        let ready = park_until(
            &waker,
            Some(start + time::Duration::from_millis(30)),
            || false,
        );

        assert!(!ready);
        assert!(start.elapsed() >= time::Duration::from_millis(30));
    }

    #[test]
    fn park_until_woken() {
        let waker = sync::Arc::new(Waker::new());
        let flag = sync::Arc::new(sync::atomic::AtomicBool::new(false));

        waker.register_current();

        let handle = {
            let (waker, flag) = (waker.clone(), flag.clone());
            thread::spawn(move || {
                thread::sleep(time::Duration::from_millis(10));
                flag.store(true, sync::atomic::Ordering::Release);
                waker.wake();
            })
        };

        let ready = park_until(
            &waker,
            Some(time::Instant::now() + time::Duration::from_secs(5)),
            || flag.load(sync::atomic::Ordering::Acquire),
        );

        assert!(ready);
        handle.join().unwrap();
    }

    #[test]
    fn timer_measures_elapsed() {
        let mut timer = ConnectionTimer::new();
        thread::sleep(time::Duration::from_millis(5));
        assert!(timer.elapsed() >= time::Duration::from_millis(5));

        timer.reset();
        assert!(timer.elapsed() < time::Duration::from_secs(5));
    }
}
