//! Bounded queues of fixed-size audio frames.
//!
//! Frames are stored back to back in a lock-free single-producer single-consumer byte
//! ring ([`rtrb`]). Both ends only ever commit or consume whole frames, so the ring
//! always holds an integer number of frames, and memory (and latency) is bounded by
//! the queue's frame capacity.
//!
//! Copying a frame in or out of the ring is the ownership transfer: once
//! [`FrameTx::try_send`] returns, the producer's buffer is free to be refilled, and
//! [`FrameRx::try_recv`] hands the consumer its own, freshly filled, buffer.
//!
//! Blocking operations park the calling thread, the opposite end unparks it after
//! every commit.

use core::num;
use std::{sync::Arc, time};

use crate::{Waker, park_until};

/// The queue had no room for another frame (within the allotted time, if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue full")]
pub struct QueueFull;

/// The other end of the queue was dropped, and no frames are left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue disconnected")]
pub struct Disconnected;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    #[error("queue empty")]
    Empty,
    #[error(transparent)]
    Disconnected(#[from] Disconnected),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error(transparent)]
    Disconnected(#[from] Disconnected),
}

#[derive(Debug, Default)]
struct Shared {
    // woken when a frame is committed
    consumer: Waker,
    // woken when a frame is consumed
    producer: Waker,
}

/// Creates a queue holding up to `capacity_frames` frames of exactly `frame_len` bytes.
pub fn frame_queue(
    frame_len: num::NonZeroUsize,
    capacity_frames: num::NonZeroUsize,
) -> (FrameTx, FrameRx) {
    let capacity_bytes = frame_len
        .checked_mul(capacity_frames)
        .expect("ERROR: queue capacity overflow");

    let (tx, rx) = rtrb::RingBuffer::new(capacity_bytes.get());
    let shared = Arc::new(Shared::default());

    (
        FrameTx {
            tx,
            frame_len,
            shared: shared.clone(),
        },
        FrameRx {
            rx,
            frame_len,
            shared,
        },
    )
}

/// The producing end of a frame queue.
#[derive(Debug)]
pub struct FrameTx {
    tx: rtrb::Producer<u8>,
    frame_len: num::NonZeroUsize,
    shared: Arc<Shared>,
}

impl FrameTx {
    #[inline(always)]
    pub const fn frame_len(&self) -> num::NonZeroUsize {
        self.frame_len
    }

    #[inline(always)]
    pub fn capacity_frames(&self) -> usize {
        self.tx.buffer().capacity() / self.frame_len
    }

    /// Number of frames that can currently be sent without blocking.
    #[inline(always)]
    pub fn free_frames(&self) -> usize {
        self.tx.slots() / self.frame_len
    }

    /// Whether the consuming end has been dropped.
    #[inline(always)]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_abandoned()
    }

    /// Enqueues a copy of `frame`, without blocking.
    ///
    /// # Panics
    ///
    /// If `frame`'s length isn't exactly this queue's frame length.
    #[inline]
    pub fn try_send(&mut self, frame: &[u8]) -> Result<(), QueueFull> {
        assert_eq!(
            frame.len(),
            self.frame_len.get(),
            "ERROR: wrong frame size"
        );

        let mut chunk = self.tx.write_chunk(frame.len()).map_err(|_| QueueFull)?;

        let (first, second) = chunk.as_mut_slices();
        let (frame_first, frame_second) = frame.split_at(first.len());
        first.copy_from_slice(frame_first);
        second.copy_from_slice(frame_second);

        chunk.commit_all();
        self.shared.consumer.wake();

        Ok(())
    }

    /// Enqueues a copy of `frame`, waiting up to `timeout` for room to free up.
    ///
    /// # Panics
    ///
    /// If `frame`'s length isn't exactly this queue's frame length.
    #[inline]
    pub fn send_timeout(&mut self, frame: &[u8], timeout: time::Duration) -> Result<(), QueueFull> {
        let deadline = time::Instant::now() + timeout;
        let frame_len = self.frame_len.get();

        let tx = &self.tx;
        if !park_until(&self.shared.producer, Some(deadline), || {
            tx.slots() >= frame_len || tx.is_abandoned()
        }) {
            return Err(QueueFull);
        }

        self.try_send(frame)
    }
}

/// The consuming end of a frame queue.
#[derive(Debug)]
pub struct FrameRx {
    rx: rtrb::Consumer<u8>,
    frame_len: num::NonZeroUsize,
    shared: Arc<Shared>,
}

impl FrameRx {
    #[inline(always)]
    pub const fn frame_len(&self) -> num::NonZeroUsize {
        self.frame_len
    }

    /// Number of frames waiting in the queue.
    #[inline(always)]
    pub fn len_frames(&self) -> usize {
        self.rx.slots() / self.frame_len
    }

    /// Whether the producing end has been dropped.
    #[inline(always)]
    pub fn is_abandoned(&self) -> bool {
        self.rx.is_abandoned()
    }

    /// Dequeues the oldest frame into `dest`, without blocking.
    ///
    /// # Panics
    ///
    /// If `dest`'s length isn't exactly this queue's frame length.
    #[inline]
    pub fn try_recv(&mut self, dest: &mut [u8]) -> Result<(), TryRecvError> {
        assert_eq!(dest.len(), self.frame_len.get(), "ERROR: wrong frame size");

        let chunk = match self.rx.read_chunk(dest.len()) {
            Ok(chunk) => chunk,
            // checked after the read attempt, frames committed right before the
            // producer was dropped are still delivered
            Err(_) => {
                return Err(if self.rx.is_abandoned() {
                    Disconnected.into()
                } else {
                    TryRecvError::Empty
                });
            }
        };

        let (first, second) = chunk.as_slices();
        let (dest_first, dest_second) = dest.split_at_mut(first.len());
        dest_first.copy_from_slice(first);
        dest_second.copy_from_slice(second);

        chunk.commit_all();
        self.shared.producer.wake();

        Ok(())
    }

    /// Dequeues the oldest frame into `dest`, waiting up to `timeout` for one to arrive.
    #[inline]
    pub fn recv_timeout(
        &mut self,
        dest: &mut [u8],
        timeout: time::Duration,
    ) -> Result<(), RecvTimeoutError> {
        self.recv_deadline(dest, Some(time::Instant::now() + timeout))
    }

    /// Dequeues the oldest frame into `dest`, blocking until one arrives or the
    /// producer goes away.
    #[inline]
    pub fn recv(&mut self, dest: &mut [u8]) -> Result<(), Disconnected> {
        self.recv_deadline(dest, None).map_err(|e| match e {
            RecvTimeoutError::Disconnected(d) => d,
            RecvTimeoutError::Timeout => unreachable!("no deadline"),
        })
    }

    fn recv_deadline(
        &mut self,
        dest: &mut [u8],
        deadline: Option<time::Instant>,
    ) -> Result<(), RecvTimeoutError> {
        let frame_len = self.frame_len.get();

        let rx = &self.rx;
        if !park_until(&self.shared.consumer, deadline, || {
            rx.slots() >= frame_len || rx.is_abandoned()
        }) {
            return Err(RecvTimeoutError::Timeout);
        }

        self.try_recv(dest).map_err(|e| match e {
            TryRecvError::Disconnected(d) => d.into(),
            // only reachable if the producer is gone
            TryRecvError::Empty => RecvTimeoutError::Timeout,
        })
    }
}

impl Drop for FrameTx {
    fn drop(&mut self) {
        self.shared.consumer.wake();
    }
}

impl Drop for FrameRx {
    fn drop(&mut self) {
        self.shared.producer.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn nz(x: usize) -> num::NonZeroUsize {
        num::NonZeroUsize::new(x).unwrap()
    }

    #[test]
    fn fifo_order_and_capacity() {
        let (mut tx, mut rx) = frame_queue(nz(4), nz(2));

        assert_eq!(tx.capacity_frames(), 2);
        assert_eq!(tx.free_frames(), 2);

        tx.try_send(&[1, 1, 1, 1]).unwrap();
        tx.try_send(&[2, 2, 2, 2]).unwrap();
        assert_eq!(tx.try_send(&[3, 3, 3, 3]), Err(QueueFull));
        assert_eq!(rx.len_frames(), 2);

        let mut frame = [0; 4];
        rx.try_recv(&mut frame).unwrap();
        assert_eq!(frame, [1; 4]);

        // wraps around the end of the ring
        tx.try_send(&[3, 3, 3, 3]).unwrap();

        rx.try_recv(&mut frame).unwrap();
        assert_eq!(frame, [2; 4]);
        rx.try_recv(&mut frame).unwrap();
        assert_eq!(frame, [3; 4]);

        assert_eq!(rx.try_recv(&mut frame), Err(TryRecvError::Empty));
    }

    #[test]
    fn frames_survive_wrapping() {
        // 3-byte frames in a 9-byte ring, offset so frames straddle the end
        let (mut tx, mut rx) = frame_queue(nz(3), nz(3));
        let mut frame = [0; 3];

        for round in 0u8..10 {
            tx.try_send(&[round, round + 1, round + 2]).unwrap();
            tx.try_send(&[round; 3]).unwrap();

            rx.try_recv(&mut frame).unwrap();
            assert_eq!(frame, [round, round + 1, round + 2]);
            rx.try_recv(&mut frame).unwrap();
            assert_eq!(frame, [round; 3]);
        }
    }

    #[test]
    fn recv_timeout_on_empty_queue() {
        let (_tx, mut rx) = frame_queue(nz(8), nz(2));
        let mut frame = [0; 8];

        let start = time::Instant::now();
        let res = rx.recv_timeout(&mut frame, time::Duration::from_millis(20));

        assert_eq!(res, Err(RecvTimeoutError::Timeout));
        assert!(start.elapsed() >= time::Duration::from_millis(20));
    }

    #[test]
    fn send_timeout_on_full_queue() {
        let (mut tx, _rx) = frame_queue(nz(2), nz(1));
        tx.try_send(&[0, 0]).unwrap();

        let start = time::Instant::now();
        let res = tx.send_timeout(&[1, 1], time::Duration::from_millis(20));

        assert_eq!(res, Err(QueueFull));
        assert!(start.elapsed() >= time::Duration::from_millis(20));
    }

    #[test]
    fn blocked_receiver_is_woken() {
        let (mut tx, mut rx) = frame_queue(nz(4), nz(4));

        let consumer = thread::spawn(move || {
            let mut frame = [0; 4];
            rx.recv_timeout(&mut frame, time::Duration::from_secs(5))
                .map(|()| frame)
        });

        thread::sleep(time::Duration::from_millis(10));
        tx.try_send(&[7, 8, 9, 10]).unwrap();

        assert_eq!(consumer.join().unwrap(), Ok([7, 8, 9, 10]));
    }

    #[test]
    fn blocked_sender_is_woken() {
        let (mut tx, mut rx) = frame_queue(nz(2), nz(1));
        tx.try_send(&[1, 1]).unwrap();

        let producer = thread::spawn(move || {
            let res = tx.send_timeout(&[2, 2], time::Duration::from_secs(5));
            (res, tx)
        });

        thread::sleep(time::Duration::from_millis(10));
        let mut frame = [0; 2];
        rx.try_recv(&mut frame).unwrap();
        assert_eq!(frame, [1, 1]);

        let (res, _tx) = producer.join().unwrap();
        assert_eq!(res, Ok(()));

        rx.try_recv(&mut frame).unwrap();
        assert_eq!(frame, [2, 2]);
    }

    #[test]
    fn disconnect_after_draining() {
        let (mut tx, mut rx) = frame_queue(nz(2), nz(2));
        tx.try_send(&[5, 5]).unwrap();
        drop(tx);

        let mut frame = [0; 2];
        assert_eq!(rx.recv(&mut frame), Ok(()));
        assert_eq!(frame, [5, 5]);
        assert_eq!(rx.recv(&mut frame), Err(Disconnected));
        assert!(rx.is_abandoned());
    }

    #[test]
    fn try_recv_tells_empty_from_disconnected() {
        let (mut tx, mut rx) = frame_queue(nz(2), nz(2));
        let mut frame = [0; 2];

        assert_eq!(rx.try_recv(&mut frame), Err(TryRecvError::Empty));

        tx.try_send(&[9, 9]).unwrap();
        drop(tx);

        // committed before the drop, still delivered
        assert_eq!(rx.try_recv(&mut frame), Ok(()));
        assert_eq!(frame, [9, 9]);
        assert_eq!(rx.try_recv(&mut frame), Err(TryRecvError::Disconnected(Disconnected)));
    }

    #[test]
    #[should_panic(expected = "wrong frame size")]
    fn rejects_wrong_frame_size() {
        let (mut tx, _rx) = frame_queue(nz(4), nz(1));
        let _ = tx.try_send(&[1, 2, 3]);
    }
}
