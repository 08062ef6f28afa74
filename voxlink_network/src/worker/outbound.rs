//! Audio-in queue to network.

use core::time::Duration;
use std::sync::Arc;

use voxlink_utils::queue::{FrameRx, RecvTimeoutError};

use crate::{
    Error, RandomMask,
    link::Link,
    proto::{self, MaskKeySource, Opcode},
    transport::Stream,
};

/// What a single [`Outbound::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundEvent {
    /// No live channel, the worker idled.
    Idle,
    /// No frame arrived in time.
    Empty,
    /// A frame was written.
    Sent,
    /// The channel was lost while waiting for a frame, and no other took its place.
    /// The frame was dropped.
    Abandoned,
    /// Sending failed, the channel was invalidated.
    Lost,
    /// The audio-in queue's producer is gone, there will be no more frames.
    Finished,
}

pub struct Outbound<S, M = RandomMask> {
    link: Arc<Link<S>>,
    frames: FrameRx,
    encoder: proto::Encoder<M>,
    // one audio frame, and its encoding
    frame: Box<[u8]>,
    wire: Box<[u8]>,
    session: Option<u64>,
    sent: u64,
    idle: Duration,
    recv_timeout: Duration,
}

impl<S: Stream> Outbound<S> {
    pub fn new(link: Arc<Link<S>>, frames: FrameRx) -> Self {
        Self::with_keys(link, frames, RandomMask)
    }
}

impl<S: Stream, M: MaskKeySource> Outbound<S, M> {
    /// Idle period while there is no live channel.
    pub const IDLE: Duration = Duration::from_millis(100);
    /// How long to wait for a frame before checking the channel again.
    pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);
    /// Sent frames are logged every this many frames.
    pub const LOG_PERIOD: u64 = 50;

    pub fn with_keys(link: Arc<Link<S>>, frames: FrameRx, keys: M) -> Self {
        let frame_len = frames.frame_len().get();
        let wire_len = proto::header_len(frame_len as u64, true) + frame_len;

        Self {
            link,
            frames,
            encoder: proto::Encoder::new(keys),
            frame: vec![0; frame_len].into_boxed_slice(),
            wire: vec![0; wire_len].into_boxed_slice(),
            session: None,
            sent: 0,
            idle: Self::IDLE,
            recv_timeout: Self::RECV_TIMEOUT,
        }
    }

    /// Frames sent in the current session.
    #[inline(always)]
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Performs one iteration: waits for a frame and sends it on the current channel.
    pub fn poll(&mut self) -> OutboundEvent {
        if self.link.current().is_none() {
            super::idle(&self.link, self.idle);
            return OutboundEvent::Idle;
        }

        match self.frames.recv_timeout(&mut self.frame, self.recv_timeout) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => return OutboundEvent::Empty,
            Err(RecvTimeoutError::Disconnected(_)) => return OutboundEvent::Finished,
        }

        // the session may have changed during the wait
        let Some(channel) = self.link.current() else {
            return OutboundEvent::Abandoned;
        };

        if self.session != Some(channel.session()) {
            self.session = Some(channel.session());
            self.sent = 0;
            log::info!("session {}: streaming audio", channel.session());
        }

        let result = self
            .encoder
            .encode(Opcode::Binary, &self.frame, &mut self.wire)
            .map_err(Error::from)
            .and_then(|len| channel.send(&self.wire[..len]));

        if let Err(e) = result {
            if channel.invalidate() {
                log::warn!("session {}: send failed: {e}", channel.session());
            }
            return OutboundEvent::Lost;
        }

        self.sent += 1;

        if self.sent % Self::LOG_PERIOD == 0 {
            log::debug!("session {}: {} frames sent", channel.session(), self.sent);
        }

        OutboundEvent::Sent
    }

    /// Polls until shutdown is requested or the audio-in queue is abandoned.
    pub fn run(mut self) {
        while !self.link.is_shutdown() {
            if self.poll() == OutboundEvent::Finished {
                log::info!("audio-in closed, outbound worker exiting");
                break;
            }
        }
    }
}
