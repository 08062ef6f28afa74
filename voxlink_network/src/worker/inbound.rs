//! Network to audio-out queue and message handler.

use core::time::Duration;
use std::sync::Arc;

use voxlink_utils::queue::FrameTx;

use crate::{
    Error,
    link::Link,
    proto::{HeaderPrefix, Opcode, decode},
    transport::{Channel, Stream},
};

/// Receives text messages from the server.
///
/// Handlers are called on the inbound worker's thread, and delay audio reception for
/// as long as they run.
pub trait MessageHandler: Send {
    fn on_text(&mut self, text: &str);
}

impl<F: FnMut(&str) + Send> MessageHandler for F {
    #[inline(always)]
    fn on_text(&mut self, text: &str) {
        self(text)
    }
}

/// What a single [`Inbound::poll`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    /// No live channel, the worker idled.
    Idle,
    /// An audio frame was enqueued.
    Audio,
    /// An audio frame was dropped, the audio-out queue stayed full.
    Dropped,
    /// A binary frame of unexpected size was discarded.
    Discarded { len: usize },
    /// A text message was received.
    Text,
    /// A frame with an opcode we don't act upon was skipped.
    Ignored(Opcode),
    /// A frame too large to be received was skipped.
    TooLarge { len: u64 },
    /// The server closed the session, the channel was invalidated.
    Closed,
    /// Reading failed, the channel was invalidated.
    Lost,
}

pub struct Inbound<S> {
    link: Arc<Link<S>>,
    frames: FrameTx,
    pub(crate) handler: Option<Box<dyn MessageHandler>>,
    payload: Box<[u8]>,
    enqueue_timeout: Duration,
    idle: Duration,
}

impl<S: Stream> Inbound<S> {
    /// Idle period while there is no live channel.
    pub const IDLE: Duration = Duration::from_secs(1);

    /// `max_payload` bounds the size of accepted frames, and must be at least the
    /// audio-out queue's frame length.
    pub fn new(
        link: Arc<Link<S>>,
        frames: FrameTx,
        max_payload: usize,
        enqueue_timeout: Duration,
    ) -> Self {
        assert!(
            max_payload >= frames.frame_len().get(),
            "ERROR: max_payload is smaller than the frame size"
        );

        Self {
            link,
            frames,
            handler: None,
            payload: vec![0; max_payload].into_boxed_slice(),
            enqueue_timeout,
            idle: Self::IDLE,
        }
    }

    pub fn with_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Performs one iteration: receives one frame from the current channel and
    /// dispatches it.
    pub fn poll(&mut self) -> InboundEvent {
        let Some(channel) = self.link.current() else {
            super::idle(&self.link, self.idle);
            return InboundEvent::Idle;
        };

        match self.receive(&channel) {
            Ok(event) => event,
            Err(e) => {
                debug_assert!(e.is_fatal(), "recoverable errors are handled in place");

                if channel.invalidate() {
                    log::warn!("session {}: receive failed: {e}", channel.session());
                }
                InboundEvent::Lost
            }
        }
    }

    /// Polls until shutdown is requested.
    pub fn run(mut self) {
        while !self.link.is_shutdown() {
            self.poll();
        }
    }

    fn receive(&mut self, channel: &Channel<S>) -> Result<InboundEvent, Error> {
        let mut prefix = [0; HeaderPrefix::LEN];
        channel.receive_exact(&mut prefix)?;

        let header = HeaderPrefix::parse(prefix);
        header.check_server_role()?;

        let mut extended = [0; 8];
        let extended = &mut extended[..header.extended_len_bytes()];
        channel.receive_exact(extended)?;

        let len = header.payload_len(extended)?;

        let len = match decode::check_capacity(len, self.payload.len()).map_err(Error::from) {
            Ok(len) => len,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log::warn!("session {}: {e}, dropping", channel.session());
                self.drain(channel, len)?;
                return Ok(InboundEvent::TooLarge { len });
            }
        };

        let payload = &mut self.payload[..len];
        channel.receive_exact(payload)?;

        Ok(match header.opcode {
            Opcode::Binary => self.on_audio(channel, len),
            Opcode::Text => {
                let text = String::from_utf8_lossy(&self.payload[..len]);

                if let Some(handler) = self.handler.as_mut() {
                    handler.on_text(&text);
                } else {
                    log::debug!("session {}: unhandled message: {text}", channel.session());
                }

                InboundEvent::Text
            }
            Opcode::Close => {
                if channel.invalidate() {
                    log::info!("session {}: closed by server", channel.session());
                }
                InboundEvent::Closed
            }
            opcode => {
                log::debug!("session {}: ignoring {opcode:?} frame", channel.session());
                InboundEvent::Ignored(opcode)
            }
        })
    }

    fn on_audio(&mut self, channel: &Channel<S>, len: usize) -> InboundEvent {
        if len != self.frames.frame_len().get() {
            log::warn!(
                "session {}: discarding {len} byte binary frame, expected {}",
                channel.session(),
                self.frames.frame_len(),
            );
            return InboundEvent::Discarded { len };
        }

        match self
            .frames
            .send_timeout(&self.payload[..len], self.enqueue_timeout)
        {
            Ok(()) => InboundEvent::Audio,
            Err(e) => {
                log::warn!("session {}: audio-out {e}, dropping frame", channel.session());
                InboundEvent::Dropped
            }
        }
    }

    // skips an oversized payload to keep framing intact
    fn drain(&mut self, channel: &Channel<S>, len: u64) -> Result<(), Error> {
        let mut remaining = len;

        while remaining > 0 {
            let chunk = self.payload.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            channel.receive_exact(&mut self.payload[..chunk])?;
            remaining -= chunk as u64;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Shutdown, transport::mock::ScriptedStream};
    use core::num::NonZeroUsize;
    use std::{io, sync::Mutex};
    use voxlink_utils::queue::{FrameRx, frame_queue};

    const FRAME: usize = 2048;

    fn server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x80 | opcode];

        match payload.len() {
            len @ 0..=125 => frame.push(len as u8),
            len @ 126..=0xFFFF => {
                frame.push(126);
                frame.extend((len as u16).to_be_bytes());
            }
            len => {
                frame.push(127);
                frame.extend((len as u64).to_be_bytes());
            }
        }

        frame.extend_from_slice(payload);
        frame
    }

    fn setup(
        stream: ScriptedStream,
        capacity: usize,
    ) -> (
        Arc<Channel<ScriptedStream>>,
        FrameRx,
        Inbound<ScriptedStream>,
    ) {
        let link = Arc::new(Link::new(Shutdown::new()));
        let channel = Arc::new(Channel::new(stream, 1));
        link.install(channel.clone());

        let (tx, rx) = frame_queue(
            NonZeroUsize::new(FRAME).unwrap(),
            NonZeroUsize::new(capacity).unwrap(),
        );

        let inbound = Inbound::new(link, tx, 2200, Duration::from_millis(10));

        (channel, rx, inbound)
    }

    #[test]
    fn routes_audio_and_text() {
        let stream = ScriptedStream::new()
            .then_read(server_frame(0x2, &[7; FRAME]))
            .then_read(server_frame(0x1, "bonjour".as_bytes()));

        let received = Arc::new(Mutex::new(Vec::new()));

        let (_channel, mut rx, inbound) = setup(stream, 4);
        let mut inbound = inbound.with_handler({
            let received = received.clone();
            move |text: &str| received.lock().unwrap().push(text.to_owned())
        });

        assert_eq!(inbound.poll(), InboundEvent::Audio);
        assert_eq!(inbound.poll(), InboundEvent::Text);

        let mut frame = [0; FRAME];
        rx.try_recv(&mut frame).unwrap();
        assert!(frame.iter().all(|&b| b == 7));

        assert_eq!(*received.lock().unwrap(), ["bonjour"]);
    }

    #[test]
    fn full_queue_drops_frame_and_continues() {
        let stream = ScriptedStream::new()
            .then_read(server_frame(0x2, &[2; FRAME]))
            .then_read(server_frame(0x2, &[3; FRAME]));

        let (channel, mut rx, mut inbound) = setup(stream, 1);

        inbound.frames.try_send(&[1; FRAME]).unwrap();

        assert_eq!(inbound.poll(), InboundEvent::Dropped);
        assert!(channel.is_live());

        let mut frame = [0; FRAME];
        rx.try_recv(&mut frame).unwrap();
        assert_eq!(frame[0], 1);

        assert_eq!(inbound.poll(), InboundEvent::Audio);
        rx.try_recv(&mut frame).unwrap();
        assert_eq!(frame[0], 3);
    }

    #[test]
    fn unexpected_sizes_are_discarded() {
        let stream = ScriptedStream::new()
            .then_read(server_frame(0x2, &[0; 100]))
            .then_read(server_frame(0x2, &[0; FRAME]));

        let (channel, rx, mut inbound) = setup(stream, 4);

        assert_eq!(inbound.poll(), InboundEvent::Discarded { len: 100 });
        assert_eq!(inbound.poll(), InboundEvent::Audio);
        assert_eq!(rx.len_frames(), 1);
        assert!(channel.is_live());
    }

    #[test]
    fn oversized_payload_is_drained() {
        let stream = ScriptedStream::new()
            .then_read(server_frame(0x2, &[9; 70000]))
            .then_read(server_frame(0x1, b"after"));

        let (channel, rx, inbound) = setup(stream, 4);
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut inbound = inbound.with_handler({
            let received = received.clone();
            move |text: &str| received.lock().unwrap().push(text.to_owned())
        });

        assert_eq!(inbound.poll(), InboundEvent::TooLarge { len: 70000 });
        assert_eq!(rx.len_frames(), 0);
        assert!(channel.is_live());

        assert_eq!(inbound.poll(), InboundEvent::Text);
        assert_eq!(*received.lock().unwrap(), ["after"]);
    }

    #[test]
    fn other_opcodes_are_skipped() {
        let stream = ScriptedStream::new()
            .then_read(server_frame(0x9, b"ping"))
            .then_read(server_frame(0x1, b"still here"));

        let (channel, _rx, mut inbound) = setup(stream, 4);

        assert_eq!(inbound.poll(), InboundEvent::Ignored(Opcode::Other(0x9)));
        assert_eq!(inbound.poll(), InboundEvent::Text);
        assert!(channel.is_live());
    }

    #[test]
    fn close_frame_invalidates() {
        let (channel, _rx, mut inbound) = setup(ScriptedStream::new().then_read([0x88, 0x00]), 4);

        assert_eq!(inbound.poll(), InboundEvent::Closed);
        assert!(!channel.is_live());
        assert_eq!(inbound.poll(), InboundEvent::Idle);
    }

    #[test]
    fn masked_frame_invalidates() {
        let stream = ScriptedStream::new().then_read([0x82, 0x84, 1, 2, 3, 4, 0, 0, 0, 0]);
        let (channel, _rx, mut inbound) = setup(stream, 4);

        assert_eq!(inbound.poll(), InboundEvent::Lost);
        assert!(!channel.is_live());
    }

    #[test]
    fn invalid_length_invalidates_without_draining() {
        let mut frame = vec![0x82, 0x7F];
        frame.extend((1u64 << 63).to_be_bytes());

        let stream = ScriptedStream::new()
            .then_read(frame)
            .then_read(server_frame(0x1, b"unreachable"));
        let (channel, _rx, mut inbound) = setup(stream, 4);

        assert_eq!(inbound.poll(), InboundEvent::Lost);
        assert!(!channel.is_live());
        assert_eq!(inbound.poll(), InboundEvent::Idle);
    }

    #[test]
    fn read_errors_invalidate() {
        let stream = ScriptedStream::new()
            .then_read([0x82, 0x7E])
            .then_fail(io::ErrorKind::ConnectionReset);
        let (channel, _rx, mut inbound) = setup(stream, 4);

        assert_eq!(inbound.poll(), InboundEvent::Lost);
        assert!(!channel.is_live());

        // end of stream
        let (channel, _rx, mut inbound) = setup(ScriptedStream::new(), 4);
        assert_eq!(inbound.poll(), InboundEvent::Lost);
        assert!(!channel.is_live());
    }

    #[test]
    fn partial_reads_are_reassembled() {
        let frame = server_frame(0x2, &[5; FRAME]);
        let (head, tail) = frame.split_at(3);

        let stream = ScriptedStream::new()
            .then_read(head)
            .then_fail_n(io::ErrorKind::WouldBlock, 2)
            .then_read(tail);

        let (_channel, rx, mut inbound) = setup(stream, 4);

        assert_eq!(inbound.poll(), InboundEvent::Audio);
        assert_eq!(rx.len_frames(), 1);
    }
}
