//! A playback device writing raw PCM to a file, or nowhere.

use std::io::{self, Write};

use voxlink_utils::{queue::FrameRx, signal::Gain};

pub struct PlaybackSink<W> {
    rx: FrameRx,
    gain: Gain,
    out: Option<W>,
    frame: Box<[u8]>,
    played: u64,
}

impl<W: Write> PlaybackSink<W> {
    /// Played back frames are written to `out`, or discarded if it is `None`.
    pub fn new(rx: FrameRx, gain: Gain, out: Option<W>) -> Self {
        let frame = vec![0; rx.frame_len().get()].into_boxed_slice();

        Self {
            rx,
            gain,
            out,
            frame,
            played: 0,
        }
    }

    /// Plays frames until the network side of the queue goes away.
    pub fn run(mut self) -> io::Result<u64> {
        log::info!("playback started, gain {}", self.gain.get());

        while self.rx.recv(&mut self.frame).is_ok() {
            self.gain.apply(&mut self.frame);

            if let Some(out) = self.out.as_mut() {
                out.write_all(&self.frame)?;
            }

            self.played += 1;
        }

        if let Some(out) = self.out.as_mut() {
            out.flush()?;
        }

        log::info!("playback stopped after {} frames", self.played);

        Ok(self.played)
    }
}
