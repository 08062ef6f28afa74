//! A synthetic capture device.

use core::time::Duration;
use std::{thread, time::Instant};

use voxlink_network::Shutdown;
use voxlink_utils::{
    queue::FrameTx,
    signal::{NoiseGate, SAMPLE_SIZE},
};

pub const SAMPLE_RATE: u32 = 44100;

// half of full scale
const AMPLITUDE: f64 = (i32::MAX / 2) as f64;

/// Produces a mono sine tone, one frame at a time, at the pace a real capture device
/// would.
pub struct ToneSource {
    tx: FrameTx,
    gate: NoiseGate,
    frame: Box<[u8]>,
    phase: f64,
    // phase increment per sample
    step: f64,
    dropped: u64,
}

impl ToneSource {
    pub fn new(tx: FrameTx, frequency_hz: f64, gate: NoiseGate) -> Self {
        let frame = vec![0; tx.frame_len().get()].into_boxed_slice();

        Self {
            tx,
            gate,
            frame,
            phase: 0.,
            step: core::f64::consts::TAU * frequency_hz / f64::from(SAMPLE_RATE),
            dropped: 0,
        }
    }

    /// Time covered by one frame.
    pub fn frame_duration(&self) -> Duration {
        let samples = self.frame.len() / SAMPLE_SIZE;
        Duration::from_secs_f64(samples as f64 / f64::from(SAMPLE_RATE))
    }

    /// Frames dropped because the audio-in queue was full.
    #[inline(always)]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn synthesize(&mut self) {
        for bytes in self.frame.chunks_exact_mut(SAMPLE_SIZE) {
            let sample = (self.phase.sin() * AMPLITUDE) as i32;
            bytes.copy_from_slice(&sample.to_le_bytes());

            self.phase = (self.phase + self.step) % core::f64::consts::TAU;
        }

        self.gate.apply(&mut self.frame);
    }

    /// Captures one frame and offers it to the network, without blocking.
    ///
    /// Returns whether the frame was queued.
    pub fn capture(&mut self) -> bool {
        self.synthesize();

        if self.tx.try_send(&self.frame).is_ok() {
            return true;
        }

        self.dropped += 1;

        if self.dropped.is_power_of_two() {
            log::warn!("audio-in full, {} frames dropped so far", self.dropped);
        }

        false
    }

    /// Captures frames in real time until `shutdown` is requested.
    pub fn run(mut self, shutdown: &Shutdown) {
        let period = self.frame_duration();
        let mut next = Instant::now();

        log::info!(
            "capturing {} byte frames every {period:?}",
            self.frame.len()
        );

        while !shutdown.is_requested() {
            self.capture();

            next += period;

            if let Some(rem) = next.checked_duration_since(Instant::now()) {
                thread::sleep(rem);
            } else {
                // fell behind, don't try to catch up
                next = Instant::now();
            }
        }

        log::info!("capture stopped, {} frames dropped", self.dropped());
    }
}
