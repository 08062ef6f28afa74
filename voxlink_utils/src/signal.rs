//! Sample conditioning applied on either side of the network.
//!
//! Frames carry packed, little-endian, 32-bit signed PCM samples. Both stages operate
//! in place on raw frame bytes, so they can run directly on queue buffers.

/// Size of a single sample, in bytes.
pub const SAMPLE_SIZE: usize = size_of::<i32>();

#[inline(always)]
fn for_each_sample(frame: &mut [u8], mut f: impl FnMut(i32) -> i32) {
    for bytes in frame.chunks_exact_mut(SAMPLE_SIZE) {
        let bytes: &mut [u8; SAMPLE_SIZE] = bytes.try_into().unwrap();
        *bytes = f(i32::from_le_bytes(*bytes)).to_le_bytes();
    }
}

/// Silences samples whose amplitude is below a threshold.
///
/// A threshold of `0` disables the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseGate {
    threshold: u32,
}

impl Default for NoiseGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl NoiseGate {
    pub const DEFAULT_THRESHOLD: u32 = 500_000;

    #[inline(always)]
    pub const fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    #[inline(always)]
    pub const fn disabled() -> Self {
        Self::new(0)
    }

    #[inline(always)]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    #[inline(always)]
    pub const fn is_enabled(&self) -> bool {
        self.threshold != 0
    }

    pub fn apply(&self, frame: &mut [u8]) {
        if !self.is_enabled() {
            return;
        }

        let threshold = self.threshold;
        for_each_sample(frame, |s| if s.unsigned_abs() < threshold { 0 } else { s });
    }
}

/// Scales samples by a constant gain, using 8-bit fixed point arithmetic and
/// saturating at the sample range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    gain: f32,
    // gain * 256
    q8: i64,
}

impl Default for Gain {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl Gain {
    pub const DEFAULT: f32 = 3.;
    pub const MAX: f32 = 5.;

    /// Creates a gain stage, `gain` is clamped to `0.0..=`[`Gain::MAX`].
    #[inline]
    pub fn new(gain: f32) -> Self {
        // also maps NaN to 0
        let gain = if gain > 0. { gain.min(Self::MAX) } else { 0. };

        Self {
            gain,
            q8: (gain * 256.) as i64,
        }
    }

    #[inline(always)]
    pub const fn get(&self) -> f32 {
        self.gain
    }

    /// Whether this gain is close enough to 1 to be skipped entirely.
    #[inline(always)]
    pub fn is_unity(&self) -> bool {
        (self.gain - 1.).abs() < 0.01
    }

    pub fn apply(&self, frame: &mut [u8]) {
        if self.is_unity() {
            return;
        }

        let q8 = self.q8;
        for_each_sample(frame, |s| {
            let scaled = (i64::from(s) * q8) >> 8;
            scaled.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(samples: &[i32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn samples_of(frame: &[u8]) -> Vec<i32> {
        frame
            .chunks_exact(SAMPLE_SIZE)
            .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn gate_silences_quiet_samples() {
        let mut frame = frame_of(&[100, -100, 499_999, -500_000, 600_000, i32::MIN]);

        NoiseGate::default().apply(&mut frame);

        assert_eq!(
            samples_of(&frame),
            [0, 0, 0, -500_000, 600_000, i32::MIN]
        );
    }

    #[test]
    fn disabled_gate_is_a_no_op() {
        let original = frame_of(&[1, -1, 2]);
        let mut frame = original.clone();

        NoiseGate::disabled().apply(&mut frame);

        assert_eq!(frame, original);
    }

    #[test]
    fn gain_scales_and_saturates() {
        let mut frame = frame_of(&[1000, -1000, i32::MAX / 2, i32::MIN / 2]);

        Gain::new(3.).apply(&mut frame);

        assert_eq!(samples_of(&frame), [3000, -3000, i32::MAX, i32::MIN]);
    }

    #[test]
    fn gain_is_clamped() {
        assert_eq!(Gain::new(12.).get(), Gain::MAX);
        assert_eq!(Gain::new(-1.).get(), 0.);
        assert_eq!(Gain::new(f32::NAN).get(), 0.);

        let mut frame = frame_of(&[12345]);
        Gain::new(0.).apply(&mut frame);
        assert_eq!(samples_of(&frame), [0]);
    }

    #[test]
    fn unity_gain_is_skipped() {
        let original = frame_of(&[7, -7, 1 << 20]);
        let mut frame = original.clone();

        Gain::new(1.005).apply(&mut frame);

        assert_eq!(frame, original);
    }
}
