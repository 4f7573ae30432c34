//! One-pole parameter smoothing for gain stages.
//!
//! Gains published from the control thread jump in block-sized steps; a
//! [`SmoothedGain`] turns each jump into an exponential ramp so input, output
//! and return levels change without zipper noise.

use super::buffer::AudioBuffer;

/// A linear gain that glides toward its target.
#[derive(Clone, Debug)]
pub struct SmoothedGain {
    current: f32,
    target: f32,
    /// Per-sample pole; 0 means no smoothing.
    coeff: f32,
    time_constant_ms: f32,
    sample_rate: f32,
}

impl SmoothedGain {
    pub const DEFAULT_TIME_CONSTANT_MS: f32 = 10.0;

    /// Values this close to the target snap to it.
    const SNAP: f32 = 1e-5;

    pub fn new(initial: f32, time_constant_ms: f32, sample_rate: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            coeff: Self::pole(time_constant_ms, sample_rate),
            time_constant_ms,
            sample_rate,
        }
    }

    /// `exp(-1 / (tau * fs))`, or 0 for time constants shorter than a sample.
    fn pole(time_constant_ms: f32, sample_rate: f32) -> f32 {
        let samples = time_constant_ms * 0.001 * sample_rate;
        if samples < 1.0 {
            0.0
        } else {
            (-1.0 / samples).exp()
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.coeff = Self::pole(self.time_constant_ms, sample_rate);
    }

    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Jumps straight to `value`.
    #[inline]
    pub fn reset(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        (self.current - self.target).abs() > Self::SNAP
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let diff = self.current - self.target;
        self.current = if diff.abs() <= Self::SNAP {
            self.target
        } else {
            self.target + self.coeff * diff
        };
        self.current
    }

    /// Multiplies every channel by the ramp. All channels see the same gain
    /// curve; the ramp advances once per frame.
    pub fn apply(&mut self, buffer: &mut AudioBuffer) {
        if !self.is_smoothing() {
            let gain = self.target;
            self.current = gain;
            if gain != 1.0 {
                buffer.apply_gain(gain);
            }
            return;
        }
        let len = buffer.len();
        let channels = buffer.num_channels();
        for i in 0..len {
            let g = self.next();
            for ch in 0..channels {
                buffer.channel_mut(ch)[i] *= g;
            }
        }
    }
}

impl Default for SmoothedGain {
    fn default() -> Self {
        Self::new(1.0, Self::DEFAULT_TIME_CONSTANT_MS, 48000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_is_gradual_and_converges() {
        let mut g = SmoothedGain::new(0.0, 10.0, 48000.0);
        g.set_target(1.0);
        let first = g.next();
        let second = g.next();
        assert!(first > 0.0 && second > first && second < 0.5);

        for _ in 0..4800 {
            g.next();
        }
        assert!((g.current() - 1.0).abs() < 1e-3, "converged after 10 time constants");
    }

    #[test]
    fn test_one_time_constant_reaches_63_percent() {
        let mut g = SmoothedGain::new(0.0, 10.0, 48000.0);
        g.set_target(1.0);
        for _ in 0..480 {
            g.next();
        }
        assert!((g.current() - 0.632).abs() < 0.05, "got {}", g.current());
    }

    #[test]
    fn test_zero_time_constant_is_instant() {
        let mut g = SmoothedGain::new(0.0, 0.0, 48000.0);
        g.set_target(0.5);
        assert_eq!(g.next(), 0.5);
    }

    #[test]
    fn test_apply_to_buffer() {
        let mut buf = AudioBuffer::new(2, 64);
        for ch in buf.channels_mut() {
            ch.fill(1.0);
        }
        let mut g = SmoothedGain::new(0.5, 10.0, 48000.0);
        g.apply(&mut buf);
        assert_eq!(buf.channel(1)[10], 0.5, "settled gain is applied flat");

        for ch in buf.channels_mut() {
            ch.fill(1.0);
        }
        g.set_target(1.0);
        g.apply(&mut buf);
        let ch = buf.channel(0);
        assert!(ch[0] > 0.5 && ch[63] > ch[0] && ch[63] < 1.0, "ramp rises across the block");
        assert_eq!(buf.channel(0), buf.channel(1));
    }

    #[test]
    fn test_sample_rate_update() {
        let mut g = SmoothedGain::new(0.0, 10.0, 44100.0);
        g.set_sample_rate(96000.0);
        g.set_target(1.0);
        for _ in 0..9600 {
            g.next();
        }
        assert!((g.current() - 1.0).abs() < 1e-3);
    }
}
