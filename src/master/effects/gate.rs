//! Noise gate. Parameters: threshold (dB), attack (ms), release (ms),
//! range (dB of attenuation when closed).

use crate::dsp::{db_to_linear, AudioBuffer};

use super::{time_coeff, EffectParams};

const THRESHOLD: usize = 0;
const ATTACK: usize = 1;
const RELEASE: usize = 2;
const RANGE: usize = 3;

/// Detector release, independent of the gain release.
const DETECTOR_RELEASE_MS: f32 = 5.0;

pub struct Gate {
    sample_rate: f32,
    envelope: f32,
    gain: f32,
}

impl Gate {
    pub const DEFAULTS: [f32; 4] = [-50.0, 1.0, 50.0, -80.0];

    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            envelope: 0.0,
            gain: 1.0,
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain = 1.0;
    }

    pub fn is_open(&self) -> bool {
        self.gain > 0.5
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer, params: &EffectParams, mix: f32) {
        let threshold = db_to_linear(params[THRESHOLD].clamp(-100.0, 0.0));
        let attack = time_coeff(params[ATTACK].clamp(0.01, 100.0), self.sample_rate);
        let release = time_coeff(params[RELEASE].clamp(1.0, 2000.0), self.sample_rate);
        let floor = db_to_linear(params[RANGE].clamp(-120.0, 0.0));
        let detector = time_coeff(DETECTOR_RELEASE_MS, self.sample_rate);

        let channels = buffer.num_channels();
        for i in 0..buffer.len() {
            let mut level = 0.0f32;
            for ch in 0..channels {
                level = level.max(buffer.channel(ch)[i].abs());
            }
            self.envelope = if level > self.envelope {
                level
            } else {
                detector * self.envelope + (1.0 - detector) * level
            };

            let (target, coeff) = if self.envelope >= threshold {
                (1.0, attack)
            } else {
                (floor, release)
            };
            self.gain = coeff * self.gain + (1.0 - coeff) * target;

            for ch in 0..channels {
                let s = &mut buffer.channel_mut(ch)[i];
                let wet = *s * self.gain;
                *s += mix * (wet - *s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EffectParams {
        let mut p = [0.0; 8];
        p[..4].copy_from_slice(&Gate::DEFAULTS);
        p
    }

    #[test]
    fn test_quiet_signal_is_gated() {
        let mut gate = Gate::new(48000.0);
        let mut buf = AudioBuffer::new(1, 48000);
        buf.channel_mut(0).fill(0.001);
        gate.process(&mut buf, &params(), 1.0);
        assert!(!gate.is_open());
        assert!(buf.channel(0)[47999].abs() < 1e-6, "-60 dB noise is below -50 dB threshold");
    }

    #[test]
    fn test_loud_signal_passes() {
        let mut gate = Gate::new(48000.0);
        let mut buf = AudioBuffer::new(1, 4800);
        buf.channel_mut(0).fill(0.5);
        gate.process(&mut buf, &params(), 1.0);
        assert!(gate.is_open());
        assert!((buf.channel(0)[4799] - 0.5).abs() < 1e-4);
    }
}
