//! Feed-forward compressor with a linked stereo envelope.
//!
//! Parameters: threshold (dB), ratio, attack (ms), release (ms),
//! knee (dB), makeup (dB).

use crate::dsp::{db_to_linear, linear_to_db, AudioBuffer};

use super::{time_coeff, EffectParams};

const THRESHOLD: usize = 0;
const RATIO: usize = 1;
const ATTACK: usize = 2;
const RELEASE: usize = 3;
const KNEE: usize = 4;
const MAKEUP: usize = 5;

pub struct Compressor {
    sample_rate: f32,
    /// Peak envelope, shared by all channels. Persists across blocks.
    envelope: f32,
    gain_reduction_db: f32,
}

impl Compressor {
    pub const DEFAULTS: [f32; 6] = [-20.0, 4.0, 10.0, 100.0, 6.0, 0.0];

    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            envelope: 0.0,
            gain_reduction_db: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain_reduction_db = 0.0;
    }

    /// Gain reduction applied on the last sample, in positive dB.
    pub fn gain_reduction_db(&self) -> f32 {
        self.gain_reduction_db
    }

    /// Gain reduction in dB for a detector level, soft knee when `knee > 0`.
    pub fn compute_gain_reduction(level_db: f32, threshold: f32, ratio: f32, knee: f32) -> f32 {
        let over = level_db - threshold;
        let slope = 1.0 - 1.0 / ratio;

        if knee <= 0.0 {
            return if over <= 0.0 { 0.0 } else { over * slope };
        }

        let half_knee = knee / 2.0;
        if over <= -half_knee {
            0.0
        } else if over >= half_knee {
            over * slope
        } else {
            let k = over + half_knee;
            slope * k * k / (2.0 * knee)
        }
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer, params: &EffectParams, mix: f32) {
        let threshold = params[THRESHOLD].clamp(-60.0, 0.0);
        let ratio = params[RATIO].clamp(1.0, 20.0);
        let attack = time_coeff(params[ATTACK].clamp(0.1, 100.0), self.sample_rate);
        let release = time_coeff(params[RELEASE].clamp(10.0, 1000.0), self.sample_rate);
        let knee = params[KNEE].clamp(0.0, 12.0);
        let makeup = db_to_linear(params[MAKEUP].clamp(0.0, 24.0));

        let channels = buffer.num_channels();
        for i in 0..buffer.len() {
            let mut level = 0.0f32;
            for ch in 0..channels {
                level = level.max(buffer.channel(ch)[i].abs());
            }

            let coeff = if level > self.envelope { attack } else { release };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            let reduction =
                Self::compute_gain_reduction(linear_to_db(self.envelope), threshold, ratio, knee);
            self.gain_reduction_db = reduction;
            let gain = db_to_linear(-reduction) * makeup;

            for ch in 0..channels {
                let s = &mut buffer.channel_mut(ch)[i];
                let wet = *s * gain;
                *s += mix * (wet - *s);
            }
        }
    }
}
