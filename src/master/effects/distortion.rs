//! Waveshaping distortion with a post tone filter.
//!
//! Parameters: drive (0..1), tone (0..1), type (0 soft, 1 hard, 2 fold,
//! 3 bit), output (dB).

use std::f32::consts::PI;

use crate::dsp::{db_to_linear, AudioBuffer};

use super::EffectParams;

const DRIVE: usize = 0;
const TONE: usize = 1;
const TYPE: usize = 2;
const OUTPUT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistortionType {
    /// tanh saturation.
    Soft,
    /// Clip at a threshold that falls with drive.
    Hard,
    /// Double-sine wave folder.
    Fold,
    /// Bit-depth reduction.
    Bit,
}

impl DistortionType {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => DistortionType::Hard,
            2 => DistortionType::Fold,
            3 => DistortionType::Bit,
            _ => DistortionType::Soft,
        }
    }

    #[inline]
    pub fn shape(self, x: f32, drive: f32) -> f32 {
        match self {
            DistortionType::Soft => (x * (1.0 + drive * 10.0)).tanh(),
            DistortionType::Hard => {
                let threshold = (1.0 - drive * 0.9).max(0.1);
                (x.clamp(-threshold, threshold) / threshold).clamp(-1.0, 1.0)
            }
            DistortionType::Fold => ((x * (1.0 + drive * 4.0)).sin() * 2.0).sin(),
            DistortionType::Bit => {
                let bits = (16.0 - drive * 14.0).max(2.0);
                let levels = 2.0f32.powf(bits);
                (x * levels).round() / levels
            }
        }
    }
}

pub struct Distortion {
    sample_rate: f32,
    tone_state: Vec<f32>,
}

impl Distortion {
    pub const DEFAULTS: [f32; 4] = [0.3, 0.7, 0.0, 0.0];

    pub fn new(sample_rate: f32, num_channels: usize) -> Self {
        Self {
            sample_rate,
            tone_state: vec![0.0; num_channels],
        }
    }

    pub fn reset(&mut self) {
        self.tone_state.fill(0.0);
    }

    /// Tone 0 is dark (200 Hz), tone 1 is open (20 kHz).
    fn tone_coefficient(&self, tone: f32) -> f32 {
        let freq = 200.0 * 100.0f32.powf(tone);
        let omega = 2.0 * PI * freq.min(self.sample_rate * 0.49) / self.sample_rate;
        (-omega).exp()
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer, params: &EffectParams, mix: f32) {
        let drive = params[DRIVE].clamp(0.0, 1.0);
        let coeff = self.tone_coefficient(params[TONE].clamp(0.0, 1.0));
        let kind = DistortionType::from_index(params[TYPE].max(0.0) as usize);
        let output = db_to_linear(params[OUTPUT].clamp(-24.0, 12.0));

        for (ch, z1) in buffer.channels_mut().zip(self.tone_state.iter_mut()) {
            for s in ch.iter_mut() {
                let shaped = kind.shape(*s, drive);
                *z1 = shaped * (1.0 - coeff) + *z1 * coeff;
                let wet = *z1 * output;
                *s += mix * (wet - *s);
            }
        }
    }
}
