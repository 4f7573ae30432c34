//! Vintage console coloration applied after the bands.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::dsp::{
    clamp_finite, AudioBuffer, BiquadCoeffs, BiquadState, SaturationCurve, SaturationTables,
};

const INPUT_TRANSFORMER_HZ: f32 = 12000.0;
const OUTPUT_TRANSFORMER_HZ: f32 = 18.0;
/// Peak amplitude of injected noise at `analog_noise == 1`.
const NOISE_SCALE: f32 = 0.002;
/// Wet amount of the transformer drive stage.
const DRIVE_AMOUNT: f32 = 0.25;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalogModel {
    #[default]
    Clean,
    NeveVintage,
    SslChannel,
    ApiChannel,
    PultecEqp1a,
    FairchildLimiter,
    TubePreamp,
}

impl AnalogModel {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(AnalogModel::Clean),
            1 => Some(AnalogModel::NeveVintage),
            2 => Some(AnalogModel::SslChannel),
            3 => Some(AnalogModel::ApiChannel),
            4 => Some(AnalogModel::PultecEqp1a),
            5 => Some(AnalogModel::FairchildLimiter),
            6 => Some(AnalogModel::TubePreamp),
            _ => None,
        }
    }

    /// Parses the short names used by vintage presets.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Clean" => Some(AnalogModel::Clean),
            "Neve" => Some(AnalogModel::NeveVintage),
            "SSL" => Some(AnalogModel::SslChannel),
            "API" => Some(AnalogModel::ApiChannel),
            "Pultec" => Some(AnalogModel::PultecEqp1a),
            "Fairchild" => Some(AnalogModel::FairchildLimiter),
            "Tube" => Some(AnalogModel::TubePreamp),
            _ => None,
        }
    }

    /// `(tube warmth, tape saturation, transformer drive)` for the model.
    pub fn voicing(self) -> Option<(f32, f32, f32)> {
        match self {
            AnalogModel::Clean => None,
            AnalogModel::NeveVintage => Some((0.15, 0.10, 1.3)),
            AnalogModel::SslChannel => Some((0.05, 0.08, 1.1)),
            AnalogModel::ApiChannel => Some((0.10, 0.12, 1.2)),
            AnalogModel::PultecEqp1a => Some((0.18, 0.15, 1.25)),
            AnalogModel::FairchildLimiter => Some((0.22, 0.12, 1.15)),
            AnalogModel::TubePreamp => Some((0.35, 0.0, 1.4)),
        }
    }
}

/// Plain analog-stage parameters, as stored in presets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogSettings {
    pub model: AnalogModel,
    pub input_gain_db: f32,
    pub output_gain_db: f32,
    pub transformer_drive: f32,
    pub tube_warmth: f32,
    pub tape_saturation: f32,
    pub analog_noise: f32,
}

impl Default for AnalogSettings {
    fn default() -> Self {
        Self {
            model: AnalogModel::Clean,
            input_gain_db: 0.0,
            output_gain_db: 0.0,
            transformer_drive: 1.0,
            tube_warmth: 0.0,
            tape_saturation: 0.0,
            analog_noise: 0.0,
        }
    }
}

impl AnalogSettings {
    /// Selects a model and loads its voicing. Clean keeps the current values.
    pub fn set_model(&mut self, model: AnalogModel) {
        self.model = model;
        if let Some((warmth, tape, drive)) = model.voicing() {
            self.tube_warmth = warmth;
            self.tape_saturation = tape;
            self.transformer_drive = drive;
        }
    }
}

fn one_pole_low_pass(cutoff: f32, sample_rate: f32) -> BiquadCoeffs {
    let x = (-2.0 * PI * cutoff / sample_rate).exp();
    BiquadCoeffs {
        b0: 1.0 - x,
        b1: 0.0,
        b2: 0.0,
        a1: -x,
        a2: 0.0,
    }
}

fn one_pole_high_pass(cutoff: f32, sample_rate: f32) -> BiquadCoeffs {
    let x = (-2.0 * PI * cutoff / sample_rate).exp();
    BiquadCoeffs {
        b0: 0.5 * (1.0 + x),
        b1: -0.5 * (1.0 + x),
        b2: 0.0,
        a1: -x,
        a2: 0.0,
    }
}

/// Transformer filters, saturation stages and noise for the analog model.
#[derive(Clone, Debug)]
pub struct AnalogProcessor {
    input_transformer: BiquadCoeffs,
    output_transformer: BiquadCoeffs,
    input_state: Vec<BiquadState>,
    output_state: Vec<BiquadState>,
    noise_state: u32,
}

impl AnalogProcessor {
    pub fn new(sample_rate: f32, num_channels: usize) -> Self {
        Self {
            input_transformer: one_pole_low_pass(INPUT_TRANSFORMER_HZ, sample_rate),
            output_transformer: one_pole_high_pass(OUTPUT_TRANSFORMER_HZ, sample_rate),
            input_state: vec![BiquadState::default(); num_channels],
            output_state: vec![BiquadState::default(); num_channels],
            noise_state: 0x2545_f491,
        }
    }

    pub fn reset(&mut self) {
        self.input_state.iter_mut().for_each(BiquadState::reset);
        self.output_state.iter_mut().for_each(BiquadState::reset);
    }

    #[inline]
    fn next_noise(&mut self) -> f32 {
        self.noise_state = self
            .noise_state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        let r = ((self.noise_state >> 9) & 0x7f_ffff) as f32 / 0x7f_ffff as f32;
        2.0 * r - 1.0
    }

    /// Applies the analog chain in place. Callers skip this for the clean model.
    pub fn process(
        &mut self,
        buffer: &mut AudioBuffer,
        settings: &AnalogSettings,
        tables: &SaturationTables,
    ) {
        let warmth = clamp_finite(settings.tube_warmth, 0.0, 1.0, 0.0);
        let tape = clamp_finite(settings.tape_saturation, 0.0, 1.0, 0.0);
        let noise = clamp_finite(settings.analog_noise, 0.0, 1.0, 0.0) * NOISE_SCALE;
        let drive = clamp_finite(settings.transformer_drive, 0.1, 10.0, 1.0);

        let channels = buffer.num_channels().min(self.input_state.len());
        for ch in 0..channels {
            let samples = buffer.channel_mut(ch);
            for s in samples.iter_mut() {
                let mut x = self.input_state[ch].process(*s, &self.input_transformer);
                if warmth > 0.0 {
                    x = tables.saturate(SaturationCurve::Tube, x, 1.0, warmth);
                }
                if tape > 0.0 {
                    x = tables.saturate(SaturationCurve::Tape, x, 1.0, tape);
                }
                if noise > 0.0 {
                    x += self.next_noise() * noise;
                }
                if drive > 1.0 {
                    x = tables.saturate(SaturationCurve::SoftClip, x, drive, DRIVE_AMOUNT);
                }
                *s = self.output_state[ch].process(x, &self.output_transformer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_voicings() {
        let mut s = AnalogSettings::default();
        s.set_model(AnalogModel::NeveVintage);
        assert_eq!((s.tube_warmth, s.tape_saturation, s.transformer_drive), (0.15, 0.10, 1.3));
        s.set_model(AnalogModel::TubePreamp);
        assert_eq!((s.tube_warmth, s.tape_saturation, s.transformer_drive), (0.35, 0.0, 1.4));
        s.set_model(AnalogModel::Clean);
        assert_eq!(s.model, AnalogModel::Clean);
        assert_eq!(s.tube_warmth, 0.35, "clean keeps the manual values");
    }

    #[test]
    fn test_model_names() {
        for (name, model) in [
            ("Neve", AnalogModel::NeveVintage),
            ("SSL", AnalogModel::SslChannel),
            ("API", AnalogModel::ApiChannel),
            ("Pultec", AnalogModel::PultecEqp1a),
            ("Fairchild", AnalogModel::FairchildLimiter),
            ("Tube", AnalogModel::TubePreamp),
        ] {
            assert_eq!(AnalogModel::from_name(name), Some(model));
        }
        assert_eq!(AnalogModel::from_name("Moog"), None);
    }

    #[test]
    fn test_transformers_pass_midband() {
        let lp = one_pole_low_pass(INPUT_TRANSFORMER_HZ, 48000.0);
        let hp = one_pole_high_pass(OUTPUT_TRANSFORMER_HZ, 48000.0);
        assert!((lp.magnitude_at(1000.0, 48000.0) - 1.0).abs() < 0.02);
        assert!((hp.magnitude_at(1000.0, 48000.0) - 1.0).abs() < 0.01);
        assert!(hp.magnitude_at(0.0, 48000.0) < 1e-6, "output transformer blocks DC");
        assert!(lp.magnitude_at(20000.0, 48000.0) < 0.75);
    }

    #[test]
    fn test_chain_removes_dc_and_stays_bounded() {
        let mut settings = AnalogSettings::default();
        settings.set_model(AnalogModel::TubePreamp);
        let mut proc = AnalogProcessor::new(48000.0, 1);
        let tables = SaturationTables::new();
        let mut buffer = AudioBuffer::new(1, 48000);
        for s in buffer.channel_mut(0).iter_mut() {
            *s = 0.5;
        }
        proc.process(&mut buffer, &settings, &tables);
        let tail = &buffer.channel(0)[40000..];
        assert!(tail.iter().all(|s| s.abs() < 0.01), "DC decays through the 18 Hz high-pass");
        assert!(buffer.peak(0) < 1.0);
    }

    #[test]
    fn test_noise_is_bounded() {
        let mut proc = AnalogProcessor::new(48000.0, 1);
        for _ in 0..10_000 {
            let n = proc.next_noise();
            assert!((-1.0..=1.0).contains(&n));
        }
    }
}
