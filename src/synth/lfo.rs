//! Synth-wide low-frequency oscillator.
//!
//! Rendered once per block into a buffer shared by every voice, so all voices
//! see the same modulation phase.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

/// Waveform shapes for the LFO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LfoWaveform {
    #[default]
    Sine,
    Triangle,
    Saw,
    Square,
}

impl LfoWaveform {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(LfoWaveform::Sine),
            1 => Some(LfoWaveform::Triangle),
            2 => Some(LfoWaveform::Saw),
            3 => Some(LfoWaveform::Square),
            _ => None,
        }
    }

    /// Bipolar value (-1 to +1) at `phase` in [0, 1).
    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            LfoWaveform::Sine => (phase * TAU).sin(),
            LfoWaveform::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    3.0 - 4.0 * phase
                }
            }
            LfoWaveform::Saw => 2.0 * phase - 1.0,
            LfoWaveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfoSettings {
    pub waveform: LfoWaveform,
    /// Rate in Hz.
    pub rate: f32,
    /// Tremolo depth, 0..1. At 1 the gain swings between 0 and 1.
    pub amplitude_depth: f32,
    /// Vibrato depth in semitones.
    pub pitch_depth: f32,
}

impl Default for LfoSettings {
    fn default() -> Self {
        Self {
            waveform: LfoWaveform::Sine,
            rate: 5.0,
            amplitude_depth: 0.0,
            pitch_depth: 0.0,
        }
    }
}

impl LfoSettings {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.amplitude_depth > 0.0 || self.pitch_depth != 0.0
    }

    /// Gain multiplier for LFO value `w`.
    #[inline]
    pub fn amplitude_factor(&self, w: f32) -> f32 {
        1.0 - self.amplitude_depth * (0.5 - 0.5 * w)
    }

    /// Phase-increment multiplier for LFO value `w`.
    #[inline]
    pub fn pitch_factor(&self, w: f32) -> f32 {
        (self.pitch_depth * w / 12.0).exp2()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Lfo {
    phase: f32,
}

impl Lfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Fills `out` with bipolar LFO values.
    pub fn render(&mut self, settings: &LfoSettings, sample_rate: f32, out: &mut [f32]) {
        let inc = (settings.rate.max(0.0) / sample_rate).min(0.5);
        for o in out.iter_mut() {
            *o = settings.waveform.sample(self.phase);
            self.phase += inc;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_shapes() {
        assert!((LfoWaveform::Sine.sample(0.25) - 1.0).abs() < 1e-6);
        assert_eq!(LfoWaveform::Triangle.sample(0.0), -1.0);
        assert_eq!(LfoWaveform::Triangle.sample(0.5), 1.0);
        assert_eq!(LfoWaveform::Saw.sample(0.75), 0.5);
        assert_eq!(LfoWaveform::Square.sample(0.6), -1.0);
    }

    #[test]
    fn test_render_period() {
        let mut lfo = Lfo::new();
        let settings = LfoSettings {
            waveform: LfoWaveform::Saw,
            rate: 100.0,
            ..LfoSettings::default()
        };
        let mut out = vec![0.0; 960];
        lfo.render(&settings, 48000.0, &mut out);
        // 100 Hz at 48 kHz wraps every 480 samples.
        assert!((out[0] + 1.0).abs() < 1e-6);
        let wraps: Vec<usize> = (1..out.len()).filter(|&i| out[i] < out[i - 1]).collect();
        assert_eq!(wraps.len(), 1, "one wrap in 960 samples: {:?}", wraps);
        assert!((479..=482).contains(&wraps[0]), "wrap at {}", wraps[0]);
    }

    #[test]
    fn test_modulation_factors() {
        let off = LfoSettings::default();
        assert!(!off.is_active());
        assert_eq!(off.amplitude_factor(-1.0), 1.0);
        assert_eq!(off.pitch_factor(1.0), 1.0);

        let full = LfoSettings {
            amplitude_depth: 1.0,
            pitch_depth: 12.0,
            ..LfoSettings::default()
        };
        assert_eq!(full.amplitude_factor(-1.0), 0.0);
        assert_eq!(full.amplitude_factor(1.0), 1.0);
        assert!((full.pitch_factor(1.0) - 2.0).abs() < 1e-6, "12 semitones is an octave");
    }
}
