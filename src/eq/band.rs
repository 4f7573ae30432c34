//! One equalizer band: filter design, slope cascade and band saturation.

use serde::{Deserialize, Serialize};

use crate::dsp::biquad::{DEFAULT_FREQUENCY, DEFAULT_Q};
use crate::dsp::{
    clamp_finite, AudioBuffer, BiquadCoeffs, BiquadState, SaturationCurve, SaturationTables,
};

/// Most cascaded sections a band can use (48 dB/oct).
pub const MAX_SECTIONS: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandType {
    LowShelf,
    #[default]
    Parametric,
    HighShelf,
    HighPass,
    LowPass,
    BandPass,
    Notch,
}

impl BandType {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(BandType::LowShelf),
            1 => Some(BandType::Parametric),
            2 => Some(BandType::HighShelf),
            3 => Some(BandType::HighPass),
            4 => Some(BandType::LowPass),
            5 => Some(BandType::BandPass),
            6 => Some(BandType::Notch),
            _ => None,
        }
    }

    /// Whether the band's gain parameter affects the design.
    pub fn uses_gain(self) -> bool {
        matches!(self, BandType::LowShelf | BandType::Parametric | BandType::HighShelf)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterSlope {
    Slope6dB,
    #[default]
    Slope12dB,
    Slope24dB,
    Slope48dB,
}

impl FilterSlope {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(FilterSlope::Slope6dB),
            1 => Some(FilterSlope::Slope12dB),
            2 => Some(FilterSlope::Slope24dB),
            3 => Some(FilterSlope::Slope48dB),
            _ => None,
        }
    }

    /// Number of identical biquad sections in the cascade.
    pub fn sections(self) -> usize {
        match self {
            FilterSlope::Slope6dB | FilterSlope::Slope12dB => 1,
            FilterSlope::Slope24dB => 2,
            FilterSlope::Slope48dB => 4,
        }
    }
}

/// Plain band parameters, as stored in presets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandSettings {
    pub band_type: BandType,
    pub slope: FilterSlope,
    /// Center or corner frequency in Hz.
    pub frequency: f32,
    pub gain_db: f32,
    pub q: f32,
    pub drive: f32,
    pub saturation: f32,
    /// Wet fraction of the processed band.
    pub mix: f32,
    pub enabled: bool,
    pub solo: bool,
    pub bypassed: bool,
}

impl Default for BandSettings {
    fn default() -> Self {
        Self {
            band_type: BandType::Parametric,
            slope: FilterSlope::Slope12dB,
            frequency: 1000.0,
            gain_db: 0.0,
            q: 1.0,
            drive: 1.0,
            saturation: 0.0,
            mix: 1.0,
            enabled: true,
            solo: false,
            bypassed: false,
        }
    }
}

impl BandSettings {
    pub const MAX_GAIN_DB: f32 = 24.0;

    /// True when the band takes part in processing given the solo state.
    pub fn is_audible(&self, any_solo: bool) -> bool {
        self.enabled && !self.bypassed && (!any_solo || self.solo)
    }

    pub fn clamped_gain(&self) -> f32 {
        clamp_finite(self.gain_db, -Self::MAX_GAIN_DB, Self::MAX_GAIN_DB, 0.0)
    }

    pub fn clamped_drive(&self) -> f32 {
        clamp_finite(self.drive, 0.1, 10.0, 1.0)
    }

    pub fn clamped_saturation(&self) -> f32 {
        clamp_finite(self.saturation, 0.0, 1.0, 0.0)
    }

    pub fn clamped_mix(&self) -> f32 {
        clamp_finite(self.mix, 0.0, 1.0, 1.0)
    }

    /// Frequency for the design; non-finite values fall back to 1 kHz.
    pub fn finite_frequency(&self) -> f32 {
        if self.frequency.is_finite() {
            self.frequency
        } else {
            DEFAULT_FREQUENCY
        }
    }

    pub fn finite_q(&self) -> f32 {
        if self.q.is_finite() {
            self.q
        } else {
            DEFAULT_Q
        }
    }

    /// Designs one section from the current parameters. Frequency and Q are
    /// clamped by the biquad designs.
    pub fn design(&self, sample_rate: f32) -> BiquadCoeffs {
        let (f, q, g) = (self.finite_frequency(), self.finite_q(), self.clamped_gain());
        match self.band_type {
            BandType::LowShelf => BiquadCoeffs::low_shelf(sample_rate, f, q, g),
            BandType::Parametric => BiquadCoeffs::peaking(sample_rate, f, q, g),
            BandType::HighShelf => BiquadCoeffs::high_shelf(sample_rate, f, q, g),
            BandType::HighPass => BiquadCoeffs::high_pass(sample_rate, f, q),
            BandType::LowPass => BiquadCoeffs::low_pass(sample_rate, f, q),
            BandType::BandPass => BiquadCoeffs::band_pass(sample_rate, f, q),
            BandType::Notch => BiquadCoeffs::notch(sample_rate, f, q),
        }
    }
}

/// Runtime band: settings plus coefficients and per-channel cascade state.
#[derive(Clone, Debug)]
pub struct EqBand {
    pub settings: BandSettings,
    coeffs: BiquadCoeffs,
    /// `states[channel][section]`; sections share `coeffs`.
    states: Vec<[BiquadState; MAX_SECTIONS]>,
    peak_output: f32,
}

impl EqBand {
    pub fn new(num_channels: usize) -> Self {
        Self {
            settings: BandSettings::default(),
            coeffs: BiquadCoeffs::identity(),
            states: vec![[BiquadState::default(); MAX_SECTIONS]; num_channels],
            peak_output: 0.0,
        }
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Highest output peak seen since the last reset.
    pub fn peak_output(&self) -> f32 {
        self.peak_output
    }

    pub fn update_coefficients(&mut self, sample_rate: f32) {
        self.coeffs = self.settings.design(sample_rate);
    }

    pub fn reset(&mut self) {
        for channel in self.states.iter_mut() {
            for state in channel.iter_mut() {
                state.reset();
            }
        }
        self.peak_output = 0.0;
    }

    /// Filters `buffer` in place through the cascade, then applies band
    /// saturation. Channels beyond the prepared count are left untouched.
    pub fn process(&mut self, buffer: &mut AudioBuffer, tables: &SaturationTables) {
        let sections = self.settings.slope.sections();
        let drive = self.settings.clamped_drive();
        let amount = self.settings.clamped_saturation();
        let coeffs = self.coeffs;

        let channels = buffer.num_channels().min(self.states.len());
        for ch in 0..channels {
            let states = &mut self.states[ch][..sections];
            let samples = buffer.channel_mut(ch);
            for s in samples.iter_mut() {
                let mut y = *s;
                for state in states.iter_mut() {
                    y = state.process(y, &coeffs);
                }
                *s = y;
            }
            if amount > 1e-4 {
                for s in samples.iter_mut() {
                    *s = tables.saturate(SaturationCurve::SoftClip, *s, drive, amount);
                }
            }
            self.peak_output = self.peak_output.max(crate::dsp::peak(samples));
        }
    }

    /// Magnitude response of the whole cascade at `freq`.
    pub fn response_at(&self, freq: f32, sample_rate: f32) -> f32 {
        let sections = self.settings.slope.sections() as i32;
        self.coeffs.magnitude_at(freq, sample_rate).powi(sections)
    }
}
