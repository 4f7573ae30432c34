//! Per-voice state-variable filter.
//!
//! Trapezoidal (zero-delay-feedback) SVF with `g = tan(pi * fc / fs)` and
//! `k = 1 / Q`. One coefficient set serves all five responses; each sample
//! produces three taps from which the selected output is mixed.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
    BandPass,
    Notch,
    Peak,
}

impl FilterType {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(FilterType::LowPass),
            1 => Some(FilterType::HighPass),
            2 => Some(FilterType::BandPass),
            3 => Some(FilterType::Notch),
            4 => Some(FilterType::Peak),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub filter_type: FilterType,
    /// Cutoff in Hz.
    pub cutoff: f32,
    /// Resonance as Q.
    pub resonance: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            filter_type: FilterType::LowPass,
            cutoff: 1000.0,
            resonance: 0.707,
        }
    }
}

/// Coefficients derived from [`FilterSettings`] once per block.
#[derive(Clone, Copy, Debug)]
pub struct SvfCoeffs {
    filter_type: FilterType,
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
    /// Wide-open low-pass: skip the filter entirely.
    bypass: bool,
}

impl SvfCoeffs {
    pub fn new(settings: &FilterSettings, sample_rate: f32) -> Self {
        let bypass =
            settings.filter_type == FilterType::LowPass && settings.cutoff >= 0.49 * sample_rate;
        let fc = if settings.cutoff.is_finite() {
            settings.cutoff.clamp(20.0, 0.45 * sample_rate)
        } else {
            1000.0
        };
        let q = if settings.resonance.is_finite() {
            settings.resonance.clamp(0.1, 40.0)
        } else {
            0.707
        };
        let g = (PI * fc / sample_rate).tan();
        let k = 1.0 / q;
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        let a3 = g * a2;
        Self {
            filter_type: settings.filter_type,
            k,
            a1,
            a2,
            a3,
            bypass,
        }
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }
}

/// Integrator state for one voice.
#[derive(Clone, Copy, Debug, Default)]
pub struct SvfState {
    ic1: f32,
    ic2: f32,
}

impl SvfState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn process(&mut self, x: f32, c: &SvfCoeffs) -> f32 {
        if c.bypass {
            return x;
        }
        let v3 = x - self.ic2;
        let v1 = c.a1 * self.ic1 + c.a2 * v3;
        let v2 = self.ic2 + c.a2 * self.ic1 + c.a3 * v3;
        self.ic1 = 2.0 * v1 - self.ic1;
        self.ic2 = 2.0 * v2 - self.ic2;

        let low = v2;
        let band = v1;
        let high = x - c.k * v1 - v2;
        match c.filter_type {
            FilterType::LowPass => low,
            FilterType::HighPass => high,
            FilterType::BandPass => band,
            FilterType::Notch => low + high,
            FilterType::Peak => low - high,
        }
    }
}
