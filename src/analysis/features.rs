//! Feature snapshots produced once per analysis hop.
//!
//! Everything here is `Copy` so frames can move through the feature queue
//! and the history ring without allocation.

use serde::Serialize;

use super::config::{
    MAX_PEAKS, ML_FEATURE_LEN, NUM_CHROMA, NUM_CONTRAST_BANDS, NUM_MFCC, NUM_TONNETZ,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SpectralPeak {
    /// Interpolated frequency in Hz.
    pub frequency: f32,
    pub magnitude: f32,
    pub bin: u32,
    /// Width in Hz where the peak stays above half its magnitude.
    pub bandwidth: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SpectralFeatures {
    // Spectral statistics, frequencies in Hz.
    pub centroid: f32,
    pub spread: f32,
    pub skewness: f32,
    pub kurtosis: f32,
    pub flatness: f32,
    pub rolloff_85: f32,
    pub rolloff_95: f32,
    pub slope: f32,
    pub flux: f32,
    /// Bins above 10% of the frame maximum.
    pub complexity: f32,

    pub mfcc: [f32; NUM_MFCC],
    pub chroma: [f32; NUM_CHROMA],
    pub contrast: [f32; NUM_CONTRAST_BANDS],
    pub tonnetz: [f32; NUM_TONNETZ],

    // Time domain, over the raw frame.
    pub zero_crossing_rate: f32,
    pub rms: f32,
    pub energy: f32,
    pub crest_factor: f32,

    pub pitch_hz: f32,
    pub pitch_confidence: f32,
    pub onset_strength: f32,
    pub onset_detected: bool,
    pub tempo_bpm: f32,
    pub tempo_confidence: f32,
    pub harmonic_ratio: f32,

    pub peaks: [SpectralPeak; MAX_PEAKS],
    pub num_peaks: usize,

    pub frame_number: u64,
    /// Stream time of the frame's last sample, in seconds.
    pub timestamp: f64,
    pub is_valid: bool,
}

impl SpectralFeatures {
    pub fn peaks(&self) -> &[SpectralPeak] {
        &self.peaks[..self.num_peaks.min(MAX_PEAKS)]
    }
}

/// Compact normalized vector for downstream models.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MlFeatures {
    pub vector: [f32; ML_FEATURE_LEN],
    /// Number of populated leading slots.
    pub len: usize,
    pub confidence: f32,
    pub is_valid: bool,
}

impl Default for MlFeatures {
    fn default() -> Self {
        Self {
            vector: [0.0; ML_FEATURE_LEN],
            len: 0,
            confidence: 0.0,
            is_valid: false,
        }
    }
}

impl MlFeatures {
    /// Packs MFCC, chroma, scalar statistics, contrast and tonnetz, then
    /// scales everything by the largest magnitude.
    pub fn from_features(f: &SpectralFeatures) -> Self {
        let mut out = Self::default();
        let scalars = [
            f.centroid,
            f.spread,
            f.flatness,
            f.rolloff_85,
            f.flux,
            f.zero_crossing_rate,
            f.rms,
            f.pitch_hz,
            f.tempo_bpm,
            f.onset_strength,
        ];
        let parts: [&[f32]; 5] = [&f.mfcc, &f.chroma, &scalars, &f.contrast, &f.tonnetz];
        let mut i = 0;
        for value in parts.iter().flat_map(|p| p.iter()) {
            if i == ML_FEATURE_LEN {
                break;
            }
            out.vector[i] = if value.is_finite() { *value } else { 0.0 };
            i += 1;
        }
        let max = out.vector[..i]
            .iter()
            .fold(1e-6f32, |m, v| m.max(v.abs()));
        for v in out.vector[..i].iter_mut() {
            *v /= max;
        }
        out.len = i;
        out.confidence = f.pitch_confidence.max(f.tempo_confidence);
        out.is_valid = f.is_valid;
        out
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PitchState {
    pub frequency: f32,
    pub confidence: f32,
    pub voiced: bool,
    /// 1 when the recent pitch history is steady, toward 0 as it wanders.
    pub stability: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct OnsetState {
    pub strength: f32,
    pub detected: bool,
    pub last_onset_time: f64,
    pub onset_count: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TempoState {
    pub bpm: f32,
    pub confidence: f32,
    pub stability: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HpssState {
    pub harmonic_energy: f32,
    pub percussive_energy: f32,
    /// Harmonic share of the total, 0..1.
    pub harmonic_ratio: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ml_vector_is_normalized() {
        let mut f = SpectralFeatures {
            centroid: 2000.0,
            rms: 0.5,
            is_valid: true,
            ..SpectralFeatures::default()
        };
        f.mfcc[0] = -40.0;
        f.chroma[9] = 1.0;
        f.tonnetz[0] = f32::NAN;
        let ml = MlFeatures::from_features(&f);

        assert_eq!(ml.len, NUM_MFCC + NUM_CHROMA + 10 + NUM_CONTRAST_BANDS + NUM_TONNETZ);
        assert!(ml.vector.iter().all(|v| v.abs() <= 1.0));
        assert_eq!(ml.vector[NUM_MFCC + NUM_CHROMA], 1.0, "centroid is the largest value");
        assert_eq!(ml.vector[ml.len - NUM_TONNETZ], 0.0, "non-finite values are zeroed");
        assert!(ml.is_valid);
    }

    #[test]
    fn test_peaks_slice_is_bounded() {
        let f = SpectralFeatures {
            num_peaks: 99,
            ..SpectralFeatures::default()
        };
        assert_eq!(f.peaks().len(), MAX_PEAKS);
    }
}
