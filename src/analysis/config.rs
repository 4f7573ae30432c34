//! Analysis configuration and fixed feature dimensions.

use serde::{Deserialize, Serialize};

use crate::engine::context::EngineContext;
use crate::engine::error::{validate_stream_format, EngineError, EngineResult};

pub const MIN_FFT_SIZE: usize = 256;
pub const MAX_FFT_SIZE: usize = 8192;
pub const MIN_HOP_SIZE: usize = 64;

pub const NUM_MEL_FILTERS: usize = 40;
pub const NUM_MFCC: usize = 13;
pub const NUM_CHROMA: usize = 12;
pub const NUM_CONTRAST_BANDS: usize = 7;
pub const NUM_TONNETZ: usize = 6;
pub const MAX_PEAKS: usize = 32;
pub const ML_FEATURE_LEN: usize = 64;

pub const FEATURE_HISTORY: usize = 32;
pub const PITCH_HISTORY: usize = 16;
pub const ONSET_HISTORY: usize = 64;
pub const TEMPO_HISTORY: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum WindowType {
    #[default]
    Hann,
    Hamming,
    Blackman,
    /// Kaiser window with shape parameter beta.
    Kaiser(f32),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub hop_size: usize,
    pub window: WindowType,
    pub sample_rate: f32,
    pub max_block_size: usize,

    pub enable_mfcc: bool,
    pub enable_chroma: bool,
    pub enable_contrast: bool,
    pub enable_tonnetz: bool,
    pub enable_pitch: bool,
    pub enable_onset: bool,
    pub enable_tempo: bool,
    pub enable_hpss: bool,

    pub pitch_min_hz: f32,
    pub pitch_max_hz: f32,
    pub onset_threshold: f32,
    /// Weight of the recent flux mean in the adaptive onset threshold.
    pub onset_peak_threshold: f32,
    /// Frames that must pass after an onset before the next can fire.
    pub onset_refractory_frames: usize,
    pub tempo_min_bpm: f32,
    pub tempo_max_bpm: f32,
    pub mel_min_hz: f32,
    pub mel_max_hz: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop_size: 512,
            window: WindowType::Hann,
            sample_rate: 48000.0,
            max_block_size: 1024,
            enable_mfcc: true,
            enable_chroma: true,
            enable_contrast: true,
            enable_tonnetz: true,
            enable_pitch: true,
            enable_onset: true,
            enable_tempo: true,
            enable_hpss: true,
            pitch_min_hz: 80.0,
            pitch_max_hz: 1000.0,
            onset_threshold: 0.3,
            onset_peak_threshold: 0.6,
            onset_refractory_frames: 10,
            tempo_min_bpm: 60.0,
            tempo_max_bpm: 200.0,
            mel_min_hz: 0.0,
            mel_max_hz: 8000.0,
        }
    }
}

impl AnalysisConfig {
    pub fn from_context(ctx: &EngineContext) -> Self {
        Self {
            sample_rate: ctx.sample_rate(),
            max_block_size: ctx.max_block_size(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_stream_format(self.sample_rate, self.max_block_size)?;
        let fft = self.fft_size;
        if !fft.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft) {
            return Err(EngineError::InvalidFftSize(fft));
        }
        if !(MIN_HOP_SIZE..=fft).contains(&self.hop_size) {
            return Err(EngineError::InvalidHopSize {
                hop: self.hop_size,
                fft,
            });
        }
        Ok(())
    }

    /// Capacity of the ingestion ring in samples.
    pub fn ring_capacity(&self) -> usize {
        (8 * self.max_block_size).max(2 * self.fft_size)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_size_validation() {
        for fft in [256, 512, 1024, 2048, 4096, 8192] {
            let config = AnalysisConfig {
                fft_size: fft,
                hop_size: 128,
                ..AnalysisConfig::default()
            };
            assert!(config.validate().is_ok(), "{} is valid", fft);
        }
        for fft in [0, 128, 1000, 3000, 16384] {
            let config = AnalysisConfig {
                fft_size: fft,
                hop_size: 64,
                ..AnalysisConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(EngineError::InvalidFftSize(n)) if n == fft),
                "{} must be rejected",
                fft
            );
        }
    }

    #[test]
    fn test_hop_size_validation() {
        let mut config = AnalysisConfig::default();
        config.hop_size = 32;
        assert!(matches!(config.validate(), Err(EngineError::InvalidHopSize { hop: 32, fft: 2048 })));
        config.hop_size = 4096;
        assert!(config.validate().is_err());
        config.hop_size = 2048;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ring_capacity() {
        let config = AnalysisConfig::default();
        assert_eq!(config.ring_capacity(), 8192);
        let config = AnalysisConfig {
            fft_size: 8192,
            max_block_size: 256,
            ..AnalysisConfig::default()
        };
        assert_eq!(config.ring_capacity(), 16384);
    }

    #[test]
    fn test_json_roundtrip_keeps_window() {
        let config = AnalysisConfig {
            window: WindowType::Kaiser(8.0),
            ..AnalysisConfig::default()
        };
        let back = AnalysisConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
