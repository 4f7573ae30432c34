//! Engine errors.
//!
//! Only control-plane entry points (`new`, `prepare`, preset loading, device
//! start-up) return these. The audio thread never produces an error value.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(f32),

    #[error("invalid block size: {0}")]
    InvalidBlockSize(usize),

    #[error("invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("FFT size must be a power of two in 256..=8192, got {0}")]
    InvalidFftSize(usize),

    #[error("hop size {hop} must be within 64..={fft}")]
    InvalidHopSize { hop: usize, fft: usize },

    #[error("voice count must be within 1..=32, got {0}")]
    InvalidVoiceCount(usize),

    #[error("queue capacity must be a power of two >= 2, got {0}")]
    InvalidQueueCapacity(usize),

    #[error("memory pool exhausted")]
    PoolExhausted,

    #[error("invalid memory pool layout: {block_count} blocks of {block_size} samples")]
    InvalidPoolLayout { block_size: usize, block_count: usize },

    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("FFT planning failed: {0}")]
    Fft(String),

    #[cfg(feature = "device")]
    #[error("no audio output device found")]
    NoOutputDevice,

    #[cfg(feature = "device")]
    #[error("audio device error: {0}")]
    Device(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Validates the values every component shares.
pub fn validate_stream_format(sample_rate: f32, max_block: usize) -> EngineResult<()> {
    if !(sample_rate.is_finite() && sample_rate >= 8000.0 && sample_rate <= 768_000.0) {
        return Err(EngineError::InvalidSampleRate(sample_rate));
    }
    if max_block == 0 || max_block > 16384 {
        return Err(EngineError::InvalidBlockSize(max_block));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_stream_format() {
        assert!(validate_stream_format(48000.0, 512).is_ok());
        assert!(matches!(
            validate_stream_format(0.0, 512),
            Err(EngineError::InvalidSampleRate(_))
        ));
        assert!(matches!(
            validate_stream_format(f32::NAN, 512),
            Err(EngineError::InvalidSampleRate(_))
        ));
        assert!(matches!(
            validate_stream_format(48000.0, 0),
            Err(EngineError::InvalidBlockSize(0))
        ));
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::InvalidHopSize { hop: 4096, fft: 2048 };
        assert_eq!(err.to_string(), "hop size 4096 must be within 64..=2048");
        let err = EngineError::UnknownPreset("Studer".into());
        assert!(err.to_string().contains("Studer"));
    }

    #[test]
    fn test_serde_error_converts() {
        let parse: Result<u32, _> = serde_json::from_str("not json");
        let err: EngineError = parse.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
