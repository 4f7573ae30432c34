//! Per-block processing context.
//!
//! Carries the runtime information processors need while rendering a block:
//! sample rate, the active block length and the transport position.

use serde::{Deserialize, Serialize};

/// Transport play state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Recording,
}

/// Transport/timeline state owned by the master.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportState {
    pub state: PlayState,
    /// Position in samples from the start of the timeline.
    pub sample_position: u64,
    /// Current tempo in beats per minute (if known).
    pub tempo_bpm: Option<f32>,
    pub time_sig_numerator: u8,
    pub time_sig_denominator: u8,
}

impl TransportState {
    /// Stopped at position 0, no tempo, 4/4.
    pub fn new() -> Self {
        Self {
            state: PlayState::Stopped,
            sample_position: 0,
            tempo_bpm: None,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
        }
    }

    #[inline]
    pub fn is_rolling(&self) -> bool {
        matches!(self.state, PlayState::Playing | PlayState::Recording)
    }

    /// Moves the play head to `seconds`, clamped at zero.
    pub fn locate(&mut self, seconds: f64, sample_rate: f32) {
        self.sample_position = (seconds.max(0.0) * sample_rate as f64).round() as u64;
    }

    /// Advances the play head by one block if the transport is rolling.
    #[inline]
    pub fn advance(&mut self, frames: usize) {
        if self.is_rolling() {
            self.sample_position += frames as u64;
        }
    }

    pub fn position_seconds(&self, sample_rate: f32) -> f64 {
        self.sample_position as f64 / sample_rate as f64
    }

    /// Current position in beats (if tempo is known).
    pub fn position_in_beats(&self, sample_rate: f32) -> Option<f64> {
        self.tempo_bpm
            .map(|bpm| self.position_seconds(sample_rate) * bpm as f64 / 60.0)
    }
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new()
    }
}

/// Context handed to processors for one block.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    pub sample_rate: f32,
    /// Number of frames in the current block.
    pub block_size: usize,
    pub transport: TransportState,
}

impl ProcessContext {
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            transport: TransportState::new(),
        }
    }

    /// Wall-clock budget for one block, in seconds.
    pub fn block_duration(&self) -> f32 {
        self.block_size as f32 / self.sample_rate
    }

    pub fn ms_to_samples(&self, ms: f32) -> usize {
        (ms * 0.001 * self.sample_rate).round().max(0.0) as usize
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate / 2.0
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(48000.0, 512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_default() {
        let transport = TransportState::new();
        assert_eq!(transport.state, PlayState::Stopped);
        assert_eq!(transport.sample_position, 0);
        assert!(!transport.is_rolling());
    }

    #[test]
    fn test_transport_advances_only_while_rolling() {
        let mut transport = TransportState::new();
        transport.advance(512);
        assert_eq!(transport.sample_position, 0);

        transport.state = PlayState::Recording;
        transport.advance(512);
        assert_eq!(transport.sample_position, 512);

        transport.state = PlayState::Paused;
        transport.advance(512);
        assert_eq!(transport.sample_position, 512);
    }

    #[test]
    fn test_transport_locate_and_beats() {
        let mut transport = TransportState::new();
        transport.tempo_bpm = Some(120.0);
        transport.locate(1.0, 48000.0);
        assert_eq!(transport.sample_position, 48000);
        let beats = transport.position_in_beats(48000.0).unwrap();
        assert!((beats - 2.0).abs() < 1e-9, "one second at 120 BPM is two beats");

        transport.locate(-3.0, 48000.0);
        assert_eq!(transport.sample_position, 0);
    }

    #[test]
    fn test_process_context_conversions() {
        let ctx = ProcessContext::new(48000.0, 480);
        assert!((ctx.block_duration() - 0.01).abs() < 1e-6);
        assert_eq!(ctx.ms_to_samples(5.0), 240);
        assert_eq!(ctx.nyquist(), 24000.0);
    }
}
