//! Master orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::engine::config::MAX_CHANNELS;
use crate::engine::context::EngineContext;
use crate::engine::error::{validate_stream_format, EngineError, EngineResult};
use crate::synth::MAX_VOICES;

/// Thresholds of the emergency-protection state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Input sample magnitude counted as a clip.
    pub clip_level: f32,
    /// Fraction of clipped input samples that makes a block a violation.
    pub clip_rate_threshold: f32,
    /// CPU load (1.0 = deadline) treated as thermal saturation.
    pub thermal_cpu: f32,
    /// Consecutive violating blocks before leaving Normal.
    pub trigger_blocks: u32,
    /// Violating blocks in Overload or ThermalProtection before
    /// EmergencyLimiting.
    pub escalation_blocks: u32,
    /// Violation-free stream time before returning to Normal.
    pub cooldown_seconds: f64,
    /// Gain applied while EmergencyLimiting, in dB.
    pub emergency_gain_db: f32,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            clip_level: 0.99,
            clip_rate_threshold: 0.01,
            thermal_cpu: 0.95,
            trigger_blocks: 8,
            escalation_blocks: 64,
            cooldown_seconds: 2.0,
            emergency_gain_db: -12.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub num_channels: usize,

    pub enable_synth: bool,
    pub enable_eq: bool,
    pub enable_analysis: bool,
    pub enable_limiter: bool,

    /// CPU load above which protection and the optimizer react.
    pub cpu_threshold: f32,
    pub auto_optimization: bool,
    pub optimization_hysteresis: f32,
    /// Blocks the load must stay past a bound before the optimizer moves.
    pub optimization_blocks: u32,

    pub max_voices: usize,
    pub eq_oversampling: bool,
    pub realtime_analysis: bool,
    /// Publish the compact feature vector with every analysis frame.
    pub ml_features: bool,

    pub max_input_gain_db: f32,
    pub max_output_gain_db: f32,

    pub limiter_threshold_db: f32,
    pub limiter_lookahead_ms: f32,
    pub limiter_release_ms: f32,

    pub protection: ProtectionConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 1024,
            num_channels: 2,
            enable_synth: true,
            enable_eq: true,
            enable_analysis: true,
            enable_limiter: true,
            cpu_threshold: 0.8,
            auto_optimization: true,
            optimization_hysteresis: 0.1,
            optimization_blocks: 16,
            max_voices: MAX_VOICES,
            eq_oversampling: false,
            realtime_analysis: true,
            ml_features: true,
            max_input_gain_db: 20.0,
            max_output_gain_db: 10.0,
            limiter_threshold_db: -0.1,
            limiter_lookahead_ms: 5.0,
            limiter_release_ms: 50.0,
            protection: ProtectionConfig::default(),
        }
    }
}

impl MasterConfig {
    pub fn from_context(ctx: &EngineContext) -> Self {
        Self {
            sample_rate: ctx.sample_rate(),
            max_block_size: ctx.max_block_size(),
            num_channels: ctx.num_channels(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_stream_format(self.sample_rate, self.max_block_size)?;
        if self.num_channels == 0 || self.num_channels > MAX_CHANNELS {
            return Err(EngineError::InvalidChannelCount(self.num_channels));
        }
        if self.max_voices == 0 || self.max_voices > MAX_VOICES {
            return Err(EngineError::InvalidVoiceCount(self.max_voices));
        }
        Ok(())
    }

    /// Checks that this configuration fits the resources of `ctx`.
    pub fn validate_for(&self, ctx: &EngineContext) -> EngineResult<()> {
        self.validate()?;
        if self.max_block_size > ctx.max_block_size() {
            return Err(EngineError::InvalidBlockSize(self.max_block_size));
        }
        if self.num_channels > ctx.num_channels() {
            return Err(EngineError::InvalidChannelCount(self.num_channels));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
