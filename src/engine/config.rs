//! Engine-wide configuration.

use serde::{Deserialize, Serialize};

use super::channels::QueueConfig;
use super::error::{validate_stream_format, EngineError, EngineResult};

/// Channel counts the engine accepts.
pub const MAX_CHANNELS: usize = 8;

/// Stream format and shared resources, fixed at start-up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub num_channels: usize,
    /// Samples per memory-pool block; 0 means "one block per channel of
    /// `max_block_size`".
    pub pool_block_size: usize,
    pub pool_block_count: usize,
    pub queues: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 1024,
            num_channels: 2,
            pool_block_size: 0,
            pool_block_count: 16,
            queues: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new(sample_rate: f32, max_block_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            max_block_size,
            num_channels,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_stream_format(self.sample_rate, self.max_block_size)?;
        if self.num_channels == 0 || self.num_channels > MAX_CHANNELS {
            return Err(EngineError::InvalidChannelCount(self.num_channels));
        }
        Ok(())
    }

    /// Effective pool block size in samples.
    pub fn pool_block_samples(&self) -> usize {
        if self.pool_block_size == 0 {
            self.max_block_size * self.num_channels
        } else {
            self.pool_block_size
        }
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
