//! Shared engine context.
//!
//! Built once on the control thread and passed by reference into every
//! component constructor. It replaces any process-wide settings object: all
//! shared resources are reachable from here and nowhere else.

use std::sync::Arc;

use super::config::EngineConfig;
use super::error::EngineResult;
use super::memory_pool::MemoryPool;

#[derive(Debug, Clone)]
pub struct EngineContext {
    config: EngineConfig,
    pool: Arc<MemoryPool>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let pool = MemoryPool::new(config.pool_block_samples(), config.pool_block_count)?;
        log::info!(
            "engine context: {} Hz, max block {}, {} channels",
            config.sample_rate,
            config.max_block_size,
            config.num_channels
        );
        Ok(Self {
            config,
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    #[inline]
    pub fn max_block_size(&self) -> usize {
        self.config.max_block_size
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.config.num_channels
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::EngineError;

    #[test]
    fn test_context_creation() {
        let ctx = EngineContext::new(EngineConfig::new(44100.0, 256, 2)).unwrap();
        assert_eq!(ctx.sample_rate(), 44100.0);
        assert_eq!(ctx.max_block_size(), 256);
        assert_eq!(ctx.pool().block_size(), 512);
        assert_eq!(ctx.pool().block_count(), 16);
    }

    #[test]
    fn test_context_rejects_zero_sample_rate() {
        let err = EngineContext::new(EngineConfig::new(0.0, 256, 2)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSampleRate(_)));
    }

    #[test]
    fn test_context_rejects_empty_pool() {
        let mut config = EngineConfig::default();
        config.pool_block_count = 0;
        assert!(matches!(
            EngineContext::new(config),
            Err(EngineError::InvalidPoolLayout { .. })
        ));
    }
}
