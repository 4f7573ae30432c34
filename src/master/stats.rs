//! Master statistics, written by the audio thread and polled elsewhere.

use serde::Serialize;

use super::optimizer::QualityLevel;
use super::protection::{ProtectionState, TransitionRecord};
use crate::dsp::{Counter, Published};

/// Per-side level readings. Index 0 is left, 1 is right; mono input reads
/// the same on both.
#[derive(Debug, Default)]
pub struct LevelCells {
    pub peak: [Published<f32>; 2],
    pub rms: [Published<f32>; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Levels {
    pub peak: [f32; 2],
    pub rms: [f32; 2],
}

impl LevelCells {
    pub fn store(&self, levels: &Levels) {
        for side in 0..2 {
            self.peak[side].store_relaxed(levels.peak[side]);
            self.rms[side].store_relaxed(levels.rms[side]);
        }
    }

    pub fn load(&self) -> Levels {
        Levels {
            peak: [self.peak[0].get(), self.peak[1].get()],
            rms: [self.rms[0].get(), self.rms[1].get()],
        }
    }
}

#[derive(Debug, Default)]
pub struct MasterStats {
    /// Smoothed block time over the block deadline.
    pub cpu_usage: Published<f32>,
    pub avg_block_ms: Published<f32>,
    pub peak_block_ms: Published<f32>,
    pub input: LevelCells,
    pub output: LevelCells,
    pub active_voices: Published<usize>,
    /// Blocks that overran their deadline.
    pub dropped_frames: Counter,
    /// Blocks larger than the prepared maximum; the excess is cut.
    pub buffer_overruns: Counter,
    pub clipped_samples: Counter,
    pub limiter_gain_reduction_db: Published<f32>,
    pub protection_state: Published<ProtectionState>,
    /// Entries into each protection state, indexed by state.
    pub protection_entries: [Counter; ProtectionState::COUNT],
    pub last_protection_change_seconds: Published<f64>,
    pub quality_level: Published<QualityLevel>,
    pub queue_overflows: Published<u64>,
    pub ai_results: Counter,
    /// Note events discarded: past the per-block limit, or note-ons while
    /// the synth is not rendering.
    pub dropped_events: Counter,
    /// Parameter changes discarded for a non-finite value.
    pub rejected_params: Counter,
    /// Effect passes skipped for lack of scratch memory.
    pub skipped_effects: Counter,
    pub blocks_processed: Counter,
    /// Processing latency in samples.
    pub latency_samples: Published<usize>,
}

/// Plain copy of [`MasterStats`] for monitoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MasterStatsSnapshot {
    pub cpu_usage: f32,
    pub avg_block_ms: f32,
    pub peak_block_ms: f32,
    pub input: Levels,
    pub output: Levels,
    pub active_voices: usize,
    pub dropped_frames: u64,
    pub buffer_overruns: u64,
    pub clipped_samples: u64,
    pub limiter_gain_reduction_db: f32,
    pub protection_state: ProtectionState,
    pub protection_entries: [u64; ProtectionState::COUNT],
    pub last_protection_change_seconds: f64,
    pub quality_level: QualityLevel,
    pub queue_overflows: u64,
    pub ai_results: u64,
    pub dropped_events: u64,
    pub rejected_params: u64,
    pub skipped_effects: u64,
    pub blocks_processed: u64,
    pub latency_samples: usize,
}

impl MasterStats {
    pub fn snapshot(&self) -> MasterStatsSnapshot {
        MasterStatsSnapshot {
            cpu_usage: self.cpu_usage.get(),
            avg_block_ms: self.avg_block_ms.get(),
            peak_block_ms: self.peak_block_ms.get(),
            input: self.input.load(),
            output: self.output.load(),
            active_voices: self.active_voices.get(),
            dropped_frames: self.dropped_frames.get(),
            buffer_overruns: self.buffer_overruns.get(),
            clipped_samples: self.clipped_samples.get(),
            limiter_gain_reduction_db: self.limiter_gain_reduction_db.get(),
            protection_state: self.protection_state.get(),
            protection_entries: std::array::from_fn(|i| self.protection_entries[i].get()),
            last_protection_change_seconds: self.last_protection_change_seconds.get(),
            quality_level: self.quality_level.get(),
            queue_overflows: self.queue_overflows.get(),
            ai_results: self.ai_results.get(),
            dropped_events: self.dropped_events.get(),
            rejected_params: self.rejected_params.get(),
            skipped_effects: self.skipped_effects.get(),
            blocks_processed: self.blocks_processed.get(),
            latency_samples: self.latency_samples.get(),
        }
    }

    /// Mirrors the protection records into the shared cells.
    pub(crate) fn store_protection(
        &self,
        state: ProtectionState,
        records: &[TransitionRecord; ProtectionState::COUNT],
    ) {
        self.protection_state.store_relaxed(state);
        let mut latest = 0.0f64;
        for (cell, rec) in self.protection_entries.iter().zip(records) {
            let delta = rec.count.saturating_sub(cell.get());
            if delta > 0 {
                cell.add(delta);
            }
            latest = latest.max(rec.last_entered_seconds);
        }
        self.last_protection_change_seconds.store_relaxed(latest);
    }

    pub(crate) fn reset(&self) {
        self.cpu_usage.publish(0.0);
        self.avg_block_ms.publish(0.0);
        self.peak_block_ms.publish(0.0);
        self.input.store(&Levels::default());
        self.output.store(&Levels::default());
        self.active_voices.publish(0);
        self.dropped_frames.reset();
        self.buffer_overruns.reset();
        self.clipped_samples.reset();
        self.limiter_gain_reduction_db.publish(0.0);
        self.protection_state.publish(ProtectionState::Normal);
        self.protection_entries.iter().for_each(Counter::reset);
        self.last_protection_change_seconds.publish(0.0);
        self.quality_level.publish(QualityLevel::Full);
        self.queue_overflows.publish(0);
        self.ai_results.reset();
        self.dropped_events.reset();
        self.rejected_params.reset();
        self.skipped_effects.reset();
        self.blocks_processed.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_cells() {
        let stats = MasterStats::default();
        stats.cpu_usage.store_relaxed(0.25);
        stats.output.store(&Levels {
            peak: [0.5, 0.4],
            rms: [0.3, 0.2],
        });
        stats.dropped_frames.increment();
        stats.quality_level.store_relaxed(QualityLevel::Minimal);

        let snap = stats.snapshot();
        assert_eq!(snap.cpu_usage, 0.25);
        assert_eq!(snap.output.peak, [0.5, 0.4]);
        assert_eq!(snap.dropped_frames, 1);
        assert_eq!(snap.quality_level, QualityLevel::Minimal);

        stats.reset();
        assert_eq!(stats.snapshot(), MasterStatsSnapshot::default());
    }

    #[test]
    fn test_protection_mirror_is_idempotent() {
        let stats = MasterStats::default();
        let mut records = [TransitionRecord::default(); ProtectionState::COUNT];
        records[1] = TransitionRecord {
            count: 2,
            last_entered_seconds: 1.5,
        };
        stats.store_protection(ProtectionState::Overload, &records);
        stats.store_protection(ProtectionState::Overload, &records);
        let snap = stats.snapshot();
        assert_eq!(snap.protection_entries, [0, 2, 0, 0]);
        assert_eq!(snap.protection_state, ProtectionState::Overload);
        assert_eq!(snap.last_protection_change_seconds, 1.5);
    }
}
