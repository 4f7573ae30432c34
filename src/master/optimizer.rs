//! Automatic quality scaling under CPU pressure.

use serde::{Deserialize, Serialize};

use super::protection::ProtectionState;
use crate::dsp::published::AtomicBits;

/// Processing quality, from full down to the cheapest usable setting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityLevel {
    #[default]
    Full,
    /// Half the voices.
    ReducedPolyphony,
    /// Half the voices and reduced-quality analysis.
    ReducedAnalysis,
    /// A quarter of the voices and no analysis.
    Minimal,
}

impl QualityLevel {
    pub fn lower(self) -> Self {
        match self {
            QualityLevel::Full => QualityLevel::ReducedPolyphony,
            QualityLevel::ReducedPolyphony => QualityLevel::ReducedAnalysis,
            _ => QualityLevel::Minimal,
        }
    }

    pub fn higher(self) -> Self {
        match self {
            QualityLevel::Minimal => QualityLevel::ReducedAnalysis,
            QualityLevel::ReducedAnalysis => QualityLevel::ReducedPolyphony,
            _ => QualityLevel::Full,
        }
    }

    /// Voice allocation limit for a pool of `max_voices`.
    pub fn voice_limit(self, max_voices: usize) -> usize {
        let limit = match self {
            QualityLevel::Full => max_voices,
            QualityLevel::ReducedPolyphony | QualityLevel::ReducedAnalysis => max_voices / 2,
            QualityLevel::Minimal => max_voices / 4,
        };
        limit.max(1)
    }

    pub fn analysis_enabled(self) -> bool {
        self != QualityLevel::Minimal
    }

    pub fn analysis_reduced(self) -> bool {
        self >= QualityLevel::ReducedAnalysis
    }
}

impl AtomicBits for QualityLevel {
    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        match bits {
            1 => QualityLevel::ReducedPolyphony,
            2 => QualityLevel::ReducedAnalysis,
            3 => QualityLevel::Minimal,
            _ => QualityLevel::Full,
        }
    }
}

pub struct AutoOptimizer {
    enabled: bool,
    threshold: f32,
    hysteresis: f32,
    blocks: u32,
    level: QualityLevel,
    over_run: u32,
    under_run: u32,
}

impl AutoOptimizer {
    pub fn new(enabled: bool, threshold: f32, hysteresis: f32, blocks: u32) -> Self {
        Self {
            enabled,
            threshold,
            hysteresis: hysteresis.max(0.0),
            blocks: blocks.max(1),
            level: QualityLevel::Full,
            over_run: 0,
            under_run: 0,
        }
    }

    pub fn level(&self) -> QualityLevel {
        self.level
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling restores full quality on the next update.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.over_run = 0;
        self.under_run = 0;
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.max(0.0);
    }

    pub fn reset(&mut self) {
        self.level = QualityLevel::Full;
        self.over_run = 0;
        self.under_run = 0;
    }

    /// Feeds one block's CPU load. Returns the new level when it changes.
    ///
    /// REAL-TIME SAFE.
    pub fn update(&mut self, cpu_load: f32, protection: ProtectionState) -> Option<QualityLevel> {
        let next = if !self.enabled {
            QualityLevel::Full
        } else if protection == ProtectionState::ThermalProtection {
            QualityLevel::Minimal
        } else {
            if cpu_load > self.threshold {
                self.over_run += 1;
                self.under_run = 0;
            } else if cpu_load < self.threshold - self.hysteresis {
                self.under_run += 1;
                self.over_run = 0;
            } else {
                self.over_run = 0;
                self.under_run = 0;
            }

            if self.over_run >= self.blocks {
                self.over_run = 0;
                self.level.lower()
            } else if self.under_run >= self.blocks {
                self.under_run = 0;
                self.level.higher()
            } else {
                self.level
            }
        };

        if next == self.level {
            None
        } else {
            self.level = next;
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: ProtectionState = ProtectionState::Normal;

    #[test]
    fn test_steps_down_and_back_up() {
        let mut opt = AutoOptimizer::new(true, 0.8, 0.1, 4);
        for _ in 0..3 {
            assert_eq!(opt.update(0.9, N), None);
        }
        assert_eq!(opt.update(0.9, N), Some(QualityLevel::ReducedPolyphony));
        for _ in 0..8 {
            opt.update(0.9, N);
        }
        assert_eq!(opt.level(), QualityLevel::Minimal);
        opt.update(0.9, N);
        assert_eq!(opt.level(), QualityLevel::Minimal, "cannot go lower");

        // Inside the hysteresis band nothing moves.
        for _ in 0..20 {
            assert_eq!(opt.update(0.75, N), None);
        }
        for _ in 0..4 {
            opt.update(0.5, N);
        }
        assert_eq!(opt.level(), QualityLevel::ReducedAnalysis);
    }

    #[test]
    fn test_thermal_forces_minimal() {
        let mut opt = AutoOptimizer::new(true, 0.8, 0.1, 4);
        assert_eq!(
            opt.update(0.0, ProtectionState::ThermalProtection),
            Some(QualityLevel::Minimal)
        );
    }

    #[test]
    fn test_disabled_holds_full() {
        let mut opt = AutoOptimizer::new(false, 0.8, 0.1, 1);
        assert_eq!(opt.update(5.0, N), None);
        assert_eq!(opt.level(), QualityLevel::Full);
    }

    #[test]
    fn test_level_effects() {
        assert_eq!(QualityLevel::Full.voice_limit(32), 32);
        assert_eq!(QualityLevel::ReducedPolyphony.voice_limit(32), 16);
        assert_eq!(QualityLevel::Minimal.voice_limit(32), 8);
        assert_eq!(QualityLevel::Minimal.voice_limit(2), 1, "never zero voices");
        assert!(!QualityLevel::ReducedPolyphony.analysis_reduced());
        assert!(QualityLevel::ReducedAnalysis.analysis_reduced());
        assert!(!QualityLevel::Minimal.analysis_enabled());
    }
}
