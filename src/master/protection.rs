//! Emergency-protection state machine.
//!
//! Fed once per block with the block's input clip rate and CPU load. Entry
//! into each state needs a run of consecutive bad blocks and the way back
//! to Normal needs a violation-free cooldown, so the state cannot flap on a
//! single noisy block.

use serde::{Deserialize, Serialize};

use super::config::ProtectionConfig;
use crate::dsp::published::AtomicBits;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionState {
    #[default]
    Normal,
    Overload,
    ThermalProtection,
    EmergencyLimiting,
}

impl ProtectionState {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            ProtectionState::Normal => 0,
            ProtectionState::Overload => 1,
            ProtectionState::ThermalProtection => 2,
            ProtectionState::EmergencyLimiting => 3,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            1 => ProtectionState::Overload,
            2 => ProtectionState::ThermalProtection,
            3 => ProtectionState::EmergencyLimiting,
            _ => ProtectionState::Normal,
        }
    }
}

impl AtomicBits for ProtectionState {
    fn to_bits(self) -> u64 {
        self.index() as u64
    }

    fn from_bits(bits: u64) -> Self {
        Self::from_index(bits as usize)
    }
}

/// Measurements of one processed block.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlockHealth {
    /// Fraction of input samples at or above the clip level.
    pub clip_rate: f32,
    /// Block time over the block deadline.
    pub cpu_load: f32,
    /// Stream time at the end of the block.
    pub stream_seconds: f64,
}

/// How often a state was entered and when it was last entered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub count: u64,
    pub last_entered_seconds: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: ProtectionState,
    pub to: ProtectionState,
}

pub struct ProtectionMonitor {
    config: ProtectionConfig,
    cpu_threshold: f32,
    state: ProtectionState,
    violation_run: u32,
    thermal_run: u32,
    escalation: u32,
    last_violation_seconds: f64,
    records: [TransitionRecord; ProtectionState::COUNT],
}

impl ProtectionMonitor {
    pub fn new(config: ProtectionConfig, cpu_threshold: f32) -> Self {
        Self {
            config,
            cpu_threshold,
            state: ProtectionState::Normal,
            violation_run: 0,
            thermal_run: 0,
            escalation: 0,
            last_violation_seconds: 0.0,
            records: [TransitionRecord::default(); ProtectionState::COUNT],
        }
    }

    pub fn state(&self) -> ProtectionState {
        self.state
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    pub fn set_cpu_threshold(&mut self, threshold: f32) {
        self.cpu_threshold = threshold.max(0.0);
    }

    pub fn record(&self, state: ProtectionState) -> TransitionRecord {
        self.records[state.index()]
    }

    pub fn records(&self) -> &[TransitionRecord; ProtectionState::COUNT] {
        &self.records
    }

    /// Whether the emergency gain and ceiling apply.
    pub fn is_emergency(&self) -> bool {
        self.state == ProtectionState::EmergencyLimiting
    }

    pub fn reset(&mut self) {
        self.state = ProtectionState::Normal;
        self.violation_run = 0;
        self.thermal_run = 0;
        self.escalation = 0;
        self.records = [TransitionRecord::default(); ProtectionState::COUNT];
    }

    /// Advances the machine by one block. Returns the transition taken, if
    /// any.
    ///
    /// REAL-TIME SAFE.
    pub fn update(&mut self, health: BlockHealth) -> Option<Transition> {
        let cfg = &self.config;
        let violation =
            health.clip_rate > cfg.clip_rate_threshold || health.cpu_load > self.cpu_threshold;
        let hot = health.cpu_load >= cfg.thermal_cpu;

        if violation {
            self.violation_run = self.violation_run.saturating_add(1);
            self.last_violation_seconds = health.stream_seconds;
        } else {
            self.violation_run = 0;
        }
        self.thermal_run = if hot { self.thermal_run.saturating_add(1) } else { 0 };

        let trigger = cfg.trigger_blocks.max(1);
        let next = match self.state {
            ProtectionState::Normal if self.violation_run >= trigger => {
                Some(ProtectionState::Overload)
            }
            ProtectionState::Overload if self.thermal_run >= trigger => {
                Some(ProtectionState::ThermalProtection)
            }
            ProtectionState::Overload | ProtectionState::ThermalProtection if violation => {
                self.escalation += 1;
                (self.escalation >= cfg.escalation_blocks.max(1))
                    .then_some(ProtectionState::EmergencyLimiting)
            }
            ProtectionState::Normal => None,
            _ if !violation
                && health.stream_seconds - self.last_violation_seconds
                    >= cfg.cooldown_seconds =>
            {
                Some(ProtectionState::Normal)
            }
            _ => None,
        };

        next.map(|to| self.enter(to, health.stream_seconds))
    }

    fn enter(&mut self, to: ProtectionState, at: f64) -> Transition {
        let from = self.state;
        match to {
            ProtectionState::Normal | ProtectionState::Overload => self.escalation = 0,
            _ => {}
        }
        let rec = &mut self.records[to.index()];
        rec.count += 1;
        rec.last_entered_seconds = at;
        self.state = to;
        Transition { from, to }
    }
}
