//! Insert and send slots.

use serde::{Deserialize, Serialize};

use super::effects::{EffectKind, EffectOutcome, EffectParams, EffectRack, NUM_EFFECT_PARAMS};
use crate::dsp::{clamp_finite, db_to_linear, AudioBuffer};

pub const NUM_INSERTS: usize = 8;
pub const NUM_SENDS: usize = 4;

/// Slot gain range in dB.
pub const SLOT_GAIN_RANGE_DB: f32 = 24.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertSettings {
    pub kind: EffectKind,
    pub enabled: bool,
    pub bypassed: bool,
    pub mix: f32,
    pub input_gain_db: f32,
    pub output_gain_db: f32,
    pub params: EffectParams,
}

impl Default for InsertSettings {
    fn default() -> Self {
        Self {
            kind: EffectKind::None,
            enabled: false,
            bypassed: false,
            mix: 1.0,
            input_gain_db: 0.0,
            output_gain_db: 0.0,
            params: [0.0; NUM_EFFECT_PARAMS],
        }
    }
}

impl InsertSettings {
    /// Enabled slot of `kind` with that kind's default parameters.
    pub fn with_kind(kind: EffectKind) -> Self {
        Self {
            kind,
            enabled: true,
            params: kind.default_params(),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.bypassed && self.kind != EffectKind::None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendSettings {
    pub kind: EffectKind,
    pub enabled: bool,
    pub muted: bool,
    /// Linear gain into the send effect.
    pub send_level: f32,
    /// Linear gain of the effect return into the master.
    pub return_level: f32,
    pub params: EffectParams,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            kind: EffectKind::Reverb,
            enabled: false,
            muted: false,
            send_level: 0.5,
            return_level: 1.0,
            params: EffectKind::Reverb.default_params(),
        }
    }
}

impl SendSettings {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.muted && self.kind != EffectKind::None
    }
}

pub struct InsertSlot {
    settings: InsertSettings,
    rack: EffectRack,
}

impl InsertSlot {
    pub fn new(sample_rate: f32, num_channels: usize) -> Self {
        Self {
            settings: InsertSettings::default(),
            rack: EffectRack::new(sample_rate, num_channels),
        }
    }

    pub fn settings(&self) -> &InsertSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: InsertSettings) {
        if settings.kind != self.settings.kind {
            self.rack.reset();
        }
        self.settings = settings;
        self.settings.mix = clamp_finite(settings.mix, 0.0, 1.0, 1.0);
        self.settings.input_gain_db = clamp_gain(settings.input_gain_db);
        self.settings.output_gain_db = clamp_gain(settings.output_gain_db);
        sanitize_params(&mut self.settings.params, settings.kind);
    }

    /// Switching kind loads the new kind's default parameters.
    pub fn set_kind(&mut self, kind: EffectKind) {
        if kind != self.settings.kind {
            self.settings.kind = kind;
            self.settings.params = kind.default_params();
            self.rack.reset();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.settings.bypassed = bypassed;
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.settings.mix = clamp_finite(mix, 0.0, 1.0, 1.0);
    }

    pub fn set_input_gain_db(&mut self, db: f32) {
        self.settings.input_gain_db = clamp_gain(db);
    }

    pub fn set_output_gain_db(&mut self, db: f32) {
        self.settings.output_gain_db = clamp_gain(db);
    }

    pub fn set_param(&mut self, index: usize, value: f32) {
        if let Some(p) = self.settings.params.get_mut(index) {
            if value.is_finite() {
                *p = value;
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.settings.is_active()
    }

    /// Whether the next pass needs a dry-copy scratch block.
    pub fn needs_scratch(&self) -> bool {
        self.settings.kind == EffectKind::Reverb && self.settings.mix < 1.0
    }

    pub fn reset(&mut self) {
        self.rack.reset();
    }

    /// REAL-TIME SAFE.
    pub fn process(&mut self, buffer: &mut AudioBuffer, scratch: Option<&mut [f32]>) -> EffectOutcome {
        if !self.is_active() {
            return EffectOutcome::Passthrough;
        }
        if self.needs_scratch() && scratch.is_none() {
            return EffectOutcome::Skipped;
        }
        let s = &self.settings;
        if s.input_gain_db != 0.0 {
            buffer.apply_gain(db_to_linear(s.input_gain_db));
        }
        let outcome = self.rack.process(s.kind, buffer, &s.params, s.mix, scratch);
        if s.output_gain_db != 0.0 {
            buffer.apply_gain(db_to_linear(s.output_gain_db));
        }
        outcome
    }
}

pub struct SendSlot {
    settings: SendSettings,
    rack: EffectRack,
    returns: AudioBuffer,
}

impl SendSlot {
    pub fn new(sample_rate: f32, num_channels: usize, max_block: usize) -> Self {
        Self {
            settings: SendSettings::default(),
            rack: EffectRack::new(sample_rate, num_channels),
            returns: AudioBuffer::new(num_channels, max_block),
        }
    }

    pub fn settings(&self) -> &SendSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: SendSettings) {
        if settings.kind != self.settings.kind {
            self.rack.reset();
        }
        self.settings = settings;
        self.settings.send_level = clamp_level(settings.send_level, 0.5);
        self.settings.return_level = clamp_level(settings.return_level, 1.0);
        sanitize_params(&mut self.settings.params, settings.kind);
    }

    pub fn set_kind(&mut self, kind: EffectKind) {
        if kind != self.settings.kind {
            self.settings.kind = kind;
            self.settings.params = kind.default_params();
            self.rack.reset();
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.settings.muted = muted;
    }

    pub fn set_send_level(&mut self, level: f32) {
        self.settings.send_level = clamp_level(level, 0.5);
    }

    pub fn set_return_level(&mut self, level: f32) {
        self.settings.return_level = clamp_level(level, 1.0);
    }

    pub fn set_param(&mut self, index: usize, value: f32) {
        if let Some(p) = self.settings.params.get_mut(index) {
            if value.is_finite() {
                *p = value;
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.settings.is_active()
    }

    pub fn reset(&mut self) {
        self.rack.reset();
        self.returns.clear();
    }

    /// Renders the send of `source` into the slot's return buffer, fully
    /// wet. Returns false when the slot is inactive.
    ///
    /// REAL-TIME SAFE.
    pub fn render(&mut self, source: &AudioBuffer) -> bool {
        if !self.is_active() {
            return false;
        }
        self.returns.copy_from(source);
        self.returns.apply_gain(self.settings.send_level);
        let s = &self.settings;
        self.rack.process(s.kind, &mut self.returns, &s.params, 1.0, None);
        true
    }

    /// Sums the last rendered return into `target` at the return level.
    pub fn mix_into(&self, target: &mut AudioBuffer) {
        if self.is_active() {
            target.add_from(&self.returns, self.settings.return_level);
        }
    }

    pub fn returns(&self) -> &AudioBuffer {
        &self.returns
    }
}

fn clamp_gain(db: f32) -> f32 {
    clamp_finite(db, -SLOT_GAIN_RANGE_DB, SLOT_GAIN_RANGE_DB, 0.0)
}

fn clamp_level(level: f32, fallback: f32) -> f32 {
    clamp_finite(level, 0.0, 4.0, fallback)
}

/// Non-finite effect parameters take the kind's defaults.
fn sanitize_params(params: &mut EffectParams, kind: EffectKind) {
    let defaults = kind.default_params();
    for (p, d) in params.iter_mut().zip(defaults) {
        if !p.is_finite() {
            *p = d;
        }
    }
}
