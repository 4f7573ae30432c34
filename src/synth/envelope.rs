//! Six-stage voice envelope.
//!
//! Idle -> Attack -> Hold -> Decay -> Sustain -> Release -> Idle. Each timed
//! stage advances linearly in normalized time and shapes its progress with a
//! curve exponent (`progress^curve`). A stage with zero duration hands over
//! to the next stage within the same sample.

use serde::{Deserialize, Serialize};

/// Envelope stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    /// Output is 0 and the voice may be reused.
    #[default]
    Idle,
    /// Rising from 0 to 1.
    Attack,
    /// Holding at 1.
    Hold,
    /// Falling from 1 to the sustain level.
    Decay,
    /// Holding the sustain level while the note is held.
    Sustain,
    /// Falling from the level at note-off to 0.
    Release,
}

/// Envelope timing shared by all voices. Times are in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeSettings {
    pub attack: f32,
    pub hold: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
    pub attack_curve: f32,
    pub decay_curve: f32,
    pub release_curve: f32,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            attack: 0.01,
            hold: 0.0,
            decay: 0.3,
            sustain: 0.7,
            release: 0.2,
            attack_curve: 1.0,
            decay_curve: 1.0,
            release_curve: 1.0,
        }
    }
}

impl EnvelopeSettings {
    pub const MAX_TIME: f32 = 30.0;

    /// Returns a copy with every field forced into its valid range.
    pub fn clamped(&self) -> Self {
        let time = |t: f32| if t.is_finite() { t.clamp(0.0, Self::MAX_TIME) } else { 0.0 };
        let curve = |c: f32| if c.is_finite() { c.clamp(0.1, 10.0) } else { 1.0 };
        Self {
            attack: time(self.attack),
            hold: time(self.hold),
            decay: time(self.decay),
            sustain: if self.sustain.is_finite() { self.sustain.clamp(0.0, 1.0) } else { 0.0 },
            release: time(self.release),
            attack_curve: curve(self.attack_curve),
            decay_curve: curve(self.decay_curve),
            release_curve: curve(self.release_curve),
        }
    }
}

/// Per-voice envelope state.
#[derive(Clone, Copy, Debug, Default)]
pub struct Envelope {
    stage: EnvelopeStage,
    /// Seconds spent in the current stage.
    stage_time: f32,
    value: f32,
    /// Level captured at note-off; release scales down from here.
    release_from: f32,
}

/// Linear progress through a stage, shaped by `curve`.
#[inline]
fn shaped(progress: f32, curve: f32) -> f32 {
    if curve == 1.0 {
        progress
    } else {
        progress.powf(curve)
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    /// Starts a new note from silence.
    pub fn trigger(&mut self) {
        self.stage = EnvelopeStage::Attack;
        self.stage_time = 0.0;
        self.value = 0.0;
    }

    /// Enters Release from wherever the envelope is.
    pub fn release(&mut self) {
        if self.stage != EnvelopeStage::Idle && self.stage != EnvelopeStage::Release {
            self.stage = EnvelopeStage::Release;
            self.stage_time = 0.0;
            self.release_from = self.value;
        }
    }

    /// Immediate silence.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn enter(&mut self, stage: EnvelopeStage) {
        self.stage = stage;
        self.stage_time = 0.0;
    }

    /// Advances by `dt` seconds and returns the new level.
    ///
    /// `settings` must already be clamped.
    #[inline]
    pub fn next(&mut self, settings: &EnvelopeSettings, dt: f32) -> f32 {
        // Zero-length stages fall through; at most every stage is visited once.
        for _ in 0..6 {
            match self.stage {
                EnvelopeStage::Idle => {
                    self.value = 0.0;
                    return 0.0;
                }
                EnvelopeStage::Attack => {
                    if settings.attack <= 0.0 {
                        self.value = 1.0;
                        self.enter(EnvelopeStage::Hold);
                        continue;
                    }
                    self.stage_time += dt;
                    let p = (self.stage_time / settings.attack).min(1.0);
                    self.value = shaped(p, settings.attack_curve);
                    if p >= 1.0 {
                        self.value = 1.0;
                        self.enter(EnvelopeStage::Hold);
                    }
                    return self.value;
                }
                EnvelopeStage::Hold => {
                    if settings.hold <= 0.0 {
                        self.enter(EnvelopeStage::Decay);
                        continue;
                    }
                    self.stage_time += dt;
                    self.value = 1.0;
                    if self.stage_time >= settings.hold {
                        self.enter(EnvelopeStage::Decay);
                    }
                    return self.value;
                }
                EnvelopeStage::Decay => {
                    if settings.decay <= 0.0 {
                        self.value = settings.sustain;
                        self.enter(EnvelopeStage::Sustain);
                        continue;
                    }
                    self.stage_time += dt;
                    let p = (self.stage_time / settings.decay).min(1.0);
                    self.value = 1.0 - (1.0 - settings.sustain) * shaped(p, settings.decay_curve);
                    if p >= 1.0 {
                        self.enter(EnvelopeStage::Sustain);
                    }
                    return self.value;
                }
                EnvelopeStage::Sustain => {
                    self.value = settings.sustain;
                    return self.value;
                }
                EnvelopeStage::Release => {
                    if settings.release <= 0.0 {
                        self.value = 0.0;
                        self.enter(EnvelopeStage::Idle);
                        return 0.0;
                    }
                    self.stage_time += dt;
                    let p = (self.stage_time / settings.release).min(1.0);
                    self.value = self.release_from * (1.0 - shaped(p, settings.release_curve));
                    if p >= 1.0 {
                        self.value = 0.0;
                        self.enter(EnvelopeStage::Idle);
                    }
                    return self.value;
                }
            }
        }
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 48000.0;

    fn instant() -> EnvelopeSettings {
        EnvelopeSettings {
            attack: 0.0,
            hold: 0.0,
            decay: 0.0,
            sustain: 0.6,
            release: 0.0,
            ..EnvelopeSettings::default()
        }
    }

    #[test]
    fn test_idle_outputs_zero() {
        let mut env = Envelope::new();
        assert_eq!(env.next(&EnvelopeSettings::default(), DT), 0.0);
        assert!(env.is_idle());
    }

    #[test]
    fn test_zero_times_reach_sustain_in_one_sample() {
        let settings = instant();
        let mut env = Envelope::new();
        env.trigger();
        let first = env.next(&settings, DT);
        assert_eq!(env.stage(), EnvelopeStage::Sustain, "attack, hold and decay are skipped");
        assert_eq!(first, 0.6);

        for _ in 0..100_000 {
            assert_eq!(env.next(&settings, DT), 0.6, "sustain holds while the note is held");
        }

        env.release();
        assert_eq!(env.next(&settings, DT), 0.0);
        assert!(env.is_idle(), "zero release goes straight to idle");
    }

    #[test]
    fn test_attack_rises_to_one() {
        let settings = EnvelopeSettings {
            attack: 0.01,
            hold: 0.005,
            ..EnvelopeSettings::default()
        };
        let mut env = Envelope::new();
        env.trigger();
        let mut last = 0.0;
        for _ in 0..470 {
            let v = env.next(&settings, DT);
            assert!(v >= last, "attack is monotonic");
            last = v;
        }
        assert_eq!(env.stage(), EnvelopeStage::Attack);
        for _ in 0..20 {
            env.next(&settings, DT);
        }
        assert_eq!(env.stage(), EnvelopeStage::Hold);
        assert_eq!(env.value(), 1.0);
    }

    #[test]
    fn test_decay_lands_on_sustain() {
        let settings = EnvelopeSettings {
            attack: 0.0,
            decay: 0.01,
            sustain: 0.25,
            ..EnvelopeSettings::default()
        };
        let mut env = Envelope::new();
        env.trigger();
        for _ in 0..1000 {
            env.next(&settings, DT);
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert!((env.value() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_release_from_mid_attack() {
        let settings = EnvelopeSettings {
            attack: 0.1,
            release: 0.01,
            ..EnvelopeSettings::default()
        };
        let mut env = Envelope::new();
        env.trigger();
        for _ in 0..2400 {
            env.next(&settings, DT);
        }
        let at_release = env.value();
        assert!(at_release > 0.4 && at_release < 0.6);

        env.release();
        let first = env.next(&settings, DT);
        assert!(first < at_release && first > at_release * 0.9, "release starts from current level");
        for _ in 0..480 {
            env.next(&settings, DT);
        }
        assert!(env.is_idle());
        assert_eq!(env.value(), 0.0);
    }

    #[test]
    fn test_curve_shapes_attack() {
        let settings = EnvelopeSettings {
            attack: 0.01,
            attack_curve: 2.0,
            ..EnvelopeSettings::default()
        };
        let mut env = Envelope::new();
        env.trigger();
        for _ in 0..240 {
            env.next(&settings, DT);
        }
        assert!((env.value() - 0.25).abs() < 0.01, "half-way through a squared attack is 0.25");
    }

    #[test]
    fn test_settings_clamped() {
        let wild = EnvelopeSettings {
            attack: -1.0,
            sustain: 4.0,
            release: f32::NAN,
            decay_curve: 0.0,
            ..EnvelopeSettings::default()
        };
        let c = wild.clamped();
        assert_eq!(c.attack, 0.0);
        assert_eq!(c.sustain, 1.0);
        assert_eq!(c.release, 0.0);
        assert_eq!(c.decay_curve, 0.1);
    }
}
