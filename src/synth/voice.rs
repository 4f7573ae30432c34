//! One synthesis voice: oscillator, filter and envelope state for a note.

use super::envelope::{Envelope, EnvelopeSettings, EnvelopeStage};
use super::filter::{SvfCoeffs, SvfState};
use super::lfo::LfoSettings;
use super::oscillator::{read_wavetable, OscillatorKind, OscillatorSettings, OscillatorState};

/// Seed base for per-voice noise generators; voice `i` uses `base + i`.
const NOISE_SEED_BASE: u32 = 0x1234_5678;

/// Everything a voice reads while rendering, borrowed from the synth for one
/// block segment.
pub struct RenderParams<'a> {
    pub oscillator: &'a OscillatorSettings,
    pub envelope: &'a EnvelopeSettings,
    pub lfo: &'a LfoSettings,
    pub filter: &'a SvfCoeffs,
    pub wavetable: &'a [f32],
    /// Bipolar LFO values aligned with the output segment.
    pub lfo_values: &'a [f32],
    pub sample_rate: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct Voice {
    active: bool,
    note: u8,
    /// Normalized velocity, 0..1.
    velocity: f32,
    frequency: f32,
    /// Samples rendered since the note started.
    age: u64,
    /// Trigger order, breaks age ties when stealing.
    serial: u64,
    osc: OscillatorState,
    env: Envelope,
    filter: SvfState,
}

/// Equal-tempered frequency of a MIDI note.
#[inline]
pub fn note_to_frequency(note: u8, tuning: f32) -> f32 {
    tuning * ((note as f32 - 69.0) / 12.0).exp2()
}

impl Voice {
    pub fn new(index: usize) -> Self {
        Self {
            active: false,
            note: 0,
            velocity: 0.0,
            frequency: 0.0,
            age: 0,
            serial: 0,
            osc: OscillatorState::new(NOISE_SEED_BASE.wrapping_add(index as u32)),
            env: Envelope::new(),
            filter: SvfState::default(),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn note(&self) -> u8 {
        self.note
    }

    #[inline]
    pub fn age(&self) -> u64 {
        self.age
    }

    #[inline]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    #[inline]
    pub fn stage(&self) -> EnvelopeStage {
        self.env.stage()
    }

    /// True while the key is held (not yet released).
    #[inline]
    pub fn is_held(&self) -> bool {
        self.active && self.env.stage() != EnvelopeStage::Release
    }

    /// Resets the voice for a new note and enters Attack.
    pub fn start(&mut self, note: u8, velocity: u8, serial: u64, tuning: f32) {
        self.active = true;
        self.note = note;
        self.velocity = velocity as f32 / 127.0;
        self.frequency = note_to_frequency(note, tuning);
        self.age = 0;
        self.serial = serial;
        self.osc.reset_phase();
        self.filter.reset();
        self.env.trigger();
    }

    pub fn release(&mut self) {
        self.env.release();
    }

    /// Silences and frees the voice immediately.
    pub fn kill(&mut self) {
        self.active = false;
        self.env.reset();
        self.filter.reset();
    }

    /// Adds this voice into `out`. Frees the voice once its envelope is idle.
    pub fn render(&mut self, out: &mut [f32], params: &RenderParams<'_>) {
        if !self.active {
            return;
        }
        let dt_seconds = 1.0 / params.sample_rate;
        let base_inc = (self.frequency / params.sample_rate).min(0.5);
        let amplitude = params.oscillator.amplitude * self.velocity;
        let modulate = params.lfo.is_active();

        for (o, &w) in out.iter_mut().zip(params.lfo_values) {
            let (inc, tremolo) = if modulate {
                (
                    (base_inc * params.lfo.pitch_factor(w)).min(0.5),
                    params.lfo.amplitude_factor(w),
                )
            } else {
                (base_inc, 1.0)
            };

            let raw = match params.oscillator.kind {
                OscillatorKind::VirtualAnalog => {
                    self.osc.virtual_analog(params.oscillator.waveform, inc)
                }
                OscillatorKind::Wavetable => read_wavetable(params.wavetable, self.osc.phase),
            };
            self.osc.advance(inc);

            let filtered = self.filter.process(raw * amplitude * tremolo, params.filter);
            let gain = self.env.next(params.envelope, dt_seconds);
            *o += filtered * gain;

            if self.env.is_idle() {
                self.active = false;
                break;
            }
        }
        self.age += out.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::filter::FilterSettings;

    #[test]
    fn test_note_to_frequency() {
        assert!((note_to_frequency(69, 440.0) - 440.0).abs() < 1e-3);
        assert!((note_to_frequency(81, 440.0) - 880.0).abs() < 1e-2);
        assert!((note_to_frequency(60, 440.0) - 261.63).abs() < 0.01);
        assert!((note_to_frequency(69, 432.0) - 432.0).abs() < 1e-3);
    }

    #[test]
    fn test_voice_renders_and_frees_itself() {
        let osc = OscillatorSettings::default();
        let env = EnvelopeSettings {
            attack: 0.0,
            decay: 0.0,
            release: 0.001,
            ..EnvelopeSettings::default()
        };
        let lfo = LfoSettings::default();
        let filter = SvfCoeffs::new(&FilterSettings::default(), 48000.0);
        let table = vec![0.0; 2048];
        let lfo_values = vec![0.0; 256];
        let params = RenderParams {
            oscillator: &osc,
            envelope: &env,
            lfo: &lfo,
            filter: &filter,
            wavetable: &table,
            lfo_values: &lfo_values,
            sample_rate: 48000.0,
        };

        let mut voice = Voice::new(0);
        voice.start(69, 127, 1, 440.0);
        let mut out = vec![0.0; 256];
        voice.render(&mut out, &params);
        assert!(out.iter().any(|s| s.abs() > 0.01));
        assert_eq!(voice.age(), 256);
        assert!(voice.is_held());

        voice.release();
        assert!(!voice.is_held());
        let mut out = vec![0.0; 256];
        voice.render(&mut out, &params);
        assert!(!voice.is_active(), "48-sample release finishes inside the block");
        assert!(out[200..].iter().all(|&s| s == 0.0));
    }
}
