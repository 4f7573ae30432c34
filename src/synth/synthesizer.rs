//! Polyphonic synthesizer: voice allocation, stealing and block rendering.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::envelope::EnvelopeSettings;
use super::filter::{FilterSettings, FilterType, SvfCoeffs};
use super::lfo::{Lfo, LfoSettings, LfoWaveform};
use super::oscillator::{OscillatorKind, OscillatorSettings, WavetableBank, Waveform};
use super::voice::{RenderParams, Voice};
use crate::dsp::{clamp_finite, AudioBuffer};
use crate::engine::commands::{as_flag, as_index, NoteEvent, NoteEventKind};
use crate::engine::context::EngineContext;
use crate::engine::error::{validate_stream_format, EngineError, EngineResult};

/// Hard upper bound on the voice pool.
pub const MAX_VOICES: usize = 32;

/// Sound-shaping parameters shared by every voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthPatch {
    pub oscillator: OscillatorSettings,
    pub filter: FilterSettings,
    pub envelope: EnvelopeSettings,
    pub lfo: LfoSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub num_voices: usize,
    /// Frequency of A4 in Hz.
    pub tuning: f32,
    pub patch: SynthPatch,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 1024,
            num_voices: 4,
            tuning: 440.0,
            patch: SynthPatch::default(),
        }
    }
}

impl SynthConfig {
    pub fn from_context(ctx: &EngineContext) -> Self {
        Self {
            sample_rate: ctx.sample_rate(),
            max_block_size: ctx.max_block_size(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_stream_format(self.sample_rate, self.max_block_size)?;
        if self.num_voices == 0 || self.num_voices > MAX_VOICES {
            return Err(EngineError::InvalidVoiceCount(self.num_voices));
        }
        Ok(())
    }
}

/// Named, serializable synth state for the persistence layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthPreset {
    pub name: String,
    pub patch: SynthPatch,
    pub tuning: f32,
    pub max_active_voices: usize,
}

impl Default for SynthPreset {
    fn default() -> Self {
        Self {
            name: "Init".into(),
            patch: SynthPatch::default(),
            tuning: 440.0,
            max_active_voices: MAX_VOICES,
        }
    }
}

/// Addressable synth parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynthParam {
    OscillatorKind,
    Waveform,
    Amplitude,
    CustomWavetable,
    FilterType,
    FilterCutoff,
    FilterResonance,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    AttackCurve,
    DecayCurve,
    ReleaseCurve,
    LfoWaveform,
    LfoRate,
    LfoAmplitudeDepth,
    LfoPitchDepth,
    Tuning,
    MaxActiveVoices,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SynthStats {
    pub active_voices: usize,
    pub steal_count: u64,
    pub total_notes: u64,
    /// Smoothed block time over the block deadline (1.0 = deadline).
    pub cpu_usage: f32,
    pub avg_block_ms: f32,
    pub peak_block_ms: f32,
}

pub struct Synthesizer {
    voices: [Voice; MAX_VOICES],
    num_voices: usize,
    /// Allocation limit set by the optimizer; never above `num_voices`.
    max_active: usize,
    patch: SynthPatch,
    /// `patch.envelope` after clamping, refreshed on every change.
    envelope: EnvelopeSettings,
    tuning: f32,
    sample_rate: f32,
    max_block_size: usize,
    lfo: Lfo,
    lfo_buffer: Vec<f32>,
    mono: Vec<f32>,
    wavetables: WavetableBank,
    next_serial: u64,
    stats: SynthStats,
}

impl Synthesizer {
    pub fn new(ctx: &EngineContext) -> EngineResult<Self> {
        let mut synth = Self {
            voices: std::array::from_fn(Voice::new),
            num_voices: 0,
            max_active: 0,
            patch: SynthPatch::default(),
            envelope: EnvelopeSettings::default(),
            tuning: 440.0,
            sample_rate: ctx.sample_rate(),
            max_block_size: 0,
            lfo: Lfo::new(),
            lfo_buffer: Vec::new(),
            mono: Vec::new(),
            wavetables: WavetableBank::new(),
            next_serial: 0,
            stats: SynthStats::default(),
        };
        synth.prepare(&SynthConfig::from_context(ctx))?;
        Ok(synth)
    }

    /// Fixes sample rate, block size and voice count, and silences every voice.
    pub fn prepare(&mut self, config: &SynthConfig) -> EngineResult<()> {
        config.validate()?;
        self.sample_rate = config.sample_rate;
        self.max_block_size = config.max_block_size;
        self.num_voices = config.num_voices;
        self.max_active = config.num_voices;
        self.tuning = clamp_tuning(config.tuning);
        self.set_patch(config.patch);
        self.lfo_buffer = vec![0.0; config.max_block_size];
        self.mono = vec![0.0; config.max_block_size];
        self.reset();
        log::debug!(
            "synth prepared: {} voices at {} Hz, max block {}",
            self.num_voices,
            self.sample_rate,
            self.max_block_size
        );
        Ok(())
    }

    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.kill();
        }
        self.lfo.reset();
        self.stats = SynthStats::default();
    }

    pub fn patch(&self) -> &SynthPatch {
        &self.patch
    }

    /// Installs `patch` with its continuous values clamped; non-finite
    /// values take the defaults.
    pub fn set_patch(&mut self, mut patch: SynthPatch) {
        let osc = &mut patch.oscillator;
        osc.amplitude = clamp_finite(osc.amplitude, 0.0, 1.0, 0.5);
        let filter = &mut patch.filter;
        filter.cutoff = clamp_finite(filter.cutoff, 20.0, 0.5 * self.sample_rate, 1000.0);
        filter.resonance = clamp_finite(filter.resonance, 0.1, 40.0, 0.707);
        let lfo = &mut patch.lfo;
        lfo.rate = clamp_finite(lfo.rate, 0.0, 50.0, 5.0);
        lfo.amplitude_depth = clamp_finite(lfo.amplitude_depth, 0.0, 1.0, 0.0);
        lfo.pitch_depth = clamp_finite(lfo.pitch_depth, -24.0, 24.0, 0.0);
        self.patch = patch;
        self.envelope = patch.envelope.clamped();
    }

    pub fn num_voices(&self) -> usize {
        self.num_voices
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices[..self.num_voices]
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices().iter().filter(|v| v.is_active()).count()
    }

    pub fn stats(&self) -> SynthStats {
        self.stats
    }

    /// Limits how many voices new notes may use (1..=voice count).
    pub fn set_max_active_voices(&mut self, limit: usize) {
        self.max_active = limit.clamp(1, self.num_voices);
    }

    pub fn max_active_voices(&self) -> usize {
        self.max_active
    }

    /// Replaces the user wavetable. Control-plane only.
    pub fn load_wavetable(&mut self, cycle: &[f32]) -> bool {
        self.wavetables.load_custom(cycle)
    }

    pub fn preset(&self, name: &str) -> SynthPreset {
        SynthPreset {
            name: name.to_string(),
            patch: self.patch,
            tuning: self.tuning,
            max_active_voices: self.max_active,
        }
    }

    pub fn load_preset(&mut self, preset: &SynthPreset) {
        self.set_patch(preset.patch);
        self.tuning = clamp_tuning(preset.tuning);
        self.set_max_active_voices(preset.max_active_voices);
        log::info!("synth preset loaded: {}", preset.name);
    }

    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(note);
            return;
        }
        let limit = self.max_active;
        let slot = match self.voices[..limit].iter().position(|v| !v.is_active()) {
            Some(free) => free,
            None => {
                self.stats.steal_count += 1;
                self.oldest_voice(limit)
            }
        };
        self.next_serial += 1;
        self.voices[slot].start(note, velocity, self.next_serial, self.tuning);
        self.stats.total_notes += 1;
    }

    /// Index of the active voice with the greatest age (earliest trigger on ties).
    fn oldest_voice(&self, limit: usize) -> usize {
        let mut best = 0;
        for (i, v) in self.voices[..limit].iter().enumerate() {
            let b = &self.voices[best];
            if v.age() > b.age() || (v.age() == b.age() && v.serial() < b.serial()) {
                best = i;
            }
        }
        best
    }

    /// Releases the first held voice playing `note`.
    pub fn note_off(&mut self, note: u8) {
        if let Some(voice) = self.voices[..self.num_voices]
            .iter_mut()
            .find(|v| v.is_held() && v.note() == note)
        {
            voice.release();
        }
    }

    pub fn all_notes_off(&mut self) {
        for voice in self.voices[..self.num_voices].iter_mut() {
            voice.release();
        }
    }

    /// Silences every voice immediately.
    pub fn panic(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.kill();
        }
    }

    fn handle_event(&mut self, event: &NoteEvent) {
        match event.kind {
            NoteEventKind::NoteOn { note, velocity } => self.note_on(note, velocity),
            NoteEventKind::NoteOff { note } => self.note_off(note),
            NoteEventKind::AllNotesOff => self.all_notes_off(),
        }
    }

    /// Applies only the releases in `events`, for blocks the synth does not
    /// render. Returns how many note-ons were discarded.
    pub fn apply_releases(&mut self, events: &[NoteEvent]) -> usize {
        let mut discarded = 0;
        for event in events {
            match event.kind {
                NoteEventKind::NoteOn { note, velocity: 0 } | NoteEventKind::NoteOff { note } => {
                    self.note_off(note)
                }
                NoteEventKind::AllNotesOff => self.all_notes_off(),
                NoteEventKind::NoteOn { .. } => discarded += 1,
            }
        }
        discarded
    }

    fn render_segment(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let filter = SvfCoeffs::new(&self.patch.filter, self.sample_rate);
        let params = RenderParams {
            oscillator: &self.patch.oscillator,
            envelope: &self.envelope,
            lfo: &self.patch.lfo,
            filter: &filter,
            wavetable: self.wavetables.table(&self.patch.oscillator),
            lfo_values: &self.lfo_buffer[start..end],
            sample_rate: self.sample_rate,
        };
        let out = &mut self.mono[start..end];
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.render(out, &params);
        }
    }

    /// Renders every active voice into `output`, which is cleared first.
    /// Events are applied at their sample offsets and must be sorted by
    /// offset; offsets past the block end apply at the end of the block.
    ///
    /// REAL-TIME SAFE.
    pub fn process_block(&mut self, output: &mut AudioBuffer, events: &[NoteEvent]) -> SynthStats {
        let started = Instant::now();
        output.clear();
        let n = output.len().min(self.max_block_size);

        self.mono[..n].fill(0.0);
        self.lfo
            .render(&self.patch.lfo, self.sample_rate, &mut self.lfo_buffer[..n]);

        let mut cursor = 0;
        for event in events {
            let at = (event.sample_offset as usize).min(n);
            if at > cursor {
                self.render_segment(cursor, at);
                cursor = at;
            }
            self.handle_event(event);
        }
        self.render_segment(cursor, n);

        for ch in 0..output.num_channels() {
            output.channel_mut(ch)[..n].copy_from_slice(&self.mono[..n]);
        }

        self.update_stats(started, n);
        self.stats
    }

    fn update_stats(&mut self, started: Instant, frames: usize) {
        let elapsed_ms = started.elapsed().as_secs_f32() * 1000.0;
        let budget_ms = frames.max(1) as f32 / self.sample_rate * 1000.0;
        let load = elapsed_ms / budget_ms;
        let s = &mut self.stats;
        s.active_voices = self.voices.iter().filter(|v| v.is_active()).count();
        s.cpu_usage = 0.9 * s.cpu_usage + 0.1 * load;
        s.avg_block_ms = 0.99 * s.avg_block_ms + 0.01 * elapsed_ms;
        s.peak_block_ms = s.peak_block_ms.max(elapsed_ms);
    }

    /// Applies one parameter change. Discrete values use their index.
    /// Non-finite values are ignored.
    pub fn apply_param(&mut self, param: SynthParam, value: f32) {
        if !value.is_finite() {
            return;
        }
        let mut patch = self.patch;
        match param {
            SynthParam::OscillatorKind => {
                if let Some(kind) = OscillatorKind::from_index(as_index(value)) {
                    patch.oscillator.kind = kind;
                }
            }
            SynthParam::Waveform => {
                if let Some(waveform) = Waveform::from_index(as_index(value)) {
                    patch.oscillator.waveform = waveform;
                }
            }
            SynthParam::Amplitude => patch.oscillator.amplitude = value,
            SynthParam::CustomWavetable => patch.oscillator.custom_table = as_flag(value),
            SynthParam::FilterType => {
                if let Some(t) = FilterType::from_index(as_index(value)) {
                    patch.filter.filter_type = t;
                }
            }
            SynthParam::FilterCutoff => patch.filter.cutoff = value,
            SynthParam::FilterResonance => patch.filter.resonance = value,
            SynthParam::Attack => patch.envelope.attack = value,
            SynthParam::Hold => patch.envelope.hold = value,
            SynthParam::Decay => patch.envelope.decay = value,
            SynthParam::Sustain => patch.envelope.sustain = value,
            SynthParam::Release => patch.envelope.release = value,
            SynthParam::AttackCurve => patch.envelope.attack_curve = value,
            SynthParam::DecayCurve => patch.envelope.decay_curve = value,
            SynthParam::ReleaseCurve => patch.envelope.release_curve = value,
            SynthParam::LfoWaveform => {
                if let Some(w) = LfoWaveform::from_index(as_index(value)) {
                    patch.lfo.waveform = w;
                }
            }
            SynthParam::LfoRate => patch.lfo.rate = value,
            SynthParam::LfoAmplitudeDepth => patch.lfo.amplitude_depth = value,
            SynthParam::LfoPitchDepth => patch.lfo.pitch_depth = value,
            SynthParam::Tuning => self.tuning = clamp_tuning(value),
            SynthParam::MaxActiveVoices => self.set_max_active_voices(as_index(value)),
        }
        self.set_patch(patch);
    }
}

fn clamp_tuning(hz: f32) -> f32 {
    clamp_finite(hz, 380.0, 500.0, 440.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::synth::envelope::EnvelopeStage;

    fn synth_with(num_voices: usize, block: usize) -> Synthesizer {
        let ctx = EngineContext::new(EngineConfig::new(48000.0, block, 2)).unwrap();
        let mut synth = Synthesizer::new(&ctx).unwrap();
        synth
            .prepare(&SynthConfig {
                num_voices,
                max_block_size: block,
                ..SynthConfig::default()
            })
            .unwrap();
        synth
    }

    #[test]
    fn test_first_block_has_signal() {
        let mut synth = synth_with(4, 512);
        let mut out = AudioBuffer::new(2, 512);
        let stats = synth.process_block(&mut out, &[NoteEvent::note_on(0, 69, 100)]);
        assert!(out.rms(0) > 0.0, "note 69 must sound in the first block");
        assert_eq!(out.channel(0), out.channel(1));
        assert_eq!(stats.active_voices, 1);
        assert_eq!(stats.total_notes, 1);
    }

    #[test]
    fn test_voice_count_validation() {
        let mut synth = synth_with(4, 256);
        let bad = SynthConfig {
            num_voices: 33,
            ..SynthConfig::default()
        };
        assert!(matches!(synth.prepare(&bad), Err(EngineError::InvalidVoiceCount(33))));
        let bad = SynthConfig {
            num_voices: 0,
            ..SynthConfig::default()
        };
        assert!(synth.prepare(&bad).is_err());
    }

    #[test]
    fn test_steals_oldest_voice() {
        let mut synth = synth_with(4, 64);
        let mut out = AudioBuffer::new(1, 64);
        // One note per block so each voice has a distinct age.
        for note in 60..64 {
            synth.process_block(&mut out, &[NoteEvent::note_on(0, note, 100)]);
        }
        assert_eq!(synth.active_voice_count(), 4);

        let victims = [60u8, 61, 62, 63, 70, 71];
        for (note, victim) in (70..76).zip(victims) {
            synth.process_block(&mut out, &[NoteEvent::note_on(0, note, 100)]);
            assert!(synth.active_voice_count() <= 4, "pool capacity is never exceeded");
            let playing: Vec<u8> = synth.voices().iter().map(|v| v.note()).collect();
            assert!(!playing.contains(&victim), "note {} should be stolen", victim);
        }
        assert_eq!(synth.stats().steal_count, 6);
        let playing: Vec<u8> = synth.voices().iter().map(|v| v.note()).collect();
        for note in 72..76 {
            assert!(playing.contains(&note));
        }
    }

    #[test]
    fn test_simultaneous_notes_steal_by_trigger_order() {
        let mut synth = synth_with(2, 64);
        let mut out = AudioBuffer::new(1, 64);
        let events = [
            NoteEvent::note_on(0, 60, 100),
            NoteEvent::note_on(0, 62, 100),
            NoteEvent::note_on(0, 64, 100),
        ];
        synth.process_block(&mut out, &events);
        let mut playing: Vec<u8> = synth.voices().iter().map(|v| v.note()).collect();
        playing.sort();
        assert_eq!(playing, vec![62, 64], "equal ages fall back to trigger order");
    }

    #[test]
    fn test_note_off_releases_then_frees() {
        let mut synth = synth_with(4, 256);
        let mut patch = *synth.patch();
        patch.envelope.release = 0.002;
        synth.set_patch(patch);

        let mut out = AudioBuffer::new(1, 256);
        synth.process_block(&mut out, &[NoteEvent::note_on(0, 60, 100)]);
        synth.process_block(&mut out, &[NoteEvent::note_off(0, 60)]);
        assert_eq!(synth.active_voice_count(), 0, "2 ms release ends inside a 256 block");

        synth.process_block(&mut out, &[]);
        assert_eq!(out.peak(0), 0.0);
    }

    #[test]
    fn test_events_are_sample_accurate() {
        let mut synth = synth_with(4, 512);
        let mut out = AudioBuffer::new(1, 512);
        synth.process_block(&mut out, &[NoteEvent::note_on(256, 69, 127)]);
        let ch = out.channel(0);
        assert!(ch[..256].iter().all(|&s| s == 0.0), "silent before the event");
        assert!(ch[256..].iter().any(|s| s.abs() > 0.0));
    }

    #[test]
    fn test_max_active_voices_limit() {
        let mut synth = synth_with(8, 64);
        synth.set_max_active_voices(2);
        let mut out = AudioBuffer::new(1, 64);
        let events: Vec<_> = (0..5).map(|i| NoteEvent::note_on(0, 60 + i, 100)).collect();
        synth.process_block(&mut out, &events);
        assert_eq!(synth.active_voice_count(), 2);
        synth.set_max_active_voices(100);
        assert_eq!(synth.max_active_voices(), 8, "limit clamps to the pool size");
    }

    #[test]
    fn test_apply_param_and_preset() {
        let mut synth = synth_with(4, 64);
        synth.apply_param(SynthParam::Waveform, 2.0);
        synth.apply_param(SynthParam::FilterCutoff, 5000.0);
        synth.apply_param(SynthParam::Sustain, 3.0);
        synth.apply_param(SynthParam::Waveform, 99.0);
        assert_eq!(synth.patch().oscillator.waveform, Waveform::Square, "bad index ignored");
        assert_eq!(synth.patch().filter.cutoff, 5000.0);
        assert_eq!(synth.envelope.sustain, 1.0, "envelope is clamped for rendering");

        let preset = synth.preset("Lead");
        let json = serde_json::to_string(&preset).unwrap();
        let back: SynthPreset = serde_json::from_str(&json).unwrap();
        let mut other = synth_with(4, 64);
        other.load_preset(&back);
        assert_eq!(other.patch().oscillator.waveform, Waveform::Square);
    }

    #[test]
    fn test_non_finite_params_are_ignored() {
        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let mut synth = synth_with(4, 256);
            for param in [
                SynthParam::Amplitude,
                SynthParam::FilterCutoff,
                SynthParam::FilterResonance,
                SynthParam::Attack,
                SynthParam::Decay,
                SynthParam::Sustain,
                SynthParam::Release,
                SynthParam::AttackCurve,
                SynthParam::LfoRate,
                SynthParam::LfoAmplitudeDepth,
                SynthParam::LfoPitchDepth,
                SynthParam::Tuning,
                SynthParam::Waveform,
                SynthParam::MaxActiveVoices,
            ] {
                synth.apply_param(param, value);
            }
            assert_eq!(*synth.patch(), SynthPatch::default(), "{} leaves the patch alone", value);
            assert_eq!(synth.max_active_voices(), 4);

            let mut out = AudioBuffer::new(1, 256);
            synth.process_block(&mut out, &[NoteEvent::note_on(0, 60, 100)]);
            for _ in 0..4 {
                synth.process_block(&mut out, &[]);
            }
            assert!(
                out.channel(0).iter().all(|s| s.is_finite()),
                "output stays finite after {} parameters",
                value
            );
        }
    }

    #[test]
    fn test_apply_releases_skips_note_ons() {
        let mut synth = synth_with(4, 64);
        let mut out = AudioBuffer::new(1, 64);
        synth.process_block(
            &mut out,
            &[NoteEvent::note_on(0, 60, 100), NoteEvent::note_on(0, 64, 100)],
        );
        let discarded = synth.apply_releases(&[
            NoteEvent::note_off(0, 60),
            NoteEvent::note_on(0, 67, 100),
            NoteEvent::note_on(0, 64, 0),
        ]);
        assert_eq!(discarded, 1, "only the real note-on is discarded");
        assert_eq!(synth.active_voice_count(), 2, "released voices still ring out");
        assert!(synth
            .voices()
            .iter()
            .filter(|v| v.is_active())
            .all(|v| v.stage() == EnvelopeStage::Release));
    }

    #[test]
    fn test_all_notes_off_and_panic() {
        let mut synth = synth_with(4, 64);
        let mut out = AudioBuffer::new(1, 64);
        synth.process_block(
            &mut out,
            &[NoteEvent::note_on(0, 60, 100), NoteEvent::note_on(0, 64, 100)],
        );
        synth.process_block(&mut out, &[NoteEvent::all_notes_off(0)]);
        assert!(synth
            .voices()
            .iter()
            .filter(|v| v.is_active())
            .all(|v| v.stage() == EnvelopeStage::Release));
        synth.panic();
        assert_eq!(synth.active_voice_count(), 0);
    }
}
