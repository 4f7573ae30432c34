//! Master orchestrator.
//!
//! Owns the synthesizer, equalizer, analyzer, effect slots and limiter and
//! runs them in a fixed order once per block:
//!
//! input gain and metering, synth, EQ, inserts, sends, analysis tap,
//! limiter (plus the emergency stage), output gain and metering.
//!
//! Control-plane traffic arrives through an optional [`EngineHandle`] and is
//! applied at block boundaries. Master gains, mute and bypass are read from
//! [`MasterControls`] cells.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::ai_tap::AiTap;
use super::config::MasterConfig;
use super::effects::{EffectKind, EffectOutcome};
use super::limiter::LookaheadLimiter;
use super::optimizer::{AutoOptimizer, QualityLevel};
use super::protection::{BlockHealth, ProtectionMonitor, ProtectionState};
use super::slots::{InsertSettings, InsertSlot, SendSettings, SendSlot, NUM_INSERTS, NUM_SENDS};
use super::stats::{Levels, MasterStats, MasterStatsSnapshot};
use crate::analysis::{AnalysisConfig, MlFeatures, SpectralAnalyzer};
use crate::dsp::{
    clamp_finite, db_to_linear, AudioBuffer, PlayState, ProcessContext, Published, SmoothedGain,
};
use crate::engine::channels::EngineHandle;
use crate::engine::commands::{
    as_flag, as_index, AsyncResult, AsyncResultKind, MeterUpdate, NoteEvent, ParamTarget,
    ParameterChange, TransportCommand, TransportKind,
};
use crate::engine::context::EngineContext;
use crate::engine::error::EngineResult;
use crate::eq::{AnalogEq, EqConfig, EqPreset};
use crate::synth::{SynthConfig, SynthPreset, Synthesizer};

/// Upper bounds on queue traffic handled per block.
const MAX_PARAMS_PER_BLOCK: usize = 256;
const MAX_TRANSPORT_PER_BLOCK: usize = 16;
const MAX_RESULTS_PER_BLOCK: usize = 64;
const MAX_EVENTS_PER_BLOCK: usize = 512;

/// Addressable master parameters. Slot parameters carry the slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MasterParam {
    InsertKind(u8),
    InsertEnabled(u8),
    InsertBypass(u8),
    InsertMix(u8),
    InsertInputGain(u8),
    InsertOutputGain(u8),
    InsertParam { slot: u8, index: u8 },
    SendKind(u8),
    SendEnabled(u8),
    SendMute(u8),
    SendLevel(u8),
    ReturnLevel(u8),
    SendParam { slot: u8, index: u8 },
    LimiterEnabled,
    LimiterThreshold,
    LimiterRelease,
    CpuThreshold,
    AutoOptimization,
    SynthEnabled,
    EqEnabled,
    AnalysisEnabled,
}

/// Controls the UI sets directly. Read once per block.
#[derive(Debug)]
pub struct MasterControls {
    pub input_gain_db: Published<f32>,
    pub output_gain_db: Published<f32>,
    pub mute: Published<bool>,
    pub bypass: Published<bool>,
}

impl Default for MasterControls {
    fn default() -> Self {
        Self {
            input_gain_db: Published::new(0.0),
            output_gain_db: Published::new(0.0),
            mute: Published::new(false),
            bypass: Published::new(false),
        }
    }
}

impl MasterControls {
    /// Non-finite gains publish as 0 dB.
    pub fn set_input_gain_db(&self, db: f32) {
        self.input_gain_db.publish(finite_db(db));
    }

    pub fn set_output_gain_db(&self, db: f32) {
        self.output_gain_db.publish(finite_db(db));
    }

    pub fn set_mute(&self, mute: bool) {
        self.mute.publish(mute);
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.publish(bypass);
    }
}

/// Whole-master state as plain values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterPreset {
    pub name: String,
    pub inserts: [InsertSettings; NUM_INSERTS],
    pub sends: [SendSettings; NUM_SENDS],
    pub eq: EqPreset,
    pub synth: SynthPreset,
    pub limiter_threshold_db: f32,
    pub limiter_release_ms: f32,
    pub input_gain_db: f32,
    pub output_gain_db: f32,
}

impl Default for MasterPreset {
    fn default() -> Self {
        let config = MasterConfig::default();
        Self {
            name: "Init".into(),
            inserts: [InsertSettings::default(); NUM_INSERTS],
            sends: [SendSettings::default(); NUM_SENDS],
            eq: EqPreset::default(),
            synth: SynthPreset::default(),
            limiter_threshold_db: config.limiter_threshold_db,
            limiter_release_ms: config.limiter_release_ms,
            input_gain_db: 0.0,
            output_gain_db: 0.0,
        }
    }
}

impl MasterPreset {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct MasterProcessor {
    ctx: EngineContext,
    config: MasterConfig,

    synth: Synthesizer,
    eq: AnalogEq,
    analyzer: SpectralAnalyzer,
    inserts: Vec<InsertSlot>,
    sends: Vec<SendSlot>,
    limiter: LookaheadLimiter,
    protection: ProtectionMonitor,
    optimizer: AutoOptimizer,
    ai_tap: AiTap,

    synth_enabled: bool,
    eq_enabled: bool,
    analysis_enabled: bool,
    limiter_enabled: bool,
    limiter_threshold_db: f32,
    limiter_release_ms: f32,
    emergency_gain: f32,

    controls: Arc<MasterControls>,
    stats: Arc<MasterStats>,
    handle: Option<EngineHandle>,

    work: AudioBuffer,
    synth_buffer: AudioBuffer,
    mono: Vec<f32>,
    events: Vec<NoteEvent>,
    input_gain: SmoothedGain,
    output_gain: SmoothedGain,

    process_ctx: ProcessContext,
    stream_samples: u64,
    cpu_usage: f32,
    avg_block_ms: f32,
    peak_block_ms: f32,
}

impl MasterProcessor {
    pub fn new(ctx: &EngineContext) -> EngineResult<Self> {
        let config = MasterConfig::from_context(ctx);
        config.validate_for(ctx)?;
        let sr = config.sample_rate;
        let channels = config.num_channels;
        let block = config.max_block_size;

        let mut master = Self {
            synth: Synthesizer::new(ctx)?,
            eq: AnalogEq::new(ctx)?,
            analyzer: SpectralAnalyzer::new(ctx)?,
            inserts: Vec::new(),
            sends: Vec::new(),
            limiter: LookaheadLimiter::new(sr, channels, 0.0, 1.0, 50.0),
            protection: ProtectionMonitor::new(config.protection.clone(), config.cpu_threshold),
            optimizer: AutoOptimizer::new(false, 1.0, 0.0, 1),
            ai_tap: AiTap::new(sr),
            synth_enabled: true,
            eq_enabled: true,
            analysis_enabled: true,
            limiter_enabled: true,
            limiter_threshold_db: config.limiter_threshold_db,
            limiter_release_ms: config.limiter_release_ms,
            emergency_gain: 1.0,
            controls: Arc::new(MasterControls::default()),
            stats: Arc::new(MasterStats::default()),
            handle: None,
            work: AudioBuffer::new(channels, block),
            synth_buffer: AudioBuffer::new(channels, block),
            mono: Vec::new(),
            events: Vec::with_capacity(MAX_EVENTS_PER_BLOCK),
            input_gain: SmoothedGain::default(),
            output_gain: SmoothedGain::default(),
            process_ctx: ProcessContext::new(sr, block),
            stream_samples: 0,
            cpu_usage: 0.0,
            avg_block_ms: 0.0,
            peak_block_ms: 0.0,
            ctx: ctx.clone(),
            config: config.clone(),
        };
        master.prepare(&config)?;
        Ok(master)
    }

    /// Reconfigures every stage and reallocates buffers. Slot, band and
    /// patch settings survive. Control thread only.
    pub fn prepare(&mut self, config: &MasterConfig) -> EngineResult<()> {
        config.validate_for(&self.ctx)?;
        let sr = config.sample_rate;
        let channels = config.num_channels;
        let block = config.max_block_size;

        let synth_config = SynthConfig {
            sample_rate: sr,
            max_block_size: block,
            num_voices: config.max_voices,
            tuning: self.synth.preset("").tuning,
            patch: *self.synth.patch(),
        };
        self.synth.prepare(&synth_config)?;
        let eq_config = EqConfig {
            sample_rate: sr,
            max_block_size: block,
            num_channels: channels,
            analog_model: self.eq.analog().model,
            oversampling: config.eq_oversampling,
            ..EqConfig::default()
        };
        self.eq.prepare(&eq_config)?;
        let analysis_config = AnalysisConfig {
            sample_rate: sr,
            max_block_size: block,
            ..self.analyzer.config().clone()
        };
        self.analyzer.prepare(&analysis_config)?;

        let inserts: Vec<InsertSettings> = self.inserts.iter().map(|s| *s.settings()).collect();
        self.inserts = (0..NUM_INSERTS).map(|_| InsertSlot::new(sr, channels)).collect();
        for (slot, settings) in self.inserts.iter_mut().zip(inserts) {
            slot.set_settings(settings);
        }
        let sends: Vec<SendSettings> = self.sends.iter().map(|s| *s.settings()).collect();
        self.sends = (0..NUM_SENDS)
            .map(|_| SendSlot::new(sr, channels, block))
            .collect();
        for (slot, settings) in self.sends.iter_mut().zip(sends) {
            slot.set_settings(settings);
        }

        self.limiter_threshold_db = config.limiter_threshold_db;
        self.limiter_release_ms = config.limiter_release_ms;
        self.limiter = LookaheadLimiter::new(
            sr,
            channels,
            config.limiter_threshold_db,
            config.limiter_lookahead_ms,
            config.limiter_release_ms,
        );
        self.protection = ProtectionMonitor::new(config.protection.clone(), config.cpu_threshold);
        self.optimizer = AutoOptimizer::new(
            config.auto_optimization,
            config.cpu_threshold,
            config.optimization_hysteresis,
            config.optimization_blocks,
        );
        self.ai_tap = AiTap::new(sr);
        self.emergency_gain = db_to_linear(config.protection.emergency_gain_db.min(0.0));

        self.synth_enabled = config.enable_synth;
        self.eq_enabled = config.enable_eq;
        self.analysis_enabled = config.enable_analysis;
        self.limiter_enabled = config.enable_limiter;

        self.work = AudioBuffer::new(channels, block);
        self.synth_buffer = AudioBuffer::new(channels, block);
        self.mono = vec![0.0; block];
        self.input_gain = SmoothedGain::new(1.0, SmoothedGain::DEFAULT_TIME_CONSTANT_MS, sr);
        self.output_gain = SmoothedGain::new(1.0, SmoothedGain::DEFAULT_TIME_CONSTANT_MS, sr);
        self.process_ctx = ProcessContext::new(sr, block);
        self.config = config.clone();
        self.reset();

        log::info!(
            "master prepared: {} Hz, block {}, {} ch, latency {} samples",
            sr,
            block,
            channels,
            self.latency()
        );
        Ok(())
    }

    /// Clears all signal state and statistics.
    pub fn reset(&mut self) {
        self.synth.reset();
        self.eq.reset();
        self.analyzer.reset();
        self.inserts.iter_mut().for_each(InsertSlot::reset);
        self.sends.iter_mut().for_each(SendSlot::reset);
        self.limiter.reset();
        self.protection.reset();
        self.optimizer.reset();
        self.apply_quality(QualityLevel::Full);
        self.ai_tap.reset();
        self.stream_samples = 0;
        self.cpu_usage = 0.0;
        self.avg_block_ms = 0.0;
        self.peak_block_ms = 0.0;
        self.stats.reset();
        self.stats.latency_samples.publish(self.latency());
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Routes queue traffic through this processor from now on.
    pub fn attach_channels(&mut self, handle: EngineHandle) {
        self.handle = Some(handle);
    }

    pub fn detach_channels(&mut self) -> Option<EngineHandle> {
        self.handle.take()
    }

    pub fn controls(&self) -> Arc<MasterControls> {
        Arc::clone(&self.controls)
    }

    pub fn stats(&self) -> Arc<MasterStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats_snapshot(&self) -> MasterStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn synth(&self) -> &Synthesizer {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut Synthesizer {
        &mut self.synth
    }

    pub fn eq(&self) -> &AnalogEq {
        &self.eq
    }

    pub fn eq_mut(&mut self) -> &mut AnalogEq {
        &mut self.eq
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn analyzer_mut(&mut self) -> &mut SpectralAnalyzer {
        &mut self.analyzer
    }

    pub fn insert(&self, slot: usize) -> Option<&InsertSlot> {
        self.inserts.get(slot)
    }

    pub fn insert_mut(&mut self, slot: usize) -> Option<&mut InsertSlot> {
        self.inserts.get_mut(slot)
    }

    pub fn send(&self, slot: usize) -> Option<&SendSlot> {
        self.sends.get(slot)
    }

    pub fn send_mut(&mut self, slot: usize) -> Option<&mut SendSlot> {
        self.sends.get_mut(slot)
    }

    pub fn transport(&self) -> &crate::dsp::TransportState {
        &self.process_ctx.transport
    }

    pub fn protection_state(&self) -> ProtectionState {
        self.protection.state()
    }

    pub fn quality_level(&self) -> QualityLevel {
        self.optimizer.level()
    }

    /// Latest inference result of `kind`, if one has arrived.
    pub fn ai_result(&self, kind: AsyncResultKind) -> Option<&AsyncResult> {
        self.ai_tap.latest(kind)
    }

    /// Compact feature vector of the latest analysis frame, when enabled.
    pub fn ml_features(&self) -> Option<MlFeatures> {
        self.config.ml_features.then(|| self.analyzer.ml_features())
    }

    /// Total processing latency in samples.
    pub fn latency(&self) -> usize {
        self.eq.latency() + self.limiter.latency()
    }

    pub fn save_preset(&self, name: &str) -> MasterPreset {
        MasterPreset {
            name: name.to_string(),
            inserts: std::array::from_fn(|i| *self.inserts[i].settings()),
            sends: std::array::from_fn(|i| *self.sends[i].settings()),
            eq: self.eq.save_preset(name),
            synth: self.synth.preset(name),
            limiter_threshold_db: self.limiter_threshold_db,
            limiter_release_ms: self.limiter_release_ms,
            input_gain_db: self.controls.input_gain_db.get(),
            output_gain_db: self.controls.output_gain_db.get(),
        }
    }

    pub fn load_preset(&mut self, preset: &MasterPreset) {
        for (slot, settings) in self.inserts.iter_mut().zip(preset.inserts.iter()) {
            slot.set_settings(*settings);
        }
        for (slot, settings) in self.sends.iter_mut().zip(preset.sends.iter()) {
            slot.set_settings(*settings);
        }
        self.eq.load_preset(&preset.eq);
        self.synth.load_preset(&preset.synth);
        self.apply_param(MasterParam::LimiterThreshold, preset.limiter_threshold_db);
        self.apply_param(MasterParam::LimiterRelease, preset.limiter_release_ms);
        self.controls.set_input_gain_db(preset.input_gain_db);
        self.controls.set_output_gain_db(preset.output_gain_db);
        log::info!("master preset loaded: {}", preset.name);
    }

    /// Routes a parameter change to the stage it addresses. Changes with a
    /// non-finite value are dropped and counted.
    pub fn apply_change(&mut self, change: ParameterChange) {
        let value = change.value;
        if !value.is_finite() {
            self.stats.rejected_params.increment();
            return;
        }
        match change.target {
            ParamTarget::Synth(p) => self.synth.apply_param(p, value),
            ParamTarget::Eq(p) => self.eq.apply_param(p, value),
            ParamTarget::Analysis(p) => self.analyzer.apply_param(p, value),
            ParamTarget::Master(p) => self.apply_param(p, value),
        }
    }

    /// REAL-TIME SAFE.
    pub fn apply_param(&mut self, param: MasterParam, value: f32) {
        let flag = as_flag(value);
        match param {
            MasterParam::InsertKind(i) => {
                if let (Some(slot), Some(kind)) = (
                    self.inserts.get_mut(i as usize),
                    EffectKind::from_index(as_index(value)),
                ) {
                    slot.set_kind(kind);
                }
            }
            MasterParam::InsertEnabled(i) => self.with_insert(i, |s| s.set_enabled(flag)),
            MasterParam::InsertBypass(i) => self.with_insert(i, |s| s.set_bypassed(flag)),
            MasterParam::InsertMix(i) => self.with_insert(i, |s| s.set_mix(value)),
            MasterParam::InsertInputGain(i) => self.with_insert(i, |s| s.set_input_gain_db(value)),
            MasterParam::InsertOutputGain(i) => {
                self.with_insert(i, |s| s.set_output_gain_db(value))
            }
            MasterParam::InsertParam { slot, index } => {
                self.with_insert(slot, |s| s.set_param(index as usize, value))
            }
            MasterParam::SendKind(i) => {
                if let (Some(slot), Some(kind)) = (
                    self.sends.get_mut(i as usize),
                    EffectKind::from_index(as_index(value)),
                ) {
                    slot.set_kind(kind);
                }
            }
            MasterParam::SendEnabled(i) => self.with_send(i, |s| s.set_enabled(flag)),
            MasterParam::SendMute(i) => self.with_send(i, |s| s.set_muted(flag)),
            MasterParam::SendLevel(i) => self.with_send(i, |s| s.set_send_level(value)),
            MasterParam::ReturnLevel(i) => self.with_send(i, |s| s.set_return_level(value)),
            MasterParam::SendParam { slot, index } => {
                self.with_send(slot, |s| s.set_param(index as usize, value))
            }
            MasterParam::LimiterEnabled => self.limiter_enabled = flag,
            MasterParam::LimiterThreshold => {
                self.limiter_threshold_db =
                    clamp_finite(value, -24.0, 0.0, self.limiter_threshold_db);
                self.limiter.set_threshold_db(self.limiter_threshold_db);
            }
            MasterParam::LimiterRelease => {
                self.limiter_release_ms = clamp_finite(value, 1.0, 5000.0, self.limiter_release_ms);
                self.limiter.set_release_ms(self.limiter_release_ms);
            }
            MasterParam::CpuThreshold => {
                let threshold = clamp_finite(value, 0.05, 100.0, self.config.cpu_threshold);
                self.config.cpu_threshold = threshold;
                self.protection.set_cpu_threshold(threshold);
                self.optimizer.set_threshold(threshold);
            }
            MasterParam::AutoOptimization => {
                self.config.auto_optimization = flag;
                self.optimizer.set_enabled(flag);
            }
            MasterParam::SynthEnabled => self.synth_enabled = flag,
            MasterParam::EqEnabled => self.eq_enabled = flag,
            MasterParam::AnalysisEnabled => self.analysis_enabled = flag,
        }
    }

    fn with_insert<F: FnOnce(&mut InsertSlot)>(&mut self, index: u8, f: F) {
        if let Some(slot) = self.inserts.get_mut(index as usize) {
            f(slot);
        }
    }

    fn with_send<F: FnOnce(&mut SendSlot)>(&mut self, index: u8, f: F) {
        if let Some(slot) = self.sends.get_mut(index as usize) {
            f(slot);
        }
    }

    fn apply_transport(&mut self, cmd: TransportCommand) {
        let transport = &mut self.process_ctx.transport;
        match cmd.kind {
            TransportKind::Play => transport.state = PlayState::Playing,
            TransportKind::Stop => transport.state = PlayState::Stopped,
            TransportKind::Pause => transport.state = PlayState::Paused,
            TransportKind::Record => transport.state = PlayState::Recording,
            TransportKind::SetPosition => {
                transport.locate(cmd.position_seconds, self.process_ctx.sample_rate)
            }
        }
    }

    /// Applies an optimizer decision to the stages it governs.
    fn apply_quality(&mut self, level: QualityLevel) {
        self.synth
            .set_max_active_voices(level.voice_limit(self.config.max_voices));
        self.analyzer.set_reduced_quality(level.analysis_reduced());
        self.stats.quality_level.store_relaxed(level);
    }

    fn analysis_active(&self) -> bool {
        self.analysis_enabled
            && self.config.realtime_analysis
            && self.optimizer.level().analysis_enabled()
    }

    /// Drains control queues and collects this block's note events, sorted
    /// by offset, into `self.events`.
    fn collect_control_traffic(&mut self, external: &[NoteEvent]) {
        self.events.clear();
        let room = MAX_EVENTS_PER_BLOCK;
        let take = external.len().min(room);
        self.events.extend_from_slice(&external[..take]);
        let dropped = (external.len() - take) as u64;

        if let Some(mut handle) = self.handle.take() {
            handle
                .param_rx
                .drain_at_most(MAX_PARAMS_PER_BLOCK, |change| self.apply_change(change));
            handle
                .transport_rx
                .drain_at_most(MAX_TRANSPORT_PER_BLOCK, |cmd| self.apply_transport(cmd));
            let results = self
                .ai_tap
                .drain_results(&mut handle.result_rx, MAX_RESULTS_PER_BLOCK);
            self.stats.ai_results.add(results as u64);

            // Notes past the limit stay queued for the next block.
            let free = room - self.events.len();
            let events = &mut self.events;
            handle.note_rx.drain_at_most(free, |e| events.push(e));
            self.handle = Some(handle);
        }

        // Stable insertion sort; both sources are usually already ordered.
        for i in 1..self.events.len() {
            let mut j = i;
            while j > 0 && self.events[j - 1].sample_offset > self.events[j].sample_offset {
                self.events.swap(j - 1, j);
                j -= 1;
            }
        }

        if dropped > 0 {
            self.stats.dropped_events.add(dropped);
        }
    }

    /// Renders one block. `input` is the live input (use a silent buffer for
    /// synth-only operation); `output` receives the master signal. Blocks
    /// longer than the prepared maximum are truncated and counted.
    /// Returns the number of frames written.
    ///
    /// REAL-TIME SAFE.
    pub fn process_block(
        &mut self,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
        events: &[NoteEvent],
    ) -> usize {
        let started = Instant::now();
        let max_block = self.work.capacity();
        if input.len() > max_block {
            self.stats.buffer_overruns.increment();
        }
        let n = input.len().min(max_block).min(output.capacity());
        self.process_ctx.block_size = n;
        self.work.set_len(n);
        self.synth_buffer.set_len(n);

        self.collect_control_traffic(events);

        // Input stage.
        copy_into(&mut self.work, input, n);
        let controls = &self.controls;
        let max_in = self.config.max_input_gain_db;
        let in_db = clamp_finite(controls.input_gain_db.get(), -max_in, max_in, 0.0);
        let out_db = clamp_finite(
            controls.output_gain_db.get(),
            -60.0,
            self.config.max_output_gain_db,
            0.0,
        );
        let muted = controls.mute.get();
        let bypass = controls.bypass.get();

        self.input_gain.set_target(db_to_linear(in_db));
        self.input_gain.apply(&mut self.work);
        let input_levels = measure(&self.work);
        self.stats.input.store(&input_levels);
        let clip_level = self.protection.config().clip_level;
        let clipped = count_clips(&self.work, clip_level);
        self.stats.clipped_samples.add(clipped as u64);
        let total = (n * self.work.num_channels()).max(1);
        let clip_rate = clipped as f32 / total as f32;

        if bypass {
            self.release_notes();
        } else {
            self.run_chain();
        }

        self.output_gain
            .set_target(if muted { 0.0 } else { db_to_linear(out_db) });
        self.output_gain.apply(&mut self.work);
        output.copy_from(&self.work);

        let output_levels = measure(&self.work);
        self.stats.output.store(&output_levels);

        self.process_ctx.transport.advance(n);
        self.stream_samples += n as u64;
        self.finish_block(started, n, clip_rate);
        n
    }

    fn run_chain(&mut self) {
        let n = self.work.len();

        if self.synth_enabled {
            let synth_stats = self.synth.process_block(&mut self.synth_buffer, &self.events);
            self.work.add_from(&self.synth_buffer, 1.0);
            self.stats.active_voices.store_relaxed(synth_stats.active_voices);
        } else {
            self.release_notes();
            self.stats.active_voices.store_relaxed(0);
        }

        if self.eq_enabled {
            self.eq.process_block(&mut self.work);
        }

        let pool = self.ctx.pool();
        for slot in self.inserts.iter_mut().filter(|s| s.is_active()) {
            let outcome = if slot.needs_scratch() {
                match pool.allocate() {
                    Some(mut block) => slot.process(&mut self.work, Some(&mut block[..])),
                    None => EffectOutcome::Skipped,
                }
            } else {
                slot.process(&mut self.work, None)
            };
            if outcome == EffectOutcome::Skipped {
                self.stats.skipped_effects.increment();
            }
        }

        // Every send taps the same post-insert signal.
        let mut any_send = false;
        for send in self.sends.iter_mut() {
            any_send |= send.render(&self.work);
        }
        if any_send {
            for send in self.sends.iter() {
                send.mix_into(&mut self.work);
            }
        }

        if self.analysis_active() {
            let frames = self.analyzer.process_block(&self.work);
            if let Some(handle) = self.handle.as_mut() {
                for age in (0..frames).rev() {
                    if let Some(features) = self.analyzer.features_at_age(age) {
                        handle.feature_tx.push_lossy(features);
                    }
                }
            }
        }

        let mono_len = self.work.mix_to_mono(&mut self.mono[..n]);
        match self.handle.as_mut() {
            Some(handle) => {
                self.ai_tap
                    .feed_queue(&self.mono[..mono_len], &mut handle.snapshot_tx);
            }
            None => {
                self.ai_tap.feed(&self.mono[..mono_len], |_| {});
            }
        }

        let emergency = self.protection.is_emergency();
        if emergency {
            self.work.apply_gain(self.emergency_gain);
        }
        self.limiter
            .process(&mut self.work, self.limiter_enabled || emergency);
        self.stats
            .limiter_gain_reduction_db
            .store_relaxed(self.limiter.gain_reduction_db());
    }

    /// Keeps note-offs flowing while the synth is not rendering, so no
    /// voice is left held when it renders again.
    fn release_notes(&mut self) {
        let discarded = self.synth.apply_releases(&self.events);
        if discarded > 0 {
            self.stats.dropped_events.add(discarded as u64);
        }
    }

    fn finish_block(&mut self, started: Instant, frames: usize, clip_rate: f32) {
        let elapsed_ms = started.elapsed().as_secs_f32() * 1000.0;
        let budget_ms = self.process_ctx.block_duration().max(1e-6) * 1000.0;
        let load = elapsed_ms / budget_ms;
        if frames > 0 && load > 1.0 {
            self.stats.dropped_frames.increment();
        }
        self.cpu_usage = 0.9 * self.cpu_usage + 0.1 * load;
        self.avg_block_ms = 0.99 * self.avg_block_ms + 0.01 * elapsed_ms;
        self.peak_block_ms = self.peak_block_ms.max(elapsed_ms);
        self.stats.cpu_usage.store_relaxed(self.cpu_usage);
        self.stats.avg_block_ms.store_relaxed(self.avg_block_ms);
        self.stats.peak_block_ms.store_relaxed(self.peak_block_ms);

        let health = BlockHealth {
            clip_rate,
            cpu_load: self.cpu_usage,
            stream_seconds: self.stream_samples as f64 / self.process_ctx.sample_rate as f64,
        };
        if self.protection.update(health).is_some() {
            self.stats
                .store_protection(self.protection.state(), self.protection.records());
        }
        if let Some(level) = self.optimizer.update(self.cpu_usage, self.protection.state()) {
            self.apply_quality(level);
        }

        if let Some(handle) = self.handle.as_mut() {
            let levels = self.stats.output.load();
            for ch in 0..self.work.num_channels().min(2) {
                handle.meter_tx.push_lossy(MeterUpdate {
                    channel: ch as u8,
                    peak: levels.peak[ch],
                    rms: levels.rms[ch],
                    timestamp: self.stream_samples,
                });
            }
            self.stats.queue_overflows.store_relaxed(handle.overflow_total());
        }
        self.stats.blocks_processed.increment();
    }
}

/// Copies the first `n` frames of `src` into `dst`; missing channels repeat
/// the last source channel, missing frames are zero.
fn finite_db(db: f32) -> f32 {
    if db.is_finite() {
        db
    } else {
        0.0
    }
}

fn copy_into(dst: &mut AudioBuffer, src: &AudioBuffer, n: usize) {
    let len = dst.set_len(n);
    let src_channels = src.num_channels();
    let avail = src.len().min(len);
    for ch in 0..dst.num_channels() {
        let out = dst.channel_mut(ch);
        if src_channels == 0 {
            out.fill(0.0);
            continue;
        }
        out[..avail].copy_from_slice(&src.channel(ch.min(src_channels - 1))[..avail]);
        out[avail..].fill(0.0);
    }
}

/// Peak and RMS of the first two channels; mono reads the same on both
/// sides.
fn measure(buffer: &AudioBuffer) -> Levels {
    let mut levels = Levels::default();
    let channels = buffer.num_channels();
    if channels == 0 {
        return levels;
    }
    for side in 0..2 {
        let ch = side.min(channels - 1);
        levels.peak[side] = buffer.peak(ch);
        levels.rms[side] = buffer.rms(ch);
    }
    levels
}

fn count_clips(buffer: &AudioBuffer, level: f32) -> usize {
    (0..buffer.num_channels())
        .map(|ch| buffer.channel(ch).iter().filter(|s| s.abs() >= level).count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channels::EngineChannels;
    use crate::engine::commands::AsyncResultKind;
    use crate::engine::config::EngineConfig;
    use crate::analysis::AnalysisParam;
    use crate::eq::EqParam;
    use crate::master::config::ProtectionConfig;
    use crate::synth::envelope::EnvelopeStage;
    use crate::synth::SynthParam;

    const BLOCK: usize = 512;

    fn context() -> EngineContext {
        EngineContext::new(EngineConfig::new(48000.0, BLOCK, 2)).unwrap()
    }

    /// Deterministic config: no synth, EQ or analysis, and a CPU threshold
    /// no debug build reaches.
    fn quiet_config(ctx: &EngineContext) -> MasterConfig {
        MasterConfig {
            enable_synth: false,
            enable_eq: false,
            enable_analysis: false,
            cpu_threshold: 100.0,
            auto_optimization: false,
            protection: ProtectionConfig {
                thermal_cpu: 100.0,
                trigger_blocks: 2,
                escalation_blocks: 3,
                cooldown_seconds: 0.05,
                ..ProtectionConfig::default()
            },
            ..MasterConfig::from_context(ctx)
        }
    }

    fn sine(amp: f32, freq: f32, offset: usize) -> AudioBuffer {
        let samples: Vec<f32> = (0..BLOCK)
            .map(|i| {
                let t = (offset + i) as f32 / 48000.0;
                amp * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect();
        AudioBuffer::from_channels(&[&samples, &samples])
    }

    #[test]
    fn test_synth_chain_produces_limited_output() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        let config = MasterConfig {
            cpu_threshold: 100.0,
            auto_optimization: false,
            ..MasterConfig::from_context(&ctx)
        };
        master.prepare(&config).unwrap();

        let silence = AudioBuffer::new(2, BLOCK);
        let mut out = AudioBuffer::new(2, BLOCK);
        let notes = [
            NoteEvent::note_on(0, 60, 127),
            NoteEvent::note_on(0, 64, 127),
            NoteEvent::note_on(0, 67, 127),
        ];
        master.process_block(&silence, &mut out, &notes);
        let mut energy = 0.0;
        let mut peak = 0.0f32;
        for _ in 0..8 {
            master.process_block(&silence, &mut out, &[]);
            energy += out.rms(0);
            peak = peak.max(out.peak(0)).max(out.peak(1));
        }
        assert!(energy > 0.0, "synth reaches the output");
        let ceiling = db_to_linear(config.limiter_threshold_db);
        assert!(peak <= ceiling * 1.01, "peak {} over limiter ceiling", peak);

        let snap = master.stats_snapshot();
        assert_eq!(snap.blocks_processed, 9);
        assert_eq!(snap.active_voices, 3);
        assert_eq!(snap.latency_samples, master.latency());
    }

    #[test]
    fn test_limiter_holds_hot_input() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        let mut out = AudioBuffer::new(2, BLOCK);
        let threshold = db_to_linear(master.config().limiter_threshold_db);
        for b in 0..6 {
            master.process_block(&sine(0.9, 220.0, b * BLOCK), &mut out, &[]);
            assert!(out.peak(0) <= threshold * 1.01);
        }
        master.apply_param(MasterParam::LimiterThreshold, -12.0);
        for b in 6..12 {
            master.process_block(&sine(0.9, 220.0, b * BLOCK), &mut out, &[]);
        }
        assert!(out.peak(0) <= db_to_linear(-12.0) * 1.01);
        assert!(master.stats_snapshot().limiter_gain_reduction_db > 6.0);
    }

    #[test]
    fn test_bypass_and_mute() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        let controls = master.controls();
        let input = sine(0.5, 440.0, 0);
        let mut out = AudioBuffer::new(2, BLOCK);

        controls.set_bypass(true);
        master.process_block(&input, &mut out, &[]);
        assert_eq!(out.channel(0), input.channel(0), "bypass skips the limiter delay");

        controls.set_bypass(false);
        controls.set_mute(true);
        for _ in 0..10 {
            master.process_block(&input, &mut out, &[]);
        }
        assert!(out.peak(0) < 1e-4, "muted output decays to silence");
    }

    #[test]
    fn test_oversize_block_is_truncated() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        let big = AudioBuffer::new(2, BLOCK * 2);
        let mut out = AudioBuffer::new(2, BLOCK * 2);
        assert_eq!(master.process_block(&big, &mut out, &[]), BLOCK);
        assert_eq!(out.len(), BLOCK);
        assert_eq!(master.stats_snapshot().buffer_overruns, 1);
    }

    #[test]
    fn test_clipping_input_escalates_and_recovers() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        let mut out = AudioBuffer::new(2, BLOCK);

        for b in 0..5 {
            master.process_block(&sine(2.0, 220.0, b * BLOCK), &mut out, &[]);
        }
        assert_eq!(master.protection_state(), ProtectionState::EmergencyLimiting);
        master.process_block(&sine(2.0, 220.0, 0), &mut out, &[]);
        let ceiling = db_to_linear(master.config().limiter_threshold_db);
        assert!(out.peak(0) <= ceiling * 1.01, "emergency stage keeps the ceiling");

        let silence = AudioBuffer::new(2, BLOCK);
        for _ in 0..8 {
            master.process_block(&silence, &mut out, &[]);
        }
        assert_eq!(master.protection_state(), ProtectionState::Normal);

        let snap = master.stats_snapshot();
        assert_eq!(snap.protection_state, ProtectionState::Normal);
        assert_eq!(snap.protection_entries[ProtectionState::Overload.index()], 1);
        assert_eq!(snap.protection_entries[ProtectionState::EmergencyLimiting.index()], 1);
        assert_eq!(snap.protection_entries[ProtectionState::Normal.index()], 1);
        assert!(snap.clipped_samples > 0);
    }

    #[test]
    fn test_quality_levels_reach_synth_and_analysis() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        assert_eq!(master.synth().max_active_voices(), 32);

        master.apply_quality(QualityLevel::ReducedAnalysis);
        assert_eq!(master.synth().max_active_voices(), 16);
        assert!(master.analyzer().is_reduced_quality());

        master.apply_quality(QualityLevel::Minimal);
        assert_eq!(master.synth().max_active_voices(), 8);

        master.apply_quality(QualityLevel::Full);
        assert_eq!(master.synth().max_active_voices(), 32);
        assert!(!master.analyzer().is_reduced_quality());
    }

    #[test]
    fn test_reverb_insert_skipped_when_pool_is_empty() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        let mut settings = InsertSettings::with_kind(EffectKind::Reverb);
        settings.mix = 0.5;
        master.insert_mut(0).unwrap().set_settings(settings);

        let input = sine(0.3, 440.0, 0);
        let mut out = AudioBuffer::new(2, BLOCK);
        let pool = Arc::clone(ctx.pool());
        {
            let held: Vec<_> = std::iter::from_fn(|| pool.allocate()).collect();
            assert_eq!(pool.available(), 0, "held {} blocks", held.len());
            master.process_block(&input, &mut out, &[]);
            assert_eq!(master.stats_snapshot().skipped_effects, 1);
        }
        master.process_block(&input, &mut out, &[]);
        assert_eq!(master.stats_snapshot().skipped_effects, 1, "pool returned");
        assert_eq!(pool.available(), pool.block_count(), "scratch goes back after the block");
    }

    #[test]
    fn test_send_return_is_mixed_in() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        master.apply_param(MasterParam::LimiterEnabled, 0.0);
        master.apply_param(MasterParam::SendKind(0), EffectKind::Delay as u8 as f32);
        master.apply_param(MasterParam::SendParam { slot: 0, index: 0 }, 2.0);
        master.apply_param(MasterParam::SendEnabled(0), 1.0);

        let mut impulse = AudioBuffer::new(2, BLOCK);
        impulse.channel_mut(0)[0] = 0.5;
        impulse.channel_mut(1)[0] = 0.5;
        let mut out = AudioBuffer::new(2, BLOCK);
        master.process_block(&impulse, &mut out, &[]);

        // A disabled limiter still delays by its look-ahead.
        let la = master.limiter.latency();
        let echo = la + 96;
        assert!((out.channel(0)[la] - 0.5).abs() < 1e-6, "dry impulse after look-ahead");
        assert!(
            out.channel(0)[echo] > 0.2,
            "2 ms echo at half send level, got {}",
            out.channel(0)[echo]
        );

        master.apply_param(MasterParam::SendMute(0), 1.0);
        master.reset();
        master.process_block(&impulse, &mut out, &[]);
        assert!(out.channel(0)[echo].abs() < 1e-6, "muted send adds nothing");
    }

    #[test]
    fn test_queue_plumbing() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        let config = MasterConfig {
            cpu_threshold: 100.0,
            auto_optimization: false,
            ..MasterConfig::from_context(&ctx)
        };
        master.prepare(&config).unwrap();
        let (mut control, engine, mut inference) = EngineChannels::with_defaults().unwrap();
        master.attach_channels(engine);

        control
            .set_parameter(ParameterChange::new(
                ParamTarget::Master(MasterParam::InsertKind(2)),
                EffectKind::Distortion as u8 as f32,
            ))
            .unwrap();
        control
            .set_parameter(ParameterChange::flag(
                ParamTarget::Master(MasterParam::InsertEnabled(2)),
                true,
            ))
            .unwrap();
        control.send_note(NoteEvent::note_on(0, 69, 100)).unwrap();
        control
            .send_transport(TransportCommand::new(TransportKind::Play))
            .unwrap();
        let mut result = AsyncResult::new(AsyncResultKind::GrooveExtraction, 7);
        result.confidence = 0.9;
        inference.send_result(result).unwrap();

        let silence = AudioBuffer::new(2, BLOCK);
        let mut out = AudioBuffer::new(2, BLOCK);
        for _ in 0..8 {
            master.process_block(&silence, &mut out, &[]);
        }

        let slot = master.insert(2).unwrap().settings();
        assert_eq!(slot.kind, EffectKind::Distortion);
        assert!(slot.enabled);
        assert_eq!(master.synth().active_voice_count(), 1, "queued note reached the synth");
        assert_eq!(master.transport().state, PlayState::Playing);
        assert_eq!(master.transport().sample_position, 8 * BLOCK as u64);
        assert_eq!(
            master.ai_result(AsyncResultKind::GrooveExtraction).map(|r| r.request_id),
            Some(7)
        );
        assert_eq!(master.stats_snapshot().ai_results, 1);

        let meters: Vec<MeterUpdate> = control.drain_meters().collect();
        assert_eq!(meters.len(), 16, "two channels per block");
        assert!(meters.iter().any(|m| m.rms > 0.0));

        assert!(control.features().poll() > 0, "analysis frames were published");
        assert!(control.features().latest().is_some());
        assert!(master.ml_features().is_some(), "compact vector is on by default");
        assert!(inference.recv_snapshot().is_some(), "4096 samples make snapshots");

        assert!(master.detach_channels().is_some());
    }

    #[test]
    fn test_events_are_merged_in_order() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        let (mut control, engine, _inference) = EngineChannels::with_defaults().unwrap();
        master.attach_channels(engine);
        control.send_note(NoteEvent::note_on(100, 60, 100)).unwrap();
        control.send_note(NoteEvent::note_on(5, 62, 100)).unwrap();

        master.collect_control_traffic(&[NoteEvent::note_on(50, 64, 100), NoteEvent::note_off(300, 64)]);
        let offsets: Vec<u32> = master.events.iter().map(|e| e.sample_offset).collect();
        assert_eq!(offsets, vec![5, 50, 100, 300]);
    }

    #[test]
    fn test_non_finite_params_keep_audio_finite() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        master.apply_param(MasterParam::InsertKind(0), EffectKind::Compressor as u8 as f32);
        master.apply_param(MasterParam::InsertEnabled(0), 1.0);
        master.apply_param(MasterParam::SendEnabled(0), 1.0);
        let threshold_db = master.config().limiter_threshold_db;

        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            for param in [
                MasterParam::InsertMix(0),
                MasterParam::InsertInputGain(0),
                MasterParam::InsertOutputGain(0),
                MasterParam::InsertParam { slot: 0, index: 0 },
                MasterParam::SendLevel(0),
                MasterParam::ReturnLevel(0),
                MasterParam::SendParam { slot: 0, index: 1 },
                MasterParam::LimiterThreshold,
                MasterParam::LimiterRelease,
                MasterParam::CpuThreshold,
            ] {
                master.apply_param(param, value);
            }
        }
        assert_eq!(master.save_preset("p").limiter_threshold_db, threshold_db);

        let ceiling = db_to_linear(threshold_db);
        let mut out = AudioBuffer::new(2, BLOCK);
        for b in 0..8 {
            master.process_block(&sine(0.9, 220.0, b * BLOCK), &mut out, &[]);
            for ch in 0..2 {
                assert!(out.channel(ch).iter().all(|s| s.is_finite()), "block {} is finite", b);
            }
            assert!(out.peak(0) <= ceiling * 1.01);
        }
    }

    #[test]
    fn test_non_finite_changes_are_rejected_and_counted() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        let (mut control, engine, _inference) = EngineChannels::with_defaults().unwrap();
        master.attach_channels(engine);

        for change in [
            ParameterChange::new(ParamTarget::Master(MasterParam::LimiterThreshold), f32::NAN),
            ParameterChange::new(ParamTarget::Master(MasterParam::InsertMix(0)), f32::INFINITY),
            ParameterChange::new(ParamTarget::Eq(EqParam::BandFrequency(0)), f32::NAN),
            ParameterChange::new(ParamTarget::Synth(SynthParam::Amplitude), f32::NEG_INFINITY),
            ParameterChange::new(ParamTarget::Analysis(AnalysisParam::PitchMinHz), f32::NAN),
            ParameterChange::new(ParamTarget::Master(MasterParam::LimiterThreshold), -6.0),
        ] {
            control.set_parameter(change).unwrap();
        }

        let mut out = AudioBuffer::new(2, BLOCK);
        master.process_block(&sine(0.9, 220.0, 0), &mut out, &[]);
        assert_eq!(master.stats_snapshot().rejected_params, 5);
        assert_eq!(master.save_preset("p").limiter_threshold_db, -6.0, "finite change applies");
        assert!(out.channel(0).iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_non_finite_master_gains_read_as_unity() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.prepare(&quiet_config(&ctx)).unwrap();
        let controls = master.controls();
        controls.set_input_gain_db(f32::NAN);
        controls.set_output_gain_db(f32::INFINITY);
        assert_eq!(controls.input_gain_db.get(), 0.0);
        assert_eq!(controls.output_gain_db.get(), 0.0);

        // Published directly, past the setters.
        controls.input_gain_db.publish(f32::NAN);
        controls.output_gain_db.publish(f32::NEG_INFINITY);
        controls.set_bypass(true);
        let input = sine(0.5, 440.0, 0);
        let mut out = AudioBuffer::new(2, BLOCK);
        master.process_block(&input, &mut out, &[]);
        assert_eq!(out.channel(0), input.channel(0), "non-finite gains act as 0 dB");
    }

    #[test]
    fn test_note_off_during_bypass_releases_voice() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        let config = MasterConfig {
            enable_eq: false,
            enable_analysis: false,
            cpu_threshold: 100.0,
            auto_optimization: false,
            ..MasterConfig::from_context(&ctx)
        };
        master.prepare(&config).unwrap();
        let controls = master.controls();
        let silence = AudioBuffer::new(2, BLOCK);
        let mut out = AudioBuffer::new(2, BLOCK);

        master.process_block(&silence, &mut out, &[NoteEvent::note_on(0, 60, 100)]);
        assert_eq!(master.synth().active_voice_count(), 1);

        controls.set_bypass(true);
        master.process_block(&silence, &mut out, &[NoteEvent::note_off(0, 60)]);
        master.process_block(&silence, &mut out, &[NoteEvent::note_on(0, 64, 100)]);
        controls.set_bypass(false);

        for _ in 0..40 {
            master.process_block(&silence, &mut out, &[]);
        }
        assert_eq!(master.synth().active_voice_count(), 0, "the voice was released");
        assert!(out.rms(0) < 1e-4, "output decays to silence, rms {}", out.rms(0));
        assert_eq!(
            master.stats_snapshot().dropped_events,
            1,
            "the note-on sent while bypassed is discarded"
        );

        master.apply_param(MasterParam::SynthEnabled, 1.0);
        master.process_block(&silence, &mut out, &[NoteEvent::note_on(0, 67, 100)]);
        master.apply_param(MasterParam::SynthEnabled, 0.0);
        master.process_block(&silence, &mut out, &[NoteEvent::all_notes_off(0)]);
        assert!(master
            .synth()
            .voices()
            .iter()
            .filter(|v| v.is_active())
            .all(|v| v.stage() == EnvelopeStage::Release));
    }

    #[test]
    fn test_queued_notes_are_not_counted_as_dropped() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        let (mut control, engine, _inference) = EngineChannels::with_defaults().unwrap();
        master.attach_channels(engine);
        for _ in 0..100 {
            control.send_note(NoteEvent::note_off(0, 60)).unwrap();
        }
        let external = vec![NoteEvent::note_off(0, 62); MAX_EVENTS_PER_BLOCK - 10];

        master.collect_control_traffic(&external);
        assert_eq!(master.events.len(), MAX_EVENTS_PER_BLOCK);
        assert_eq!(master.stats_snapshot().dropped_events, 0, "queued notes wait");

        master.collect_control_traffic(&[]);
        assert_eq!(master.events.len(), 90, "the rest arrive next block");

        let flood = vec![NoteEvent::note_off(0, 62); MAX_EVENTS_PER_BLOCK + 7];
        master.collect_control_traffic(&flood);
        assert_eq!(master.stats_snapshot().dropped_events, 7);
    }

    #[test]
    fn test_preset_roundtrip() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        master.insert_mut(1).unwrap().set_settings(InsertSettings::with_kind(EffectKind::Chorus));
        master.apply_param(MasterParam::SendEnabled(3), 1.0);
        master.apply_param(MasterParam::SendLevel(3), 0.25);
        master.apply_param(MasterParam::LimiterThreshold, -3.0);
        master.controls().set_output_gain_db(-2.0);

        let json = master.save_preset("Mix A").to_json().unwrap();
        let preset = MasterPreset::from_json(&json).unwrap();
        assert_eq!(preset.name, "Mix A");

        let mut other = MasterProcessor::new(&ctx).unwrap();
        other.load_preset(&preset);
        assert_eq!(other.insert(1).unwrap().settings().kind, EffectKind::Chorus);
        assert_eq!(other.send(3).unwrap().settings().send_level, 0.25);
        assert_eq!(other.save_preset("Mix A"), preset);
    }

    #[test]
    fn test_prepare_rejects_oversize_config() {
        let ctx = context();
        let mut master = MasterProcessor::new(&ctx).unwrap();
        let config = MasterConfig {
            max_block_size: BLOCK * 2,
            ..MasterConfig::from_context(&ctx)
        };
        assert!(master.prepare(&config).is_err());
        assert_eq!(master.config().max_block_size, BLOCK, "old config stays");
    }
}
