//! Side-chain spectral analyzer.
//!
//! Audio is mixed to mono into an ingestion ring; every time a full window
//! is available a frame is analyzed and the read position advances by one
//! hop. Results are kept in a fixed history and read back by polling.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::config::{AnalysisConfig, FEATURE_HISTORY, MAX_PEAKS};
use super::features::{
    HpssState, MlFeatures, OnsetState, PitchState, SpectralFeatures, SpectralPeak, TempoState,
};
use super::filterbank::{spectral_contrast, tonnetz, ChromaMap, MelFilterBank};
use super::hpss::HpssSeparator;
use super::onset::OnsetDetector;
use super::pitch::PitchTracker;
use super::spectrum::Spectrum;
use super::tempo::TempoEstimator;
use crate::dsp::{AudioBuffer, Counter, HistoryRing, Published};
use crate::engine::commands::as_flag;
use crate::engine::context::EngineContext;
use crate::engine::error::EngineResult;

/// Frames analyzed per block at most. When ingestion outruns this the
/// oldest unread audio is dropped.
pub const MAX_FRAMES_PER_BLOCK: usize = 8;

/// Bins above this fraction of the frame maximum count toward complexity.
const COMPLEXITY_THRESHOLD: f32 = 0.1;
/// Peaks below this fraction of the frame maximum are ignored.
const PEAK_THRESHOLD: f32 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnalysisParam {
    Enabled,
    ReducedQuality,
    EnableMfcc,
    EnableChroma,
    EnableContrast,
    EnableTonnetz,
    EnablePitch,
    EnableOnset,
    EnableTempo,
    EnableHpss,
    OnsetThreshold,
    OnsetPeakThreshold,
    PitchMinHz,
    PitchMaxHz,
    TempoMinBpm,
    TempoMaxBpm,
}

/// Counters shared with pollers on other threads.
#[derive(Debug, Default)]
pub struct AnalysisStats {
    pub frames_processed: Counter,
    pub valid_frames: Counter,
    pub onsets: Counter,
    pub discarded_samples: Counter,
    pub avg_pitch_confidence: Published<f32>,
    /// Analysis time over the block deadline.
    pub processing_load: Published<f32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AnalysisStatsSnapshot {
    pub frames_processed: u64,
    pub valid_frames: u64,
    pub onsets: u64,
    pub discarded_samples: u64,
    pub avg_pitch_confidence: f32,
    pub processing_load: f32,
}

impl AnalysisStats {
    pub fn snapshot(&self) -> AnalysisStatsSnapshot {
        AnalysisStatsSnapshot {
            frames_processed: self.frames_processed.get(),
            valid_frames: self.valid_frames.get(),
            onsets: self.onsets.get(),
            discarded_samples: self.discarded_samples.get(),
            avg_pitch_confidence: self.avg_pitch_confidence.get(),
            processing_load: self.processing_load.get(),
        }
    }

    fn reset(&self) {
        self.frames_processed.reset();
        self.valid_frames.reset();
        self.onsets.reset();
        self.discarded_samples.reset();
        self.avg_pitch_confidence.publish(0.0);
        self.processing_load.publish(0.0);
    }
}

pub struct SpectralAnalyzer {
    config: AnalysisConfig,
    enabled: bool,
    reduced_quality: bool,

    spectrum: Spectrum,
    mel: MelFilterBank,
    chroma_map: ChromaMap,
    pitch: PitchTracker,
    onset: OnsetDetector,
    tempo: TempoEstimator,
    hpss: HpssSeparator,

    ring: Vec<f32>,
    write_pos: usize,
    available: usize,
    /// Samples ingested since the last reset.
    ingested: u64,
    frame: Vec<f32>,
    mono: Vec<f32>,

    latest: SpectralFeatures,
    history: HistoryRing<SpectralFeatures, FEATURE_HISTORY>,
    ml: MlFeatures,
    frame_number: u64,
    stats: Arc<AnalysisStats>,
}

impl SpectralAnalyzer {
    pub fn new(ctx: &EngineContext) -> EngineResult<Self> {
        let config = AnalysisConfig::from_context(ctx);
        config.validate()?;
        let mut analyzer = Self::build(config);
        analyzer.log_prepared();
        analyzer.reset();
        Ok(analyzer)
    }

    fn build(config: AnalysisConfig) -> Self {
        let fft = config.fft_size;
        let sr = config.sample_rate;
        let spectrum = Spectrum::new(fft, config.window);
        let bins = spectrum.num_bins();
        Self {
            enabled: true,
            reduced_quality: false,
            mel: MelFilterBank::new(bins, fft, sr, config.mel_min_hz, config.mel_max_hz),
            chroma_map: ChromaMap::new(bins, fft, sr),
            pitch: PitchTracker::new(sr, fft, config.pitch_min_hz, config.pitch_max_hz),
            onset: OnsetDetector::new(
                config.onset_threshold,
                config.onset_peak_threshold,
                config.onset_refractory_frames as u32,
            ),
            tempo: TempoEstimator::new(
                sr / config.hop_size as f32,
                config.tempo_min_bpm,
                config.tempo_max_bpm,
            ),
            hpss: HpssSeparator::new(bins),
            spectrum,
            ring: vec![0.0; config.ring_capacity()],
            write_pos: 0,
            available: 0,
            ingested: 0,
            frame: vec![0.0; fft],
            mono: vec![0.0; config.max_block_size],
            latest: SpectralFeatures::default(),
            history: HistoryRing::new(),
            ml: MlFeatures::default(),
            frame_number: 0,
            stats: Arc::new(AnalysisStats::default()),
            config,
        }
    }

    /// Rebuilds every buffer for `config`. Control thread only.
    pub fn prepare(&mut self, config: &AnalysisConfig) -> EngineResult<()> {
        config.validate()?;
        let stats = Arc::clone(&self.stats);
        let (enabled, reduced) = (self.enabled, self.reduced_quality);
        *self = Self::build(config.clone());
        self.stats = stats;
        self.enabled = enabled;
        self.reduced_quality = reduced;
        self.reset();
        self.log_prepared();
        Ok(())
    }

    fn log_prepared(&self) {
        log::debug!(
            "analysis prepared: fft {} hop {} {:?} at {} Hz, ring {}",
            self.config.fft_size,
            self.config.hop_size,
            self.config.window,
            self.config.sample_rate,
            self.ring.len()
        );
    }

    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.write_pos = 0;
        self.available = 0;
        self.ingested = 0;
        self.spectrum.reset();
        self.pitch.reset();
        self.onset.reset();
        self.tempo.reset();
        self.hpss.reset();
        self.latest = SpectralFeatures::default();
        self.history.clear();
        self.ml = MlFeatures::default();
        self.frame_number = 0;
        self.stats.reset();
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Ingests one block and analyzes every complete window, up to
    /// [`MAX_FRAMES_PER_BLOCK`]. Returns the number of frames analyzed.
    /// The input is never modified. Short input leaves the previous
    /// features in place.
    ///
    /// REAL-TIME SAFE.
    pub fn process_block(&mut self, input: &AudioBuffer) -> usize {
        if !self.enabled {
            return 0;
        }
        let started = Instant::now();
        let n = input.mix_to_mono(&mut self.mono);
        self.ingest(n);

        let fft = self.config.fft_size;
        let hop = self.config.hop_size;
        let ring_len = self.ring.len();
        let mut frames = 0;
        while self.available >= fft && frames < MAX_FRAMES_PER_BLOCK {
            let start = (self.write_pos + ring_len - self.available) % ring_len;
            let first = fft.min(ring_len - start);
            self.frame[..first].copy_from_slice(&self.ring[start..start + first]);
            self.frame[first..].copy_from_slice(&self.ring[..fft - first]);

            let frame_end = self.ingested - (self.available - fft) as u64;
            self.analyze_frame(frame_end as f64 / self.config.sample_rate as f64);
            self.available -= hop;
            frames += 1;
        }

        if n > 0 {
            let budget = n as f32 / self.config.sample_rate;
            let load = started.elapsed().as_secs_f32() / budget;
            let smoothed = 0.9 * self.stats.processing_load.get() + 0.1 * load;
            self.stats.processing_load.store_relaxed(smoothed);
        }
        frames
    }

    fn ingest(&mut self, n: usize) {
        let ring_len = self.ring.len();
        for &x in &self.mono[..n] {
            self.ring[self.write_pos] = x;
            self.write_pos = (self.write_pos + 1) % ring_len;
        }
        self.ingested += n as u64;
        let pending = self.available + n;
        if pending > ring_len {
            self.stats.discarded_samples.add((pending - ring_len) as u64);
            self.available = ring_len;
        } else {
            self.available = pending;
        }
    }

    fn analyze_frame(&mut self, timestamp: f64) {
        self.stats.frames_processed.increment();
        if !self.spectrum.analyze(&self.frame) {
            return;
        }

        let cfg = &self.config;
        let sr = cfg.sample_rate;
        let full = !self.reduced_quality;
        let mut f = SpectralFeatures::default();

        spectral_statistics(&self.spectrum, sr, &mut f);
        time_domain_statistics(&self.frame, &mut f);

        if cfg.enable_mfcc && full {
            self.mel.mfcc(self.spectrum.power(), &mut f.mfcc);
        }
        let want_tonnetz = cfg.enable_tonnetz && full;
        if cfg.enable_chroma || want_tonnetz {
            self.chroma_map.chroma(self.spectrum.power(), &mut f.chroma);
        }
        if cfg.enable_contrast && full {
            spectral_contrast(self.spectrum.magnitude(), &mut f.contrast);
        }
        if want_tonnetz {
            tonnetz(&f.chroma, &mut f.tonnetz);
        }
        if !cfg.enable_chroma {
            f.chroma = Default::default();
        }

        if cfg.enable_pitch {
            let pitch = self.pitch.process(&self.frame);
            f.pitch_hz = pitch.frequency;
            f.pitch_confidence = pitch.confidence;
        }
        // Tempo reads the onset detector's flux history, so it keeps running
        // when only tempo is wanted.
        if cfg.enable_onset || cfg.enable_tempo {
            let onset = self.onset.process(f.flux, timestamp);
            if cfg.enable_onset {
                f.onset_strength = onset.strength;
                f.onset_detected = onset.detected;
                if onset.detected {
                    self.stats.onsets.increment();
                }
            }
        }
        if cfg.enable_tempo {
            let tempo = self.tempo.process(self.onset.flux_history());
            f.tempo_bpm = tempo.bpm;
            f.tempo_confidence = tempo.confidence;
        }
        if cfg.enable_hpss && full {
            f.harmonic_ratio = self.hpss.process(self.spectrum.magnitude()).harmonic_ratio;
        }

        self.frame_number += 1;
        f.frame_number = self.frame_number;
        f.timestamp = timestamp;
        f.is_valid = true;

        self.latest = f;
        self.history.push(f);
        self.ml = MlFeatures::from_features(&f);

        self.stats.valid_frames.increment();
        let valid = self.stats.valid_frames.get().max(1) as f32;
        let avg = self.stats.avg_pitch_confidence.get();
        self.stats
            .avg_pitch_confidence
            .store_relaxed(avg + (f.pitch_confidence - avg) / valid);
    }

    // Polling accessors.

    pub fn latest_features(&self) -> SpectralFeatures {
        self.latest
    }

    /// Frame `age` hops back, 0 being the latest.
    pub fn features_at_age(&self, age: usize) -> Option<SpectralFeatures> {
        self.history.get(age).copied()
    }

    /// Stored frame whose timestamp is closest to `seconds`.
    pub fn features_at_time(&self, seconds: f64) -> Option<SpectralFeatures> {
        nearest_in_time(self.history.iter_newest_first(), seconds)
    }

    pub fn history(&self) -> &HistoryRing<SpectralFeatures, FEATURE_HISTORY> {
        &self.history
    }

    pub fn magnitude_spectrum(&self) -> &[f32] {
        self.spectrum.magnitude()
    }

    pub fn phase_spectrum(&self) -> &[f32] {
        self.spectrum.phase()
    }

    pub fn power_spectrum(&self) -> &[f32] {
        self.spectrum.power()
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        self.spectrum.bin_frequency(bin as f32, self.config.sample_rate)
    }

    pub fn pitch_state(&self) -> PitchState {
        self.pitch.state()
    }

    pub fn onset_state(&self) -> OnsetState {
        self.onset.state()
    }

    pub fn tempo_state(&self) -> TempoState {
        self.tempo.state()
    }

    pub fn hpss_state(&self) -> HpssState {
        self.hpss.state()
    }

    pub fn ml_features(&self) -> MlFeatures {
        self.ml
    }

    /// Shared handle for pollers on other threads.
    pub fn stats(&self) -> Arc<AnalysisStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats_snapshot(&self) -> AnalysisStatsSnapshot {
        self.stats.snapshot()
    }

    /// Samples buffered but not yet consumed by a hop.
    pub fn pending_samples(&self) -> usize {
        self.available
    }

    // Runtime setters.

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Skips MFCC, contrast, tonnetz and HPSS while set.
    pub fn set_reduced_quality(&mut self, reduced: bool) {
        self.reduced_quality = reduced;
    }

    pub fn is_reduced_quality(&self) -> bool {
        self.reduced_quality
    }

    pub fn set_onset_threshold(&mut self, threshold: f32) {
        if threshold.is_finite() {
            self.config.onset_threshold = threshold.max(0.0);
            self.onset.set_threshold(threshold);
        }
    }

    pub fn set_pitch_range(&mut self, min_hz: f32, max_hz: f32) {
        self.pitch.set_range(min_hz, max_hz);
        let (lo, hi) = self.pitch.range();
        self.config.pitch_min_hz = lo;
        self.config.pitch_max_hz = hi;
    }

    pub fn set_tempo_range(&mut self, min_bpm: f32, max_bpm: f32) {
        self.tempo.set_range(min_bpm, max_bpm);
        let (lo, hi) = self.tempo.range();
        self.config.tempo_min_bpm = lo;
        self.config.tempo_max_bpm = hi;
    }

    /// Applies one parameter change. Non-finite values are ignored.
    pub fn apply_param(&mut self, param: AnalysisParam, value: f32) {
        if !value.is_finite() {
            return;
        }
        let cfg = &mut self.config;
        match param {
            AnalysisParam::Enabled => self.enabled = as_flag(value),
            AnalysisParam::ReducedQuality => self.reduced_quality = as_flag(value),
            AnalysisParam::EnableMfcc => cfg.enable_mfcc = as_flag(value),
            AnalysisParam::EnableChroma => cfg.enable_chroma = as_flag(value),
            AnalysisParam::EnableContrast => cfg.enable_contrast = as_flag(value),
            AnalysisParam::EnableTonnetz => cfg.enable_tonnetz = as_flag(value),
            AnalysisParam::EnablePitch => cfg.enable_pitch = as_flag(value),
            AnalysisParam::EnableOnset => cfg.enable_onset = as_flag(value),
            AnalysisParam::EnableTempo => cfg.enable_tempo = as_flag(value),
            AnalysisParam::EnableHpss => cfg.enable_hpss = as_flag(value),
            AnalysisParam::OnsetThreshold => self.set_onset_threshold(value),
            AnalysisParam::OnsetPeakThreshold => {
                cfg.onset_peak_threshold = value.max(0.0);
                self.onset.set_peak_threshold(value);
            }
            AnalysisParam::PitchMinHz => {
                let max = cfg.pitch_max_hz;
                self.set_pitch_range(value, max);
            }
            AnalysisParam::PitchMaxHz => {
                let min = cfg.pitch_min_hz;
                self.set_pitch_range(min, value);
            }
            AnalysisParam::TempoMinBpm => {
                let max = cfg.tempo_max_bpm;
                self.set_tempo_range(value, max);
            }
            AnalysisParam::TempoMaxBpm => {
                let min = cfg.tempo_min_bpm;
                self.set_tempo_range(min, value);
            }
        }
    }
}

pub(crate) fn nearest_in_time<'a>(
    frames: impl Iterator<Item = &'a SpectralFeatures>,
    seconds: f64,
) -> Option<SpectralFeatures> {
    frames
        .filter(|f| f.is_valid)
        .min_by(|a, b| {
            (a.timestamp - seconds)
                .abs()
                .total_cmp(&(b.timestamp - seconds).abs())
        })
        .copied()
}

/// Moments, flatness, rolloff, slope, flux, complexity and peaks.
fn spectral_statistics(spectrum: &Spectrum, sample_rate: f32, f: &mut SpectralFeatures) {
    let mag = spectrum.magnitude();
    let power = spectrum.power();
    let prev = spectrum.previous_magnitude();
    let n = mag.len();
    if n == 0 {
        return;
    }
    let bin_hz = sample_rate / spectrum.fft_size() as f32;
    let freq = |k: usize| k as f32 * bin_hz;

    f.flux = mag
        .iter()
        .zip(prev)
        .map(|(m, p)| (m - p).max(0.0))
        .sum();

    let total: f32 = mag.iter().sum();
    let max = mag.iter().fold(0.0f32, |m, &v| m.max(v));
    if total <= 1e-9 {
        return;
    }

    f.centroid = mag.iter().enumerate().map(|(k, m)| freq(k) * m).sum::<f32>() / total;
    let (mut m2, mut m3, mut m4) = (0.0f32, 0.0f32, 0.0f32);
    for (k, &m) in mag.iter().enumerate() {
        let d = freq(k) - f.centroid;
        let d2 = d * d;
        m2 += d2 * m;
        m3 += d2 * d * m;
        m4 += d2 * d2 * m;
    }
    f.spread = (m2 / total).sqrt();
    if f.spread > 1e-6 {
        let s = f.spread;
        f.skewness = m3 / total / (s * s * s);
        f.kurtosis = m4 / total / (s * s * s * s);
    }

    let power_total: f32 = power.iter().sum();
    let log_mean = power.iter().map(|p| (p + 1e-12).ln()).sum::<f32>() / n as f32;
    let arith_mean = power_total / n as f32;
    f.flatness = if arith_mean > 0.0 {
        (log_mean.exp() / arith_mean).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut cumulative = 0.0f32;
    let mut r85 = None;
    let mut r95 = None;
    for (k, p) in power.iter().enumerate() {
        cumulative += p;
        if r85.is_none() && cumulative >= 0.85 * power_total {
            r85 = Some(k);
        }
        if cumulative >= 0.95 * power_total {
            r95 = Some(k);
            break;
        }
    }
    f.rolloff_85 = freq(r85.unwrap_or(n - 1));
    f.rolloff_95 = freq(r95.unwrap_or(n - 1));

    // Least-squares slope of magnitude against frequency in Hz.
    let mean_f = freq(n - 1) * 0.5;
    let mean_m = total / n as f32;
    let (mut num, mut den) = (0.0f32, 0.0f32);
    for (k, &m) in mag.iter().enumerate() {
        let df = freq(k) - mean_f;
        num += df * (m - mean_m);
        den += df * df;
    }
    f.slope = if den > 0.0 { num / den } else { 0.0 };

    f.complexity = mag.iter().filter(|&&m| m > COMPLEXITY_THRESHOLD * max).count() as f32;

    find_peaks(mag, bin_hz, PEAK_THRESHOLD * max, f);
}

/// Keeps the strongest local maxima, sorted by frequency.
fn find_peaks(mag: &[f32], bin_hz: f32, floor: f32, f: &mut SpectralFeatures) {
    let n = mag.len();
    let mut count = 0;
    for k in 1..n.saturating_sub(1) {
        let (a, b, c) = (mag[k - 1], mag[k], mag[k + 1]);
        if !(b > a && b >= c && b > floor) {
            continue;
        }
        let denom = a - 2.0 * b + c;
        let delta = if denom.abs() > 1e-12 {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        let half = 0.5 * b;
        let mut lo = k;
        while lo > 0 && mag[lo - 1] > half {
            lo -= 1;
        }
        let mut hi = k;
        while hi + 1 < n && mag[hi + 1] > half {
            hi += 1;
        }
        let peak = SpectralPeak {
            frequency: (k as f32 + delta) * bin_hz,
            magnitude: b - 0.25 * (a - c) * delta,
            bin: k as u32,
            bandwidth: (hi - lo + 1) as f32 * bin_hz,
        };

        if count < MAX_PEAKS {
            f.peaks[count] = peak;
            count += 1;
        } else if let Some(weakest) = (0..MAX_PEAKS)
            .min_by(|&i, &j| f.peaks[i].magnitude.total_cmp(&f.peaks[j].magnitude))
        {
            if f.peaks[weakest].magnitude < peak.magnitude {
                f.peaks[weakest] = peak;
            }
        }
    }
    f.peaks[..count].sort_unstable_by(|a, b| a.frequency.total_cmp(&b.frequency));
    f.num_peaks = count;
}

fn time_domain_statistics(frame: &[f32], f: &mut SpectralFeatures) {
    let n = frame.len();
    if n < 2 {
        return;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    f.zero_crossing_rate = crossings as f32 / (n - 1) as f32;
    f.energy = frame.iter().map(|x| x * x).sum();
    f.rms = (f.energy / n as f32).sqrt();
    let peak = frame.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    f.crest_factor = if f.rms > 1e-9 { peak / f.rms } else { 0.0 };
}
