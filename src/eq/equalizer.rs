//! Five-band analog-modeled equalizer.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::analog::{AnalogModel, AnalogProcessor, AnalogSettings};
use super::band::{BandSettings, BandType, EqBand, FilterSlope};
use super::preset::EqPreset;
use super::NUM_BANDS;
use crate::dsp::biquad::{DEFAULT_FREQUENCY, DEFAULT_Q};
use crate::dsp::{
    clamp_finite, db_to_linear, linear_to_db, AudioBuffer, HalfbandOversampler, SaturationTables,
};
use crate::engine::commands::{as_flag, as_index};
use crate::engine::config::MAX_CHANNELS;
use crate::engine::context::EngineContext;
use crate::engine::error::{validate_stream_format, EngineError, EngineResult};

/// Samples of the output block used for the THD estimate.
const THD_WINDOW: usize = 512;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqConfig {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub num_channels: usize,
    pub analog_model: AnalogModel,
    /// Run bands and the analog stage at twice the sample rate.
    pub oversampling: bool,
    /// Compute the THD estimate after every block.
    pub analysis: bool,
}

impl Default for EqConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 1024,
            num_channels: 2,
            analog_model: AnalogModel::Clean,
            oversampling: false,
            analysis: true,
        }
    }
}

impl EqConfig {
    pub fn from_context(ctx: &EngineContext) -> Self {
        Self {
            sample_rate: ctx.sample_rate(),
            max_block_size: ctx.max_block_size(),
            num_channels: ctx.num_channels(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_stream_format(self.sample_rate, self.max_block_size)?;
        if self.num_channels == 0 || self.num_channels > MAX_CHANNELS {
            return Err(EngineError::InvalidChannelCount(self.num_channels));
        }
        Ok(())
    }
}

/// Addressable equalizer parameters. Band parameters carry the band index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EqParam {
    BandEnabled(u8),
    BandType(u8),
    BandSlope(u8),
    BandFrequency(u8),
    BandGain(u8),
    BandQ(u8),
    BandDrive(u8),
    BandSaturation(u8),
    BandMix(u8),
    BandSolo(u8),
    BandBypass(u8),
    InputGain,
    OutputGain,
    AnalogModel,
    TransformerDrive,
    TubeWarmth,
    TapeSaturation,
    AnalogNoise,
    Bypass,
    BypassAllBands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EqStats {
    pub input_peak: [f32; 2],
    pub output_peak: [f32; 2],
    pub processed_samples: u64,
    /// Harmonic estimate of the analog stage, 0..1.
    pub analog_thd: f32,
    pub block_time_ms: f32,
}

pub struct AnalogEq {
    bands: [EqBand; NUM_BANDS],
    analog: AnalogSettings,
    analog_processor: AnalogProcessor,
    tables: SaturationTables,
    bypassed: bool,
    sample_rate: f32,
    max_block_size: usize,
    num_channels: usize,
    analysis: bool,
    /// Present when running at 2x; one per channel.
    oversamplers: Vec<HalfbandOversampler>,
    work: AudioBuffer,
    band_buffer: AudioBuffer,
    stats: EqStats,
}

impl AnalogEq {
    pub fn new(ctx: &EngineContext) -> EngineResult<Self> {
        let mut eq = Self {
            bands: std::array::from_fn(|_| EqBand::new(0)),
            analog: AnalogSettings::default(),
            analog_processor: AnalogProcessor::new(ctx.sample_rate(), 0),
            tables: SaturationTables::new(),
            bypassed: false,
            sample_rate: ctx.sample_rate(),
            max_block_size: 0,
            num_channels: 0,
            analysis: true,
            oversamplers: Vec::new(),
            work: AudioBuffer::new(0, 0),
            band_buffer: AudioBuffer::new(0, 0),
            stats: EqStats::default(),
        };
        eq.prepare(&EqConfig::from_context(ctx))?;
        Ok(eq)
    }

    /// Allocates per-channel state and work buffers. Band settings survive.
    pub fn prepare(&mut self, config: &EqConfig) -> EngineResult<()> {
        config.validate()?;
        self.sample_rate = config.sample_rate;
        self.max_block_size = config.max_block_size;
        self.num_channels = config.num_channels;
        self.analysis = config.analysis;

        let factor = if config.oversampling { 2 } else { 1 };
        let work_len = config.max_block_size * factor;
        self.work = AudioBuffer::new(config.num_channels, work_len);
        self.band_buffer = AudioBuffer::new(config.num_channels, work_len);
        self.oversamplers = if config.oversampling {
            vec![HalfbandOversampler::new(); config.num_channels]
        } else {
            Vec::new()
        };

        for band in self.bands.iter_mut() {
            let settings = band.settings;
            *band = EqBand::new(config.num_channels);
            band.settings = settings;
        }
        self.analog_processor = AnalogProcessor::new(self.processing_rate(), config.num_channels);
        self.set_analog_model(config.analog_model);
        self.update_all_coefficients();
        self.stats = EqStats::default();

        log::debug!(
            "eq prepared: {} ch at {} Hz, oversampling {}",
            self.num_channels,
            self.sample_rate,
            config.oversampling
        );
        Ok(())
    }

    pub fn reset(&mut self) {
        for band in self.bands.iter_mut() {
            band.reset();
        }
        self.analog_processor.reset();
        for os in self.oversamplers.iter_mut() {
            os.reset();
        }
        self.stats = EqStats::default();
    }

    fn is_oversampling(&self) -> bool {
        !self.oversamplers.is_empty()
    }

    /// Rate the bands and analog stage run at.
    fn processing_rate(&self) -> f32 {
        if self.is_oversampling() {
            2.0 * self.sample_rate
        } else {
            self.sample_rate
        }
    }

    /// Extra latency introduced by the oversampling filters, in samples.
    pub fn latency(&self) -> usize {
        if self.is_oversampling() {
            crate::dsp::oversampling::LATENCY
        } else {
            0
        }
    }

    fn update_all_coefficients(&mut self) {
        let rate = self.processing_rate();
        for band in self.bands.iter_mut() {
            band.update_coefficients(rate);
        }
    }

    /// Processes `buffer` in place.
    ///
    /// REAL-TIME SAFE.
    pub fn process_block(&mut self, buffer: &mut AudioBuffer) {
        let started = Instant::now();
        let n = buffer.len().min(self.max_block_size);
        let channels = buffer.num_channels().min(self.num_channels);

        for ch in 0..channels.min(2) {
            self.stats.input_peak[ch] = crate::dsp::peak(&buffer.channel(ch)[..n]);
        }

        if !self.bypassed && n > 0 {
            self.process_chain(buffer, n, channels);
        }

        for ch in 0..channels.min(2) {
            self.stats.output_peak[ch] = crate::dsp::peak(&buffer.channel(ch)[..n]);
        }
        self.stats.processed_samples += n as u64;
        if self.analysis && channels > 0 {
            self.stats.analog_thd = harmonic_estimate(&buffer.channel(0)[..n.min(THD_WINDOW)]);
        }
        self.stats.block_time_ms = started.elapsed().as_secs_f32() * 1000.0;
    }

    fn process_chain(&mut self, buffer: &mut AudioBuffer, n: usize, channels: usize) {
        let in_gain = db_to_linear(clamp_finite(self.analog.input_gain_db, -24.0, 24.0, 0.0));
        let out_gain = db_to_linear(clamp_finite(self.analog.output_gain_db, -24.0, 24.0, 0.0));

        // Stage the block into the work buffer, upsampled when enabled.
        let work_len = if self.is_oversampling() { 2 * n } else { n };
        self.work.set_len(work_len);
        self.band_buffer.set_len(work_len);
        for ch in 0..channels {
            let input = &buffer.channel(ch)[..n];
            let work = self.work.channel_mut(ch);
            if let Some(os) = self.oversamplers.get_mut(ch) {
                os.upsample(input, work);
            } else {
                work.copy_from_slice(input);
            }
            if in_gain != 1.0 {
                work.iter_mut().for_each(|s| *s *= in_gain);
            }
        }

        let rate = self.processing_rate();
        let any_solo = self.bands.iter().any(|b| b.settings.solo);
        for band in self.bands.iter_mut() {
            if !band.settings.is_audible(any_solo) {
                continue;
            }
            band.update_coefficients(rate);
            self.band_buffer.copy_from(&self.work);
            band.process(&mut self.band_buffer, &self.tables);

            let mix = band.settings.clamped_mix();
            for ch in 0..channels {
                let wet = self.band_buffer.channel(ch);
                for (w, b) in self.work.channel_mut(ch).iter_mut().zip(wet) {
                    *w += mix * (b - *w);
                }
            }
        }

        if self.analog.model != AnalogModel::Clean {
            self.analog_processor
                .process(&mut self.work, &self.analog, &self.tables);
        }

        for ch in 0..channels {
            let work = self.work.channel(ch);
            let out = &mut buffer.channel_mut(ch)[..n];
            if let Some(os) = self.oversamplers.get_mut(ch) {
                os.downsample(work, out);
            } else {
                out.copy_from_slice(work);
            }
            if out_gain != 1.0 {
                out.iter_mut().for_each(|s| *s *= out_gain);
            }
        }
    }

    pub fn stats(&self) -> EqStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = EqStats::default();
    }

    pub fn band(&self, index: usize) -> Option<&BandSettings> {
        self.bands.get(index).map(|b| &b.settings)
    }

    /// Replaces one band's settings. Out-of-range indices are ignored.
    pub fn set_band(&mut self, index: usize, settings: BandSettings) {
        let rate = self.processing_rate();
        if let Some(band) = self.bands.get_mut(index) {
            band.settings = settings;
            band.update_coefficients(rate);
        }
    }

    fn with_band(&mut self, index: usize, f: impl FnOnce(&mut BandSettings)) {
        let rate = self.processing_rate();
        if let Some(band) = self.bands.get_mut(index) {
            f(&mut band.settings);
            band.update_coefficients(rate);
        }
    }

    pub fn set_band_frequency(&mut self, index: usize, hz: f32) {
        let hz = if hz.is_finite() { hz } else { DEFAULT_FREQUENCY };
        self.with_band(index, |b| b.frequency = hz);
    }

    pub fn set_band_gain(&mut self, index: usize, db: f32) {
        let max = BandSettings::MAX_GAIN_DB;
        self.with_band(index, |b| b.gain_db = clamp_finite(db, -max, max, 0.0));
    }

    pub fn set_band_q(&mut self, index: usize, q: f32) {
        let q = if q.is_finite() { q } else { DEFAULT_Q };
        self.with_band(index, |b| b.q = q);
    }

    pub fn set_band_type(&mut self, index: usize, band_type: BandType) {
        self.with_band(index, |b| b.band_type = band_type);
    }

    pub fn set_band_slope(&mut self, index: usize, slope: FilterSlope) {
        self.with_band(index, |b| b.slope = slope);
    }

    pub fn set_band_mix(&mut self, index: usize, mix: f32) {
        self.with_band(index, |b| b.mix = clamp_finite(mix, 0.0, 1.0, 1.0));
    }

    pub fn solo_band(&mut self, index: usize, solo: bool) {
        self.with_band(index, |b| b.solo = solo);
    }

    pub fn bypass_band(&mut self, index: usize, bypassed: bool) {
        self.with_band(index, |b| b.bypassed = bypassed);
    }

    pub fn bypass_all(&mut self, bypassed: bool) {
        for band in self.bands.iter_mut() {
            band.settings.bypassed = bypassed;
        }
    }

    /// Global bypass: the whole chain, gains included, is skipped.
    pub fn set_bypass(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn analog(&self) -> &AnalogSettings {
        &self.analog
    }

    pub fn set_analog_model(&mut self, model: AnalogModel) {
        self.analog.set_model(model);
    }

    /// Selects a vintage model by short name ("Neve", "SSL", "API",
    /// "Pultec", "Fairchild", "Tube").
    pub fn load_vintage_preset(&mut self, name: &str) -> EngineResult<()> {
        let model =
            AnalogModel::from_name(name).ok_or_else(|| EngineError::UnknownPreset(name.to_string()))?;
        self.set_analog_model(model);
        log::info!("eq vintage model: {:?}", model);
        Ok(())
    }

    pub fn save_preset(&self, name: &str) -> EqPreset {
        EqPreset {
            name: name.to_string(),
            bands: std::array::from_fn(|i| self.bands[i].settings),
            analog: self.analog,
        }
    }

    pub fn load_preset(&mut self, preset: &EqPreset) {
        for (band, settings) in self.bands.iter_mut().zip(preset.bands.iter()) {
            band.settings = *settings;
        }
        self.analog = preset.analog;
        self.update_all_coefficients();
        log::info!("eq preset loaded: {}", preset.name);
    }

    /// Cascade response of one band in dB, ignoring its enable state.
    pub fn band_response_db(&self, index: usize, freq: f32) -> f32 {
        self.bands.get(index).map_or(0.0, |band| {
            linear_to_db(band.response_at(freq, self.processing_rate()))
        })
    }

    /// Magnitude response of the audible bands in dB, each blended by its mix.
    pub fn response_db(&self, freq: f32) -> f32 {
        let any_solo = self.bands.iter().any(|b| b.settings.solo);
        let rate = self.processing_rate();
        self.bands
            .iter()
            .filter(|b| b.settings.is_audible(any_solo))
            .map(|b| {
                let mix = b.settings.clamped_mix();
                linear_to_db((1.0 - mix) + mix * b.response_at(freq, rate))
            })
            .sum()
    }

    /// Applies one parameter change from the parameter queue.
    pub fn apply_param(&mut self, param: EqParam, value: f32) {
        match param {
            EqParam::BandEnabled(i) => self.with_band(i as usize, |b| b.enabled = as_flag(value)),
            EqParam::BandType(i) => {
                if let Some(t) = BandType::from_index(as_index(value)) {
                    self.set_band_type(i as usize, t);
                }
            }
            EqParam::BandSlope(i) => {
                if let Some(s) = FilterSlope::from_index(as_index(value)) {
                    self.set_band_slope(i as usize, s);
                }
            }
            EqParam::BandFrequency(i) => self.set_band_frequency(i as usize, value),
            EqParam::BandGain(i) => self.set_band_gain(i as usize, value),
            EqParam::BandQ(i) => self.set_band_q(i as usize, value),
            EqParam::BandDrive(i) => {
                self.with_band(i as usize, |b| b.drive = clamp_finite(value, 0.1, 10.0, 1.0))
            }
            EqParam::BandSaturation(i) => {
                self.with_band(i as usize, |b| b.saturation = clamp_finite(value, 0.0, 1.0, 0.0))
            }
            EqParam::BandMix(i) => self.set_band_mix(i as usize, value),
            EqParam::BandSolo(i) => self.solo_band(i as usize, as_flag(value)),
            EqParam::BandBypass(i) => self.bypass_band(i as usize, as_flag(value)),
            EqParam::InputGain => self.analog.input_gain_db = clamp_finite(value, -24.0, 24.0, 0.0),
            EqParam::OutputGain => self.analog.output_gain_db = clamp_finite(value, -24.0, 24.0, 0.0),
            EqParam::AnalogModel => {
                if let Some(model) = AnalogModel::from_index(as_index(value)) {
                    self.set_analog_model(model);
                }
            }
            EqParam::TransformerDrive => {
                self.analog.transformer_drive = clamp_finite(value, 0.1, 10.0, 1.0)
            }
            EqParam::TubeWarmth => self.analog.tube_warmth = clamp_finite(value, 0.0, 1.0, 0.0),
            EqParam::TapeSaturation => {
                self.analog.tape_saturation = clamp_finite(value, 0.0, 1.0, 0.0)
            }
            EqParam::AnalogNoise => self.analog.analog_noise = clamp_finite(value, 0.0, 1.0, 0.0),
            EqParam::Bypass => self.set_bypass(as_flag(value)),
            EqParam::BypassAllBands => self.bypass_all(as_flag(value)),
        }
    }
}

/// How far `tanh(3x)` falls short of the linear `3x` over the block, as an
/// energy fraction in 0..1. Near zero for quiet signals.
fn harmonic_estimate(samples: &[f32]) -> f32 {
    let (mut energy, mut driven) = (0.0f32, 0.0f32);
    for &v in samples {
        energy += 9.0 * v * v;
        let w = (3.0 * v).tanh();
        driven += w * w;
    }
    if energy > 1e-9 {
        (1.0 - (driven / energy).sqrt()).clamp(0.0, 1.0)
    } else {
        0.0
    }
}
