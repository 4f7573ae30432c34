//! Insert and send effects.
//!
//! Every slot owns an [`EffectRack`] holding one preallocated instance of
//! each effect kind, so changing a slot's kind on the audio thread is a
//! field write, never an allocation.

mod chorus;
mod compressor;
mod delay;
mod distortion;
mod gate;
mod reverb;

use serde::{Deserialize, Serialize};

pub use chorus::Chorus;
pub use compressor::Compressor;
pub use delay::Delay;
pub use distortion::{Distortion, DistortionType};
pub use gate::Gate;
pub use reverb::Reverb;

use crate::dsp::{clamp_finite, AudioBuffer};

/// Generic parameters carried by every slot. Their meaning depends on the
/// effect kind; unused entries are ignored.
pub const NUM_EFFECT_PARAMS: usize = 8;

pub type EffectParams = [f32; NUM_EFFECT_PARAMS];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    #[default]
    None,
    Compressor,
    Gate,
    Distortion,
    Chorus,
    Delay,
    Reverb,
}

impl EffectKind {
    pub fn from_index(index: usize) -> Option<Self> {
        Some(match index {
            0 => EffectKind::None,
            1 => EffectKind::Compressor,
            2 => EffectKind::Gate,
            3 => EffectKind::Distortion,
            4 => EffectKind::Chorus,
            5 => EffectKind::Delay,
            6 => EffectKind::Reverb,
            _ => return None,
        })
    }

    /// Parameter defaults for a freshly selected kind.
    pub fn default_params(self) -> EffectParams {
        let mut p = [0.0; NUM_EFFECT_PARAMS];
        let defaults: &[f32] = match self {
            EffectKind::None => &[],
            EffectKind::Compressor => &Compressor::DEFAULTS,
            EffectKind::Gate => &Gate::DEFAULTS,
            EffectKind::Distortion => &Distortion::DEFAULTS,
            EffectKind::Chorus => &Chorus::DEFAULTS,
            EffectKind::Delay => &Delay::DEFAULTS,
            EffectKind::Reverb => &Reverb::DEFAULTS,
        };
        p[..defaults.len()].copy_from_slice(defaults);
        p
    }
}

/// What happened to one effect pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectOutcome {
    Processed,
    /// Kind `None`; the buffer is untouched.
    Passthrough,
    /// No scratch memory for the dry copy; the buffer is untouched.
    Skipped,
}

pub struct EffectRack {
    compressor: Compressor,
    gate: Gate,
    distortion: Distortion,
    chorus: Chorus,
    delay: Delay,
    reverb: Reverb,
}

impl EffectRack {
    pub fn new(sample_rate: f32, num_channels: usize) -> Self {
        Self {
            compressor: Compressor::new(sample_rate),
            gate: Gate::new(sample_rate),
            distortion: Distortion::new(sample_rate, num_channels),
            chorus: Chorus::new(sample_rate, num_channels),
            delay: Delay::new(sample_rate, num_channels),
            reverb: Reverb::new(sample_rate, num_channels),
        }
    }

    pub fn reset(&mut self) {
        self.compressor.reset();
        self.gate.reset();
        self.distortion.reset();
        self.chorus.reset();
        self.delay.reset();
        self.reverb.reset();
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Runs `kind` over `buffer` in place. Sample-wise effects blend dry and
    /// wet as they go. The reverb renders wet-only and, below full mix, needs
    /// `scratch` (at least channels × frames samples) to keep the dry signal;
    /// without it the pass is skipped.
    ///
    /// REAL-TIME SAFE.
    pub fn process(
        &mut self,
        kind: EffectKind,
        buffer: &mut AudioBuffer,
        params: &EffectParams,
        mix: f32,
        scratch: Option<&mut [f32]>,
    ) -> EffectOutcome {
        let mix = clamp_finite(mix, 0.0, 1.0, 1.0);
        match kind {
            EffectKind::None => return EffectOutcome::Passthrough,
            EffectKind::Compressor => self.compressor.process(buffer, params, mix),
            EffectKind::Gate => self.gate.process(buffer, params, mix),
            EffectKind::Distortion => self.distortion.process(buffer, params, mix),
            EffectKind::Chorus => self.chorus.process(buffer, params, mix),
            EffectKind::Delay => self.delay.process(buffer, params, mix),
            EffectKind::Reverb => {
                if mix >= 1.0 {
                    self.reverb.process(buffer, params);
                    return EffectOutcome::Processed;
                }
                let frames = buffer.len();
                let channels = buffer.num_channels();
                let dry = match scratch {
                    Some(s) if s.len() >= frames * channels => s,
                    _ => return EffectOutcome::Skipped,
                };
                for ch in 0..channels {
                    dry[ch * frames..(ch + 1) * frames].copy_from_slice(buffer.channel(ch));
                }
                self.reverb.process(buffer, params);
                for ch in 0..channels {
                    let d = &dry[ch * frames..(ch + 1) * frames];
                    for (w, &x) in buffer.channel_mut(ch).iter_mut().zip(d) {
                        *w = x + mix * (*w - x);
                    }
                }
            }
        }
        EffectOutcome::Processed
    }
}

/// `exp(-1 / (ms * fs))`, the pole of a one-pole follower.
#[inline]
pub(crate) fn time_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = ms * 0.001 * sample_rate;
    if samples <= 1.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

/// Linear-interpolated read `delay` samples behind `write_pos`.
#[inline]
pub(crate) fn read_interpolated(line: &[f32], write_pos: usize, delay: f32) -> f32 {
    let len = line.len();
    let whole = delay as usize;
    let frac = delay - whole as f32;
    let a = (write_pos + len - whole % len) % len;
    let b = (a + len - 1) % len;
    line[a] + frac * (line[b] - line[a])
}
