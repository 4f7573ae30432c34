//! Polyphonic voice engine.

pub mod envelope;
pub mod filter;
pub mod lfo;
pub mod oscillator;
pub mod synthesizer;
pub mod voice;

pub use envelope::{Envelope, EnvelopeSettings, EnvelopeStage};
pub use filter::{FilterSettings, FilterType};
pub use lfo::{LfoSettings, LfoWaveform};
pub use oscillator::{OscillatorKind, OscillatorSettings, Waveform};
pub use synthesizer::{
    SynthConfig, SynthParam, SynthPatch, SynthPreset, SynthStats, Synthesizer, MAX_VOICES,
};
pub use voice::{note_to_frequency, Voice};
