//! Studio Core
//!
//! Real-time audio core: a polyphonic synthesizer, an analog-modeled
//! equalizer and a spectral analyzer, run by a master bus with inserts,
//! sends, a look-ahead limiter and overload protection.

pub mod analysis;
pub mod dsp;
pub mod engine;
pub mod eq;
pub mod master;
pub mod synth;
