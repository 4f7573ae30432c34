//! Multiband analog-modeled equalizer.

pub mod analog;
pub mod band;
pub mod equalizer;
pub mod preset;

/// Number of bands in the equalizer.
pub const NUM_BANDS: usize = 5;

pub use analog::{AnalogModel, AnalogSettings};
pub use band::{BandSettings, BandType, FilterSlope};
pub use equalizer::{AnalogEq, EqConfig, EqParam, EqStats};
pub use preset::EqPreset;
