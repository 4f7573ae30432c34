//! DSP building blocks shared by every processor.

pub mod biquad;
pub mod buffer;
pub mod context;
pub mod oversampling;
pub mod published;
pub mod ring;
pub mod saturation;
pub mod smoothed_value;

pub use biquad::{BiquadCoeffs, BiquadState};
pub use buffer::{clamp_finite, db_to_linear, linear_to_db, peak, rms, AudioBuffer};
pub use context::{PlayState, ProcessContext, TransportState};
pub use oversampling::HalfbandOversampler;
pub use published::{AtomicBits, Counter, Published};
pub use ring::HistoryRing;
pub use saturation::{SaturationCurve, SaturationTables};
pub use smoothed_value::SmoothedGain;
