//! FFT-based feature extraction running as a side chain of the master bus.

pub mod analyzer;
pub mod config;
pub mod features;
pub mod filterbank;
pub mod hpss;
pub mod monitor;
pub mod onset;
pub mod pitch;
pub mod spectrum;
pub mod tempo;

pub use analyzer::{AnalysisParam, AnalysisStats, AnalysisStatsSnapshot, SpectralAnalyzer};
pub use config::{AnalysisConfig, WindowType};
pub use features::{
    HpssState, MlFeatures, OnsetState, PitchState, SpectralFeatures, SpectralPeak, TempoState,
};
pub use monitor::FeatureMonitor;
