//! Spectral-flux onset detection with an adaptive threshold.

use super::config::ONSET_HISTORY;
use super::features::OnsetState;
use crate::dsp::HistoryRing;

pub struct OnsetDetector {
    threshold: f32,
    peak_threshold: f32,
    refractory_frames: u32,
    frames_since_onset: u32,
    flux_history: HistoryRing<f32, ONSET_HISTORY>,
    state: OnsetState,
}

impl OnsetDetector {
    pub fn new(threshold: f32, peak_threshold: f32, refractory_frames: u32) -> Self {
        Self {
            threshold,
            peak_threshold,
            refractory_frames,
            frames_since_onset: refractory_frames + 1,
            flux_history: HistoryRing::new(),
            state: OnsetState::default(),
        }
    }

    /// Non-finite thresholds are ignored.
    pub fn set_threshold(&mut self, threshold: f32) {
        if threshold.is_finite() {
            self.threshold = threshold.max(0.0);
        }
    }

    pub fn set_peak_threshold(&mut self, peak_threshold: f32) {
        if peak_threshold.is_finite() {
            self.peak_threshold = peak_threshold.max(0.0);
        }
    }

    pub fn set_refractory_frames(&mut self, frames: u32) {
        self.refractory_frames = frames;
    }

    pub fn state(&self) -> OnsetState {
        self.state
    }

    /// Flux values seen so far, oldest first. Tempo estimation reads this.
    pub fn flux_history(&self) -> &HistoryRing<f32, ONSET_HISTORY> {
        &self.flux_history
    }

    pub fn reset(&mut self) {
        self.frames_since_onset = self.refractory_frames + 1;
        self.flux_history.clear();
        self.state = OnsetState::default();
    }

    /// Feeds one frame's spectral flux. An onset fires when the flux clears
    /// the fixed threshold plus a multiple of the recent mean, and the
    /// refractory period since the previous onset has elapsed.
    pub fn process(&mut self, flux: f32, timestamp: f64) -> OnsetState {
        let adaptive = self.threshold + self.peak_threshold * self.flux_history.mean();
        self.flux_history.push(flux);
        self.frames_since_onset = self.frames_since_onset.saturating_add(1);

        let detected = flux > adaptive && self.frames_since_onset > self.refractory_frames;
        if detected {
            self.frames_since_onset = 0;
            self.state.last_onset_time = timestamp;
            self.state.onset_count += 1;
        }
        self.state.detected = detected;
        self.state.strength = if adaptive > 0.0 {
            (flux / adaptive).max(0.0)
        } else {
            flux.max(0.0)
        };
        self.state
    }
}
