//! Tempo estimation from the autocorrelation of the onset flux history.

use super::config::{ONSET_HISTORY, TEMPO_HISTORY};
use super::features::TempoState;
use crate::dsp::HistoryRing;

const MIN_LAG: usize = 2;
const MAX_LAG: usize = ONSET_HISTORY / 2;
/// Frames of flux needed before an estimate is attempted.
const MIN_FRAMES: usize = 16;
const MAX_FOLDS: usize = 8;

pub struct TempoEstimator {
    /// Analysis frames per second (sample rate over hop size).
    frame_rate: f32,
    min_bpm: f32,
    max_bpm: f32,
    scratch: [f32; ONSET_HISTORY],
    bpm_history: HistoryRing<f32, TEMPO_HISTORY>,
    state: TempoState,
}

impl TempoEstimator {
    pub fn new(frame_rate: f32, min_bpm: f32, max_bpm: f32) -> Self {
        let mut estimator = Self {
            frame_rate,
            min_bpm,
            max_bpm,
            scratch: [0.0; ONSET_HISTORY],
            bpm_history: HistoryRing::new(),
            state: TempoState::default(),
        };
        estimator.set_range(min_bpm, max_bpm);
        estimator
    }

    pub fn set_frame_rate(&mut self, frame_rate: f32) {
        self.frame_rate = frame_rate;
    }

    /// Non-finite bounds keep their current value.
    pub fn set_range(&mut self, min_bpm: f32, max_bpm: f32) {
        let min_bpm = if min_bpm.is_finite() { min_bpm } else { self.min_bpm };
        let max_bpm = if max_bpm.is_finite() { max_bpm } else { self.max_bpm };
        self.min_bpm = min_bpm.max(1.0);
        // A range narrower than one octave cannot always hold a folded tempo.
        self.max_bpm = max_bpm.max(self.min_bpm * 2.0);
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min_bpm, self.max_bpm)
    }

    pub fn state(&self) -> TempoState {
        self.state
    }

    pub fn reset(&mut self) {
        self.bpm_history.clear();
        self.state = TempoState::default();
    }

    /// Halves or doubles until the tempo lands in range, then clamps.
    fn fold(&self, mut bpm: f32) -> f32 {
        for _ in 0..MAX_FOLDS {
            if bpm > self.max_bpm {
                bpm *= 0.5;
            } else if bpm < self.min_bpm {
                bpm *= 2.0;
            } else {
                break;
            }
        }
        bpm.clamp(self.min_bpm, self.max_bpm)
    }

    pub fn process(&mut self, flux: &HistoryRing<f32, ONSET_HISTORY>) -> TempoState {
        let n = flux.len();
        if n < MIN_FRAMES || self.frame_rate <= 0.0 {
            return self.state;
        }

        let mean = flux.mean();
        for (slot, v) in self.scratch.iter_mut().zip(flux.iter_oldest_first()) {
            *slot = v - mean;
        }
        let x = &self.scratch[..n];

        let r0: f32 = x.iter().map(|v| v * v).sum();
        if r0 <= 1e-12 {
            self.state.confidence = 0.0;
            return self.state;
        }

        let mut best = 0.0f32;
        let mut best_lag = 0;
        for lag in MIN_LAG..=MAX_LAG.min(n - 1) {
            let r: f32 = x[..n - lag].iter().zip(&x[lag..]).map(|(a, b)| a * b).sum();
            if r > best {
                best = r;
                best_lag = lag;
            }
        }
        if best_lag == 0 {
            self.state.confidence = 0.0;
            return self.state;
        }

        let bpm = self.fold(60.0 * self.frame_rate / best_lag as f32);
        self.bpm_history.push(bpm);
        let mean_bpm = self.bpm_history.mean();
        let stability = if self.bpm_history.len() > 1 && mean_bpm > 0.0 {
            (1.0 - self.bpm_history.std_dev() / mean_bpm).clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.state = TempoState {
            bpm,
            confidence: (best / r0).clamp(0.0, 1.0),
            stability,
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_train(period: usize, len: usize) -> HistoryRing<f32, ONSET_HISTORY> {
        let mut flux = HistoryRing::new();
        for i in 0..len {
            flux.push(if i % period == 0 { 1.0 } else { 0.0 });
        }
        flux
    }

    #[test]
    fn test_impulse_train_tempo() {
        // 48 kHz with a 512 hop gives 93.75 frames per second.
        let mut tempo = TempoEstimator::new(93.75, 60.0, 200.0);
        let state = tempo.process(&impulse_train(24, 64));
        // Lag 24 is 234.4 BPM, folded down an octave.
        assert!((state.bpm - 117.1875).abs() < 0.01, "bpm {}", state.bpm);
        assert!(state.confidence > 0.5, "confidence {}", state.confidence);
    }

    #[test]
    fn test_needs_history() {
        let mut tempo = TempoEstimator::new(93.75, 60.0, 200.0);
        let state = tempo.process(&impulse_train(4, 8));
        assert_eq!(state.bpm, 0.0);
        assert_eq!(state.confidence, 0.0);
    }

    #[test]
    fn test_flat_flux_has_no_confidence() {
        let mut tempo = TempoEstimator::new(93.75, 60.0, 200.0);
        let mut flux = HistoryRing::new();
        for _ in 0..64 {
            flux.push(0.5);
        }
        assert_eq!(tempo.process(&flux).confidence, 0.0);
    }

    #[test]
    fn test_fold_into_range() {
        let tempo = TempoEstimator::new(93.75, 60.0, 200.0);
        assert_eq!(tempo.fold(480.0), 120.0);
        assert_eq!(tempo.fold(30.0), 60.0);
        assert_eq!(tempo.fold(150.0), 150.0);
        assert_eq!(tempo.fold(1.0e9), 200.0, "bounded folding ends in a clamp");
    }

    #[test]
    fn test_steady_tempo_is_stable() {
        let mut tempo = TempoEstimator::new(93.75, 60.0, 200.0);
        let flux = impulse_train(24, 64);
        for _ in 0..10 {
            tempo.process(&flux);
        }
        assert!(tempo.state().stability > 0.99);
    }
}
