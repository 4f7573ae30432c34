//! YIN pitch tracking with an autocorrelation fallback.

use super::config::PITCH_HISTORY;
use super::features::PitchState;
use crate::dsp::HistoryRing;

const YIN_THRESHOLD: f32 = 0.15;
/// Confidence above which a frame counts as voiced.
const VOICED_CONFIDENCE: f32 = 0.5;

pub struct PitchTracker {
    sample_rate: f32,
    min_hz: f32,
    max_hz: f32,
    /// Difference function, then its cumulative-mean normalization, per lag.
    difference: Vec<f32>,
    normalized: Vec<f32>,
    history: HistoryRing<f32, PITCH_HISTORY>,
    state: PitchState,
}

impl PitchTracker {
    /// Lag buffers cover half of `frame_len`, the longest period ever searched.
    pub fn new(sample_rate: f32, frame_len: usize, min_hz: f32, max_hz: f32) -> Self {
        let max_lag = frame_len / 2;
        let mut tracker = Self {
            sample_rate,
            min_hz,
            max_hz,
            difference: vec![0.0; max_lag + 2],
            normalized: vec![0.0; max_lag + 2],
            history: HistoryRing::new(),
            state: PitchState::default(),
        };
        tracker.set_range(min_hz, max_hz);
        tracker
    }

    /// Sets the search range. Lags never exceed half the frame so the
    /// difference window stays at least half a frame long.
    /// Non-finite bounds keep their current value.
    pub fn set_range(&mut self, min_hz: f32, max_hz: f32) {
        let min_hz = if min_hz.is_finite() { min_hz } else { self.min_hz };
        let max_hz = if max_hz.is_finite() { max_hz } else { self.max_hz };
        let nyquist = 0.5 * self.sample_rate;
        let max_hz = max_hz.clamp(20.0, nyquist);
        self.min_hz = min_hz.clamp(20.0, max_hz);
        self.max_hz = max_hz;
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min_hz, self.max_hz)
    }

    pub fn state(&self) -> PitchState {
        self.state
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.state = PitchState::default();
    }

    fn lag_bounds(&self, frame_len: usize) -> (usize, usize) {
        let limit = (frame_len / 2).min(self.difference.len() - 2);
        let tau_max = ((self.sample_rate / self.min_hz).floor() as usize).min(limit);
        let tau_min = ((self.sample_rate / self.max_hz).floor() as usize).clamp(2, tau_max.max(2));
        (tau_min, tau_max)
    }

    /// Estimates the pitch of an unwindowed frame and updates the tracker.
    pub fn process(&mut self, frame: &[f32]) -> PitchState {
        let mut frequency = self.yin(frame);
        if frequency <= 0.0 {
            frequency = self.autocorrelation(frame);
        }
        let confidence = self.confidence(frame, frequency);

        self.history.push(frequency);
        let voiced = frequency > 0.0 && confidence >= VOICED_CONFIDENCE;
        let stability = if self.history.len() > 1 {
            let mean = self.history.mean();
            if mean > 0.0 {
                (1.0 - self.history.std_dev() / mean).clamp(0.0, 1.0)
            } else {
                0.0
            }
        } else {
            0.0
        };

        self.state = PitchState {
            frequency,
            confidence,
            voiced,
            stability,
        };
        self.state
    }

    /// YIN: first lag whose normalized difference dips under the threshold,
    /// walked down to its local minimum and refined by parabolic interpolation.
    fn yin(&mut self, x: &[f32]) -> f32 {
        let (tau_min, tau_max) = self.lag_bounds(x.len());
        if tau_max <= tau_min || x.len() <= tau_max {
            return 0.0;
        }
        let window = x.len() - tau_max;

        self.difference[0] = 0.0;
        for tau in 1..=tau_max {
            let mut sum = 0.0f32;
            for i in 0..window {
                let d = x[i] - x[i + tau];
                sum += d * d;
            }
            self.difference[tau] = sum;
        }

        self.normalized[0] = 1.0;
        let mut running = 0.0f32;
        for tau in 1..=tau_max {
            running += self.difference[tau];
            self.normalized[tau] = if running > 1e-12 {
                self.difference[tau] * tau as f32 / running
            } else {
                1.0
            };
        }

        let cmnd = &self.normalized;
        let Some(mut tau) = (tau_min..=tau_max).find(|&t| cmnd[t] < YIN_THRESHOLD) else {
            return 0.0;
        };
        while tau < tau_max && cmnd[tau + 1] < cmnd[tau] {
            tau += 1;
        }

        let refined = if tau > 1 && tau < tau_max {
            let (a, b, c) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
            let denom = a - 2.0 * b + c;
            if denom.abs() > 1e-12 {
                tau as f32 + 0.5 * (a - c) / denom
            } else {
                tau as f32
            }
        } else {
            tau as f32
        };
        self.sample_rate / refined
    }

    /// Lag with the largest positive autocorrelation in range.
    fn autocorrelation(&self, x: &[f32]) -> f32 {
        let (tau_min, tau_max) = self.lag_bounds(x.len());
        let mut best = 0.0f32;
        let mut best_tau = 0;
        for tau in tau_min..tau_max.min(x.len()) {
            let acc: f32 = x[..x.len() - tau].iter().zip(&x[tau..]).map(|(a, b)| a * b).sum();
            if acc > best {
                best = acc;
                best_tau = tau;
            }
        }
        if best_tau > 0 {
            self.sample_rate / best_tau as f32
        } else {
            0.0
        }
    }

    /// Normalized autocorrelation at the detected period, 0..1.
    fn confidence(&self, x: &[f32], frequency: f32) -> f32 {
        if frequency <= 0.0 || x.len() < 4 {
            return 0.0;
        }
        let tau = ((self.sample_rate / frequency).round() as usize).clamp(2, x.len() - 1);
        let (mut r, mut e) = (0.0f32, 0.0f32);
        for i in 0..x.len() - tau {
            r += x[i] * x[i + tau];
            e += x[i] * x[i];
        }
        if e > 1e-9 {
            (r / e).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.7 * (2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0).sin())
            .collect()
    }

    #[test]
    fn test_yin_within_two_percent() {
        let mut tracker = PitchTracker::new(48000.0, 2048, 80.0, 1000.0);
        for freq in [82.41, 110.0, 220.0, 440.0, 659.25, 987.77] {
            let state = tracker.process(&sine(freq, 2048));
            let error = (state.frequency - freq).abs() / freq;
            assert!(error < 0.02, "{} Hz estimated as {}", freq, state.frequency);
            assert!(state.confidence > 0.8, "{} Hz confidence {}", freq, state.confidence);
            assert!(state.voiced);
        }
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let mut tracker = PitchTracker::new(48000.0, 2048, 80.0, 1000.0);
        let state = tracker.process(&vec![0.0; 2048]);
        assert_eq!(state.frequency, 0.0);
        assert_eq!(state.confidence, 0.0);
        assert!(!state.voiced);
    }

    #[test]
    fn test_stable_pitch_history() {
        let mut tracker = PitchTracker::new(48000.0, 2048, 80.0, 1000.0);
        let frame = sine(330.0, 2048);
        for _ in 0..8 {
            tracker.process(&frame);
        }
        assert!(tracker.state().stability > 0.99);
    }

    #[test]
    fn test_range_is_clamped() {
        let mut tracker = PitchTracker::new(48000.0, 2048, 80.0, 1000.0);
        tracker.set_range(5.0, 96000.0);
        assert_eq!(tracker.range(), (20.0, 24000.0));
        let (tau_min, tau_max) = tracker.lag_bounds(2048);
        assert_eq!(tau_max, 1024, "lags stop at half the frame");
        assert_eq!(tau_min, 2);
    }
}
