//! Median-filter harmonic/percussive split, reduced to per-frame energies.

use super::features::HpssState;

const FREQ_MEDIAN: usize = 5;

fn median3(a: f32, b: f32, c: f32) -> f32 {
    a.max(b).min(a.min(b).max(c))
}

pub struct HpssSeparator {
    prev1: Vec<f32>,
    prev2: Vec<f32>,
    state: HpssState,
}

impl HpssSeparator {
    pub fn new(num_bins: usize) -> Self {
        Self {
            prev1: vec![0.0; num_bins],
            prev2: vec![0.0; num_bins],
            state: HpssState::default(),
        }
    }

    pub fn state(&self) -> HpssState {
        self.state
    }

    pub fn reset(&mut self) {
        self.prev1.fill(0.0);
        self.prev2.fill(0.0);
        self.state = HpssState::default();
    }

    /// Harmonic energy follows a median across the last three frames per bin,
    /// percussive energy a median across neighbouring bins of this frame.
    pub fn process(&mut self, magnitude: &[f32]) -> HpssState {
        let n = magnitude.len().min(self.prev1.len());
        let half = FREQ_MEDIAN / 2;
        let mut harmonic = 0.0f32;
        let mut percussive = 0.0f32;

        for k in 0..n {
            let h = median3(self.prev2[k], self.prev1[k], magnitude[k]);
            harmonic += h * h;

            let lo = k.saturating_sub(half);
            let hi = (k + half + 1).min(n);
            let mut window = [0.0f32; FREQ_MEDIAN];
            let len = hi - lo;
            window[..len].copy_from_slice(&magnitude[lo..hi]);
            window[..len].sort_unstable_by(|a, b| a.total_cmp(b));
            let p = window[len / 2];
            percussive += p * p;
        }

        std::mem::swap(&mut self.prev2, &mut self.prev1);
        self.prev1[..n].copy_from_slice(&magnitude[..n]);

        let total = harmonic + percussive;
        self.state = HpssState {
            harmonic_energy: harmonic,
            percussive_energy: percussive,
            harmonic_ratio: if total > 1e-12 { harmonic / total } else { 0.5 },
        };
        self.state
    }
}
