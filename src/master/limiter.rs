//! Look-ahead peak limiter.
//!
//! Input is delayed by the look-ahead window while a sliding minimum over
//! the per-sample target gains tells the envelope what is coming. The gain
//! ramps down across the window and releases exponentially. A final clamp
//! at the threshold makes the ceiling hard.

use crate::dsp::{db_to_linear, linear_to_db, AudioBuffer};

/// Fixed-capacity monotonic deque of `(sample_index, target_gain)`, values
/// ascending from front to back.
struct MinWindow {
    slots: Vec<(u64, f32)>,
    head: usize,
    len: usize,
}

impl MinWindow {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![(0, 1.0); capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    #[inline]
    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.slots.len()
    }

    /// Pushes the value for `index` and drops entries older than `window`.
    /// Returns the window minimum.
    #[inline]
    fn push(&mut self, index: u64, value: f32, window: u64) -> f32 {
        while self.len > 0 && self.slots[self.slot(self.len - 1)].1 >= value {
            self.len -= 1;
        }
        let back = self.slot(self.len);
        self.slots[back] = (index, value);
        self.len += 1;

        while self.len > 1 && self.slots[self.head].0 + window <= index {
            self.head = (self.head + 1) % self.slots.len();
            self.len -= 1;
        }
        self.slots[self.head].1
    }
}

pub struct LookaheadLimiter {
    sample_rate: f32,
    lookahead: usize,
    threshold: f32,
    attack_coeff: f32,
    release_coeff: f32,
    delay: Vec<Vec<f32>>,
    pos: usize,
    window: MinWindow,
    index: u64,
    gain: f32,
    gain_reduction_db: f32,
}

impl LookaheadLimiter {
    pub fn new(
        sample_rate: f32,
        num_channels: usize,
        threshold_db: f32,
        lookahead_ms: f32,
        release_ms: f32,
    ) -> Self {
        let lookahead = ((lookahead_ms.max(0.0) * 0.001 * sample_rate).round() as usize).max(1);
        let mut limiter = Self {
            sample_rate,
            lookahead,
            threshold: 1.0,
            // Five time constants fit in the window.
            attack_coeff: (-5.0 / lookahead as f32).exp(),
            release_coeff: 0.0,
            delay: vec![vec![0.0; lookahead]; num_channels],
            pos: 0,
            // Window of lookahead + 1 entries, plus the one being pushed.
            window: MinWindow::new(lookahead + 2),
            index: 0,
            gain: 1.0,
            gain_reduction_db: 0.0,
        };
        limiter.set_threshold_db(threshold_db);
        limiter.set_release_ms(release_ms);
        limiter
    }

    /// Ceiling in dBFS, clamped to -24..=0. Non-finite values are ignored.
    pub fn set_threshold_db(&mut self, db: f32) {
        if db.is_finite() {
            self.threshold = db_to_linear(db.clamp(-24.0, 0.0));
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_release_ms(&mut self, ms: f32) {
        if !ms.is_finite() {
            return;
        }
        let samples = ms.clamp(1.0, 5000.0) * 0.001 * self.sample_rate;
        self.release_coeff = (-1.0 / samples).exp();
    }

    /// Latency in samples.
    pub fn latency(&self) -> usize {
        self.lookahead
    }

    /// Positive dB of reduction at the end of the last block.
    pub fn gain_reduction_db(&self) -> f32 {
        self.gain_reduction_db
    }

    pub fn reset(&mut self) {
        for line in &mut self.delay {
            line.fill(0.0);
        }
        self.pos = 0;
        self.window.clear();
        self.index = 0;
        self.gain = 1.0;
        self.gain_reduction_db = 0.0;
    }

    /// Limits `buffer` in place. Disabled, the signal still passes the delay
    /// line so latency does not jump when the limiter is toggled.
    ///
    /// REAL-TIME SAFE.
    pub fn process(&mut self, buffer: &mut AudioBuffer, enabled: bool) {
        let channels = buffer.num_channels().min(self.delay.len());
        let window = self.lookahead as u64 + 1;
        let thr = self.threshold;

        for i in 0..buffer.len() {
            let mut peak = 0.0f32;
            for ch in 0..channels {
                peak = peak.max(buffer.channel(ch)[i].abs());
            }
            let target = if enabled && peak > thr { thr / peak } else { 1.0 };
            let min_target = self.window.push(self.index, target, window);
            self.index += 1;

            let coeff = if min_target < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = min_target + coeff * (self.gain - min_target);

            for ch in 0..channels {
                let line = &mut self.delay[ch];
                let delayed = line[self.pos];
                let s = &mut buffer.channel_mut(ch)[i];
                line[self.pos] = *s;
                *s = if enabled {
                    (delayed * self.gain).clamp(-thr, thr)
                } else {
                    delayed
                };
            }
            self.pos = (self.pos + 1) % self.lookahead;
        }

        self.gain_reduction_db = if enabled { -linear_to_db(self.gain) } else { 0.0 };
    }
}
