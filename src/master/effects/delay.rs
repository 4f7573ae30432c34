//! Feedback delay with damping in the feedback path.
//!
//! Parameters: time (ms, up to one second), feedback (0..0.95),
//! damping (0..1, 0 leaves repeats bright).

use std::f32::consts::PI;

use crate::dsp::AudioBuffer;

use super::{read_interpolated, EffectParams};

const TIME: usize = 0;
const FEEDBACK: usize = 1;
const DAMPING: usize = 2;

pub const MAX_DELAY_MS: f32 = 1000.0;

struct DelayChannel {
    line: Vec<f32>,
    write_pos: usize,
    damp_state: f32,
}

pub struct Delay {
    sample_rate: f32,
    channels: Vec<DelayChannel>,
}

impl Delay {
    pub const DEFAULTS: [f32; 3] = [250.0, 0.35, 0.3];

    pub fn new(sample_rate: f32, num_channels: usize) -> Self {
        let len = (MAX_DELAY_MS * 0.001 * sample_rate) as usize + 4;
        let channels = (0..num_channels)
            .map(|_| DelayChannel {
                line: vec![0.0; len],
                write_pos: 0,
                damp_state: 0.0,
            })
            .collect();
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn reset(&mut self) {
        for c in &mut self.channels {
            c.line.fill(0.0);
            c.write_pos = 0;
            c.damp_state = 0.0;
        }
    }

    /// One-pole lowpass coefficient, bilinear-warped.
    #[inline]
    fn lowpass_coeff(cutoff: f32, sample_rate: f32) -> f32 {
        let cutoff = cutoff.clamp(20.0, sample_rate * 0.45);
        let t = (PI * cutoff / sample_rate).tan();
        t / (1.0 + t)
    }

    pub fn process(&mut self, buffer: &mut AudioBuffer, params: &EffectParams, mix: f32) {
        let max_delay = MAX_DELAY_MS * 0.001 * self.sample_rate;
        let delay = (params[TIME] * 0.001 * self.sample_rate).clamp(1.0, max_delay);
        let feedback = params[FEEDBACK].clamp(0.0, 0.95);
        // Damping 0 keeps the path open at 0.45 fs, 1 closes it to 1 kHz.
        let damping = params[DAMPING].clamp(0.0, 1.0);
        let cutoff = 1000.0 * (self.sample_rate * 0.45 / 1000.0).powf(1.0 - damping);
        let lp = Self::lowpass_coeff(cutoff, self.sample_rate);

        for (ch, state) in buffer.channels_mut().zip(self.channels.iter_mut()) {
            let len = state.line.len();
            for s in ch.iter_mut() {
                let delayed = read_interpolated(&state.line, state.write_pos, delay);
                state.damp_state += lp * (delayed - state.damp_state);
                state.line[state.write_pos] = (*s + state.damp_state * feedback).tanh();
                state.write_pos = (state.write_pos + 1) % len;
                *s += mix * (delayed - *s);
            }
        }
    }
}
