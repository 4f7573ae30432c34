//! 2x half-band polyphase oversampling.
//!
//! One 31-tap Blackman-windowed half-band FIR is split into its even and odd
//! phases. Upsampling runs both phases on the base-rate input; downsampling
//! runs the even phase on even samples and the odd phase on the preceding odd
//! samples. Round-trip latency is `LATENCY` base-rate samples.

use std::f64::consts::PI;

pub const NUM_TAPS: usize = 31;
const CENTER: usize = NUM_TAPS / 2;
const EVEN_TAPS: usize = (NUM_TAPS + 1) / 2;
const ODD_TAPS: usize = NUM_TAPS / 2;

/// Round-trip delay of up + down sampling at the base rate.
pub const LATENCY: usize = CENTER;

/// Designs the prototype half-band low-pass (cutoff at a quarter of the
/// oversampled rate). Each polyphase branch is normalized to a DC gain of
/// one half so upsampled DC stays flat on both phases.
fn design_halfband() -> [f64; NUM_TAPS] {
    let mut taps = [0.0f64; NUM_TAPS];
    let n_max = (NUM_TAPS - 1) as f64;
    for (n, tap) in taps.iter_mut().enumerate() {
        let t = n as f64 - CENTER as f64;
        let sinc = if t == 0.0 {
            1.0
        } else if (n + CENTER) % 2 == 0 {
            0.0
        } else {
            (PI * t / 2.0).sin() / (PI * t / 2.0)
        };
        let window = 0.42 - 0.5 * (2.0 * PI * n as f64 / n_max).cos()
            + 0.08 * (4.0 * PI * n as f64 / n_max).cos();
        *tap = 0.5 * sinc * window;
    }
    let even_sum: f64 = taps.iter().step_by(2).sum();
    for tap in taps.iter_mut().step_by(2) {
        *tap *= 0.5 / even_sum;
    }
    taps
}

#[inline]
fn shift_in<const N: usize>(history: &mut [f32; N], value: f32) {
    history.copy_within(0..N - 1, 1);
    history[0] = value;
}

/// Per-channel 2x up/down sampler.
#[derive(Clone, Debug)]
pub struct HalfbandOversampler {
    even: [f32; EVEN_TAPS],
    odd: [f32; ODD_TAPS],
    up_history: [f32; EVEN_TAPS],
    down_even: [f32; EVEN_TAPS],
    down_odd: [f32; ODD_TAPS],
}

impl HalfbandOversampler {
    pub fn new() -> Self {
        let taps = design_halfband();
        let mut even = [0.0f32; EVEN_TAPS];
        let mut odd = [0.0f32; ODD_TAPS];
        for (j, e) in even.iter_mut().enumerate() {
            *e = taps[2 * j] as f32;
        }
        for (j, o) in odd.iter_mut().enumerate() {
            *o = taps[2 * j + 1] as f32;
        }
        Self {
            even,
            odd,
            up_history: [0.0; EVEN_TAPS],
            down_even: [0.0; EVEN_TAPS],
            down_odd: [0.0; ODD_TAPS],
        }
    }

    pub fn reset(&mut self) {
        self.up_history = [0.0; EVEN_TAPS];
        self.down_even = [0.0; EVEN_TAPS];
        self.down_odd = [0.0; ODD_TAPS];
    }

    /// Writes `2 * input.len()` samples into `output`.
    pub fn upsample(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert!(output.len() >= input.len() * 2);
        for (x, pair) in input.iter().zip(output.chunks_exact_mut(2)) {
            shift_in(&mut self.up_history, *x);
            let mut y0 = 0.0;
            for (h, s) in self.even.iter().zip(&self.up_history) {
                y0 += h * s;
            }
            let mut y1 = 0.0;
            for (h, s) in self.odd.iter().zip(&self.up_history) {
                y1 += h * s;
            }
            pair[0] = 2.0 * y0;
            pair[1] = 2.0 * y1;
        }
    }

    /// Reads `2 * output.len()` samples from `input`.
    pub fn downsample(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert!(input.len() >= output.len() * 2);
        for (pair, y) in input.chunks_exact(2).zip(output.iter_mut()) {
            shift_in(&mut self.down_even, pair[0]);
            let mut acc = 0.0;
            for (h, s) in self.even.iter().zip(&self.down_even) {
                acc += h * s;
            }
            for (h, s) in self.odd.iter().zip(&self.down_odd) {
                acc += h * s;
            }
            *y = acc;
            shift_in(&mut self.down_odd, pair[1]);
        }
    }
}

impl Default for HalfbandOversampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halfband_design() {
        let taps = design_halfband();
        let sum: f64 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12, "unity DC gain");
        assert!((taps[CENTER] - 0.5).abs() < 1e-12, "center tap is one half");
        for n in (1..NUM_TAPS).step_by(2).filter(|&n| n != CENTER) {
            assert_eq!(taps[n], 0.0, "half-band zero at tap {}", n);
        }
    }

    #[test]
    fn test_roundtrip_reproduces_delayed_input() {
        let mut os = HalfbandOversampler::new();
        let n = 256;
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin())
            .collect();
        let mut up = vec![0.0; n * 2];
        let mut down = vec![0.0; n];
        os.upsample(&input, &mut up);
        os.downsample(&up, &mut down);

        for i in 64..n {
            let err = (down[i] - input[i - LATENCY]).abs();
            assert!(err < 0.01, "sample {} error {}", i, err);
        }
    }

    #[test]
    fn test_dc_passes_upsampling() {
        let mut os = HalfbandOversampler::new();
        let input = [1.0f32; 64];
        let mut up = [0.0f32; 128];
        os.upsample(&input, &mut up);
        for (i, s) in up.iter().enumerate().skip(40) {
            assert!((s - 1.0).abs() < 1e-4, "upsampled DC at {} = {}", i, s);
        }
    }
}
