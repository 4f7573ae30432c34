//! Windowed real FFT and per-bin magnitude, phase and power.

use std::f64::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};

use super::config::WindowType;

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half = x / 2.0;
    for k in 1..64 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    sum
}

/// Periodic window of `size` points.
pub fn make_window(window: WindowType, size: usize) -> Vec<f32> {
    let n = size as f64;
    (0..size)
        .map(|i| {
            let x = i as f64 / n;
            let w = match window {
                WindowType::Hann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
                WindowType::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
                WindowType::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                }
                WindowType::Kaiser(beta) => {
                    let beta = beta.max(0.0) as f64;
                    let r = 2.0 * x - 1.0;
                    bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / bessel_i0(beta)
                }
            };
            w as f32
        })
        .collect()
}

/// Forward transform state. All buffers are sized at construction.
pub struct Spectrum {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    /// Maps raw FFT magnitudes to sine amplitude.
    amplitude_scale: f32,
    input: Vec<f32>,
    output: Vec<Complex32>,
    scratch: Vec<Complex32>,
    magnitude: Vec<f32>,
    phase: Vec<f32>,
    power: Vec<f32>,
    previous_magnitude: Vec<f32>,
}

impl Spectrum {
    pub fn new(fft_size: usize, window: WindowType) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window = make_window(window, fft_size);
        let sum: f32 = window.iter().sum();
        let bins = fft_size / 2;
        Self {
            output: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            input: fft.make_input_vec(),
            fft,
            amplitude_scale: if sum > 0.0 { 2.0 / sum } else { 0.0 },
            window,
            magnitude: vec![0.0; bins],
            phase: vec![0.0; bins],
            power: vec![0.0; bins],
            previous_magnitude: vec![0.0; bins],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Analyzed bins, DC up to but excluding Nyquist.
    pub fn num_bins(&self) -> usize {
        self.magnitude.len()
    }

    pub fn magnitude(&self) -> &[f32] {
        &self.magnitude
    }

    pub fn phase(&self) -> &[f32] {
        &self.phase
    }

    pub fn power(&self) -> &[f32] {
        &self.power
    }

    /// Magnitudes of the frame before the last `analyze`.
    pub fn previous_magnitude(&self) -> &[f32] {
        &self.previous_magnitude
    }

    pub fn reset(&mut self) {
        self.magnitude.fill(0.0);
        self.phase.fill(0.0);
        self.power.fill(0.0);
        self.previous_magnitude.fill(0.0);
    }

    /// Windows and transforms one frame of `fft_size` samples. Returns false
    /// and leaves the spectra untouched when the transform fails.
    pub fn analyze(&mut self, frame: &[f32]) -> bool {
        for ((dst, &x), &w) in self.input.iter_mut().zip(frame).zip(&self.window) {
            *dst = x * w;
        }
        if self
            .fft
            .process_with_scratch(&mut self.input, &mut self.output, &mut self.scratch)
            .is_err()
        {
            return false;
        }

        std::mem::swap(&mut self.previous_magnitude, &mut self.magnitude);
        let scale = self.amplitude_scale;
        for (k, c) in self.output.iter().take(self.magnitude.len()).enumerate() {
            let m = c.norm() * scale;
            self.magnitude[k] = m;
            self.power[k] = m * m;
            self.phase[k] = c.im.atan2(c.re);
        }
        true
    }

    /// Frequency of bin `k` in Hz.
    #[inline]
    pub fn bin_frequency(&self, k: f32, sample_rate: f32) -> f32 {
        k * sample_rate / self.fft_size() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_peak_at_center() {
        for window in [
            WindowType::Hann,
            WindowType::Hamming,
            WindowType::Blackman,
            WindowType::Kaiser(6.0),
        ] {
            let w = make_window(window, 1024);
            assert!((w[512] - 1.0).abs() < 1e-3, "{:?} center = {}", window, w[512]);
            assert!(w[0] < 0.1, "{:?} edge = {}", window, w[0]);
        }
    }

    #[test]
    fn test_sine_amplitude_is_normalized() {
        let mut spectrum = Spectrum::new(2048, WindowType::Hann);
        // Bin-centered frequency: 64 cycles over the frame.
        let freq = 64.0 * 48000.0 / 2048.0;
        let frame: Vec<f32> = (0..2048)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0).sin())
            .collect();
        assert!(spectrum.analyze(&frame));

        let mag = spectrum.magnitude();
        let (peak_bin, peak) = mag
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (k, &m)| if m > best.1 { (k, m) } else { best });
        assert_eq!(peak_bin, 64);
        assert!((peak - 0.8).abs() < 0.01, "amplitude-normalized peak, got {}", peak);
        assert!((spectrum.power()[64] - peak * peak).abs() < 1e-6);
    }

    #[test]
    fn test_previous_magnitude_tracks_last_frame() {
        let mut spectrum = Spectrum::new(256, WindowType::Hann);
        let ones = vec![1.0f32; 256];
        spectrum.analyze(&ones);
        let first_dc = spectrum.magnitude()[0];
        spectrum.analyze(&vec![0.0; 256]);
        assert_eq!(spectrum.previous_magnitude()[0], first_dc);
        assert_eq!(spectrum.magnitude()[0], 0.0);
    }
}
