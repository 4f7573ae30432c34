//! Second-order IIR sections.
//!
//! Coefficient designs follow the RBJ Audio EQ Cookbook. Every design is
//! normalized so the leading denominator coefficient is 1, and every design
//! clamps its inputs into a stable domain before use.

use std::f64::consts::PI;

use super::buffer::clamp_finite;

/// Lowest frequency accepted by the designs, in Hz.
pub const MIN_FREQUENCY: f32 = 10.0;
/// Highest frequency accepted by the designs, as a fraction of sample rate.
pub const MAX_FREQUENCY_RATIO: f32 = 0.45;
pub const MIN_Q: f32 = 0.1;
pub const MAX_Q: f32 = 40.0;
/// Stand-ins for non-finite design inputs.
pub const DEFAULT_FREQUENCY: f32 = 1000.0;
pub const DEFAULT_Q: f32 = 1.0;

/// Normalized biquad coefficients (a0 == 1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

/// Design inputs after domain clamping. Designs run in f64 so that
/// narrow, low-frequency sections keep their poles inside the unit circle
/// after rounding to f32.
struct Prototype {
    cos_w0: f64,
    alpha: f64,
    a: f64,
    sin_w0: f64,
}

impl Prototype {
    fn new(sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let freq = clamp_frequency(freq, sample_rate) as f64;
        let q = clamp_q(q) as f64;
        let gain_db = clamp_finite(gain_db, -48.0, 48.0, 0.0);
        let w0 = 2.0 * PI * freq / sample_rate as f64;
        let sin_w0 = w0.sin();
        Self {
            cos_w0: w0.cos(),
            alpha: sin_w0 / (2.0 * q),
            a: 10.0f64.powf(gain_db as f64 / 40.0),
            sin_w0,
        }
    }

    /// Shelf alpha with shelf slope `s`. Slopes above 1 would make the radicand
    /// negative for large gains, so `s` is limited to (0, 1].
    fn shelf_alpha(&self, s: f32) -> f64 {
        let s = clamp_finite(s, MIN_Q, 1.0, 1.0) as f64;
        let a = self.a;
        self.sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / s - 1.0) + 2.0).sqrt()
    }
}

/// Clamps a frequency into `[MIN_FREQUENCY, 0.45 * sample_rate]`.
#[inline]
pub fn clamp_frequency(freq: f32, sample_rate: f32) -> f32 {
    let max = sample_rate * MAX_FREQUENCY_RATIO;
    clamp_finite(freq, MIN_FREQUENCY, max, DEFAULT_FREQUENCY.min(max))
}

pub fn clamp_q(q: f32) -> f32 {
    clamp_finite(q, MIN_Q, MAX_Q, DEFAULT_Q)
}

impl BiquadCoeffs {
    /// Pass-through section.
    pub const fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: (b0 / a0) as f32,
            b1: (b1 / a0) as f32,
            b2: (b2 / a0) as f32,
            a1: (a1 / a0) as f32,
            a2: (a2 / a0) as f32,
        }
    }

    pub fn peaking(sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let p = Prototype::new(sample_rate, freq, q, gain_db);
        let (a, alpha, cos_w0) = (p.a, p.alpha, p.cos_w0);
        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        )
    }

    /// Low shelf. `q` is used as the shelf slope.
    pub fn low_shelf(sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let p = Prototype::new(sample_rate, freq, q, gain_db);
        let (a, cos_w0) = (p.a, p.cos_w0);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * p.shelf_alpha(q);
        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
            a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
            (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// High shelf. `q` is used as the shelf slope.
    pub fn high_shelf(sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let p = Prototype::new(sample_rate, freq, q, gain_db);
        let (a, cos_w0) = (p.a, p.cos_w0);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * p.shelf_alpha(q);
        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
            a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
            (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    pub fn low_pass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prototype::new(sample_rate, freq, q, 0.0);
        let (alpha, cos_w0) = (p.alpha, p.cos_w0);
        Self::normalized(
            (1.0 - cos_w0) / 2.0,
            1.0 - cos_w0,
            (1.0 - cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    pub fn high_pass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prototype::new(sample_rate, freq, q, 0.0);
        let (alpha, cos_w0) = (p.alpha, p.cos_w0);
        Self::normalized(
            (1.0 + cos_w0) / 2.0,
            -(1.0 + cos_w0),
            (1.0 + cos_w0) / 2.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// Constant skirt gain band-pass (peak gain = Q).
    pub fn band_pass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prototype::new(sample_rate, freq, q, 0.0);
        let q = clamp_q(q) as f64;
        let (alpha, cos_w0) = (p.alpha, p.cos_w0);
        Self::normalized(
            q * alpha,
            0.0,
            -q * alpha,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    pub fn notch(sample_rate: f32, freq: f32, q: f32) -> Self {
        let p = Prototype::new(sample_rate, freq, q, 0.0);
        let (alpha, cos_w0) = (p.alpha, p.cos_w0);
        Self::normalized(
            1.0,
            -2.0 * cos_w0,
            1.0,
            1.0 + alpha,
            -2.0 * cos_w0,
            1.0 - alpha,
        )
    }

    /// True when both poles of `1 + a1 z^-1 + a2 z^-2` lie strictly inside
    /// the unit circle (stability triangle test).
    pub fn is_stable(&self) -> bool {
        self.a1.is_finite()
            && self.a2.is_finite()
            && self.a2.abs() < 1.0
            && self.a1.abs() < 1.0 + self.a2
    }

    /// Magnitude of the frequency response at `freq`.
    pub fn magnitude_at(&self, freq: f32, sample_rate: f32) -> f32 {
        let w = 2.0 * PI * freq as f64 / sample_rate as f64;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let (b0, b1, b2) = (self.b0 as f64, self.b1 as f64, self.b2 as f64);
        let (a1, a2) = (self.a1 as f64, self.a2 as f64);

        let num_re = b0 + b1 * c1 + b2 * c2;
        let num_im = -(b1 * s1 + b2 * s2);
        let den_re = 1.0 + a1 * c1 + a2 * c2;
        let den_im = -(a1 * s1 + a2 * s2);

        let num = (num_re * num_re + num_im * num_im).sqrt();
        let den = (den_re * den_re + den_im * den_im).sqrt().max(1e-12);
        (num / den) as f32
    }
}

/// Direct form I state: two input and two output history samples.
#[derive(Clone, Copy, Debug, Default)]
pub struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
