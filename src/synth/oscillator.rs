//! Per-voice oscillators.
//!
//! Virtual-analog shapes use a polynomial band-limited step (PolyBLEP) at each
//! discontinuity. The triangle is a leaky integral of the corrected square.
//! Wavetable mode reads a 2048-cell single-cycle table with linear
//! interpolation.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

pub const WAVETABLE_SIZE: usize = 2048;
const WAVETABLE_MASK: usize = WAVETABLE_SIZE - 1;
/// Harmonics summed into the built-in tables.
const TABLE_HARMONICS: usize = 48;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
    Sine,
    #[default]
    Saw,
    Square,
    Triangle,
    Noise,
}

impl Waveform {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Waveform::Sine),
            1 => Some(Waveform::Saw),
            2 => Some(Waveform::Square),
            3 => Some(Waveform::Triangle),
            4 => Some(Waveform::Noise),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OscillatorKind {
    #[default]
    VirtualAnalog,
    Wavetable,
}

impl OscillatorKind {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(OscillatorKind::VirtualAnalog),
            1 => Some(OscillatorKind::Wavetable),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscillatorSettings {
    pub kind: OscillatorKind,
    pub waveform: Waveform,
    pub amplitude: f32,
    /// In wavetable mode, read the user table instead of the built-in one
    /// for `waveform`.
    pub custom_table: bool,
}

impl Default for OscillatorSettings {
    fn default() -> Self {
        Self {
            kind: OscillatorKind::VirtualAnalog,
            waveform: Waveform::Saw,
            amplitude: 0.5,
            custom_table: false,
        }
    }
}

/// PolyBLEP residual for a unit step at phase 0, `t` in [0, 1).
#[inline]
pub fn poly_blep(t: f32, dt: f32) -> f32 {
    if t < dt {
        let t = t / dt;
        t + t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + t + t + 1.0
    } else {
        0.0
    }
}

/// Oscillator state owned by one voice.
#[derive(Clone, Copy, Debug)]
pub struct OscillatorState {
    /// Normalized phase in [0, 1).
    pub phase: f32,
    /// Leaky integrator for the triangle.
    triangle: f32,
    /// xorshift32 state, never zero.
    rng: u32,
}

impl OscillatorState {
    pub fn new(seed: u32) -> Self {
        Self {
            phase: 0.0,
            triangle: 0.0,
            rng: if seed == 0 { 0x1234_5678 } else { seed },
        }
    }

    /// Restarts the cycle; the noise generator keeps running.
    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
        self.triangle = 0.0;
    }

    /// White noise in [-1, 1).
    #[inline]
    pub fn noise(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x & 0x7FFF_FFFF) as f32 / 1_073_741_824.0 - 1.0
    }

    #[inline]
    fn square(&self, dt: f32) -> f32 {
        let p = self.phase;
        let naive = if p < 0.5 { 1.0 } else { -1.0 };
        naive + poly_blep(p, dt) - poly_blep((p + 0.5) % 1.0, dt)
    }

    /// One sample of a virtual-analog waveform at phase increment `dt`.
    /// Does not advance the phase.
    #[inline]
    pub fn virtual_analog(&mut self, waveform: Waveform, dt: f32) -> f32 {
        match waveform {
            Waveform::Sine => (self.phase * TAU).sin(),
            Waveform::Saw => 2.0 * self.phase - 1.0 - poly_blep(self.phase, dt),
            Waveform::Square => self.square(dt),
            Waveform::Triangle => {
                let sq = self.square(dt);
                self.triangle = 4.0 * dt * sq + (1.0 - dt) * self.triangle;
                self.triangle
            }
            Waveform::Noise => self.noise(),
        }
    }

    #[inline]
    pub fn advance(&mut self, dt: f32) {
        self.phase += dt;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
    }
}

/// Reads a single-cycle table at normalized `phase` with linear interpolation.
#[inline]
pub fn read_wavetable(table: &[f32], phase: f32) -> f32 {
    let pos = phase * WAVETABLE_SIZE as f32;
    let i0 = (pos as usize) & WAVETABLE_MASK;
    let i1 = (i0 + 1) & WAVETABLE_MASK;
    let frac = pos - pos.floor();
    table[i0] + frac * (table[i1] - table[i0])
}

/// Built-in band-limited tables plus one user table.
#[derive(Clone)]
pub struct WavetableBank {
    sine: Box<[f32]>,
    saw: Box<[f32]>,
    square: Box<[f32]>,
    triangle: Box<[f32]>,
    custom: Box<[f32]>,
}

impl std::fmt::Debug for WavetableBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavetableBank").finish_non_exhaustive()
    }
}

/// Additive single-cycle table normalized to unit peak.
fn additive_table(partial: impl Fn(usize) -> f32) -> Box<[f32]> {
    let mut table: Vec<f32> = (0..WAVETABLE_SIZE)
        .map(|i| {
            let phase = i as f32 / WAVETABLE_SIZE as f32;
            (1..=TABLE_HARMONICS)
                .map(|h| partial(h) * (TAU * h as f32 * phase).sin())
                .sum()
        })
        .collect();
    let peak = table.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        table.iter_mut().for_each(|s| *s /= peak);
    }
    table.into_boxed_slice()
}

impl WavetableBank {
    pub fn new() -> Self {
        let sine = additive_table(|h| if h == 1 { 1.0 } else { 0.0 });
        Self {
            custom: sine.clone(),
            sine,
            saw: additive_table(|h| -1.0 / h as f32),
            square: additive_table(|h| if h % 2 == 1 { 1.0 / h as f32 } else { 0.0 }),
            triangle: additive_table(|h| {
                if h % 2 == 1 {
                    let sign = if (h / 2) % 2 == 0 { 1.0 } else { -1.0 };
                    sign / (h * h) as f32
                } else {
                    0.0
                }
            }),
        }
    }

    /// Table for `settings`; noise has no table and reads the sine.
    #[inline]
    pub fn table(&self, settings: &OscillatorSettings) -> &[f32] {
        if settings.custom_table {
            return &self.custom;
        }
        match settings.waveform {
            Waveform::Saw => &self.saw,
            Waveform::Square => &self.square,
            Waveform::Triangle => &self.triangle,
            Waveform::Sine | Waveform::Noise => &self.sine,
        }
    }

    /// Replaces the user table, resampling `cycle` to the table size.
    /// Control-plane only. Empty input leaves the table untouched.
    pub fn load_custom(&mut self, cycle: &[f32]) -> bool {
        if cycle.is_empty() {
            return false;
        }
        let n = cycle.len();
        for (i, cell) in self.custom.iter_mut().enumerate() {
            let pos = i as f32 * n as f32 / WAVETABLE_SIZE as f32;
            let i0 = (pos as usize).min(n - 1);
            let i1 = (i0 + 1) % n;
            let frac = pos - i0 as f32;
            *cell = cycle[i0] + frac * (cycle[i1] - cycle[i0]);
        }
        true
    }
}

impl Default for WavetableBank {
    fn default() -> Self {
        Self::new()
    }
}
