//! Precomputed saturation curves.
//!
//! Each table samples its curve at `TABLE_SIZE` evenly spaced points over
//! `[-TABLE_RANGE, TABLE_RANGE]`. Lookups clamp to the domain first, so the
//! endpoints return the first and last entries exactly.

pub const TABLE_SIZE: usize = 2048;
pub const TABLE_RANGE: f32 = 2.5;

/// Which curve to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaturationCurve {
    /// Symmetric `tanh` soft clip.
    SoftClip,
    /// Asymmetric blend of two offset `tanh` stages.
    Tube,
    /// Level-dependent compand.
    Tape,
}

/// The three saturation tables, built once at construction.
#[derive(Clone)]
pub struct SaturationTables {
    soft_clip: Box<[f32]>,
    tube: Box<[f32]>,
    tape: Box<[f32]>,
}

impl std::fmt::Debug for SaturationTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaturationTables")
            .field("size", &TABLE_SIZE)
            .finish()
    }
}

/// Input value represented by table index `i`.
#[inline]
fn table_input(i: usize) -> f32 {
    -TABLE_RANGE + 2.0 * TABLE_RANGE * i as f32 / (TABLE_SIZE - 1) as f32
}

fn build(curve: impl Fn(f32) -> f32) -> Box<[f32]> {
    (0..TABLE_SIZE).map(|i| curve(table_input(i))).collect()
}

impl SaturationTables {
    pub fn new() -> Self {
        Self {
            soft_clip: build(f32::tanh),
            tube: build(|x| 0.65 * (0.9 * (x + 0.2)).tanh() + 0.35 * (0.6 * (x - 0.1)).tanh()),
            tape: build(|x| (0.8 * x).tanh() * (0.8 + 0.2 * (2.0 * x.abs()).tanh())),
        }
    }

    #[inline]
    pub fn table(&self, curve: SaturationCurve) -> &[f32] {
        match curve {
            SaturationCurve::SoftClip => &self.soft_clip,
            SaturationCurve::Tube => &self.tube,
            SaturationCurve::Tape => &self.tape,
        }
    }

    /// Linear-interpolated lookup. Input outside the table domain is clamped.
    #[inline]
    pub fn lookup(&self, curve: SaturationCurve, x: f32) -> f32 {
        let table = self.table(curve);
        let x = if x.is_nan() { 0.0 } else { x.clamp(-TABLE_RANGE, TABLE_RANGE) };
        let pos = (x + TABLE_RANGE) * (TABLE_SIZE - 1) as f32 / (2.0 * TABLE_RANGE);
        let i0 = (pos as usize).min(TABLE_SIZE - 1);
        let i1 = (i0 + 1).min(TABLE_SIZE - 1);
        let frac = pos - i0 as f32;
        table[i0] + frac * (table[i1] - table[i0])
    }

    /// Drive-then-blend saturation: `(1 - amount) * x + amount * curve(drive * x)`.
    /// Amounts at or below 1e-4 leave the sample untouched.
    #[inline]
    pub fn saturate(&self, curve: SaturationCurve, x: f32, drive: f32, amount: f32) -> f32 {
        let amount = amount.clamp(0.0, 1.0);
        if amount <= 1e-4 {
            return x;
        }
        let driven = self.lookup(curve, x * drive);
        (1.0 - amount) * x + amount * driven
    }
}

impl Default for SaturationTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_return_exact_table_entries() {
        let tables = SaturationTables::new();
        for curve in [SaturationCurve::SoftClip, SaturationCurve::Tube, SaturationCurve::Tape] {
            let table = tables.table(curve);
            assert_eq!(tables.lookup(curve, -TABLE_RANGE), table[0], "{:?} min", curve);
            assert_eq!(
                tables.lookup(curve, TABLE_RANGE),
                table[TABLE_SIZE - 1],
                "{:?} max",
                curve
            );
            assert_eq!(tables.lookup(curve, 100.0), table[TABLE_SIZE - 1], "{:?} clamps high", curve);
            assert_eq!(tables.lookup(curve, -100.0), table[0], "{:?} clamps low", curve);
        }
    }

    #[test]
    fn test_soft_clip_matches_tanh() {
        let tables = SaturationTables::new();
        for x in [-2.0f32, -0.7, -0.1, 0.0, 0.33, 1.0, 2.2] {
            let err = (tables.lookup(SaturationCurve::SoftClip, x) - x.tanh()).abs();
            assert!(err < 1e-4, "tanh lookup error {} at {}", err, x);
        }
    }

    #[test]
    fn test_tube_is_asymmetric() {
        let tables = SaturationTables::new();
        let pos = tables.lookup(SaturationCurve::Tube, 1.0);
        let neg = tables.lookup(SaturationCurve::Tube, -1.0);
        assert!((pos + neg).abs() > 0.01, "tube curve should not be odd-symmetric");
    }

    #[test]
    fn test_saturate_amount_blend() {
        let tables = SaturationTables::new();
        assert_eq!(tables.saturate(SaturationCurve::SoftClip, 0.8, 2.0, 0.0), 0.8);
        let full = tables.saturate(SaturationCurve::SoftClip, 0.8, 2.0, 1.0);
        assert!((full - 1.6f32.tanh()).abs() < 1e-3);
        let nan_safe = tables.lookup(SaturationCurve::Tape, f32::NAN);
        assert!(nan_safe.is_finite());
    }
}
