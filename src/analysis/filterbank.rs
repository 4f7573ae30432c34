//! Precomputed filter banks: mel/MFCC, chroma, contrast and tonnetz.

use std::f32::consts::PI;

use super::config::{NUM_CHROMA, NUM_CONTRAST_BANDS, NUM_MEL_FILTERS, NUM_MFCC, NUM_TONNETZ};
use crate::dsp::linear_to_db;

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters over the power spectrum plus the DCT-II basis.
pub struct MelFilterBank {
    /// `weights[filter][bin]`.
    weights: Vec<Vec<f32>>,
    /// `dct[coeff][filter]`.
    dct: Vec<[f32; NUM_MEL_FILTERS]>,
    log_energies: [f32; NUM_MEL_FILTERS],
}

impl MelFilterBank {
    pub fn new(num_bins: usize, fft_size: usize, sample_rate: f32, min_hz: f32, max_hz: f32) -> Self {
        let max_hz = max_hz.min(0.5 * sample_rate);
        let min_hz = min_hz.clamp(0.0, max_hz);
        let (mel_lo, mel_hi) = (hz_to_mel(min_hz), hz_to_mel(max_hz));
        let edges: Vec<f32> = (0..NUM_MEL_FILTERS + 2)
            .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f32 / (NUM_MEL_FILTERS + 1) as f32))
            .collect();

        let weights = (0..NUM_MEL_FILTERS)
            .map(|m| {
                let (f0, f1, f2) = (edges[m], edges[m + 1], edges[m + 2]);
                (0..num_bins)
                    .map(|k| {
                        let fk = k as f32 * sample_rate / fft_size as f32;
                        if fk >= f0 && fk <= f1 && f1 > f0 {
                            (fk - f0) / (f1 - f0)
                        } else if fk > f1 && fk <= f2 && f2 > f1 {
                            (f2 - fk) / (f2 - f1)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();

        let dct = (0..NUM_MFCC)
            .map(|k| {
                let mut row = [0.0; NUM_MEL_FILTERS];
                for (n, c) in row.iter_mut().enumerate() {
                    *c = (PI * (n as f32 + 0.5) * k as f32 / NUM_MEL_FILTERS as f32).cos();
                }
                row
            })
            .collect();

        Self {
            weights,
            dct,
            log_energies: [0.0; NUM_MEL_FILTERS],
        }
    }

    /// Log mel energies followed by a 13-coefficient DCT-II.
    pub fn mfcc(&mut self, power: &[f32], out: &mut [f32; NUM_MFCC]) {
        for (e, filter) in self.log_energies.iter_mut().zip(&self.weights) {
            let energy: f32 = filter.iter().zip(power).map(|(w, p)| w * p).sum();
            *e = (1e-12 + energy).ln();
        }
        for (o, basis) in out.iter_mut().zip(&self.dct) {
            *o = basis.iter().zip(&self.log_energies).map(|(b, e)| b * e).sum();
        }
    }
}

/// Equal-tempered pitch class of every bin; bins under 20 Hz map to none.
pub struct ChromaMap {
    classes: Vec<Option<u8>>,
}

impl ChromaMap {
    pub fn new(num_bins: usize, fft_size: usize, sample_rate: f32) -> Self {
        let classes = (0..num_bins)
            .map(|k| {
                let fk = k as f32 * sample_rate / fft_size as f32;
                if fk < 20.0 {
                    return None;
                }
                let midi = 69.0 + 12.0 * (fk / 440.0).log2();
                Some((midi.round() as i32).rem_euclid(12) as u8)
            })
            .collect();
        Self { classes }
    }

    pub fn pitch_class(&self, bin: usize) -> Option<u8> {
        self.classes.get(bin).copied().flatten()
    }

    /// Power per pitch class, normalized to sum to one.
    pub fn chroma(&self, power: &[f32], out: &mut [f32; NUM_CHROMA]) {
        out.fill(0.0);
        for (class, p) in self.classes.iter().zip(power) {
            if let Some(c) = class {
                out[*c as usize] += p;
            }
        }
        let total: f32 = out.iter().sum();
        if total > 1e-12 {
            out.iter_mut().for_each(|c| *c /= total);
        }
    }
}

/// Peak-to-valley ratio in dB over equal-width bands (DC excluded).
pub fn spectral_contrast(magnitude: &[f32], out: &mut [f32; NUM_CONTRAST_BANDS]) {
    let bins = magnitude.len();
    if bins < 2 {
        out.fill(0.0);
        return;
    }
    for (b, o) in out.iter_mut().enumerate() {
        let k0 = (b * (bins - 1) / NUM_CONTRAST_BANDS + 1).min(bins - 1);
        let k1 = ((b + 1) * (bins - 1) / NUM_CONTRAST_BANDS + 1).clamp(k0 + 1, bins);
        let band = &magnitude[k0..k1];
        let peak = band.iter().fold(0.0f32, |m, &v| m.max(v));
        let valley = band.iter().fold(f32::MAX, |m, &v| m.min(v));
        *o = if valley > 1e-9 { linear_to_db(peak / valley) } else { 0.0 };
    }
}

/// Tonal centroid: chroma projected onto the circles of fifths, minor
/// thirds and major thirds, normalized by the chroma's L1 norm.
pub fn tonnetz(chroma: &[f32; NUM_CHROMA], out: &mut [f32; NUM_TONNETZ]) {
    const RADII: [f32; 3] = [1.0, 1.0, 0.5];
    const ANGLES: [f32; 3] = [7.0 * PI / 6.0, 3.0 * PI / 2.0, 2.0 * PI / 3.0];

    out.fill(0.0);
    let norm: f32 = chroma.iter().map(|c| c.abs()).sum();
    if norm <= 1e-12 {
        return;
    }
    for (l, &c) in chroma.iter().enumerate() {
        for d in 0..3 {
            let angle = l as f32 * ANGLES[d];
            out[2 * d] += RADII[d] * angle.sin() * c;
            out[2 * d + 1] += RADII[d] * angle.cos() * c;
        }
    }
    out.iter_mut().for_each(|t| *t /= norm);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0, 100.0, 1000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 0.1);
        }
        assert!((hz_to_mel(1000.0) - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_mfcc_of_silence_is_constant() {
        let mut bank = MelFilterBank::new(1024, 2048, 48000.0, 0.0, 8000.0);
        let mut out = [0.0; NUM_MFCC];
        bank.mfcc(&vec![0.0; 1024], &mut out);
        let floor = (1e-12f32).ln();
        assert!((out[0] - floor * NUM_MEL_FILTERS as f32).abs() < 1e-2);
        for c in &out[1..] {
            assert!(c.abs() < 1e-2, "flat log spectrum has no higher cepstrum");
        }
    }

    #[test]
    fn test_chroma_maps_a440() {
        let map = ChromaMap::new(1024, 2048, 48000.0);
        let bin = (440.0f32 * 2048.0 / 48000.0).round() as usize;
        assert_eq!(map.pitch_class(bin), Some(9));
        assert_eq!(map.pitch_class(0), None, "DC has no pitch class");

        let mut power = vec![0.0; 1024];
        power[bin] = 1.0;
        let mut chroma = [0.0; NUM_CHROMA];
        map.chroma(&power, &mut chroma);
        assert_eq!(chroma[9], 1.0);
        assert!((chroma.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_contrast_of_flat_spectrum_is_zero() {
        let mut out = [1.0; NUM_CONTRAST_BANDS];
        spectral_contrast(&vec![0.5; 1024], &mut out);
        assert!(out.iter().all(|c| c.abs() < 1e-4));

        let mut peaky = vec![0.01; 1024];
        peaky[100] = 1.0;
        spectral_contrast(&peaky, &mut out);
        assert!((out[0] - 40.0).abs() < 0.1, "100:1 is 40 dB, got {}", out[0]);
    }

    #[test]
    fn test_tonnetz_single_class() {
        let mut chroma = [0.0; NUM_CHROMA];
        chroma[0] = 1.0;
        let mut out = [0.0; NUM_TONNETZ];
        tonnetz(&chroma, &mut out);
        assert_eq!(out, [0.0, 1.0, 0.0, 1.0, 0.0, 0.5]);

        let silent = [0.0; NUM_CHROMA];
        tonnetz(&silent, &mut out);
        assert_eq!(out, [0.0; NUM_TONNETZ]);
    }
}
