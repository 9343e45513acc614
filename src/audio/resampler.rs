//! Linear interpolation, TPDF dither, and the anti-alias low-pass filter
//! used by the 16 kHz <-> 24 kHz conversion in [`super`].

use once_cell::sync::Lazy;
use rand::Rng;

const FIR_TAPS: usize = 64;
/// Cutoff relative to the 24 kHz source rate: 0.6 x Nyquist (12 kHz) = 7.2 kHz.
const CUTOFF_HZ: f64 = 7_200.0;
const SOURCE_RATE_HZ: f64 = 24_000.0;

static FIR_COEFFICIENTS: Lazy<[f64; FIR_TAPS]> = Lazy::new(build_low_pass_coefficients);

/// Resamples `input` to exactly `out_len` samples via linear interpolation
/// over the index mapping `pos = i * (in_len - 1) / max(out_len - 1, 1)`.
/// Used for both the up- and down-sampling directions; only the requested
/// output length differs.
pub fn resample_linear(input: &[f32], out_len: usize) -> Vec<f32> {
    if input.is_empty() || out_len == 0 {
        return Vec::new();
    }
    if input.len() == 1 {
        return vec![input[0]; out_len];
    }

    let in_len = input.len();
    let step = (in_len - 1) as f64 / (out_len.max(1) as f64);
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * step;
        let i0 = pos.floor() as usize;
        let i1 = (i0 + 1).min(in_len - 1);
        let frac = (pos - i0 as f64) as f32;
        let sample = input[i0] * (1.0 - frac) + input[i1] * frac;
        out.push(sample);
    }
    out
}

/// Adds triangular-probability-density dither scaled by 0.5 and clamps to
/// the int16 range.
pub fn apply_tpdf_dither(samples: &[f32]) -> Vec<f32> {
    let mut rng = rand::rng();
    samples
        .iter()
        .map(|&s| {
            let r1: f32 = rng.random_range(-0.5..0.5);
            let r2: f32 = rng.random_range(-0.5..0.5);
            let dither = (r1 + r2) * 0.5;
            (s + dither).clamp(i16::MIN as f32, i16::MAX as f32)
        })
        .collect()
}

/// Convolves `samples` with the precomputed 64-tap Blackman-windowed sinc
/// low-pass filter, zero-padding at the edges.
pub fn low_pass_filter(samples: &[f32]) -> Vec<f32> {
    let coeffs = &*FIR_COEFFICIENTS;
    let half = (FIR_TAPS / 2) as isize;
    let n = samples.len() as isize;

    (0..n)
        .map(|i| {
            let mut acc = 0.0_f64;
            for (k, &c) in coeffs.iter().enumerate() {
                let idx = i - half + k as isize;
                if idx >= 0 && idx < n {
                    acc += c * samples[idx as usize] as f64;
                }
            }
            acc as f32
        })
        .collect()
}

fn build_low_pass_coefficients() -> [f64; FIR_TAPS] {
    let fc = CUTOFF_HZ / SOURCE_RATE_HZ;
    let m = (FIR_TAPS - 1) as f64;
    let mut coeffs = [0.0_f64; FIR_TAPS];

    for (n, coeff) in coeffs.iter_mut().enumerate() {
        let k = n as f64 - m / 2.0;
        let sinc = if k.abs() < 1e-9 {
            2.0 * fc
        } else {
            (2.0 * std::f64::consts::PI * fc * k).sin() / (std::f64::consts::PI * k)
        };
        // Blackman window.
        let w = 0.42 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / m).cos()
            + 0.08 * (4.0 * std::f64::consts::PI * n as f64 / m).cos();
        *coeff = sinc * w;
    }

    let sum: f64 = coeffs.iter().sum();
    if sum.abs() > 1e-12 {
        for c in coeffs.iter_mut() {
            *c /= sum;
        }
    }

    coeffs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficients_have_unit_dc_gain() {
        let sum: f64 = FIR_COEFFICIENTS.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum was {sum}");
    }

    #[test]
    fn resample_linear_preserves_length_ratio() {
        let input: Vec<f32> = (0..320).map(|i| i as f32).collect();
        let out = resample_linear(&input, 480);
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn resample_linear_handles_empty() {
        assert!(resample_linear(&[], 10).is_empty());
    }

    #[test]
    fn dither_stays_within_clamp_bounds() {
        let samples = vec![i16::MAX as f32, i16::MIN as f32, 0.0];
        let dithered = apply_tpdf_dither(&samples);
        for s in dithered {
            assert!(s >= i16::MIN as f32 && s <= i16::MAX as f32);
        }
    }

    #[test]
    fn low_pass_filter_does_not_change_length() {
        let input = vec![0.0_f32; 100];
        let out = low_pass_filter(&input);
        assert_eq!(out.len(), input.len());
    }
}
