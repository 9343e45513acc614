//! Audio Resampler & Filters
//!
//! 16 kHz <-> 24 kHz conversion between the gateway's wire format and the
//! speech services' expected sample rate, with an anti-alias low-pass filter
//! on the downsampling path and TPDF dither on the upsampling path.

pub mod resampler;

use crate::types::{FRAME_BYTES_16K, FRAME_BYTES_24K};

/// Decodes a little-endian 16-bit PCM byte buffer into `f32` samples.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32)
        .collect()
}

/// Encodes `f32` samples (already clamped to the i16 range) into
/// little-endian 16-bit PCM bytes. Handles an odd trailing byte by simply
/// dropping it; callers only ever pass even-length input in practice.
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

/// Pads a PCM byte buffer up to `len` with silence, leaving longer buffers
/// untouched. Used on the final outbound frame of a response, which may be
/// shorter than 640 bytes.
pub fn pad_to(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    if bytes.len() < len {
        bytes.resize(len, 0);
    }
    bytes
}

/// 16 kHz -> 24 kHz: linear interpolation at a 3:2 ratio plus TPDF dither.
pub fn upsample_16_to_24(pcm16: &[u8]) -> Vec<u8> {
    if pcm16.is_empty() {
        return Vec::new();
    }
    let samples = bytes_to_samples(pcm16);
    let out_len = samples.len() * 3 / 2;
    let resampled = resampler::resample_linear(&samples, out_len);
    let dithered = resampler::apply_tpdf_dither(&resampled);
    samples_to_bytes(&dithered)
}

/// 24 kHz -> 16 kHz: anti-alias low-pass then linear decimation at a 3:2
/// ratio (2 output samples for every 3 input samples).
pub fn downsample_24_to_16(pcm24: &[u8]) -> Vec<u8> {
    if pcm24.is_empty() {
        return Vec::new();
    }
    let samples = bytes_to_samples(pcm24);
    let filtered = resampler::low_pass_filter(&samples);
    let out_len = filtered.len() * 2 / 3;
    let decimated = resampler::resample_linear(&filtered, out_len);
    samples_to_bytes(&decimated)
}
