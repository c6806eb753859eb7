//! Post-mix processing: optional resampling and peak limiting, then
//! conversion to interleaved 16-bit PCM.

use anyhow::Result;

/// Converts mixed frames to a fixed output rate.
pub trait Resampler: Send {
    fn output_rate(&self) -> u32;

    /// Resamples planar `channels` from `input_rate`. May return fewer or
    /// more samples per channel than it was given.
    fn process(&mut self, input_rate: u32, channels: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>>;
}

/// Keeps mixed output below full scale.
pub trait Limiter: Send {
    fn process(&mut self, sample_rate: u32, channels: &mut [Vec<f32>]);
}

/// `clamp(round(x * 32768))`.
pub fn quantize(x: f32) -> i16 {
    (x * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Writes planar `channels` into `out` as interleaved samples. Returns the
/// samples per channel written.
pub fn interleave(channels: &[Vec<f32>], out: &mut [i16]) -> usize {
    let samples = channels.iter().map(Vec::len).min().unwrap_or(0);
    let width = channels.len();

    for (i, frame) in out.chunks_exact_mut(width.max(1)).take(samples).enumerate() {
        for (o, channel) in frame.iter_mut().zip(channels) {
            *o = quantize(channel[i]);
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_rounds_and_clamps() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 16384);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
        assert_eq!(quantize(-2.0), -32768);
        assert_eq!(quantize(1.0 / 65536.0), 1);
    }

    #[test]
    fn interleave_is_sample_major() {
        let channels = vec![vec![0.5, -0.5], vec![0.25, 1.5]];
        let mut out = [0i16; 4];

        assert_eq!(interleave(&channels, &mut out), 2);
        assert_eq!(out, [16384, 8192, -16384, 32767]);
    }
}
