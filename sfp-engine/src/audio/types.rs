//! Decoded audio data
//!
//! Samples are planar f32 in `[-1.0, 1.0]`, one `Vec` per channel.

use std::time::Duration;

/// Sample buffer produced by decoding one fragment
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Planar samples: `channels[c][frame]`
    pub channels: Vec<Vec<f32>>,

    /// Sample rate of the decoded data
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Single-channel buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Duration in fractional milliseconds
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms() / 1000.0)
    }

    /// Root-mean-square level across all channels
    pub fn rms(&self) -> f32 {
        let count: usize = self.channels.iter().map(Vec::len).sum();
        if count == 0 {
            return 0.0;
        }
        let sum_sq: f64 = self
            .channels
            .iter()
            .flatten()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum();
        (sum_sq / count as f64).sqrt() as f32
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0f32, |peak, &s| peak.max(s.abs()))
    }

    /// Interleave channels: `[c0, c1, c0, c1, ...]`
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let channels = self.channel_count();
        let mut out = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for channel in &self.channels {
                out.push(channel.get(frame).copied().unwrap_or(0.0));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_frames() {
        let audio = DecodedAudio::mono(vec![0.0; 24_000], 48_000);
        assert_eq!(audio.frames(), 24_000);
        assert!((audio.duration_ms() - 500.0).abs() < 1e-9);
        assert_eq!(audio.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_rms_and_peak() {
        let audio = DecodedAudio::mono(vec![0.5, -0.5, 0.5, -0.5], 8000);
        assert!((audio.rms() - 0.5).abs() < 1e-6);
        assert!((audio.peak() - 0.5).abs() < 1e-6);

        let silent = DecodedAudio::mono(Vec::new(), 8000);
        assert_eq!(silent.rms(), 0.0);
        assert_eq!(silent.peak(), 0.0);
    }

    #[test]
    fn test_interleave_stereo() {
        let audio = DecodedAudio::new(vec![vec![1.0, 2.0], vec![-1.0, -2.0]], 44_100);
        assert_eq!(audio.interleaved(), vec![1.0, -1.0, 2.0, -2.0]);
    }
}
