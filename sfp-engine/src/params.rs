//! Adaptive playback parameters
//!
//! Rate and inter-fragment delay are a pure function of the detected format,
//! the fragment duration and the response length. Volume additionally looks
//! at the decoded signal level.

use crate::audio::{AudioFormat, DecodedAudio};
use serde::Serialize;

/// Fragments at least this long count as large
pub const LARGE_FRAGMENT_MS: f64 = 2000.0;

/// Responses with at most this many fragments count as short
pub const SHORT_RESPONSE_MAX: u32 = 3;

/// Responses with more than this many fragments count as long
pub const LONG_RESPONSE_MIN: u32 = 10;

/// RMS below this gets the quiet boost
const QUIET_RMS: f32 = 0.1;
const QUIET_BOOST: f32 = 1.3;

/// Peak/RMS above this looks like speech dynamics
const SPEECH_CREST_FACTOR: f32 = 3.0;
const SPEECH_BOOST: f32 = 1.1;

/// Per-fragment render parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdaptiveParams {
    pub playback_rate: f32,
    pub volume: f32,
    pub inter_fragment_delay_ms: f64,
}

/// Base playback rate per container format
pub fn base_rate(format: AudioFormat) -> f32 {
    match format {
        AudioFormat::Wav => 0.55,
        AudioFormat::Mp3 => 0.50,
        AudioFormat::Ogg => 0.60,
        AudioFormat::Unknown => 0.50,
    }
}

/// Rate and delay for a fragment.
///
/// Adjustments apply in order (large fragment, short response, long
/// response), each with its own cap or floor.
pub fn compute_timing(
    format: AudioFormat,
    fragment_duration_ms: f64,
    total_fragments: u32,
    base_delay_ms: f64,
) -> (f32, f64) {
    let mut rate = base_rate(format);
    let mut delay = base_delay_ms;

    let is_large_fragment = fragment_duration_ms >= LARGE_FRAGMENT_MS;
    let is_short_response = total_fragments <= SHORT_RESPONSE_MAX;
    let is_long_response = total_fragments > LONG_RESPONSE_MIN;

    if is_large_fragment {
        rate = (rate * 1.10).min(0.65);
        delay = (delay * 0.5).max(2.0);
    }
    if is_short_response {
        rate = (rate * 1.05).min(0.70);
        delay = (delay * 0.8).max(1.0);
    }
    if is_long_response {
        rate = (rate * 0.95).max(0.40);
        delay = (delay * 1.2).min(10.0);
    }

    (rate, delay)
}

/// Volume for a decoded fragment, clamped to `[0, 1]`
pub fn compute_volume(base_volume: f32, audio: &DecodedAudio) -> f32 {
    let rms = audio.rms();
    let peak = audio.peak();
    let mut volume = base_volume;

    if rms < QUIET_RMS {
        volume *= QUIET_BOOST;
    }
    if rms > 0.0 && peak / rms > SPEECH_CREST_FACTOR {
        volume *= SPEECH_BOOST;
    }

    volume.clamp(0.0, 1.0)
}

/// Full parameter set for a decoded fragment
pub fn compute(
    format: AudioFormat,
    audio: &DecodedAudio,
    total_fragments: u32,
    base_volume: f32,
    base_delay_ms: f64,
) -> AdaptiveParams {
    let (playback_rate, inter_fragment_delay_ms) =
        compute_timing(format, audio.duration_ms(), total_fragments, base_delay_ms);

    AdaptiveParams {
        playback_rate,
        volume: compute_volume(base_volume, audio),
        inter_fragment_delay_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_base_rates() {
        // 5 fragments, 500ms: neither short, long nor large
        assert_eq!(compute_timing(AudioFormat::Wav, 500.0, 5, 5.0), (0.55, 5.0));
        assert_eq!(compute_timing(AudioFormat::Mp3, 500.0, 5, 5.0).0, 0.50);
        assert_eq!(compute_timing(AudioFormat::Ogg, 500.0, 5, 5.0).0, 0.60);
        assert_eq!(compute_timing(AudioFormat::Unknown, 500.0, 5, 5.0).0, 0.50);
    }

    #[test]
    fn test_large_fragment_caps_rate() {
        let (rate, delay) = compute_timing(AudioFormat::Ogg, 2000.0, 5, 5.0);
        // 0.60 * 1.10 = 0.66, capped at 0.65
        assert!(approx(rate as f64, 0.65));
        assert!(approx(delay, 2.5));

        let (_, delay) = compute_timing(AudioFormat::Mp3, 3000.0, 5, 3.0);
        // 1.5 floored at 2
        assert!(approx(delay, 2.0));
    }

    #[test]
    fn test_short_response_adjustment() {
        let (rate, delay) = compute_timing(AudioFormat::Mp3, 500.0, 3, 5.0);
        assert!(approx(rate as f64, 0.525));
        assert!(approx(delay, 4.0));
    }

    #[test]
    fn test_large_and_short_compound_in_order() {
        let (rate, delay) = compute_timing(AudioFormat::Ogg, 2500.0, 2, 5.0);
        // 0.60 -> 0.65 (cap) -> 0.6825 -> 0.6825 (cap 0.70)
        assert!(approx(rate as f64, 0.6825));
        // 5 -> 2.5 -> 2.0
        assert!(approx(delay, 2.0));
    }

    #[test]
    fn test_long_response_adjustment() {
        let (rate, delay) = compute_timing(AudioFormat::Wav, 500.0, 11, 5.0);
        assert!(approx(rate as f64, 0.5225));
        assert!(approx(delay, 6.0));

        let (_, delay) = compute_timing(AudioFormat::Wav, 500.0, 11, 9.0);
        // 10.8 capped at 10
        assert!(approx(delay, 10.0));

        // Exactly 10 fragments is not long
        assert_eq!(compute_timing(AudioFormat::Wav, 500.0, 10, 5.0), (0.55, 5.0));
    }

    #[test]
    fn test_quiet_audio_is_boosted() {
        // Constant low level: rms = peak = 0.05, crest factor 1
        let audio = DecodedAudio::mono(vec![0.05; 100], 8000);
        assert!(approx(compute_volume(0.5, &audio) as f64, 0.65));
    }

    #[test]
    fn test_speech_dynamics_boost() {
        // One loud sample among quiet ones: high crest factor, rms above 0.1
        let mut samples = vec![0.1f32; 99];
        samples.push(1.0);
        let audio = DecodedAudio::mono(samples, 8000);
        assert!(audio.rms() >= 0.1);
        assert!(audio.peak() / audio.rms() > 3.0);
        assert!(approx(compute_volume(0.5, &audio) as f64, 0.55));
    }

    #[test]
    fn test_volume_is_clamped() {
        let audio = DecodedAudio::mono(vec![0.01; 100], 8000);
        assert_eq!(compute_volume(0.9, &audio), 1.0);
    }

    #[test]
    fn test_silence_skips_crest_factor() {
        let audio = DecodedAudio::mono(vec![0.0; 100], 8000);
        assert!(approx(compute_volume(0.5, &audio) as f64, 0.65));
    }

    #[test]
    fn test_compute_uses_decoded_duration() {
        // 2s of audio at 1kHz -> large fragment
        let audio = DecodedAudio::mono(vec![0.3; 2000], 1000);
        let params = compute(AudioFormat::Mp3, &audio, 5, 0.8, 5.0);
        assert!(approx(params.playback_rate as f64, 0.55));
        assert!(approx(params.inter_fragment_delay_ms, 2.5));
    }
}
