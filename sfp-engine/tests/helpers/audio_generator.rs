//! Audio payload generation for tests
//!
//! Payloads are deterministic so durations and levels are known exactly.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;

/// Mono 16-bit little-endian PCM: a 220 Hz tone at amplitude 0.3
pub fn pcm_payload(duration_ms: u32, sample_rate: u32) -> Vec<u8> {
    let frames = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let mut bytes = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = (0.3 * (2.0 * PI * 220.0 * t).sin() * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// In-memory mono 16-bit WAV file with a 440 Hz tone at amplitude 0.5
pub fn wav_payload(duration_ms: u32, sample_rate: u32) -> Vec<u8> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).expect("wav writer");
        let frames = sample_rate as u64 * duration_ms as u64 / 1000;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = (0.5 * (2.0 * PI * 440.0 * t).sin() * i16::MAX as f32) as i16;
            writer.write_sample(sample).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}
