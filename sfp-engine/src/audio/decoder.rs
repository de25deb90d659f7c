//! Fragment decoding with raw PCM fallback
//!
//! Container payloads (WAV, Ogg, MP3) go through the host decoder first. When
//! that fails, or when no container header is recognized, the bytes are read
//! as little-endian 16-bit signed mono PCM at the output device's rate.
//! Whatever comes out must have a plausible duration or the fragment is
//! rejected as corrupt.

use crate::audio::{AudioFormat, DecodedAudio};
use crate::error::{Error, Result};
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Host container decoder (container bytes → sample buffer)
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, format: AudioFormat, bytes: &[u8]) -> Result<DecodedAudio>;
}

/// Bounds applied to every decoded fragment
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    /// Rate assumed for raw PCM payloads (the output device's native rate)
    pub device_sample_rate: u32,
    pub min_duration: Duration,
    pub max_duration: Duration,
}

/// Detect, decode and validate one fragment payload.
///
/// # Errors
/// - `Error::Validation` when the payload cannot be read as audio at all or
///   the result has an implausible duration
/// - `Error::Decode` when a recognized container failed and the raw PCM
///   fallback was rejected as well
pub fn decode_fragment(
    decoder: &dyn AudioDecoder,
    payload: &[u8],
    limits: &DecodeLimits,
) -> Result<(AudioFormat, DecodedAudio)> {
    let format = AudioFormat::detect(payload);

    if format.is_container() {
        match decoder.decode(format, payload) {
            Ok(audio) => {
                validate_duration(&audio, limits)?;
                return Ok((format, audio));
            }
            Err(e) => {
                warn!("{} container decode failed, trying raw PCM: {}", format, e);
                let audio = decode_raw_pcm(payload, limits.device_sample_rate)
                    .and_then(|audio| validate_duration(&audio, limits).map(|_| audio))
                    .map_err(|fallback| {
                        Error::Decode(format!(
                            "{} decode failed ({}) and raw PCM fallback rejected ({})",
                            format, e, fallback
                        ))
                    })?;
                return Ok((format, audio));
            }
        }
    }

    let audio = decode_raw_pcm(payload, limits.device_sample_rate)?;
    validate_duration(&audio, limits)?;
    Ok((format, audio))
}

/// Interpret bytes as little-endian i16 mono PCM normalized to `[-1.0, 1.0]`.
///
/// A trailing odd byte is ignored.
pub fn decode_raw_pcm(bytes: &[u8], sample_rate: u32) -> Result<DecodedAudio> {
    if sample_rate == 0 {
        return Err(Error::Validation("raw PCM needs a non-zero sample rate".into()));
    }
    if bytes.len() < 2 {
        return Err(Error::Validation(format!(
            "raw PCM payload too short: {} bytes",
            bytes.len()
        )));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    Ok(DecodedAudio::mono(samples, sample_rate))
}

fn validate_duration(audio: &DecodedAudio, limits: &DecodeLimits) -> Result<()> {
    let duration = audio.duration();
    if duration < limits.min_duration || duration > limits.max_duration {
        return Err(Error::Validation(format!(
            "decoded duration {:.1}ms outside [{}ms, {}ms]",
            audio.duration_ms(),
            limits.min_duration.as_millis(),
            limits.max_duration.as_millis()
        )));
    }
    Ok(())
}

/// In-memory container decoder using symphonia
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, format: AudioFormat, bytes: &[u8]) -> Result<DecodedAudio> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

        // Create a hint to help the format registry guess the format
        let mut hint = Hint::new();
        if let Some(ext) = format.extension() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe {} payload: {}", format, e)))?;

        let mut reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut channels: Vec<Vec<f32>> = Vec::new();

        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(Error::Decode(format!("Error reading packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let channel_count = spec.channels.count();
                    if channel_count == 0 {
                        continue;
                    }
                    sample_rate.get_or_insert(spec.rate);

                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);

                    if channels.is_empty() {
                        channels = vec![Vec::new(); channel_count];
                    }
                    for frame in buf.samples().chunks_exact(channel_count) {
                        for (channel, &sample) in channels.iter_mut().zip(frame) {
                            channel.push(sample);
                        }
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet: skip it, keep the rest
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(Error::Decode(format!("Decode failed: {}", e))),
            }
        }

        let sample_rate =
            sample_rate.ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;

        if channels.iter().all(Vec::is_empty) {
            return Err(Error::Decode(format!("{} payload produced no samples", format)));
        }

        let audio = DecodedAudio::new(channels, sample_rate);
        debug!(
            "Decoded {} payload: {} frames, {} channels at {}Hz",
            format,
            audio.frames(),
            audio.channel_count(),
            sample_rate
        );
        Ok(audio)
    }
}
