//! Container format detection from leading bytes

use serde::Serialize;

/// Container format of a fragment payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Ogg,
    Mp3,
    /// No recognizable header; treated as raw PCM
    Unknown,
}

impl AudioFormat {
    /// Classify payload bytes.
    ///
    /// Checked in order: RIFF/WAVE, OggS, MP3 (ID3 tag or frame sync).
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return AudioFormat::Wav;
        }
        if bytes.len() >= 4 && &bytes[0..4] == b"OggS" {
            return AudioFormat::Ogg;
        }
        if bytes.len() >= 3 && &bytes[0..3] == b"ID3" {
            return AudioFormat::Mp3;
        }
        // Frame sync: 11 set bits
        if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
            return AudioFormat::Mp3;
        }
        AudioFormat::Unknown
    }

    /// File extension hint for the container probe
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            AudioFormat::Wav => Some("wav"),
            AudioFormat::Ogg => Some("ogg"),
            AudioFormat::Mp3 => Some("mp3"),
            AudioFormat::Unknown => None,
        }
    }

    /// Whether a container decoder should be tried before raw PCM
    pub fn is_container(&self) -> bool {
        !matches!(self, AudioFormat::Unknown)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
