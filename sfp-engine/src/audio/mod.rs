//! Audio format detection, decoding and output

pub mod decoder;
pub mod format;
pub mod sink;
pub mod types;

#[cfg(feature = "device-output")]
pub mod output;
#[cfg(feature = "device-output")]
pub mod resampler;

pub use decoder::{decode_fragment, AudioDecoder, DecodeLimits, SymphoniaDecoder};
pub use format::AudioFormat;
pub use sink::{OutputControl, OutputHandle, RenderRequest, RenderSink, SimulatedSink};
pub use types::DecodedAudio;
