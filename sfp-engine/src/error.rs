//! Error types for sfp-engine
//!
//! One variant per failure class the engine distinguishes. Every class has a
//! local recovery path; none of them is fatal to the engine.

use thiserror::Error;

/// Main error type for the fragment engine
#[derive(Error, Debug)]
pub enum Error {
    /// Payload absent, too short, malformed encoding, or decoded audio with
    /// an implausible duration. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A recognized container failed to decode and the raw PCM fallback
    /// also failed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The render primitive failed to start or run output
    #[error("Playback error: {0}")]
    Playback(String),

    /// Session inactivity timeout, overlap, or stuck output
    #[error("Session error: {0}")]
    Session(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from shared utilities (config loading, IO)
    #[error(transparent)]
    Common(#[from] sfp_common::Error),
}

impl Error {
    /// Whether the failed operation may succeed if attempted again.
    ///
    /// Only render failures are considered transient; malformed or
    /// undecodable input will not self-correct.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Playback(_))
    }
}

/// Convenience Result type using sfp-engine Error
pub type Result<T> = std::result::Result<T, Error>;
