//! Audio fragments and the transport delivery shape they are built from

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;

/// One unit of a segmented speech response
///
/// Identified by `(session_id, index)`; immutable once created.
#[derive(Debug, Clone)]
pub struct Fragment {
    session_id: Arc<str>,
    index: u32,
    total: u32,
    payload: Arc<[u8]>,
    arrival: Instant,
    transcript: Option<Arc<str>>,
}

impl Fragment {
    /// Create a fragment, enforcing `0 <= index < total`
    pub fn new(
        session_id: impl Into<Arc<str>>,
        index: u32,
        total: u32,
        payload: impl Into<Arc<[u8]>>,
        arrival: Instant,
    ) -> Result<Self> {
        let session_id = session_id.into();
        if total == 0 {
            return Err(Error::Validation(format!(
                "session {session_id} fragment {index}: total fragment count is zero"
            )));
        }
        if index >= total {
            return Err(Error::Validation(format!(
                "session {session_id} fragment {index}: index out of range for total {total}"
            )));
        }

        Ok(Self {
            session_id,
            index,
            total,
            payload: payload.into(),
            arrival,
            transcript: None,
        })
    }

    /// Attach the transcript text delivered alongside the audio
    pub fn with_transcript(mut self, transcript: impl Into<Arc<str>>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    /// Build a fragment from a transport delivery, decoding the base64 payload
    pub fn from_delivery(delivery: &Delivery, arrival: Instant) -> Result<Self> {
        let text = delivery.payload.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(Error::Validation(format!(
                "session {} fragment {}: payload absent",
                delivery.session_id, delivery.fragment_index
            )));
        }

        let bytes = STANDARD.decode(text).map_err(|e| {
            Error::Validation(format!(
                "session {} fragment {}: malformed payload encoding: {}",
                delivery.session_id, delivery.fragment_index, e
            ))
        })?;

        let fragment = Self::new(
            delivery.session_id.as_str(),
            delivery.fragment_index,
            delivery.total_fragments,
            bytes,
            arrival,
        )?;

        Ok(match delivery.transcript.as_deref() {
            Some(t) if !t.is_empty() => fragment.with_transcript(t),
            _ => fragment,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn arrival(&self) -> Instant {
        self.arrival
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }
}

/// Fragment as handed over by the transport collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct Delivery {
    pub session_id: String,
    pub fragment_index: u32,
    pub total_fragments: u32,
    /// Base64-encoded audio bytes
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}
