//! Event types for the SFP event system
//!
//! Provides the engine event definitions and the `EventBus` used to fan them
//! out to any number of listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a fragment left the engine without being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Payload missing, too short, badly encoded, or decoded audio out of range
    Invalid,
    /// Container decode and raw PCM fallback both failed
    Undecodable,
    /// Render failed on every allowed attempt
    RetriesExhausted,
    /// Arrived after playback had already moved past its index
    Late,
    /// Evicted from a full reorder queue
    Evicted,
}

/// Why session state was cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionResetReason {
    /// A fragment arrived carrying a different session id
    NewSession,
    /// Index 0 recurred on the current session after the overlap gap
    Overlap,
    /// The session outlived the session timeout
    Timeout,
    /// Caller started a new conversational turn
    NewTurn,
    /// Caller requested a hard stop
    Interrupt,
    /// Watchdog recovered stuck output
    Watchdog,
}

/// Readiness rule that allowed a playback pass to begin
///
/// Listed in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessRule {
    /// Every fragment of a short response is buffered
    CompleteShortResponse,
    /// A near-contiguous run starts at the lowest buffered index
    ConsecutiveRun,
    /// Fragments have waited past the ready-wait threshold
    WaitElapsed,
    /// Enough fragments are buffered to flush regardless of gaps
    AggressiveFlush,
    /// Fragments are arriving in quick succession
    Streaming,
    /// The lowest buffered index continues the response being played
    Continuation,
    /// A fragment has waited past the stall threshold
    StallFlush,
}

impl ReadinessRule {
    /// Stable label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessRule::CompleteShortResponse => "complete_short_response",
            ReadinessRule::ConsecutiveRun => "consecutive_run",
            ReadinessRule::WaitElapsed => "wait_elapsed",
            ReadinessRule::AggressiveFlush => "aggressive_flush",
            ReadinessRule::Streaming => "streaming",
            ReadinessRule::Continuation => "continuation",
            ReadinessRule::StallFlush => "stall_flush",
        }
    }
}

impl std::fmt::Display for ReadinessRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine event types
///
/// Events are emitted to every registered observer and can be serialized for
/// transmission or logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Fragment accepted into the reorder queue
    FragmentAccepted {
        session_id: String,
        index: u32,
        total: u32,
        queue_length: usize,
        timestamp: DateTime<Utc>,
    },

    /// Fragment already seen for this session; ignored
    DuplicateIgnored {
        session_id: String,
        index: u32,
        timestamp: DateTime<Utc>,
    },

    /// Fragment discarded without being rendered
    FragmentDropped {
        session_id: String,
        index: u32,
        reason: DropReason,
        timestamp: DateTime<Utc>,
    },

    /// A playback pass began
    PlaybackStarted {
        session_id: String,
        rule: ReadinessRule,
        queue_length: usize,
        timestamp: DateTime<Utc>,
    },

    /// A fragment started rendering
    RenderStarted {
        render_id: Uuid,
        session_id: String,
        index: u32,
        playback_rate: f32,
        volume: f32,
        duration_ms: u64,
        /// Transcript text delivered alongside the fragment, if any
        transcript: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A fragment finished rendering
    RenderCompleted {
        render_id: Uuid,
        session_id: String,
        index: u32,
        /// True when the forced completion timeout fired instead of the
        /// natural end-of-output notification
        forced: bool,
        timestamp: DateTime<Utc>,
    },

    /// A render attempt failed
    RenderFailed {
        session_id: String,
        index: u32,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Session state was cleared
    SessionReset {
        session_id: Option<String>,
        reason: SessionResetReason,
        timestamp: DateTime<Utc>,
    },

    /// Caller issued a hard stop
    Interrupted {
        stopped_output: bool,
        cleared_fragments: usize,
        timestamp: DateTime<Utc>,
    },

    /// Watchdog force-cleared stuck output
    WatchdogRecovery {
        stopped_outputs: usize,
        silence_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Returns the event type as a string (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::FragmentAccepted { .. } => "FragmentAccepted",
            EngineEvent::DuplicateIgnored { .. } => "DuplicateIgnored",
            EngineEvent::FragmentDropped { .. } => "FragmentDropped",
            EngineEvent::PlaybackStarted { .. } => "PlaybackStarted",
            EngineEvent::RenderStarted { .. } => "RenderStarted",
            EngineEvent::RenderCompleted { .. } => "RenderCompleted",
            EngineEvent::RenderFailed { .. } => "RenderFailed",
            EngineEvent::SessionReset { .. } => "SessionReset",
            EngineEvent::Interrupted { .. } => "Interrupted",
            EngineEvent::WatchdogRecovery { .. } => "WatchdogRecovery",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Event distribution bus built on `tokio::sync::broadcast`
///
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
