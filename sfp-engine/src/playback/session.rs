//! Response session tracking
//!
//! Decides whether an arriving `(session_id, index)` is new work, a
//! duplicate, or the start of a new response that needs the stream reset.

use crate::config::SessionConfig;
use sfp_common::events::SessionResetReason;
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, info};

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    /// Timed out; state has been cleared and the next arrival starts over
    Stale,
}

/// One spoken response being received
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub start_time: Instant,
    pub last_activity: Instant,
    pub seen: HashSet<u32>,
    pub status: SessionStatus,
}

impl Session {
    fn new(id: &str, now: Instant) -> Self {
        Self {
            id: id.to_string(),
            start_time: now,
            last_activity: now,
            seen: HashSet::new(),
            status: SessionStatus::Active,
        }
    }
}

/// Outcome of presenting a fragment to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New work. When `reset` is set the caller must clear buffered
    /// fragments of the previous response before queuing this one.
    Accept { reset: Option<SessionResetReason> },
    /// Already seen for this session
    Duplicate,
    /// Index 0 repeated too soon after the last arrival to be a new response
    SpuriousOverlap,
}

/// Tracks the current session and the indices seen for it
#[derive(Debug, Default)]
pub struct SessionTracker {
    current: Option<Session>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.id.as_str())
    }

    /// Classify an arrival and record it
    pub fn admit(
        &mut self,
        session_id: &str,
        index: u32,
        now: Instant,
        config: &SessionConfig,
    ) -> Admission {
        let admission = match self.current.as_mut() {
            None => {
                debug!("Starting session {}", session_id);
                self.current = Some(Session::new(session_id, now));
                Admission::Accept { reset: None }
            }
            Some(session) if session.id != session_id => {
                info!("New session {} replaces {}", session_id, session.id);
                *session = Session::new(session_id, now);
                Admission::Accept {
                    reset: Some(SessionResetReason::NewSession),
                }
            }
            Some(session) if session.status == SessionStatus::Stale => {
                debug!("Session {} restarted after going stale", session_id);
                *session = Session::new(session_id, now);
                Admission::Accept { reset: None }
            }
            Some(session) => {
                let age = now.saturating_duration_since(session.start_time);
                let idle = now.saturating_duration_since(session.last_activity);

                if age > config.session_timeout() && !session.seen.is_empty() {
                    info!(
                        "Session {} timed out after {}ms, starting over",
                        session_id,
                        age.as_millis()
                    );
                    *session = Session::new(session_id, now);
                    Admission::Accept {
                        reset: Some(SessionResetReason::Timeout),
                    }
                } else if index == 0 && config.overlap_detection && session.seen.contains(&0) {
                    if idle > config.overlap_reset_gap() {
                        info!(
                            "Fragment 0 of {} repeated after {}ms idle, treating as new response",
                            session_id,
                            idle.as_millis()
                        );
                        *session = Session::new(session_id, now);
                        Admission::Accept {
                            reset: Some(SessionResetReason::Overlap),
                        }
                    } else {
                        Admission::SpuriousOverlap
                    }
                } else if session.seen.contains(&index) {
                    Admission::Duplicate
                } else {
                    Admission::Accept { reset: None }
                }
            }
        };

        if let Some(session) = self.current.as_mut() {
            session.seen.insert(index);
            session.last_activity = now;
        }
        admission
    }

    /// Mark the session stale once it has outlived the timeout.
    /// Returns true when it just went stale.
    pub fn expire(&mut self, now: Instant, config: &SessionConfig) -> bool {
        match self.current.as_mut() {
            Some(session)
                if session.status == SessionStatus::Active
                    && !session.seen.is_empty()
                    && now.saturating_duration_since(session.start_time)
                        > config.session_timeout() =>
            {
                session.status = SessionStatus::Stale;
                session.seen.clear();
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
