//! Playback cursor: what is playing now and how far the response has got

use crate::audio::OutputControl;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// The single output currently rendering
pub struct ActiveOutput {
    pub render_id: Uuid,
    pub session_id: String,
    pub index: u32,
    pub control: Arc<dyn OutputControl>,
    pub started_at: Instant,
    /// When the output should end at its playback rate
    pub expected_end: Instant,
}

impl std::fmt::Debug for ActiveOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveOutput")
            .field("render_id", &self.render_id)
            .field("session_id", &self.session_id)
            .field("index", &self.index)
            .field("started_at", &self.started_at)
            .field("expected_end", &self.expected_end)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct PlaybackCursor {
    /// A playback pass owns the queue
    pub pass_active: bool,
    pub active_output: Option<ActiveOutput>,
    /// Failed render attempts per fragment index
    retry_counts: HashMap<u32, u32>,
    /// Highest index rendered for the current response
    last_rendered: Option<u32>,
}

impl PlaybackCursor {
    pub fn last_rendered(&self) -> Option<u32> {
        self.last_rendered
    }

    /// Index that would continue the response without a gap
    pub fn next_expected(&self) -> Option<u32> {
        self.last_rendered.map(|i| i.saturating_add(1))
    }

    /// Playback has already moved past `index`
    pub fn is_late(&self, index: u32) -> bool {
        self.last_rendered.is_some_and(|last| index <= last)
    }

    pub fn record_rendered(&mut self, index: u32) {
        self.last_rendered = Some(self.last_rendered.map_or(index, |last| last.max(index)));
        self.retry_counts.remove(&index);
    }

    /// Count a failed attempt; returns attempts so far
    pub fn record_attempt_failure(&mut self, index: u32) -> u32 {
        let attempts = self.retry_counts.entry(index).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn forget_retries(&mut self, index: u32) {
        self.retry_counts.remove(&index);
    }

    pub fn active_output_count(&self) -> usize {
        usize::from(self.active_output.is_some())
    }

    /// Stop and forget the active output. Returns true if one was running.
    pub fn stop_output(&mut self) -> bool {
        match self.active_output.take() {
            Some(output) => {
                output.control.stop();
                true
            }
            None => false,
        }
    }

    /// Forget response progress; the pass flag and active output are kept
    pub fn reset_progress(&mut self) {
        self.retry_counts.clear();
        self.last_rendered = None;
    }

    /// Time left on the active output, if any
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.active_output
            .as_ref()
            .map(|output| output.expected_end.saturating_duration_since(now))
    }
}
