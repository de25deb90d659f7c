//! Engine counters and the derived health score

use serde::Serialize;

/// Point-in-time view of engine health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineMetrics {
    /// Fragments the playback driver took off the queue (rendered or failed)
    pub fragments_processed: u64,
    pub fragments_succeeded: u64,
    pub fragments_failed: u64,
    /// Rejected at submission (payload too short or malformed)
    pub fragments_dropped_invalid: u64,
    pub duplicates_ignored: u64,
    /// Arrived after playback had passed their index
    pub fragments_late: u64,
    /// Pushed out of a full reorder queue
    pub fragments_evicted: u64,
    /// `succeeded / processed`, or 1.0 before anything was processed
    pub success_rate: f64,
    pub avg_decode_time_ms: f64,
    pub active_output_count: usize,
    pub queue_length: usize,
    /// 0-100; see [`health_score`]
    pub session_health_score: f64,
    pub session_resets: u64,
    pub watchdog_recoveries: u64,
    pub forced_completions: u64,
}

/// `clamp(100 * success_rate - 15 * watchdog - 5 * resets - 10 * forced, 0, 100)`
///
/// The penalty counts are those of the current turn.
pub fn health_score(
    success_rate: f64,
    watchdog_recoveries: u64,
    abnormal_resets: u64,
    forced_completions: u64,
) -> f64 {
    let score = 100.0 * success_rate
        - 15.0 * watchdog_recoveries as f64
        - 5.0 * abnormal_resets as f64
        - 10.0 * forced_completions as f64;
    score.clamp(0.0, 100.0)
}

/// Health penalties accumulated since the last hard stop
#[derive(Debug, Clone, Copy, Default)]
struct TurnPenalties {
    watchdog_recoveries: u64,
    abnormal_resets: u64,
    forced_completions: u64,
}

/// Mutable counters owned by the engine state
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    processed: u64,
    succeeded: u64,
    failed: u64,
    dropped_invalid: u64,
    duplicates: u64,
    late: u64,
    evicted: u64,
    decode_time_total_ms: f64,
    decode_count: u64,
    session_resets: u64,
    watchdog_recoveries: u64,
    forced_completions: u64,
    turn: TurnPenalties,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    pub fn record_invalid(&mut self) {
        self.dropped_invalid += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn record_late(&mut self) {
        self.late += 1;
    }

    pub fn record_evicted(&mut self) {
        self.evicted += 1;
    }

    pub fn record_decode_time(&mut self, millis: f64) {
        self.decode_time_total_ms += millis;
        self.decode_count += 1;
    }

    /// Count a session reset; overlap and timeout resets also cost health
    pub fn record_session_reset(&mut self, abnormal: bool) {
        self.session_resets += 1;
        if abnormal {
            self.turn.abnormal_resets += 1;
        }
    }

    pub fn record_watchdog_recovery(&mut self) {
        self.watchdog_recoveries += 1;
        self.turn.watchdog_recoveries += 1;
    }

    pub fn record_forced_completion(&mut self) {
        self.forced_completions += 1;
        self.turn.forced_completions += 1;
    }

    /// Forget health penalties; lifetime counters are kept
    pub fn clear_turn_penalties(&mut self) {
        self.turn = TurnPenalties::default();
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.processed as f64
        }
    }

    pub fn snapshot(&self, active_output_count: usize, queue_length: usize) -> EngineMetrics {
        let success_rate = self.success_rate();
        let avg_decode_time_ms = if self.decode_count == 0 {
            0.0
        } else {
            self.decode_time_total_ms / self.decode_count as f64
        };

        EngineMetrics {
            fragments_processed: self.processed,
            fragments_succeeded: self.succeeded,
            fragments_failed: self.failed,
            fragments_dropped_invalid: self.dropped_invalid,
            duplicates_ignored: self.duplicates,
            fragments_late: self.late,
            fragments_evicted: self.evicted,
            success_rate,
            avg_decode_time_ms,
            active_output_count,
            queue_length,
            session_health_score: health_score(
                success_rate,
                self.turn.watchdog_recoveries,
                self.turn.abnormal_resets,
                self.turn.forced_completions,
            ),
            session_resets: self.session_resets,
            watchdog_recoveries: self.watchdog_recoveries,
            forced_completions: self.forced_completions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_engine_is_healthy() {
        let metrics = MetricsRecorder::new().snapshot(0, 0);
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.session_health_score, 100.0);
        assert_eq!(metrics.avg_decode_time_ms, 0.0);
    }

    #[test]
    fn test_success_rate_and_decode_average() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_success();
        recorder.record_success();
        recorder.record_success();
        recorder.record_failure();
        recorder.record_decode_time(2.0);
        recorder.record_decode_time(4.0);

        let metrics = recorder.snapshot(1, 3);
        assert_eq!(metrics.fragments_processed, 4);
        assert_eq!(metrics.success_rate, 0.75);
        assert_eq!(metrics.avg_decode_time_ms, 3.0);
        assert_eq!(metrics.session_health_score, 75.0);
        assert_eq!(metrics.active_output_count, 1);
        assert_eq!(metrics.queue_length, 3);
    }

    #[test]
    fn test_health_penalties() {
        assert_eq!(health_score(1.0, 1, 1, 1), 70.0);
        assert_eq!(health_score(0.5, 3, 2, 1), 0.0);
    }

    #[test]
    fn test_normal_session_change_costs_nothing() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_session_reset(false);
        recorder.record_session_reset(true);

        let metrics = recorder.snapshot(0, 0);
        assert_eq!(metrics.session_resets, 2);
        assert_eq!(metrics.session_health_score, 95.0);
    }

    #[test]
    fn test_clear_turn_penalties_keeps_lifetime_counts() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_watchdog_recovery();
        recorder.record_forced_completion();
        assert_eq!(recorder.snapshot(0, 0).session_health_score, 75.0);

        recorder.clear_turn_penalties();
        let metrics = recorder.snapshot(0, 0);
        assert_eq!(metrics.session_health_score, 100.0);
        assert_eq!(metrics.watchdog_recoveries, 1);
        assert_eq!(metrics.forced_completions, 1);
    }
}
