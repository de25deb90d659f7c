//! End-to-end playback scenarios
//!
//! Fragments go in through the public engine API and come out through a
//! recording sink. Tokio time is paused, so durations are exact.

mod helpers;

use helpers::{engine, fragment, EventLog, TestSink};
use sfp_common::events::{EngineEvent, ReadinessRule, SessionResetReason};
use sfp_engine::SubmitOutcome;
use std::time::Duration;

// ============================================================================
// Reordering
// ============================================================================

/// **Given:** fragments 2, 0, 1 of a 3-fragment response arrive back to back
/// **When:** playback runs to completion
/// **Then:** they render as 0, 1, 2 with a single output at a time
#[tokio::test(start_paused = true)]
async fn test_out_of_order_arrival_renders_in_index_order() {
    let sink = TestSink::new();
    let log = EventLog::new();
    let engine = engine(sink.clone(), log.clone());

    engine.submit(fragment("s1", 2, 3, 100)).unwrap();
    engine.submit(fragment("s1", 0, 3, 100)).unwrap();
    engine.submit(fragment("s1", 1, 3, 100)).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(sink.rendered_indices(), vec![0, 1, 2]);
    assert_eq!(sink.max_active(), 1);
    assert!(!engine.is_playing());

    let metrics = engine.metrics();
    assert_eq!(metrics.fragments_processed, 3);
    assert_eq!(metrics.fragments_succeeded, 3);
    assert_eq!(metrics.success_rate, 1.0);
    assert_eq!(metrics.session_health_score, 100.0);
    assert_eq!(log.count("RenderCompleted"), 3);
}

// ============================================================================
// Overlap detection
// ============================================================================

/// **Given:** a one-fragment response has fully played
/// **When:** fragment 0 of the same session arrives again 2.5s later
/// **Then:** it is treated as a new response and plays again
#[tokio::test(start_paused = true)]
async fn test_index_zero_after_idle_gap_starts_new_response() {
    let sink = TestSink::new();
    let log = EventLog::new();
    let engine = engine(sink.clone(), log.clone());

    engine.submit(fragment("s1", 0, 1, 100)).unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(sink.rendered_indices(), vec![0]);

    let outcome = engine.submit(fragment("s1", 0, 1, 100)).unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            queue_length: 1,
            started: Some(ReadinessRule::CompleteShortResponse),
        }
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.rendered_indices(), vec![0, 0]);
    assert_eq!(engine.metrics().session_resets, 1);
    assert!(log.events().iter().any(|e| matches!(
        e,
        EngineEvent::SessionReset {
            reason: SessionResetReason::Overlap,
            ..
        }
    )));
}

/// **Given:** fragment 0 has just played
/// **When:** it is redelivered 1s later
/// **Then:** the repeat is ignored
#[tokio::test(start_paused = true)]
async fn test_index_zero_repeat_within_gap_is_ignored() {
    let sink = TestSink::new();
    let log = EventLog::new();
    let engine = engine(sink.clone(), log.clone());

    engine.submit(fragment("s1", 0, 1, 100)).unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    let outcome = engine.submit(fragment("s1", 0, 1, 100)).unwrap();
    assert_eq!(outcome, SubmitOutcome::Duplicate);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.rendered_indices(), vec![0]);
    assert_eq!(engine.metrics().duplicates_ignored, 1);
    assert_eq!(engine.metrics().session_resets, 0);
}

/// **Given:** four single-fragment responses, each followed by 11s of silence
/// **Then:** finished sessions go stale without counting as timeouts or
/// costing health
#[tokio::test(start_paused = true)]
async fn test_finished_sessions_expire_without_health_penalty() {
    let sink = TestSink::new();
    let log = EventLog::new();
    let engine = engine(sink.clone(), log.clone());
    let scheduler = engine.spawn_scheduler();

    for session in ["s1", "s2", "s3", "s4"] {
        engine.submit(fragment(session, 0, 1, 100)).unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
    }

    let metrics = engine.metrics();
    assert_eq!(metrics.fragments_processed, 4);
    assert_eq!(metrics.success_rate, 1.0);
    assert_eq!(metrics.session_health_score, 100.0);
    // Only the three session changes
    assert_eq!(metrics.session_resets, 3);
    assert!(!log.events().iter().any(|e| matches!(
        e,
        EngineEvent::SessionReset {
            reason: SessionResetReason::Timeout,
            ..
        }
    )));

    scheduler.abort();
}

// ============================================================================
// Capacity
// ============================================================================

/// **Given:** 60 fragments of one response arrive within the same instant
/// **When:** the queue overflows
/// **Then:** it holds 50 and the 10 lowest indices were evicted
#[tokio::test(start_paused = true)]
async fn test_queue_overflow_evicts_lowest_indices() {
    let sink = TestSink::new();
    let log = EventLog::new();
    let engine = engine(sink.clone(), log.clone());

    for index in 0..60 {
        engine.submit(fragment("s1", index, 60, 50)).unwrap();
    }

    assert_eq!(engine.queue_length(), 50);
    let metrics = engine.metrics();
    assert_eq!(metrics.fragments_evicted, 10);
    assert_eq!(metrics.queue_length, 50);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.rendered_indices().first(), Some(&10));
    assert!(engine.queue_length() <= 50);
}

// ============================================================================
// Interrupt
// ============================================================================

/// **Given:** a response is mid-playback with fragments still queued
/// **When:** the caller interrupts
/// **Then:** output stops at once, nothing is left queued, and the next
/// response plays normally
#[tokio::test(start_paused = true)]
async fn test_interrupt_stops_output_and_clears_state() {
    let sink = TestSink::new();
    let log = EventLog::new();
    let engine = engine(sink.clone(), log.clone());

    engine.submit(fragment("s1", 0, 3, 1000)).unwrap();
    engine.submit(fragment("s1", 1, 3, 1000)).unwrap();
    engine.submit(fragment("s1", 2, 3, 1000)).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.active(), 1);

    engine.interrupt();

    assert_eq!(sink.stops(), 1);
    assert_eq!(engine.queue_length(), 0);
    assert!(!engine.is_playing());
    assert_eq!(engine.current_session(), None);
    assert_eq!(engine.metrics().active_output_count, 0);
    assert!(log.events().iter().any(|e| matches!(
        e,
        EngineEvent::Interrupted {
            stopped_output: true,
            cleared_fragments: 2,
            ..
        }
    )));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.active(), 0);

    engine.submit(fragment("s2", 0, 1, 100)).unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(
        sink.rendered_keys(),
        vec![("s1".to_string(), 0), ("s2".to_string(), 0)]
    );
    assert_eq!(sink.max_active(), 1);
}

// ============================================================================
// Session change
// ============================================================================

/// **Given:** session s1 is rendering its first fragment
/// **When:** a fragment of session s2 arrives
/// **Then:** s1's queued fragments are dropped, its in-flight fragment
/// finishes on its own, then s2 plays
#[tokio::test(start_paused = true)]
async fn test_new_session_replaces_buffered_response() {
    let sink = TestSink::new();
    let log = EventLog::new();
    let engine = engine(sink.clone(), log.clone());

    engine.submit(fragment("s1", 0, 3, 1000)).unwrap();
    engine.submit(fragment("s1", 1, 3, 1000)).unwrap();
    engine.submit(fragment("s1", 2, 3, 1000)).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = engine.submit(fragment("s2", 0, 1, 100)).unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            queue_length: 1,
            started: None,
        }
    );
    assert_eq!(engine.current_session().as_deref(), Some("s2"));

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        sink.rendered_keys(),
        vec![("s1".to_string(), 0), ("s2".to_string(), 0)]
    );
    assert_eq!(sink.stops(), 0);
    assert_eq!(engine.metrics().session_resets, 1);
    // A normal session change costs no health
    assert_eq!(engine.metrics().session_health_score, 100.0);
}
