//! Playback driver
//!
//! One pass pops fragments lowest-index first and renders them one at a
//! time until the queue runs dry. Every await point also watches the cancel
//! epoch so a hard stop ends the pass immediately.

use super::cursor::ActiveOutput;
use super::engine::{record_eviction, EngineInner, PassTicket};
use crate::audio::{decode_fragment, DecodeLimits, RenderRequest};
use crate::error::Error;
use crate::fragment::Fragment;
use crate::params::{self, AdaptiveParams};
use sfp_common::time;
use sfp_common::events::{DropReason, EngineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Whether the pass may keep going
enum Flow {
    Continue,
    Cancelled,
}

pub(crate) async fn run_pass(
    inner: Arc<EngineInner>,
    ticket: PassTicket,
    mut cancel: watch::Receiver<u64>,
) {
    let epoch = ticket.epoch;
    let mut generation = ticket.generation;
    debug!("Playback pass started ({})", ticket.rule);

    while let Some(fragment) = next_fragment(&inner, epoch, &mut generation) {
        let flow = play_fragment(&inner, fragment, epoch, generation, &mut cancel).await;
        if let Flow::Cancelled = flow {
            debug!("Playback pass cancelled");
            return;
        }
    }
}

/// Pop the next playable fragment, or end the pass.
///
/// If the stream was reset since the pass started, the pass only continues
/// when a readiness rule holds for the new stream.
fn next_fragment(inner: &Arc<EngineInner>, epoch: u64, generation: &mut u64) -> Option<Fragment> {
    let now = inner.clock.now();
    let mut events = Vec::new();
    let next = {
        let mut state = inner.lock();
        loop {
            if state.epoch != epoch {
                break None;
            }

            if state.generation != *generation {
                state.cursor.pass_active = false;
                match inner.try_start_locked(&mut state, now, &mut events) {
                    Some(ticket) => *generation = ticket.generation,
                    None => break None,
                }
            }

            let Some(fragment) = state.queue.pop_lowest() else {
                state.cursor.pass_active = false;
                debug!("Reorder queue drained, playback pass finished");
                break None;
            };

            if state.cursor.is_late(fragment.index()) {
                info!(
                    "Skipping fragment {} of {}: already past it",
                    fragment.index(),
                    fragment.session_id()
                );
                state.metrics.record_late();
                events.push(EngineEvent::FragmentDropped {
                    session_id: fragment.session_id().to_string(),
                    index: fragment.index(),
                    reason: DropReason::Late,
                    timestamp: time::now(),
                });
                continue;
            }

            break Some(fragment);
        }
    };
    inner.emit_all(events);
    next
}

async fn play_fragment(
    inner: &Arc<EngineInner>,
    fragment: Fragment,
    epoch: u64,
    generation: u64,
    cancel: &mut watch::Receiver<u64>,
) -> Flow {
    let playback = &inner.config.playback;
    let index = fragment.index();
    let session_id = fragment.session_id().to_string();

    let limits = DecodeLimits {
        device_sample_rate: inner.sink.sample_rate(),
        min_duration: Duration::from_millis(playback.min_fragment_duration_ms),
        max_duration: Duration::from_millis(playback.max_fragment_duration_ms),
    };
    let decode_started = std::time::Instant::now();
    let decoded = decode_fragment(inner.decoder.as_ref(), fragment.payload(), &limits);
    let decode_ms = decode_started.elapsed().as_secs_f64() * 1000.0;

    let (format, audio) = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            let reason = match e {
                Error::Validation(_) => DropReason::Invalid,
                _ => DropReason::Undecodable,
            };
            warn!("Dropping fragment {} of {}: {}", index, session_id, e);
            {
                let mut state = inner.lock();
                if state.epoch != epoch {
                    return Flow::Cancelled;
                }
                state.metrics.record_decode_time(decode_ms);
                state.metrics.record_failure();
            }
            inner.emit_all(vec![EngineEvent::FragmentDropped {
                session_id,
                index,
                reason,
                timestamp: time::now(),
            }]);
            return Flow::Continue;
        }
    };

    let AdaptiveParams {
        playback_rate,
        volume,
        inter_fragment_delay_ms,
    } = params::compute(
        format,
        &audio,
        fragment.total(),
        playback.base_volume,
        playback.base_inter_fragment_delay_ms,
    );
    let duration_ms = time::duration_to_millis(audio.duration());

    let request = RenderRequest {
        render_id: Uuid::new_v4(),
        session_id: session_id.clone(),
        index,
        audio: Arc::new(audio),
        playback_rate,
        volume,
    };
    let render_id = request.render_id;
    let expected = request.expected_duration();

    {
        let mut state = inner.lock();
        if state.epoch != epoch {
            return Flow::Cancelled;
        }
        state.metrics.record_decode_time(decode_ms);
        if state.generation != generation {
            debug!(
                "Discarding fragment {} of {}: stream reset while decoding",
                index, session_id
            );
            return Flow::Continue;
        }
    }

    let Some(slot) = claim_output_slot(inner, cancel, epoch).await else {
        return Flow::Cancelled;
    };

    // The sink may block until output has started; keep it off the lock
    let sink = Arc::clone(&inner.sink);
    let rendered = match tokio::task::spawn_blocking(move || sink.render(request)).await {
        Ok(result) => result,
        Err(e) => Err(Error::Playback(format!("render task failed: {}", e))),
    };
    let mut handle = match rendered {
        Ok(handle) => handle,
        Err(e) => {
            drop(slot);
            return handle_render_failure(inner, fragment, e, epoch, generation, cancel).await;
        }
    };

    let mut events = Vec::new();
    {
        let mut state = inner.lock();
        if state.epoch != epoch {
            handle.control.stop();
            return Flow::Cancelled;
        }
        if state.generation != generation {
            debug!(
                "Stopping fragment {} of {}: stream reset while output started",
                index, session_id
            );
            handle.control.stop();
            return Flow::Continue;
        }

        let now = inner.clock.now();
        state.cursor.active_output = Some(ActiveOutput {
            render_id,
            session_id: session_id.clone(),
            index,
            control: Arc::clone(&handle.control),
            started_at: now,
            expected_end: now + expected,
        });
        state.last_render_start = Some(now);
        debug!(
            "Rendering fragment {} of {} ({}, rate {:.3}, volume {:.2}, {}ms)",
            index, session_id, format, playback_rate, volume, duration_ms
        );
        events.push(EngineEvent::RenderStarted {
            render_id,
            session_id: session_id.clone(),
            index,
            playback_rate,
            volume,
            duration_ms,
            transcript: fragment.transcript().map(str::to_string),
            timestamp: time::now(),
        });
    }
    inner.emit_all(std::mem::take(&mut events));

    // Measured against the rendered duration: at rates below 1.0 the decoded
    // duration alone would cut long fragments off before their natural end.
    let forced_after = expected + playback.forced_completion_margin();
    let forced = tokio::select! {
        _ = &mut handle.completion => false,
        _ = tokio::time::sleep(forced_after) => {
            warn!(
                "Fragment {} of {} gave no completion after {:?}, forcing",
                index, session_id, forced_after
            );
            handle.control.stop();
            true
        }
        _ = cancelled(cancel, epoch) => {
            handle.control.stop();
            return Flow::Cancelled;
        }
    };

    {
        let mut state = inner.lock();
        if state.epoch != epoch {
            return Flow::Cancelled;
        }
        if state
            .cursor
            .active_output
            .as_ref()
            .is_some_and(|output| output.render_id == render_id)
        {
            state.cursor.active_output = None;
        }
        if forced {
            state.metrics.record_forced_completion();
        }
        state.metrics.record_success();
        if state.generation == generation {
            state.cursor.record_rendered(index);
        }
        events.push(EngineEvent::RenderCompleted {
            render_id,
            session_id,
            index,
            forced,
            timestamp: time::now(),
        });
    }
    inner.emit_all(events);
    drop(slot);

    let delay = Duration::from_secs_f64(inter_fragment_delay_ms.max(0.0) / 1000.0);
    if !sleep_unless_cancelled(delay, cancel, epoch).await {
        return Flow::Cancelled;
    }
    Flow::Continue
}

/// Count a failed attempt; requeue with backoff or give up
async fn handle_render_failure(
    inner: &Arc<EngineInner>,
    fragment: Fragment,
    error: Error,
    epoch: u64,
    generation: u64,
    cancel: &mut watch::Receiver<u64>,
) -> Flow {
    let playback = &inner.config.playback;
    let index = fragment.index();
    let session_id = fragment.session_id().to_string();
    let now = inner.clock.now();
    let mut events = Vec::new();

    let backoff = {
        let mut state = inner.lock();
        if state.epoch != epoch {
            return Flow::Cancelled;
        }

        let attempt = state.cursor.record_attempt_failure(index);
        warn!(
            "Render attempt {}/{} for fragment {} of {} failed: {}",
            attempt, playback.max_render_attempts, index, session_id, error
        );
        events.push(EngineEvent::RenderFailed {
            session_id: session_id.clone(),
            index,
            attempt,
            error: error.to_string(),
            timestamp: time::now(),
        });

        if attempt >= playback.max_render_attempts || !error.is_retryable() {
            state.cursor.forget_retries(index);
            state.metrics.record_failure();
            events.push(EngineEvent::FragmentDropped {
                session_id,
                index,
                reason: DropReason::RetriesExhausted,
                timestamp: time::now(),
            });
            None
        } else if state.generation != generation {
            debug!("Not retrying fragment {}: stream was reset", index);
            None
        } else {
            if let super::reorder::Insertion::Inserted {
                evicted: Some(evicted),
            } = state.queue.insert(fragment, now)
            {
                record_eviction(&mut state, &evicted, &mut events);
            }
            Some(playback.retry_backoff(attempt))
        }
    };
    inner.emit_all(events);

    match backoff {
        Some(backoff) => {
            if sleep_unless_cancelled(backoff, cancel, epoch).await {
                Flow::Continue
            } else {
                Flow::Cancelled
            }
        }
        None => Flow::Continue,
    }
}

/// Wait until no other output holds the slot. An output started by a
/// cancelled pass keeps it until that pass has stopped it.
async fn claim_output_slot<'a>(
    inner: &'a EngineInner,
    cancel: &mut watch::Receiver<u64>,
    epoch: u64,
) -> Option<MutexGuard<'a, ()>> {
    tokio::select! {
        guard = inner.output_slot.lock() => Some(guard),
        _ = cancelled(cancel, epoch) => None,
    }
}

/// Resolves once the engine epoch moves past `epoch`
async fn cancelled(cancel: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        if *cancel.borrow_and_update() != epoch {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep; returns false if cancelled first
async fn sleep_unless_cancelled(
    duration: Duration,
    cancel: &mut watch::Receiver<u64>,
    epoch: u64,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancelled(cancel, epoch) => false,
    }
}
