//! Fragment playback engine
//!
//! Owns every piece of mutable state behind one mutex that is never held
//! across an await. Arrivals, the scheduler tick and the playback driver all
//! go through the same locked transitions, so at most one output is active
//! and rendered indices of a response only ever increase.

use super::cursor::PlaybackCursor;
use super::driver;
use super::metrics::{EngineMetrics, MetricsRecorder};
use super::observer::EngineObserver;
use super::reorder::{evaluate_readiness, Insertion, ReadinessContext, ReorderQueue};
use super::session::{Admission, SessionTracker};
use super::watchdog::{StuckOutputWatchdog, WatchdogVerdict};
use crate::audio::{AudioDecoder, RenderSink, SimulatedSink, SymphoniaDecoder};
use crate::clock::{Clock, TokioClock};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fragment::{Delivery, Fragment};
use sfp_common::time;
use sfp_common::events::{DropReason, EngineEvent, ReadinessRule, SessionResetReason};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What happened to a submitted fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued. `started` names the readiness rule if this arrival started a
    /// playback pass.
    Accepted {
        queue_length: usize,
        started: Option<ReadinessRule>,
    },
    /// Already seen for this session
    Duplicate,
    /// Playback already moved past this index
    Late,
}

/// Inter-arrival tracking for the streaming readiness rule
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ArrivalTracker {
    pub last: Option<Instant>,
    pub streak: u32,
}

impl ArrivalTracker {
    fn record(&mut self, now: Instant, window: Duration) {
        self.streak = match self.last {
            Some(prev) if now.saturating_duration_since(prev) < window => self.streak + 1,
            _ => 1,
        };
        self.last = Some(now);
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Permission for one playback pass, handed to the driver task
#[derive(Debug, Clone, Copy)]
pub(crate) struct PassTicket {
    pub rule: ReadinessRule,
    pub epoch: u64,
    pub generation: u64,
}

pub(crate) struct EngineState {
    pub session: SessionTracker,
    pub queue: ReorderQueue,
    pub cursor: PlaybackCursor,
    pub arrivals: ArrivalTracker,
    pub metrics: MetricsRecorder,
    pub watchdog: StuckOutputWatchdog,
    pub last_render_start: Option<Instant>,
    /// Bumped on every hard stop; drivers of older epochs exit at their next
    /// await point without touching state
    pub epoch: u64,
    /// Bumped on every stream reset; a pass started for an older generation
    /// must re-check readiness before playing anything else
    pub generation: u64,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            session: SessionTracker::new(),
            queue: ReorderQueue::new(config.reorder.queue_capacity),
            cursor: PlaybackCursor::default(),
            arrivals: ArrivalTracker::default(),
            metrics: MetricsRecorder::new(),
            watchdog: StuckOutputWatchdog::new(&config.watchdog),
            last_render_start: None,
            epoch: 0,
            generation: 0,
        }
    }

    /// Last arrival, or the later of it and the last render start
    fn last_progress(&self, include_render_start: bool) -> Option<Instant> {
        if !include_render_start {
            return self.arrivals.last;
        }
        match (self.arrivals.last, self.last_render_start) {
            (Some(a), Some(r)) => Some(a.max(r)),
            (a, r) => a.or(r),
        }
    }

    fn session_label(&self) -> String {
        self.session.current_id().unwrap_or_default().to_string()
    }
}

pub(crate) struct EngineInner {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub sink: Arc<dyn RenderSink>,
    observers: Vec<Arc<dyn EngineObserver>>,
    state: Mutex<EngineState>,
    /// Held by the driver from render start until the output has ended
    pub output_slot: tokio::sync::Mutex<()>,
    cancel_tx: watch::Sender<u64>,
}

impl EngineInner {
    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn emit_all(&self, events: Vec<EngineEvent>) {
        for event in &events {
            for observer in &self.observers {
                observer.on_event(event);
            }
        }
    }

    pub fn cancel_receiver(&self) -> watch::Receiver<u64> {
        self.cancel_tx.subscribe()
    }

    fn submit(self: &Arc<Self>, fragment: Fragment) -> Result<SubmitOutcome> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let (outcome, ticket) = {
            let mut state = self.lock();
            self.submit_locked(&mut state, fragment, now, &mut events)
        };
        self.emit_all(events);
        if let Some(ticket) = ticket {
            self.spawn_pass(ticket);
        }
        outcome
    }

    fn submit_locked(
        &self,
        state: &mut EngineState,
        fragment: Fragment,
        now: Instant,
        events: &mut Vec<EngineEvent>,
    ) -> (Result<SubmitOutcome>, Option<PassTicket>) {
        let index = fragment.index();
        let session_id = fragment.session_id().to_string();

        let min_payload = self.config.playback.min_payload_bytes;
        if fragment.payload().len() < min_payload {
            warn!(
                "Dropping fragment {} of {}: {} byte payload below minimum {}",
                index,
                session_id,
                fragment.payload().len(),
                min_payload
            );
            state.metrics.record_invalid();
            events.push(EngineEvent::FragmentDropped {
                session_id: session_id.clone(),
                index,
                reason: DropReason::Invalid,
                timestamp: time::now(),
            });
            let err = Error::Validation(format!(
                "session {} fragment {}: payload of {} bytes is below minimum {}",
                session_id,
                index,
                fragment.payload().len(),
                min_payload
            ));
            return (Err(err), None);
        }

        match state
            .session
            .admit(&session_id, index, now, &self.config.session)
        {
            Admission::Duplicate | Admission::SpuriousOverlap => {
                debug!("Ignoring duplicate fragment {} of {}", index, session_id);
                state.metrics.record_duplicate();
                events.push(EngineEvent::DuplicateIgnored {
                    session_id,
                    index,
                    timestamp: time::now(),
                });
                return (Ok(SubmitOutcome::Duplicate), None);
            }
            Admission::Accept {
                reset: Some(SessionResetReason::Timeout),
            } => {
                self.expire_stream_locked(state, events);
            }
            Admission::Accept { reset: Some(reason) } => {
                self.reset_stream_locked(state, reason, events);
            }
            Admission::Accept { reset: None } => {}
        }

        state
            .arrivals
            .record(now, self.config.reorder.streaming_window());

        if state.cursor.is_late(index) {
            info!(
                "Dropping late fragment {} of {} (already rendered through {:?})",
                index,
                session_id,
                state.cursor.last_rendered()
            );
            state.metrics.record_late();
            events.push(EngineEvent::FragmentDropped {
                session_id,
                index,
                reason: DropReason::Late,
                timestamp: time::now(),
            });
            return (Ok(SubmitOutcome::Late), None);
        }

        let total = fragment.total();
        match state.queue.insert(fragment, now) {
            Insertion::AlreadyBuffered => {
                state.metrics.record_duplicate();
                events.push(EngineEvent::DuplicateIgnored {
                    session_id,
                    index,
                    timestamp: time::now(),
                });
                return (Ok(SubmitOutcome::Duplicate), None);
            }
            Insertion::Inserted { evicted } => {
                if let Some(evicted) = evicted {
                    record_eviction(state, &evicted, events);
                }
            }
        }

        let queue_length = state.queue.len();
        debug!(
            "Accepted fragment {}/{} of {} ({} queued)",
            index, total, session_id, queue_length
        );
        events.push(EngineEvent::FragmentAccepted {
            session_id,
            index,
            total,
            queue_length,
            timestamp: time::now(),
        });

        let ticket = self.try_start_locked(state, now, events);
        let outcome = SubmitOutcome::Accepted {
            queue_length,
            started: ticket.map(|t| t.rule),
        };
        (Ok(outcome), ticket)
    }

    /// Start a playback pass if none is running and a readiness rule holds
    pub fn try_start_locked(
        &self,
        state: &mut EngineState,
        now: Instant,
        events: &mut Vec<EngineEvent>,
    ) -> Option<PassTicket> {
        if state.cursor.pass_active || state.queue.is_empty() {
            return None;
        }

        let ctx = ReadinessContext {
            now,
            last_arrival: state.arrivals.last,
            arrival_streak: state.arrivals.streak,
            next_expected: state.cursor.next_expected(),
        };
        let rule = evaluate_readiness(&state.queue, &ctx, &self.config.reorder)?;

        state.cursor.pass_active = true;
        info!(
            "Starting playback pass ({}) with {} fragment(s) queued",
            rule,
            state.queue.len()
        );
        events.push(EngineEvent::PlaybackStarted {
            session_id: state.session_label(),
            rule,
            queue_length: state.queue.len(),
            timestamp: time::now(),
        });

        Some(PassTicket {
            rule,
            epoch: state.epoch,
            generation: state.generation,
        })
    }

    fn spawn_pass(self: &Arc<Self>, ticket: PassTicket) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                let cancel = self.cancel_receiver();
                handle.spawn(driver::run_pass(inner, ticket, cancel));
            }
            Err(e) => {
                error!("Cannot start playback pass outside a tokio runtime: {}", e);
                let mut state = self.lock();
                if state.epoch == ticket.epoch {
                    state.cursor.pass_active = false;
                }
            }
        }
    }

    /// Clear the buffered response. Output already rendering is left to finish.
    pub fn reset_stream_locked(
        &self,
        state: &mut EngineState,
        reason: SessionResetReason,
        events: &mut Vec<EngineEvent>,
    ) {
        let cleared = state.queue.clear();
        state.cursor.reset_progress();
        state.arrivals.reset();
        state.generation += 1;
        state.metrics.record_session_reset(matches!(
            reason,
            SessionResetReason::Overlap | SessionResetReason::Timeout
        ));

        info!(
            "Session reset ({:?}): cleared {} queued fragment(s){}",
            reason,
            cleared,
            if state.cursor.active_output.is_some() {
                ", active output left to finish"
            } else {
                ""
            }
        );
        events.push(EngineEvent::SessionReset {
            session_id: state.session.current_id().map(str::to_string),
            reason,
            timestamp: time::now(),
        });
    }

    /// Timed-out session. Only reported as a reset when buffered fragments
    /// are lost; a finished response just goes stale.
    fn expire_stream_locked(&self, state: &mut EngineState, events: &mut Vec<EngineEvent>) {
        if state.queue.is_empty() {
            debug!("Session {} went stale with nothing buffered", state.session_label());
            state.cursor.reset_progress();
            state.arrivals.reset();
            state.generation += 1;
            return;
        }

        let err = Error::Session(format!(
            "session {} timed out with {} fragment(s) unplayed",
            state.session_label(),
            state.queue.len()
        ));
        warn!("{}", err);
        self.reset_stream_locked(state, SessionResetReason::Timeout, events);
    }

    /// Stop output and clear everything; returns (stopped_output, cleared)
    fn hard_stop_locked(
        &self,
        state: &mut EngineState,
        reason: SessionResetReason,
        now: Instant,
        events: &mut Vec<EngineEvent>,
    ) -> (bool, usize) {
        let session_id = state.session.current_id().map(str::to_string);
        if let Some(remaining) = state.cursor.remaining(now) {
            debug!("Stopping active output with {:?} remaining", remaining);
        }
        let stopped = state.cursor.stop_output();
        let cleared = state.queue.clear();

        state.cursor = PlaybackCursor::default();
        state.session.clear();
        state.arrivals.reset();
        state.generation += 1;
        state.epoch += 1;
        self.cancel_tx.send_replace(state.epoch);

        events.push(EngineEvent::SessionReset {
            session_id,
            reason,
            timestamp: time::now(),
        });
        (stopped, cleared)
    }

    fn interrupt(&self) {
        let now = self.clock.now();
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let (stopped_output, cleared_fragments) =
                self.hard_stop_locked(&mut state, SessionResetReason::Interrupt, now, &mut events);
            state.metrics.clear_turn_penalties();
            info!(
                "Interrupted: stopped output: {}, cleared {} fragment(s)",
                stopped_output, cleared_fragments
            );
            events.push(EngineEvent::Interrupted {
                stopped_output,
                cleared_fragments,
                timestamp: time::now(),
            });
        }
        self.emit_all(events);
    }

    fn reset_for_new_turn(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            self.reset_stream_locked(&mut state, SessionResetReason::NewTurn, &mut events);
            state.session.clear();
        }
        self.emit_all(events);
    }

    /// Time-based work: session expiry, watchdog, readiness
    fn tick(self: &Arc<Self>) {
        let now = self.clock.now();
        let mut events = Vec::new();
        let ticket = {
            let mut state = self.lock();

            if !state.cursor.pass_active && state.session.expire(now, &self.config.session) {
                self.expire_stream_locked(&mut state, &mut events);
            }

            let active = state.cursor.active_output_count();
            let last_progress =
                state.last_progress(self.config.watchdog.render_start_resets_silence);
            let verdict = state.watchdog.check(now, active, last_progress);
            if let WatchdogVerdict::Stuck { silence } = verdict {
                let err = Error::Session(format!(
                    "output active with no fragment arrival for {}ms",
                    silence.as_millis()
                ));
                warn!("Watchdog force-clearing: {}", err);
                let (stopped, _) =
                    self.hard_stop_locked(&mut state, SessionResetReason::Watchdog, now, &mut events);
                state.metrics.record_watchdog_recovery();
                events.push(EngineEvent::WatchdogRecovery {
                    stopped_outputs: usize::from(stopped),
                    silence_ms: time::duration_to_millis(silence),
                    timestamp: time::now(),
                });
            }

            self.try_start_locked(&mut state, now, &mut events)
        };
        self.emit_all(events);
        if let Some(ticket) = ticket {
            self.spawn_pass(ticket);
        }
    }
}

/// Count and report a fragment pushed out of a full queue
pub(crate) fn record_eviction(
    state: &mut EngineState,
    evicted: &Fragment,
    events: &mut Vec<EngineEvent>,
) {
    warn!(
        "Reorder queue full, evicted fragment {} of {}",
        evicted.index(),
        evicted.session_id()
    );
    state.metrics.record_evicted();
    events.push(EngineEvent::FragmentDropped {
        session_id: evicted.session_id().to_string(),
        index: evicted.index(),
        reason: DropReason::Evicted,
        timestamp: time::now(),
    });
}

/// Builder for [`FragmentEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    decoder: Option<Arc<dyn AudioDecoder>>,
    sink: Option<Arc<dyn RenderSink>>,
    observers: Vec<Arc<dyn EngineObserver>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: None,
            decoder: None,
            sink: None,
            observers: Vec::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate the configuration and build the engine.
    ///
    /// Defaults: tokio clock, symphonia decoder, simulated 48 kHz sink.
    pub fn build(self) -> Result<FragmentEngine> {
        self.config.validate()?;

        let (cancel_tx, _) = watch::channel(0);
        let state = Mutex::new(EngineState::new(&self.config));

        let inner = EngineInner {
            clock: self.clock.unwrap_or_else(|| Arc::new(TokioClock)),
            decoder: self.decoder.unwrap_or_else(|| Arc::new(SymphoniaDecoder)),
            sink: self
                .sink
                .unwrap_or_else(|| Arc::new(SimulatedSink::default())),
            observers: self.observers,
            config: self.config,
            state,
            output_slot: tokio::sync::Mutex::new(()),
            cancel_tx,
        };

        Ok(FragmentEngine {
            inner: Arc::new(inner),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reorders, buffers and plays out-of-order speech fragments.
///
/// Cheap to clone; clones share one engine. Submitting fragments and ticking
/// must happen inside a tokio runtime because playback passes run as tasks.
#[derive(Clone)]
pub struct FragmentEngine {
    inner: Arc<EngineInner>,
}

impl FragmentEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine with default collaborators rendering to `sink`
    pub fn new(config: EngineConfig, sink: Arc<dyn RenderSink>) -> Result<Self> {
        Self::builder().config(config).sink(sink).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Accept one fragment.
    ///
    /// # Errors
    /// `Error::Validation` if the payload is too short to be audio. Every
    /// other outcome, including duplicates, is reported through
    /// [`SubmitOutcome`].
    pub fn submit(&self, fragment: Fragment) -> Result<SubmitOutcome> {
        self.inner.submit(fragment)
    }

    /// Accept one transport delivery (base64 payload)
    pub fn deliver(&self, delivery: &Delivery) -> Result<SubmitOutcome> {
        let arrival = self.inner.clock.now();
        match Fragment::from_delivery(delivery, arrival) {
            Ok(fragment) => self.submit(fragment),
            Err(e) => {
                warn!(
                    "Rejected delivery {} of {}: {}",
                    delivery.fragment_index, delivery.session_id, e
                );
                self.inner.lock().metrics.record_invalid();
                self.inner.emit_all(vec![EngineEvent::FragmentDropped {
                    session_id: delivery.session_id.clone(),
                    index: delivery.fragment_index,
                    reason: DropReason::Invalid,
                    timestamp: time::now(),
                }]);
                Err(e)
            }
        }
    }

    /// Hard stop: stop active output and clear all per-response state
    pub fn interrupt(&self) {
        self.inner.interrupt();
    }

    /// Clear buffered fragments and session state for a new turn.
    ///
    /// Output already rendering finishes; lifetime counters are kept.
    pub fn reset_for_new_turn(&self) {
        self.inner.reset_for_new_turn();
    }

    /// Run time-based checks once (readiness, session expiry, watchdog)
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Spawn the periodic tick. The task ends once every engine clone is
    /// dropped.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.watchdog.tick_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Engine dropped, scheduler exiting");
                    break;
                };
                inner.tick();
            }
        })
    }

    pub fn metrics(&self) -> EngineMetrics {
        let state = self.inner.lock();
        state
            .metrics
            .snapshot(state.cursor.active_output_count(), state.queue.len())
    }

    /// A playback pass is running
    pub fn is_playing(&self) -> bool {
        self.inner.lock().cursor.pass_active
    }

    pub fn queue_length(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn current_session(&self) -> Option<String> {
        self.inner.lock().session.current_id().map(str::to_string)
    }
}

impl std::fmt::Debug for FragmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("FragmentEngine")
            .field("session", &state.session.current_id())
            .field("queue_length", &state.queue.len())
            .field("pass_active", &state.cursor.pass_active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn engine_with_clock(clock: Arc<ManualClock>) -> FragmentEngine {
        FragmentEngine::builder()
            .clock(clock)
            .sink(Arc::new(SimulatedSink::new(1_000)))
            .build()
            .unwrap()
    }

    fn fragment(session: &str, index: u32, total: u32) -> Fragment {
        Fragment::new(session, index, total, vec![0u8; 200], Instant::now()).unwrap()
    }

    #[test]
    fn test_arrival_streak() {
        let mut tracker = ArrivalTracker::default();
        let start = Instant::now();
        let window = Duration::from_millis(100);

        tracker.record(start, window);
        tracker.record(start + Duration::from_millis(50), window);
        assert_eq!(tracker.streak, 2);
        tracker.record(start + Duration::from_millis(300), window);
        assert_eq!(tracker.streak, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.reorder.queue_capacity = 0;
        assert!(FragmentEngine::builder().config(config).build().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_payload_rejected() {
        let engine = engine_with_clock(Arc::new(ManualClock::new()));
        let tiny = Fragment::new("s1", 0, 1, vec![0u8; 2], Instant::now()).unwrap();

        let result = engine.submit(tiny);
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(engine.metrics().fragments_dropped_invalid, 1);
        assert_eq!(engine.queue_length(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_fragment_waits_until_stall_flush() {
        let clock = Arc::new(ManualClock::new());
        let engine = engine_with_clock(clock.clone());

        let outcome = engine.submit(fragment("s1", 3, 8)).unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                queue_length: 1,
                started: None
            }
        );

        clock.advance(Duration::from_millis(400));
        engine.tick();
        assert!(!engine.is_playing());

        clock.advance(Duration::from_millis(1200));
        engine.tick();
        assert!(engine.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_turn_clears_queue_keeps_counters() {
        let clock = Arc::new(ManualClock::new());
        let engine = engine_with_clock(clock);

        engine.submit(fragment("s1", 4, 8)).unwrap();
        engine.submit(fragment("s1", 4, 8)).unwrap();
        assert_eq!(engine.metrics().duplicates_ignored, 1);

        engine.reset_for_new_turn();
        assert_eq!(engine.queue_length(), 0);
        assert_eq!(engine.current_session(), None);
        assert_eq!(engine.metrics().duplicates_ignored, 1);

        // Same index is new work after the reset
        let outcome = engine.submit(fragment("s1", 4, 8)).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_goes_stale_on_idle_tick() {
        let clock = Arc::new(ManualClock::new());
        let engine = engine_with_clock(clock.clone());

        engine.submit(fragment("s1", 5, 9)).unwrap();
        clock.advance(Duration::from_millis(150));
        engine.submit(fragment("s1", 8, 9)).unwrap();
        clock.advance(Duration::from_millis(300));
        engine.tick();
        assert!(!engine.is_playing());
        assert_eq!(engine.queue_length(), 2);

        // Expiry runs before readiness, so nothing is left to flush
        clock.advance(Duration::from_millis(10_000));
        engine.tick();
        assert_eq!(engine.metrics().session_resets, 1);
        assert_eq!(engine.queue_length(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_session_goes_stale_silently() {
        let clock = Arc::new(ManualClock::new());
        let engine = engine_with_clock(clock.clone());

        engine.submit(fragment("s1", 0, 1)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!engine.is_playing());

        clock.advance(Duration::from_millis(10_001));
        engine.tick();
        let metrics = engine.metrics();
        assert_eq!(metrics.session_resets, 0);
        assert_eq!(metrics.session_health_score, 100.0);

        // Progress restarted with the stale session, so index 0 is not late
        let outcome = engine.submit(fragment("s1", 0, 1)).unwrap();
        assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
    }

    #[test]
    fn test_interrupt_without_runtime_or_output() {
        let engine = engine_with_clock(Arc::new(ManualClock::new()));
        engine.interrupt();
        engine.interrupt();
        assert_eq!(engine.metrics().active_output_count, 0);
    }
}
