//! Reorder buffer and playback readiness rules
//!
//! Fragments wait here, sorted by index, until one of the readiness rules
//! says playback may start. The rules favour starting early over waiting for
//! perfect contiguity; gaps are the driver's problem, not the buffer's.

use crate::config::ReorderConfig;
use crate::fragment::Fragment;
use sfp_common::events::ReadinessRule;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Readiness rules in evaluation priority order
pub const READINESS_RULES: [ReadinessRule; 7] = [
    ReadinessRule::CompleteShortResponse,
    ReadinessRule::ConsecutiveRun,
    ReadinessRule::WaitElapsed,
    ReadinessRule::AggressiveFlush,
    ReadinessRule::Streaming,
    ReadinessRule::Continuation,
    ReadinessRule::StallFlush,
];

/// Result of inserting a fragment
#[derive(Debug)]
pub enum Insertion {
    /// Stored; `evicted` is the lowest-index fragment pushed out by overflow
    Inserted { evicted: Option<Fragment> },
    /// A fragment with this index is already buffered
    AlreadyBuffered,
}

/// Longest run of buffered indices starting at the lowest one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsecutiveRun {
    /// Fragments in the run
    pub len: usize,
    /// Largest number of missing indices between two neighbours of the run
    pub max_gap: u32,
}

/// Index-ordered, capacity-bounded buffer of not-yet-played fragments
#[derive(Debug)]
pub struct ReorderQueue {
    entries: BTreeMap<u32, Fragment>,
    capacity: usize,
    /// When the queue last went from empty to non-empty
    first_buffered_at: Option<Instant>,
    /// Fragment count of the response being buffered
    total: u32,
}

impl ReorderQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: capacity.max(1),
            first_buffered_at: None,
            total: 0,
        }
    }

    /// Insert keeping index order; evicts the lowest index past capacity
    pub fn insert(&mut self, fragment: Fragment, now: Instant) -> Insertion {
        let index = fragment.index();
        if self.entries.contains_key(&index) {
            return Insertion::AlreadyBuffered;
        }

        self.total = fragment.total();
        if self.entries.is_empty() {
            self.first_buffered_at = Some(now);
        }
        self.entries.insert(index, fragment);

        let mut evicted = None;
        if self.entries.len() > self.capacity {
            if let Some((lowest, dropped)) = self.entries.pop_first() {
                debug!(
                    "Reorder queue over capacity ({}), evicted fragment {}",
                    self.capacity, lowest
                );
                evicted = Some(dropped);
            }
        }

        trace!("Buffered fragment {} ({} queued)", index, self.entries.len());
        Insertion::Inserted { evicted }
    }

    /// Remove and return the lowest-index fragment
    pub fn pop_lowest(&mut self) -> Option<Fragment> {
        let popped = self.entries.pop_first().map(|(_, fragment)| fragment);
        if self.entries.is_empty() {
            self.first_buffered_at = None;
        }
        popped
    }

    /// Drop everything; returns how many fragments were discarded
    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        self.first_buffered_at = None;
        self.total = 0;
        cleared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn lowest_index(&self) -> Option<u32> {
        self.entries.keys().next().copied()
    }

    pub fn indices(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn first_buffered_at(&self) -> Option<Instant> {
        self.first_buffered_at
    }

    /// Run starting at the lowest index, extended while the number of
    /// missing indices between neighbours stays within `max_gap`
    pub fn consecutive_run(&self, max_gap: u32) -> ConsecutiveRun {
        let mut keys = self.entries.keys();
        let Some(&first) = keys.next() else {
            return ConsecutiveRun { len: 0, max_gap: 0 };
        };

        let mut run = ConsecutiveRun { len: 1, max_gap: 0 };
        let mut prev = first;
        for &index in keys {
            let gap = index - prev - 1;
            if gap > max_gap {
                break;
            }
            run.len += 1;
            run.max_gap = run.max_gap.max(gap);
            prev = index;
        }
        run
    }
}

/// Timing facts the readiness rules need besides the queue itself
#[derive(Debug, Clone, Copy)]
pub struct ReadinessContext {
    pub now: Instant,
    pub last_arrival: Option<Instant>,
    /// Arrivals in a row each within the streaming window of the previous
    pub arrival_streak: u32,
    /// Index right after the last one rendered for this response, if any
    pub next_expected: Option<u32>,
}

/// First rule (in priority order) that allows playback, if any
pub fn evaluate_readiness(
    queue: &ReorderQueue,
    ctx: &ReadinessContext,
    config: &ReorderConfig,
) -> Option<ReadinessRule> {
    if queue.is_empty() {
        return None;
    }
    READINESS_RULES
        .into_iter()
        .find(|&rule| rule_holds(rule, queue, ctx, config))
}

/// Evaluate a single readiness rule
pub fn rule_holds(
    rule: ReadinessRule,
    queue: &ReorderQueue,
    ctx: &ReadinessContext,
    config: &ReorderConfig,
) -> bool {
    let waited = queue
        .first_buffered_at()
        .map(|t| ctx.now.saturating_duration_since(t));

    match rule {
        ReadinessRule::CompleteShortResponse => {
            queue.total() > 0
                && queue.len() == queue.total() as usize
                && queue.total() <= config.short_response_max_fragments
        }
        ReadinessRule::ConsecutiveRun => {
            let run = queue.consecutive_run(config.max_run_gap);
            run.len >= 2 && run.max_gap <= config.max_run_gap
        }
        ReadinessRule::WaitElapsed => {
            waited.is_some_and(|w| w > config.ready_wait()) && queue.len() >= 2
        }
        ReadinessRule::AggressiveFlush => queue.len() >= config.aggressive_flush_len,
        ReadinessRule::Streaming => {
            ctx.last_arrival
                .is_some_and(|t| ctx.now.saturating_duration_since(t) < config.streaming_window())
                && ctx.arrival_streak >= config.streaming_min_arrivals
        }
        ReadinessRule::Continuation => {
            ctx.next_expected.is_some() && queue.lowest_index() == ctx.next_expected
        }
        ReadinessRule::StallFlush => waited.is_some_and(|w| w > config.stall_flush()),
    }
}
