//! Test helper modules for sfp-engine integration tests
//!
//! - TestSink: render sink that records, fails or hangs on demand
//! - audio_generator: raw PCM and WAV payloads with known durations
//! - EventLog: observer that keeps every emitted event

#![allow(dead_code)]

pub mod audio_generator;
pub mod test_sink;

pub use audio_generator::{pcm_payload, wav_payload};
pub use test_sink::{RenderRecord, TestSink};

use sfp_common::events::EngineEvent;
use sfp_engine::config::EngineConfig;
use sfp_engine::{EngineObserver, Fragment, FragmentEngine};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Output rate of the test sink; one sample per millisecond keeps payloads tiny
pub const TEST_RATE: u32 = 1_000;

/// Raw PCM fragment lasting `duration_ms` at [`TEST_RATE`]
pub fn fragment(session: &str, index: u32, total: u32, duration_ms: u32) -> Fragment {
    Fragment::new(
        session,
        index,
        total,
        pcm_payload(duration_ms, TEST_RATE),
        Instant::now(),
    )
    .expect("valid fragment")
}

/// Collects events for later inspection
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<EngineEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl EngineObserver for EventLog {
    fn on_event(&self, event: &EngineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Engine wired to `sink` and `log` with the given config
pub fn engine_with(config: EngineConfig, sink: Arc<TestSink>, log: Arc<EventLog>) -> FragmentEngine {
    FragmentEngine::builder()
        .config(config)
        .sink(sink)
        .observer(log)
        .build()
        .expect("engine builds")
}

/// Engine with default config
pub fn engine(sink: Arc<TestSink>, log: Arc<EventLog>) -> FragmentEngine {
    engine_with(EngineConfig::default(), sink, log)
}
