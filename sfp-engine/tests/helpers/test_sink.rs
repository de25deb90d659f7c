//! Render sink for engine tests
//!
//! Records every render, can fail chosen fragment indices, and can hang so
//! outputs never complete on their own. Output "plays" on the tokio timer.

use sfp_engine::audio::sink::NotifyControl;
use sfp_engine::audio::{OutputControl, OutputHandle, RenderRequest, RenderSink};
use sfp_engine::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// One successful render call
#[derive(Debug, Clone)]
pub struct RenderRecord {
    pub session_id: String,
    pub index: u32,
    pub playback_rate: f32,
    pub volume: f32,
    pub started: Instant,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    stops: AtomicUsize,
}

struct CountingControl {
    inner: NotifyControl,
    counters: Arc<Counters>,
}

impl OutputControl for CountingControl {
    fn stop(&self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.stop();
    }
}

pub struct TestSink {
    hang: bool,
    /// Remaining failures per fragment index
    failures: Mutex<HashMap<u32, u32>>,
    attempts: Mutex<Vec<u32>>,
    renders: Mutex<Vec<RenderRecord>>,
    counters: Arc<Counters>,
}

impl TestSink {
    fn build(hang: bool) -> Self {
        Self {
            hang,
            failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            renders: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Outputs complete after their expected duration
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    /// Outputs never complete unless stopped
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    /// Fail the next `times` render calls for `index`
    pub fn fail_index(&self, index: u32, times: u32) {
        self.failures.lock().unwrap().insert(index, times);
    }

    pub fn renders(&self) -> Vec<RenderRecord> {
        self.renders.lock().unwrap().clone()
    }

    pub fn rendered_indices(&self) -> Vec<u32> {
        self.renders().iter().map(|r| r.index).collect()
    }

    pub fn rendered_keys(&self) -> Vec<(String, u32)> {
        self.renders()
            .into_iter()
            .map(|r| (r.session_id, r.index))
            .collect()
    }

    /// Render calls for `index`, failed ones included
    pub fn attempts_for(&self, index: u32) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|&&i| i == index)
            .count()
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }
}

impl RenderSink for TestSink {
    fn sample_rate(&self) -> u32 {
        super::TEST_RATE
    }

    fn render(&self, request: RenderRequest) -> Result<OutputHandle> {
        self.attempts.lock().unwrap().push(request.index);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&request.index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::Playback(format!(
                        "injected failure for fragment {}",
                        request.index
                    )));
                }
            }
        }

        self.renders.lock().unwrap().push(RenderRecord {
            session_id: request.session_id.clone(),
            index: request.index,
            playback_rate: request.playback_rate,
            volume: request.volume,
            started: Instant::now(),
        });

        let counters = Arc::clone(&self.counters);
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(active, Ordering::SeqCst);

        let control = Arc::new(CountingControl {
            inner: NotifyControl::new(),
            counters: Arc::clone(&counters),
        });
        let task_control = Arc::clone(&control);
        let (done_tx, done_rx) = oneshot::channel();
        let duration = request.expected_duration();
        let hang = self.hang;

        tokio::spawn(async move {
            tokio::select! {
                _ = async {
                    if hang {
                        std::future::pending::<()>().await;
                    }
                    tokio::time::sleep(duration).await;
                } => {
                    let _ = done_tx.send(());
                }
                _ = task_control.inner.stopped() => {}
            }
            task_control.counters.active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(OutputHandle {
            completion: done_rx,
            control,
        })
    }
}
