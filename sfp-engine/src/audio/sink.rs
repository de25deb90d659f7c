//! Render primitive abstraction
//!
//! A `RenderSink` starts output for one decoded fragment and hands back an
//! `OutputHandle`: a completion notification plus a control used to stop the
//! output early. The engine never has more than one handle outstanding.

use crate::audio::DecodedAudio;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::trace;
use uuid::Uuid;

/// Everything a sink needs to render one fragment
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub render_id: Uuid,
    pub session_id: String,
    pub index: u32,
    pub audio: Arc<DecodedAudio>,
    /// Speed multiplier (1.0 = natural speed)
    pub playback_rate: f32,
    /// Gain in `[0.0, 1.0]`
    pub volume: f32,
}

impl RenderRequest {
    /// Wall-clock time the output should take at the requested rate
    pub fn expected_duration(&self) -> Duration {
        let rate = if self.playback_rate.is_finite() && self.playback_rate > 0.0 {
            self.playback_rate
        } else {
            1.0
        };
        self.audio.duration().div_f32(rate)
    }
}

/// Stops an output early
pub trait OutputControl: Send + Sync {
    /// Stop the output. Must be idempotent and safe after natural completion.
    fn stop(&self);
}

/// Handle to one active output
pub struct OutputHandle {
    /// Resolves when output reaches its natural end. A closed channel means
    /// the output ended without signalling (stopped or failed).
    pub completion: oneshot::Receiver<()>,
    pub control: Arc<dyn OutputControl>,
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle").finish_non_exhaustive()
    }
}

/// Host render primitive (sample buffer + rate + volume → output handle)
pub trait RenderSink: Send + Sync {
    /// Native sample rate of the output device
    fn sample_rate(&self) -> u32;

    /// Begin rendering. Returns once output has started.
    ///
    /// Runs on the blocking thread pool and may block while the output is
    /// prepared and started.
    fn render(&self, request: RenderRequest) -> Result<OutputHandle>;
}

/// Stop control backed by a `Notify`
#[derive(Debug, Default)]
pub struct NotifyControl {
    stop: Notify,
}

impl NotifyControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `stop()` is called
    pub async fn stopped(&self) {
        self.stop.notified().await;
    }
}

impl OutputControl for NotifyControl {
    fn stop(&self) {
        // notify_one stores a permit if the waiter is not parked yet
        self.stop.notify_one();
    }
}

/// Sink that "plays" by waiting out the expected duration on the tokio timer.
///
/// Used when no audio device is wanted (replays, dry runs).
#[derive(Debug, Clone)]
pub struct SimulatedSink {
    sample_rate: u32,
}

impl SimulatedSink {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self::new(48_000)
    }
}

impl RenderSink for SimulatedSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn render(&self, request: RenderRequest) -> Result<OutputHandle> {
        let (done_tx, done_rx) = oneshot::channel();
        let control = Arc::new(NotifyControl::new());
        let duration = request.expected_duration();
        let task_control = Arc::clone(&control);

        trace!(
            "Simulated render {} of fragment {} for {:?}",
            request.render_id,
            request.index,
            duration
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    let _ = done_tx.send(());
                }
                _ = task_control.stopped() => {
                    // Dropping the sender closes the completion channel
                }
            }
        });

        Ok(OutputHandle {
            completion: done_rx,
            control,
        })
    }
}
