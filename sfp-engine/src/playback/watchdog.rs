//! Stuck-output detection
//!
//! Output counts as stuck when it is still marked active but no fragment has
//! arrived for longer than the stuck threshold. Checks are throttled to one
//! per watchdog interval.

use crate::config::WatchdogConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Result of one watchdog check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Throttled; no check performed
    Skipped,
    Healthy,
    /// Output should be force-cleared
    Stuck { silence: Duration },
}

#[derive(Debug)]
pub struct StuckOutputWatchdog {
    interval: Duration,
    threshold: Duration,
    last_check: Option<Instant>,
}

impl StuckOutputWatchdog {
    pub fn new(config: &WatchdogConfig) -> Self {
        Self {
            interval: config.watchdog_interval(),
            threshold: config.stuck_threshold(),
            last_check: None,
        }
    }

    /// Run a check if one is due.
    ///
    /// `last_progress` is the last fragment arrival (or, when configured, the
    /// later of that and the last render start).
    pub fn check(
        &mut self,
        now: Instant,
        active_outputs: usize,
        last_progress: Option<Instant>,
    ) -> WatchdogVerdict {
        if let Some(last) = self.last_check {
            if now.saturating_duration_since(last) < self.interval {
                return WatchdogVerdict::Skipped;
            }
        }
        self.last_check = Some(now);

        if active_outputs == 0 {
            return WatchdogVerdict::Healthy;
        }
        match last_progress {
            Some(progress) => {
                let silence = now.saturating_duration_since(progress);
                if silence > self.threshold {
                    WatchdogVerdict::Stuck { silence }
                } else {
                    WatchdogVerdict::Healthy
                }
            }
            None => WatchdogVerdict::Healthy,
        }
    }
}
