//! Configuration for the fragment engine
//!
//! All settings have built-in defaults; a TOML file only needs to name the
//! values it overrides. Durations are integer milliseconds.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [reorder]
//! queue_capacity = 50
//!
//! [session]
//! overlap_reset_gap_ms = 2000
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use sfp_common::time::millis_to_duration;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file layout
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Engine tuning
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl FileConfig {
    /// Resolve (CLI → `SFP_CONFIG` → user config dir) and load the config
    /// file, falling back to defaults when none exists.
    pub fn load(cli_arg: Option<&Path>) -> Result<Self> {
        let (config, _path): (FileConfig, _) =
            sfp_common::config::load_or_default(cli_arg, sfp_common::config::CONFIG_ENV_VAR)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FileConfig = sfp_common::config::parse_toml(content)?;
        config.engine.validate()?;
        Ok(config)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub reorder: ReorderConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl EngineConfig {
    /// Reject settings that would stall or break the engine
    pub fn validate(&self) -> Result<()> {
        if self.reorder.queue_capacity == 0 {
            return Err(Error::Config("reorder.queue_capacity must be at least 1".into()));
        }
        if self.playback.max_render_attempts == 0 {
            return Err(Error::Config(
                "playback.max_render_attempts must be at least 1".into(),
            ));
        }
        if !self.playback.base_volume.is_finite() || !(0.0..=1.0).contains(&self.playback.base_volume) {
            return Err(Error::Config(format!(
                "playback.base_volume must be within [0, 1], got {}",
                self.playback.base_volume
            )));
        }
        if self.playback.min_fragment_duration_ms > self.playback.max_fragment_duration_ms {
            return Err(Error::Config(
                "playback.min_fragment_duration_ms exceeds max_fragment_duration_ms".into(),
            ));
        }
        if self.watchdog.tick_interval_ms == 0 {
            return Err(Error::Config("watchdog.tick_interval_ms must be at least 1".into()));
        }
        Ok(())
    }
}

/// Reorder buffer and readiness thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct ReorderConfig {
    /// Maximum buffered fragments; the lowest index is evicted on overflow
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Largest number of missing indices tolerated between neighbours of a
    /// consecutive run
    #[serde(default = "default_max_run_gap")]
    pub max_run_gap: u32,

    /// Responses with at most this many fragments play once complete
    #[serde(default = "default_short_response_max_fragments")]
    pub short_response_max_fragments: u32,

    /// Wait after the first buffered fragment before flushing two or more
    #[serde(default = "default_ready_wait_ms")]
    pub ready_wait_ms: u64,

    /// Queue length that triggers playback regardless of gaps
    #[serde(default = "default_aggressive_flush_len")]
    pub aggressive_flush_len: usize,

    /// Arrivals closer together than this count as streaming
    #[serde(default = "default_streaming_window_ms")]
    pub streaming_window_ms: u64,

    /// Quick consecutive arrivals required for the streaming rule
    #[serde(default = "default_streaming_min_arrivals")]
    pub streaming_min_arrivals: u32,

    /// Wait after which even a single buffered fragment is played
    #[serde(default = "default_stall_flush_ms")]
    pub stall_flush_ms: u64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_run_gap: default_max_run_gap(),
            short_response_max_fragments: default_short_response_max_fragments(),
            ready_wait_ms: default_ready_wait_ms(),
            aggressive_flush_len: default_aggressive_flush_len(),
            streaming_window_ms: default_streaming_window_ms(),
            streaming_min_arrivals: default_streaming_min_arrivals(),
            stall_flush_ms: default_stall_flush_ms(),
        }
    }
}

impl ReorderConfig {
    pub fn ready_wait(&self) -> Duration {
        millis_to_duration(self.ready_wait_ms)
    }

    pub fn streaming_window(&self) -> Duration {
        millis_to_duration(self.streaming_window_ms)
    }

    pub fn stall_flush(&self) -> Duration {
        millis_to_duration(self.stall_flush_ms)
    }
}

fn default_queue_capacity() -> usize {
    50
}
fn default_max_run_gap() -> u32 {
    1
}
fn default_short_response_max_fragments() -> u32 {
    3
}
fn default_ready_wait_ms() -> u64 {
    500
}
fn default_aggressive_flush_len() -> usize {
    3
}
fn default_streaming_window_ms() -> u64 {
    100
}
fn default_streaming_min_arrivals() -> u32 {
    2
}
fn default_stall_flush_ms() -> u64 {
    1500
}

/// Render loop and decode validation settings
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// Total render attempts per fragment (first try included)
    #[serde(default = "default_max_render_attempts")]
    pub max_render_attempts: u32,

    /// Retry backoff unit; attempt `n` waits `n * retry_backoff_ms`
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Added to the expected render duration before completion is forced
    #[serde(default = "default_forced_completion_margin_ms")]
    pub forced_completion_margin_ms: u64,

    /// Pause between fragments before adaptive adjustment
    #[serde(default = "default_base_inter_fragment_delay_ms")]
    pub base_inter_fragment_delay_ms: f64,

    /// Volume before adaptive adjustment (0.0-1.0)
    #[serde(default = "default_base_volume")]
    pub base_volume: f32,

    /// Smallest acceptable decoded payload
    #[serde(default = "default_min_payload_bytes")]
    pub min_payload_bytes: usize,

    /// Decoded audio shorter than this is treated as corrupt
    #[serde(default = "default_min_fragment_duration_ms")]
    pub min_fragment_duration_ms: u64,

    /// Decoded audio longer than this is treated as corrupt
    #[serde(default = "default_max_fragment_duration_ms")]
    pub max_fragment_duration_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_render_attempts: default_max_render_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            forced_completion_margin_ms: default_forced_completion_margin_ms(),
            base_inter_fragment_delay_ms: default_base_inter_fragment_delay_ms(),
            base_volume: default_base_volume(),
            min_payload_bytes: default_min_payload_bytes(),
            min_fragment_duration_ms: default_min_fragment_duration_ms(),
            max_fragment_duration_ms: default_max_fragment_duration_ms(),
        }
    }
}

impl PlaybackConfig {
    /// Backoff before retry number `attempt` (1-based)
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn forced_completion_margin(&self) -> Duration {
        millis_to_duration(self.forced_completion_margin_ms)
    }
}

fn default_max_render_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    200
}
fn default_forced_completion_margin_ms() -> u64 {
    5000
}
fn default_base_inter_fragment_delay_ms() -> f64 {
    5.0
}
fn default_base_volume() -> f32 {
    0.8
}
fn default_min_payload_bytes() -> usize {
    4
}
fn default_min_fragment_duration_ms() -> u64 {
    1
}
fn default_max_fragment_duration_ms() -> u64 {
    10_000
}

/// Session identity policy
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Treat a recurring index 0 on the current session as a new response
    /// when it arrives at least `overlap_reset_gap_ms` after the last activity
    #[serde(default = "default_overlap_detection")]
    pub overlap_detection: bool,

    #[serde(default = "default_overlap_reset_gap_ms")]
    pub overlap_reset_gap_ms: u64,

    /// Sessions older than this are cleared as stale
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            overlap_detection: default_overlap_detection(),
            overlap_reset_gap_ms: default_overlap_reset_gap_ms(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn overlap_reset_gap(&self) -> Duration {
        millis_to_duration(self.overlap_reset_gap_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        millis_to_duration(self.session_timeout_ms)
    }
}

fn default_overlap_detection() -> bool {
    true
}
fn default_overlap_reset_gap_ms() -> u64 {
    2000
}
fn default_session_timeout_ms() -> u64 {
    10_000
}

/// Scheduled tick and stuck-output watchdog
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Interval of the single scheduled tick
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Minimum spacing between watchdog checks
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Expected maximum spacing between fragment arrivals
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Silence of `chunk_timeout_ms * stuck_output_multiplier` with output
    /// still active counts as stuck
    #[serde(default = "default_stuck_output_multiplier")]
    pub stuck_output_multiplier: u32,

    /// Also treat a render start as progress. Off: silence is measured from
    /// the last fragment arrival only.
    #[serde(default)]
    pub render_start_resets_silence: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            stuck_output_multiplier: default_stuck_output_multiplier(),
            render_start_resets_silence: false,
        }
    }
}

impl WatchdogConfig {
    pub fn tick_interval(&self) -> Duration {
        millis_to_duration(self.tick_interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        millis_to_duration(self.watchdog_interval_ms)
    }

    /// Silence threshold after which active output is considered stuck
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(
            self.chunk_timeout_ms
                .saturating_mul(u64::from(self.stuck_output_multiplier)),
        )
    }
}

fn default_tick_interval_ms() -> u64 {
    100
}
fn default_watchdog_interval_ms() -> u64 {
    10_000
}
fn default_chunk_timeout_ms() -> u64 {
    5000
}
fn default_stuck_output_multiplier() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reorder.queue_capacity, 50);
        assert_eq!(config.reorder.ready_wait(), Duration::from_millis(500));
        assert_eq!(config.playback.max_render_attempts, 3);
        assert_eq!(config.playback.retry_backoff(2), Duration::from_millis(400));
        assert_eq!(config.session.overlap_reset_gap(), Duration::from_millis(2000));
        assert_eq!(config.watchdog.stuck_threshold(), Duration::from_millis(15_000));
        assert!(!config.watchdog.render_start_resets_silence);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FileConfig::from_toml_str(
            r#"
            [logging]
            level = "debug"

            [reorder]
            queue_capacity = 20

            [session]
            overlap_detection = false
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.engine.reorder.queue_capacity, 20);
        assert_eq!(config.engine.reorder.max_run_gap, 1);
        assert!(!config.engine.session.overlap_detection);
        assert_eq!(config.engine.session.session_timeout_ms, 10_000);
        assert_eq!(config.engine.watchdog.chunk_timeout_ms, 5000);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config = FileConfig::from_toml_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.playback.base_volume, 0.8);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let result = FileConfig::from_toml_str("[reorder]\nqueue_capacity = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_volume() {
        let mut config = EngineConfig::default();
        config.playback.base_volume = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sfp.toml");
        std::fs::write(&path, "[watchdog]\nchunk_timeout_ms = 1000\n").unwrap();

        let config = FileConfig::load(Some(&path)).unwrap();
        assert_eq!(
            config.engine.watchdog.stuck_threshold(),
            Duration::from_millis(3000)
        );
    }
}
