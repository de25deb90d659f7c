//! Replay of recorded delivery timelines
//!
//! A timeline is JSON Lines: one delivery per line plus `at_ms`, the arrival
//! offset from the start of the replay. Blank lines and `#` comments are
//! skipped.
//!
//! ```text
//! {"at_ms": 0, "session_id": "s1", "fragment_index": 1, "total_fragments": 2, "payload": "..."}
//! {"at_ms": 40, "session_id": "s1", "fragment_index": 0, "total_fragments": 2, "payload": "..."}
//! ```

use crate::error::{Error, Result};
use crate::fragment::Delivery;
use crate::playback::{EngineMetrics, FragmentEngine};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct TimelineLine {
    at_ms: u64,
    #[serde(flatten)]
    delivery: Delivery,
}

#[derive(Debug, Clone)]
pub enum ReplayAction {
    Deliver(Delivery),
    Interrupt,
}

#[derive(Debug, Clone)]
pub struct ReplayStep {
    pub at: Duration,
    pub action: ReplayAction,
}

/// Parse a timeline, optionally adding an interrupt at `interrupt_at_ms`.
///
/// Steps come back sorted by time; equal times keep file order, and an
/// interrupt sorts after deliveries at the same instant.
pub fn parse_timeline(content: &str, interrupt_at_ms: Option<u64>) -> Result<Vec<ReplayStep>> {
    let mut steps = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: TimelineLine = serde_json::from_str(line).map_err(|e| {
            Error::Validation(format!("timeline line {}: {}", line_no + 1, e))
        })?;
        steps.push(ReplayStep {
            at: Duration::from_millis(parsed.at_ms),
            action: ReplayAction::Deliver(parsed.delivery),
        });
    }

    if let Some(at_ms) = interrupt_at_ms {
        steps.push(ReplayStep {
            at: Duration::from_millis(at_ms),
            action: ReplayAction::Interrupt,
        });
    }

    steps.sort_by_key(|step| step.at);
    Ok(steps)
}

/// Feed the timeline into the engine in real (tokio) time, then wait up to
/// `settle` for playback to go idle.
pub async fn run(engine: &FragmentEngine, steps: &[ReplayStep], settle: Duration) -> EngineMetrics {
    let start = Instant::now();

    for step in steps {
        tokio::time::sleep_until(start + step.at).await;
        match &step.action {
            ReplayAction::Deliver(delivery) => match engine.deliver(delivery) {
                Ok(outcome) => debug!(
                    "t={}ms fragment {} of {}: {:?}",
                    step.at.as_millis(),
                    delivery.fragment_index,
                    delivery.session_id,
                    outcome
                ),
                Err(e) => warn!("t={}ms delivery rejected: {}", step.at.as_millis(), e),
            },
            ReplayAction::Interrupt => {
                info!("t={}ms interrupting", step.at.as_millis());
                engine.interrupt();
            }
        }
    }

    let deadline = Instant::now() + settle;
    while Instant::now() < deadline {
        if !engine.is_playing() && engine.queue_length() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    engine.metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sorts_and_adds_interrupt() {
        let content = r#"
# two fragments, second arrives first
{"at_ms": 40, "session_id": "s1", "fragment_index": 0, "total_fragments": 2, "payload": "AAAA"}
{"at_ms": 0, "session_id": "s1", "fragment_index": 1, "total_fragments": 2, "payload": "AAAA"}
"#;
        let steps = parse_timeline(content, Some(40)).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].at, Duration::from_millis(0));
        assert!(matches!(
            &steps[1].action,
            ReplayAction::Deliver(d) if d.fragment_index == 0
        ));
        assert!(matches!(steps[2].action, ReplayAction::Interrupt));
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let content = "{\"at_ms\": 0}\n";
        let err = parse_timeline(content, None).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
