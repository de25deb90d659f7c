//! Playback pipeline: reorder buffer, session tracking, driver, watchdog

pub mod cursor;
mod driver;
pub mod engine;
pub mod metrics;
pub mod observer;
pub mod reorder;
pub mod session;
pub mod watchdog;

pub use engine::{EngineBuilder, FragmentEngine, SubmitOutcome};
pub use metrics::EngineMetrics;
pub use observer::EngineObserver;
