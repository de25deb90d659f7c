//! # Speech Fragment Player engine (sfp-engine)
//!
//! Client-side engine that takes the audio fragments of a synthesized-speech
//! response, which arrive out of order, duplicated or late, and plays them in
//! index order with no overlap.
//!
//! **Architecture:** reorder buffer + readiness rules feed a single playback
//! driver task; a periodic tick handles time-based readiness, session expiry
//! and the stuck-output watchdog. Decoding uses symphonia; output goes
//! through a [`audio::RenderSink`] (simulated by default, cpal with the
//! `device-output` feature).

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod fragment;
pub mod params;
pub mod playback;
pub mod replay;

pub use error::{Error, Result};
pub use fragment::{Delivery, Fragment};
pub use playback::{EngineBuilder, EngineMetrics, EngineObserver, FragmentEngine, SubmitOutcome};
