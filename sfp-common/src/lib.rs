//! # SFP Common Library
//!
//! Shared code for the speech fragment player crates:
//! - Error type shared by configuration and utility code
//! - Configuration file resolution and TOML loading
//! - Engine event types (`EngineEvent`) and the broadcast `EventBus`
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
