//! Engine event observers
//!
//! Observers are registered on the builder and called synchronously, outside
//! the engine lock, for every emitted event.

use sfp_common::events::{EngineEvent, EventBus};

/// Receives engine events
pub trait EngineObserver: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Forwards events to broadcast subscribers
impl EngineObserver for EventBus {
    fn on_event(&self, event: &EngineEvent) {
        self.emit_lossy(event.clone());
    }
}

impl<F> EngineObserver for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) {
        self(event)
    }
}
