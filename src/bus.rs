//! In-process broadcast event bus.
//!
//! Every registered sink receives every published event. Dispatch happens
//! in a fresh task per sink so a slow or failing sink never blocks the
//! publisher or its peers.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::event::Event;

/// A consumer of published events.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, event: Event);
}

/// Broadcast pub/sub. The subscriber list is read under a shared lock and
/// only mutated under the exclusive lock in `subscribe`.
pub struct Bus {
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Register a sink for all events. Duplicate registrations are allowed
    /// and receive the event once per registration.
    pub fn subscribe(&self, sink: Arc<dyn Sink>) {
        self.sinks.write().unwrap().push(sink);
    }

    /// Dispatch an event to every subscriber concurrently. Returns
    /// immediately; a panicking sink is isolated to its own task.
    pub fn publish(&self, event: Event) {
        let sinks: Vec<Arc<dyn Sink>> = self.sinks.read().unwrap().clone();
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move {
                sink.deliver(event).await;
            });
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
