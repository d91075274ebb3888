//! Per-key cooldown filter over the event stream.
//!
//! Keeps notification volume sane: once an event with a given dedup key has
//! been let through, identical keys are suppressed until the cooldown has
//! elapsed. All severities respect the cooldown, Critical included, so a
//! persistent condition re-reported on every probe tick cannot flood the
//! notifiers. The first occurrence of any key always passes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::event::{Event, EventType};

pub struct Deduplicator {
    seen: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
}

impl Deduplicator {
    pub fn new(cooldown: Duration) -> Self {
        Deduplicator {
            seen: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    /// Returns true when this event should reach the notifiers, recording
    /// the emission time when it does.
    pub fn should_alert(&self, event: &Event) -> bool {
        let key = dedup_key(event);
        let mut seen = self.seen.lock().unwrap();
        match seen.get(&key) {
            Some(last) if last.elapsed() <= self.cooldown => false,
            _ => {
                seen.insert(key, Instant::now());
                true
            }
        }
    }

    /// Drop entries idle for more than twice the cooldown so the map stays
    /// bounded. Called periodically by the daemon.
    pub fn cleanup(&self) {
        let mut seen = self.seen.lock().unwrap();
        let horizon = self.cooldown * 2;
        seen.retain(|_, last| last.elapsed() <= horizon);
    }
}

/// Stable dedup key: the primary discriminator of the event kind, falling
/// back to the message when no typed payload is present. The message
/// fallback is intentionally coarse; some kinds only carry text.
fn dedup_key(event: &Event) -> String {
    match event.kind {
        EventType::PortOpened | EventType::PortClosed => {
            if let Some(port) = &event.port {
                return format!("{}:{}", event.kind.as_str(), port.address);
            }
        }
        EventType::FirewallChanged => {
            if let Some(fw) = &event.firewall {
                return format!("{}:{}", event.kind.as_str(), fw.chain);
            }
        }
        _ => {}
    }
    format!("{}:{}", event.kind.as_str(), event.message)
}
