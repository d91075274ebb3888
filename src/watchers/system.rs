//! Local resource watcher: disk, memory and CPU temperature thresholds.
//!
//! No baseline here. A breached threshold fires on every tick and the
//! deduplicator absorbs the repetition downstream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::bus::Bus;
use crate::config::SystemConfig;
use crate::event::{Event, EventType, Severity};
use crate::probes;

use super::Watcher;

const POLL_INTERVAL: Duration = Duration::from_secs(60);

pub struct SystemWatcher {
    bus: Arc<Bus>,
    interval: Duration,
    disk_threshold: u32,
    memory_threshold: u32,
    temp_threshold: u32,
}

impl SystemWatcher {
    pub fn new(cfg: &SystemConfig, bus: Arc<Bus>) -> Self {
        SystemWatcher {
            bus,
            interval: POLL_INTERVAL,
            disk_threshold: cfg.disk_threshold,
            memory_threshold: cfg.memory_threshold,
            temp_threshold: cfg.temperature_threshold,
        }
    }

    fn check(&self) {
        let disk = probes::disk_usage_percent();
        let memory = probes::memory_used_percent();
        let temp = probes::cpu_temp_celsius();
        for event in self.evaluate(disk, memory, temp) {
            self.bus.publish(event);
        }
    }

    fn evaluate(&self, disk: u32, memory: u32, temp: f64) -> Vec<Event> {
        let mut events = Vec::new();

        if disk > self.disk_threshold {
            let mut event = Event::new(
                EventType::DiskHigh,
                Severity::Warning,
                "system",
                "",
                format!("Disk usage at {disk}% (threshold: {}%)", self.disk_threshold),
            );
            event.suggested = "Check large files: sudo du -sh /var/log/* /tmp/* ~/".to_string();
            events.push(event);
        }

        if memory > self.memory_threshold {
            let mut event = Event::new(
                EventType::MemoryHigh,
                Severity::Warning,
                "system",
                "",
                format!("Memory usage at {memory}% (threshold: {}%)", self.memory_threshold),
            );
            event.suggested = "Check memory: free -h && docker stats --no-stream".to_string();
            events.push(event);
        }

        // A zero reading means the sensor is absent, not cold.
        if temp > 0.0 && temp as u32 > self.temp_threshold {
            let mut event = Event::new(
                EventType::TempHigh,
                Severity::Warning,
                "system",
                "",
                format!(
                    "CPU temperature at {temp:.1}°C (threshold: {}°C)",
                    self.temp_threshold
                ),
            );
            event.suggested = "Check cooling: ensure ventilation or add a fan".to_string();
            events.push(event);
        }

        events
    }
}

#[async_trait]
impl Watcher for SystemWatcher {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("starting system watcher (interval {:?})", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => self.check(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher() -> SystemWatcher {
        let cfg = SystemConfig {
            disk_threshold: 80,
            memory_threshold: 90,
            temperature_threshold: 75,
        };
        SystemWatcher::new(&cfg, Arc::new(Bus::new()))
    }

    #[test]
    fn all_below_thresholds_is_silent() {
        assert!(watcher().evaluate(50, 60, 45.0).is_empty());
    }

    #[test]
    fn disk_breach_is_warning() {
        let events = watcher().evaluate(95, 60, 45.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::DiskHigh);
        assert_eq!(events[0].severity, Severity::Warning);
        assert!(events[0].message.contains("95%"));
    }

    #[test]
    fn memory_breach_is_warning() {
        let events = watcher().evaluate(50, 95, 45.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::MemoryHigh);
    }

    #[test]
    fn temperature_breach_is_warning() {
        let events = watcher().evaluate(50, 60, 81.5);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::TempHigh);
        assert!(events[0].message.contains("81.5"));
    }

    #[test]
    fn absent_sensor_reads_zero_and_is_silent() {
        assert!(watcher().evaluate(50, 60, 0.0).is_empty());
    }

    #[test]
    fn multiple_breaches_fire_together() {
        let events = watcher().evaluate(95, 95, 95.0);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn exact_threshold_does_not_fire() {
        assert!(watcher().evaluate(80, 90, 75.0).is_empty());
    }
}
