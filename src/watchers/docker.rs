//! Container lifecycle watcher.
//!
//! Polls `docker ps --all` and diffs container state against the baseline:
//! crashes (non-zero exit), clean stops (opt-in), restarts, new containers
//! and health flips to (unhealthy). A host without docker is silently
//! skipped every tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::DockerConfig;
use crate::event::{Event, EventType, Severity};
use crate::probes::{self, ContainerState};

use super::Watcher;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

pub struct DockerWatcher {
    bus: Arc<Bus>,
    interval: Duration,
    alert_on_stop: bool,
    /// container id → last known state
    baseline: HashMap<String, ContainerState>,
}

impl DockerWatcher {
    pub fn new(cfg: &DockerConfig, bus: Arc<Bus>) -> Self {
        DockerWatcher {
            bus,
            interval: crate::config::duration_or(&cfg.poll_interval, DEFAULT_INTERVAL),
            alert_on_stop: cfg.alert_on_stop,
            baseline: HashMap::new(),
        }
    }

    fn check(&mut self) {
        let containers = match probes::list_containers() {
            Ok(c) => c,
            Err(err) => {
                debug!("docker check skipped: {err:#}");
                return;
            }
        };
        for event in self.diff(containers) {
            self.bus.publish(event);
        }
    }

    fn diff(&mut self, containers: Vec<ContainerState>) -> Vec<Event> {
        let current: HashMap<String, ContainerState> =
            containers.into_iter().map(|c| (c.id.clone(), c)).collect();

        let mut events = Vec::new();

        for (id, c) in &current {
            let Some(prev) = self.baseline.get(id) else {
                // Brand-new container; only a running one is worth a note.
                if c.state == "running" {
                    events.push(container_event(
                        EventType::ContainerStart,
                        Severity::Info,
                        format!("Container started: {} ({})", c.names, c.image),
                        String::new(),
                        c,
                    ));
                }
                continue;
            };

            if prev.state == "running" && c.state == "exited" {
                let exit_code = parse_exit_code(&c.status);
                if exit_code != 0 {
                    events.push(container_event(
                        EventType::ContainerDied,
                        Severity::Warning,
                        format!("Container crashed: {} (exit {})", c.names, exit_code),
                        format!("Check container logs: docker logs {}", c.names),
                        c,
                    ));
                } else if self.alert_on_stop {
                    events.push(container_event(
                        EventType::ContainerStopped,
                        Severity::Info,
                        format!("Container stopped: {}", c.names),
                        String::new(),
                        c,
                    ));
                }
            }

            if is_unhealthy(&c.status) && !is_unhealthy(&prev.status) {
                events.push(container_event(
                    EventType::ContainerUnhealthy,
                    Severity::Warning,
                    format!("Container unhealthy: {}", c.names),
                    format!("Check container logs: docker logs {}", c.names),
                    c,
                ));
            }

            if prev.state == "exited" && c.state == "running" {
                events.push(container_event(
                    EventType::ContainerStart,
                    Severity::Info,
                    format!("Container restarted: {} ({})", c.names, c.image),
                    String::new(),
                    c,
                ));
            }
        }

        self.baseline = current;
        events
    }
}

#[async_trait]
impl Watcher for DockerWatcher {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("starting docker watcher (interval {:?})", self.interval);

        match probes::list_containers() {
            Ok(containers) => {
                for c in containers {
                    self.baseline.insert(c.id.clone(), c);
                }
                info!("docker baseline established: {} containers", self.baseline.len());
            }
            Err(err) => warn!("docker not available at startup: {err:#}"),
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => self.check(),
            }
        }
    }
}

fn container_event(
    kind: EventType,
    severity: Severity,
    message: String,
    suggested: String,
    c: &ContainerState,
) -> Event {
    let short_id = if c.id.len() > 12 { &c.id[..12] } else { &c.id };
    let mut event = Event::new(kind, severity, "docker", short_id, message);
    event.details = format!("Image: {} | Status: {}", c.image, c.status);
    event.suggested = suggested;
    event
}

/// Extract the exit code from a status like "Exited (137) 1 minute ago".
fn parse_exit_code(status: &str) -> i32 {
    let Some(start) = status.find('(') else {
        return 0;
    };
    let Some(end) = status.find(')') else {
        return 0;
    };
    if end <= start {
        return 0;
    }
    status[start + 1..end].parse().unwrap_or(0)
}

fn is_unhealthy(status: &str) -> bool {
    status.contains("(unhealthy)")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(alert_on_stop: bool) -> DockerWatcher {
        let cfg = DockerConfig {
            enabled: true,
            poll_interval: "10s".into(),
            alert_on_stop,
        };
        DockerWatcher::new(&cfg, Arc::new(Bus::new()))
    }

    fn container(id: &str, state: &str, status: &str) -> ContainerState {
        ContainerState {
            id: id.to_string(),
            names: "myapp".into(),
            image: "myimage:v1".into(),
            state: state.to_string(),
            status: status.to_string(),
            ports: String::new(),
        }
    }

    fn seed(w: &mut DockerWatcher, containers: &[ContainerState]) {
        for c in containers {
            w.baseline.insert(c.id.clone(), c.clone());
        }
    }

    #[test]
    fn exit_code_parsing() {
        assert_eq!(parse_exit_code("Exited (0) 3 minutes ago"), 0);
        assert_eq!(parse_exit_code("Exited (1) 3 minutes ago"), 1);
        assert_eq!(parse_exit_code("Exited (137) 1 hour ago"), 137);
        assert_eq!(parse_exit_code("Up 2 hours"), 0);
        assert_eq!(parse_exit_code(""), 0);
        assert_eq!(parse_exit_code("Exited () bad"), 0);
    }

    #[test]
    fn unhealthy_detection() {
        assert!(is_unhealthy("Up 3 hours (unhealthy)"));
        assert!(!is_unhealthy("Up 3 hours (healthy)"));
        assert!(!is_unhealthy("Up 1 minute"));
        assert!(!is_unhealthy(""));
    }

    #[test]
    fn crash_is_warning_with_exit_code() {
        let mut w = watcher(false);
        seed(&mut w, &[container("abc123fullid", "running", "Up 1 hour")]);

        let events = w.diff(vec![container("abc123fullid", "exited", "Exited (137) 1m ago")]);

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, EventType::ContainerDied);
        assert_eq!(e.severity, Severity::Warning);
        assert!(e.message.contains("exit 137"));
        assert!(e.details.contains("137"));
    }

    #[test]
    fn clean_stop_is_silent_by_default() {
        let mut w = watcher(false);
        seed(&mut w, &[container("abc123fullid", "running", "Up 1 hour")]);

        let events = w.diff(vec![container("abc123fullid", "exited", "Exited (0) 1m ago")]);
        assert!(events.is_empty());
    }

    #[test]
    fn clean_stop_alerts_when_opted_in() {
        let mut w = watcher(true);
        seed(&mut w, &[container("abc123fullid", "running", "Up 1 hour")]);

        let events = w.diff(vec![container("abc123fullid", "exited", "Exited (0) 1m ago")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::ContainerStopped);
        assert_eq!(events[0].severity, Severity::Info);
    }

    #[test]
    fn unhealthy_flip_fires_once() {
        let mut w = watcher(false);
        seed(&mut w, &[container("abc123fullid", "running", "Up 1 hour (healthy)")]);

        let events = w.diff(vec![container("abc123fullid", "running", "Up 1 hour (unhealthy)")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::ContainerUnhealthy);
        assert_eq!(events[0].severity, Severity::Warning);

        // Still unhealthy on the next tick: no repeat.
        let events = w.diff(vec![container("abc123fullid", "running", "Up 2 hours (unhealthy)")]);
        assert!(events.is_empty());
    }

    #[test]
    fn restart_after_exit_is_info() {
        let mut w = watcher(false);
        seed(&mut w, &[container("abc123fullid", "exited", "Exited (1) 2m ago")]);

        let events = w.diff(vec![container("abc123fullid", "running", "Up 5 seconds")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::ContainerStart);
        assert!(events[0].message.contains("restarted"));
    }

    #[test]
    fn unknown_running_container_is_a_start() {
        let mut w = watcher(false);
        let events = w.diff(vec![container("newid123", "running", "Up 1 second")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::ContainerStart);
    }

    #[test]
    fn unknown_exited_container_is_silent() {
        let mut w = watcher(false);
        let events = w.diff(vec![container("newid123", "exited", "Exited (0) 1 week ago")]);
        assert!(events.is_empty());
    }

    #[test]
    fn baseline_is_replaced_each_tick() {
        let mut w = watcher(false);
        seed(&mut w, &[container("gone", "running", "Up 1 hour")]);

        w.diff(vec![container("fresh", "running", "Up 1 second")]);
        assert!(!w.baseline.contains_key("gone"));
        assert!(w.baseline.contains_key("fresh"));
    }
}
