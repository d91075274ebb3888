//! Listening-socket watcher.
//!
//! Polls `ss -tlnp` on a short interval and diffs against the baseline.
//! True kernel socket-diag subscriptions would push instead of poll, but a
//! two second poll keeps detection sub-second enough for a single host and
//! stays trivially portable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::config::PortsConfig;
use crate::event::{Event, EventType, PortInfo, Severity};
use crate::probes::{self, ContainerState};

use super::Watcher;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct PortWatcher {
    bus: Arc<Bus>,
    ignore: Vec<String>,
    interval: Duration,
    baseline: HashMap<String, PortInfo>,
}

impl PortWatcher {
    pub fn new(cfg: &PortsConfig, bus: Arc<Bus>) -> Self {
        PortWatcher {
            bus,
            ignore: cfg.ignore.clone(),
            interval: POLL_INTERVAL,
            baseline: HashMap::new(),
        }
    }

    fn check(&mut self) {
        let current = match scan_ports() {
            Ok(ports) => ports,
            Err(err) => {
                debug!("port scan skipped: {err:#}");
                return;
            }
        };
        for event in self.diff(current) {
            self.bus.publish(event);
        }
    }

    /// Diff the current snapshot against the baseline, then replace the
    /// baseline wholesale.
    fn diff(&mut self, current: Vec<PortInfo>) -> Vec<Event> {
        let current: HashMap<String, PortInfo> =
            current.into_iter().map(|p| (p.address.clone(), p)).collect();

        let mut events = Vec::new();

        for (addr, port) in &current {
            if self.baseline.contains_key(addr) {
                continue;
            }
            if self.is_ignored(addr) {
                continue;
            }
            events.push(port_opened_event(port.clone()));
        }

        for (addr, port) in &self.baseline {
            if !current.contains_key(addr) {
                events.push(port_closed_event(port.clone()));
            }
        }

        self.baseline = current;
        events
    }

    fn is_ignored(&self, addr: &str) -> bool {
        self.ignore.iter().any(|p| matches_pattern(addr, p))
    }
}

#[async_trait]
impl Watcher for PortWatcher {
    fn name(&self) -> &'static str {
        "ports"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("starting port watcher (interval {:?})", self.interval);

        let ports = scan_ports().context("initial port scan")?;
        for port in ports {
            self.baseline.insert(port.address.clone(), port);
        }
        info!("port baseline established: {} sockets", self.baseline.len());

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => self.check(),
            }
        }
    }
}

/// Scan and enrich: every socket gets a process name, and docker-proxy
/// sockets are resolved to their owning container.
fn scan_ports() -> Result<Vec<PortInfo>> {
    let mut ports = probes::listening_sockets()?;

    let mut containers: Option<Vec<ContainerState>> = None;
    for port in &mut ports {
        if port.pid == 0 {
            continue;
        }
        if port.process_name.is_empty() {
            port.process_name = probes::process_name(port.pid);
        }
        if port.process_name == "docker-proxy" {
            let containers =
                containers.get_or_insert_with(|| probes::list_containers().unwrap_or_default());
            if let Some(c) = container_for_address(containers, &port.address) {
                port.container_name = c.names.clone();
                port.container_id = c.id.clone();
            }
        }
    }
    Ok(ports)
}

/// Find the container whose published port mappings cover `address`.
fn container_for_address<'a>(
    containers: &'a [ContainerState],
    address: &str,
) -> Option<&'a ContainerState> {
    let (_, port) = address.rsplit_once(':')?;
    let needle = format!(":{port}->");
    containers.iter().find(|c| c.ports.contains(&needle))
}

/// Exact match, or "host:*" matching any port on that host.
fn matches_pattern(addr: &str, pattern: &str) -> bool {
    if pattern == addr {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return addr.starts_with(prefix);
    }
    false
}

fn port_opened_event(port: PortInfo) -> Event {
    let severity = port.risk_level();

    let mut message = format!("New listening port: {} → {}", port.address, port.process_name);
    if !port.container_name.is_empty() {
        message = format!(
            "New listening port: {} → {} (container: {})",
            port.address, port.process_name, port.container_name
        );
    }

    let mut event = Event::new(EventType::PortOpened, severity, "ports", &port.address, message);
    if port.is_exposed {
        event.details = "Bound to all interfaces — accessible from network".to_string();
        event.suggested =
            "If this should be local-only, bind to 127.0.0.1 instead of 0.0.0.0".to_string();
    } else {
        event.details = "Localhost only — not network accessible ✓".to_string();
    }
    event.port = Some(port);
    event
}

fn port_closed_event(port: PortInfo) -> Event {
    let mut event = Event::new(
        EventType::PortClosed,
        Severity::Info,
        "ports",
        &port.address,
        format!("Port closed: {} → {}", port.address, port.process_name),
    );
    event.port = Some(port);
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(ignore: &[&str]) -> PortWatcher {
        let cfg = PortsConfig {
            enabled: true,
            ignore: ignore.iter().map(|s| s.to_string()).collect(),
            cooldown: "15m".into(),
        };
        PortWatcher::new(&cfg, Arc::new(Bus::new()))
    }

    fn port(addr: &str, process: &str) -> PortInfo {
        PortInfo {
            address: addr.to_string(),
            protocol: "tcp".into(),
            pid: 1,
            process_name: process.to_string(),
            is_exposed: probes::address_is_exposed(addr),
            ..Default::default()
        }
    }

    #[test]
    fn pattern_matching() {
        assert!(matches_pattern("127.0.0.1:8080", "127.0.0.1:8080"));
        assert!(matches_pattern("127.0.0.1:8080", "127.0.0.1:*"));
        assert!(matches_pattern("::1:8080", "::1:*"));
        assert!(!matches_pattern("0.0.0.0:8080", "127.0.0.1:*"));
        assert!(!matches_pattern("127.0.0.1:8080", "127.0.0.1:9090"));
    }

    #[test]
    fn new_exposed_port_is_warning() {
        let mut w = watcher(&["127.0.0.1:*"]);
        w.baseline.insert("0.0.0.0:22".into(), port("0.0.0.0:22", "sshd"));

        let events = w.diff(vec![port("0.0.0.0:22", "sshd"), port("0.0.0.0:8080", "node")]);

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, EventType::PortOpened);
        assert_eq!(e.severity, Severity::Warning);
        let p = e.port.as_ref().unwrap();
        assert_eq!(p.address, "0.0.0.0:8080");
        assert!(p.is_exposed);
    }

    #[test]
    fn new_local_port_is_info() {
        let mut w = watcher(&[]);
        let events = w.diff(vec![port("127.0.0.1:5432", "postgres")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Info);
    }

    #[test]
    fn ignored_port_is_silent() {
        let mut w = watcher(&["127.0.0.1:*"]);
        let events = w.diff(vec![port("127.0.0.1:5432", "postgres")]);
        assert!(events.is_empty());
        // Ignored sockets still become part of the baseline.
        assert!(w.baseline.contains_key("127.0.0.1:5432"));
    }

    #[test]
    fn vanished_port_emits_closed() {
        let mut w = watcher(&[]);
        w.baseline.insert("0.0.0.0:8080".into(), port("0.0.0.0:8080", "node"));

        let events = w.diff(vec![]);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::PortClosed);
        assert_eq!(events[0].severity, Severity::Info);
        assert!(w.baseline.is_empty());
    }

    #[test]
    fn unchanged_snapshot_is_silent() {
        let mut w = watcher(&[]);
        w.baseline.insert("0.0.0.0:22".into(), port("0.0.0.0:22", "sshd"));
        let events = w.diff(vec![port("0.0.0.0:22", "sshd")]);
        assert!(events.is_empty());
    }

    #[test]
    fn empty_baseline_empty_snapshot() {
        let mut w = watcher(&[]);
        assert!(w.diff(vec![]).is_empty());
    }

    #[test]
    fn container_lookup_matches_published_port() {
        let containers = vec![
            ContainerState {
                id: "aaa".into(),
                names: "nginx".into(),
                ports: "0.0.0.0:8080->80/tcp".into(),
                ..Default::default()
            },
            ContainerState {
                id: "bbb".into(),
                names: "redis".into(),
                ports: "127.0.0.1:6379->6379/tcp".into(),
                ..Default::default()
            },
        ];

        let hit = container_for_address(&containers, "0.0.0.0:8080").unwrap();
        assert_eq!(hit.names, "nginx");
        assert!(container_for_address(&containers, "0.0.0.0:9999").is_none());
    }
}
