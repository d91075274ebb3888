//! Network-neighbour watcher.
//!
//! Polls the ARP neighbour table and alerts on MAC addresses never seen
//! before. The baseline grows by union: ARP entries age out for idle
//! devices (sleeping phones and the like), so a departed MAC is kept to
//! avoid a spurious new-device alert when it reappears. Only the opt-in
//! leave alert removes entries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::config::NetworkConfig;
use crate::event::{Event, EventType, Severity};
use crate::probes;

use super::Watcher;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbour {
    pub ip: String,
    pub mac: String,
}

pub struct NetworkWatcher {
    bus: Arc<Bus>,
    interval: Duration,
    alert_on_leave: bool,
    ignore_macs: HashSet<String>,
    /// lowercase MAC → device
    baseline: HashMap<String, Neighbour>,
}

impl NetworkWatcher {
    pub fn new(cfg: &NetworkConfig, bus: Arc<Bus>) -> Self {
        NetworkWatcher {
            bus,
            interval: crate::config::duration_or(&cfg.poll_interval, DEFAULT_INTERVAL),
            alert_on_leave: cfg.alert_on_leave,
            ignore_macs: cfg.ignore_macs.iter().map(|m| m.to_lowercase()).collect(),
            baseline: HashMap::new(),
        }
    }

    fn check(&mut self) {
        let raw = match probes::arp_table() {
            Ok(out) => out,
            Err(err) => {
                debug!("neighbour check skipped: {err:#}");
                return;
            }
        };
        for event in self.diff(parse_ip_neigh(&raw)) {
            self.bus.publish(event);
        }
    }

    fn diff(&mut self, devices: Vec<Neighbour>) -> Vec<Event> {
        let current: HashMap<String, Neighbour> =
            devices.into_iter().map(|d| (d.mac.clone(), d)).collect();

        let mut events = Vec::new();

        for (mac, device) in &current {
            if self.ignore_macs.contains(mac) {
                continue;
            }
            if !self.baseline.contains_key(mac) {
                events.push(Event::new(
                    EventType::NetworkNewDevice,
                    Severity::Info,
                    "network",
                    mac,
                    format!("New device on network: {} ({})", device.ip, mac),
                ));
            }
        }

        if self.alert_on_leave {
            let departed: Vec<String> = self
                .baseline
                .keys()
                .filter(|mac| !current.contains_key(*mac) && !self.ignore_macs.contains(*mac))
                .cloned()
                .collect();
            for mac in departed {
                if let Some(device) = self.baseline.remove(&mac) {
                    events.push(Event::new(
                        EventType::NetworkDeviceLeft,
                        Severity::Info,
                        "network",
                        &mac,
                        format!("Device left network: {} ({})", device.ip, mac),
                    ));
                }
            }
        }

        // Union update: current devices are added or refreshed, departed
        // ones stay unless the leave alert removed them above.
        for (mac, device) in current {
            self.baseline.insert(mac, device);
        }

        events
    }
}

#[async_trait]
impl Watcher for NetworkWatcher {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("starting network watcher (interval {:?})", self.interval);

        match probes::arp_table() {
            Ok(raw) => {
                for device in parse_ip_neigh(&raw) {
                    self.baseline.insert(device.mac.clone(), device);
                }
                info!("network baseline established: {} devices", self.baseline.len());
            }
            Err(err) => warn!("ip neigh not available at startup: {err:#}"),
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => self.check(),
            }
        }
    }
}

/// Parse `ip neigh show` output into devices with known MACs. Entries in
/// FAILED or INCOMPLETE state never responded and are dropped. MACs are
/// normalised to lowercase.
pub fn parse_ip_neigh(output: &str) -> Vec<Neighbour> {
    let mut devices = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let state = fields[fields.len() - 1];
        if state == "FAILED" || state == "INCOMPLETE" {
            continue;
        }
        let Some(lladdr_idx) = fields.iter().position(|f| *f == "lladdr") else {
            continue; // no MAC, e.g. a directly-connected interface entry
        };
        let Some(mac) = fields.get(lladdr_idx + 1) else {
            continue;
        };
        devices.push(Neighbour {
            ip: fields[0].to_string(),
            mac: mac.to_lowercase(),
        });
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(alert_on_leave: bool, ignore: &[&str]) -> NetworkWatcher {
        let cfg = NetworkConfig {
            enabled: true,
            poll_interval: "5m".into(),
            alert_on_leave,
            ignore_macs: ignore.iter().map(|s| s.to_string()).collect(),
        };
        NetworkWatcher::new(&cfg, Arc::new(Bus::new()))
    }

    fn device(ip: &str, mac: &str) -> Neighbour {
        Neighbour {
            ip: ip.to_string(),
            mac: mac.to_string(),
        }
    }

    const IP_NEIGH_SAMPLE: &str = "\
192.168.1.10 dev eth0 lladdr AA:BB:CC:DD:EE:01 REACHABLE
192.168.1.11 dev eth0 lladdr aa:bb:cc:dd:ee:02 STALE
192.168.1.12 dev eth0  FAILED
192.168.1.13 dev eth0 lladdr aa:bb:cc:dd:ee:03 INCOMPLETE
fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:01 router REACHABLE
";

    #[test]
    fn parse_ip_neigh_filters_and_normalises() {
        let devices = parse_ip_neigh(IP_NEIGH_SAMPLE);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].mac, "aa:bb:cc:dd:ee:01");
        assert_eq!(devices[0].ip, "192.168.1.10");
        assert_eq!(devices[1].mac, "aa:bb:cc:dd:ee:02");
    }

    #[test]
    fn parse_ip_neigh_empty() {
        assert!(parse_ip_neigh("").is_empty());
        assert!(parse_ip_neigh("\n\n").is_empty());
    }

    #[test]
    fn new_mac_alerts() {
        let mut w = watcher(false, &[]);
        let events = w.diff(vec![device("192.168.1.10", "aa:bb:cc:dd:ee:01")]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::NetworkNewDevice);
        assert_eq!(events[0].severity, Severity::Info);
        assert!(events[0].message.contains("192.168.1.10"));
    }

    #[test]
    fn known_mac_is_silent() {
        let mut w = watcher(false, &[]);
        w.baseline
            .insert("aa:bb:cc:dd:ee:01".into(), device("192.168.1.10", "aa:bb:cc:dd:ee:01"));
        let events = w.diff(vec![device("192.168.1.10", "aa:bb:cc:dd:ee:01")]);
        assert!(events.is_empty());
    }

    #[test]
    fn ignored_mac_never_alerts() {
        let mut w = watcher(false, &["aa:bb:cc:dd:ee:01"]);
        let events = w.diff(vec![device("192.168.1.10", "aa:bb:cc:dd:ee:01")]);
        assert!(events.is_empty());
    }

    #[test]
    fn departed_mac_is_kept_without_leave_alert() {
        let mut w = watcher(false, &[]);
        w.baseline
            .insert("aa:bb:cc:dd:ee:01".into(), device("192.168.1.10", "aa:bb:cc:dd:ee:01"));

        let events = w.diff(vec![]);
        assert!(events.is_empty());
        // Still in baseline: a reappearing ARP entry must not re-alert.
        assert!(w.baseline.contains_key("aa:bb:cc:dd:ee:01"));
    }

    #[test]
    fn departed_mac_alerts_and_is_removed_with_leave_alert() {
        let mut w = watcher(true, &[]);
        w.baseline
            .insert("aa:bb:cc:dd:ee:01".into(), device("192.168.1.10", "aa:bb:cc:dd:ee:01"));

        let events = w.diff(vec![]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventType::NetworkDeviceLeft);
        assert!(!w.baseline.contains_key("aa:bb:cc:dd:ee:01"));
    }

    #[test]
    fn baseline_grows_by_union() {
        let mut w = watcher(false, &[]);
        w.diff(vec![device("192.168.1.10", "aa:bb:cc:dd:ee:01")]);
        w.diff(vec![device("192.168.1.11", "aa:bb:cc:dd:ee:02")]);
        assert_eq!(w.baseline.len(), 2);
    }
}
