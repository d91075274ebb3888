//! Event model shared by every stage of the pipeline.
//!
//! Watchers produce `Event`s, the bus broadcasts them, the store persists
//! them and the notifiers render them. The optional typed payloads carry
//! structured context for the event kinds that have one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probes;

/// Alert severity, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info = 0,
    Warning = 1,
    Critical = 2,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Warning => "🟡",
            Severity::Critical => "🔴",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// What happened. Serialised as the dotted wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "port.opened")]
    PortOpened,
    #[serde(rename = "port.closed")]
    PortClosed,
    #[serde(rename = "firewall.changed")]
    FirewallChanged,
    #[serde(rename = "firewall.ok")]
    FirewallOk,
    #[serde(rename = "system.disk_high")]
    DiskHigh,
    #[serde(rename = "system.memory_high")]
    MemoryHigh,
    #[serde(rename = "system.temp_high")]
    TempHigh,
    #[serde(rename = "docker.container_died")]
    ContainerDied,
    #[serde(rename = "docker.container_start")]
    ContainerStart,
    #[serde(rename = "docker.container_unhealthy")]
    ContainerUnhealthy,
    #[serde(rename = "docker.container_stopped")]
    ContainerStopped,
    #[serde(rename = "file.changed")]
    FileChanged,
    #[serde(rename = "network.new_device")]
    NetworkNewDevice,
    #[serde(rename = "network.device_left")]
    NetworkDeviceLeft,
    #[serde(rename = "malware.found")]
    MalwareFound,
    #[serde(rename = "rootkit.warning")]
    RootkitWarning,
    #[serde(rename = "summary.daily")]
    DailySummary,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PortOpened => "port.opened",
            EventType::PortClosed => "port.closed",
            EventType::FirewallChanged => "firewall.changed",
            EventType::FirewallOk => "firewall.ok",
            EventType::DiskHigh => "system.disk_high",
            EventType::MemoryHigh => "system.memory_high",
            EventType::TempHigh => "system.temp_high",
            EventType::ContainerDied => "docker.container_died",
            EventType::ContainerStart => "docker.container_start",
            EventType::ContainerUnhealthy => "docker.container_unhealthy",
            EventType::ContainerStopped => "docker.container_stopped",
            EventType::FileChanged => "file.changed",
            EventType::NetworkNewDevice => "network.new_device",
            EventType::NetworkDeviceLeft => "network.device_left",
            EventType::MalwareFound => "malware.found",
            EventType::RootkitWarning => "rootkit.warning",
            EventType::DailySummary => "summary.daily",
        }
    }
}

/// A listening socket with ownership context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PortInfo {
    /// Literal local address, e.g. "0.0.0.0:8080".
    pub address: String,
    /// "tcp" or "udp".
    pub protocol: String,
    pub pid: i32,
    /// e.g. "docker-proxy".
    pub process_name: String,
    /// Owning container name, empty if the socket is not container-backed.
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub container_id: String,
    /// True when bound to 0.0.0.0, :: or *.
    pub is_exposed: bool,
}

impl PortInfo {
    /// Wildcard binds are reachable from the network and warrant a warning.
    pub fn risk_level(&self) -> Severity {
        if self.is_exposed {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

/// Packet-filter chain state at observation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FirewallState {
    pub chain: String,
    pub table: String,
    /// The chain's default verdict, e.g. "DROP".
    #[serde(default)]
    pub policy: String,
    /// Stable digest of the rule list.
    #[serde(default)]
    pub rule_hash: String,
    #[serde(default)]
    pub has_drop_rule: bool,
}

/// Numeric host snapshot used by threshold checks and the daily summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemHealth {
    pub disk_usage_percent: u32,
    pub memory_used_percent: u32,
    pub cpu_temp_celsius: f64,
    pub uptime_seconds: u64,
    pub containers_running: u32,
    pub containers_healthy: u32,
    pub listening_ports: u32,
}

/// The single currency of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque unique id embedding kind, entity and a nanosecond timestamp.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub severity: Severity,
    pub hostname: String,
    pub timestamp: DateTime<Utc>,
    /// One-line human summary.
    pub message: String,
    /// Extended multi-line context.
    #[serde(default)]
    pub details: String,
    /// Remediation hint.
    #[serde(default)]
    pub suggested: String,
    /// Name of the producing watcher.
    #[serde(default)]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<SystemHealth>,
}

impl Event {
    /// Build an event stamped with the current wall clock and hostname.
    /// `entity` is a short discriminator folded into the id so duplicates
    /// of the same entity collide deterministically; pass "" when the kind
    /// has no natural entity.
    pub fn new(
        kind: EventType,
        severity: Severity,
        source: &str,
        entity: &str,
        message: impl Into<String>,
    ) -> Self {
        let timestamp = Utc::now();
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();
        let id = if entity.is_empty() {
            format!("{}-{}", kind.as_str(), nanos)
        } else {
            format!("{}-{}-{}", kind.as_str(), entity, nanos)
        };
        Event {
            id,
            kind,
            severity,
            hostname: probes::hostname(),
            timestamp,
            message: message.into(),
            details: String::new(),
            suggested: String::new(),
            source: source.to_string(),
            port: None,
            firewall: None,
            health: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn severity_round_trips_through_str() {
        for sev in [Severity::Info, Severity::Warning, Severity::Critical] {
            assert_eq!(Severity::from_str(sev.as_str()), Some(sev));
        }
        assert_eq!(Severity::from_str("bogus"), None);
    }

    #[test]
    fn event_type_serialises_as_wire_string() {
        let json = serde_json::to_string(&EventType::PortOpened).unwrap();
        assert_eq!(json, "\"port.opened\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::PortOpened);
    }

    #[test]
    fn exposed_port_is_warning() {
        let exposed = PortInfo {
            address: "0.0.0.0:8080".into(),
            is_exposed: true,
            ..Default::default()
        };
        assert_eq!(exposed.risk_level(), Severity::Warning);

        let local = PortInfo {
            address: "127.0.0.1:631".into(),
            is_exposed: false,
            ..Default::default()
        };
        assert_eq!(local.risk_level(), Severity::Info);
    }

    #[test]
    fn event_json_round_trip_preserves_payloads() {
        let mut event = Event::new(
            EventType::PortOpened,
            Severity::Warning,
            "ports",
            "0.0.0.0:8080",
            "New listening port: 0.0.0.0:8080 → node",
        );
        event.details = "Bound to all interfaces".into();
        event.port = Some(PortInfo {
            address: "0.0.0.0:8080".into(),
            protocol: "tcp".into(),
            pid: 1234,
            process_name: "node".into(),
            is_exposed: true,
            ..Default::default()
        });

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_id_embeds_kind_and_entity() {
        let event = Event::new(EventType::PortClosed, Severity::Info, "ports", "1.2.3.4:80", "x");
        assert!(event.id.starts_with("port.closed-1.2.3.4:80-"));
    }
}
