//! Host probes shared by the watchers and the interactive command handler.
//!
//! Everything here shells out to the same tools an operator would use
//! (`ss`, `iptables`, `docker`, `ip neigh`) or reads /proc and /sys
//! directly. Probe failures are surfaced as errors; callers decide whether
//! to skip the tick or report.

use std::process::Command;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::event::{PortInfo, SystemHealth};

/// Cached machine hostname.
pub fn hostname() -> String {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME
        .get_or_init(|| {
            std::fs::read_to_string("/etc/hostname")
                .or_else(|_| std::fs::read_to_string("/proc/sys/kernel/hostname"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        })
        .clone()
}

/// Run a command and return its stdout, failing on spawn errors and
/// non-zero exit.
pub fn run(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("running {cmd}"))?;
    if !output.status.success() {
        bail!("{cmd} exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ── Listening sockets ──

/// Snapshot of listening TCP sockets via `ss -tlnp`.
pub fn listening_sockets() -> Result<Vec<PortInfo>> {
    let out = run("ss", &["-tlnp"])?;
    Ok(parse_ss_output(&out))
}

pub fn parse_ss_output(output: &str) -> Vec<PortInfo> {
    output
        .lines()
        .skip(1) // header
        .filter_map(parse_ss_line)
        .collect()
}

/// Parse one `ss -tlnp` line:
/// State  Recv-Q  Send-Q  Local Address:Port  Peer Address:Port  Process
fn parse_ss_line(line: &str) -> Option<PortInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }

    let address = fields[3].to_string();

    let mut pid = 0;
    let mut process_name = String::new();
    if fields.len() >= 6 {
        let proc_field = fields[5];
        // Format: users:(("name",pid=123,fd=4))
        if let Some(idx) = proc_field.find("pid=") {
            let rest = &proc_field[idx + 4..];
            let end = rest.find(|c| c == ',' || c == ')').unwrap_or(rest.len());
            pid = rest[..end].parse().unwrap_or(0);
        }
        if let Some(idx) = proc_field.find("((\"") {
            let rest = &proc_field[idx + 3..];
            if let Some(end) = rest.find('"') {
                process_name = rest[..end].to_string();
            }
        }
    }

    Some(PortInfo {
        is_exposed: address_is_exposed(&address),
        address,
        protocol: "tcp".to_string(),
        pid,
        process_name,
        container_name: String::new(),
        container_id: String::new(),
    })
}

/// True when the host component is a wildcard bind (0.0.0.0, :: or *).
pub fn address_is_exposed(address: &str) -> bool {
    let Some((host, _port)) = address.rsplit_once(':') else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    matches!(host, "0.0.0.0" | "::" | "*")
}

/// Process name for a PID from /proc.
pub fn process_name(pid: i32) -> String {
    std::fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

// ── Containers ──

/// One `docker ps` row as emitted by `--format '{{json .}}'`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct ContainerState {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Names")]
    pub names: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    /// "running", "exited", "paused", "restarting".
    #[serde(rename = "State", default)]
    pub state: String,
    /// Human status, e.g. "Up 2 hours (healthy)", "Exited (1) 3 min ago".
    #[serde(rename = "Status", default)]
    pub status: String,
    /// Published port mappings, e.g. "0.0.0.0:8080->80/tcp".
    #[serde(rename = "Ports", default)]
    pub ports: String,
}

/// Snapshot of all containers, running or not.
pub fn list_containers() -> Result<Vec<ContainerState>> {
    let out = run(
        "docker",
        &["ps", "--all", "--no-trunc", "--format", "{{json .}}"],
    )?;
    Ok(parse_docker_output(&out))
}

/// Parse one JSON object per line, skipping malformed lines.
pub fn parse_docker_output(output: &str) -> Vec<ContainerState> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

// ── Packet filter ──

/// Rule lines of a chain, headers stripped.
pub fn chain_rules(table: &str, chain: &str) -> Result<Vec<String>> {
    let out = run("iptables", &["-t", table, "-L", chain, "-n"])?;
    Ok(parse_chain_rules(&out))
}

pub fn parse_chain_rules(output: &str) -> Vec<String> {
    // First two lines are "Chain X (policy Y)" and the column header.
    output.trim().lines().skip(2).map(str::to_string).collect()
}

/// Default verdict of a chain, "UNKNOWN" when unreadable.
pub fn chain_policy(table: &str, chain: &str) -> String {
    match run("iptables", &["-t", table, "-L", chain, "-n"]) {
        Ok(out) => parse_chain_policy(&out),
        Err(_) => "UNKNOWN".to_string(),
    }
}

pub fn parse_chain_policy(output: &str) -> String {
    // Format: Chain INPUT (policy DROP)
    let first = output.lines().next().unwrap_or_default();
    if let Some(idx) = first.find("policy ") {
        let rest = &first[idx + 7..];
        if let Some(end) = rest.find(')') {
            return rest[..end].to_string();
        }
    }
    "UNKNOWN".to_string()
}

// ── Neighbours ──

/// Raw `ip neigh show` output.
pub fn arp_table() -> Result<String> {
    run("ip", &["neigh", "show"])
}

// ── Resources ──

/// Root-mount usage percent via statvfs. 0 on failure.
pub fn disk_usage_percent() -> u32 {
    match statvfs("/") {
        Some((total, free)) if total > 0 => (((total - free) * 100) / total) as u32,
        _ => 0,
    }
}

/// (total bytes, free bytes) for the filesystem holding `path`.
fn statvfs(path: &str) -> Option<(u64, u64)> {
    let c_path = std::ffi::CString::new(path).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let block = stat.f_frsize as u64;
    Some((stat.f_blocks as u64 * block, stat.f_bfree as u64 * block))
}

/// Fields of /proc/meminfo we care about, in kB.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
    pub buffers_kb: u64,
    pub cached_kb: u64,
}

impl MemInfo {
    pub fn used_kb(&self) -> u64 {
        self.total_kb.saturating_sub(self.available_kb)
    }

    pub fn used_percent(&self) -> u32 {
        if self.total_kb == 0 {
            return 0;
        }
        ((self.used_kb() * 100) / self.total_kb) as u32
    }
}

pub fn meminfo() -> MemInfo {
    std::fs::read_to_string("/proc/meminfo")
        .map(|s| parse_meminfo(&s))
        .unwrap_or_default()
}

pub fn parse_meminfo(raw: &str) -> MemInfo {
    let mut info = MemInfo::default();
    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let value: u64 = value.parse().unwrap_or(0);
        match key {
            "MemTotal:" => info.total_kb = value,
            "MemAvailable:" => info.available_kb = value,
            "Buffers:" => info.buffers_kb = value,
            "Cached:" => info.cached_kb = value,
            _ => {}
        }
    }
    info
}

pub fn memory_used_percent() -> u32 {
    meminfo().used_percent()
}

/// CPU temperature from the first thermal zone, 0.0 when absent.
pub fn cpu_temp_celsius() -> f64 {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|millideg| millideg / 1000.0)
        .unwrap_or(0.0)
}

pub fn uptime_seconds() -> u64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|s| s.split_whitespace().next().map(str::to_string))
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| secs as u64)
        .unwrap_or(0)
}

/// Full host snapshot for threshold checks and the daily summary.
pub fn system_health() -> SystemHealth {
    let containers = list_containers().unwrap_or_default();
    let running = containers.iter().filter(|c| c.state == "running").count() as u32;
    let healthy = containers
        .iter()
        .filter(|c| c.status.contains("(healthy)"))
        .count() as u32;
    let ports = listening_sockets().map(|p| p.len()).unwrap_or(0) as u32;

    SystemHealth {
        disk_usage_percent: disk_usage_percent(),
        memory_used_percent: memory_used_percent(),
        cpu_temp_celsius: cpu_temp_celsius(),
        uptime_seconds: uptime_seconds(),
        containers_running: running,
        containers_healthy: healthy,
        listening_ports: ports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SS_SAMPLE: &str = "State   Recv-Q  Send-Q   Local Address:Port    Peer Address:Port  Process\n\
LISTEN  0       128            0.0.0.0:22           0.0.0.0:*      users:((\"sshd\",pid=612,fd=3))\n\
LISTEN  0       4096         127.0.0.1:631          0.0.0.0:*      users:((\"cupsd\",pid=801,fd=7))\n\
LISTEN  0       511               [::]:8080             [::]:*      users:((\"node\",pid=1422,fd=19))\n";

    #[test]
    fn parse_ss_output_extracts_sockets() {
        let ports = parse_ss_output(SS_SAMPLE);
        assert_eq!(ports.len(), 3);

        assert_eq!(ports[0].address, "0.0.0.0:22");
        assert_eq!(ports[0].pid, 612);
        assert_eq!(ports[0].process_name, "sshd");
        assert!(ports[0].is_exposed);

        assert_eq!(ports[1].address, "127.0.0.1:631");
        assert!(!ports[1].is_exposed);

        assert_eq!(ports[2].address, "[::]:8080");
        assert_eq!(ports[2].process_name, "node");
        assert!(ports[2].is_exposed);
    }

    #[test]
    fn parse_ss_line_skips_short_lines() {
        assert!(parse_ss_line("LISTEN 0 128").is_none());
        assert!(parse_ss_line("").is_none());
    }

    #[test]
    fn address_exposure() {
        assert!(address_is_exposed("0.0.0.0:80"));
        assert!(address_is_exposed("[::]:80"));
        assert!(address_is_exposed("*:80"));
        assert!(!address_is_exposed("127.0.0.1:80"));
        assert!(!address_is_exposed("192.168.1.4:80"));
        assert!(!address_is_exposed("no-port"));
    }

    #[test]
    fn parse_docker_output_skips_garbage() {
        let input = concat!(
            "{\"ID\":\"abc123\",\"Names\":\"nginx\",\"Image\":\"nginx:latest\",\"State\":\"running\",\"Status\":\"Up 2 hours\"}\n",
            "not valid json\n",
            "\n",
            "{\"ID\":\"def456\",\"Names\":\"redis\",\"Image\":\"redis:7\",\"State\":\"exited\",\"Status\":\"Exited (0) 5 min ago\"}\n",
        );
        let containers = parse_docker_output(input);
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].id, "abc123");
        assert_eq!(containers[0].state, "running");
        assert_eq!(containers[1].names, "redis");
    }

    #[test]
    fn parse_docker_output_empty() {
        assert!(parse_docker_output("").is_empty());
        assert!(parse_docker_output("\n\n").is_empty());
    }

    const IPTABLES_SAMPLE: &str = "Chain INPUT (policy DROP)\n\
target     prot opt source               destination\n\
ACCEPT     all  --  0.0.0.0/0            0.0.0.0/0            state RELATED,ESTABLISHED\n\
ACCEPT     tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpt:22\n";

    #[test]
    fn parse_chain_rules_strips_headers() {
        let rules = parse_chain_rules(IPTABLES_SAMPLE);
        assert_eq!(rules.len(), 2);
        assert!(rules[0].contains("RELATED,ESTABLISHED"));
    }

    #[test]
    fn parse_chain_policy_extracts_verdict() {
        assert_eq!(parse_chain_policy(IPTABLES_SAMPLE), "DROP");
        assert_eq!(parse_chain_policy("Chain FORWARD (policy ACCEPT)\n"), "ACCEPT");
        assert_eq!(parse_chain_policy("garbage"), "UNKNOWN");
        assert_eq!(parse_chain_policy(""), "UNKNOWN");
    }

    const MEMINFO_SAMPLE: &str = "MemTotal:        8000000 kB\n\
MemFree:         1000000 kB\n\
MemAvailable:    2000000 kB\n\
Buffers:          300000 kB\n\
Cached:          1500000 kB\n";

    #[test]
    fn parse_meminfo_fields() {
        let info = parse_meminfo(MEMINFO_SAMPLE);
        assert_eq!(info.total_kb, 8_000_000);
        assert_eq!(info.available_kb, 2_000_000);
        assert_eq!(info.buffers_kb, 300_000);
        assert_eq!(info.cached_kb, 1_500_000);
        assert_eq!(info.used_percent(), 75);
    }

    #[test]
    fn meminfo_zero_total_is_zero_percent() {
        assert_eq!(MemInfo::default().used_percent(), 0);
    }
}
