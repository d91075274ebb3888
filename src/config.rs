//! Daemon configuration.
//!
//! Loaded from a TOML file with `${NAME}` environment expansion applied to
//! the raw text before parsing, so credentials can live in an env file.
//! Validation rejects configurations that cannot work (no notifier enabled,
//! malformed chain patterns, bad severities) before the daemon starts.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostguard/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub file_integrity: FileIntegrityConfig,
    #[serde(default)]
    pub security_tools: SecurityToolsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub ntfy: NtfyConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    /// Enable the two-way command handler.
    #[serde(default)]
    pub interactive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NtfyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Address patterns that never alert, exact or "host:*".
    #[serde(default = "default_port_ignore")]
    pub ignore: Vec<String>,
    /// Minimum gap between repeated notifier-visible events.
    #[serde(default = "default_port_cooldown")]
    pub cooldown: String,
}

impl Default for PortsConfig {
    fn default() -> Self {
        PortsConfig {
            enabled: true,
            ignore: default_port_ignore(),
            cooldown: default_port_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainConfig>,
    #[serde(default = "default_firewall_interval")]
    pub check_interval: String,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        FirewallConfig {
            enabled: true,
            chains: default_chains(),
            check_interval: default_firewall_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    pub table: String,
    pub chain: String,
    #[serde(default)]
    pub expect_policy: String,
    /// Regex that must match at least one rule in the chain.
    #[serde(default)]
    pub expect_rule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_disk_threshold")]
    pub disk_threshold: u32,
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: u32,
    #[serde(default = "default_temp_threshold")]
    pub temperature_threshold: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            disk_threshold: default_disk_threshold(),
            memory_threshold: default_memory_threshold(),
            temperature_threshold: default_temp_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_min_severity")]
    pub min_severity: String,
    /// "HH:MM" wall-clock time, empty disables the summary.
    #[serde(default = "default_daily_summary")]
    pub daily_summary: String,
    #[serde(default)]
    pub quiet_hours: QuietHours,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        AlertsConfig {
            min_severity: default_min_severity(),
            daily_summary: default_daily_summary(),
            quiet_hours: QuietHours::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuietHours {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_docker_interval")]
    pub poll_interval: String,
    /// Also alert on clean (exit 0) stops.
    #[serde(default)]
    pub alert_on_stop: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            enabled: true,
            poll_interval: default_docker_interval(),
            alert_on_stop: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIntegrityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<WatchPath>,
    #[serde(default = "default_integrity_cooldown")]
    pub cooldown: String,
}

impl Default for FileIntegrityConfig {
    fn default() -> Self {
        FileIntegrityConfig {
            enabled: true,
            paths: default_watch_paths(),
            cooldown: default_integrity_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchPath {
    pub path: String,
    #[serde(default)]
    pub description: String,
    /// "warning" or "critical".
    #[serde(default)]
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityToolsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_clamav_log")]
    pub clamav_log: String,
    #[serde(default = "default_rkhunter_log")]
    pub rkhunter_log: String,
    #[serde(default = "default_sectools_interval")]
    pub poll_interval: String,
}

impl Default for SecurityToolsConfig {
    fn default() -> Self {
        SecurityToolsConfig {
            enabled: false,
            clamav_log: default_clamav_log(),
            rkhunter_log: default_rkhunter_log(),
            poll_interval: default_sectools_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_network_interval")]
    pub poll_interval: String,
    /// Alert when a known device drops out of the neighbour table.
    #[serde(default)]
    pub alert_on_leave: bool,
    #[serde(default)]
    pub ignore_macs: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            enabled: false,
            poll_interval: default_network_interval(),
            alert_on_leave: false,
            ignore_macs: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_port_cooldown() -> String {
    "15m".to_string()
}
fn default_port_ignore() -> Vec<String> {
    vec!["127.0.0.1:*".to_string(), "::1:*".to_string()]
}
fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            table: "filter".into(),
            chain: "INPUT".into(),
            expect_policy: "DROP".into(),
            expect_rule: String::new(),
        },
        ChainConfig {
            table: "filter".into(),
            chain: "DOCKER-USER".into(),
            expect_policy: String::new(),
            expect_rule: "DROP.*0.0.0.0/0".into(),
        },
    ]
}
fn default_firewall_interval() -> String {
    "60s".to_string()
}
fn default_disk_threshold() -> u32 {
    80
}
fn default_memory_threshold() -> u32 {
    90
}
fn default_temp_threshold() -> u32 {
    75
}
fn default_min_severity() -> String {
    "warning".to_string()
}
fn default_daily_summary() -> String {
    "08:00".to_string()
}
fn default_docker_interval() -> String {
    "10s".to_string()
}
fn default_integrity_cooldown() -> String {
    "5m".to_string()
}
fn default_clamav_log() -> String {
    "/var/log/clamav/clamav.log".to_string()
}
fn default_rkhunter_log() -> String {
    "/var/log/rkhunter.log".to_string()
}
fn default_sectools_interval() -> String {
    "30s".to_string()
}
fn default_network_interval() -> String {
    "5m".to_string()
}

fn default_watch_paths() -> Vec<WatchPath> {
    let entry = |path: &str, description: &str, severity: &str| WatchPath {
        path: path.to_string(),
        description: description.to_string(),
        severity: severity.to_string(),
    };
    vec![
        entry("/etc/passwd", "User accounts", "critical"),
        entry("/etc/shadow", "Password hashes", "critical"),
        entry("/etc/sudoers", "Sudo rules", "critical"),
        entry("/etc/ssh/sshd_config", "SSH daemon config", "critical"),
        entry("/etc/hosts", "Host resolution", "warning"),
        entry("/etc/crontab", "System cron", "warning"),
        entry("/etc/cron.d", "Cron job directory", "warning"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            notifications: NotificationsConfig::default(),
            ports: PortsConfig::default(),
            firewall: FirewallConfig::default(),
            system: SystemConfig::default(),
            alerts: AlertsConfig::default(),
            docker: DockerConfig::default(),
            file_integrity: FileIntegrityConfig::default(),
            security_tools: SecurityToolsConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    /// Read and parse the config file, expanding `${NAME}` references
    /// against the environment before parsing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config at {}", path.as_ref().display()))?;
        let expanded = expand_env(&raw);
        let config: Config = toml::from_str(&expanded).context("parsing config")?;
        config.validate().context("invalid config")?;
        Ok(config)
    }

    pub fn has_notifier(&self) -> bool {
        self.notifications.telegram.enabled
            || self.notifications.ntfy.enabled
            || self.notifications.discord.enabled
            || self.notifications.webhook.enabled
    }

    pub fn validate(&self) -> Result<()> {
        if !self.has_notifier() {
            bail!("at least one notification channel must be enabled");
        }

        let tg = &self.notifications.telegram;
        if tg.enabled {
            if tg.bot_token.is_empty() {
                bail!("telegram bot_token is required when telegram is enabled");
            }
            if tg.chat_id.is_empty() {
                bail!("telegram chat_id is required when telegram is enabled");
            }
        }
        if self.notifications.ntfy.enabled && self.notifications.ntfy.topic.is_empty() {
            bail!("ntfy topic is required when ntfy is enabled");
        }
        if self.notifications.discord.enabled && self.notifications.discord.webhook_url.is_empty() {
            bail!("discord webhook_url is required when discord is enabled");
        }
        if self.notifications.webhook.enabled && self.notifications.webhook.url.is_empty() {
            bail!("webhook url is required when webhook is enabled");
        }

        if crate::event::Severity::from_str(&self.alerts.min_severity.to_lowercase()).is_none() {
            bail!(
                "invalid min_severity: {} (must be info, warning, or critical)",
                self.alerts.min_severity
            );
        }

        if !self.alerts.daily_summary.is_empty() && !is_hh_mm(&self.alerts.daily_summary) {
            bail!("daily_summary must be HH:MM, got {}", self.alerts.daily_summary);
        }
        for bound in [&self.alerts.quiet_hours.start, &self.alerts.quiet_hours.end] {
            if !bound.is_empty() && !is_hh_mm(bound) {
                bail!("quiet_hours bounds must be HH:MM, got {bound}");
            }
        }

        for chain in &self.firewall.chains {
            if chain.table.is_empty() || chain.chain.is_empty() {
                bail!("firewall chain entries need both table and chain");
            }
            if !chain.expect_rule.is_empty() {
                Regex::new(&chain.expect_rule).with_context(|| {
                    format!("invalid expect_rule pattern for chain {}", chain.chain)
                })?;
            }
        }

        Ok(())
    }
}

/// Replace `${NAME}` with the value of the environment variable NAME,
/// or the empty string when unset.
pub fn expand_env(raw: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(raw, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

/// Parse a duration string like "30s", "15m", "2h" or "1d". Bare numbers
/// and the "ms" suffix are accepted too.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        "d" => Some(Duration::from_secs(value * 86400)),
        _ => None,
    }
}

/// Parse a duration string, falling back to `default` on anything invalid.
pub fn duration_or(s: &str, default: Duration) -> Duration {
    parse_duration(s).unwrap_or(default)
}

fn is_hh_mm(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    let (Ok(h), Ok(m)) = (h.parse::<u32>(), m.parse::<u32>()) else {
        return false;
    };
    h < 24 && m < 60
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut cfg = Config::default();
        cfg.notifications.ntfy.enabled = true;
        cfg.notifications.ntfy.topic = "alerts".into();
        cfg
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.ports.enabled);
        assert_eq!(cfg.ports.cooldown, "15m");
        assert_eq!(cfg.system.disk_threshold, 80);
        assert_eq!(cfg.firewall.chains.len(), 2);
        assert_eq!(cfg.alerts.daily_summary, "08:00");
        assert!(!cfg.security_tools.enabled);
        assert_eq!(cfg.file_integrity.paths.len(), 7);
    }

    #[test]
    fn validate_requires_a_notifier() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_requires_telegram_credentials() {
        let mut cfg = valid_config();
        cfg.notifications.telegram.enabled = true;
        assert!(cfg.validate().is_err());
        cfg.notifications.telegram.bot_token = "token".into();
        assert!(cfg.validate().is_err());
        cfg.notifications.telegram.chat_id = "42".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_severity() {
        let mut cfg = valid_config();
        cfg.alerts.min_severity = "urgent".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_summary_time() {
        let mut cfg = valid_config();
        cfg.alerts.daily_summary = "25:00".into();
        assert!(cfg.validate().is_err());
        cfg.alerts.daily_summary = String::new();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_chain_pattern() {
        let mut cfg = valid_config();
        cfg.firewall.chains.push(ChainConfig {
            table: "filter".into(),
            chain: "FORWARD".into(),
            expect_policy: String::new(),
            expect_rule: "[unterminated".into(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn expand_env_substitutes_known_vars() {
        std::env::set_var("HOSTGUARD_TEST_TOKEN", "sekrit");
        let out = expand_env("token = \"${HOSTGUARD_TEST_TOKEN}\"");
        assert_eq!(out, "token = \"sekrit\"");

        let out = expand_env("token = \"${HOSTGUARD_TEST_UNSET_VAR}\"");
        assert_eq!(out, "token = \"\"");
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("fast"), None);
    }

    #[test]
    fn load_parses_toml_with_env_expansion() {
        use std::io::Write;

        std::env::set_var("HOSTGUARD_TEST_TOPIC", "my-host-alerts");
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
[notifications.ntfy]
enabled = true
topic = "${{HOSTGUARD_TEST_TOPIC}}"

[ports]
ignore = ["127.0.0.1:*"]
cooldown = "30m"

[firewall]
check_interval = "120s"
"#
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.notifications.ntfy.topic, "my-host-alerts");
        assert_eq!(cfg.ports.cooldown, "30m");
        assert!(cfg.ports.enabled);
        assert!(cfg.docker.enabled);
        // A sparse section keeps the rich defaults for its other fields.
        assert_eq!(cfg.firewall.check_interval, "120s");
        assert_eq!(cfg.firewall.chains.len(), 2);
        assert_eq!(cfg.firewall.chains[0].chain, "INPUT");
    }
}
