//! Notification sinks.
//!
//! Each notifier formats an event for one backend and delivers it with a
//! single HTTP request under a fixed timeout. Delivery failures are logged
//! by the daemon and never retried; the next probe tick regenerates the
//! condition once the dedup window allows it.

pub mod discord;
pub mod ntfy;
pub mod telegram;
pub mod webhook;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::event::{Event, SystemHealth};

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver a formatted event notification.
    async fn send(&self, event: &Event) -> Result<()>;

    /// Deliver a pre-formatted message (start-up banner, daily summary).
    async fn send_raw(&self, message: &str) -> Result<()>;

    /// Send a test notification to verify the configuration.
    async fn test(&self) -> Result<()>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Daily summary text shared by all backends.
pub fn format_daily_summary(hostname: &str, health: &SystemHealth, last_alert: &str) -> String {
    let mut out = format!("✅ <b>Hostguard — {hostname} — Daily Summary</b>\n\n");
    out.push_str("📊 <b>Status:</b>\n");
    out.push_str(&format!(
        "  Disk: {}% | RAM: {}%",
        health.disk_usage_percent, health.memory_used_percent
    ));
    if health.cpu_temp_celsius > 0.0 {
        out.push_str(&format!(" | Temp: {:.0}°C", health.cpu_temp_celsius));
    }
    out.push('\n');

    if health.containers_running > 0 {
        out.push_str(&format!("  Containers: {} running\n", health.containers_running));
    }
    out.push_str(&format!("  Listening ports: {}\n", health.listening_ports));

    if !last_alert.is_empty() {
        out.push_str(&format!("  Last alert: {last_alert}"));
    }
    out
}
