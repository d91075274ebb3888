//! Interactive Telegram command handler.
//!
//! Watcher-shaped: long-polls getUpdates for incoming messages, drops
//! anything not from the configured chat, routes the first token as a
//! command and replies over the same API. Privileged actions (remove,
//! prune, reboot) need a two-step confirmation: the first call returns a
//! prompt containing CONFIRM, and only a follow-up whose last argument is
//! CONFIRM performs the action.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::TelegramConfig;
use crate::probes;
use crate::store::Store;

use super::Watcher;

pub struct BotWatcher {
    token: String,
    chat_id: String,
    client: reqwest::Client,
    offset: i64,
    store: Arc<Store>,
}

impl BotWatcher {
    pub fn new(cfg: &TelegramConfig, store: Arc<Store>) -> Self {
        BotWatcher {
            token: cfg.bot_token.clone(),
            chat_id: cfg.chat_id.clone(),
            // The server holds the long poll for up to 30s.
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(35))
                .build()
                .unwrap_or_default(),
            offset: 0,
            store,
        }
    }

    async fn poll(&mut self) {
        let url = format!("https://api.telegram.org/bot{}/getUpdates", self.token);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("offset", self.offset.to_string()),
                ("timeout", "30".to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(err) => {
                error!("chat poll failed: {err}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                return;
            }
        };

        let updates: UpdatesResponse = match resp.json().await {
            Ok(u) => u,
            Err(_) => return,
        };

        for update in updates.result {
            self.offset = update.update_id + 1;

            let Some(message) = update.message else {
                continue;
            };
            let authorised: i64 = self.chat_id.parse().unwrap_or(0);
            if message.chat.id != authorised {
                warn!(
                    "ignoring message from unauthorised chat {} ({})",
                    message.chat.id,
                    message.from.map(|f| f.username).unwrap_or_default()
                );
                continue;
            }

            if let Some(response) = self.handle_command(&message.text).await {
                if !response.is_empty() {
                    self.send_reply(&response).await;
                }
            }
        }
    }

    /// Route a command message; None for anything that is not a command.
    async fn handle_command(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let parts: Vec<&str> = text.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();
        info!("chat command received: {cmd}");

        let response = match cmd.as_str() {
            "/start" | "/help" => help_text().to_string(),
            "/status" => self.cmd_status(),
            "/ports" => cmd_ports(),
            "/firewall" | "/fw" => cmd_firewall(),
            "/docker" | "/containers" => self.cmd_docker_router(&parts).await,
            "/disk" => cmd_disk(),
            "/temp" | "/temperature" => cmd_temp(),
            "/memory" | "/mem" | "/ram" => cmd_memory(),
            "/uptime" => cmd_uptime(),
            "/events" | "/logs" => self.cmd_events(),
            "/scan" => self.cmd_scan().await,
            "/ip" => cmd_ip(),
            "/services" => cmd_services(),
            "/reboot" => self.cmd_reboot(&parts).await,
            _ => format!("Unknown command: {cmd}\nSend /help for available commands."),
        };
        Some(response)
    }

    async fn send_reply(&self, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let params = [
            ("chat_id", self.chat_id.as_str()),
            ("parse_mode", "HTML"),
            ("text", text),
        ];
        if let Err(err) = self.client.post(&url).form(&params).send().await {
            error!("chat reply failed: {err}");
        }
    }

    // ── Command implementations ──

    fn cmd_status(&self) -> String {
        let hostname = probes::hostname();
        let disk = disk_str();
        let mem = mem_str();
        let temp = temp_str();
        let uptime = uptime_str();
        let firewall = firewall_str();
        let ports = probes::listening_sockets()
            .map(|p| format!("{} listening", p.len()))
            .unwrap_or_else(|_| "unknown".to_string());
        let containers = probes::list_containers()
            .map(|c| {
                format!(
                    "{} running",
                    c.iter().filter(|c| c.state == "running").count()
                )
            })
            .unwrap_or_else(|_| "N/A".to_string());
        let last_alert = self.store.last_alert_time();

        format!(
            "🛡️ <b>Hostguard — {hostname}</b>\n\n\
             <b>System</b>\n  💾 Disk: {disk}\n  🧠 RAM: {mem}\n  🌡️ Temp: {temp}\n  ⏱️ Uptime: {uptime}\n\n\
             <b>Security</b>\n  🔥 Firewall: {firewall}\n  🔌 Ports: {ports}\n  🐳 Containers: {containers}\n  ⚠️ Last alert: {last_alert}"
        )
    }

    fn cmd_events(&self) -> String {
        let events = match self.store.recent(24) {
            Ok(events) => events,
            Err(_) => return "❌ Failed to read events".to_string(),
        };
        if events.is_empty() {
            return "✅ No security events in last 24 hours".to_string();
        }

        let mut out = String::from("📋 <b>Recent Events (24h)</b>\n\n");
        let limit = events.len().min(15);
        for e in &events[..limit] {
            out.push_str(&format!(
                "{} <code>{}</code> {}\n",
                e.severity.emoji(),
                e.timestamp.format("%H:%M"),
                escape_html(&e.message),
            ));
        }
        if events.len() > limit {
            out.push_str(&format!("\n... and {} more", events.len() - limit));
        }
        out
    }

    async fn cmd_docker_router(&self, parts: &[&str]) -> String {
        if parts.len() < 2 {
            return cmd_docker_list();
        }
        let args = &parts[2..];
        match parts[1].to_lowercase().as_str() {
            "stop" => cmd_docker_stop(args),
            "restart" => cmd_docker_restart(args),
            "remove" | "rm" => cmd_docker_remove(args),
            "fix" => cmd_docker_fix(args),
            "logs" => cmd_docker_logs(args),
            "prune" => self.cmd_docker_prune(args).await,
            _ => format!(
                "{}\n\n<i>Usage: /docker [stop|restart|remove|fix|logs|prune] &lt;name&gt;</i>",
                cmd_docker_list()
            ),
        }
    }

    async fn cmd_docker_prune(&self, args: &[&str]) -> String {
        if !is_confirmed(args) {
            return "⚠️ <b>Docker system prune</b> removes all stopped containers, unused networks, \
                    dangling images, and build cache.\n\nSend: /docker prune CONFIRM"
                .to_string();
        }
        self.send_reply("🧹 Running docker system prune...").await;
        match docker_exec(&["system", "prune", "-f"]) {
            Ok(out) => format!("🧹 <b>Docker pruned:</b>\n<code>{}</code>", truncate(&escape_html(&out), 800)),
            Err(err) => format!("❌ Prune failed: {}", truncate(&escape_html(&err), 500)),
        }
    }

    async fn cmd_scan(&self) -> String {
        self.send_reply("🔍 Starting security scan... this may take a few minutes.")
            .await;

        let mut out = String::from("🔍 <b>Security Scan Results</b>\n\n");

        // rkhunter: exit 0 clean, exit 1 warnings, anything else tool error.
        match Command::new("rkhunter")
            .args(["--check", "--skip-keypress", "--report-warnings-only"])
            .output()
        {
            Ok(result) => {
                let text = combined_output(&result);
                match result.status.code() {
                    Some(0) => out.push_str("✅ <b>rkhunter:</b> No warnings\n\n"),
                    Some(1) if !text.is_empty() => out.push_str(&format!(
                        "⚠️ <b>rkhunter:</b>\n<code>{}</code>\n\n",
                        truncate(&escape_html(&text), 500)
                    )),
                    Some(1) => out.push_str("⚠️ <b>rkhunter:</b> Warnings detected (check log)\n\n"),
                    _ => out.push_str(&format!(
                        "❌ <b>rkhunter:</b> scan error\n<code>{}</code>\n\n",
                        truncate(&escape_html(&text), 300)
                    )),
                }
            }
            Err(err) => out.push_str(&format!(
                "❌ <b>rkhunter:</b> scan error\n<code>{}</code>\n\n",
                escape_html(&err.to_string())
            )),
        }

        // ClamAV: exit 0 clean, exit 1 infected files, anything else tool error.
        match Command::new("clamscan")
            .args(["-r", "--quiet", "--infected", "/home", "/tmp", "/var/tmp"])
            .output()
        {
            Ok(result) => {
                let text = combined_output(&result);
                match result.status.code() {
                    Some(0) => out.push_str("✅ <b>ClamAV:</b> No threats found\n"),
                    Some(1) => out.push_str(&format!(
                        "⚠️ <b>ClamAV:</b>\n<code>{}</code>\n",
                        truncate(&escape_html(&text), 500)
                    )),
                    _ => out.push_str(&format!(
                        "❌ <b>ClamAV:</b> scan error\n<code>{}</code>\n",
                        truncate(&escape_html(&text), 300)
                    )),
                }
            }
            Err(err) => out.push_str(&format!(
                "❌ <b>ClamAV:</b> scan error\n<code>{}</code>\n",
                escape_html(&err.to_string())
            )),
        }

        out
    }

    async fn cmd_reboot(&self, parts: &[&str]) -> String {
        if parts.len() < 2 || !parts[parts.len() - 1].eq_ignore_ascii_case("confirm") {
            return "⚠️ <b>Reboot requires confirmation</b>\n\nSend: /reboot CONFIRM".to_string();
        }

        self.send_reply("🔄 Rebooting in 5 seconds...").await;
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = Command::new("reboot").status();
        });
        String::new()
    }
}

#[async_trait]
impl Watcher for BotWatcher {
    fn name(&self) -> &'static str {
        "chat-bot"
    }

    async fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.token.is_empty() || self.chat_id.is_empty() {
            info!("chat command handler disabled (no token/chat_id)");
            return Ok(());
        }

        info!("starting chat command handler");
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = self.poll() => {}
            }
        }
    }
}

// ── Telegram wire types ──

#[derive(Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    text: String,
    chat: Chat,
    #[serde(default)]
    from: Option<Sender>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Deserialize, Default)]
struct Sender {
    #[serde(default)]
    username: String,
}

// ── Stateless command bodies ──

fn help_text() -> &'static str {
    "🛡️ <b>Hostguard Commands</b>\n\n\
     <b>System</b>\n\
     /status — Full system overview\n\
     /disk — Storage usage\n\
     /memory — RAM usage\n\
     /temp — CPU temperature\n\
     /uptime — System uptime\n\
     /ip — Network addresses\n\n\
     <b>Security</b>\n\
     /ports — Listening ports\n\
     /firewall — Packet filter check\n\
     /events — Recent security events\n\
     /scan — Trigger security scan\n\n\
     <b>Docker</b>\n\
     /docker — Container status\n\
     /docker stop &lt;name&gt; — Stop a container\n\
     /docker restart &lt;name&gt; — Restart a container\n\
     /docker fix &lt;name&gt; — Restart unhealthy/exited container\n\
     /docker logs &lt;name&gt; — Show last 20 log lines\n\
     /docker remove &lt;name&gt; CONFIRM — Force-remove a container\n\
     /docker prune CONFIRM — Remove all stopped containers\n\
     /services — Running services\n\n\
     <b>Danger zone</b>\n\
     /reboot CONFIRM — Reboot the host"
}

fn cmd_ports() -> String {
    let ports = match probes::listening_sockets() {
        Ok(p) => p,
        Err(_) => return "❌ Failed to read ports".to_string(),
    };
    if ports.is_empty() {
        return "✅ No listening ports".to_string();
    }

    let mut out = String::from("🔌 <b>Listening Ports</b>\n\n");
    let mut exposed = 0;
    let mut local = 0;
    for p in &ports {
        let icon = if p.is_exposed {
            exposed += 1;
            "⚠️"
        } else {
            local += 1;
            "✅"
        };
        let name = if p.process_name.is_empty() {
            "unknown"
        } else {
            &p.process_name
        };
        out.push_str(&format!(
            "{icon} <code>{}</code> → {}\n",
            escape_html(&p.address),
            escape_html(name)
        ));
    }
    out.push_str(&format!("\n📊 {local} local, {exposed} exposed"));
    out
}

fn cmd_firewall() -> String {
    let mut out = String::from("🔥 <b>Firewall Status</b>\n\n");

    match probes::chain_rules("filter", "INPUT") {
        Err(_) => out.push_str("❌ Cannot read INPUT chain (need root?)\n"),
        Ok(_) => {
            if probes::chain_policy("filter", "INPUT").eq_ignore_ascii_case("DROP") {
                out.push_str("✅ INPUT policy: DROP\n");
            } else {
                out.push_str("🔴 INPUT policy: NOT DROP — EXPOSED\n");
            }
        }
    }

    match probes::chain_rules("filter", "DOCKER-USER") {
        Err(_) => out.push_str("❌ Cannot read DOCKER-USER chain\n"),
        Ok(rules) => {
            if rules.iter().any(|r| r.contains("DROP")) {
                out.push_str(&format!("✅ DOCKER-USER: intact ({} rules)\n", rules.len()));
            } else {
                out.push_str("🔴 DOCKER-USER: DROP rule MISSING\n");
            }
        }
    }

    out
}

fn cmd_docker_list() -> String {
    let containers = match probes::list_containers() {
        Ok(c) => c,
        Err(_) => return "❌ Docker not available".to_string(),
    };
    let running: Vec<_> = containers.iter().filter(|c| c.state == "running").collect();
    if running.is_empty() {
        return "🐳 No containers running".to_string();
    }

    let mut out = String::from("🐳 <b>Docker Containers</b>\n\n");
    for c in running {
        let icon = if c.status.contains("unhealthy") {
            "🔴"
        } else if c.status.contains("starting") {
            "🟡"
        } else {
            "✅"
        };
        out.push_str(&format!(
            "{icon} <b>{}</b>\n   {}\n",
            escape_html(&c.names),
            escape_html(&c.status)
        ));
    }
    out
}

fn cmd_docker_stop(args: &[&str]) -> String {
    let Some(name) = args.first() else {
        return "Usage: /docker stop &lt;name&gt;".to_string();
    };
    match docker_exec(&["stop", name]) {
        Ok(_) => format!("⏹️ Container <b>{}</b> stopped.", escape_html(name)),
        Err(err) => format!(
            "❌ Failed to stop <b>{}</b>: {}",
            escape_html(name),
            escape_html(&err)
        ),
    }
}

fn cmd_docker_restart(args: &[&str]) -> String {
    let Some(name) = args.first() else {
        return "Usage: /docker restart &lt;name&gt;".to_string();
    };
    match docker_exec(&["restart", name]) {
        Ok(_) => format!("🔄 Container <b>{}</b> restarted.", escape_html(name)),
        Err(err) => format!(
            "❌ Failed to restart <b>{}</b>: {}",
            escape_html(name),
            escape_html(&err)
        ),
    }
}

fn cmd_docker_remove(args: &[&str]) -> String {
    let Some(name) = args.first() else {
        return "Usage: /docker remove &lt;name&gt; CONFIRM".to_string();
    };
    if args.len() < 2 || !is_confirmed(args) {
        return format!(
            "⚠️ This will force-remove container <b>{}</b>.\n\nSend: /docker remove {} CONFIRM",
            escape_html(name),
            name
        );
    }
    match docker_exec(&["rm", "-f", name]) {
        Ok(_) => format!("🗑️ Container <b>{}</b> removed.", escape_html(name)),
        Err(err) => format!(
            "❌ Failed to remove <b>{}</b>: {}",
            escape_html(name),
            escape_html(&err)
        ),
    }
}

/// Alias for restart aimed at unhealthy or exited containers.
fn cmd_docker_fix(args: &[&str]) -> String {
    let Some(name) = args.first() else {
        return "Usage: /docker fix &lt;name&gt;".to_string();
    };
    match docker_exec(&["restart", name]) {
        Ok(_) => format!(
            "🔧 Container <b>{}</b> restarted (fix applied).\nRecovery will be confirmed on the next lifecycle poll.",
            escape_html(name)
        ),
        Err(err) => format!(
            "❌ Failed to restart <b>{}</b>: {}",
            escape_html(name),
            escape_html(&err)
        ),
    }
}

fn cmd_docker_logs(args: &[&str]) -> String {
    let Some(name) = args.first() else {
        return "Usage: /docker logs &lt;name&gt;".to_string();
    };
    match docker_exec(&["logs", "--tail", "20", name]) {
        Ok(out) if out.is_empty() => format!("📋 No log output for <b>{}</b>", escape_html(name)),
        Ok(out) => format!(
            "📋 <b>Logs — {}</b> (last 20 lines)\n\n<code>{}</code>",
            escape_html(name),
            truncate(&escape_html(&out), 3000)
        ),
        Err(err) => format!(
            "❌ Failed to get logs for <b>{}</b>: {}",
            escape_html(name),
            escape_html(&err)
        ),
    }
}

fn cmd_disk() -> String {
    let out = match probes::run("df", &["-h", "/"]) {
        Ok(out) => out,
        Err(_) => return "❌ Failed to read disk".to_string(),
    };
    let Some(line) = out.trim().lines().nth(1) else {
        return "❌ No disk data".to_string();
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return "❌ Cannot parse disk data".to_string();
    }

    let percent: u32 = fields[4].trim_end_matches('%').parse().unwrap_or(0);
    format!(
        "💾 <b>Disk Usage</b>\n\n{} {}\n\nTotal: {} | Used: {} | Free: {}",
        progress_bar(percent),
        fields[4],
        fields[1],
        fields[2],
        fields[3]
    )
}

fn cmd_temp() -> String {
    let temp = probes::cpu_temp_celsius();
    if temp <= 0.0 {
        return "🌡️ Temperature sensor not available".to_string();
    }
    let icon = if temp > 70.0 {
        "🔴"
    } else if temp > 60.0 {
        "🟡"
    } else {
        "✅"
    };
    format!("🌡️ <b>CPU Temperature</b>\n\n{icon} {temp:.1}°C")
}

fn cmd_memory() -> String {
    let info = probes::meminfo();
    if info.total_kb == 0 {
        return "❌ Cannot read memory info".to_string();
    }
    let percent = info.used_percent();
    format!(
        "🧠 <b>Memory Usage</b>\n\n{} {percent}%\n\nTotal: {} | Used: {} | Available: {}\nBuffers: {} | Cached: {}",
        progress_bar(percent),
        format_kb(info.total_kb),
        format_kb(info.used_kb()),
        format_kb(info.available_kb),
        format_kb(info.buffers_kb),
        format_kb(info.cached_kb)
    )
}

fn cmd_uptime() -> String {
    let seconds = probes::uptime_seconds();
    if seconds == 0 {
        return "❌ Failed to read uptime".to_string();
    }
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    format!("⏱️ <b>Uptime</b>\n\n{days} days, {hours} hours, {mins} minutes")
}

fn cmd_ip() -> String {
    let hostname = probes::hostname();
    let mut out = format!("🌐 <b>Network — {hostname}</b>\n\n");

    let ips = probes::run("hostname", &["-I"]).unwrap_or_default();
    for ip in ips.split_whitespace() {
        if ip.contains(':') {
            continue; // keep the listing readable, IPv4 only
        }
        let label = if ip.starts_with("100.") {
            "Tailscale"
        } else if ip.starts_with("172.") || ip.starts_with("10.") {
            "Docker"
        } else {
            "LAN"
        };
        out.push_str(&format!("  {label}: <code>{ip}</code>\n"));
    }
    out
}

fn cmd_services() -> String {
    let out = match probes::run(
        "systemctl",
        &["list-units", "--type=service", "--state=running", "--no-pager", "--no-legend"],
    ) {
        Ok(out) => out,
        Err(_) => return "❌ Failed to list services".to_string(),
    };

    let mut body = String::from("⚙️ <b>Running Services</b>\n\n");
    let mut count = 0;
    for line in out.trim().lines() {
        let Some(unit) = line.split_whitespace().next() else {
            continue;
        };
        let name = unit.trim_end_matches(".service");
        if name.starts_with("sys-")
            || name.starts_with("user@")
            || name.starts_with("systemd-")
            || name.starts_with("modprobe@")
            || name.starts_with("getty@")
            || name == "dbus"
        {
            continue;
        }
        body.push_str(&format!("  ✅ {}\n", escape_html(name)));
        count += 1;
    }
    body.push_str(&format!("\n📊 {count} services running"));
    body
}

// ── Helpers ──

fn is_confirmed(args: &[&str]) -> bool {
    args.last()
        .map(|last| last.eq_ignore_ascii_case("confirm"))
        .unwrap_or(false)
}

fn docker_exec(args: &[&str]) -> std::result::Result<String, String> {
    match Command::new("docker").args(args).output() {
        Ok(out) => {
            let combined = combined_output(&out);
            if out.status.success() {
                Ok(combined)
            } else {
                Err(combined)
            }
        }
        Err(err) => Err(err.to_string()),
    }
}

fn combined_output(out: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    text.trim().to_string()
}

fn disk_str() -> String {
    let Ok(out) = probes::run("df", &["-h", "/"]) else {
        return "unknown".to_string();
    };
    let Some(line) = out.trim().lines().nth(1) else {
        return "unknown".to_string();
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return "unknown".to_string();
    }
    format!("{} / {} ({})", fields[2], fields[1], fields[4])
}

fn mem_str() -> String {
    let info = probes::meminfo();
    if info.total_kb == 0 {
        return "unknown".to_string();
    }
    format!(
        "{} / {} ({}%)",
        format_kb(info.used_kb()),
        format_kb(info.total_kb),
        info.used_percent()
    )
}

fn temp_str() -> String {
    let temp = probes::cpu_temp_celsius();
    if temp <= 0.0 {
        return "N/A".to_string();
    }
    format!("{temp:.1}°C")
}

fn uptime_str() -> String {
    let seconds = probes::uptime_seconds();
    if seconds == 0 {
        return "unknown".to_string();
    }
    format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
}

fn firewall_str() -> String {
    if probes::chain_policy("filter", "INPUT").eq_ignore_ascii_case("DROP") {
        "✅ intact".to_string()
    } else {
        "🔴 CHECK REQUIRED".to_string()
    }
}

/// Visual bar like [████████░░].
fn progress_bar(percent: u32) -> String {
    let filled = (percent / 10).min(10) as usize;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(10 - filled))
}

fn format_kb(kb: u64) -> String {
    if kb > 1_048_576 {
        format!("{:.1} GB", kb as f64 / 1_048_576.0)
    } else if kb > 1024 {
        format!("{:.0} MB", kb as f64 / 1024.0)
    } else {
        format!("{kb} kB")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bot(dir: &TempDir) -> BotWatcher {
        let store = Arc::new(Store::open(dir.path().join("bot.db")).unwrap());
        let cfg = TelegramConfig {
            enabled: true,
            bot_token: "token".into(),
            chat_id: "42".into(),
            interactive: true,
        };
        BotWatcher::new(&cfg, store)
    }

    #[tokio::test]
    async fn non_command_text_is_ignored() {
        let dir = TempDir::new().unwrap();
        let b = bot(&dir);
        assert!(b.handle_command("hello there").await.is_none());
        assert!(b.handle_command("").await.is_none());
    }

    #[tokio::test]
    async fn routing_is_case_insensitive_and_trimmed() {
        let dir = TempDir::new().unwrap();
        let b = bot(&dir);
        let response = b.handle_command("  /HELP  ").await.unwrap();
        assert!(response.contains("Hostguard Commands"));
    }

    #[tokio::test]
    async fn unknown_command_points_at_help() {
        let dir = TempDir::new().unwrap();
        let b = bot(&dir);
        let response = b.handle_command("/frobnicate").await.unwrap();
        assert!(response.contains("Unknown command: /frobnicate"));
        assert!(response.contains("/help"));
    }

    #[tokio::test]
    async fn docker_remove_demands_confirmation() {
        let dir = TempDir::new().unwrap();
        let b = bot(&dir);

        let prompt = b.handle_command("/docker remove nginx").await.unwrap();
        assert!(prompt.contains("CONFIRM"));
        assert!(prompt.contains("nginx"));

        // Any trailing word other than CONFIRM re-prompts.
        let prompt = b.handle_command("/docker remove nginx PLEASE").await.unwrap();
        assert!(prompt.contains("CONFIRM"));
    }

    #[tokio::test]
    async fn reboot_demands_confirmation() {
        let dir = TempDir::new().unwrap();
        let b = bot(&dir);
        let prompt = b.handle_command("/reboot").await.unwrap();
        assert!(prompt.contains("Reboot requires confirmation"));
        assert!(prompt.contains("CONFIRM"));
    }

    #[test]
    fn confirmation_matching() {
        assert!(is_confirmed(&["nginx", "CONFIRM"]));
        assert!(is_confirmed(&["nginx", "confirm"]));
        assert!(!is_confirmed(&["nginx"]));
        assert!(!is_confirmed(&["nginx", "PLEASE"]));
        assert!(!is_confirmed(&[]));
    }

    #[test]
    fn events_command_reads_store() {
        use crate::event::{Event, EventType, Severity};

        let dir = TempDir::new().unwrap();
        let b = bot(&dir);
        b.store
            .save(&Event::new(
                EventType::PortOpened,
                Severity::Warning,
                "ports",
                "0.0.0.0:8080",
                "New listening port: 0.0.0.0:8080 → node",
            ))
            .unwrap();

        let out = b.cmd_events();
        assert!(out.contains("Recent Events"));
        assert!(out.contains("0.0.0.0:8080"));
    }

    #[test]
    fn helpers() {
        assert_eq!(progress_bar(0), "[░░░░░░░░░░]");
        assert_eq!(progress_bar(50), "[█████░░░░░]");
        assert_eq!(progress_bar(100), "[██████████]");
        assert_eq!(progress_bar(250), "[██████████]");

        assert_eq!(format_kb(512), "512 kB");
        assert_eq!(format_kb(2048), "2 MB");
        assert_eq!(format_kb(2 * 1_048_576), "2.0 GB");

        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789...");
        // Multibyte content never splits a character.
        let emoji = "🛡️🛡️🛡️🛡️";
        let cut = truncate(emoji, 5);
        assert!(cut.ends_with("..."));

        assert_eq!(escape_html("<b>&</b>"), "&lt;b&gt;&amp;&lt;/b&gt;");
    }
}
