//! Discord notifier: webhook POST carrying an embed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::DiscordConfig;
use crate::event::{Event, Severity};

use super::{http_client, Notifier};

pub struct Discord {
    webhook_url: String,
    client: reqwest::Client,
}

impl Discord {
    pub fn new(cfg: &DiscordConfig) -> Self {
        Discord {
            webhook_url: cfg.webhook_url.clone(),
            client: http_client(),
        }
    }

    async fn post(&self, payload: &Value) -> Result<()> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .context("discord send failed")?;
        if resp.status().as_u16() >= 400 {
            bail!("discord returned status {}", resp.status().as_u16());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for Discord {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, event: &Event) -> Result<()> {
        self.post(&embed_payload(event)).await
    }

    async fn send_raw(&self, message: &str) -> Result<()> {
        self.post(&json!({ "content": message })).await
    }

    async fn test(&self) -> Result<()> {
        self.send_raw("🛡️ **Hostguard** — Test notification\n\nIf you see this, Hostguard is connected!")
            .await
    }
}

fn embed_colour(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x3498db,
        Severity::Warning => 0xf39c12,
        Severity::Critical => 0xe74c3c,
    }
}

fn embed_payload(event: &Event) -> Value {
    let mut fields = Vec::new();
    if !event.details.is_empty() {
        fields.push(json!({ "name": "Details", "value": event.details, "inline": false }));
    }
    if !event.suggested.is_empty() {
        fields.push(json!({ "name": "💡 Suggested", "value": event.suggested, "inline": false }));
    }

    json!({
        "embeds": [{
            "title": format!("{} Hostguard — {}", event.severity.emoji(), event.hostname),
            "description": event.message,
            "color": embed_colour(event.severity),
            "fields": fields,
        }]
    })
}
