//! ntfy notifier: plain-text POST to a topic with priority and tag headers.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::NtfyConfig;
use crate::event::{Event, Severity};

use super::{http_client, Notifier};

const DEFAULT_SERVER: &str = "https://ntfy.sh";

pub struct Ntfy {
    server: String,
    topic: String,
    token: String,
    client: reqwest::Client,
}

impl Ntfy {
    pub fn new(cfg: &NtfyConfig) -> Self {
        let server = if cfg.server.is_empty() {
            DEFAULT_SERVER.to_string()
        } else {
            cfg.server.clone()
        };
        Ntfy {
            server,
            topic: cfg.topic.clone(),
            token: cfg.token.clone(),
            client: http_client(),
        }
    }

    async fn post(&self, title: &str, body: String, priority: &str, tags: &str) -> Result<()> {
        let url = format!("{}/{}", self.server, self.topic);
        let mut req = self
            .client
            .post(&url)
            .header("Title", title)
            .header("Priority", priority)
            .header("Tags", tags)
            .body(body);
        if !self.token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.token));
        }

        let resp = req.send().await.context("ntfy send failed")?;
        if !resp.status().is_success() {
            bail!("ntfy returned status {}", resp.status().as_u16());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for Ntfy {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let title = format!("Hostguard — {}", event.hostname);
        let (priority, tags) = priority_and_tags(event.severity);
        self.post(&title, event_body(event), priority, tags).await
    }

    async fn send_raw(&self, message: &str) -> Result<()> {
        self.post("Hostguard", message.to_string(), "default", "shield")
            .await
    }

    async fn test(&self) -> Result<()> {
        self.post(
            "Hostguard",
            "Test notification — Hostguard is connected!".to_string(),
            "default",
            "white_check_mark",
        )
        .await
    }
}

fn priority_and_tags(severity: Severity) -> (&'static str, &'static str) {
    match severity {
        Severity::Critical => ("urgent", "rotating_light"),
        Severity::Warning => ("high", "warning"),
        Severity::Info => ("default", "shield"),
    }
}

fn event_body(event: &Event) -> String {
    let mut body = event.message.clone();
    if !event.details.is_empty() {
        body.push('\n');
        body.push_str(&event.details);
    }
    if !event.suggested.is_empty() {
        body.push_str("\n\n💡 ");
        body.push_str(&event.suggested);
    }
    body
}
