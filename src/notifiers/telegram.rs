//! Telegram notifier: bot sendMessage with HTML formatting.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::TelegramConfig;
use crate::event::Event;

use super::{http_client, Notifier};

pub struct Telegram {
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl Telegram {
    pub fn new(cfg: &TelegramConfig) -> Self {
        Telegram {
            token: cfg.bot_token.clone(),
            chat_id: cfg.chat_id.clone(),
            client: http_client(),
        }
    }

    async fn post(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let params = [
            ("chat_id", self.chat_id.as_str()),
            ("parse_mode", "HTML"),
            ("text", text),
        ];
        let resp = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .context("telegram send failed")?;
        if !resp.status().is_success() {
            bail!("telegram returned status {}", resp.status().as_u16());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for Telegram {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, event: &Event) -> Result<()> {
        self.post(&format_event(event)).await
    }

    async fn send_raw(&self, message: &str) -> Result<()> {
        self.post(message).await
    }

    async fn test(&self) -> Result<()> {
        self.post("🛡️ <b>Hostguard</b> — Test notification\n\nIf you see this, Hostguard is connected!")
            .await
    }
}

fn format_event(event: &Event) -> String {
    let mut out = format!(
        "{} <b>Hostguard — {}</b>\n\n",
        event.severity.emoji(),
        event.hostname
    );
    out.push_str(&format!("<b>{}</b>\n", event.message));
    if !event.details.is_empty() {
        out.push_str(&format!("{}\n", event.details));
    }
    if !event.suggested.is_empty() {
        out.push_str(&format!("\n💡 <i>{}</i>", event.suggested));
    }
    out
}
