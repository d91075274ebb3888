//! Generic webhook notifier: the whole event as JSON to a configured URL.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::config::WebhookConfig;
use crate::event::Event;

use super::{http_client, Notifier};

pub struct Webhook {
    url: String,
    method: reqwest::Method,
    client: reqwest::Client,
}

impl Webhook {
    pub fn new(cfg: &WebhookConfig) -> Self {
        Webhook {
            url: cfg.url.clone(),
            method: parse_method(&cfg.method),
            client: http_client(),
        }
    }

    async fn post_json(&self, body: String) -> Result<()> {
        let resp = self
            .client
            .request(self.method.clone(), &self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("hostguard/", env!("CARGO_PKG_VERSION")))
            .body(body)
            .send()
            .await
            .context("webhook send failed")?;
        if resp.status().as_u16() >= 400 {
            bail!("webhook returned status {}", resp.status().as_u16());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for Webhook {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, event: &Event) -> Result<()> {
        self.post_json(serde_json::to_string(event)?).await
    }

    async fn send_raw(&self, message: &str) -> Result<()> {
        self.post_json(json!({ "message": message }).to_string()).await
    }

    async fn test(&self) -> Result<()> {
        self.send_raw("Hostguard test notification").await
    }
}

fn parse_method(method: &str) -> reqwest::Method {
    if method.is_empty() {
        return reqwest::Method::POST;
    }
    reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .unwrap_or(reqwest::Method::POST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_defaults_to_post() {
        assert_eq!(parse_method(""), reqwest::Method::POST);
        assert_eq!(parse_method("put"), reqwest::Method::PUT);
        assert_eq!(parse_method("POST"), reqwest::Method::POST);
        assert_eq!(parse_method("not a method!"), reqwest::Method::POST);
    }
}
