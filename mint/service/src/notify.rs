// Copyright (c) 2024 The Botho Foundation

//! Notifications for finalized mints.
//!
//! Delivery is fire-and-forget: the workflow logs a failed delivery and moves
//! on, the mint itself is already final.

use async_trait::async_trait;
use bth_mint_core::NotifyConfig;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// A finalized mint, as announced to the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintNotice {
    pub deposit_id: String,
    pub sequence: u64,
    pub asset_name: String,
    pub recipient: String,
    pub tx_id: Option<String>,
}

impl MintNotice {
    /// Human readable one-line summary.
    pub fn message(&self) -> String {
        let mut message = format!(
            "Minted {} (#{}) to {} for deposit {}",
            self.asset_name, self.sequence, self.recipient, self.deposit_id
        );
        if let Some(tx_id) = &self.tx_id {
            message.push_str(&format!(", tx {}", tx_id));
        }
        message
    }
}

/// Trait for mint notification sinks.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &MintNotice) -> anyhow::Result<()>;
}

/// Writes notices to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &MintNotice) -> anyhow::Result<()> {
        tracing::info!("{}", notice.message());
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: String,
    username: &'a str,
}

/// POSTs notices to a chat-style webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    username: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, username: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            username: username.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: &MintNotice) -> anyhow::Result<()> {
        let body = WebhookMessage {
            content: notice.message(),
            username: &self.username,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Webhook returned status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        tracing::debug!("Posted notice for deposit {} to webhook", notice.deposit_id);
        Ok(())
    }
}

/// Create a notifier based on configuration.
pub fn create_notifier(config: &NotifyConfig) -> anyhow::Result<Box<dyn Notifier>> {
    match config.webhook_url.as_deref() {
        Some(url) if !url.is_empty() => Ok(Box::new(WebhookNotifier::new(
            url,
            &config.username,
            Duration::from_secs(config.timeout_secs),
        )?)),
        _ => Ok(Box::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(tx_id: Option<&str>) -> MintNotice {
        MintNotice {
            deposit_id: "mock_1".into(),
            sequence: 1,
            asset_name: "Flowmass 1".into(),
            recipient: "addrX".into(),
            tx_id: tx_id.map(String::from),
        }
    }

    #[test]
    fn test_message() {
        assert_eq!(
            notice(None).message(),
            "Minted Flowmass 1 (#1) to addrX for deposit mock_1"
        );
        assert!(notice(Some("ab12")).message().ends_with(", tx ab12"));
    }

    #[test]
    fn test_webhook_body() {
        let body = WebhookMessage {
            content: notice(None).message(),
            username: "Mint Bot",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["username"], "Mint Bot");
        assert!(json["content"].as_str().unwrap().starts_with("Minted Flowmass 1"));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_error() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/hook", "Mint Bot", Duration::from_secs(2))
                .unwrap();
        assert!(notifier.notify(&notice(None)).await.is_err());
    }

    #[test]
    fn test_create_notifier_without_url() {
        let config = NotifyConfig::default();
        assert!(create_notifier(&config).is_ok());
    }
}
