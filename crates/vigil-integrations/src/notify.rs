//! Notification sinks

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use vigil_core::{Notification, NotificationSink};

use crate::http::ResponseExt;

/// POSTs each notification as JSON to a webhook
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    pub fn new(url: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context("Failed to reach notification webhook")?
            .ensure_success("Notification webhook")
            .await?;
        log::debug!("Delivered '{}' to webhook", notification.title);
        Ok(())
    }
}

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<()> {
        log::info!("[{:?}] {}: {}", notification.kind, notification.title, notification.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;
    use vigil_core::{AlertKind, DedupeKey};

    fn notification() -> Notification {
        Notification {
            kind: AlertKind::AfkWarning,
            title: "Are you still there?".to_string(),
            body: "No activity since 10:00.".to_string(),
            dedupe_key: DedupeKey::afk_warning(1),
            fired_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/vigil")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "kind": "afk_warning",
                "title": "Are you still there?"
            })))
            .with_status(204)
            .create_async()
            .await;

        let url = format!("{}/hooks/vigil", server.url());
        let notifier = WebhookNotifier::new(&url, std::time::Duration::from_secs(5)).unwrap();
        notifier.dispatch(&notification()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_failure_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks/vigil")
            .with_status(500)
            .create_async()
            .await;

        let url = format!("{}/hooks/vigil", server.url());
        let notifier = WebhookNotifier::new(&url, std::time::Duration::from_secs(5)).unwrap();
        assert!(notifier.dispatch(&notification()).await.is_err());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.dispatch(&notification()).await.is_ok());
    }
}
