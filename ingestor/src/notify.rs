use crate::errors::{Error, Result};
use crate::metrics::NOTIFY_FAILURES_TOTAL;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// One attempt per message, bounded by `timeout`. Failures never reach the caller.
pub struct NotificationSink {
    notifier: Option<Arc<dyn Notifier>>,
    timeout: Duration,
}

impl NotificationSink {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier: Some(notifier),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            notifier: None,
            timeout: Duration::ZERO,
        }
    }

    pub async fn send(&self, message: &str) {
        let Some(notifier) = &self.notifier else {
            info!("Alert (no notification channel configured): {}", message);
            return;
        };

        match tokio::time::timeout(self.timeout, notifier.notify(message)).await {
            Ok(Ok(())) => info!("Alert delivered: {}", message),
            Ok(Err(e)) => {
                NOTIFY_FAILURES_TOTAL.inc();
                warn!("Failed to deliver alert '{}': {}", message, e);
            }
            Err(_) => {
                NOTIFY_FAILURES_TOTAL.inc();
                warn!(
                    "Alert delivery timed out after {:?}: {}",
                    self.timeout, message
                );
            }
        }
    }
}

// Same body shape as Telegram `sendMessage`.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    chat_id: Option<String>,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<&'a str>,
    text: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: String, chat_id: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url,
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookMessage {
                chat_id: self.chat_id.as_deref(),
                text: message,
            })
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("notification request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "notification channel answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
