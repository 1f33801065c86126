//! Posts messages as JSON to an HTTP endpoint (chat hook, paging service).

use std::time::Duration;

use async_trait::async_trait;

use super::{Notifier, OutboundMessage};
use crate::error::DispatchError;

pub struct WebhookNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
        let resp = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| DispatchError::SendFailed {
                channel: self.name.clone(),
                reason: format!("Webhook request failed: {e}"),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DispatchError::RateLimited {
                channel: self.name.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::SendFailed {
                channel: self.name.clone(),
                reason: format!("Webhook returned {status}: {body}"),
            });
        }

        tracing::debug!(lead_id = %message.lead_id, kind = ?message.kind, "Webhook delivered");
        Ok(())
    }
}
