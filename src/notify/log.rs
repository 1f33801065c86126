//! Notifier used when no transport is configured: logs instead of sending.

use async_trait::async_trait;

use super::{Notifier, OutboundMessage};
use crate::error::DispatchError;

#[derive(Debug, Default, Clone)]
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
        tracing::warn!(
            channel = %self.name,
            kind = ?message.kind,
            lead_id = %message.lead_id,
            to = ?message.to,
            subject = %message.subject,
            "No transport configured, message logged only"
        );
        Ok(())
    }
}
