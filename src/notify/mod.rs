//! Outbound notification channel.
//!
//! The orchestrator only sees the [`Notifier`] trait. Lead-facing messages
//! and staff-facing alerts go through separate notifier instances so they
//! can use different transports.

pub mod log;
pub mod memory;
pub mod smtp;
pub mod webhook;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

pub use self::log::LogNotifier;
pub use memory::MemoryNotifier;
pub use smtp::{SmtpConfig, SmtpNotifier};
pub use webhook::WebhookNotifier;

/// What an outbound message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Step 0 of a sequence, sent at intake.
    Welcome,
    /// A later nurture step.
    Sequence,
    /// SLA breach alert to staff.
    Escalation,
    /// Staff follow-up created by a sequence side action.
    StaffTask,
}

/// A rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub kind: MessageKind,
    pub lead_id: Uuid,
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutboundMessage {
    pub fn new(
        kind: MessageKind,
        lead_id: Uuid,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            lead_id,
            to: vec![to.into()],
            cc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Builder: replace the recipient list.
    pub fn with_recipients(mut self, to: Vec<String>) -> Self {
        self.to = to;
        self
    }

    /// Builder: set cc recipients.
    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }
}

/// A transport that can deliver an [`OutboundMessage`].
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs and errors.
    fn name(&self) -> &str;

    /// Deliver one message. `Ok` means the transport accepted it.
    async fn send(&self, message: &OutboundMessage) -> Result<(), DispatchError>;
}

/// Send with an upper bound on how long the transport may take.
pub async fn send_with_timeout(
    notifier: &dyn Notifier,
    message: &OutboundMessage,
    timeout: Duration,
) -> Result<(), DispatchError> {
    match tokio::time::timeout(timeout, notifier.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout {
            channel: notifier.name().to_string(),
            timeout,
        }),
    }
}
