//! In-memory notifier that records every accepted message.
//!
//! Used by tests and local development. Failures and rate limits can be
//! scripted to exercise the error paths.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Notifier, OutboundMessage};
use crate::error::DispatchError;

#[derive(Debug, Default)]
struct Script {
    fail_next: usize,
    rate_limit_after: Option<usize>,
    fail_for: Vec<Uuid>,
}

/// Records messages in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    name: String,
    sent: Mutex<Vec<OutboundMessage>>,
    script: Mutex<Script>,
}

impl MemoryNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: usize) {
        if let Ok(mut script) = self.script.lock() {
            script.fail_next = n;
        }
    }

    /// Always fail sends for this lead.
    pub fn fail_for(&self, lead_id: Uuid) {
        if let Ok(mut script) = self.script.lock() {
            script.fail_for.push(lead_id);
        }
    }

    /// Accept `n` more messages, then answer every send with `RateLimited`.
    pub fn rate_limit_after(&self, n: usize) {
        if let Ok(mut script) = self.script.lock() {
            script.rate_limit_after = Some(n);
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), DispatchError> {
        {
            let mut script = self.script.lock().map_err(|_| DispatchError::SendFailed {
                channel: self.name.clone(),
                reason: "script lock poisoned".into(),
            })?;
            if script.fail_for.contains(&message.lead_id) {
                return Err(DispatchError::SendFailed {
                    channel: self.name.clone(),
                    reason: "scripted failure for lead".into(),
                });
            }
            if script.fail_next > 0 {
                script.fail_next -= 1;
                return Err(DispatchError::SendFailed {
                    channel: self.name.clone(),
                    reason: "scripted failure".into(),
                });
            }
            if let Some(remaining) = script.rate_limit_after.as_mut() {
                if *remaining == 0 {
                    return Err(DispatchError::RateLimited {
                        channel: self.name.clone(),
                    });
                }
                *remaining -= 1;
            }
        }

        let mut sent = self.sent.lock().map_err(|_| DispatchError::SendFailed {
            channel: self.name.clone(),
            reason: "outbox lock poisoned".into(),
        })?;
        sent.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MessageKind;

    fn msg() -> OutboundMessage {
        OutboundMessage::new(MessageKind::Sequence, Uuid::new_v4(), "a@x.org", "s", "b")
    }

    #[tokio::test]
    async fn records_and_scripts_failures() {
        let notifier = MemoryNotifier::new("memory");
        notifier.fail_next(1);

        assert!(notifier.send(&msg()).await.is_err());
        notifier.send(&msg()).await.unwrap();
        assert_eq!(notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn rate_limit_kicks_in() {
        let notifier = MemoryNotifier::new("memory");
        notifier.rate_limit_after(1);

        notifier.send(&msg()).await.unwrap();
        let err = notifier.send(&msg()).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(notifier.sent_count(), 1);
    }
}
