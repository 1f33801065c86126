//! Inbound reply handling: maps a lead's reply to a status transition.
//!
//! Replies use a flat command grammar. The first word of the normalized
//! text decides the action; anything unrecognized is logged and ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DatabaseError, RequestError};
use crate::leads::model::phone_digits;
use crate::leads::{Lead, LeadStatus};
use crate::store::{self, LeadActivity, LeadStore, update_with_retry};

/// Channel the reply arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyChannel {
    Email,
    Sms,
}

/// Inbound reply webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub channel: ReplyChannel,
    /// Sender email address or phone number.
    #[serde(alias = "from")]
    pub identifier: String,
    #[serde(alias = "content", default)]
    pub text: String,
}

impl ReplyRequest {
    pub fn new(channel: ReplyChannel, identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel,
            identifier: identifier.into(),
            text: text.into(),
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.identifier.trim().is_empty() {
            return Err(RequestError::Validation("identifier is required".into()));
        }
        if self.channel == ReplyChannel::Sms && phone_digits(&self.identifier).is_empty() {
            return Err(RequestError::Validation(
                "sms identifier must contain a phone number".into(),
            ));
        }
        Ok(())
    }
}

/// What a reply asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAction {
    Unsubscribed,
    Engaged,
    None,
}

impl ReplyAction {
    fn target(&self) -> Option<LeadStatus> {
        match self {
            ReplyAction::Unsubscribed => Some(LeadStatus::Closed),
            ReplyAction::Engaged => Some(LeadStatus::Contacted),
            ReplyAction::None => None,
        }
    }

    fn note(&self) -> &'static str {
        match self {
            ReplyAction::Unsubscribed => "Unsubscribed via inbound",
            ReplyAction::Engaged => "Lead engaged via inbound",
            ReplyAction::None => "Inbound reply with no command",
        }
    }
}

/// Classify reply text by its first word.
pub fn classify(raw_text: &str) -> ReplyAction {
    let normalized = raw_text.trim().to_lowercase();
    let first = normalized
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric());
    match first {
        "stop" | "unsubscribe" | "cancel" => ReplyAction::Unsubscribed,
        "yes" | "book" | "schedule" => ReplyAction::Engaged,
        _ => ReplyAction::None,
    }
}

/// Result of handling one reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyOutcome {
    /// A lead was found for the identifier.
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<Uuid>,
    pub action: ReplyAction,
    /// Set only when the status actually changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<LeadStatus>,
}

impl ReplyOutcome {
    fn unmatched() -> Self {
        Self {
            matched: false,
            lead_id: None,
            action: ReplyAction::None,
            new_status: None,
        }
    }
}

async fn lookup(store: &dyn LeadStore, request: &ReplyRequest) -> Result<Option<Lead>, DatabaseError> {
    match request.channel {
        ReplyChannel::Email => store.find_by_email(&request.identifier).await,
        ReplyChannel::Sms => store.find_by_phone(&phone_digits(&request.identifier)).await,
    }
}

/// Resolve the sender, classify the text and apply the status change.
pub async fn handle_reply(
    store: &dyn LeadStore,
    request: &ReplyRequest,
    now: DateTime<Utc>,
) -> Result<ReplyOutcome, DatabaseError> {
    let Some(lead) = lookup(store, request).await? else {
        tracing::info!(channel = ?request.channel, "Inbound reply from unknown sender");
        return Ok(ReplyOutcome::unmatched());
    };

    let action = classify(&request.text);
    let mut outcome = ReplyOutcome {
        matched: true,
        lead_id: Some(lead.id),
        action,
        new_status: None,
    };

    let Some(target) = action.target() else {
        tracing::info!(lead_id = %lead.id, "Inbound reply logged, no command recognized");
        store::record_activity_best_effort(store, LeadActivity::new(lead.id, "reply", action.note(), now))
            .await;
        return Ok(outcome);
    };

    let stored = update_with_retry(store, &lead, |l| {
        if !l.status.can_transition_to(target) {
            return false;
        }
        l.status = target;
        l.updated_at = now;
        true
    })
    .await?;

    match stored {
        Some(updated) => {
            tracing::info!(lead_id = %lead.id, status = %updated.status, "Lead status changed by reply");
            outcome.new_status = Some(updated.status);
            store::record_activity_best_effort(
                store,
                LeadActivity::new(lead.id, "status_changed", action.note(), now),
            )
            .await;
        }
        None => {
            tracing::info!(lead_id = %lead.id, status = %lead.status, ?target, "Reply did not change status");
        }
    }

    Ok(outcome)
}
