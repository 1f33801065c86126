//! `LeadStore` trait: the single async interface for lead persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::leads::Lead;

/// An audit entry recorded alongside a lead mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadActivity {
    pub id: Uuid,
    pub lead_id: Uuid,
    /// Short machine-readable kind, e.g. `sequence_sent`, `escalated`.
    pub kind: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl LeadActivity {
    pub fn new(
        lead_id: Uuid,
        kind: impl Into<String>,
        detail: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id,
            kind: kind.into(),
            detail: detail.into(),
            created_at,
        }
    }
}

/// Backend-agnostic lead store.
///
/// Every write goes through [`LeadStore::compare_and_swap`], which only
/// succeeds if the stored version still equals the caller's copy.
#[async_trait]
pub trait LeadStore: Send + Sync {
    // ── Leads ───────────────────────────────────────────────────────

    /// Insert a new lead. Fails if the id already exists.
    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError>;

    /// Get a lead by ID.
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    /// Most recently created lead with this email (case-insensitive).
    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>, DatabaseError>;

    /// Most recently created lead whose phone has these digits.
    async fn find_by_phone(&self, digits: &str) -> Result<Option<Lead>, DatabaseError>;

    /// Leads whose status can still miss an SLA (New, Contacted).
    async fn list_open_leads(&self) -> Result<Vec<Lead>, DatabaseError>;

    /// Non-terminal leads created at or after `created_after`.
    async fn list_sequence_candidates(
        &self,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Lead>, DatabaseError>;

    /// All leads, newest first, up to `limit`.
    async fn list_leads(&self, limit: usize) -> Result<Vec<Lead>, DatabaseError>;

    /// Write `lead` if the stored version equals `lead.version`.
    ///
    /// Returns the stored lead (with its bumped version) on success, or
    /// `None` if another writer got there first.
    async fn compare_and_swap(&self, lead: &Lead) -> Result<Option<Lead>, DatabaseError>;

    // ── Activity ────────────────────────────────────────────────────

    async fn record_activity(&self, activity: &LeadActivity) -> Result<(), DatabaseError>;

    /// Activity for a lead, oldest first.
    async fn list_activity(&self, lead_id: Uuid) -> Result<Vec<LeadActivity>, DatabaseError>;
}
