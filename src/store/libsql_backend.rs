//! libSQL backend: async `LeadStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! fixed-width RFC 3339 UTC text so string comparison matches time order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::leads::model::{normalize_email, phone_digits};
use crate::leads::{Lead, LeadStatus, Program};
use crate::store::migrations;
use crate::store::traits::{LeadActivity, LeadStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlLeadStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLeadStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_leads(
        &self,
        op: &str,
        sql: &str,
        args: impl libsql::params::IntoParams,
    ) -> Result<Vec<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut leads = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_lead(&row) {
                Ok(lead) => leads.push(lead),
                Err(e) => {
                    tracing::warn!("Skipping lead row: {e}");
                }
            }
        }
        Ok(leads)
    }

    async fn query_one(
        &self,
        op: &str,
        sql: &str,
        args: impl libsql::params::IntoParams,
    ) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let lead = row_to_lead(&row)
                    .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
                Ok(Some(lead))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> libsql::Value {
    opt_text_owned(dt.map(ts))
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn parse_err(msg: String) -> libsql::Error {
    libsql::Error::ToSqlConversionFailure(msg.into())
}

const LEAD_COLUMNS: &str = "id, first_name, last_name, email, phone, program, source, risk_score, status, created_at, sla_deadline, sequence_step, last_message_sent_at, escalated_at, version, claim_token, claimed_until, updated_at";

/// Map a libsql Row to a Lead. Column order matches LEAD_COLUMNS.
fn row_to_lead(row: &libsql::Row) -> Result<Lead, libsql::Error> {
    let id_str: String = row.get(0)?;
    let program_str: String = row.get(5)?;
    let risk_score: i64 = row.get(7)?;
    let status_str: String = row.get(8)?;
    let created_str: String = row.get(9)?;
    let deadline_str: String = row.get(10)?;
    let step: i64 = row.get(11)?;
    let last_sent_str: Option<String> = row.get(12).ok();
    let escalated_str: Option<String> = row.get(13).ok();
    let version: i64 = row.get(14)?;
    let claim_str: Option<String> = row.get(15).ok();
    let claimed_until_str: Option<String> = row.get(16).ok();
    let updated_str: String = row.get(17)?;

    Ok(Lead {
        id: Uuid::parse_str(&id_str).map_err(|e| parse_err(format!("lead id: {e}")))?,
        first_name: row.get(1)?,
        last_name: row.get(2).ok(),
        email: row.get(3)?,
        phone: row.get(4).ok(),
        program: program_str.parse::<Program>().map_err(parse_err)?,
        source: row.get(6)?,
        risk_score: risk_score.clamp(0, 100) as u8,
        status: status_str.parse::<LeadStatus>().map_err(parse_err)?,
        created_at: parse_datetime(&created_str),
        sla_deadline: parse_datetime(&deadline_str),
        sequence_step: step.max(0) as u32,
        last_message_sent_at: parse_optional_datetime(&last_sent_str),
        escalated_at: parse_optional_datetime(&escalated_str),
        version: version.max(0) as u64,
        claim_token: claim_str.and_then(|s| Uuid::parse_str(&s).ok()),
        claimed_until: parse_optional_datetime(&claimed_until_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_activity(row: &libsql::Row) -> Result<LeadActivity, libsql::Error> {
    let id_str: String = row.get(0)?;
    let lead_str: String = row.get(1)?;
    let created_str: String = row.get(4)?;
    Ok(LeadActivity {
        id: Uuid::parse_str(&id_str).map_err(|e| parse_err(format!("activity id: {e}")))?,
        lead_id: Uuid::parse_str(&lead_str).map_err(|e| parse_err(format!("lead id: {e}")))?,
        kind: row.get(2)?,
        detail: row.get(3)?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl LeadStore for LibSqlLeadStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO leads ({LEAD_COLUMNS}, email_normalized, phone_digits) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
                ),
                params![
                    lead.id.to_string(),
                    lead.first_name.clone(),
                    opt_text_owned(lead.last_name.clone()),
                    lead.email.clone(),
                    opt_text_owned(lead.phone.clone()),
                    lead.program.as_str(),
                    lead.source.clone(),
                    i64::from(lead.risk_score),
                    lead.status.as_str(),
                    ts(lead.created_at),
                    ts(lead.sla_deadline),
                    i64::from(lead.sequence_step),
                    opt_ts(lead.last_message_sent_at),
                    opt_ts(lead.escalated_at),
                    lead.version as i64,
                    opt_text_owned(lead.claim_token.map(|t| t.to_string())),
                    opt_ts(lead.claimed_until),
                    ts(lead.updated_at),
                    normalize_email(&lead.email),
                    opt_text_owned(lead.phone.as_deref().map(phone_digits)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_lead: {e}")))?;

        debug!(lead_id = %lead.id, program = %lead.program, "Lead inserted into DB");
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        self.query_one(
            "get_lead",
            &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
            params![id.to_string()],
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>, DatabaseError> {
        self.query_one(
            "find_by_email",
            &format!(
                "SELECT {LEAD_COLUMNS} FROM leads WHERE email_normalized = ?1 ORDER BY created_at DESC LIMIT 1"
            ),
            params![normalize_email(email)],
        )
        .await
    }

    async fn find_by_phone(&self, digits: &str) -> Result<Option<Lead>, DatabaseError> {
        if digits.is_empty() {
            return Ok(None);
        }
        self.query_one(
            "find_by_phone",
            &format!(
                "SELECT {LEAD_COLUMNS} FROM leads WHERE phone_digits = ?1 ORDER BY created_at DESC LIMIT 1"
            ),
            params![digits.to_string()],
        )
        .await
    }

    async fn list_open_leads(&self) -> Result<Vec<Lead>, DatabaseError> {
        self.query_leads(
            "list_open_leads",
            &format!(
                "SELECT {LEAD_COLUMNS} FROM leads WHERE status IN ('new', 'contacted') ORDER BY risk_score DESC, sla_deadline ASC"
            ),
            (),
        )
        .await
    }

    async fn list_sequence_candidates(
        &self,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Lead>, DatabaseError> {
        self.query_leads(
            "list_sequence_candidates",
            &format!(
                "SELECT {LEAD_COLUMNS} FROM leads WHERE status NOT IN ('converted', 'closed') AND created_at >= ?1 ORDER BY created_at ASC"
            ),
            params![ts(created_after)],
        )
        .await
    }

    async fn list_leads(&self, limit: usize) -> Result<Vec<Lead>, DatabaseError> {
        self.query_leads(
            "list_leads",
            &format!("SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at DESC LIMIT ?1"),
            params![limit as i64],
        )
        .await
    }

    async fn compare_and_swap(&self, lead: &Lead) -> Result<Option<Lead>, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE leads SET first_name = ?1, last_name = ?2, email = ?3, email_normalized = ?4, phone = ?5, phone_digits = ?6, status = ?7, sequence_step = ?8, last_message_sent_at = ?9, escalated_at = ?10, claim_token = ?11, claimed_until = ?12, updated_at = ?13, version = version + 1 WHERE id = ?14 AND version = ?15",
                params![
                    lead.first_name.clone(),
                    opt_text_owned(lead.last_name.clone()),
                    lead.email.clone(),
                    normalize_email(&lead.email),
                    opt_text_owned(lead.phone.clone()),
                    opt_text_owned(lead.phone.as_deref().map(phone_digits)),
                    lead.status.as_str(),
                    i64::from(lead.sequence_step),
                    opt_ts(lead.last_message_sent_at),
                    opt_ts(lead.escalated_at),
                    opt_text_owned(lead.claim_token.map(|t| t.to_string())),
                    opt_ts(lead.claimed_until),
                    ts(lead.updated_at),
                    lead.id.to_string(),
                    lead.version as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("compare_and_swap: {e}")))?;

        if affected == 0 {
            if self.get_lead(lead.id).await?.is_none() {
                return Err(DatabaseError::NotFound {
                    entity: "lead".into(),
                    id: lead.id.to_string(),
                });
            }
            debug!(lead_id = %lead.id, version = lead.version, "Lead version conflict");
            return Ok(None);
        }

        let mut stored = lead.clone();
        stored.version += 1;
        Ok(Some(stored))
    }

    async fn record_activity(&self, activity: &LeadActivity) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO lead_activity (id, lead_id, kind, detail, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    activity.id.to_string(),
                    activity.lead_id.to_string(),
                    activity.kind.clone(),
                    activity.detail.clone(),
                    ts(activity.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_activity: {e}")))?;
        Ok(())
    }

    async fn list_activity(&self, lead_id: Uuid) -> Result<Vec<LeadActivity>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, lead_id, kind, detail, created_at FROM lead_activity WHERE lead_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![lead_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_activity: {e}")))?;

        let mut activity = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_activity(&row) {
                Ok(a) => activity.push(a),
                Err(e) => {
                    tracing::warn!("Skipping activity row: {e}");
                }
            }
        }
        Ok(activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_db() -> LibSqlLeadStore {
        LibSqlLeadStore::new_memory().await.unwrap()
    }

    fn make_lead(email: &str) -> Lead {
        Lead::new("Ana", email, Program::Veterans, 85, Utc::now())
            .with_last_name("Diaz")
            .with_phone("+1 (626) 555-0100")
    }

    #[tokio::test]
    async fn insert_and_get_by_id() {
        let db = test_db().await;
        let lead = make_lead("ana@example.org");
        db.insert_lead(&lead).await.unwrap();

        let fetched = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, lead.id);
        assert_eq!(fetched.last_name.as_deref(), Some("Diaz"));
        assert_eq!(fetched.program, Program::Veterans);
        assert_eq!(fetched.status, LeadStatus::New);
        assert_eq!(fetched.risk_score, 85);
        assert_eq!(
            fetched.sla_deadline - fetched.created_at,
            chrono::Duration::minutes(15)
        );
        assert!(fetched.escalated_at.is_none());
    }

    #[tokio::test]
    async fn get_by_id_not_found() {
        let db = test_db().await;
        assert!(db.get_lead(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lookup_by_email_and_phone() {
        let db = test_db().await;
        let lead = make_lead("Ana@Example.org");
        db.insert_lead(&lead).await.unwrap();

        let by_email = db.find_by_email(" ana@example.ORG ").await.unwrap().unwrap();
        assert_eq!(by_email.id, lead.id);
        let by_phone = db.find_by_phone("16265550100").await.unwrap().unwrap();
        assert_eq!(by_phone.id, lead.id);
        assert!(db.find_by_email("nobody@example.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_swap_bumps_version_once() {
        let db = test_db().await;
        let lead = make_lead("a@example.org");
        db.insert_lead(&lead).await.unwrap();

        let now = Utc::now();
        let mut update = lead.clone();
        update.escalated_at = Some(now);
        let stored = db.compare_and_swap(&update).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);

        // Same base version again loses.
        let mut racing = lead.clone();
        racing.sequence_step = 3;
        assert!(db.compare_and_swap(&racing).await.unwrap().is_none());

        let fetched = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.sequence_step, 0);
        assert!(fetched.escalated_at.is_some());
    }

    #[tokio::test]
    async fn compare_and_swap_missing_lead_is_not_found() {
        let db = test_db().await;
        let err = db.compare_and_swap(&make_lead("x@example.org")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn claim_fields_round_trip() {
        let db = test_db().await;
        let lead = make_lead("c@example.org");
        db.insert_lead(&lead).await.unwrap();

        let mut claimed = lead.clone();
        claimed.claim_token = Some(Uuid::new_v4());
        claimed.claimed_until = Some(Utc::now() + Duration::minutes(5));
        db.compare_and_swap(&claimed).await.unwrap().unwrap();

        let fetched = db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.claim_token, claimed.claim_token);
        assert!(fetched.is_claimed(Utc::now()));
    }

    #[tokio::test]
    async fn open_and_candidate_filters() {
        let db = test_db().await;
        let now = Utc::now();
        let open = make_lead("open@example.org");
        let scheduled = make_lead("sched@example.org").with_status(LeadStatus::Scheduled);
        let closed = make_lead("closed@example.org").with_status(LeadStatus::Closed);
        let mut old = make_lead("old@example.org");
        old.created_at = now - Duration::days(45);

        for l in [&open, &scheduled, &closed, &old] {
            db.insert_lead(l).await.unwrap();
        }

        let open_leads = db.list_open_leads().await.unwrap();
        assert_eq!(open_leads.len(), 2);

        let candidates = db
            .list_sequence_candidates(now - Duration::days(30))
            .await
            .unwrap();
        let ids: Vec<_> = candidates.iter().map(|l| l.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&open.id));
        assert!(ids.contains(&scheduled.id));

        assert_eq!(db.list_leads(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn activity_log() {
        let db = test_db().await;
        let lead = make_lead("act@example.org");
        db.insert_lead(&lead).await.unwrap();

        let t = Utc::now();
        db.record_activity(&LeadActivity::new(lead.id, "escalated", "SLA missed", t))
            .await
            .unwrap();
        db.record_activity(&LeadActivity::new(
            lead.id,
            "status_changed",
            "Unsubscribed via inbound",
            t + Duration::seconds(1),
        ))
        .await
        .unwrap();

        let activity = db.list_activity(lead.id).await.unwrap();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].kind, "escalated");
        assert_eq!(activity[1].detail, "Unsubscribed via inbound");
    }

    #[tokio::test]
    async fn local_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("leads.db");
        let lead = make_lead("file@example.org");
        {
            let db = LibSqlLeadStore::new_local(&path).await.unwrap();
            db.insert_lead(&lead).await.unwrap();
        }
        let db = LibSqlLeadStore::new_local(&path).await.unwrap();
        assert!(db.get_lead(lead.id).await.unwrap().is_some());
    }
}
