//! In-memory `LeadStore` for development and testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::traits::{LeadActivity, LeadStore};
use crate::error::DatabaseError;
use crate::leads::model::{normalize_email, phone_digits};
use crate::leads::Lead;

#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: RwLock<HashMap<Uuid, Lead>>,
    activity: RwLock<Vec<LeadActivity>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_leads(&self) -> Result<Vec<Lead>, DatabaseError> {
        let leads = self
            .leads
            .read()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(leads.values().cloned().collect())
    }
}

fn newest_first(mut leads: Vec<Lead>) -> Vec<Lead> {
    leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    leads
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
        let mut leads = self
            .leads
            .write()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        if leads.contains_key(&lead.id) {
            return Err(DatabaseError::Constraint(format!(
                "lead {} already exists",
                lead.id
            )));
        }
        leads.insert(lead.id, lead.clone());
        Ok(())
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let leads = self
            .leads
            .read()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(leads.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>, DatabaseError> {
        let wanted = normalize_email(email);
        Ok(newest_first(self.read_leads()?)
            .into_iter()
            .find(|l| normalize_email(&l.email) == wanted))
    }

    async fn find_by_phone(&self, digits: &str) -> Result<Option<Lead>, DatabaseError> {
        if digits.is_empty() {
            return Ok(None);
        }
        Ok(newest_first(self.read_leads()?).into_iter().find(|l| {
            l.phone
                .as_deref()
                .is_some_and(|p| phone_digits(p) == digits)
        }))
    }

    async fn list_open_leads(&self) -> Result<Vec<Lead>, DatabaseError> {
        Ok(self
            .read_leads()?
            .into_iter()
            .filter(|l| l.status.is_escalatable())
            .collect())
    }

    async fn list_sequence_candidates(
        &self,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<Lead>, DatabaseError> {
        Ok(self
            .read_leads()?
            .into_iter()
            .filter(|l| !l.status.is_terminal() && l.created_at >= created_after)
            .collect())
    }

    async fn list_leads(&self, limit: usize) -> Result<Vec<Lead>, DatabaseError> {
        let mut leads = newest_first(self.read_leads()?);
        leads.truncate(limit);
        Ok(leads)
    }

    async fn compare_and_swap(&self, lead: &Lead) -> Result<Option<Lead>, DatabaseError> {
        let mut leads = self
            .leads
            .write()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        let Some(stored) = leads.get_mut(&lead.id) else {
            return Err(DatabaseError::NotFound {
                entity: "lead".into(),
                id: lead.id.to_string(),
            });
        };
        if stored.version != lead.version {
            return Ok(None);
        }
        let mut next = lead.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(Some(next))
    }

    async fn record_activity(&self, activity: &LeadActivity) -> Result<(), DatabaseError> {
        self.activity
            .write()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?
            .push(activity.clone());
        Ok(())
    }

    async fn list_activity(&self, lead_id: Uuid) -> Result<Vec<LeadActivity>, DatabaseError> {
        let activity = self
            .activity
            .read()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(activity
            .iter()
            .filter(|a| a.lead_id == lead_id)
            .cloned()
            .collect())
    }
}
