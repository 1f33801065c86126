//! Dispatch leases on leads.
//!
//! A worker that is about to send for a lead first writes a claim through
//! compare-and-swap. Only the CAS winner sends. After the send it commits
//! its mutation and clears the claim in one write; after a failed send it
//! releases the claim. A claim left behind by a crash expires on its own.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{LeadStore, update_with_retry};
use crate::error::DatabaseError;
use crate::leads::Lead;

/// A lead this worker holds the dispatch lease for.
#[derive(Debug, Clone)]
pub struct Claim {
    pub lead: Lead,
    pub token: Uuid,
}

/// Try to take the dispatch lease. `Ok(None)` means another worker won.
pub async fn claim(
    store: &dyn LeadStore,
    lead: &Lead,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Option<Claim>, DatabaseError> {
    if lead.is_claimed(now) {
        return Ok(None);
    }
    let token = Uuid::new_v4();
    let mut next = lead.clone();
    next.claim_token = Some(token);
    next.claimed_until = Some(now + ttl);
    next.updated_at = now;
    Ok(store
        .compare_and_swap(&next)
        .await?
        .map(|lead| Claim { lead, token }))
}

/// Apply the post-send mutation and drop the lease.
///
/// Unrelated writes that landed after the claim (a reply changing status,
/// say) are picked up and kept. Version conflicts are retried for as long
/// as the stored lead still carries this claim's token, since the message
/// has already gone out. Returns `Ok(None)` only if the lease was lost.
pub async fn commit<F>(
    store: &dyn LeadStore,
    claim: &Claim,
    now: DateTime<Utc>,
    mut apply: F,
) -> Result<Option<Lead>, DatabaseError>
where
    F: FnMut(&mut Lead) + Send,
{
    let token = claim.token;
    let mut current = claim.lead.clone();
    let mut attempt = 0usize;
    loop {
        if current.claim_token != Some(token) {
            return Ok(None);
        }
        let mut next = current.clone();
        apply(&mut next);
        next.claim_token = None;
        next.claimed_until = None;
        next.updated_at = now;
        if let Some(stored) = store.compare_and_swap(&next).await? {
            return Ok(Some(stored));
        }

        attempt += 1;
        tracing::debug!(lead_id = %current.id, attempt, "Commit conflicted, lease still held");
        match store.get_lead(current.id).await? {
            Some(fresh) => current = fresh,
            None => return Ok(None),
        }
    }
}

/// Drop the lease without changing anything else.
pub async fn release(
    store: &dyn LeadStore,
    claim: &Claim,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let token = claim.token;
    update_with_retry(store, &claim.lead, |lead| {
        if lead.claim_token != Some(token) {
            return false;
        }
        lead.claim_token = None;
        lead.claimed_until = None;
        lead.updated_at = now;
        true
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::{LeadStatus, Program};
    use crate::store::InMemoryLeadStore;

    async fn seeded() -> (InMemoryLeadStore, Lead) {
        let store = InMemoryLeadStore::new();
        let lead = Lead::new("A", "a@x.org", Program::Veterans, 90, Utc::now());
        store.insert_lead(&lead).await.unwrap();
        (store, lead)
    }

    #[tokio::test]
    async fn only_one_claim_wins() {
        let (store, lead) = seeded().await;
        let now = Utc::now();
        let ttl = Duration::minutes(5);

        let first = claim(&store, &lead, now, ttl).await.unwrap();
        let second = claim(&store, &lead, now, ttl).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        // A fresh read also sees the live claim.
        let fresh = store.get_lead(lead.id).await.unwrap().unwrap();
        assert!(claim(&store, &fresh, now, ttl).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_claim_can_be_retaken() {
        let (store, lead) = seeded().await;
        let now = Utc::now();
        claim(&store, &lead, now, Duration::minutes(5)).await.unwrap().unwrap();

        let later = now + Duration::minutes(6);
        let fresh = store.get_lead(lead.id).await.unwrap().unwrap();
        assert!(claim(&store, &fresh, later, Duration::minutes(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn commit_keeps_concurrent_status_change() {
        let (store, lead) = seeded().await;
        let now = Utc::now();
        let held = claim(&store, &lead, now, Duration::minutes(5)).await.unwrap().unwrap();

        // A reply lands while the send is in flight.
        let mut replied = store.get_lead(lead.id).await.unwrap().unwrap();
        replied.status = LeadStatus::Contacted;
        store.compare_and_swap(&replied).await.unwrap().unwrap();

        let stored = commit(&store, &held, now, |l| l.escalated_at = Some(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, LeadStatus::Contacted);
        assert_eq!(stored.escalated_at, Some(now));
        assert!(stored.claim_token.is_none());
    }

    #[tokio::test]
    async fn commit_fails_when_lease_was_taken_over() {
        let (store, lead) = seeded().await;
        let now = Utc::now();
        let held = claim(&store, &lead, now, Duration::minutes(1)).await.unwrap().unwrap();

        let later = now + Duration::minutes(2);
        let fresh = store.get_lead(lead.id).await.unwrap().unwrap();
        claim(&store, &fresh, later, Duration::minutes(1)).await.unwrap().unwrap();

        let result = commit(&store, &held, later, |l| l.sequence_step += 1).await.unwrap();
        assert!(result.is_none());
        assert_eq!(store.get_lead(lead.id).await.unwrap().unwrap().sequence_step, 0);
    }

    #[tokio::test]
    async fn release_clears_claim() {
        let (store, lead) = seeded().await;
        let now = Utc::now();
        let held = claim(&store, &lead, now, Duration::minutes(5)).await.unwrap().unwrap();
        release(&store, &held, now).await.unwrap();

        let fresh = store.get_lead(lead.id).await.unwrap().unwrap();
        assert!(!fresh.is_claimed(now));
        assert_eq!(fresh.sequence_step, 0);
    }

    /// Lets another writer touch the lead before each of the next
    /// `remaining` compare-and-swaps, so they all conflict.
    struct ContendedStore {
        inner: InMemoryLeadStore,
        remaining: std::sync::Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl LeadStore for ContendedStore {
        async fn insert_lead(&self, lead: &Lead) -> Result<(), DatabaseError> {
            self.inner.insert_lead(lead).await
        }
        async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
            self.inner.get_lead(id).await
        }
        async fn find_by_email(&self, email: &str) -> Result<Option<Lead>, DatabaseError> {
            self.inner.find_by_email(email).await
        }
        async fn find_by_phone(&self, digits: &str) -> Result<Option<Lead>, DatabaseError> {
            self.inner.find_by_phone(digits).await
        }
        async fn list_open_leads(&self) -> Result<Vec<Lead>, DatabaseError> {
            self.inner.list_open_leads().await
        }
        async fn list_sequence_candidates(
            &self,
            created_after: DateTime<Utc>,
        ) -> Result<Vec<Lead>, DatabaseError> {
            self.inner.list_sequence_candidates(created_after).await
        }
        async fn list_leads(&self, limit: usize) -> Result<Vec<Lead>, DatabaseError> {
            self.inner.list_leads(limit).await
        }
        async fn compare_and_swap(&self, lead: &Lead) -> Result<Option<Lead>, DatabaseError> {
            let interfere = {
                let mut remaining = self.remaining.lock().unwrap();
                let interfere = *remaining > 0;
                if interfere {
                    *remaining -= 1;
                }
                interfere
            };
            if interfere {
                let mut other = self.inner.get_lead(lead.id).await?.unwrap();
                other.updated_at += Duration::seconds(1);
                self.inner.compare_and_swap(&other).await?.unwrap();
            }
            self.inner.compare_and_swap(lead).await
        }
        async fn record_activity(&self, activity: &crate::store::LeadActivity) -> Result<(), DatabaseError> {
            self.inner.record_activity(activity).await
        }
        async fn list_activity(
            &self,
            lead_id: Uuid,
        ) -> Result<Vec<crate::store::LeadActivity>, DatabaseError> {
            self.inner.list_activity(lead_id).await
        }
    }

    #[tokio::test]
    async fn commit_outlasts_heavy_contention_while_lease_held() {
        let store = ContendedStore {
            inner: InMemoryLeadStore::new(),
            remaining: std::sync::Mutex::new(0),
        };
        let lead = Lead::new("A", "a@x.org", Program::Recovery, 20, Utc::now());
        store.insert_lead(&lead).await.unwrap();
        let now = Utc::now();
        let held = claim(&store, &lead, now, Duration::minutes(5)).await.unwrap().unwrap();

        *store.remaining.lock().unwrap() = 8;
        let stored = commit(&store, &held, now, |l| l.sequence_step += 1)
            .await
            .unwrap()
            .expect("lease was never lost");
        assert_eq!(stored.sequence_step, 1);
        assert!(stored.claim_token.is_none());

        let fresh = store.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(fresh.sequence_step, 1);
        assert!(!fresh.is_claimed(now));
    }
}
