//! Persistence layer: the `LeadStore` trait and its backends.

pub mod claim;
pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlLeadStore;
pub use memory::InMemoryLeadStore;
pub use traits::{LeadActivity, LeadStore};

use crate::error::DatabaseError;
use crate::leads::Lead;

/// Compare-and-swap attempts before giving up on a contended lead.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Apply `apply` to the latest copy of a lead and write it back.
///
/// On a version conflict the lead is re-read and `apply` runs again on the
/// fresh copy. `apply` returns `false` to abandon the write (for example
/// when the fresh copy no longer satisfies a precondition), in which case
/// `Ok(None)` is returned. `Ok(None)` is also returned if every attempt
/// conflicted or the lead disappeared.
pub async fn update_with_retry<F>(
    store: &dyn LeadStore,
    lead: &Lead,
    mut apply: F,
) -> Result<Option<Lead>, DatabaseError>
where
    F: FnMut(&mut Lead) -> bool + Send,
{
    let mut current = lead.clone();
    for attempt in 0..MAX_CAS_ATTEMPTS {
        let mut next = current.clone();
        if !apply(&mut next) {
            return Ok(None);
        }
        if let Some(stored) = store.compare_and_swap(&next).await? {
            return Ok(Some(stored));
        }
        tracing::debug!(lead_id = %lead.id, attempt, "Version conflict, reloading lead");
        match store.get_lead(lead.id).await? {
            Some(fresh) => current = fresh,
            None => return Ok(None),
        }
    }
    tracing::warn!(lead_id = %lead.id, "Gave up after repeated version conflicts");
    Ok(None)
}

/// Record an activity entry, logging instead of failing.
pub async fn record_activity_best_effort(store: &dyn LeadStore, activity: LeadActivity) {
    if let Err(e) = store.record_activity(&activity).await {
        tracing::warn!(lead_id = %activity.lead_id, kind = %activity.kind, "Failed to record activity: {e}");
    }
}
