//! Escalation sweeper: alerts staff once per missed SLA.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::alert::{OverdueLead, escalation_message, needs_escalation, overdue_leads};
use crate::config::OrchestratorConfig;
use crate::error::LeadError;
use crate::leads::Lead;
use crate::notify::{self, Notifier};
use crate::store::{self, LeadActivity, LeadStore, claim};

/// Result of trying to escalate one lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    Sent,
    NotNeeded,
    Conflict,
}

/// Aggregate result of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub leads_scanned: usize,
    pub escalations_sent: usize,
    pub failures: usize,
    pub conflicts: usize,
    pub deferred: usize,
    pub timed_out: bool,
    pub overdue: Vec<OverdueLead>,
}

pub struct EscalationSweeper {
    store: Arc<dyn LeadStore>,
    alerts: Arc<dyn Notifier>,
    config: OrchestratorConfig,
}

impl EscalationSweeper {
    pub fn new(store: Arc<dyn LeadStore>, alerts: Arc<dyn Notifier>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            alerts,
            config,
        }
    }

    fn claim_ttl(&self) -> Duration {
        Duration::from_std(self.config.claim_ttl).unwrap_or_else(|_| Duration::minutes(5))
    }

    /// Escalate every lead in `leads` that needs it, in the given order.
    pub async fn sweep(&self, leads: &[Lead], now: DateTime<Utc>, deadline: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut escalated = Vec::new();

        for (i, lead) in leads.iter().enumerate() {
            if Instant::now() >= deadline {
                tracing::warn!(remaining = leads.len() - i, "SLA sweep hit its time budget");
                report.timed_out = true;
                report.deferred += leads.len() - i;
                break;
            }
            report.leads_scanned += 1;

            match self.escalate(lead, now).await {
                Ok(EscalationOutcome::Sent) => {
                    report.escalations_sent += 1;
                    escalated.push(lead.id);
                }
                Ok(EscalationOutcome::NotNeeded) => {}
                Ok(EscalationOutcome::Conflict) => report.conflicts += 1,
                Err(e) if e.is_rate_limited() => {
                    tracing::warn!(lead_id = %lead.id, "Alert channel throttled, deferring rest of sweep");
                    report.leads_scanned -= 1;
                    report.deferred += leads.len() - i;
                    break;
                }
                Err(LeadError::ClaimLost { lead_id }) => {
                    tracing::warn!(%lead_id, "Escalation sent but lease was lost before commit");
                    report.escalations_sent += 1;
                    report.conflicts += 1;
                    escalated.push(lead_id);
                }
                Err(e) => {
                    tracing::error!(lead_id = %lead.id, "Escalation failed: {e}");
                    report.failures += 1;
                }
            }
        }

        report.overdue = overdue_leads(leads, now);
        for entry in &mut report.overdue {
            if entry.escalated_at.is_none() && escalated.contains(&entry.id) {
                entry.escalated_at = Some(now);
            }
        }
        report
    }

    /// Alert for one lead if it has missed its SLA, then record `escalated_at`.
    pub async fn escalate(&self, lead: &Lead, now: DateTime<Utc>) -> Result<EscalationOutcome, LeadError> {
        if !needs_escalation(lead, now) {
            return Ok(EscalationOutcome::NotNeeded);
        }
        if lead.is_claimed(now) {
            return Ok(EscalationOutcome::Conflict);
        }

        let db_err = |source| LeadError::Database {
            lead_id: lead.id,
            source,
        };

        let Some(held) = claim::claim(self.store.as_ref(), lead, now, self.claim_ttl())
            .await
            .map_err(db_err)?
        else {
            return Ok(EscalationOutcome::Conflict);
        };

        let alert = escalation_message(&held.lead, now, &self.config.alerts);
        if let Err(source) =
            notify::send_with_timeout(self.alerts.as_ref(), &alert, self.config.dispatch_timeout).await
        {
            if let Err(e) = claim::release(self.store.as_ref(), &held, now).await {
                tracing::warn!(lead_id = %lead.id, "Failed to release claim: {e}");
            }
            return Err(LeadError::Dispatch {
                lead_id: lead.id,
                source,
            });
        }

        let committed = claim::commit(self.store.as_ref(), &held, now, |l| {
            if l.escalated_at.is_none() {
                l.escalated_at = Some(now);
            }
        })
        .await
        .map_err(db_err)?;

        if committed.is_none() {
            return Err(LeadError::ClaimLost { lead_id: lead.id });
        }

        tracing::warn!(
            lead_id = %lead.id,
            tier = %lead.tier(),
            risk_score = lead.risk_score,
            "SLA missed, escalation sent"
        );
        store::record_activity_best_effort(
            self.store.as_ref(),
            LeadActivity::new(lead.id, "escalated", alert.subject.clone(), now),
        )
        .await;

        Ok(EscalationOutcome::Sent)
    }
}
