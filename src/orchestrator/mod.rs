//! Orchestration façade: the operations external triggers call.
//!
//! Each operation is a single pass. Nothing here loops or schedules; the
//! caller decides how often to invoke, and redundant invocations are safe.

pub mod intake;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub use intake::{IntakeOutcome, NewLead};

use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::error::{Error, LeadError};
use crate::escalation::{EscalationSweeper, OverdueLead, SweepReport, overdue_leads};
use crate::leads::{Lead, RiskTier, scoring, sla, sort_by_priority};
use crate::notify::{self, MessageKind, Notifier, OutboundMessage};
use crate::replies::{self, ReplyOutcome, ReplyRequest};
use crate::sequences::{SequenceCatalog, SequenceEngine, SequenceReport, render_welcome};
use crate::store::{self, LeadActivity, LeadStore};

/// Collaborators the orchestrator needs.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Arc<dyn LeadStore>,
    /// Lead-facing messages.
    pub outreach: Arc<dyn Notifier>,
    /// Staff-facing escalations and tasks.
    pub alerts: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Read-only SLA overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardReport {
    pub generated_at: Option<DateTime<Utc>>,
    pub open_leads: usize,
    pub by_tier: BTreeMap<String, usize>,
    pub escalated: usize,
    pub overdue: Vec<OverdueLead>,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
    catalog: Arc<SequenceCatalog>,
    config: OrchestratorConfig,
    sequences: SequenceEngine,
    sweeper: EscalationSweeper,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, catalog: SequenceCatalog, config: OrchestratorConfig) -> Self {
        let catalog = Arc::new(catalog);
        let sequences = SequenceEngine::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.outreach),
            Arc::clone(&deps.alerts),
            Arc::clone(&catalog),
            config.clone(),
        );
        let sweeper = EscalationSweeper::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.alerts),
            config.clone(),
        );
        Self {
            deps,
            catalog,
            config,
            sequences,
            sweeper,
        }
    }

    fn pass_deadline(&self) -> Instant {
        Instant::now() + self.config.pass_timeout
    }

    /// Score, persist and welcome a new inquiry.
    ///
    /// The welcome is best-effort: a failed send is logged and the lead stays
    /// on step 0, so the next sequence pass absorbs it as usual.
    pub async fn intake(&self, new_lead: NewLead) -> Result<IntakeOutcome, Error> {
        new_lead.validate()?;
        let now = self.deps.clock.now();

        let risk_score = scoring::score(new_lead.program, &new_lead.risk);
        let mut lead = Lead::new(
            new_lead.first_name.trim(),
            new_lead.email.trim(),
            new_lead.program,
            risk_score,
            now,
        );
        lead.last_name = new_lead.last_name.filter(|s| !s.trim().is_empty());
        lead.phone = new_lead.phone.filter(|s| !s.trim().is_empty());
        if let Some(source) = new_lead.source.filter(|s| !s.trim().is_empty()) {
            lead.source = source;
        }

        self.deps.store.insert_lead(&lead).await?;
        let tier = lead.tier();
        tracing::info!(
            lead_id = %lead.id,
            program = %lead.program,
            risk_score,
            tier = %tier,
            deadline = %lead.sla_deadline,
            "Lead received"
        );
        store::record_activity_best_effort(
            self.deps.store.as_ref(),
            LeadActivity::new(
                lead.id,
                "created",
                format!("{tier} priority, respond within {}", sla::response_requirement(tier)),
                now,
            ),
        )
        .await;

        let welcome_sent = self.send_welcome(&lead, now).await;

        Ok(IntakeOutcome {
            lead,
            tier,
            response_requirement: sla::response_requirement(tier).to_string(),
            welcome_sent,
        })
    }

    async fn send_welcome(&self, lead: &Lead, now: DateTime<Utc>) -> bool {
        let welcome = match render_welcome(lead, &self.catalog) {
            Ok(Some(welcome)) => welcome,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(lead_id = %lead.id, "Welcome not rendered: {e}");
                return false;
            }
        };
        let message = OutboundMessage::new(
            MessageKind::Welcome,
            lead.id,
            lead.email.clone(),
            welcome.subject,
            welcome.body,
        );
        match notify::send_with_timeout(
            self.deps.outreach.as_ref(),
            &message,
            self.config.dispatch_timeout,
        )
        .await
        {
            Ok(()) => {
                store::record_activity_best_effort(
                    self.deps.store.as_ref(),
                    LeadActivity::new(lead.id, "welcome_sent", message.subject, now),
                )
                .await;
                true
            }
            Err(e) => {
                let e = LeadError::Dispatch {
                    lead_id: lead.id,
                    source: e,
                };
                tracing::error!("Welcome not sent: {e}");
                false
            }
        }
    }

    /// Step every recent, non-terminal lead through its sequence.
    pub async fn run_sequences(&self) -> Result<SequenceReport, Error> {
        let now = self.deps.clock.now();
        let deadline = self.pass_deadline();
        let window = chrono::Duration::from_std(self.config.sequence_window)
            .unwrap_or_else(|_| chrono::Duration::days(30));

        let mut leads = self
            .deps
            .store
            .list_sequence_candidates(now - window)
            .await?;
        sort_by_priority(&mut leads);

        let report = self.sequences.run(&leads, now, deadline).await;
        tracing::info!(
            scanned = report.leads_scanned,
            sent = report.messages_sent,
            side_actions = report.side_actions_triggered,
            failures = report.failures,
            deferred = report.deferred,
            "Sequence pass complete"
        );
        Ok(report)
    }

    /// Escalate every open lead that has missed its SLA.
    pub async fn run_sla_sweep(&self) -> Result<SweepReport, Error> {
        let now = self.deps.clock.now();
        let deadline = self.pass_deadline();

        let mut leads = self.deps.store.list_open_leads().await?;
        sort_by_priority(&mut leads);

        let report = self.sweeper.sweep(&leads, now, deadline).await;
        tracing::info!(
            scanned = report.leads_scanned,
            escalations = report.escalations_sent,
            overdue = report.overdue.len(),
            failures = report.failures,
            "SLA sweep complete"
        );
        Ok(report)
    }

    /// Apply an inbound reply.
    pub async fn handle_reply(&self, request: ReplyRequest) -> Result<ReplyOutcome, Error> {
        request.validate()?;
        let now = self.deps.clock.now();
        Ok(replies::handle_reply(self.deps.store.as_ref(), &request, now).await?)
    }

    /// Counts of open leads by tier plus the overdue list. Sends nothing.
    pub async fn sla_dashboard(&self) -> Result<DashboardReport, Error> {
        let now = self.deps.clock.now();
        let leads = self.deps.store.list_open_leads().await?;

        let mut by_tier: BTreeMap<String, usize> = [
            RiskTier::Critical,
            RiskTier::High,
            RiskTier::Moderate,
            RiskTier::Early,
        ]
        .iter()
        .map(|t| (t.label().to_lowercase(), 0))
        .collect();
        for lead in &leads {
            *by_tier.entry(lead.tier().label().to_lowercase()).or_default() += 1;
        }

        Ok(DashboardReport {
            generated_at: Some(now),
            open_leads: leads.len(),
            by_tier,
            escalated: leads.iter().filter(|l| l.escalated_at.is_some()).count(),
            overdue: overdue_leads(&leads, now),
        })
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.deps.store
    }
}
