//! Sequence engine: moves each lead at most one step through its program's
//! nurture sequence per pass.
//!
//! [`advance_if_due`] is the pure decision. [`SequenceEngine`] carries it out
//! against the store and notifiers using the claim protocol, so state only
//! changes after a message was actually accepted by the transport.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::catalog::{SequenceCatalog, SideAction};
use super::template;
use crate::config::{AlertConfig, OrchestratorConfig};
use crate::error::LeadError;
use crate::leads::Lead;
use crate::notify::{self, MessageKind, Notifier, OutboundMessage};
use crate::store::{self, LeadActivity, LeadStore, claim};

/// Subject and body after placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// What the engine should do with a lead right now.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDecision {
    /// No catalog entry at the current step, or the lead is terminal.
    Completed,
    /// The current step is not due yet.
    NotDue { due_at: DateTime<Utc> },
    /// Offset-zero step already sent at intake; advance without sending.
    Absorb { next_step: u32 },
    /// Send this step's message, then advance.
    Send {
        step_index: u32,
        message: RenderedMessage,
        side_action: Option<SideAction>,
        next_step: u32,
    },
}

/// Decide the next move for `lead`. Pure.
///
/// The current step is due once its offset has elapsed since the last send,
/// or since creation if nothing has been sent yet.
pub fn advance_if_due(
    lead: &Lead,
    catalog: &SequenceCatalog,
    now: DateTime<Utc>,
) -> Result<StepDecision, LeadError> {
    if lead.status.is_terminal() {
        return Ok(StepDecision::Completed);
    }

    let steps = catalog.steps(lead.program);
    if steps.is_empty() {
        return Err(LeadError::MissingCatalog {
            program: lead.program,
        });
    }

    let Some(entry) = steps.get(lead.sequence_step as usize) else {
        return Ok(StepDecision::Completed);
    };
    let next_step = lead.sequence_step + 1;

    if entry.offset_minutes == 0 {
        return Ok(StepDecision::Absorb { next_step });
    }

    let reference = lead.last_message_sent_at.unwrap_or(lead.created_at);
    let due_at = reference + entry.offset();
    if now < due_at {
        return Ok(StepDecision::NotDue { due_at });
    }

    let render = |text: &str| {
        template::render(text, lead).map_err(|source| LeadError::Render {
            lead_id: lead.id,
            source,
        })
    };

    Ok(StepDecision::Send {
        step_index: lead.sequence_step,
        message: RenderedMessage {
            subject: render(&entry.subject)?,
            body: render(&entry.body)?,
        },
        side_action: entry.action,
        next_step,
    })
}

/// Render the intake welcome (catalog step 0) for a lead, if the program has one.
pub fn render_welcome(
    lead: &Lead,
    catalog: &SequenceCatalog,
) -> Result<Option<RenderedMessage>, LeadError> {
    let Some(entry) = catalog.step(lead.program, 0) else {
        return Ok(None);
    };
    if entry.offset_minutes != 0 {
        return Ok(None);
    }
    let render = |text: &str| {
        template::render(text, lead).map_err(|source| LeadError::Render {
            lead_id: lead.id,
            source,
        })
    };
    Ok(Some(RenderedMessage {
        subject: render(&entry.subject)?,
        body: render(&entry.body)?,
    }))
}

/// Staff follow-up message for a sequence side action.
pub fn staff_task_message(lead: &Lead, action: SideAction, alerts: &AlertConfig) -> OutboundMessage {
    let mut body = format!(
        "{instruction}.\n\n\
         Lead: {name}\n\
         Program: {program}\n\
         Risk: {tier} ({score}/100)\n\
         Email: {email}\n\
         Phone: {phone}\n\
         Sequence step: {step}\n",
        instruction = action.instruction(),
        name = lead.full_name(),
        program = lead.program.display_name(),
        tier = lead.tier(),
        score = lead.risk_score,
        email = lead.email,
        phone = lead.phone.as_deref().unwrap_or("not provided"),
        step = lead.sequence_step,
    );
    if let Some(url) = &alerts.dashboard_url {
        body.push_str(&format!("\nOpen lead: {}/leads/{}\n", url.trim_end_matches('/'), lead.id));
    }

    OutboundMessage::new(
        MessageKind::StaffTask,
        lead.id,
        String::new(),
        format!("Task: {} - {}", action.as_str().replace('_', " "), lead.full_name()),
        body,
    )
    .with_recipients(alerts.staff_recipients().to_vec())
}

/// Result of processing one lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    NotDue,
    Absorbed,
    Sent { side_action_triggered: bool },
    /// Another worker holds or won the lead.
    Conflict,
}

/// Aggregate result of a sequence pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceReport {
    pub leads_scanned: usize,
    pub messages_sent: usize,
    pub side_actions_triggered: usize,
    pub steps_absorbed: usize,
    pub failures: usize,
    pub configuration_errors: usize,
    pub conflicts: usize,
    /// Leads left for the next pass because the channel throttled us.
    pub deferred: usize,
    pub timed_out: bool,
}

/// Executes sequence steps against the store and notifiers.
pub struct SequenceEngine {
    store: Arc<dyn LeadStore>,
    outreach: Arc<dyn Notifier>,
    alerts: Arc<dyn Notifier>,
    catalog: Arc<SequenceCatalog>,
    config: OrchestratorConfig,
}

impl SequenceEngine {
    pub fn new(
        store: Arc<dyn LeadStore>,
        outreach: Arc<dyn Notifier>,
        alerts: Arc<dyn Notifier>,
        catalog: Arc<SequenceCatalog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            outreach,
            alerts,
            catalog,
            config,
        }
    }

    fn claim_ttl(&self) -> Duration {
        Duration::from_std(self.config.claim_ttl).unwrap_or_else(|_| Duration::minutes(5))
    }

    /// Process leads in the given order until done, throttled, or out of time.
    pub async fn run(&self, leads: &[Lead], now: DateTime<Utc>, deadline: Instant) -> SequenceReport {
        let mut report = SequenceReport::default();

        for (i, lead) in leads.iter().enumerate() {
            if Instant::now() >= deadline {
                tracing::warn!(remaining = leads.len() - i, "Sequence pass hit its time budget");
                report.timed_out = true;
                report.deferred += leads.len() - i;
                break;
            }
            report.leads_scanned += 1;

            match self.process(lead, now).await {
                Ok(StepOutcome::Sent {
                    side_action_triggered,
                }) => {
                    report.messages_sent += 1;
                    if side_action_triggered {
                        report.side_actions_triggered += 1;
                    }
                }
                Ok(StepOutcome::Absorbed) => report.steps_absorbed += 1,
                Ok(StepOutcome::Conflict) => report.conflicts += 1,
                Ok(StepOutcome::Completed | StepOutcome::NotDue) => {}
                Err(e) if e.is_rate_limited() => {
                    tracing::warn!(lead_id = %lead.id, "Outreach channel throttled, deferring rest of pass");
                    report.deferred += leads.len() - i;
                    report.leads_scanned -= 1;
                    break;
                }
                Err(e @ LeadError::MissingCatalog { .. }) => {
                    tracing::error!(lead_id = %lead.id, program = %lead.program, "Sequence skipped: {e}");
                    report.configuration_errors += 1;
                }
                Err(LeadError::ClaimLost { lead_id }) => {
                    tracing::warn!(%lead_id, "Sequence message sent but lease was lost before commit");
                    report.messages_sent += 1;
                    report.conflicts += 1;
                }
                Err(e) => {
                    tracing::error!(lead_id = %lead.id, "Sequence step failed: {e}");
                    report.failures += 1;
                }
            }
        }

        report
    }

    /// Decide and, if needed, carry out one step for `lead`.
    pub async fn process(&self, lead: &Lead, now: DateTime<Utc>) -> Result<StepOutcome, LeadError> {
        if lead.is_claimed(now) {
            return Ok(StepOutcome::Conflict);
        }

        match advance_if_due(lead, &self.catalog, now)? {
            StepDecision::Completed => Ok(StepOutcome::Completed),
            StepDecision::NotDue { .. } => Ok(StepOutcome::NotDue),
            StepDecision::Absorb { next_step } => {
                let mut next = lead.clone();
                next.sequence_step = next.sequence_step.max(next_step);
                next.updated_at = now;
                match self.store.compare_and_swap(&next).await {
                    Ok(Some(_)) => {
                        tracing::debug!(lead_id = %lead.id, step = next_step, "Welcome step absorbed");
                        Ok(StepOutcome::Absorbed)
                    }
                    Ok(None) => Ok(StepOutcome::Conflict),
                    Err(source) => Err(LeadError::Database {
                        lead_id: lead.id,
                        source,
                    }),
                }
            }
            StepDecision::Send {
                step_index,
                message,
                side_action,
                next_step,
            } => {
                self.send_step(lead, now, step_index, message, side_action, next_step)
                    .await
            }
        }
    }

    async fn send_step(
        &self,
        lead: &Lead,
        now: DateTime<Utc>,
        step_index: u32,
        message: RenderedMessage,
        side_action: Option<SideAction>,
        next_step: u32,
    ) -> Result<StepOutcome, LeadError> {
        let db_err = |source| LeadError::Database {
            lead_id: lead.id,
            source,
        };

        let Some(held) = claim::claim(self.store.as_ref(), lead, now, self.claim_ttl())
            .await
            .map_err(db_err)?
        else {
            return Ok(StepOutcome::Conflict);
        };

        let outbound = OutboundMessage::new(
            MessageKind::Sequence,
            lead.id,
            lead.email.clone(),
            message.subject,
            message.body,
        );

        if let Err(source) =
            notify::send_with_timeout(self.outreach.as_ref(), &outbound, self.config.dispatch_timeout)
                .await
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
            if l.sequence_step == step_index {
                l.sequence_step = next_step;
                l.last_message_sent_at = Some(now);
            }
        })
        .await
        .map_err(db_err)?;

        let Some(committed) = committed else {
            return Err(LeadError::ClaimLost { lead_id: lead.id });
        };

        tracing::info!(
            lead_id = %lead.id,
            program = %lead.program,
            step = step_index,
            "Sequence message sent"
        );
        store::record_activity_best_effort(
            self.store.as_ref(),
            LeadActivity::new(
                lead.id,
                "sequence_sent",
                format!("Step {step_index}: {}", outbound.subject),
                now,
            ),
        )
        .await;

        let mut side_action_triggered = false;
        if let Some(action) = side_action {
            let task = staff_task_message(&committed, action, &self.config.alerts);
            match notify::send_with_timeout(self.alerts.as_ref(), &task, self.config.dispatch_timeout)
                .await
            {
                Ok(()) => {
                    side_action_triggered = true;
                    tracing::info!(lead_id = %lead.id, action = action.as_str(), "Staff task created");
                    store::record_activity_best_effort(
                        self.store.as_ref(),
                        LeadActivity::new(lead.id, "side_action", action.as_str(), now),
                    )
                    .await;
                }
                Err(e) => {
                    tracing::error!(lead_id = %lead.id, action = action.as_str(), "Staff task failed: {e}");
                }
            }
        }

        Ok(StepOutcome::Sent {
            side_action_triggered,
        })
    }
}
