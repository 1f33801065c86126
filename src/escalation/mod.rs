//! SLA escalation: finds open leads past their deadline and alerts staff once.

pub mod alert;
pub mod sweeper;

pub use alert::{OverdueLead, escalation_message, needs_escalation, overdue_leads};
pub use sweeper::{EscalationOutcome, EscalationSweeper, SweepReport};
