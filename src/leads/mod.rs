//! Leads: the record, its risk score and its SLA deadline.

pub mod model;
pub mod scoring;
pub mod sla;

pub use model::{Lead, LeadStatus, Program, RiskTier, sort_by_priority};
pub use scoring::{HousingSituation, RiskFactors, RiskSignal};
