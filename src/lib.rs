//! Lead Response Orchestrator: risk scoring, SLA tracking, escalation and
//! nurture sequences for housing-program inquiries.

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod escalation;
pub mod leads;
pub mod notify;
pub mod orchestrator;
pub mod replies;
pub mod sequences;
pub mod store;

pub use error::{Error, Result};
