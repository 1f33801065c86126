//! Nurture sequences: per-program catalogs, placeholder templates and the
//! engine that steps leads through them.

pub mod catalog;
pub mod engine;
pub mod template;

pub use catalog::{SequenceCatalog, SequenceStep, SideAction};
pub use engine::{
    RenderedMessage, SequenceEngine, SequenceReport, StepDecision, StepOutcome, advance_if_due,
    render_welcome,
};
