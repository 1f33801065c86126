//! Per-program nurture sequences.
//!
//! A catalog is immutable configuration: an ordered list of steps per
//! program, each with an offset from the previous send, subject and body
//! templates, and an optional staff side action. Step 0 is the welcome
//! message sent at intake.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::template;
use crate::error::ConfigError;
use crate::leads::Program;

/// Staff follow-up attached to a sequence step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideAction {
    CallReminder,
    DocumentRequest,
    AppointmentBooking,
}

impl SideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideAction::CallReminder => "call_reminder",
            SideAction::DocumentRequest => "document_request",
            SideAction::AppointmentBooking => "appointment_booking",
        }
    }

    /// One-line instruction for the staff task.
    pub fn instruction(&self) -> &'static str {
        match self {
            SideAction::CallReminder => "Call the lead to follow up on their inquiry",
            SideAction::DocumentRequest => "Confirm the lead has gathered their intake documents",
            SideAction::AppointmentBooking => "Offer the lead a tour or intake appointment",
        }
    }
}

/// One entry of a program's sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStep {
    /// Minutes after the previous send (or intake) before this step is due.
    pub offset_minutes: i64,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<SideAction>,
}

impl SequenceStep {
    pub fn new(days: i64, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            offset_minutes: days * 24 * 60,
            subject: subject.into(),
            body: body.into(),
            action: None,
        }
    }

    /// Builder: attach a side action.
    pub fn with_action(mut self, action: SideAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn offset(&self) -> Duration {
        Duration::minutes(self.offset_minutes)
    }
}

/// Sequences for every program.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SequenceCatalog {
    #[serde(default)]
    pub veterans: Vec<SequenceStep>,
    #[serde(default)]
    pub recovery: Vec<SequenceStep>,
    #[serde(default)]
    pub reentry: Vec<SequenceStep>,
}

impl SequenceCatalog {
    /// Steps for a program. Empty means the program has no sequence configured.
    pub fn steps(&self, program: Program) -> &[SequenceStep] {
        match program {
            Program::Veterans => &self.veterans,
            Program::Recovery => &self.recovery,
            Program::Reentry => &self.reentry,
        }
    }

    pub fn step(&self, program: Program, index: u32) -> Option<&SequenceStep> {
        self.steps(program).get(index as usize)
    }

    /// Load a catalog from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let catalog: SequenceCatalog = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::ParseError(format!("sequence catalog {}: {e}", path.display()))
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Offsets must be non-negative and templates may only use known
    /// placeholders. Offsets count from the previous send, so a later step
    /// may wait less than an earlier one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for program in Program::ALL {
            for (i, step) in self.steps(program).iter().enumerate() {
                let key = format!("{program}[{i}]");
                if step.offset_minutes < 0 {
                    return Err(ConfigError::InvalidValue {
                        key,
                        message: "offset must not be negative".into(),
                    });
                }
                for text in [&step.subject, &step.body] {
                    template::validate(text).map_err(|e| ConfigError::InvalidValue {
                        key: key.clone(),
                        message: e.to_string(),
                    })?;
                }
            }
        }
        Ok(())
    }

    /// The catalog the service ships with.
    pub fn builtin() -> Self {
        Self {
            veterans: vec![
                SequenceStep::new(
                    0,
                    "Your Veterans Benefits Guide + Housing Checklist",
                    "Hi {firstName},\n\n\
                     Thank you for reaching out about {program}. Your benefits guide and \
                     housing checklist are attached. A member of our veterans team will \
                     contact you shortly.\n\n\
                     Forward Horizon Veterans Team",
                ),
                SequenceStep::new(
                    1,
                    "Your Next Steps: Veterans Housing Application Process",
                    "Hi {firstName},\n\n\
                     Let's take the next concrete step toward securing your transitional \
                     housing. Your action items for today:\n\
                     - Gather your DD214 and service records\n\
                     - Complete our pre-screening questionnaire (2 minutes)\n\
                     - Schedule your housing consultation call\n\n\
                     Forward Horizon Veterans Team",
                )
                .with_action(SideAction::DocumentRequest),
                SequenceStep::new(
                    2,
                    "Haven't heard from you - Veterans housing still available",
                    "Hi {firstName},\n\n\
                     We still have housing units available specifically for veterans and \
                     I want to make sure you don't miss out. What's the biggest challenge \
                     keeping you from moving forward right now? Reply to this email and \
                     I'll help remove it.\n\n\
                     Forward Horizon Veterans Team",
                )
                .with_action(SideAction::CallReminder),
                SequenceStep::new(
                    4,
                    "Final notice: Your veterans housing reservation expires soon",
                    "Hi {firstName},\n\n\
                     This is our final outreach about your veterans housing inquiry. \
                     Reply YES or call us to secure your unit before it is offered to the \
                     next veteran on our waiting list.\n\n\
                     Thank you for your service,\n\
                     Forward Horizon Veterans Team",
                ),
            ],
            recovery: vec![
                SequenceStep::new(
                    0,
                    "Your Recovery Housing Preparation Guide",
                    "Hi {firstName},\n\n\
                     Thank you for reaching out about {program}. Your preparation guide is \
                     attached and our recovery team will contact you shortly.\n\n\
                     Forward Horizon Recovery Team",
                ),
                SequenceStep::new(
                    1,
                    "Day 2 of Recovery: Your House Rules and What to Expect",
                    "Hi {firstName},\n\n\
                     Here is what daily life looks like in our recovery homes. What's your \
                     biggest concern about living in a recovery house? Reply to this email \
                     and I'll address it personally, or reply BOOK to schedule a tour.\n\n\
                     Forward Horizon Recovery Team",
                )
                .with_action(SideAction::AppointmentBooking),
                SequenceStep::new(
                    3,
                    "Your recovery support network is waiting",
                    "Hi {firstName},\n\n\
                     Recovery is easier with people who understand. Our residents and house \
                     managers are ready to welcome you. Reply YES and we'll call you today.\n\n\
                     Forward Horizon Recovery Team",
                )
                .with_action(SideAction::CallReminder),
            ],
            reentry: vec![
                SequenceStep::new(
                    0,
                    "Your Life After Release Planning Kit",
                    "Hi {firstName},\n\n\
                     Thank you for reaching out about {program}. Your planning kit is \
                     attached and our re-entry team will contact you shortly.\n\n\
                     Forward Horizon Re-entry Team",
                ),
                SequenceStep::new(
                    2,
                    "Week 1 Action Plan: Documents and Foundation Building",
                    "Hi {firstName},\n\n\
                     This week, focus on your ID, social security card and release \
                     paperwork. Reply BOOK to schedule an intake appointment and we'll \
                     walk through the rest together.\n\n\
                     Forward Horizon Re-entry Team",
                )
                .with_action(SideAction::AppointmentBooking),
                SequenceStep::new(
                    3,
                    "Employment opportunities for second-chance hiring",
                    "Hi {firstName},\n\n\
                     We partner with local employers who hire people with records. Reply \
                     YES and we'll share current openings when we talk.\n\n\
                     Forward Horizon Re-entry Team",
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = SequenceCatalog::builtin();
        catalog.validate().unwrap();
        for program in Program::ALL {
            let steps = catalog.steps(program);
            assert!(!steps.is_empty());
            assert_eq!(steps[0].offset_minutes, 0);
        }
    }

    #[test]
    fn builtin_offsets_match_day_schedule() {
        let catalog = SequenceCatalog::builtin();
        // Offsets are relative to the previous send, so cumulative days are 0/1/3/7.
        let cumulative: Vec<i64> = catalog
            .steps(Program::Veterans)
            .iter()
            .scan(0, |acc, s| {
                *acc += s.offset_minutes;
                Some(*acc / (24 * 60))
            })
            .collect();
        assert_eq!(cumulative, vec![0, 1, 3, 7]);
        assert_eq!(
            catalog.step(Program::Veterans, 1).unwrap().action,
            Some(SideAction::DocumentRequest)
        );
        assert!(catalog.step(Program::Recovery, 3).is_none());
    }

    #[test]
    fn load_accepts_partial_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"recovery":[{{"offsetMinutes":0,"subject":"Hi {{firstName}}","body":"Welcome"}},
                {{"offsetMinutes":60,"subject":"Check-in","body":"Hello","action":"call_reminder"}}]}}"#
        )
        .unwrap();

        let catalog = SequenceCatalog::load(file.path()).unwrap();
        assert!(catalog.steps(Program::Veterans).is_empty());
        assert_eq!(catalog.steps(Program::Recovery).len(), 2);
        assert_eq!(
            catalog.steps(Program::Recovery)[1].action,
            Some(SideAction::CallReminder)
        );
    }

    #[test]
    fn load_rejects_unknown_placeholder() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"reentry":[{{"offsetMinutes":0,"subject":"Hi {{nick}}","body":"x"}}]}}"#
        )
        .unwrap();

        let err = SequenceCatalog::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn load_rejects_negative_offset() {
        let catalog = SequenceCatalog {
            veterans: vec![SequenceStep {
                offset_minutes: -5,
                subject: "s".into(),
                body: "b".into(),
                action: None,
            }],
            ..Default::default()
        };
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn validate_accepts_shorter_later_offsets() {
        let catalog = SequenceCatalog {
            reentry: vec![
                SequenceStep::new(0, "a", "b"),
                SequenceStep::new(3, "c", "d"),
                SequenceStep::new(1, "e", "f"),
            ],
            ..Default::default()
        };
        assert!(catalog.validate().is_ok());
        assert!(SequenceCatalog::builtin().validate().is_ok());
    }
}
