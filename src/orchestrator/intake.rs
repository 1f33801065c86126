//! Intake payloads and results.

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::leads::{Lead, Program, RiskFactors, RiskTier};

/// A new inquiry as submitted by the website form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub program: Program,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(flatten)]
    pub risk: RiskFactors,
}

impl NewLead {
    pub fn new(first_name: impl Into<String>, email: impl Into<String>, program: Program) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: None,
            email: email.into(),
            phone: None,
            program,
            source: None,
            risk: RiskFactors::default(),
        }
    }

    /// Builder: set risk factors.
    pub fn with_risk(mut self, risk: RiskFactors) -> Self {
        self.risk = risk;
        self
    }

    /// Builder: set phone.
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.first_name.trim().is_empty() {
            return Err(RequestError::Validation("firstName is required".into()));
        }
        let email = self.email.trim();
        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(RequestError::Validation(format!("invalid email: {email}")));
        }
        Ok(())
    }
}

/// What intake did with a new inquiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeOutcome {
    pub lead: Lead,
    pub tier: RiskTier,
    pub response_requirement: String,
    pub welcome_sent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::HousingSituation;

    #[test]
    fn deserializes_flattened_risk_factors() {
        let json = r#"{
            "firstName": "Ana",
            "email": "ana@example.org",
            "program": "veteran-housing",
            "housing": "homeless",
            "timeline": "ASAP",
            "signals": ["dependent_children"]
        }"#;
        let new: NewLead = serde_json::from_str(json).unwrap();
        assert_eq!(new.program, Program::Veterans);
        assert_eq!(new.risk.housing, Some(HousingSituation::Homeless));
        assert_eq!(new.risk.signals.len(), 1);
        assert!(new.validate().is_ok());
    }

    #[test]
    fn validation() {
        assert!(NewLead::new(" ", "a@x.org", Program::Recovery).validate().is_err());
        assert!(NewLead::new("A", "nope", Program::Recovery).validate().is_err());
        assert!(NewLead::new("A", "@x.org", Program::Recovery).validate().is_err());
        assert!(NewLead::new("A", "a@x.org", Program::Recovery).validate().is_ok());
    }
}
