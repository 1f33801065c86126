//! Lead data model: the lead record, its status machine, programs and tiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sla;

/// Housing program a lead inquired about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    #[serde(alias = "veteran-housing", alias = "veteran")]
    Veterans,
    #[serde(alias = "sober-living")]
    Recovery,
    #[serde(alias = "re-entry-housing", alias = "re-entry")]
    Reentry,
}

impl Program {
    pub const ALL: [Program; 3] = [Program::Veterans, Program::Recovery, Program::Reentry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Program::Veterans => "veterans",
            Program::Recovery => "recovery",
            Program::Reentry => "reentry",
        }
    }

    /// Human-readable program name used in messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Program::Veterans => "Veterans Housing",
            Program::Recovery => "Recovery Housing",
            Program::Reentry => "Re-entry Housing",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Program {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "veterans" | "veteran" | "veteran-housing" => Ok(Program::Veterans),
            "recovery" | "sober-living" => Ok(Program::Recovery),
            "reentry" | "re-entry" | "re-entry-housing" => Ok(Program::Reentry),
            other => Err(format!("unknown program: {other}")),
        }
    }
}

/// Lifecycle status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    New,
    Contacted,
    Scheduled,
    Converted,
    Closed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Scheduled => "scheduled",
            LeadStatus::Converted => "converted",
            LeadStatus::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Converted | LeadStatus::Closed)
    }

    /// Statuses whose SLA can still be missed.
    pub fn is_escalatable(&self) -> bool {
        matches!(self, LeadStatus::New | LeadStatus::Contacted)
    }

    fn rank(&self) -> u8 {
        match self {
            LeadStatus::New => 0,
            LeadStatus::Contacted => 1,
            LeadStatus::Scheduled => 2,
            LeadStatus::Converted | LeadStatus::Closed => 3,
        }
    }

    /// Status only moves toward a terminal state. New and Contacted may
    /// swap; nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }
        if matches!(
            (self, next),
            (LeadStatus::Contacted, LeadStatus::New) | (LeadStatus::New, LeadStatus::Contacted)
        ) {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "scheduled" => Ok(LeadStatus::Scheduled),
            "converted" => Ok(LeadStatus::Converted),
            "closed" => Ok(LeadStatus::Closed),
            other => Err(format!("unknown lead status: {other}")),
        }
    }
}

/// Response urgency bucket derived from the risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Early,
    Moderate,
    High,
    Critical,
}

impl RiskTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => RiskTier::Critical,
            60..=79 => RiskTier::High,
            30..=59 => RiskTier::Moderate,
            _ => RiskTier::Early,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Critical => "CRITICAL",
            RiskTier::High => "HIGH",
            RiskTier::Moderate => "MODERATE",
            RiskTier::Early => "EARLY",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A prospective resident who submitted an inquiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub program: Program,
    pub source: String,
    /// Set once at intake.
    pub risk_score: u8,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    /// Set once at intake from `risk_score` and `created_at`.
    pub sla_deadline: DateTime<Utc>,
    /// Index of the next catalog entry. Never decreases.
    pub sequence_step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    /// Compare-and-swap key, bumped by every successful write.
    pub version: u64,
    /// Dispatch lease held by a worker between claim and commit.
    #[serde(skip)]
    pub claim_token: Option<Uuid>,
    #[serde(skip)]
    pub claimed_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Create a fresh lead. The SLA deadline is derived here and never again.
    pub fn new(
        first_name: impl Into<String>,
        email: impl Into<String>,
        program: Program,
        risk_score: u8,
        created_at: DateTime<Utc>,
    ) -> Self {
        let risk_score = risk_score.min(100);
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: None,
            email: email.into(),
            phone: None,
            program,
            source: "website".to_string(),
            risk_score,
            status: LeadStatus::New,
            created_at,
            sla_deadline: sla::compute_deadline(risk_score, created_at),
            sequence_step: 0,
            last_message_sent_at: None,
            escalated_at: None,
            version: 0,
            claim_token: None,
            claimed_until: None,
            updated_at: created_at,
        }
    }

    /// Builder: set last name.
    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    /// Builder: set phone.
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Builder: set source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Builder: set status.
    pub fn with_status(mut self, status: LeadStatus) -> Self {
        self.status = status;
        self
    }

    pub fn tier(&self) -> RiskTier {
        RiskTier::from_score(self.risk_score)
    }

    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.trim().is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    /// Whether another worker holds a live dispatch lease on this lead.
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.claimed_until, Some(until) if until > now) && self.claim_token.is_some()
    }
}

/// Normalize an email address for lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Digits of a phone number, for lookup.
pub fn phone_digits(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Sort leads so the most urgent tier comes first, oldest first within a tier.
pub fn sort_by_priority(leads: &mut [Lead]) {
    leads.sort_by(|a, b| {
        b.tier()
            .cmp(&a.tier())
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_transitions_move_forward_only() {
        assert!(LeadStatus::New.can_transition_to(LeadStatus::Contacted));
        assert!(LeadStatus::Contacted.can_transition_to(LeadStatus::New));
        assert!(LeadStatus::New.can_transition_to(LeadStatus::Closed));
        assert!(LeadStatus::Scheduled.can_transition_to(LeadStatus::Converted));
        assert!(!LeadStatus::Scheduled.can_transition_to(LeadStatus::Contacted));
        assert!(!LeadStatus::Closed.can_transition_to(LeadStatus::Contacted));
        assert!(!LeadStatus::Converted.can_transition_to(LeadStatus::Closed));
        assert!(!LeadStatus::New.can_transition_to(LeadStatus::New));
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(RiskTier::from_score(100), RiskTier::Critical);
        assert_eq!(RiskTier::from_score(80), RiskTier::Critical);
        assert_eq!(RiskTier::from_score(79), RiskTier::High);
        assert_eq!(RiskTier::from_score(60), RiskTier::High);
        assert_eq!(RiskTier::from_score(59), RiskTier::Moderate);
        assert_eq!(RiskTier::from_score(30), RiskTier::Moderate);
        assert_eq!(RiskTier::from_score(29), RiskTier::Early);
        assert_eq!(RiskTier::from_score(0), RiskTier::Early);
    }

    #[test]
    fn program_accepts_site_slugs() {
        assert_eq!("veteran-housing".parse::<Program>().unwrap(), Program::Veterans);
        assert_eq!("sober-living".parse::<Program>().unwrap(), Program::Recovery);
        assert_eq!("Re-Entry-Housing".parse::<Program>().unwrap(), Program::Reentry);
        assert!("daycare".parse::<Program>().is_err());

        let p: Program = serde_json::from_str("\"sober-living\"").unwrap();
        assert_eq!(p, Program::Recovery);
        assert_eq!(serde_json::to_string(&Program::Reentry).unwrap(), "\"reentry\"");
    }

    #[test]
    fn priority_order_is_tier_then_age() {
        let t0 = Utc::now();
        let early = Lead::new("E", "e@x.org", Program::Recovery, 10, t0);
        let critical_late =
            Lead::new("C2", "c2@x.org", Program::Recovery, 90, t0 + Duration::minutes(5));
        let critical_early = Lead::new("C1", "c1@x.org", Program::Recovery, 85, t0);
        let high = Lead::new("H", "h@x.org", Program::Recovery, 65, t0);

        let mut leads = vec![early, critical_late, high, critical_early];
        sort_by_priority(&mut leads);
        let names: Vec<_> = leads.iter().map(|l| l.first_name.as_str()).collect();
        assert_eq!(names, vec!["C1", "C2", "H", "E"]);
    }

    #[test]
    fn lead_serializes_camel_case_without_claim() {
        let mut lead = Lead::new("Ana", "ana@x.org", Program::Veterans, 50, Utc::now());
        lead.claim_token = Some(Uuid::new_v4());
        let json = serde_json::to_value(&lead).unwrap();
        assert_eq!(json["firstName"], "Ana");
        assert_eq!(json["riskScore"], 50);
        assert_eq!(json["status"], "New");
        assert!(json.get("claimToken").is_none());
        assert!(json.get("lastName").is_none());
    }

    #[test]
    fn contact_normalization() {
        assert_eq!(normalize_email("  Ana@Example.ORG "), "ana@example.org");
        assert_eq!(phone_digits("+1 (626) 603-0954"), "16266030954");
    }

    #[test]
    fn full_name_skips_blank_last_name() {
        let lead = Lead::new("Ana", "a@x.org", Program::Veterans, 0, Utc::now());
        assert_eq!(lead.full_name(), "Ana");
        assert_eq!(lead.clone().with_last_name("Diaz").full_name(), "Ana Diaz");
        assert_eq!(lead.with_last_name(" ").full_name(), "Ana");
    }
}
