//! Risk scoring: turns an intake questionnaire into a 0–100 urgency score.
//!
//! Each signal category contributes independently and the sum is capped
//! at 100. Scoring is pure; the same inputs always produce the same score.

use serde::{Deserialize, Serialize};

use super::model::{Program, RiskTier};

/// Where the applicant is living right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HousingSituation {
    Homeless,
    Temporary,
    Unstable,
    Stable,
}

impl HousingSituation {
    fn weight(&self) -> u32 {
        match self {
            HousingSituation::Homeless => 40,
            HousingSituation::Temporary => 30,
            HousingSituation::Unstable => 20,
            HousingSituation::Stable => 5,
        }
    }
}

/// Declared circumstances that raise urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSignal {
    DependentChildren,
    LowIncome,
    RecentlyReleased,
    SafetyConcern,
}

impl RiskSignal {
    fn weight(&self) -> u32 {
        match self {
            RiskSignal::DependentChildren => 10,
            RiskSignal::LowIncome => 15,
            RiskSignal::RecentlyReleased => 15,
            RiskSignal::SafetyConcern => 25,
        }
    }
}

/// Intake answers the scorer looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactors {
    #[serde(default)]
    pub housing: Option<HousingSituation>,
    /// Free-text move-in timeline ("ASAP", "within a week", ...).
    #[serde(default)]
    pub timeline: Option<String>,
    /// Free-text description of the applicant's situation.
    #[serde(default)]
    pub situation: Option<String>,
    #[serde(default)]
    pub signals: Vec<RiskSignal>,
}

const CRISIS_KEYWORDS: &[&str] = &[
    "urgent",
    "emergency",
    "desperate",
    "immediate",
    "asap",
    "crisis",
    "help",
    "evicted",
    "eviction",
    "shelter",
    "relapse",
    "released",
];

const KEYWORD_WEIGHT: u32 = 5;
const KEYWORD_CAP: u32 = 20;
const VETERAN_PRIORITY: u32 = 10;

fn timeline_weight(timeline: &str) -> u32 {
    let t = timeline.to_lowercase();
    if t.contains("immediate") || t.contains("asap") || t.contains("today") {
        25
    } else if t.contains("week") {
        20
    } else if t.contains("month") {
        10
    } else {
        0
    }
}

fn keyword_weight(text: &str) -> u32 {
    let text = text.to_lowercase();
    let hits = CRISIS_KEYWORDS
        .iter()
        .filter(|kw| {
            text.split(|c: char| !c.is_alphanumeric())
                .any(|word| word == **kw)
        })
        .count() as u32;
    (hits * KEYWORD_WEIGHT).min(KEYWORD_CAP)
}

/// Score a lead's urgency. Always in `0..=100`.
pub fn score(program: Program, factors: &RiskFactors) -> u8 {
    let mut total = 0u32;

    if let Some(housing) = factors.housing {
        total += housing.weight();
    }
    if let Some(timeline) = &factors.timeline {
        total += timeline_weight(timeline);
    }
    if let Some(situation) = &factors.situation {
        total += keyword_weight(situation);
    }

    let mut seen = Vec::with_capacity(factors.signals.len());
    for signal in &factors.signals {
        if !seen.contains(signal) {
            seen.push(*signal);
            total += signal.weight();
        }
    }

    if program == Program::Veterans {
        total += VETERAN_PRIORITY;
    }

    total.min(100) as u8
}

/// Convenience: score and bucket in one call.
pub fn assess(program: Program, factors: &RiskFactors) -> (u8, RiskTier) {
    let s = score(program, factors);
    (s, RiskTier::from_score(s))
}
