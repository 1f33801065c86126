//! Escalation alert content and the overdue listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::leads::model::phone_digits;
use crate::leads::{Lead, RiskTier, sla};
use crate::notify::{MessageKind, OutboundMessage};

/// Whether `lead` has missed its SLA and has not been escalated yet.
pub fn needs_escalation(lead: &Lead, now: DateTime<Utc>) -> bool {
    lead.status.is_escalatable() && lead.escalated_at.is_none() && now > lead.sla_deadline
}

/// An open lead past its SLA deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueLead {
    pub id: Uuid,
    pub name: String,
    pub tier: RiskTier,
    pub risk_score: u8,
    pub minutes_overdue: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
}

impl OverdueLead {
    pub fn from_lead(lead: &Lead, now: DateTime<Utc>) -> Self {
        Self {
            id: lead.id,
            name: lead.full_name(),
            tier: lead.tier(),
            risk_score: lead.risk_score,
            minutes_overdue: sla::minutes_overdue(lead.sla_deadline, now),
            escalated_at: lead.escalated_at,
        }
    }
}

/// Open leads past their deadline, most overdue first.
pub fn overdue_leads(leads: &[Lead], now: DateTime<Utc>) -> Vec<OverdueLead> {
    let mut overdue: Vec<OverdueLead> = leads
        .iter()
        .filter(|l| l.status.is_escalatable() && now > l.sla_deadline)
        .map(|l| OverdueLead::from_lead(l, now))
        .collect();
    overdue.sort_by(|a, b| {
        b.tier
            .cmp(&a.tier)
            .then_with(|| b.minutes_overdue.cmp(&a.minutes_overdue))
    });
    overdue
}

/// Build the staff alert for a missed SLA.
pub fn escalation_message(lead: &Lead, now: DateTime<Utc>, alerts: &AlertConfig) -> OutboundMessage {
    let tier = lead.tier();
    let name = lead.full_name();
    let overdue = sla::minutes_overdue(lead.sla_deadline, now);

    let mut body = format!(
        "SLA missed for a {tier} priority lead.\n\n\
         Name: {name}\n\
         Program: {program}\n\
         Risk: {tier} ({score}/100)\n\
         Required response: within {requirement}\n\
         Minutes overdue: {overdue}\n\
         Submitted: {submitted}\n\
         Source: {source}\n\n\
         Email: mailto:{email}\n",
        program = lead.program.display_name(),
        score = lead.risk_score,
        requirement = sla::response_requirement(tier),
        submitted = lead.created_at.format("%Y-%m-%d %H:%M UTC"),
        source = lead.source,
        email = lead.email,
    );
    if let Some(phone) = &lead.phone {
        body.push_str(&format!("Call: tel:{}\n", phone_digits(phone)));
    }
    if let Some(url) = &alerts.dashboard_url {
        body.push_str(&format!("\nOpen lead: {}/leads/{}\n", url.trim_end_matches('/'), lead.id));
    }

    OutboundMessage::new(
        MessageKind::Escalation,
        lead.id,
        String::new(),
        format!("🚨 SLA MISSED - {tier} Priority Lead - {name}"),
        body,
    )
    .with_recipients(alerts.escalation_to.clone())
    .with_cc(alerts.escalation_cc.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::{LeadStatus, Program};
    use chrono::Duration;

    fn critical(t: DateTime<Utc>) -> Lead {
        Lead::new("Ana", "ana@x.org", Program::Veterans, 90, t)
            .with_last_name("Diaz")
            .with_phone("(626) 555-0100")
    }

    #[test]
    fn selection_predicate() {
        let t = Utc::now();
        let lead = critical(t);
        assert!(!needs_escalation(&lead, t + Duration::minutes(15)));
        assert!(needs_escalation(&lead, t + Duration::minutes(16)));

        let mut escalated = lead.clone();
        escalated.escalated_at = Some(t);
        assert!(!needs_escalation(&escalated, t + Duration::hours(1)));

        let scheduled = lead.clone().with_status(LeadStatus::Scheduled);
        assert!(!needs_escalation(&scheduled, t + Duration::hours(1)));
        let contacted = lead.with_status(LeadStatus::Contacted);
        assert!(needs_escalation(&contacted, t + Duration::hours(1)));
    }

    #[test]
    fn alert_carries_tier_overdue_and_actions() {
        let t = Utc::now();
        let alerts = AlertConfig {
            escalation_to: vec!["team@x.org".into()],
            escalation_cc: vec!["alerts@x.org".into()],
            staff_to: vec![],
            dashboard_url: Some("https://crm.example.org/".into()),
        };
        let lead = critical(t);
        let msg = escalation_message(&lead, t + Duration::minutes(20), &alerts);

        assert_eq!(msg.kind, MessageKind::Escalation);
        assert_eq!(msg.subject, "🚨 SLA MISSED - CRITICAL Priority Lead - Ana Diaz");
        assert_eq!(msg.to, vec!["team@x.org".to_string()]);
        assert_eq!(msg.cc, vec!["alerts@x.org".to_string()]);
        assert!(msg.body.contains("Minutes overdue: 5"));
        assert!(msg.body.contains("tel:6265550100"));
        assert!(msg.body.contains("mailto:ana@x.org"));
        assert!(msg.body.contains(&format!("https://crm.example.org/leads/{}", lead.id)));
    }

    #[test]
    fn overdue_list_orders_by_tier_then_lateness() {
        let t = Utc::now();
        let now = t + Duration::days(4);
        let early = Lead::new("E", "e@x.org", Program::Recovery, 10, t);
        let critical_lead = critical(t);
        let high = Lead::new("H", "h@x.org", Program::Recovery, 65, t);
        let closed = Lead::new("C", "c@x.org", Program::Recovery, 90, t).with_status(LeadStatus::Closed);
        let fresh = Lead::new("F", "f@x.org", Program::Recovery, 10, now);

        let list = overdue_leads(&[early, high, closed, critical_lead, fresh], now);
        let tiers: Vec<_> = list.iter().map(|o| o.tier).collect();
        assert_eq!(tiers, vec![RiskTier::Critical, RiskTier::High, RiskTier::Early]);
        assert_eq!(list[2].minutes_overdue, 24 * 60);
    }
}
