//! SLA deadlines derived from the risk score.

use chrono::{DateTime, Duration, Utc};

use super::model::RiskTier;

/// Time allowed for a first response in each tier.
pub fn response_window(tier: RiskTier) -> Duration {
    match tier {
        RiskTier::Critical => Duration::minutes(15),
        RiskTier::High => Duration::hours(2),
        RiskTier::Moderate => Duration::hours(24),
        RiskTier::Early => Duration::hours(72),
    }
}

/// Human-readable response requirement, as shown to staff.
pub fn response_requirement(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Critical => "15 minutes",
        RiskTier::High => "2 hours",
        RiskTier::Moderate => "24 hours",
        RiskTier::Early => "3 days",
    }
}

/// Deadline for a first response. Pure in `(risk_score, created_at)`.
pub fn compute_deadline(risk_score: u8, created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + response_window(RiskTier::from_score(risk_score))
}

/// Whole minutes past the deadline, rounded to nearest. Zero if not overdue.
pub fn minutes_overdue(deadline: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let late = now - deadline;
    if late <= Duration::zero() {
        return 0;
    }
    (late.num_seconds() + 30) / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_offsets_per_band() {
        let t = Utc::now();
        assert_eq!(compute_deadline(85, t), t + Duration::minutes(15));
        assert_eq!(compute_deadline(80, t), t + Duration::minutes(15));
        assert_eq!(compute_deadline(65, t), t + Duration::hours(2));
        assert_eq!(compute_deadline(45, t), t + Duration::hours(24));
        assert_eq!(compute_deadline(29, t), t + Duration::hours(72));
        assert_eq!(compute_deadline(0, t), t + Duration::hours(72));
    }

    #[test]
    fn overdue_minutes_round_to_nearest() {
        let deadline = Utc::now();
        assert_eq!(minutes_overdue(deadline, deadline - Duration::minutes(3)), 0);
        assert_eq!(minutes_overdue(deadline, deadline), 0);
        assert_eq!(minutes_overdue(deadline, deadline + Duration::seconds(89)), 1);
        assert_eq!(minutes_overdue(deadline, deadline + Duration::seconds(90)), 2);
        assert_eq!(minutes_overdue(deadline, deadline + Duration::hours(1)), 60);
    }

    #[test]
    fn requirement_labels() {
        assert_eq!(response_requirement(RiskTier::Critical), "15 minutes");
        assert_eq!(response_requirement(RiskTier::Early), "3 days");
    }
}
