use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Production schedule stamped when an order is settled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadTime {
    pub lead_time_days: u32,
    pub start_date: DateTime<Utc>,
    pub completion_date: DateTime<Utc>,
}

impl LeadTime {
    pub fn starting(lead_time_days: u32, start_date: DateTime<Utc>) -> Self {
        Self {
            lead_time_days,
            start_date,
            completion_date: start_date + Duration::days(i64::from(lead_time_days)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_start_plus_days() {
        let start = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let lt = LeadTime::starting(14, start);
        assert_eq!(lt.completion_date.to_rfc3339(), "2026-03-15T10:00:00+00:00");
    }
}
