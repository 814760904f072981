//! Entities the lifecycle engine reads but does not own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The alchemist who requests transmutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requester {
    pub id: u64,
    pub name: String,
}

impl Requester {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A stocked ingredient with a unit cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: u64,
    pub name: String,
    pub unit_cost: f64,
    pub stock: f64,
}

/// Field work tracked elsewhere; only the daily sweep looks at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: u64,
    pub title: String,
    pub status: String,
    /// Name of the assigned alchemist, if any.
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Mission {
    /// Last time the mission changed; never-updated missions use their creation time.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }

    pub fn is_closed(&self, closed_statuses: &[&str]) -> bool {
        closed_statuses
            .iter()
            .any(|closed| closed.eq_ignore_ascii_case(self.status.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn requester_snapshot_is_id_and_name() {
        let json = serde_json::to_value(Requester::new(4, "Izumi Curtis")).unwrap();
        assert_eq!(json, serde_json::json!({"id": 4, "name": "Izumi Curtis"}));
        let parsed: Requester =
            serde_json::from_str(r#"{"id": 4, "name": "Izumi Curtis", "rank": "State"}"#).unwrap();
        assert_eq!(parsed, Requester::new(4, "Izumi Curtis"));
    }

    #[test]
    fn last_activity_falls_back_to_creation() {
        let created = Utc::now() - Duration::days(3);
        let mut mission = Mission {
            id: 1,
            title: "Lab 5".into(),
            status: "OPEN".into(),
            assignee: None,
            created_at: created,
            updated_at: None,
        };
        assert_eq!(mission.last_activity(), created);
        let later = created + Duration::hours(1);
        mission.updated_at = Some(later);
        assert_eq!(mission.last_activity(), later);
    }

    #[test]
    fn closed_status_is_case_insensitive() {
        let mission = Mission {
            id: 1,
            title: "Ishval".into(),
            status: "completed".into(),
            assignee: Some("Roy Mustang".into()),
            created_at: Utc::now(),
            updated_at: None,
        };
        assert!(mission.is_closed(&["COMPLETED", "CANCELLED"]));
        assert!(!mission.is_closed(&["CANCELLED"]));
    }
}
