use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::TransmutationStatus;
use crate::model::Requester;

/// A priced, timed unit of work owned by one alchemist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transmutation {
    pub id: u64,
    pub description: String,
    pub status: TransmutationStatus,
    #[serde(rename = "alchemist_id")]
    pub requester_id: u64,
    /// Resolved owner, attached on reads when the alchemist can be found.
    #[serde(rename = "alchemist", default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<Requester>,
    pub estimated_cost: f64,
    #[serde(rename = "estimated_duration_seconds")]
    pub estimated_duration_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transmutation {
    /// Display name of the owner, falling back to `#<id>`.
    pub fn requester_name(&self) -> String {
        match &self.requester {
            Some(r) => r.name.clone(),
            None => format!("#{}", self.requester_id),
        }
    }
}

/// Fields supplied by the caller when a transmutation is created; the
/// repository assigns identity, timestamps and the initial status.
#[derive(Debug, Clone)]
pub struct NewTransmutation {
    pub description: String,
    pub requester_id: u64,
    pub estimated_cost: f64,
    pub estimated_duration_secs: u64,
}

/// Action tag of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    TransmutationRequested,
    TransmutationApproved,
    TransmutationStatusUpdated,
    TransmutationCancelled,
    TransmutationCompleted,
    DailyMaterialAlert,
    DailyMissionAlert,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            AuditAction::TransmutationRequested => "TRANSMUTATION_REQUESTED",
            AuditAction::TransmutationApproved => "TRANSMUTATION_APPROVED",
            AuditAction::TransmutationStatusUpdated => "TRANSMUTATION_STATUS_UPDATED",
            AuditAction::TransmutationCancelled => "TRANSMUTATION_CANCELLED",
            AuditAction::TransmutationCompleted => "TRANSMUTATION_COMPLETED",
            AuditAction::DailyMaterialAlert => "DAILY_MATERIAL_ALERT",
            AuditAction::DailyMissionAlert => "DAILY_MISSION_ALERT",
        };
        f.write_str(tag)
    }
}

/// Kind of entity an audit record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Transmutation,
    Material,
    Mission,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Transmutation => write!(f, "transmutation"),
            EntityKind::Material => write!(f, "material"),
            EntityKind::Mission => write!(f, "mission"),
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity: EntityKind,
    pub entity_id: u64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        action: AuditAction,
        entity: EntityKind,
        entity_id: u64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity,
            entity_id,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// Audit record about a transmutation.
    pub fn transmutation(action: AuditAction, id: u64, description: impl Into<String>) -> Self {
        Self::new(action, EntityKind::Transmutation, id, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transmutation {
        let now = Utc::now();
        Transmutation {
            id: 3,
            description: "Iron to gold".into(),
            status: TransmutationStatus::PendingApproval,
            requester_id: 8,
            requester: None,
            estimated_cost: 42.5,
            estimated_duration_secs: 90,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn serializes_with_boundary_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["alchemist_id"], 8);
        assert_eq!(json["estimated_duration_seconds"], 90);
        assert_eq!(json["status"], "PENDING_APPROVAL");
        assert!(json.get("alchemist").is_none());
    }

    #[test]
    fn requester_name_falls_back_to_id() {
        let mut t = sample();
        assert_eq!(t.requester_name(), "#8");
        t.requester = Some(Requester::new(8, "Izumi Curtis"));
        assert_eq!(t.requester_name(), "Izumi Curtis");
    }

    #[test]
    fn audit_record_fields() {
        let record = AuditRecord::transmutation(AuditAction::TransmutationCancelled, 3, "gone");
        assert_eq!(record.entity, EntityKind::Transmutation);
        assert_eq!(record.entity_id, 3);
        assert_eq!(record.action.to_string(), "TRANSMUTATION_CANCELLED");
        assert_eq!(
            serde_json::to_value(&record).unwrap()["entity"],
            "transmutation"
        );
    }

    #[test]
    fn entity_kinds_cover_audited_subjects() {
        let names: Vec<String> = [EntityKind::Transmutation, EntityKind::Material, EntityKind::Mission]
            .iter()
            .map(|kind| serde_json::to_string(kind).unwrap())
            .collect();
        assert_eq!(names, ["\"transmutation\"", "\"material\"", "\"mission\""]);
        assert!(serde_json::from_str::<EntityKind>("\"alchemist\"").is_err());
    }
}
