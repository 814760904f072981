use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransmuteError;

/// Lifecycle status of a transmutation.
///
/// PENDING_APPROVAL → IN_PROGRESS → {COMPLETED, FAILED}, and any non-terminal
/// status may move to CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransmutationStatus {
    PendingApproval,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransmutationStatus {
    pub const ALL: [TransmutationStatus; 5] = [
        TransmutationStatus::PendingApproval,
        TransmutationStatus::InProgress,
        TransmutationStatus::Completed,
        TransmutationStatus::Failed,
        TransmutationStatus::Cancelled,
    ];

    /// Statuses that count against the one-active-transmutation-per-alchemist rule.
    pub const ACTIVE: [TransmutationStatus; 2] = [
        TransmutationStatus::PendingApproval,
        TransmutationStatus::InProgress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransmutationStatus::PendingApproval => "PENDING_APPROVAL",
            TransmutationStatus::InProgress => "IN_PROGRESS",
            TransmutationStatus::Completed => "COMPLETED",
            TransmutationStatus::Failed => "FAILED",
            TransmutationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransmutationStatus::Completed
                | TransmutationStatus::Failed
                | TransmutationStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

impl fmt::Display for TransmutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransmutationStatus {
    type Err = TransmuteError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == key)
            .ok_or_else(|| TransmuteError::InvalidStatus(s.trim().to_string()))
    }
}

/// What an accepted status change requires from the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target equals the current status; nothing to persist.
    Unchanged,
    /// PENDING_APPROVAL → IN_PROGRESS. Arms the completion timer.
    Approve,
    /// Any other move out of a non-terminal status. `disarm` is set when the
    /// record is leaving IN_PROGRESS and its completion timer must be cancelled.
    Move { disarm: bool },
}

/// Decides which status changes are legal. Holds no state; the persisted
/// status is the single source of truth.
pub struct StateMachine;

impl StateMachine {
    /// Plan a generic status update from `current` to `target`.
    ///
    /// - Equal statuses are a no-op.
    /// - IN_PROGRESS is only reachable from PENDING_APPROVAL.
    /// - Terminal statuses never change.
    /// - Every other move out of a non-terminal status is accepted, including
    ///   PENDING_APPROVAL → COMPLETED and the externally triggered → FAILED.
    pub fn plan(
        current: TransmutationStatus,
        target: TransmutationStatus,
    ) -> Result<Transition, TransmuteError> {
        if current == target {
            return Ok(Transition::Unchanged);
        }
        let illegal = TransmuteError::InvalidTransition {
            from: current,
            to: target,
        };
        if target == TransmutationStatus::InProgress {
            return match current {
                TransmutationStatus::PendingApproval => Ok(Transition::Approve),
                _ => Err(illegal),
            };
        }
        if current.is_terminal() {
            return Err(illegal);
        }
        Ok(Transition::Move {
            disarm: current == TransmutationStatus::InProgress,
        })
    }

    /// Plan a cancellation of record `id`.
    ///
    /// Returns whether a completion timer must be disarmed. A cancelled
    /// record may be cancelled again; only COMPLETED and FAILED refuse.
    pub fn plan_cancel(id: u64, current: TransmutationStatus) -> Result<bool, TransmuteError> {
        match current {
            TransmutationStatus::Completed | TransmutationStatus::Failed => {
                Err(TransmuteError::AlreadyTerminal {
                    id,
                    status: current,
                })
            }
            TransmutationStatus::InProgress => Ok(true),
            TransmutationStatus::PendingApproval | TransmutationStatus::Cancelled => Ok(false),
        }
    }
}
