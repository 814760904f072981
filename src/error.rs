use thiserror::Error;

use crate::repository::RepositoryError;
use crate::scheduler::SchedulerError;
use crate::state_machine::TransmutationStatus;

#[derive(Debug, Error)]
pub enum TransmuteError {
    #[error("alchemist not found: {0}")]
    RequesterNotFound(u64),

    #[error("transmutation not found: {0}")]
    TransmutationNotFound(u64),

    #[error("material not found: {ids:?}")]
    MaterialNotFound { ids: Vec<u64> },

    #[error("invalid complexity level: {0}")]
    InvalidComplexity(String),

    #[error("invalid risk level: {0}")]
    InvalidRisk(String),

    #[error("material quantity must be positive: {0}")]
    InvalidQuantity(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("illegal transition from {from} to {to}")]
    InvalidTransition {
        from: TransmutationStatus,
        to: TransmutationStatus,
    },

    #[error("transmutation already running for alchemist {0}")]
    AlreadyActive(u64),

    #[error("transmutation {id} is {status} and can no longer be cancelled")]
    AlreadyTerminal { id: u64, status: TransmutationStatus },

    #[error("mission stale window of {0} days is out of range")]
    StaleWindowOutOfRange(i64),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl TransmuteError {
    /// Coarse classification used for retry and status-code decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransmuteError::RequesterNotFound(_)
            | TransmuteError::TransmutationNotFound(_)
            | TransmuteError::MaterialNotFound { .. } => ErrorKind::NotFound,
            TransmuteError::InvalidComplexity(_)
            | TransmuteError::InvalidRisk(_)
            | TransmuteError::InvalidQuantity(_)
            | TransmuteError::InvalidStatus(_)
            | TransmuteError::InvalidTransition { .. }
            | TransmuteError::StaleWindowOutOfRange(_) => ErrorKind::Validation,
            TransmuteError::AlreadyActive(_) | TransmuteError::AlreadyTerminal { .. } => {
                ErrorKind::Conflict
            }
            TransmuteError::Repository(_) | TransmuteError::Scheduler(_) => ErrorKind::Dependency,
        }
    }
}

/// Classifies a failure for callers that only care about its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Requester, material or transmutation absent.
    NotFound,
    /// Malformed input or an illegal transition request.
    Validation,
    /// Duplicate active work or mutation of a terminal record.
    Conflict,
    /// Repository, audit or scheduler failure.
    Dependency,
}

impl ErrorKind {
    /// HTTP status an API layer should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Dependency => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "NotFound"),
            ErrorKind::Validation => write!(f, "Validation"),
            ErrorKind::Conflict => write!(f, "Conflict"),
            ErrorKind::Dependency => write!(f, "Dependency"),
        }
    }
}
