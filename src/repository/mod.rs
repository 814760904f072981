//! Storage collaborators consumed by the lifecycle engine and the daily sweep.
//!
//! Every trait is synchronous and `Send + Sync` so one implementation can be
//! shared between request handlers, scheduled completions and the sweep loop.
//! [`MemoryStore`] implements all of them.

mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Material, Mission, Requester};
use crate::state_machine::{AuditRecord, NewTransmutation, Transmutation, TransmutationStatus};

pub use memory::MemoryStore;

/// Failure inside a storage collaborator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backing store could not serve the request.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A write targeted a record that does not exist.
    #[error("{entity} #{id} does not exist")]
    Missing { entity: &'static str, id: u64 },
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Outcome of a compare-and-set status update.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// The record held the expected status and now holds the target.
    Applied(Transmutation),
    /// The record holds a different status than expected; nothing changed.
    Stale(TransmutationStatus),
    /// No record with that id.
    Missing,
}

pub trait RequesterRepository: Send + Sync {
    fn find_by_id(&self, id: u64) -> RepoResult<Option<Requester>>;
}

pub trait MaterialRepository: Send + Sync {
    /// Resolve a batch of ids. Unknown ids are simply absent from the result.
    fn find_by_ids(&self, ids: &[u64]) -> RepoResult<Vec<Material>>;

    /// Materials with `stock <= threshold`, lowest stock first.
    fn find_low_stock(&self, threshold: f64) -> RepoResult<Vec<Material>>;
}

pub trait MissionRepository: Send + Sync {
    /// Missions whose status is not in `closed_statuses` (case-insensitive)
    /// and whose last activity is at or before `cutoff`.
    fn find_stale(&self, cutoff: DateTime<Utc>, closed_statuses: &[&str])
    -> RepoResult<Vec<Mission>>;
}

pub trait TransmutationRepository: Send + Sync {
    /// Persist a new record in PENDING_APPROVAL.
    fn create(&self, new: NewTransmutation) -> RepoResult<Transmutation>;

    fn find_by_id(&self, id: u64) -> RepoResult<Option<Transmutation>>;

    fn find_all(&self) -> RepoResult<Vec<Transmutation>>;

    /// Whether the alchemist owns a record in any of `statuses`.
    fn has_active(&self, requester_id: u64, statuses: &[TransmutationStatus]) -> RepoResult<bool>;

    /// Move record `id` to `target` only if it currently holds `expected`.
    fn update_status(
        &self,
        id: u64,
        expected: TransmutationStatus,
        target: TransmutationStatus,
    ) -> RepoResult<StatusUpdate>;

    fn delete(&self, id: u64) -> RepoResult<()>;
}

pub trait AuditRepository: Send + Sync {
    fn append(&self, record: AuditRecord) -> RepoResult<()>;

    fn find_all(&self) -> RepoResult<Vec<AuditRecord>>;
}

/// Shared handles to every storage collaborator.
#[derive(Clone)]
pub struct Repositories {
    pub requesters: Arc<dyn RequesterRepository>,
    pub materials: Arc<dyn MaterialRepository>,
    pub missions: Arc<dyn MissionRepository>,
    pub transmutations: Arc<dyn TransmutationRepository>,
    pub audits: Arc<dyn AuditRepository>,
}

impl Repositories {
    /// Route every collaborator to one in-memory store.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            requesters: store.clone(),
            materials: store.clone(),
            missions: store.clone(),
            transmutations: store.clone(),
            audits: store,
        }
    }
}
