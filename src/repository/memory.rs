use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{
    AuditRepository, MaterialRepository, MissionRepository, RepoResult, RepositoryError,
    RequesterRepository, StatusUpdate, TransmutationRepository,
};
use crate::model::{Material, Mission, Requester};
use crate::state_machine::{AuditRecord, NewTransmutation, Transmutation, TransmutationStatus};

#[derive(Default)]
struct Tables {
    requesters: BTreeMap<u64, Requester>,
    materials: BTreeMap<u64, Material>,
    missions: BTreeMap<u64, Mission>,
    transmutations: BTreeMap<u64, Transmutation>,
    audits: Vec<AuditRecord>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded in-memory implementation of every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> RepoResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("memory store lock poisoned".into()))
    }

    pub fn insert_requester(&self, name: &str) -> RepoResult<Requester> {
        let mut tables = self.tables()?;
        let requester = Requester::new(tables.next_id(), name);
        tables.requesters.insert(requester.id, requester.clone());
        Ok(requester)
    }

    pub fn insert_material(&self, name: &str, unit_cost: f64, stock: f64) -> RepoResult<Material> {
        let mut tables = self.tables()?;
        let material = Material {
            id: tables.next_id(),
            name: name.to_string(),
            unit_cost,
            stock,
        };
        tables.materials.insert(material.id, material.clone());
        Ok(material)
    }

    pub fn insert_mission(
        &self,
        title: &str,
        status: &str,
        assignee: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> RepoResult<Mission> {
        let mut tables = self.tables()?;
        let mission = Mission {
            id: tables.next_id(),
            title: title.to_string(),
            status: status.to_string(),
            assignee: assignee.map(str::to_string),
            created_at: updated_at,
            updated_at: Some(updated_at),
        };
        tables.missions.insert(mission.id, mission.clone());
        Ok(mission)
    }
}

impl RequesterRepository for MemoryStore {
    fn find_by_id(&self, id: u64) -> RepoResult<Option<Requester>> {
        Ok(self.tables()?.requesters.get(&id).cloned())
    }
}

impl MaterialRepository for MemoryStore {
    fn find_by_ids(&self, ids: &[u64]) -> RepoResult<Vec<Material>> {
        let tables = self.tables()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.materials.get(id).cloned())
            .collect())
    }

    fn find_low_stock(&self, threshold: f64) -> RepoResult<Vec<Material>> {
        let tables = self.tables()?;
        let mut low: Vec<Material> = tables
            .materials
            .values()
            .filter(|m| m.stock <= threshold)
            .cloned()
            .collect();
        low.sort_by(|a, b| a.stock.total_cmp(&b.stock));
        Ok(low)
    }
}

impl MissionRepository for MemoryStore {
    fn find_stale(
        &self,
        cutoff: DateTime<Utc>,
        closed_statuses: &[&str],
    ) -> RepoResult<Vec<Mission>> {
        let tables = self.tables()?;
        Ok(tables
            .missions
            .values()
            .filter(|m| !m.is_closed(closed_statuses) && m.last_activity() <= cutoff)
            .cloned()
            .collect())
    }
}

impl TransmutationRepository for MemoryStore {
    fn create(&self, new: NewTransmutation) -> RepoResult<Transmutation> {
        let mut tables = self.tables()?;
        let now = Utc::now();
        let record = Transmutation {
            id: tables.next_id(),
            description: new.description,
            status: TransmutationStatus::PendingApproval,
            requester_id: new.requester_id,
            requester: None,
            estimated_cost: new.estimated_cost,
            estimated_duration_secs: new.estimated_duration_secs,
            created_at: now,
            updated_at: now,
        };
        tables.transmutations.insert(record.id, record.clone());
        Ok(record)
    }

    fn find_by_id(&self, id: u64) -> RepoResult<Option<Transmutation>> {
        Ok(self.tables()?.transmutations.get(&id).cloned())
    }

    fn find_all(&self) -> RepoResult<Vec<Transmutation>> {
        Ok(self.tables()?.transmutations.values().cloned().collect())
    }

    fn has_active(&self, requester_id: u64, statuses: &[TransmutationStatus]) -> RepoResult<bool> {
        Ok(self
            .tables()?
            .transmutations
            .values()
            .any(|t| t.requester_id == requester_id && statuses.contains(&t.status)))
    }

    fn update_status(
        &self,
        id: u64,
        expected: TransmutationStatus,
        target: TransmutationStatus,
    ) -> RepoResult<StatusUpdate> {
        let mut tables = self.tables()?;
        let Some(record) = tables.transmutations.get_mut(&id) else {
            return Ok(StatusUpdate::Missing);
        };
        if record.status != expected {
            return Ok(StatusUpdate::Stale(record.status));
        }
        record.status = target;
        record.updated_at = Utc::now();
        Ok(StatusUpdate::Applied(record.clone()))
    }

    fn delete(&self, id: u64) -> RepoResult<()> {
        match self.tables()?.transmutations.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::Missing {
                entity: "transmutation",
                id,
            }),
        }
    }
}

impl AuditRepository for MemoryStore {
    fn append(&self, record: AuditRecord) -> RepoResult<()> {
        self.tables()?.audits.push(record);
        Ok(())
    }

    fn find_all(&self) -> RepoResult<Vec<AuditRecord>> {
        Ok(self.tables()?.audits.clone())
    }
}
