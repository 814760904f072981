use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::TransmuteError;
use crate::notify::{Notifier, NotifyError, Topic};
use crate::repository::{Repositories, StatusUpdate};
use crate::scheduler::TaskScheduler;
use crate::simulation::{
    Breakdown, DurationBounds, PLACEHOLDER_DESCRIPTION, SimulationRequest, Simulator,
};
use crate::state_machine::{
    AuditAction, AuditRecord, NewTransmutation, StateMachine, Transition, Transmutation,
    TransmutationStatus,
};

type Result<T> = std::result::Result<T, TransmuteError>;

/// Drives transmutations through their lifecycle: pricing on submit,
/// approval with a timed completion, cancellation and generic status moves.
///
/// Cheap to clone; every clone shares the same collaborators. Scheduled
/// completions hold a clone and re-enter [`TransmutationService`] from the
/// scheduler's worker threads.
#[derive(Clone)]
pub struct TransmutationService {
    repos: Repositories,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<TaskScheduler<u64>>,
    simulator: Simulator,
    // Serialises the active-check and create of Submit per alchemist.
    submit_locks: Arc<Mutex<HashMap<u64, Arc<Mutex<()>>>>>,
}

fn normalize_description(description: &str) -> String {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        PLACEHOLDER_DESCRIPTION.to_string()
    } else {
        trimmed.to_string()
    }
}

impl TransmutationService {
    pub fn new(
        repos: Repositories,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<TaskScheduler<u64>>,
        bounds: DurationBounds,
    ) -> Self {
        let simulator = Simulator::new(Arc::clone(&repos.materials), bounds);
        Self {
            repos,
            notifier,
            scheduler,
            simulator,
            submit_locks: Arc::default(),
        }
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler<u64>> {
        &self.scheduler
    }

    /// Price a request without creating anything.
    pub fn simulate(&self, request: &SimulationRequest) -> Result<Breakdown> {
        self.simulator.simulate(request)
    }

    /// Create a PENDING_APPROVAL transmutation for `requester_id`.
    pub fn submit(&self, requester_id: u64, request: SimulationRequest) -> Result<Transmutation> {
        let lock = self.submit_lock(requester_id);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.submit_locked(requester_id, request)
        };
        self.release_submit_lock(requester_id, lock);
        outcome
    }

    fn submit_locked(&self, requester_id: u64, mut request: SimulationRequest) -> Result<Transmutation> {
        let requester = self
            .repos
            .requesters
            .find_by_id(requester_id)?
            .ok_or(TransmuteError::RequesterNotFound(requester_id))?;
        if self
            .repos
            .transmutations
            .has_active(requester_id, &TransmutationStatus::ACTIVE)?
        {
            return Err(TransmuteError::AlreadyActive(requester_id));
        }

        request.description = normalize_description(&request.description);
        let breakdown = self.simulator.simulate(&request)?;

        let mut record = self.repos.transmutations.create(NewTransmutation {
            description: request.description,
            requester_id,
            estimated_cost: breakdown.estimated_cost,
            estimated_duration_secs: breakdown.duration_seconds,
        })?;

        let audit = AuditRecord::transmutation(
            AuditAction::TransmutationRequested,
            record.id,
            format!("Transmutation #{} requested by {}", record.id, requester.name),
        );
        if let Err(err) = self.repos.audits.append(audit) {
            if let Err(rollback) = self.repos.transmutations.delete(record.id) {
                error!(id = record.id, error = %rollback, "rollback of unaudited transmutation failed");
            }
            return Err(err.into());
        }

        info!(
            id = record.id,
            requester_id,
            cost = record.estimated_cost,
            duration_secs = record.estimated_duration_secs,
            "transmutation requested"
        );
        record.requester = Some(requester);
        self.announce(Topic::TransmutationStarted, &record);
        Ok(record)
    }

    /// Move transmutation `id` to the status named by `target`.
    pub fn update_status(&self, id: u64, target: &str) -> Result<Transmutation> {
        let target: TransmutationStatus = target.parse()?;
        let current = self.load(id)?;

        match StateMachine::plan(current.status, target)? {
            Transition::Unchanged => Ok(self.with_requester(current)),
            Transition::Approve => self.approve(current),
            Transition::Move { disarm } => self.move_to(current, target, disarm),
        }
    }

    /// Cancel transmutation `id`, stopping its completion timer if armed.
    pub fn cancel(&self, id: u64) -> Result<Transmutation> {
        let current = self.load(id)?;
        let disarm = StateMachine::plan_cancel(id, current.status)?;
        if disarm {
            self.scheduler.cancel(&current.requester_id);
        }

        let cancelled = TransmutationStatus::Cancelled;
        let record = match self
            .repos
            .transmutations
            .update_status(id, current.status, cancelled)?
        {
            StatusUpdate::Applied(record) => record,
            // Lost to a concurrent cancel.
            StatusUpdate::Stale(status) if status == cancelled => return self.find(id),
            StatusUpdate::Stale(status) if status.is_terminal() => {
                return Err(TransmuteError::AlreadyTerminal { id, status });
            }
            StatusUpdate::Stale(status) => {
                return Err(TransmuteError::InvalidTransition {
                    from: status,
                    to: cancelled,
                });
            }
            StatusUpdate::Missing => return Err(TransmuteError::TransmutationNotFound(id)),
        };
        let record = self.with_requester(record);

        self.repos.audits.append(AuditRecord::transmutation(
            AuditAction::TransmutationCancelled,
            id,
            format!("Transmutation #{id} cancelled (was {})", current.status),
        ))?;
        info!(id, from = %current.status, "transmutation cancelled");
        self.announce(Topic::TransmutationCancelled, &record);
        Ok(record)
    }

    pub fn find(&self, id: u64) -> Result<Transmutation> {
        self.load(id).map(|record| self.with_requester(record))
    }

    pub fn list(&self) -> Result<Vec<Transmutation>> {
        Ok(self
            .repos
            .transmutations
            .find_all()?
            .into_iter()
            .map(|record| self.with_requester(record))
            .collect())
    }

    fn approve(&self, current: Transmutation) -> Result<Transmutation> {
        let id = current.id;
        let Some(record) = self.swap_status(
            id,
            TransmutationStatus::PendingApproval,
            TransmutationStatus::InProgress,
        )?
        else {
            return self.find(id);
        };
        let record = self.with_requester(record);

        let audit = AuditRecord::transmutation(
            AuditAction::TransmutationApproved,
            id,
            format!("Transmutation #{id} approved for {}", record.requester_name()),
        );
        if let Err(err) = self.repos.audits.append(audit) {
            self.revert_approval(id);
            return Err(err.into());
        }
        if let Err(err) = self.arm_completion(&record) {
            self.revert_approval(id);
            return Err(err);
        }

        info!(
            id,
            requester_id = record.requester_id,
            completes_in_secs = record.estimated_duration_secs,
            "transmutation approved"
        );
        self.announce(Topic::TransmutationUpdated, &record);
        Ok(record)
    }

    fn move_to(&self, current: Transmutation, target: TransmutationStatus, disarm: bool) -> Result<Transmutation> {
        let id = current.id;
        if disarm {
            self.scheduler.cancel(&current.requester_id);
        }
        let Some(record) = self.swap_status(id, current.status, target)? else {
            return self.find(id);
        };
        let record = self.with_requester(record);

        self.repos.audits.append(AuditRecord::transmutation(
            AuditAction::TransmutationStatusUpdated,
            id,
            format!("Transmutation #{id} updated to {target}"),
        ))?;
        info!(id, from = %current.status, to = %target, "transmutation status updated");
        self.announce(Topic::TransmutationUpdated, &record);
        Ok(record)
    }

    /// Runs on a scheduler worker once the estimated duration elapsed.
    fn complete(&self, id: u64, requester_name: &str) -> Result<()> {
        match self.repos.transmutations.update_status(
            id,
            TransmutationStatus::InProgress,
            TransmutationStatus::Completed,
        )? {
            StatusUpdate::Applied(_) => {}
            StatusUpdate::Stale(status) => {
                warn!(id, %status, "completion skipped, transmutation no longer in progress");
                return Ok(());
            }
            StatusUpdate::Missing => return Err(TransmuteError::TransmutationNotFound(id)),
        }

        let audited = self.repos.audits.append(AuditRecord::transmutation(
            AuditAction::TransmutationCompleted,
            id,
            format!("Transmutation #{id} completed for {requester_name}"),
        ));
        match self.find(id) {
            Ok(updated) => self.announce(Topic::TransmutationCompleted, &updated),
            Err(err) => warn!(id, error = %err, "could not reload completed transmutation"),
        }
        info!(id, "transmutation completed");
        audited.map_err(Into::into)
    }

    fn arm_completion(&self, record: &Transmutation) -> Result<()> {
        let service = self.clone();
        let id = record.id;
        let requester_name = record.requester_name();
        let delay = Duration::from_secs(record.estimated_duration_secs);
        self.scheduler.schedule(record.requester_id, delay, move || async move {
            service
                .complete(id, &requester_name)
                .map_err(anyhow::Error::from)
        })?;
        Ok(())
    }

    fn revert_approval(&self, id: u64) {
        let reverted = self.repos.transmutations.update_status(
            id,
            TransmutationStatus::InProgress,
            TransmutationStatus::PendingApproval,
        );
        match reverted {
            Ok(StatusUpdate::Applied(_)) => warn!(id, "approval reverted"),
            Ok(other) => warn!(id, ?other, "approval revert found an unexpected status"),
            Err(err) => error!(id, error = %err, "approval revert failed"),
        }
    }

    /// Compare-and-set `from -> to`. `None` means a concurrent caller already
    /// made the same move.
    fn swap_status(
        &self,
        id: u64,
        from: TransmutationStatus,
        to: TransmutationStatus,
    ) -> Result<Option<Transmutation>> {
        match self.repos.transmutations.update_status(id, from, to)? {
            StatusUpdate::Applied(record) => Ok(Some(record)),
            StatusUpdate::Stale(status) if status == to => Ok(None),
            StatusUpdate::Stale(status) => Err(TransmuteError::InvalidTransition { from: status, to }),
            StatusUpdate::Missing => Err(TransmuteError::TransmutationNotFound(id)),
        }
    }

    fn load(&self, id: u64) -> Result<Transmutation> {
        self.repos
            .transmutations
            .find_by_id(id)?
            .ok_or(TransmuteError::TransmutationNotFound(id))
    }

    fn with_requester(&self, mut record: Transmutation) -> Transmutation {
        if record.requester.is_none() {
            match self.repos.requesters.find_by_id(record.requester_id) {
                Ok(found) => record.requester = found,
                Err(err) => debug!(id = record.id, error = %err, "alchemist lookup failed"),
            }
        }
        record
    }

    fn submit_lock(&self, requester_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self
            .submit_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(requester_id).or_default())
    }

    /// Forget the lock of `requester_id` once no other submit holds it.
    fn release_submit_lock(&self, requester_id: u64, lock: Arc<Mutex<()>>) {
        let mut locks = self
            .submit_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&requester_id);
        }
    }

    #[cfg(test)]
    fn submit_lock_count(&self) -> usize {
        self.submit_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn announce(&self, topic: Topic, record: &Transmutation) {
        let delivered = serde_json::to_value(record)
            .map_err(NotifyError::from)
            .and_then(|payload| self.notifier.emit(topic, payload));
        match delivered {
            Ok(listeners) => debug!(%topic, id = record.id, listeners, "notification emitted"),
            Err(err) => warn!(%topic, id = record.id, error = %err, "notification dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Requester;
    use crate::notify::NotificationHub;
    use crate::repository::{AuditRepository, MemoryStore, RepoResult, RepositoryError, TransmutationRepository};
    use crate::scheduler::TaskFailure;
    use tokio::runtime::Handle;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Arc<NotificationHub>,
        service: TransmutationService,
        alchemist: Requester,
    }

    /// Audit store that refuses one action and forwards the rest.
    struct RejectingAudits {
        inner: Arc<MemoryStore>,
        reject: AuditAction,
    }

    impl AuditRepository for RejectingAudits {
        fn append(&self, record: AuditRecord) -> RepoResult<()> {
            if record.action == self.reject {
                return Err(RepositoryError::Unavailable("audit store down".into()));
            }
            self.inner.append(record)
        }

        fn find_all(&self) -> RepoResult<Vec<AuditRecord>> {
            AuditRepository::find_all(self.inner.as_ref())
        }
    }

    fn build(
        audit_reject: Option<AuditAction>,
        scheduler: TaskScheduler<u64>,
        bounds: DurationBounds,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alchemist = store.insert_requester("Edward Elric").unwrap();
        let mut repos = Repositories::in_memory(Arc::clone(&store));
        if let Some(reject) = audit_reject {
            repos.audits = Arc::new(RejectingAudits {
                inner: Arc::clone(&store),
                reject,
            });
        }
        let hub = Arc::new(NotificationHub::new(16));
        let service = TransmutationService::new(repos, hub.clone(), Arc::new(scheduler), bounds);
        Fixture {
            store,
            hub,
            service,
            alchemist,
        }
    }

    fn fixture() -> Fixture {
        build(None, TaskScheduler::new(Handle::current()), DurationBounds::new(1, 1))
    }

    fn actions(store: &MemoryStore) -> Vec<AuditAction> {
        AuditRepository::find_all(store)
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect()
    }

    fn transmutation_count(store: &MemoryStore) -> usize {
        TransmutationRepository::find_all(store).unwrap().len()
    }

    #[tokio::test]
    async fn submit_blank_description_prices_placeholder() {
        let f = fixture();
        let mut rx = f.hub.subscribe();

        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();

        assert_eq!(t.status, TransmutationStatus::PendingApproval);
        assert_eq!(t.description, PLACEHOLDER_DESCRIPTION);
        assert_eq!(t.estimated_cost, 33.6);
        assert_eq!(t.estimated_duration_secs, 1);
        assert_eq!(t.requester.as_ref().map(|r| r.name.as_str()), Some("Edward Elric"));
        assert_eq!(actions(&f.store), vec![AuditAction::TransmutationRequested]);

        let note = rx.try_recv().unwrap();
        assert_eq!(note.topic, Topic::TransmutationStarted);
        assert_eq!(note.payload["id"], t.id);
    }

    #[tokio::test]
    async fn one_active_transmutation_per_alchemist() {
        let f = fixture();
        let first = f.service.submit(f.alchemist.id, SimulationRequest::new("Mend a radio")).unwrap();

        let err = f
            .service
            .submit(f.alchemist.id, SimulationRequest::new("Mend another radio"))
            .unwrap_err();
        assert!(matches!(err, TransmuteError::AlreadyActive(id) if id == f.alchemist.id));

        f.service.cancel(first.id).unwrap();
        let second = f
            .service
            .submit(f.alchemist.id, SimulationRequest::new("Mend another radio"))
            .unwrap();
        assert_eq!(second.status, TransmutationStatus::PendingApproval);
    }

    #[tokio::test]
    async fn unknown_alchemist_is_not_found() {
        let f = fixture();
        let err = f.service.submit(404, SimulationRequest::default()).unwrap_err();
        assert!(matches!(err, TransmuteError::RequesterNotFound(404)));
    }

    #[tokio::test]
    async fn simulation_errors_create_nothing() {
        let f = fixture();
        let mut request = SimulationRequest::new("Mend a radio");
        request.complexity = Some("banana".into());

        let err = f.service.submit(f.alchemist.id, request).unwrap_err();
        assert!(matches!(err, TransmuteError::InvalidComplexity(_)));
        assert_eq!(transmutation_count(&f.store), 0);
    }

    #[tokio::test]
    async fn failed_request_audit_rolls_back() {
        let f = build(
            Some(AuditAction::TransmutationRequested),
            TaskScheduler::new(Handle::current()),
            DurationBounds::new(1, 1),
        );
        let err = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap_err();
        assert!(matches!(err, TransmuteError::Repository(_)));
        assert_eq!(transmutation_count(&f.store), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn approval_completes_after_estimated_duration() {
        let f = fixture();
        let mut rx = f.hub.subscribe();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();

        let approved = f.service.update_status(t.id, "in_progress").unwrap();
        assert_eq!(approved.status, TransmutationStatus::InProgress);
        assert!(f.service.scheduler().is_pending(&f.alchemist.id));

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(f.service.find(t.id).unwrap().status, TransmutationStatus::Completed);
        assert_eq!(
            actions(&f.store),
            vec![
                AuditAction::TransmutationRequested,
                AuditAction::TransmutationApproved,
                AuditAction::TransmutationCompleted,
            ]
        );
        let topics: Vec<Topic> = std::iter::from_fn(|| rx.try_recv().ok()).map(|n| n.topic).collect();
        assert_eq!(
            topics,
            vec![
                Topic::TransmutationStarted,
                Topic::TransmutationUpdated,
                Topic::TransmutationCompleted,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_in_progress_stops_completion() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        f.service.update_status(t.id, "IN_PROGRESS").unwrap();

        let cancelled = f.service.cancel(t.id).unwrap();
        assert_eq!(cancelled.status, TransmutationStatus::Cancelled);
        assert!(!f.service.scheduler().is_pending(&f.alchemist.id));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.service.find(t.id).unwrap().status, TransmutationStatus::Cancelled);
        assert!(!actions(&f.store).contains(&AuditAction::TransmutationCompleted));
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_in_progress_by_update_disarms_timer() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        f.service.update_status(t.id, "IN_PROGRESS").unwrap();

        let failed = f.service.update_status(t.id, "failed").unwrap();
        assert_eq!(failed.status, TransmutationStatus::Failed);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.service.find(t.id).unwrap().status, TransmutationStatus::Failed);
        assert_eq!(
            actions(&f.store).last(),
            Some(&AuditAction::TransmutationStatusUpdated)
        );
    }

    #[tokio::test]
    async fn pending_may_complete_directly() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        let done = f.service.update_status(t.id, "COMPLETED").unwrap();
        assert_eq!(done.status, TransmutationStatus::Completed);
        assert_eq!(f.service.scheduler().pending_count(), 0);
    }

    #[tokio::test]
    async fn same_status_is_a_noop() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        let same = f.service.update_status(t.id, "pending_approval").unwrap();
        assert_eq!(same.status, TransmutationStatus::PendingApproval);
        assert_eq!(actions(&f.store).len(), 1);
    }

    #[tokio::test]
    async fn illegal_and_unknown_targets() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();

        assert!(matches!(
            f.service.update_status(t.id, "DONE"),
            Err(TransmuteError::InvalidStatus(_))
        ));
        assert!(matches!(
            f.service.update_status(999, "FAILED"),
            Err(TransmuteError::TransmutationNotFound(999))
        ));

        f.service.update_status(t.id, "COMPLETED").unwrap();
        assert!(matches!(
            f.service.update_status(t.id, "IN_PROGRESS"),
            Err(TransmuteError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.service.cancel(t.id),
            Err(TransmuteError::AlreadyTerminal { status: TransmutationStatus::Completed, .. })
        ));
        assert!(matches!(f.service.cancel(999), Err(TransmuteError::TransmutationNotFound(999))));
    }

    #[tokio::test]
    async fn scheduler_failure_reverts_approval() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        f.service.scheduler().shutdown();

        let err = f.service.update_status(t.id, "IN_PROGRESS").unwrap_err();
        assert!(matches!(err, TransmuteError::Scheduler(_)));
        assert_eq!(f.service.find(t.id).unwrap().status, TransmutationStatus::PendingApproval);
    }

    #[tokio::test]
    async fn approval_audit_failure_reverts_approval() {
        let f = build(
            Some(AuditAction::TransmutationApproved),
            TaskScheduler::new(Handle::current()),
            DurationBounds::new(1, 1),
        );
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();

        assert!(f.service.update_status(t.id, "IN_PROGRESS").is_err());
        assert_eq!(f.service.find(t.id).unwrap().status, TransmutationStatus::PendingApproval);
        assert_eq!(f.service.scheduler().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_audit_failure_is_reported() {
        let reported: Arc<Mutex<Vec<TaskFailure<u64>>>> = Arc::default();
        let sink = Arc::clone(&reported);
        let scheduler = TaskScheduler::with_failure_hook(
            Handle::current(),
            Arc::new(move |failure: TaskFailure<u64>| sink.lock().unwrap().push(failure)),
        );
        let f = build(
            Some(AuditAction::TransmutationCompleted),
            scheduler,
            DurationBounds::new(1, 1),
        );
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        f.service.update_status(t.id, "IN_PROGRESS").unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(f.service.find(t.id).unwrap().status, TransmutationStatus::Completed);
        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].key, f.alchemist.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_submits_admit_one() {
        let f = fixture();
        let outcomes: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let service = f.service.clone();
                    let requester_id = f.alchemist.id;
                    scope.spawn(move || {
                        service
                            .submit(requester_id, SimulationRequest::new(format!("Attempt {i}")))
                            .is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(transmutation_count(&f.store), 1);
        assert_eq!(f.service.submit_lock_count(), 0);
    }

    #[tokio::test]
    async fn submit_locks_are_released() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap_err();
        f.service.submit(999, SimulationRequest::default()).unwrap_err();
        f.service.cancel(t.id).unwrap();
        assert_eq!(f.service.submit_lock_count(), 0);
    }

    #[tokio::test]
    async fn cancelling_twice_audits_and_announces_twice() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        let mut rx = f.hub.subscribe();

        f.service.cancel(t.id).unwrap();
        let again = f.service.cancel(t.id).unwrap();
        assert_eq!(again.status, TransmutationStatus::Cancelled);

        let cancels = actions(&f.store)
            .into_iter()
            .filter(|a| *a == AuditAction::TransmutationCancelled)
            .count();
        assert_eq!(cancels, 2);
        for _ in 0..2 {
            assert_eq!(rx.try_recv().unwrap().topic, Topic::TransmutationCancelled);
        }
    }

    #[tokio::test]
    async fn completion_after_cancel_is_skipped() {
        let f = fixture();
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        f.service.update_status(t.id, "IN_PROGRESS").unwrap();
        f.service.cancel(t.id).unwrap();

        f.service.complete(t.id, "Edward Elric").unwrap();

        assert_eq!(f.service.find(t.id).unwrap().status, TransmutationStatus::Cancelled);
        assert!(!actions(&f.store).contains(&AuditAction::TransmutationCompleted));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_approvals_and_cancels_move_once() {
        let f = build(
            None,
            TaskScheduler::new(Handle::current()),
            DurationBounds::new(600, 600),
        );
        let t = f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();

        let outcomes: Vec<Result<Transmutation>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..12)
                .map(|i| {
                    let service = f.service.clone();
                    let id = t.id;
                    scope.spawn(move || {
                        if i % 2 == 0 {
                            service.update_status(id, "IN_PROGRESS")
                        } else {
                            service.cancel(id)
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for outcome in &outcomes {
            if let Err(err) = outcome {
                assert!(matches!(err, TransmuteError::InvalidTransition { .. }), "{err}");
            }
        }

        let trail = AuditRepository::find_all(f.store.as_ref()).unwrap();
        let approvals = trail
            .iter()
            .filter(|r| r.action == AuditAction::TransmutationApproved)
            .count();
        let first_cancels: Vec<&AuditRecord> = trail
            .iter()
            .filter(|r| r.action == AuditAction::TransmutationCancelled)
            .filter(|r| !r.description.ends_with("(was CANCELLED)"))
            .collect();
        assert!(approvals <= 1);
        assert!(first_cancels.len() <= 1);

        let last = f.service.find(t.id).unwrap();
        match last.status {
            TransmutationStatus::Cancelled => {
                assert_eq!(first_cancels.len(), 1);
                let was = if approvals == 1 { "(was IN_PROGRESS)" } else { "(was PENDING_APPROVAL)" };
                assert!(first_cancels[0].description.ends_with(was));
            }
            TransmutationStatus::InProgress => {
                assert_eq!(approvals, 1);
                assert!(first_cancels.is_empty());
                assert!(f.service.scheduler().is_pending(&f.alchemist.id));
            }
            other => panic!("unexpected final status {other}"),
        }
    }

    #[tokio::test]
    async fn list_attaches_alchemist() {
        let f = fixture();
        f.service.submit(f.alchemist.id, SimulationRequest::default()).unwrap();
        let all = f.service.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].requester_name(), "Edward Elric");
    }
}
