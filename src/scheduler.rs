//! Per-key delayed task scheduler.
//!
//! At most one timer exists per key. Scheduling under an occupied key replaces
//! the previous timer; cancelling removes it. A timer must claim its slot
//! under the map lock before running, so a timer that was replaced or
//! cancelled before it fired can never run its action.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Result type of a scheduled action.
pub type TaskResult = anyhow::Result<()>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    Closed,
}

/// A scheduled action that returned an error.
#[derive(Debug)]
pub struct TaskFailure<K> {
    pub key: K,
    pub error: anyhow::Error,
}

/// Receives failures of scheduled actions. Failures are never retried.
pub type FailureHook<K> = Arc<dyn Fn(TaskFailure<K>) + Send + Sync>;

struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Slots<K> {
    by_key: HashMap<K, Slot>,
    next_generation: u64,
    closed: bool,
}

fn lock<K>(slots: &Mutex<Slots<K>>) -> MutexGuard<'_, Slots<K>> {
    // The map stays consistent even if a holder panicked: every mutation is a
    // single insert or remove.
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TaskScheduler<K> {
    slots: Arc<Mutex<Slots<K>>>,
    runtime: Handle,
    on_failure: FailureHook<K>,
}

impl<K> TaskScheduler<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Create a scheduler whose timers run on `runtime`. Failures are logged.
    pub fn new(runtime: Handle) -> Self {
        Self::with_failure_hook(
            runtime,
            Arc::new(|failure: TaskFailure<K>| {
                error!(key = ?failure.key, error = %failure.error, "scheduled task failed");
            }),
        )
    }

    pub fn with_failure_hook(runtime: Handle, on_failure: FailureHook<K>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                by_key: HashMap::new(),
                next_generation: 0,
                closed: false,
            })),
            runtime,
            on_failure,
        }
    }

    /// Run `action` once after `delay` under `key`, replacing any timer
    /// already installed for that key.
    pub fn schedule<F, Fut>(&self, key: K, delay: Duration, action: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        if slots.closed {
            return Err(SchedulerError::Closed);
        }
        slots.next_generation += 1;
        let generation = slots.next_generation;

        let shared = Arc::clone(&self.slots);
        let on_failure = Arc::clone(&self.on_failure);
        let task_key = key.clone();
        // The spawned task cannot claim its slot before we release the lock,
        // so the insert below always lands first even for a zero delay.
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slots = lock(&shared);
                let owns_slot = slots
                    .by_key
                    .get(&task_key)
                    .is_some_and(|slot| slot.generation == generation);
                if !owns_slot {
                    return;
                }
                slots.by_key.remove(&task_key);
            }
            debug!(key = ?task_key, "scheduled task firing");
            if let Err(error) = action().await {
                on_failure(TaskFailure {
                    key: task_key,
                    error,
                });
            }
        });

        if let Some(previous) = slots.by_key.insert(key.clone(), Slot { generation, handle }) {
            previous.handle.abort();
            debug!(?key, "replaced pending task");
        }
        debug!(?key, delay_ms = delay.as_millis() as u64, "task scheduled");
        Ok(())
    }

    /// Stop the timer under `key` before it fires. Returns whether one was
    /// pending. A task that already started is not interrupted.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.slots).by_key.remove(key) {
            Some(slot) => {
                slot.handle.abort();
                debug!(?key, "task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.slots).by_key.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.slots).by_key.len()
    }

    /// Cancel every pending timer and refuse new ones.
    pub fn shutdown(&self) {
        let mut slots = lock(&self.slots);
        slots.closed = true;
        let cancelled = slots.by_key.len();
        for (_, slot) in slots.by_key.drain() {
            slot.handle.abort();
        }
        if cancelled > 0 {
            warn!(cancelled, "scheduler shut down with pending tasks");
        }
    }
}

impl<K> Drop for TaskScheduler<K> {
    fn drop(&mut self) {
        for (_, slot) in lock(&self.slots).by_key.drain() {
            slot.handle.abort();
        }
    }
}
