//! Single home for every deadline in the server.
//!
//! Room expiry, invite expiry, inactivity warnings, forced timeouts and
//! lockout resets are all entries in one task table keyed by
//! `(TaskKind, id)`. Refreshing a deadline is one `schedule` call that
//! atomically replaces the previous task, so no component keeps its own
//! timer-handle bookkeeping.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

/// What a delayed task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    RoomExpiry,
    InviteExpiry,
    InactivityWarning,
    SessionTimeout,
    LockoutReset,
}

struct Entry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Cancellable delayed tasks, at most one live task per key.
#[derive(Clone, Default)]
pub struct Scheduler {
    tasks: Arc<DashMap<(TaskKind, String), Entry>>,
    next_generation: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` after `delay`. A pending task under the same key is
    /// aborted first, so refresh is a plain replace. A task that already
    /// started running cannot be stopped; actions must re-validate their
    /// own deadline against current state when they fire.
    pub fn schedule<F>(&self, kind: TaskKind, id: impl Into<String>, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = (kind, id.into());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
            // Deregister ourselves, but never a newer task that replaced us.
            tasks.remove_if(&task_key, |_, entry| entry.generation == generation);
        });
        let finished = handle.is_finished();
        if let Some(old) = self.tasks.insert(key.clone(), Entry { generation, handle }) {
            old.handle.abort();
        }
        // A zero-delay task can complete before the insert above lands.
        if finished {
            self.tasks.remove_if(&key, |_, entry| entry.generation == generation);
        }
    }

    /// Cancels the pending task under `key`, if any. Returns whether a
    /// task was actually cancelled. Cancelling a task that is mid-fire
    /// does nothing; see `schedule` for the re-validation contract.
    pub fn cancel(&self, kind: TaskKind, id: &str) -> bool {
        match self.tasks.remove(&(kind, id.to_string())) {
            Some((_, entry)) => {
                entry.handle.abort();
                true
            },
            None => false,
        }
    }

    /// Number of tasks currently registered.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}
