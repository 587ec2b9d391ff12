//! Completion channel between external job observers and awaiting runners.
//!
//! A runner registers `(run_id, activity_id)` before its job exists and then waits on the
//! returned [`PendingActivity`]. Observers report progress with
//! [`CompletionChannel::heartbeat`] and the final outcome with [`CompletionChannel::complete`].
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use ctrl_model::{ActivityId, ExecutionResult, RunId};
use tokio::sync::{oneshot, watch};
use tracing::trace;

use crate::error::CompletionError;

/// Sink for out-of-band activity notifications.
#[async_trait]
pub trait CompletionChannel: Send + Sync + 'static {
    /// Extend the liveness of an activity.
    async fn heartbeat(&self, run_id: &str, activity_id: &str) -> Result<(), CompletionError>;

    /// Resolve an activity with its final result.
    async fn complete(
        &self,
        run_id: &str,
        activity_id: &str,
        result: ExecutionResult,
    ) -> Result<(), CompletionError>;
}

/// Address of a registered activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityKey {
    pub run_id: RunId,
    pub activity_id: ActivityId,
}

impl ActivityKey {
    pub fn new(run_id: impl Into<RunId>, activity_id: impl Into<ActivityId>) -> Self {
        Self {
            run_id: run_id.into(),
            activity_id: activity_id.into(),
        }
    }
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.activity_id)
    }
}

/// Receiving side of a registered activity.
pub struct PendingActivity {
    pub key: ActivityKey,
    pub completion: oneshot::Receiver<ExecutionResult>,
    pub heartbeats: watch::Receiver<u64>,
}

struct Entry {
    completion: oneshot::Sender<ExecutionResult>,
    heartbeat: watch::Sender<u64>,
}

/// In-process [`CompletionChannel`] backed by a registration table.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    inner: Arc<Mutex<HashMap<ActivityKey, Entry>>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity and get the handles to await it.
    ///
    /// Registering an existing key replaces the previous registration.
    pub fn register(
        &self,
        run_id: impl Into<RunId>,
        activity_id: impl Into<ActivityId>,
    ) -> PendingActivity {
        let key = ActivityKey::new(run_id, activity_id);
        let (completion_tx, completion_rx) = oneshot::channel();
        let (heartbeat_tx, heartbeat_rx) = watch::channel(0);

        self.lock().insert(
            key.clone(),
            Entry {
                completion: completion_tx,
                heartbeat: heartbeat_tx,
            },
        );
        trace!(activity = %key, "activity registered");

        PendingActivity {
            key,
            completion: completion_rx,
            heartbeats: heartbeat_rx,
        }
    }

    /// Drop a registration. Returns `true` if it was still present.
    pub fn cancel(&self, key: &ActivityKey) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &ActivityKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ActivityKey, Entry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_found(run_id: &str, activity_id: &str) -> CompletionError {
    CompletionError::NotFound {
        run_id: run_id.to_string(),
        activity_id: activity_id.to_string(),
    }
}

#[async_trait]
impl CompletionChannel for ActivityRegistry {
    async fn heartbeat(&self, run_id: &str, activity_id: &str) -> Result<(), CompletionError> {
        let key = ActivityKey::new(run_id, activity_id);
        let map = self.lock();
        let entry = map.get(&key).ok_or_else(|| not_found(run_id, activity_id))?;
        if entry.heartbeat.is_closed() {
            return Err(not_found(run_id, activity_id));
        }
        entry.heartbeat.send_modify(|n| *n = n.wrapping_add(1));
        Ok(())
    }

    async fn complete(
        &self,
        run_id: &str,
        activity_id: &str,
        result: ExecutionResult,
    ) -> Result<(), CompletionError> {
        let key = ActivityKey::new(run_id, activity_id);
        let entry = self
            .lock()
            .remove(&key)
            .ok_or_else(|| not_found(run_id, activity_id))?;

        entry
            .completion
            .send(result)
            .map_err(|_| not_found(run_id, activity_id))?;
        trace!(activity = %key, "activity completed");
        Ok(())
    }
}
