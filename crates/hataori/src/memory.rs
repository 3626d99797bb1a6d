//! In-memory storage and queue backends.
//!
//! Both keep their state behind a [`SerializedAccess`], so concurrent
//! callers never interleave inside one read-modify-write.

use crate::access::SerializedAccess;
use crate::protocol::{QueueStorage, QueueTask};
use async_trait::async_trait;
use hataori_core::{
    ActivityId, ActivityKey, ActivityName, ActivityStorage, ProviderName, WorkflowError,
    WorkflowId, WorkflowName, WorkflowRecord, WorkflowStorage,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

type WorkflowKey = (WorkflowName, WorkflowId);

// Activity records are keyed by the full invocation identity, args included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InvocationKey {
    provider: ProviderName,
    activity: ActivityName,
    activity_id: ActivityId,
    args: String,
}

impl InvocationKey {
    fn of(key: &ActivityKey) -> Self {
        Self {
            provider: key.provider.clone(),
            activity: key.activity.clone(),
            activity_id: key.activity_id.clone(),
            args: key.args.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Records {
    workflows: HashMap<WorkflowKey, WorkflowRecord>,
    workflow_data: HashMap<WorkflowKey, Value>,
    activities: HashMap<InvocationKey, Value>,
    activity_data: HashMap<InvocationKey, Value>,
}

/// Storage implementing both contracts in process memory.
///
/// Cloning yields a handle to the same records. Must be created from within
/// a Tokio runtime.
#[derive(Clone)]
pub struct MemoryStorage {
    records: SerializedAccess<Records>,
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self {
            records: SerializedAccess::new(Records::default()),
        }
    }

    /// Number of stored workflow records.
    pub async fn workflow_count(&self) -> Result<usize, WorkflowError> {
        self.records
            .access_sync(|records| Ok(records.workflows.len()))
            .await
    }

    /// Number of stored activity results.
    pub async fn activity_count(&self) -> Result<usize, WorkflowError> {
        self.records
            .access_sync(|records| Ok(records.activities.len()))
            .await
    }
}

#[async_trait]
impl WorkflowStorage for MemoryStorage {
    async fn get_workflow(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowRecord>, WorkflowError> {
        let key = (name.clone(), id.clone());
        self.records
            .access_sync(move |records| Ok(records.workflows.get(&key).cloned()))
            .await
    }

    async fn set_workflow(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
        record: WorkflowRecord,
    ) -> Result<(), WorkflowError> {
        let key = (name.clone(), id.clone());
        self.records
            .access_sync(move |records| {
                records.workflows.insert(key, record);
                Ok(())
            })
            .await
    }

    async fn get_workflow_additional_data(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
    ) -> Result<Option<Value>, WorkflowError> {
        let key = (name.clone(), id.clone());
        self.records
            .access_sync(move |records| Ok(records.workflow_data.get(&key).cloned()))
            .await
    }

    async fn set_workflow_additional_data(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
        data: Value,
    ) -> Result<(), WorkflowError> {
        let key = (name.clone(), id.clone());
        self.records
            .access_sync(move |records| {
                records.workflow_data.insert(key, data);
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl ActivityStorage for MemoryStorage {
    async fn get_activity(&self, key: &ActivityKey) -> Result<Option<Value>, WorkflowError> {
        let key = InvocationKey::of(key);
        self.records
            .access_sync(move |records| Ok(records.activities.get(&key).cloned()))
            .await
    }

    async fn set_activity(&self, key: &ActivityKey, result: Value) -> Result<(), WorkflowError> {
        let key = InvocationKey::of(key);
        self.records
            .access_sync(move |records| {
                records.activities.insert(key, result);
                Ok(())
            })
            .await
    }

    async fn get_activity_additional_data(
        &self,
        key: &ActivityKey,
    ) -> Result<Option<Value>, WorkflowError> {
        let key = InvocationKey::of(key);
        self.records
            .access_sync(move |records| Ok(records.activity_data.get(&key).cloned()))
            .await
    }

    async fn set_activity_additional_data(
        &self,
        key: &ActivityKey,
        data: Value,
    ) -> Result<(), WorkflowError> {
        let key = InvocationKey::of(key);
        self.records
            .access_sync(move |records| {
                records.activity_data.insert(key, data);
                Ok(())
            })
            .await
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueTask>,
    results: HashMap<String, Result<Value, String>>,
}

/// In-process task queue.
///
/// Cloning yields a handle to the same queue, so callers and workers in one
/// process can share it. Must be created from within a Tokio runtime.
#[derive(Clone)]
pub struct MemoryQueue {
    state: SerializedAccess<QueueState>,
    completed: Arc<Notify>,
}

impl fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryQueue").finish_non_exhaustive()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: SerializedAccess::new(QueueState::default()),
            completed: Arc::new(Notify::new()),
        }
    }

    /// Number of tasks waiting for a worker.
    pub async fn pending_count(&self) -> Result<usize, WorkflowError> {
        self.state
            .access_sync(|state| Ok(state.pending.len()))
            .await
    }
}

#[async_trait]
impl QueueStorage for MemoryQueue {
    async fn push_task(&self, task: QueueTask) -> Result<(), WorkflowError> {
        self.state
            .access_sync(move |state| {
                state.pending.push_back(task);
                Ok(())
            })
            .await
    }

    async fn pop_task(&self) -> Result<Option<QueueTask>, WorkflowError> {
        self.state
            .access_sync(|state| Ok(state.pending.pop_front()))
            .await
    }

    async fn complete_task(
        &self,
        id: &str,
        result: Result<Value, String>,
    ) -> Result<(), WorkflowError> {
        let id = id.to_string();
        self.state
            .access_sync(move |state| {
                state.results.insert(id, result);
                Ok(())
            })
            .await?;
        self.completed.notify_waiters();
        Ok(())
    }

    async fn task_result(&self, id: &str) -> Result<Value, WorkflowError> {
        loop {
            // register interest before looking, so a completion in between
            // still wakes us
            let completed = self.completed.notified();
            tokio::pin!(completed);
            completed.as_mut().enable();

            let lookup = id.to_string();
            let result = self
                .state
                .access_sync(move |state| Ok(state.results.remove(&lookup)))
                .await?;
            if let Some(result) = result {
                return result.map_err(WorkflowError::Remote);
            }
            completed.await;
        }
    }
}
