//! Task-queue transport.

use super::Transport;
use async_trait::async_trait;
use hataori_core::{ActivityName, ActivityProvider, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One queued activity call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTask {
    /// Task identifier, used to collect the result.
    pub id: String,
    /// Activity to run.
    pub name: ActivityName,
    /// Activity input.
    pub args: Value,
}

/// Backing store of a task queue.
#[async_trait]
pub trait QueueStorage: Send + Sync + fmt::Debug {
    /// Appends a task.
    async fn push_task(&self, task: QueueTask) -> Result<(), WorkflowError>;

    /// Removes and returns the oldest pending task, if any.
    async fn pop_task(&self) -> Result<Option<QueueTask>, WorkflowError>;

    /// Records the outcome of a task. Failures are stored as their message.
    async fn complete_task(
        &self,
        id: &str,
        result: Result<Value, String>,
    ) -> Result<(), WorkflowError>;

    /// Waits until the task completes and returns its result.
    ///
    /// A stored failure is returned as [`WorkflowError::Remote`].
    async fn task_result(&self, id: &str) -> Result<Value, WorkflowError>;
}

/// Commands handed to a [`QueueManager`] for one worker iteration.
#[derive(Debug, Clone, Copy)]
pub struct QueueCommands<'a> {
    queue: &'a dyn QueueStorage,
    delegate: &'a dyn ActivityProvider,
}

impl QueueCommands<'_> {
    /// Takes the next pending task, if any.
    pub async fn take_task(&self) -> Result<Option<QueueTask>, WorkflowError> {
        self.queue.pop_task().await
    }

    /// Runs `task` on the worker's provider and records the outcome.
    ///
    /// An activity failure is stored on the task for the caller; only a
    /// failure to record the outcome is returned here.
    pub async fn complete_task(&self, task: QueueTask) -> Result<(), WorkflowError> {
        let result = self
            .delegate
            .activity_result(&task.name, task.args)
            .await
            .map_err(|error| {
                warn!(task = %task.id, activity = %task.name, "queued activity failed: {}", error);
                error.to_string()
            });
        debug!(task = %task.id, activity = %task.name, "task completed");
        self.queue.complete_task(&task.id, result).await
    }
}

/// Strategy deciding how a worker takes and completes tasks.
///
/// The worker calls [`iterate`](Self::iterate) once per loop iteration until
/// it is stopped.
#[async_trait]
pub trait QueueManager: Send + Sync + fmt::Debug {
    /// Runs one worker iteration.
    async fn iterate(&self, commands: QueueCommands<'_>) -> Result<(), WorkflowError>;
}

/// Configuration of the [`PollingQueueManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueWorkerConfig {
    /// Pause after finding the queue empty.
    pub poll_interval: Duration,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl QueueWorkerConfig {
    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Takes one task per iteration and sleeps when the queue is empty.
#[derive(Debug, Clone, Default)]
pub struct PollingQueueManager {
    config: QueueWorkerConfig,
}

impl PollingQueueManager {
    /// Creates a manager with the given configuration.
    pub fn new(config: QueueWorkerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl QueueManager for PollingQueueManager {
    async fn iterate(&self, commands: QueueCommands<'_>) -> Result<(), WorkflowError> {
        match commands.take_task().await? {
            Some(task) => commands.complete_task(task).await,
            None => {
                tokio::time::sleep(self.config.poll_interval).await;
                Ok(())
            }
        }
    }
}

/// Transport moving activity calls through a [`QueueStorage`].
///
/// Callers push a task and wait for its result; workers run a loop driven by
/// a [`QueueManager`] until [`stop_worker`](Self::stop_worker) is called.
#[derive(Debug)]
pub struct QueueTransport {
    queue: Arc<dyn QueueStorage>,
    manager: Arc<dyn QueueManager>,
    stopped: AtomicBool,
}

impl QueueTransport {
    /// Creates a transport with the default [`PollingQueueManager`].
    pub fn new<Q>(queue: Q) -> Self
    where
        Q: QueueStorage + 'static,
    {
        Self::with_manager(queue, PollingQueueManager::default())
    }

    /// Creates a transport with a custom queue manager.
    pub fn with_manager<Q, M>(queue: Q, manager: M) -> Self
    where
        Q: QueueStorage + 'static,
        M: QueueManager + 'static,
    {
        Self {
            queue: Arc::new(queue),
            manager: Arc::new(manager),
            stopped: AtomicBool::new(false),
        }
    }

    /// Ends the worker loop after the current iteration.
    pub fn stop_worker(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

#[async_trait]
impl Transport for QueueTransport {
    async fn send(&self, activity: &ActivityName, input: Value) -> Result<Value, WorkflowError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.queue
            .push_task(QueueTask {
                id: id.clone(),
                name: activity.clone(),
                args: input,
            })
            .await?;
        debug!(task = %id, activity = %activity, "task queued");
        self.queue.task_result(&id).await
    }

    async fn serve(&self, delegate: Arc<dyn ActivityProvider>) -> Result<(), WorkflowError> {
        info!(manager = ?self.manager, "queue worker started");
        while !self.stopped.load(Ordering::Acquire) {
            let commands = QueueCommands {
                queue: self.queue.as_ref(),
                delegate: delegate.as_ref(),
            };
            self.manager.iterate(commands).await?;
        }
        info!("queue worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueue;
    use crate::provider::FunctionProvider;
    use serde_json::json;

    fn worker_provider() -> Arc<dyn ActivityProvider> {
        Arc::new(
            FunctionProvider::new()
                .activity("inc", |x: i64| async move { Ok(x + 1) })
                .activity("fail", |_: Value| async move {
                    Err::<Value, _>(WorkflowError::activity("fail", "no budget"))
                }),
        )
    }

    #[tokio::test]
    async fn test_manager_completes_one_task_per_iteration() {
        let queue = MemoryQueue::new();
        queue
            .push_task(QueueTask {
                id: "t-1".to_string(),
                name: "inc".into(),
                args: json!(41),
            })
            .await
            .unwrap();

        let delegate = worker_provider();
        let commands = QueueCommands {
            queue: &queue,
            delegate: delegate.as_ref(),
        };
        PollingQueueManager::default().iterate(commands).await.unwrap();

        assert_eq!(queue.task_result("t-1").await.unwrap(), json!(42));
        assert_eq!(queue.pop_task().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_activity_failure_is_stored_for_the_caller() {
        let queue = MemoryQueue::new();
        let worker = Arc::new(QueueTransport::new(queue.clone()));
        let serving = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.serve(worker_provider()).await })
        };

        let caller = QueueTransport::new(queue);
        let error = caller
            .send(&"fail".into(), Value::Null)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            WorkflowError::Remote("Activity fail failed: no budget".to_string())
        );
        assert_eq!(caller.send(&"inc".into(), json!(1)).await.unwrap(), json!(2));

        worker.stop_worker();
        tokio_test::assert_ok!(serving.await.unwrap());
    }

    #[tokio::test]
    async fn test_stopped_worker_returns_immediately() {
        let worker = QueueTransport::with_manager(
            MemoryQueue::new(),
            PollingQueueManager::new(
                QueueWorkerConfig::default().with_poll_interval(Duration::from_millis(5)),
            ),
        );
        worker.stop_worker();
        tokio_test::assert_ok!(worker.serve(worker_provider()).await);
    }
}
