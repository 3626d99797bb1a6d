//! Protocol providers: activities executed by remote workers.
//!
//! A [`ProtocolProvider`] plays two roles over one [`Transport`]. On the
//! caller side it forwards every activity call through the transport. On the
//! worker side, once a delegate provider is set and
//! [`start_working`](ProtocolProvider::start_working) is called, it serves
//! incoming calls from the delegate and answers local calls directly.

#[cfg(feature = "http")]
mod http;
mod queue;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use queue::{
    PollingQueueManager, QueueCommands, QueueManager, QueueStorage, QueueTask, QueueTransport,
    QueueWorkerConfig,
};

use async_trait::async_trait;
use hataori_core::{ActivityName, ActivityProvider, WorkflowError};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tracing::info;

/// Moves activity calls between a caller and a worker.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Caller side: delivers one call and returns the worker's result.
    async fn send(&self, activity: &ActivityName, input: Value) -> Result<Value, WorkflowError>;

    /// Worker side: serves calls from `delegate` until the transport stops.
    async fn serve(&self, delegate: Arc<dyn ActivityProvider>) -> Result<(), WorkflowError>;
}

/// An activity provider whose activities run behind a [`Transport`].
///
/// # Examples
///
/// ```
/// use hataori::protocol::{ProtocolProvider, QueueTransport};
/// use hataori::{ActivityProvider, FunctionProvider, MemoryQueue};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), hataori::WorkflowError> {
/// let queue = MemoryQueue::new();
///
/// let worker = ProtocolProvider::new(QueueTransport::new(queue.clone()));
/// worker.set_provider(
///     FunctionProvider::new().activity("inc", |x: i64| async move { Ok(x + 1) }),
/// )?;
/// let serving = worker.start_working()?;
///
/// let caller = ProtocolProvider::new(QueueTransport::new(queue));
/// assert_eq!(caller.activity_result(&"inc".into(), json!(1)).await?, json!(2));
///
/// worker.transport().stop_worker();
/// # let _ = serving.await;
/// # Ok(())
/// # }
/// ```
pub struct ProtocolProvider<T> {
    transport: Arc<T>,
    delegate: OnceLock<Arc<dyn ActivityProvider>>,
    worker: AtomicBool,
}

impl<T: fmt::Debug> fmt::Debug for ProtocolProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolProvider")
            .field("transport", &self.transport)
            .field("delegate", &self.delegate.get())
            .field("worker", &self.worker.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Transport + 'static> ProtocolProvider<T> {
    /// Creates a provider over `transport` with no delegate.
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            delegate: OnceLock::new(),
            worker: AtomicBool::new(false),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sets the provider that serves calls in worker mode.
    ///
    /// Fails with [`WorkflowError::ProviderAlreadySet`] on a second call.
    pub fn set_provider<P>(&self, provider: P) -> Result<(), WorkflowError>
    where
        P: ActivityProvider + 'static,
    {
        self.delegate
            .set(Arc::new(provider))
            .map_err(|_| WorkflowError::ProviderAlreadySet)
    }

    /// Builder form of [`set_provider`](Self::set_provider).
    pub fn with_provider<P>(self, provider: P) -> Result<Self, WorkflowError>
    where
        P: ActivityProvider + 'static,
    {
        self.set_provider(provider)?;
        Ok(self)
    }

    /// Returns `true` once the provider has switched to worker mode.
    pub fn is_worker(&self) -> bool {
        self.worker.load(Ordering::Acquire)
    }

    /// Switches to worker mode and starts serving on a background task.
    ///
    /// Fails with [`WorkflowError::ProviderNotSet`] if no delegate was set.
    pub fn start_working(&self) -> Result<JoinHandle<Result<(), WorkflowError>>, WorkflowError> {
        let delegate = self
            .delegate
            .get()
            .cloned()
            .ok_or(WorkflowError::ProviderNotSet)?;
        self.worker.store(true, Ordering::Release);
        info!(transport = ?self.transport, "starting protocol worker");

        let transport = Arc::clone(&self.transport);
        Ok(tokio::spawn(async move { transport.serve(delegate).await }))
    }
}

#[async_trait]
impl<T: Transport + 'static> ActivityProvider for ProtocolProvider<T> {
    /// Names of the delegate's activities; empty on the caller side.
    fn activity_names(&self) -> Vec<ActivityName> {
        self.delegate
            .get()
            .map(|delegate| delegate.activity_names())
            .unwrap_or_default()
    }

    async fn activity_result(
        &self,
        name: &ActivityName,
        input: Value,
    ) -> Result<Value, WorkflowError> {
        if self.is_worker() {
            let delegate = self.delegate.get().ok_or(WorkflowError::ProviderNotSet)?;
            delegate.activity_result(name, input).await
        } else {
            self.transport.send(name, input).await
        }
    }
}
