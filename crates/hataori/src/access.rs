//! Serialized, FIFO-ordered access to a shared value.

use futures::future::BoxFuture;
use hataori_core::WorkflowError;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

type Operation<V> = Box<dyn for<'a> FnOnce(&'a mut V) -> BoxFuture<'a, ()> + Send>;

/// Owns one value and applies queued operations to it strictly one at a time.
///
/// Every [`access`](Self::access) call is appended to an unbounded FIFO queue.
/// A single consumer task dequeues an operation, awaits it to completion and
/// only then takes the next one, so operations never interleave even when
/// they suspend. When the queue is empty the consumer sleeps until the next
/// call arrives. No thread is ever blocked.
///
/// If an operation fails, the error is returned to its caller and the value
/// keeps whatever mutations were made before the failure.
///
/// Must be created from within a Tokio runtime.
///
/// # Examples
///
/// ```
/// use hataori::SerializedAccess;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), hataori::WorkflowError> {
/// let counter = SerializedAccess::new(0u32);
///
/// counter
///     .access(|n| Box::pin(async move {
///         *n += 1;
///         Ok(())
///     }))
///     .await?;
///
/// assert_eq!(counter.access_sync(|n| Ok(*n)).await?, 1);
/// # Ok(())
/// # }
/// ```
pub struct SerializedAccess<V> {
    queue: mpsc::UnboundedSender<Operation<V>>,
}

impl<V> Clone for SerializedAccess<V> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<V> fmt::Debug for SerializedAccess<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedAccess")
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}

impl<V: Send + 'static> SerializedAccess<V> {
    /// Wraps `value` and spawns the consumer task.
    pub fn new(value: V) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(consume(value, pending));
        Self { queue }
    }

    /// Enqueues `operation` and resolves once it has been applied.
    ///
    /// Resolves with the operation's own result, or with
    /// [`WorkflowError::AccessClosed`] if the consumer is gone.
    pub async fn access<R, F>(&self, operation: F) -> Result<R, WorkflowError>
    where
        R: Send + 'static,
        F: for<'a> FnOnce(&'a mut V) -> BoxFuture<'a, Result<R, WorkflowError>> + Send + 'static,
    {
        let (done, settled) = oneshot::channel();
        let queued = operation_of(move |value: &mut V| {
            Box::pin(async move {
                // the caller may have stopped waiting
                let _ = done.send(operation(value).await);
            })
        });

        self.queue
            .send(queued)
            .map_err(|_| WorkflowError::AccessClosed)?;
        settled.await.map_err(|_| WorkflowError::AccessClosed)?
    }

    /// Like [`access`](Self::access) for operations that never suspend.
    pub async fn access_sync<R, F>(&self, operation: F) -> Result<R, WorkflowError>
    where
        R: Send + 'static,
        F: FnOnce(&mut V) -> Result<R, WorkflowError> + Send + 'static,
    {
        self.access(move |value| Box::pin(async move { operation(value) }))
            .await
    }
}

fn operation_of<V, F>(operation: F) -> Operation<V>
where
    F: for<'a> FnOnce(&'a mut V) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(operation)
}

async fn consume<V>(mut value: V, mut pending: mpsc::UnboundedReceiver<Operation<V>>) {
    while let Some(operation) = pending.recv().await {
        operation(&mut value).await;
    }
    trace!("serialized access queue closed");
}
