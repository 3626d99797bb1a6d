//! Workflow definitions.

use crate::executor::ActivityExecutor;
use async_trait::async_trait;
use hataori_core::WorkflowError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

/// An orchestrating function composing activity calls.
///
/// The body receives an [`ActivityExecutor`] bound to its own execution and
/// the current input. Any error it returns ends the execution unchanged.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Runs the workflow body.
    async fn run(&self, executor: ActivityExecutor, input: Value) -> Result<Value, WorkflowError>;
}

/// Typed adapter created by [`workflow_fn`].
pub struct FnWorkflow<F, I, O> {
    body: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<F, I, O> fmt::Debug for FnWorkflow<F, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorkflow")
            .field("input", &std::any::type_name::<I>())
            .field("output", &std::any::type_name::<O>())
            .finish()
    }
}

/// Wraps an async closure with typed input and output as a [`Workflow`].
///
/// Input is deserialized from, and output serialized to, JSON.
///
/// # Examples
///
/// ```
/// use hataori::{workflow_fn, ActivityExecutor, WorkflowError};
///
/// let double = workflow_fn(|executor: ActivityExecutor, n: i64| async move {
///     let a: i64 = executor.call_as("math", "inc", n).await?;
///     let b: i64 = executor.call_as("math", "inc", n).await?;
///     Ok::<_, WorkflowError>(a + b)
/// });
/// # let _ = double;
/// ```
pub fn workflow_fn<F, Fut, I, O>(body: F) -> FnWorkflow<F, I, O>
where
    F: Fn(ActivityExecutor, I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + 'static,
{
    FnWorkflow {
        body,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> Workflow for FnWorkflow<F, I, O>
where
    F: Fn(ActivityExecutor, I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + 'static,
{
    async fn run(&self, executor: ActivityExecutor, input: Value) -> Result<Value, WorkflowError> {
        let input: I = serde_json::from_value(input)?;
        let output = (self.body)(executor, input).await?;
        Ok(serde_json::to_value(output)?)
    }
}
