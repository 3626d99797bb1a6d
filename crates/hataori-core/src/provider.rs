//! Capability providers: named units of callable work.

use crate::error::WorkflowError;
use crate::name::ActivityName;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A source of activities.
///
/// Implemented by plain function tables, by transport adapters that forward
/// calls to remote workers, and by the engine itself (workflows exposed as
/// activities).
///
/// # Examples
///
/// ```
/// use hataori_core::{ActivityName, ActivityProvider, WorkflowError};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// #[derive(Debug)]
/// struct Echo;
///
/// #[async_trait]
/// impl ActivityProvider for Echo {
///     fn activity_names(&self) -> Vec<ActivityName> {
///         vec![ActivityName::new("echo")]
///     }
///
///     async fn activity_result(
///         &self,
///         name: &ActivityName,
///         input: Value,
///     ) -> Result<Value, WorkflowError> {
///         match name.as_str() {
///             "echo" => Ok(input),
///             _ => Err(WorkflowError::activity(name.clone(), "unknown activity")),
///         }
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let out = Echo.activity_result(&"echo".into(), json!(1)).await.unwrap();
/// assert_eq!(out, json!(1));
/// # }
/// ```
#[async_trait]
pub trait ActivityProvider: Send + Sync + std::fmt::Debug {
    /// Returns the names of the activities, in a stable order.
    fn activity_names(&self) -> Vec<ActivityName>;

    /// Runs one activity and returns its output.
    async fn activity_result(
        &self,
        name: &ActivityName,
        input: Value,
    ) -> Result<Value, WorkflowError>;
}

#[async_trait]
impl<P: ActivityProvider + ?Sized> ActivityProvider for Arc<P> {
    fn activity_names(&self) -> Vec<ActivityName> {
        (**self).activity_names()
    }

    async fn activity_result(
        &self,
        name: &ActivityName,
        input: Value,
    ) -> Result<Value, WorkflowError> {
        (**self).activity_result(name, input).await
    }
}
