use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use hataori_core::{ActivityName, ActivityProvider, WorkflowError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type ActivityFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, WorkflowError>> + Send + Sync>;

/// A provider backed by a table of async functions.
///
/// Inputs and outputs are converted through JSON, so each function keeps its
/// own types. Activities are listed in registration order.
///
/// ```
/// use hataori::{ActivityName, ActivityProvider, FunctionProvider};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let math = FunctionProvider::new()
///     .activity("neg", |x: i64| async move { Ok(-x) })
///     .activity("inc", |x: i64| async move { Ok(x + 1) });
///
/// assert_eq!(math.activity_names(), vec![ActivityName::new("neg"), ActivityName::new("inc")]);
/// let out = math.activity_result(&"inc".into(), json!(41)).await.unwrap();
/// assert_eq!(out, json!(42));
/// # }
/// ```
#[derive(Clone, Default)]
pub struct FunctionProvider {
    activities: Vec<(ActivityName, ActivityFn)>,
}

impl fmt::Debug for FunctionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionProvider")
            .field("activities", &self.activity_names())
            .finish()
    }
}

impl FunctionProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an activity. A later activity with the same name replaces an
    /// earlier one in its original position.
    pub fn activity<F, Fut, I, O>(mut self, name: impl Into<ActivityName>, function: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        I: DeserializeOwned + 'static,
        O: Serialize + 'static,
    {
        let wrapped: ActivityFn = Arc::new(move |input: Value| {
            match serde_json::from_value::<I>(input) {
                Ok(input) => {
                    let pending = function(input);
                    async move {
                        let output = pending.await?;
                        Ok::<_, WorkflowError>(serde_json::to_value(output)?)
                    }
                    .boxed()
                }
                Err(error) => future::ready(Err(WorkflowError::from(error))).boxed(),
            }
        });
        let name = name.into();
        match self.activities.iter_mut().find(|(known, _)| *known == name) {
            Some((_, function)) => *function = wrapped,
            None => self.activities.push((name, wrapped)),
        }
        self
    }

    fn function(&self, name: &ActivityName) -> Option<&ActivityFn> {
        self.activities
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, function)| function)
    }
}

#[async_trait]
impl ActivityProvider for FunctionProvider {
    fn activity_names(&self) -> Vec<ActivityName> {
        self.activities.iter().map(|(name, _)| name.clone()).collect()
    }

    async fn activity_result(
        &self,
        name: &ActivityName,
        input: Value,
    ) -> Result<Value, WorkflowError> {
        let function = self
            .function(name)
            .ok_or_else(|| WorkflowError::activity(name.clone(), "activity not registered"))?;
        function(input).await
    }
}
