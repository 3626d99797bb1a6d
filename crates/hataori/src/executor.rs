//! Activity executor handed to workflow bodies and interceptors.

use crate::engine::EngineInner;
use crate::interceptor::{Entrypoint, Event, EventTarget, Operation, Touched};
use hataori_core::{ActivityName, Phase, ProviderName, WorkflowError, WorkflowId, WorkflowName};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Live state of one workflow execution, shared with its activities.
#[derive(Debug)]
pub(crate) struct WorkflowFrame {
    pub(crate) workflow_name: WorkflowName,
    pub(crate) workflow_id: WorkflowId,
    pub(crate) resumed: bool,
    operation: Mutex<Operation>,
    // held from reading the data until storage has accepted it
    persisting: tokio::sync::Mutex<()>,
}

impl WorkflowFrame {
    pub(crate) fn new(
        workflow_name: WorkflowName,
        workflow_id: WorkflowId,
        resumed: bool,
        operation: Operation,
    ) -> Self {
        Self {
            workflow_name,
            workflow_id,
            resumed,
            operation: Mutex::new(operation),
            persisting: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn snapshot(&self) -> Operation {
        self.operation.lock().clone()
    }

    pub(crate) fn input(&self) -> Value {
        self.operation.lock().input.clone()
    }

    pub(crate) fn output(&self) -> Value {
        self.operation.lock().output.clone().unwrap_or(Value::Null)
    }

    pub(crate) fn additional_data(&self) -> Value {
        self.operation.lock().additional_data.clone()
    }

    pub(crate) fn set_output(&self, output: Value) {
        self.operation.lock().output = Some(output);
    }

    pub(crate) fn set_additional_data(&self, data: Value) {
        self.operation.lock().additional_data = data;
    }

    /// Replaces the additional data with `update(current)` in one step.
    pub(crate) fn update_additional_data<F>(&self, update: F) -> Value
    where
        F: FnOnce(Value) -> Value,
    {
        let mut current = self.operation.lock();
        let next = update(current.additional_data.clone());
        current.additional_data = next.clone();
        next
    }

    pub(crate) async fn persisting(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.persisting.lock().await
    }

    /// Copies the fields a workflow phase rewrote back onto the frame.
    pub(crate) fn absorb(&self, operation: Operation, touched: Touched) {
        let mut current = self.operation.lock();
        if touched.input {
            current.input = operation.input;
        }
        if touched.output {
            current.output = operation.output;
        }
        if touched.additional_data {
            current.additional_data = operation.additional_data;
        }
    }

    pub(crate) fn workflow_event(&self, order: Phase, entrypoint: Entrypoint) -> Event {
        Event {
            order,
            entrypoint,
            workflow_name: self.workflow_name.clone(),
            workflow_id: self.workflow_id.clone(),
            resumed: self.resumed,
            operation: self.snapshot(),
            target: EventTarget::Workflow,
        }
    }
}

/// Calls activities on behalf of one workflow execution.
///
/// Every call runs the full activity cycle: replay lookup, interceptor
/// phases, the provider call and persistence. Executors handed to
/// interceptors tag their calls with [`Entrypoint::Middleware`].
#[derive(Clone)]
pub struct ActivityExecutor {
    engine: Arc<EngineInner>,
    frame: Arc<WorkflowFrame>,
    entrypoint: Entrypoint,
}

impl fmt::Debug for ActivityExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityExecutor")
            .field("workflow_name", &self.frame.workflow_name)
            .field("workflow_id", &self.frame.workflow_id)
            .field("entrypoint", &self.entrypoint)
            .finish()
    }
}

impl ActivityExecutor {
    pub(crate) fn new(engine: Arc<EngineInner>, frame: Arc<WorkflowFrame>) -> Self {
        Self {
            engine,
            frame,
            entrypoint: Entrypoint::Workflow,
        }
    }

    pub(crate) fn for_middleware(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            frame: Arc::clone(&self.frame),
            entrypoint: Entrypoint::Middleware,
        }
    }

    pub(crate) fn frame(&self) -> &Arc<WorkflowFrame> {
        &self.frame
    }

    pub(crate) fn entrypoint(&self) -> Entrypoint {
        self.entrypoint
    }

    /// Name of the workflow this executor belongs to.
    pub fn workflow_name(&self) -> &WorkflowName {
        &self.frame.workflow_name
    }

    /// Identifier of the workflow execution this executor belongs to.
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.frame.workflow_id
    }

    /// Calls `activity` of `provider` with `input`.
    pub async fn call(
        &self,
        provider: impl Into<ProviderName>,
        activity: impl Into<ActivityName>,
        input: impl Serialize,
    ) -> Result<Value, WorkflowError> {
        let input = serde_json::to_value(input)?;
        self.engine
            .run_activity(self, provider.into(), activity.into(), input)
            .await
    }

    /// Like [`call`](Self::call), deserializing the output into `O`.
    pub async fn call_as<O: DeserializeOwned>(
        &self,
        provider: impl Into<ProviderName>,
        activity: impl Into<ActivityName>,
        input: impl Serialize,
    ) -> Result<O, WorkflowError> {
        let output = self.call(provider, activity, input).await?;
        Ok(serde_json::from_value(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame() -> WorkflowFrame {
        WorkflowFrame::new(
            "double".into(),
            "wf-1".into(),
            false,
            Operation::new(json!(5)),
        )
    }

    #[test]
    fn test_absorb_copies_only_touched_fields() {
        let frame = frame();
        let rewritten = Operation {
            input: json!(50),
            output: Some(json!(1)),
            additional_data: json!({ "seen": true }),
        };
        frame.absorb(
            rewritten,
            Touched {
                input: true,
                ..Touched::default()
            },
        );

        let current = frame.snapshot();
        assert_eq!(current.input, json!(50));
        assert_eq!(current.output, None);
        assert_eq!(current.additional_data, json!({}));
    }

    #[test]
    fn test_workflow_event_reflects_frame() {
        let frame = frame();
        frame.set_output(json!(12));
        frame.set_additional_data(json!({ "total": 2 }));

        let event = frame.workflow_event(Phase::Output, Entrypoint::Workflow);
        assert_eq!(event.workflow_id, "wf-1");
        assert_eq!(event.operation.output, Some(json!(12)));
        assert_eq!(event.workflow_operation().additional_data, json!({ "total": 2 }));
        assert_eq!(frame.output(), json!(12));
        assert_eq!(frame.additional_data(), json!({ "total": 2 }));
    }

    #[test]
    fn test_update_reads_current_data() {
        let frame = frame();
        frame.set_additional_data(json!({ "count": 1 }));
        for _ in 0..2 {
            frame.update_additional_data(|prev| {
                json!({ "count": prev["count"].as_i64().unwrap() + 1 })
            });
        }
        assert_eq!(frame.additional_data(), json!({ "count": 3 }));
    }
}
