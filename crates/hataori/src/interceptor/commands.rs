//! Commands available to interceptors.

use super::event::{Event, EventType};
use crate::executor::{ActivityExecutor, WorkflowFrame};
use hataori_core::{Phase, WorkflowError};
use serde_json::Value;
use std::sync::Arc;

/// Both additional-data namespaces, as seen by a `return` setter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalData {
    /// Activity-scoped data (`null` for workflow events).
    pub activity: Value,
    /// Workflow-scoped data.
    pub workflow: Value,
}

/// Deltas accumulated by a [`ReturnBuilder`].
///
/// `None` means the field was left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    /// New input.
    pub input: Option<Value>,
    /// New output.
    pub output: Option<Value>,
    /// New additional data of the event's target.
    pub additional_data: Option<Value>,
    /// New workflow-scoped data, from an activity event.
    pub workflow_additional_data: Option<Value>,
    // set once the workflow data has been stored on the live execution
    pub(crate) workflow_data_written: bool,
}

impl Changes {
    /// Returns `true` if no field was set.
    pub fn is_empty(&self) -> bool {
        self.input.is_none()
            && self.output.is_none()
            && self.additional_data.is_none()
            && self.workflow_additional_data.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Setter {
    Input,
    Output,
    AdditionalData,
    WorkflowAdditionalData,
}

impl Setter {
    fn command(self) -> &'static str {
        match self {
            Setter::Input => "set_input",
            Setter::Output => "set_output",
            Setter::AdditionalData => "set_additional_data",
            Setter::WorkflowAdditionalData => "set_workflow_additional_data",
        }
    }

    // Input may only be rewritten before it is consumed, output only once it
    // exists. Workflow events own their workflow data via `AdditionalData`.
    fn permitted(self, event_type: EventType, phase: Phase) -> bool {
        match self {
            Setter::Input => phase == Phase::Input,
            Setter::Output => phase == Phase::Output,
            Setter::AdditionalData => true,
            Setter::WorkflowAdditionalData => event_type == EventType::Activity,
        }
    }
}

/// Chainable builder of the changes an interceptor wants to apply.
///
/// Each setter receives the previous value together with both
/// additional-data namespaces and returns the replacement. Setters the
/// current phase does not offer fail with
/// [`WorkflowError::CommandNotAvailable`].
///
/// Inside a running execution, the workflow namespace is read from and
/// written to the live workflow state, so activities running side by side
/// never overwrite each other's updates.
///
/// # Examples
///
/// ```
/// use hataori::interceptor::{Event, EventTarget, Operation, ReturnBuilder};
/// use hataori::{Entrypoint, Phase};
/// use serde_json::json;
///
/// let event = Event {
///     order: Phase::Input,
///     entrypoint: Entrypoint::Workflow,
///     workflow_name: "double".into(),
///     workflow_id: "wf-1".into(),
///     resumed: false,
///     operation: Operation { input: json!(5), output: None, additional_data: json!({}) },
///     target: EventTarget::Workflow,
/// };
///
/// let changes = ReturnBuilder::for_event(&event)
///     .set_input(|prev, _| json!(prev.as_i64().unwrap_or(0) * 10))?
///     .changes();
/// assert_eq!(changes.input, Some(json!(50)));
/// # Ok::<(), hataori::WorkflowError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ReturnBuilder {
    event_type: EventType,
    phase: Phase,
    input: Value,
    output: Value,
    additional_data: Value,
    workflow_additional_data: Value,
    frame: Option<Arc<WorkflowFrame>>,
    changes: Changes,
}

impl ReturnBuilder {
    /// Creates a builder seeded from the event's current state.
    pub fn for_event(event: &Event) -> Self {
        Self::bound(event, None)
    }

    pub(crate) fn bound(event: &Event, frame: Option<Arc<WorkflowFrame>>) -> Self {
        Self {
            event_type: event.event_type(),
            phase: event.order,
            input: event.operation.input.clone(),
            output: event.operation.output.clone().unwrap_or(Value::Null),
            additional_data: event.operation.additional_data.clone(),
            workflow_additional_data: event.workflow_operation().additional_data.clone(),
            frame,
            changes: Changes::default(),
        }
    }

    /// Rewrites the input.
    pub fn set_input<F>(mut self, configure: F) -> Result<Self, WorkflowError>
    where
        F: FnOnce(Value, &AdditionalData) -> Value,
    {
        self.check(Setter::Input)?;
        let data = self.additional();
        let value = configure(self.input.clone(), &data);
        self.input = value.clone();
        self.changes.input = Some(value);
        Ok(self)
    }

    /// Rewrites the output.
    pub fn set_output<F>(mut self, configure: F) -> Result<Self, WorkflowError>
    where
        F: FnOnce(Value, &AdditionalData) -> Value,
    {
        self.check(Setter::Output)?;
        let data = self.additional();
        let value = configure(self.output.clone(), &data);
        self.output = value.clone();
        self.changes.output = Some(value);
        Ok(self)
    }

    /// Rewrites the additional data of the event's target.
    pub fn set_additional_data<F>(mut self, configure: F) -> Result<Self, WorkflowError>
    where
        F: FnOnce(Value, &AdditionalData) -> Value,
    {
        self.check(Setter::AdditionalData)?;
        let data = self.additional();
        let value = configure(self.additional_data.clone(), &data);
        self.additional_data = value.clone();
        if self.event_type == EventType::Workflow {
            self.workflow_additional_data = value.clone();
        }
        self.changes.additional_data = Some(value);
        Ok(self)
    }

    /// Rewrites the owning workflow's additional data from an activity event.
    pub fn set_workflow_additional_data<F>(mut self, configure: F) -> Result<Self, WorkflowError>
    where
        F: FnOnce(Value, &AdditionalData) -> Value,
    {
        self.check(Setter::WorkflowAdditionalData)?;
        let activity = self.additional_data.clone();
        let apply = |workflow: Value| {
            let data = AdditionalData {
                activity,
                workflow: workflow.clone(),
            };
            configure(workflow, &data)
        };
        let value = match &self.frame {
            Some(frame) => frame.update_additional_data(apply),
            None => apply(self.workflow_additional_data.clone()),
        };
        self.workflow_additional_data = value.clone();
        self.changes.workflow_additional_data = Some(value);
        self.changes.workflow_data_written = self.frame.is_some();
        Ok(self)
    }

    /// Returns the accumulated deltas.
    pub fn changes(&self) -> Changes {
        self.changes.clone()
    }

    /// Consumes the builder, returning the accumulated deltas.
    pub fn into_changes(self) -> Changes {
        self.changes
    }

    fn check(&self, setter: Setter) -> Result<(), WorkflowError> {
        if setter.permitted(self.event_type, self.phase) {
            Ok(())
        } else {
            Err(WorkflowError::CommandNotAvailable {
                command: setter.command(),
                phase: self.phase,
            })
        }
    }

    fn additional(&self) -> AdditionalData {
        let activity = match self.event_type {
            EventType::Activity => self.additional_data.clone(),
            EventType::Workflow => Value::Null,
        };
        let workflow = match (&self.frame, self.event_type) {
            (Some(frame), EventType::Activity) => frame.additional_data(),
            _ => self.workflow_additional_data.clone(),
        };
        AdditionalData { activity, workflow }
    }
}

/// Command bundle attached to every event.
#[derive(Debug, Clone)]
pub struct Commands {
    phase: Phase,
    executor: Option<ActivityExecutor>,
    returns: ReturnBuilder,
}

impl Commands {
    pub(crate) fn new(
        event: &Event,
        frame: Option<Arc<WorkflowFrame>>,
        executor: Option<ActivityExecutor>,
    ) -> Self {
        Self {
            phase: event.order,
            executor,
            returns: ReturnBuilder::bound(event, frame),
        }
    }

    /// Builds the error that aborts the whole execution with `reason`.
    ///
    /// ```ignore
    /// return Err(collector.commands().exit("budget exceeded").into());
    /// ```
    pub fn exit(&self, reason: impl Into<String>) -> WorkflowError {
        WorkflowError::Exit(reason.into())
    }

    /// Returns `value` unchanged.
    pub fn resolve<T>(&self, value: T) -> T {
        value
    }

    /// Executor for additional activity calls.
    ///
    /// Only available in the input and output phases of activity events.
    pub fn executor(&self) -> Option<&ActivityExecutor> {
        match self.phase {
            Phase::Start => None,
            Phase::Input | Phase::Output => self.executor.as_ref(),
        }
    }

    /// Starts a `return` builder for this event.
    pub fn returns(&self) -> ReturnBuilder {
        self.returns.clone()
    }
}
