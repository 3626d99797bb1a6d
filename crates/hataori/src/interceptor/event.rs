//! Events handed to interceptors.

use super::commands::Changes;
use hataori_core::{ActivityId, ActivityName, Phase, ProviderName, WorkflowId, WorkflowName};
use serde_json::Value;

/// Whether an event concerns an activity or a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// One activity invocation inside a workflow.
    Activity,
    /// A workflow execution.
    Workflow,
}

/// How the execution behind an event was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entrypoint {
    /// A fresh call from a workflow body or a top-level caller.
    Workflow,
    /// A re-entrant call made by an interceptor through its executor.
    Middleware,
}

/// Live input/output/additional-data of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Current input.
    pub input: Value,
    /// Output, once produced.
    pub output: Option<Value>,
    /// Additional data owned by this execution.
    pub additional_data: Value,
}

impl Operation {
    pub(crate) fn new(input: Value) -> Self {
        Self {
            input,
            output: None,
            additional_data: Value::Object(Default::default()),
        }
    }
}

/// What the event is about.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTarget {
    /// The workflow execution itself.
    Workflow,
    /// An activity invocation, with a snapshot of its owning workflow.
    Activity {
        /// Provider of the activity.
        provider: ProviderName,
        /// Activity name.
        activity: ActivityName,
        /// Identifier of this invocation.
        activity_id: ActivityId,
        /// State of the owning workflow execution.
        workflow_operation: Operation,
    },
}

/// One execution phase, as observed by interceptors.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Phase being dispatched.
    pub order: Phase,
    /// How the execution was entered.
    pub entrypoint: Entrypoint,
    /// Workflow the execution belongs to.
    pub workflow_name: WorkflowName,
    /// Workflow execution identifier.
    pub workflow_id: WorkflowId,
    /// Whether the workflow execution was reconstructed from storage.
    pub resumed: bool,
    /// State of the target execution.
    pub operation: Operation,
    /// Target of the event.
    pub target: EventTarget,
}

impl Event {
    /// Returns whether this is an activity or a workflow event.
    pub fn event_type(&self) -> EventType {
        match self.target {
            EventTarget::Workflow => EventType::Workflow,
            EventTarget::Activity { .. } => EventType::Activity,
        }
    }

    /// Provider name, for activity events.
    pub fn provider(&self) -> Option<&ProviderName> {
        match &self.target {
            EventTarget::Activity { provider, .. } => Some(provider),
            EventTarget::Workflow => None,
        }
    }

    /// Activity name, for activity events.
    pub fn activity_name(&self) -> Option<&ActivityName> {
        match &self.target {
            EventTarget::Activity { activity, .. } => Some(activity),
            EventTarget::Workflow => None,
        }
    }

    /// Activity invocation identifier, for activity events.
    pub fn activity_id(&self) -> Option<&ActivityId> {
        match &self.target {
            EventTarget::Activity { activity_id, .. } => Some(activity_id),
            EventTarget::Workflow => None,
        }
    }

    /// State of the workflow execution the event belongs to.
    ///
    /// For workflow events this is the event's own operation.
    pub fn workflow_operation(&self) -> &Operation {
        match &self.target {
            EventTarget::Activity {
                workflow_operation, ..
            } => workflow_operation,
            EventTarget::Workflow => &self.operation,
        }
    }

    pub(crate) fn apply(&mut self, changes: Changes) {
        if let Some(input) = changes.input {
            self.operation.input = input;
        }
        if let Some(output) = changes.output {
            self.operation.output = Some(output);
        }
        if let Some(data) = changes.additional_data {
            self.operation.additional_data = data;
        }
        if let Some(data) = changes.workflow_additional_data {
            if let EventTarget::Activity {
                workflow_operation, ..
            } = &mut self.target
            {
                workflow_operation.additional_data = data;
            }
        }
    }
}
