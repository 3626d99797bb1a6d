//! Workflow error types.

use crate::name::{ActivityName, ProviderName, WorkflowId, WorkflowName};
use thiserror::Error;

/// Execution phase at which an interceptor command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the input of an execution is fixed.
    Input,
    /// When the execution starts running.
    Start,
    /// After the output has been produced.
    Output,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Input => write!(f, "input"),
            Phase::Start => write!(f, "start"),
            Phase::Output => write!(f, "output"),
        }
    }
}

/// Errors that can occur while assembling or running workflows.
///
/// Errors raised by workflow bodies and activity providers travel through the
/// engine unchanged, so the caller of an execution receives exactly the value
/// that was returned at the failure point.
///
/// # Non-Exhaustive
///
/// Always include a wildcard arm when matching:
///
/// ```
/// use hataori_core::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::Exit(reason) => format!("aborted: {reason}"),
///         WorkflowError::ExecutionNotFound { workflow, id } => {
///             format!("no execution {id} of {workflow}")
///         }
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The engine or an adapter is misconfigured.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// No activity provider is registered under the name.
    #[error("Activity provider not found: {0}")]
    ProviderNotFound(ProviderName),

    /// No workflow definition is registered under the name.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowName),

    /// Neither memory nor storage knows the execution.
    #[error("Execution {id} of workflow {workflow} not found")]
    ExecutionNotFound {
        /// Workflow the execution belongs to.
        workflow: WorkflowName,
        /// Identifier that was looked up.
        id: WorkflowId,
    },

    /// No storage is bound for the workflow.
    #[error("Storage for workflow {0} not found")]
    StorageNotFound(WorkflowName),

    /// The selector named a storage that was never registered.
    #[error("Storage with name {0} is not initialized")]
    StorageNotInitialized(String),

    /// A storage name was registered twice.
    #[error("Storage with name {0} is already set")]
    StorageAlreadySet(String),

    /// A protocol delegate was set twice.
    #[error("Provider already set")]
    ProviderAlreadySet,

    /// A protocol adapter was used before its delegate was set.
    #[error("Provider not set")]
    ProviderNotSet,

    /// An interceptor used a `return` setter the phase does not offer.
    #[error("Command '{command}' is not available in the {phase} phase")]
    CommandNotAvailable {
        /// Setter that was called.
        command: &'static str,
        /// Phase the event belongs to.
        phase: Phase,
    },

    /// An interceptor aborted the execution.
    #[error("{0}")]
    Exit(String),

    /// An activity implementation failed.
    #[error("Activity {activity} failed: {details}")]
    ActivityError {
        /// Activity that failed.
        activity: ActivityName,
        /// Details about the failure.
        details: String,
    },

    /// A workflow body failed.
    #[error("Workflow {workflow} failed: {details}")]
    WorkflowFailed {
        /// Workflow that failed.
        workflow: WorkflowName,
        /// Details about the failure.
        details: String,
    },

    /// A value could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A transport adapter failed to deliver a call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An error recorded by a remote worker and re-raised to the caller.
    #[error("{0}")]
    Remote(String),

    /// The serialized access queue stopped accepting operations.
    #[error("Serialized access queue is closed")]
    AccessClosed,

    /// A spawned execution task did not finish.
    #[error("Execution task failed: {0}")]
    Join(String),
}

impl WorkflowError {
    /// Creates an [`WorkflowError::ActivityError`].
    pub fn activity(activity: impl Into<ActivityName>, details: impl ToString) -> Self {
        WorkflowError::ActivityError {
            activity: activity.into(),
            details: details.to_string(),
        }
    }

    /// Creates a [`WorkflowError::WorkflowFailed`].
    pub fn workflow(workflow: impl Into<WorkflowName>, details: impl ToString) -> Self {
        WorkflowError::WorkflowFailed {
            workflow: workflow.into(),
            details: details.to_string(),
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(error: serde_json::Error) -> Self {
        WorkflowError::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_displays_reason_verbatim() {
        let error = WorkflowError::Exit("budget exceeded".to_string());
        assert_eq!(error.to_string(), "budget exceeded");
    }

    #[test]
    fn test_error_display() {
        let error = WorkflowError::StorageNotInitialized("main".to_string());
        assert_eq!(error.to_string(), "Storage with name main is not initialized");

        let error = WorkflowError::CommandNotAvailable {
            command: "set_input",
            phase: Phase::Start,
        };
        assert_eq!(
            error.to_string(),
            "Command 'set_input' is not available in the start phase"
        );

        let error = WorkflowError::activity("inc", "overflow");
        assert_eq!(error.to_string(), "Activity inc failed: overflow");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: Result<u32, _> = serde_json::from_str("\"nope\"");
        let error: WorkflowError = parse.unwrap_err().into();
        assert!(matches!(error, WorkflowError::Serialization(_)));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Input.to_string(), "input");
        assert_eq!(Phase::Output.to_string(), "output");
    }
}
