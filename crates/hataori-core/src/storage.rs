//! Persistence contracts consumed by the engine.
//!
//! The engine never owns durable state itself. It saves and resumes
//! executions through these two traits; concrete backends live elsewhere.

use crate::error::WorkflowError;
use crate::name::{ActivityId, ActivityName, ProviderName, WorkflowId, WorkflowName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Durable projection of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Input the execution runs with.
    pub args: Value,
    /// Output, once the body has completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl WorkflowRecord {
    /// A record of an execution that has not produced output yet.
    pub fn pending(args: Value) -> Self {
        Self { args, result: None }
    }

    /// A record of a completed execution.
    pub fn completed(args: Value, result: Value) -> Self {
        Self {
            args,
            result: Some(result),
        }
    }
}

/// Identity of one activity invocation as seen by activity storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityKey {
    /// Provider the activity belongs to.
    pub provider: ProviderName,
    /// Activity name within the provider.
    pub activity: ActivityName,
    /// Invocation identifier.
    pub activity_id: ActivityId,
    /// Arguments the activity was called with.
    pub args: Value,
}

/// Storage for workflow executions.
#[async_trait]
pub trait WorkflowStorage: Send + Sync + std::fmt::Debug {
    /// Loads the record of an execution, if any.
    async fn get_workflow(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowRecord>, WorkflowError>;

    /// Stores (or replaces) the record of an execution.
    async fn set_workflow(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
        record: WorkflowRecord,
    ) -> Result<(), WorkflowError>;

    /// Loads the workflow-scoped additional data of an execution.
    async fn get_workflow_additional_data(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
    ) -> Result<Option<Value>, WorkflowError>;

    /// Stores the workflow-scoped additional data of an execution.
    async fn set_workflow_additional_data(
        &self,
        name: &WorkflowName,
        id: &WorkflowId,
        data: Value,
    ) -> Result<(), WorkflowError>;
}

/// Storage for activity invocations.
#[async_trait]
pub trait ActivityStorage: Send + Sync + std::fmt::Debug {
    /// Loads the stored result of an invocation, if any.
    async fn get_activity(&self, key: &ActivityKey) -> Result<Option<Value>, WorkflowError>;

    /// Stores the result of an invocation.
    async fn set_activity(&self, key: &ActivityKey, result: Value) -> Result<(), WorkflowError>;

    /// Loads the activity-scoped additional data of an invocation.
    async fn get_activity_additional_data(
        &self,
        key: &ActivityKey,
    ) -> Result<Option<Value>, WorkflowError>;

    /// Stores the activity-scoped additional data of an invocation.
    async fn set_activity_additional_data(
        &self,
        key: &ActivityKey,
        data: Value,
    ) -> Result<(), WorkflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_record_omits_result() {
        let record = WorkflowRecord::pending(json!(5));
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({ "args": 5 }));
    }

    #[test]
    fn test_completed_record_round_trips() {
        let record = WorkflowRecord::completed(json!(5), json!(12));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({ "args": 5, "result": 12 }));

        let back: WorkflowRecord = serde_json::from_value(json!({ "args": 5 })).unwrap();
        assert_eq!(back.result, None);
    }
}
