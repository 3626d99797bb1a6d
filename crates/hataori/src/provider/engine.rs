use crate::engine::WorkflowEngine;
use async_trait::async_trait;
use hataori_core::{ActivityName, ActivityProvider, WorkflowError, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const START_PREFIX: &str = "start_";
const COMPLETE_PREFIX: &str = "complete_";

#[derive(Debug, Serialize, Deserialize)]
struct StartOutput {
    workflow_id: WorkflowId,
}

#[derive(Debug, Deserialize)]
struct CompleteInput {
    workflow_id: WorkflowId,
}

#[derive(Debug, Serialize)]
struct CompleteOutput {
    workflow_id: WorkflowId,
    result: Value,
}

/// Exposes the workflows of an engine as activities.
///
/// For every workflow `w` there are two activities:
///
/// - `start_w` takes the workflow args, starts an execution and returns
///   `{"workflow_id": id}` without waiting for it.
/// - `complete_w` takes `{"workflow_id": id}`, waits for that execution
///   (resuming it from storage if needed) and returns
///   `{"workflow_id": id, "result": output}`.
///
/// Registering it as a provider of another engine lets workflows of that
/// engine drive these workflows as ordinary activities.
#[derive(Debug, Clone)]
pub struct EngineProvider {
    engine: WorkflowEngine,
}

impl EngineProvider {
    /// Wraps `engine`.
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }

    async fn start(&self, workflow: &str, args: Value) -> Result<Value, WorkflowError> {
        let execution = self.engine.execute(workflow, args).await?;
        Ok(serde_json::to_value(StartOutput {
            workflow_id: execution.workflow_id,
        })?)
    }

    async fn complete(&self, workflow: &str, input: Value) -> Result<Value, WorkflowError> {
        let CompleteInput { workflow_id } = serde_json::from_value(input)?;
        let promise = self
            .engine
            .promise_by_workflow_id(workflow, workflow_id.clone())
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound {
                workflow: workflow.into(),
                id: workflow_id.clone(),
            })?;
        let result = promise.await?;
        Ok(serde_json::to_value(CompleteOutput {
            workflow_id,
            result,
        })?)
    }
}

#[async_trait]
impl ActivityProvider for EngineProvider {
    fn activity_names(&self) -> Vec<ActivityName> {
        self.engine
            .workflow_names()
            .iter()
            .flat_map(|workflow| {
                [
                    ActivityName::new(format!("{START_PREFIX}{workflow}")),
                    ActivityName::new(format!("{COMPLETE_PREFIX}{workflow}")),
                ]
            })
            .collect()
    }

    async fn activity_result(
        &self,
        name: &ActivityName,
        input: Value,
    ) -> Result<Value, WorkflowError> {
        if let Some(workflow) = name.as_str().strip_prefix(START_PREFIX) {
            self.start(workflow, input).await
        } else if let Some(workflow) = name.as_str().strip_prefix(COMPLETE_PREFIX) {
            self.complete(workflow, input).await
        } else {
            Err(WorkflowError::activity(name.clone(), "activity not registered"))
        }
    }
}
