use hataori::prelude::*;
use hataori::protocol::{
    PollingQueueManager, ProtocolProvider, QueueTransport, QueueWorkerConfig,
};
use hataori::MemoryQueue;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn math() -> FunctionProvider {
    FunctionProvider::new().activity("inc", |x: i64| async move { Ok(x + 1) })
}

fn double() -> impl Workflow {
    workflow_fn(|executor: ActivityExecutor, n: i64| async move {
        let a: i64 = executor.call_as("math", "inc", n).await?;
        let b: i64 = executor.call_as("math", "inc", n).await?;
        Ok::<_, WorkflowError>(a + b)
    })
}

#[tokio::test]
async fn test_engine_calls_activities_through_queue_worker() {
    let queue = MemoryQueue::new();
    let fast = || {
        PollingQueueManager::new(
            QueueWorkerConfig::default().with_poll_interval(Duration::from_millis(5)),
        )
    };

    let worker = ProtocolProvider::new(QueueTransport::with_manager(queue.clone(), fast()))
        .with_provider(math())
        .unwrap();
    let serving = worker.start_working().unwrap();

    let engine = WorkflowEngine::builder()
        .provider(
            "math",
            ProtocolProvider::new(QueueTransport::with_manager(queue.clone(), fast())),
        )
        .workflow("double", double())
        .build()
        .unwrap();

    let execution = engine.execute("double", 5).await.unwrap();
    assert_eq!(execution.promise.result_as::<i64>().await.unwrap(), 12);
    assert_eq!(queue.pending_count().await.unwrap(), 0);

    worker.transport().stop_worker();
    tokio_test::assert_ok!(serving.await.unwrap());
}

#[tokio::test]
async fn test_remote_failure_reaches_workflow_caller() {
    let queue = MemoryQueue::new();
    let worker = ProtocolProvider::new(QueueTransport::new(queue.clone()))
        .with_provider(FunctionProvider::new().activity("inc", |x: i64| async move {
            if x < 0 {
                return Err(WorkflowError::activity("inc", "negative input"));
            }
            Ok(x + 1)
        }))
        .unwrap();
    let serving = worker.start_working().unwrap();

    let engine = WorkflowEngine::builder()
        .provider("math", ProtocolProvider::new(QueueTransport::new(queue)))
        .workflow("double", double())
        .build()
        .unwrap();

    let execution = engine.execute("double", -1).await.unwrap();
    assert_eq!(
        execution.promise.await.unwrap_err(),
        WorkflowError::Remote("Activity inc failed: negative input".to_string())
    );

    worker.transport().stop_worker();
    tokio_test::assert_ok!(serving.await.unwrap());
}

#[tokio::test]
async fn test_workflows_of_one_engine_drive_another() {
    let inner_storage = Arc::new(MemoryStorage::new());
    let inner = WorkflowEngine::builder()
        .provider("math", math())
        .workflow("double", double())
        .storage("main", Arc::clone(&inner_storage))
        .storage_selector(|_| Some("main".to_string()))
        .build()
        .unwrap();

    let outer = WorkflowEngine::builder()
        .provider("inner", EngineProvider::new(inner.clone()))
        .workflow(
            "delegate",
            workflow_fn(|executor: ActivityExecutor, n: i64| async move {
                let started = executor.call("inner", "start_double", n).await?;
                let completed = executor.call("inner", "complete_double", started).await?;
                Ok::<_, WorkflowError>(completed["result"].clone())
            }),
        )
        .build()
        .unwrap();

    let execution = outer.execute("delegate", 5).await.unwrap();
    assert_eq!(execution.promise.await.unwrap(), json!(12));
    assert_eq!(inner.in_flight_count().await.unwrap(), 1);
    assert_eq!(inner_storage.workflow_count().await.unwrap(), 1);
}
