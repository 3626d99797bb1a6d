//! Simple workflow with persistence and resume.
//!
//! Runs `double` once, then builds a second engine over the same storage
//! and looks the execution up by id, as a restarted process would.

use hataori::prelude::*;
use std::sync::Arc;

fn engine(storage: Arc<MemoryStorage>) -> Result<WorkflowEngine, WorkflowError> {
    WorkflowEngine::builder()
        .provider(
            "math",
            FunctionProvider::new().activity("inc", |x: i64| async move {
                println!("inc({x})");
                Ok(x + 1)
            }),
        )
        .workflow(
            "double",
            workflow_fn(|executor: ActivityExecutor, n: i64| async move {
                let a: i64 = executor.call_as("math", "inc", n).await?;
                let b: i64 = executor.call_as("math", "inc", n).await?;
                Ok::<_, WorkflowError>(a + b)
            }),
        )
        .storage("memory", storage)
        .storage_selector(|_| Some("memory".to_string()))
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let storage = Arc::new(MemoryStorage::new());

    let first = engine(Arc::clone(&storage))?;
    let execution = first.execute("double", 5).await?;
    let result: i64 = execution.promise.result_as().await?;
    println!("Execution {} finished with {}", execution.workflow_id, result);

    // a fresh engine only knows the execution through storage
    let second = engine(storage)?;
    match second
        .promise_by_workflow_id("double", execution.workflow_id.clone())
        .await?
    {
        Some(promise) => println!("Resumed result: {}", promise.await?),
        None => eprintln!("Execution {} not found", execution.workflow_id),
    }

    Ok(())
}
