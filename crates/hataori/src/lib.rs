//! A durable workflow engine for Rust.
//!
//! Workflows are async functions that call named activities through an
//! [`ActivityExecutor`]. Every execution and every activity call passes
//! through an interceptor pipeline in three phases (input, start, output),
//! and is persisted through pluggable storage so an execution can be looked
//! up again by its id, resumed after a restart, or replayed from memoized
//! activity results.
//!
//! # Example
//!
//! ```rust
//! use hataori::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WorkflowError> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let engine = WorkflowEngine::builder()
//!         .provider(
//!             "math",
//!             FunctionProvider::new().activity("inc", |x: i64| async move { Ok(x + 1) }),
//!         )
//!         .workflow(
//!             "double",
//!             workflow_fn(|executor: ActivityExecutor, n: i64| async move {
//!                 let a: i64 = executor.call_as("math", "inc", n).await?;
//!                 let b: i64 = executor.call_as("math", "inc", n).await?;
//!                 Ok::<_, WorkflowError>(a + b)
//!             }),
//!         )
//!         .storage("main", Arc::clone(&storage))
//!         .storage_selector(|_| Some("main".to_string()))
//!         .build()?;
//!
//!     let execution = engine.execute("double", 5).await?;
//!     assert_eq!(execution.promise.result_as::<i64>().await?, 12);
//!
//!     // a finished execution can be looked up again by id
//!     let again = engine
//!         .promise_by_workflow_id("double", execution.workflow_id)
//!         .await?;
//!     assert!(again.is_some());
//!     Ok(())
//! }
//! ```

mod access;
mod binding;
mod builder;
mod engine;
mod executor;
pub mod interceptor;
mod memory;
pub mod protocol;
mod provider;
mod workflow;

// Re-export core types
pub use hataori_core::*;

pub use access::SerializedAccess;
pub use binding::{StorageMethod, StorageRegistry, StorageRequest, StorageSelector, StorageTarget};
pub use builder::EngineBuilder;
pub use engine::{Execution, IdGenerator, WorkflowEngine, WorkflowPromise};
pub use executor::ActivityExecutor;
pub use interceptor::{Entrypoint, EventType};
pub use memory::{MemoryQueue, MemoryStorage};
pub use provider::{EngineProvider, FunctionProvider};
pub use workflow::{workflow_fn, FnWorkflow, Workflow};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::interceptor::{interceptor_fn, EventCollector, InterceptResult, Interceptor};
    pub use crate::{
        workflow_fn, ActivityExecutor, ActivityProvider, ActivityStorage, EngineBuilder,
        EngineProvider, Entrypoint, EventType, FunctionProvider, MemoryStorage, Phase, Workflow,
        WorkflowEngine, WorkflowError, WorkflowPromise, WorkflowStorage,
    };
}
