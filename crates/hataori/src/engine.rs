//! Execution engine: workflow and activity drivers plus the in-flight cache.

use crate::access::SerializedAccess;
use crate::binding::{StorageBinding, StorageMethod};
use crate::builder::EngineBuilder;
use crate::executor::{ActivityExecutor, WorkflowFrame};
use crate::interceptor::{
    Entrypoint, Event, EventTarget, Operation, PhaseOutcome, Pipeline, Touched,
};
use crate::workflow::Workflow;
use futures::future::{BoxFuture, FutureExt, Shared};
use hataori_core::{
    ActivityId, ActivityKey, ActivityName, ActivityProvider, ActivityStorage, Phase,
    ProviderName, WorkflowError, WorkflowId, WorkflowName, WorkflowRecord, WorkflowStorage,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Produces opaque unique identifiers for executions and invocations.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

type InFlight = HashMap<WorkflowName, HashMap<WorkflowId, WorkflowPromise>>;

/// Completion of one workflow execution.
///
/// Cloneable; every clone resolves to the same result. The execution runs on
/// its own task whether or not the promise is ever awaited.
#[derive(Clone)]
pub struct WorkflowPromise {
    inner: Shared<BoxFuture<'static, Result<Value, WorkflowError>>>,
}

impl fmt::Debug for WorkflowPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowPromise")
            .field("settled", &self.inner.peek().is_some())
            .finish()
    }
}

impl WorkflowPromise {
    fn from_task(task: JoinHandle<Result<Value, WorkflowError>>) -> Self {
        let inner = async move {
            match task.await {
                Ok(result) => result,
                Err(error) => Err(WorkflowError::Join(error.to_string())),
            }
        }
        .boxed()
        .shared();
        Self { inner }
    }

    /// Returns the result if the execution has already settled.
    pub fn peek(&self) -> Option<&Result<Value, WorkflowError>> {
        self.inner.peek()
    }

    /// Awaits the result and deserializes it into `O`.
    pub async fn result_as<O: DeserializeOwned>(self) -> Result<O, WorkflowError> {
        let value = self.await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Future for WorkflowPromise {
    type Output = Result<Value, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

/// A started workflow execution.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Identifier of the execution.
    pub workflow_id: WorkflowId,
    /// Completion of the execution.
    pub promise: WorkflowPromise,
}

/// Durable workflow engine.
///
/// Cheap to clone; clones share providers, workflows, interceptors,
/// storages and the in-flight cache.
///
/// # Examples
///
/// ```
/// use hataori::{workflow_fn, ActivityExecutor, FunctionProvider, WorkflowEngine, WorkflowError};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), WorkflowError> {
/// let engine = WorkflowEngine::builder()
///     .provider(
///         "math",
///         FunctionProvider::new().activity("inc", |x: i64| async move { Ok(x + 1) }),
///     )
///     .workflow(
///         "double",
///         workflow_fn(|executor: ActivityExecutor, n: i64| async move {
///             let a: i64 = executor.call_as("math", "inc", n).await?;
///             let b: i64 = executor.call_as("math", "inc", n).await?;
///             Ok::<_, WorkflowError>(a + b)
///         }),
///     )
///     .build()?;
///
/// let execution = engine.execute("double", 5).await?;
/// assert_eq!(execution.promise.result_as::<i64>().await?, 12);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("providers", &self.inner.providers.keys().collect::<Vec<_>>())
            .field("workflows", &self.inner.workflows.keys().collect::<Vec<_>>())
            .field("interceptors", &self.inner.pipeline)
            .field("storage", &self.inner.storage)
            .finish()
    }
}

impl WorkflowEngine {
    /// Creates a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_inner(inner: EngineInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Starts a workflow execution without waiting for it to complete.
    pub async fn execute(
        &self,
        workflow_name: impl Into<WorkflowName>,
        args: impl Serialize,
    ) -> Result<Execution, WorkflowError> {
        let workflow_name = workflow_name.into();
        if !self.inner.workflows.contains_key(&workflow_name) {
            return Err(WorkflowError::WorkflowNotFound(workflow_name));
        }
        let args = serde_json::to_value(args)?;
        let workflow_id = WorkflowId::new((self.inner.id_generator)());

        let promise = EngineInner::spawn_workflow(
            &self.inner,
            workflow_name.clone(),
            workflow_id.clone(),
            args,
            false,
        );
        let cached = promise.clone();
        let id = workflow_id.clone();
        self.inner
            .in_flight
            .access_sync(move |in_flight| {
                in_flight.entry(workflow_name).or_default().insert(id, cached);
                Ok(())
            })
            .await?;

        Ok(Execution {
            workflow_id,
            promise,
        })
    }

    /// Looks up the completion of an execution, resuming it from storage if
    /// it is not in flight.
    ///
    /// Returns `Ok(None)` when storage holds no record for the id. Fails with
    /// [`WorkflowError::StorageNotFound`] when no workflow storage is bound
    /// for `workflow_name`.
    pub async fn promise_by_workflow_id(
        &self,
        workflow_name: impl Into<WorkflowName>,
        workflow_id: impl Into<WorkflowId>,
    ) -> Result<Option<WorkflowPromise>, WorkflowError> {
        let workflow_name = workflow_name.into();
        let workflow_id = workflow_id.into();

        if let Some(promise) = self.inner.cached(&workflow_name, &workflow_id).await? {
            return Ok(Some(promise));
        }

        let storage = self
            .inner
            .storage
            .workflow_storage(StorageMethod::Get, &workflow_name)?
            .ok_or_else(|| WorkflowError::StorageNotFound(workflow_name.clone()))?;
        let Some(record) = storage.get_workflow(&workflow_name, &workflow_id).await? else {
            debug!(workflow = %workflow_name, id = %workflow_id, "no stored execution");
            return Ok(None);
        };
        if !self.inner.workflows.contains_key(&workflow_name) {
            return Err(WorkflowError::WorkflowNotFound(workflow_name));
        }

        info!(workflow = %workflow_name, id = %workflow_id, "resuming execution from storage");
        let engine = Arc::clone(&self.inner);
        let promise = self
            .inner
            .in_flight
            .access_sync(move |in_flight| {
                let executions = in_flight.entry(workflow_name.clone()).or_default();
                // a concurrent lookup may have resumed it already
                if let Some(promise) = executions.get(&workflow_id) {
                    return Ok(promise.clone());
                }
                let promise = EngineInner::spawn_workflow(
                    &engine,
                    workflow_name,
                    workflow_id.clone(),
                    record.args,
                    true,
                );
                executions.insert(workflow_id, promise.clone());
                Ok(promise)
            })
            .await?;

        Ok(Some(promise))
    }

    /// Registers a storage implementing both contracts under `name`.
    pub fn set_storage<S>(&self, name: impl Into<String>, storage: Arc<S>) -> Result<(), WorkflowError>
    where
        S: WorkflowStorage + ActivityStorage + 'static,
    {
        self.inner
            .storage
            .registry()
            .register_both(name, storage.clone(), storage)
    }

    /// Registers a workflow storage under `name`.
    pub fn set_workflow_storage<S>(
        &self,
        name: impl Into<String>,
        storage: Arc<S>,
    ) -> Result<(), WorkflowError>
    where
        S: WorkflowStorage + 'static,
    {
        self.inner.storage.registry().register_workflow(name, storage)
    }

    /// Registers an activity storage under `name`.
    pub fn set_activity_storage<S>(
        &self,
        name: impl Into<String>,
        storage: Arc<S>,
    ) -> Result<(), WorkflowError>
    where
        S: ActivityStorage + 'static,
    {
        self.inner.storage.registry().register_activity(name, storage)
    }

    /// Names of the registered workflows, sorted.
    pub fn workflow_names(&self) -> Vec<WorkflowName> {
        self.inner.workflows.keys().cloned().collect()
    }

    /// Names of the registered providers, sorted.
    pub fn provider_names(&self) -> Vec<ProviderName> {
        self.inner.providers.keys().cloned().collect()
    }

    /// Number of executions held by the in-flight cache.
    pub async fn in_flight_count(&self) -> Result<usize, WorkflowError> {
        self.inner
            .in_flight
            .access_sync(|in_flight| Ok(in_flight.values().map(HashMap::len).sum()))
            .await
    }
}

/// Shared engine state.
pub(crate) struct EngineInner {
    providers: BTreeMap<ProviderName, Arc<dyn ActivityProvider>>,
    workflows: BTreeMap<WorkflowName, Arc<dyn Workflow>>,
    pipeline: Pipeline,
    storage: StorageBinding,
    id_generator: IdGenerator,
    in_flight: SerializedAccess<InFlight>,
}

impl EngineInner {
    pub(crate) fn new(
        providers: BTreeMap<ProviderName, Arc<dyn ActivityProvider>>,
        workflows: BTreeMap<WorkflowName, Arc<dyn Workflow>>,
        pipeline: Pipeline,
        storage: StorageBinding,
        id_generator: IdGenerator,
    ) -> Self {
        Self {
            providers,
            workflows,
            pipeline,
            storage,
            id_generator,
            in_flight: SerializedAccess::new(HashMap::new()),
        }
    }

    async fn cached(
        &self,
        workflow_name: &WorkflowName,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowPromise>, WorkflowError> {
        let name = workflow_name.clone();
        let id = workflow_id.clone();
        self.in_flight
            .access_sync(move |in_flight| {
                Ok(in_flight
                    .get(&name)
                    .and_then(|executions| executions.get(&id))
                    .cloned())
            })
            .await
    }

    fn spawn_workflow(
        engine: &Arc<Self>,
        workflow_name: WorkflowName,
        workflow_id: WorkflowId,
        args: Value,
        resumed: bool,
    ) -> WorkflowPromise {
        let engine = Arc::clone(engine);
        let task = tokio::spawn(async move {
            let result = engine
                .run_workflow(workflow_name.clone(), workflow_id.clone(), args, resumed)
                .await;
            match &result {
                Ok(_) => info!(workflow = %workflow_name, id = %workflow_id, "workflow completed"),
                Err(error) => {
                    warn!(workflow = %workflow_name, id = %workflow_id, "workflow failed: {}", error)
                }
            }
            result
        });
        WorkflowPromise::from_task(task)
    }

    async fn run_workflow(
        self: Arc<Self>,
        workflow_name: WorkflowName,
        workflow_id: WorkflowId,
        args: Value,
        resumed: bool,
    ) -> Result<Value, WorkflowError> {
        let workflow = self
            .workflows
            .get(&workflow_name)
            .cloned()
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_name.clone()))?;
        info!(workflow = %workflow_name, id = %workflow_id, resumed, "workflow started");

        let mut operation = Operation::new(args);
        if let Some(storage) = self
            .storage
            .workflow_storage(StorageMethod::Get, &workflow_name)?
        {
            if let Some(record) = storage.get_workflow(&workflow_name, &workflow_id).await? {
                debug!(workflow = %workflow_name, id = %workflow_id, "stored args take precedence");
                operation.input = record.args;
            }
            if let Some(data) = storage
                .get_workflow_additional_data(&workflow_name, &workflow_id)
                .await?
            {
                operation.additional_data = data;
            }
        }
        let frame = Arc::new(WorkflowFrame::new(
            workflow_name,
            workflow_id,
            resumed,
            operation,
        ));

        let outcome = self
            .pipeline
            .run(frame.workflow_event(Phase::Input, Entrypoint::Workflow), None, None)
            .await?;
        frame.absorb(outcome.event.operation, outcome.touched);
        self.save_workflow(&frame, WorkflowRecord::pending(frame.input()))
            .await?;
        if outcome.touched.additional_data {
            self.save_workflow_data(&frame).await?;
        }

        let executor = ActivityExecutor::new(Arc::clone(&self), Arc::clone(&frame));

        let outcome = self
            .pipeline
            .run(frame.workflow_event(Phase::Start, Entrypoint::Workflow), None, None)
            .await?;
        frame.absorb(outcome.event.operation, outcome.touched);
        if outcome.touched.additional_data {
            self.save_workflow_data(&frame).await?;
        }

        let output = workflow.run(executor, frame.input()).await?;
        frame.set_output(output.clone());
        self.save_workflow(&frame, WorkflowRecord::completed(frame.input(), output))
            .await?;

        let outcome = self
            .pipeline
            .run(frame.workflow_event(Phase::Output, Entrypoint::Workflow), None, None)
            .await?;
        frame.absorb(outcome.event.operation, outcome.touched);
        if outcome.touched.output {
            self.save_workflow(
                &frame,
                WorkflowRecord::completed(frame.input(), frame.output()),
            )
            .await?;
        }
        if outcome.touched.additional_data {
            self.save_workflow_data(&frame).await?;
        }

        Ok(frame.output())
    }

    pub(crate) async fn run_activity(
        &self,
        executor: &ActivityExecutor,
        provider_name: ProviderName,
        activity: ActivityName,
        args: Value,
    ) -> Result<Value, WorkflowError> {
        let provider = self
            .providers
            .get(&provider_name)
            .cloned()
            .ok_or_else(|| WorkflowError::ProviderNotFound(provider_name.clone()))?;
        let key = ActivityKey {
            provider: provider_name,
            activity,
            activity_id: ActivityId::new((self.id_generator)()),
            args,
        };

        if let Some(storage) =
            self.storage
                .activity_storage(StorageMethod::Get, &key.provider, &key.activity)?
        {
            if let Some(result) = storage.get_activity(&key).await? {
                debug!(
                    provider = %key.provider,
                    activity = %key.activity,
                    id = %key.activity_id,
                    "replaying stored activity result"
                );
                return Ok(result);
            }
        }

        let frame = executor.frame();
        let entrypoint = executor.entrypoint();
        let side_calls = executor.for_middleware();
        let mut operation = Operation::new(key.args.clone());
        debug!(
            provider = %key.provider,
            activity = %key.activity,
            id = %key.activity_id,
            ?entrypoint,
            "activity started"
        );

        let event = activity_event(frame, entrypoint, &key, Phase::Input, operation.clone());
        let outcome = self
            .pipeline
            .run(event, Some(frame), Some(side_calls.clone()))
            .await?;
        let touched = merge_phase(&mut operation, outcome);
        let mut activity_data_set = touched.additional_data;
        let mut workflow_data_set = touched.workflow_additional_data;

        let event = activity_event(frame, entrypoint, &key, Phase::Start, operation.clone());
        let (outcome, output) = tokio::try_join!(
            self.pipeline.run(event, Some(frame), None),
            provider.activity_result(&key.activity, operation.input.clone())
        )?;
        let touched = merge_phase(&mut operation, outcome);
        activity_data_set |= touched.additional_data;
        workflow_data_set |= touched.workflow_additional_data;
        operation.output = Some(output.clone());

        let storage = self
            .storage
            .activity_storage(StorageMethod::Set, &key.provider, &key.activity)?;
        if let Some(storage) = &storage {
            storage.set_activity(&key, output).await?;
            if activity_data_set {
                storage
                    .set_activity_additional_data(&key, operation.additional_data.clone())
                    .await?;
            }
        }
        if workflow_data_set {
            self.save_workflow_data(frame).await?;
        }

        let event = activity_event(frame, entrypoint, &key, Phase::Output, operation.clone());
        let outcome = self.pipeline.run(event, Some(frame), Some(side_calls)).await?;
        let touched = merge_phase(&mut operation, outcome);
        let output = operation.output.unwrap_or(Value::Null);

        if let Some(storage) = &storage {
            if touched.output {
                storage.set_activity(&key, output.clone()).await?;
            }
            if touched.additional_data {
                storage
                    .set_activity_additional_data(&key, operation.additional_data)
                    .await?;
            }
        }
        if touched.workflow_additional_data {
            self.save_workflow_data(frame).await?;
        }

        debug!(provider = %key.provider, activity = %key.activity, "activity completed");
        Ok(output)
    }

    async fn save_workflow(
        &self,
        frame: &WorkflowFrame,
        record: WorkflowRecord,
    ) -> Result<(), WorkflowError> {
        if let Some(storage) = self
            .storage
            .workflow_storage(StorageMethod::Set, &frame.workflow_name)?
        {
            storage
                .set_workflow(&frame.workflow_name, &frame.workflow_id, record)
                .await?;
        }
        Ok(())
    }

    async fn save_workflow_data(&self, frame: &WorkflowFrame) -> Result<(), WorkflowError> {
        if let Some(storage) = self
            .storage
            .workflow_storage(StorageMethod::Set, &frame.workflow_name)?
        {
            // the last save to finish always carries the latest data
            let _persisting = frame.persisting().await;
            storage
                .set_workflow_additional_data(
                    &frame.workflow_name,
                    &frame.workflow_id,
                    frame.additional_data(),
                )
                .await?;
        }
        Ok(())
    }
}

fn activity_event(
    frame: &WorkflowFrame,
    entrypoint: Entrypoint,
    key: &ActivityKey,
    order: Phase,
    operation: Operation,
) -> Event {
    Event {
        order,
        entrypoint,
        workflow_name: frame.workflow_name.clone(),
        workflow_id: frame.workflow_id.clone(),
        resumed: frame.resumed,
        operation,
        target: EventTarget::Activity {
            provider: key.provider.clone(),
            activity: key.activity.clone(),
            activity_id: key.activity_id.clone(),
            workflow_operation: frame.snapshot(),
        },
    }
}

// Takes over the activity's state from a finished phase. Workflow-scoped
// writes already reached the owning execution inside the pipeline.
fn merge_phase(operation: &mut Operation, outcome: PhaseOutcome) -> Touched {
    let PhaseOutcome { event, touched } = outcome;
    *operation = event.operation;
    touched
}
