//! Interceptor (middleware) pipeline.
//!
//! Every execution phase of every workflow and activity builds one [`Event`]
//! and hands it to each registered [`Interceptor`] in registration order.
//! An interceptor narrows the event with guard predicates on the
//! [`EventCollector`]; a guard that does not match yields [`Declined`], and
//! the pipeline moves on to the next interceptor. Any other error aborts the
//! phase and the execution.
//!
//! Changes returned by an interceptor are applied before the next one runs,
//! so later interceptors observe earlier rewrites. Workflow-scoped data set
//! from an activity event lands on the live execution right away. The engine
//! copies the rest of the final state back once the phase is done.

mod collector;
mod commands;
mod event;

pub use collector::EventCollector;
pub use commands::{AdditionalData, Changes, Commands, ReturnBuilder};
pub use event::{Entrypoint, Event, EventTarget, EventType, Operation};

use crate::executor::{ActivityExecutor, WorkflowFrame};
use async_trait::async_trait;
use hataori_core::WorkflowError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{trace, warn};

/// Sentinel returned by a guard predicate that does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declined;

/// Why an interceptor stopped without returning changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// The interceptor does not apply to this event.
    Declined,
    /// The interceptor failed; the execution is aborted.
    Failed(WorkflowError),
}

impl From<Declined> for Interrupt {
    fn from(_: Declined) -> Self {
        Interrupt::Declined
    }
}

impl From<WorkflowError> for Interrupt {
    fn from(error: WorkflowError) -> Self {
        Interrupt::Failed(error)
    }
}

/// Result of one interceptor invocation.
pub type InterceptResult = Result<Option<Changes>, Interrupt>;

/// A callback invoked at every phase of every execution.
///
/// # Examples
///
/// ```
/// use hataori::interceptor::{EventCollector, InterceptResult, Interceptor};
/// use hataori::{EventType, Phase};
/// use async_trait::async_trait;
///
/// struct Budget {
///     limit: i64,
/// }
///
/// #[async_trait]
/// impl Interceptor for Budget {
///     async fn intercept(&self, collector: EventCollector) -> InterceptResult {
///         let collector = collector
///             .when_type_is(EventType::Activity)?
///             .when_order_is(Phase::Input)?;
///         if collector.event().operation.input.as_i64().unwrap_or(0) > self.limit {
///             return Err(collector.commands().exit("budget exceeded").into());
///         }
///         Ok(None)
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Observes the event and optionally returns changes to apply.
    async fn intercept(&self, collector: EventCollector) -> InterceptResult;
}

/// Adapter turning an async closure into an [`Interceptor`].
pub struct FnInterceptor<F> {
    callback: F,
}

impl<F> fmt::Debug for FnInterceptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor").finish_non_exhaustive()
    }
}

/// Wraps an async closure as an interceptor.
pub fn interceptor_fn<F, Fut>(callback: F) -> FnInterceptor<F>
where
    F: Fn(EventCollector) -> Fut + Send + Sync,
    Fut: Future<Output = InterceptResult> + Send + 'static,
{
    FnInterceptor { callback }
}

#[async_trait]
impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(EventCollector) -> Fut + Send + Sync,
    Fut: Future<Output = InterceptResult> + Send + 'static,
{
    async fn intercept(&self, collector: EventCollector) -> InterceptResult {
        (self.callback)(collector).await
    }
}

/// Which fields a phase rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Touched {
    pub input: bool,
    pub output: bool,
    pub additional_data: bool,
    pub workflow_additional_data: bool,
}

impl Touched {
    fn record(&mut self, changes: &Changes) {
        self.input |= changes.input.is_some();
        self.output |= changes.output.is_some();
        self.additional_data |= changes.additional_data.is_some();
        self.workflow_additional_data |= changes.workflow_additional_data.is_some();
    }
}

/// Event after every interceptor of a phase has run.
#[derive(Debug)]
pub(crate) struct PhaseOutcome {
    pub event: Event,
    pub touched: Touched,
}

/// Registered interceptors, in registration order.
#[derive(Clone, Default)]
pub(crate) struct Pipeline {
    interceptors: Vec<(String, Arc<dyn Interceptor>)>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|(key, _)| key))
            .finish()
    }
}

impl Pipeline {
    pub(crate) fn new(interceptors: Vec<(String, Arc<dyn Interceptor>)>) -> Self {
        Self { interceptors }
    }

    /// Runs one phase through every interceptor.
    ///
    /// `frame` is the owning execution of an activity event.
    pub(crate) async fn run(
        &self,
        mut event: Event,
        frame: Option<&Arc<WorkflowFrame>>,
        executor: Option<ActivityExecutor>,
    ) -> Result<PhaseOutcome, WorkflowError> {
        let mut touched = Touched::default();

        for (key, interceptor) in &self.interceptors {
            let collector = EventCollector::new(event.clone(), frame.cloned(), executor.clone());
            match interceptor.intercept(collector).await {
                Ok(Some(changes)) => {
                    touched.record(&changes);
                    if let (Some(frame), Some(data)) = (frame, &changes.workflow_additional_data) {
                        if !changes.workflow_data_written {
                            frame.set_additional_data(data.clone());
                        }
                    }
                    event.apply(changes);
                }
                Ok(None) => {}
                Err(Interrupt::Declined) => {
                    trace!(interceptor = %key, order = %event.order, "interceptor declined");
                }
                Err(Interrupt::Failed(error)) => {
                    warn!(
                        interceptor = %key,
                        order = %event.order,
                        workflow = %event.workflow_name,
                        "interceptor aborted execution: {}",
                        error
                    );
                    return Err(error);
                }
            }
        }

        Ok(PhaseOutcome { event, touched })
    }
}
