//! Guard collector wrapping an event.

use super::commands::Commands;
use super::event::{Entrypoint, Event, EventType};
use super::Declined;
use crate::executor::{ActivityExecutor, WorkflowFrame};
use hataori_core::Phase;
use std::sync::Arc;

/// An event plus its commands, narrowed by guard predicates.
///
/// Every guard either returns the collector unchanged or [`Declined`], which
/// converts into the pipeline's decline sentinel through `?`:
///
/// ```
/// use hataori::interceptor::{interceptor_fn, EventCollector, InterceptResult};
/// use hataori::{EventType, Phase};
///
/// let audit = interceptor_fn(|collector: EventCollector| async move {
///     let collector = collector
///         .when_type_is(EventType::Activity)?
///         .when_order_is(Phase::Output)?;
///     tracing::info!(activity = ?collector.event().activity_name(), "activity finished");
///     InterceptResult::Ok(None)
/// });
/// # let _ = audit;
/// ```
#[derive(Debug, Clone)]
pub struct EventCollector {
    event: Event,
    commands: Commands,
}

impl EventCollector {
    pub(crate) fn new(
        event: Event,
        frame: Option<Arc<WorkflowFrame>>,
        executor: Option<ActivityExecutor>,
    ) -> Self {
        let commands = Commands::new(&event, frame, executor);
        Self { event, commands }
    }

    /// The wrapped event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Commands for this event.
    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    /// Splits the collector into event and commands.
    pub fn into_parts(self) -> (Event, Commands) {
        (self.event, self.commands)
    }

    /// Passes when the execution was entered through `entrypoint`.
    pub fn when_entrypoint_is(self, entrypoint: Entrypoint) -> Result<Self, Declined> {
        self.guard(|event| event.entrypoint == entrypoint)
    }

    /// Passes for activity or workflow events only.
    pub fn when_type_is(self, event_type: EventType) -> Result<Self, Declined> {
        self.guard(|event| event.event_type() == event_type)
    }

    /// Passes for one phase only.
    pub fn when_order_is(self, order: Phase) -> Result<Self, Declined> {
        self.guard(|event| event.order == order)
    }

    /// Passes for activity events of `provider`.
    pub fn when_provider_is(self, provider: &str) -> Result<Self, Declined> {
        self.guard(|event| event.provider().is_some_and(|p| p == provider))
    }

    /// Passes for events of executions of `workflow_name`.
    pub fn when_workflow_name_is(self, workflow_name: &str) -> Result<Self, Declined> {
        self.guard(|event| event.workflow_name == workflow_name)
    }

    /// Passes for activity events of `activity_name`.
    pub fn when_activity_name_is(self, activity_name: &str) -> Result<Self, Declined> {
        self.guard(|event| event.activity_name().is_some_and(|a| a == activity_name))
    }

    /// Passes when `predicate` holds.
    pub fn filter<F>(self, predicate: F) -> Result<Self, Declined>
    where
        F: FnOnce(&Event) -> bool,
    {
        self.guard(predicate)
    }

    fn guard<F>(self, predicate: F) -> Result<Self, Declined>
    where
        F: FnOnce(&Event) -> bool,
    {
        if predicate(&self.event) {
            Ok(self)
        } else {
            Err(Declined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::event::{EventTarget, Operation};
    use serde_json::json;

    fn collector() -> EventCollector {
        let event = Event {
            order: Phase::Start,
            entrypoint: Entrypoint::Workflow,
            workflow_name: "double".into(),
            workflow_id: "wf-1".into(),
            resumed: false,
            operation: Operation::new(json!(5)),
            target: EventTarget::Activity {
                provider: "math".into(),
                activity: "inc".into(),
                activity_id: "a-1".into(),
                workflow_operation: Operation::new(json!(5)),
            },
        };
        EventCollector::new(event, None, None)
    }

    #[test]
    fn test_matching_guards_chain() {
        let narrowed = collector()
            .when_type_is(EventType::Activity)
            .and_then(|c| c.when_order_is(Phase::Start))
            .and_then(|c| c.when_entrypoint_is(Entrypoint::Workflow))
            .and_then(|c| c.when_provider_is("math"))
            .and_then(|c| c.when_activity_name_is("inc"))
            .and_then(|c| c.when_workflow_name_is("double"));
        assert!(narrowed.is_ok());
    }

    #[test]
    fn test_failing_guard_declines() {
        assert_eq!(
            collector().when_type_is(EventType::Workflow).unwrap_err(),
            Declined
        );
        assert!(collector().when_order_is(Phase::Output).is_err());
        assert!(collector().when_provider_is("text").is_err());
        assert!(collector()
            .when_entrypoint_is(Entrypoint::Middleware)
            .is_err());
        assert!(collector().filter(|event| event.resumed).is_err());
    }

    #[test]
    fn test_activity_guards_decline_workflow_events() {
        let (mut event, _) = collector().into_parts();
        event.target = EventTarget::Workflow;
        let collector = EventCollector::new(event, None, None);
        assert!(collector.clone().when_provider_is("math").is_err());
        assert!(collector.when_activity_name_is("inc").is_err());
    }
}
