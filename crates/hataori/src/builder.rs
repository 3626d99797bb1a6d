//! Engine assembly.

use crate::binding::{StorageBinding, StorageRegistry, StorageRequest, StorageSelector};
use crate::engine::{EngineInner, IdGenerator, WorkflowEngine};
use crate::interceptor::{Interceptor, Pipeline};
use crate::workflow::Workflow;
use hataori_core::{
    ActivityProvider, ActivityStorage, ProviderName, WorkflowError, WorkflowName,
    WorkflowStorage,
};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builder for constructing [`WorkflowEngine`] instances.
///
/// Registration order of interceptors is the order they run in.
#[derive(Default)]
pub struct EngineBuilder {
    providers: Vec<(ProviderName, Arc<dyn ActivityProvider>)>,
    workflows: Vec<(WorkflowName, Arc<dyn Workflow>)>,
    interceptors: Vec<(String, Arc<dyn Interceptor>)>,
    selector: Option<StorageSelector>,
    workflow_storages: Vec<(String, Arc<dyn WorkflowStorage>)>,
    activity_storages: Vec<(String, Arc<dyn ActivityStorage>)>,
    id_generator: Option<IdGenerator>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field(
                "providers",
                &self.providers.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field(
                "workflows",
                &self.workflows.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field(
                "interceptors",
                &self.interceptors.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            )
            .field("selector", &self.selector.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an activity provider.
    pub fn provider<P>(mut self, name: impl Into<ProviderName>, provider: P) -> Self
    where
        P: ActivityProvider + 'static,
    {
        self.providers.push((name.into(), Arc::new(provider)));
        self
    }

    /// Registers a workflow definition.
    pub fn workflow<W>(mut self, name: impl Into<WorkflowName>, workflow: W) -> Self
    where
        W: Workflow + 'static,
    {
        self.workflows.push((name.into(), Arc::new(workflow)));
        self
    }

    /// Appends an interceptor under a registration key.
    pub fn interceptor<I>(mut self, key: impl Into<String>, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push((key.into(), Arc::new(interceptor)));
        self
    }

    /// Sets the function choosing a storage for every persistence call.
    ///
    /// Without a selector the engine keeps no durable state.
    pub fn storage_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&StorageRequest) -> Option<String> + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Registers a storage implementing both contracts under `name`.
    pub fn storage<S>(self, name: impl Into<String>, storage: Arc<S>) -> Self
    where
        S: WorkflowStorage + ActivityStorage + 'static,
    {
        let name = name.into();
        self.workflow_storage(name.clone(), storage.clone())
            .activity_storage(name, storage)
    }

    /// Registers a workflow storage under `name`.
    pub fn workflow_storage<S>(mut self, name: impl Into<String>, storage: Arc<S>) -> Self
    where
        S: WorkflowStorage + 'static,
    {
        self.workflow_storages.push((name.into(), storage));
        self
    }

    /// Registers an activity storage under `name`.
    pub fn activity_storage<S>(mut self, name: impl Into<String>, storage: Arc<S>) -> Self
    where
        S: ActivityStorage + 'static,
    {
        self.activity_storages.push((name.into(), storage));
        self
    }

    /// Replaces the default UUID v4 id generator.
    pub fn id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Builds the engine.
    ///
    /// Must be called from within a Tokio runtime. Fails on duplicate
    /// provider, workflow or interceptor keys and on duplicate storage names.
    pub fn build(self) -> Result<WorkflowEngine, WorkflowError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(WorkflowError::Configuration(
                "Engine must be built inside a Tokio runtime".to_string(),
            ));
        }

        let providers = unique("provider", self.providers)?;
        let workflows = unique("workflow", self.workflows)?;

        let mut keys = HashSet::new();
        for (key, _) in &self.interceptors {
            if !keys.insert(key.as_str()) {
                return Err(WorkflowError::Configuration(format!(
                    "Duplicate interceptor '{key}'"
                )));
            }
        }

        let registry = StorageRegistry::new();
        for (name, storage) in self.workflow_storages {
            registry.register_workflow(name, storage)?;
        }
        for (name, storage) in self.activity_storages {
            registry.register_activity(name, storage)?;
        }

        debug!(
            providers = providers.len(),
            workflows = workflows.len(),
            interceptors = self.interceptors.len(),
            "engine built"
        );

        let id_generator = self.id_generator.unwrap_or_else(uuid_generator);

        Ok(WorkflowEngine::from_inner(EngineInner::new(
            providers,
            workflows,
            Pipeline::new(self.interceptors),
            StorageBinding::new(self.selector, registry),
            id_generator,
        )))
    }
}

fn uuid_generator() -> IdGenerator {
    Arc::new(|| uuid::Uuid::new_v4().to_string())
}

fn unique<K, V>(kind: &str, entries: Vec<(K, V)>) -> Result<BTreeMap<K, V>, WorkflowError>
where
    K: Ord + fmt::Display,
{
    let mut map = BTreeMap::new();
    for (key, value) in entries {
        if map.contains_key(&key) {
            return Err(WorkflowError::Configuration(format!(
                "Duplicate {kind} '{key}'"
            )));
        }
        map.insert(key, value);
    }
    Ok(map)
}
