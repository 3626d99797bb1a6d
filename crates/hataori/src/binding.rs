//! Storage binding: which storage handles which persistence call.
//!
//! Storages are registered by name in a [`StorageRegistry`]. A selector
//! function maps each [`StorageRequest`] to a registry key. When no selector
//! is configured the engine runs without persistence.

use hataori_core::{
    ActivityName, ActivityStorage, ProviderName, WorkflowError, WorkflowName, WorkflowStorage,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Whether a persistence call reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMethod {
    /// A lookup.
    Get,
    /// A write.
    Set,
}

/// What a persistence call is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// State of a workflow execution.
    Workflow {
        /// Workflow whose execution is persisted.
        workflow_name: WorkflowName,
    },
    /// State of an activity invocation.
    Activity {
        /// Provider of the activity.
        provider: ProviderName,
        /// Activity name.
        activity: ActivityName,
    },
}

/// Descriptor handed to the storage selector for every persistence call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest {
    /// Read or write.
    pub method: StorageMethod,
    /// Target of the call.
    pub target: StorageTarget,
}

impl StorageRequest {
    pub(crate) fn workflow(method: StorageMethod, workflow_name: &WorkflowName) -> Self {
        Self {
            method,
            target: StorageTarget::Workflow {
                workflow_name: workflow_name.clone(),
            },
        }
    }

    pub(crate) fn activity(
        method: StorageMethod,
        provider: &ProviderName,
        activity: &ActivityName,
    ) -> Self {
        Self {
            method,
            target: StorageTarget::Activity {
                provider: provider.clone(),
                activity: activity.clone(),
            },
        }
    }
}

/// Maps a persistence call to the name of a registered storage.
///
/// Returning `None` means no storage is bound for the call.
pub type StorageSelector = Arc<dyn Fn(&StorageRequest) -> Option<String> + Send + Sync>;

/// Named storages, registered once per name.
#[derive(Default)]
pub struct StorageRegistry {
    workflows: RwLock<HashMap<String, Arc<dyn WorkflowStorage>>>,
    activities: RwLock<HashMap<String, Arc<dyn ActivityStorage>>>,
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("workflows", &self.workflows.read().keys().collect::<Vec<_>>())
            .field("activities", &self.activities.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StorageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow storage under `name`.
    pub fn register_workflow(
        &self,
        name: impl Into<String>,
        storage: Arc<dyn WorkflowStorage>,
    ) -> Result<(), WorkflowError> {
        insert_once(&self.workflows, name.into(), storage)
    }

    /// Registers an activity storage under `name`.
    pub fn register_activity(
        &self,
        name: impl Into<String>,
        storage: Arc<dyn ActivityStorage>,
    ) -> Result<(), WorkflowError> {
        insert_once(&self.activities, name.into(), storage)
    }

    /// Registers `storage` under `name` in both namespaces.
    ///
    /// Nothing is registered when either namespace already holds `name`.
    pub fn register_both(
        &self,
        name: impl Into<String>,
        workflow: Arc<dyn WorkflowStorage>,
        activity: Arc<dyn ActivityStorage>,
    ) -> Result<(), WorkflowError> {
        let name = name.into();
        let mut workflows = self.workflows.write();
        let mut activities = self.activities.write();
        if workflows.contains_key(&name) || activities.contains_key(&name) {
            return Err(WorkflowError::StorageAlreadySet(name));
        }
        workflows.insert(name.clone(), workflow);
        activities.insert(name, activity);
        Ok(())
    }

    /// Looks up a workflow storage.
    pub fn workflow(&self, name: &str) -> Result<Arc<dyn WorkflowStorage>, WorkflowError> {
        self.workflows
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::StorageNotInitialized(name.to_string()))
    }

    /// Looks up an activity storage.
    pub fn activity(&self, name: &str) -> Result<Arc<dyn ActivityStorage>, WorkflowError> {
        self.activities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::StorageNotInitialized(name.to_string()))
    }
}

fn insert_once<S: ?Sized>(
    map: &RwLock<HashMap<String, Arc<S>>>,
    name: String,
    storage: Arc<S>,
) -> Result<(), WorkflowError> {
    let mut map = map.write();
    if map.contains_key(&name) {
        return Err(WorkflowError::StorageAlreadySet(name));
    }
    map.insert(name, storage);
    Ok(())
}

/// Selector plus registry, as attached to an engine.
pub(crate) struct StorageBinding {
    selector: Option<StorageSelector>,
    registry: StorageRegistry,
}

impl fmt::Debug for StorageBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBinding")
            .field("selector", &self.selector.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

impl StorageBinding {
    pub(crate) fn new(selector: Option<StorageSelector>, registry: StorageRegistry) -> Self {
        Self { selector, registry }
    }

    pub(crate) fn registry(&self) -> &StorageRegistry {
        &self.registry
    }

    /// Workflow storage for a call, `None` when nothing is bound.
    pub(crate) fn workflow_storage(
        &self,
        method: StorageMethod,
        workflow_name: &WorkflowName,
    ) -> Result<Option<Arc<dyn WorkflowStorage>>, WorkflowError> {
        let request = StorageRequest::workflow(method, workflow_name);
        match self.select(&request) {
            Some(key) => self.registry.workflow(&key).map(Some),
            None => Ok(None),
        }
    }

    /// Activity storage for a call, `None` when nothing is bound.
    pub(crate) fn activity_storage(
        &self,
        method: StorageMethod,
        provider: &ProviderName,
        activity: &ActivityName,
    ) -> Result<Option<Arc<dyn ActivityStorage>>, WorkflowError> {
        let request = StorageRequest::activity(method, provider, activity);
        match self.select(&request) {
            Some(key) => self.registry.activity(&key).map(Some),
            None => Ok(None),
        }
    }

    fn select(&self, request: &StorageRequest) -> Option<String> {
        let selected = self.selector.as_ref().and_then(|selector| selector(request));
        if selected.is_none() {
            trace!(?request, "no storage bound, skipping persistence");
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    fn binding() -> StorageBinding {
        let registry = StorageRegistry::new();
        let storage = Arc::new(MemoryStorage::new());
        registry.register_workflow("main", storage.clone()).unwrap();
        registry.register_activity("main", storage).unwrap();

        let selector: StorageSelector = Arc::new(|request: &StorageRequest| match &request.target {
            StorageTarget::Workflow { workflow_name } if workflow_name == "double" => {
                Some("main".to_string())
            }
            StorageTarget::Workflow { .. } => None,
            StorageTarget::Activity { provider, .. } if provider == "math" => {
                Some("main".to_string())
            }
            StorageTarget::Activity { .. } => Some("missing".to_string()),
        });
        StorageBinding::new(Some(selector), registry)
    }

    #[tokio::test]
    async fn test_selector_resolves_registered_storage() {
        let binding = binding();
        let storage = binding
            .workflow_storage(StorageMethod::Get, &"double".into())
            .unwrap();
        assert!(storage.is_some());
        let storage = binding
            .activity_storage(StorageMethod::Set, &"math".into(), &"inc".into())
            .unwrap();
        assert!(storage.is_some());
    }

    #[tokio::test]
    async fn test_unbound_call_is_skipped() {
        let binding = binding();
        let storage = binding
            .workflow_storage(StorageMethod::Set, &"other".into())
            .unwrap();
        assert!(storage.is_none());

        let unconfigured = StorageBinding::new(None, StorageRegistry::new());
        let storage = unconfigured
            .activity_storage(StorageMethod::Get, &"math".into(), &"inc".into())
            .unwrap();
        assert!(storage.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_name_is_an_error() {
        let error = binding()
            .activity_storage(StorageMethod::Get, &"text".into(), &"upper".into())
            .unwrap_err();
        assert_eq!(
            error,
            WorkflowError::StorageNotInitialized("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let registry = StorageRegistry::new();
        let storage = Arc::new(MemoryStorage::new());
        registry.register_workflow("main", storage.clone()).unwrap();
        assert_eq!(
            registry.register_workflow("main", storage.clone()),
            Err(WorkflowError::StorageAlreadySet("main".to_string()))
        );
        // the two namespaces are independent
        assert!(registry.register_activity("main", storage).is_ok());
    }

    #[tokio::test]
    async fn test_register_both_leaves_no_partial_entry() {
        let registry = StorageRegistry::new();
        let storage = Arc::new(MemoryStorage::new());
        registry.register_activity("main", storage.clone()).unwrap();

        assert_eq!(
            registry.register_both("main", storage.clone(), storage.clone()),
            Err(WorkflowError::StorageAlreadySet("main".to_string()))
        );
        assert_eq!(
            registry.workflow("main").err(),
            Some(WorkflowError::StorageNotInitialized("main".to_string()))
        );

        registry.register_both("spare", storage.clone(), storage).unwrap();
        assert!(registry.workflow("spare").is_ok());
        assert!(registry.activity("spare").is_ok());
    }
}
