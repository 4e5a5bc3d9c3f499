//! Stack topology and locator resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use crate::locator::ResourceLocator;
use crate::resource::ManagedResource;
use crate::retry::{RetryPolicy, with_retry};
use crate::state::{BackendError, StateBackend};
use crate::terraform::state::StateAddress;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("stack '{stack}' is unknown")]
    StackUnknown { stack: String },

    #[error("deployment '{deployment}' is unknown in stack '{stack}'")]
    DeploymentUnknown { stack: String, deployment: String },

    #[error("component '{component}' is unknown in stack '{stack}'")]
    ComponentUnknown { stack: String, component: String },

    #[error("{locator} is absent from the state of backend '{backend}'")]
    ResourceAbsent { locator: String, backend: String },

    #[error("{key} recorded at {locator} no longer exists at the provider")]
    ResourceGone { locator: String, key: String },
}

#[derive(Debug, Error)]
pub enum LocateError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error("reading state for {locator} failed after {attempts} attempt(s): {source}")]
    Backend {
        locator: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },
}

#[derive(Clone)]
pub struct Deployment {
    pub id: String,
    pub backend: Arc<dyn StateBackend>,
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("id", &self.id)
            .field("backend", &self.backend.id())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub id: String,
    pub components: BTreeSet<String>,
    pub deployments: BTreeMap<String, Deployment>,
}

impl Stack {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            components: BTreeSet::new(),
            deployments: BTreeMap::new(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.insert(component.into());
        self
    }

    pub fn with_deployment(mut self, id: impl Into<String>, backend: Arc<dyn StateBackend>) -> Self {
        let id = id.into();
        self.deployments.insert(id.clone(), Deployment { id, backend });
        self
    }
}

/// A locator pinned to its backend. `resource` is what the state currently
/// records at `address`, if anything.
#[derive(Clone)]
pub struct ResolvedLocation {
    pub locator: ResourceLocator,
    pub backend: Arc<dyn StateBackend>,
    pub address: StateAddress,
    pub resource: Option<ManagedResource>,
}

impl std::fmt::Debug for ResolvedLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedLocation")
            .field("locator", &self.locator.to_string())
            .field("backend", &self.backend.id())
            .field("address", &self.address.to_string())
            .field("resource", &self.resource)
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct StateLocator {
    stacks: BTreeMap<String, Stack>,
    retry: RetryPolicy,
}

impl StateLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(mut self, stack: Stack) -> Self {
        self.stacks.insert(stack.id.clone(), stack);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.values()
    }

    /// Finds the deployment's backend without reading its state.
    pub fn resolve_backend(
        &self,
        locator: &ResourceLocator,
    ) -> Result<Arc<dyn StateBackend>, NotFoundError> {
        let stack = self
            .stacks
            .get(&locator.stack_id)
            .ok_or_else(|| NotFoundError::StackUnknown {
                stack: locator.stack_id.clone(),
            })?;

        let deployment = stack.deployments.get(&locator.deployment_id).ok_or_else(|| {
            NotFoundError::DeploymentUnknown {
                stack: stack.id.clone(),
                deployment: locator.deployment_id.clone(),
            }
        })?;

        if !stack.components.contains(&locator.component_id) {
            return Err(NotFoundError::ComponentUnknown {
                stack: stack.id.clone(),
                component: locator.component_id.clone(),
            });
        }

        Ok(deployment.backend.clone())
    }

    /// Reads whatever the state records at the locator, present or not.
    pub async fn inspect(&self, locator: &ResourceLocator) -> Result<ResolvedLocation, LocateError> {
        let backend = self.resolve_backend(locator)?;
        let address = locator.state_address();

        let resource = with_retry(&self.retry, backend.id(), || backend.get(&address))
            .await
            .map_err(|e| LocateError::Backend {
                locator: locator.to_string(),
                attempts: e.attempts,
                source: e.error,
            })?;

        Ok(ResolvedLocation {
            locator: locator.clone(),
            backend,
            address,
            resource,
        })
    }

    /// Resolves a locator that must point at a managed resource.
    pub async fn resolve(&self, locator: &ResourceLocator) -> Result<ResolvedLocation, LocateError> {
        let location = self.inspect(locator).await?;
        if location.resource.is_none() {
            return Err(NotFoundError::ResourceAbsent {
                locator: locator.to_string(),
                backend: location.backend.id().to_string(),
            }
            .into());
        }
        Ok(location)
    }
}
