//! Stack manifest: which deployments exist, where their state lives and
//! how hard to retry when a backend misbehaves.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::stack::{Stack, StateLocator};
use crate::state::{HttpBackend, HttpBackendConfig, LocalBackend, MemoryBackend, StateBackend};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackManifest {
    pub stack: String,
    pub components: BTreeSet<String>,
    pub deployments: BTreeMap<String, DeploymentConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Local { path: PathBuf },
    Http(HttpBackendConfig),
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub inventory: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "inventory".to_string(),
            inventory: None,
        }
    }
}

impl StackManifest {
    pub fn parse(json: &str, path: &Path) -> Result<Self, ConfigError> {
        let manifest: Self = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&json, path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stack.is_empty() {
            return Err(ConfigError::Invalid("stack id is empty".to_string()));
        }
        if self.components.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "stack '{}' declares no components",
                self.stack
            )));
        }
        if self.deployments.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "stack '{}' declares no deployments",
                self.stack
            )));
        }
        for (id, deployment) in &self.deployments {
            if let BackendConfig::Http(http) = &deployment.backend
                && http.address.is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "deployment '{}' has an http backend without an address",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Resolves an inventory path relative to the manifest directory.
    pub fn inventory_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.provider.inventory.as_ref().map(|p| base_dir.join(p))
    }

    /// Builds one backend per deployment. Relative state paths are taken
    /// relative to `base_dir`; `http_password` fills in for HTTP backends
    /// that carry no password of their own.
    pub fn build_locator(
        &self,
        base_dir: &Path,
        http_password: Option<&str>,
    ) -> Result<StateLocator, ConfigError> {
        let mut stack = Stack::new(&self.stack);
        for component in &self.components {
            stack = stack.with_component(component);
        }

        for (deployment, config) in &self.deployments {
            let backend_id = format!("{}-{}", self.stack, deployment);
            let backend: Arc<dyn StateBackend> = match &config.backend {
                BackendConfig::Local { path } => {
                    Arc::new(LocalBackend::new(backend_id, base_dir.join(path)))
                }
                BackendConfig::Http(http) => {
                    let mut http = http.clone();
                    if http.password.is_none() {
                        http.password = http_password.map(str::to_string);
                    }
                    let backend = HttpBackend::new(backend_id, http)
                        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                    Arc::new(backend)
                }
                BackendConfig::Memory => Arc::new(MemoryBackend::new(backend_id)),
            };
            tracing::debug!(stack = %self.stack, deployment = %deployment, backend = backend.id(), "backend configured");
            stack = stack.with_deployment(deployment, backend);
        }

        Ok(StateLocator::new()
            .with_stack(stack)
            .with_retry_policy(self.retry))
    }
}
