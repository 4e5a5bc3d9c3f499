pub mod http;
pub mod local;
pub mod memory;

pub use http::{HttpBackend, HttpBackendConfig};
pub use local::LocalBackend;
pub use memory::MemoryBackend;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::ManagedResource;
use crate::retry::Retryable;
use crate::terraform::state::{StateAddress, StateFormatError};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend '{backend}' timed out")]
    Timeout { backend: String },

    #[error("backend '{backend}' throttled the request")]
    Throttled { backend: String },

    #[error("backend '{backend}' is locked by {holder}")]
    Locked { backend: String, holder: String },

    #[error("backend '{backend}' is not locked by {lock_id}")]
    NotLocked { backend: String, lock_id: String },

    #[error("{address} is already present in backend '{backend}'")]
    Occupied { backend: String, address: String },

    #[error("{address} is not present in backend '{backend}'")]
    Absent { backend: String, address: String },

    #[error("backend '{backend}' returned HTTP {status}: {message}")]
    Http {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("network error reaching backend '{backend}': {message}")]
    Network { backend: String, message: String },

    #[error("invalid state in backend '{backend}': {source}")]
    InvalidState {
        backend: String,
        #[source]
        source: StateFormatError,
    },

    #[error("I/O error in backend '{backend}': {source}")]
    Io {
        backend: String,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    pub(crate) fn from_format(backend: &str, err: StateFormatError) -> Self {
        match err {
            StateFormatError::Occupied(address) => BackendError::Occupied {
                backend: backend.to_string(),
                address: address.to_string(),
            },
            other => BackendError::InvalidState {
                backend: backend.to_string(),
                source: other,
            },
        }
    }
}

impl Retryable for BackendError {
    fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout { .. }
            | BackendError::Throttled { .. }
            | BackendError::Network { .. } => true,
            BackendError::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    fn timed_out(context: &str) -> Self {
        BackendError::Timeout {
            backend: context.to_string(),
        }
    }
}

/// Advisory lock record, in the JSON shape Terraform backends exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockInfo {
    #[serde(rename = "ID")]
    pub id: String,
    pub operation: String,
    #[serde(default)]
    pub info: String,
    pub who: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub path: String,
}

impl LockInfo {
    pub fn new(operation: &str, info: &str) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let user = std::env::var("USER").unwrap_or_else(|_| "tsr".to_string());

        Self {
            id: format!("tsr-{:x}-{:x}", std::process::id(), now.as_nanos()),
            operation: operation.to_string(),
            info: info.to_string(),
            who: format!("{}@{}", user, host),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: now.as_secs().to_string(),
            path: String::new(),
        }
    }
}

/// The two state primitives a transfer is built from. Neither touches the
/// real-world resource; both require the caller to hold the backend lock.
#[async_trait]
pub trait StateMutation: Send + Sync {
    /// Forget the resource at `address`, returning what was recorded.
    async fn remove(
        &self,
        address: &StateAddress,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError>;

    /// Start managing an existing resource at `address`.
    async fn import(
        &self,
        address: &StateAddress,
        resource: &ManagedResource,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError>;
}

/// One deployment's persisted state.
#[async_trait]
pub trait StateBackend: StateMutation {
    fn id(&self) -> &str;

    async fn get(&self, address: &StateAddress) -> Result<Option<ManagedResource>, BackendError>;

    async fn list(&self) -> Result<Vec<(StateAddress, ManagedResource)>, BackendError>;

    async fn lock(&self, info: &LockInfo) -> Result<(), BackendError>;

    async fn unlock(&self, info: &LockInfo) -> Result<(), BackendError>;
}
