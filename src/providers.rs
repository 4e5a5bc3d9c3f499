pub mod inventory;

pub use inventory::InventoryProvider;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::RemoteResource;
use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider query timed out: {0}")]
    Timeout(String),

    #[error("provider throttled the request: {0}")]
    Throttled(String),

    #[error("provider query failed: {0}")]
    Query(String),

    #[error("invalid inventory: {0}")]
    Inventory(String),
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Throttled(_))
    }

    fn timed_out(context: &str) -> Self {
        ProviderError::Timeout(context.to_string())
    }
}

/// Read-only view of the real-world resources behind state entries.
#[async_trait]
pub trait ProviderQuery: Send + Sync {
    fn name(&self) -> &str;

    /// Current attributes of the resource, or `None` when it no longer exists.
    async fn describe(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> Result<Option<RemoteResource>, ProviderError>;
}

pub async fn get_provider(
    name: &str,
    inventory: Option<&Path>,
) -> Result<Box<dyn ProviderQuery>, ProviderError> {
    match name {
        "inventory" => {
            let provider = match inventory {
                Some(path) => InventoryProvider::load(path).await?,
                None => InventoryProvider::default(),
            };
            Ok(Box::new(provider))
        }
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}
