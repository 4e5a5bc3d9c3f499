use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProviderError, ProviderQuery};
use crate::locator::ResourceKey;
use crate::resource::RemoteResource;

/// Provider view backed by an exported inventory of real-world resources.
///
/// The inventory file is JSON: `{"resources": [{"resource_type": ...,
/// "provider_id": ..., "attributes": {...}}]}`.
#[derive(Debug, Default, Clone)]
pub struct InventoryProvider {
    resources: BTreeMap<ResourceKey, RemoteResource>,
}

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    resources: Vec<RemoteResource>,
}

impl InventoryProvider {
    pub fn new(resources: impl IntoIterator<Item = RemoteResource>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }

    pub fn parse(json: &str) -> Result<Self, ProviderError> {
        let file: InventoryFile =
            serde_json::from_str(json).map_err(|e| ProviderError::Inventory(e.to_string()))?;
        Ok(Self::new(file.resources))
    }

    pub async fn load(path: &Path) -> Result<Self, ProviderError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProviderError::Inventory(format!("{}: {}", path.display(), e)))?;
        let provider = Self::parse(&json)?;
        tracing::debug!(path = %path.display(), count = provider.len(), "inventory loaded");
        Ok(provider)
    }

    pub fn insert(&mut self, resource: RemoteResource) {
        self.resources.insert(resource.key(), resource);
    }

    /// Drops a resource, as if it had been deleted outside Terraform.
    pub fn forget(&mut self, key: &ResourceKey) -> Option<RemoteResource> {
        self.resources.remove(key)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[async_trait]
impl ProviderQuery for InventoryProvider {
    fn name(&self) -> &str {
        "inventory"
    }

    async fn describe(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let key = ResourceKey::new(resource_type, provider_id);
        Ok(self.resources.get(&key).cloned())
    }
}
