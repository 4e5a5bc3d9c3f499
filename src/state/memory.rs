use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BackendError, LockInfo, StateBackend, StateMutation};
use crate::resource::ManagedResource;
use crate::terraform::state::{StateAddress, StateDocument};

/// In-process state, used for dry runs and tests.
#[derive(Debug)]
pub struct MemoryBackend {
    id: String,
    inner: Mutex<MemoryState>,
}

#[derive(Debug)]
struct MemoryState {
    document: StateDocument,
    lock: Option<LockInfo>,
}

impl MemoryBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_document(id, StateDocument::empty())
    }

    pub fn with_document(id: impl Into<String>, document: StateDocument) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(MemoryState {
                document,
                lock: None,
            }),
        }
    }

    /// Records a resource without going through the lock, for seeding.
    pub async fn seed(
        &self,
        address: &StateAddress,
        resource: &ManagedResource,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        inner
            .document
            .insert(address, resource)
            .map_err(|e| BackendError::from_format(&self.id, e))
    }

    pub async fn snapshot(&self) -> StateDocument {
        self.inner.lock().await.document.clone()
    }

    pub async fn lock_holder(&self) -> Option<LockInfo> {
        self.inner.lock().await.lock.clone()
    }

    fn check_lock(&self, state: &MemoryState, lock: &LockInfo) -> Result<(), BackendError> {
        match &state.lock {
            Some(held) if held.id == lock.id => Ok(()),
            _ => Err(BackendError::NotLocked {
                backend: self.id.clone(),
                lock_id: lock.id.clone(),
            }),
        }
    }
}

#[async_trait]
impl StateMutation for MemoryBackend {
    async fn remove(
        &self,
        address: &StateAddress,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        let mut inner = self.inner.lock().await;
        self.check_lock(&inner, lock)?;

        let removed = inner
            .document
            .remove(address)
            .map_err(|e| BackendError::from_format(&self.id, e))?
            .ok_or_else(|| BackendError::Absent {
                backend: self.id.clone(),
                address: address.to_string(),
            })?;
        inner.document.bump_serial();
        Ok(removed)
    }

    async fn import(
        &self,
        address: &StateAddress,
        resource: &ManagedResource,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        let mut inner = self.inner.lock().await;
        self.check_lock(&inner, lock)?;

        inner
            .document
            .insert(address, resource)
            .map_err(|e| BackendError::from_format(&self.id, e))?;
        inner.document.bump_serial();

        inner
            .document
            .find(address)
            .map_err(|e| BackendError::from_format(&self.id, e))?
            .ok_or_else(|| BackendError::Absent {
                backend: self.id.clone(),
                address: address.to_string(),
            })
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, address: &StateAddress) -> Result<Option<ManagedResource>, BackendError> {
        let inner = self.inner.lock().await;
        inner
            .document
            .find(address)
            .map_err(|e| BackendError::from_format(&self.id, e))
    }

    async fn list(&self) -> Result<Vec<(StateAddress, ManagedResource)>, BackendError> {
        Ok(self.inner.lock().await.document.managed_resources())
    }

    async fn lock(&self, info: &LockInfo) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        match &inner.lock {
            Some(held) if held.id != info.id => Err(BackendError::Locked {
                backend: self.id.clone(),
                holder: held.who.clone(),
            }),
            _ => {
                inner.lock = Some(info.clone());
                Ok(())
            }
        }
    }

    async fn unlock(&self, info: &LockInfo) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().await;
        self.check_lock(&inner, info)?;
        inner.lock = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(name: &str) -> StateAddress {
        StateAddress {
            module: Some("component.web".to_string()),
            resource_type: "aws_instance".to_string(),
            name: name.to_string(),
        }
    }

    fn instance(id: &str) -> ManagedResource {
        ManagedResource {
            resource_type: "aws_instance".to_string(),
            name: "test".to_string(),
            provider: "aws".to_string(),
            provider_id: id.to_string(),
            schema_version: 1,
            attributes: serde_json::json!({"id": id}),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mutations_require_lock() {
        let backend = MemoryBackend::new("dev");
        backend.seed(&address("test"), &instance("i-1")).await.unwrap();

        let lock = LockInfo::new("transfer", "");
        let err = backend.remove(&address("test"), &lock).await.unwrap_err();
        assert!(matches!(err, BackendError::NotLocked { .. }));
        assert!(backend.get(&address("test")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_and_import_under_lock() {
        let backend = MemoryBackend::new("dev");
        backend.seed(&address("test"), &instance("i-1")).await.unwrap();
        let serial = backend.snapshot().await.serial;

        let lock = LockInfo::new("transfer", "");
        backend.lock(&lock).await.unwrap();
        let removed = backend.remove(&address("test"), &lock).await.unwrap();
        assert_eq!(removed.provider_id, "i-1");

        let imported = backend
            .import(&address("other"), &removed, &lock)
            .await
            .unwrap();
        assert_eq!(imported.name, "other");
        assert_eq!(backend.snapshot().await.serial, serial + 2);
        backend.unlock(&lock).await.unwrap();
        assert!(backend.lock_holder().await.is_none());
    }

    #[tokio::test]
    async fn test_second_holder_is_rejected() {
        let backend = MemoryBackend::new("dev");
        let first = LockInfo::new("transfer", "a");
        let second = LockInfo {
            id: "other".to_string(),
            ..LockInfo::new("transfer", "b")
        };

        backend.lock(&first).await.unwrap();
        let err = backend.lock(&second).await.unwrap_err();
        assert!(matches!(err, BackendError::Locked { .. }));
        assert!(backend.unlock(&second).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_absent_address() {
        let backend = MemoryBackend::new("dev");
        let lock = LockInfo::new("transfer", "");
        backend.lock(&lock).await.unwrap();
        let err = backend.remove(&address("missing"), &lock).await.unwrap_err();
        assert!(matches!(err, BackendError::Absent { .. }));
    }
}
