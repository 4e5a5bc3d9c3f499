use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BackendError, LockInfo, StateBackend, StateMutation};
use crate::resource::ManagedResource;
use crate::terraform::state::{StateAddress, StateDocument};

/// A `.tfstate` file on disk, locked through an adjacent
/// `.<file>.lock.info` file the same way Terraform's local backend does.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    id: String,
    path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "terraform.tfstate".to_string());
        let lock_path = path.with_file_name(format!(".{}.lock.info", file_name));

        Self {
            id: id.into(),
            path,
            lock_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn io_error(&self, source: std::io::Error) -> BackendError {
        BackendError::Io {
            backend: self.id.clone(),
            source,
        }
    }

    async fn read_document(&self) -> Result<StateDocument, BackendError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(StateDocument::empty()),
            Ok(contents) => {
                StateDocument::parse(&contents).map_err(|e| BackendError::from_format(&self.id, e))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StateDocument::empty()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn write_document(&self, document: &StateDocument) -> Result<(), BackendError> {
        let json = document
            .to_json()
            .map_err(|e| BackendError::from_format(&self.id, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }

        let tmp = self.path.with_extension("tfstate.tmp");
        fs::write(&tmp, json).await.map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>, BackendError> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(|e| {
                BackendError::InvalidState {
                    backend: self.id.clone(),
                    source: e.into(),
                }
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn check_lock(&self, lock: &LockInfo) -> Result<(), BackendError> {
        match self.read_lock().await? {
            Some(held) if held.id == lock.id => Ok(()),
            _ => Err(BackendError::NotLocked {
                backend: self.id.clone(),
                lock_id: lock.id.clone(),
            }),
        }
    }
}

#[async_trait]
impl StateMutation for LocalBackend {
    async fn remove(
        &self,
        address: &StateAddress,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        self.check_lock(lock).await?;

        let mut document = self.read_document().await?;
        let removed = document
            .remove(address)
            .map_err(|e| BackendError::from_format(&self.id, e))?
            .ok_or_else(|| BackendError::Absent {
                backend: self.id.clone(),
                address: address.to_string(),
            })?;
        document.bump_serial();
        self.write_document(&document).await?;

        tracing::debug!(backend = %self.id, %address, serial = document.serial, "removed from state file");
        Ok(removed)
    }

    async fn import(
        &self,
        address: &StateAddress,
        resource: &ManagedResource,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        self.check_lock(lock).await?;

        let mut document = self.read_document().await?;
        document
            .insert(address, resource)
            .map_err(|e| BackendError::from_format(&self.id, e))?;
        document.bump_serial();
        self.write_document(&document).await?;

        tracing::debug!(backend = %self.id, %address, serial = document.serial, "imported into state file");
        document
            .find(address)
            .map_err(|e| BackendError::from_format(&self.id, e))?
            .ok_or_else(|| BackendError::Absent {
                backend: self.id.clone(),
                address: address.to_string(),
            })
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, address: &StateAddress) -> Result<Option<ManagedResource>, BackendError> {
        self.read_document()
            .await?
            .find(address)
            .map_err(|e| BackendError::from_format(&self.id, e))
    }

    async fn list(&self) -> Result<Vec<(StateAddress, ManagedResource)>, BackendError> {
        Ok(self.read_document().await?.managed_resources())
    }

    async fn lock(&self, info: &LockInfo) -> Result<(), BackendError> {
        let json = serde_json::to_vec_pretty(info).map_err(|e| BackendError::InvalidState {
            backend: self.id.clone(),
            source: e.into(),
        })?;

        if let Some(parent) = self.lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.io_error(e))?;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await;

        match file {
            Ok(mut file) => {
                file.write_all(&json).await.map_err(|e| self.io_error(e))?;
                file.flush().await.map_err(|e| self.io_error(e))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.read_lock().await? {
                Some(held) if held.id == info.id => Ok(()),
                held => Err(BackendError::Locked {
                    backend: self.id.clone(),
                    holder: held
                        .map(|h| h.who)
                        .unwrap_or_else(|| "unknown".to_string()),
                }),
            },
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn unlock(&self, info: &LockInfo) -> Result<(), BackendError> {
        self.check_lock(info).await?;
        fs::remove_file(&self.lock_path)
            .await
            .map_err(|e| self.io_error(e))
    }
}
