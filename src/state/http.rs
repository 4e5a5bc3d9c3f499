use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::{BackendError, LockInfo, StateBackend, StateMutation};
use crate::resource::ManagedResource;
use crate::terraform::state::{StateAddress, StateDocument};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings for Terraform's `http` state backend protocol.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    pub address: String,
    #[serde(default)]
    pub lock_address: Option<String>,
    #[serde(default)]
    pub unlock_address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for HttpBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackendConfig")
            .field("address", &self.address)
            .field("lock_address", &self.lock_address)
            .field("unlock_address", &self.unlock_address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Clone)]
pub struct HttpBackend {
    id: String,
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(id: impl Into<String>, config: HttpBackendConfig) -> Result<Self, BackendError> {
        let id = id.into();
        let timeout = Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network {
                backend: id.clone(),
                message: e.to_string(),
            })?;

        Ok(Self { id, client, config })
    }

    fn lock_address(&self) -> &str {
        self.config
            .lock_address
            .as_deref()
            .unwrap_or(&self.config.address)
    }

    fn unlock_address(&self) -> &str {
        self.config
            .unlock_address
            .as_deref()
            .unwrap_or(&self.config.address)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.username {
            Some(username) => builder.basic_auth(username, self.config.password.as_deref()),
            None => builder,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout {
                backend: self.id.clone(),
            }
        } else {
            BackendError::Network {
                backend: self.id.clone(),
                message: err.to_string(),
            }
        }
    }

    async fn status_error(&self, response: reqwest::Response) -> BackendError {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return BackendError::Throttled {
                backend: self.id.clone(),
            };
        }

        let message = response
            .text()
            .await
            .ok()
            .filter(|body| !body.trim().is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        BackendError::Http {
            backend: self.id.clone(),
            status: status.as_u16(),
            message,
        }
    }

    async fn fetch(&self) -> Result<StateDocument, BackendError> {
        let response = self
            .request(Method::GET, &self.config.address)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await.map_err(|e| self.transport_error(e))?;
                if body.trim().is_empty() {
                    return Ok(StateDocument::empty());
                }
                StateDocument::parse(&body).map_err(|e| BackendError::from_format(&self.id, e))
            }
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(StateDocument::empty()),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn store(&self, document: &StateDocument, lock: &LockInfo) -> Result<(), BackendError> {
        let body = document
            .to_json()
            .map_err(|e| BackendError::from_format(&self.id, e))?;
        let response = self
            .request(Method::POST, &self.config.address)
            .query(&[("ID", lock.id.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(response).await)
        }
    }

    async fn lock_request(
        &self,
        method: &[u8],
        url: &str,
        info: &LockInfo,
    ) -> Result<reqwest::Response, BackendError> {
        let method = Method::from_bytes(method).map_err(|e| BackendError::Network {
            backend: self.id.clone(),
            message: e.to_string(),
        })?;

        self.request(method, url)
            .json(info)
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }
}

#[async_trait]
impl StateMutation for HttpBackend {
    async fn remove(
        &self,
        address: &StateAddress,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        let mut document = self.fetch().await?;
        let removed = document
            .remove(address)
            .map_err(|e| BackendError::from_format(&self.id, e))?
            .ok_or_else(|| BackendError::Absent {
                backend: self.id.clone(),
                address: address.to_string(),
            })?;
        document.bump_serial();
        self.store(&document, lock).await?;

        tracing::debug!(backend = %self.id, %address, serial = document.serial, "removed from remote state");
        Ok(removed)
    }

    async fn import(
        &self,
        address: &StateAddress,
        resource: &ManagedResource,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        let mut document = self.fetch().await?;
        document
            .insert(address, resource)
            .map_err(|e| BackendError::from_format(&self.id, e))?;
        document.bump_serial();
        self.store(&document, lock).await?;

        tracing::debug!(backend = %self.id, %address, serial = document.serial, "imported into remote state");
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
impl StateBackend for HttpBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self, address: &StateAddress) -> Result<Option<ManagedResource>, BackendError> {
        self.fetch()
            .await?
            .find(address)
            .map_err(|e| BackendError::from_format(&self.id, e))
    }

    async fn list(&self) -> Result<Vec<(StateAddress, ManagedResource)>, BackendError> {
        Ok(self.fetch().await?.managed_resources())
    }

    async fn lock(&self, info: &LockInfo) -> Result<(), BackendError> {
        let response = self.lock_request(b"LOCK", self.lock_address(), info).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::LOCKED | StatusCode::CONFLICT => {
                let holder = response
                    .json::<LockInfo>()
                    .await
                    .map(|held| held.who)
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(BackendError::Locked {
                    backend: self.id.clone(),
                    holder,
                })
            }
            _ => Err(self.status_error(response).await),
        }
    }

    async fn unlock(&self, info: &LockInfo) -> Result<(), BackendError> {
        let response = self
            .lock_request(b"UNLOCK", self.unlock_address(), info)
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::LOCKED | StatusCode::CONFLICT => Err(BackendError::NotLocked {
                backend: self.id.clone(),
                lock_id: info.id.clone(),
            }),
            _ => Err(self.status_error(response).await),
        }
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
