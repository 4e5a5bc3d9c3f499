//! Single-writer bookkeeping for resources shared between deployments.
//!
//! Each resource key has at most one owning deployment. Readers are
//! informational and never affect ownership. The registry also tracks
//! which plan, if any, currently has a transfer in flight for a key.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::locator::ResourceKey;
use crate::planner::PlanId;

#[derive(Debug, Error, PartialEq)]
pub enum OwnershipError {
    #[error("{key} is already owned by deployment '{owner}'")]
    AlreadyOwned { key: ResourceKey, owner: String },

    #[error("deployment '{expected}' does not own {key} (owner: {})", actual.as_deref().unwrap_or("none"))]
    NotOwner {
        key: ResourceKey,
        expected: String,
        actual: Option<String>,
    },

    #[error("{key} has no owner")]
    Unclaimed { key: ResourceKey },

    #[error("{key} is reserved by {plan_id}")]
    Reserved { key: ResourceKey, plan_id: PlanId },

    #[error("ownership registry persistence failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub resource_key: ResourceKey,
    pub owning_deployment: String,
    #[serde(default)]
    pub readers: BTreeSet<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OwnershipRegistry {
    records: BTreeMap<String, OwnershipRecord>,
    #[serde(skip)]
    in_flight: BTreeMap<ResourceKey, PlanId>,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("tsr").join("ownership.json"))
    }

    pub async fn load(path: &Path) -> Result<Self, OwnershipError> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| OwnershipError::Persistence(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(OwnershipError::Persistence(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), OwnershipError> {
        let persist = |e: &dyn std::fmt::Display| {
            OwnershipError::Persistence(format!("{}: {}", path.display(), e))
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| persist(&e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| persist(&e))?;
        tokio::fs::write(path, json).await.map_err(|e| persist(&e))
    }

    pub fn owner_of(&self, key: &ResourceKey) -> Option<&str> {
        self.records
            .get(&key.to_string())
            .map(|r| r.owning_deployment.as_str())
    }

    pub fn record(&self, key: &ResourceKey) -> Option<&OwnershipRecord> {
        self.records.get(&key.to_string())
    }

    pub fn records(&self) -> impl Iterator<Item = &OwnershipRecord> {
        self.records.values()
    }

    pub fn claim(&mut self, key: &ResourceKey, deployment: &str) -> Result<(), OwnershipError> {
        if let Some(record) = self.records.get(&key.to_string()) {
            return Err(OwnershipError::AlreadyOwned {
                key: key.clone(),
                owner: record.owning_deployment.clone(),
            });
        }

        self.records.insert(
            key.to_string(),
            OwnershipRecord {
                resource_key: key.clone(),
                owning_deployment: deployment.to_string(),
                readers: BTreeSet::new(),
            },
        );
        tracing::info!(%key, deployment, "ownership claimed");
        Ok(())
    }

    pub fn transfer(&mut self, key: &ResourceKey, from: &str, to: &str) -> Result<(), OwnershipError> {
        match self.records.get_mut(&key.to_string()) {
            Some(record) if record.owning_deployment == from => {
                record.owning_deployment = to.to_string();
                record.readers.remove(to);
                tracing::info!(%key, from, to, "ownership transferred");
                Ok(())
            }
            other => Err(OwnershipError::NotOwner {
                key: key.clone(),
                expected: from.to_string(),
                actual: other.map(|r| r.owning_deployment.clone()),
            }),
        }
    }

    /// Drops the record entirely; only the owner may do so.
    pub fn release(&mut self, key: &ResourceKey, owner: &str) -> Result<OwnershipRecord, OwnershipError> {
        let actual = self.owner_of(key).map(str::to_string);
        if actual.as_deref() != Some(owner) {
            return Err(OwnershipError::NotOwner {
                key: key.clone(),
                expected: owner.to_string(),
                actual,
            });
        }
        self.records
            .remove(&key.to_string())
            .ok_or_else(|| OwnershipError::Unclaimed { key: key.clone() })
    }

    /// Moves a record to the key the resource is now known by, keeping its
    /// owner and readers.
    pub fn rekey(&mut self, old: &ResourceKey, new: &ResourceKey) -> Result<(), OwnershipError> {
        if let Some(existing) = self.records.get(&new.to_string()) {
            return Err(OwnershipError::AlreadyOwned {
                key: new.clone(),
                owner: existing.owning_deployment.clone(),
            });
        }
        let mut record = self
            .records
            .remove(&old.to_string())
            .ok_or_else(|| OwnershipError::Unclaimed { key: old.clone() })?;

        record.resource_key = new.clone();
        tracing::info!(%old, %new, deployment = %record.owning_deployment, "ownership re-keyed");
        self.records.insert(new.to_string(), record);
        Ok(())
    }

    pub fn add_reader(&mut self, key: &ResourceKey, deployment: &str) -> Result<bool, OwnershipError> {
        let record = self
            .records
            .get_mut(&key.to_string())
            .ok_or_else(|| OwnershipError::Unclaimed { key: key.clone() })?;

        if record.owning_deployment == deployment {
            return Ok(false);
        }
        Ok(record.readers.insert(deployment.to_string()))
    }

    pub fn remove_reader(&mut self, key: &ResourceKey, deployment: &str) -> Result<bool, OwnershipError> {
        let record = self
            .records
            .get_mut(&key.to_string())
            .ok_or_else(|| OwnershipError::Unclaimed { key: key.clone() })?;
        Ok(record.readers.remove(deployment))
    }

    pub fn reservation(&self, key: &ResourceKey) -> Option<PlanId> {
        self.in_flight.get(key).copied()
    }

    /// Marks `key` as having a transfer in flight. Re-reserving for the
    /// same plan is a no-op.
    pub fn reserve(&mut self, key: &ResourceKey, plan_id: PlanId) -> Result<(), OwnershipError> {
        match self.in_flight.get(key) {
            Some(holder) if *holder != plan_id => Err(OwnershipError::Reserved {
                key: key.clone(),
                plan_id: *holder,
            }),
            _ => {
                self.in_flight.insert(key.clone(), plan_id);
                Ok(())
            }
        }
    }

    pub fn release_reservation(&mut self, key: &ResourceKey, plan_id: PlanId) -> bool {
        if self.in_flight.get(key) == Some(&plan_id) {
            self.in_flight.remove(key);
            true
        } else {
            false
        }
    }
}
