//! Transfer planning: validate a cross-deployment move before anything is
//! mutated.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConflictError, TransferError};
use crate::locator::{ResourceKey, ResourceLocator};
use crate::ownership::OwnershipRegistry;
use crate::providers::ProviderQuery;
use crate::resource::{ManagedResource, RemoteResource};
use crate::retry::{RetryPolicy, with_retry};
use crate::schema::{ResourceConfig, compatibility_mismatches};
use crate::stack::{NotFoundError, StateLocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub u64);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Applied,
    RolledBack,
    /// Rollback itself failed; the key stays reserved until an operator
    /// repairs the states by hand.
    Failed,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Applied | PlanStatus::RolledBack)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Applied => "applied",
            PlanStatus::RolledBack => "rolled back",
            PlanStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub source: ResourceLocator,
    pub destination: ResourceLocator,
    pub preserve_id: bool,
    pub declared: Option<ResourceConfig>,
}

impl TransferRequest {
    pub fn new(source: ResourceLocator, destination: ResourceLocator, preserve_id: bool) -> Self {
        Self {
            source,
            destination,
            preserve_id,
            declared: None,
        }
    }

    pub fn with_declared(mut self, declared: ResourceConfig) -> Self {
        self.declared = Some(declared);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferPlan {
    pub id: PlanId,
    pub source: ResourceLocator,
    pub destination: ResourceLocator,
    pub preserve_id: bool,
    pub status: PlanStatus,
    /// Deployments this plan touches. Nothing outside it is read or written.
    pub scope: BTreeSet<String>,
    pub resource_key: ResourceKey,
    /// The source entry as recorded at plan time, restored on rollback.
    pub snapshot: ManagedResource,
    /// Provider view at plan time.
    pub remote: RemoteResource,
}

impl TransferPlan {
    pub fn touches(&self, locator: &ResourceLocator) -> bool {
        &self.source == locator || &self.destination == locator
    }

    pub fn holds_reservation(&self) -> bool {
        matches!(self.status, PlanStatus::Pending | PlanStatus::Failed)
    }
}

pub struct Planner<'a> {
    locator: &'a StateLocator,
    provider: &'a dyn ProviderQuery,
    registry: &'a OwnershipRegistry,
    retry: RetryPolicy,
}

impl<'a> Planner<'a> {
    pub fn new(
        locator: &'a StateLocator,
        provider: &'a dyn ProviderQuery,
        registry: &'a OwnershipRegistry,
    ) -> Self {
        Self {
            locator,
            provider,
            registry,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks, in order: source exists, destination is free, destination
    /// can adopt the resource, no pending plan overlaps, source deployment
    /// owns the key. Nothing is mutated.
    pub async fn plan<'p>(
        &self,
        id: PlanId,
        request: TransferRequest,
        pending: impl IntoIterator<Item = &'p TransferPlan>,
    ) -> Result<TransferPlan, TransferError> {
        let TransferRequest {
            source,
            destination,
            preserve_id,
            declared,
        } = request;

        if source == destination {
            return Err(ConflictError::SameLocation {
                locator: source.to_string(),
            }
            .into());
        }

        // (a) source exists
        let source_location = self.locator.inspect(&source).await?;
        let destination_location = self.locator.inspect(&destination).await?;

        let Some(snapshot) = source_location.resource else {
            // an already-applied transfer shows up as an occupied destination
            if destination_location.resource.is_some() {
                return Err(ConflictError::DestinationOccupied {
                    destination: destination.to_string(),
                }
                .into());
            }
            return Err(NotFoundError::ResourceAbsent {
                locator: source.to_string(),
                backend: source_location.backend.id().to_string(),
            }
            .into());
        };

        // (b) destination unoccupied
        if destination_location.resource.is_some() {
            return Err(ConflictError::DestinationOccupied {
                destination: destination.to_string(),
            }
            .into());
        }

        // (c) attribute compatibility
        if let Some(config) = &declared {
            config
                .validate()
                .map_err(|message| TransferError::InvalidDeclaration {
                    destination: destination.to_string(),
                    message,
                })?;
        }

        let key = snapshot.key();
        let remote = self.describe(&source, &key).await?;
        let mismatches =
            compatibility_mismatches(destination.resource_type(), declared.as_ref(), &remote);
        if !mismatches.is_empty() {
            return Err(TransferError::Compatibility {
                source_locator: source.to_string(),
                destination: destination.to_string(),
                mismatches,
            });
        }

        // (d) first pending plan wins
        for other in pending {
            if !other.holds_reservation() {
                continue;
            }
            let overlap = [&source, &destination]
                .into_iter()
                .find(|l| other.touches(l))
                .map(|l| l.to_string())
                .or_else(|| (other.resource_key == key).then(|| key.to_string()));
            if let Some(locator) = overlap {
                return Err(ConflictError::PlanInFlight {
                    plan_id: other.id,
                    locator,
                }
                .into());
            }
        }
        if let Some(holder) = self.registry.reservation(&key).filter(|h| *h != id) {
            return Err(ConflictError::PlanInFlight {
                plan_id: holder,
                locator: key.to_string(),
            }
            .into());
        }

        // (e) single writer
        if let Some(owner) = self.registry.owner_of(&key)
            && owner != source.deployment_id
        {
            return Err(ConflictError::NotOwner {
                key: key.to_string(),
                owner: owner.to_string(),
                deployment: source.deployment_id.clone(),
            }
            .into());
        }

        let scope = BTreeSet::from([
            source.deployment_id.clone(),
            destination.deployment_id.clone(),
        ]);

        tracing::info!(
            plan_id = %id,
            source = %source,
            destination = %destination,
            %key,
            preserve_id,
            "transfer planned"
        );

        Ok(TransferPlan {
            id,
            source,
            destination,
            preserve_id,
            status: PlanStatus::Pending,
            scope,
            resource_key: key,
            snapshot,
            remote,
        })
    }

    async fn describe(
        &self,
        source: &ResourceLocator,
        key: &ResourceKey,
    ) -> Result<RemoteResource, TransferError> {
        let remote = with_retry(&self.retry, self.provider.name(), || {
            self.provider.describe(&key.resource_type, &key.provider_id)
        })
        .await
        .map_err(|e| TransferError::Provider {
            key: key.to_string(),
            locator: source.to_string(),
            source: e.error,
        })?;

        remote.ok_or_else(|| {
            NotFoundError::ResourceGone {
                locator: source.to_string(),
                key: key.to_string(),
            }
            .into()
        })
    }
}
