//! Library entry point tying locator, planner, executor and registry
//! together.

use std::collections::BTreeMap;

use crate::error::{ConflictError, TransferError};
use crate::executor::{ExecutionReport, Executor};
use crate::locator::ResourceKey;
use crate::ownership::{OwnershipError, OwnershipRegistry};
use crate::planner::{PlanId, PlanStatus, Planner, TransferPlan, TransferRequest};
use crate::providers::ProviderQuery;
use crate::retry::RetryPolicy;
use crate::stack::StateLocator;

pub struct Coordinator {
    locator: StateLocator,
    provider: Box<dyn ProviderQuery>,
    registry: OwnershipRegistry,
    plans: BTreeMap<PlanId, TransferPlan>,
    next_id: u64,
    retry: RetryPolicy,
}

impl Coordinator {
    pub fn new(locator: StateLocator, provider: Box<dyn ProviderQuery>) -> Self {
        Self {
            locator,
            provider,
            registry: OwnershipRegistry::new(),
            plans: BTreeMap::new(),
            next_id: 1,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_registry(mut self, registry: OwnershipRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn locator(&self) -> &StateLocator {
        &self.locator
    }

    pub fn registry(&self) -> &OwnershipRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OwnershipRegistry {
        &mut self.registry
    }

    pub fn into_registry(self) -> OwnershipRegistry {
        self.registry
    }

    pub fn get_plan(&self, id: PlanId) -> Option<&TransferPlan> {
        self.plans.get(&id)
    }

    pub fn plans(&self) -> impl Iterator<Item = &TransferPlan> {
        self.plans.values()
    }

    /// Validates a request and records it as a pending plan. The plan's
    /// resource key stays reserved until the plan reaches a terminal state.
    pub async fn plan(&mut self, request: TransferRequest) -> Result<TransferPlan, TransferError> {
        let id = PlanId(self.next_id);

        let plan = Planner::new(&self.locator, self.provider.as_ref(), &self.registry)
            .with_retry_policy(self.retry)
            .plan(id, request, self.plans.values())
            .await?;

        if let Err(e) = self.registry.reserve(&plan.resource_key, id) {
            let holder = match e {
                OwnershipError::Reserved { plan_id, .. } => plan_id,
                _ => id,
            };
            return Err(ConflictError::PlanInFlight {
                plan_id: holder,
                locator: plan.resource_key.to_string(),
            }
            .into());
        }

        self.next_id += 1;
        self.plans.insert(id, plan.clone());
        Ok(plan)
    }

    /// Runs a pending plan to a terminal state. The returned report carries
    /// the final status; on failure the plan's status is updated before the
    /// error is returned.
    pub async fn execute(&mut self, id: PlanId) -> Result<ExecutionReport, TransferError> {
        let plan = self.plans.get(&id).ok_or(TransferError::UnknownPlan(id))?;
        if plan.status != PlanStatus::Pending {
            return Err(ConflictError::NotPending {
                plan_id: id,
                status: plan.status,
            }
            .into());
        }

        let source = self.locator.resolve_backend(&plan.source)?;
        let destination = self.locator.resolve_backend(&plan.destination)?;

        let mut report = Executor::new(self.provider.as_ref())
            .with_retry_policy(self.retry)
            .execute(plan, source, destination)
            .await;

        let (key, from, to) = (
            plan.resource_key.clone(),
            plan.source.deployment_id.clone(),
            plan.destination.deployment_id.clone(),
        );

        if report.status == PlanStatus::Applied {
            let landed = report
                .imported
                .as_ref()
                .map(|imported| imported.key())
                .unwrap_or_else(|| key.clone());
            if let Err(source) = self.record_owner(&key, &landed, &from, &to) {
                tracing::error!(plan_id = %id, %key, "ownership not updated after transfer: {source}");
                report.error = Some(TransferError::Ownership {
                    plan_id: id,
                    key: key.to_string(),
                    source,
                });
            }
        }

        if report.status.is_terminal() {
            self.registry.release_reservation(&key, id);
        }
        if let Some(plan) = self.plans.get_mut(&id) {
            plan.status = report.status;
        }

        match report.error.take() {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    /// Plans and executes in one step.
    pub async fn transfer(&mut self, request: TransferRequest) -> Result<ExecutionReport, TransferError> {
        let plan = self.plan(request).await?;
        self.execute(plan.id).await
    }

    /// Forgets a plan once its outcome has been acknowledged. Only plans in
    /// a terminal state can be confirmed.
    pub fn confirm(&mut self, id: PlanId) -> Result<TransferPlan, TransferError> {
        let plan = self.plans.get(&id).ok_or(TransferError::UnknownPlan(id))?;
        if !plan.status.is_terminal() {
            return Err(ConflictError::NotTerminal {
                plan_id: id,
                status: plan.status,
            }
            .into());
        }
        self.plans.remove(&id).ok_or(TransferError::UnknownPlan(id))
    }

    /// Drops a plan that never started mutating anything.
    pub fn cancel(&mut self, id: PlanId) -> Result<TransferPlan, TransferError> {
        let plan = self.plans.get(&id).ok_or(TransferError::UnknownPlan(id))?;
        if plan.status != PlanStatus::Pending {
            return Err(ConflictError::NotPending {
                plan_id: id,
                status: plan.status,
            }
            .into());
        }
        self.registry.release_reservation(&plan.resource_key, id);
        self.plans.remove(&id).ok_or(TransferError::UnknownPlan(id))
    }

    /// Clears a failed plan once its states have been repaired by hand,
    /// releasing the key it kept reserved.
    pub fn resolve(&mut self, id: PlanId) -> Result<TransferPlan, TransferError> {
        let plan = self.plans.get(&id).ok_or(TransferError::UnknownPlan(id))?;
        if plan.status != PlanStatus::Failed {
            return Err(ConflictError::NotFailed {
                plan_id: id,
                status: plan.status,
            }
            .into());
        }
        self.registry.release_reservation(&plan.resource_key, id);
        tracing::info!(plan_id = %id, key = %plan.resource_key, "failed plan resolved");
        self.plans.remove(&id).ok_or(TransferError::UnknownPlan(id))
    }

    /// Hands `key` to `to`. A normalised identifier at the destination
    /// re-keys the record rather than adding a second one.
    fn record_owner(
        &mut self,
        key: &ResourceKey,
        landed: &ResourceKey,
        from: &str,
        to: &str,
    ) -> Result<(), OwnershipError> {
        if landed != key
            && let Some(owner) = self.registry.owner_of(landed)
        {
            return Err(OwnershipError::AlreadyOwned {
                key: landed.clone(),
                owner: owner.to_string(),
            });
        }

        match self.registry.owner_of(key) {
            Some(owner) if owner == to => {}
            Some(_) => self.registry.transfer(key, from, to)?,
            None => self.registry.claim(key, to)?,
        }
        if landed != key {
            self.registry.rekey(key, landed)?;
        }
        Ok(())
    }
}
