//! Transactional execution of a transfer plan across two state backends.
//!
//! Success path: `Pending -> Removing -> Removed -> Importing -> Applied`.
//! Failure paths: `Removing -> RollbackRemove -> Pending` and
//! `Importing -> RollbackImport -> Removed -> RollbackRemove -> Pending`.
//!
//! Both ends are re-read once the locks are held; a plan whose source or
//! destination changed since planning is refused before anything moves.
//!
//! Once the remove has committed the transaction always runs to `Applied`
//! or back to `Pending` with the source restored. If restoring fails the
//! error is escalated as a rollback failure and the plan is left `Failed`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{ConflictError, TransferError};
use crate::locator::ResourceLocator;
use crate::planner::{PlanId, PlanStatus, TransferPlan};
use crate::providers::ProviderQuery;
use crate::resource::{ManagedResource, RemoteResource};
use crate::retry::{RetryPolicy, with_retry};
use crate::stack::NotFoundError;
use crate::state::{BackendError, LockInfo, StateBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecPhase {
    Pending,
    Removing,
    Removed,
    Importing,
    Applied,
    RollbackImport,
    RollbackRemove,
}

impl fmt::Display for ExecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecPhase::Pending => "PENDING",
            ExecPhase::Removing => "REMOVING",
            ExecPhase::Removed => "REMOVED",
            ExecPhase::Importing => "IMPORTING",
            ExecPhase::Applied => "APPLIED",
            ExecPhase::RollbackImport => "ROLLBACK_IMPORT",
            ExecPhase::RollbackRemove => "ROLLBACK_REMOVE",
        };
        f.write_str(s)
    }
}

pub fn allowed_transitions(from: ExecPhase) -> &'static [ExecPhase] {
    use ExecPhase::*;
    match from {
        Pending => &[Removing],
        Removing => &[Removed, RollbackRemove],
        Removed => &[Importing, RollbackRemove],
        Importing => &[Applied, RollbackImport],
        RollbackImport => &[Removed],
        RollbackRemove => &[Pending],
        Applied => &[],
    }
}

pub fn validate_transition(from: ExecPhase, to: ExecPhase) -> Result<(), TransferError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransferError::IllegalTransition { from, to })
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    plan_id: PlanId,
    phase: ExecPhase,
    history: Vec<ExecPhase>,
}

impl Transaction {
    pub fn new(plan_id: PlanId) -> Self {
        Self {
            plan_id,
            phase: ExecPhase::Pending,
            history: vec![ExecPhase::Pending],
        }
    }

    pub fn phase(&self) -> ExecPhase {
        self.phase
    }

    pub fn history(&self) -> &[ExecPhase] {
        &self.history
    }

    pub fn advance(&mut self, to: ExecPhase) -> Result<(), TransferError> {
        validate_transition(self.phase, to)?;
        tracing::debug!(plan_id = %self.plan_id, from = %self.phase, %to, "phase transition");
        self.phase = to;
        self.history.push(to);
        Ok(())
    }

    /// Plan status implied by where the transaction stopped.
    pub fn status(&self) -> PlanStatus {
        match self.phase {
            ExecPhase::Applied => PlanStatus::Applied,
            ExecPhase::Pending if self.history.contains(&ExecPhase::Removing) => {
                PlanStatus::RolledBack
            }
            ExecPhase::Pending => PlanStatus::Pending,
            _ => PlanStatus::Failed,
        }
    }
}

#[derive(Debug)]
pub struct ExecutionReport {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub phases: Vec<ExecPhase>,
    pub imported: Option<ManagedResource>,
    pub error: Option<TransferError>,
}

impl ExecutionReport {
    pub fn into_result(self) -> Result<ManagedResource, TransferError> {
        match (self.imported, self.error) {
            (_, Some(error)) => Err(error),
            (Some(imported), None) => Ok(imported),
            (None, None) => Err(TransferError::UnknownPlan(self.plan_id)),
        }
    }
}

pub struct Executor<'a> {
    provider: &'a dyn ProviderQuery,
    retry: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(provider: &'a dyn ProviderQuery) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn execute(
        &self,
        plan: &TransferPlan,
        source: Arc<dyn StateBackend>,
        destination: Arc<dyn StateBackend>,
    ) -> ExecutionReport {
        let lock = LockInfo::new("transfer", &plan.id.to_string());
        let mut tx = Transaction::new(plan.id);

        tracing::info!(
            plan_id = %plan.id,
            source = %plan.source,
            destination = %plan.destination,
            "executing transfer"
        );

        let result = match self.acquire_locks(plan, &source, &destination, &lock).await {
            Ok(held) => {
                let result = self
                    .run(plan, &mut tx, source.as_ref(), destination.as_ref(), &lock)
                    .await;
                self.release_locks(plan, source.id(), &held, &lock).await;
                result
            }
            Err(e) => Err(e),
        };

        let status = tx.status();
        match &result {
            Ok(_) => tracing::info!(plan_id = %plan.id, "transfer applied"),
            Err(e) if e.is_rollback_failure() => tracing::error!(
                plan_id = %plan.id,
                source = %plan.source,
                destination = %plan.destination,
                "CRITICAL: transfer could not be rolled back, state needs manual repair: {e}"
            ),
            Err(e) => tracing::warn!(plan_id = %plan.id, %status, "transfer did not apply: {e}"),
        }

        let (imported, error) = match result {
            Ok(imported) => (Some(imported), None),
            Err(e) => (None, Some(e)),
        };
        ExecutionReport {
            plan_id: plan.id,
            status,
            phases: tx.history().to_vec(),
            imported,
            error,
        }
    }

    async fn run(
        &self,
        plan: &TransferPlan,
        tx: &mut Transaction,
        source: &dyn StateBackend,
        destination: &dyn StateBackend,
        lock: &LockInfo,
    ) -> Result<ManagedResource, TransferError> {
        self.recheck_plan(plan, source, destination).await?;
        let remote = self.confirm_exists(plan).await?;

        tx.advance(ExecPhase::Removing)?;
        let source_address = plan.source.state_address();
        let removed = match self
            .call("remove", &plan.source, source, || source.remove(&source_address, lock))
            .await
        {
            Ok(removed) => removed,
            Err(cause) => {
                tx.advance(ExecPhase::RollbackRemove)?;
                if let Err(rollback) = self
                    .restore_source(plan, source, &plan.snapshot, lock)
                    .await
                {
                    return Err(rollback_failure(plan, cause, rollback));
                }
                tx.advance(ExecPhase::Pending)?;
                return Err(cause);
            }
        };
        tx.advance(ExecPhase::Removed)?;

        if removed.key() != plan.resource_key {
            let cause = stale(
                plan,
                &plan.source,
                format!("held {} when removed", removed.key()),
            );
            tx.advance(ExecPhase::RollbackRemove)?;
            if let Err(rollback) = self.restore_source(plan, source, &removed, lock).await {
                return Err(rollback_failure(plan, cause, rollback));
            }
            tx.advance(ExecPhase::Pending)?;
            return Err(cause);
        }

        tx.advance(ExecPhase::Importing)?;
        let destination_address = plan.destination.state_address();
        let incoming = incoming_resource(plan, &removed, &remote);

        let imported = self
            .call("import", &plan.destination, destination, || {
                destination.import(&destination_address, &incoming, lock)
            })
            .await;
        let outcome = match imported {
            Ok(imported) => verify_identifier(plan, &removed, imported),
            Err(e) => Err(e),
        };

        let cause = match outcome {
            Ok(imported) => {
                tx.advance(ExecPhase::Applied)?;
                return Ok(imported);
            }
            Err(cause) => cause,
        };

        tx.advance(ExecPhase::RollbackImport)?;
        if let Err(rollback) = self
            .clear_destination(plan, destination, &incoming, lock)
            .await
        {
            return Err(rollback_failure(plan, cause, rollback));
        }
        tx.advance(ExecPhase::Removed)?;

        tx.advance(ExecPhase::RollbackRemove)?;
        if let Err(rollback) = self.restore_source(plan, source, &removed, lock).await {
            return Err(rollback_failure(plan, cause, rollback));
        }
        tx.advance(ExecPhase::Pending)?;

        Err(cause)
    }

    /// Re-reads both ends under lock; state may have moved on since planning.
    async fn recheck_plan(
        &self,
        plan: &TransferPlan,
        source: &dyn StateBackend,
        destination: &dyn StateBackend,
    ) -> Result<(), TransferError> {
        let source_address = plan.source.state_address();
        let current = self
            .call("recheck", &plan.source, source, || source.get(&source_address))
            .await?;
        match current {
            None => return Err(stale(plan, &plan.source, "no longer exists".to_string())),
            Some(current) if current.key() != plan.resource_key => {
                return Err(stale(
                    plan,
                    &plan.source,
                    format!("now holds {} instead of {}", current.key(), plan.resource_key),
                ));
            }
            Some(_) => {}
        }

        let destination_address = plan.destination.state_address();
        let occupied = self
            .call("recheck", &plan.destination, destination, || {
                destination.get(&destination_address)
            })
            .await?;
        if occupied.is_some() {
            return Err(ConflictError::DestinationOccupied {
                destination: plan.destination.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn confirm_exists(&self, plan: &TransferPlan) -> Result<RemoteResource, TransferError> {
        let key = &plan.resource_key;
        let remote = with_retry(&self.retry, self.provider.name(), || {
            self.provider.describe(&key.resource_type, &key.provider_id)
        })
        .await
        .map_err(|e| TransferError::Provider {
            key: key.to_string(),
            locator: plan.source.to_string(),
            source: e.error,
        })?;

        remote.ok_or_else(|| {
            NotFoundError::ResourceGone {
                locator: plan.source.to_string(),
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Puts `resource` back at the source unless it never left.
    async fn restore_source(
        &self,
        plan: &TransferPlan,
        source: &dyn StateBackend,
        resource: &ManagedResource,
        lock: &LockInfo,
    ) -> Result<(), TransferError> {
        let address = plan.source.state_address();
        let current = self
            .call("rollback read", &plan.source, source, || source.get(&address))
            .await?;
        if current.is_some() {
            return Ok(());
        }

        self.call("rollback import", &plan.source, source, || {
            source.import(&address, resource, lock)
        })
        .await?;
        tracing::info!(plan_id = %plan.id, source = %plan.source, "source state restored");
        Ok(())
    }

    /// Removes whatever this transaction left at the destination.
    async fn clear_destination(
        &self,
        plan: &TransferPlan,
        destination: &dyn StateBackend,
        incoming: &ManagedResource,
        lock: &LockInfo,
    ) -> Result<(), TransferError> {
        let address = plan.destination.state_address();
        let current = self
            .call("rollback read", &plan.destination, destination, || {
                destination.get(&address)
            })
            .await?;

        let ours = current.is_some_and(|r| {
            r.provider_id == incoming.provider_id || r.provider_id == plan.resource_key.provider_id
        });
        if !ours {
            return Ok(());
        }

        self.call("rollback remove", &plan.destination, destination, || {
            destination.remove(&address, lock)
        })
        .await?;
        Ok(())
    }

    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        locator: &ResourceLocator,
        backend: &dyn StateBackend,
        f: F,
    ) -> Result<T, TransferError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let context = format!("{} on {}", operation, backend.id());
        with_retry(&self.retry, &context, f)
            .await
            .map_err(|e| TransferError::from_backend(operation, locator.to_string(), e.attempts, e.error))
    }

    /// Locks both backends in id order; a shared backend is locked once.
    async fn acquire_locks(
        &self,
        plan: &TransferPlan,
        source: &Arc<dyn StateBackend>,
        destination: &Arc<dyn StateBackend>,
        lock: &LockInfo,
    ) -> Result<Vec<Arc<dyn StateBackend>>, TransferError> {
        let mut ordered = vec![source.clone(), destination.clone()];
        ordered.sort_by(|a, b| a.id().cmp(b.id()));
        ordered.dedup_by(|a, b| a.id() == b.id());

        let mut held: Vec<Arc<dyn StateBackend>> = Vec::with_capacity(ordered.len());
        for backend in ordered {
            let locator = self.locator_for(plan, source.id(), backend.as_ref());
            match self
                .call("lock", locator, backend.as_ref(), || backend.lock(lock))
                .await
            {
                Ok(()) => {
                    tracing::debug!(plan_id = %plan.id, backend = backend.id(), "backend locked");
                    held.push(backend);
                }
                Err(e) => {
                    self.release_locks(plan, source.id(), &held, lock).await;
                    return Err(e);
                }
            }
        }
        Ok(held)
    }

    async fn release_locks(
        &self,
        plan: &TransferPlan,
        source_id: &str,
        held: &[Arc<dyn StateBackend>],
        lock: &LockInfo,
    ) {
        for backend in held.iter().rev() {
            let locator = self.locator_for(plan, source_id, backend.as_ref());
            match self
                .call("unlock", locator, backend.as_ref(), || backend.unlock(lock))
                .await
            {
                Ok(()) => {
                    tracing::debug!(plan_id = %plan.id, backend = backend.id(), "backend unlocked")
                }
                Err(e) => tracing::error!(
                    plan_id = %plan.id,
                    backend = backend.id(),
                    lock_id = %lock.id,
                    "failed to release backend lock: {e}"
                ),
            }
        }
    }

    fn locator_for<'p>(
        &self,
        plan: &'p TransferPlan,
        source_id: &str,
        backend: &dyn StateBackend,
    ) -> &'p ResourceLocator {
        if backend.id() == source_id {
            &plan.source
        } else {
            &plan.destination
        }
    }
}

/// The destination entry: same real-world resource, refreshed attributes.
fn incoming_resource(
    plan: &TransferPlan,
    removed: &ManagedResource,
    remote: &RemoteResource,
) -> ManagedResource {
    let mut incoming = removed.relocated(&plan.destination.resource_address);

    if let (Some(attributes), Some(fresh)) =
        (incoming.attributes.as_object_mut(), remote.attributes.as_object())
    {
        for (name, value) in fresh {
            attributes.insert(name.clone(), value.clone());
        }
    }

    if !plan.preserve_id
        && let Some(normalised) = remote.attributes.get("id").and_then(|id| id.as_str())
    {
        incoming.provider_id = normalised.to_string();
    }

    incoming
}

fn verify_identifier(
    plan: &TransferPlan,
    removed: &ManagedResource,
    imported: ManagedResource,
) -> Result<ManagedResource, TransferError> {
    if plan.preserve_id && imported.provider_id != removed.provider_id {
        return Err(TransferError::IdentifierChanged {
            locator: plan.destination.to_string(),
            expected: removed.provider_id.clone(),
            actual: imported.provider_id,
        });
    }
    Ok(imported)
}

fn stale(plan: &TransferPlan, locator: &ResourceLocator, reason: String) -> TransferError {
    ConflictError::StalePlan {
        plan_id: plan.id,
        locator: locator.to_string(),
        reason,
    }
    .into()
}

fn rollback_failure(plan: &TransferPlan, cause: TransferError, rollback: TransferError) -> TransferError {
    TransferError::RollbackFailure {
        plan_id: plan.id,
        locator: plan.source.to_string(),
        cause: Box::new(cause),
        rollback: Box::new(rollback),
    }
}
