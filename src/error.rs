use thiserror::Error;

use crate::executor::ExecPhase;
use crate::planner::{PlanId, PlanStatus};
use crate::providers::ProviderError;
use crate::schema::FieldMismatch;
use crate::stack::{LocateError, NotFoundError};
use crate::state::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("destination {destination} is already occupied")]
    DestinationOccupied { destination: String },

    #[error("{locator} is already part of pending {plan_id}")]
    PlanInFlight { plan_id: PlanId, locator: String },

    #[error("{key} is owned by deployment '{owner}', not '{deployment}'")]
    NotOwner {
        key: String,
        owner: String,
        deployment: String,
    },

    #[error("source and destination are both {locator}")]
    SameLocation { locator: String },

    #[error("{plan_id} is {status}, not pending")]
    NotPending { plan_id: PlanId, status: PlanStatus },

    #[error("{plan_id} is still {status} and cannot be confirmed")]
    NotTerminal { plan_id: PlanId, status: PlanStatus },

    #[error("{plan_id} is stale, {locator} {reason}")]
    StalePlan {
        plan_id: PlanId,
        locator: String,
        reason: String,
    },

    #[error("{plan_id} is {status}; only failed plans need resolving")]
    NotFailed { plan_id: PlanId, status: PlanStatus },
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("{destination} cannot adopt the resource at {source_locator}: {}", format_mismatches(mismatches))]
    Compatibility {
        source_locator: String,
        destination: String,
        mismatches: Vec<FieldMismatch>,
    },

    #[error("invalid declared configuration for {destination}: {message}")]
    InvalidDeclaration { destination: String, message: String },

    #[error("{operation} on {locator} kept failing after {attempts} attempt(s): {source}")]
    TransientBackend {
        operation: String,
        locator: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("{operation} on {locator} failed: {source}")]
    Backend {
        operation: String,
        locator: String,
        #[source]
        source: BackendError,
    },

    #[error("provider query for {key} at {locator} failed: {source}")]
    Provider {
        key: String,
        locator: String,
        #[source]
        source: ProviderError,
    },

    #[error("imported identifier {actual} at {locator} differs from source identifier {expected}")]
    IdentifierChanged {
        locator: String,
        expected: String,
        actual: String,
    },

    #[error("rollback of {plan_id} failed, {locator} may be unmanaged: {rollback} (after: {cause})")]
    RollbackFailure {
        plan_id: PlanId,
        locator: String,
        cause: Box<TransferError>,
        rollback: Box<TransferError>,
    },

    #[error("{plan_id} applied but ownership of {key} was not updated: {source}")]
    Ownership {
        plan_id: PlanId,
        key: String,
        #[source]
        source: crate::ownership::OwnershipError,
    },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: ExecPhase, to: ExecPhase },

    #[error("unknown plan: {0}")]
    UnknownPlan(PlanId),
}

fn format_mismatches(mismatches: &[FieldMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<LocateError> for TransferError {
    fn from(err: LocateError) -> Self {
        match err {
            LocateError::NotFound(e) => TransferError::NotFound(e),
            LocateError::Backend {
                locator,
                attempts,
                source,
            } => TransferError::from_backend("read", locator, attempts, source),
        }
    }
}

impl TransferError {
    /// Splits backend failures into retry-exhausted transient ones and
    /// fatal ones.
    pub fn from_backend(
        operation: &str,
        locator: impl Into<String>,
        attempts: u32,
        source: BackendError,
    ) -> Self {
        use crate::retry::Retryable;

        if source.is_transient() {
            TransferError::TransientBackend {
                operation: operation.to_string(),
                locator: locator.into(),
                attempts,
                source,
            }
        } else {
            TransferError::Backend {
                operation: operation.to_string(),
                locator: locator.into(),
                source,
            }
        }
    }

    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, TransferError::RollbackFailure { .. })
    }
}

#[derive(Debug, Error)]
pub enum TsrError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Ownership(#[from] crate::ownership::OwnershipError),

    #[error(transparent)]
    Locator(#[from] crate::locator::LocatorParseError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
