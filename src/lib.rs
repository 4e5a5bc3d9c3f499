//! tsr - Terraform Stacks resource transfer
//!
//! Moves a managed resource from one deployment's state into another's
//! without destroying or recreating it, with rollback when either half of
//! the move fails.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod locator;
pub mod output;
pub mod ownership;
pub mod planner;
pub mod providers;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod stack;
pub mod state;
pub mod terraform;

pub use config::StackManifest;
pub use coordinator::Coordinator;
pub use error::{ConflictError, TransferError, TsrError};
pub use executor::{ExecPhase, ExecutionReport};
pub use locator::{ResourceAddress, ResourceKey, ResourceLocator};
pub use ownership::{OwnershipRecord, OwnershipRegistry};
pub use planner::{PlanId, PlanStatus, TransferPlan, TransferRequest};
pub use providers::{InventoryProvider, ProviderQuery};
pub use resource::{ManagedResource, RemoteResource};
pub use retry::RetryPolicy;
pub use stack::{Stack, StateLocator};
