#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tsr::providers::{ProviderError, ProviderQuery};
use tsr::state::{BackendError, LockInfo, MemoryBackend, StateBackend, StateMutation};
use tsr::terraform::state::StateAddress;
use tsr::{
    Coordinator, InventoryProvider, ManagedResource, RemoteResource, ResourceAddress,
    ResourceLocator, RetryPolicy, Stack, StateLocator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Remove,
    Import,
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 429, retried.
    Throttle,
    /// 400, not retried.
    Reject,
}

/// Shared call log across backends, `(backend id, op)` in call order.
pub type Journal = Arc<Mutex<Vec<(String, Op)>>>;

/// Memory backend that fails scripted operations.
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    faults: Mutex<Vec<(Op, Fault, u32)>>,
    journal: Journal,
}

impl FaultyBackend {
    pub fn new(id: &str, journal: Journal) -> Self {
        Self {
            inner: MemoryBackend::new(id),
            faults: Mutex::new(Vec::new()),
            journal,
        }
    }

    /// Makes the next `times` calls of `op` fail with `fault`.
    pub fn inject(&self, op: Op, fault: Fault, times: u32) {
        self.faults.lock().unwrap().push((op, fault, times));
    }

    fn enter(&self, op: Op) -> Result<(), BackendError> {
        let id = self.inner.id().to_string();
        self.journal.lock().unwrap().push((id.clone(), op));

        let mut faults = self.faults.lock().unwrap();
        let Some(entry) = faults.iter_mut().find(|(o, _, n)| *o == op && *n > 0) else {
            return Ok(());
        };
        entry.2 -= 1;
        match entry.1 {
            Fault::Throttle => Err(BackendError::Throttled { backend: id }),
            Fault::Reject => Err(BackendError::Http {
                backend: id,
                status: 400,
                message: "injected failure".to_string(),
            }),
        }
    }
}

#[async_trait]
impl StateMutation for FaultyBackend {
    async fn remove(
        &self,
        address: &StateAddress,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        self.enter(Op::Remove)?;
        self.inner.remove(address, lock).await
    }

    async fn import(
        &self,
        address: &StateAddress,
        resource: &ManagedResource,
        lock: &LockInfo,
    ) -> Result<ManagedResource, BackendError> {
        self.enter(Op::Import)?;
        self.inner.import(address, resource, lock).await
    }
}

#[async_trait]
impl StateBackend for FaultyBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn get(&self, address: &StateAddress) -> Result<Option<ManagedResource>, BackendError> {
        self.enter(Op::Get)?;
        self.inner.get(address).await
    }

    async fn list(&self) -> Result<Vec<(StateAddress, ManagedResource)>, BackendError> {
        self.inner.list().await
    }

    async fn lock(&self, info: &LockInfo) -> Result<(), BackendError> {
        self.enter(Op::Lock)?;
        self.inner.lock(info).await
    }

    async fn unlock(&self, info: &LockInfo) -> Result<(), BackendError> {
        self.enter(Op::Unlock)?;
        self.inner.unlock(info).await
    }
}

/// Inventory the test can still edit once the coordinator owns the provider.
#[derive(Clone, Default)]
pub struct SharedInventory(pub Arc<Mutex<InventoryProvider>>);

#[async_trait]
impl ProviderQuery for SharedInventory {
    fn name(&self) -> &str {
        "inventory"
    }

    async fn describe(
        &self,
        resource_type: &str,
        provider_id: &str,
    ) -> Result<Option<RemoteResource>, ProviderError> {
        let inventory = self.0.lock().unwrap().clone();
        inventory.describe(resource_type, provider_id).await
    }
}

pub fn loc(deployment: &str, name: &str) -> ResourceLocator {
    ResourceLocator::new(
        "webapp",
        deployment,
        "web",
        ResourceAddress::new("aws_instance", name),
    )
}

pub fn instance(name: &str, id: &str) -> ManagedResource {
    ManagedResource {
        resource_type: "aws_instance".to_string(),
        name: name.to_string(),
        provider: "provider[\"registry.terraform.io/hashicorp/aws\"]".to_string(),
        provider_id: id.to_string(),
        schema_version: 1,
        attributes: serde_json::json!({"id": id, "ami": "ami-1", "instance_type": "t3.micro"}),
        ..Default::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay_ms: 1,
        timeout_ms: 1_000,
    }
}

pub struct Harness {
    pub coordinator: Coordinator,
    pub dev: Arc<FaultyBackend>,
    pub prod: Arc<FaultyBackend>,
    pub inventory: SharedInventory,
    pub journal: Journal,
}

impl Harness {
    /// `webapp` stack with `dev` and `prod` deployments and an
    /// `aws_instance.test` (`i-0abc`) recorded in dev.
    pub async fn new() -> Self {
        Self::with_remote(serde_json::json!({"ami": "ami-1", "instance_type": "t3.micro"})).await
    }

    pub async fn with_remote(attributes: serde_json::Value) -> Self {
        let journal: Journal = Arc::default();
        let dev = Arc::new(FaultyBackend::new("webapp-dev", journal.clone()));
        let prod = Arc::new(FaultyBackend::new("webapp-prod", journal.clone()));

        dev.inner
            .seed(&loc("dev", "test").state_address(), &instance("test", "i-0abc"))
            .await
            .unwrap();

        let locator = StateLocator::new()
            .with_stack(
                Stack::new("webapp")
                    .with_component("web")
                    .with_deployment("dev", dev.clone())
                    .with_deployment("prod", prod.clone()),
            )
            .with_retry_policy(fast_retry());

        let inventory = SharedInventory(Arc::new(Mutex::new(InventoryProvider::new([
            RemoteResource {
                resource_type: "aws_instance".to_string(),
                provider_id: "i-0abc".to_string(),
                attributes,
            },
        ]))));

        let coordinator = Coordinator::new(locator, Box::new(inventory.clone()))
            .with_retry_policy(fast_retry());

        Self {
            coordinator,
            dev,
            prod,
            inventory,
            journal,
        }
    }

    pub fn calls(&self, backend: &str, op: Op) -> usize {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, o)| id == backend && *o == op)
            .count()
    }

    /// Deletes a resource at the provider, outside Terraform.
    pub fn forget(&self, key: &tsr::ResourceKey) {
        self.inventory.0.lock().unwrap().forget(key);
    }

    /// Replaces whatever `address` holds in `backend`, the way a concurrent
    /// apply would.
    pub async fn replace(backend: &FaultyBackend, address: &StateAddress, resource: &ManagedResource) {
        let lock = LockInfo::new("apply", "someone else");
        backend.inner.lock(&lock).await.unwrap();
        backend.inner.remove(address, &lock).await.unwrap();
        backend.inner.unlock(&lock).await.unwrap();
        backend.inner.seed(address, resource).await.unwrap();
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }
}
