use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use armada_core::config::FleetConfig;
use armada_core::error::OrchestratorError;
use armada_core::node::{Node, NodeStatus};
use armada_core::resources::ResourceSpec;
use armada_sched::pool::ResourcePool;
use armada_sched::scheduler::SchedulerEvent;

use crate::provider::{ComputeProvider, InstanceSpec};

/// Provisions and retires worker VMs on the external compute network,
/// keeping the resource pool's node table in sync.
pub struct FleetManager {
    pool: Arc<ResourcePool>,
    provider: Arc<dyn ComputeProvider>,
    config: FleetConfig,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    /// node id -> compute network instance handle.
    handles: Mutex<HashMap<String, String>>,
}

impl FleetManager {
    pub fn new(
        pool: Arc<ResourcePool>,
        provider: Arc<dyn ComputeProvider>,
        config: FleetConfig,
        events: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            provider,
            config,
            events,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Instance spec from the configured node shape.
    pub fn default_spec(&self, public_key: &str) -> InstanceSpec {
        InstanceSpec {
            cpu: self.config.node_cpu,
            memory_mb: self.config.node_memory_mb,
            gpu: self.config.node_gpu,
            disk_gb: self.config.disk_gb,
            image: self.config.image.clone(),
            public_key: public_key.to_string(),
        }
    }

    /// Create an instance, wait for it to become reachable, and
    /// register it with the pool in Provisioning status. The heartbeat
    /// sweep promotes it to Running on its first observed heartbeat.
    ///
    /// On rejection or readiness timeout no node is registered and the
    /// half-created instance is torn down best-effort.
    pub async fn provision(&self, spec: InstanceSpec) -> Result<Node> {
        let instance = self
            .provider
            .create_instance(&spec)
            .await
            .map_err(|e| OrchestratorError::ProvisioningFailure(e.to_string()))?;
        info!(handle = %instance.handle, addr = %instance.address, "Instance created, awaiting readiness");

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.provision_timeout_secs);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            if self.provider.probe(instance.address).await {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(handle = %instance.handle, "Instance never became reachable, destroying");
                if let Err(e) = self.provider.destroy_instance(&instance.handle).await {
                    warn!(handle = %instance.handle, error = %e, "Teardown of dead instance failed");
                }
                return Err(OrchestratorError::ProvisioningFailure(format!(
                    "instance {} not reachable within {}s",
                    instance.handle, self.config.provision_timeout_secs
                ))
                .into());
            }
            tokio::time::sleep(poll).await;
        }

        let node_id = format!("node-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let capacity = ResourceSpec::new(spec.cpu, spec.memory_mb, spec.gpu);
        let node = Node::new(node_id.clone(), instance.address, capacity);
        self.pool
            .register_node(node.clone())
            .with_context(|| format!("Failed to register node {}", node_id))?;
        self.handles
            .lock()
            .expect("handle table lock poisoned")
            .insert(node_id.clone(), instance.handle);
        info!(node = %node_id, addr = %instance.address, "Node provisioned");
        Ok(node)
    }

    /// Tear down a node's instance and remove it from the pool.
    ///
    /// Requires zero outstanding reservations; draining in-flight work
    /// first is the scheduler's job.
    pub async fn deprovision(&self, node_id: &str) -> Result<()> {
        let node = self
            .pool
            .get(node_id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(node_id.to_string()))?;
        if !node.reserved().is_zero() {
            return Err(OrchestratorError::NodeBusy(node_id.to_string()).into());
        }

        self.pool.set_status(node_id, NodeStatus::Terminated)?;
        let handle = self
            .handles
            .lock()
            .expect("handle table lock poisoned")
            .remove(node_id);
        if let Some(handle) = handle {
            self.provider
                .destroy_instance(&handle)
                .await
                .with_context(|| format!("Failed to destroy instance for node {}", node_id))?;
        } else {
            warn!(node = %node_id, "No instance handle recorded, skipping teardown");
        }
        self.pool.deregister_node(node_id, true)?;
        info!(node = %node_id, "Node deprovisioned");
        Ok(())
    }

    pub(crate) fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub(crate) fn provider(&self) -> &dyn ComputeProvider {
        self.provider.as_ref()
    }

    pub(crate) fn events(&self) -> &mpsc::UnboundedSender<SchedulerEvent> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use std::sync::atomic::Ordering;

    fn test_config() -> FleetConfig {
        FleetConfig {
            provision_timeout_secs: 1,
            poll_interval_ms: 10,
            heartbeat_interval_secs: 1,
            heartbeat_misses: 3,
            node_cpu: 4,
            node_memory_mb: 8192,
            node_gpu: 0,
            image: "ubuntu-22.04".to_string(),
            disk_gb: 40,
        }
    }

    fn fixture() -> (
        Arc<ResourcePool>,
        Arc<MockProvider>,
        Arc<FleetManager>,
        mpsc::UnboundedReceiver<SchedulerEvent>,
    ) {
        let pool = Arc::new(ResourcePool::new());
        let provider = Arc::new(MockProvider::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let fleet = FleetManager::new(
            Arc::clone(&pool),
            Arc::clone(&provider) as Arc<dyn ComputeProvider>,
            test_config(),
            tx,
        );
        (pool, provider, fleet, rx)
    }

    #[tokio::test]
    async fn test_provision_registers_provisioning_node() {
        let (pool, _provider, fleet, _rx) = fixture();
        let spec = fleet.default_spec("ssh-ed25519 AAAA test");
        let node = fleet.provision(spec).await.unwrap();

        assert_eq!(node.status, NodeStatus::Provisioning);
        assert_eq!(node.capacity, ResourceSpec::new(4, 8192, 0));
        assert_eq!(pool.node_count(), 1);
        let registered = pool.get(&node.id).unwrap();
        assert_eq!(registered.available, registered.capacity);
    }

    #[tokio::test]
    async fn test_provision_rejected_registers_nothing() {
        let (pool, provider, fleet, _rx) = fixture();
        provider.reject_creates.store(true, Ordering::Relaxed);

        let err = fleet
            .provision(fleet.default_spec("ssh-ed25519 AAAA test"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::ProvisioningFailure(_))
        ));
        assert_eq!(pool.node_count(), 0);
    }

    #[tokio::test]
    async fn test_provision_timeout_destroys_instance() {
        let (pool, provider, fleet, _rx) = fixture();
        // Never becomes ready within the 1s timeout.
        provider.probes_until_ready.store(u32::MAX, Ordering::Relaxed);

        let err = fleet
            .provision(fleet.default_spec("ssh-ed25519 AAAA test"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::ProvisioningFailure(_))
        ));
        assert_eq!(pool.node_count(), 0);
        assert_eq!(provider.destroyed().len(), 1);
        assert_eq!(provider.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_deprovision_destroys_and_deregisters() {
        let (pool, provider, fleet, _rx) = fixture();
        let node = fleet
            .provision(fleet.default_spec("ssh-ed25519 AAAA test"))
            .await
            .unwrap();

        fleet.deprovision(&node.id).await.unwrap();
        assert_eq!(pool.node_count(), 0);
        assert_eq!(provider.destroyed().len(), 1);
    }

    #[tokio::test]
    async fn test_deprovision_refuses_busy_node() {
        let (pool, _provider, fleet, _rx) = fixture();
        let node = fleet
            .provision(fleet.default_spec("ssh-ed25519 AAAA test"))
            .await
            .unwrap();
        pool.record_heartbeat(&node.id).unwrap();
        pool.reserve(&ResourceSpec::new(1, 1024, 0)).unwrap();

        let err = fleet.deprovision(&node.id).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::NodeBusy(_))
        ));
        assert_eq!(pool.node_count(), 1);
    }

    #[tokio::test]
    async fn test_deprovision_unknown_node() {
        let (_pool, _provider, fleet, _rx) = fixture();
        let err = fleet.deprovision("node-ghost").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::NodeNotFound(_))
        ));
    }
}
