use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use armada_core::config::ArmadaConfig;
use armada_core::resources::ResourceSpec;
use armada_core::task::{Task, TaskId, TaskKind};
use armada_fleet::heartbeat;
use armada_fleet::lifecycle::FleetManager;
use armada_fleet::provider::ComputeProvider;
use armada_keys::{KeyInfo, KeyManager, KeyPair};
use armada_sched::dispatch::TaskDispatcher;
use armada_sched::metrics::{MetricsAggregator, MetricsSnapshot};
use armada_sched::pool::{PoolInfo, ResourcePool};
use armada_sched::scheduler::Scheduler;

/// Key name used for node access during scale-up; generated on first
/// use.
const NODE_ACCESS_KEY: &str = "fleet-access";

/// Composition root for the orchestration engine.
///
/// Explicitly constructed with its external collaborators injected (the
/// compute network provider and the per-node dispatcher), owned by the
/// process entry point and handed by reference to API layers. No global
/// state.
pub struct Orchestrator {
    pool: Arc<ResourcePool>,
    scheduler: Arc<Scheduler>,
    fleet: Arc<FleetManager>,
    key_manager: KeyManager,
    metrics: Arc<MetricsAggregator>,
}

impl Orchestrator {
    pub fn new(
        config: ArmadaConfig,
        dispatcher: Arc<dyn TaskDispatcher>,
        provider: Arc<dyn ComputeProvider>,
    ) -> Result<Self> {
        let pool = Arc::new(ResourcePool::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let scheduler = Scheduler::new(
            Arc::clone(&pool),
            dispatcher,
            Arc::clone(&metrics),
            config.scheduler.clone(),
        );
        let fleet = FleetManager::new(
            Arc::clone(&pool),
            provider,
            config.fleet.clone(),
            scheduler.event_sender(),
        );
        let key_manager = KeyManager::open(&config.keys.store_dir)?;
        Ok(Self {
            pool,
            scheduler,
            fleet,
            key_manager,
            metrics,
        })
    }

    /// Spawn the reconcile loop and the heartbeat sweep. Call once.
    pub fn start(&self) {
        tokio::spawn(Arc::clone(&self.scheduler).run());
        tokio::spawn(heartbeat::heartbeat_loop(Arc::clone(&self.fleet)));
    }

    // ── Task surface ───────────────────────────────────────────────

    pub fn submit(&self, kind: TaskKind, requirements: ResourceSpec) -> TaskId {
        self.scheduler.submit(kind, requirements)
    }

    pub fn submit_fail_fast(&self, kind: TaskKind, requirements: ResourceSpec) -> Result<TaskId> {
        self.scheduler.submit_fail_fast(kind, requirements)
    }

    pub fn status(&self, task_id: TaskId) -> Result<Task> {
        self.scheduler.status(task_id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.scheduler.list_tasks()
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<()> {
        self.scheduler.cancel(task_id).await
    }

    // ── Fleet surface ──────────────────────────────────────────────

    /// Grow or shrink the fleet. Positive delta provisions that many
    /// nodes; negative delta drains the least-utilized nodes, waits for
    /// their in-flight work, and deprovisions them. Returns the node
    /// count afterwards.
    pub async fn scale(&self, delta: i64) -> Result<usize> {
        if delta > 0 {
            let public_key = match self.key_manager.public_key(NODE_ACCESS_KEY) {
                Some(key) => key,
                None => self.key_manager.generate_key(NODE_ACCESS_KEY)?.public_key,
            };
            for _ in 0..delta {
                self.fleet
                    .provision(self.fleet.default_spec(&public_key))
                    .await?;
            }
        } else if delta < 0 {
            let count = usize::try_from(-delta).unwrap_or(usize::MAX);
            let victims = self.pool.least_utilized(count);
            for node_id in victims {
                self.scheduler.drain_node(&node_id)?;
                self.scheduler
                    .wait_idle(&node_id, Duration::from_millis(200))
                    .await?;
                self.fleet.deprovision(&node_id).await?;
            }
        }
        let count = self.pool.node_count();
        info!(delta, nodes = count, "Scale complete");
        Ok(count)
    }

    pub fn resource_info(&self) -> PoolInfo {
        self.pool.snapshot()
    }

    pub fn performance_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.pool)
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    pub fn fleet(&self) -> &Arc<FleetManager> {
        &self.fleet
    }

    // ── Key surface ────────────────────────────────────────────────

    pub fn generate_key(&self, name: &str) -> Result<KeyPair> {
        self.key_manager.generate_key(name)
    }

    pub fn list_keys(&self) -> Result<Vec<String>> {
        self.key_manager.list_keys()
    }

    pub fn keys_info(&self) -> Result<Vec<KeyInfo>> {
        self.key_manager.keys_info()
    }

    pub fn delete_key(&self, name: &str) -> Result<()> {
        self.key_manager.delete_key(name)
    }

    pub fn backup_keys(&self, name: &str) -> Result<std::path::PathBuf> {
        self.key_manager.backup_keys(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_core::config::{ArmadaConfig, KeysConfig};
    use armada_core::task::{ProcessOpts, TaskStatus};
    use armada_fleet::provider::mock::MockProvider;
    use armada_sched::dispatch::mock::MockDispatcher;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> ArmadaConfig {
        let mut config = ArmadaConfig::parse(
            r#"
[scheduler]
retry_backoff_ms = 10
retry_interval_secs = 1
cancel_timeout_secs = 1

[fleet]
provision_timeout_secs = 1
poll_interval_ms = 10
heartbeat_interval_secs = 1
node_cpu = 4
node_memory_mb = 8192
"#,
        )
        .unwrap();
        config.keys = KeysConfig {
            store_dir: tmp.path().join("keys"),
        };
        config
    }

    fn process_kind() -> TaskKind {
        TaskKind::Process(ProcessOpts {
            command: "true".to_string(),
            args: vec![],
            env: vec![],
        })
    }

    async fn wait_until<F: Fn() -> bool>(f: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !f() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached within deadline"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_scale_up_submit_complete_scale_down() {
        let tmp = TempDir::new().unwrap();
        let orch = Orchestrator::new(
            test_config(&tmp),
            Arc::new(MockDispatcher::new()),
            Arc::new(MockProvider::new()),
        )
        .unwrap();
        orch.start();

        let count = orch.scale(2).await.unwrap();
        assert_eq!(count, 2);
        // Scale-up generated the node access key.
        assert_eq!(orch.list_keys().unwrap(), vec![NODE_ACCESS_KEY]);

        // First heartbeat promotes nodes so work can land.
        for node in orch.pool().nodes() {
            orch.pool().record_heartbeat(&node.id).unwrap();
        }

        let id = orch.submit(process_kind(), ResourceSpec::new(2, 2048, 0));
        wait_until(|| orch.status(id).unwrap().status == TaskStatus::Completed).await;

        let metrics = orch.performance_metrics();
        assert_eq!(metrics.tasks_completed, 1);
        assert!((metrics.efficiency - 1.0).abs() < f64::EPSILON);

        let count = orch.scale(-1).await.unwrap();
        assert_eq!(count, 1);
        let info = orch.resource_info();
        assert_eq!(info.node_count, 1);
    }

    #[tokio::test]
    async fn test_resource_info_reflects_reservations() {
        let tmp = TempDir::new().unwrap();
        let orch = Orchestrator::new(
            test_config(&tmp),
            Arc::new(MockDispatcher::with_delay(Duration::from_secs(30))),
            Arc::new(MockProvider::new()),
        )
        .unwrap();
        orch.start();
        orch.scale(1).await.unwrap();
        for node in orch.pool().nodes() {
            orch.pool().record_heartbeat(&node.id).unwrap();
        }

        let id = orch.submit(process_kind(), ResourceSpec::new(2, 2048, 0));
        wait_until(|| {
            matches!(
                orch.status(id).unwrap().status,
                TaskStatus::Dispatched | TaskStatus::Running
            )
        })
        .await;

        let info = orch.resource_info();
        assert_eq!(info.total.cpu, 4);
        assert_eq!(info.available.cpu, 2);
        assert!((info.cpu_utilization_pct - 50.0).abs() < 0.01);

        orch.cancel(id).await.unwrap();
        let info = orch.resource_info();
        assert_eq!(info.available.cpu, 4);
    }

    #[tokio::test]
    async fn test_key_surface_delegation() {
        let tmp = TempDir::new().unwrap();
        let orch = Orchestrator::new(
            test_config(&tmp),
            Arc::new(MockDispatcher::new()),
            Arc::new(MockProvider::new()),
        )
        .unwrap();

        orch.generate_key("alpha").unwrap();
        assert_eq!(orch.list_keys().unwrap(), vec!["alpha"]);
        let infos = orch.keys_info().unwrap();
        assert!(infos[0].valid);

        let backup = orch.backup_keys("alpha").unwrap();
        assert!(backup.join("alpha.pem").exists());

        orch.delete_key("alpha").unwrap();
        assert!(orch.list_keys().unwrap().is_empty());
    }
}
