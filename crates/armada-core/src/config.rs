use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level orchestrator configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArmadaConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub keys: KeysConfig,
}

/// Scheduler tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Max execution retries before a task is marked Failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay before a failed task is requeued, doubled per retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Periodic retry sweep for tasks stuck in Queued (seconds).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Max wait for a cancellation acknowledgment before force-cancel.
    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_secs: u64,
}

/// Fleet / provisioning tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Max time for a new instance to become reachable (seconds).
    #[serde(default = "default_provision_timeout")]
    pub provision_timeout_secs: u64,
    /// Readiness poll interval during provisioning (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Heartbeat sweep interval (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Consecutive missed heartbeats before a node is Unreachable.
    #[serde(default = "default_heartbeat_misses")]
    pub heartbeat_misses: u32,
    /// Default resources for nodes provisioned via scale-up.
    #[serde(default = "default_node_cpu")]
    pub node_cpu: u32,
    #[serde(default = "default_node_memory_mb")]
    pub node_memory_mb: u64,
    #[serde(default)]
    pub node_gpu: u32,
    /// VM image reference passed to the compute network.
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_disk_gb")]
    pub disk_gb: u32,
}

/// Key store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    /// Directory holding `<name>.pem` / `<name>.pub` pairs.
    #[serde(default = "default_key_dir")]
    pub store_dir: PathBuf,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_retry_interval() -> u64 {
    5
}
fn default_cancel_timeout() -> u64 {
    10
}
fn default_provision_timeout() -> u64 {
    120
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_heartbeat_interval() -> u64 {
    10
}
fn default_heartbeat_misses() -> u32 {
    3
}
fn default_node_cpu() -> u32 {
    4
}
fn default_node_memory_mb() -> u64 {
    8192
}
fn default_image() -> String {
    "ubuntu-22.04".to_string()
}
fn default_disk_gb() -> u32 {
    40
}
fn default_key_dir() -> PathBuf {
    PathBuf::from("/var/lib/armada/keys")
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_interval_secs: default_retry_interval(),
            cancel_timeout_secs: default_cancel_timeout(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            provision_timeout_secs: default_provision_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_misses: default_heartbeat_misses(),
            node_cpu: default_node_cpu(),
            node_memory_mb: default_node_memory_mb(),
            node_gpu: 0,
            image: default_image(),
            disk_gb: default_disk_gb(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            store_dir: default_key_dir(),
        }
    }
}

impl ArmadaConfig {
    /// Load config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse config from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).with_context(|| "Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.fleet.heartbeat_misses == 0 {
            anyhow::bail!("fleet.heartbeat_misses must be at least 1");
        }
        if self.fleet.heartbeat_interval_secs == 0 {
            anyhow::bail!("fleet.heartbeat_interval_secs must be at least 1");
        }
        if self.fleet.node_cpu == 0 || self.fleet.node_memory_mb == 0 {
            anyhow::bail!("fleet node resources must be non-zero");
        }
        Ok(())
    }
}
