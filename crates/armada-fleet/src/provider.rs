use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Instance request sent to the external compute network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub cpu: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub gpu: u32,
    pub disk_gb: u32,
    pub image: String,
    /// OpenSSH public key line installed for node access.
    pub public_key: String,
}

/// A created instance: the network's opaque handle plus the address the
/// node agent listens on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub handle: String,
    pub address: SocketAddr,
}

/// Seam to the decentralized compute network API.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Request a new instance. The returned address may not be
    /// reachable yet; callers poll `probe` until it answers.
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle>;

    /// Tear down an instance.
    async fn destroy_instance(&self, handle: &str) -> Result<()>;

    /// Liveness probe against a node's agent address. Used both for
    /// provisioning readiness and the heartbeat sweep.
    async fn probe(&self, address: SocketAddr) -> bool;
}

pub mod mock {
    //! In-memory compute network for tests: instances become reachable
    //! after a configurable number of probes and can be "killed" to
    //! simulate heartbeat loss.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct MockProvider {
        next_id: AtomicU64,
        /// When set, create_instance is rejected.
        pub reject_creates: AtomicBool,
        /// Probes needed before an instance reports reachable.
        pub probes_until_ready: AtomicU32,
        instances: Mutex<HashMap<String, InstanceState>>,
        destroyed: Mutex<Vec<String>>,
    }

    struct InstanceState {
        address: SocketAddr,
        probes_seen: u32,
        alive: bool,
    }

    impl MockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn destroyed(&self) -> Vec<String> {
            self.destroyed.lock().unwrap().clone()
        }

        pub fn instance_count(&self) -> usize {
            self.instances.lock().unwrap().len()
        }

        /// Simulate the instance at `address` dropping off the network.
        pub fn kill(&self, address: SocketAddr) {
            let mut instances = self.instances.lock().unwrap();
            for state in instances.values_mut() {
                if state.address == address {
                    state.alive = false;
                }
            }
        }

        /// Bring a killed instance back.
        pub fn revive(&self, address: SocketAddr) {
            let mut instances = self.instances.lock().unwrap();
            for state in instances.values_mut() {
                if state.address == address {
                    state.alive = true;
                }
            }
        }
    }

    #[async_trait]
    impl ComputeProvider for MockProvider {
        async fn create_instance(&self, _spec: &InstanceSpec) -> Result<InstanceHandle> {
            if self.reject_creates.load(Ordering::Relaxed) {
                anyhow::bail!("compute network rejected the request");
            }
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            let handle = format!("inst-{:04}", n);
            let address: SocketAddr = format!("10.99.0.{}:7070", n + 1).parse()?;
            self.instances.lock().unwrap().insert(
                handle.clone(),
                InstanceState {
                    address,
                    probes_seen: 0,
                    alive: true,
                },
            );
            Ok(InstanceHandle { handle, address })
        }

        async fn destroy_instance(&self, handle: &str) -> Result<()> {
            self.instances.lock().unwrap().remove(handle);
            self.destroyed.lock().unwrap().push(handle.to_string());
            Ok(())
        }

        async fn probe(&self, address: SocketAddr) -> bool {
            let needed = self.probes_until_ready.load(Ordering::Relaxed);
            let mut instances = self.instances.lock().unwrap();
            for state in instances.values_mut() {
                if state.address == address {
                    if !state.alive {
                        return false;
                    }
                    state.probes_seen += 1;
                    return state.probes_seen > needed;
                }
            }
            false
        }
    }
}
