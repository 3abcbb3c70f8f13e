use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use armada_core::error::OrchestratorError;
use armada_core::node::{Node, NodeStatus, validate_transition};
use armada_core::resources::ResourceSpec;

/// Read-only pool totals for reporting. Always derived from the live
/// node table, never stored, so the figures cannot drift.
#[derive(Debug, Clone, Serialize)]
pub struct PoolInfo {
    pub node_count: usize,
    pub running_nodes: usize,
    pub total: ResourceSpec,
    pub available: ResourceSpec,
    pub cpu_utilization_pct: f64,
    pub memory_utilization_pct: f64,
    pub nodes: Vec<NodeUtilization>,
}

/// Per-node utilization line for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct NodeUtilization {
    pub id: String,
    pub status: NodeStatus,
    pub capacity: ResourceSpec,
    pub available: ResourceSpec,
    pub cpu_utilization_pct: f64,
    pub draining: bool,
}

/// The serialized arbiter for all capacity accounting.
///
/// Every mutation of node state passes through this table under one
/// mutex, so no interleaving of concurrent reservations can
/// oversubscribe a node. The critical sections never block on I/O.
pub struct ResourcePool {
    nodes: Mutex<HashMap<String, Node>>,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcePool {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Add a node to the pool. Fails if the id is already registered.
    pub fn register_node(&self, node: Node) -> Result<()> {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");
        if nodes.contains_key(&node.id) {
            anyhow::bail!("Node '{}' is already registered", node.id);
        }
        info!(node = %node.id, addr = %node.address, capacity = %node.capacity, "Registered node");
        nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node. Refuses while reservations are outstanding unless
    /// `force` is set.
    pub fn deregister_node(&self, id: &str, force: bool) -> Result<Node> {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");
        let node = nodes
            .get(id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(id.to_string()))?;
        if !force && !node.reserved().is_zero() {
            return Err(OrchestratorError::NodeBusy(id.to_string()).into());
        }
        let node = nodes.remove(id).expect("checked above");
        info!(node = %id, force, "Deregistered node");
        Ok(node)
    }

    /// Atomically find a node whose availability dominates `req` in all
    /// three dimensions and subtract the reservation.
    ///
    /// Selection is best-fit: among qualifying nodes, the one with the
    /// least leftover capacity after the reservation wins, ties broken
    /// by lowest node id so repeated calls on identical pool state are
    /// deterministic. Returns None when nothing fits; the caller queues
    /// and retries, never blocks.
    pub fn reserve(&self, req: &ResourceSpec) -> Option<String> {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");

        let best = nodes
            .values()
            .filter(|n| n.can_fit(req))
            .map(|n| (n.available.minus(req).slack_score(), n.id.clone()))
            .min()?;

        let node = nodes.get_mut(&best.1).expect("selected node exists");
        node.available = node.available.minus(req);
        debug!(node = %node.id, req = %req, remaining = %node.available, "Reserved");
        Some(best.1)
    }

    /// Return a reservation's resources to the node.
    ///
    /// Idempotence guard: if adding the amount back would exceed
    /// capacity (a double release), the release is ignored with a
    /// warning. Mutating anyway would absorb another task's
    /// outstanding reservation and let `reserve` oversubscribe.
    pub fn release(&self, id: &str, req: &ResourceSpec) {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");
        let Some(node) = nodes.get_mut(id) else {
            warn!(node = %id, "Release for unknown node ignored");
            return;
        };
        let restored = node.available.plus(req);
        if !restored.fits_within(&node.capacity) {
            warn!(
                node = %id,
                req = %req,
                available = %node.available,
                capacity = %node.capacity,
                "Release would exceed capacity, ignoring (double release?)"
            );
            return;
        }
        node.available = restored;
        debug!(node = %id, req = %req, available = %node.available, "Released");
    }

    /// Snapshot of a single node.
    pub fn get(&self, id: &str) -> Option<Node> {
        self.nodes.lock().expect("pool lock poisoned").get(id).cloned()
    }

    /// Snapshots of all nodes.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes
            .lock()
            .expect("pool lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().expect("pool lock poisoned").len()
    }

    /// Transition a node's status through the state machine.
    pub fn set_status(&self, id: &str, to: NodeStatus) -> Result<()> {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(id.to_string()))?;
        validate_transition(node.status, to)?;
        debug!(node = %id, from = %node.status, to = %to, "Node status change");
        node.status = to;
        Ok(())
    }

    /// Mark or unmark a node as draining (no new reservations).
    pub fn mark_draining(&self, id: &str, draining: bool) -> Result<()> {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(id.to_string()))?;
        node.draining = draining;
        Ok(())
    }

    /// Record a successful heartbeat. A Provisioning node moves to
    /// Running on its first heartbeat; an Unreachable node recovers.
    /// Returns the node's previous status.
    pub fn record_heartbeat(&self, id: &str) -> Result<NodeStatus> {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(id.to_string()))?;
        let previous = node.status;
        node.last_heartbeat = Some(chrono::Utc::now());
        node.missed_heartbeats = 0;
        if matches!(
            previous,
            NodeStatus::Provisioning | NodeStatus::Unreachable | NodeStatus::Degraded
        ) {
            validate_transition(previous, NodeStatus::Running)?;
            node.status = NodeStatus::Running;
        }
        Ok(previous)
    }

    /// Record a missed heartbeat and return the consecutive miss count.
    pub fn record_missed_heartbeat(&self, id: &str) -> Result<u32> {
        let mut nodes = self.nodes.lock().expect("pool lock poisoned");
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NodeNotFound(id.to_string()))?;
        node.missed_heartbeats += 1;
        Ok(node.missed_heartbeats)
    }

    /// Ids of the `n` least-utilized Running nodes, for scale-down.
    pub fn least_utilized(&self, n: usize) -> Vec<String> {
        let nodes = self.nodes.lock().expect("pool lock poisoned");
        let mut candidates: Vec<_> = nodes
            .values()
            .filter(|node| node.status == NodeStatus::Running && !node.draining)
            .map(|node| (node.reserved().slack_score(), node.id.clone()))
            .collect();
        candidates.sort();
        candidates.into_iter().take(n).map(|(_, id)| id).collect()
    }

    /// Derived totals and per-node utilization for reporting.
    pub fn snapshot(&self) -> PoolInfo {
        let nodes = self.nodes.lock().expect("pool lock poisoned");
        let mut total = ResourceSpec::default();
        let mut available = ResourceSpec::default();
        let mut running = 0usize;
        let mut per_node = Vec::with_capacity(nodes.len());

        for node in nodes.values() {
            total = total.plus(&node.capacity);
            available = available.plus(&node.available);
            if node.status == NodeStatus::Running {
                running += 1;
            }
            per_node.push(NodeUtilization {
                id: node.id.clone(),
                status: node.status,
                capacity: node.capacity,
                available: node.available,
                cpu_utilization_pct: node.cpu_utilization(),
                draining: node.draining,
            });
        }
        per_node.sort_by(|a, b| a.id.cmp(&b.id));

        let pct = |used: u64, cap: u64| {
            if cap == 0 {
                0.0
            } else {
                used as f64 / cap as f64 * 100.0
            }
        };

        PoolInfo {
            node_count: nodes.len(),
            running_nodes: running,
            cpu_utilization_pct: pct(
                u64::from(total.cpu - available.cpu),
                u64::from(total.cpu),
            ),
            memory_utilization_pct: pct(total.memory_mb - available.memory_mb, total.memory_mb),
            total,
            available,
            nodes: per_node,
        }
    }
}
