use std::net::SocketAddr;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resources::ResourceSpec;

/// Worker node lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Provisioning,
    Running,
    Degraded,
    Unreachable,
    Terminated,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioning => write!(f, "provisioning"),
            Self::Running => write!(f, "running"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Validate that a node status transition is allowed.
pub fn validate_transition(from: NodeStatus, to: NodeStatus) -> Result<()> {
    // Any state -> Terminated is always allowed
    if to == NodeStatus::Terminated {
        return Ok(());
    }

    let valid = matches!(
        (from, to),
        // First heartbeat observed
        (NodeStatus::Provisioning, NodeStatus::Running)
        // Heartbeat misses exhausted
        | (NodeStatus::Running, NodeStatus::Unreachable)
        | (NodeStatus::Degraded, NodeStatus::Unreachable)
        // Partial health degradation and recovery
        | (NodeStatus::Running, NodeStatus::Degraded)
        | (NodeStatus::Degraded, NodeStatus::Running)
        // Heartbeats resumed
        | (NodeStatus::Unreachable, NodeStatus::Running)
    );

    if valid {
        Ok(())
    } else {
        bail!("Invalid node status transition: {} -> {}", from, to)
    }
}

/// A provisioned worker node and its live resource accounting.
///
/// Owned exclusively by the resource pool. `available` is mutated only
/// through the pool's reserve/release path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: SocketAddr,
    pub capacity: ResourceSpec,
    pub available: ResourceSpec,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub missed_heartbeats: u32,
    /// Draining nodes take no new work but keep in-flight reservations.
    #[serde(default)]
    pub draining: bool,
}

impl Node {
    /// A fresh node with full availability, starting in Provisioning.
    pub fn new(id: impl Into<String>, address: SocketAddr, capacity: ResourceSpec) -> Self {
        Self {
            id: id.into(),
            address,
            capacity,
            available: capacity,
            status: NodeStatus::Provisioning,
            last_heartbeat: None,
            missed_heartbeats: 0,
            draining: false,
        }
    }

    /// Resources currently reserved on this node.
    pub fn reserved(&self) -> ResourceSpec {
        self.capacity.minus(&self.available)
    }

    /// True if the node can accept the given requirements right now.
    pub fn can_fit(&self, req: &ResourceSpec) -> bool {
        self.status == NodeStatus::Running && !self.draining && req.fits_within(&self.available)
    }

    /// CPU utilization percentage, 0.0 when the node has no CPUs.
    pub fn cpu_utilization(&self) -> f64 {
        if self.capacity.cpu == 0 {
            return 0.0;
        }
        f64::from(self.capacity.cpu - self.available.cpu) / f64::from(self.capacity.cpu) * 100.0
    }
}
