use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use armada_core::node::NodeStatus;
use armada_sched::scheduler::SchedulerEvent;

use crate::lifecycle::FleetManager;

/// Run the periodic heartbeat sweep until the process shuts down.
pub async fn heartbeat_loop(fleet: Arc<FleetManager>) {
    let interval = Duration::from_secs(fleet.config().heartbeat_interval_secs);
    loop {
        tokio::time::sleep(interval).await;
        sweep(&fleet).await;
    }
}

/// Probe every live node once.
///
/// A successful probe records a heartbeat (promoting Provisioning nodes
/// to Running, and announcing recovery of Unreachable ones). A failed
/// probe counts a miss; when the consecutive miss count reaches the
/// configured threshold the node is reported lost, and the scheduler
/// requeues its in-flight tasks.
pub async fn sweep(fleet: &FleetManager) {
    for node in fleet.pool().nodes() {
        if matches!(node.status, NodeStatus::Terminated) {
            continue;
        }

        if fleet.provider().probe(node.address).await {
            match fleet.pool().record_heartbeat(&node.id) {
                Ok(NodeStatus::Unreachable) => {
                    info!(node = %node.id, "Heartbeats resumed");
                    let _ = fleet.events().send(SchedulerEvent::NodeRecovered {
                        node_id: node.id.clone(),
                    });
                }
                Ok(_) => debug!(node = %node.id, "Heartbeat ok"),
                Err(e) => debug!(node = %node.id, error = %e, "Heartbeat record failed"),
            }
        } else {
            let misses = match fleet.pool().record_missed_heartbeat(&node.id) {
                Ok(m) => m,
                Err(e) => {
                    debug!(node = %node.id, error = %e, "Miss record failed");
                    continue;
                }
            };
            warn!(node = %node.id, misses, "Heartbeat missed");
            // Report exactly once, at the threshold crossing.
            if misses == fleet.config().heartbeat_misses
                && matches!(node.status, NodeStatus::Running | NodeStatus::Degraded)
            {
                let _ = fleet.events().send(SchedulerEvent::NodeUnreachable {
                    node_id: node.id.clone(),
                });
            }
        }
    }
}
