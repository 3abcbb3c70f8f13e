// armada-sched: resource accounting and task scheduling.
//
// The pool is the single serialized arbiter for all capacity mutation;
// everything else (dispatch, heartbeats, provisioning) runs async and
// folds results back through the scheduler's event channel.

pub mod dispatch;
pub mod metrics;
pub mod pool;
pub mod scheduler;

pub use dispatch::{TaskDispatcher, TaskOutcome};
pub use metrics::MetricsAggregator;
pub use pool::{PoolInfo, ResourcePool};
pub use scheduler::{Scheduler, SchedulerEvent};
