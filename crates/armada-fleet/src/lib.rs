// armada-fleet: worker VM lifecycle against an external compute network.

pub mod heartbeat;
pub mod lifecycle;
pub mod provider;

pub use lifecycle::FleetManager;
pub use provider::{ComputeProvider, InstanceHandle, InstanceSpec};
