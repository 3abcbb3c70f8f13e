// armada-core: Pure types, config, errors, utilities
// No internal armada dependencies — this is the foundation crate.

pub mod config;
pub mod error;
pub mod node;
pub mod observability;
pub mod resources;
pub mod retry;
pub mod task;
