// Root facade: re-exports the workspace libraries and provides the
// orchestrator composition root consumed by the armadactl binary and
// by dashboard/API layers.

pub mod orchestrator;

pub use armada_core as core;
pub use armada_fleet as fleet;
pub use armada_keys as keys;
pub use armada_sched as sched;

pub use orchestrator::Orchestrator;
