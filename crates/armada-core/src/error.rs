use thiserror::Error;

use crate::task::TaskId;

/// Error taxonomy for the orchestration core.
///
/// Transient conditions (no capacity, unreachable node, execution retry)
/// are recovered internally and show up in task/node status rather than
/// as errors. Only exhausted retries, provisioning failures, and key
/// operations surface these variants to callers.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no node currently satisfies requirements")]
    ResourceUnavailable,

    #[error("node '{0}' has outstanding reservations")]
    NodeBusy(String),

    #[error("node '{0}' is not registered")]
    NodeNotFound(String),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("task {id} is already terminal ({status})")]
    TaskTerminal { id: TaskId, status: String },

    #[error("provisioning failed: {0}")]
    ProvisioningFailure(String),

    #[error("task execution failed after {retries} retries: {reason}")]
    TaskExecutionFailure { retries: u32, reason: String },

    #[error("key '{0}' already exists")]
    DuplicateKey(String),

    #[error("key '{0}' not found")]
    KeyNotFound(String),

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = OrchestratorError::DuplicateKey("alpha".to_string());
        assert_eq!(e.to_string(), "key 'alpha' already exists");

        let e = OrchestratorError::NodeBusy("node-3".to_string());
        assert!(e.to_string().contains("node-3"));

        let id = TaskId::generate();
        let e = OrchestratorError::TaskNotFound(id);
        assert!(e.to_string().contains(&id.to_string()));
    }
}
