use async_trait::async_trait;

use anyhow::Result;
use armada_core::node::Node;
use armada_core::task::{Task, TaskId};

/// Final outcome of a remote task execution as reported by the node
/// agent.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success { result: String },
    Failure { reason: String },
}

/// Seam to the per-node remote execution endpoint.
///
/// The production implementation talks to the node agent over the
/// node's address, authenticated with the node's provisioned keypair.
/// `execute` resolves when the agent reports the final outcome; the
/// scheduler folds that outcome back through its event channel rather
/// than mutating task state from the dispatch future.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Run a task on the given node to completion.
    async fn execute(&self, node: &Node, task: &Task) -> TaskOutcome;

    /// Best-effort remote cancellation. Ok means the agent acknowledged;
    /// the scheduler applies its own bounded wait around this call.
    async fn cancel(&self, node: &Node, task_id: TaskId) -> Result<()>;
}

pub mod mock {
    //! Scripted dispatcher for tests: hands out pre-seeded outcomes in
    //! order (defaulting to success) after an optional artificial delay.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    pub struct MockDispatcher {
        outcomes: Mutex<VecDeque<TaskOutcome>>,
        pub delay: Option<Duration>,
        executed: Mutex<Vec<(String, TaskId)>>,
        cancelled: Mutex<Vec<TaskId>>,
    }

    impl MockDispatcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        /// Queue the outcome for the next execution.
        pub fn push_outcome(&self, outcome: TaskOutcome) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        /// (node id, task id) pairs in execution order.
        pub fn executed(&self) -> Vec<(String, TaskId)> {
            self.executed.lock().unwrap().clone()
        }

        pub fn cancelled(&self) -> Vec<TaskId> {
            self.cancelled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskDispatcher for MockDispatcher {
        async fn execute(&self, node: &Node, task: &Task) -> TaskOutcome {
            self.executed
                .lock()
                .unwrap()
                .push((node.id.clone(), task.id));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(TaskOutcome::Success {
                    result: "ok".to_string(),
                })
        }

        async fn cancel(&self, _node: &Node, task_id: TaskId) -> Result<()> {
            self.cancelled.lock().unwrap().push(task_id);
            Ok(())
        }
    }
}
