use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resources::ResourceSpec;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Options for a plain process execution task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOpts {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Options for a batch rendering task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOpts {
    /// Scene file path on the node, e.g. "scene.blend".
    pub scene: String,
    pub output: String,
    #[serde(default)]
    pub frame_start: u32,
    #[serde(default)]
    pub frame_end: u32,
}

/// Options for a browser automation task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserOpts {
    pub url: String,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

fn default_headless() -> bool {
    true
}

/// Options for a file synchronization task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncOpts {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub delete_extraneous: bool,
}

/// Task kind with its per-kind payload. The scheduler dispatches on the
/// variant without probing payload fields at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "opts", rename_all = "snake_case")]
pub enum TaskKind {
    Process(ProcessOpts),
    Render(RenderOpts),
    Browser(BrowserOpts),
    Sync(SyncOpts),
    /// Opaque payload handed to the node agent as-is.
    Custom(serde_json::Value),
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Render(_) => "render",
            Self::Browser(_) => "browser",
            Self::Sync(_) => "sync",
            Self::Custom(_) => "custom",
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Dispatched,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are immutable once set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Validate that a task status transition is allowed.
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    if from.is_terminal() {
        bail!("Task is terminal ({}), cannot transition to {}", from, to);
    }

    let valid = matches!(
        (from, to),
        // Reservation succeeded
        (TaskStatus::Queued, TaskStatus::Dispatched)
        // Node agent picked the task up
        | (TaskStatus::Dispatched, TaskStatus::Running)
        // Outcomes
        | (TaskStatus::Dispatched, TaskStatus::Completed)
        | (TaskStatus::Dispatched, TaskStatus::Failed)
        | (TaskStatus::Running, TaskStatus::Completed)
        | (TaskStatus::Running, TaskStatus::Failed)
        // Retry or unreachable-node requeue
        | (TaskStatus::Dispatched, TaskStatus::Queued)
        | (TaskStatus::Running, TaskStatus::Queued)
        // Cancellation from any non-terminal state
        | (TaskStatus::Queued, TaskStatus::Cancelled)
        | (TaskStatus::Dispatched, TaskStatus::Cancelled)
        | (TaskStatus::Running, TaskStatus::Cancelled)
    );

    if valid {
        Ok(())
    } else {
        bail!("Invalid task status transition: {} -> {}", from, to)
    }
}

/// A unit of work tracked through its lifecycle. Only the scheduler
/// transitions `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub requirements: ResourceSpec,
    pub status: TaskStatus,
    pub assigned_node: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    pub fn new(kind: TaskKind, requirements: ResourceSpec) -> Self {
        Self {
            id: TaskId::generate(),
            kind,
            requirements,
            status: TaskStatus::Queued,
            assigned_node: None,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Wall-clock execution time, available once the task has both started
    /// and reached a terminal state.
    pub fn execution_millis(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some((c - s).num_milliseconds()),
            _ => None,
        }
    }
}
