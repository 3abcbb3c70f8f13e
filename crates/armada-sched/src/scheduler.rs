use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use armada_core::config::SchedulerConfig;
use armada_core::error::OrchestratorError;
use armada_core::node::NodeStatus;
use armada_core::resources::ResourceSpec;
use armada_core::retry::backoff_delay;
use armada_core::task::{Task, TaskId, TaskKind, TaskStatus, validate_transition};

use crate::dispatch::{TaskDispatcher, TaskOutcome};
use crate::metrics::MetricsAggregator;
use crate::pool::ResourcePool;

/// Requeue delays are bounded so a flapping node cannot push a task's
/// backoff into minutes.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Messages folded into the scheduler's serialized reconcile loop.
///
/// Dispatch futures, the heartbeat sweep, and requeue timers never
/// mutate task state directly; they send one of these instead.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// The node agent began executing the task.
    Started { task_id: TaskId },
    /// Final outcome reported by the dispatch future.
    Outcome {
        task_id: TaskId,
        node_id: String,
        outcome: TaskOutcome,
    },
    /// A backoff delay elapsed; the task may rejoin the queue.
    Requeue { task_id: TaskId },
    /// Heartbeat sweep declared a node lost.
    NodeUnreachable { node_id: String },
    /// Heartbeat sweep observed a lost node answering again.
    NodeRecovered { node_id: String },
}

/// Matches tasks to nodes and tracks every task's lifecycle.
///
/// All task-state mutation happens either under the task-table mutex in
/// synchronous (never awaiting) sections or inside the single
/// `run` loop consuming the event channel, so concurrent submissions
/// and completions cannot race the accounting.
pub struct Scheduler {
    pool: Arc<ResourcePool>,
    dispatcher: Arc<dyn TaskDispatcher>,
    metrics: Arc<MetricsAggregator>,
    config: SchedulerConfig,
    tasks: Mutex<HashMap<TaskId, Task>>,
    queue: Mutex<VecDeque<TaskId>>,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>,
}

impl Scheduler {
    pub fn new(
        pool: Arc<ResourcePool>,
        dispatcher: Arc<dyn TaskDispatcher>,
        metrics: Arc<MetricsAggregator>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            pool,
            dispatcher,
            metrics,
            config,
            tasks: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        })
    }

    /// Sender handle for external event producers (heartbeat sweep).
    pub fn event_sender(&self) -> mpsc::UnboundedSender<SchedulerEvent> {
        self.events_tx.clone()
    }

    /// Submit a task. If no node fits right now the task stays Queued
    /// and is retried on every release and on the periodic timer.
    pub fn submit(self: &Arc<Self>, kind: TaskKind, requirements: ResourceSpec) -> TaskId {
        let task = Task::new(kind, requirements);
        let task_id = task.id;
        info!(task = %task_id, kind = task.kind.label(), req = %requirements, "Submitted");
        self.tasks
            .lock()
            .expect("task table lock poisoned")
            .insert(task_id, task);
        self.metrics.record_submitted();

        if !self.try_start(task_id) {
            self.queue
                .lock()
                .expect("queue lock poisoned")
                .push_back(task_id);
            debug!(task = %task_id, "No node fits, task queued");
        }
        task_id
    }

    /// Submit with fail-fast semantics: if no node fits at submission
    /// time, the task is not queued and `ResourceUnavailable` returns.
    pub fn submit_fail_fast(
        self: &Arc<Self>,
        kind: TaskKind,
        requirements: ResourceSpec,
    ) -> Result<TaskId> {
        let task = Task::new(kind, requirements);
        let task_id = task.id;
        self.tasks
            .lock()
            .expect("task table lock poisoned")
            .insert(task_id, task);

        if self.try_start(task_id) {
            self.metrics.record_submitted();
            Ok(task_id)
        } else {
            self.tasks
                .lock()
                .expect("task table lock poisoned")
                .remove(&task_id);
            Err(OrchestratorError::ResourceUnavailable.into())
        }
    }

    /// Snapshot of a task.
    pub fn status(&self, task_id: TaskId) -> Result<Task> {
        self.tasks
            .lock()
            .expect("task table lock poisoned")
            .get(&task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id).into())
    }

    /// Snapshots of all tasks.
    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .expect("task table lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Cancel a task.
    ///
    /// Queued tasks cancel synchronously with no resource action. For
    /// Dispatched/Running tasks a best-effort remote cancel is sent;
    /// after acknowledgment or `cancel_timeout_secs` the task is
    /// force-marked Cancelled and its reservation released, accepting
    /// that the remote side may still be running.
    pub async fn cancel(self: &Arc<Self>, task_id: TaskId) -> Result<()> {
        let remote_node = {
            let mut tasks = self.tasks.lock().expect("task table lock poisoned");
            let task = tasks
                .get_mut(&task_id)
                .ok_or(OrchestratorError::TaskNotFound(task_id))?;
            match task.status {
                s if s.is_terminal() => {
                    return Err(OrchestratorError::TaskTerminal {
                        id: task_id,
                        status: s.to_string(),
                    }
                    .into());
                }
                TaskStatus::Queued => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    self.metrics.record_cancelled();
                    info!(task = %task_id, "Cancelled queued task");
                    None
                }
                _ => task.assigned_node.clone(),
            }
        };

        let Some(node_id) = remote_node else {
            return Ok(());
        };

        if let Some(node) = self.pool.get(&node_id) {
            let timeout = Duration::from_secs(self.config.cancel_timeout_secs);
            match tokio::time::timeout(timeout, self.dispatcher.cancel(&node, task_id)).await {
                Ok(Ok(())) => info!(task = %task_id, node = %node_id, "Cancel acknowledged"),
                Ok(Err(e)) => {
                    warn!(task = %task_id, node = %node_id, error = %e, "Cancel signal failed, force-cancelling")
                }
                Err(_) => {
                    warn!(task = %task_id, node = %node_id, "Cancel ack timed out, force-cancelling")
                }
            }
        }

        {
            let mut tasks = self.tasks.lock().expect("task table lock poisoned");
            if let Some(task) = tasks.get_mut(&task_id) {
                if !task.status.is_terminal() {
                    // Release only if the reservation is still ours; a late
                    // outcome may have already reconciled it.
                    if let Some(current) = task.assigned_node.take() {
                        self.pool.release(&current, &task.requirements);
                    }
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(Utc::now());
                    self.metrics.record_cancelled();
                }
            }
        }
        self.pump_queue();
        Ok(())
    }

    /// Stop assigning new work to a node. In-flight reservations stay.
    pub fn drain_node(&self, node_id: &str) -> Result<()> {
        info!(node = %node_id, "Draining node");
        self.pool.mark_draining(node_id, true)
    }

    /// Wait until a node has no outstanding reservations.
    pub async fn wait_idle(&self, node_id: &str, poll: Duration) -> Result<()> {
        loop {
            let node = self
                .pool
                .get(node_id)
                .ok_or_else(|| OrchestratorError::NodeNotFound(node_id.to_string()))?;
            if node.reserved().is_zero() {
                return Ok(());
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Consume the event channel and drive reconciliation. Runs until
    /// the process shuts down; spawn once at startup.
    pub async fn run(self: Arc<Self>) {
        let rx = self
            .events_rx
            .lock()
            .expect("event receiver lock poisoned")
            .take();
        let Some(mut rx) = rx else {
            warn!("Scheduler::run called twice, ignoring");
            return;
        };

        let mut retry_tick =
            tokio::time::interval(Duration::from_secs(self.config.retry_interval_secs.max(1)));
        retry_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                ev = rx.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => break,
                },
                _ = retry_tick.tick() => self.pump_queue(),
            }
        }
    }

    fn handle_event(self: &Arc<Self>, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Started { task_id } => self.handle_started(task_id),
            SchedulerEvent::Outcome {
                task_id,
                node_id,
                outcome,
            } => self.handle_outcome(task_id, &node_id, outcome),
            SchedulerEvent::Requeue { task_id } => {
                let queued = matches!(
                    self.tasks
                        .lock()
                        .expect("task table lock poisoned")
                        .get(&task_id)
                        .map(|t| t.status),
                    Some(TaskStatus::Queued)
                );
                if queued {
                    self.queue
                        .lock()
                        .expect("queue lock poisoned")
                        .push_back(task_id);
                    self.pump_queue();
                }
            }
            SchedulerEvent::NodeUnreachable { node_id } => self.handle_node_unreachable(&node_id),
            SchedulerEvent::NodeRecovered { node_id } => {
                // The heartbeat sweep may have promoted the node already;
                // the transition failing is not an error here.
                if let Err(e) = self.pool.set_status(&node_id, NodeStatus::Running) {
                    debug!(node = %node_id, error = %e, "Recovery transition skipped");
                }
                info!(node = %node_id, "Node recovered");
                self.pump_queue();
            }
        }
    }

    fn handle_started(&self, task_id: TaskId) {
        let mut tasks = self.tasks.lock().expect("task table lock poisoned");
        if let Some(task) = tasks.get_mut(&task_id) {
            if task.status == TaskStatus::Dispatched {
                task.status = TaskStatus::Running;
                task.started_at = Some(Utc::now());
            }
        }
    }

    /// Fold a dispatch outcome back into task and resource state.
    /// The reservation is released exactly once per successful reserve,
    /// whatever the outcome.
    fn handle_outcome(self: &Arc<Self>, task_id: TaskId, node_id: &str, outcome: TaskOutcome) {
        {
            let mut tasks = self.tasks.lock().expect("task table lock poisoned");
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            if task.status.is_terminal() {
                // Cancel already reconciled this reservation.
                debug!(task = %task_id, "Ignoring outcome for terminal task");
                return;
            }
            if task.assigned_node.as_deref() != Some(node_id) {
                // The task was requeued off this node (unreachable sweep);
                // this outcome belongs to a stale dispatch.
                debug!(task = %task_id, node = %node_id, "Ignoring stale outcome");
                return;
            }

            self.pool.release(node_id, &task.requirements);
            task.assigned_node = None;

            match outcome {
                TaskOutcome::Success { result } => {
                    if let Err(e) = validate_transition(task.status, TaskStatus::Completed) {
                        warn!(task = %task_id, error = %e, "Dropping invalid completion");
                        return;
                    }
                    task.status = TaskStatus::Completed;
                    task.completed_at = Some(Utc::now());
                    task.result = Some(result);
                    task.error = None;
                    let millis = task.execution_millis().unwrap_or(0).max(0) as u64;
                    self.metrics.record_completed(millis);
                    info!(task = %task_id, node = %node_id, "Task completed");
                }
                TaskOutcome::Failure { reason } => {
                    task.retry_count += 1;
                    task.error = Some(reason.clone());
                    if task.retry_count < self.config.max_retries {
                        task.status = TaskStatus::Queued;
                        task.started_at = None;
                        self.metrics.record_retried();
                        let delay = backoff_delay(
                            Duration::from_millis(self.config.retry_backoff_ms),
                            task.retry_count - 1,
                            BACKOFF_CAP,
                        );
                        warn!(
                            task = %task_id,
                            node = %node_id,
                            retry = task.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "Task failed, requeueing"
                        );
                        self.schedule_requeue(task_id, delay);
                    } else {
                        task.status = TaskStatus::Failed;
                        task.completed_at = Some(Utc::now());
                        self.metrics.record_failed();
                        warn!(
                            task = %task_id,
                            retries = task.retry_count,
                            reason = %reason,
                            "Task failed terminally"
                        );
                    }
                }
            }
        }
        // Freed capacity may fit a queued task.
        self.pump_queue();
    }

    /// Proactively requeue everything in flight on a lost node. Node
    /// unreachability is not task failure, but it does count against
    /// the task's retry budget so a poisonous task cannot loop forever.
    fn handle_node_unreachable(self: &Arc<Self>, node_id: &str) {
        if let Err(e) = self.pool.set_status(node_id, NodeStatus::Unreachable) {
            debug!(node = %node_id, error = %e, "Unreachable transition skipped");
            return;
        }
        warn!(node = %node_id, "Node unreachable, requeueing its tasks");

        let mut requeued = Vec::new();
        {
            let mut tasks = self.tasks.lock().expect("task table lock poisoned");
            for task in tasks.values_mut() {
                if task.assigned_node.as_deref() == Some(node_id)
                    && matches!(task.status, TaskStatus::Dispatched | TaskStatus::Running)
                {
                    self.pool.release(node_id, &task.requirements);
                    task.assigned_node = None;
                    task.status = TaskStatus::Queued;
                    task.started_at = None;
                    task.retry_count += 1;
                    self.metrics.record_retried();
                    requeued.push(task.id);
                }
            }
        }
        if !requeued.is_empty() {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            for id in &requeued {
                queue.push_back(*id);
            }
            drop(queue);
            info!(node = %node_id, count = requeued.len(), "Requeued in-flight tasks");
            self.pump_queue();
        }
    }

    /// Try to reserve and dispatch a queued task. Returns false when no
    /// node fits or the task is no longer Queued.
    fn try_start(self: &Arc<Self>, task_id: TaskId) -> bool {
        let requirements = {
            let tasks = self.tasks.lock().expect("task table lock poisoned");
            match tasks.get(&task_id) {
                Some(t) if t.status == TaskStatus::Queued => t.requirements,
                _ => return false,
            }
        };

        let Some(node_id) = self.pool.reserve(&requirements) else {
            return false;
        };

        {
            let mut tasks = self.tasks.lock().expect("task table lock poisoned");
            match tasks.get_mut(&task_id) {
                Some(task) if task.status == TaskStatus::Queued => {
                    task.status = TaskStatus::Dispatched;
                    task.assigned_node = Some(node_id.clone());
                }
                _ => {
                    // Cancelled between reserve and commit; undo.
                    self.pool.release(&node_id, &requirements);
                    return false;
                }
            }
        }

        debug!(task = %task_id, node = %node_id, "Dispatching");
        self.spawn_dispatch(task_id, node_id);
        true
    }

    fn spawn_dispatch(self: &Arc<Self>, task_id: TaskId, node_id: String) {
        let sched = Arc::clone(self);
        tokio::spawn(async move {
            let Some(node) = sched.pool.get(&node_id) else {
                let _ = sched.events_tx.send(SchedulerEvent::Outcome {
                    task_id,
                    node_id,
                    outcome: TaskOutcome::Failure {
                        reason: "node deregistered before dispatch".to_string(),
                    },
                });
                return;
            };
            let snapshot = {
                sched
                    .tasks
                    .lock()
                    .expect("task table lock poisoned")
                    .get(&task_id)
                    .cloned()
            };
            let Some(task) = snapshot else { return };

            let _ = sched.events_tx.send(SchedulerEvent::Started { task_id });
            let outcome = sched.dispatcher.execute(&node, &task).await;
            let _ = sched.events_tx.send(SchedulerEvent::Outcome {
                task_id,
                node_id,
                outcome,
            });
        });
    }

    fn schedule_requeue(self: &Arc<Self>, task_id: TaskId, delay: Duration) {
        let sched = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sched.events_tx.send(SchedulerEvent::Requeue { task_id });
        });
    }

    /// Re-attempt reservation for every queued task, keeping the ones
    /// that still don't fit in submission order.
    fn pump_queue(self: &Arc<Self>) {
        let pending: Vec<TaskId> = {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            queue.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }

        let mut still_queued = Vec::new();
        for task_id in pending {
            if !self.try_start(task_id) {
                let is_queued = matches!(
                    self.tasks
                        .lock()
                        .expect("task table lock poisoned")
                        .get(&task_id)
                        .map(|t| t.status),
                    Some(TaskStatus::Queued)
                );
                if is_queued {
                    still_queued.push(task_id);
                }
            }
        }

        if !still_queued.is_empty() {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            for id in still_queued.into_iter().rev() {
                queue.push_front(id);
            }
        }
    }
}
