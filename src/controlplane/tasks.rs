//! Workflow Task Queue
//!
//! Every asynchronous workflow runs under a named task whose state operators
//! can observe and cancel. Failures of background tasks are reported on a
//! bounded channel drained by a logger task.

use super::metrics::ControllerMetrics;
use super::policy::Workflow;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Task State
// =============================================================================

/// Observable state of a workflow task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed { executor: String, reason: String },
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed { .. } | TaskState::Cancelled
        )
    }

    fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => TaskState::Succeeded,
            Err(Error::Cancelled { .. }) => TaskState::Cancelled,
            Err(Error::WorkflowFailed { executor, reason }) => TaskState::Failed {
                executor: executor.clone(),
                reason: reason.clone(),
            },
            Err(e) => TaskState::Failed {
                executor: "workflow".to_string(),
                reason: e.to_string(),
            },
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed { .. } => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

/// Operator view of a task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub id: String,
    pub operation: String,
    pub resource_id: String,
    pub executors: Vec<String>,
    #[serde(flatten)]
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Failure report of a background workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFailure {
    pub task_id: String,
    pub operation: String,
    pub resource_id: String,
    pub executor: String,
    pub reason: String,
}

struct TaskEntry {
    info: TaskInfo,
    state: watch::Sender<TaskState>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Snapshot of queue statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatsSnapshot {
    pub total: usize,
    pub active: usize,
    pub dropped_failure_reports: u64,
}

// =============================================================================
// Task Queue
// =============================================================================

/// Named, observable, cancellable workflow tasks
pub struct TaskQueue {
    tasks: DashMap<String, TaskEntry>,
    counter: AtomicU64,
    closed: AtomicBool,
    failure_tx: mpsc::Sender<WorkflowFailure>,
    failure_rx: Mutex<Option<mpsc::Receiver<WorkflowFailure>>>,
    dropped_reports: AtomicU64,
    metrics: Arc<ControllerMetrics>,
}

impl TaskQueue {
    /// Create a queue whose failure channel holds `capacity` reports
    pub fn new(capacity: usize, metrics: Arc<ControllerMetrics>) -> Arc<Self> {
        let (failure_tx, failure_rx) = mpsc::channel(capacity.max(1));
        Arc::new(Self {
            tasks: DashMap::new(),
            counter: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            failure_tx,
            failure_rx: Mutex::new(Some(failure_rx)),
            dropped_reports: AtomicU64::new(0),
            metrics,
        })
    }

    /// Spawn `workflow` in the background; returns the task id
    pub fn enqueue(
        self: &Arc<Self>,
        operation: &str,
        resource_id: &str,
        workflow: Workflow,
        cancel: CancellationToken,
    ) -> String {
        let id = self.register(operation, resource_id, &workflow, cancel.clone());
        let queue = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let _ = queue.execute(&task_id, workflow, cancel, true).await;
        });
        if let Some(mut entry) = self.tasks.get_mut(&id) {
            entry.handle = Some(handle);
        }
        info!("Enqueued workflow task {}", id);
        id
    }

    /// Run `workflow` on the caller's task, still tracked under a task id
    pub async fn run_to_completion(
        &self,
        operation: &str,
        resource_id: &str,
        workflow: Workflow,
        cancel: CancellationToken,
    ) -> Result<()> {
        let id = self.register(operation, resource_id, &workflow, cancel.clone());
        self.execute(&id, workflow, cancel, false).await
    }

    fn register(
        &self,
        operation: &str,
        resource_id: &str,
        workflow: &Workflow,
        cancel: CancellationToken,
    ) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{}-{}-{}", operation, resource_id, n);
        if self.closed.load(Ordering::Acquire) {
            cancel.cancel();
        }
        let (state, _) = watch::channel(TaskState::Pending);
        let info = TaskInfo {
            id: id.clone(),
            operation: operation.to_string(),
            resource_id: resource_id.to_string(),
            executors: workflow
                .executor_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            state: TaskState::Pending,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.tasks.insert(
            id.clone(),
            TaskEntry {
                info,
                state,
                cancel,
                handle: None,
            },
        );
        id
    }

    async fn execute(
        &self,
        id: &str,
        workflow: Workflow,
        cancel: CancellationToken,
        report: bool,
    ) -> Result<()> {
        self.set_state(id, TaskState::Running);
        let result = workflow.run(&cancel).await;
        let state = TaskState::from_result(&result);
        self.metrics.record_workflow(state.outcome());

        if let TaskState::Failed { executor, reason } = &state {
            if report {
                self.report_failure(id, executor, reason);
            }
        }
        self.set_state(id, state);
        result
    }

    fn set_state(&self, id: &str, state: TaskState) {
        if let Some(mut entry) = self.tasks.get_mut(id) {
            if state.is_terminal() {
                entry.info.finished_at = Some(Utc::now());
            }
            entry.info.state = state.clone();
            entry.state.send_replace(state);
        }
    }

    fn report_failure(&self, id: &str, executor: &str, reason: &str) {
        let (operation, resource_id) = match self.tasks.get(id) {
            Some(entry) => (entry.info.operation.clone(), entry.info.resource_id.clone()),
            None => return,
        };
        let failure = WorkflowFailure {
            task_id: id.to_string(),
            operation,
            resource_id,
            executor: executor.to_string(),
            reason: reason.to_string(),
        };
        if let Err(e) = self.failure_tx.try_send(failure) {
            self.dropped_reports.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping failure report of task {}: {}", id, e);
        }
    }

    // =========================================================================
    // Observation & Control
    // =========================================================================

    pub fn get(&self, id: &str) -> Option<TaskInfo> {
        self.tasks.get(id).map(|entry| entry.info.clone())
    }

    /// All tasks, oldest first
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.tasks.iter().map(|e| e.info.clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Wait until a task reaches a terminal state
    pub async fn wait(&self, id: &str) -> Option<TaskState> {
        let mut rx = {
            let entry = self.tasks.get(id)?;
            entry.state.subscribe()
        };
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_terminal() {
                return Some(current);
            }
            if rx.changed().await.is_err() {
                return Some(rx.borrow().clone());
            }
        }
    }

    /// Request cancellation; returns whether the task exists and was still active
    pub fn cancel(&self, id: &str) -> bool {
        match self.tasks.get(id) {
            Some(entry) if !entry.info.state.is_terminal() => {
                entry.cancel.cancel();
                info!("Cancellation requested for task {}", id);
                true
            }
            _ => false,
        }
    }

    /// Drop finished tasks; returns how many were removed
    pub fn purge_finished(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, entry| !entry.info.state.is_terminal());
        before - self.tasks.len()
    }

    pub fn stats(&self) -> TaskStatsSnapshot {
        let active = self
            .tasks
            .iter()
            .filter(|e| !e.info.state.is_terminal())
            .count();
        TaskStatsSnapshot {
            total: self.tasks.len(),
            active,
            dropped_failure_reports: self.dropped_reports.load(Ordering::Relaxed),
        }
    }

    /// Take the failure receiver; only the first caller gets it
    pub fn take_failures(&self) -> Option<mpsc::Receiver<WorkflowFailure>> {
        self.failure_rx.lock().take()
    }

    /// Spawn a task that logs every background workflow failure
    pub fn spawn_failure_logger(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.take_failures()?;
        Some(tokio::spawn(async move {
            while let Some(failure) = rx.recv().await {
                error!(
                    task_id = %failure.task_id,
                    resource = %failure.resource_id,
                    "Workflow {} failed in {}: {}",
                    failure.operation,
                    failure.executor,
                    failure.reason
                );
            }
            debug!("Workflow failure channel closed");
        }))
    }

    /// Cancel every active task and wait for background tasks to exit
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut handles = Vec::new();
        for mut entry in self.tasks.iter_mut() {
            entry.cancel.cancel();
            if let Some(handle) = entry.handle.take() {
                handles.push(handle);
            }
        }
        let count = handles.len();
        futures::future::join_all(handles).await;
        info!("Task queue shut down ({} background task(s) joined)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::policy::{Executor, ExecutorContext, RetryPolicy};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Step {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl Executor for Step {
        fn name(&self) -> &'static str {
            "step"
        }

        async fn init(&mut self, _ctx: &ExecutorContext) -> Result<()> {
            Ok(())
        }

        async fn run(&self) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(Error::BackendError {
                    message: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn workflow(fail: bool, delay: Duration) -> Workflow {
        Workflow::new(
            "test",
            RetryPolicy {
                max_attempts: 2,
                interval: Duration::from_millis(1),
            },
            vec![Box::new(Step { fail, delay })],
        )
    }

    fn queue(capacity: usize) -> Arc<TaskQueue> {
        TaskQueue::new(capacity, ControllerMetrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_enqueue_and_wait() {
        let queue = queue(4);
        let id = queue.enqueue(
            "CreateVolume",
            "vol-1",
            workflow(false, Duration::ZERO),
            CancellationToken::new(),
        );
        assert_eq!(id, "CreateVolume-vol-1-1");
        assert_eq!(queue.wait(&id).await, Some(TaskState::Succeeded));

        let info = queue.get(&id).unwrap();
        assert_eq!(info.executors, vec!["step"]);
        assert!(info.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_is_reported_on_channel() {
        let queue = queue(4);
        let mut failures = queue.take_failures().unwrap();
        assert!(queue.take_failures().is_none());

        let id = queue.enqueue(
            "CreateVolume",
            "vol-2",
            workflow(true, Duration::ZERO),
            CancellationToken::new(),
        );
        assert_matches!(queue.wait(&id).await, Some(TaskState::Failed { .. }));

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.task_id, id);
        assert_eq!(failure.executor, "step");
    }

    #[tokio::test]
    async fn test_full_failure_channel_drops_reports() {
        let queue = queue(1);
        let _failures = queue.take_failures().unwrap();

        for n in 0..3 {
            let id = queue.enqueue(
                "CreateVolume",
                &format!("vol-{}", n),
                workflow(true, Duration::ZERO),
                CancellationToken::new(),
            );
            queue.wait(&id).await;
        }
        assert_eq!(queue.stats().dropped_failure_reports, 2);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let queue = queue(4);
        let id = queue.enqueue(
            "CreateVolume",
            "vol-3",
            workflow(true, Duration::from_millis(50)),
            CancellationToken::new(),
        );
        assert!(queue.cancel(&id));
        assert_eq!(queue.wait(&id).await, Some(TaskState::Cancelled));
        assert!(!queue.cancel(&id));
        assert!(!queue.cancel("unknown"));
    }

    #[tokio::test]
    async fn test_run_to_completion_returns_result() {
        let queue = queue(4);
        let mut failures = queue.take_failures().unwrap();
        let err = queue
            .run_to_completion(
                "DeleteVolume",
                "vol-4",
                workflow(true, Duration::ZERO),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, Error::WorkflowFailed { .. });
        // Inline failures go to the caller, not the channel
        assert!(failures.try_recv().is_err());
        assert_eq!(queue.list().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_tasks() {
        let queue = queue(4);
        let id = queue.enqueue(
            "CreateVolume",
            "vol-5",
            workflow(true, Duration::from_millis(50)),
            CancellationToken::new(),
        );
        queue.shutdown().await;
        assert_eq!(queue.get(&id).unwrap().state, TaskState::Cancelled);
        assert_eq!(queue.purge_finished(), 1);
        assert_eq!(queue.stats().total, 0);
    }
}
