//! Runtime status of a resolved workflow.
//!
//! The tracker answers "may this task start now?" from live prerequisite
//! outcomes, so callers can re-check an admission decision before acting on
//! it. When a prerequisite ends in a way that can never release a dependent
//! (a strict prerequisite failing, a `failure`-conditional prerequisite
//! succeeding), the dependent and its own unreleasable dependents are
//! cancelled.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::graph::{DependencyGraph, Edge, ReleaseCondition};
use crate::types::DependencyKind;

/// Lifecycle of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// Started, not finished.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Will never run.
    Cancelled,
}

impl TaskStatus {
    /// Whether the task will not change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Errors from status transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// No task with this id is tracked.
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    /// The transition is not allowed from the current status.
    #[error("task '{task}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task id.
        task: String,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// Prerequisites have not released the task yet.
    #[error("task '{task}' is still waiting on {waiting:?}")]
    NotReady {
        /// Task id.
        task: String,
        /// Prerequisites still outstanding.
        waiting: Vec<String>,
    },
}

/// How an edge stands given its prerequisite's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Waiting,
    Released,
    Unreleasable,
}

fn edge_state(edge: &Edge, prereq: TaskStatus) -> EdgeState {
    use TaskStatus::{Cancelled, Completed, Failed};
    match (edge.kind, prereq) {
        (_, TaskStatus::Pending | TaskStatus::Running) => EdgeState::Waiting,
        (DependencyKind::Soft, _) => EdgeState::Released,
        (DependencyKind::Strict, Completed) => EdgeState::Released,
        (DependencyKind::Strict, _) => EdgeState::Unreleasable,
        (DependencyKind::Conditional, status) => match (edge.release, status) {
            (ReleaseCondition::Success, Completed)
            | (ReleaseCondition::Failure, Failed)
            | (ReleaseCondition::Completion, _) => EdgeState::Released,
            (ReleaseCondition::Success, Failed | Cancelled)
            | (ReleaseCondition::Failure, Completed | Cancelled) => EdgeState::Unreleasable,
            _ => EdgeState::Waiting,
        },
    }
}

/// Tracks task status against a dependency graph.
#[derive(Debug)]
pub struct ExecutionTracker {
    graph: DependencyGraph,
    status: Mutex<Vec<TaskStatus>>,
}

impl ExecutionTracker {
    /// Track every task in `graph`, all pending.
    pub fn new(graph: DependencyGraph) -> Self {
        let status = vec![TaskStatus::Pending; graph.len()];
        Self {
            graph,
            status: Mutex::new(status),
        }
    }

    /// Graph being tracked.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Current status of `task`.
    pub fn status(&self, task: &str) -> Option<TaskStatus> {
        let idx = self.graph.index_of(task)?;
        self.snapshot().get(idx).copied()
    }

    /// Whether `task` is pending and every prerequisite has released it.
    pub fn is_admissible(&self, task: &str) -> bool {
        let Some(idx) = self.graph.index_of(task) else {
            return false;
        };
        let status = self.snapshot();
        status[idx] == TaskStatus::Pending && self.waiting_on(idx, &status).is_empty()
    }

    /// Pending tasks whose prerequisites have all released them, in input
    /// order.
    pub fn ready_tasks(&self) -> Vec<String> {
        let status = self.snapshot();
        (0..self.graph.len())
            .filter(|&i| status[i] == TaskStatus::Pending && self.waiting_on(i, &status).is_empty())
            .map(|i| self.graph.id(i).to_owned())
            .collect()
    }

    /// Pending tasks still waiting, with the prerequisites they wait on.
    pub fn blocked_tasks(&self) -> BTreeMap<String, Vec<String>> {
        let status = self.snapshot();
        (0..self.graph.len())
            .filter(|&i| status[i] == TaskStatus::Pending)
            .filter_map(|i| {
                let waiting = self.waiting_on(i, &status);
                (!waiting.is_empty()).then(|| (self.graph.id(i).to_owned(), waiting))
            })
            .collect()
    }

    /// Tasks that completed successfully, in input order.
    pub fn completed_tasks(&self) -> Vec<String> {
        self.with_status(TaskStatus::Completed)
    }

    /// Tasks that were cancelled, in input order.
    pub fn cancelled_tasks(&self) -> Vec<String> {
        self.with_status(TaskStatus::Cancelled)
    }

    /// Whether every task has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.snapshot().iter().all(|s| s.is_terminal())
    }

    /// Mark `task` as started.
    ///
    /// # Errors
    ///
    /// Fails if the task is unknown, not pending, or still waiting.
    pub fn mark_running(&self, task: &str) -> Result<(), TrackerError> {
        let idx = self.index(task)?;
        let mut status = self.lock();
        if status[idx] != TaskStatus::Pending {
            return Err(TrackerError::InvalidTransition {
                task: task.to_owned(),
                from: status[idx],
                to: TaskStatus::Running,
            });
        }
        let waiting = self.waiting_on(idx, &status);
        if !waiting.is_empty() {
            return Err(TrackerError::NotReady {
                task: task.to_owned(),
                waiting,
            });
        }
        status[idx] = TaskStatus::Running;
        debug!(task, "task running");
        Ok(())
    }

    /// Mark `task` as completed. Returns the tasks cancelled as a result.
    ///
    /// # Errors
    ///
    /// Fails if the task is unknown or already terminal.
    pub fn mark_completed(&self, task: &str) -> Result<Vec<String>, TrackerError> {
        self.finish(task, TaskStatus::Completed)
    }

    /// Mark `task` as failed. Returns the tasks cancelled as a result.
    ///
    /// # Errors
    ///
    /// Fails if the task is unknown or already terminal.
    pub fn mark_failed(&self, task: &str) -> Result<Vec<String>, TrackerError> {
        self.finish(task, TaskStatus::Failed)
    }

    /// Cancel `task` and every dependent it can no longer release.
    ///
    /// # Errors
    ///
    /// Fails if the task is unknown or already terminal.
    pub fn cancel(&self, task: &str) -> Result<Vec<String>, TrackerError> {
        let mut cancelled = self.finish(task, TaskStatus::Cancelled)?;
        cancelled.insert(0, task.to_owned());
        Ok(cancelled)
    }

    // -- internals ----------------------------------------------------------

    fn finish(&self, task: &str, to: TaskStatus) -> Result<Vec<String>, TrackerError> {
        let idx = self.index(task)?;
        let mut status = self.lock();
        if status[idx].is_terminal() {
            return Err(TrackerError::InvalidTransition {
                task: task.to_owned(),
                from: status[idx],
                to,
            });
        }
        status[idx] = to;
        debug!(task, status = %to, "task finished");

        let cancelled = self.cascade(idx, &mut status);
        if !cancelled.is_empty() {
            info!(task, ?cancelled, "dependents cancelled");
        }
        Ok(cancelled)
    }

    /// Cancel pending dependents that can never be released, transitively.
    fn cascade(&self, root: usize, status: &mut [TaskStatus]) -> Vec<String> {
        let mut cancelled = Vec::new();
        let mut work = vec![root];
        while let Some(node) = work.pop() {
            for &dependent in self.graph.outgoing(node) {
                if status[dependent] != TaskStatus::Pending {
                    continue;
                }
                let doomed = self
                    .graph
                    .incoming(dependent)
                    .iter()
                    .any(|e| edge_state(e, status[e.prerequisite]) == EdgeState::Unreleasable);
                if doomed {
                    status[dependent] = TaskStatus::Cancelled;
                    cancelled.push(self.graph.id(dependent).to_owned());
                    work.push(dependent);
                }
            }
        }
        cancelled
    }

    fn waiting_on(&self, idx: usize, status: &[TaskStatus]) -> Vec<String> {
        self.graph
            .incoming(idx)
            .iter()
            .filter(|e| edge_state(e, status[e.prerequisite]) != EdgeState::Released)
            .map(|e| self.graph.id(e.prerequisite).to_owned())
            .collect()
    }

    fn with_status(&self, wanted: TaskStatus) -> Vec<String> {
        self.snapshot()
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == wanted)
            .map(|(i, _)| self.graph.id(i).to_owned())
            .collect()
    }

    fn index(&self, task: &str) -> Result<usize, TrackerError> {
        self.graph
            .index_of(task)
            .ok_or_else(|| TrackerError::UnknownTask(task.to_owned()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TaskStatus>> {
        // Status updates never panic mid-write, so a poisoned lock still
        // holds consistent data.
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<TaskStatus> {
        self.lock().clone()
    }
}
