//! Task registry polled by callers.
//!
//! [`JobStatusStore`] maps a task id to an immutable [`Task`] snapshot. Writers never
//! mutate a snapshot in place: [`JobStatusStore::update`] clones the current value,
//! applies the change and swaps the new `Arc` in under the write lock, so a reader
//! always sees either the old or the new task, never something in between.
//!
//! The store lives in memory only. Tasks that were running when the process exits are
//! lost; nothing is resumed on restart.

use crate::downloader::JobResult;
use crate::errors::{AppError, AppResult};
use crate::models::DownloadRequest;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskProgress {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl TaskProgress {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Caller-visible unit of work created by one submission.
///
/// `results` stays empty while the task is running and is filled in, sorted, by the
/// single terminal update.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: String,
    pub request: DownloadRequest,
    pub status: TaskStatus,
    pub message: String,
    pub progress: TaskProgress,
    pub results: Vec<JobResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(request: DownloadRequest) -> Self {
        let total = request.job_count();
        Self {
            task_id: Uuid::new_v4().to_string(),
            request,
            status: TaskStatus::Running,
            message: "Download started".to_string(),
            progress: TaskProgress {
                total,
                ..TaskProgress::default()
            },
            results: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Moves the task into a terminal state.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        message: impl Into<String>,
        results: Vec<JobResult>,
    ) {
        self.status = status;
        self.message = message.into();
        self.progress.succeeded = results.iter().filter(|r| r.succeeded()).count();
        self.progress.failed = results.len() - self.progress.succeeded;
        self.results = results;
        self.finished_at = Some(Utc::now());
    }
}

/// Process-wide registry of tasks, shared by the orchestrator and pollers.
#[derive(Default)]
pub struct JobStatusStore {
    tasks: RwLock<HashMap<String, Arc<Task>>>,
}

impl JobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new task.
    ///
    /// With `exclusive` set, the insert is refused while another task is running; the
    /// check and the insert happen under the same lock.
    pub fn insert(&self, task: Task, exclusive: bool) -> AppResult<Arc<Task>> {
        let mut tasks = self.tasks.write();
        if exclusive {
            if let Some(running) = tasks.values().find(|t| t.status == TaskStatus::Running) {
                return Err(AppError::TaskAlreadyRunning(running.task_id.clone()));
            }
        }
        let task = Arc::new(task);
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    /// Current snapshot of a task.
    pub fn get(&self, task_id: &str) -> AppResult<Arc<Task>> {
        self.tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
    }

    /// Replaces the task with a modified copy.
    ///
    /// Terminal tasks are final: the closure is not applied and the stored snapshot is
    /// returned unchanged.
    pub fn update(&self, task_id: &str, apply: impl FnOnce(&mut Task)) -> AppResult<Arc<Task>> {
        let mut tasks = self.tasks.write();
        let current = tasks
            .get(task_id)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        if current.status.is_terminal() {
            debug!(
                task_id = task_id,
                status = current.status.as_str(),
                "Ignoring update of finished task"
            );
            return Ok(current.clone());
        }

        let mut next = Task::clone(current);
        apply(&mut next);
        let next = Arc::new(next);
        tasks.insert(task_id.to_string(), next.clone());
        Ok(next)
    }

    /// Id of a running task, if any.
    pub fn running_task(&self) -> Option<String> {
        self.tasks
            .read()
            .values()
            .find(|t| t.status == TaskStatus::Running)
            .map(|t| t.task_id.clone())
    }

    /// All tasks, most recently started first.
    pub fn list(&self) -> Vec<Arc<Task>> {
        let mut tasks: Vec<_> = self.tasks.read().values().cloned().collect();
        tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
