//! Core data model.
//!
//! `Task`/`Job` mirror the shape of the `jobs::job::Job` (id,
//! payload, status, attempts, timestamps) generalized from a single flat
//! queue entry into the Task-owns-many-Jobs model this engine needs.

use crate::config::{AimdConfig, ConcurrencyConfig, RetryConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Deterministic,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

/// A unit of work owned by a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task_id: TaskId,
    pub input: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub output: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, task_id: TaskId, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            task_id,
            input,
            status: JobStatus::Pending,
            attempts: 0,
            output: None,
            last_error: None,
            scheduled_at: now,
            updated_at: now,
        }
    }
}

/// A named batch of Jobs driven by one `Source`, run under one
/// [`crate::scheduler`] loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub source_type: SourceType,
    pub merkle_root: Option<String>,
    pub status: TaskStatus,
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub aimd: AimdConfig,
    pub timeout_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// `totalJobs = completedJobs + failedJobs` and no jobs left active or
    /// pending — completion invariant.
    pub fn is_done_counting(&self, progress: &Progress) -> bool {
        progress.pending == 0 && progress.active == 0
    }
}

/// Snapshot of a Task's job counters, as returned by
/// `JobStore::get_progress`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Filter accepted by `JobStore::get_results` / `list_tasks`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
}

/// Transient events emitted during a Task's lifecycle.
///
/// Modeled as a tagged enum rather than a stringly-typed emitter — the
/// idiomatic Rust rendering of "tagged channel, not string + payload bag".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Event {
    #[serde(rename = "job:start")]
    JobStart { task_id: TaskId, job_id: JobId },
    #[serde(rename = "job:complete")]
    JobComplete {
        task_id: TaskId,
        job_id: JobId,
        output: serde_json::Value,
    },
    #[serde(rename = "job:failed")]
    JobFailed {
        task_id: TaskId,
        job_id: JobId,
        error: String,
    },
    #[serde(rename = "job:retry")]
    JobRetry {
        task_id: TaskId,
        job_id: JobId,
        attempt: u32,
        delay_ms: u64,
    },
    Progress {
        task_id: TaskId,
        progress: Progress,
        concurrency: u32,
    },
    #[serde(rename = "rate-limited")]
    RateLimited { task_id: TaskId, concurrency: u32 },
    #[serde(rename = "task:status")]
    TaskStatus {
        task_id: TaskId,
        status: TaskStatus,
    },
}

impl Event {
    pub fn task_id(&self) -> &str {
        match self {
            Event::JobStart { task_id, .. }
            | Event::JobComplete { task_id, .. }
            | Event::JobFailed { task_id, .. }
            | Event::JobRetry { task_id, .. }
            | Event::Progress { task_id, .. }
            | Event::RateLimited { task_id, .. }
            | Event::TaskStatus { task_id, .. } => task_id,
        }
    }

    /// The event `kind` string, matching the wire vocabulary exactly.
    /// Used by `TaskHandle::on(kind, ..)`'s `"*"` vs specific-kind filter.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::JobStart { .. } => "job:start",
            Event::JobComplete { .. } => "job:complete",
            Event::JobFailed { .. } => "job:failed",
            Event::JobRetry { .. } => "job:retry",
            Event::Progress { .. } => "progress",
            Event::RateLimited { .. } => "rate-limited",
            Event::TaskStatus { .. } => "task:status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn event_kind_matches_wire_vocabulary() {
        let e = Event::RateLimited {
            task_id: "t".into(),
            concurrency: 2,
        };
        assert_eq!(e.kind(), "rate-limited");
    }
}
