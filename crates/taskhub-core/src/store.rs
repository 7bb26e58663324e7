//! `JobStore` trait — the abstract persistence seam
//! the engine depends on. Generalized from the Redis-backed
//! `jobs::queue::JobQueue` (enqueue/dequeue/get_job/update_job_status)
//! into a backend-agnostic trait; the atomic claim operation itself is
//! grounded on `seesaw-job-postgres`'s `claim_ready` (other_examples),
//! adapted per backend since SQLite has no `FOR UPDATE SKIP LOCKED`.
//!
//! `async_trait` + `Send + Sync` make this object-safe, so `Hub` and
//! `JobScheduler` hold `Arc<dyn JobStore>` the way callers elsewhere in this codebase
//! hold `Arc<dyn Repository<_, _>>`-shaped dependencies.

use crate::error::StoreError;
use crate::model::{Job, JobFilter, Progress, Task, TaskFilter, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically insert a Task and its initial Jobs as one unit. Callers
    /// batch large deterministic job lists (1000/batch) internally; the
    /// operation as seen by the caller is still atomic.
    async fn create_task(&self, task: Task, jobs: Vec<Job>) -> Result<(), StoreError>;

    /// Append more Jobs to an existing (typically dynamic) Task, chunked
    /// the same way. Idempotent with respect to job id: a job whose id
    /// already exists on the Task is left untouched (`resumeTask` union
    /// semantics for dynamic Tasks; see DESIGN.md).
    async fn append_jobs(&self, task_id: &str, jobs: Vec<Job>) -> Result<(), StoreError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, StoreError>;

    async fn delete_task(&self, task_id: &str) -> Result<(), StoreError>;

    /// Atomically transition up to `limit` `pending` jobs (whose
    /// `scheduled_at <= now`) to `active`, returning them in
    /// non-decreasing `scheduled_at` order, ties broken by insertion
    /// order.
    async fn claim_jobs(
        &self,
        task_id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError>;

    /// Transition an `active` job to `completed`. A no-op if the job is
    /// not currently active: invariant violations are logged and
    /// swallowed, not propagated.
    async fn complete_job(
        &self,
        task_id: &str,
        job_id: &str,
        output: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Transition an `active` job to `pending` (with `scheduled_at = now +
    /// next_delay_ms` and `attempts += 1`) or to terminal `failed`,
    /// depending on `retryable`. A no-op if the job is not currently
    /// active.
    async fn fail_job(
        &self,
        task_id: &str,
        job_id: &str,
        error: &str,
        retryable: bool,
        next_delay_ms: u64,
    ) -> Result<(), StoreError>;

    /// Cooperative-cancellation reset path: return an `active` job to
    /// `pending` immediately, without incrementing `attempts` and
    /// without consuming a retry. A no-op if the job is not currently
    /// active. Kept distinct from `fail_job` rather than reusing
    /// `fail_job(retryable=true, next_delay_ms=0)`, since that would
    /// still consume an attempt (see DESIGN.md).
    async fn requeue_cancelled(&self, task_id: &str, job_id: &str) -> Result<(), StoreError>;

    /// Reset every `active` job on `task_id` back to `pending`. Used both
    /// for the crash-recovery sweep and by `stop()`'s
    /// settle phase.
    async fn reset_active_jobs(&self, task_id: &str) -> Result<u64, StoreError>;

    /// Reset every terminally `failed` job on `task_id` back to `pending`
    /// with `attempts = 0`, for `Hub::reset_failed_jobs`.
    async fn reset_failed_jobs(&self, task_id: &str) -> Result<u64, StoreError>;

    async fn get_progress(&self, task_id: &str) -> Result<Progress, StoreError>;

    async fn get_results(&self, task_id: &str, filter: JobFilter) -> Result<Vec<Job>, StoreError>;

    async fn set_task_status(
        &self,
        task_id: &str,
        status: crate::model::TaskStatus,
    ) -> Result<(), StoreError>;

    /// All job ids currently recorded for a Task, in insertion order —
    /// used by `resumeTask` to compute the union/mismatch against a
    /// fresh `Source`.
    async fn list_job_ids(&self, task_id: &str) -> Result<Vec<String>, StoreError>;
}

/// Convenience used by `Hub::open` for the crash-recovery sweep: every
/// Task not in `completed`, in no particular order. Deliberately broader
/// than `!status.is_terminal()` — a Task that failed mid-flight (jobs
/// still `active` when the store error that failed it happened) still
/// needs its `active` jobs reset back to `pending` on reopen.
pub async fn non_terminal_tasks(store: &dyn JobStore) -> Result<Vec<TaskId>, StoreError> {
    let tasks = store.list_tasks(TaskFilter::default()).await?;
    Ok(tasks
        .into_iter()
        .filter(|t| t.status != TaskStatus::Completed)
        .map(|t| t.id)
        .collect())
}
