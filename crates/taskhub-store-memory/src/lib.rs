//! In-process `JobStore` backed by `tokio::sync::Mutex` + a `HashMap`.
//!
//! For tests, prototyping, and ephemeral single-process use. Generalizes
//! the shape of the `jobs::queue::JobQueue` (enqueue / dequeue /
//! get_job / update_job_status) from a Redis-backed flat queue into an
//! in-memory implementation of the `JobStore` trait, keyed by Task.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use taskhub_core::error::StoreError;
use taskhub_core::model::{Job, JobFilter, JobStatus, Progress, Task, TaskFilter, TaskId, TaskStatus};
use taskhub_core::store::JobStore;
use tokio::sync::Mutex;

#[derive(Clone)]
struct JobRecord {
    job: Job,
    seq: u64,
}

#[derive(Clone)]
struct TaskEntry {
    task: Task,
    jobs: Vec<JobRecord>,
}

/// Snapshot of the store's contents, usable to simulate a crash-and-reopen
/// cycle in tests without a real process exit: take a snapshot while jobs
/// are `active`, build a fresh `MemoryJobStore::from_snapshot`, and run
/// `Hub::open` over it — the same recovery sweep a real restart would
/// trigger runs against the frozen `active` rows.
#[derive(Clone)]
pub struct MemorySnapshot {
    tasks: HashMap<TaskId, TaskEntry>,
    seq: u64,
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<HashMap<TaskId, TaskEntry>>,
    seq: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn snapshot(&self) -> MemorySnapshot {
        let guard = self.inner.lock().await;
        MemorySnapshot {
            tasks: guard.clone(),
            seq: self.seq.load(Ordering::SeqCst),
        }
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot.tasks),
            seq: AtomicU64::new(snapshot.seq),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn recompute_counters(task: &mut Task, jobs: &[JobRecord]) {
        task.total_jobs = jobs.len() as u64;
        task.completed_jobs = jobs.iter().filter(|r| r.job.status == JobStatus::Completed).count() as u64;
        task.failed_jobs = jobs.iter().filter(|r| r.job.status == JobStatus::Failed).count() as u64;
        task.updated_at = Utc::now();
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_task(&self, task: Task, jobs: Vec<Job>) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        let records = jobs
            .into_iter()
            .map(|job| JobRecord {
                job,
                seq: self.next_seq(),
            })
            .collect();
        guard.insert(task.id.clone(), TaskEntry { task, jobs: records });
        Ok(())
    }

    async fn append_jobs(&self, task_id: &str, jobs: Vec<Job>) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let existing: std::collections::HashSet<String> =
            entry.jobs.iter().map(|r| r.job.id.clone()).collect();
        for job in jobs {
            if existing.contains(&job.id) {
                continue;
            }
            let seq = self.next_seq();
            entry.jobs.push(JobRecord { job, seq });
        }
        Self::recompute_counters(&mut entry.task, &entry.jobs);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.get(task_id).map(|e| e.task.clone()))
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .values()
            .map(|e| e.task.clone())
            .filter(|t| filter.status.map(|s| s == t.status).unwrap_or(true))
            .collect())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        guard.remove(task_id);
        Ok(())
    }

    async fn claim_jobs(
        &self,
        task_id: &str,
        limit: u32,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        let mut candidates: Vec<usize> = entry
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, r)| r.job.status == JobStatus::Pending && r.job.scheduled_at <= now)
            .map(|(i, _)| i)
            .collect();

        candidates.sort_by(|&a, &b| {
            let ra = &entry.jobs[a];
            let rb = &entry.jobs[b];
            ra.job
                .scheduled_at
                .cmp(&rb.job.scheduled_at)
                .then(ra.seq.cmp(&rb.seq))
        });
        candidates.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let record = &mut entry.jobs[idx];
            record.job.status = JobStatus::Active;
            record.job.updated_at = now;
            claimed.push(record.job.clone());
        }
        Ok(claimed)
    }

    async fn complete_job(
        &self,
        task_id: &str,
        job_id: &str,
        output: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        if let Some(record) = entry.jobs.iter_mut().find(|r| r.job.id == job_id) {
            if record.job.status == JobStatus::Active {
                record.job.status = JobStatus::Completed;
                record.job.output = Some(output);
                record.job.updated_at = Utc::now();
            }
            // Not currently active: a stale write from a race with a
            // cancellation reset. Silently ignored.
        }
        Self::recompute_counters(&mut entry.task, &entry.jobs);
        Ok(())
    }

    async fn fail_job(
        &self,
        task_id: &str,
        job_id: &str,
        error: &str,
        retryable: bool,
        next_delay_ms: u64,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        if let Some(record) = entry.jobs.iter_mut().find(|r| r.job.id == job_id) {
            if record.job.status == JobStatus::Active {
                let now = Utc::now();
                record.job.attempts += 1;
                record.job.last_error = Some(error.to_string());
                record.job.updated_at = now;
                if retryable {
                    record.job.status = JobStatus::Pending;
                    record.job.scheduled_at = now + chrono::Duration::milliseconds(next_delay_ms as i64);
                } else {
                    record.job.status = JobStatus::Failed;
                }
            }
        }
        Self::recompute_counters(&mut entry.task, &entry.jobs);
        Ok(())
    }

    async fn requeue_cancelled(&self, task_id: &str, job_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        if let Some(record) = entry.jobs.iter_mut().find(|r| r.job.id == job_id) {
            if record.job.status == JobStatus::Active {
                record.job.status = JobStatus::Pending;
                record.job.scheduled_at = Utc::now();
                record.job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn reset_active_jobs(&self, task_id: &str) -> Result<u64, StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let now = Utc::now();
        let mut count = 0u64;
        for record in entry.jobs.iter_mut() {
            if record.job.status == JobStatus::Active {
                record.job.status = JobStatus::Pending;
                record.job.scheduled_at = now;
                record.job.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn reset_failed_jobs(&self, task_id: &str) -> Result<u64, StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let now = Utc::now();
        let mut count = 0u64;
        for record in entry.jobs.iter_mut() {
            if record.job.status == JobStatus::Failed {
                record.job.status = JobStatus::Pending;
                record.job.attempts = 0;
                record.job.scheduled_at = now;
                record.job.updated_at = now;
                count += 1;
            }
        }
        Self::recompute_counters(&mut entry.task, &entry.jobs);
        Ok(count)
    }

    async fn get_progress(&self, task_id: &str) -> Result<Progress, StoreError> {
        let guard = self.inner.lock().await;
        let entry = guard
            .get(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let mut progress = Progress::default();
        for record in &entry.jobs {
            progress.total += 1;
            match record.job.status {
                JobStatus::Pending => progress.pending += 1,
                JobStatus::Active => progress.active += 1,
                JobStatus::Completed => progress.completed += 1,
                JobStatus::Failed => progress.failed += 1,
            }
        }
        Ok(progress)
    }

    async fn get_results(&self, task_id: &str, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        let guard = self.inner.lock().await;
        let entry = guard
            .get(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        let mut jobs: Vec<Job> = entry
            .jobs
            .iter()
            .filter(|r| filter.status.map(|s| s == r.job.status).unwrap_or(true))
            .map(|r| r.job.clone())
            .collect();
        if let Some(offset) = filter.offset {
            jobs = jobs.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        entry.task.status = status;
        entry.task.updated_at = Utc::now();
        Ok(())
    }

    async fn list_job_ids(&self, task_id: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.lock().await;
        let entry = guard
            .get(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        Ok(entry.jobs.iter().map(|r| r.job.id.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskhub_core::config::{AimdConfig, ConcurrencyConfig, RetryConfig};
    use taskhub_core::model::SourceType;

    fn sample_task(id: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            name: "test".into(),
            source_type: SourceType::Deterministic,
            merkle_root: Some("root".into()),
            status: TaskStatus::Running,
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            aimd: AimdConfig::default(),
            timeout_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn claim_respects_scheduled_at_and_insertion_order() {
        let store = MemoryJobStore::new();
        let task = sample_task("t1");
        let now = Utc::now();
        let mut j1 = Job::new("a".into(), "t1".into(), serde_json::json!(1));
        j1.scheduled_at = now;
        let mut j2 = Job::new("b".into(), "t1".into(), serde_json::json!(2));
        j2.scheduled_at = now;
        store.create_task(task, vec![j1, j2]).await.unwrap();

        let claimed = store.claim_jobs("t1", 10, now + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, "a");
        assert_eq!(claimed[1].id, "b");
    }

    #[tokio::test]
    async fn complete_then_fail_updates_counters() {
        let store = MemoryJobStore::new();
        let task = sample_task("t2");
        let j1 = Job::new("a".into(), "t2".into(), serde_json::json!(1));
        let j2 = Job::new("b".into(), "t2".into(), serde_json::json!(2));
        store.create_task(task, vec![j1, j2]).await.unwrap();

        let now = Utc::now();
        store.claim_jobs("t2", 10, now).await.unwrap();
        store.complete_job("t2", "a", serde_json::json!("ok")).await.unwrap();
        store.fail_job("t2", "b", "boom", false, 0).await.unwrap();

        let progress = store.get_progress("t2").await.unwrap();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.pending, 0);
        assert_eq!(progress.active, 0);

        let task = store.get_task("t2").await.unwrap().unwrap();
        assert_eq!(task.completed_jobs, 1);
        assert_eq!(task.failed_jobs, 1);
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips_active_jobs() {
        let store = MemoryJobStore::new();
        let task = sample_task("t3");
        let j1 = Job::new("a".into(), "t3".into(), serde_json::json!(1));
        store.create_task(task, vec![j1]).await.unwrap();
        store.claim_jobs("t3", 10, Utc::now()).await.unwrap();

        let snapshot = store.snapshot().await;
        let reopened = MemoryJobStore::from_snapshot(snapshot);
        let progress = reopened.get_progress("t3").await.unwrap();
        assert_eq!(progress.active, 1);

        let reset = reopened.reset_active_jobs("t3").await.unwrap();
        assert_eq!(reset, 1);
        let progress = reopened.get_progress("t3").await.unwrap();
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.active, 0);
    }

    #[tokio::test]
    async fn fail_job_is_noop_if_not_active() {
        let store = MemoryJobStore::new();
        let task = sample_task("t4");
        let j1 = Job::new("a".into(), "t4".into(), serde_json::json!(1));
        store.create_task(task, vec![j1]).await.unwrap();
        // Never claimed, so still pending.
        store.fail_job("t4", "a", "boom", false, 0).await.unwrap();
        let progress = store.get_progress("t4").await.unwrap();
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.failed, 0);
    }
}
