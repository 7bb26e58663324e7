//! SQLite-backed `JobStore`, grounded on `seesaw-job-postgres`'s
//! claim/mark_succeeded/mark_failed pattern (other_examples), adapted for
//! SQLite's single-writer model: an `IMMEDIATE` transaction serializes
//! claimers instead of `FOR UPDATE SKIP LOCKED`.
//!
//! `sqlx::Error` can't `impl From<..> for StoreError` here — both types
//! are foreign to this crate — so every call site maps it inline with
//! `.map_err(backend_err)`.

mod migrate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row};
use std::str::FromStr;
use taskhub_core::config::{AimdConfig, ConcurrencyConfig, RetryConfig};
use taskhub_core::error::StoreError;
use taskhub_core::model::{
    Job, JobFilter, JobStatus, Progress, SourceType, Task, TaskFilter, TaskStatus,
};
use taskhub_core::store::JobStore;

fn backend_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct SqlJobStore {
    pool: SqlitePool,
}

impl SqlJobStore {
    /// Opens (creating if absent) a SQLite database at `path` and runs
    /// migrations.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(path)
            .map_err(backend_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await
            .map_err(backend_err)?;
        migrate::run(&pool).await.map_err(backend_err)?;
        Ok(Self { pool })
    }

    /// Wraps an already-open pool (migrations still run).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        migrate::run(&pool).await.map_err(backend_err)?;
        Ok(Self { pool })
    }
}

fn source_type_str(s: SourceType) -> &'static str {
    match s {
        SourceType::Deterministic => "deterministic",
        SourceType::Dynamic => "dynamic",
    }
}

fn parse_source_type(s: &str) -> SourceType {
    match s {
        "dynamic" => SourceType::Dynamic,
        _ => SourceType::Deterministic,
    }
}

fn task_status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

fn parse_task_status(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "paused" => TaskStatus::Paused,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        _ => TaskStatus::Pending,
    }
}

fn job_status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "pending",
        JobStatus::Active => "active",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn parse_job_status(s: &str) -> JobStatus {
    match s {
        "active" => JobStatus::Active,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Pending,
    }
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Task, StoreError> {
    let created_at: String = row.try_get("created_at").map_err(backend_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(backend_err)?;
    Ok(Task {
        id: row.try_get("id").map_err(backend_err)?,
        name: row.try_get("name").map_err(backend_err)?,
        source_type: parse_source_type(
            &row.try_get::<String, _>("source_type").map_err(backend_err)?,
        ),
        merkle_root: row.try_get("merkle_root").map_err(backend_err)?,
        status: parse_task_status(&row.try_get::<String, _>("status").map_err(backend_err)?),
        total_jobs: row.try_get::<i64, _>("total_jobs").map_err(backend_err)? as u64,
        completed_jobs: row.try_get::<i64, _>("completed_jobs").map_err(backend_err)? as u64,
        failed_jobs: row.try_get::<i64, _>("failed_jobs").map_err(backend_err)? as u64,
        concurrency: ConcurrencyConfig {
            min: row.try_get::<i64, _>("concurrency_min").map_err(backend_err)? as u32,
            max: row.try_get::<i64, _>("concurrency_max").map_err(backend_err)? as u32,
            initial: row.try_get::<i64, _>("concurrency_initial").map_err(backend_err)? as u32,
        },
        retry: RetryConfig {
            max_attempts: row.try_get::<i64, _>("retry_max_attempts").map_err(backend_err)? as u32,
            base_delay_ms: row.try_get::<i64, _>("retry_base_delay_ms").map_err(backend_err)? as u64,
            max_delay_ms: row.try_get::<i64, _>("retry_max_delay_ms").map_err(backend_err)? as u64,
        },
        aimd: AimdConfig {
            additive_step: row.try_get::<i64, _>("aimd_additive_step").map_err(backend_err)? as u32,
            multiplicative_factor: row.try_get::<f64, _>("aimd_multiplicative_factor").map_err(backend_err)?,
            success_threshold: row.try_get::<i64, _>("aimd_success_threshold").map_err(backend_err)? as u32,
        },
        timeout_ms: row
            .try_get::<Option<i64>, _>("timeout_ms")
            .map_err(backend_err)?
            .map(|v| v as u64),
        created_at: parse_dt(&created_at)?,
        updated_at: parse_dt(&updated_at)?,
    })
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Job, StoreError> {
    let input: String = row.try_get("input").map_err(backend_err)?;
    let output: Option<String> = row.try_get("output").map_err(backend_err)?;
    let scheduled_at: String = row.try_get("scheduled_at").map_err(backend_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(backend_err)?;
    Ok(Job {
        id: row.try_get("id").map_err(backend_err)?,
        task_id: row.try_get("task_id").map_err(backend_err)?,
        input: serde_json::from_str(&input).map_err(StoreError::from)?,
        status: parse_job_status(&row.try_get::<String, _>("status").map_err(backend_err)?),
        attempts: row.try_get::<i64, _>("attempts").map_err(backend_err)? as u32,
        output: output
            .map(|o| serde_json::from_str(&o))
            .transpose()
            .map_err(StoreError::from)?,
        last_error: row.try_get("last_error").map_err(backend_err)?,
        scheduled_at: parse_dt(&scheduled_at)?,
        updated_at: parse_dt(&updated_at)?,
    })
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid timestamp {s:?}: {e}")))
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

#[async_trait]
impl JobStore for SqlJobStore {
    async fn create_task(&self, task: Task, jobs: Vec<Job>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, name, source_type, merkle_root, status,
                total_jobs, completed_jobs, failed_jobs,
                concurrency_min, concurrency_max, concurrency_initial,
                retry_max_attempts, retry_base_delay_ms, retry_max_delay_ms,
                aimd_additive_step, aimd_multiplicative_factor, aimd_success_threshold,
                timeout_ms, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(source_type_str(task.source_type))
        .bind(&task.merkle_root)
        .bind(task_status_str(task.status))
        .bind(task.total_jobs as i64)
        .bind(task.completed_jobs as i64)
        .bind(task.failed_jobs as i64)
        .bind(task.concurrency.min as i64)
        .bind(task.concurrency.max as i64)
        .bind(task.concurrency.initial as i64)
        .bind(task.retry.max_attempts as i64)
        .bind(task.retry.base_delay_ms as i64)
        .bind(task.retry.max_delay_ms as i64)
        .bind(task.aimd.additive_step as i64)
        .bind(task.aimd.multiplicative_factor)
        .bind(task.aimd.success_threshold as i64)
        .bind(task.timeout_ms.map(|v| v as i64))
        .bind(fmt_dt(task.created_at))
        .bind(fmt_dt(task.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::DuplicateTask(task.id.clone())
            }
            e => backend_err(e),
        })?;

        for (seq, job) in jobs.into_iter().enumerate() {
            insert_job(&mut tx, &task.id, seq as i64, &job).await?;
        }

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn append_jobs(&self, task_id: &str, jobs: Vec<Job>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_err)?;
        if exists.is_none() {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM jobs WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend_err)?;

        for (offset, job) in jobs.into_iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO jobs (task_id, id, seq, input, status, attempts, output, last_error, scheduled_at, updated_at) \
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(task_id)
            .bind(&job.id)
            .bind(next_seq + offset as i64)
            .bind(serde_json::to_string(&job.input).map_err(StoreError::from)?)
            .bind(job_status_str(job.status))
            .bind(job.attempts as i64)
            .bind(job.output.as_ref().map(serde_json::to_string).transpose().map_err(StoreError::from)?)
            .bind(&job.last_error)
            .bind(fmt_dt(job.scheduled_at))
            .bind(fmt_dt(job.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }

        sqlx::query(
            "UPDATE tasks SET total_jobs = (SELECT COUNT(*) FROM jobs WHERE task_id = ?), updated_at = ? WHERE id = ?",
        )
        .bind(task_id)
        .bind(fmt_dt(Utc::now()))
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, StoreError> {
        let rows = match filter.status {
            Some(status) => sqlx::query("SELECT * FROM tasks WHERE status = ?")
                .bind(task_status_str(status))
                .fetch_all(&self.pool)
                .await
                .map_err(backend_err)?,
            None => sqlx::query("SELECT * FROM tasks")
                .fetch_all(&self.pool)
                .await
                .map_err(backend_err)?,
        };
        rows.iter().map(task_from_row).collect()
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    /// `BEGIN IMMEDIATE` takes SQLite's single write lock up front, so two
    /// claimers racing on the same Task serialize here rather than one
    /// discovering a write conflict after doing the `SELECT`.
    async fn claim_jobs(
        &self,
        task_id: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend_err)?;
        conn.execute("BEGIN IMMEDIATE").await.map_err(backend_err)?;

        let claim_result = async {
            let rows = sqlx::query(
                "SELECT id FROM jobs WHERE task_id = ? AND status = 'pending' AND scheduled_at <= ? \
                ORDER BY scheduled_at ASC, seq ASC LIMIT ?",
            )
            .bind(task_id)
            .bind(fmt_dt(now))
            .bind(limit as i64)
            .fetch_all(&mut *conn)
            .await
            .map_err(backend_err)?;

            let ids: Vec<String> = rows
                .iter()
                .map(|r| r.try_get::<String, _>("id").map_err(backend_err))
                .collect::<Result<_, _>>()?;

            for id in &ids {
                sqlx::query("UPDATE jobs SET status = 'active', updated_at = ? WHERE task_id = ? AND id = ?")
                    .bind(fmt_dt(now))
                    .bind(task_id)
                    .bind(id)
                    .execute(&mut *conn)
                    .await
                    .map_err(backend_err)?;
            }

            if ids.is_empty() {
                return Ok(Vec::new());
            }

            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT * FROM jobs WHERE task_id = ? AND id IN ({placeholders}) ORDER BY seq ASC"
            );
            let mut q = sqlx::query(&sql).bind(task_id);
            for id in &ids {
                q = q.bind(id);
            }
            let claimed_rows = q.fetch_all(&mut *conn).await.map_err(backend_err)?;
            claimed_rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()
        }
        .await;

        match claim_result {
            Ok(jobs) => {
                conn.execute("COMMIT").await.map_err(backend_err)?;
                Ok(jobs)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK").await;
                Err(e)
            }
        }
    }

    async fn complete_job(
        &self,
        task_id: &str,
        job_id: &str,
        output: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let now = fmt_dt(Utc::now());
        sqlx::query(
            "UPDATE jobs SET status = 'completed', output = ?, updated_at = ? \
            WHERE task_id = ? AND id = ? AND status = 'active'",
        )
        .bind(serde_json::to_string(&output).map_err(StoreError::from)?)
        .bind(&now)
        .bind(task_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;
        refresh_counters(&mut tx, task_id, &now).await?;
        tx.commit().await.map_err(backend_err)?;
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
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let now = Utc::now();
        if retryable {
            let scheduled_at = now + chrono::Duration::milliseconds(next_delay_ms as i64);
            sqlx::query(
                "UPDATE jobs SET status = 'pending', attempts = attempts + 1, last_error = ?, \
                scheduled_at = ?, updated_at = ? WHERE task_id = ? AND id = ? AND status = 'active'",
            )
            .bind(error)
            .bind(fmt_dt(scheduled_at))
            .bind(fmt_dt(now))
            .bind(task_id)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', attempts = attempts + 1, last_error = ?, \
                updated_at = ? WHERE task_id = ? AND id = ? AND status = 'active'",
            )
            .bind(error)
            .bind(fmt_dt(now))
            .bind(task_id)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }
        refresh_counters(&mut tx, task_id, &fmt_dt(now)).await?;
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn requeue_cancelled(&self, task_id: &str, job_id: &str) -> Result<(), StoreError> {
        let now = fmt_dt(Utc::now());
        sqlx::query(
            "UPDATE jobs SET status = 'pending', scheduled_at = ?, updated_at = ? \
            WHERE task_id = ? AND id = ? AND status = 'active'",
        )
        .bind(&now)
        .bind(&now)
        .bind(task_id)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn reset_active_jobs(&self, task_id: &str) -> Result<u64, StoreError> {
        let now = fmt_dt(Utc::now());
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', scheduled_at = ?, updated_at = ? \
            WHERE task_id = ? AND status = 'active'",
        )
        .bind(&now)
        .bind(&now)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(result.rows_affected())
    }

    async fn reset_failed_jobs(&self, task_id: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let now = fmt_dt(Utc::now());
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', attempts = 0, scheduled_at = ?, updated_at = ? \
            WHERE task_id = ? AND status = 'failed'",
        )
        .bind(&now)
        .bind(&now)
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;
        refresh_counters(&mut tx, task_id, &now).await?;
        tx.commit().await.map_err(backend_err)?;
        Ok(result.rows_affected())
    }

    async fn get_progress(&self, task_id: &str) -> Result<Progress, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END) AS active,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed
            FROM jobs WHERE task_id = ?
            "#,
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(Progress {
            total: row.try_get::<i64, _>("total").map_err(backend_err)? as u64,
            pending: row.try_get::<Option<i64>, _>("pending").map_err(backend_err)?.unwrap_or(0) as u64,
            active: row.try_get::<Option<i64>, _>("active").map_err(backend_err)?.unwrap_or(0) as u64,
            completed: row.try_get::<Option<i64>, _>("completed").map_err(backend_err)?.unwrap_or(0) as u64,
            failed: row.try_get::<Option<i64>, _>("failed").map_err(backend_err)?.unwrap_or(0) as u64,
        })
    }

    async fn get_results(&self, task_id: &str, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        let limit = filter.limit.unwrap_or(usize::MAX) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        let rows = match filter.status {
            Some(status) => sqlx::query(
                "SELECT * FROM jobs WHERE task_id = ? AND status = ? ORDER BY seq ASC LIMIT ? OFFSET ?",
            )
            .bind(task_id)
            .bind(job_status_str(status))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?,
            None => sqlx::query(
                "SELECT * FROM jobs WHERE task_id = ? ORDER BY seq ASC LIMIT ? OFFSET ?",
            )
            .bind(task_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?,
        };
        rows.iter().map(job_from_row).collect()
    }

    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(task_status_str(status))
            .bind(fmt_dt(Utc::now()))
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn list_job_ids(&self, task_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT id FROM jobs WHERE task_id = ? ORDER BY seq ASC")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("id").map_err(backend_err))
            .collect()
    }
}

async fn insert_job(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    task_id: &str,
    seq: i64,
    job: &Job,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO jobs (task_id, id, seq, input, status, attempts, output, last_error, scheduled_at, updated_at) \
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task_id)
    .bind(&job.id)
    .bind(seq)
    .bind(serde_json::to_string(&job.input).map_err(StoreError::from)?)
    .bind(job_status_str(job.status))
    .bind(job.attempts as i64)
    .bind(job.output.as_ref().map(serde_json::to_string).transpose().map_err(StoreError::from)?)
    .bind(&job.last_error)
    .bind(fmt_dt(job.scheduled_at))
    .bind(fmt_dt(job.updated_at))
    .execute(&mut **tx)
    .await
    .map_err(backend_err)?;
    Ok(())
}

async fn refresh_counters(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    task_id: &str,
    now: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE tasks SET
            completed_jobs = (SELECT COUNT(*) FROM jobs WHERE task_id = ? AND status = 'completed'),
            failed_jobs = (SELECT COUNT(*) FROM jobs WHERE task_id = ? AND status = 'failed'),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(task_id)
    .bind(task_id)
    .bind(now)
    .bind(task_id)
    .execute(&mut **tx)
    .await
    .map_err(backend_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskhub_core::model::Job as CoreJob;

    async fn store() -> SqlJobStore {
        SqlJobStore::connect(":memory:").await.unwrap()
    }

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
    async fn create_then_claim_and_complete() {
        let store = store().await;
        let task = sample_task("t1");
        let job = CoreJob::new("a".into(), "t1".into(), serde_json::json!(1));
        store.create_task(task, vec![job]).await.unwrap();

        let claimed = store.claim_jobs("t1", 10, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);

        store.complete_job("t1", "a", serde_json::json!("done")).await.unwrap();
        let progress = store.get_progress("t1").await.unwrap();
        assert_eq!(progress.completed, 1);

        let task = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.completed_jobs, 1);
    }

    #[tokio::test]
    async fn duplicate_task_id_rejected() {
        let store = store().await;
        let task = sample_task("dup");
        store.create_task(task.clone(), vec![]).await.unwrap();
        let err = store.create_task(task, vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTask(_)));
    }

    #[tokio::test]
    async fn fail_job_retryable_reschedules_forward() {
        let store = store().await;
        let task = sample_task("t2");
        let job = CoreJob::new("a".into(), "t2".into(), serde_json::json!(1));
        store.create_task(task, vec![job]).await.unwrap();
        store.claim_jobs("t2", 10, Utc::now()).await.unwrap();

        store.fail_job("t2", "a", "boom", true, 5_000).await.unwrap();
        let results = store.get_results("t2", JobFilter::default()).await.unwrap();
        let job = &results[0];
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.scheduled_at > Utc::now());
    }
}
