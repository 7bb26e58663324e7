//! `Hub` — owns the single `JobStore` handle and the
//! registry of live `TaskHandle`s, running crash recovery before it
//! returns from `open`.
//!
//! Modeled on the pool-owning types (`repository::Database`,
//! `db::get_pool`) as "the thing that owns the shared backing resource",
//! generalized here to own an abstract store instead of a concrete
//! Postgres pool. The Task registry uses `dashmap`, the same way this
//! codebase uses it elsewhere for concurrent in-memory caches.

use crate::config::CreateTaskOptions;
use crate::error::{Error, Result};
use crate::model::{Job, SourceType, Task, TaskFilter, TaskId, TaskStatus};
use crate::scheduler::{self, ControlSignal, SchedulerChannels};
use crate::source::{Source, SourceData};
use crate::store::JobStore;
use crate::TaskHandle;
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct Hub {
    store: Arc<dyn JobStore>,
    tasks: DashMap<TaskId, Arc<TaskHandle>>,
    fail_task_on_any_job_failure: bool,
    batch_size: usize,
}

impl Hub {
    /// Opens the store and runs crash recovery: every non-completed Task
    /// has its `active` jobs reset to `pending` before any scheduler
    /// starts. Load-bearing for the exactly-once guarantee — a job left
    /// `active` across a crash would never be reclaimed otherwise.
    pub async fn open(store: Arc<dyn JobStore>) -> Result<Self> {
        Self::open_with_config(store, crate::config::TaskHubConfig::default()).await
    }

    pub async fn open_with_config(
        store: Arc<dyn JobStore>,
        config: crate::config::TaskHubConfig,
    ) -> Result<Self> {
        let hub = Self {
            store,
            tasks: DashMap::new(),
            fail_task_on_any_job_failure: config.fail_task_on_any_job_failure,
            batch_size: config.batch_size,
        };
        hub.recover().await?;
        Ok(hub)
    }

    async fn recover(&self) -> Result<()> {
        for task_id in crate::store::non_terminal_tasks(self.store.as_ref()).await? {
            let reset = self.store.reset_active_jobs(&task_id).await?;
            if reset > 0 {
                info!(task_id = %task_id, reset, "crash recovery: reset active jobs to pending");
            }
        }
        Ok(())
    }

    /// Ingests `source`'s data, persists a new Task, and starts its
    /// scheduler loop.
    pub async fn create_task<S: Source + 'static>(
        &self,
        opts: CreateTaskOptions,
        source: S,
    ) -> Result<Arc<TaskHandle>> {
        opts.concurrency
            .validate()
            .map_err(Error::config)?;
        opts.retry.validate().map_err(Error::config)?;

        let source = Arc::new(source);
        let task = ingest(&self.store, &opts, &source, self.batch_size).await?;
        self.spawn_handle(task, source)
    }

    /// Resumes a Task from a prior process's storage. The `Source` must
    /// produce the same job-id set; for deterministic Tasks the Merkle
    /// root is re-verified and a mismatch is a hard error. For dynamic
    /// Tasks, a mismatch resolves to the *union* of
    /// previously-seen and newly-produced jobs rather than replacing or
    /// erroring — replacing would silently discard history, which this
    /// engine's durability guarantees make the worse default (recorded
    /// in DESIGN.md).
    pub async fn resume_task<S: Source + 'static>(
        &self,
        task_id: &str,
        source: S,
    ) -> Result<Arc<TaskHandle>> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        let source = Arc::new(source);

        match task.source_type {
            SourceType::Deterministic => {
                let data = match source.get_data().await {
                    SourceData::Deterministic(items) => items,
                    SourceData::Dynamic(_) => {
                        return Err(Error::Config(
                            "resumeTask: source_type is deterministic but Source produced a dynamic stream".into(),
                        ))
                    }
                };
                let mut ids = Vec::with_capacity(data.len());
                for item in &data {
                    ids.push(
                        source
                            .get_job_id(item)
                            .unwrap_or_else(|| crate::merkle::hash_value(&serde_json::to_value(item).unwrap_or_default())),
                    );
                }
                let root = crate::merkle::merkle_root(&ids);
                if Some(&root) != task.merkle_root.as_ref() {
                    return Err(Error::MerkleMismatch {
                        task_id: task_id.to_string(),
                        expected: task.merkle_root.clone().unwrap_or_default(),
                        actual: root,
                    });
                }
            }
            SourceType::Dynamic => {
                if let SourceData::Dynamic(mut stream) = source.get_data().await {
                    let existing: std::collections::HashSet<String> =
                        self.store.list_job_ids(task_id).await?.into_iter().collect();
                    let mut fresh = Vec::new();
                    while let Some(item) = stream.next().await {
                        let id = source.get_job_id(&item).unwrap_or_else(|| {
                            crate::merkle::hash_value(&serde_json::to_value(&item).unwrap_or_default())
                        });
                        if !existing.contains(&id) {
                            let input = serde_json::to_value(&item).unwrap_or(serde_json::Value::Null);
                            fresh.push(Job::new(id, task_id.to_string(), input));
                        }
                    }
                    if !fresh.is_empty() {
                        info!(task_id, new_jobs = fresh.len(), "resumeTask: union added new jobs");
                        self.store.append_jobs(task_id, fresh).await?;
                    }
                }
            }
        }

        self.spawn_handle(task, source)
    }

    fn spawn_handle<S: Source + 'static>(
        &self,
        task: Task,
        source: Arc<S>,
    ) -> Result<Arc<TaskHandle>> {
        let task_id = task.id.clone();
        let (control_tx, control_rx) = watch::channel(ControlSignal::Running);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(task.status);

        let channels = SchedulerChannels {
            control_rx,
            events: events.clone(),
            status_tx,
        };

        let store = self.store.clone();
        let aimd = task.aimd;
        let fail_on_any = self.fail_task_on_any_job_failure;
        let join = tokio::spawn(scheduler::run(
            task_id.clone(),
            store,
            source,
            aimd,
            fail_on_any,
            channels,
        ));

        let handle = Arc::new(TaskHandle {
            task_id: task_id.clone(),
            store: self.store.clone(),
            events,
            control_tx,
            status_rx,
            join: tokio::sync::Mutex::new(Some(join)),
        });
        self.tasks.insert(task_id, handle.clone());
        Ok(handle)
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        Ok(self.store.list_tasks(filter).await?)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.store.get_task(task_id).await?)
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        if let Some((_, handle)) = self.tasks.remove(task_id) {
            handle.stop().await?;
        }
        self.store.delete_task(task_id).await?;
        Ok(())
    }

    pub async fn reset_failed_jobs(&self, task_id: &str) -> Result<u64> {
        Ok(self.store.reset_failed_jobs(task_id).await?)
    }

    pub fn handle(&self, task_id: &str) -> Option<Arc<TaskHandle>> {
        self.tasks.get(task_id).map(|h| h.clone())
    }

    /// Pauses every live scheduler and releases the registry. The store
    /// itself outlives `close()` — callers own its lifecycle.
    pub async fn close(&self) -> Result<()> {
        for entry in self.tasks.iter() {
            if let Err(e) = entry.value().pause().await {
                warn!(task_id = %entry.key(), error = %e, "error pausing task during close");
            }
        }
        self.tasks.clear();
        Ok(())
    }
}

/// Materializes a deterministic Source in full (computing its Merkle
/// root) or spawns a chunked ingestion task for a dynamic one,
/// respecting the back-pressure watermark `max(1000, 10 * concurrency.max)`.
async fn ingest<S: Source + 'static>(
    store: &Arc<dyn JobStore>,
    opts: &CreateTaskOptions,
    source: &Arc<S>,
    batch_size: usize,
) -> Result<Task> {
    let now = Utc::now();
    match source.get_data().await {
        SourceData::Deterministic(items) => {
            let mut job_ids = Vec::with_capacity(items.len());
            let mut jobs = Vec::with_capacity(items.len());
            for item in &items {
                let input = serde_json::to_value(item)?;
                let id = source
                    .get_job_id(item)
                    .unwrap_or_else(|| crate::merkle::hash_value(&input));
                job_ids.push(id.clone());
                jobs.push(Job::new(id, String::new(), input));
            }
            let merkle_root = crate::merkle::merkle_root(&job_ids);
            let task_id = deterministic_task_id(&opts.name, &merkle_root);
            for job in jobs.iter_mut() {
                job.task_id = task_id.clone();
            }

            let task = Task {
                id: task_id,
                name: opts.name.clone(),
                source_type: SourceType::Deterministic,
                merkle_root: Some(merkle_root),
                status: TaskStatus::Running,
                total_jobs: jobs.len() as u64,
                completed_jobs: 0,
                failed_jobs: 0,
                concurrency: opts.concurrency,
                retry: opts.retry,
                aimd: opts.aimd,
                timeout_ms: opts.timeout_ms,
                created_at: now,
                updated_at: now,
            };
            store.create_task(task.clone(), jobs).await?;
            Ok(task)
        }
        SourceData::Dynamic(mut stream) => {
            let task_id = source
                .id()
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let task = Task {
                id: task_id.clone(),
                name: opts.name.clone(),
                source_type: SourceType::Dynamic,
                merkle_root: None,
                status: TaskStatus::Running,
                total_jobs: 0,
                completed_jobs: 0,
                failed_jobs: 0,
                concurrency: opts.concurrency,
                retry: opts.retry,
                aimd: opts.aimd,
                timeout_ms: opts.timeout_ms,
                created_at: now,
                updated_at: now,
            };
            store.create_task(task.clone(), Vec::new()).await?;

            let store2 = store.clone();
            let source2 = source.clone();
            let id2 = task_id.clone();
            let watermark = (10 * opts.concurrency.max as u64).max(1000);
            tokio::spawn(async move {
                let mut buf = Vec::with_capacity(batch_size);
                while let Some(item) = stream.next().await {
                    loop {
                        match store2.get_progress(&id2).await {
                            Ok(p) if p.pending >= watermark => {
                                tokio::time::sleep(Duration::from_millis(200)).await;
                            }
                            _ => break,
                        }
                    }
                    let input = serde_json::to_value(&item).unwrap_or(serde_json::Value::Null);
                    let id = source2
                        .get_job_id(&item)
                        .unwrap_or_else(|| crate::merkle::hash_value(&input));
                    buf.push(Job::new(id, id2.clone(), input));
                    if buf.len() >= batch_size {
                        if let Err(e) = store2.append_jobs(&id2, std::mem::take(&mut buf)).await {
                            warn!(task_id = %id2, error = %e, "failed to append ingested jobs");
                        }
                    }
                }
                if !buf.is_empty() {
                    if let Err(e) = store2.append_jobs(&id2, buf).await {
                        warn!(task_id = %id2, error = %e, "failed to append final ingested chunk");
                    }
                }
                debug!(task_id = %id2, "dynamic source ingestion complete");
            });

            Ok(task)
        }
    }
}

fn deterministic_task_id(name: &str, merkle_root: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"::");
    hasher.update(merkle_root.as_bytes());
    hex::encode(hasher.finalize())
}
