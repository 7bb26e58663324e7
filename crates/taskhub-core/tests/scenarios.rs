//! Integration tests covering the end-to-end scenarios: happy path,
//! retry-then-succeed, terminal non-retryable failure, AIMD back-off
//! under rate limiting, and crash-and-resume via the in-memory store's
//! snapshot/restore pair.

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskhub_core::config::{AimdConfig, ConcurrencyConfig, CreateTaskOptions, RetryConfig};
use taskhub_core::error::JobError;
use taskhub_core::model::{JobFilter, TaskStatus};
use taskhub_core::source::{JobContext, Source, SourceData};
use taskhub_core::store::JobStore;
use taskhub_core::Hub;
use taskhub_store_memory::MemoryJobStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Item(i64);

struct AlwaysSucceeds;

#[async_trait]
impl Source for AlwaysSucceeds {
    type Input = Item;
    type Output = i64;

    async fn get_data(&self) -> SourceData<Self::Input> {
        SourceData::Deterministic(vec![Item(1), Item(2), Item(3)])
    }

    async fn handle(&self, input: Self::Input, _ctx: JobContext) -> Result<Self::Output, JobError> {
        Ok(input.0 * 2)
    }
}

#[tokio::test]
async fn happy_path_all_jobs_complete() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store).await.unwrap();
    let opts = CreateTaskOptions::new("happy-path").with_retry(RetryConfig {
        max_attempts: 1,
        base_delay_ms: 10,
        max_delay_ms: 100,
    });
    let handle = hub.create_task(opts, AlwaysSucceeds).await.unwrap();
    let status = handle.start().await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 3);
    assert_eq!(progress.failed, 0);
}

struct FailsOnceThenSucceeds {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Source for FailsOnceThenSucceeds {
    type Input = Item;
    type Output = i64;

    async fn get_data(&self) -> SourceData<Self::Input> {
        SourceData::Deterministic(vec![Item(1)])
    }

    async fn handle(&self, input: Self::Input, _ctx: JobContext) -> Result<Self::Output, JobError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Err(JobError::new("transient failure"))
        } else {
            Ok(input.0)
        }
    }
}

#[tokio::test]
async fn retry_then_succeed() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store).await.unwrap();
    let opts = CreateTaskOptions::new("retry-then-succeed").with_retry(RetryConfig {
        max_attempts: 3,
        base_delay_ms: 5,
        max_delay_ms: 50,
    });
    let source = FailsOnceThenSucceeds {
        attempts: Arc::new(AtomicU32::new(0)),
    };
    let handle = hub.create_task(opts, source).await.unwrap();
    let status = handle.start().await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.failed, 0);

    let results = handle.results(JobFilter::default()).await.unwrap();
    assert_eq!(results[0].attempts, 1);
}

struct AlwaysFails;

#[async_trait]
impl Source for AlwaysFails {
    type Input = Item;
    type Output = i64;

    async fn get_data(&self) -> SourceData<Self::Input> {
        SourceData::Deterministic(vec![Item(1)])
    }

    fn is_retryable(&self, _err: &JobError) -> bool {
        false
    }

    async fn handle(&self, _input: Self::Input, _ctx: JobContext) -> Result<Self::Output, JobError> {
        Err(JobError::new("permanent failure"))
    }
}

#[tokio::test]
async fn non_retryable_failure_is_terminal() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store).await.unwrap();
    let opts = CreateTaskOptions::new("non-retryable");
    let handle = hub.create_task(opts, AlwaysFails).await.unwrap();
    let status = handle.start().await.unwrap();
    assert_eq!(status, TaskStatus::Completed); // fail_task_on_any_job_failure defaults false

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.completed, 0);
}

struct RateLimitedThenFine {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Source for RateLimitedThenFine {
    type Input = Item;
    type Output = i64;

    async fn get_data(&self) -> SourceData<Self::Input> {
        SourceData::Deterministic((0..5).map(Item).collect())
    }

    async fn handle(&self, input: Self::Input, _ctx: JobContext) -> Result<Self::Output, JobError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Err(JobError::new("429 Too Many Requests"))
        } else {
            Ok(input.0)
        }
    }
}

#[tokio::test]
async fn rate_limit_triggers_concurrency_backoff() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store).await.unwrap();
    let opts = CreateTaskOptions::new("rate-limited")
        .with_concurrency(ConcurrencyConfig {
            min: 1,
            max: 8,
            initial: 4,
        })
        .with_retry(RetryConfig {
            max_attempts: 5,
            base_delay_ms: 5,
            max_delay_ms: 50,
        });
    let source = RateLimitedThenFine {
        calls: Arc::new(AtomicU32::new(0)),
    };
    let handle = hub.create_task(opts, source).await.unwrap();

    let mut events = handle.subscribe();
    let rate_limited_seen = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(taskhub_core::model::Event::RateLimited { .. }) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    });

    let status = handle.start().await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert!(rate_limited_seen.await.unwrap());
}

#[tokio::test]
async fn crash_and_resume_recovers_active_jobs() {
    use taskhub_core::model::{Job, SourceType, Task};

    let store = MemoryJobStore::new();
    let now = chrono::Utc::now();
    let task = Task {
        id: "crash-resume".into(),
        name: "crash-resume".into(),
        source_type: SourceType::Deterministic,
        merkle_root: Some(taskhub_core::merkle::merkle_root(&["a"])),
        status: TaskStatus::Running,
        total_jobs: 1,
        completed_jobs: 0,
        failed_jobs: 0,
        concurrency: ConcurrencyConfig::default(),
        retry: RetryConfig::default(),
        aimd: AimdConfig::default(),
        timeout_ms: None,
        created_at: now,
        updated_at: now,
    };
    let job = Job::new("a".into(), task.id.clone(), serde_json::json!(1));
    store.create_task(task.clone(), vec![job]).await.unwrap();

    // Simulate a process that claimed the job and then died before
    // completing it: it's left `active` with no further progress.
    let claimed = store.claim_jobs(&task.id, 10, now).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let snapshot = store.snapshot().await;
    let reopened = Arc::new(MemoryJobStore::from_snapshot(snapshot));
    assert_eq!(reopened.get_progress(&task.id).await.unwrap().active, 1);

    // Re-opening a Hub over the reopened store runs crash recovery,
    // resetting the orphaned active job back to pending.
    let hub = Hub::open(reopened.clone()).await.unwrap();
    let recovered = hub.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(recovered.total_jobs, 1);

    let progress = reopened.get_progress(&task.id).await.unwrap();
    assert_eq!(progress.active, 0);
    assert_eq!(progress.pending, 1);
}

struct SlowSource;

#[async_trait]
impl Source for SlowSource {
    type Input = Item;
    type Output = i64;

    async fn get_data(&self) -> SourceData<Self::Input> {
        SourceData::Deterministic(vec![Item(1), Item(2)])
    }

    async fn handle(&self, input: Self::Input, ctx: JobContext) -> Result<Self::Output, JobError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(300)) => Ok(input.0),
            _ = ctx.cancel_token.cancelled() => Err(JobError::cancelled()),
        }
    }
}

#[tokio::test]
async fn stop_then_restart_requeues_in_flight_jobs_without_consuming_attempts() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store.clone()).await.unwrap();
    let opts = CreateTaskOptions::new("stop-restart").with_concurrency(ConcurrencyConfig {
        min: 1,
        max: 2,
        initial: 2,
    });
    let handle = hub.create_task(opts, SlowSource).await.unwrap();

    // Give the scheduler a moment to claim and spawn both jobs.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await.unwrap();

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.active, 0);
    assert_eq!(progress.pending, 2);

    let results = handle.results(JobFilter::default()).await.unwrap();
    for job in &results {
        assert_eq!(job.attempts, 0);
    }
}

#[tokio::test]
async fn stop_then_resume_completes_remaining_jobs() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store.clone()).await.unwrap();
    let opts = CreateTaskOptions::new("stop-resume").with_concurrency(ConcurrencyConfig {
        min: 1,
        max: 2,
        initial: 2,
    });
    let handle = hub.create_task(opts, SlowSource).await.unwrap();

    // Give the scheduler a moment to claim and spawn both jobs, then stop
    // before they finish on their own.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await.unwrap();

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.active, 0);
    assert_eq!(progress.pending, 2);

    // A stopped scheduler's loop must still be alive to resume: this is
    // what broke when `stop()` returned instead of looping back to wait.
    handle.resume().await.unwrap();
    let status = handle.start().await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let results = handle.results(JobFilter::default()).await.unwrap();
    for job in &results {
        assert_eq!(job.attempts, 0);
    }
}

struct RecordsLastAttempt {
    calls: Arc<AtomicU32>,
    saw_last_attempt: Arc<AtomicBool>,
}

#[async_trait]
impl Source for RecordsLastAttempt {
    type Input = Item;
    type Output = i64;

    async fn get_data(&self) -> SourceData<Self::Input> {
        SourceData::Deterministic(vec![Item(1)])
    }

    async fn handle(&self, _input: Self::Input, ctx: JobContext) -> Result<Self::Output, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ctx.is_last_attempt() {
            self.saw_last_attempt.store(true, Ordering::SeqCst);
        }
        Err(JobError::new("always fails"))
    }
}

#[tokio::test]
async fn job_context_flags_final_retry_attempt() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store).await.unwrap();
    let opts = CreateTaskOptions::new("last-attempt").with_retry(RetryConfig {
        max_attempts: 2,
        base_delay_ms: 5,
        max_delay_ms: 20,
    });
    let saw_last_attempt = Arc::new(AtomicBool::new(false));
    let source = RecordsLastAttempt {
        calls: Arc::new(AtomicU32::new(0)),
        saw_last_attempt: saw_last_attempt.clone(),
    };
    let handle = hub.create_task(opts, source).await.unwrap();
    let status = handle.start().await.unwrap();
    assert_eq!(status, TaskStatus::Completed); // fail_task_on_any_job_failure defaults false

    let progress = handle.progress().await.unwrap();
    assert_eq!(progress.failed, 1);
    assert!(saw_last_attempt.load(Ordering::SeqCst));
}

struct KeyedDynamicSource;

#[async_trait]
impl Source for KeyedDynamicSource {
    type Input = Item;
    type Output = i64;

    fn id(&self) -> Option<&str> {
        Some("keyed-dynamic-task")
    }

    async fn get_data(&self) -> SourceData<Self::Input> {
        SourceData::Dynamic(futures::stream::iter(vec![Item(1), Item(2)]).boxed())
    }

    fn get_job_id(&self, input: &Self::Input) -> Option<String> {
        Some(format!("keyed-{}", input.0))
    }

    async fn handle(&self, input: Self::Input, _ctx: JobContext) -> Result<Self::Output, JobError> {
        Ok(input.0)
    }
}

#[tokio::test]
async fn dynamic_ingestion_uses_source_get_job_id() {
    let store = Arc::new(MemoryJobStore::new());
    let hub = Hub::open(store.clone()).await.unwrap();
    let handle = hub
        .create_task(CreateTaskOptions::new("keyed-dynamic"), KeyedDynamicSource)
        .await
        .unwrap();
    let task_id = handle.id().to_string();

    // Give the background ingestion spawn time to append both jobs.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ids = store.list_job_ids(&task_id).await.unwrap();
    ids.sort();
    // If ingestion fell back to hashing the raw input instead of calling
    // `get_job_id`, these wouldn't be the keyed ids below, and a later
    // `resume_task` call would never recognize them as already seen.
    assert_eq!(ids, vec!["keyed-1".to_string(), "keyed-2".to_string()]);
}
