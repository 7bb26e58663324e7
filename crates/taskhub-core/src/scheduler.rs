//! `JobScheduler` — the heart of the engine.
//!
//! Generalizes the `jobs::worker::Worker::run` loop
//! (`while running { dequeue -> process_job -> update counters }`) from a
//! single Redis dequeue into a claim/spawn/settle loop over the
//! `JobStore` trait, with an AIMD controller and cooperative cancellation
//! layered on top. `handle_job_failure`'s retry-vs-dead-letter branching
//! is the direct ancestor of `handle_outcome`'s retry-vs-terminal
//! branching below.

use crate::config::{AimdConfig, RetryConfig};
use crate::controller::ConcurrencyController;
use crate::error::{Error, JobError, StoreError};
use crate::model::{Event, Job, TaskStatus};
use crate::source::{JobContext, Source};
use crate::store::JobStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded poll interval used both to notice newly-due `scheduled_at`
/// jobs and to retry a claim after slots free up. `jobs::scheduler::process_due_jobs`
/// polls on a fixed tick the same way, rather than computing an exact wake time.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlSignal {
    Running,
    Paused,
    Stopping,
}

enum JobOutcome {
    Success {
        job: Job,
        output: serde_json::Value,
    },
    Failure {
        job: Job,
        error: JobError,
        cancelled: bool,
    },
}

/// Everything the scheduler loop needs that doesn't come from the Task
/// row itself.
pub(crate) struct SchedulerChannels {
    pub control_rx: watch::Receiver<ControlSignal>,
    pub events: broadcast::Sender<Event>,
    pub status_tx: watch::Sender<TaskStatus>,
}

pub(crate) async fn run<S: Source + 'static>(
    task_id: String,
    store: Arc<dyn JobStore>,
    source: Arc<S>,
    aimd: AimdConfig,
    fail_task_on_any_job_failure: bool,
    mut channels: SchedulerChannels,
) -> crate::Result<()> {
    let task = store
        .get_task(&task_id)
        .await?
        .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?;

    let mut controller = ConcurrencyController::new(&task.concurrency, &aimd);
    let retry_cfg = task.retry;
    let timeout = task.timeout_ms.map(Duration::from_millis);

    let mut cancel_token = CancellationToken::new();
    let mut active: JoinSet<JobOutcome> = JoinSet::new();
    let mut active_count: u32 = 0;

    info!(task_id = %task_id, "scheduler started");

    loop {
        let signal = *channels.control_rx.borrow();
        match signal {
            ControlSignal::Stopping => {
                info!("stopping: cancelling in-flight handlers");
                cancel_token.cancel();
                while active_count > 0 {
                    if let Some(res) = active.join_next().await {
                        active_count -= 1;
                        if let Ok(outcome) = res {
                            if let Err(e) = handle_outcome(
                                &store,
                                &source,
                                &task_id,
                                &retry_cfg,
                                &mut controller,
                                &channels.events,
                                outcome,
                            )
                                .await
                            {
                                warn!(error = %e, "store error while settling cancelled job");
                            }
                        }
                    } else {
                        break;
                    }
                }
                store
                    .set_task_status(&task_id, TaskStatus::Paused)
                    .await?;
                let _ = channels.status_tx.send(TaskStatus::Paused);
                let _ = channels.events.send(Event::TaskStatus {
                    task_id: task_id.clone(),
                    status: TaskStatus::Paused,
                });
                // A cancelled token stays cancelled; a later `resume()` needs
                // a fresh one so jobs claimed after it aren't born already
                // cancelled.
                cancel_token = CancellationToken::new();
                let _ = channels.control_rx.changed().await;
                continue;
            }
            ControlSignal::Paused => {
                let _ = channels.control_rx.changed().await;
                continue;
            }
            ControlSignal::Running => {}
        }

        let desired = controller.current();
        let slots = desired.saturating_sub(active_count);
        let mut claimed_now = 0u32;

        if slots > 0 {
            let now = Utc::now();
            let claimed = store.claim_jobs(&task_id, slots, now).await?;
            claimed_now = claimed.len() as u32;
            for job in claimed {
                let _ = channels.events.send(Event::JobStart {
                    task_id: task_id.clone(),
                    job_id: job.id.clone(),
                });
                let child_token = cancel_token.child_token();
                active.spawn(run_job(source.clone(), job, child_token, timeout, retry_cfg));
                active_count += 1;
            }
            debug!(claimed = claimed_now, active = active_count, "claimed jobs");
        }

        if active_count == 0 && claimed_now == 0 {
            let progress = store.get_progress(&task_id).await?;
            if progress.pending == 0 && progress.active == 0 {
                let status = if fail_task_on_any_job_failure && progress.failed > 0 {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Completed
                };
                store.set_task_status(&task_id, status).await?;
                let _ = channels.status_tx.send(status);
                let _ = channels.events.send(Event::TaskStatus {
                    task_id: task_id.clone(),
                    status,
                });
                info!(task_id = %task_id, ?status, "task terminal");
                return Ok(());
            }
            // Jobs remain, but none are claimable yet (future scheduled_at).
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = channels.control_rx.changed() => {}
            }
            continue;
        }

        tokio::select! {
            Some(res) = active.join_next(), if active_count > 0 => {
                active_count -= 1;
                match res {
                    Ok(outcome) => {
                        handle_outcome(&store, &source, &task_id, &retry_cfg, &mut controller, &channels.events, outcome).await?;
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "handler task panicked");
                    }
                }
            }
            _ = channels.control_rx.changed() => {}
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

async fn run_job<S: Source>(
    source: Arc<S>,
    job: Job,
    cancel_token: CancellationToken,
    timeout: Option<Duration>,
    retry_cfg: RetryConfig,
) -> JobOutcome {
    let attempt = job.attempts + 1;
    let input: S::Input = match serde_json::from_value(job.input.clone()) {
        Ok(v) => v,
        Err(e) => {
            return JobOutcome::Failure {
                job,
                error: JobError::new(format!("failed to deserialize job input: {e}")),
                cancelled: false,
            }
        }
    };

    let ctx = JobContext {
        job_id: job.id.clone(),
        attempts: attempt,
        max_attempts: retry_cfg.max_attempts,
        cancel_token: cancel_token.clone(),
    };

    let result = match timeout {
        Some(d) => {
            tokio::select! {
                res = source.handle(input, ctx) => res,
                _ = tokio::time::sleep(d) => Err(JobError::timeout(d.as_millis() as u64)),
                _ = cancel_token.cancelled() => Err(JobError::cancelled()),
            }
        }
        None => {
            tokio::select! {
                res = source.handle(input, ctx) => res,
                _ = cancel_token.cancelled() => Err(JobError::cancelled()),
            }
        }
    };

    match result {
        Ok(output) => {
            let output_json = serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);
            JobOutcome::Success { job, output: output_json }
        }
        Err(error) => {
            let cancelled = cancel_token.is_cancelled();
            JobOutcome::Failure { job, error, cancelled }
        }
    }
}

async fn handle_outcome<S: Source>(
    store: &Arc<dyn JobStore>,
    source: &Arc<S>,
    task_id: &str,
    retry_cfg: &RetryConfig,
    controller: &mut ConcurrencyController,
    events: &broadcast::Sender<Event>,
    outcome: JobOutcome,
) -> Result<(), StoreError> {
    match outcome {
        JobOutcome::Success { job, output } => {
            store.complete_job(task_id, &job.id, output.clone()).await?;
            let _ = events.send(Event::JobComplete {
                task_id: task_id.to_string(),
                job_id: job.id.clone(),
                output,
            });
            controller.on_success();
        }
        JobOutcome::Failure {
            job,
            error,
            cancelled,
        } => {
            if cancelled {
                // Scheduler-induced cancellation: return to pending without
                // consuming a retry attempt, no event.
                store.requeue_cancelled(task_id, &job.id).await?;
            } else {
                let retryable = source.is_retryable(&error);
                let rate_limited = source.is_rate_limited(&error);
                if rate_limited {
                    let new_current = controller.on_rate_limited();
                    let _ = events.send(Event::RateLimited {
                        task_id: task_id.to_string(),
                        concurrency: new_current,
                    });
                }

                let attempts_after = job.attempts + 1;
                let will_retry = crate::retry::should_retry(retryable, attempts_after, retry_cfg);
                let delay = if will_retry {
                    crate::retry::next_delay_ms(attempts_after, retry_cfg.base_delay_ms, retry_cfg.max_delay_ms)
                } else {
                    0
                };

                store
                    .fail_job(task_id, &job.id, &error.message, will_retry, delay)
                    .await?;

                if will_retry {
                    let _ = events.send(Event::JobRetry {
                        task_id: task_id.to_string(),
                        job_id: job.id.clone(),
                        attempt: attempts_after,
                        delay_ms: delay,
                    });
                } else {
                    let _ = events.send(Event::JobFailed {
                        task_id: task_id.to_string(),
                        job_id: job.id.clone(),
                        error: error.message.clone(),
                    });
                    controller.on_non_rate_limited_failure();
                }
            }
        }
    }

    let progress = store.get_progress(task_id).await?;
    let _ = events.send(Event::Progress {
        task_id: task_id.to_string(),
        progress,
        concurrency: controller.current(),
    });
    Ok(())
}
