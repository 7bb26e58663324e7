//! `TaskHandle` — the external façade over one running Task.
//!
//! Event subscription is a `tokio::sync::broadcast::Sender<Event>` per
//! Task rather than a list of listener trait objects: a tagged channel
//! instead of a stringly-typed emitter, and `broadcast` gives
//! "listener error is swallowed, logged" for free — a slow or erroring
//! subscriber can only lag and drop messages, never block the publisher.

use crate::error::{Error, Result};
use crate::model::{Event, Job, JobFilter, Progress, Task, TaskId, TaskStatus};
use crate::scheduler::ControlSignal;
use crate::store::JobStore;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::warn;

pub struct TaskHandle {
    pub(crate) task_id: TaskId,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) control_tx: watch::Sender<ControlSignal>,
    pub(crate) status_rx: watch::Receiver<TaskStatus>,
    pub(crate) join: tokio::sync::Mutex<Option<JoinHandle<crate::Result<()>>>>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.task_id
    }

    pub async fn task(&self) -> Result<Task> {
        self.store
            .get_task(&self.task_id)
            .await
            .map_err(Error::from)?
            .ok_or_else(|| Error::TaskNotFound(self.task_id.clone()))
    }

    pub async fn status(&self) -> Result<TaskStatus> {
        Ok(self.task().await?.status)
    }

    /// Subscribe to every event for this Task (`on("*", ..)`'s Rust
    /// shape: a `Receiver` the caller filters with [`Event::kind`]).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Resolves once the Task reaches a terminal status (`completed` or
    /// `failed`).
    pub async fn start(&self) -> Result<TaskStatus> {
        let mut rx = self.status_rx.clone();
        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                return Ok(status);
            }
            if rx.changed().await.is_err() {
                // Scheduler task dropped its sender without reaching a
                // terminal status: surface as a fatal error, since store
                // errors are fatal to the scheduler loop.
                return Err(Error::Fatal {
                    task_id: self.task_id.clone(),
                    reason: "scheduler exited without a terminal status".into(),
                });
            }
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let _ = self.control_tx.send(ControlSignal::Paused);
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let _ = self.control_tx.send(ControlSignal::Running);
        Ok(())
    }

    /// Stops the scheduler loop: in-flight handlers are cancelled and
    /// re-queued as pending, then the Task is persisted as `paused`.
    /// Resolves once settling is done, not once the scheduler task exits —
    /// unlike `pause()`'s target state, `paused`-via-`stop()` is meant to
    /// be resumed later with [`TaskHandle::resume`], and the scheduler
    /// loop stays alive waiting for that.
    pub async fn stop(&self) -> Result<()> {
        let _ = self.control_tx.send(ControlSignal::Stopping);
        let mut rx = self.status_rx.clone();
        loop {
            if *rx.borrow() == TaskStatus::Paused {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                // The scheduler loop exited before settling into `paused`
                // (a store error during the settle phase); surface it.
                let mut guard = self.join.lock().await;
                if let Some(handle) = guard.take() {
                    match handle.await {
                        Ok(res) => res?,
                        Err(e) => {
                            warn!(error = %e, "scheduler task panicked during stop");
                        }
                    }
                }
                return Ok(());
            }
        }
    }

    /// Implicit `stop()` followed by deleting the Task from the store.
    pub async fn destroy(&self) -> Result<()> {
        self.stop().await?;
        self.store
            .delete_task(&self.task_id)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub async fn progress(&self) -> Result<Progress> {
        self.store
            .get_progress(&self.task_id)
            .await
            .map_err(Error::from)
    }

    pub async fn results(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.store
            .get_results(&self.task_id, filter)
            .await
            .map_err(Error::from)
    }
}
