//! TaskHub — a durable, embeddable job execution engine.
//!
//! One process hosts many [`model::Task`]s; each Task owns [`model::Job`]s
//! processed by a user [`source::Source`] under an AIMD-controlled
//! concurrency limit ([`controller::ConcurrencyController`]), with
//! exponential-backoff retry ([`retry`]) and crash-safe exactly-once
//! completion semantics, backed by a pluggable [`store::JobStore`].
//!
//! This crate ships the engine only. Storage backends live in
//! `taskhub-store-memory` and `taskhub-store-sql`.

pub mod config;
pub mod controller;
pub mod error;
pub mod handle;
pub mod hub;
pub mod merkle;
pub mod model;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;

pub use config::{AimdConfig, ConcurrencyConfig, CreateTaskOptions, RetryConfig, TaskHubConfig};
pub use error::{Error, JobError, Result, StoreError};
pub use handle::TaskHandle;
pub use hub::Hub;
pub use model::{Event, Job, JobFilter, JobStatus, Progress, SourceType, Task, TaskFilter, TaskStatus};
pub use source::{JobContext, Source, SourceData};
pub use store::JobStore;

/// Current version of the engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_available() {
        assert!(!VERSION.is_empty());
    }
}
