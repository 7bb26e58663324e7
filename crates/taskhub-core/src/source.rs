//! `Source` contract — the engine's only extension point for
//! where work comes from and how it is executed.
//!
//! Generalizes the `jobs::mod::JobHandler`/`JobContext` pair
//! (a trait with a `handle` method plus a small context struct) from a
//! single-queue worker into a per-Task data source with optional
//! capability hooks. A trait with default-provided methods for the
//! optional hooks (`get_job_id`, `is_retryable`, `is_rate_limited`) is
//! preferred here over `Option<Box<dyn Fn>>` fields; see DESIGN.md.

use crate::error::JobError;
use crate::merkle::hash_value;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

/// Context handed to `Source::handle` for a single Job execution.
pub struct JobContext {
    pub job_id: String,
    /// 1-indexed attempt number for this invocation.
    pub attempts: u32,
    /// The Task's configured `retry.max_attempts`, for [`JobContext::is_last_attempt`].
    pub max_attempts: u32,
    pub cancel_token: CancellationToken,
}

impl JobContext {
    /// Whether this invocation is the last one the retry policy allows.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// The two ingestion shapes a `Source` can produce, modeled as a sum
/// type rather than a boolean flag.
pub enum SourceData<I> {
    /// Finite, fully enumerable up front — enables Merkle fingerprinting.
    Deterministic(Vec<I>),
    /// Lazily produced, possibly unbounded.
    Dynamic(BoxStream<'static, I>),
}

/// A data source plus the handler that processes each item it produces.
#[async_trait]
pub trait Source: Send + Sync {
    type Input: Serialize + DeserializeOwned + Send + Sync + Clone + 'static;
    type Output: Serialize + Send + 'static;

    /// Required for dynamic sources (used to derive a stable Task id);
    /// ignored for deterministic sources, whose Task id is derived from
    /// name + Merkle root instead.
    fn id(&self) -> Option<&str> {
        None
    }

    async fn get_data(&self) -> SourceData<Self::Input>;

    /// Job-id derivation. Default: `hash(serialize(input))`.
    fn get_job_id(&self, input: &Self::Input) -> Option<String> {
        let value = serde_json::to_value(input).ok()?;
        Some(hash_value(&value))
    }

    /// Default: optimistic — unknown errors are assumed retryable.
    fn is_retryable(&self, _err: &JobError) -> bool {
        true
    }

    /// Default: detect HTTP-429-like errors by substring.
    fn is_rate_limited(&self, err: &JobError) -> bool {
        let msg = err.message.to_lowercase();
        msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests")
    }

    async fn handle(&self, input: Self::Input, ctx: JobContext) -> Result<Self::Output, JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    #[async_trait]
    impl Source for Doubler {
        type Input = i64;
        type Output = i64;

        async fn get_data(&self) -> SourceData<Self::Input> {
            SourceData::Deterministic(vec![1, 2, 3])
        }

        async fn handle(&self, input: Self::Input, _ctx: JobContext) -> Result<Self::Output, JobError> {
            Ok(input * 2)
        }
    }

    #[test]
    fn default_job_id_is_stable_hash_of_input() {
        let source = Doubler;
        let a = source.get_job_id(&5).unwrap();
        let b = source.get_job_id(&5).unwrap();
        let c = source.get_job_id(&6).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn default_rate_limit_detection_matches_429_substring() {
        let source = Doubler;
        assert!(source.is_rate_limited(&JobError::new("HTTP 429 Too Many Requests")));
        assert!(!source.is_rate_limited(&JobError::new("connection reset")));
    }
}
