//! Configuration types for Tasks and the engine as a whole.
//!
//! Mirrors the `jobs::config` module: small `serde`-derived structs,
//! each with a `Default` impl and per-field `#[serde(default =...)]`
//! functions, rather than bare constants scattered through the scheduler.

use serde::{Deserialize, Serialize};

/// Concurrency bounds for a Task's AIMD controller.
///
/// `min <= initial <= max` is enforced by [`ConcurrencyConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_concurrency_min")]
    pub min: u32,
    #[serde(default = "default_concurrency_max")]
    pub max: u32,
    #[serde(default = "default_concurrency_initial")]
    pub initial: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            min: default_concurrency_min(),
            max: default_concurrency_max(),
            initial: default_concurrency_initial(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min < 1 {
            return Err("concurrency.min must be >= 1".into());
        }
        if self.max < self.min {
            return Err("concurrency.max must be >= concurrency.min".into());
        }
        if self.initial < self.min || self.initial > self.max {
            return Err("concurrency.initial must be within [min, max]".into());
        }
        Ok(())
    }
}

fn default_concurrency_min() -> u32 {
    1
}
fn default_concurrency_max() -> u32 {
    10
}
fn default_concurrency_initial() -> u32 {
    5
}

/// Retry / back-off configuration for a Task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("retry.max_attempts must be >= 1".into());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("retry.max_delay_ms must be >= retry.base_delay_ms".into());
        }
        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

/// AIMD tuning constants for the concurrency controller.
///
/// Whether to expose `successThreshold`/`multiplicativeFactor` at all
/// was left open; this crate exposes them via config rather than
/// hardcoding, matching a preference for `*Config` structs with sane
/// defaults over scattered constants (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AimdConfig {
    #[serde(default = "default_additive_step")]
    pub additive_step: u32,
    #[serde(default = "default_multiplicative_factor")]
    pub multiplicative_factor: f64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for AimdConfig {
    fn default() -> Self {
        Self {
            additive_step: default_additive_step(),
            multiplicative_factor: default_multiplicative_factor(),
            success_threshold: default_success_threshold(),
        }
    }
}

fn default_additive_step() -> u32 {
    1
}
fn default_multiplicative_factor() -> f64 {
    0.5
}
fn default_success_threshold() -> u32 {
    10
}

/// Options accepted by `Hub::create_task`.
#[derive(Debug, Clone)]
pub struct CreateTaskOptions {
    pub name: String,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub aimd: AimdConfig,
    pub timeout_ms: Option<u64>,
}

impl CreateTaskOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
            aimd: AimdConfig::default(),
            timeout_ms: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_aimd(mut self, aimd: AimdConfig) -> Self {
        self.aimd = aimd;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Process-wide policy knobs for a [`crate::hub::Hub`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskHubConfig {
    /// Whether a Task with any failed job should itself report
    /// `status = failed`. Defaults to `false`: per-job failures are
    /// non-fatal to the Task (see DESIGN.md).
    #[serde(default)]
    pub fail_task_on_any_job_failure: bool,

    /// Chunk size used when batching job inserts.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for TaskHubConfig {
    fn default() -> Self {
        Self {
            fail_task_on_any_job_failure: false,
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_defaults_are_sane() {
        let c = ConcurrencyConfig::default();
        assert_eq!((c.min, c.max, c.initial), (1, 10, 5));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn concurrency_rejects_out_of_range_initial() {
        let c = ConcurrencyConfig {
            min: 2,
            max: 4,
            initial: 10,
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn retry_defaults_are_sane() {
        let r = RetryConfig::default();
        assert_eq!((r.max_attempts, r.base_delay_ms, r.max_delay_ms), (3, 1_000, 30_000));
        assert!(r.validate().is_ok());
    }

    #[test]
    fn hub_config_default_is_lenient() {
        let cfg = TaskHubConfig::default();
        assert!(!cfg.fail_task_on_any_job_failure);
        assert_eq!(cfg.batch_size, 1000);
    }
}
