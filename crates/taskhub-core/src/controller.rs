//! AIMD concurrency controller.
//!
//! Plain struct with `&mut self` methods, no interior mutability — it's
//! touched only by the owning scheduler's loop.
//! `Debug + Clone` derives match a preference for small
//! inspectable state structs (`WorkerStats`, `QueueStats` in the
//! `jobs` module).

use crate::config::{AimdConfig, ConcurrencyConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConcurrencyController {
    min: u32,
    max: u32,
    current: u32,
    success_run: u32,
    additive_step: u32,
    multiplicative_factor: f64,
    success_threshold: u32,
}

impl ConcurrencyController {
    pub fn new(config: &ConcurrencyConfig, aimd: &AimdConfig) -> Self {
        Self {
            min: config.min,
            max: config.max,
            current: config.initial,
            success_run: 0,
            additive_step: aimd.additive_step,
            multiplicative_factor: aimd.multiplicative_factor,
            success_threshold: aimd.success_threshold,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Additive increase: after `success_threshold` consecutive successes,
    /// raise `current` by `additive_step`, bounded by `max`.
    pub fn on_success(&mut self) {
        self.success_run += 1;
        if self.success_run >= self.success_threshold {
            self.current = (self.current + self.additive_step).min(self.max);
            self.success_run = 0;
        }
    }

    /// Multiplicative decrease: halve `current` (floored at `min`) on a
    /// rate-limited failure, and reset the success run.
    pub fn on_rate_limited(&mut self) -> u32 {
        let scaled = (self.current as f64 * self.multiplicative_factor).floor() as u32;
        self.current = scaled.max(self.min);
        self.success_run = 0;
        self.current
    }

    /// A non-rate-limited failure doesn't change `current`, but it does
    /// interrupt the consecutive-success streak.
    pub fn on_non_rate_limited_failure(&mut self) {
        self.success_run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(min: u32, max: u32, initial: u32) -> ConcurrencyController {
        ConcurrencyController::new(
            &ConcurrencyConfig { min, max, initial },
            &AimdConfig::default(),
        )
    }

    #[test]
    fn ten_consecutive_successes_raise_current_by_one() {
        let mut c = controller(1, 20, 2);
        for _ in 0..9 {
            c.on_success();
            assert_eq!(c.current(), 2);
        }
        c.on_success();
        assert_eq!(c.current(), 3);
    }

    #[test]
    fn additive_increase_bounded_by_max() {
        let mut c = controller(1, 3, 3);
        for _ in 0..10 {
            c.on_success();
        }
        assert_eq!(c.current(), 3);
    }

    #[test]
    fn rate_limit_halves_and_floors_at_min() {
        let mut c = controller(1, 20, 8);
        assert_eq!(c.on_rate_limited(), 4);
        let mut low = controller(3, 20, 4);
        assert_eq!(low.on_rate_limited(), 3);
    }

    #[test]
    fn rate_limit_resets_success_run() {
        let mut c = controller(1, 20, 4);
        for _ in 0..5 {
            c.on_success();
        }
        c.on_rate_limited();
        for _ in 0..9 {
            c.on_success();
        }
        // success_run was reset to 0 by the rate limit, so 9 successes
        // are not yet enough to trigger another additive increase.
        assert_eq!(c.current(), 2);
    }

    #[test]
    fn non_rate_limited_failure_does_not_change_current() {
        let mut c = controller(1, 20, 5);
        c.on_non_rate_limited_failure();
        assert_eq!(c.current(), 5);
    }
}
