use crate::env::engine;
use crate::task::policy::FailureAction;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a retry policy does once its attempts are used up
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    /// Fail the composite with the child's error
    #[default]
    FailUpward,
    /// Treat the child as optional and release its dependents
    Skip,
}

/// Bounded retry with exponential backoff, expressed as data.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total runs allowed, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff: Duration,
    /// Factor applied to the delay on each further retry
    pub multiplier: f64,
    /// Upper bound of random delay added to each retry
    pub jitter: Duration,
    pub on_exhausted: ExhaustedAction,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: engine::DEFAULT_MAX_ATTEMPTS,
            backoff: engine::DEFAULT_BACKOFF,
            multiplier: 2.0,
            jitter: Duration::ZERO,
            on_exhausted: ExhaustedAction::FailUpward,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn skip_when_exhausted(mut self) -> Self {
        self.on_exhausted = ExhaustedAction::Skip;
        self
    }

    /// Whether another run is allowed after `attempts` runs
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the run following `attempts` runs, capped at
    /// [`engine::MAX_BACKOFF`]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16) as i32;
        let secs = self.backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let base = Duration::try_from_secs_f64(secs)
            .unwrap_or(engine::MAX_BACKOFF)
            .min(engine::MAX_BACKOFF);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = rand::rng().random_range(0..=self.jitter.as_millis() as u64);
        base.saturating_add(Duration::from_millis(jitter_ms))
    }

    /// Decide what to do with a child that has failed after `attempts` runs
    pub fn decide(&self, attempts: u32) -> FailureAction {
        if self.allows_retry(attempts) {
            FailureAction::Retry {
                delay: self.delay_for(attempts),
            }
        } else {
            match self.on_exhausted {
                ExhaustedAction::FailUpward => FailureAction::FailUpward,
                ExhaustedAction::Skip => FailureAction::Skip,
            }
        }
    }
}
