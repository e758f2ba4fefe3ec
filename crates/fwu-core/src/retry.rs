//! ---
//! fwu_section: "02-upgrade-orchestration"
//! fwu_subsection: "module"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Upgrade orchestration state machine and batch coordination."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::time::Duration;

use fwu_common::UpgradeConfig;
use rand::rngs::StdRng;
use rand::Rng;

/// Budget and pacing of whole-executor reruns after recoverable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Executor runs allowed, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failed run; doubles after every further failure.
    pub base_delay: Duration,
    /// Maximum random delay added on top of the backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter,
        }
    }

    pub fn from_config(config: &UpgradeConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_base_delay,
            config.retry_jitter,
        )
    }

    /// Retry `max_attempts` times without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after failed run `attempt` (1-indexed).
    pub fn backoff_delay(&self, attempt: u32, rng: &mut StdRng) -> Duration {
        let exponent = attempt.saturating_sub(1).min(8);
        let base = self.base_delay.saturating_mul(2u32.pow(exponent));
        if self.jitter.is_zero() {
            base
        } else {
            let jitter_ms = rng.gen_range(0..=self.jitter.as_millis().max(1)) as u64;
            base + Duration::from_millis(jitter_ms)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&UpgradeConfig::default())
    }
}
