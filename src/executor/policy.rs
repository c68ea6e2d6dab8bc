//! Declared execution limits for each task kind: soft/hard time limits and the
//! retry budget. Nothing here is an ambient default of the substrate; every
//! submission carries its policy explicitly.

use anyhow::{bail, Result};
use std::time::Duration;

const PROBE_SOFT_TIMEOUT_SECS: u64 = 400;
const PROBE_HARD_TIMEOUT_SECS: u64 = 420;
const PROCESS_SOFT_TIMEOUT_SECS: u64 = 54;
const PROCESS_HARD_TIMEOUT_SECS: u64 = 60;
const APPLY_SOFT_TIMEOUT_SECS: u64 = 110;
const APPLY_HARD_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt; failures are terminal.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub const fn attempts(max_attempts: usize, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be below initial_backoff");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPolicy {
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
    pub retry: RetryPolicy,
}

impl TaskPolicy {
    pub fn new(soft_timeout: Duration, hard_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            soft_timeout,
            hard_timeout,
            retry,
        }
    }

    /// Network-bound lookups; timeouts are terminal, so no retries.
    pub fn probe_default() -> Self {
        Self::new(
            Duration::from_secs(PROBE_SOFT_TIMEOUT_SECS),
            Duration::from_secs(PROBE_HARD_TIMEOUT_SECS),
            RetryPolicy::none(),
        )
    }

    pub fn process_default() -> Self {
        Self::new(
            Duration::from_secs(PROCESS_SOFT_TIMEOUT_SECS),
            Duration::from_secs(PROCESS_HARD_TIMEOUT_SECS),
            RetryPolicy::attempts(2, Duration::from_secs(1), Duration::from_secs(5)),
        )
    }

    pub fn apply_default() -> Self {
        Self::new(
            Duration::from_secs(APPLY_SOFT_TIMEOUT_SECS),
            Duration::from_secs(APPLY_HARD_TIMEOUT_SECS),
            RetryPolicy::attempts(3, Duration::from_millis(500), Duration::from_secs(5)),
        )
    }

    pub fn validate(&self, label: &str) -> Result<()> {
        if self.soft_timeout.is_zero() {
            bail!("{label} soft_timeout must be greater than 0");
        }
        if self.hard_timeout <= self.soft_timeout {
            bail!("{label} hard_timeout must be greater than soft_timeout");
        }
        if let Err(err) = self.retry.validate() {
            bail!("{label} retry policy invalid: {err}");
        }
        Ok(())
    }
}
