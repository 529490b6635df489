//! Retry scheduling for failed delivery attempts.
//!
//! A subscription either retries on a fixed interval or, when it has none,
//! walks an escalating backoff table whose last entry repeats. Delays are
//! deterministic: the same attempt count always produces the same schedule.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookrelay_core::Subscription;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_BACKOFF_TABLE_SECS;

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed(Duration),
    /// Delay for retry `n` is `table[min(n - 1, len - 1)]`.
    Table(Vec<Duration>),
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Table(default_backoff_table())
    }
}

/// Retry policy of a single subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts allowed after the first.
    pub retry_limit: u32,

    /// Strategy for calculating backoff delays.
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: hookrelay_core::models::DEFAULT_RETRY_LIMIT.unsigned_abs(),
            backoff: BackoffStrategy::default(),
        }
    }
}

/// Result of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the delivery at the specified time.
    Retry {
        /// When the next delivery attempt should be made
        next_attempt_at: DateTime<Utc>,
    },
    /// Do not retry - delivery permanently failed.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryPolicy {
    /// Builds the policy configured on `subscription`.
    ///
    /// A fixed `retry_interval_secs` wins; otherwise `table` is used.
    pub fn for_subscription(subscription: &Subscription, table: &[Duration]) -> Self {
        let retry_limit = u32::try_from(subscription.retry_limit).unwrap_or(0);
        let backoff = match subscription.retry_interval_secs {
            Some(secs) => {
                BackoffStrategy::Fixed(Duration::from_secs(u64::from(secs.unsigned_abs())))
            },
            None => BackoffStrategy::Table(table.to_vec()),
        };

        Self { retry_limit, backoff }
    }

    /// Decides what happens after the failed attempt number `attempts`.
    ///
    /// `attempts` is the count after the failed attempt was recorded, so the
    /// first attempt is 1. Delivery gives up once `attempts` exceeds the
    /// retry limit, i.e. after `retry_limit + 1` attempts in total.
    pub fn decide(&self, attempts: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if attempts > self.retry_limit {
            return RetryDecision::GiveUp {
                reason: format!(
                    "retry limit ({}) exhausted after {attempts} attempts",
                    self.retry_limit
                ),
            };
        }

        let delay = self.delay_for(attempts);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { next_attempt_at: failed_at + chrono_delay }
    }

    /// Delay before the retry that follows attempt number `attempts`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match &self.backoff {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Table(table) => {
                let last = table.len().saturating_sub(1);
                let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);
                table
                    .get(index.min(last))
                    .copied()
                    .unwrap_or(Duration::from_secs(DEFAULT_BACKOFF_TABLE_SECS[0]))
            },
        }
    }
}

/// The built-in escalating backoff table.
pub fn default_backoff_table() -> Vec<Duration> {
    DEFAULT_BACKOFF_TABLE_SECS.iter().copied().map(Duration::from_secs).collect()
}
