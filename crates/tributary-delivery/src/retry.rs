//! Attempt classification and backoff for batch delivery.
//!
//! Each send attempt is classified into success, retryable failure, or fatal
//! failure. Retryable failures are retried up to `max_retries` times with a
//! linear backoff: with a 2s unit the sleeps are 2s, 4s, ... Fatal failures
//! end the batch at once.

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::Result, transport::TransportResponse};

/// Retry policy applied to every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Backoff unit; the delay before retry `n` is `n × base_delay`.
    pub base_delay: Duration,

    /// HTTP statuses that indicate a transient collector failure.
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            retryable_statuses: BTreeSet::from([500, 503]),
        }
    }
}

/// Classified outcome of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// The collector answered with a non-retryable status.
    Success {
        /// HTTP status returned by the collector
        status_code: u16,
    },
    /// Transient failure; the batch may be re-sent.
    RetryableFailure {
        /// Human-readable failure description
        reason: String,
        /// HTTP status, absent for timeouts
        status_code: Option<u16>,
    },
    /// The attempt loop must stop without retrying.
    FatalFailure {
        /// Human-readable failure description
        reason: String,
    },
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then send the batch again.
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Do not retry; the batch is exhausted.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryPolicy {
    /// Total attempts a batch may receive, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether `status_code` is in the retryable set.
    pub fn is_retryable_status(&self, status_code: u16) -> bool {
        self.retryable_statuses.contains(&status_code)
    }

    /// Classifies the outcome of one send attempt.
    ///
    /// Any status outside the retryable set counts as success, including
    /// 4xx responses: the collector received the batch and re-sending it
    /// would not change the answer.
    pub fn classify(&self, outcome: &Result<TransportResponse>) -> AttemptResult {
        match outcome {
            Ok(response) if self.is_retryable_status(response.status_code) => {
                AttemptResult::RetryableFailure {
                    reason: format!("collector returned HTTP {}", response.status_code),
                    status_code: Some(response.status_code),
                }
            },
            Ok(response) => AttemptResult::Success { status_code: response.status_code },
            Err(error) if error.is_retryable() => {
                AttemptResult::RetryableFailure { reason: error.to_string(), status_code: None }
            },
            Err(error) => AttemptResult::FatalFailure { reason: error.to_string() },
        }
    }

    /// Decides what to do after the `retry_count`-th retryable failure.
    ///
    /// `retry_count` is 1 after the first failed attempt.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count > self.max_retries {
            return RetryDecision::GiveUp {
                reason: format!("maximum retries ({}) exceeded", self.max_retries),
            };
        }

        RetryDecision::Retry { delay: self.backoff_delay(retry_count) }
    }

    /// Backoff before retry number `retry_count` (1-based).
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count.max(1))
    }
}
