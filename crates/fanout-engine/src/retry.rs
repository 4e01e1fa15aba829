//! Backoff computation and retry decisions.
//!
//! Implements the engine's retry semantics for failed delivery attempts:
//! whether to retry at all, and how long to wait. Timers themselves live
//! in the scheduler's delay heap; this module is pure calculation.

use chrono::{DateTime, Utc};
use fanout_core::models::{BackoffStrategy, RetryPolicy};
use std::time::Duration;

use crate::error::DeliveryError;

/// Context for deciding the fate of a failed delivery attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Completed attempts so far, including the one that just failed.
    pub attempts: u32,
    /// The endpoint's retry cap (retries after the initial attempt).
    pub max_retries: u32,
    /// Error that caused the failure.
    pub error: DeliveryError,
    /// When the attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Retry policy to apply.
    pub policy: RetryPolicy,
}

/// Result of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Arm a timer and re-queue the delivery when it fires.
    Retry {
        /// When the next attempt becomes eligible.
        next_attempt_at: DateTime<Utc>,
    },
    /// Do not retry; the delivery is permanently failed.
    GiveUp {
        /// Why no further attempts will be made.
        reason: String,
    },
}

impl RetryContext {
    /// Creates a retry context for a failed attempt.
    pub fn new(
        attempts: u32,
        max_retries: u32,
        error: DeliveryError,
        failed_at: DateTime<Utc>,
        policy: RetryPolicy,
    ) -> Self {
        Self { attempts, max_retries, error, failed_at, policy }
    }

    /// Total attempts allowed, including the initial one.
    ///
    /// The policy's `max_attempts` wins when set; otherwise the endpoint's
    /// `max_retries` plus the initial attempt. At least one attempt always
    /// occurs, even with `max_retries = 0`.
    pub fn effective_max_attempts(&self) -> u32 {
        self.policy
            .max_attempts
            .unwrap_or_else(|| self.max_retries.saturating_add(1))
            .max(1)
    }

    /// Decides whether and when to retry.
    pub fn decide(&self) -> RetryDecision {
        let max_attempts = self.effective_max_attempts();
        if self.attempts >= max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({max_attempts}) exhausted"),
            };
        }

        if !self.error.is_retryable(&self.policy) {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        // The first retry after the initial attempt uses attempt index 0.
        let delay = compute_delay(&self.policy, self.attempts.saturating_sub(1));
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp { reason: "retry delay out of range".to_string() };
        };

        RetryDecision::Retry { next_attempt_at: self.failed_at + chrono_delay }
    }
}

/// Computes the backoff delay for a 0-indexed retry attempt.
///
/// Exponential: `base * 2^attempt`; linear: `base * (attempt + 1)`;
/// fixed: `base`. The result is clamped to the policy's `max_delay` when
/// one is set.
pub fn compute_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let raw = match policy.strategy {
        BackoffStrategy::Exponential => {
            let multiplier = 2_u32.saturating_pow(attempt.min(20));
            policy.base_delay.checked_mul(multiplier).unwrap_or(Duration::MAX)
        },
        BackoffStrategy::Linear => {
            policy.base_delay.checked_mul(attempt.saturating_add(1)).unwrap_or(Duration::MAX)
        },
        BackoffStrategy::Fixed => policy.base_delay,
    };

    match policy.max_delay {
        Some(max) => raw.min(max),
        None => raw,
    }
}
