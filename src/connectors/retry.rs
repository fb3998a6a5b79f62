//! Retry policy for connector fetches: exponential backoff with jitter and
//! a capped attempt count. The policy is an explicit value passed into the
//! connector so tests can inject a zero-delay variant.

use std::time::Duration;

use rand::Rng;

use crate::common::error::PipelineError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Backoff is capped here.
    pub max_delay: Duration,
    /// Uniform random jitter added on top of the backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Transient failures worth another attempt: transport errors, timeouts and
/// 408/429/5xx responses. Other statuses are terminal, and schema drift is
/// never retried (re-fetching the same shape cannot fix it).
pub fn is_retryable(err: &PipelineError) -> bool {
    match err {
        PipelineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        PipelineError::HttpStatus { status, .. } => {
            *status == 408 || *status == 429 || (500..600).contains(status)
        }
        _ => false,
    }
}
