//! Retry policy with exponential backoff
//!
//! Decides, on transport failure, whether the session restarts after a
//! bounded exponential delay or surfaces a terminal failure. Cancellation is
//! never retried regardless of how many attempts remain.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection resets, stream drops)
/// should return `true`. Permanent failures (bad configuration, malformed
/// protocol data, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors are generally retryable
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Stream-level failures are the canonical transient case
            Error::Transport(_) => true,
            // Malformed messages will be malformed again on replay
            Error::Protocol(_) => false,
            // Cancellation is caller-initiated, never retried
            Error::Cancelled => false,
            // Config errors are permanent
            Error::Config { .. } => false,
            // Serialization errors are permanent
            Error::Serialization(_) => false,
            // Already the terminal outcome of a retry loop
            Error::RetriesExhausted { .. } => false,
            // Unknown errors - be conservative and don't retry
            Error::Other(_) => false,
        }
    }
}

/// Outcome of consulting the retry policy after a failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Restart the session after waiting out the delay
    RetryAfter(Duration),
    /// Surface the failure as terminal
    GiveUp,
}

/// Bounded exponential backoff policy
///
/// `delay = initial_delay * multiplier^attempt`, capped at `max_delay`, for
/// at most `max_attempts` retries. `attempt` is zero-based: the first retry
/// waits exactly `initial_delay`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Decide whether to retry after `cause` failed attempt number `attempt`
    /// (zero-based count of retries already performed).
    pub fn evaluate(&self, attempt: u32, cause: &Error) -> RetryDecision {
        if cause.is_cancellation() {
            return RetryDecision::GiveUp;
        }

        if !cause.is_retryable() {
            tracing::debug!(error = %cause, "non-retryable failure, giving up");
            return RetryDecision::GiveUp;
        }

        if attempt >= self.config.max_attempts {
            tracing::error!(
                error = %cause,
                attempts = attempt,
                "retry attempts exhausted"
            );
            return RetryDecision::GiveUp;
        }

        let delay = self.delay_for(attempt);
        tracing::warn!(
            error = %cause,
            attempt = attempt + 1,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis(),
            "transport failure, scheduling retry"
        );
        RetryDecision::RetryAfter(delay)
    }

    /// Backoff delay for a zero-based attempt number, capped at `max_delay`
    /// and jittered if configured.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.config.backoff_multiplier.powi(attempt as i32);
        let raw = Duration::from_secs_f64(self.config.initial_delay.as_secs_f64() * factor);
        let capped = raw.min(self.config.max_delay);
        if self.config.jitter {
            add_jitter(capped)
        } else {
            capped
        }
    }

    /// Maximum number of retries before exhaustion
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay falls between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
