// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff for operations that fail with transient errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use sealfleet_config::model::DistributionConfig;
use sealfleet_core::SealError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl From<&DistributionConfig> for RetryPolicy {
    fn from(config: &DistributionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based), before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if self.jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
        } else {
            base
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, runs out of
/// attempts, or `cancel` fires.
///
/// Only errors for which [`SealError::is_transient`] holds are retried.
/// Cancellation during a backoff sleep returns the last error.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, SealError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SealError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_transient() {
            debug!(op = label, attempt, error = %err, "permanent failure, not retrying");
            return Err(err);
        }
        if attempt >= policy.max_attempts {
            warn!(op = label, attempt, error = %err, "retries exhausted");
            return Err(err);
        }

        let delay = policy.delay(attempt - 1);
        debug!(
            op = label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient failure"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> SealError {
        SealError::DistributionError {
            host: "a".into(),
            message: "connection reset".into(),
            transient: true,
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(250));
        assert_eq!(p.backoff(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&policy(4), &CancellationToken::new(), "push", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(transient()) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_transient(&policy(3), &CancellationToken::new(), "push", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_transient(&policy(5), &CancellationToken::new(), "push", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SealError::AuthenticationFailed) }
            })
            .await;
        assert!(matches!(result, Err(SealError::AuthenticationFailed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(&policy(10), &cancel, "push", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
