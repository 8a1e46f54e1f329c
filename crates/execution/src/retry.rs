//! Bounded retry and timeout helpers.
//!
//! Every externally observed operation goes through these helpers. Reads are
//! retried on transient failures; writes are retried only while the ledger
//! proves they were never submitted. Delays grow linearly with the attempt
//! number.

use crate::error::KeeperError;
use clmm_keeper_protocols::prelude::{
    LedgerError, LedgerWriter, PendingSubmission, SubmissionReceipt,
};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy: total attempts and the base of the linear delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before retry `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay applied after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Runs `op` until it succeeds or the policy is exhausted.
///
/// The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_if(policy, operation, |_| true, op).await
}

/// Like [`with_retry`], but only errors accepted by `should_retry` are retried.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Races `fut` against a timer.
///
/// When the timer wins the result is [`KeeperError::Timeout`]: the underlying
/// operation may still complete on the ledger.
pub async fn with_timeout<T, Fut>(
    limit: Duration,
    operation: &str,
    fut: Fut,
) -> Result<T, KeeperError>
where
    Fut: Future<Output = Result<T, KeeperError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(KeeperError::Timeout {
            operation: operation.to_string(),
            limit,
        }),
    }
}

/// Retry and timeout discipline shared by every ledger call of the keeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Harness {
    pub retry: RetryPolicy,
    /// Upper bound on waiting for one submission to settle.
    pub settlement_timeout: Duration,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            settlement_timeout: Duration::from_secs(90),
        }
    }
}

impl Harness {
    pub fn new(retry: RetryPolicy, settlement_timeout: Duration) -> Self {
        Self {
            retry,
            settlement_timeout,
        }
    }

    /// Idempotent read, retried on transient failures.
    pub async fn read<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, KeeperError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        with_retry_if(&self.retry, operation, LedgerError::is_transient, op)
            .await
            .map_err(KeeperError::from)
    }

    /// Mutating submission, retried only while it provably never reached the
    /// ledger.
    pub async fn submit<F, Fut>(
        &self,
        operation: &str,
        op: F,
    ) -> Result<PendingSubmission, KeeperError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PendingSubmission, LedgerError>>,
    {
        with_retry_if(&self.retry, operation, LedgerError::is_not_submitted, op)
            .await
            .map_err(KeeperError::from)
    }

    /// Waits for settlement within the settlement timeout.
    pub async fn settle(
        &self,
        operation: &str,
        writer: &dyn LedgerWriter,
        pending: &PendingSubmission,
    ) -> Result<SubmissionReceipt, KeeperError> {
        with_timeout(self.settlement_timeout, operation, async {
            with_retry_if(&self.retry, operation, LedgerError::is_transient, || {
                writer.await_settlement(pending)
            })
            .await
            .map_err(KeeperError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<u32, String> = with_retry(&policy(3), "flaky", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(format!("failure {n}")) } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Linear delays: 100ms after the first failure, 200ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_propagates_last_error_unchanged() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = with_retry(&policy(2), "always fails", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("failure {n}"))
        })
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_if_stops_on_rejected_predicate() {
        let calls = AtomicU32::new(0);

        let result: Result<(), LedgerError> = with_retry_if(
            &policy(5),
            "submit",
            LedgerError::is_not_submitted,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::Rpc("connection reset".into()))
            },
        )
        .await;

        assert!(matches!(result, Err(LedgerError::Rpc(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = with_retry(&policy(0), "once", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope".to_string())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_unknown_outcome() {
        let result: Result<(), KeeperError> =
            with_timeout(Duration::from_secs(1), "settle mint", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        match result {
            Err(KeeperError::Timeout { operation, limit }) => {
                assert_eq!(operation, "settle mint");
                assert_eq!(limit, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_harness_read_does_not_retry_not_found() {
        let harness = Harness::new(policy(3), Duration::from_secs(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), KeeperError> = harness
            .read("read position", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LedgerError::NotFound("position".into()))
            })
            .await;

        assert!(matches!(
            result,
            Err(KeeperError::Ledger(LedgerError::NotFound(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
