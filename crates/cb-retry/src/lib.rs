//! The retry/backoff orchestrator (spec §4.7). Consumes a
//! [`cb_core::RetryReason`] and the operation's [`cb_core::Idempotence`],
//! decides whether another attempt is worth making, and if so after how
//! long: `delay = min(max_backoff, base * 2^attempts) + jitter`, bounded
//! by the operation's overall deadline.

use cb_core::{CouchbaseError, Deadline, ErrorKind, Idempotence, RetryReason};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(1), max: Duration::from_millis(500) }
    }
}

impl BackoffPolicy {
    /// `delay = min(max, base * 2^attempt) + jitter`, where jitter is a
    /// uniform fraction of the computed delay in `[0, delay/2]` — full
    /// jitter would risk starving an attempt near the deadline, additive
    /// jitter keeps the schedule roughly exponential while still avoiding
    /// synchronized retries across many clients.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32.checked_shl(attempt.min(24)).unwrap_or(u32::MAX));
        let capped = exp.min(self.max);
        let jitter_upper_ms = (capped.as_millis() as u64 / 2).max(1);
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_upper_ms);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// One recorded attempt, kept so that if every retry is exhausted the
/// caller gets a trace of what was tried rather than only the last error
/// (spec §4.7: "giving up ... surfacing the last underlying error plus a
/// reason trace").
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub reason: RetryReason,
    pub delay: Duration,
}

#[derive(Debug)]
pub struct RetryExhausted {
    pub last_error: CouchbaseError,
    pub trace: Vec<AttemptRecord>,
}

impl std::fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "retry exhausted after {} attempts: {}", self.trace.len(), self.last_error)
    }
}

impl std::error::Error for RetryExhausted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Decides the next step for one failed attempt. Does not itself sleep or
/// loop — callers drive the loop so they can interleave cancellation,
/// config refresh, or node reselection between attempts.
pub struct RetryOrchestrator {
    policy: BackoffPolicy,
}

impl RetryOrchestrator {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    pub fn decide(&self, reason: RetryReason, idempotence: Idempotence, attempt: u32, deadline: Deadline) -> RetryDecision {
        if !reason.is_retryable() || !idempotence.permits_retry() {
            debug!(?reason, ?idempotence, "not retrying: policy disallows");
            return RetryDecision::GiveUp;
        }
        let delay = self.policy.delay_for_attempt(attempt);
        if deadline.remaining() <= delay {
            warn!(?reason, attempt, "retry would exceed operation deadline, giving up");
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(delay)
    }
}

/// Drives `operation` until it succeeds, the deadline is exceeded, or the
/// failure is not retryable. `operation` returns `Err((reason, error))` on
/// a retryable-candidate failure.
pub async fn retry_with_backoff<T, F, Fut>(
    orchestrator: &RetryOrchestrator,
    idempotence: Idempotence,
    deadline: Deadline,
    mut operation: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, (RetryReason, CouchbaseError)>>,
{
    let mut trace = Vec::new();
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err((reason, error)) => match orchestrator.decide(reason, idempotence, attempt, deadline) {
                RetryDecision::RetryAfter(delay) => {
                    trace.push(AttemptRecord { reason, delay });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    let last_error = if deadline.is_expired() {
                        CouchbaseError::new(ErrorKind::UnambiguousTimeout, error.message().to_string())
                            .with_cause(error)
                    } else {
                        error
                    };
                    return Err(RetryExhausted { last_error, trace });
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_core::Timeout;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_is_capped_and_monotone_nondecreasing_before_the_cap() {
        let policy = BackoffPolicy { base: Duration::from_millis(10), max: Duration::from_millis(100) };
        for attempt in 0..10 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= Duration::from_millis(150), "attempt {attempt} delay {delay:?} exceeds cap plus jitter bound");
        }
    }

    #[test]
    fn non_idempotent_failures_never_retry() {
        let orchestrator = RetryOrchestrator::new(BackoffPolicy::default());
        let deadline = Timeout::from_millis(10_000).deadline_from_now();
        let decision = orchestrator.decide(RetryReason::TemporaryFailure, Idempotence::NotIdempotent, 0, deadline);
        assert!(matches!(decision, RetryDecision::GiveUp));
    }

    #[test]
    fn gives_up_once_the_deadline_would_be_exceeded() {
        let orchestrator = RetryOrchestrator::new(BackoffPolicy { base: Duration::from_secs(1), max: Duration::from_secs(1) });
        let deadline = Timeout::from_millis(5).deadline_from_now();
        let decision = orchestrator.decide(RetryReason::NotReady, Idempotence::Idempotent, 0, deadline);
        assert!(matches!(decision, RetryDecision::GiveUp));
    }

    #[tokio::test]
    async fn retry_with_backoff_succeeds_after_transient_failures() {
        let orchestrator = RetryOrchestrator::new(BackoffPolicy { base: Duration::from_millis(1), max: Duration::from_millis(5) });
        let deadline = Timeout::from_millis(5_000).deadline_from_now();
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(&orchestrator, Idempotence::Idempotent, deadline, |_attempt| {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err((RetryReason::NotReady, CouchbaseError::new(ErrorKind::ServiceNotAvailable, "not ready yet")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_reports_trace_on_exhaustion() {
        let orchestrator = RetryOrchestrator::new(BackoffPolicy { base: Duration::from_millis(1), max: Duration::from_millis(2) });
        let deadline = Timeout::from_millis(5).deadline_from_now();

        let result: Result<(), RetryExhausted> = retry_with_backoff(&orchestrator, Idempotence::Idempotent, deadline, |_| async {
            Err((RetryReason::TemporaryFailure, CouchbaseError::new(ErrorKind::TemporaryFailure, "busy")))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.last_error.kind(), ErrorKind::TemporaryFailure);
    }
}
