//! Retry/throttle policy engine for unary requests.
//!
//! Every REST call in the client runs through [`RetryEngine::execute`]: the
//! engine classifies each failed attempt via
//! [`MeridianError::failure_kind`], sleeps a computed delay (server-supplied
//! resume hints win over exponential backoff), and gives up either on the
//! first fatal classification or when the attempt budget is spent — in which
//! case the *last* underlying error is surfaced, never a generic wrapper.
//!
//! On every successful response the engine refreshes the shared
//! [`RateLimitSnapshot`] from response metadata.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::backoff::Backoff;
use crate::config::ThrottlePolicy;
use crate::error::{FailureKind, MeridianError, RetryHint};

/// Most recent rate-limit standing reported by the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Requests allowed per window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}

/// Rate-limit fields parsed from response headers. Any may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseMeta {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Last-seen rate-limit standing. Written only by the retry engine after a
/// successful response; readable by any caller.
#[derive(Debug, Default)]
pub struct RateLimitSnapshot {
    inner: RwLock<Option<RateLimit>>,
}

impl RateLimitSnapshot {
    /// Overwrite the snapshot if the response carried a complete set of
    /// rate-limit fields; partial or absent metadata leaves it unchanged.
    fn update(&self, meta: &ResponseMeta) {
        if let (Some(limit), Some(remaining), Some(reset_at)) =
            (meta.limit, meta.remaining, meta.reset_at)
        {
            let mut guard = match self.inner.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(RateLimit {
                limit,
                remaining,
                reset_at,
            });
        }
    }

    /// The most recent standing, if any response carried one yet.
    pub fn current(&self) -> Option<RateLimit> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard
    }
}

/// Wraps a unary operation with retry, throttling, and rate-limit tracking.
pub struct RetryEngine {
    policy: ThrottlePolicy,
    snapshot: RateLimitSnapshot,
}

impl RetryEngine {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            snapshot: RateLimitSnapshot::default(),
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Read-only view of the most recent rate-limit standing.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.snapshot.current()
    }

    /// Run `op` until it succeeds, fails fatally, or exhausts the attempt
    /// budget. See the module docs for the classification rules.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, MeridianError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(T, ResponseMeta), MeridianError>>,
    {
        self.execute_with_cancel(op, None).await
    }

    /// Like [`execute`](Self::execute), but a pending retry delay aborts
    /// promptly when `cancel` flips to `true`.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        op: F,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<T, MeridianError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(T, ResponseMeta), MeridianError>>,
    {
        let mut backoff = Backoff::new(self.policy.min_delay(), self.policy.max_delay());
        let mut attempt: u32 = 1;

        loop {
            if let Some(rx) = &cancel {
                if *rx.borrow() {
                    return Err(MeridianError::Cancelled);
                }
            }

            let result = match tokio::time::timeout(self.policy.request_timeout(), op()).await {
                Ok(result) => result,
                Err(_) => Err(MeridianError::Timeout(self.policy.request_timeout())),
            };

            let err = match result {
                Ok((value, meta)) => {
                    self.snapshot.update(&meta);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = err.failure_kind(&self.policy.retryable_statuses);
            if kind == FailureKind::Fatal || attempt >= self.policy.max_attempts {
                return Err(err);
            }

            let delay = self.retry_delay(kind, err.retry_hint(), &mut backoff);
            debug!("attempt {attempt} failed ({kind:?}), retrying in {delay:?}: {err}");

            if !sleep_or_cancel(delay, cancel.as_mut()).await {
                return Err(MeridianError::Cancelled);
            }
            attempt += 1;
        }
    }

    /// Delay before the next attempt. Rate-limit resume hints are honored
    /// (never below `min_delay`); everything else falls back to backoff.
    fn retry_delay(&self, kind: FailureKind, hint: Option<RetryHint>, backoff: &mut Backoff) -> Duration {
        match (kind, hint) {
            (FailureKind::RateLimited, Some(RetryHint::After(wait))) => {
                wait.max(self.policy.min_delay())
            }
            (FailureKind::RateLimited, Some(RetryHint::Until(reset_at))) => {
                let wait = (reset_at - Utc::now()).to_std().unwrap_or_default();
                wait.max(self.policy.min_delay())
            }
            _ => backoff.next_delay(),
        }
    }
}

/// Sleep `delay`, returning `false` early if `cancel` flips to `true`.
async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&mut watch::Receiver<bool>>,
) -> bool {
    let Some(rx) = cancel else {
        tokio::time::sleep(delay).await;
        return true;
    };
    if *rx.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = rx.changed() => {
                if changed.is_err() {
                    // Cancel source dropped; finish the wait normally.
                    (&mut sleep).await;
                    return true;
                }
                if *rx.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use super::*;

    fn fast_policy(max_attempts: u32) -> ThrottlePolicy {
        ThrottlePolicy {
            max_attempts,
            min_delay_ms: 1,
            max_delay_ms: 5,
            retryable_statuses: vec![502, 503, 504],
            request_timeout_ms: 1_000,
        }
    }

    fn http_error(status: u16) -> MeridianError {
        MeridianError::Http {
            status,
            body: None,
            raw: String::new(),
        }
    }

    fn full_meta() -> ResponseMeta {
        ResponseMeta {
            limit: Some(200),
            remaining: Some(170),
            reset_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn three_503s_then_success_within_budget() {
        let engine = RetryEngine::new(fast_policy(4));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_op = Arc::clone(&calls);
        let result = engine
            .execute(move || {
                let n = calls_op.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(http_error(503))
                    } else {
                        Ok(("ok", ResponseMeta::default()))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_underlying_error() {
        let engine = RetryEngine::new(fast_policy(3));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_op = Arc::clone(&calls);
        let result: Result<(), _> = engine
            .execute(move || {
                calls_op.fetch_add(1, Ordering::SeqCst);
                async move { Err(http_error(503)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(MeridianError::Http { status: 503, .. }) => {}
            other => panic!("expected the final 503, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_status_never_retries() {
        let engine = RetryEngine::new(fast_policy(5));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_op = Arc::clone(&calls);
        let result: Result<(), _> = engine
            .execute(move || {
                calls_op.fetch_add(1, Ordering::SeqCst);
                async move { Err(http_error(422)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(MeridianError::Http { status: 422, .. })));
    }

    #[tokio::test]
    async fn absolute_rate_limit_hint_delays_past_reset() {
        let engine = RetryEngine::new(fast_policy(2));
        let reset_at = Utc::now() + chrono::Duration::milliseconds(200);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_op = Arc::clone(&calls);
        let started = Instant::now();
        let result = engine
            .execute(move || {
                let n = calls_op.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(MeridianError::RateLimited {
                            hint: Some(RetryHint::Until(reset_at)),
                        })
                    } else {
                        Ok(((), ResponseMeta::default()))
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        // The second attempt must not start before the advertised reset.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn snapshot_updates_on_success_and_survives_absent_metadata() {
        let engine = RetryEngine::new(fast_policy(1));

        assert!(engine.rate_limit().is_none());

        engine
            .execute(|| async { Ok(((), full_meta())) })
            .await
            .unwrap();
        let snapshot = engine.rate_limit().expect("snapshot populated");
        assert_eq!(snapshot.limit, 200);
        assert_eq!(snapshot.remaining, 170);

        // A response without rate-limit headers leaves the snapshot alone.
        engine
            .execute(|| async { Ok(((), ResponseMeta::default())) })
            .await
            .unwrap();
        assert_eq!(engine.rate_limit().unwrap().remaining, 170);
    }

    #[tokio::test]
    async fn per_attempt_timeout_surfaces_as_timeout() {
        let policy = ThrottlePolicy {
            request_timeout_ms: 10,
            ..fast_policy(2)
        };
        let engine = RetryEngine::new(policy);

        let result: Result<(), _> = engine
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(((), ResponseMeta::default()))
            })
            .await;

        assert!(matches!(result, Err(MeridianError::Timeout(_))));
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_delay() {
        let policy = ThrottlePolicy {
            min_delay_ms: 30_000,
            max_delay_ms: 30_000,
            ..fast_policy(3)
        };
        let engine = RetryEngine::new(policy);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = cancel_tx.send(true);
        });

        let started = Instant::now();
        let result: Result<(), _> = engine
            .execute_with_cancel(|| async { Err(http_error(503)) }, Some(cancel_rx))
            .await;

        assert!(matches!(result, Err(MeridianError::Cancelled)));
        // Unblocked by the cancel signal, not the 30s delay.
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
