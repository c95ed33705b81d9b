//! Shared retry/backoff helper for source connectors.
//!
//! Grounded on `scrapers/chainlink_feed.rs`'s per-call timeout and
//! `scrapers/binance_session.rs`'s `BackoffCalculator` (exponential
//! backoff with full jitter) — generalized into one function every
//! connector calls instead of duplicating the loop, since all eight
//! connectors need the exact same retry shape against a plain
//! `reqwest::Client` call.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;

pub enum Attempt<T> {
    Success(T),
    RateLimited,
    Failed,
}

/// Runs `call` up to `attempts` times with exponential backoff (base
/// `base_backoff_ms`, capped at `max_backoff_ms`, full jitter), honoring
/// `timeout` per attempt and `cancellation` across the whole sequence.
///
/// Returns `Ok(T)` on the first success, or `Err(ErrorKind)` —
/// `upstream_unavailable` on retry exhaustion or cancellation,
/// `rate_limited` is never returned (it is retried then demoted to
/// `upstream_unavailable`, per spec.md §7).
pub async fn fetch_with_retry<T, F, Fut>(
    attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    timeout: Duration,
    cancellation: &CancellationToken,
    mut call: F,
) -> Result<(T, u32), ErrorKind>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if cancellation.is_cancelled() {
            return Err(ErrorKind::UpstreamUnavailable);
        }

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, call()) => result,
            _ = cancellation.cancelled() => return Err(ErrorKind::UpstreamUnavailable),
        };

        match outcome {
            Ok(Attempt::Success(value)) => return Ok((value, attempt)),
            Ok(Attempt::RateLimited) | Ok(Attempt::Failed) | Err(_timeout_elapsed) => {
                if attempt == attempts {
                    return Err(ErrorKind::UpstreamUnavailable);
                }
                let backoff = backoff_with_full_jitter(base_backoff_ms, max_backoff_ms, attempt);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancellation.cancelled() => return Err(ErrorKind::UpstreamUnavailable),
                }
            }
        }
    }
    Err(ErrorKind::UpstreamUnavailable)
}

fn backoff_with_full_jitter(base_ms: u64, cap_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16).saturating_sub(1).max(0));
    let capped = exp.min(cap_ms);
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let cancellation = CancellationToken::new();
        let result = fetch_with_retry(
            3,
            10,
            100,
            Duration::from_millis(500),
            &cancellation,
            || async { Attempt::Success(42) },
        )
        .await;
        assert!(matches!(result, Ok((42, 1))));
    }

    #[tokio::test]
    async fn exhausts_retries_then_reports_upstream_unavailable() {
        let cancellation = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let result = fetch_with_retry(3, 1, 5, Duration::from_millis(500), &cancellation, {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Attempt::<()>::Failed
                }
            }
        })
        .await;
        assert!(matches!(result, Err(ErrorKind::UpstreamUnavailable)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let cancellation = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let result = fetch_with_retry(3, 1, 5, Duration::from_millis(500), &cancellation, {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Attempt::<u32>::Failed
                    } else {
                        Attempt::Success(7)
                    }
                }
            }
        })
        .await;
        assert!(matches!(result, Ok((7, 3))));
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let result = fetch_with_retry(
            3,
            10,
            100,
            Duration::from_millis(500),
            &cancellation,
            || async { Attempt::<()>::Failed },
        )
        .await;
        assert!(matches!(result, Err(ErrorKind::UpstreamUnavailable)));
    }
}
