//! Generic request retrier.
//!
//! Applies a timeout to each attempt of an operation, then exponential backoff with
//! jitter between attempts, retrying forever until the operation succeeds or the
//! caller's future is dropped. Grounded on `engine/src/retrier.rs`'s
//! `max_sleep_duration`/timeout-per-attempt shape, simplified from that file's
//! multi-request multiplexing actor (`RetrierClient<Client>`, request IDs, a
//! `SubmissionHolder` buffering concurrent in-flight requests) down to the
//! single-operation case this crate needs: the Indexer (C5) retries one block's detail
//! ingestion at a time, it never needs to multiplex many concurrent named requests
//! against a shared client the way the teacher's JSON-RPC retrier does.
//!
//! Retry-with-backoff applies to background indexing work only — user-facing reads (C7
//! Query Engine) never retry silently; they surface a timeout/error to the caller
//! instead.

use std::cmp::min;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::constants::{INITIAL_RETRY_DELAY, MAX_RETRY_DELAY};

fn backoff_delay(attempt: u32) -> Duration {
    let exp = INITIAL_RETRY_DELAY.saturating_mul(2u32.saturating_pow(attempt));
    let capped = min(MAX_RETRY_DELAY, exp);
    let jitter_millis = rand::thread_rng().gen_range(0..=(capped.as_millis() as u64 / 4).max(1));
    capped + Duration::from_millis(jitter_millis)
}

/// Retries `op` with a per-attempt `timeout`, applying exponential backoff with jitter
/// between failed attempts, until it returns `Ok`. Never gives up — callers that need a
/// bound wrap this call in their own `tokio::time::timeout` or drop the future.
pub async fn retry_with_backoff<T, E, F, Fut>(operation_name: &str, timeout: Duration, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return value,
            Ok(Err(e)) => {
                tracing::warn!(operation = operation_name, attempt, error = %e, "retrier attempt failed");
            }
            Err(_) => {
                tracing::warn!(operation = operation_name, attempt, "retrier attempt timed out");
            }
        }
        tokio::time::sleep(backoff_delay(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_delay_is_capped() {
        let d = backoff_delay(40);
        assert!(d <= MAX_RETRY_DELAY + Duration::from_millis(MAX_RETRY_DELAY.as_millis() as u64 / 4));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = retry_with_backoff("test-op", Duration::from_millis(50), move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err::<u32, &str>("not yet")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, 7);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }
}
