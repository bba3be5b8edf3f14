//! Retry helpers with fixed and exponential-backoff delays.
//!
//! Both primitives propagate cancellation immediately and never retry an
//! operation that failed because it was canceled.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Error;

/// Retry `op` up to `tries` times with a fixed `delay` between attempts.
pub async fn retry<T, F, Fut>(
    token: &CancellationToken,
    tries: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    assert!(tries > 0, "tries must be positive");
    let mut last_err = None;
    for attempt in 0..tries {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                warn!(attempt, max_tries = tries, error = %e, "try failed");
                last_err = Some(e);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => return Err(Error::Canceled),
        }
    }
    let err = last_err.expect("at least one attempt ran");
    warn!(error = %err, "failed all tries");
    Err(err)
}

/// Retry `op` with exponential backoff: `initial`, doubled (or multiplied)
/// each attempt and capped at `max_backoff`.
pub async fn retry_backoff<T, F, Fut>(
    token: &CancellationToken,
    tries: u32,
    initial: Duration,
    multiplier: u32,
    max_backoff: Duration,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    assert!(tries > 0, "tries must be positive");
    let mut delay = initial;
    let mut last_err = None;
    for attempt in 0..tries {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                warn!(attempt, max_tries = tries, backoff = ?delay, error = %e, "try failed");
                last_err = Some(e);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => return Err(Error::Canceled),
        }
        delay = (delay * multiplier).min(max_backoff);
    }
    let err = last_err.expect("at least one attempt ran");
    warn!(error = %err, "failed all tries");
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let res = retry(&token, 5, Duration::from_millis(1), move || {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Other("not yet".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_and_returns_last_error() {
        let token = CancellationToken::new();
        let res: Result<(), _> = retry(&token, 3, Duration::from_millis(1), || async {
            Err(Error::Other("always".into()))
        })
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_retry_never_retries_cancellation() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let res: Result<(), _> = retry(&token, 10, Duration::from_millis(1), move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Canceled)
            }
        })
        .await;
        assert!(matches!(res, Err(Error::Canceled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_caps_delay() {
        // The backoff schedule itself: 10ms, 20ms, 40ms, capped at 50ms.
        let token = CancellationToken::new();
        let start = std::time::Instant::now();
        let res: Result<(), _> = retry_backoff(
            &token,
            4,
            Duration::from_millis(10),
            2,
            Duration::from_millis(50),
            || async { Err(Error::Other("no".into())) },
        )
        .await;
        assert!(res.is_err());
        // 10 + 20 + 40 + 50 = 120ms minimum.
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let token = CancellationToken::new();
        token.cancel();
        let res: Result<(), _> = retry(&token, 3, Duration::from_secs(60), || async {
            Err(Error::Other("fail once".into()))
        })
        .await;
        assert!(matches!(res, Err(Error::Canceled)));
    }
}
