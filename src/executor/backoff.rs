use crate::executor::policy::RetryPolicy;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Why the retry loop gave up without a value.
pub(crate) enum RetryExit<E> {
    Failed(E),
    Cancelled(E),
}

/// Runs `operation` until it succeeds, the error is classified as terminal, the
/// attempt budget is spent, or `cancellation` fires during a backoff sleep.
pub(crate) async fn retry_with_backoff<T, E, F, Fut, L, C>(
    policy: RetryPolicy,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T, RetryExit<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    L: FnMut(usize, Duration, &E),
    C: FnMut(usize, &E) -> RetryDisposition,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(attempt, &err) {
                RetryDisposition::Abort => return Err(RetryExit::Failed(err)),
                RetryDisposition::Retry => {
                    if attempt >= max_attempts {
                        return Err(RetryExit::Failed(err));
                    }

                    on_retry(attempt, backoff, &err);

                    if !sleep_with_cancellation(backoff, cancellation).await {
                        return Err(RetryExit::Cancelled(err));
                    }
                    backoff = next_backoff(backoff, policy.max_backoff);
                }
            },
        }
    }
}

async fn sleep_with_cancellation(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return cancellation.map(|token| !token.is_cancelled()).unwrap_or(true);
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        }
    } else {
        sleep(delay).await;
        true
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy::attempts(attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result: Result<usize, RetryExit<&str>> = retry_with_backoff(
            quick(5),
            None,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("transient")
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_, _, _| {},
            |_, _| RetryDisposition::Retry,
        )
        .await;

        assert!(matches!(result, Ok(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let mut retries = Vec::new();
        let result: Result<(), RetryExit<&str>> = retry_with_backoff(
            quick(3),
            None,
            |_| async { Err("down") },
            |attempt, _, _| retries.push(attempt),
            |_, _| RetryDisposition::Retry,
        )
        .await;

        assert!(matches!(result, Err(RetryExit::Failed("down"))));
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn abort_classification_skips_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), RetryExit<&str>> = retry_with_backoff(
            quick(5),
            None,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |_, _, _| {},
            |_, _| RetryDisposition::Abort,
        )
        .await;

        assert!(matches!(result, Err(RetryExit::Failed("fatal"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        token.cancel();
        let policy = RetryPolicy::attempts(5, Duration::from_secs(30), Duration::from_secs(30));
        let result: Result<(), RetryExit<&str>> = retry_with_backoff(
            policy,
            Some(&token),
            |_| async { Err("down") },
            |_, _, _| {},
            |_, _| RetryDisposition::Retry,
        )
        .await;

        assert!(matches!(result, Err(RetryExit::Cancelled("down"))));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let max = Duration::from_millis(300);
        assert_eq!(next_backoff(Duration::from_millis(100), max), Duration::from_millis(200));
        assert_eq!(next_backoff(Duration::from_millis(200), max), max);
        assert_eq!(next_backoff(Duration::ZERO, max), Duration::from_millis(1));
    }
}
