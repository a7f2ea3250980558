//! Async testing utilities.
//!
//! Timeout wrappers for awaiting calls in tests, plus helpers for polling
//! a condition and draining response streams.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;

/// Default timeout for async operations in tests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a future with a timeout.
///
/// # Panics
///
/// Panics if the future does not complete within the timeout.
///
/// # Example
///
/// ```rust
/// use rpckit_testing::async_helpers::with_timeout;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let result = with_timeout(Duration::from_secs(1), async { "hello" }).await;
/// assert_eq!(result, "hello");
/// # }
/// ```
pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("Test timed out")
}

/// Run a future with [`DEFAULT_TIMEOUT`].
pub async fn with_default_timeout<T, F>(future: F) -> T
where
    F: Future<Output = T>,
{
    with_timeout(DEFAULT_TIMEOUT, future).await
}

/// Assert that a future is still pending after `timeout`.
///
/// Used to check that a call has not completed yet, for example while a
/// handler waits for more requests.
///
/// # Panics
///
/// Panics if the future completes before the timeout.
pub async fn assert_times_out<T, F>(timeout: Duration, future: F)
where
    F: Future<Output = T>,
{
    let result = tokio::time::timeout(timeout, future).await;
    assert!(
        result.is_err(),
        "Expected operation to time out, but it completed"
    );
}

/// Wait for a condition to become true, polling every `interval`.
///
/// # Panics
///
/// Panics if the condition is not met within the timeout.
pub async fn wait_for<F>(timeout: Duration, interval: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() <= deadline,
            "Condition not met within timeout"
        );
        tokio::time::sleep(interval).await;
    }
}

/// Drain a stream to its end.
///
/// # Panics
///
/// Panics if the stream does not end within the timeout.
pub async fn collect_with_timeout<S>(timeout: Duration, stream: S) -> Vec<S::Item>
where
    S: Stream,
{
    with_timeout(timeout, stream.collect::<Vec<_>>()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(result, 42);
    }

    #[tokio::test]
    #[should_panic(expected = "timed out")]
    async fn test_with_timeout_failure() {
        with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_assert_times_out() {
        assert_times_out(Duration::from_millis(10), futures::future::pending::<()>()).await;
    }

    #[tokio::test]
    async fn test_wait_for() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            setter.store(true, Ordering::SeqCst);
        });

        wait_for(Duration::from_secs(1), Duration::from_millis(5), || {
            flag.load(Ordering::SeqCst)
        })
        .await;
    }

    #[tokio::test]
    async fn test_collect_with_timeout() {
        let items = collect_with_timeout(DEFAULT_TIMEOUT, futures::stream::iter([1, 2, 3])).await;
        assert_eq!(items, vec![1, 2, 3]);
    }
}
