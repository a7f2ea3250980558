//! Runtime helpers shared by the client and server crates.
//!
//! Locks come from `async-lock` and wakeups from `event-listener`, so they do
//! not tie callers to an executor. Spawning, timers and channels use Tokio.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use event_listener::Event;

// =============================================================================
// Lock Abstraction
// =============================================================================

/// A runtime-agnostic async mutex.
pub use async_lock::Mutex as AsyncMutex;

/// A runtime-agnostic async `RwLock`.
pub use async_lock::RwLock as AsyncRwLock;

// =============================================================================
// Channel Abstraction
// =============================================================================

/// A bounded MPSC channel sender.
pub type Sender<T> = tokio::sync::mpsc::Sender<T>;

/// A bounded MPSC channel receiver.
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;

/// An unbounded MPSC channel sender.
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;

/// An unbounded MPSC channel receiver.
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;

/// Create a bounded MPSC channel.
#[must_use]
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    tokio::sync::mpsc::channel(capacity)
}

/// Create an unbounded MPSC channel.
#[must_use]
pub fn unbounded_channel<T>() -> (UnboundedSender<T>, UnboundedReceiver<T>) {
    tokio::sync::mpsc::unbounded_channel()
}

// =============================================================================
// Spawn Abstraction
// =============================================================================

/// Spawn a future on the runtime.
///
/// Note: This requires `'static` bound. Use sparingly - prefer passing
/// futures through channels or letting the caller handle spawning.
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}

// =============================================================================
// Timer Abstraction
// =============================================================================

/// Sleep for the given duration.
pub async fn sleep(duration: std::time::Duration) {
    tokio::time::sleep(duration).await;
}

// =============================================================================
// Cancellation
// =============================================================================

/// A cloneable, one-shot cancellation signal.
///
/// All clones observe the same state. Waiters parked in
/// [`cancelled`](Self::cancelled) are woken through an `event-listener`
/// [`Event`], so waiting costs nothing until the token fires.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    event: Event,
}

impl CancellationToken {
    /// Create a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token, waking every waiter.
    ///
    /// Returns `true` if this call performed the cancellation and `false` if
    /// the token was already cancelled.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.inner.event.notify(usize::MAX);
        }
        first
    }

    /// Whether the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            // Register before re-checking so a concurrent cancel is not missed.
            let listener = self.inner.event.listen();
            if self.is_cancelled() {
                return;
            }
            listener.await;
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_one_shot() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        assert!(token.cancel());
        assert!(!clone.cancel());
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancellationToken::new();
        let (tx, mut rx) = channel(4);

        for _ in 0..3 {
            let token = token.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = tx.send(()).await;
            });
        }
        drop(tx);

        sleep(Duration::from_millis(10)).await;
        token.cancel();

        let mut woken = 0;
        while tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("waiter was not woken")
            .is_some()
        {
            woken += 1;
        }
        assert_eq!(woken, 3);
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(
            tokio::time::timeout(Duration::from_millis(100), token.cancelled())
                .await
                .is_ok()
        );
    }
}
