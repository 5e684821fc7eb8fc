//! One-shot completion signal.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// A latch that flips from pending to complete exactly once.
///
/// Waiters that subscribe after completion return immediately. Completing
/// an already complete signal is a no-op.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Marks the signal complete. Returns `true` only for the call that
    /// actually flipped it.
    pub fn complete(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    /// A future that resolves once the signal is complete.
    ///
    /// The future does not borrow `self`, so it can be moved into another
    /// task.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // Err only if every sender is gone, which cannot happen while
            // the signal is pending and someone holds it.
            let _ = rx.wait_for(|done| *done).await;
        }
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_completion_is_a_noop() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_complete());
        assert!(signal.complete());
        assert!(!signal.complete());
        assert!(signal.is_complete());
    }

    #[tokio::test]
    async fn late_waiter_returns_immediately() {
        let signal = CompletionSignal::new();
        signal.complete();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("waiter should not block after completion");
    }

    #[tokio::test]
    async fn waiter_wakes_on_completion() {
        let signal = CompletionSignal::new();
        let waiter = tokio::spawn(signal.wait());
        tokio::task::yield_now().await;
        signal.complete();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
