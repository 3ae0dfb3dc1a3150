//! Cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cancellation flag handed to every action handler.
///
/// Aborting never stops the handler by force. Handlers are expected to check
/// [`is_aborted`](AbortSignal::is_aborted) or race [`aborted`](AbortSignal::aborted)
/// against their work and avoid side effects once it fires. The action itself
/// refuses to commit an aborted dispatch either way.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is aborted.
    pub async fn aborted(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so an abort in between is not lost.
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }

    pub(crate) fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn abort_is_sticky() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        signal.abort();
        signal.abort();
        assert!(signal.clone().is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_wakes_waiters() {
        let signal = AbortSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.abort();
        });

        tokio::time::timeout(Duration::from_millis(50), signal.aborted())
            .await
            .expect("abort should wake the waiter");
    }

    #[tokio::test]
    async fn aborted_returns_immediately_when_already_aborted() {
        let signal = AbortSignal::new();
        signal.abort();
        signal.aborted().await;
    }
}
