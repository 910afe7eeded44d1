//! Cooperative cancellation for long-running waits.
//!
//! Tokio's own token types are kept out of the public API; the token is
//! backed by `tokio::sync::Notify`.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

/// A clonable cancellation token.
///
/// Clones share the same state, so one clone can be handed to
/// [`crate::CallOptions`] while another is kept to call [`CancelToken::cancel`].
/// Cancelling stops the client from waiting; it never cancels work that the
/// platform already accepted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a new, non-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and wake every waiter.
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::AcqRel) {
            self.shared.notify.notify_waiters();
        }
    }

    /// Returns `true` if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// A future that resolves once the token is cancelled.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let shared = self.shared.clone();
        async move {
            loop {
                // Register interest before checking the flag so a `cancel()`
                // racing with this check cannot be missed.
                let notified = shared.notify.notified();
                if shared.cancelled.load(Ordering::Acquire) {
                    return;
                }
                notified.await;
            }
        }
    }
}

/// Resolves when `token` is cancelled, or never when there is no token.
pub(crate) async fn cancelled_or_pending(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
