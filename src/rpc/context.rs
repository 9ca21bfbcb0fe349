//! Cancellation context passed as the leading argument of a call.

use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cooperative cancellation handle for one or more calls.
///
/// Cancelling a context attached to an in-flight call sends the server a
/// cancellation notice; the call itself still waits for the real response.
/// Clones share the same cancellation state.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that cancels itself after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let ctx = Context::with_timeout(Duration::from_millis(500));
    /// let head = node.ChainHead.call((ctx,)).await;
    /// ```
    pub fn with_timeout(timeout: Duration) -> Self {
        let ctx = Self::new();
        let token = ctx.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
        ctx
    }

    /// Derived context, cancelled together with this one but cancellable on
    /// its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl From<CancellationToken> for Context {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}
