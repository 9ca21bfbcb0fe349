//! Records handed from calling tasks to the transport actor.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use super::context::Context;
use super::message::{Request, Response};

/// Records whether the server has been sent `xrpc.cancel` for a request.
///
/// The calling task and the transport can both notice a cancelled context;
/// whoever claims the notice first sends it, so the server hears about each
/// request at most once.
#[derive(Debug, Clone, Default)]
pub struct CancelNotice {
    sent: Arc<AtomicBool>,
}

impl CancelNotice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once, for the first caller.
    pub fn claim(&self) -> bool {
        !self.sent.swap(true, Ordering::AcqRel)
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}

/// Delivery half of a subscription, held by the transport.
///
/// `deliver(Some(payload))` forwards one pushed element; `deliver(None)`
/// ends the stream. Each delivery resolves to whether the stream is still
/// open, so the transport can release a channel whose consumer went away.
pub struct Sink {
    deliver: Box<dyn FnMut(Option<Value>) -> BoxFuture<'static, bool> + Send>,
}

impl Sink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: FnMut(Option<Value>) -> BoxFuture<'static, bool> + Send + 'static,
    {
        Self {
            deliver: Box::new(deliver),
        }
    }

    /// Forward one element, or close the stream with `None`.
    ///
    /// Waits until the consumer has room for the element. Returns `false`
    /// once the stream is closed or its consumer has dropped it.
    pub async fn deliver(&mut self, payload: Option<Value>) -> bool {
        (self.deliver)(payload).await
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").finish_non_exhaustive()
    }
}

/// Installs a [`Sink`] once the server confirms the subscription.
///
/// Returns the call's context, if any, so the transport can notify the
/// server when the consumer cancels. The [`CancelNotice`] is shared with the
/// calling task.
pub struct SinkInstaller {
    install: Box<dyn FnOnce() -> (Option<Context>, Sink) + Send>,
    notice: CancelNotice,
}

impl SinkInstaller {
    pub fn new<F>(install: F) -> Self
    where
        F: FnOnce() -> (Option<Context>, Sink) + Send + 'static,
    {
        Self {
            install: Box::new(install),
            notice: CancelNotice::new(),
        }
    }

    pub fn notice(&self) -> &CancelNotice {
        &self.notice
    }

    pub fn install(self) -> (Option<Context>, Sink) {
        (self.install)()
    }
}

impl fmt::Debug for SinkInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkInstaller")
            .field("notice", &self.notice)
            .finish_non_exhaustive()
    }
}

/// One entry on the submission channel.
///
/// Calls carry a `ready` channel that receives exactly one response.
/// Notifications carry neither `ready` nor a sink.
#[derive(Debug)]
pub struct PendingCall {
    pub request: Request,
    pub ready: Option<oneshot::Sender<Response>>,
    pub sink: Option<SinkInstaller>,
}

impl PendingCall {
    pub fn call(
        request: Request,
        ready: oneshot::Sender<Response>,
        sink: Option<SinkInstaller>,
    ) -> Self {
        Self {
            request,
            ready: Some(ready),
            sink,
        }
    }

    pub fn notification(request: Request) -> Self {
        Self {
            request,
            ready: None,
            sink: None,
        }
    }
}
