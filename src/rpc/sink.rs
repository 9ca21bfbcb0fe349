//! Subscription streams fed by server pushes.

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::future::{self, FutureExt};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, Instrument, Span};

use super::context::Context;
use super::pending::{Sink, SinkInstaller};

/// Live result of a streaming method.
///
/// Yields each element the server pushes, then `None` once the server closes
/// the stream or the connection goes away.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// An already-finished stream.
    pub(crate) fn closed() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self { rx }
    }

    /// Next element, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop accepting elements. Already buffered elements can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a subscription for elements of type `T` and the installer the
/// transport uses to feed it.
///
/// The stream holds at most one undelivered element; delivery waits for the
/// consumer beyond that.
pub(crate) fn open<T>(ctx: Option<Context>, span: Span) -> (Subscription<T>, SinkInstaller)
where
    T: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<T>(1);

    let installer = SinkInstaller::new(move || {
        let mut tx = Some(tx);
        let sink = Sink::new(move |payload: Option<Value>| {
            let _enter = span.enter();

            if tx.as_ref().is_some_and(|tx| tx.is_closed()) {
                debug!("Subscription consumer went away, dropping sink");
                tx = None;
            }

            // End of stream: dropping the sender closes the subscription.
            let Some(payload) = payload else {
                if tx.take().is_some() {
                    debug!("Subscription closed by remote");
                }
                return future::ready(false).boxed();
            };

            let Some(sender) = tx.clone() else {
                return future::ready(false).boxed();
            };

            // A malformed element is skipped; the stream stays open.
            match serde_json::from_value::<T>(payload) {
                Ok(item) => async move {
                    let delivered = sender.send(item).await.is_ok();
                    if !delivered {
                        debug!("Subscription consumer dropped before receiving element");
                    }
                    delivered
                }
                .instrument(span.clone())
                .boxed(),
                Err(e) => {
                    error!("Failed to decode subscription element: {}", e);
                    future::ready(true).boxed()
                }
            }
        });
        (ctx, sink)
    });

    (Subscription { rx }, installer)
}
