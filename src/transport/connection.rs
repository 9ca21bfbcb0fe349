//! Transport actor owning one connection.
//!
//! The actor is the only task that writes to the connection. It accepts
//! [`PendingCall`]s from any number of callers and routes each inbound frame
//! to one of two places:
//! - the waiting call, for responses;
//! - the subscription sink registered for the frame's channel id, for
//!   `xrpc.ch.val` / `xrpc.ch.close` pushes.
//!
//! Reading happens on a separate task so a partially read frame is never
//! lost when the actor is woken by something else.

use std::collections::HashMap;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::framing::{read_message, write_message};
use crate::rpc::{
    CancelNotice, Frame, PendingCall, Request, Response, Sink, SinkInstaller, CHAN_CLOSE_METHOD,
    CHAN_VALUE_METHOD,
};

/// Inbound frames buffered between the reader task and the actor.
const FRAME_QUEUE: usize = 64;

struct Inflight {
    ready: oneshot::Sender<Response>,
    sink: Option<SinkInstaller>,
}

struct Channel {
    /// Id of the request that opened the subscription.
    id: i64,
    sink: Sink,
    notice: CancelNotice,
    /// Sends `xrpc.cancel` when the subscriber's context is cancelled.
    watcher: Option<JoinHandle<()>>,
}

impl Channel {
    /// End the subscription stream.
    async fn close(mut self) {
        self.stop_watcher();
        self.sink.deliver(None).await;
    }

    /// Forget a channel whose stream is already gone.
    fn release(mut self) {
        self.stop_watcher();
    }

    fn stop_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Single-owner transport for one connection.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
    requests: mpsc::Receiver<PendingCall>,
    stop: CancellationToken,
}

impl<R, W> Connection<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        reader: R,
        writer: W,
        requests: mpsc::Receiver<PendingCall>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            reader,
            writer,
            requests,
            stop,
        }
    }

    /// Serve the connection until `stop` is cancelled, every client is
    /// dropped, or the peer goes away.
    ///
    /// On exit every open subscription is closed and every in-flight call is
    /// dropped, so callers see a client error instead of waiting forever.
    pub async fn run(self) {
        let Self {
            reader,
            writer,
            mut requests,
            stop,
        } = self;

        let (frame_tx, mut frames) = mpsc::channel(FRAME_QUEUE);
        let reader_task = tokio::spawn(read_frames(reader, frame_tx).instrument(Span::current()));

        let (cancel_tx, mut cancels) = mpsc::unbounded_channel();
        let mut state = State {
            writer,
            inflight: HashMap::new(),
            channels: HashMap::new(),
            cancel_tx,
            stop: stop.clone(),
        };

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    info!("Transport stop requested");
                    break;
                }
                call = requests.recv() => {
                    let Some(call) = call else {
                        debug!("All clients dropped, closing transport");
                        break;
                    };
                    if let Err(e) = state.submit(call).await {
                        error!("Failed to send request: {:#}", e);
                        break;
                    }
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        info!("Connection closed by server");
                        break;
                    };
                    state.handle_frame(frame).await;
                }
                Some(id) = cancels.recv() => {
                    debug!(id, "Subscription context cancelled, notifying server");
                    if let Err(e) = state.write(&Request::cancel(id)).await {
                        error!("Failed to send cancellation: {:#}", e);
                        break;
                    }
                }
            }
        }

        reader_task.abort();
        state.shutdown().await;
    }
}

async fn read_frames<R>(mut reader: R, frames: mpsc::Sender<Frame>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let body = match read_message(&mut reader).await {
            Ok(body) => body,
            Err(e) => {
                debug!("Reader stopped: {:#}", e);
                return;
            }
        };

        match serde_json::from_str::<Frame>(&body) {
            Ok(frame) => {
                if frames.send(frame).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("Dropping malformed frame: {}", e),
        }
    }
}

struct State<W> {
    writer: W,
    inflight: HashMap<i64, Inflight>,
    channels: HashMap<u64, Channel>,
    cancel_tx: mpsc::UnboundedSender<i64>,
    /// Interrupts element delivery to a stalled consumer.
    stop: CancellationToken,
}

impl<W> State<W>
where
    W: AsyncWrite + Unpin,
{
    async fn write(&mut self, request: &Request) -> Result<()> {
        let body = serde_json::to_string(request).context("Failed to serialize request")?;
        write_message(&mut self.writer, &body).await
    }

    async fn submit(&mut self, call: PendingCall) -> Result<()> {
        let PendingCall {
            request,
            ready,
            sink,
        } = call;

        let id = match (request.id, ready) {
            (Some(id), Some(ready)) => {
                if self.inflight.insert(id, Inflight { ready, sink }).is_some() {
                    warn!(id, "Request id reused while still in flight");
                }
                Some(id)
            }
            _ => None,
        };

        let result = self.write(&request).await;
        if result.is_err() {
            if let Some(id) = id {
                self.inflight.remove(&id);
            }
        }
        result
    }

    async fn handle_frame(&mut self, mut frame: Frame) {
        let Some(method) = frame.method.take() else {
            match frame.into_response() {
                Some(response) => self.handle_response(response),
                None => warn!("Dropping frame with neither id nor method"),
            }
            return;
        };

        match method.as_str() {
            CHAN_VALUE_METHOD => self.handle_chan_value(frame.params).await,
            CHAN_CLOSE_METHOD => self.handle_chan_close(frame.params).await,
            _ => warn!("Unhandled server method: {}", method),
        }
    }

    fn handle_response(&mut self, response: Response) {
        let Some(inflight) = self.inflight.remove(&response.id) else {
            warn!(id = response.id, "Response for unknown request id");
            return;
        };

        // A streaming call's result is the channel id its pushes will carry.
        // The sink goes in before the caller is woken so no push is missed.
        if let (Some(installer), Some(result)) = (inflight.sink, response.result.as_ref()) {
            match result.as_u64() {
                Some(chid) => self.install(response.id, chid, installer),
                None => error!(
                    id = response.id,
                    "Failed to decode channel id from response: {}", result
                ),
            }
        }

        if inflight.ready.send(response).is_err() {
            debug!("Caller went away before its response arrived");
        }
    }

    fn install(&mut self, id: i64, chid: u64, installer: SinkInstaller) {
        let notice = installer.notice().clone();
        let (ctx, sink) = installer.install();

        // The caller may already have told the server while it was waiting.
        let watcher = ctx.filter(|_| !notice.is_sent()).map(|ctx| {
            let cancel_tx = self.cancel_tx.clone();
            let notice = notice.clone();
            tokio::spawn(async move {
                ctx.cancelled().await;
                if notice.claim() {
                    let _ = cancel_tx.send(id);
                }
            })
        });

        debug!(id, chid, "Subscription opened");
        let channel = Channel {
            id,
            sink,
            notice,
            watcher,
        };
        if let Some(previous) = self.channels.insert(chid, channel) {
            warn!(chid, "Channel id reused, replacing previous subscription");
            previous.release();
        }
    }

    async fn handle_chan_value(&mut self, params: Vec<serde_json::Value>) {
        let mut params = params.into_iter();
        let (Some(chid), Some(payload)) = (params.next(), params.next()) else {
            warn!("{}: expected [channel, payload] params", CHAN_VALUE_METHOD);
            return;
        };
        let Some(chid) = chid.as_u64() else {
            error!("{}: invalid channel id {}", CHAN_VALUE_METHOD, chid);
            return;
        };

        let Some(channel) = self.channels.get_mut(&chid) else {
            error!("{}: handler {} not found", CHAN_VALUE_METHOD, chid);
            return;
        };

        // Delivery waits for the consumer, but never past a stop request.
        let open = tokio::select! {
            open = channel.sink.deliver(Some(payload)) => open,
            _ = self.stop.cancelled() => {
                debug!(chid, "Stop requested during delivery, dropping element");
                return;
            }
        };
        if open {
            return;
        }

        let Some(channel) = self.channels.remove(&chid) else {
            return;
        };
        debug!(chid, "Subscription consumer went away, releasing channel");
        let (id, notify) = (channel.id, channel.notice.claim());
        channel.release();
        if notify {
            if let Err(e) = self.write(&Request::cancel(id)).await {
                error!("Failed to send cancellation: {:#}", e);
            }
        }
    }

    async fn handle_chan_close(&mut self, params: Vec<serde_json::Value>) {
        let Some(chid) = params.first().and_then(|v| v.as_u64()) else {
            error!("{}: invalid channel id in {:?}", CHAN_CLOSE_METHOD, params);
            return;
        };

        match self.channels.remove(&chid) {
            Some(channel) => {
                debug!(chid, "Subscription closed");
                channel.close().await;
            }
            None => error!("{}: handler {} not found", CHAN_CLOSE_METHOD, chid),
        }
    }

    async fn shutdown(mut self) {
        for (_, channel) in self.channels.drain() {
            channel.close().await;
        }
        if !self.inflight.is_empty() {
            warn!("Dropping {} in-flight calls", self.inflight.len());
        }
        self.inflight.clear();
    }
}
