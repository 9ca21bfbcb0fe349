//! Per-call request lifecycle.
//!
//! A call goes through these steps:
//! 1. Allocate an id.
//! 2. Open a sink if the method streams.
//! 3. Hand the request to the transport.
//! 4. Wait for the correlated response.
//! 5. Decode and materialize the result.
//!
//! Cancellation while waiting is advisory. The server is told once, and the
//! call keeps waiting for the real response:
//!
//! ```text
//!   Waiting ──ctx cancelled / send xrpc.cancel──► CancelSent
//!      │                                              │
//!      └──────────── response delivered ──────────────┴──► Completed
//! ```

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::client::Inner;
use super::context::Context;
use super::error::ClientError;
use super::materialize;
use super::message::{Request, Response};
use super::pending::{CancelNotice, PendingCall};
use super::plan::Plan;
use super::signature::{Params, Returns, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Waiting,
    CancelSent,
}

/// Run one call of `plan` to completion.
pub(crate) async fn invoke<P: Params, R: Returns>(client: &Inner, plan: &Plan, params: P) -> R {
    let id = client.next_id();

    let (ctx, wire_params) = match params.split() {
        Ok(split) => split,
        Err(e) => return materialize::failure(plan, ClientError::Encode(e)),
    };

    // Streaming calls get their stream now; the transport installs the sink
    // once the server confirms the subscription.
    let (stream, sink) = if plan.is_streaming() {
        match <R::Value as ValueType>::open(ctx.clone(), client.span.clone()) {
            Some((stream, installer)) => (Some(stream), Some(installer)),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    // Shared with the transport's subscription watcher, if any.
    let notice = sink
        .as_ref()
        .map(|installer| installer.notice().clone())
        .unwrap_or_default();

    let request = Request::new(client.method_name(plan.name()), wire_params, id);
    debug!(id, method = %request.method, "Sending request");

    // Blocks until the transport accepts the call.
    let (ready_tx, ready_rx) = oneshot::channel();
    if client
        .requests
        .send(PendingCall::call(request, ready_tx, sink))
        .await
        .is_err()
    {
        return materialize::failure(plan, ClientError::Submit);
    }

    let response = match await_response(client, id, ctx.as_ref(), &notice, ready_rx).await {
        Ok(response) => response,
        Err(e) => return materialize::failure(plan, e),
    };

    if response.id != id {
        return materialize::failure(
            plan,
            ClientError::IdMismatch {
                sent: id,
                received: response.id,
            },
        );
    }

    let value = if plan.is_streaming() {
        stream
    } else if plan.value_out().is_some() {
        match response.result {
            Some(raw) if !raw.is_null() => match <R::Value as ValueType>::decode(raw) {
                Ok(value) => Some(value),
                Err(e) => return materialize::failure(plan, ClientError::Decode(e)),
            },
            _ => None,
        }
    } else {
        None
    };

    materialize::response(plan, value, response.error)
}

/// Wait for the response to request `id`, notifying the server once if `ctx`
/// is cancelled first.
///
/// `notice` is shared with the transport for streaming calls, so a context
/// cancelled before the subscription is confirmed is reported only once.
async fn await_response(
    client: &Inner,
    id: i64,
    ctx: Option<&Context>,
    notice: &CancelNotice,
    mut ready: oneshot::Receiver<Response>,
) -> Result<Response, ClientError> {
    let mut state = CallState::Waiting;

    loop {
        match (state, ctx) {
            (CallState::Waiting, Some(ctx)) => {
                tokio::select! {
                    response = &mut ready => {
                        return response.map_err(|_| ClientError::ConnectionClosed);
                    }
                    _ = ctx.cancelled() => {
                        if notice.claim() {
                            debug!(id, "Context cancelled, notifying server");
                            let cancel = PendingCall::notification(Request::cancel(id));
                            if client.requests.send(cancel).await.is_err() {
                                warn!(id, "Transport closed, cancellation not sent");
                            }
                        }
                        state = CallState::CancelSent;
                    }
                }
            }
            (CallState::Waiting, None) => {
                return ready.await.map_err(|_| ClientError::ConnectionClosed);
            }
            (CallState::CancelSent, _) => {
                let Some(grace) = client.cancel_grace else {
                    return ready.await.map_err(|_| ClientError::ConnectionClosed);
                };
                return match timeout(grace, ready).await {
                    Ok(response) => response.map_err(|_| ClientError::ConnectionClosed),
                    Err(_) => {
                        warn!(id, "No response after cancellation, abandoning call");
                        Err(ClientError::Abandoned {
                            grace_ms: grace.as_millis() as u64,
                        })
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Client, Error, RemoteError, Subscription, CANCEL_METHOD};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn client() -> (Client, mpsc::Receiver<PendingCall>) {
        let (tx, rx) = mpsc::channel(16);
        (Client::new("Full", tx), rx)
    }

    async fn next_call(rx: &mut mpsc::Receiver<PendingCall>) -> PendingCall {
        timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("Test timed out")
            .expect("transport channel closed")
    }

    #[tokio::test]
    async fn test_add_success() {
        let (client, mut rx) = client();
        let add = client
            .bind::<(Context, i64, i64), Result<i64, Error>>("Add")
            .unwrap();

        let call = tokio::spawn(async move { add.call((Context::new(), 2, 3)).await });

        let pending = next_call(&mut rx).await;
        assert_eq!(pending.request.method, "Full.Add");
        assert_eq!(pending.request.params, vec![json!(2), json!(3)]);
        let id = pending.request.id.unwrap();
        pending.ready.unwrap().send(Response::ok(id, json!(5))).unwrap();

        assert_eq!(call.await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_add_remote_error() {
        let (client, mut rx) = client();
        let add = client
            .bind::<(Context, i64, i64), Result<i64, Error>>("Add")
            .unwrap();

        let call = tokio::spawn(async move { add.call((Context::new(), 2, 3)).await });

        let pending = next_call(&mut rx).await;
        let id = pending.request.id.unwrap();
        pending
            .ready
            .unwrap()
            .send(Response::err(id, RemoteError::new(1, "boom")))
            .unwrap();

        match call.await.unwrap() {
            Err(Error::Remote(err)) => assert_eq!(err, RemoteError::new(1, "boom")),
            other => panic!("Expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_id_mismatch_is_client_error() {
        let (client, mut rx) = client();
        let add = client
            .bind::<(Context, i64, i64), Result<i64, Error>>("Add")
            .unwrap();

        let call = tokio::spawn(async move { add.call((Context::new(), 2, 3)).await });

        let pending = next_call(&mut rx).await;
        let id = pending.request.id.unwrap();
        pending
            .ready
            .unwrap()
            .send(Response::ok(id + 100, json!(5)))
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_client());
        assert!(
            err.to_string().contains("id didn't match"),
            "unexpected message: {}",
            err
        );
    }

    #[tokio::test]
    async fn test_decode_failure_is_client_error() {
        let (client, mut rx) = client();
        let add = client
            .bind::<(Context, i64, i64), Result<i64, Error>>("Add")
            .unwrap();

        let call = tokio::spawn(async move { add.call((Context::new(), 2, 3)).await });

        let pending = next_call(&mut rx).await;
        let id = pending.request.id.unwrap();
        pending
            .ready
            .unwrap()
            .send(Response::ok(id, json!("five")))
            .unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::Decode(_))));
    }

    #[tokio::test]
    async fn test_null_result_gives_zero_value() {
        let (client, mut rx) = client();
        let name = client.bind::<(), Result<String, Error>>("Name").unwrap();

        let call = tokio::spawn(async move { name.call(()).await });

        let pending = next_call(&mut rx).await;
        let id = pending.request.id.unwrap();
        pending
            .ready
            .unwrap()
            .send(Response::ok(id, serde_json::Value::Null))
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), "");
    }

    #[tokio::test]
    async fn test_cancel_sends_one_notice_and_keeps_waiting() {
        let (client, mut rx) = client();
        let add = client
            .bind::<(Context, i64, i64), Result<i64, Error>>("Add")
            .unwrap();

        let ctx = Context::new();
        let call_ctx = ctx.clone();
        let call = tokio::spawn(async move { add.call((call_ctx, 2, 3)).await });

        let pending = next_call(&mut rx).await;
        let id = pending.request.id.unwrap();

        ctx.cancel();
        let notice = next_call(&mut rx).await;
        assert_eq!(notice.request.method, CANCEL_METHOD);
        assert_eq!(notice.request.id, None);
        assert_eq!(notice.request.params, vec![json!(id)]);
        assert!(notice.ready.is_none());

        // Still waiting on the original response.
        assert!(!call.is_finished());
        pending.ready.unwrap().send(Response::ok(id, json!(5))).unwrap();
        assert_eq!(call.await.unwrap().unwrap(), 5);

        // Exactly one notice.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_grace_abandons_call() {
        let (tx, mut rx) = mpsc::channel(16);
        let client = Client::builder("Full")
            .cancel_grace(Duration::from_millis(20))
            .build(tx);
        let slow = client
            .bind::<(Context,), Result<i64, Error>>("Slow")
            .unwrap();

        let ctx = Context::new();
        ctx.cancel();
        let result = timeout(TEST_TIMEOUT, async {
            let call = slow.call((ctx,));
            let (result, _pending) = tokio::join!(call, async {
                let pending = next_call(&mut rx).await;
                let _notice = next_call(&mut rx).await;
                pending
            });
            result
        })
        .await
        .expect("Test timed out");

        assert!(matches!(
            result,
            Err(Error::Client(ClientError::Abandoned { grace_ms: 20 }))
        ));
    }

    #[tokio::test]
    async fn test_dropped_call_reports_connection_closed() {
        let (client, mut rx) = client();
        let ping = client.bind::<(), Result<(), Error>>("Ping").unwrap();

        let call = tokio::spawn(async move { ping.call(()).await });
        drop(next_call(&mut rx).await);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_submit_failure() {
        let (client, rx) = client();
        drop(rx);
        let ping = client.bind::<(), Result<(), Error>>("Ping").unwrap();
        let err = ping.call(()).await.unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::Submit)));
    }

    #[tokio::test]
    async fn test_streaming_call_installs_sink() {
        let (client, mut rx) = client();
        let watch = client
            .bind::<(Context,), Result<Subscription<i64>, Error>>("Watch")
            .unwrap();

        let call = tokio::spawn(async move { watch.call((Context::new(),)).await });

        let pending = next_call(&mut rx).await;
        let id = pending.request.id.unwrap();
        let (_ctx, mut sink) = pending.sink.expect("streaming call carries a sink").install();
        pending.ready.unwrap().send(Response::ok(id, json!(1))).unwrap();

        let mut sub = call.await.unwrap().unwrap();
        let feeder = tokio::spawn(async move {
            sink.deliver(Some(json!(7))).await;
            sink.deliver(Some(json!(8))).await;
            sink.deliver(None).await;
        });

        assert_eq!(timeout(TEST_TIMEOUT, sub.next()).await.unwrap(), Some(7));
        assert_eq!(timeout(TEST_TIMEOUT, sub.next()).await.unwrap(), Some(8));
        assert_eq!(timeout(TEST_TIMEOUT, sub.next()).await.unwrap(), None);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_ids_are_unique() {
        let (client, mut rx) = client();
        let add = client
            .bind::<(i64, i64), Result<i64, Error>>("Add")
            .unwrap();

        let mut calls = Vec::new();
        for i in 0..50 {
            let add = add.clone();
            calls.push(tokio::spawn(async move { add.call((i, 1)).await }));
        }

        let mut seen = HashSet::new();
        for _ in 0..50 {
            let pending = next_call(&mut rx).await;
            let id = pending.request.id.unwrap();
            assert!(seen.insert(id), "duplicate id {}", id);
            let sum = pending.request.params[0].as_i64().unwrap() + 1;
            pending.ready.unwrap().send(Response::ok(id, json!(sum))).unwrap();
        }

        for (i, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.unwrap().unwrap(), i as i64 + 1);
        }
    }
}
