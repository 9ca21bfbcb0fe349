//! Typed JSON-RPC 2.0 client.
//!
//! Remote methods are declared as typed Rust signatures and bound to a
//! [`Client`]. Calling a bound [`Method`] encodes the arguments, submits the
//! request through the transport, waits for the response and hands back the
//! declared return value.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   PendingCall    ┌──────────────┐   framed JSON   ┌────────┐
//! │ Method::call │ ───────────────► │  Connection  │ ◄─────────────► │ server │
//! │  (dispatch)  │ ◄─── Response ── │ (transport)  │                 └────────┘
//! └──────────────┘                  └──────┬───────┘
//!        ▲                                 │ xrpc.ch.val / xrpc.ch.close
//!        └──────── Subscription ◄── Sink ◄─┘
//! ```
//!
//! # Signatures
//!
//! Parameters are a tuple, optionally led by a [`Context`]. The return type
//! is one of:
//!
//! - `()` for no outputs
//! - `Result<(), Error>` for an error only
//! - `Result<V, Error>` for a value and an error
//! - `Unchecked<V>` for a value with no error slot
//!
//! A value of type [`Subscription<T>`] makes the method streaming: the
//! server answers with a channel id and then pushes elements until it closes
//! the channel.
//!
//! # Usage
//!
//! ```ignore
//! use rpcbind::rpc::{Client, Context, Error};
//!
//! let add = client.bind::<(Context, i64, i64), Result<i64, Error>>("Add")?;
//! let sum = add.call((Context::new(), 2, 3)).await?;
//! ```

mod client;
mod context;
mod dispatch;
mod error;
mod materialize;
mod message;
mod pending;
mod plan;
mod signature;
mod sink;

pub use client::{Client, ClientBuilder, ClientCloser, Method, MethodSet};
pub use context::Context;
pub use error::{BindError, ClientError, Error, RemoteError};
pub use message::{
    Frame, Request, Response, CANCEL_METHOD, CHAN_CLOSE_METHOD, CHAN_VALUE_METHOD,
    JSONRPC_VERSION,
};
pub use pending::{CancelNotice, PendingCall, Sink, SinkInstaller};
pub use plan::{Member, Plan, Signature, Slot};
pub use signature::{Outputs, Params, Returns, Unchecked, ValueType};
pub use sink::Subscription;
