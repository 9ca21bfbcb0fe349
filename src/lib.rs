//! rpcbind
//!
//! Client-side JSON-RPC 2.0 engine with typed method binding:
//!
//! - `rpc` - method binding, call dispatch, cancellation and subscriptions
//! - `transport` - Content-Length framed connection actor
//! - `config` - client settings from defaults, JSON or the environment
//!
//! # Example
//!
//! ```ignore
//! use rpcbind::{rpc_api, Client, ClientConfig, Context, Error, Subscription};
//!
//! rpc_api! {
//!     pub struct FullNode {
//!         Add: (Context, i64, i64) => Result<i64, Error>,
//!         ChainNotify: (Context,) => Result<Subscription<serde_json::Value>, Error>,
//!     }
//! }
//!
//! let (client, closer) = Client::connect(&ClientConfig::from_env()).await?;
//! let node: FullNode = client.bind_set()?;
//! let sum = node.Add.call((Context::new(), 2, 3)).await?;
//! ```

pub mod config;
pub mod rpc;
pub mod transport;

pub use config::ClientConfig;
pub use rpc::{
    BindError, Client, ClientCloser, ClientError, Context, Error, Member, Method, MethodSet,
    RemoteError, Subscription, Unchecked,
};
