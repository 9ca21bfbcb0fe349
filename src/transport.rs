//! Connection transport for the RPC client.
//!
//! Messages use HTTP-style Content-Length framing (same as LSP) over any
//! async byte stream; [`Client::connect`](crate::rpc::Client::connect) uses a
//! Unix domain socket.

mod connection;
mod framing;

pub use connection::Connection;
pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
