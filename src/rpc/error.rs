//! Error types for binding and calling remote methods.
//!
//! Failures fall into three groups:
//! - [`BindError`]: a method signature is unusable, reported when the client
//!   is constructed.
//! - [`ClientError`]: something went wrong on this side of the connection
//!   (encoding, decoding, correlation, transport hand-off).
//! - [`RemoteError`]: the server answered with an error object.
//!
//! Callers receive the last two through [`Error`], which keeps them apart so
//! "my side" and "their side" failures can be handled differently.

use thiserror::Error;

pub use super::message::RemoteError;

/// Signature or method-set shape rejected at binding time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// A member of a method set is a plain field.
    #[error("handler field not a func: {name} ({type_name})")]
    NotAFunction {
        name: String,
        type_name: &'static str,
    },

    /// More outputs than a value and an error.
    #[error("method {name}: too many return values ({count})")]
    TooManyOutputs { name: String, count: usize },

    /// Two outputs, but the second is not the error slot.
    #[error("method {name}: expected error as second return value")]
    SecondOutputNotError { name: String },

    /// The cancellation context appears somewhere other than first.
    #[error("method {name}: context must be the first parameter (found at {index})")]
    MisplacedContext { name: String, index: usize },

    /// A context or error type was declared where a value was expected.
    #[error("method {name}: output {index} is not a value type")]
    InvalidOutput { name: String, index: usize },

    /// The same wire name was declared twice in one method set.
    #[error("method {name} declared more than once")]
    DuplicateMethod { name: String },
}

/// Failure raised locally while performing a call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request and response id didn't match (sent {sent}, got {received})")]
    IdMismatch { sent: i64, received: i64 },

    #[error("marshaling params: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unmarshaling result: {0}")]
    Decode(#[source] serde_json::Error),

    /// The transport is gone and could not accept the request.
    #[error("transport closed, request not sent")]
    Submit,

    /// The transport dropped the call without delivering a response.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// No response within the configured grace period after cancellation.
    #[error("no response {grace_ms}ms after cancellation, call abandoned")]
    Abandoned { grace_ms: u64 },
}

/// Error surfaced through a bound method's error slot.
#[derive(Debug, Error)]
pub enum Error {
    /// Reported by the server; passed through untouched.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Raised by this client.
    #[error("RPC client error: {0}")]
    Client(#[from] ClientError),
}

impl Error {
    pub fn is_client(&self) -> bool {
        matches!(self, Error::Client(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote(_))
    }

    /// The server's error object, if that is where the failure came from.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Error::Remote(err) => Some(err),
            Error::Client(_) => None,
        }
    }
}
