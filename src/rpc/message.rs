//! JSON-RPC 2.0 wire messages.
//!
//! Requests always carry positional params. Responses are matched to their
//! request by `id`; inbound frames that carry a `method` instead are server
//! pushes for open subscriptions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol version string sent with every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved notification asking the server to abandon a request.
pub const CANCEL_METHOD: &str = "xrpc.cancel";

/// Server push carrying one subscription element: `[channel_id, payload]`.
pub const CHAN_VALUE_METHOD: &str = "xrpc.ch.val";

/// Server push ending a subscription: `[channel_id]`.
pub const CHAN_CLOSE_METHOD: &str = "xrpc.ch.close";

/// Outgoing request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    /// `None` for fire-and-forget notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Request {
    /// Build a request that expects a correlated response.
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: i64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification; no response will be sent for it.
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Cancellation notice for the request with the given id.
    pub fn cancel(target: i64) -> Self {
        Self::notification(CANCEL_METHOD, vec![Value::from(target)])
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Response to a request, as delivered to the waiting call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: i64,
    /// Missing and `null` results both decode to `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Response {
    pub fn ok(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: i64, error: RemoteError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Error object returned by the server, surfaced to callers verbatim.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("Server error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Any inbound message: a response (has `id`, no `method`) or a server push
/// (has `method`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl Frame {
    /// Convert a response frame into a [`Response`]. Returns `None` for pushes
    /// and for frames without an id.
    pub fn into_response(self) -> Option<Response> {
        if self.method.is_some() {
            return None;
        }
        let id = self.id?;
        Some(Response {
            jsonrpc: self.jsonrpc,
            id,
            result: self.result,
            error: self.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("Full.Add", vec![json!(2), json!(3)], 7);
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "id": 7, "method": "Full.Add", "params": [2, 3]})
        );
    }

    #[test]
    fn test_notification_omits_id() {
        let req = Request::cancel(42);
        assert!(req.is_notification());
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "method": "xrpc.cancel", "params": [42]})
        );
    }

    #[test]
    fn test_response_null_result_is_none() {
        let resp: Response =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(resp.result, None);
        assert_eq!(resp.error, None);
    }

    #[test]
    fn test_response_with_error() {
        let resp: Response = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":1,"message":"boom"}}"#,
        )
        .unwrap();
        assert_eq!(resp.error, Some(RemoteError::new(1, "boom")));
        assert_eq!(
            resp.error.unwrap().to_string(),
            "Server error 1: boom"
        );
    }

    #[test]
    fn test_frame_classification() {
        let push: Frame = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"xrpc.ch.val","params":[1,{"x":2}]}"#,
        )
        .unwrap();
        assert_eq!(push.method.as_deref(), Some(CHAN_VALUE_METHOD));
        assert!(push.into_response().is_none());

        let resp: Frame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":9,"result":5}"#).unwrap();
        let resp = resp.into_response().expect("response frame");
        assert_eq!(resp.id, 9);
        assert_eq!(resp.result, Some(json!(5)));
    }
}
