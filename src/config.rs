//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "rpc";

/// Get the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/rpcbind.sock` on Linux when set, the user cache
/// directory otherwise, and `/tmp/rpcbind.sock` as a last resort.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("rpcbind.sock");
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("rpcbind.sock");
    }

    PathBuf::from("/tmp/rpcbind.sock")
}

/// Settings for [`Client::connect`](crate::rpc::Client::connect) and
/// [`Client::spawn`](crate::rpc::Client::spawn).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Unix socket the server listens on.
    pub socket_path: PathBuf,
    /// Prefix of every wire method name (`<namespace>.<Method>`).
    pub namespace: String,
    /// Capacity of the submission channel between callers and the transport.
    pub queue_depth: usize,
    /// How long a cancelled call waits for its response before giving up.
    /// `None` waits indefinitely.
    pub cancel_grace_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            queue_depth: 1,
            cancel_grace_ms: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `RPCBIND_SOCKET`, `RPCBIND_NAMESPACE`,
    /// `RPCBIND_QUEUE_DEPTH` and `RPCBIND_CANCEL_GRACE_MS`.
    ///
    /// Unparseable numeric values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Parse a JSON config. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid config object.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse client config")
    }

    pub fn cancel_grace(&self) -> Option<Duration> {
        self.cancel_grace_ms.map(Duration::from_millis)
    }

    fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("RPCBIND_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
        if let Some(namespace) = lookup("RPCBIND_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(depth) = lookup("RPCBIND_QUEUE_DEPTH") {
            match depth.parse() {
                Ok(depth) => self.queue_depth = depth,
                Err(e) => warn!("Ignoring RPCBIND_QUEUE_DEPTH={}: {}", depth, e),
            }
        }
        if let Some(grace) = lookup("RPCBIND_CANCEL_GRACE_MS") {
            match grace.parse() {
                Ok(ms) => self.cancel_grace_ms = Some(ms),
                Err(e) => warn!("Ignoring RPCBIND_CANCEL_GRACE_MS={}: {}", grace, e),
            }
        }
        self
    }
}
