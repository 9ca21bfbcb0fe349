//! Client registry: binds method declarations to a shared transport.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument, Span};

use super::dispatch;
use super::error::BindError;
use super::pending::PendingCall;
use super::plan::{Member, Plan, Signature};
use super::signature::{Params, Returns};
use crate::config::ClientConfig;
use crate::transport::Connection;

/// Shared state behind every clone of a [`Client`] and its bound methods.
pub(crate) struct Inner {
    namespace: String,
    next_id: AtomicI64,
    pub(crate) requests: mpsc::Sender<PendingCall>,
    pub(crate) cancel_grace: Option<Duration>,
    pub(crate) span: Span,
}

impl Inner {
    /// Next request id. Ids start at 1 and never repeat for this client.
    pub(crate) fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn method_name(&self, member: &str) -> String {
        format!("{}.{}", self.namespace, member)
    }
}

/// JSON-RPC client for one namespace.
///
/// Cheap to clone; all clones share the id counter and the transport.
///
/// # Example
///
/// ```ignore
/// use rpcbind::{rpc_api, Client, ClientConfig, Context, Error, Subscription};
///
/// rpc_api! {
///     pub struct FullNode {
///         Add: (Context, i64, i64) => Result<i64, Error>,
///         Watch: (Context,) => Result<Subscription<i64>, Error>,
///     }
/// }
///
/// let (client, closer) = Client::connect(&ClientConfig::from_env()).await?;
/// let node: FullNode = client.bind_set()?;
/// let sum = node.Add.call((Context::new(), 2, 3)).await?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Client that submits calls on `requests`, with default options.
    pub fn new(namespace: impl Into<String>, requests: mpsc::Sender<PendingCall>) -> Self {
        Self::builder(namespace).build(requests)
    }

    pub fn builder(namespace: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            namespace: namespace.into(),
            cancel_grace: None,
            span: None,
        }
    }

    /// Dial the configured Unix socket and start the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket at `config.socket_path` cannot be
    /// connected to.
    pub async fn connect(config: &ClientConfig) -> Result<(Self, ClientCloser)> {
        let stream = UnixStream::connect(&config.socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", config.socket_path.display()))?;
        info!("Connected to {}", config.socket_path.display());

        let (read_half, write_half) = stream.into_split();
        Ok(Self::spawn(read_half, write_half, config))
    }

    /// Start a transport over an already-connected stream pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(reader: R, writer: W, config: &ClientConfig) -> (Self, ClientCloser)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let stop = CancellationToken::new();

        let client = Self::builder(config.namespace.clone())
            .cancel_grace_opt(config.cancel_grace())
            .build(tx);

        let connection = Connection::new(BufReader::new(reader), writer, rx, stop.clone());
        tokio::spawn(connection.run().instrument(client.span().clone()));

        (client, ClientCloser { stop })
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Span all logging of this client is emitted in.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Bind one method. The member name is sent unchanged after the
    /// namespace.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] if the signature has a context anywhere but
    /// first, more than two outputs, or outputs in the wrong order.
    pub fn bind<P: Params, R: Returns>(&self, name: &str) -> Result<Method<P, R>, BindError> {
        let plan = Plan::build(name, Signature::new(P::inputs(), R::outputs()))?;
        Ok(Method {
            client: self.clone(),
            plan: Arc::new(plan),
            _signature: PhantomData,
        })
    }

    /// Bind every method of a set.
    ///
    /// All members are validated first; nothing is bound if any of them is
    /// rejected. Several sets may be bound on the same client and share its
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns the [`BindError`] of the first member that fails validation.
    pub fn bind_set<S: MethodSet>(&self) -> Result<S, BindError> {
        let mut seen = HashSet::new();
        for member in S::members() {
            if !seen.insert(member.name().to_string()) {
                return Err(BindError::DuplicateMethod {
                    name: member.name().to_string(),
                });
            }
            match member {
                Member::Method { name, signature } => {
                    Plan::build(name, signature)?;
                }
                Member::Field { name, type_name } => {
                    return Err(BindError::NotAFunction { name, type_name });
                }
            }
        }
        S::bind(self)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("namespace", &self.inner.namespace)
            .field("next_id", &self.inner.next_id)
            .finish_non_exhaustive()
    }
}

/// Options for a [`Client`].
#[derive(Debug)]
pub struct ClientBuilder {
    namespace: String,
    cancel_grace: Option<Duration>,
    span: Option<Span>,
}

impl ClientBuilder {
    /// Give up on a cancelled call if no response arrives within `grace`.
    /// By default a cancelled call waits for its response indefinitely.
    pub fn cancel_grace(self, grace: Duration) -> Self {
        self.cancel_grace_opt(Some(grace))
    }

    fn cancel_grace_opt(mut self, grace: Option<Duration>) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Span to emit this client's logs in. Defaults to an `rpc` span
    /// carrying the namespace.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self, requests: mpsc::Sender<PendingCall>) -> Client {
        let span = self
            .span
            .unwrap_or_else(|| info_span!("rpc", namespace = %self.namespace));
        Client {
            inner: Arc::new(Inner {
                namespace: self.namespace,
                next_id: AtomicI64::new(0),
                requests,
                cancel_grace: self.cancel_grace,
                span,
            }),
        }
    }
}

/// Stops the transport started by [`Client::connect`] or [`Client::spawn`].
///
/// Open subscriptions end and in-flight calls fail with a client error once
/// the transport has shut down.
#[derive(Debug, Clone)]
pub struct ClientCloser {
    stop: CancellationToken,
}

impl ClientCloser {
    pub fn close(&self) {
        self.stop.cancel();
    }
}

/// A bound remote method with parameters `P` and return type `R`.
pub struct Method<P, R> {
    client: Client,
    plan: Arc<Plan>,
    _signature: PhantomData<fn(P) -> R>,
}

impl<P: Params, R: Returns> Method<P, R> {
    /// Perform one call.
    ///
    /// Waits until the response arrives. Cancelling a context passed in
    /// `params` notifies the server but does not end the wait.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let add = client.bind::<(Context, i64, i64), Result<i64, Error>>("Add")?;
    /// let ctx = Context::with_timeout(Duration::from_secs(5));
    /// let sum = add.call((ctx, 2, 3)).await?;
    /// ```
    pub async fn call(&self, params: P) -> R {
        let inner = &self.client.inner;
        dispatch::invoke(inner, &self.plan, params)
            .instrument(inner.span.clone())
            .await
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }
}

impl<P, R> Clone for Method<P, R> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            plan: Arc::clone(&self.plan),
            _signature: PhantomData,
        }
    }
}

impl<P, R> fmt::Debug for Method<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("namespace", &self.client.inner.namespace)
            .field("plan", &self.plan)
            .finish()
    }
}

/// A named set of methods bound together, usually declared with
/// [`rpc_api!`](crate::rpc_api).
pub trait MethodSet: Sized {
    /// Members of the set, in declaration order.
    fn members() -> Vec<Member>;

    /// Build the set from an already validated client.
    fn bind(client: &Client) -> Result<Self, BindError>;
}

/// Declare a struct of bound methods.
///
/// Each field is `Name: (params) => return`. The field name is the wire
/// member name.
///
/// ```ignore
/// rpc_api! {
///     pub struct Storage {
///         Get: (Context, String) => Result<Option<Vec<u8>>, Error>,
///         Put: (Context, String, Vec<u8>) => Result<(), Error>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! rpc_api {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $field:ident : $params:ty => $ret:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        #[derive(Debug, Clone)]
        $vis struct $name {
            $( pub $field: $crate::Method<$params, $ret>, )*
        }

        impl $crate::MethodSet for $name {
            fn members() -> ::std::vec::Vec<$crate::Member> {
                ::std::vec![
                    $( $crate::Member::method::<$params, $ret>(::std::stringify!($field)), )*
                ]
            }

            fn bind(client: &$crate::Client) -> ::std::result::Result<Self, $crate::BindError> {
                ::std::result::Result::Ok(Self {
                    $( $field: client.bind(::std::stringify!($field))?, )*
                })
            }
        }
    };
}
