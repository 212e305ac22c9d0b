//! # Callee-side Dispatcher
//!
//! Runs in the privileged platform context. Routes inbound calls to the
//! handler registered for their kind and answers each with exactly one
//! response echoing the original call ID. Pushes unsolicited events for
//! subscriptions via [`Dispatcher::emit`].
//!
//! ## Invariants
//!
//! - **One handler per kind**: binding a second handler for a kind is a
//!   setup error, caught at registration, never at dispatch.
//! - **Isolation**: every call is routed on its own task. A failing or
//!   panicking handler becomes a failure response; it cannot take the
//!   dispatcher down or block other in-flight calls.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use spanwire::Kind;
use spanwire::Method;
use spanwire::WireError;
use spanwire::WireMessage;
use spanwire::catalog::ArgTuple;

use crate::transport;
use crate::transport::Transport;

/// Dispatcher-side failures. These are local configuration and delivery
/// errors; handler failures travel back to the caller as wire errors instead.
#[derive(Debug)]
pub enum Error {
    /// A handler is already bound for this kind.
    DuplicateHandler(Kind),
    /// The transport refused an outbound response or event.
    Transport(transport::Error),
    /// Envelope or payload serialization failed locally.
    Codec(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateHandler(kind) => {
                write!(f, "a handler is already registered for {}", kind)
            }
            Self::Transport(e) => write!(f, "transport failure: {}", e),
            Self::Codec(msg) => write!(f, "codec failure: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<spanwire::Error> for Error {
    fn from(e: spanwire::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failure returned by a handler. Its message is carried verbatim to the
/// caller inside the failure response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Type-erased handler: raw argument array in, wire result out.
#[async_trait::async_trait]
trait ErasedHandler: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> std::result::Result<Value, WireError>;
}

/// Adapter binding a typed handler function to a catalog method.
struct TypedHandler<M, F> {
    handler: F,
    _method: PhantomData<fn(M)>,
}

#[async_trait::async_trait]
impl<M, F, Fut> ErasedHandler for TypedHandler<M, F>
where
    M: Method,
    F: Fn(M::Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<M::Reply, HandlerError>> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>) -> std::result::Result<Value, WireError> {
        // The wire is untrusted: re-check arity and element types here even
        // though well-behaved callers validated statically.
        let args = M::Args::from_values(M::KIND, args)
            .map_err(|e| WireError::ArgumentMismatch { kind: M::KIND, detail: e.to_string() })?;

        let reply = (self.handler)(args)
            .await
            .map_err(|e| WireError::HandlerFailure { detail: e.0 })?;

        serde_json::to_value(reply)
            .map_err(|e| WireError::HandlerFailure { detail: format!("reply encoding failed: {}", e) })
    }
}

/// Callee-side dispatcher with an async serve loop.
///
/// Construction spawns the serve task; dropping the dispatcher aborts it.
/// Handlers may be registered at any point; a call arriving for an
/// unregistered kind is answered with an `UnknownMessageKind` failure
/// rather than dropped.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    handlers: Arc<DashMap<Kind, Arc<dyn ErasedHandler>>>,
    serve: tokio::task::JoinHandle<()>,
}

impl Dispatcher {
    /// Create a dispatcher over the given transport and spawn its serve task.
    ///
    /// Must be constructed inside a tokio runtime.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let handlers: Arc<DashMap<Kind, Arc<dyn ErasedHandler>>> = Arc::new(DashMap::new());

        let serve_transport = transport.clone();
        let serve_handlers = handlers.clone();

        let serve = tokio::spawn(async move {
            loop {
                match serve_transport.recv().await {
                    Ok(Some(msg)) => {
                        Self::accept(&msg, &serve_transport, &serve_handlers);
                    }
                    Ok(None) => {
                        tracing::info!("transport closed, dispatcher stopping");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport error, dispatcher stopping");
                        break;
                    }
                }
            }
        });

        Self { transport, handlers, serve }
    }

    /// Bind the handler for method `M`.
    ///
    /// Exactly one handler may be bound per kind; a second registration is a
    /// configuration error and fails here, at setup.
    pub fn register<M, F, Fut>(&self, handler: F) -> Result<()>
    where
        M: Method,
        F: Fn(M::Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<M::Reply, HandlerError>> + Send + 'static,
    {
        let erased: Arc<dyn ErasedHandler> =
            Arc::new(TypedHandler::<M, F> { handler, _method: PhantomData });

        match self.handlers.entry(M::KIND) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::DuplicateHandler(M::KIND)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(erased);
                Ok(())
            }
        }
    }

    /// Push an unsolicited event to all subscribers of method `M` on the
    /// other side. Fire-and-forget: no acknowledgement is expected.
    pub async fn emit<M: Method>(&self, payload: M::Reply) -> Result<()> {
        let payload = serde_json::to_value(payload).map_err(|e| Error::Codec(e.to_string()))?;
        let frame = WireMessage::Event { kind: M::KIND, payload }.encode()?;
        self.transport.send(&frame).await?;
        Ok(())
    }

    /// Accept one inbound message from the serve loop, spawning a routing
    /// task for calls so slow handlers never block the loop.
    fn accept(msg: &[u8], transport: &Arc<dyn Transport>, handlers: &Arc<DashMap<Kind, Arc<dyn ErasedHandler>>>) {
        let message = match WireMessage::decode(msg) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable inbound message");
                return;
            }
        };

        match message {
            WireMessage::Call { kind, call_id, args } => {
                let transport = transport.clone();
                let handler = handlers.get(&kind).map(|entry| Arc::clone(entry.value()));
                tokio::spawn(async move {
                    Self::route(transport, handler, kind, call_id, args).await;
                });
            }
            other => {
                tracing::warn!(
                    call_id = other.call_id(),
                    "non-call envelope arrived on the callee side, dropping"
                );
            }
        }
    }

    /// Route one call to its handler and send back exactly one response
    /// echoing the original call ID.
    async fn route(
        transport: Arc<dyn Transport>,
        handler: Option<Arc<dyn ErasedHandler>>,
        kind: Kind,
        call_id: u64,
        args: Vec<Value>,
    ) {
        let response = match handler {
            None => WireMessage::Error {
                call_id,
                error: WireError::UnknownMessageKind { kind },
            },
            Some(handler) => {
                // The extra spawn is the isolation boundary: a panicking
                // handler surfaces as a JoinError instead of unwinding
                // through the dispatcher.
                let outcome = tokio::spawn(async move { handler.call(args).await }).await;
                match outcome {
                    Ok(Ok(result)) => WireMessage::Result { call_id, result },
                    Ok(Err(error)) => WireMessage::Error { call_id, error },
                    Err(join_error) => {
                        let detail = if join_error.is_panic() {
                            format!("handler for {} panicked", kind)
                        } else {
                            format!("handler for {} was cancelled", kind)
                        };
                        WireMessage::Error {
                            call_id,
                            error: WireError::HandlerFailure { detail },
                        }
                    }
                }
            }
        };

        let payload = match response.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%kind, call_id, error = %e, "failed to encode response");
                return;
            }
        };

        if let Err(e) = transport.send(&payload).await {
            tracing::warn!(%kind, call_id, error = %e, "failed to send response");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // The serve loop would otherwise sit in `recv` for the process
        // lifetime. In-flight routing tasks run to completion on their own.
        self.serve.abort();
    }
}
