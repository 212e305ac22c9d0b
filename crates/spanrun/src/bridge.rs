//! # Caller-side Bridge
//!
//! Runs in the unprivileged renderer context. Issues calls, owns the table
//! of pending calls, and fans subscription events out to handlers.
//!
//! A pump task demultiplexes inbound messages: responses settle the pending
//! entry with the matching call ID, events go to the subscriber registry.
//! Every call settles exactly once; a response whose call ID has no pending
//! entry is logged and discarded.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use spanwire::Method;
use spanwire::WireError;
use spanwire::WireMessage;
use spanwire::catalog::ArgTuple;

use crate::registry::Subscription;
use crate::registry::SubscriberRegistry;
use crate::transport;
use crate::transport::Transport;

/// How an invocation can fail on the caller side.
#[derive(Debug, Clone)]
pub enum Error {
    /// The transport failed to deliver, or the connection dropped while the
    /// call was in flight.
    Transport(transport::Error),
    /// The bridge was shut down; pending and future calls all fail.
    Closed,
    /// The other side answered with a failure response.
    Remote(WireError),
    /// Envelope or payload (de)serialization failed locally.
    Codec(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport failure: {}", e),
            Self::Closed => write!(f, "bridge closed"),
            Self::Remote(e) => write!(f, "remote failure: {}", e),
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

type Settlement = oneshot::Sender<Result<Value>>;

/// Caller-side bridge with an async pump for concurrent in-flight calls.
///
/// The bridge spawns a background task that continuously reads from the
/// transport and routes each response to the pending call with the matching
/// call ID. Call IDs are allocated from a monotonic counter, so an ID is
/// never reused while its entry is pending.
///
/// Must be constructed inside a tokio runtime. Wrap in `Arc` to share.
/// Dropping the bridge aborts the pump task.
pub struct Bridge {
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<u64, Settlement>>,
    subscribers: Arc<SubscriberRegistry>,
    next_call_id: AtomicU64,
    closed: Arc<AtomicBool>,
    pump: tokio::task::JoinHandle<()>,
}

impl Bridge {
    /// Create a bridge over the given transport and spawn its pump task.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending: Arc<DashMap<u64, Settlement>> = Arc::new(DashMap::new());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump_transport = transport.clone();
        let pump_pending = pending.clone();
        let pump_subscribers = subscribers.clone();
        let pump_closed = closed.clone();

        let pump = tokio::spawn(async move {
            let error = loop {
                match pump_transport.recv().await {
                    Ok(Some(msg)) => {
                        Self::handle_message(&msg, &pump_pending, &pump_subscribers);
                    }
                    Ok(None) => {
                        break Error::Transport(transport::Error::ConnectionLost(
                            "transport closed".into(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "transport error in bridge pump");
                        break Error::Transport(e);
                    }
                }
            };

            pump_closed.store(true, Ordering::Release);
            Self::reject_all_pending(&pump_pending, error);
            pump_subscribers.clear();
        });

        Self {
            transport,
            pending,
            subscribers,
            next_call_id: AtomicU64::new(1),
            closed,
            pump,
        }
    }

    /// Issue a call and await its single response.
    ///
    /// Returns immediately-pending work: the future settles only when the
    /// response with this call's ID arrives, the transport fails, or the
    /// bridge is shut down. Concurrent invocations are independent.
    pub async fn invoke<M: Method>(&self, args: M::Args) -> Result<M::Reply> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let args = args.into_values()?;
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let payload = WireMessage::Call { kind: M::KIND, call_id, args }.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id, tx);

        // The pump may close and drain the table between the check above and
        // this insert; re-check so the entry cannot be left to hang. If the
        // drain already caught it, the removal here is a no-op.
        if self.closed.load(Ordering::Acquire) {
            self.pending.remove(&call_id);
            return Err(Error::Closed);
        }

        if let Err(e) = self.transport.send(&payload).await {
            // Nothing went out, so nothing will come back: roll the entry
            // back instead of leaving it to hang forever.
            self.pending.remove(&call_id);
            return Err(Error::Transport(e));
        }

        match rx.await {
            Ok(outcome) => {
                let value = outcome?;
                serde_json::from_value(value).map_err(|e| Error::Codec(e.to_string()))
            }
            // The settlement sender is only ever dropped by teardown.
            Err(_) => Err(Error::Closed),
        }
    }

    /// Register `handler` for every future event of kind `M`.
    ///
    /// Handlers run on the pump task in transport arrival order. The returned
    /// [`Subscription`] revokes exactly this registration.
    pub fn subscribe<M, F>(&self, handler: F) -> Subscription
    where
        M: Method,
        F: Fn(M::Reply) + Send + Sync + 'static,
    {
        let callback: crate::registry::Callback = Arc::new(move |payload: &Value| {
            match serde_json::from_value::<M::Reply>(payload.clone()) {
                Ok(reply) => handler(reply),
                Err(e) => {
                    tracing::warn!(kind = %M::KIND, error = %e, "discarding undecodable event payload");
                }
            }
        });
        let token = self.subscribers.add(M::KIND, callback);
        Subscription { registry: self.subscribers.clone(), kind: M::KIND, token }
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Live subscriber registry, exposed for diagnostics.
    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Tear the bridge down: stop the pump, reject every pending call,
    /// drop every subscriber, and refuse new calls.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.pump.abort();
        Self::reject_all_pending(&self.pending, Error::Closed);
        self.subscribers.clear();
    }

    /// Route one inbound message. Never panics and never stops the pump:
    /// unexpected input is logged and dropped.
    fn handle_message(
        msg: &[u8],
        pending: &DashMap<u64, Settlement>,
        subscribers: &SubscriberRegistry,
    ) {
        let message = match WireMessage::decode(msg) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable inbound message");
                return;
            }
        };

        match message {
            WireMessage::Result { call_id, result } => {
                Self::settle(pending, call_id, Ok(result));
            }
            WireMessage::Error { call_id, error } => {
                Self::settle(pending, call_id, Err(Error::Remote(error)));
            }
            WireMessage::Event { kind, payload } => {
                subscribers.dispatch(kind, &payload);
            }
            WireMessage::Call { kind, call_id, .. } => {
                tracing::warn!(%kind, call_id, "call envelope arrived on the caller side, dropping");
            }
        }
    }

    /// Settle the pending call with `call_id` exactly once. A stale or
    /// unknown ID is expected under abandoned calls: log and discard.
    fn settle(pending: &DashMap<u64, Settlement>, call_id: u64, outcome: Result<Value>) {
        match pending.remove(&call_id) {
            Some((_, tx)) => {
                // Receiver dropped means the caller stopped waiting locally.
                let _ = tx.send(outcome);
            }
            None => {
                tracing::debug!(call_id, "stale response discarded");
            }
        }
    }

    /// Reject every pending call with the given error.
    fn reject_all_pending(pending: &DashMap<u64, Settlement>, error: Error) {
        let call_ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
        for call_id in call_ids {
            if let Some((_, tx)) = pending.remove(&call_id) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // The pump would otherwise sit in `recv` for the process lifetime.
        self.pump.abort();
    }
}
