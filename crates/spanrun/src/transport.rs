//! # Transport Abstraction
//!
//! A minimal async interface for moving bytes across the process boundary.
//!
//! ## Philosophy
//!
//! - **Byte-oriented**: the transport knows nothing about envelopes or the
//!   catalog. It moves opaque buffers.
//! - **Fire-and-forget**: `send` resolves when the payload is handed off,
//!   not when the other side has acted on it. Correlation happens a layer
//!   above, by call ID.

use std::fmt;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The other side is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One side of a bidirectional, message-oriented byte channel.
///
/// Object-safe (`Arc<dyn Transport>`).
///
/// # Invariants
/// - `send` must either deliver the whole payload as one message or fail.
/// - `recv` returns `Ok(None)` exactly once, when the channel is closed.
/// - Messages sent from one side in sequence arrive in that sequence.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queue one payload for delivery to the other side.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receive the next payload from the other side.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
