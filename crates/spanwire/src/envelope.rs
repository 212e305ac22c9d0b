//! # Envelopes
//!
//! The three shapes that cross the boundary: a call, its single response
//! (success or failure), and an unsolicited subscription event. Nothing else
//! is ever sent.
//!
//! ## Invariants
//!
//! - **One response per call**: a `Call` with `call_id` N is answered by
//!   exactly one `Result` or `Error` echoing N. Events carry no call ID.
//! - **Panic safety**: decoding returns `Result`, never panicking on
//!   unknown or malformed input.

use serde_json::Value;

use crate::catalog::Kind;
use crate::error::Result;
use crate::error::WireError;

/// A single wire message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// An outbound call. `args` always encodes the full argument tuple as an
    /// array, empty for zero-argument messages.
    Call { kind: Kind, call_id: u64, args: Vec<Value> },
    /// Successful response to the call with the same `call_id`.
    Result { call_id: u64, result: Value },
    /// Failure response to the call with the same `call_id`.
    Error { call_id: u64, error: WireError },
    /// Unsolicited push to all subscribers of `kind`. Never acknowledged.
    Event { kind: Kind, payload: Value },
}

impl WireMessage {
    /// Serialize for the transport.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a message received from the transport.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The call ID this message correlates on, if any.
    pub fn call_id(&self) -> Option<u64> {
        match self {
            Self::Call { call_id, .. }
            | Self::Result { call_id, .. }
            | Self::Error { call_id, .. } => Some(*call_id),
            Self::Event { .. } => None,
        }
    }
}
