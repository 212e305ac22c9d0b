//! # Error Definitions
//!
//! Two distinct families live here, and keeping them apart matters:
//!
//! - [`Error`] is mechanism failure: an envelope or payload that could not be
//!   encoded or decoded on the local side. It never crosses the wire.
//! - [`WireError`] is the serialized failure carried inside a failure
//!   response. The receiving side can match on its `code` discriminant
//!   without inspecting payload shapes.

use crate::catalog::Kind;

/// Local (de)serialization failures within the wire layer itself.
#[derive(Debug)]
pub enum Error {
    /// JSON encoding or decoding of an envelope or payload failed.
    Codec(serde_json::Error),
    /// An argument list did not have the arity the catalog declares.
    ArityMismatch { kind: Kind, expected: usize, got: usize },
    /// A single argument failed to decode into its declared type.
    ArgumentDecode { kind: Kind, index: usize, detail: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec failure: {}", e),
            Self::ArityMismatch { kind, expected, got } => {
                write!(f, "{} expects {} argument(s), got {}", kind, expected, got)
            }
            Self::ArgumentDecode { kind, index, detail } => {
                write!(f, "{} argument {} did not decode: {}", kind, index, detail)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e)
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The failure half of a response envelope.
///
/// These describe the *remote* side failing a call, as opposed to [`Error`],
/// which describes the local machinery failing. Transport loss and stale
/// responses are caller-local conditions and deliberately have no variant
/// here: they are never serialized.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "code")]
pub enum WireError {
    /// The arguments did not match the catalog signature for the kind.
    ArgumentMismatch { kind: Kind, detail: String },
    /// The dispatcher has no handler bound for the kind.
    UnknownMessageKind { kind: Kind },
    /// The handler ran and failed; its message is carried verbatim.
    HandlerFailure { detail: String },
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArgumentMismatch { kind, detail } => {
                write!(f, "argument mismatch for {}: {}", kind, detail)
            }
            Self::UnknownMessageKind { kind } => write!(f, "no handler for {}", kind),
            Self::HandlerFailure { detail } => write!(f, "handler failed: {}", detail),
        }
    }
}

impl std::error::Error for WireError {}
