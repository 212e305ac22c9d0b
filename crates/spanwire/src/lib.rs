//! # Spanwire
//!
//! The wire vocabulary shared by both sides of the renderer <-> platform
//! boundary: the message catalog, the envelope shapes, and the failure
//! enumeration.
//!
//! ## Architecture
//!
//! This crate has no runtime component. It is the single source of truth for
//! what may cross the boundary: every message kind, its argument tuple, and
//! its reply type are declared once in [`catalog`], and both the bridge and
//! the dispatcher are compiled against those declarations. The three envelope
//! shapes in [`envelope`] are the entire protocol.

pub mod catalog;
pub mod envelope;
pub mod error;
pub mod payload;

pub use catalog::ArgTuple;
pub use catalog::Kind;
pub use catalog::Method;
pub use envelope::WireMessage;
pub use error::Error;
pub use error::Result;
pub use error::WireError;
