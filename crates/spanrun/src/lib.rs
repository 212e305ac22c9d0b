//! # Spanrun
//!
//! The runtime halves of the renderer <-> platform bridge: the caller-side
//! [`Bridge`](bridge::Bridge) and the callee-side
//! [`Dispatcher`](dispatcher::Dispatcher), connected by an opaque
//! [`Transport`](transport::Transport).
//!
//! ## Architecture
//!
//! Both halves own a pump task that reads the transport. The bridge
//! demultiplexes responses onto pending calls by call ID and fans events out
//! to subscribers; the dispatcher routes calls to registered handlers and
//! answers each with exactly one response. Correctness rests on call-ID
//! matching alone, never on arrival order.

pub mod bridge;
pub mod dispatcher;
pub mod mock_transport;
pub mod registry;
pub mod transport;

pub use bridge::Bridge;
pub use dispatcher::Dispatcher;
pub use dispatcher::HandlerError;
pub use registry::Subscription;
pub use transport::Transport;

#[cfg(test)]
mod tests;
