//! In-memory transports for tests and same-process wiring.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

/// A duplex channel transport over tokio mpsc channels.
///
/// Messages sent on one side of a [`pair`](Self::pair) appear on the other
/// side's `recv` in order. Dropping one side closes the other's receive
/// stream, which is how tests simulate the process on the far side dying.
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl DuplexChannelTransport {
    /// Create a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self { tx: tx_a, rx: Arc::new(Mutex::new(rx_b)) };
        let b = Self { tx: tx_b, rx: Arc::new(Mutex::new(rx_a)) };

        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// A transport whose sends always fail and whose receive stream never ends.
///
/// Exercises the delivery-failure path without closing the pump.
pub struct DeadTransport;

#[async_trait::async_trait]
impl Transport for DeadTransport {
    async fn send(&self, _payload: &[u8]) -> transport::Result<()> {
        Err(transport::Error::ConnectionLost("peer unreachable".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        std::future::pending().await
    }
}
