//! In-process NGAP transport.
//!
//! [`MemoryTransport::pair`] returns two connected ends. Whatever one end
//! sends, the other receives with its stream id and PPID intact. Closing
//! either end ends both receive streams.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::trace;

use crate::transport::{NgapTransport, ReceivedMessage, Result, SctpError};

/// One end of an in-memory association.
pub struct MemoryTransport {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<ReceivedMessage>>>,
    rx: Mutex<mpsc::UnboundedReceiver<ReceivedMessage>>,
    closed: Arc<watch::Sender<bool>>,
}

impl MemoryTransport {
    /// Creates two connected transports, e.g. `("gnb", "amf")`.
    pub fn pair(a: &str, b: &str) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(watch::Sender::new(false));
        (
            Self {
                name: format!("{a}->{b}"),
                tx: Mutex::new(Some(a_tx)),
                rx: Mutex::new(a_rx),
                closed: Arc::clone(&closed),
            },
            Self {
                name: format!("{b}->{a}"),
                tx: Mutex::new(Some(b_tx)),
                rx: Mutex::new(b_rx),
                closed,
            },
        )
    }
}

#[async_trait]
impl NgapTransport for MemoryTransport {
    async fn send(&self, stream_id: u16, data: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(SctpError::AssociationClosed);
        }
        trace!(transport = %self.name, stream_id, len = data.len(), "memory send");
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or(SctpError::AssociationClosed)?;
        tx.send(ReceivedMessage::ngap(stream_id, data))
            .map_err(|_| SctpError::AssociationClosed)
    }

    async fn recv(&self) -> Result<Option<ReceivedMessage>> {
        let mut rx = self.rx.lock().await;
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }
        tokio::select! {
            msg = rx.recv() => Ok(msg),
            _ = closed.wait_for(|closed| *closed) => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        self.tx.lock().await.take();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}
