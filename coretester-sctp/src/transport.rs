//! Transport abstraction carried by the gNB NGAP relay.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// NGAP Payload Protocol Identifier (PPID) as defined in 3GPP TS 38.412
pub const NGAP_PPID: u32 = 60;

/// Stream used for non-UE-associated signalling (NG Setup, NG Reset, Paging).
pub const NON_UE_STREAM: u16 = 0;

/// SCTP transport errors
#[derive(Debug, Error)]
pub enum SctpError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Association closed")]
    AssociationClosed,
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for SCTP operations
pub type Result<T> = std::result::Result<T, SctpError>;

/// Message received on an association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub stream_id: u16,
    pub data: Bytes,
    pub ppid: u32,
}

impl ReceivedMessage {
    /// Wraps NGAP bytes received on `stream_id`.
    pub fn ngap(stream_id: u16, data: Bytes) -> Self {
        Self {
            stream_id,
            data,
            ppid: NGAP_PPID,
        }
    }
}

/// A message-oriented, multi-stream transport toward one NGAP peer.
///
/// `recv` is meant for a single reader task; `send` may be called from any
/// number of tasks concurrently. After `close`, the reader observes
/// `Ok(None)`.
#[async_trait]
pub trait NgapTransport: Send + Sync {
    /// Sends one NGAP PDU on `stream_id` with PPID 60.
    async fn send(&self, stream_id: u16, data: Bytes) -> Result<()>;

    /// Waits for the next message, or `None` once the peer or the local side closed.
    async fn recv(&self) -> Result<Option<ReceivedMessage>>;

    /// Shuts the transport down and unblocks the reader.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Human readable peer description for logs.
    fn peer(&self) -> String;
}

/// Stream for a UE-associated message: UEs are spread over streams
/// `1..num_streams`, never on the non-UE stream 0.
pub fn ue_stream(ran_ue_ngap_id: u32, num_streams: u16) -> u16 {
    if num_streams <= 1 {
        return 1;
    }
    let ue_streams = u32::from(num_streams - 1);
    // Truncation is safe: the value is below num_streams.
    (1 + ran_ue_ngap_id % ue_streams) as u16
}
