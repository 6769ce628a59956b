//! NGAP transport layer for coretester
//!
//! This crate provides the [`NgapTransport`] abstraction used by the gNB
//! relay and two implementations of it:
//!
//! - [`SctpAssociation`]: SCTP over UDP using `sctp-proto`'s Sans-IO state
//!   machine, driven by one tokio task per association.
//! - [`MemoryTransport`]: a connected in-process pair, used to run a gNB
//!   against an in-process AMF.
//!
//! NGAP PDUs are sent with PPID 60. Stream 0 carries non-UE-associated
//! signalling; UE-associated signalling uses streams 1 and above.
//!
//! # Example (gNB connecting to AMF)
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use coretester_sctp::{NgapTransport, SctpAssociation, SctpConfig, NON_UE_STREAM};
//! use std::net::SocketAddr;
//!
//! async fn connect_to_amf() -> Result<(), Box<dyn std::error::Error>> {
//!     let amf_addr: SocketAddr = "192.168.1.1:38412".parse()?;
//!     let assoc = SctpAssociation::connect(amf_addr, SctpConfig::default()).await?;
//!
//!     assoc.send(NON_UE_STREAM, Bytes::from_static(b"NGAP message")).await?;
//!     if let Some(msg) = assoc.recv().await? {
//!         println!("Received on stream {}: {:?}", msg.stream_id, msg.data);
//!     }
//!
//!     assoc.close().await?;
//!     Ok(())
//! }
//! ```

pub mod association;
pub mod memory;
pub mod transport;

pub use association::{
    AssociationState, SctpAssociation, SctpConfig, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_NUM_STREAMS,
    DEFAULT_RECEIVE_BUFFER_SIZE,
};
pub use memory::MemoryTransport;
pub use transport::{ue_stream, NgapTransport, ReceivedMessage, Result, SctpError, NGAP_PPID, NON_UE_STREAM};
