//! NGAP (NG Application Protocol) library
//!
//! Implements the aligned PER encoding of the NGAP messages exchanged
//! between the gNB and the AMF.
//!
//! # Modules
//!
//! - `per` - Aligned PER bit-level encoder and decoder
//! - `codec` - NGAP PDU framing and protocol IE containers
//! - `ies` - Typed information element codecs
//! - `transfer` - PDU session transfers carried as nested octet strings
//! - `procedures` - High-level NGAP procedure implementations

pub mod codec;
pub mod ies;
pub mod per;
pub mod procedures;
pub mod transfer;

pub use codec::{
    decode_ngap_pdu, encode_ngap_pdu, Criticality, IeContainer, NgapError, NgapPdu, NgapResult, Presence,
    ProcedureCode,
};
pub use per::{PerDecoder, PerEncoder, PerError};
