//! NAS (Non-Access Stratum) protocol library
//!
//! Encodes and decodes the 5GMM and 5GSM messages the UE engine exchanges
//! with the AMF (3GPP TS 24.501), plus the per-message security steps.
//!
//! # Message Structure
//!
//! - [`PlainMmHeader`]: plain 5GMM header (3 bytes)
//! - [`PlainSmHeader`]: plain 5GSM header (4 bytes)
//! - [`SecuredHeader`]: security protected header (7 bytes)
//!
//! Messages implement [`MmMessage`] or [`SmMessage`]; [`NasMessage::decode`]
//! dispatches a plain message to its type.
//!
//! # Example
//!
//! ```rust
//! use coretester_nas::{MmMessage, NasMessage, RegistrationComplete};
//!
//! let bytes = RegistrationComplete.encode().unwrap();
//! assert_eq!(bytes, [0x7E, 0x00, 0x43]);
//! assert!(matches!(NasMessage::decode(&bytes), Ok(NasMessage::RegistrationComplete(_))));
//! ```

pub mod codec;
pub mod enums;
pub mod header;
pub mod ies;
pub mod messages;
pub mod security;

pub use codec::{CodecError, CodecResult};
pub use enums::{
    ExtendedProtocolDiscriminator, IdentityType, MessageType, MmCause, MmMessageType, PayloadContainerType,
    PduSessionType, RegistrationType, RequestType, SecurityHeaderType, ServiceType, SmCause, SmMessageType,
};
pub use header::{peek_security_header_type, PlainMmHeader, PlainSmHeader, SecuredHeader};
pub use ies::{
    MobileIdentity, NasKeySetIdentifier, NasSecurityAlgorithms, PduAddress, PduSessionStatus,
    ProtocolConfigurationOptions, QosFlowDescription, QosRule, RegistrationTypeIe, SessionAmbr,
    UeSecurityCapability,
};
pub use messages::*;
pub use security::{
    cipher_nas_payload, compute_nas_mac, NasCount, NasDirection, ProtectionParams, SecuredNasMessage,
    SecurityError, NAS_BEARER, NAS_KEY_SIZE,
};
