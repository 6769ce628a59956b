//! GTP-U (GPRS Tunneling Protocol - User Plane) library
//!
//! Implements GTP-U header encoding/decoding with the PDU Session Container
//! extension (3GPP TS 29.281, TS 38.415) and the gNB side tunnel manager.
//!
//! # Example
//!
//! ```
//! use coretester_gtp::codec::{GtpMessage, GtpMessageType};
//! use bytes::Bytes;
//!
//! // G-PDU carrying an uplink packet for QFI 1
//! let message = GtpMessage::uplink(0x12345678, 1, Bytes::from_static(b"user data"));
//! let encoded = message.encode().unwrap();
//!
//! let decoded = GtpMessage::decode(&encoded).unwrap();
//! assert_eq!(decoded.message_type, GtpMessageType::GPdu);
//! assert_eq!(decoded.teid, 0x12345678);
//! assert_eq!(decoded.qfi(), Some(1));
//! ```

pub mod codec;
pub mod device;
pub mod tunnel;

pub use codec::{
    GtpError, GtpMessage, GtpMessageType, PduSessionInformation, GTP_PROTOCOL_TYPE, GTP_VERSION,
};
pub use device::{
    DeviceEvent, DeviceSpec, MemoryDevice, MemoryHost, PacketPort, TunDevice, TunnelDevice,
    MAX_INTERFACE_NAME_LEN,
};
pub use tunnel::{TunnelConfig, TunnelError, TunnelHandle, TunnelManager, TunnelStats, GTP_U_PORT};
