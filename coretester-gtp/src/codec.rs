//! GTP-U message encoding/decoding
//!
//! Implements the GTPv1-U header of 3GPP TS 29.281, the PDU Session Container
//! extension header of TS 38.415 (which carries the QFI on N3), and the Echo
//! Request/Response path management messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// GTP-U protocol version (always 1)
pub const GTP_VERSION: u8 = 1;

/// GTP-U protocol type (1 for GTP-U, 0 for GTP')
pub const GTP_PROTOCOL_TYPE: u8 = 1;

/// Recovery IE type, mandatory (and ignored) in Echo Response
const IE_RECOVERY: u8 = 14;

const FLAG_E: u8 = 0x04;
const FLAG_S: u8 = 0x02;
const FLAG_PN: u8 = 0x01;

const EXT_NO_MORE: u8 = 0x00;
const EXT_PDU_SESSION_CONTAINER: u8 = 0x85;

/// GTP-U Message Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GtpMessageType {
    EchoRequest = 1,
    EchoResponse = 2,
    ErrorIndication = 26,
    EndMarker = 254,
    /// G-PDU (user data, a.k.a. T-PDU)
    GPdu = 255,
}

impl GtpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::EchoRequest),
            2 => Some(Self::EchoResponse),
            26 => Some(Self::ErrorIndication),
            254 => Some(Self::EndMarker),
            255 => Some(Self::GPdu),
            _ => None,
        }
    }
}

/// GTP-U codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GtpError {
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },
    #[error("invalid GTP version: {0}, expected 1")]
    InvalidVersion(u8),
    #[error("invalid protocol type: {0}, expected 1 for GTP-U")]
    InvalidProtocolType(u8),
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),
    /// Unknown extension header whose type demands comprehension
    #[error("unsupported extension header type: {0:#x}")]
    UnsupportedExtHeader(u8),
    #[error("invalid extension header length: {0}")]
    InvalidExtHeaderLength(u8),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Direction-specific content of the PDU Session Container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduSessionInformation {
    /// DL PDU SESSION INFORMATION (PDU type 0)
    Downlink { qfi: u8, rqi: bool },
    /// UL PDU SESSION INFORMATION (PDU type 1)
    Uplink { qfi: u8 },
}

impl PduSessionInformation {
    pub fn qfi(&self) -> u8 {
        match self {
            Self::Downlink { qfi, .. } | Self::Uplink { qfi } => *qfi,
        }
    }

    fn encode_to(&self, buf: &mut BytesMut) {
        match self {
            Self::Downlink { qfi, rqi } => {
                buf.put_u8(0x00);
                buf.put_u8((if *rqi { 0x40 } else { 0 }) | (qfi & 0x3F));
            }
            Self::Uplink { qfi } => {
                buf.put_u8(0x10);
                buf.put_u8(qfi & 0x3F);
            }
        }
    }

    fn decode(content: &[u8]) -> Result<Self, GtpError> {
        if content.len() < 2 {
            return Err(GtpError::BufferTooShort {
                needed: 2,
                available: content.len(),
            });
        }
        let qfi = content[1] & 0x3F;
        match content[0] >> 4 {
            0 => Ok(Self::Downlink {
                qfi,
                rqi: content[1] & 0x40 != 0,
            }),
            _ => Ok(Self::Uplink { qfi }),
        }
    }
}

/// A GTP-U message: header fields, the optional PDU session container and the payload.
///
/// The fixed header is 8 bytes (flags, type, length, TEID). When any of the
/// E/S/PN flags is set four more bytes follow: sequence number, N-PDU number
/// and the next extension header type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpMessage {
    pub message_type: GtpMessageType,
    pub teid: u32,
    pub sequence_number: Option<u16>,
    pub n_pdu_number: Option<u8>,
    pub pdu_session: Option<PduSessionInformation>,
    pub payload: Bytes,
}

impl GtpMessage {
    /// Fixed header size
    pub const MIN_HEADER_SIZE: usize = 8;

    pub fn new(message_type: GtpMessageType, teid: u32, payload: Bytes) -> Self {
        Self {
            message_type,
            teid,
            sequence_number: None,
            n_pdu_number: None,
            pdu_session: None,
            payload,
        }
    }

    /// Create a G-PDU carrying one user IP packet
    pub fn g_pdu(teid: u32, payload: Bytes) -> Self {
        Self::new(GtpMessageType::GPdu, teid, payload)
    }

    /// Uplink G-PDU tagged with the QoS flow it belongs to
    pub fn uplink(teid: u32, qfi: u8, payload: Bytes) -> Self {
        Self::g_pdu(teid, payload).with_pdu_session(PduSessionInformation::Uplink { qfi })
    }

    /// Echo Request; TEID is always 0 for path management
    pub fn echo_request(sequence_number: u16) -> Self {
        Self::new(GtpMessageType::EchoRequest, 0, Bytes::new()).with_sequence_number(sequence_number)
    }

    /// Echo Response answering `request`
    pub fn echo_response(request: &GtpMessage) -> Self {
        Self::new(
            GtpMessageType::EchoResponse,
            0,
            Bytes::from_static(&[IE_RECOVERY, 0]),
        )
        .with_sequence_number(request.sequence_number.unwrap_or(0))
    }

    pub fn with_sequence_number(mut self, seq: u16) -> Self {
        self.sequence_number = Some(seq);
        self
    }

    pub fn with_n_pdu_number(mut self, n_pdu: u8) -> Self {
        self.n_pdu_number = Some(n_pdu);
        self
    }

    pub fn with_pdu_session(mut self, info: PduSessionInformation) -> Self {
        self.pdu_session = Some(info);
        self
    }

    /// QFI from the PDU session container, if present
    pub fn qfi(&self) -> Option<u8> {
        self.pdu_session.map(|info| info.qfi())
    }

    fn has_optional_fields(&self) -> bool {
        self.sequence_number.is_some() || self.n_pdu_number.is_some() || self.pdu_session.is_some()
    }

    /// Value of the length field: everything after the TEID
    fn body_len(&self) -> usize {
        let mut length = self.payload.len();
        if self.has_optional_fields() {
            length += 4;
        }
        if self.pdu_session.is_some() {
            // length(1) + two content octets + next type(1)
            length += 4;
        }
        length
    }

    pub fn encoded_size(&self) -> usize {
        Self::MIN_HEADER_SIZE + self.body_len()
    }

    pub fn encode(&self) -> Result<BytesMut, GtpError> {
        let body_len = self.body_len();
        let length = u16::try_from(body_len).map_err(|_| GtpError::PayloadTooLarge(body_len))?;

        let mut buf = BytesMut::with_capacity(Self::MIN_HEADER_SIZE + body_len);
        let flags = (GTP_VERSION << 5)
            | (GTP_PROTOCOL_TYPE << 4)
            | (if self.pdu_session.is_some() { FLAG_E } else { 0 })
            | (if self.sequence_number.is_some() { FLAG_S } else { 0 })
            | (if self.n_pdu_number.is_some() { FLAG_PN } else { 0 });

        buf.put_u8(flags);
        buf.put_u8(self.message_type as u8);
        buf.put_u16(length);
        buf.put_u32(self.teid);

        if self.has_optional_fields() {
            buf.put_u16(self.sequence_number.unwrap_or(0));
            buf.put_u8(self.n_pdu_number.unwrap_or(0));
            match &self.pdu_session {
                Some(info) => {
                    buf.put_u8(EXT_PDU_SESSION_CONTAINER);
                    buf.put_u8(1);
                    info.encode_to(&mut buf);
                    buf.put_u8(EXT_NO_MORE);
                }
                None => buf.put_u8(EXT_NO_MORE),
            }
        }

        buf.put_slice(&self.payload);
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, GtpError> {
        if data.len() < Self::MIN_HEADER_SIZE {
            return Err(GtpError::BufferTooShort {
                needed: Self::MIN_HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut buf = data;
        let flags = buf.get_u8();
        let version = (flags >> 5) & 0x07;
        let protocol_type = (flags >> 4) & 0x01;
        if version != GTP_VERSION {
            return Err(GtpError::InvalidVersion(version));
        }
        if protocol_type != GTP_PROTOCOL_TYPE {
            return Err(GtpError::InvalidProtocolType(protocol_type));
        }

        let raw_type = buf.get_u8();
        let message_type =
            GtpMessageType::from_u8(raw_type).ok_or(GtpError::InvalidMessageType(raw_type))?;
        let length = buf.get_u16() as usize;
        let teid = buf.get_u32();

        if buf.remaining() < length {
            return Err(GtpError::BufferTooShort {
                needed: Self::MIN_HEADER_SIZE + length,
                available: data.len(),
            });
        }
        // Trailing bytes beyond the length field are not part of this message.
        let mut body = &buf[..length];

        let mut message = Self::new(message_type, teid, Bytes::new());

        if flags & (FLAG_E | FLAG_S | FLAG_PN) != 0 {
            if body.remaining() < 4 {
                return Err(GtpError::BufferTooShort {
                    needed: Self::MIN_HEADER_SIZE + 4,
                    available: Self::MIN_HEADER_SIZE + body.remaining(),
                });
            }
            let seq = body.get_u16();
            let n_pdu = body.get_u8();
            let mut next_type = body.get_u8();
            if flags & FLAG_S != 0 {
                message.sequence_number = Some(seq);
            }
            if flags & FLAG_PN != 0 {
                message.n_pdu_number = Some(n_pdu);
            }
            if flags & FLAG_E == 0 {
                next_type = EXT_NO_MORE;
            }

            while next_type != EXT_NO_MORE {
                let units = *body.first().ok_or(GtpError::BufferTooShort {
                    needed: 1,
                    available: 0,
                })? as usize;
                if units == 0 {
                    return Err(GtpError::InvalidExtHeaderLength(0));
                }
                let total = units * 4;
                if body.len() < total {
                    return Err(GtpError::BufferTooShort {
                        needed: total,
                        available: body.len(),
                    });
                }
                let content = &body[1..total - 1];
                match next_type {
                    EXT_PDU_SESSION_CONTAINER => {
                        message.pdu_session = Some(PduSessionInformation::decode(content)?);
                    }
                    // The two high bits say whether the receiver must understand it.
                    other if other & 0x80 != 0 => return Err(GtpError::UnsupportedExtHeader(other)),
                    _ => {}
                }
                next_type = body[total - 1];
                body.advance(total);
            }
        }

        message.payload = Bytes::copy_from_slice(body);
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_g_pdu_header_bytes() {
        let encoded = GtpMessage::g_pdu(0x62CC_224C, Bytes::from_static(b"hello"))
            .encode()
            .unwrap();
        assert_eq!(&encoded[..8], &[0x30, 0xFF, 0x00, 0x05, 0x62, 0xCC, 0x22, 0x4C]);
        assert_eq!(&encoded[8..], b"hello");

        let decoded = GtpMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.message_type, GtpMessageType::GPdu);
        assert_eq!(decoded.teid, 0x62CC_224C);
        assert_eq!(decoded.sequence_number, None);
        assert_eq!(decoded.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_uplink_pdu_session_container() {
        let encoded = GtpMessage::uplink(1, 9, Bytes::from_static(b"ip")).encode().unwrap();
        assert_eq!(encoded[0], 0x34);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), 10);
        assert_eq!(&encoded[8..16], &[0x00, 0x00, 0x00, 0x85, 0x01, 0x10, 0x09, 0x00]);

        let decoded = GtpMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.qfi(), Some(9));
        assert_eq!(decoded.pdu_session, Some(PduSessionInformation::Uplink { qfi: 9 }));
        assert_eq!(decoded.payload, Bytes::from_static(b"ip"));
    }

    #[test]
    fn test_decode_downlink_container_from_upf() {
        // G-PDU with E flag, DL PDU session information QFI 1.
        let data = hex_bytes("34ff000a0000000100000085010001004500");
        let decoded = GtpMessage::decode(&data).unwrap();
        assert_eq!(decoded.teid, 1);
        assert_eq!(
            decoded.pdu_session,
            Some(PduSessionInformation::Downlink { qfi: 1, rqi: false })
        );
        assert_eq!(&decoded.payload[..], &[0x45, 0x00]);
    }

    #[test]
    fn test_echo_response_mirrors_sequence() {
        let request = GtpMessage::echo_request(0x1234);
        let encoded = request.encode().unwrap();
        assert_eq!(encoded[0], 0x32);
        let decoded = GtpMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.message_type, GtpMessageType::EchoRequest);

        let response = GtpMessage::echo_response(&decoded);
        let decoded = GtpMessage::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.message_type, GtpMessageType::EchoResponse);
        assert_eq!(decoded.sequence_number, Some(0x1234));
        assert_eq!(&decoded.payload[..], &[IE_RECOVERY, 0]);
    }

    #[test]
    fn test_unknown_optional_ext_header_is_skipped() {
        // UDP port extension (0x40, comprehension not required) then payload.
        let data = hex_bytes("34ff0009000000070000004001086800aa");
        let decoded = GtpMessage::decode(&data).unwrap();
        assert_eq!(decoded.pdu_session, None);
        assert_eq!(&decoded.payload[..], &[0xAA]);
    }

    #[test]
    fn test_unknown_required_ext_header_is_rejected() {
        let data = hex_bytes("34ff000800000007000000c101000000");
        assert_eq!(
            GtpMessage::decode(&data),
            Err(GtpError::UnsupportedExtHeader(0xC1))
        );
    }

    #[test]
    fn test_decode_invalid_version() {
        let data = [0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(GtpMessage::decode(&data), Err(GtpError::InvalidVersion(0)));
    }

    #[test]
    fn test_decode_invalid_protocol_type() {
        let data = [0x20, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(GtpMessage::decode(&data), Err(GtpError::InvalidProtocolType(0)));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            GtpMessage::decode(&[0x30, 0xFF, 0x00]),
            Err(GtpError::BufferTooShort { .. })
        ));
        // Length field claims more than is present.
        assert!(matches!(
            GtpMessage::decode(&[0x30, 0xFF, 0x00, 0x10, 0, 0, 0, 1, 0xAA]),
            Err(GtpError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_large_payload() {
        let payload = Bytes::from(vec![0xAB; 1500]);
        let encoded = GtpMessage::g_pdu(0x12345678, payload.clone()).encode().unwrap();
        assert_eq!(GtpMessage::decode(&encoded).unwrap().payload, payload);

        let oversized = GtpMessage::g_pdu(1, Bytes::from(vec![0; 70_000]));
        assert!(matches!(oversized.encode(), Err(GtpError::PayloadTooLarge(_))));
    }

    fn hex_bytes(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }
}
