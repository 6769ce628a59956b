//! NAS message headers (TS 24.501 9.1)
//!
//! ```text
//! plain 5GMM:   EPD | SHT | message type
//! plain 5GSM:   EPD | PDU session ID | PTI | message type
//! protected:    EPD | SHT | MAC (4) | SQN | plain NAS message
//! ```

use bytes::{Buf, BufMut};

use crate::codec::{ensure, CodecError, CodecResult};
use crate::enums::{ExtendedProtocolDiscriminator, MmMessageType, SecurityHeaderType, SmMessageType};

/// Plain 5GMM header, 3 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlainMmHeader {
    pub message_type: MmMessageType,
}

impl PlainMmHeader {
    pub const SIZE: usize = 3;

    pub fn new(message_type: MmMessageType) -> Self {
        Self { message_type }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(ExtendedProtocolDiscriminator::MobilityManagement.into());
        buf.put_u8(SecurityHeaderType::NotProtected.into());
        buf.put_u8(self.message_type.into());
    }

    pub fn decode<B: Buf>(buf: &mut B) -> CodecResult<Self> {
        ensure(buf, Self::SIZE)?;
        let epd = buf.get_u8();
        if epd != u8::from(ExtendedProtocolDiscriminator::MobilityManagement) {
            return Err(CodecError::InvalidProtocolDiscriminator(epd));
        }
        let sht = buf.get_u8() & 0x0F;
        if sht != 0 {
            return Err(CodecError::InvalidSecurityHeaderType(sht));
        }
        let mt = buf.get_u8();
        let message_type = MmMessageType::try_from(mt).map_err(|_| CodecError::InvalidMessageType(mt))?;
        Ok(Self { message_type })
    }
}

/// Plain 5GSM header, 4 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlainSmHeader {
    pub pdu_session_id: u8,
    /// Procedure transaction identity
    pub pti: u8,
    pub message_type: SmMessageType,
}

impl PlainSmHeader {
    pub const SIZE: usize = 4;

    pub fn new(pdu_session_id: u8, pti: u8, message_type: SmMessageType) -> Self {
        Self {
            pdu_session_id,
            pti,
            message_type,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(ExtendedProtocolDiscriminator::SessionManagement.into());
        buf.put_u8(self.pdu_session_id);
        buf.put_u8(self.pti);
        buf.put_u8(self.message_type.into());
    }

    pub fn decode<B: Buf>(buf: &mut B) -> CodecResult<Self> {
        ensure(buf, Self::SIZE)?;
        let epd = buf.get_u8();
        if epd != u8::from(ExtendedProtocolDiscriminator::SessionManagement) {
            return Err(CodecError::InvalidProtocolDiscriminator(epd));
        }
        let pdu_session_id = buf.get_u8();
        let pti = buf.get_u8();
        let mt = buf.get_u8();
        let message_type = SmMessageType::try_from(mt).map_err(|_| CodecError::InvalidMessageType(mt))?;
        Ok(Self {
            pdu_session_id,
            pti,
            message_type,
        })
    }
}

/// Security protected 5GMM header, 7 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecuredHeader {
    pub security_header_type: SecurityHeaderType,
    pub mac: [u8; 4],
    pub sequence_number: u8,
}

impl SecuredHeader {
    pub const SIZE: usize = 7;

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(ExtendedProtocolDiscriminator::MobilityManagement.into());
        buf.put_u8(self.security_header_type.into());
        buf.put_slice(&self.mac);
        buf.put_u8(self.sequence_number);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> CodecResult<Self> {
        ensure(buf, Self::SIZE)?;
        let epd = buf.get_u8();
        if epd != u8::from(ExtendedProtocolDiscriminator::MobilityManagement) {
            return Err(CodecError::InvalidProtocolDiscriminator(epd));
        }
        let sht = buf.get_u8() & 0x0F;
        let security_header_type =
            SecurityHeaderType::try_from(sht).map_err(|_| CodecError::InvalidSecurityHeaderType(sht))?;
        let mut mac = [0u8; 4];
        buf.copy_to_slice(&mut mac);
        let sequence_number = buf.get_u8();
        Ok(Self {
            security_header_type,
            mac,
            sequence_number,
        })
    }
}

/// Reads the EPD and security header type of a 5GMM message without consuming it.
///
/// 5GSM messages always report [`SecurityHeaderType::NotProtected`].
pub fn peek_security_header_type(data: &[u8]) -> CodecResult<SecurityHeaderType> {
    if data.len() < 2 {
        return Err(CodecError::BufferTooShort {
            expected: 2,
            actual: data.len(),
        });
    }
    match ExtendedProtocolDiscriminator::try_from(data[0]) {
        Ok(ExtendedProtocolDiscriminator::MobilityManagement) => {
            let sht = data[1] & 0x0F;
            SecurityHeaderType::try_from(sht).map_err(|_| CodecError::InvalidSecurityHeaderType(sht))
        }
        Ok(ExtendedProtocolDiscriminator::SessionManagement) => Ok(SecurityHeaderType::NotProtected),
        Err(_) => Err(CodecError::InvalidProtocolDiscriminator(data[0])),
    }
}
