//! NAS IE codec helpers
//!
//! 5GS IEs come in the formats of TS 24.007 11.2: V / TV half-octet (type 1),
//! TV with fixed length (type 3), TLV with one length octet (type 4) and
//! TLV-E with two length octets (type 6). Messages decode their mandatory
//! part field by field and hand the optional tail to [`OptionalIes`].

use bytes::{Buf, BufMut};
use thiserror::Error;

/// NAS codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Length {length} exceeds remaining buffer {remaining}")]
    LengthExceedsBuffer { length: usize, remaining: usize },

    #[error("Missing mandatory IE: {0}")]
    MissingIe(&'static str),

    #[error("Invalid extended protocol discriminator: 0x{0:02X}")]
    InvalidProtocolDiscriminator(u8),

    #[error("Invalid message type: 0x{0:02X}")]
    InvalidMessageType(u8),

    #[error("Invalid security header type: 0x{0:02X}")]
    InvalidSecurityHeaderType(u8),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Result alias for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Fails unless `buf` holds at least `n` more bytes.
pub fn ensure<B: Buf>(buf: &B, n: usize) -> CodecResult<()> {
    if buf.remaining() < n {
        return Err(CodecError::BufferTooShort {
            expected: n,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

pub fn get_u8<B: Buf>(buf: &mut B) -> CodecResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_bytes<B: Buf>(buf: &mut B, len: usize) -> CodecResult<Vec<u8>> {
    if buf.remaining() < len {
        return Err(CodecError::LengthExceedsBuffer {
            length: len,
            remaining: buf.remaining(),
        });
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn get_array<B: Buf, const N: usize>(buf: &mut B) -> CodecResult<[u8; N]> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a value with a one-octet length prefix (LV).
pub fn get_lv<B: Buf>(buf: &mut B) -> CodecResult<Vec<u8>> {
    let len = get_u8(buf)? as usize;
    get_bytes(buf, len)
}

/// Reads a value with a two-octet length prefix (LV-E).
pub fn get_lve<B: Buf>(buf: &mut B) -> CodecResult<Vec<u8>> {
    ensure(buf, 2)?;
    let len = buf.get_u16() as usize;
    get_bytes(buf, len)
}

pub fn put_lv<B: BufMut>(buf: &mut B, value: &[u8]) -> CodecResult<()> {
    let len = u8::try_from(value.len()).map_err(|_| {
        CodecError::EncodingError(format!("LV length {} exceeds 255", value.len()))
    })?;
    buf.put_u8(len);
    buf.put_slice(value);
    Ok(())
}

pub fn put_lve<B: BufMut>(buf: &mut B, value: &[u8]) -> CodecResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        CodecError::EncodingError(format!("LV-E length {} exceeds 65535", value.len()))
    })?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

/// Writes a type 4 IE.
pub fn put_tlv<B: BufMut>(buf: &mut B, iei: u8, value: &[u8]) -> CodecResult<()> {
    buf.put_u8(iei);
    put_lv(buf, value)
}

/// Writes a type 6 IE.
pub fn put_tlve<B: BufMut>(buf: &mut B, iei: u8, value: &[u8]) -> CodecResult<()> {
    buf.put_u8(iei);
    put_lve(buf, value)
}

/// Writes a type 1 IE: IEI in the high nibble, value in the low nibble.
pub fn put_tv1<B: BufMut>(buf: &mut B, iei: u8, value: u8) {
    buf.put_u8((iei & 0xF0) | (value & 0x0F));
}

/// The optional IEs of a message, in wire order.
///
/// Type 1 and type 2 IEs (IEI octet ≥ 0x80) are keyed by their high nibble and
/// hold the low nibble as a one-octet value. IEIs 0x70-0x7F are TLV-E. IEIs
/// listed in `fixed` are TV with the given value length. Anything else is TLV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionalIes {
    ies: Vec<(u8, Vec<u8>)>,
}

impl OptionalIes {
    pub fn decode<B: Buf>(buf: &mut B, fixed: &[(u8, usize)]) -> CodecResult<Self> {
        let mut ies = Vec::new();
        while buf.has_remaining() {
            let iei = buf.get_u8();
            if iei >= 0x80 {
                ies.push((iei & 0xF0, vec![iei & 0x0F]));
                continue;
            }
            let value = if let Some(&(_, len)) = fixed.iter().find(|(id, _)| *id == iei) {
                get_bytes(buf, len)?
            } else if (0x70..=0x7F).contains(&iei) {
                get_lve(buf)?
            } else {
                get_lv(buf)?
            };
            ies.push((iei, value));
        }
        Ok(Self { ies })
    }

    /// Value of the first IE with this IEI.
    pub fn get(&self, iei: u8) -> Option<&[u8]> {
        self.ies
            .iter()
            .find(|(id, _)| *id == iei)
            .map(|(_, v)| v.as_slice())
    }

    /// Low nibble of a type 1 IE; `iei` is the high nibble, e.g. `0xE0`.
    pub fn half(&self, iei: u8) -> Option<u8> {
        self.get(iei & 0xF0).and_then(|v| v.first().copied())
    }

    pub fn contains(&self, iei: u8) -> bool {
        self.get(iei).is_some()
    }

    pub fn len(&self) -> usize {
        self.ies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ies.is_empty()
    }
}
