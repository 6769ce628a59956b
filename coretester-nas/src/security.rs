//! NAS message protection primitives (TS 33.501 6.4, TS 24.501 4.4)
//!
//! The security context itself (keys, selected algorithms, the two COUNTs)
//! belongs to its owner; this module provides the COUNT arithmetic and the
//! per-message protect / verify / decipher steps built on
//! [`coretester_crypto`].

use bytes::BufMut;
use coretester_crypto::{CipheringAlgorithm, IntegrityAlgorithm};
use thiserror::Error;

use crate::codec::{CodecError, CodecResult};
use crate::enums::SecurityHeaderType;
use crate::header::SecuredHeader;

/// NAS bearer identity used as BEARER input to NEA/NIA for 3GPP access.
pub const NAS_BEARER: u8 = 1;

/// Key size of KNASint / KNASenc
pub const NAS_KEY_SIZE: usize = 16;

/// NAS security errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// The received NAS-MAC does not match the computed one
    #[error("NAS MAC verification failed: received {received}, computed {computed}")]
    MacVerificationFailed { received: String, computed: String },

    /// A protected operation was asked for a plain header type
    #[error("Security header type {0:?} cannot be used here")]
    UnsupportedHeaderType(SecurityHeaderType),

    /// No NAS security context has been established yet
    #[error("NAS security context not established")]
    NoSecurityContext,

    #[error("NAS codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Direction input of NEA/NIA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NasDirection {
    Uplink = 0,
    Downlink = 1,
}

/// NAS COUNT: 24-bit overflow counter and 8-bit sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NasCount {
    /// Overflow counter, 24 bits
    pub overflow: u32,
    /// Sequence number sent on the wire
    pub sqn: u8,
}

impl NasCount {
    const OVERFLOW_MASK: u32 = 0x00FF_FFFF;

    pub fn new(overflow: u32, sqn: u8) -> Self {
        Self {
            overflow: overflow & Self::OVERFLOW_MASK,
            sqn,
        }
    }

    /// Value used as COUNT input: `0x00 || overflow || sqn`.
    pub fn to_u32(&self) -> u32 {
        ((self.overflow & Self::OVERFLOW_MASK) << 8) | u32::from(self.sqn)
    }

    pub fn from_u32(value: u32) -> Self {
        Self::new(value >> 8, value as u8)
    }

    /// Advances by one message; the overflow counter wraps at 24 bits.
    pub fn increment(&mut self) {
        self.sqn = self.sqn.wrapping_add(1);
        if self.sqn == 0 {
            self.overflow = (self.overflow + 1) & Self::OVERFLOW_MASK;
        }
    }

    /// Tracks a received sequence number: a value below the last seen one
    /// means the peer wrapped, so the overflow counter advances.
    pub fn track_received(&mut self, received_sqn: u8) {
        if received_sqn < self.sqn {
            self.overflow = (self.overflow + 1) & Self::OVERFLOW_MASK;
        }
        self.sqn = received_sqn;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// NAS-MAC over `SQN || payload` (TS 24.501 4.4.3.3).
pub fn compute_nas_mac(
    algorithm: IntegrityAlgorithm,
    key: &[u8; NAS_KEY_SIZE],
    count: NasCount,
    direction: NasDirection,
    sequence_number: u8,
    payload: &[u8],
) -> [u8; 4] {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(sequence_number);
    data.extend_from_slice(payload);
    algorithm.compute_mac(count.to_u32(), NAS_BEARER, direction as u8, key, &data)
}

/// Ciphers or deciphers a plain NAS message in place.
pub fn cipher_nas_payload(
    algorithm: CipheringAlgorithm,
    key: &[u8; NAS_KEY_SIZE],
    count: NasCount,
    direction: NasDirection,
    payload: &mut [u8],
) {
    algorithm.apply(count.to_u32(), NAS_BEARER, direction as u8, key, payload);
}

/// Material needed to protect or check one message.
#[derive(Debug, Clone, Copy)]
pub struct ProtectionParams<'a> {
    pub integrity: IntegrityAlgorithm,
    pub ciphering: CipheringAlgorithm,
    pub k_nas_int: &'a [u8; NAS_KEY_SIZE],
    pub k_nas_enc: &'a [u8; NAS_KEY_SIZE],
    pub count: NasCount,
    pub direction: NasDirection,
}

/// A security protected 5GMM message split into header and (possibly
/// ciphered) inner message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuredNasMessage {
    pub header: SecuredHeader,
    pub payload: Vec<u8>,
}

impl SecuredNasMessage {
    /// Protects `plain` under `header_type`: the payload is ciphered for the
    /// two ciphered header types, then the MAC is computed over
    /// `SQN || payload` with `params.count`.
    pub fn protect(
        plain: &[u8],
        header_type: SecurityHeaderType,
        params: &ProtectionParams<'_>,
    ) -> Result<Self, SecurityError> {
        if !header_type.is_protected() {
            return Err(SecurityError::UnsupportedHeaderType(header_type));
        }
        let mut payload = plain.to_vec();
        if header_type.is_ciphered() {
            cipher_nas_payload(params.ciphering, params.k_nas_enc, params.count, params.direction, &mut payload);
        }
        let sequence_number = params.count.sqn;
        let mac = compute_nas_mac(
            params.integrity,
            params.k_nas_int,
            params.count,
            params.direction,
            sequence_number,
            &payload,
        );
        Ok(Self {
            header: SecuredHeader {
                security_header_type: header_type,
                mac,
                sequence_number,
            },
            payload,
        })
    }

    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        let mut buf = data;
        let header = SecuredHeader::decode(&mut buf)?;
        if !header.security_header_type.is_protected() {
            return Err(CodecError::InvalidSecurityHeaderType(header.security_header_type.into()));
        }
        Ok(Self {
            header,
            payload: buf.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SecuredHeader::SIZE + self.payload.len());
        self.header.encode(&mut out);
        out.put_slice(&self.payload);
        out
    }

    /// Checks the received MAC against `SQN || payload`.
    pub fn verify(&self, params: &ProtectionParams<'_>) -> Result<(), SecurityError> {
        let computed = compute_nas_mac(
            params.integrity,
            params.k_nas_int,
            params.count,
            params.direction,
            self.header.sequence_number,
            &self.payload,
        );
        if computed != self.header.mac {
            return Err(SecurityError::MacVerificationFailed {
                received: hex::encode(self.header.mac),
                computed: hex::encode(computed),
            });
        }
        Ok(())
    }

    /// Inner plain message, deciphered when the header type says so.
    pub fn into_plain(self, params: &ProtectionParams<'_>) -> Vec<u8> {
        let mut payload = self.payload;
        if self.header.security_header_type.is_ciphered() {
            cipher_nas_payload(params.ciphering, params.k_nas_enc, params.count, params.direction, &mut payload);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINT: [u8; 16] = [0x11; 16];
    const KENC: [u8; 16] = [0x22; 16];

    fn params(count: NasCount, direction: NasDirection) -> ProtectionParams<'static> {
        ProtectionParams {
            integrity: IntegrityAlgorithm::Nia2,
            ciphering: CipheringAlgorithm::Nea2,
            k_nas_int: &KINT,
            k_nas_enc: &KENC,
            count,
            direction,
        }
    }

    #[test]
    fn test_count_layout() {
        let count = NasCount::new(0x01_0203, 0x04);
        assert_eq!(count.to_u32(), 0x0102_0304);
        assert_eq!(NasCount::from_u32(0x0102_0304), count);
        assert_eq!(NasCount::new(0xFFFF_FFFF, 0).overflow, 0x00FF_FFFF);
    }

    #[test]
    fn test_count_increment_wraps_sqn() {
        let mut count = NasCount::new(0, 0xFF);
        count.increment();
        assert_eq!(count, NasCount::new(1, 0));

        let mut top = NasCount::new(0x00FF_FFFF, 0xFF);
        top.increment();
        assert_eq!(top, NasCount::default());
    }

    #[test]
    fn test_track_received_detects_wrap() {
        let mut count = NasCount::new(0, 0xFE);
        count.track_received(0xFF);
        assert_eq!(count, NasCount::new(0, 0xFF));
        count.track_received(0x00);
        assert_eq!(count, NasCount::new(1, 0x00));
        count.track_received(0x00);
        assert_eq!(count, NasCount::new(1, 0x00));
    }

    #[test]
    fn test_protect_verify_and_decipher() {
        let plain = [0x7E, 0x00, 0x43];
        let p = params(NasCount::new(0, 3), NasDirection::Uplink);
        let msg = SecuredNasMessage::protect(&plain, SecurityHeaderType::IntegrityProtectedAndCiphered, &p).unwrap();
        assert_ne!(msg.payload, plain);
        assert_eq!(msg.header.sequence_number, 3);

        let wire = msg.encode();
        assert_eq!(&wire[..2], &[0x7E, 0x02]);
        let decoded = SecuredNasMessage::decode(&wire).unwrap();
        decoded.verify(&p).unwrap();
        assert_eq!(decoded.into_plain(&p), plain);
    }

    #[test]
    fn test_integrity_only_leaves_payload_plain() {
        let plain = [0x7E, 0x00, 0x5E];
        let p = params(NasCount::default(), NasDirection::Uplink);
        let msg =
            SecuredNasMessage::protect(&plain, SecurityHeaderType::IntegrityProtectedWithNewSecurityContext, &p)
                .unwrap();
        assert_eq!(msg.payload, plain);
    }

    #[test]
    fn test_any_bit_flip_fails_verification() {
        let plain = [0x7E, 0x00, 0x42, 0x01, 0x01, 0x09];
        let p = params(NasCount::new(0, 1), NasDirection::Downlink);
        let wire = SecuredNasMessage::protect(&plain, SecurityHeaderType::IntegrityProtectedAndCiphered, &p)
            .unwrap()
            .encode();
        for byte in 6..wire.len() {
            for bit in 0..8 {
                let mut tampered = wire.clone();
                tampered[byte] ^= 1 << bit;
                let msg = SecuredNasMessage::decode(&tampered).unwrap();
                assert!(matches!(msg.verify(&p), Err(SecurityError::MacVerificationFailed { .. })));
            }
        }
    }

    #[test]
    fn test_wrong_direction_fails_verification() {
        let plain = [0x7E, 0x00, 0x43];
        let up = params(NasCount::default(), NasDirection::Uplink);
        let msg = SecuredNasMessage::protect(&plain, SecurityHeaderType::IntegrityProtected, &up).unwrap();
        assert!(msg.verify(&params(NasCount::default(), NasDirection::Downlink)).is_err());
    }

    #[test]
    fn test_plain_header_rejected() {
        let p = params(NasCount::default(), NasDirection::Uplink);
        assert_eq!(
            SecuredNasMessage::protect(&[0x7E, 0x00, 0x41], SecurityHeaderType::NotProtected, &p),
            Err(SecurityError::UnsupportedHeaderType(SecurityHeaderType::NotProtected))
        );
        assert!(SecuredNasMessage::decode(&[0x7E, 0x00, 0, 0, 0, 0, 0, 0x41]).is_err());
    }
}
