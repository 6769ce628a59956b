//! 5G NAS ciphering algorithms (TS 33.501 Annex D.2)
//!
//! - NEA0: null ciphering
//! - NEA1: SNOW 3G (128-EEA1)
//! - NEA2: AES-128 in CTR mode (128-EEA2)
//! - NEA3: ZUC (128-EEA3)
//!
//! All four are keystream ciphers, so one `apply` both ciphers and deciphers.

use std::fmt;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use zuc::ZUC128;

use crate::snow3g::uea2_f8;

/// Ciphering key size in bytes
pub const KEY_SIZE: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// NAS ciphering algorithm identifier (TS 24.501 9.11.3.34)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum CipheringAlgorithm {
    #[default]
    Nea0 = 0,
    Nea1 = 1,
    Nea2 = 2,
    Nea3 = 3,
}

impl CipheringAlgorithm {
    /// Maps the 4-bit type-of-ciphering-algorithm value; unknown values yield `None`.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Nea0),
            1 => Some(Self::Nea1),
            2 => Some(Self::Nea2),
            3 => Some(Self::Nea3),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn is_null(self) -> bool {
        self == Self::Nea0
    }

    /// Ciphers or deciphers `data` in place.
    pub fn apply(self, count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &mut [u8]) {
        match self {
            Self::Nea0 => {}
            Self::Nea1 => nea1(count, bearer, direction, key, data),
            Self::Nea2 => nea2(count, bearer, direction, key, data),
            Self::Nea3 => nea3(count, bearer, direction, key, data),
        }
    }
}

impl fmt::Display for CipheringAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NEA{}", self.id())
    }
}

/// `BEARER || DIRECTION || 0` packed into one octet.
fn bearer_direction(bearer: u8, direction: u8) -> u8 {
    ((bearer & 0x1F) << 3) | ((direction & 0x01) << 2)
}

/// 128-NEA1: UEA2 f8 over whole octets.
pub fn nea1(count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &mut [u8]) {
    let length_bits = (data.len() * 8) as u32;
    uea2_f8(
        key,
        count,
        u32::from(bearer & 0x1F),
        u32::from(direction & 0x01),
        data,
        length_bits,
    );
}

/// 128-NEA2: AES-CTR with initial counter block `COUNT || BEARER || DIRECTION || 0^90`.
pub fn nea2(count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &mut [u8]) {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&count.to_be_bytes());
    iv[4] = bearer_direction(bearer, direction);
    let mut cipher = Aes128Ctr::new(key.into(), &iv.into());
    cipher.apply_keystream(data);
}

/// ZUC initialisation vector shared by NEA3 and NIA3: the 64-bit
/// `COUNT || BEARER || DIRECTION || 0` pattern repeated twice.
pub(crate) fn zuc_iv(count: u32, bearer: u8, direction: u8) -> [u8; 16] {
    let mut iv = [0u8; 16];
    for half in iv.chunks_exact_mut(8) {
        half[..4].copy_from_slice(&count.to_be_bytes());
        half[4] = bearer_direction(bearer, direction);
    }
    iv
}

/// 128-NEA3: ZUC keystream XOR.
pub fn nea3(count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &mut [u8]) {
    let mut zuc = ZUC128::new(key, &zuc_iv(count, bearer, direction));
    for chunk in data.chunks_mut(4) {
        let ks = zuc.generate().to_be_bytes();
        for (b, k) in chunk.iter_mut().zip(ks) {
            *b ^= k;
        }
    }
}
