//! 5G NAS integrity algorithms (TS 33.501 Annex D.3)
//!
//! - NIA0: null integrity, MAC is four zero octets
//! - NIA1: SNOW 3G UIA2 (128-EIA1)
//! - NIA2: AES-128-CMAC (128-EIA2)
//! - NIA3: ZUC (128-EIA3)

use std::fmt;

use aes::Aes128;
use cmac::{Cmac, Mac};
use zuc::ZUC128;

use crate::nea::zuc_iv;
use crate::snow3g::uia2_f9;

/// Integrity key size in bytes
pub const KEY_SIZE: usize = 16;

/// NAS-MAC size in bytes
pub const MAC_SIZE: usize = 4;

/// NAS integrity algorithm identifier (TS 24.501 9.11.3.34)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum IntegrityAlgorithm {
    #[default]
    Nia0 = 0,
    Nia1 = 1,
    Nia2 = 2,
    Nia3 = 3,
}

impl IntegrityAlgorithm {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Nia0),
            1 => Some(Self::Nia1),
            2 => Some(Self::Nia2),
            3 => Some(Self::Nia3),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn is_null(self) -> bool {
        self == Self::Nia0
    }

    /// Computes the 32-bit MAC over `data`.
    pub fn compute_mac(
        self,
        count: u32,
        bearer: u8,
        direction: u8,
        key: &[u8; KEY_SIZE],
        data: &[u8],
    ) -> [u8; MAC_SIZE] {
        match self {
            Self::Nia0 => [0; MAC_SIZE],
            Self::Nia1 => nia1(count, bearer, direction, key, data),
            Self::Nia2 => nia2(count, bearer, direction, key, data),
            Self::Nia3 => nia3(count, bearer, direction, key, data),
        }
    }
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NIA{}", self.id())
    }
}

/// 128-NIA1: f9 with FRESH = `BEARER || 0^27`.
pub fn nia1(count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &[u8]) -> [u8; MAC_SIZE] {
    let fresh = u32::from(bearer & 0x1F) << 27;
    let length_bits = (data.len() * 8) as u64;
    uia2_f9(key, count, fresh, u32::from(direction & 0x01), data, length_bits).to_be_bytes()
}

/// 128-NIA2: AES-CMAC over `COUNT || BEARER || DIRECTION || 0^26 || MESSAGE`,
/// truncated to 32 bits.
pub fn nia2(count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &[u8]) -> [u8; MAC_SIZE] {
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&count.to_be_bytes());
    header[4] = ((bearer & 0x1F) << 3) | ((direction & 0x01) << 2);

    let mut mac = <Cmac<Aes128> as Mac>::new(key.into());
    mac.update(&header);
    mac.update(data);
    let tag = mac.finalize().into_bytes();

    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&tag[..MAC_SIZE]);
    out
}

/// 128-NIA3 over whole octets.
pub fn nia3(count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &[u8]) -> [u8; MAC_SIZE] {
    eia3(count, bearer, direction, key, data, data.len() * 8).to_be_bytes()
}

/// 128-EIA3 over the first `length` bits of `data`.
fn eia3(count: u32, bearer: u8, direction: u8, key: &[u8; KEY_SIZE], data: &[u8], length: usize) -> u32 {
    let mut zuc = ZUC128::new(key, &zuc_iv(count, bearer, direction));
    let words = (length + 64).div_ceil(32);
    let z: Vec<u32> = (0..words).map(|_| zuc.generate()).collect();

    // 32 keystream bits starting at bit `i`.
    let word_at = |i: usize| {
        let (idx, off) = (i / 32, i % 32);
        if off == 0 {
            z[idx]
        } else {
            (z[idx] << off) | (z[idx + 1] >> (32 - off))
        }
    };

    let mut t = 0u32;
    for i in 0..length {
        if (data[i / 8] >> (7 - i % 8)) & 1 == 1 {
            t ^= word_at(i);
        }
    }
    t ^= word_at(length);
    t ^ z[words - 1]
}
