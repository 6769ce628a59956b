//! 5G key derivation (3GPP TS 33.220 Annex B, TS 33.501 Annex A)
//!
//! Every derivation is `HMAC-SHA256(key, FC || P0 || L0 || ... || Pn || Ln)`
//! where `Li` is the two-octet big-endian length of `Pi`.
//!
//! ```text
//! CK||IK --0x6A--> Kausf --0x6C--> Kseaf --0x6D--> Kamf --0x69--> KNASenc/KNASint
//!                                                      \--0x6E--> KgNB
//! CK||IK --0x6B--> RES*
//! ```

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 256-bit key size
pub const KEY_256_SIZE: usize = 32;

/// 128-bit key size
pub const KEY_128_SIZE: usize = 16;

/// Function codes (TS 33.501 Annex A)
pub mod fc {
    pub const KAUSF: u8 = 0x6A;
    pub const RES_STAR: u8 = 0x6B;
    pub const KSEAF: u8 = 0x6C;
    pub const KAMF: u8 = 0x6D;
    pub const ALGORITHM_KEY: u8 = 0x69;
    pub const KGNB: u8 = 0x6E;
}

/// Algorithm type distinguisher (TS 33.501 Annex A.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlgorithmKind {
    NasEnc = 0x01,
    NasInt = 0x02,
    RrcEnc = 0x03,
    RrcInt = 0x04,
    UpEnc = 0x05,
    UpInt = 0x06,
}

/// Access type distinguisher for KgNB
pub const ACCESS_TYPE_3GPP: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KdfError {
    /// A KDF parameter exceeds the two-octet length field
    #[error("KDF parameter {index} is {len} bytes, longer than 65535")]
    ParameterTooLong { index: usize, len: usize },

    /// The SUPI is not of the form `imsi-<digits>`
    #[error("cannot derive Kamf from SUPI {0:?}")]
    InvalidSupi(String),
}

/// Generic KDF: HMAC-SHA256 over `FC || P0 || L0 || ...`.
pub fn kdf(key: &[u8], fc: u8, parameters: &[&[u8]]) -> Result<[u8; KEY_256_SIZE], KdfError> {
    let mut s = Vec::with_capacity(1 + parameters.iter().map(|p| p.len() + 2).sum::<usize>());
    s.push(fc);
    for (index, p) in parameters.iter().enumerate() {
        let len = u16::try_from(p.len()).map_err(|_| KdfError::ParameterTooLong {
            index,
            len: p.len(),
        })?;
        s.extend_from_slice(p);
        s.extend_from_slice(&len.to_be_bytes());
    }
    Ok(hmac_sha256(key, &s))
}

/// HMAC-SHA256 over `input`.
pub fn hmac_sha256(key: &[u8], input: &[u8]) -> [u8; KEY_256_SIZE] {
    // HMAC accepts keys of every length, so `new_from_slice` cannot fail here.
    let mut mac = match Hmac::<Sha256>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any size"),
    };
    mac.update(input);
    mac.finalize().into_bytes().into()
}

/// SHA-256 digest.
pub fn sha256(input: &[u8]) -> [u8; KEY_256_SIZE] {
    Sha256::digest(input).into()
}

fn ck_ik(ck: &[u8; KEY_128_SIZE], ik: &[u8; KEY_128_SIZE]) -> [u8; KEY_256_SIZE] {
    let mut key = [0u8; KEY_256_SIZE];
    key[..KEY_128_SIZE].copy_from_slice(ck);
    key[KEY_128_SIZE..].copy_from_slice(ik);
    key
}

fn low_half(out: [u8; KEY_256_SIZE]) -> [u8; KEY_128_SIZE] {
    let mut key = [0u8; KEY_128_SIZE];
    key.copy_from_slice(&out[KEY_128_SIZE..]);
    key
}

/// Kausf = KDF(CK||IK, 0x6A, SN name, SQN^AK) (A.2)
pub fn derive_kausf(
    ck: &[u8; KEY_128_SIZE],
    ik: &[u8; KEY_128_SIZE],
    serving_network_name: &str,
    sqn_xor_ak: &[u8; 6],
) -> Result<[u8; KEY_256_SIZE], KdfError> {
    kdf(
        &ck_ik(ck, ik),
        fc::KAUSF,
        &[serving_network_name.as_bytes(), sqn_xor_ak],
    )
}

/// RES* = low 128 bits of KDF(CK||IK, 0x6B, SN name, RAND, RES) (A.4)
///
/// The network computes XRES* with the same function.
pub fn derive_res_star(
    ck: &[u8; KEY_128_SIZE],
    ik: &[u8; KEY_128_SIZE],
    serving_network_name: &str,
    rand: &[u8; 16],
    res: &[u8],
) -> Result<[u8; KEY_128_SIZE], KdfError> {
    let out = kdf(
        &ck_ik(ck, ik),
        fc::RES_STAR,
        &[serving_network_name.as_bytes(), rand, res],
    )?;
    Ok(low_half(out))
}

/// HXRES* = low 128 bits of SHA-256(RAND || XRES*) (A.5)
pub fn derive_hxres_star(rand: &[u8; 16], xres_star: &[u8; KEY_128_SIZE]) -> [u8; KEY_128_SIZE] {
    let mut input = [0u8; 32];
    input[..16].copy_from_slice(rand);
    input[16..].copy_from_slice(xres_star);
    low_half(sha256(&input))
}

/// Kseaf = KDF(Kausf, 0x6C, SN name) (A.6)
pub fn derive_kseaf(
    kausf: &[u8; KEY_256_SIZE],
    serving_network_name: &str,
) -> Result<[u8; KEY_256_SIZE], KdfError> {
    kdf(kausf, fc::KSEAF, &[serving_network_name.as_bytes()])
}

/// Kamf = KDF(Kseaf, 0x6D, SUPI, ABBA) (A.7)
///
/// `supi` is the IMSI digit string without the `imsi-` prefix; the full
/// `imsi-...` form is accepted and stripped.
pub fn derive_kamf(
    kseaf: &[u8; KEY_256_SIZE],
    supi: &str,
    abba: &[u8],
) -> Result<[u8; KEY_256_SIZE], KdfError> {
    let digits = supi
        .strip_prefix("imsi-")
        .or_else(|| supi.strip_prefix("supi-"))
        .unwrap_or(supi);
    if digits.len() < 5 || digits.len() > 15 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KdfError::InvalidSupi(supi.to_string()));
    }
    kdf(kseaf, fc::KAMF, &[digits.as_bytes(), abba])
}

/// Algorithm key = low 128 bits of KDF(key, 0x69, type, id) (A.8)
pub fn derive_algorithm_key(
    key: &[u8; KEY_256_SIZE],
    kind: AlgorithmKind,
    algorithm_id: u8,
) -> Result<[u8; KEY_128_SIZE], KdfError> {
    let out = kdf(key, fc::ALGORITHM_KEY, &[&[kind as u8], &[algorithm_id]])?;
    Ok(low_half(out))
}

/// KgNB = KDF(Kamf, 0x6E, UL NAS COUNT, access type) (A.9)
pub fn derive_kgnb(
    kamf: &[u8; KEY_256_SIZE],
    uplink_nas_count: u32,
    access_type: u8,
) -> Result<[u8; KEY_256_SIZE], KdfError> {
    kdf(
        kamf,
        fc::KGNB,
        &[&uplink_nas_count.to_be_bytes(), &[access_type]],
    )
}

/// Session keys produced by one successful 5G-AKA run.
#[derive(Clone, PartialEq, Eq)]
pub struct AkaKeys {
    pub res_star: [u8; KEY_128_SIZE],
    pub kausf: [u8; KEY_256_SIZE],
    pub kseaf: [u8; KEY_256_SIZE],
    pub kamf: [u8; KEY_256_SIZE],
}

impl std::fmt::Debug for AkaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AkaKeys")
            .field("res_star", &hex::encode(self.res_star))
            .finish_non_exhaustive()
    }
}

/// Runs the whole chain from CK/IK to Kamf with ABBA = 0x0000.
pub fn derive_aka_keys(
    ck: &[u8; KEY_128_SIZE],
    ik: &[u8; KEY_128_SIZE],
    serving_network_name: &str,
    rand: &[u8; 16],
    res: &[u8],
    sqn_xor_ak: &[u8; 6],
    supi: &str,
) -> Result<AkaKeys, KdfError> {
    let res_star = derive_res_star(ck, ik, serving_network_name, rand, res)?;
    let kausf = derive_kausf(ck, ik, serving_network_name, sqn_xor_ak)?;
    let kseaf = derive_kseaf(&kausf, serving_network_name)?;
    let kamf = derive_kamf(&kseaf, supi, &[0x00, 0x00])?;
    Ok(AkaKeys {
        res_star,
        kausf,
        kseaf,
        kamf,
    })
}
