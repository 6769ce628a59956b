//! Subscription identifier concealment (TS 33.501 Annex C)
//!
//! A SUCI carries the MSIN either in clear (null scheme) or encrypted with
//! ECIES against the home network public key:
//!
//! | Scheme    | ECDH   | Ephemeral key on the wire |
//! |-----------|--------|---------------------------|
//! | Profile A | X25519 | 32 bytes                  |
//! | Profile B | P-256  | 33 bytes, compressed      |
//!
//! Both profiles share the X9.63 KDF, AES-128-CTR and the 8-byte
//! HMAC-SHA256 tag, so [`conceal`] and [`deconceal`] treat them as one
//! algorithm parametrised by the curve.

use std::fmt;

use aes::Aes128;
use coretester_common::{Plmn, ProtectionScheme};
use ctr::cipher::{KeyIvInit, StreamCipher};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::kdf::hmac_sha256;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const ENC_KEY_LEN: usize = 16;
const ICB_LEN: usize = 16;
const MAC_KEY_LEN: usize = 32;
const MAC_LEN: usize = 8;
const HASH_LEN: usize = 32;

const X25519_KEY_LEN: usize = 32;
const P256_COMPRESSED_LEN: usize = 33;

/// SUCI text prefix
pub const PREFIX_SUCI: &str = "suci";

/// SUPI text prefix
pub const PREFIX_IMSI: &str = "imsi-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SidfError {
    #[error("MSIN must be decimal digits, got {0:?}")]
    InvalidMsin(String),

    #[error("routing indicator must be at most 4 digits, got {0:?}")]
    InvalidRoutingIndicator(String),

    #[error("invalid PLMN: {0}")]
    InvalidPlmn(String),

    #[error("failed to unmarshal {scheme:?} home network public key")]
    InvalidPublicKey { scheme: ProtectionScheme },

    #[error("failed to load {scheme:?} home network private key")]
    InvalidPrivateKey { scheme: ProtectionScheme },

    #[error("scheme output is not valid hex")]
    InvalidSchemeOutput,

    #[error("scheme output too short: {len} bytes")]
    SchemeOutputTooShort { len: usize },

    #[error("SUCI MAC verification failed")]
    MacMismatch,

    #[error("protection scheme {0:?} does not match the key")]
    SchemeMismatch(ProtectionScheme),

    #[error("unknown protection scheme id {0}")]
    UnknownScheme(u8),
}

/// SUPI type carried by a SUCI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupiType {
    /// `0-<mcc>-<mnc>`
    Imsi,
    /// `1-<home network identifier>`
    Nai,
}

/// A parsed SUCI string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suci {
    pub supi_type: SupiType,
    /// Empty for NAI SUCIs
    pub mcc: String,
    /// Empty for NAI SUCIs
    pub mnc: String,
    /// Realm of a NAI SUCI, empty for IMSI
    pub home_network_id: String,
    pub routing_indicator: String,
    pub protection_scheme: u8,
    pub public_key_id: u8,
    /// Lower-case hex
    pub scheme_output: String,
}

impl Suci {
    pub fn scheme(&self) -> Option<ProtectionScheme> {
        ProtectionScheme::from_id(self.protection_scheme)
    }

    pub fn scheme_output_bytes(&self) -> Result<Vec<u8>, SidfError> {
        hex::decode(&self.scheme_output).map_err(|_| SidfError::InvalidSchemeOutput)
    }

    /// Encodes the SUCI as a 5GS mobile identity value (TS 24.501 9.11.3.4),
    /// without the IEI and length octets.
    pub fn to_mobile_identity(&self) -> Result<Vec<u8>, SidfError> {
        let plmn = Plmn::from_digits(&self.mcc, &self.mnc)
            .map_err(|e| SidfError::InvalidPlmn(e.to_string()))?;
        let output = self.scheme_output_bytes()?;

        let mut buf = Vec::with_capacity(8 + output.len());
        // SUPI format IMSI, identity type SUCI
        buf.push(0x01);
        buf.extend_from_slice(&plmn.encode());
        buf.extend_from_slice(&routing_indicator_octets(&self.routing_indicator)?);
        buf.push(self.protection_scheme);
        buf.push(self.public_key_id);
        buf.extend_from_slice(&output);
        Ok(buf)
    }

    /// Rebuilds a SUCI from a 5GS mobile identity value of type SUCI.
    pub fn from_mobile_identity(value: &[u8]) -> Option<Suci> {
        if value.len() < 8 || value[0] & 0x07 != 0x01 || (value[0] >> 4) & 0x07 != 0 {
            return None;
        }
        let plmn = Plmn::decode([value[1], value[2], value[3]]);
        let ri = tbcd(&hex::encode([value[4], value[5]]));
        let routing_indicator = ri.trim_end_matches(['f', 'F']).to_string();
        Some(Suci {
            supi_type: SupiType::Imsi,
            mcc: plmn.mcc_string(),
            mnc: plmn.mnc_string(),
            home_network_id: String::new(),
            routing_indicator,
            protection_scheme: value[6] & 0x0F,
            public_key_id: value[7],
            scheme_output: hex::encode(&value[8..]),
        })
    }
}

impl fmt::Display for Suci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.supi_type {
            SupiType::Imsi => write!(f, "{PREFIX_SUCI}-0-{}-{}", self.mcc, self.mnc)?,
            SupiType::Nai => write!(f, "{PREFIX_SUCI}-1-{}", self.home_network_id)?,
        }
        write!(
            f,
            "-{}-{}-{}-{}",
            self.routing_indicator, self.protection_scheme, self.public_key_id, self.scheme_output
        )
    }
}

fn is_digits(s: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

/// Public key identifier: 0 to 255 without a leading zero in three-digit form.
fn parse_public_key_id(s: &str) -> Option<u8> {
    if !is_digits(s, 1, 3) {
        return None;
    }
    if s.len() == 3 && !matches!(s.as_bytes()[0], b'1' | b'2') {
        return None;
    }
    s.parse().ok()
}

/// Parses `suci-0-<mcc>-<mnc>-<ri>-<scheme>-<key id>-<hex>` (or the NAI form
/// `suci-1-<realm>-...`). Returns `None` when the grammar does not match.
pub fn parse_suci(input: &str) -> Option<Suci> {
    let body = input.strip_prefix("suci-")?;
    let mut tail = body.rsplitn(5, '-');
    let scheme_output = tail.next()?;
    let key_id = tail.next()?;
    let scheme = tail.next()?;
    let routing_indicator = tail.next()?;
    let supi = tail.next()?;

    if scheme_output.is_empty() || !scheme_output.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let public_key_id = parse_public_key_id(key_id)?;
    let protection_scheme = match scheme {
        "0" => 0,
        "1" => 1,
        "2" => 2,
        _ => return None,
    };
    if !is_digits(routing_indicator, 1, 4) {
        return None;
    }

    let (supi_type, mcc, mnc, home_network_id) = if let Some(plmn) = supi.strip_prefix("0-") {
        let (mcc, mnc) = plmn.split_once('-')?;
        if !is_digits(mcc, 3, 3) || !is_digits(mnc, 2, 3) {
            return None;
        }
        (SupiType::Imsi, mcc.to_string(), mnc.to_string(), String::new())
    } else if let Some(realm) = supi.strip_prefix("1-") {
        (SupiType::Nai, String::new(), String::new(), realm.to_string())
    } else {
        return None;
    };

    Some(Suci {
        supi_type,
        mcc,
        mnc,
        home_network_id,
        routing_indicator: routing_indicator.to_string(),
        protection_scheme,
        public_key_id,
        scheme_output: scheme_output.to_ascii_lowercase(),
    })
}

/// Swaps every pair of characters after padding to even length with `F`;
/// a trailing filler is dropped again (`"00012"` becomes `"0010F2"`,
/// `"1234"` becomes `"2143"`).
pub fn tbcd(value: &str) -> String {
    let mut chars: Vec<char> = value.chars().collect();
    if chars.len() % 2 != 0 {
        chars.push('F');
    }
    for pair in chars.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
    if matches!(chars.last(), Some('F' | 'f')) {
        chars.pop();
    }
    chars.into_iter().collect()
}

/// Packs a digit string as TBCD octets, filling an odd final nibble with `F`.
pub fn bcd_encode(digits: &str) -> Result<Vec<u8>, SidfError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SidfError::InvalidMsin(digits.to_string()));
    }
    let nibbles: Vec<u8> = digits.bytes().map(|b| b - b'0').collect();
    Ok(nibbles
        .chunks(2)
        .map(|pair| {
            let high = pair.get(1).copied().unwrap_or(0x0F);
            (high << 4) | pair[0]
        })
        .collect())
}

/// Unpacks TBCD octets, stopping at the `F` filler.
pub fn bcd_decode(octets: &[u8]) -> String {
    let mut out = String::with_capacity(octets.len() * 2);
    for &b in octets {
        for nibble in [b & 0x0F, b >> 4] {
            if nibble > 9 {
                return out;
            }
            out.push(char::from(b'0' + nibble));
        }
    }
    out
}

/// Routing indicator octets of the SUCI mobile identity: up to four BCD
/// digits with `F` filler. An empty indicator is coded as `"0"`.
pub fn routing_indicator_octets(routing_indicator: &str) -> Result<[u8; 2], SidfError> {
    let ri = if routing_indicator.is_empty() { "0" } else { routing_indicator };
    if ri.len() > 4 || !ri.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SidfError::InvalidRoutingIndicator(routing_indicator.to_string()));
    }
    let mut digits = [0x0Fu8; 4];
    for (slot, b) in digits.iter_mut().zip(ri.bytes()) {
        *slot = b - b'0';
    }
    Ok([(digits[1] << 4) | digits[0], (digits[3] << 4) | digits[2]])
}

/// ANSI X9.63 KDF with SHA-256: `Hash(Z || counter || SharedInfo)` blocks
/// with a 32-bit big-endian counter starting at 1.
pub fn x963_kdf(shared_key: &[u8], shared_info: &[u8], len: usize) -> Vec<u8> {
    let rounds = len.div_ceil(HASH_LEN);
    let mut out = Vec::with_capacity(rounds * HASH_LEN);
    for counter in 1..=rounds as u32 {
        let mut hasher = Sha256::new();
        hasher.update(shared_key);
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_info);
        out.extend_from_slice(&hasher.finalize());
    }
    out
}

/// Home network public key as provisioned on the USIM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeNetworkPublicKey {
    pub scheme: ProtectionScheme,
    pub key_id: u8,
    /// Raw X25519 key (Profile A) or SEC1 point (Profile B); empty for the null scheme
    pub key: Vec<u8>,
}

impl HomeNetworkPublicKey {
    pub fn null() -> Self {
        Self {
            scheme: ProtectionScheme::Null,
            key_id: 0,
            key: Vec::new(),
        }
    }
}

/// Home network private key held by the SIDF.
#[derive(Clone)]
pub struct HomeNetworkPrivateKey {
    pub scheme: ProtectionScheme,
    key: Vec<u8>,
}

impl fmt::Debug for HomeNetworkPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HomeNetworkPrivateKey")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl HomeNetworkPrivateKey {
    pub fn new(scheme: ProtectionScheme, key: &[u8]) -> Result<Self, SidfError> {
        let ok = match scheme {
            ProtectionScheme::Null => false,
            ProtectionScheme::ProfileA => key.len() == X25519_KEY_LEN,
            ProtectionScheme::ProfileB => p256::SecretKey::from_slice(key).is_ok(),
        };
        if !ok {
            return Err(SidfError::InvalidPrivateKey { scheme });
        }
        Ok(Self {
            scheme,
            key: key.to_vec(),
        })
    }

    /// Generates a fresh key pair for the given profile.
    pub fn generate<R: RngCore + CryptoRng>(scheme: ProtectionScheme, rng: &mut R) -> Result<Self, SidfError> {
        let key = match scheme {
            ProtectionScheme::Null => return Err(SidfError::InvalidPrivateKey { scheme }),
            ProtectionScheme::ProfileA => x25519_dalek::StaticSecret::random_from_rng(rng)
                .to_bytes()
                .to_vec(),
            ProtectionScheme::ProfileB => p256::SecretKey::random(rng).to_bytes().to_vec(),
        };
        Ok(Self { scheme, key })
    }

    /// Public key in the form [`conceal`] expects (Profile B: compressed point).
    pub fn public_key(&self) -> Result<Vec<u8>, SidfError> {
        match self.scheme {
            ProtectionScheme::ProfileA => {
                let secret = x25519_dalek::StaticSecret::from(self.x25519_bytes()?);
                Ok(x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec())
            }
            ProtectionScheme::ProfileB => {
                let secret = self.p256_secret()?;
                Ok(secret.public_key().to_encoded_point(true).as_bytes().to_vec())
            }
            ProtectionScheme::Null => Err(SidfError::InvalidPrivateKey { scheme: self.scheme }),
        }
    }

    fn x25519_bytes(&self) -> Result<[u8; X25519_KEY_LEN], SidfError> {
        self.key
            .as_slice()
            .try_into()
            .map_err(|_| SidfError::InvalidPrivateKey { scheme: self.scheme })
    }

    fn p256_secret(&self) -> Result<p256::SecretKey, SidfError> {
        p256::SecretKey::from_slice(&self.key)
            .map_err(|_| SidfError::InvalidPrivateKey { scheme: self.scheme })
    }
}

/// Keys derived from the ECDH shared secret.
struct EciesKeys {
    enc_key: [u8; ENC_KEY_LEN],
    icb: [u8; ICB_LEN],
    mac_key: [u8; MAC_KEY_LEN],
}

impl EciesKeys {
    fn derive(shared: &[u8], ephemeral_public: &[u8]) -> Self {
        let stream = x963_kdf(shared, ephemeral_public, ENC_KEY_LEN + MAC_KEY_LEN);
        let mut keys = EciesKeys {
            enc_key: [0; ENC_KEY_LEN],
            icb: [0; ICB_LEN],
            mac_key: [0; MAC_KEY_LEN],
        };
        keys.enc_key.copy_from_slice(&stream[..ENC_KEY_LEN]);
        keys.icb.copy_from_slice(&stream[ENC_KEY_LEN..ENC_KEY_LEN + ICB_LEN]);
        keys.mac_key.copy_from_slice(&stream[stream.len() - MAC_KEY_LEN..]);
        keys
    }

    fn apply_ctr(&self, data: &mut [u8]) {
        let mut cipher = Aes128Ctr::new((&self.enc_key).into(), (&self.icb).into());
        cipher.apply_keystream(data);
    }

    fn tag(&self, ciphertext: &[u8]) -> [u8; MAC_LEN] {
        let full = hmac_sha256(&self.mac_key, ciphertext);
        let mut tag = [0u8; MAC_LEN];
        tag.copy_from_slice(&full[..MAC_LEN]);
        tag
    }
}

/// Conceals `msin` into a SUCI with a random ephemeral key.
pub fn conceal(
    msin: &str,
    mcc: &str,
    mnc: &str,
    routing_indicator: &str,
    key: &HomeNetworkPublicKey,
) -> Result<Suci, SidfError> {
    conceal_with_rng(msin, mcc, mnc, routing_indicator, key, &mut rand::thread_rng())
}

/// [`conceal`] with a caller-supplied RNG for the ephemeral key.
pub fn conceal_with_rng<R: RngCore + CryptoRng>(
    msin: &str,
    mcc: &str,
    mnc: &str,
    routing_indicator: &str,
    key: &HomeNetworkPublicKey,
    rng: &mut R,
) -> Result<Suci, SidfError> {
    let ephemeral = match key.scheme {
        ProtectionScheme::Null => Vec::new(),
        ProtectionScheme::ProfileA => x25519_dalek::StaticSecret::random_from_rng(rng).to_bytes().to_vec(),
        ProtectionScheme::ProfileB => p256::SecretKey::random(rng).to_bytes().to_vec(),
    };
    conceal_with_ephemeral(msin, mcc, mnc, routing_indicator, key, &ephemeral)
}

/// [`conceal`] with a fixed ephemeral private key: 32 bytes for Profile A,
/// a P-256 scalar for Profile B. Ignored by the null scheme.
pub fn conceal_with_ephemeral(
    msin: &str,
    mcc: &str,
    mnc: &str,
    routing_indicator: &str,
    key: &HomeNetworkPublicKey,
    ephemeral: &[u8],
) -> Result<Suci, SidfError> {
    Plmn::from_digits(mcc, mnc).map_err(|e| SidfError::InvalidPlmn(e.to_string()))?;
    if !is_digits(routing_indicator, 1, 4) {
        return Err(SidfError::InvalidRoutingIndicator(routing_indicator.to_string()));
    }
    let plaintext = bcd_encode(msin)?;

    let scheme = key.scheme;
    let output = match scheme {
        ProtectionScheme::Null => plaintext,
        ProtectionScheme::ProfileA => {
            let peer: [u8; X25519_KEY_LEN] = key
                .key
                .as_slice()
                .try_into()
                .map_err(|_| SidfError::InvalidPublicKey { scheme })?;
            let secret: [u8; X25519_KEY_LEN] = ephemeral
                .try_into()
                .map_err(|_| SidfError::InvalidPrivateKey { scheme })?;
            let ephemeral = x25519_dalek::StaticSecret::from(secret);
            profile_a_encrypt(&ephemeral, &x25519_dalek::PublicKey::from(peer), plaintext)
        }
        ProtectionScheme::ProfileB => {
            let peer = p256::PublicKey::from_sec1_bytes(&key.key).map_err(|_| SidfError::InvalidPublicKey { scheme })?;
            let ephemeral =
                p256::SecretKey::from_slice(ephemeral).map_err(|_| SidfError::InvalidPrivateKey { scheme })?;
            profile_b_encrypt(&ephemeral, &peer, plaintext)
        }
    };

    Ok(Suci {
        supi_type: SupiType::Imsi,
        mcc: mcc.to_string(),
        mnc: mnc.to_string(),
        home_network_id: String::new(),
        routing_indicator: routing_indicator.to_string(),
        protection_scheme: key.scheme.id(),
        public_key_id: if key.scheme == ProtectionScheme::Null { 0 } else { key.key_id },
        scheme_output: hex::encode(output),
    })
}

fn seal(keys: &EciesKeys, ephemeral_public: &[u8], mut plaintext: Vec<u8>) -> Vec<u8> {
    keys.apply_ctr(&mut plaintext);
    let tag = keys.tag(&plaintext);
    let mut out = Vec::with_capacity(ephemeral_public.len() + plaintext.len() + MAC_LEN);
    out.extend_from_slice(ephemeral_public);
    out.extend_from_slice(&plaintext);
    out.extend_from_slice(&tag);
    out
}

fn profile_a_encrypt(
    ephemeral: &x25519_dalek::StaticSecret,
    peer: &x25519_dalek::PublicKey,
    plaintext: Vec<u8>,
) -> Vec<u8> {
    let ephemeral_public = x25519_dalek::PublicKey::from(ephemeral);
    let shared = ephemeral.diffie_hellman(peer);
    let keys = EciesKeys::derive(shared.as_bytes(), ephemeral_public.as_bytes());
    seal(&keys, ephemeral_public.as_bytes(), plaintext)
}

fn profile_b_encrypt(ephemeral: &p256::SecretKey, peer: &p256::PublicKey, plaintext: Vec<u8>) -> Vec<u8> {
    let ephemeral_public = ephemeral.public_key().to_encoded_point(true);
    let shared = p256::ecdh::diffie_hellman(ephemeral.to_nonzero_scalar(), peer.as_affine());
    let keys = EciesKeys::derive(shared.raw_secret_bytes(), ephemeral_public.as_bytes());
    seal(&keys, ephemeral_public.as_bytes(), plaintext)
}

/// Recovers the MSIN from a SUCI.
///
/// The null scheme needs no key; the profiles verify the tag before
/// decrypting.
pub fn deconceal(suci: &Suci, key: Option<&HomeNetworkPrivateKey>) -> Result<String, SidfError> {
    let scheme = suci
        .scheme()
        .ok_or(SidfError::UnknownScheme(suci.protection_scheme))?;
    let output = suci.scheme_output_bytes()?;
    if scheme == ProtectionScheme::Null {
        return Ok(bcd_decode(&output));
    }

    let key = key.ok_or(SidfError::SchemeMismatch(scheme))?;
    if key.scheme != scheme {
        return Err(SidfError::SchemeMismatch(scheme));
    }

    let pub_len = match scheme {
        ProtectionScheme::ProfileA => X25519_KEY_LEN,
        _ => P256_COMPRESSED_LEN,
    };
    if output.len() <= pub_len + MAC_LEN {
        return Err(SidfError::SchemeOutputTooShort { len: output.len() });
    }
    let (ephemeral_public, rest) = output.split_at(pub_len);
    let (ciphertext, tag) = rest.split_at(rest.len() - MAC_LEN);

    let shared: Vec<u8> = match scheme {
        ProtectionScheme::ProfileA => {
            let mut peer = [0u8; X25519_KEY_LEN];
            peer.copy_from_slice(ephemeral_public);
            let secret = x25519_dalek::StaticSecret::from(key.x25519_bytes()?);
            secret
                .diffie_hellman(&x25519_dalek::PublicKey::from(peer))
                .as_bytes()
                .to_vec()
        }
        _ => {
            let peer = p256::PublicKey::from_sec1_bytes(ephemeral_public)
                .map_err(|_| SidfError::InvalidPublicKey { scheme })?;
            let secret = key.p256_secret()?;
            p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine())
                .raw_secret_bytes()
                .to_vec()
        }
    };

    let keys = EciesKeys::derive(&shared, ephemeral_public);
    if keys.tag(ciphertext) != tag {
        return Err(SidfError::MacMismatch);
    }
    let mut plaintext = ciphertext.to_vec();
    keys.apply_ctr(&mut plaintext);
    Ok(bcd_decode(&plaintext))
}
