//! Milenage algorithm set (3GPP TS 35.206) and the 5G-AKA helpers built on it
//!
//! The kernel is AES-128 keyed with the subscriber key K. Every output
//! function is `E_K(rot(TEMP ^ OPc, r) ^ c) ^ OPc` with
//! `TEMP = E_K(RAND ^ OPc)`, differing only in the rotation and constant.
//!
//! On top of the raw functions this module provides both ends of the
//! authentication exchange: [`Milenage::generate_vector`] for the network
//! and [`Milenage::verify_autn`] / [`Milenage::generate_auts`] for the UE.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use thiserror::Error;

/// K, OP and OPc size in bytes
pub const KEY_SIZE: usize = 16;

/// RAND size in bytes
pub const RAND_SIZE: usize = 16;

/// SQN size in bytes
pub const SQN_SIZE: usize = 6;

/// AMF size in bytes
pub const AMF_SIZE: usize = 2;

/// MAC-A / MAC-S size in bytes
pub const MAC_SIZE: usize = 8;

/// RES size in bytes
pub const RES_SIZE: usize = 8;

/// AK size in bytes
pub const AK_SIZE: usize = 6;

/// AUTN size in bytes (SQN^AK || AMF || MAC-A)
pub const AUTN_SIZE: usize = 16;

/// AUTS size in bytes (SQN_MS^AK* || MAC-S)
pub const AUTS_SIZE: usize = 14;

/// Rotation (bits) and constant (last byte) per output function, f1 through f5*.
const R1: u32 = 64;
const R2: u32 = 0;
const R3: u32 = 32;
const R4: u32 = 64;
const R5: u32 = 96;
const C1: u128 = 0x00;
const C2: u128 = 0x01;
const C3: u128 = 0x02;
const C4: u128 = 0x04;
const C5: u128 = 0x08;

/// Errors raised while checking an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MilenageError {
    /// MAC-A in AUTN does not match the locally computed value
    #[error("AUTN MAC verification failed")]
    MacFailure,

    /// SQN in AUTN is not fresh; carries the AUTS for resynchronisation
    #[error("SQN out of range")]
    SynchFailure {
        /// Resynchronisation token for the Authentication Failure message
        auts: [u8; AUTS_SIZE],
    },

    /// Key material of the wrong length
    #[error("invalid {field} length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Field name
        field: &'static str,
        /// Expected length in bytes
        expected: usize,
        /// Received length in bytes
        actual: usize,
    },
}

/// Output of a successful AUTN check: everything the UE needs to derive RES* and Kausf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkaOutput {
    /// RES (f2)
    pub res: [u8; RES_SIZE],
    /// CK (f3)
    pub ck: [u8; KEY_SIZE],
    /// IK (f4)
    pub ik: [u8; KEY_SIZE],
    /// AK (f5)
    pub ak: [u8; AK_SIZE],
    /// SQN recovered from AUTN
    pub sqn: [u8; SQN_SIZE],
}

impl AkaOutput {
    /// SQN ^ AK, the Kausf input.
    pub fn sqn_xor_ak(&self) -> [u8; SQN_SIZE] {
        xor6(&self.sqn, &self.ak)
    }
}

/// Network-side authentication vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthVector {
    /// Challenge
    pub rand: [u8; RAND_SIZE],
    /// Network authentication token
    pub autn: [u8; AUTN_SIZE],
    /// Expected RES (f2)
    pub xres: [u8; RES_SIZE],
    /// CK (f3)
    pub ck: [u8; KEY_SIZE],
    /// IK (f4)
    pub ik: [u8; KEY_SIZE],
    /// AK (f5)
    pub ak: [u8; AK_SIZE],
}

impl AuthVector {
    /// SQN ^ AK, as carried in the first six octets of AUTN.
    pub fn sqn_xor_ak(&self) -> [u8; SQN_SIZE] {
        let mut out = [0u8; SQN_SIZE];
        out.copy_from_slice(&self.autn[..SQN_SIZE]);
        out
    }
}

/// Computes OPc = OP ^ E_K(OP).
pub fn compute_opc(k: &[u8; KEY_SIZE], op: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(k));
    let op_value = u128::from_be_bytes(*op);
    (encrypt(&cipher, op_value) ^ op_value).to_be_bytes()
}

fn encrypt(cipher: &Aes128, block: u128) -> u128 {
    let mut buf = GenericArray::from(block.to_be_bytes());
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf);
    u128::from_be_bytes(out)
}

fn xor6(a: &[u8; 6], b: &[u8; 6]) -> [u8; 6] {
    let mut out = [0u8; 6];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = x ^ y;
    }
    out
}

fn take<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

/// Milenage instance bound to one subscriber (K, OPc).
pub struct Milenage {
    cipher: Aes128,
    opc: u128,
}

impl Milenage {
    /// Creates an instance from K and OPc.
    pub fn new(k: &[u8; KEY_SIZE], opc: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(k)),
            opc: u128::from_be_bytes(*opc),
        }
    }

    /// Creates an instance from K and OP, deriving OPc.
    pub fn with_op(k: &[u8; KEY_SIZE], op: &[u8; KEY_SIZE]) -> Self {
        Self::new(k, &compute_opc(k, op))
    }

    /// Creates an instance from byte slices, checking lengths.
    pub fn from_slices(k: &[u8], opc: &[u8]) -> Result<Self, MilenageError> {
        let check = |field, bytes: &[u8]| -> Result<[u8; KEY_SIZE], MilenageError> {
            bytes.try_into().map_err(|_| MilenageError::InvalidLength {
                field,
                expected: KEY_SIZE,
                actual: bytes.len(),
            })
        };
        Ok(Self::new(&check("K", k)?, &check("OPc", opc)?))
    }

    fn temp(&self, rand: &[u8; RAND_SIZE]) -> u128 {
        encrypt(&self.cipher, u128::from_be_bytes(*rand) ^ self.opc)
    }

    fn out(&self, temp: u128, rotation: u32, constant: u128) -> [u8; 16] {
        let block = (temp ^ self.opc).rotate_left(rotation) ^ constant;
        (encrypt(&self.cipher, block) ^ self.opc).to_be_bytes()
    }

    fn out1(&self, rand: &[u8; RAND_SIZE], sqn: &[u8; SQN_SIZE], amf: &[u8; AMF_SIZE]) -> [u8; 16] {
        let mut in1 = [0u8; 16];
        in1[..6].copy_from_slice(sqn);
        in1[6..8].copy_from_slice(amf);
        in1[8..14].copy_from_slice(sqn);
        in1[14..].copy_from_slice(amf);

        let temp = self.temp(rand);
        let block = (u128::from_be_bytes(in1) ^ self.opc).rotate_left(R1) ^ temp ^ C1;
        (encrypt(&self.cipher, block) ^ self.opc).to_be_bytes()
    }

    /// f1: network authentication code MAC-A.
    pub fn f1(&self, rand: &[u8; RAND_SIZE], sqn: &[u8; SQN_SIZE], amf: &[u8; AMF_SIZE]) -> [u8; MAC_SIZE] {
        take(&self.out1(rand, sqn, amf), 0)
    }

    /// f1*: resynchronisation code MAC-S.
    pub fn f1_star(&self, rand: &[u8; RAND_SIZE], sqn: &[u8; SQN_SIZE], amf: &[u8; AMF_SIZE]) -> [u8; MAC_SIZE] {
        take(&self.out1(rand, sqn, amf), 8)
    }

    /// f2 (RES) and f5 (AK), which share one kernel invocation.
    pub fn f2_f5(&self, rand: &[u8; RAND_SIZE]) -> ([u8; RES_SIZE], [u8; AK_SIZE]) {
        let out2 = self.out(self.temp(rand), R2, C2);
        (take(&out2, 8), take(&out2, 0))
    }

    /// f3: cipher key CK.
    pub fn f3(&self, rand: &[u8; RAND_SIZE]) -> [u8; KEY_SIZE] {
        self.out(self.temp(rand), R3, C3)
    }

    /// f4: integrity key IK.
    pub fn f4(&self, rand: &[u8; RAND_SIZE]) -> [u8; KEY_SIZE] {
        self.out(self.temp(rand), R4, C4)
    }

    /// f5*: anonymity key used in AUTS.
    pub fn f5_star(&self, rand: &[u8; RAND_SIZE]) -> [u8; AK_SIZE] {
        take(&self.out(self.temp(rand), R5, C5), 0)
    }

    /// Builds an authentication vector for `sqn` (network side).
    pub fn generate_vector(
        &self,
        rand: &[u8; RAND_SIZE],
        sqn: &[u8; SQN_SIZE],
        amf: &[u8; AMF_SIZE],
    ) -> AuthVector {
        let mac_a = self.f1(rand, sqn, amf);
        let (xres, ak) = self.f2_f5(rand);

        let mut autn = [0u8; AUTN_SIZE];
        autn[..6].copy_from_slice(&xor6(sqn, &ak));
        autn[6..8].copy_from_slice(amf);
        autn[8..].copy_from_slice(&mac_a);

        AuthVector {
            rand: *rand,
            autn,
            xres,
            ck: self.f3(rand),
            ik: self.f4(rand),
            ak,
        }
    }

    /// Checks AUTN and SQN freshness (UE side).
    ///
    /// `sqn_ms` is the highest SQN the USIM has accepted. A network SQN lower
    /// than it is rejected with [`MilenageError::SynchFailure`] carrying AUTS.
    pub fn verify_autn(
        &self,
        rand: &[u8; RAND_SIZE],
        autn: &[u8; AUTN_SIZE],
        sqn_ms: &[u8; SQN_SIZE],
    ) -> Result<AkaOutput, MilenageError> {
        let (res, ak) = self.f2_f5(rand);
        let sqn = xor6(&take(autn, 0), &ak);
        let amf: [u8; AMF_SIZE] = take(autn, 6);
        let mac_a: [u8; MAC_SIZE] = take(autn, 8);

        if self.f1(rand, &sqn, &amf) != mac_a {
            return Err(MilenageError::MacFailure);
        }
        if sqn_ms > &sqn {
            return Err(MilenageError::SynchFailure {
                auts: self.generate_auts(rand, sqn_ms),
            });
        }

        Ok(AkaOutput {
            res,
            ck: self.f3(rand),
            ik: self.f4(rand),
            ak,
            sqn,
        })
    }

    /// Builds AUTS = (SQN_MS ^ AK*) || MAC-S. The AMF input to f1* is zero.
    pub fn generate_auts(&self, rand: &[u8; RAND_SIZE], sqn_ms: &[u8; SQN_SIZE]) -> [u8; AUTS_SIZE] {
        let ak_star = self.f5_star(rand);
        let mac_s = self.f1_star(rand, sqn_ms, &[0, 0]);

        let mut auts = [0u8; AUTS_SIZE];
        auts[..6].copy_from_slice(&xor6(sqn_ms, &ak_star));
        auts[6..].copy_from_slice(&mac_s);
        auts
    }

    /// Recovers SQN_MS from AUTS and checks MAC-S (network side).
    pub fn resync_sqn(&self, rand: &[u8; RAND_SIZE], auts: &[u8; AUTS_SIZE]) -> Result<[u8; SQN_SIZE], MilenageError> {
        let sqn_ms = xor6(&take(auts, 0), &self.f5_star(rand));
        let mac_s: [u8; MAC_SIZE] = take(auts, 6);
        if self.f1_star(rand, &sqn_ms, &[0, 0]) != mac_s {
            return Err(MilenageError::MacFailure);
        }
        Ok(sqn_ms)
    }
}
