//! Cryptography for coretester
//!
//! - Milenage and 5G-AKA key derivation (TS 35.206, TS 33.501 Annex A)
//! - NAS ciphering NEA0-3 and integrity NIA0-3 on top of AES, SNOW 3G and ZUC
//! - SUCI concealment and de-concealment (null scheme, ECIES Profile A and B)

pub mod kdf;
pub mod milenage;
pub mod nea;
pub mod nia;
pub mod sidf;
pub mod snow3g;

pub use kdf::{AkaKeys, AlgorithmKind, KdfError};
pub use milenage::{AkaOutput, AuthVector, Milenage, MilenageError};
pub use nea::CipheringAlgorithm;
pub use nia::IntegrityAlgorithm;
pub use sidf::{HomeNetworkPrivateKey, HomeNetworkPublicKey, SidfError, Suci};
