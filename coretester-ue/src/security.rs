//! UE NAS security context
//!
//! Holds the subscription credentials, the keys derived from a 5G-AKA run,
//! the algorithms selected by the network and both NAS COUNTs.
//!
//! Every protected uplink message goes through
//! [`UeSecurityContext::encode_with_security`], which numbers it from the
//! uplink COUNT and then advances the COUNT by one. The owner wraps the
//! context in a mutex so that encode and increment happen as one step.

use std::fmt;

use coretester_common::{OpType, Supi, UeConfig};
use coretester_crypto::kdf::{derive_algorithm_key, derive_aka_keys, KEY_128_SIZE, KEY_256_SIZE};
use coretester_crypto::{AlgorithmKind, CipheringAlgorithm, IntegrityAlgorithm, Milenage};
use coretester_nas::{
    cipher_nas_payload, peek_security_header_type, NasCount, NasDirection, NasKeySetIdentifier, NasMessage,
    ProtectionParams, SecuredNasMessage, SecurityError, SecurityHeaderType, UeSecurityCapability,
};
use tracing::{debug, trace};

use crate::error::{Result, UeError};

/// Integrity algorithms, strongest first.
const INTEGRITY_PREFERENCE: [IntegrityAlgorithm; 4] = [
    IntegrityAlgorithm::Nia3,
    IntegrityAlgorithm::Nia2,
    IntegrityAlgorithm::Nia1,
    IntegrityAlgorithm::Nia0,
];

/// Ciphering algorithms, strongest first.
const CIPHERING_PREFERENCE: [CipheringAlgorithm; 4] = [
    CipheringAlgorithm::Nea3,
    CipheringAlgorithm::Nea2,
    CipheringAlgorithm::Nea1,
    CipheringAlgorithm::Nea0,
];

/// Picks the strongest integrity and ciphering algorithm set in `capability`.
pub fn select_algorithms(
    capability: Option<&UeSecurityCapability>,
) -> Result<(IntegrityAlgorithm, CipheringAlgorithm)> {
    let capability = capability.ok_or(UeError::NoSupportedAlgorithm("integrity"))?;
    let integrity = INTEGRITY_PREFERENCE
        .into_iter()
        .find(|alg| capability.supports_integrity(*alg))
        .ok_or(UeError::NoSupportedAlgorithm("integrity"))?;
    let ciphering = CIPHERING_PREFERENCE
        .into_iter()
        .find(|alg| capability.supports_ciphering(*alg))
        .ok_or(UeError::NoSupportedAlgorithm("ciphering"))?;
    Ok((integrity, ciphering))
}

/// UE security capability advertised from the configured algorithm set.
/// NEA0 and NIA0 are always included.
pub fn capability_from_config(config: &UeConfig) -> UeSecurityCapability {
    let algs = &config.supported_algs;
    let mut ciphering = vec![CipheringAlgorithm::Nea0];
    let mut integrity = vec![IntegrityAlgorithm::Nia0];
    for (enabled, alg) in [
        (algs.nea1, CipheringAlgorithm::Nea1),
        (algs.nea2, CipheringAlgorithm::Nea2),
        (algs.nea3, CipheringAlgorithm::Nea3),
    ] {
        if enabled {
            ciphering.push(alg);
        }
    }
    for (enabled, alg) in [
        (algs.nia1, IntegrityAlgorithm::Nia1),
        (algs.nia2, IntegrityAlgorithm::Nia2),
        (algs.nia3, IntegrityAlgorithm::Nia3),
    ] {
        if enabled {
            integrity.push(alg);
        }
    }
    UeSecurityCapability::new(&ciphering, &integrity)
}

pub struct UeSecurityContext {
    supi: Supi,
    milenage: Milenage,
    /// Highest SQN accepted so far
    sqn: [u8; 6],
    capability: UeSecurityCapability,
    ngksi: NasKeySetIdentifier,
    kamf: Option<[u8; KEY_256_SIZE]>,
    k_nas_enc: [u8; KEY_128_SIZE],
    k_nas_int: [u8; KEY_128_SIZE],
    integrity: IntegrityAlgorithm,
    ciphering: CipheringAlgorithm,
    ul_count: NasCount,
    dl_count: NasCount,
    /// Set once NAS keys are derived for the current context
    active: bool,
}

impl fmt::Debug for UeSecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UeSecurityContext")
            .field("supi", &self.supi.to_string())
            .field("ngksi", &self.ngksi)
            .field("integrity", &self.integrity)
            .field("ciphering", &self.ciphering)
            .field("ul_count", &self.ul_count)
            .field("dl_count", &self.dl_count)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl UeSecurityContext {
    pub fn new(config: &UeConfig) -> Result<Self> {
        let supi = Supi::new(config.hplmn, &config.msin).map_err(|e| UeError::Config(e.to_string()))?;
        let milenage = match config.op_type {
            OpType::Opc => Milenage::new(&config.key, &config.op),
            OpType::Op => Milenage::with_op(&config.key, &config.op),
        };
        let capability = capability_from_config(config);
        let (integrity, ciphering) = select_algorithms(Some(&capability))?;
        Ok(Self {
            supi,
            milenage,
            sqn: config.sqn,
            capability,
            ngksi: NasKeySetIdentifier::no_key(),
            kamf: None,
            k_nas_enc: [0; KEY_128_SIZE],
            k_nas_int: [0; KEY_128_SIZE],
            integrity,
            ciphering,
            ul_count: NasCount::default(),
            dl_count: NasCount::default(),
            active: false,
        })
    }

    // ========== Accessors ==========

    pub fn supi(&self) -> &Supi {
        &self.supi
    }

    pub fn capability(&self) -> &UeSecurityCapability {
        &self.capability
    }

    pub fn ngksi(&self) -> NasKeySetIdentifier {
        self.ngksi
    }

    pub fn set_ngksi(&mut self, ngksi: NasKeySetIdentifier) {
        self.ngksi = ngksi;
    }

    pub fn algorithms(&self) -> (IntegrityAlgorithm, CipheringAlgorithm) {
        (self.integrity, self.ciphering)
    }

    pub fn set_algorithms(&mut self, integrity: IntegrityAlgorithm, ciphering: CipheringAlgorithm) {
        self.integrity = integrity;
        self.ciphering = ciphering;
    }

    pub fn ul_count(&self) -> NasCount {
        self.ul_count
    }

    pub fn dl_count(&self) -> NasCount {
        self.dl_count
    }

    pub fn kamf(&self) -> Option<&[u8; KEY_256_SIZE]> {
        self.kamf.as_ref()
    }

    /// True once NAS keys are in place.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sqn(&self) -> [u8; 6] {
        self.sqn
    }

    // ========== Key derivation ==========

    /// Checks AUTN, computes RES* and stores Kamf.
    ///
    /// On a bad MAC or a stale SQN, returns [`UeError::Authentication`]
    /// carrying the Milenage error (with AUTS for a synch failure).
    pub fn derive_res_star_and_set_key(
        &mut self,
        rand: &[u8; 16],
        autn: &[u8; 16],
        serving_network_name: &str,
    ) -> Result<[u8; KEY_128_SIZE]> {
        let output = self.milenage.verify_autn(rand, autn, &self.sqn)?;
        let keys = derive_aka_keys(
            &output.ck,
            &output.ik,
            serving_network_name,
            rand,
            &output.res,
            &output.sqn_xor_ak(),
            &self.supi.imsi(),
        )?;
        self.sqn = output.sqn;
        self.kamf = Some(keys.kamf);
        // A fresh Kamf invalidates the previous NAS keys until the next SMC.
        self.active = false;
        debug!(supi = %self.supi, snn = serving_network_name, "derived RES* and Kamf");
        Ok(keys.res_star)
    }

    /// Derives KNASenc and KNASint from Kamf for the selected algorithms.
    pub fn derive_alg_keys(&mut self) -> Result<()> {
        let kamf = self.kamf.as_ref().ok_or(UeError::NoSecurityContext)?;
        self.k_nas_enc = derive_algorithm_key(kamf, AlgorithmKind::NasEnc, self.ciphering.id())?;
        self.k_nas_int = derive_algorithm_key(kamf, AlgorithmKind::NasInt, self.integrity.id())?;
        self.active = true;
        debug!(
            supi = %self.supi,
            integrity = ?self.integrity,
            ciphering = ?self.ciphering,
            "derived NAS keys"
        );
        Ok(())
    }

    /// Resets both COUNTs, as on activation of a new security context.
    pub fn reset_counts(&mut self) {
        self.ul_count.reset();
        self.dl_count.reset();
    }

    fn params(&self, count: NasCount, direction: NasDirection) -> ProtectionParams<'_> {
        ProtectionParams {
            integrity: self.integrity,
            ciphering: self.ciphering,
            k_nas_int: &self.k_nas_int,
            k_nas_enc: &self.k_nas_enc,
            count,
            direction,
        }
    }

    // ========== Uplink ==========

    /// Protects `plain` under `header_type` with the current uplink COUNT,
    /// then advances the COUNT by one.
    pub fn encode_with_security(&mut self, plain: &[u8], header_type: SecurityHeaderType) -> Result<Vec<u8>> {
        if !self.active {
            return Err(UeError::NoSecurityContext);
        }
        let secured = SecuredNasMessage::protect(plain, header_type, &self.params(self.ul_count, NasDirection::Uplink))?;
        trace!(supi = %self.supi, count = self.ul_count.to_u32(), ?header_type, "protected uplink NAS");
        self.ul_count.increment();
        Ok(secured.encode())
    }

    /// Ciphers `plain` with the current uplink COUNT without consuming it,
    /// as needed for the NAS message container of a Service Request.
    pub fn cipher_container(&self, plain: &[u8]) -> Result<Vec<u8>> {
        if !self.active {
            return Err(UeError::NoSecurityContext);
        }
        let mut out = plain.to_vec();
        cipher_nas_payload(self.ciphering, &self.k_nas_enc, self.ul_count, NasDirection::Uplink, &mut out);
        Ok(out)
    }

    // ========== Downlink ==========

    /// Decodes a downlink NAS message, checking and removing its protection.
    ///
    /// A Security Mode Command under "integrity protected with new security
    /// context" activates the context it carries: both COUNTs restart from
    /// zero, its algorithms are taken and the NAS keys derived before the MAC
    /// is checked.
    pub fn decode(&mut self, data: &[u8]) -> Result<NasMessage> {
        let header_type = peek_security_header_type(data)?;
        if !header_type.is_protected() {
            return Ok(NasMessage::decode(data)?);
        }

        let secured = SecuredNasMessage::decode(data)?;
        match header_type {
            SecurityHeaderType::IntegrityProtectedWithNewSecurityContext => self.activate_from_smc(secured),
            // The network never starts a new context with a ciphered message.
            SecurityHeaderType::IntegrityProtectedAndCipheredWithNewSecurityContext => {
                Err(SecurityError::UnsupportedHeaderType(header_type).into())
            }
            _ => {
                if !self.active {
                    return Err(UeError::NoSecurityContext);
                }
                self.dl_count.track_received(secured.header.sequence_number);
                let params = self.params(self.dl_count, NasDirection::Downlink);
                secured.verify(&params)?;
                let plain = secured.into_plain(&params);
                Ok(NasMessage::decode(&plain)?)
            }
        }
    }

    fn activate_from_smc(&mut self, secured: SecuredNasMessage) -> Result<NasMessage> {
        let message = NasMessage::decode(&secured.payload)?;
        let NasMessage::SecurityModeCommand(smc) = &message else {
            return Err(UeError::UnexpectedNewContext(message.message_type()));
        };

        self.reset_counts();
        self.set_algorithms(smc.selected_algorithms.integrity, smc.selected_algorithms.ciphering);
        self.ngksi = smc.ngksi;
        self.derive_alg_keys()?;

        // The MAC of the SMC is always checked at COUNT 0, whatever its SQN.
        let params = self.params(self.dl_count, NasDirection::Downlink);
        if let Err(e) = secured.verify(&params) {
            self.active = false;
            return Err(e.into());
        }
        Ok(message)
    }
}
