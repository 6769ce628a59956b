//! Core 5G identifiers: PLMN, TAI, S-NSSAI, SUPI, 5G-GUTI and 5G-S-TMSI.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Public Land Mobile Network identifier.
///
/// A PLMN consists of:
/// - MCC (Mobile Country Code): 3 decimal digits
/// - MNC (Mobile Network Code): 2 or 3 decimal digits
///
/// `long_mnc` records whether the MNC is written with 3 digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Plmn {
    /// Mobile Country Code (range 0-999)
    pub mcc: u16,
    /// Mobile Network Code (range 0-999)
    pub mnc: u16,
    /// True if MNC is 3 digits, false if 2 digits
    #[serde(default)]
    pub long_mnc: bool,
}

impl Plmn {
    /// Creates a new PLMN with the given MCC and MNC.
    pub const fn new(mcc: u16, mnc: u16, long_mnc: bool) -> Self {
        Self { mcc, mnc, long_mnc }
    }

    /// Builds a PLMN from its decimal digit strings, e.g. `("001", "01")`.
    ///
    /// The MNC length (2 or 3 digits) is taken from the string.
    pub fn from_digits(mcc: &str, mnc: &str) -> Result<Self, Error> {
        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if mcc.len() != 3 || !all_digits(mcc) {
            return Err(Error::InvalidIdentifier(format!(
                "MCC must be 3 digits, got {mcc:?}"
            )));
        }
        if !(2..=3).contains(&mnc.len()) || !all_digits(mnc) {
            return Err(Error::InvalidIdentifier(format!(
                "MNC must be 2 or 3 digits, got {mnc:?}"
            )));
        }
        let parse = |s: &str| {
            s.parse::<u16>()
                .map_err(|e| Error::InvalidIdentifier(format!("{s}: {e}")))
        };
        Ok(Self::new(parse(mcc)?, parse(mnc)?, mnc.len() == 3))
    }

    /// Returns true if this PLMN has values set.
    pub fn has_value(&self) -> bool {
        self.mcc > 0 || self.mnc > 0
    }

    /// MCC as a 3-digit string.
    pub fn mcc_string(&self) -> String {
        format!("{:03}", self.mcc)
    }

    /// MNC as a 2- or 3-digit string.
    pub fn mnc_string(&self) -> String {
        if self.long_mnc {
            format!("{:03}", self.mnc)
        } else {
            format!("{:02}", self.mnc)
        }
    }

    /// Encodes the PLMN to 3GPP format (3 bytes).
    ///
    /// The encoding follows 3GPP TS 24.008 format:
    /// - Byte 0: MCC digit 2 (high nibble) | MCC digit 1 (low nibble)
    /// - Byte 1: MNC digit 3 or 0xF (high nibble) | MCC digit 3 (low nibble)
    /// - Byte 2: MNC digit 2 (high nibble) | MNC digit 1 (low nibble)
    pub fn encode(&self) -> [u8; 3] {
        let mcc3 = (self.mcc % 10) as u8;
        let mcc2 = ((self.mcc % 100) / 10) as u8;
        let mcc1 = ((self.mcc % 1000) / 100) as u8;

        let mnc = self.mnc;
        let (mnc1, mnc2, mnc3) = if self.long_mnc {
            (
                ((mnc % 1000) / 100) as u8,
                ((mnc % 100) / 10) as u8,
                (mnc % 10) as u8,
            )
        } else {
            (((mnc % 100) / 10) as u8, (mnc % 10) as u8, 0x0F)
        };

        [(mcc2 << 4) | mcc1, (mnc3 << 4) | mcc3, (mnc2 << 4) | mnc1]
    }

    /// Decodes a PLMN from the 3-byte TS 24.008 encoding.
    pub fn decode(bytes: [u8; 3]) -> Self {
        let mcc1 = (bytes[0] & 0x0F) as u16;
        let mcc2 = ((bytes[0] >> 4) & 0x0F) as u16;
        let mcc3 = (bytes[1] & 0x0F) as u16;
        let mcc = 100 * mcc1 + 10 * mcc2 + mcc3;

        let mnc3 = ((bytes[1] >> 4) & 0x0F) as u16;
        let mnc1 = (bytes[2] & 0x0F) as u16;
        let mnc2 = ((bytes[2] >> 4) & 0x0F) as u16;

        if mnc3 != 0x0F {
            Self::new(mcc, 100 * mnc1 + 10 * mnc2 + mnc3, true)
        } else {
            Self::new(mcc, 10 * mnc1 + mnc2, false)
        }
    }

    /// Serving network name used as KDF input, e.g. `5G:mnc001.mcc001.3gppnetwork.org`.
    ///
    /// Two-digit MNCs are zero padded to three digits.
    pub fn serving_network_name(&self) -> String {
        format!("5G:mnc{:03}.mcc{:03}.3gppnetwork.org", self.mnc, self.mcc)
    }
}

impl fmt::Debug for Plmn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plmn({}-{})", self.mcc_string(), self.mnc_string())
    }
}

impl fmt::Display for Plmn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.mcc_string(), self.mnc_string())
    }
}

/// Tracking Area Identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tai {
    /// PLMN of the tracking area
    pub plmn: Plmn,
    /// Tracking Area Code (24-bit)
    pub tac: u32,
}

impl Tai {
    /// Creates a new TAI.
    pub const fn new(plmn: Plmn, tac: u32) -> Self {
        Self { plmn, tac }
    }

    /// TAC as its 3-byte big-endian wire form.
    pub fn tac_bytes(&self) -> [u8; 3] {
        let b = self.tac.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    /// Rebuilds a TAC from its 3-byte wire form.
    pub fn tac_from_bytes(bytes: [u8; 3]) -> u32 {
        u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
    }

    /// Encodes the TAI as 6 bytes (PLMN followed by TAC).
    pub fn encode(&self) -> [u8; 6] {
        let plmn = self.plmn.encode();
        let tac = self.tac_bytes();
        [plmn[0], plmn[1], plmn[2], tac[0], tac[1], tac[2]]
    }

    /// Decodes a TAI from 6 bytes.
    pub fn decode(bytes: [u8; 6]) -> Self {
        Self {
            plmn: Plmn::decode([bytes[0], bytes[1], bytes[2]]),
            tac: Self::tac_from_bytes([bytes[3], bytes[4], bytes[5]]),
        }
    }
}

/// Single Network Slice Selection Assistance Information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SNssai {
    /// Slice/Service Type
    pub sst: u8,
    /// Slice Differentiator (optional, 24-bit)
    #[serde(default)]
    pub sd: Option<[u8; 3]>,
}

impl SNssai {
    /// Creates an S-NSSAI with only an SST.
    pub const fn new(sst: u8) -> Self {
        Self { sst, sd: None }
    }

    /// Creates an S-NSSAI with SST and SD.
    pub const fn with_sd(sst: u8, sd: [u8; 3]) -> Self {
        Self { sst, sd: Some(sd) }
    }

    /// Parses an SD written as 6 hex digits (`"102030"`). An empty string means no SD.
    pub fn from_hex_sd(sst: u8, sd: &str) -> Result<Self, Error> {
        if sd.is_empty() {
            return Ok(Self::new(sst));
        }
        let bytes = hex::decode(sd)
            .map_err(|e| Error::InvalidIdentifier(format!("SD {sd:?}: {e}")))?;
        let sd: [u8; 3] = bytes
            .try_into()
            .map_err(|_| Error::InvalidIdentifier(format!("SD must be 3 bytes, got {sd:?}")))?;
        Ok(Self::with_sd(sst, sd))
    }

    /// SD as a 24-bit value, if present.
    pub fn sd_as_u32(&self) -> Option<u32> {
        self.sd
            .map(|sd| ((sd[0] as u32) << 16) | ((sd[1] as u32) << 8) | sd[2] as u32)
    }

    /// NAS S-NSSAI value encoding (length not included): SST, optionally followed by SD.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.sst];
        if let Some(sd) = self.sd {
            out.extend_from_slice(&sd);
        }
        out
    }

    /// Decodes a NAS S-NSSAI value. Mapped HPLMN fields beyond the SD are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        match bytes.len() {
            0 => Err(Error::InvalidIdentifier("empty S-NSSAI".into())),
            1 | 2 => Ok(Self::new(bytes[0])),
            _ => Ok(Self::with_sd(bytes[0], [bytes[1], bytes[2], bytes[3]])),
        }
    }
}

impl fmt::Display for SNssai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sd {
            Some(sd) => write!(f, "{}-{}", self.sst, hex::encode(sd)),
            None => write!(f, "{}", self.sst),
        }
    }
}

/// Subscription Permanent Identifier in IMSI form (`imsi-<mcc><mnc><msin>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Supi {
    /// Home PLMN
    pub plmn: Plmn,
    /// Mobile Subscriber Identification Number
    pub msin: String,
}

impl Supi {
    /// Creates a SUPI, checking that the MSIN is numeric.
    pub fn new(plmn: Plmn, msin: &str) -> Result<Self, Error> {
        if msin.is_empty() || !msin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidIdentifier(format!(
                "MSIN must be non-empty decimal digits, got {msin:?}"
            )));
        }
        Ok(Self {
            plmn,
            msin: msin.to_string(),
        })
    }

    /// IMSI digits without the `imsi-` prefix.
    pub fn imsi(&self) -> String {
        format!("{}{}", self.plmn, self.msin)
    }
}

impl fmt::Display for Supi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "imsi-{}", self.imsi())
    }
}

/// 5G Globally Unique Temporary Identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Guti {
    /// PLMN of the assigning AMF
    pub plmn: Plmn,
    /// AMF Region ID (8 bits)
    pub amf_region_id: u8,
    /// AMF Set ID (10 bits)
    pub amf_set_id: u16,
    /// AMF Pointer (6 bits)
    pub amf_pointer: u8,
    /// 5G-TMSI
    pub tmsi: u32,
}

impl Guti {
    /// Creates a new 5G-GUTI.
    pub const fn new(plmn: Plmn, amf_region_id: u8, amf_set_id: u16, amf_pointer: u8, tmsi: u32) -> Self {
        Self {
            plmn,
            amf_region_id,
            amf_set_id,
            amf_pointer,
            tmsi,
        }
    }

    /// The 5G-S-TMSI part of the GUTI.
    pub fn s_tmsi(&self) -> FiveGSTmsi {
        FiveGSTmsi {
            amf_set_id: self.amf_set_id,
            amf_pointer: self.amf_pointer,
            tmsi: self.tmsi,
        }
    }

    /// Encodes the GUTI body (10 bytes): PLMN, region, set/pointer, TMSI.
    pub fn encode(&self) -> [u8; 10] {
        let plmn = self.plmn.encode();
        let set_ptr = ((self.amf_set_id & 0x03FF) << 6) | (self.amf_pointer as u16 & 0x3F);
        let tmsi = self.tmsi.to_be_bytes();
        [
            plmn[0],
            plmn[1],
            plmn[2],
            self.amf_region_id,
            (set_ptr >> 8) as u8,
            set_ptr as u8,
            tmsi[0],
            tmsi[1],
            tmsi[2],
            tmsi[3],
        ]
    }

    /// Decodes a 10-byte GUTI body.
    pub fn decode(bytes: [u8; 10]) -> Self {
        let set_ptr = u16::from_be_bytes([bytes[4], bytes[5]]);
        Self {
            plmn: Plmn::decode([bytes[0], bytes[1], bytes[2]]),
            amf_region_id: bytes[3],
            amf_set_id: set_ptr >> 6,
            amf_pointer: (set_ptr & 0x3F) as u8,
            tmsi: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        }
    }
}

impl fmt::Display for Guti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:02x}-{:03x}-{:02x}-{:08x}",
            self.plmn, self.amf_region_id, self.amf_set_id, self.amf_pointer, self.tmsi
        )
    }
}

/// 5G S-Temporary Mobile Subscriber Identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FiveGSTmsi {
    /// AMF Set ID (10 bits)
    pub amf_set_id: u16,
    /// AMF Pointer (6 bits)
    pub amf_pointer: u8,
    /// 5G-TMSI
    pub tmsi: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plmn_encode_two_digit_mnc() {
        let plmn = Plmn::new(1, 1, false);
        assert_eq!(plmn.encode(), [0x00, 0xF1, 0x10]);
        assert_eq!(Plmn::decode([0x00, 0xF1, 0x10]), plmn);
    }

    #[test]
    fn test_plmn_encode_three_digit_mnc() {
        let plmn = Plmn::new(310, 410, true);
        assert_eq!(plmn.encode(), [0x13, 0x00, 0x14]);
        assert_eq!(Plmn::decode(plmn.encode()), plmn);
    }

    #[test]
    fn test_plmn_from_digits() {
        let plmn = Plmn::from_digits("001", "01").unwrap();
        assert_eq!(plmn, Plmn::new(1, 1, false));
        assert_eq!(plmn.mcc_string(), "001");
        assert_eq!(plmn.mnc_string(), "01");
        assert_eq!(plmn.to_string(), "00101");

        let long = Plmn::from_digits("208", "093").unwrap();
        assert!(long.long_mnc);
        assert_eq!(long.mnc_string(), "093");

        assert!(Plmn::from_digits("01", "01").is_err());
        assert!(Plmn::from_digits("001", "1").is_err());
        assert!(Plmn::from_digits("00a", "01").is_err());
    }

    #[test]
    fn test_serving_network_name() {
        let plmn = Plmn::new(1, 1, false);
        assert_eq!(plmn.serving_network_name(), "5G:mnc001.mcc001.3gppnetwork.org");
        let plmn = Plmn::new(208, 93, false);
        assert_eq!(plmn.serving_network_name(), "5G:mnc093.mcc208.3gppnetwork.org");
    }

    #[test]
    fn test_tai_encode_decode() {
        let tai = Tai::new(Plmn::new(1, 1, false), 1);
        let encoded = tai.encode();
        assert_eq!(encoded, [0x00, 0xF1, 0x10, 0x00, 0x00, 0x01]);
        assert_eq!(Tai::decode(encoded), tai);
    }

    #[test]
    fn test_snssai_from_hex_sd() {
        let s = SNssai::from_hex_sd(1, "102030").unwrap();
        assert_eq!(s.sd, Some([0x10, 0x20, 0x30]));
        assert_eq!(s.sd_as_u32(), Some(0x102030));
        assert_eq!(s.encode(), vec![1, 0x10, 0x20, 0x30]);
        assert_eq!(SNssai::decode(&s.encode()).unwrap(), s);
        assert_eq!(SNssai::from_hex_sd(1, "").unwrap(), SNssai::new(1));
        assert!(SNssai::from_hex_sd(1, "1020").is_err());
    }

    #[test]
    fn test_supi_display() {
        let supi = Supi::new(Plmn::new(1, 1, false), "1234567890").unwrap();
        assert_eq!(supi.to_string(), "imsi-001011234567890");
        assert!(Supi::new(Plmn::new(1, 1, false), "12a4").is_err());
    }

    #[test]
    fn test_guti_encode_decode() {
        let guti = Guti::new(Plmn::new(1, 1, false), 0xCA, 0x3FA, 0x01, 0x2143_6584);
        let encoded = guti.encode();
        assert_eq!(&encoded[..3], &[0x00, 0xF1, 0x10]);
        assert_eq!(encoded[3], 0xCA);
        assert_eq!(Guti::decode(encoded), guti);
        let s_tmsi = guti.s_tmsi();
        assert_eq!(s_tmsi.amf_set_id, 0x3FA);
        assert_eq!(s_tmsi.tmsi, 0x2143_6584);
    }
}
