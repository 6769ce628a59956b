//! Configuration records for the simulated gNB and UEs.
//!
//! Records are plain data passed into constructors; nothing here is global.
//! They load from YAML with `serde_yaml`, and key material is written as hex.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{Guti, Plmn, SNssai};

/// Default SCTP port of the AMF N2 interface.
pub const DEFAULT_NGAP_PORT: u16 = 38412;

/// Default GTP-U port.
pub const DEFAULT_GTP_PORT: u16 = 2152;

/// Default base for gNB-allocated downlink TEIDs.
pub const DEFAULT_DL_TEID_BASE: u32 = 1_657_545_292;

/// AMF (Access and Mobility Management Function) endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmfConfig {
    /// IP address of the AMF
    pub address: IpAddr,
    /// SCTP port of the AMF (typically 38412)
    #[serde(default = "default_ngap_port")]
    pub port: u16,
}

impl AmfConfig {
    /// Creates a new AMF endpoint.
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }
}

fn default_ngap_port() -> u16 {
    DEFAULT_NGAP_PORT
}

fn default_gtp_port() -> u16 {
    DEFAULT_GTP_PORT
}

fn default_dl_teid_base() -> u32 {
    DEFAULT_DL_TEID_BASE
}

fn default_gnb_id_length() -> u8 {
    24
}

fn default_paging_drx() -> u16 {
    128
}

fn default_ran_node_name() -> String {
    "coretester-gnb".to_string()
}

/// gNB (gNodeB) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GnbConfig {
    /// gNB identifier
    pub gnb_id: u32,
    /// gNB ID length in bits (22-32)
    #[serde(default = "default_gnb_id_length")]
    pub gnb_id_length: u8,
    /// RAN node name advertised in NG Setup
    #[serde(default = "default_ran_node_name")]
    pub ran_node_name: String,
    /// Served PLMN
    pub plmn: Plmn,
    /// Tracking Area Code (24-bit)
    pub tac: u32,
    /// NR Cell Identity (36-bit)
    pub nci: u64,
    /// Supported slices
    pub slices: Vec<SNssai>,
    /// AMF endpoints, one association each
    pub amf_configs: Vec<AmfConfig>,
    /// Local address of the N2 (NGAP) interface
    pub ngap_ip: IpAddr,
    /// Local address of the N3 (GTP-U) interface
    pub gtp_ip: IpAddr,
    /// GTP-U port
    #[serde(default = "default_gtp_port")]
    pub gtp_port: u16,
    /// Default paging DRX in radio frames (32, 64, 128 or 256)
    #[serde(default = "default_paging_drx")]
    pub paging_drx: u16,
    /// First downlink TEID handed out by the allocator
    #[serde(default = "default_dl_teid_base")]
    pub dl_teid_base: u32,
}

impl Default for GnbConfig {
    fn default() -> Self {
        Self {
            gnb_id: 1,
            gnb_id_length: default_gnb_id_length(),
            ran_node_name: default_ran_node_name(),
            plmn: Plmn::new(1, 1, false),
            tac: 1,
            nci: 0x10,
            slices: vec![SNssai::with_sd(1, [0x10, 0x20, 0x30])],
            amf_configs: vec![AmfConfig::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DEFAULT_NGAP_PORT,
            )],
            ngap_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            gtp_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            gtp_port: DEFAULT_GTP_PORT,
            paging_drx: default_paging_drx(),
            dl_teid_base: DEFAULT_DL_TEID_BASE,
        }
    }
}

impl GnbConfig {
    /// Parses a gNB configuration from a YAML string and validates it.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a gNB configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Serializes the configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks field ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if !(22..=32).contains(&self.gnb_id_length) {
            return Err(Error::Config(format!(
                "gnb_id_length must be in 22..=32, got {}",
                self.gnb_id_length
            )));
        }
        if self.gnb_id_length < 32 && self.gnb_id >> self.gnb_id_length != 0 {
            return Err(Error::Config(format!(
                "gnb_id {} does not fit in {} bits",
                self.gnb_id, self.gnb_id_length
            )));
        }
        if self.tac > 0xFF_FFFF {
            return Err(Error::Config(format!("tac {} exceeds 24 bits", self.tac)));
        }
        if self.nci > 0xF_FFFF_FFFF {
            return Err(Error::Config(format!("nci {:#x} exceeds 36 bits", self.nci)));
        }
        if self.slices.is_empty() {
            return Err(Error::Config("at least one slice is required".into()));
        }
        if self.amf_configs.is_empty() {
            return Err(Error::Config("at least one AMF endpoint is required".into()));
        }
        if !matches!(self.paging_drx, 32 | 64 | 128 | 256) {
            return Err(Error::Config(format!(
                "paging_drx must be 32, 64, 128 or 256, got {}",
                self.paging_drx
            )));
        }
        Ok(())
    }
}

/// Operator key type for authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// Operator key (OP), converted to OPc before use
    Op,
    /// Derived operator key (OPc), used directly
    #[default]
    Opc,
}

/// NAS security algorithms the UE advertises, besides the always-present NIA0/NEA0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedAlgs {
    /// NIA1 (SNOW3G-based integrity)
    pub nia1: bool,
    /// NIA2 (AES-based integrity)
    pub nia2: bool,
    /// NIA3 (ZUC-based integrity)
    pub nia3: bool,
    /// NEA1 (SNOW3G-based ciphering)
    pub nea1: bool,
    /// NEA2 (AES-based ciphering)
    pub nea2: bool,
    /// NEA3 (ZUC-based ciphering)
    pub nea3: bool,
}

impl Default for SupportedAlgs {
    fn default() -> Self {
        Self {
            nia1: true,
            nia2: true,
            nia3: true,
            nea1: true,
            nea2: true,
            nea3: true,
        }
    }
}

/// SUCI protection scheme identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtectionScheme {
    /// Null scheme, MSIN sent in clear
    #[default]
    Null,
    /// ECIES Profile A (X25519)
    ProfileA,
    /// ECIES Profile B (P-256)
    ProfileB,
}

impl ProtectionScheme {
    /// Scheme identifier carried in the SUCI.
    pub fn id(&self) -> u8 {
        match self {
            ProtectionScheme::Null => 0,
            ProtectionScheme::ProfileA => 1,
            ProtectionScheme::ProfileB => 2,
        }
    }

    /// Maps a scheme identifier back to the enum.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(ProtectionScheme::Null),
            1 => Some(ProtectionScheme::ProfileA),
            2 => Some(ProtectionScheme::ProfileB),
            _ => None,
        }
    }
}

fn default_routing_indicator() -> String {
    "0000".to_string()
}

fn default_amf_field() -> [u8; 2] {
    [0x80, 0x00]
}

fn default_dnn() -> String {
    "internet".to_string()
}

fn default_pdu_session_id() -> u8 {
    1
}

fn default_imeisv() -> String {
    "3569380356438091".to_string()
}

/// UE (subscriber) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeConfig {
    /// Mobile Subscriber Identification Number (digits after MCC/MNC)
    pub msin: String,
    /// Home PLMN
    pub hplmn: Plmn,
    /// Long-term subscriber key K (hex in YAML)
    #[serde(with = "hex_array")]
    pub key: [u8; 16],
    /// Operator key, OP or OPc according to `op_type` (hex in YAML)
    #[serde(with = "hex_array")]
    pub op: [u8; 16],
    /// Whether `op` holds OP or OPc
    #[serde(default)]
    pub op_type: OpType,
    /// Authentication Management Field (hex in YAML)
    #[serde(with = "hex_array", default = "default_amf_field")]
    pub amf: [u8; 2],
    /// Initial sequence number SQN (hex in YAML)
    #[serde(with = "hex_array")]
    pub sqn: [u8; 6],
    /// Routing indicator, 1 to 4 digits
    #[serde(default = "default_routing_indicator")]
    pub routing_indicator: String,
    /// SUCI protection scheme
    #[serde(default)]
    pub protection_scheme: ProtectionScheme,
    /// Home network public key identifier
    #[serde(default)]
    pub home_network_public_key_id: u8,
    /// Home network public key (hex in YAML, empty for the null scheme)
    #[serde(with = "hex_vec", default)]
    pub home_network_public_key: Vec<u8>,
    /// IMEISV, 16 digits
    #[serde(default = "default_imeisv")]
    pub imeisv: String,
    /// Data network requested at PDU session establishment
    #[serde(default = "default_dnn")]
    pub dnn: String,
    /// Slice requested at PDU session establishment
    pub snssai: SNssai,
    /// PDU session identifier used for the default session
    #[serde(default = "default_pdu_session_id")]
    pub pdu_session_id: u8,
    /// Algorithms advertised in the UE security capability
    #[serde(default)]
    pub supported_algs: SupportedAlgs,
    /// 5G-GUTI to present instead of the SUCI on the first registration
    #[serde(default)]
    pub guti: Option<Guti>,
}

impl Default for UeConfig {
    fn default() -> Self {
        Self {
            msin: "0000000001".to_string(),
            hplmn: Plmn::new(1, 1, false),
            key: [0u8; 16],
            op: [0u8; 16],
            op_type: OpType::Opc,
            amf: default_amf_field(),
            sqn: [0, 0, 0, 0, 0, 1],
            routing_indicator: default_routing_indicator(),
            protection_scheme: ProtectionScheme::Null,
            home_network_public_key_id: 0,
            home_network_public_key: Vec::new(),
            imeisv: default_imeisv(),
            dnn: default_dnn(),
            snssai: SNssai::with_sd(1, [0x10, 0x20, 0x30]),
            pdu_session_id: default_pdu_session_id(),
            supported_algs: SupportedAlgs::default(),
            guti: None,
        }
    }
}

impl UeConfig {
    /// Parses a UE configuration from a YAML string and validates it.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a UE configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Serializes the configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks field contents that serde cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if self.msin.is_empty() || !digits(&self.msin) {
            return Err(Error::Config(format!(
                "msin must be non-empty decimal digits, got {:?}",
                self.msin
            )));
        }
        if self.routing_indicator.is_empty()
            || self.routing_indicator.len() > 4
            || !digits(&self.routing_indicator)
        {
            return Err(Error::Config(format!(
                "routing indicator must be 1 to 4 digits, got {:?}",
                self.routing_indicator
            )));
        }
        if self.imeisv.len() != 16 || !digits(&self.imeisv) {
            return Err(Error::Config(format!(
                "imeisv must be 16 digits, got {:?}",
                self.imeisv
            )));
        }
        if self.protection_scheme != ProtectionScheme::Null
            && self.home_network_public_key.is_empty()
        {
            return Err(Error::Config(format!(
                "{:?} requires a home network public key",
                self.protection_scheme
            )));
        }
        if !(1..=15).contains(&self.pdu_session_id) {
            return Err(Error::Config(format!(
                "pdu_session_id must be in 1..=15, got {}",
                self.pdu_session_id
            )));
        }
        Ok(())
    }
}

mod hex_array {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(value: &[u8; N], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(d: D) -> Result<[u8; N], D::Error> {
        let text = String::deserialize(d)?;
        let bytes = hex::decode(text.trim()).map_err(de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| de::Error::custom(format!("expected {N} bytes of hex, got {len}")))
    }
}

mod hex_vec {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text.trim()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gnb_config_from_yaml() {
        let yaml = r#"
gnb_id: 1
plmn:
  mcc: 1
  mnc: 1
tac: 1
nci: 16
slices:
  - sst: 1
    sd: [16, 32, 48]
amf_configs:
  - address: 127.0.0.1
ngap_ip: 127.0.0.1
gtp_ip: 127.0.0.1
"#;
        let config = GnbConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.gnb_id, 1);
        assert_eq!(config.gnb_id_length, 24);
        assert_eq!(config.plmn, Plmn::new(1, 1, false));
        assert_eq!(config.amf_configs[0].port, DEFAULT_NGAP_PORT);
        assert_eq!(config.gtp_port, DEFAULT_GTP_PORT);
        assert_eq!(config.paging_drx, 128);
        assert_eq!(config.slices[0].sd, Some([0x10, 0x20, 0x30]));
    }

    #[test]
    fn test_gnb_config_rejects_bad_values() {
        let mut config = GnbConfig::default();
        config.tac = 0x100_0000;
        assert!(config.validate().is_err());

        let mut config = GnbConfig::default();
        config.amf_configs.clear();
        assert!(config.validate().is_err());

        let mut config = GnbConfig::default();
        config.gnb_id_length = 22;
        config.gnb_id = 1 << 22;
        assert!(config.validate().is_err());

        assert!(GnbConfig::default().validate().is_ok());
    }

    #[test]
    fn test_gnb_config_roundtrip() {
        let config = GnbConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(GnbConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_ue_config_from_yaml() {
        let yaml = r#"
msin: "1234567890"
hplmn:
  mcc: 1
  mnc: 1
key: "369f7bd3067faec142c47ed9132e942a"
op: "34e89843fe0683dc961873ebc05b8a35"
sqn: "000000000001"
snssai:
  sst: 1
protection_scheme: profile-a
home_network_public_key_id: 1
home_network_public_key: "5a8d38864820197c3394b92613b20b91633cbd897119273bf8e4a6f4eec0a650"
"#;
        let config = UeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.msin, "1234567890");
        assert_eq!(config.key[0], 0x36);
        assert_eq!(config.op_type, OpType::Opc);
        assert_eq!(config.amf, [0x80, 0x00]);
        assert_eq!(config.sqn, [0, 0, 0, 0, 0, 1]);
        assert_eq!(config.protection_scheme, ProtectionScheme::ProfileA);
        assert_eq!(config.home_network_public_key.len(), 32);
        assert_eq!(config.routing_indicator, "0000");
        assert_eq!(config.dnn, "internet");
    }

    #[test]
    fn test_ue_config_rejects_short_key() {
        let yaml = r#"
msin: "1234567890"
hplmn: { mcc: 1, mnc: 1 }
key: "369f7b"
op: "34e89843fe0683dc961873ebc05b8a35"
sqn: "000000000001"
snssai: { sst: 1 }
"#;
        assert!(UeConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_ue_config_validation() {
        let mut config = UeConfig::default();
        assert!(config.validate().is_ok());

        config.routing_indicator = "12345".into();
        assert!(config.validate().is_err());

        let mut config = UeConfig::default();
        config.protection_scheme = ProtectionScheme::ProfileA;
        assert!(config.validate().is_err());

        let mut config = UeConfig::default();
        config.msin = "12ab".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_protection_scheme_ids() {
        for scheme in [
            ProtectionScheme::Null,
            ProtectionScheme::ProfileA,
            ProtectionScheme::ProfileB,
        ] {
            assert_eq!(ProtectionScheme::from_id(scheme.id()), Some(scheme));
        }
        assert_eq!(ProtectionScheme::from_id(3), None);
    }
}
