//! Test fixtures and configuration helpers
//!
//! Every scenario uses the same home network: PLMN 001/01, TAC 1 and one
//! slice, with subscribers built from the TS 35.208 test set 1 credentials.

use coretester_common::{AmfConfig, GnbConfig, OpType, Plmn, ProtectionScheme, SNssai, UeConfig};
use coretester_ngap::ies::Guami;
use std::net::{IpAddr, Ipv4Addr};

use crate::mock_amf::MockAmfConfig;

/// UPF address announced in every uplink tunnel
pub const TEST_UPF_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 100, 200, 1));
/// UPF the mock AMF moves sessions to on a path switch
pub const TEST_HANDOVER_UPF_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 100, 201, 1));

/// UE addresses are handed out from 10.45.0.0/16
pub const TEST_UE_IP_POOL: Ipv4Addr = Ipv4Addr::new(10, 45, 0, 0);

pub fn test_plmn() -> Plmn {
    Plmn::new(1, 1, false)
}

pub fn test_slice() -> SNssai {
    SNssai::with_sd(1, [0x10, 0x20, 0x30])
}

/// Test subscriber
#[derive(Debug, Clone)]
pub struct TestUeConfig {
    /// MSIN, 10 digits
    pub msin: String,
    /// Home PLMN
    pub hplmn: Plmn,
    /// Permanent key (K)
    pub key: [u8; 16],
    /// OPc
    pub opc: [u8; 16],
    /// SQN held by both sides at the start of the test
    pub sqn: [u8; 6],
    /// Default PDU session, 0 for none
    pub pdu_session_id: u8,
    pub dnn: String,
}

impl Default for TestUeConfig {
    fn default() -> Self {
        Self {
            msin: "0000000001".to_string(),
            hplmn: test_plmn(),
            key: [
                0x46, 0x5b, 0x5c, 0xe8, 0xb1, 0x99, 0xb4, 0x9f, 0xaa, 0x5f, 0x0a, 0x2e, 0xe2, 0x38, 0xa6, 0xbc,
            ],
            opc: [
                0xcd, 0x63, 0xcb, 0x71, 0x95, 0x4a, 0x9f, 0x4e, 0x48, 0xa5, 0x99, 0x4e, 0x37, 0xa0, 0x2b, 0xaf,
            ],
            sqn: [0xff, 0x9b, 0xb4, 0xd0, 0xb6, 0x06],
            pdu_session_id: 1,
            dnn: "internet".to_string(),
        }
    }
}

impl TestUeConfig {
    /// The `n`-th subscriber, MSIN counting up from 0000000001.
    pub fn nth(n: u32) -> Self {
        Self::default().with_msin(&format!("{:010}", u64::from(n) + 1))
    }

    pub fn with_msin(mut self, msin: &str) -> Self {
        self.msin = msin.to_string();
        self
    }

    /// Registers without asking for a PDU session.
    pub fn without_pdu_session(mut self) -> Self {
        self.pdu_session_id = 0;
        self
    }

    pub fn imsi(&self) -> String {
        format!("{}{}", self.hplmn, self.msin)
    }

    pub fn to_ue_config(&self) -> UeConfig {
        UeConfig {
            msin: self.msin.clone(),
            hplmn: self.hplmn,
            key: self.key,
            op: self.opc,
            op_type: OpType::Opc,
            sqn: self.sqn,
            snssai: test_slice(),
            dnn: self.dnn.clone(),
            pdu_session_id: self.pdu_session_id,
            ..UeConfig::default()
        }
    }

    /// Same subscriber, concealing its SUCI with a home network public key.
    pub fn to_ue_config_with_key(&self, scheme: ProtectionScheme, key_id: u8, public_key: Vec<u8>) -> UeConfig {
        UeConfig {
            protection_scheme: scheme,
            home_network_public_key_id: key_id,
            home_network_public_key: public_key,
            ..self.to_ue_config()
        }
    }
}

/// gNB in the test PLMN. The AMF address is never dialled; the association
/// is added in memory.
pub fn test_gnb_config() -> GnbConfig {
    GnbConfig {
        plmn: test_plmn(),
        slices: vec![test_slice()],
        amf_configs: vec![AmfConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 38412)],
        ..GnbConfig::default()
    }
}

pub fn test_guami() -> Guami {
    Guami {
        plmn: test_plmn(),
        amf_region_id: 2,
        amf_set_id: 1,
        amf_pointer: 0,
    }
}

pub fn test_amf_config() -> MockAmfConfig {
    MockAmfConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_subscriber() {
        let ue = TestUeConfig::default();
        assert_eq!(ue.imsi(), "001010000000001");
        let config = ue.to_ue_config();
        assert_eq!(config.hplmn, test_plmn());
        assert_eq!(config.pdu_session_id, 1);
        assert_eq!(config.protection_scheme, ProtectionScheme::Null);
    }

    #[test]
    fn test_nth_subscriber_keeps_msin_width() {
        assert_eq!(TestUeConfig::nth(0).msin, "0000000001");
        assert_eq!(TestUeConfig::nth(99).msin, "0000000100");
        assert_eq!(TestUeConfig::nth(99).imsi(), "001010000000100");
    }

    #[test]
    fn test_gnb_config_is_valid() {
        let config = test_gnb_config();
        config.validate().unwrap();
        assert_eq!(config.slices, vec![test_slice()]);
    }
}
