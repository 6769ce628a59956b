//! NAS information elements (TS 24.501 9.11)
//!
//! IE types here encode and decode their *value* part. The length prefix and
//! IEI belong to the enclosing message, see [`crate::codec`].

use std::net::Ipv4Addr;

use coretester_common::{FiveGSTmsi, Guti, Plmn, SNssai, Tai};
use coretester_crypto::{CipheringAlgorithm, IntegrityAlgorithm};

use crate::codec::{CodecError, CodecResult};
use crate::enums::{PduSessionType, RegistrationType};

fn invalid(field: &'static str, value: impl ToString) -> CodecError {
    CodecError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

// ============================================================================
// 5GS mobile identity (9.11.3.4)
// ============================================================================

/// 5GS mobile identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileIdentity {
    NoIdentity,
    /// Full SUCI value octets, starting with the identity type octet
    Suci(Vec<u8>),
    Guti(Guti),
    STmsi(FiveGSTmsi),
    Imei(String),
    Imeisv(String),
}

impl MobileIdentity {
    pub fn encode_value(&self) -> CodecResult<Vec<u8>> {
        Ok(match self {
            MobileIdentity::NoIdentity => vec![0x00],
            MobileIdentity::Suci(value) => value.clone(),
            MobileIdentity::Guti(guti) => {
                let mut out = vec![0xF2];
                out.extend_from_slice(&guti.encode());
                out
            }
            MobileIdentity::STmsi(s_tmsi) => {
                let set_ptr = ((s_tmsi.amf_set_id & 0x03FF) << 6) | (s_tmsi.amf_pointer as u16 & 0x3F);
                let mut out = vec![0xF4];
                out.extend_from_slice(&set_ptr.to_be_bytes());
                out.extend_from_slice(&s_tmsi.tmsi.to_be_bytes());
                out
            }
            MobileIdentity::Imei(digits) => encode_identity_digits(digits, 3)?,
            MobileIdentity::Imeisv(digits) => encode_identity_digits(digits, 5)?,
        })
    }

    pub fn decode_value(value: &[u8]) -> CodecResult<Self> {
        let first = *value.first().ok_or(CodecError::MissingIe("5GS mobile identity"))?;
        match first & 0x07 {
            0 => Ok(MobileIdentity::NoIdentity),
            1 => Ok(MobileIdentity::Suci(value.to_vec())),
            2 => {
                let body: [u8; 10] = value
                    .get(1..11)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| invalid("5G-GUTI length", value.len()))?;
                Ok(MobileIdentity::Guti(Guti::decode(body)))
            }
            4 => {
                if value.len() < 7 {
                    return Err(invalid("5G-S-TMSI length", value.len()));
                }
                let set_ptr = u16::from_be_bytes([value[1], value[2]]);
                Ok(MobileIdentity::STmsi(FiveGSTmsi {
                    amf_set_id: set_ptr >> 6,
                    amf_pointer: (set_ptr & 0x3F) as u8,
                    tmsi: u32::from_be_bytes([value[3], value[4], value[5], value[6]]),
                }))
            }
            3 => Ok(MobileIdentity::Imei(decode_identity_digits(value))),
            5 => Ok(MobileIdentity::Imeisv(decode_identity_digits(value))),
            other => Err(invalid("identity type", other)),
        }
    }
}

/// IMEI/IMEISV layout: digit 1 shares the first octet with the odd/even flag
/// and type; the remaining digits are packed two per octet, low nibble first.
fn encode_identity_digits(digits: &str, identity_type: u8) -> CodecResult<Vec<u8>> {
    let nibbles: Vec<u8> = digits
        .bytes()
        .map(|b| {
            if b.is_ascii_digit() {
                Ok(b - b'0')
            } else {
                Err(invalid("identity digits", digits))
            }
        })
        .collect::<CodecResult<_>>()?;
    let (&first, rest) = nibbles.split_first().ok_or_else(|| invalid("identity digits", digits))?;
    let odd = (nibbles.len() % 2) as u8;
    let mut out = vec![(first << 4) | (odd << 3) | identity_type];
    for pair in rest.chunks(2) {
        let high = pair.get(1).copied().unwrap_or(0x0F);
        out.push((high << 4) | pair[0]);
    }
    Ok(out)
}

fn decode_identity_digits(value: &[u8]) -> String {
    let mut out = String::new();
    let Some((&first, rest)) = value.split_first() else {
        return out;
    };
    out.push(char::from(b'0' + (first >> 4)));
    for &octet in rest {
        for nibble in [octet & 0x0F, octet >> 4] {
            if nibble <= 9 {
                out.push(char::from(b'0' + nibble));
            }
        }
    }
    out
}

// ============================================================================
// Key set identifier, registration type, security algorithms
// ============================================================================

/// NAS key set identifier (9.11.3.32), one half-octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NasKeySetIdentifier {
    /// Type of security context: false = native, true = mapped
    pub mapped: bool,
    pub ksi: u8,
}

impl NasKeySetIdentifier {
    /// "No key is available"
    pub const NO_KEY: u8 = 0x07;

    pub const fn native(ksi: u8) -> Self {
        Self { mapped: false, ksi }
    }

    pub const fn no_key() -> Self {
        Self::native(Self::NO_KEY)
    }

    pub fn is_no_key(&self) -> bool {
        self.ksi == Self::NO_KEY
    }

    pub fn to_nibble(self) -> u8 {
        (u8::from(self.mapped) << 3) | (self.ksi & 0x07)
    }

    pub fn from_nibble(nibble: u8) -> Self {
        Self {
            mapped: nibble & 0x08 != 0,
            ksi: nibble & 0x07,
        }
    }
}

impl Default for NasKeySetIdentifier {
    fn default() -> Self {
        Self::no_key()
    }
}

/// 5GS registration type (9.11.3.7), one half-octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrationTypeIe {
    pub follow_on_request: bool,
    pub value: RegistrationType,
}

impl RegistrationTypeIe {
    pub fn to_nibble(self) -> u8 {
        (u8::from(self.follow_on_request) << 3) | u8::from(self.value)
    }

    pub fn from_nibble(nibble: u8) -> CodecResult<Self> {
        let value = RegistrationType::try_from(nibble & 0x07)
            .map_err(|_| invalid("5GS registration type", nibble & 0x07))?;
        Ok(Self {
            follow_on_request: nibble & 0x08 != 0,
            value,
        })
    }
}

/// NAS security algorithms (9.11.3.34): ciphering in the high nibble,
/// integrity in the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NasSecurityAlgorithms {
    pub ciphering: CipheringAlgorithm,
    pub integrity: IntegrityAlgorithm,
}

impl NasSecurityAlgorithms {
    pub fn encode(&self) -> u8 {
        (self.ciphering.id() << 4) | self.integrity.id()
    }

    pub fn decode(octet: u8) -> CodecResult<Self> {
        let ciphering =
            CipheringAlgorithm::from_id(octet >> 4).ok_or_else(|| invalid("ciphering algorithm", octet >> 4))?;
        let integrity = IntegrityAlgorithm::from_id(octet & 0x0F)
            .ok_or_else(|| invalid("integrity algorithm", octet & 0x0F))?;
        Ok(Self { ciphering, integrity })
    }
}

/// UE security capability (9.11.3.54). Bit 8 of each octet is algorithm 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UeSecurityCapability {
    /// 5G-EA0..EA7
    pub ea: u8,
    /// 5G-IA0..IA7
    pub ia: u8,
    /// EEA0..EEA7, present when the UE also supports E-UTRA
    pub eea: Option<u8>,
    /// EIA0..EIA7
    pub eia: Option<u8>,
}

impl UeSecurityCapability {
    pub fn new(ciphering: &[CipheringAlgorithm], integrity: &[IntegrityAlgorithm]) -> Self {
        fn mask(ids: impl Iterator<Item = u8>) -> u8 {
            ids.fold(0, |acc, id| acc | (0x80 >> id))
        }
        Self {
            ea: mask(ciphering.iter().map(|a| a.id())),
            ia: mask(integrity.iter().map(|a| a.id())),
            eea: None,
            eia: None,
        }
    }

    pub fn supports_ciphering(&self, alg: CipheringAlgorithm) -> bool {
        self.ea & (0x80 >> alg.id()) != 0
    }

    pub fn supports_integrity(&self, alg: IntegrityAlgorithm) -> bool {
        self.ia & (0x80 >> alg.id()) != 0
    }

    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = vec![self.ea, self.ia];
        if let (Some(eea), Some(eia)) = (self.eea, self.eia) {
            out.push(eea);
            out.push(eia);
        }
        out
    }

    pub fn decode_value(value: &[u8]) -> CodecResult<Self> {
        if value.len() < 2 {
            return Err(invalid("UE security capability length", value.len()));
        }
        Ok(Self {
            ea: value[0],
            ia: value[1],
            eea: value.get(2).copied(),
            eia: value.get(3).copied(),
        })
    }
}

// ============================================================================
// Slices, tracking areas, session status
// ============================================================================

/// NSSAI (9.11.3.37): a sequence of LV-encoded S-NSSAIs.
pub fn encode_nssai(slices: &[SNssai]) -> Vec<u8> {
    let mut out = Vec::new();
    for slice in slices {
        let value = slice.encode();
        out.push(value.len() as u8);
        out.extend_from_slice(&value);
    }
    out
}

pub fn decode_nssai(value: &[u8]) -> CodecResult<Vec<SNssai>> {
    let mut slices = Vec::new();
    let mut rest = value;
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if tail.len() < len {
            return Err(CodecError::LengthExceedsBuffer {
                length: len,
                remaining: tail.len(),
            });
        }
        slices.push(SNssai::decode(&tail[..len]).map_err(|e| invalid("S-NSSAI", e))?);
        rest = &tail[len..];
    }
    Ok(slices)
}

/// 5GS tracking area identity list (9.11.3.9), encoded as one type-00 partial
/// list per PLMN.
pub fn encode_tai_list(tais: &[Tai]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < tais.len() {
        let plmn = tais[i].plmn;
        let group: Vec<&Tai> = tais[i..].iter().take_while(|t| t.plmn == plmn).take(16).collect();
        out.push((group.len() - 1) as u8);
        out.extend_from_slice(&plmn.encode());
        for tai in &group {
            out.extend_from_slice(&tai.tac_bytes());
        }
        i += group.len();
    }
    out
}

pub fn decode_tai_list(value: &[u8]) -> CodecResult<Vec<Tai>> {
    let mut tais = Vec::new();
    let mut rest = value;
    let short = |len: usize| CodecError::BufferTooShort {
        expected: len,
        actual: 0,
    };
    while let Some((&head, tail)) = rest.split_first() {
        let count = (head & 0x1F) as usize + 1;
        let plmn_of = |b: &[u8]| Plmn::decode([b[0], b[1], b[2]]);
        let tac_of = |b: &[u8]| Tai::tac_from_bytes([b[0], b[1], b[2]]);
        match (head >> 5) & 0x03 {
            0 => {
                let need = 3 + 3 * count;
                let body = tail.get(..need).ok_or_else(|| short(need))?;
                let plmn = plmn_of(body);
                tais.extend(body[3..].chunks_exact(3).map(|tac| Tai::new(plmn, tac_of(tac))));
                rest = &tail[need..];
            }
            1 => {
                let body = tail.get(..6).ok_or_else(|| short(6))?;
                let plmn = plmn_of(body);
                let first = tac_of(&body[3..]);
                tais.extend((0..count as u32).map(|k| Tai::new(plmn, first + k)));
                rest = &tail[6..];
            }
            2 => {
                let need = 6 * count;
                let body = tail.get(..need).ok_or_else(|| short(need))?;
                tais.extend(body.chunks_exact(6).map(|t| Tai::new(plmn_of(t), tac_of(&t[3..]))));
                rest = &tail[need..];
            }
            other => return Err(invalid("TAI list type", other)),
        }
    }
    Ok(tais)
}

/// PDU session status (9.11.3.44): bit n set means PSI n is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PduSessionStatus(pub u16);

impl PduSessionStatus {
    pub fn from_sessions(ids: impl IntoIterator<Item = u8>) -> Self {
        Self(ids.into_iter().filter(|id| (1..=15).contains(id)).fold(0, |acc, id| acc | (1 << id)))
    }

    pub fn is_active(&self, psi: u8) -> bool {
        psi < 16 && self.0 & (1 << psi) != 0
    }

    pub fn sessions(&self) -> impl Iterator<Item = u8> + '_ {
        (1..16u8).filter(|psi| self.is_active(*psi))
    }

    pub fn encode_value(&self) -> [u8; 2] {
        [self.0 as u8, (self.0 >> 8) as u8]
    }

    pub fn decode_value(value: &[u8]) -> CodecResult<Self> {
        if value.len() < 2 {
            return Err(invalid("PDU session status length", value.len()));
        }
        Ok(Self(u16::from(value[0]) | (u16::from(value[1]) << 8)))
    }
}

// ============================================================================
// 5GSM IEs
// ============================================================================

/// DNN (9.11.2.1B) in label form: each dot-separated label is length-prefixed.
pub fn encode_dnn(dnn: &str) -> CodecResult<Vec<u8>> {
    let mut out = Vec::with_capacity(dnn.len() + 1);
    for label in dnn.split('.') {
        let len = u8::try_from(label.len()).map_err(|_| invalid("DNN label", label))?;
        if len == 0 {
            return Err(invalid("DNN", dnn));
        }
        out.push(len);
        out.extend_from_slice(label.as_bytes());
    }
    Ok(out)
}

pub fn decode_dnn(value: &[u8]) -> CodecResult<String> {
    let mut labels = Vec::new();
    let mut rest = value;
    while let Some((&len, tail)) = rest.split_first() {
        let label = tail.get(..len as usize).ok_or_else(|| invalid("DNN", hex::encode(value)))?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        rest = &tail[len as usize..];
    }
    Ok(labels.join("."))
}

/// PDU address (9.11.4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduAddress {
    pub session_type: PduSessionType,
    pub ipv4: Option<Ipv4Addr>,
    /// IPv6 interface identifier
    pub ipv6_iid: Option<[u8; 8]>,
}

impl PduAddress {
    pub fn ipv4(addr: Ipv4Addr) -> Self {
        Self {
            session_type: PduSessionType::Ipv4,
            ipv4: Some(addr),
            ipv6_iid: None,
        }
    }

    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = vec![u8::from(self.session_type)];
        if let Some(iid) = self.ipv6_iid {
            out.extend_from_slice(&iid);
        }
        if let Some(v4) = self.ipv4 {
            out.extend_from_slice(&v4.octets());
        }
        out
    }

    pub fn decode_value(value: &[u8]) -> CodecResult<Self> {
        let (&head, body) = value.split_first().ok_or(CodecError::MissingIe("PDU address"))?;
        let session_type =
            PduSessionType::try_from(head & 0x07).map_err(|_| invalid("PDU session type", head & 0x07))?;
        let v4 = |b: &[u8]| -> CodecResult<Ipv4Addr> {
            let o: [u8; 4] = b.try_into().map_err(|_| invalid("IPv4 address", hex::encode(b)))?;
            Ok(Ipv4Addr::from(o))
        };
        let iid = |b: &[u8]| -> CodecResult<[u8; 8]> {
            b.try_into().map_err(|_| invalid("IPv6 interface identifier", hex::encode(b)))
        };
        let (ipv4, ipv6_iid) = match session_type {
            PduSessionType::Ipv4 => (Some(v4(body.get(..4).unwrap_or(body))?), None),
            PduSessionType::Ipv6 => (None, Some(iid(body.get(..8).unwrap_or(body))?)),
            PduSessionType::Ipv4v6 => {
                if body.len() < 12 {
                    return Err(invalid("PDU address length", body.len()));
                }
                (Some(v4(&body[8..12])?), Some(iid(&body[..8])?))
            }
            _ => (None, None),
        };
        Ok(Self {
            session_type,
            ipv4,
            ipv6_iid,
        })
    }
}

/// One QoS rule (9.11.4.13), reduced to the fields the UE keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosRule {
    pub id: u8,
    pub default_rule: bool,
    pub precedence: u8,
    pub qfi: u8,
}

impl QosRule {
    const OP_CREATE: u8 = 0b001;

    /// Encodes rules as "create new QoS rule" with one match-all packet filter.
    pub fn encode_rules(rules: &[QosRule]) -> Vec<u8> {
        let mut out = Vec::new();
        for rule in rules {
            let body = [
                (Self::OP_CREATE << 5) | (u8::from(rule.default_rule) << 4) | 1,
                0x31, // bidirectional, filter id 1
                0x01, // one component
                0x01, // match-all
                rule.precedence,
                rule.qfi & 0x3F,
            ];
            out.push(rule.id);
            out.extend_from_slice(&(body.len() as u16).to_be_bytes());
            out.extend_from_slice(&body);
        }
        out
    }

    pub fn decode_rules(value: &[u8]) -> CodecResult<Vec<QosRule>> {
        let mut rules = Vec::new();
        let mut rest = value;
        while !rest.is_empty() {
            if rest.len() < 3 {
                return Err(invalid("QoS rule header", hex::encode(rest)));
            }
            let id = rest[0];
            let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
            let body = rest.get(3..3 + len).ok_or(CodecError::LengthExceedsBuffer {
                length: len,
                remaining: rest.len() - 3,
            })?;
            rest = &rest[3 + len..];
            let Some(&head) = body.first() else { continue };
            if head >> 5 != Self::OP_CREATE || body.len() < 3 {
                continue;
            }
            rules.push(QosRule {
                id,
                default_rule: head & 0x10 != 0,
                precedence: body[body.len() - 2],
                qfi: body[body.len() - 1] & 0x3F,
            });
        }
        Ok(rules)
    }
}

/// One QoS flow description (9.11.4.12), reduced to QFI and 5QI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosFlowDescription {
    pub qfi: u8,
    pub five_qi: Option<u8>,
}

impl QosFlowDescription {
    const PARAM_5QI: u8 = 0x01;

    pub fn encode_descriptions(flows: &[QosFlowDescription]) -> Vec<u8> {
        let mut out = Vec::new();
        for flow in flows {
            out.push(flow.qfi & 0x3F);
            out.push(0x20); // create new QoS flow description
            match flow.five_qi {
                Some(five_qi) => out.extend_from_slice(&[0x41, Self::PARAM_5QI, 1, five_qi]),
                None => out.push(0x40),
            }
        }
        out
    }

    pub fn decode_descriptions(value: &[u8]) -> CodecResult<Vec<QosFlowDescription>> {
        let mut flows = Vec::new();
        let mut rest = value;
        while !rest.is_empty() {
            if rest.len() < 3 {
                return Err(invalid("QoS flow description", hex::encode(rest)));
            }
            let qfi = rest[0] & 0x3F;
            let params = rest[2] & 0x3F;
            rest = &rest[3..];
            let mut five_qi = None;
            for _ in 0..params {
                if rest.len() < 2 {
                    return Err(invalid("QoS flow parameter", hex::encode(rest)));
                }
                let (id, len) = (rest[0], rest[1] as usize);
                let contents = rest.get(2..2 + len).ok_or(CodecError::LengthExceedsBuffer {
                    length: len,
                    remaining: rest.len() - 2,
                })?;
                if id == Self::PARAM_5QI {
                    five_qi = contents.first().copied();
                }
                rest = &rest[2 + len..];
            }
            flows.push(QosFlowDescription { qfi, five_qi });
        }
        Ok(flows)
    }
}

/// Session-AMBR (9.11.4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionAmbr {
    pub downlink_unit: u8,
    pub downlink: u16,
    pub uplink_unit: u8,
    pub uplink: u16,
}

impl SessionAmbr {
    /// Unit value for Mbps
    pub const UNIT_MBPS: u8 = 0x06;

    pub fn mbps(downlink: u16, uplink: u16) -> Self {
        Self {
            downlink_unit: Self::UNIT_MBPS,
            downlink,
            uplink_unit: Self::UNIT_MBPS,
            uplink,
        }
    }

    pub fn encode_value(&self) -> [u8; 6] {
        let dl = self.downlink.to_be_bytes();
        let ul = self.uplink.to_be_bytes();
        [self.downlink_unit, dl[0], dl[1], self.uplink_unit, ul[0], ul[1]]
    }

    pub fn decode_value(value: &[u8]) -> CodecResult<Self> {
        if value.len() < 6 {
            return Err(invalid("Session-AMBR length", value.len()));
        }
        Ok(Self {
            downlink_unit: value[0],
            downlink: u16::from_be_bytes([value[1], value[2]]),
            uplink_unit: value[3],
            uplink: u16::from_be_bytes([value[4], value[5]]),
        })
    }
}

/// Extended protocol configuration options (9.11.4.6), kept as container list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolConfigurationOptions {
    pub containers: Vec<(u16, Vec<u8>)>,
}

impl ProtocolConfigurationOptions {
    pub const DNS_SERVER_IPV4: u16 = 0x000D;
    pub const IPV4_LINK_MTU: u16 = 0x0010;

    /// Request sent by the UE: DNS server address and link MTU.
    pub fn ue_request() -> Self {
        Self {
            containers: vec![(Self::DNS_SERVER_IPV4, Vec::new()), (Self::IPV4_LINK_MTU, Vec::new())],
        }
    }

    pub fn ipv4_link_mtu(&self) -> Option<u16> {
        self.containers
            .iter()
            .find(|(id, v)| *id == Self::IPV4_LINK_MTU && v.len() == 2)
            .map(|(_, v)| u16::from_be_bytes([v[0], v[1]]))
    }

    pub fn dns_ipv4(&self) -> Option<Ipv4Addr> {
        self.containers
            .iter()
            .find(|(id, v)| *id == Self::DNS_SERVER_IPV4 && v.len() == 4)
            .map(|(_, v)| Ipv4Addr::new(v[0], v[1], v[2], v[3]))
    }

    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = vec![0x80];
        for (id, contents) in &self.containers {
            out.extend_from_slice(&id.to_be_bytes());
            out.push(contents.len() as u8);
            out.extend_from_slice(contents);
        }
        out
    }

    pub fn decode_value(value: &[u8]) -> CodecResult<Self> {
        let mut containers = Vec::new();
        let mut rest = value.get(1..).unwrap_or_default();
        while !rest.is_empty() {
            if rest.len() < 3 {
                return Err(invalid("PCO container", hex::encode(rest)));
            }
            let id = u16::from_be_bytes([rest[0], rest[1]]);
            let len = rest[2] as usize;
            let contents = rest.get(3..3 + len).ok_or(CodecError::LengthExceedsBuffer {
                length: len,
                remaining: rest.len() - 3,
            })?;
            containers.push((id, contents.to_vec()));
            rest = &rest[3 + len..];
        }
        Ok(Self { containers })
    }
}
