//! Typed NGAP information elements (TS 38.413 9.3)
//!
//! Each type implements [`PerCodec`] for its own APER layout. IE values are
//! embedded in a ProtocolIE-Field as an open type by [`crate::codec`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use coretester_common::{FiveGSTmsi, Plmn, SNssai, Tai};

use crate::per::{PerDecoder, PerEncoder, PerError, PerResult};

/// maxnoofPDUSessions
pub const MAX_PDU_SESSIONS: usize = 256;
/// maxnoofQosFlows
pub const MAX_QOS_FLOWS: usize = 64;
/// maxnoofSliceItems
pub const MAX_SLICE_ITEMS: usize = 1024;

/// APER encode/decode of a typed value.
pub trait PerCodec: Sized {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()>;

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self>;
}

/// SEQUENCE (SIZE (lb..ub)) OF T
pub fn encode_list<T: PerCodec>(enc: &mut PerEncoder, items: &[T], lb: usize, ub: usize) -> PerResult<()> {
    if items.len() < lb || items.len() > ub {
        return Err(PerError::InvalidLength {
            what: "SEQUENCE OF",
            length: items.len(),
        });
    }
    enc.put_constrained_length(items.len(), lb, ub)?;
    items.iter().try_for_each(|item| item.encode_per(enc))
}

pub fn decode_list<T: PerCodec>(dec: &mut PerDecoder<'_>, lb: usize, ub: usize) -> PerResult<Vec<T>> {
    let count = dec.get_constrained_length(lb, ub)?;
    (0..count).map(|_| T::decode_per(dec)).collect()
}

/// Skips an iE-Extensions container that was flagged present: it is read
/// as a ProtocolExtensionContainer and dropped.
fn skip_extensions(dec: &mut PerDecoder<'_>, present: bool) -> PerResult<()> {
    if !present {
        return Ok(());
    }
    let count = dec.get_constrained_length(1, 65535)?;
    for _ in 0..count {
        dec.get_constrained(0, 65535)?;
        dec.get_enumerated(3, false)?;
        dec.get_open_type()?;
    }
    Ok(())
}

// ============================================================================
// Scalars
// ============================================================================

pub fn put_amf_ue_ngap_id(enc: &mut PerEncoder, id: u64) -> PerResult<()> {
    enc.put_constrained(id, 0, (1 << 40) - 1)
}

pub fn get_amf_ue_ngap_id(dec: &mut PerDecoder<'_>) -> PerResult<u64> {
    dec.get_constrained(0, (1 << 40) - 1)
}

pub fn put_ran_ue_ngap_id(enc: &mut PerEncoder, id: u32) -> PerResult<()> {
    enc.put_constrained(u64::from(id), 0, u64::from(u32::MAX))
}

pub fn get_ran_ue_ngap_id(dec: &mut PerDecoder<'_>) -> PerResult<u32> {
    Ok(dec.get_constrained(0, u64::from(u32::MAX))? as u32)
}

pub fn put_pdu_session_id(enc: &mut PerEncoder, id: u8) -> PerResult<()> {
    enc.put_constrained(u64::from(id), 0, 255)
}

pub fn get_pdu_session_id(dec: &mut PerDecoder<'_>) -> PerResult<u8> {
    Ok(dec.get_constrained(0, 255)? as u8)
}

pub fn put_qfi(enc: &mut PerEncoder, qfi: u8) -> PerResult<()> {
    enc.put_integer(u64::from(qfi), 0, 63, true)
}

pub fn get_qfi(dec: &mut PerDecoder<'_>) -> PerResult<u8> {
    Ok(dec.get_integer(0, 63, true, "QosFlowIdentifier")? as u8)
}

pub fn put_nas_pdu(enc: &mut PerEncoder, nas: &[u8]) -> PerResult<()> {
    enc.put_unbounded_octet_string(nas)
}

pub fn get_nas_pdu(dec: &mut PerDecoder<'_>) -> PerResult<Vec<u8>> {
    dec.get_unbounded_octet_string()
}

/// AMFName / RANNodeName: PrintableString (SIZE(1..150, ...))
pub fn put_node_name(enc: &mut PerEncoder, name: &str) -> PerResult<()> {
    enc.put_printable_string(name, 1, 150, true)
}

pub fn get_node_name(dec: &mut PerDecoder<'_>) -> PerResult<String> {
    dec.get_printable_string(1, 150, true)
}

/// SecurityKey: BIT STRING (SIZE(256))
pub fn put_security_key(enc: &mut PerEncoder, key: &[u8; 32]) -> PerResult<()> {
    enc.put_bit_string(key, 256, 256, 256, false)
}

pub fn get_security_key(dec: &mut PerDecoder<'_>) -> PerResult<[u8; 32]> {
    let (bits, _) = dec.get_bit_string(256, 256, false)?;
    bits.try_into().map_err(|_| PerError::InvalidLength {
        what: "SecurityKey",
        length: 0,
    })
}

// ============================================================================
// Identities and locations
// ============================================================================

impl PerCodec for Plmn {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_octet_string(&self.encode(), 3, 3, false)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let octets = dec.get_octet_string(3, 3, false)?;
        Ok(Plmn::decode([octets[0], octets[1], octets[2]]))
    }
}

fn put_tac(enc: &mut PerEncoder, tac: u32) -> PerResult<()> {
    if tac > 0xFF_FFFF {
        return Err(PerError::ValueOutOfRange {
            value: u64::from(tac),
            lb: 0,
            ub: 0xFF_FFFF,
        });
    }
    enc.put_octet_string(&tac.to_be_bytes()[1..], 3, 3, false)
}

fn get_tac(dec: &mut PerDecoder<'_>) -> PerResult<u32> {
    let octets = dec.get_octet_string(3, 3, false)?;
    Ok(Tai::tac_from_bytes([octets[0], octets[1], octets[2]]))
}

impl PerCodec for Tai {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.plmn.encode_per(enc)?;
        put_tac(enc, self.tac)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "TAI")?;
        let plmn = Plmn::decode_per(dec)?;
        let tac = get_tac(dec)?;
        skip_extensions(dec, opt[0])?;
        Ok(Tai::new(plmn, tac))
    }
}

impl PerCodec for SNssai {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[self.sd.is_some(), false]);
        enc.put_octet_string(&[self.sst], 1, 1, false)?;
        if let Some(sd) = &self.sd {
            enc.put_octet_string(sd, 3, 3, false)?;
        }
        Ok(())
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 2, "S-NSSAI")?;
        let sst = dec.get_octet_string(1, 1, false)?[0];
        let sd = if opt[0] {
            let sd = dec.get_octet_string(3, 3, false)?;
            Some([sd[0], sd[1], sd[2]])
        } else {
            None
        };
        skip_extensions(dec, opt[1])?;
        Ok(SNssai { sst, sd })
    }
}

/// SliceSupportItem wrapping one S-NSSAI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSupportItem(pub SNssai);

impl PerCodec for SliceSupportItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.0.encode_per(enc)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "SliceSupportItem")?;
        let snssai = SNssai::decode_per(dec)?;
        skip_extensions(dec, opt[0])?;
        Ok(Self(snssai))
    }
}

pub fn encode_slice_support_list(enc: &mut PerEncoder, slices: &[SNssai]) -> PerResult<()> {
    let items: Vec<SliceSupportItem> = slices.iter().copied().map(SliceSupportItem).collect();
    encode_list(enc, &items, 1, MAX_SLICE_ITEMS)
}

pub fn decode_slice_support_list(dec: &mut PerDecoder<'_>) -> PerResult<Vec<SNssai>> {
    Ok(decode_list::<SliceSupportItem>(dec, 1, MAX_SLICE_ITEMS)?
        .into_iter()
        .map(|item| item.0)
        .collect())
}

/// NR Cell Global Identifier; the NR cell identity is 36 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NrCgi {
    pub plmn: Plmn,
    pub nr_cell_identity: u64,
}

impl PerCodec for NrCgi {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.plmn.encode_per(enc)?;
        enc.put_bit_string_u64(self.nr_cell_identity, 36, 36, 36, false)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "NR-CGI")?;
        let plmn = Plmn::decode_per(dec)?;
        let (nr_cell_identity, _) = dec.get_bit_string_u64(36, 36, false)?;
        skip_extensions(dec, opt[0])?;
        Ok(Self { plmn, nr_cell_identity })
    }
}

/// UserLocationInformation, NR alternative only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserLocationInfoNr {
    pub nr_cgi: NrCgi,
    pub tai: Tai,
    pub time_stamp: Option<[u8; 4]>,
}

impl PerCodec for UserLocationInfoNr {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        // CHOICE index 1 = userLocationInformationNR
        enc.put_choice(1, 4, false)?;
        enc.put_sequence_preamble(true, &[self.time_stamp.is_some(), false]);
        self.nr_cgi.encode_per(enc)?;
        self.tai.encode_per(enc)?;
        if let Some(ts) = &self.time_stamp {
            enc.put_octet_string(ts, 4, 4, false)?;
        }
        Ok(())
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let choice = dec.get_choice(4, false, "UserLocationInformation")?;
        if choice != 1 {
            return Err(PerError::Invalid {
                what: "UserLocationInformation",
                detail: format!("alternative {choice} is not NR"),
            });
        }
        let opt = dec.get_sequence_preamble(true, 2, "UserLocationInformationNR")?;
        let nr_cgi = NrCgi::decode_per(dec)?;
        let tai = Tai::decode_per(dec)?;
        let time_stamp = if opt[0] {
            let ts = dec.get_octet_string(4, 4, false)?;
            Some([ts[0], ts[1], ts[2], ts[3]])
        } else {
            None
        };
        skip_extensions(dec, opt[1])?;
        Ok(Self { nr_cgi, tai, time_stamp })
    }
}

/// Global gNB ID; the gNB ID is 22 to 32 bits long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalGnbId {
    pub plmn: Plmn,
    pub gnb_id: u32,
    pub gnb_id_length: u8,
}

impl PerCodec for GlobalGnbId {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        // GlobalRANNodeID CHOICE index 0 = globalGNB-ID
        enc.put_choice(0, 4, false)?;
        enc.put_sequence_preamble(true, &[false]);
        self.plmn.encode_per(enc)?;
        enc.put_choice(0, 2, false)?;
        enc.put_bit_string_u64(u64::from(self.gnb_id), usize::from(self.gnb_id_length), 22, 32, false)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let choice = dec.get_choice(4, false, "GlobalRANNodeID")?;
        if choice != 0 {
            return Err(PerError::Invalid {
                what: "GlobalRANNodeID",
                detail: format!("alternative {choice} is not a gNB"),
            });
        }
        let opt = dec.get_sequence_preamble(true, 1, "GlobalGNB-ID")?;
        let plmn = Plmn::decode_per(dec)?;
        dec.get_choice(2, false, "GNB-ID")?;
        let (gnb_id, len) = dec.get_bit_string_u64(22, 32, false)?;
        skip_extensions(dec, opt[0])?;
        Ok(Self {
            plmn,
            gnb_id: gnb_id as u32,
            gnb_id_length: len as u8,
        })
    }
}

/// Globally Unique AMF Identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Guami {
    pub plmn: Plmn,
    pub amf_region_id: u8,
    /// 10 bits
    pub amf_set_id: u16,
    /// 6 bits
    pub amf_pointer: u8,
}

impl PerCodec for Guami {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.plmn.encode_per(enc)?;
        enc.put_bit_string_u64(u64::from(self.amf_region_id), 8, 8, 8, false)?;
        enc.put_bit_string_u64(u64::from(self.amf_set_id), 10, 10, 10, false)?;
        enc.put_bit_string_u64(u64::from(self.amf_pointer), 6, 6, 6, false)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "GUAMI")?;
        let plmn = Plmn::decode_per(dec)?;
        let (region, _) = dec.get_bit_string_u64(8, 8, false)?;
        let (set, _) = dec.get_bit_string_u64(10, 10, false)?;
        let (pointer, _) = dec.get_bit_string_u64(6, 6, false)?;
        skip_extensions(dec, opt[0])?;
        Ok(Self {
            plmn,
            amf_region_id: region as u8,
            amf_set_id: set as u16,
            amf_pointer: pointer as u8,
        })
    }
}

impl PerCodec for FiveGSTmsi {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        enc.put_bit_string_u64(u64::from(self.amf_set_id), 10, 10, 10, false)?;
        enc.put_bit_string_u64(u64::from(self.amf_pointer), 6, 6, 6, false)?;
        enc.put_octet_string(&self.tmsi.to_be_bytes(), 4, 4, false)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "FiveG-S-TMSI")?;
        let (set, _) = dec.get_bit_string_u64(10, 10, false)?;
        let (pointer, _) = dec.get_bit_string_u64(6, 6, false)?;
        let tmsi = dec.get_octet_string(4, 4, false)?;
        skip_extensions(dec, opt[0])?;
        Ok(FiveGSTmsi {
            amf_set_id: set as u16,
            amf_pointer: pointer as u8,
            tmsi: u32::from_be_bytes([tmsi[0], tmsi[1], tmsi[2], tmsi[3]]),
        })
    }
}

/// UEPagingIdentity: CHOICE { fiveG-S-TMSI, choice-Extensions }
pub fn put_ue_paging_identity(enc: &mut PerEncoder, s_tmsi: &FiveGSTmsi) -> PerResult<()> {
    enc.put_choice(0, 2, false)?;
    s_tmsi.encode_per(enc)
}

pub fn get_ue_paging_identity(dec: &mut PerDecoder<'_>) -> PerResult<FiveGSTmsi> {
    match dec.get_choice(2, false, "UEPagingIdentity")? {
        0 => FiveGSTmsi::decode_per(dec),
        _ => Err(PerError::UnsupportedExtension("UEPagingIdentity")),
    }
}

/// UESecurityCapabilities: four 16-bit algorithm bitmaps, most significant
/// bit first (bit 0 = 128-NEA1/NIA1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeSecurityCapabilities {
    pub nr_encryption: u16,
    pub nr_integrity: u16,
    pub eutra_encryption: u16,
    pub eutra_integrity: u16,
}

impl Default for UeSecurityCapabilities {
    /// NEA1-3 and NIA1-3 for both NR and E-UTRA
    fn default() -> Self {
        Self {
            nr_encryption: 0xE000,
            nr_integrity: 0xE000,
            eutra_encryption: 0xE000,
            eutra_integrity: 0xE000,
        }
    }
}

impl PerCodec for UeSecurityCapabilities {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        for bitmap in [self.nr_encryption, self.nr_integrity, self.eutra_encryption, self.eutra_integrity] {
            enc.put_bit_string_u64(u64::from(bitmap), 16, 16, 16, true)?;
        }
        Ok(())
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "UESecurityCapabilities")?;
        let mut bitmaps = [0u16; 4];
        for bitmap in &mut bitmaps {
            let (octets, len) = dec.get_bit_string(16, 16, true)?;
            let mut padded = [0u8; 2];
            for (dst, src) in padded.iter_mut().zip(octets.iter()) {
                *dst = *src;
            }
            // extended sizes keep their leading 16 bits
            *bitmap = if len == 0 { 0 } else { u16::from_be_bytes(padded) };
        }
        skip_extensions(dec, opt[0])?;
        Ok(Self {
            nr_encryption: bitmaps[0],
            nr_integrity: bitmaps[1],
            eutra_encryption: bitmaps[2],
            eutra_integrity: bitmaps[3],
        })
    }
}

/// SecurityContext used in Path Switch Request Acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityContext {
    pub next_hop_chaining_count: u8,
    pub next_hop_nh: [u8; 32],
}

impl PerCodec for SecurityContext {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        enc.put_constrained(u64::from(self.next_hop_chaining_count), 0, 7)?;
        put_security_key(enc, &self.next_hop_nh)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "SecurityContext")?;
        let next_hop_chaining_count = dec.get_constrained(0, 7)? as u8;
        let next_hop_nh = get_security_key(dec)?;
        skip_extensions(dec, opt[0])?;
        Ok(Self {
            next_hop_chaining_count,
            next_hop_nh,
        })
    }
}

// ============================================================================
// User plane transport
// ============================================================================

/// GTPTunnel inside UPTransportLayerInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtpTunnel {
    pub transport_layer_address: IpAddr,
    pub teid: u32,
}

impl GtpTunnel {
    pub fn new(transport_layer_address: IpAddr, teid: u32) -> Self {
        Self {
            transport_layer_address,
            teid,
        }
    }
}

/// TransportLayerAddress: BIT STRING (SIZE(1..160, ...)) holding an IPv4
/// (32), IPv6 (128) or dual (160) address. The dual form resolves to IPv4.
fn put_transport_layer_address(enc: &mut PerEncoder, addr: &IpAddr) -> PerResult<()> {
    match addr {
        IpAddr::V4(v4) => enc.put_bit_string(&v4.octets(), 32, 1, 160, true),
        IpAddr::V6(v6) => enc.put_bit_string(&v6.octets(), 128, 1, 160, true),
    }
}

fn get_transport_layer_address(dec: &mut PerDecoder<'_>) -> PerResult<IpAddr> {
    let (octets, len) = dec.get_bit_string(1, 160, true)?;
    match len {
        32 | 160 => Ok(IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))),
        128 => {
            let mut v6 = [0u8; 16];
            v6.copy_from_slice(&octets[..16]);
            Ok(IpAddr::V6(Ipv6Addr::from(v6)))
        }
        other => Err(PerError::InvalidLength {
            what: "TransportLayerAddress",
            length: other,
        }),
    }
}

impl PerCodec for GtpTunnel {
    /// Encoded as UPTransportLayerInformation CHOICE { gTPTunnel, choice-Extensions }
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_choice(0, 2, false)?;
        enc.put_sequence_preamble(true, &[false]);
        put_transport_layer_address(enc, &self.transport_layer_address)?;
        enc.put_octet_string(&self.teid.to_be_bytes(), 4, 4, false)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        if dec.get_choice(2, false, "UPTransportLayerInformation")? != 0 {
            return Err(PerError::UnsupportedExtension("UPTransportLayerInformation"));
        }
        let opt = dec.get_sequence_preamble(true, 1, "GTPTunnel")?;
        let transport_layer_address = get_transport_layer_address(dec)?;
        let teid = dec.get_octet_string(4, 4, false)?;
        skip_extensions(dec, opt[0])?;
        Ok(Self {
            transport_layer_address,
            teid: u32::from_be_bytes([teid[0], teid[1], teid[2], teid[3]]),
        })
    }
}

// ============================================================================
// Cause and enumerations
// ============================================================================

/// NGAP Cause (9.3.1.2); values are enumeration indices per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    RadioNetwork(u8),
    Transport(u8),
    Nas(u8),
    Protocol(u8),
    Misc(u8),
}

impl Cause {
    pub const RADIO_NETWORK_UNSPECIFIED: Cause = Cause::RadioNetwork(0);
    pub const RADIO_NETWORK_USER_INACTIVITY: Cause = Cause::RadioNetwork(20);
    pub const RADIO_NETWORK_UNKNOWN_LOCAL_UE_NGAP_ID: Cause = Cause::RadioNetwork(14);
    pub const TRANSPORT_UNSPECIFIED: Cause = Cause::Transport(1);
    pub const NAS_NORMAL_RELEASE: Cause = Cause::Nas(0);
    pub const NAS_DEREGISTER: Cause = Cause::Nas(2);
    pub const PROTOCOL_SEMANTIC_ERROR: Cause = Cause::Protocol(4);
    pub const MISC_OM_INTERVENTION: Cause = Cause::Misc(3);
    pub const MISC_UNSPECIFIED: Cause = Cause::Misc(5);

    /// Root enumeration sizes of the five cause groups
    const ROOTS: [usize; 5] = [45, 2, 4, 7, 6];

    fn group(self) -> (usize, u8) {
        match self {
            Cause::RadioNetwork(v) => (0, v),
            Cause::Transport(v) => (1, v),
            Cause::Nas(v) => (2, v),
            Cause::Protocol(v) => (3, v),
            Cause::Misc(v) => (4, v),
        }
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cause::RadioNetwork(v) => write!(f, "radioNetwork({v})"),
            Cause::Transport(v) => write!(f, "transport({v})"),
            Cause::Nas(v) => write!(f, "nas({v})"),
            Cause::Protocol(v) => write!(f, "protocol({v})"),
            Cause::Misc(v) => write!(f, "misc({v})"),
        }
    }
}

impl PerCodec for Cause {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        let (group, value) = self.group();
        enc.put_choice(group, 6, false)?;
        enc.put_enumerated(usize::from(value), Self::ROOTS[group], true)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let group = dec.get_choice(6, false, "Cause")?;
        let root = *Self::ROOTS.get(group).ok_or(PerError::UnsupportedExtension("Cause"))?;
        let value = dec.get_enumerated(root, true)? as u8;
        Ok(match group {
            0 => Cause::RadioNetwork(value),
            1 => Cause::Transport(value),
            2 => Cause::Nas(value),
            3 => Cause::Protocol(value),
            _ => Cause::Misc(value),
        })
    }
}

/// PagingDRX (9.3.1.90)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingDrx {
    V32,
    V64,
    #[default]
    V128,
    V256,
}

impl PagingDrx {
    pub fn from_frames(frames: u16) -> Option<Self> {
        match frames {
            32 => Some(PagingDrx::V32),
            64 => Some(PagingDrx::V64),
            128 => Some(PagingDrx::V128),
            256 => Some(PagingDrx::V256),
            _ => None,
        }
    }
}

impl PerCodec for PagingDrx {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_enumerated(*self as usize, 4, true)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        Ok(match dec.get_enumerated(4, true)? {
            0 => PagingDrx::V32,
            1 => PagingDrx::V64,
            2 => PagingDrx::V128,
            _ => PagingDrx::V256,
        })
    }
}

/// TimeToWait (9.3.1.56) in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToWait(pub u8);

impl TimeToWait {
    const VALUES: [u8; 6] = [1, 2, 5, 10, 20, 60];
}

impl PerCodec for TimeToWait {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        let index = Self::VALUES
            .iter()
            .position(|v| *v == self.0)
            .ok_or(PerError::ValueOutOfRange {
                value: u64::from(self.0),
                lb: 1,
                ub: 60,
            })?;
        enc.put_enumerated(index, Self::VALUES.len(), true)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let index = dec.get_enumerated(Self::VALUES.len(), true)?;
        Self::VALUES
            .get(index)
            .map(|v| TimeToWait(*v))
            .ok_or(PerError::UnsupportedExtension("TimeToWait"))
    }
}

/// RRCEstablishmentCause (9.3.1.111)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RrcEstablishmentCause {
    Emergency = 0,
    HighPriorityAccess = 1,
    MtAccess = 2,
    #[default]
    MoSignalling = 3,
    MoData = 4,
    MoVoiceCall = 5,
    MoVideoCall = 6,
    MoSms = 7,
    MpsPriorityAccess = 8,
    McsPriorityAccess = 9,
}

impl PerCodec for RrcEstablishmentCause {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_enumerated(*self as usize, 10, true)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        use RrcEstablishmentCause::*;
        let all = [
            Emergency,
            HighPriorityAccess,
            MtAccess,
            MoSignalling,
            MoData,
            MoVoiceCall,
            MoVideoCall,
            MoSms,
            MpsPriorityAccess,
            McsPriorityAccess,
        ];
        all.get(dec.get_enumerated(10, true)?)
            .copied()
            .ok_or(PerError::UnsupportedExtension("RRCEstablishmentCause"))
    }
}

/// UEContextRequest ::= ENUMERATED { requested, ... }
pub fn put_ue_context_requested(enc: &mut PerEncoder) -> PerResult<()> {
    enc.put_enumerated(0, 1, true)
}

pub fn get_ue_context_requested(dec: &mut PerDecoder<'_>) -> PerResult<bool> {
    Ok(dec.get_enumerated(1, true)? == 0)
}
