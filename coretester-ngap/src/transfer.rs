//! PDU session resource transfers
//!
//! NGAP carries the per-session transfer structures as OCTET STRING
//! (CONTAINING ...) values. Decoding a PDU therefore leaves them as bytes;
//! the functions here perform the second decode stage on those bytes.

use std::net::IpAddr;

use crate::codec::{
    decode_ie_container, encode_ie_container, Criticality, IeContainer, NgapResult, ProtocolIe,
    ID_PDU_SESSION_AGGREGATE_MAXIMUM_BIT_RATE, ID_PDU_SESSION_TYPE, ID_QOS_FLOW_SETUP_REQUEST_LIST,
    ID_UL_NGU_UP_TNL_INFORMATION,
};
use crate::ies::{decode_list, encode_list, get_qfi, put_qfi, Cause, GtpTunnel, PerCodec, MAX_QOS_FLOWS};
use crate::per::{PerDecoder, PerEncoder, PerError, PerResult};

/// BitRate ::= INTEGER (0..4000000000000, ...)
const MAX_BIT_RATE: u64 = 4_000_000_000_000;

fn put_bit_rate(enc: &mut PerEncoder, rate: u64) -> PerResult<()> {
    enc.put_integer(rate, 0, MAX_BIT_RATE, true)
}

fn get_bit_rate(dec: &mut PerDecoder<'_>) -> PerResult<u64> {
    dec.get_integer(0, MAX_BIT_RATE, true, "BitRate")
}

fn reject_unmodelled(flags: &[bool], what: &'static str) -> PerResult<()> {
    if flags.iter().any(|present| *present) {
        return Err(PerError::Invalid {
            what,
            detail: "optional field not supported".to_string(),
        });
    }
    Ok(())
}

/// PDUSessionType (9.3.1.52)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NgapPduSessionType {
    #[default]
    Ipv4,
    Ipv6,
    Ipv4v6,
    Ethernet,
    Unstructured,
}

impl PerCodec for NgapPduSessionType {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_enumerated(*self as usize, 5, true)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        Ok(match dec.get_enumerated(5, true)? {
            0 => NgapPduSessionType::Ipv4,
            1 => NgapPduSessionType::Ipv6,
            2 => NgapPduSessionType::Ipv4v6,
            3 => NgapPduSessionType::Ethernet,
            _ => NgapPduSessionType::Unstructured,
        })
    }
}

/// One QoS flow of a setup request, with a non-dynamic 5QI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosFlowSetupRequestItem {
    pub qfi: u8,
    pub five_qi: u8,
    /// ARP priority level, 1..15
    pub arp_priority_level: u8,
    pub pre_emption_capability: bool,
    pub pre_emption_vulnerability: bool,
}

impl QosFlowSetupRequestItem {
    pub fn new(qfi: u8, five_qi: u8) -> Self {
        Self {
            qfi,
            five_qi,
            arp_priority_level: 8,
            pre_emption_capability: false,
            pre_emption_vulnerability: false,
        }
    }
}

impl PerCodec for QosFlowSetupRequestItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false, false]);
        put_qfi(enc, self.qfi)?;
        // QosFlowLevelQosParameters
        enc.put_sequence_preamble(true, &[false, false, false, false]);
        // QosCharacteristics: nonDynamic5QI
        enc.put_choice(0, 3, false)?;
        enc.put_sequence_preamble(true, &[false, false, false, false]);
        enc.put_integer(u64::from(self.five_qi), 0, 255, true)?;
        // AllocationAndRetentionPriority
        enc.put_sequence_preamble(true, &[false]);
        enc.put_constrained(u64::from(self.arp_priority_level), 1, 15)?;
        enc.put_enumerated(usize::from(self.pre_emption_capability), 2, true)?;
        enc.put_enumerated(usize::from(self.pre_emption_vulnerability), 2, true)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let item_opt = dec.get_sequence_preamble(true, 2, "QosFlowSetupRequestItem")?;
        reject_unmodelled(&item_opt, "QosFlowSetupRequestItem")?;
        let qfi = get_qfi(dec)?;
        let params_opt = dec.get_sequence_preamble(true, 4, "QosFlowLevelQosParameters")?;
        reject_unmodelled(&params_opt, "QosFlowLevelQosParameters")?;
        if dec.get_choice(3, false, "QosCharacteristics")? != 0 {
            return Err(PerError::Invalid {
                what: "QosCharacteristics",
                detail: "only non-dynamic 5QI is supported".to_string(),
            });
        }
        let five_qi_opt = dec.get_sequence_preamble(true, 4, "NonDynamic5QIDescriptor")?;
        reject_unmodelled(&five_qi_opt, "NonDynamic5QIDescriptor")?;
        let five_qi = dec.get_integer(0, 255, true, "FiveQI")? as u8;
        let arp_opt = dec.get_sequence_preamble(true, 1, "AllocationAndRetentionPriority")?;
        reject_unmodelled(&arp_opt, "AllocationAndRetentionPriority")?;
        let arp_priority_level = dec.get_constrained(1, 15)? as u8;
        let pre_emption_capability = dec.get_enumerated(2, true)? == 1;
        let pre_emption_vulnerability = dec.get_enumerated(2, true)? == 1;
        Ok(Self {
            qfi,
            five_qi,
            arp_priority_level,
            pre_emption_capability,
            pre_emption_vulnerability,
        })
    }
}

/// PDUSessionResourceSetupRequestTransfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupRequestTransfer {
    /// Session AMBR, downlink then uplink, in bit/s
    pub session_ambr: Option<(u64, u64)>,
    /// UPF endpoint for uplink traffic
    pub ul_ngu_up_tnl: GtpTunnel,
    pub pdu_session_type: NgapPduSessionType,
    pub qos_flows: Vec<QosFlowSetupRequestItem>,
}

impl PduSessionResourceSetupRequestTransfer {
    pub fn ul_teid(&self) -> u32 {
        self.ul_ngu_up_tnl.teid
    }

    pub fn upf_address(&self) -> IpAddr {
        self.ul_ngu_up_tnl.transport_layer_address
    }

    /// First QoS flow, the one the UE maps its default rule onto.
    pub fn default_flow(&self) -> Option<&QosFlowSetupRequestItem> {
        self.qos_flows.first()
    }
}

struct TransferIes(Vec<ProtocolIe>);

impl IeContainer for TransferIes {
    fn ies(&self) -> &[ProtocolIe] {
        &self.0
    }
}

pub fn encode_pdu_session_resource_setup_request_transfer(
    transfer: &PduSessionResourceSetupRequestTransfer,
) -> NgapResult<Vec<u8>> {
    let mut ies = Vec::new();
    if let Some((dl, ul)) = transfer.session_ambr {
        ies.push(ProtocolIe::new(
            ID_PDU_SESSION_AGGREGATE_MAXIMUM_BIT_RATE,
            Criticality::Reject,
            |enc| {
                enc.put_sequence_preamble(true, &[false]);
                put_bit_rate(enc, dl)?;
                put_bit_rate(enc, ul)
            },
        )?);
    }
    ies.push(ProtocolIe::new(ID_UL_NGU_UP_TNL_INFORMATION, Criticality::Reject, |enc| {
        transfer.ul_ngu_up_tnl.encode_per(enc)
    })?);
    ies.push(ProtocolIe::new(ID_PDU_SESSION_TYPE, Criticality::Reject, |enc| {
        transfer.pdu_session_type.encode_per(enc)
    })?);
    ies.push(ProtocolIe::new(ID_QOS_FLOW_SETUP_REQUEST_LIST, Criticality::Reject, |enc| {
        encode_list(enc, &transfer.qos_flows, 1, MAX_QOS_FLOWS)
    })?);

    let mut enc = PerEncoder::new();
    enc.put_sequence_preamble(true, &[]);
    encode_ie_container(&mut enc, &ies)?;
    Ok(enc.finish())
}

pub fn decode_pdu_session_resource_setup_request_transfer(
    bytes: &[u8],
) -> NgapResult<PduSessionResourceSetupRequestTransfer> {
    let mut dec = PerDecoder::new(bytes);
    dec.get_sequence_preamble(true, 0, "PDUSessionResourceSetupRequestTransfer")?;
    let ies = TransferIes(decode_ie_container(&mut dec)?);

    let session_ambr = ies.decode_ie(ID_PDU_SESSION_AGGREGATE_MAXIMUM_BIT_RATE, |d| {
        let opt = d.get_sequence_preamble(true, 1, "PDUSessionAggregateMaximumBitRate")?;
        reject_unmodelled(&opt, "PDUSessionAggregateMaximumBitRate")?;
        Ok((get_bit_rate(d)?, get_bit_rate(d)?))
    })?;
    let ul_ngu_up_tnl = ies.require_ie(ID_UL_NGU_UP_TNL_INFORMATION, "UL-NGU-UP-TNLInformation", GtpTunnel::decode_per)?;
    let pdu_session_type = ies.require_ie(ID_PDU_SESSION_TYPE, "PDUSessionType", NgapPduSessionType::decode_per)?;
    let qos_flows = ies.require_ie(ID_QOS_FLOW_SETUP_REQUEST_LIST, "QosFlowSetupRequestList", |d| {
        decode_list(d, 1, MAX_QOS_FLOWS)
    })?;

    Ok(PduSessionResourceSetupRequestTransfer {
        session_ambr,
        ul_ngu_up_tnl,
        pdu_session_type,
        qos_flows,
    })
}

/// AssociatedQosFlowItem without a mapping indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AssociatedQosFlow(u8);

impl PerCodec for AssociatedQosFlow {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false, false]);
        put_qfi(enc, self.0)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 2, "AssociatedQosFlowItem")?;
        let qfi = get_qfi(dec)?;
        if opt[0] {
            // qosFlowMappingIndication
            dec.get_enumerated(2, true)?;
        }
        reject_unmodelled(&opt[1..], "AssociatedQosFlowItem")?;
        Ok(Self(qfi))
    }
}

/// QosFlowPerTNLInformation: a tunnel plus the QoS flows it carries
fn encode_qos_flow_per_tnl(enc: &mut PerEncoder, tunnel: &GtpTunnel, qfis: &[u8]) -> PerResult<()> {
    enc.put_sequence_preamble(true, &[false]);
    tunnel.encode_per(enc)?;
    let flows: Vec<AssociatedQosFlow> = qfis.iter().copied().map(AssociatedQosFlow).collect();
    encode_list(enc, &flows, 1, MAX_QOS_FLOWS)
}

fn decode_qos_flow_per_tnl(dec: &mut PerDecoder<'_>) -> PerResult<(GtpTunnel, Vec<u8>)> {
    let opt = dec.get_sequence_preamble(true, 1, "QosFlowPerTNLInformation")?;
    reject_unmodelled(&opt, "QosFlowPerTNLInformation")?;
    let tunnel = GtpTunnel::decode_per(dec)?;
    let flows: Vec<AssociatedQosFlow> = decode_list(dec, 1, MAX_QOS_FLOWS)?;
    Ok((tunnel, flows.into_iter().map(|f| f.0).collect()))
}

/// PDUSessionResourceSetupResponseTransfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupResponseTransfer {
    /// gNB endpoint for downlink traffic
    pub dl_ngu_up_tnl: GtpTunnel,
    pub associated_qfis: Vec<u8>,
}

pub fn encode_pdu_session_resource_setup_response_transfer(
    transfer: &PduSessionResourceSetupResponseTransfer,
) -> NgapResult<Vec<u8>> {
    let mut enc = PerEncoder::new();
    enc.put_sequence_preamble(true, &[false, false, false, false]);
    encode_qos_flow_per_tnl(&mut enc, &transfer.dl_ngu_up_tnl, &transfer.associated_qfis)?;
    Ok(enc.finish())
}

pub fn decode_pdu_session_resource_setup_response_transfer(
    bytes: &[u8],
) -> NgapResult<PduSessionResourceSetupResponseTransfer> {
    let mut dec = PerDecoder::new(bytes);
    let opt = dec.get_sequence_preamble(true, 4, "PDUSessionResourceSetupResponseTransfer")?;
    reject_unmodelled(&opt, "PDUSessionResourceSetupResponseTransfer")?;
    let (dl_ngu_up_tnl, associated_qfis) = decode_qos_flow_per_tnl(&mut dec)?;
    Ok(PduSessionResourceSetupResponseTransfer {
        dl_ngu_up_tnl,
        associated_qfis,
    })
}

/// QosFlowAcceptedItem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AcceptedQosFlow(u8);

impl PerCodec for AcceptedQosFlow {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        put_qfi(enc, self.0)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 1, "QosFlowAcceptedItem")?;
        reject_unmodelled(&opt, "QosFlowAcceptedItem")?;
        Ok(Self(get_qfi(dec)?))
    }
}

/// PathSwitchRequestTransfer: the target gNB's downlink endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSwitchRequestTransfer {
    pub dl_ngu_up_tnl: GtpTunnel,
    pub accepted_qfis: Vec<u8>,
}

pub fn encode_path_switch_request_transfer(transfer: &PathSwitchRequestTransfer) -> NgapResult<Vec<u8>> {
    let mut enc = PerEncoder::new();
    enc.put_sequence_preamble(true, &[false, false, false]);
    transfer.dl_ngu_up_tnl.encode_per(&mut enc)?;
    let flows: Vec<AcceptedQosFlow> = transfer.accepted_qfis.iter().copied().map(AcceptedQosFlow).collect();
    encode_list(&mut enc, &flows, 1, MAX_QOS_FLOWS)?;
    Ok(enc.finish())
}

pub fn decode_path_switch_request_transfer(bytes: &[u8]) -> NgapResult<PathSwitchRequestTransfer> {
    let mut dec = PerDecoder::new(bytes);
    let opt = dec.get_sequence_preamble(true, 3, "PathSwitchRequestTransfer")?;
    reject_unmodelled(&opt, "PathSwitchRequestTransfer")?;
    let dl_ngu_up_tnl = GtpTunnel::decode_per(&mut dec)?;
    let flows: Vec<AcceptedQosFlow> = decode_list(&mut dec, 1, MAX_QOS_FLOWS)?;
    Ok(PathSwitchRequestTransfer {
        dl_ngu_up_tnl,
        accepted_qfis: flows.into_iter().map(|f| f.0).collect(),
    })
}

/// PathSwitchRequestAcknowledgeTransfer: the UPF's uplink endpoint after
/// the switch, when it changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathSwitchRequestAcknowledgeTransfer {
    pub ul_ngu_up_tnl: Option<GtpTunnel>,
}

pub fn encode_path_switch_request_acknowledge_transfer(
    transfer: &PathSwitchRequestAcknowledgeTransfer,
) -> NgapResult<Vec<u8>> {
    let mut enc = PerEncoder::new();
    enc.put_sequence_preamble(true, &[transfer.ul_ngu_up_tnl.is_some(), false, false]);
    if let Some(tunnel) = &transfer.ul_ngu_up_tnl {
        tunnel.encode_per(&mut enc)?;
    }
    Ok(enc.finish())
}

pub fn decode_path_switch_request_acknowledge_transfer(
    bytes: &[u8],
) -> NgapResult<PathSwitchRequestAcknowledgeTransfer> {
    let mut dec = PerDecoder::new(bytes);
    let opt = dec.get_sequence_preamble(true, 3, "PathSwitchRequestAcknowledgeTransfer")?;
    let ul_ngu_up_tnl = if opt[0] {
        Some(GtpTunnel::decode_per(&mut dec)?)
    } else {
        None
    };
    // securityIndication and extensions follow; the tunnel is all we need
    Ok(PathSwitchRequestAcknowledgeTransfer { ul_ngu_up_tnl })
}

/// PathSwitchRequestUnsuccessfulTransfer / cause-only transfers
pub fn encode_cause_transfer(cause: &Cause) -> NgapResult<Vec<u8>> {
    let mut enc = PerEncoder::new();
    enc.put_sequence_preamble(true, &[false]);
    cause.encode_per(&mut enc)?;
    Ok(enc.finish())
}

pub fn decode_cause_transfer(bytes: &[u8]) -> NgapResult<Cause> {
    let mut dec = PerDecoder::new(bytes);
    dec.get_sequence_preamble(true, 1, "PathSwitchRequestUnsuccessfulTransfer")?;
    Ok(Cause::decode_per(&mut dec)?)
}
