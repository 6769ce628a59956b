//! NAS Transport Procedures
//!
//! Implements Downlink and Uplink NAS Transport as defined in 3GPP TS 38.413
//! Sections 8.6.2 and 8.6.3.

use crate::codec::*;
use crate::ies::*;

use super::{require_location, require_nas_pdu, require_ran_ue_ngap_id};

/// Downlink NAS Transport contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkNasTransportParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Vec<u8>,
}

pub type DownlinkNasTransportData = DownlinkNasTransportParams;

/// Build a Downlink NAS Transport PDU (AMF side)
pub fn build_downlink_nas_transport(params: &DownlinkNasTransportParams) -> NgapResult<NgapPdu> {
    require_nas_pdu(&params.nas_pdu)?;
    NgapPdu::initiating(ProcedureCode::DownlinkNasTransport)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Reject, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?
        .with_ie(ID_NAS_PDU, Criticality::Reject, |e| put_nas_pdu(e, &params.nas_pdu))
}

/// Parse a Downlink NAS Transport from an NGAP PDU
pub fn parse_downlink_nas_transport(pdu: &NgapPdu) -> NgapResult<DownlinkNasTransportData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::DownlinkNasTransport)?;
    Ok(DownlinkNasTransportData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        nas_pdu: pdu.require_ie(ID_NAS_PDU, "NAS-PDU", get_nas_pdu)?,
    })
}

/// Uplink NAS Transport contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkNasTransportParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Vec<u8>,
    pub user_location_info: UserLocationInfoNr,
}

pub type UplinkNasTransportData = UplinkNasTransportParams;

/// Build an Uplink NAS Transport PDU
pub fn build_uplink_nas_transport(params: &UplinkNasTransportParams) -> NgapResult<NgapPdu> {
    require_ran_ue_ngap_id(params.ran_ue_ngap_id)?;
    require_nas_pdu(&params.nas_pdu)?;
    require_location(&params.user_location_info)?;
    NgapPdu::initiating(ProcedureCode::UplinkNasTransport)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Reject, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?
        .with_ie(ID_NAS_PDU, Criticality::Reject, |e| put_nas_pdu(e, &params.nas_pdu))?
        .with_ie(ID_USER_LOCATION_INFORMATION, Criticality::Ignore, |e| {
            params.user_location_info.encode_per(e)
        })
}

/// Parse an Uplink NAS Transport from an NGAP PDU
pub fn parse_uplink_nas_transport(pdu: &NgapPdu) -> NgapResult<UplinkNasTransportData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::UplinkNasTransport)?;
    Ok(UplinkNasTransportData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        nas_pdu: pdu.require_ie(ID_NAS_PDU, "NAS-PDU", get_nas_pdu)?,
        user_location_info: pdu.require_ie(
            ID_USER_LOCATION_INFORMATION,
            "UserLocationInformation",
            UserLocationInfoNr::decode_per,
        )?,
    })
}

/// Build and encode a Downlink NAS Transport to bytes
pub fn encode_downlink_nas_transport(params: &DownlinkNasTransportParams) -> NgapResult<Vec<u8>> {
    build_downlink_nas_transport(params)?.encode()
}

/// Decode and parse a Downlink NAS Transport from bytes
pub fn decode_downlink_nas_transport(bytes: &[u8]) -> NgapResult<DownlinkNasTransportData> {
    parse_downlink_nas_transport(&decode_ngap_pdu(bytes)?)
}

/// Build and encode an Uplink NAS Transport to bytes
pub fn encode_uplink_nas_transport(params: &UplinkNasTransportParams) -> NgapResult<Vec<u8>> {
    build_uplink_nas_transport(params)?.encode()
}

/// Decode and parse an Uplink NAS Transport from bytes
pub fn decode_uplink_nas_transport(bytes: &[u8]) -> NgapResult<UplinkNasTransportData> {
    parse_uplink_nas_transport(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is a Downlink NAS Transport
pub fn is_downlink_nas_transport(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::DownlinkNasTransport)
}

/// Check if an NGAP PDU is an Uplink NAS Transport
pub fn is_uplink_nas_transport(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::UplinkNasTransport)
}
