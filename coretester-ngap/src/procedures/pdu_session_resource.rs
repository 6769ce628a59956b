//! PDU Session Resource Setup Procedure
//!
//! Implements PDU Session Resource Setup as defined in 3GPP TS 38.413 Section 8.2.1.
//! The list items defined here are shared with Initial Context Setup, whose
//! Cxt lists have the same layout as the SU lists.

use coretester_common::SNssai;

use crate::codec::*;
use crate::ies::*;
use crate::per::{PerDecoder, PerEncoder, PerResult};
use crate::transfer::{
    decode_pdu_session_resource_setup_request_transfer, decode_pdu_session_resource_setup_response_transfer,
    PduSessionResourceSetupRequestTransfer, PduSessionResourceSetupResponseTransfer,
};

/// PDUSessionResourceSetupItemSUReq / CxtReq
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupItem {
    pub pdu_session_id: u8,
    /// PDU Session Establishment Accept for the UE
    pub nas_pdu: Option<Vec<u8>>,
    pub snssai: SNssai,
    /// Encoded PDUSessionResourceSetupRequestTransfer
    pub transfer: Vec<u8>,
}

impl PduSessionResourceSetupItem {
    /// Second decode stage of the request transfer.
    pub fn decode_transfer(&self) -> NgapResult<PduSessionResourceSetupRequestTransfer> {
        decode_pdu_session_resource_setup_request_transfer(&self.transfer)
    }
}

impl PerCodec for PduSessionResourceSetupItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[self.nas_pdu.is_some(), false]);
        put_pdu_session_id(enc, self.pdu_session_id)?;
        if let Some(nas) = &self.nas_pdu {
            put_nas_pdu(enc, nas)?;
        }
        self.snssai.encode_per(enc)?;
        enc.put_unbounded_octet_string(&self.transfer)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        let opt = dec.get_sequence_preamble(true, 2, "PDUSessionResourceSetupItem")?;
        let pdu_session_id = get_pdu_session_id(dec)?;
        let nas_pdu = if opt[0] { Some(get_nas_pdu(dec)?) } else { None };
        Ok(Self {
            pdu_session_id,
            nas_pdu,
            snssai: SNssai::decode_per(dec)?,
            transfer: dec.get_unbounded_octet_string()?,
        })
    }
}

/// PDUSessionResourceSetupItemSURes / CxtRes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupResponseItem {
    pub pdu_session_id: u8,
    /// Encoded PDUSessionResourceSetupResponseTransfer
    pub transfer: Vec<u8>,
}

impl PduSessionResourceSetupResponseItem {
    pub fn decode_transfer(&self) -> NgapResult<PduSessionResourceSetupResponseTransfer> {
        decode_pdu_session_resource_setup_response_transfer(&self.transfer)
    }
}

impl PerCodec for PduSessionResourceSetupResponseItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        put_pdu_session_id(enc, self.pdu_session_id)?;
        enc.put_unbounded_octet_string(&self.transfer)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "PDUSessionResourceSetupResponseItem")?;
        Ok(Self {
            pdu_session_id: get_pdu_session_id(dec)?,
            transfer: dec.get_unbounded_octet_string()?,
        })
    }
}

/// PDU Session Resource Setup Request contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupRequestParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Option<Vec<u8>>,
    pub sessions: Vec<PduSessionResourceSetupItem>,
}

pub type PduSessionResourceSetupRequestData = PduSessionResourceSetupRequestParams;

/// PDU Session Resource Setup Response contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionResourceSetupResponseParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub sessions: Vec<PduSessionResourceSetupResponseItem>,
}

pub type PduSessionResourceSetupResponseData = PduSessionResourceSetupResponseParams;

/// Build a PDU Session Resource Setup Request PDU (AMF side)
pub fn build_pdu_session_resource_setup_request(
    params: &PduSessionResourceSetupRequestParams,
) -> NgapResult<NgapPdu> {
    if params.sessions.is_empty() {
        return Err(NgapError::MissingParameter("PDU session resource setup list"));
    }
    let mut pdu = NgapPdu::initiating(ProcedureCode::PduSessionResourceSetup)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Reject, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?;
    if let Some(nas) = &params.nas_pdu {
        pdu.push_ie(ID_NAS_PDU, Criticality::Reject, |e| put_nas_pdu(e, nas))?;
    }
    pdu.push_ie(ID_PDU_SESSION_RESOURCE_SETUP_LIST_SU_REQ, Criticality::Reject, |e| {
        encode_list(e, &params.sessions, 1, MAX_PDU_SESSIONS)
    })?;
    Ok(pdu)
}

/// Parse a PDU Session Resource Setup Request from an NGAP PDU
pub fn parse_pdu_session_resource_setup_request(pdu: &NgapPdu) -> NgapResult<PduSessionResourceSetupRequestData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::PduSessionResourceSetup)?;
    Ok(PduSessionResourceSetupRequestData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        nas_pdu: pdu.decode_ie(ID_NAS_PDU, get_nas_pdu)?,
        sessions: pdu.require_ie(
            ID_PDU_SESSION_RESOURCE_SETUP_LIST_SU_REQ,
            "PDUSessionResourceSetupListSUReq",
            |d| decode_list(d, 1, MAX_PDU_SESSIONS),
        )?,
    })
}

/// Build a PDU Session Resource Setup Response PDU
pub fn build_pdu_session_resource_setup_response(
    params: &PduSessionResourceSetupResponseParams,
) -> NgapResult<NgapPdu> {
    let mut pdu = NgapPdu::successful(ProcedureCode::PduSessionResourceSetup)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Ignore, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Ignore, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?;
    if !params.sessions.is_empty() {
        pdu.push_ie(ID_PDU_SESSION_RESOURCE_SETUP_LIST_SU_RES, Criticality::Ignore, |e| {
            encode_list(e, &params.sessions, 1, MAX_PDU_SESSIONS)
        })?;
    }
    Ok(pdu)
}

/// Parse a PDU Session Resource Setup Response from an NGAP PDU
pub fn parse_pdu_session_resource_setup_response(
    pdu: &NgapPdu,
) -> NgapResult<PduSessionResourceSetupResponseData> {
    pdu.expect(Presence::SuccessfulOutcome, ProcedureCode::PduSessionResourceSetup)?;
    Ok(PduSessionResourceSetupResponseData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        sessions: pdu
            .decode_ie(ID_PDU_SESSION_RESOURCE_SETUP_LIST_SU_RES, |d| decode_list(d, 1, MAX_PDU_SESSIONS))?
            .unwrap_or_default(),
    })
}

/// Build and encode a PDU Session Resource Setup Response to bytes
pub fn encode_pdu_session_resource_setup_response(
    params: &PduSessionResourceSetupResponseParams,
) -> NgapResult<Vec<u8>> {
    build_pdu_session_resource_setup_response(params)?.encode()
}

/// Decode and parse a PDU Session Resource Setup Request from bytes
pub fn decode_pdu_session_resource_setup_request(bytes: &[u8]) -> NgapResult<PduSessionResourceSetupRequestData> {
    parse_pdu_session_resource_setup_request(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is a PDU Session Resource Setup Request
pub fn is_pdu_session_resource_setup_request(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::PduSessionResourceSetup)
}
