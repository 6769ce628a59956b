//! Error Indication Procedure
//!
//! Implements the Error Indication procedure as defined in 3GPP TS 38.413 Section 8.7.5.

use crate::codec::*;
use crate::ies::*;

/// Error Indication contents; every IE is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorIndicationParams {
    pub amf_ue_ngap_id: Option<u64>,
    pub ran_ue_ngap_id: Option<u32>,
    pub cause: Option<Cause>,
}

pub type ErrorIndicationData = ErrorIndicationParams;

/// Build an Error Indication PDU
pub fn build_error_indication(params: &ErrorIndicationParams) -> NgapResult<NgapPdu> {
    let mut pdu = NgapPdu::initiating(ProcedureCode::ErrorIndication);
    if let Some(id) = params.amf_ue_ngap_id {
        pdu.push_ie(ID_AMF_UE_NGAP_ID, Criticality::Ignore, |e| put_amf_ue_ngap_id(e, id))?;
    }
    if let Some(id) = params.ran_ue_ngap_id {
        pdu.push_ie(ID_RAN_UE_NGAP_ID, Criticality::Ignore, |e| put_ran_ue_ngap_id(e, id))?;
    }
    if let Some(cause) = &params.cause {
        pdu.push_ie(ID_CAUSE, Criticality::Ignore, |e| cause.encode_per(e))?;
    }
    Ok(pdu)
}

/// Parse an Error Indication from an NGAP PDU
pub fn parse_error_indication(pdu: &NgapPdu) -> NgapResult<ErrorIndicationData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::ErrorIndication)?;
    Ok(ErrorIndicationData {
        amf_ue_ngap_id: pdu.decode_ie(ID_AMF_UE_NGAP_ID, get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.decode_ie(ID_RAN_UE_NGAP_ID, get_ran_ue_ngap_id)?,
        cause: pdu.decode_ie(ID_CAUSE, Cause::decode_per)?,
    })
}

/// Build and encode an Error Indication to bytes
pub fn encode_error_indication(params: &ErrorIndicationParams) -> NgapResult<Vec<u8>> {
    build_error_indication(params)?.encode()
}

/// Decode and parse an Error Indication from bytes
pub fn decode_error_indication(bytes: &[u8]) -> NgapResult<ErrorIndicationData> {
    parse_error_indication(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is an Error Indication
pub fn is_error_indication(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::ErrorIndication)
}
