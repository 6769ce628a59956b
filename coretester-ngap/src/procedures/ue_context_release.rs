//! UE Context Release Procedures
//!
//! Implements UE Context Release Request (gNB initiated, 8.3.2) and
//! UE Context Release Command/Complete (AMF initiated, 8.3.3) from 3GPP TS 38.413.

use crate::codec::*;
use crate::ies::*;
use crate::per::{PerDecoder, PerEncoder, PerError, PerResult};

use super::require_ran_ue_ngap_id;

/// UE-NGAP-IDs of a release command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeNgapIds {
    Pair { amf_ue_ngap_id: u64, ran_ue_ngap_id: u32 },
    AmfOnly(u64),
}

impl UeNgapIds {
    pub fn amf_ue_ngap_id(&self) -> u64 {
        match self {
            UeNgapIds::Pair { amf_ue_ngap_id, .. } => *amf_ue_ngap_id,
            UeNgapIds::AmfOnly(id) => *id,
        }
    }

    pub fn ran_ue_ngap_id(&self) -> Option<u32> {
        match self {
            UeNgapIds::Pair { ran_ue_ngap_id, .. } => Some(*ran_ue_ngap_id),
            UeNgapIds::AmfOnly(_) => None,
        }
    }
}

impl PerCodec for UeNgapIds {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        match self {
            UeNgapIds::Pair {
                amf_ue_ngap_id,
                ran_ue_ngap_id,
            } => {
                enc.put_choice(0, 3, false)?;
                enc.put_sequence_preamble(true, &[false]);
                put_amf_ue_ngap_id(enc, *amf_ue_ngap_id)?;
                put_ran_ue_ngap_id(enc, *ran_ue_ngap_id)
            }
            UeNgapIds::AmfOnly(id) => {
                enc.put_choice(1, 3, false)?;
                put_amf_ue_ngap_id(enc, *id)
            }
        }
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        match dec.get_choice(3, false, "UE-NGAP-IDs")? {
            0 => {
                dec.get_sequence_preamble(true, 1, "UE-NGAP-ID-pair")?;
                Ok(UeNgapIds::Pair {
                    amf_ue_ngap_id: get_amf_ue_ngap_id(dec)?,
                    ran_ue_ngap_id: get_ran_ue_ngap_id(dec)?,
                })
            }
            1 => Ok(UeNgapIds::AmfOnly(get_amf_ue_ngap_id(dec)?)),
            _ => Err(PerError::UnsupportedExtension("UE-NGAP-IDs")),
        }
    }
}

/// PDUSessionResourceItemCxtRelReq
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReleaseSessionItem(u8);

impl PerCodec for ReleaseSessionItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        put_pdu_session_id(enc, self.0)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "PDUSessionResourceItemCxtRelReq")?;
        Ok(Self(get_pdu_session_id(dec)?))
    }
}

/// UE Context Release Request contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeContextReleaseRequestParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    /// Sessions whose resources are released with the context
    pub pdu_session_ids: Vec<u8>,
    pub cause: Cause,
}

pub type UeContextReleaseRequestData = UeContextReleaseRequestParams;

/// UE Context Release Command contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeContextReleaseCommandParams {
    pub ue_ngap_ids: UeNgapIds,
    pub cause: Cause,
}

pub type UeContextReleaseCommandData = UeContextReleaseCommandParams;

/// UE Context Release Complete contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeContextReleaseCompleteParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
}

pub type UeContextReleaseCompleteData = UeContextReleaseCompleteParams;

// ============================================================================
// UE Context Release Request
// ============================================================================

/// Build a UE Context Release Request PDU
pub fn build_ue_context_release_request(params: &UeContextReleaseRequestParams) -> NgapResult<NgapPdu> {
    require_ran_ue_ngap_id(params.ran_ue_ngap_id)?;
    let mut pdu = NgapPdu::initiating(ProcedureCode::UeContextReleaseRequest)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Reject, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?;
    if !params.pdu_session_ids.is_empty() {
        let items: Vec<ReleaseSessionItem> = params.pdu_session_ids.iter().copied().map(ReleaseSessionItem).collect();
        pdu.push_ie(ID_PDU_SESSION_RESOURCE_LIST_CXT_REL_REQ, Criticality::Reject, |e| {
            encode_list(e, &items, 1, MAX_PDU_SESSIONS)
        })?;
    }
    pdu.push_ie(ID_CAUSE, Criticality::Ignore, |e| params.cause.encode_per(e))?;
    Ok(pdu)
}

/// Parse a UE Context Release Request from an NGAP PDU
pub fn parse_ue_context_release_request(pdu: &NgapPdu) -> NgapResult<UeContextReleaseRequestData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::UeContextReleaseRequest)?;
    let sessions: Vec<ReleaseSessionItem> = pdu
        .decode_ie(ID_PDU_SESSION_RESOURCE_LIST_CXT_REL_REQ, |d| decode_list(d, 1, MAX_PDU_SESSIONS))?
        .unwrap_or_default();
    Ok(UeContextReleaseRequestData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        pdu_session_ids: sessions.into_iter().map(|s| s.0).collect(),
        cause: pdu.require_ie(ID_CAUSE, "Cause", Cause::decode_per)?,
    })
}

// ============================================================================
// UE Context Release Command / Complete
// ============================================================================

/// Build a UE Context Release Command PDU (AMF side)
pub fn build_ue_context_release_command(params: &UeContextReleaseCommandParams) -> NgapResult<NgapPdu> {
    NgapPdu::initiating(ProcedureCode::UeContextRelease)
        .with_ie(ID_UE_NGAP_IDS, Criticality::Reject, |e| params.ue_ngap_ids.encode_per(e))?
        .with_ie(ID_CAUSE, Criticality::Ignore, |e| params.cause.encode_per(e))
}

/// Parse a UE Context Release Command from an NGAP PDU
pub fn parse_ue_context_release_command(pdu: &NgapPdu) -> NgapResult<UeContextReleaseCommandData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::UeContextRelease)?;
    Ok(UeContextReleaseCommandData {
        ue_ngap_ids: pdu.require_ie(ID_UE_NGAP_IDS, "UE-NGAP-IDs", UeNgapIds::decode_per)?,
        cause: pdu.require_ie(ID_CAUSE, "Cause", Cause::decode_per)?,
    })
}

/// Build a UE Context Release Complete PDU
pub fn build_ue_context_release_complete(params: &UeContextReleaseCompleteParams) -> NgapResult<NgapPdu> {
    NgapPdu::successful(ProcedureCode::UeContextRelease)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Ignore, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Ignore, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))
}

/// Parse a UE Context Release Complete from an NGAP PDU
pub fn parse_ue_context_release_complete(pdu: &NgapPdu) -> NgapResult<UeContextReleaseCompleteData> {
    pdu.expect(Presence::SuccessfulOutcome, ProcedureCode::UeContextRelease)?;
    Ok(UeContextReleaseCompleteData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
    })
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Build and encode a UE Context Release Request to bytes
pub fn encode_ue_context_release_request(params: &UeContextReleaseRequestParams) -> NgapResult<Vec<u8>> {
    build_ue_context_release_request(params)?.encode()
}

/// Decode and parse a UE Context Release Command from bytes
pub fn decode_ue_context_release_command(bytes: &[u8]) -> NgapResult<UeContextReleaseCommandData> {
    parse_ue_context_release_command(&decode_ngap_pdu(bytes)?)
}

/// Build and encode a UE Context Release Complete to bytes
pub fn encode_ue_context_release_complete(params: &UeContextReleaseCompleteParams) -> NgapResult<Vec<u8>> {
    build_ue_context_release_complete(params)?.encode()
}

/// Check if an NGAP PDU is a UE Context Release Command
pub fn is_ue_context_release_command(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::UeContextRelease)
}

/// Check if an NGAP PDU is a UE Context Release Complete
pub fn is_ue_context_release_complete(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::SuccessfulOutcome, ProcedureCode::UeContextRelease)
}
