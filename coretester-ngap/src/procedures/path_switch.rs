//! Path Switch Request Procedure
//!
//! Implements the Path Switch Request procedure as defined in 3GPP TS 38.413 Section 8.4.4.
//! After an Xn handover the target gNB asks the AMF to switch the downlink
//! user plane of each session towards it. The acknowledge carries one
//! PathSwitchRequestAcknowledgeTransfer per session as an opaque octet string,
//! which [`PathSwitchRequestAcknowledgeData::switched_sessions`] decodes.

use coretester_common::SNssai;

use crate::codec::*;
use crate::ies::*;
use crate::per::{PerDecoder, PerEncoder, PerResult};
use crate::transfer::{
    decode_cause_transfer, decode_path_switch_request_acknowledge_transfer, decode_path_switch_request_transfer,
    PathSwitchRequestTransfer,
};

use super::initial_context_setup::{decode_allowed_nssai, encode_allowed_nssai};
use super::{require_location, require_ran_ue_ngap_id};

/// A PDU session ID with its encoded transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionTransferItem {
    pub pdu_session_id: u8,
    pub transfer: Vec<u8>,
}

impl PerCodec for PduSessionTransferItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        put_pdu_session_id(enc, self.pdu_session_id)?;
        enc.put_unbounded_octet_string(&self.transfer)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "PDUSessionResourceItem")?;
        Ok(Self {
            pdu_session_id: get_pdu_session_id(dec)?,
            transfer: dec.get_unbounded_octet_string()?,
        })
    }
}

/// Session switched by the AMF, after the second decode stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchedSession {
    pub pdu_session_id: u8,
    /// New UPF uplink endpoint; `None` keeps the previous one
    pub ul_ngu_up_tnl: Option<GtpTunnel>,
}

/// Path Switch Request contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSwitchRequestParams {
    pub ran_ue_ngap_id: u32,
    pub source_amf_ue_ngap_id: u64,
    pub user_location_info: UserLocationInfoNr,
    pub ue_security_capabilities: UeSecurityCapabilities,
    /// Encoded PathSwitchRequestTransfer per session
    pub sessions: Vec<PduSessionTransferItem>,
}

pub type PathSwitchRequestData = PathSwitchRequestParams;

impl PathSwitchRequestData {
    /// Second decode stage of every session's transfer.
    pub fn decode_transfers(&self) -> NgapResult<Vec<(u8, PathSwitchRequestTransfer)>> {
        self.sessions
            .iter()
            .map(|item| Ok((item.pdu_session_id, decode_path_switch_request_transfer(&item.transfer)?)))
            .collect()
    }
}

/// Path Switch Request Acknowledge contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSwitchRequestAcknowledgeParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub ue_security_capabilities: Option<UeSecurityCapabilities>,
    pub security_context: SecurityContext,
    /// Encoded PathSwitchRequestAcknowledgeTransfer per session
    pub sessions: Vec<PduSessionTransferItem>,
    pub allowed_nssai: Vec<SNssai>,
}

pub type PathSwitchRequestAcknowledgeData = PathSwitchRequestAcknowledgeParams;

impl PathSwitchRequestAcknowledgeData {
    /// Decodes each nested acknowledge transfer.
    pub fn switched_sessions(&self) -> NgapResult<Vec<SwitchedSession>> {
        self.sessions
            .iter()
            .map(|item| {
                let transfer = decode_path_switch_request_acknowledge_transfer(&item.transfer)?;
                Ok(SwitchedSession {
                    pdu_session_id: item.pdu_session_id,
                    ul_ngu_up_tnl: transfer.ul_ngu_up_tnl,
                })
            })
            .collect()
    }
}

/// Path Switch Request Failure contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSwitchRequestFailureParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    /// Encoded PathSwitchRequestUnsuccessfulTransfer per released session
    pub released_sessions: Vec<PduSessionTransferItem>,
}

pub type PathSwitchRequestFailureData = PathSwitchRequestFailureParams;

impl PathSwitchRequestFailureData {
    /// Release cause per session.
    pub fn release_causes(&self) -> NgapResult<Vec<(u8, Cause)>> {
        self.released_sessions
            .iter()
            .map(|item| Ok((item.pdu_session_id, decode_cause_transfer(&item.transfer)?)))
            .collect()
    }
}

// ============================================================================
// Path Switch Request
// ============================================================================

/// Build a Path Switch Request PDU
///
/// Fails before encoding if the RAN-UE-NGAP-ID, location or session list is
/// missing.
pub fn build_path_switch_request(params: &PathSwitchRequestParams) -> NgapResult<NgapPdu> {
    require_ran_ue_ngap_id(params.ran_ue_ngap_id)?;
    require_location(&params.user_location_info)?;
    if params.sessions.is_empty() {
        return Err(NgapError::MissingParameter("PDU session resource to be switched list"));
    }
    NgapPdu::initiating(ProcedureCode::PathSwitchRequest)
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?
        .with_ie(ID_SOURCE_AMF_UE_NGAP_ID, Criticality::Reject, |e| {
            put_amf_ue_ngap_id(e, params.source_amf_ue_ngap_id)
        })?
        .with_ie(ID_USER_LOCATION_INFORMATION, Criticality::Ignore, |e| {
            params.user_location_info.encode_per(e)
        })?
        .with_ie(ID_UE_SECURITY_CAPABILITIES, Criticality::Ignore, |e| {
            params.ue_security_capabilities.encode_per(e)
        })?
        .with_ie(ID_PDU_SESSION_RESOURCE_TO_BE_SWITCHED_DL_LIST, Criticality::Reject, |e| {
            encode_list(e, &params.sessions, 1, MAX_PDU_SESSIONS)
        })
}

/// Parse a Path Switch Request from an NGAP PDU (AMF side)
pub fn parse_path_switch_request(pdu: &NgapPdu) -> NgapResult<PathSwitchRequestData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::PathSwitchRequest)?;
    Ok(PathSwitchRequestData {
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        source_amf_ue_ngap_id: pdu.require_ie(ID_SOURCE_AMF_UE_NGAP_ID, "SourceAMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        user_location_info: pdu.require_ie(
            ID_USER_LOCATION_INFORMATION,
            "UserLocationInformation",
            UserLocationInfoNr::decode_per,
        )?,
        ue_security_capabilities: pdu.require_ie(
            ID_UE_SECURITY_CAPABILITIES,
            "UESecurityCapabilities",
            UeSecurityCapabilities::decode_per,
        )?,
        sessions: pdu.require_ie(
            ID_PDU_SESSION_RESOURCE_TO_BE_SWITCHED_DL_LIST,
            "PDUSessionResourceToBeSwitchedDLList",
            |d| decode_list(d, 1, MAX_PDU_SESSIONS),
        )?,
    })
}

// ============================================================================
// Path Switch Request Acknowledge / Failure
// ============================================================================

/// Build a Path Switch Request Acknowledge PDU (AMF side)
pub fn build_path_switch_request_acknowledge(params: &PathSwitchRequestAcknowledgeParams) -> NgapResult<NgapPdu> {
    if params.sessions.is_empty() {
        return Err(NgapError::MissingParameter("PDU session resource switched list"));
    }
    if params.allowed_nssai.is_empty() {
        return Err(NgapError::MissingParameter("allowed NSSAI"));
    }
    let mut pdu = NgapPdu::successful(ProcedureCode::PathSwitchRequest)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Ignore, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Ignore, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?;
    if let Some(caps) = &params.ue_security_capabilities {
        pdu.push_ie(ID_UE_SECURITY_CAPABILITIES, Criticality::Reject, |e| caps.encode_per(e))?;
    }
    pdu.push_ie(ID_SECURITY_CONTEXT, Criticality::Reject, |e| params.security_context.encode_per(e))?;
    pdu.push_ie(ID_PDU_SESSION_RESOURCE_SWITCHED_LIST, Criticality::Ignore, |e| {
        encode_list(e, &params.sessions, 1, MAX_PDU_SESSIONS)
    })?;
    pdu.push_ie(ID_ALLOWED_NSSAI, Criticality::Reject, |e| encode_allowed_nssai(e, &params.allowed_nssai))?;
    Ok(pdu)
}

/// Parse a Path Switch Request Acknowledge from an NGAP PDU
///
/// The session transfers stay encoded; see
/// [`PathSwitchRequestAcknowledgeData::switched_sessions`].
pub fn parse_path_switch_request_acknowledge(pdu: &NgapPdu) -> NgapResult<PathSwitchRequestAcknowledgeData> {
    pdu.expect(Presence::SuccessfulOutcome, ProcedureCode::PathSwitchRequest)?;
    Ok(PathSwitchRequestAcknowledgeData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        ue_security_capabilities: pdu.decode_ie(ID_UE_SECURITY_CAPABILITIES, UeSecurityCapabilities::decode_per)?,
        security_context: pdu.require_ie(ID_SECURITY_CONTEXT, "SecurityContext", SecurityContext::decode_per)?,
        sessions: pdu.require_ie(
            ID_PDU_SESSION_RESOURCE_SWITCHED_LIST,
            "PDUSessionResourceSwitchedList",
            |d| decode_list(d, 1, MAX_PDU_SESSIONS),
        )?,
        allowed_nssai: pdu.require_ie(ID_ALLOWED_NSSAI, "AllowedNSSAI", decode_allowed_nssai)?,
    })
}

/// Build a Path Switch Request Failure PDU (AMF side)
pub fn build_path_switch_request_failure(params: &PathSwitchRequestFailureParams) -> NgapResult<NgapPdu> {
    NgapPdu::unsuccessful(ProcedureCode::PathSwitchRequest)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Ignore, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Ignore, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?
        .with_ie(ID_PDU_SESSION_RESOURCE_RELEASED_LIST_PS_FAIL, Criticality::Ignore, |e| {
            encode_list(e, &params.released_sessions, 1, MAX_PDU_SESSIONS)
        })
}

/// Parse a Path Switch Request Failure from an NGAP PDU
pub fn parse_path_switch_request_failure(pdu: &NgapPdu) -> NgapResult<PathSwitchRequestFailureData> {
    pdu.expect(Presence::UnsuccessfulOutcome, ProcedureCode::PathSwitchRequest)?;
    Ok(PathSwitchRequestFailureData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        released_sessions: pdu.require_ie(
            ID_PDU_SESSION_RESOURCE_RELEASED_LIST_PS_FAIL,
            "PDUSessionResourceReleasedListPSFail",
            |d| decode_list(d, 1, MAX_PDU_SESSIONS),
        )?,
    })
}

/// Build and encode a Path Switch Request to bytes
pub fn encode_path_switch_request(params: &PathSwitchRequestParams) -> NgapResult<Vec<u8>> {
    build_path_switch_request(params)?.encode()
}

/// Decode and parse a Path Switch Request Acknowledge from bytes
pub fn decode_path_switch_request_acknowledge(bytes: &[u8]) -> NgapResult<PathSwitchRequestAcknowledgeData> {
    parse_path_switch_request_acknowledge(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is a Path Switch Request Acknowledge
pub fn is_path_switch_request_acknowledge(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::SuccessfulOutcome, ProcedureCode::PathSwitchRequest)
}

/// Check if an NGAP PDU is a Path Switch Request Failure
pub fn is_path_switch_request_failure(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::UnsuccessfulOutcome, ProcedureCode::PathSwitchRequest)
}
