//! Initial UE Message Procedure
//!
//! Implements the Initial UE Message procedure as defined in 3GPP TS 38.413 Section 8.6.1.
//! The gNB uses it to forward the first uplink NAS message of a UE, which has no
//! UE-associated logical NG connection yet.

use coretester_common::FiveGSTmsi;

use crate::codec::*;
use crate::ies::*;

use super::{require_location, require_nas_pdu, require_ran_ue_ngap_id};

/// Parameters for building an Initial UE Message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialUeMessageParams {
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Vec<u8>,
    pub user_location_info: UserLocationInfoNr,
    pub rrc_establishment_cause: RrcEstablishmentCause,
    /// Present when the UE resumes with a 5G-S-TMSI (service request)
    pub five_g_s_tmsi: Option<FiveGSTmsi>,
    pub ue_context_requested: bool,
}

/// Parsed Initial UE Message data
pub type InitialUeMessageData = InitialUeMessageParams;

/// Build an Initial UE Message PDU
///
/// Fails before encoding if the RAN-UE-NGAP-ID, NAS payload, PLMN, TAC or
/// cell identity is missing.
pub fn build_initial_ue_message(params: &InitialUeMessageParams) -> NgapResult<NgapPdu> {
    require_ran_ue_ngap_id(params.ran_ue_ngap_id)?;
    require_nas_pdu(&params.nas_pdu)?;
    require_location(&params.user_location_info)?;

    let mut pdu = NgapPdu::initiating(ProcedureCode::InitialUeMessage)
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?
        .with_ie(ID_NAS_PDU, Criticality::Reject, |e| put_nas_pdu(e, &params.nas_pdu))?
        .with_ie(ID_USER_LOCATION_INFORMATION, Criticality::Reject, |e| {
            params.user_location_info.encode_per(e)
        })?
        .with_ie(ID_RRC_ESTABLISHMENT_CAUSE, Criticality::Ignore, |e| {
            params.rrc_establishment_cause.encode_per(e)
        })?;
    if let Some(tmsi) = &params.five_g_s_tmsi {
        pdu.push_ie(ID_FIVE_G_S_TMSI, Criticality::Reject, |e| tmsi.encode_per(e))?;
    }
    if params.ue_context_requested {
        pdu.push_ie(ID_UE_CONTEXT_REQUEST, Criticality::Ignore, put_ue_context_requested)?;
    }
    Ok(pdu)
}

/// Parse an Initial UE Message from an NGAP PDU
pub fn parse_initial_ue_message(pdu: &NgapPdu) -> NgapResult<InitialUeMessageData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::InitialUeMessage)?;
    Ok(InitialUeMessageData {
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        nas_pdu: pdu.require_ie(ID_NAS_PDU, "NAS-PDU", get_nas_pdu)?,
        user_location_info: pdu.require_ie(
            ID_USER_LOCATION_INFORMATION,
            "UserLocationInformation",
            UserLocationInfoNr::decode_per,
        )?,
        rrc_establishment_cause: pdu.require_ie(
            ID_RRC_ESTABLISHMENT_CAUSE,
            "RRCEstablishmentCause",
            RrcEstablishmentCause::decode_per,
        )?,
        five_g_s_tmsi: pdu.decode_ie(ID_FIVE_G_S_TMSI, FiveGSTmsi::decode_per)?,
        ue_context_requested: pdu
            .decode_ie(ID_UE_CONTEXT_REQUEST, get_ue_context_requested)?
            .unwrap_or(false),
    })
}

/// Build and encode an Initial UE Message to bytes
pub fn encode_initial_ue_message(params: &InitialUeMessageParams) -> NgapResult<Vec<u8>> {
    build_initial_ue_message(params)?.encode()
}

/// Decode and parse an Initial UE Message from bytes
pub fn decode_initial_ue_message(bytes: &[u8]) -> NgapResult<InitialUeMessageData> {
    parse_initial_ue_message(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is an Initial UE Message
pub fn is_initial_ue_message(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::InitialUeMessage)
}
