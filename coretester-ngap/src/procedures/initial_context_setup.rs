//! Initial Context Setup Procedure
//!
//! Implements the Initial Context Setup procedure as defined in 3GPP TS 38.413 Section 8.3.1.
//! The AMF establishes the UE context at the gNB, optionally with PDU session
//! resources and a piggybacked NAS message.

use coretester_common::SNssai;

use crate::codec::*;
use crate::ies::*;
use crate::per::{PerDecoder, PerEncoder, PerResult};

use super::pdu_session_resource::{PduSessionResourceSetupItem, PduSessionResourceSetupResponseItem};

/// maxnoofAllowedS-NSSAIs
const MAX_ALLOWED_SNSSAIS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AllowedNssaiItem(SNssai);

impl PerCodec for AllowedNssaiItem {
    fn encode_per(&self, enc: &mut PerEncoder) -> PerResult<()> {
        enc.put_sequence_preamble(true, &[false]);
        self.0.encode_per(enc)
    }

    fn decode_per(dec: &mut PerDecoder<'_>) -> PerResult<Self> {
        dec.get_sequence_preamble(true, 1, "AllowedNSSAI-Item")?;
        Ok(Self(SNssai::decode_per(dec)?))
    }
}

/// AllowedNSSAI: SEQUENCE (SIZE(1..8)) OF AllowedNSSAI-Item
pub fn encode_allowed_nssai(enc: &mut PerEncoder, slices: &[SNssai]) -> PerResult<()> {
    let items: Vec<AllowedNssaiItem> = slices.iter().copied().map(AllowedNssaiItem).collect();
    encode_list(enc, &items, 1, MAX_ALLOWED_SNSSAIS)
}

pub fn decode_allowed_nssai(dec: &mut PerDecoder<'_>) -> PerResult<Vec<SNssai>> {
    let items: Vec<AllowedNssaiItem> = decode_list(dec, 1, MAX_ALLOWED_SNSSAIS)?;
    Ok(items.into_iter().map(|item| item.0).collect())
}

/// Initial Context Setup Request contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextSetupRequestParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub guami: Guami,
    pub sessions: Vec<PduSessionResourceSetupItem>,
    pub allowed_nssai: Vec<SNssai>,
    pub ue_security_capabilities: UeSecurityCapabilities,
    /// KgNB
    pub security_key: [u8; 32],
    pub nas_pdu: Option<Vec<u8>>,
}

pub type InitialContextSetupRequestData = InitialContextSetupRequestParams;

/// Initial Context Setup Response contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextSetupResponseParams {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub sessions: Vec<PduSessionResourceSetupResponseItem>,
}

pub type InitialContextSetupResponseData = InitialContextSetupResponseParams;

/// Build an Initial Context Setup Request PDU (AMF side)
pub fn build_initial_context_setup_request(params: &InitialContextSetupRequestParams) -> NgapResult<NgapPdu> {
    if params.allowed_nssai.is_empty() {
        return Err(NgapError::MissingParameter("allowed NSSAI"));
    }
    let mut pdu = NgapPdu::initiating(ProcedureCode::InitialContextSetup)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Reject, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?
        .with_ie(ID_GUAMI, Criticality::Reject, |e| params.guami.encode_per(e))?;
    if !params.sessions.is_empty() {
        pdu.push_ie(ID_PDU_SESSION_RESOURCE_SETUP_LIST_CXT_REQ, Criticality::Reject, |e| {
            encode_list(e, &params.sessions, 1, MAX_PDU_SESSIONS)
        })?;
    }
    pdu.push_ie(ID_ALLOWED_NSSAI, Criticality::Reject, |e| encode_allowed_nssai(e, &params.allowed_nssai))?;
    pdu.push_ie(ID_UE_SECURITY_CAPABILITIES, Criticality::Reject, |e| {
        params.ue_security_capabilities.encode_per(e)
    })?;
    pdu.push_ie(ID_SECURITY_KEY, Criticality::Reject, |e| put_security_key(e, &params.security_key))?;
    if let Some(nas) = &params.nas_pdu {
        pdu.push_ie(ID_NAS_PDU, Criticality::Ignore, |e| put_nas_pdu(e, nas))?;
    }
    Ok(pdu)
}

/// Parse an Initial Context Setup Request from an NGAP PDU
pub fn parse_initial_context_setup_request(pdu: &NgapPdu) -> NgapResult<InitialContextSetupRequestData> {
    pdu.expect(Presence::InitiatingMessage, ProcedureCode::InitialContextSetup)?;
    Ok(InitialContextSetupRequestData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        guami: pdu.require_ie(ID_GUAMI, "GUAMI", Guami::decode_per)?,
        sessions: pdu
            .decode_ie(ID_PDU_SESSION_RESOURCE_SETUP_LIST_CXT_REQ, |d| decode_list(d, 1, MAX_PDU_SESSIONS))?
            .unwrap_or_default(),
        allowed_nssai: pdu.require_ie(ID_ALLOWED_NSSAI, "AllowedNSSAI", decode_allowed_nssai)?,
        ue_security_capabilities: pdu.require_ie(
            ID_UE_SECURITY_CAPABILITIES,
            "UESecurityCapabilities",
            UeSecurityCapabilities::decode_per,
        )?,
        security_key: pdu.require_ie(ID_SECURITY_KEY, "SecurityKey", get_security_key)?,
        nas_pdu: pdu.decode_ie(ID_NAS_PDU, get_nas_pdu)?,
    })
}

/// Build an Initial Context Setup Response PDU
pub fn build_initial_context_setup_response(params: &InitialContextSetupResponseParams) -> NgapResult<NgapPdu> {
    let mut pdu = NgapPdu::successful(ProcedureCode::InitialContextSetup)
        .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Ignore, |e| put_amf_ue_ngap_id(e, params.amf_ue_ngap_id))?
        .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Ignore, |e| put_ran_ue_ngap_id(e, params.ran_ue_ngap_id))?;
    if !params.sessions.is_empty() {
        pdu.push_ie(ID_PDU_SESSION_RESOURCE_SETUP_LIST_CXT_RES, Criticality::Ignore, |e| {
            encode_list(e, &params.sessions, 1, MAX_PDU_SESSIONS)
        })?;
    }
    Ok(pdu)
}

/// Parse an Initial Context Setup Response from an NGAP PDU
pub fn parse_initial_context_setup_response(pdu: &NgapPdu) -> NgapResult<InitialContextSetupResponseData> {
    pdu.expect(Presence::SuccessfulOutcome, ProcedureCode::InitialContextSetup)?;
    Ok(InitialContextSetupResponseData {
        amf_ue_ngap_id: pdu.require_ie(ID_AMF_UE_NGAP_ID, "AMF-UE-NGAP-ID", get_amf_ue_ngap_id)?,
        ran_ue_ngap_id: pdu.require_ie(ID_RAN_UE_NGAP_ID, "RAN-UE-NGAP-ID", get_ran_ue_ngap_id)?,
        sessions: pdu
            .decode_ie(ID_PDU_SESSION_RESOURCE_SETUP_LIST_CXT_RES, |d| decode_list(d, 1, MAX_PDU_SESSIONS))?
            .unwrap_or_default(),
    })
}

/// Build and encode an Initial Context Setup Response to bytes
pub fn encode_initial_context_setup_response(params: &InitialContextSetupResponseParams) -> NgapResult<Vec<u8>> {
    build_initial_context_setup_response(params)?.encode()
}

/// Decode and parse an Initial Context Setup Request from bytes
pub fn decode_initial_context_setup_request(bytes: &[u8]) -> NgapResult<InitialContextSetupRequestData> {
    parse_initial_context_setup_request(&decode_ngap_pdu(bytes)?)
}

/// Check if an NGAP PDU is an Initial Context Setup Request
pub fn is_initial_context_setup_request(pdu: &NgapPdu) -> bool {
    pdu.is(Presence::InitiatingMessage, ProcedureCode::InitialContextSetup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coretester_common::Plmn;

    fn create_test_request() -> InitialContextSetupRequestParams {
        InitialContextSetupRequestParams {
            amf_ue_ngap_id: 1,
            ran_ue_ngap_id: 1,
            guami: Guami {
                plmn: Plmn::new(208, 93, false),
                amf_region_id: 0xCA,
                amf_set_id: 0x3F8,
                amf_pointer: 0,
            },
            sessions: Vec::new(),
            allowed_nssai: vec![SNssai::with_sd(1, [0x01, 0x02, 0x03])],
            ue_security_capabilities: UeSecurityCapabilities::default(),
            security_key: [0x11; 32],
            nas_pdu: Some(vec![0x7E, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x7E, 0x00, 0x42]),
        }
    }

    #[test]
    fn test_initial_context_setup_request_roundtrip() {
        let params = create_test_request();
        let bytes = build_initial_context_setup_request(&params).unwrap().encode().unwrap();
        assert_eq!(bytes[1], 14);
        let decoded = decode_initial_context_setup_request(&bytes).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_initial_context_setup_request_with_session() {
        let mut params = create_test_request();
        params.sessions.push(PduSessionResourceSetupItem {
            pdu_session_id: 1,
            nas_pdu: None,
            snssai: SNssai::new(1),
            transfer: vec![0x00, 0x00, 0x00],
        });
        let pdu = build_initial_context_setup_request(&params).unwrap();
        assert!(is_initial_context_setup_request(&pdu));
        let decoded = parse_initial_context_setup_request(&pdu).unwrap();
        assert_eq!(decoded.sessions.len(), 1);
        assert_eq!(decoded.sessions[0].transfer, vec![0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_initial_context_setup_request_missing_key() {
        let pdu = NgapPdu::initiating(ProcedureCode::InitialContextSetup)
            .with_ie(ID_AMF_UE_NGAP_ID, Criticality::Reject, |e| put_amf_ue_ngap_id(e, 1))
            .unwrap()
            .with_ie(ID_RAN_UE_NGAP_ID, Criticality::Reject, |e| put_ran_ue_ngap_id(e, 1))
            .unwrap();
        assert!(matches!(
            parse_initial_context_setup_request(&pdu),
            Err(NgapError::MissingMandatoryIe("GUAMI"))
        ));
    }

    #[test]
    fn test_initial_context_setup_response_roundtrip() {
        let params = InitialContextSetupResponseParams {
            amf_ue_ngap_id: 9,
            ran_ue_ngap_id: 10,
            sessions: vec![PduSessionResourceSetupResponseItem {
                pdu_session_id: 1,
                transfer: vec![0x01, 0x02],
            }],
        };
        let bytes = encode_initial_context_setup_response(&params).unwrap();
        let decoded = parse_initial_context_setup_response(&decode_ngap_pdu(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, params);
    }
}
