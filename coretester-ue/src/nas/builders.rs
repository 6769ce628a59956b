//! NAS message builders
//!
//! Pure functions from UE parameters to plain NAS bytes. None of them
//! touches the security context; protection is applied afterwards by
//! [`UeSecurityContext::encode_with_security`](crate::security::UeSecurityContext::encode_with_security).

use coretester_common::{FiveGSTmsi, SNssai};
use coretester_nas::{
    AuthenticationFailure, AuthenticationResponse, CodecResult, ConfigurationUpdateComplete,
    DeregistrationAcceptUeTerminated, DeregistrationRequestUeOriginating, DeregistrationType, IdentityResponse,
    MmCause, MmMessage, MobileIdentity, NasKeySetIdentifier, PduSessionEstablishmentRequest, PduSessionStatus,
    RegistrationComplete, RegistrationRequest, RegistrationType, RegistrationTypeIe, RequestType,
    SecurityModeComplete, ServiceRequest, ServiceType, SmMessage, UeSecurityCapability, UlNasTransport,
};

/// 5GMM capability octet sent inside the Security Mode Complete container:
/// S1 mode, handover attach and LPP supported.
pub const MM_CAPABILITY: [u8; 1] = [0x07];

/// Inputs of a Registration Request.
#[derive(Debug, Clone)]
pub struct RegistrationParams<'a> {
    pub registration_type: RegistrationType,
    pub ngksi: NasKeySetIdentifier,
    /// 5G-GUTI when one was assigned, SUCI otherwise
    pub identity: MobileIdentity,
    pub capability: &'a UeSecurityCapability,
    pub requested_nssai: &'a [SNssai],
    /// Whether to include the 5GMM capability IE
    pub include_mm_capability: bool,
    /// Sessions reported in the PDU session status IE
    pub pdu_sessions: &'a [u8],
}

fn registration_message(params: &RegistrationParams<'_>) -> RegistrationRequest {
    let mut request = RegistrationRequest::new(
        RegistrationTypeIe {
            follow_on_request: true,
            value: params.registration_type,
        },
        params.ngksi,
        params.identity.clone(),
    );
    if params.include_mm_capability {
        request.mm_capability = Some(MM_CAPABILITY.to_vec());
    }
    request.ue_security_capability = Some(params.capability.clone());
    if !params.requested_nssai.is_empty() {
        request.requested_nssai = Some(params.requested_nssai.to_vec());
    }
    if !params.pdu_sessions.is_empty() {
        let status = PduSessionStatus::from_sessions(params.pdu_sessions.iter().copied());
        request.uplink_data_status = Some(status);
        request.pdu_session_status = Some(status);
    }
    request
}

pub fn registration_request(params: &RegistrationParams<'_>) -> CodecResult<Vec<u8>> {
    registration_message(params).encode()
}

pub fn identity_response(identity: MobileIdentity) -> CodecResult<Vec<u8>> {
    IdentityResponse {
        mobile_identity: identity,
    }
    .encode()
}

pub fn authentication_response(res_star: [u8; 16]) -> CodecResult<Vec<u8>> {
    AuthenticationResponse {
        res_star: Some(res_star),
    }
    .encode()
}

/// Authentication Failure; `auts` is only carried with a synch failure.
pub fn authentication_failure(cause: MmCause, auts: Option<[u8; 14]>) -> CodecResult<Vec<u8>> {
    AuthenticationFailure {
        cause,
        auts: auts.filter(|_| cause == MmCause::SynchFailure),
    }
    .encode()
}

/// Security Mode Complete carrying the full Registration Request in its
/// NAS message container.
pub fn security_mode_complete(imeisv: Option<&str>, registration: &RegistrationParams<'_>) -> CodecResult<Vec<u8>> {
    let container = registration_message(registration).encode()?;
    SecurityModeComplete {
        imeisv: imeisv.map(|digits| MobileIdentity::Imeisv(digits.to_string())),
        nas_message_container: Some(container),
    }
    .encode()
}

pub fn registration_complete() -> CodecResult<Vec<u8>> {
    RegistrationComplete.encode()
}

pub fn configuration_update_complete() -> CodecResult<Vec<u8>> {
    ConfigurationUpdateComplete.encode()
}

/// PDU Session Establishment Request for an IPv4 session, wrapped in the
/// UL NAS Transport that carries it to the SMF.
pub fn pdu_session_establishment_request(psi: u8, pti: u8, dnn: &str, snssai: SNssai) -> CodecResult<Vec<u8>> {
    let sm = PduSessionEstablishmentRequest::ipv4(psi, pti).encode()?;
    let mut transport = UlNasTransport::n1_sm(psi, sm);
    transport.request_type = Some(RequestType::InitialRequest);
    transport.snssai = Some(snssai);
    if !dnn.is_empty() {
        transport.dnn = Some(dnn.to_string());
    }
    transport.encode()
}

/// Inputs of a Service Request.
#[derive(Debug, Clone)]
pub struct ServiceParams<'a> {
    pub service_type: ServiceType,
    pub ngksi: NasKeySetIdentifier,
    pub s_tmsi: FiveGSTmsi,
    /// Sessions the UE holds
    pub pdu_sessions: &'a [u8],
}

fn service_message(params: &ServiceParams<'_>, container: Option<Vec<u8>>) -> CodecResult<Vec<u8>> {
    let status = PduSessionStatus::from_sessions(params.pdu_sessions.iter().copied());
    ServiceRequest {
        ngksi: params.ngksi,
        service_type: params.service_type,
        s_tmsi: params.s_tmsi,
        uplink_data_status: (params.service_type == ServiceType::Data).then_some(status),
        pdu_session_status: Some(status),
        allowed_pdu_session_status: None,
        nas_message_container: container,
    }
    .encode()
}

/// The Service Request whose (ciphered) encoding goes in the NAS message
/// container of the outer one.
pub fn service_request_inner(params: &ServiceParams<'_>) -> CodecResult<Vec<u8>> {
    service_message(params, None)
}

/// Outer Service Request: cleartext IEs plus the ciphered inner message.
pub fn service_request(params: &ServiceParams<'_>, container: Vec<u8>) -> CodecResult<Vec<u8>> {
    service_message(params, Some(container))
}

/// UE-originating Deregistration Request over 3GPP access.
pub fn deregistration_request(
    ngksi: NasKeySetIdentifier,
    identity: MobileIdentity,
    switch_off: bool,
) -> CodecResult<Vec<u8>> {
    DeregistrationRequestUeOriginating {
        deregistration_type: DeregistrationType {
            switch_off,
            re_registration_required: false,
            access_type: DeregistrationType::ACCESS_3GPP,
        },
        ngksi,
        mobile_identity: identity,
    }
    .encode()
}

pub fn deregistration_accept_ue_terminated() -> CodecResult<Vec<u8>> {
    DeregistrationAcceptUeTerminated.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coretester_crypto::{CipheringAlgorithm, IntegrityAlgorithm};
    use coretester_nas::NasMessage;

    fn capability() -> UeSecurityCapability {
        UeSecurityCapability::new(
            &[CipheringAlgorithm::Nea0, CipheringAlgorithm::Nea2],
            &[IntegrityAlgorithm::Nia0, IntegrityAlgorithm::Nia2],
        )
    }

    fn params<'a>(cap: &'a UeSecurityCapability, sessions: &'a [u8]) -> RegistrationParams<'a> {
        RegistrationParams {
            registration_type: RegistrationType::InitialRegistration,
            ngksi: NasKeySetIdentifier::no_key(),
            identity: MobileIdentity::Suci(vec![0x01, 0x00, 0xF1, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10]),
            capability: cap,
            requested_nssai: &[],
            include_mm_capability: false,
            pdu_sessions: sessions,
        }
    }

    #[test]
    fn test_registration_request_fields() {
        let cap = capability();
        let bytes = registration_request(&params(&cap, &[])).unwrap();
        let NasMessage::RegistrationRequest(req) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected Registration Request");
        };
        assert!(req.registration_type.follow_on_request);
        assert_eq!(req.registration_type.value, RegistrationType::InitialRegistration);
        assert!(req.ngksi.is_no_key());
        assert_eq!(req.ue_security_capability, Some(cap));
        assert!(req.mm_capability.is_none());
        assert!(req.pdu_session_status.is_none());
    }

    #[test]
    fn test_registration_request_reports_sessions() {
        let cap = capability();
        let bytes = registration_request(&params(&cap, &[1, 5])).unwrap();
        let NasMessage::RegistrationRequest(req) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected Registration Request");
        };
        assert_eq!(req.pdu_session_status, Some(PduSessionStatus::from_sessions([1, 5])));
        assert_eq!(req.uplink_data_status, req.pdu_session_status);
    }

    #[test]
    fn test_security_mode_complete_carries_registration() {
        let cap = capability();
        let mut reg = params(&cap, &[]);
        reg.include_mm_capability = true;
        let bytes = security_mode_complete(Some("3569380356438091"), &reg).unwrap();
        let NasMessage::SecurityModeComplete(smc) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected Security Mode Complete");
        };
        assert_eq!(smc.imeisv, Some(MobileIdentity::Imeisv("3569380356438091".to_string())));
        let inner = NasMessage::decode(&smc.nas_message_container.unwrap()).unwrap();
        let NasMessage::RegistrationRequest(req) = inner else {
            panic!("expected Registration Request in container");
        };
        assert_eq!(req.mm_capability, Some(MM_CAPABILITY.to_vec()));
    }

    #[test]
    fn test_authentication_failure_drops_auts_on_mac_failure() {
        let bytes = authentication_failure(MmCause::MacFailure, Some([0xAA; 14])).unwrap();
        let NasMessage::AuthenticationFailure(failure) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected Authentication Failure");
        };
        assert_eq!(failure.cause, MmCause::MacFailure);
        assert!(failure.auts.is_none());

        let bytes = authentication_failure(MmCause::SynchFailure, Some([0xAA; 14])).unwrap();
        let NasMessage::AuthenticationFailure(failure) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected Authentication Failure");
        };
        assert_eq!(failure.auts, Some([0xAA; 14]));
    }

    #[test]
    fn test_pdu_session_request_in_transport() {
        let snssai = SNssai::with_sd(1, [0x10, 0x20, 0x30]);
        let bytes = pdu_session_establishment_request(1, 3, "internet", snssai).unwrap();
        let NasMessage::UlNasTransport(transport) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected UL NAS Transport");
        };
        assert_eq!(transport.pdu_session_id, Some(1));
        assert_eq!(transport.request_type, Some(RequestType::InitialRequest));
        assert_eq!(transport.dnn.as_deref(), Some("internet"));
        assert_eq!(transport.snssai, Some(snssai));
        let NasMessage::PduSessionEstablishmentRequest(req) = NasMessage::decode(&transport.payload_container).unwrap()
        else {
            panic!("expected PDU Session Establishment Request");
        };
        assert_eq!((req.pdu_session_id, req.pti), (1, 3));
    }

    #[test]
    fn test_service_request_data_carries_uplink_status() {
        let params = ServiceParams {
            service_type: ServiceType::Data,
            ngksi: NasKeySetIdentifier::native(1),
            s_tmsi: FiveGSTmsi {
                amf_set_id: 1,
                amf_pointer: 1,
                tmsi: 0xC0FFEE,
            },
            pdu_sessions: &[1],
        };
        let bytes = service_request(&params, vec![0x01, 0x02]).unwrap();
        let NasMessage::ServiceRequest(req) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected Service Request");
        };
        assert_eq!(req.uplink_data_status, Some(PduSessionStatus::from_sessions([1])));
        assert_eq!(req.nas_message_container, Some(vec![0x01, 0x02]));

        let signalling = ServiceParams {
            service_type: ServiceType::Signalling,
            ..params
        };
        let NasMessage::ServiceRequest(req) = NasMessage::decode(&service_request_inner(&signalling).unwrap()).unwrap()
        else {
            panic!("expected Service Request");
        };
        assert!(req.uplink_data_status.is_none());
        assert!(req.nas_message_container.is_none());
    }

    #[test]
    fn test_deregistration_request_switch_off() {
        let bytes = deregistration_request(NasKeySetIdentifier::native(1), MobileIdentity::NoIdentity, true).unwrap();
        let NasMessage::DeregistrationRequestUeOriginating(req) = NasMessage::decode(&bytes).unwrap() else {
            panic!("expected Deregistration Request");
        };
        assert!(req.deregistration_type.switch_off);
        assert_eq!(req.deregistration_type.access_type, DeregistrationType::ACCESS_3GPP);
    }
}
