//! 5GMM messages (TS 24.501 8.2)

use coretester_common::{FiveGSTmsi, Guti, SNssai, Tai};

use crate::codec::{
    get_lv, get_lve, get_u8, put_lv, put_lve, put_tlv, put_tlve, put_tv1, CodecError, CodecResult,
    OptionalIes,
};
use crate::enums::{IdentityType, MmCause, MmMessageType, PayloadContainerType, RequestType, ServiceType};
use crate::header::PlainMmHeader;
use crate::ies::{
    decode_dnn, decode_nssai, decode_tai_list, encode_dnn, encode_nssai, encode_tai_list, MobileIdentity,
    NasKeySetIdentifier, NasSecurityAlgorithms, PduSessionStatus, RegistrationTypeIe, UeSecurityCapability,
};

/// A 5GMM message body with its fixed message type.
pub trait MmMessage: Sized {
    const MESSAGE_TYPE: MmMessageType;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()>;

    /// Decodes everything after the plain 5GMM header.
    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self>;

    /// Plain message including its header.
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        PlainMmHeader::new(Self::MESSAGE_TYPE).encode(&mut buf);
        self.encode_body(&mut buf)?;
        Ok(buf)
    }
}

fn fixed<const N: usize>(value: &[u8], field: &'static str) -> CodecResult<[u8; N]> {
    value.try_into().map_err(|_| CodecError::InvalidValue {
        field,
        value: hex::encode(value),
    })
}

fn optional_guti(ies: &OptionalIes, iei: u8) -> CodecResult<Option<Guti>> {
    match ies.get(iei) {
        Some(value) => match MobileIdentity::decode_value(value)? {
            MobileIdentity::Guti(guti) => Ok(Some(guti)),
            other => Err(CodecError::InvalidValue {
                field: "5G-GUTI",
                value: format!("{other:?}"),
            }),
        },
        None => Ok(None),
    }
}

fn optional_status(ies: &OptionalIes, iei: u8) -> CodecResult<Option<PduSessionStatus>> {
    ies.get(iei).map(PduSessionStatus::decode_value).transpose()
}

/// Empty-bodied messages. Unknown optional IEs are skipped on decode.
macro_rules! empty_mm_message {
    ($(#[$meta:meta])* $name:ident, $ty:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name;

        impl MmMessage for $name {
            const MESSAGE_TYPE: MmMessageType = MmMessageType::$ty;

            fn encode_body(&self, _buf: &mut Vec<u8>) -> CodecResult<()> {
                Ok(())
            }

            fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
                OptionalIes::decode(buf, &[])?;
                Ok(Self)
            }
        }
    };
}

empty_mm_message!(RegistrationComplete, RegistrationComplete);
empty_mm_message!(AuthenticationReject, AuthenticationReject);
empty_mm_message!(ConfigurationUpdateComplete, ConfigurationUpdateComplete);
empty_mm_message!(DeregistrationAcceptUeOriginating, DeregistrationAcceptUeOriginating);
empty_mm_message!(DeregistrationAcceptUeTerminated, DeregistrationAcceptUeTerminated);

// ============================================================================
// Registration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub registration_type: RegistrationTypeIe,
    pub ngksi: NasKeySetIdentifier,
    pub mobile_identity: MobileIdentity,
    /// 5GMM capability (IEI 0x10)
    pub mm_capability: Option<Vec<u8>>,
    pub ue_security_capability: Option<UeSecurityCapability>,
    pub requested_nssai: Option<Vec<SNssai>>,
    pub last_visited_tai: Option<Tai>,
    pub uplink_data_status: Option<PduSessionStatus>,
    pub pdu_session_status: Option<PduSessionStatus>,
    /// Full protected message, only inside a ciphered NAS container
    pub nas_message_container: Option<Vec<u8>>,
}

impl RegistrationRequest {
    pub const IEI_MM_CAPABILITY: u8 = 0x10;
    pub const IEI_UE_SECURITY_CAPABILITY: u8 = 0x2E;
    pub const IEI_REQUESTED_NSSAI: u8 = 0x2F;
    pub const IEI_LAST_VISITED_TAI: u8 = 0x52;
    pub const IEI_UPLINK_DATA_STATUS: u8 = 0x40;
    pub const IEI_PDU_SESSION_STATUS: u8 = 0x50;
    pub const IEI_NAS_MESSAGE_CONTAINER: u8 = 0x71;

    pub fn new(registration_type: RegistrationTypeIe, ngksi: NasKeySetIdentifier, mobile_identity: MobileIdentity) -> Self {
        Self {
            registration_type,
            ngksi,
            mobile_identity,
            mm_capability: None,
            ue_security_capability: None,
            requested_nssai: None,
            last_visited_tai: None,
            uplink_data_status: None,
            pdu_session_status: None,
            nas_message_container: None,
        }
    }
}

impl MmMessage for RegistrationRequest {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::RegistrationRequest;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push((self.ngksi.to_nibble() << 4) | self.registration_type.to_nibble());
        put_lve(buf, &self.mobile_identity.encode_value()?)?;
        if let Some(cap) = &self.mm_capability {
            put_tlv(buf, Self::IEI_MM_CAPABILITY, cap)?;
        }
        if let Some(cap) = &self.ue_security_capability {
            put_tlv(buf, Self::IEI_UE_SECURITY_CAPABILITY, &cap.encode_value())?;
        }
        if let Some(nssai) = &self.requested_nssai {
            put_tlv(buf, Self::IEI_REQUESTED_NSSAI, &encode_nssai(nssai))?;
        }
        if let Some(tai) = &self.last_visited_tai {
            buf.push(Self::IEI_LAST_VISITED_TAI);
            buf.extend_from_slice(&tai.encode());
        }
        if let Some(status) = &self.uplink_data_status {
            put_tlv(buf, Self::IEI_UPLINK_DATA_STATUS, &status.encode_value())?;
        }
        if let Some(status) = &self.pdu_session_status {
            put_tlv(buf, Self::IEI_PDU_SESSION_STATUS, &status.encode_value())?;
        }
        if let Some(container) = &self.nas_message_container {
            put_tlve(buf, Self::IEI_NAS_MESSAGE_CONTAINER, container)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let octet = get_u8(buf)?;
        let registration_type = RegistrationTypeIe::from_nibble(octet & 0x0F)?;
        let ngksi = NasKeySetIdentifier::from_nibble(octet >> 4);
        let mobile_identity = MobileIdentity::decode_value(&get_lve(buf)?)?;
        let ies = OptionalIes::decode(buf, &[(Self::IEI_LAST_VISITED_TAI, 6)])?;
        Ok(Self {
            registration_type,
            ngksi,
            mobile_identity,
            mm_capability: ies.get(Self::IEI_MM_CAPABILITY).map(<[u8]>::to_vec),
            ue_security_capability: ies
                .get(Self::IEI_UE_SECURITY_CAPABILITY)
                .map(UeSecurityCapability::decode_value)
                .transpose()?,
            requested_nssai: ies.get(Self::IEI_REQUESTED_NSSAI).map(decode_nssai).transpose()?,
            last_visited_tai: ies
                .get(Self::IEI_LAST_VISITED_TAI)
                .map(|v| fixed::<6>(v, "last visited TAI").map(Tai::decode))
                .transpose()?,
            uplink_data_status: optional_status(&ies, Self::IEI_UPLINK_DATA_STATUS)?,
            pdu_session_status: optional_status(&ies, Self::IEI_PDU_SESSION_STATUS)?,
            nas_message_container: ies.get(Self::IEI_NAS_MESSAGE_CONTAINER).map(<[u8]>::to_vec),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationAccept {
    /// 5GS registration result octet (access type, SMS allowed)
    pub registration_result: u8,
    pub guti: Option<Guti>,
    pub tai_list: Vec<Tai>,
    pub allowed_nssai: Vec<SNssai>,
    pub pdu_session_status: Option<PduSessionStatus>,
    /// T3512 as a raw GPRS timer 3 octet
    pub t3512: Option<u8>,
}

impl RegistrationAccept {
    pub const IEI_GUTI: u8 = 0x77;
    pub const IEI_TAI_LIST: u8 = 0x54;
    pub const IEI_ALLOWED_NSSAI: u8 = 0x15;
    pub const IEI_PDU_SESSION_STATUS: u8 = 0x50;
    pub const IEI_T3512: u8 = 0x5E;

    /// Registered over 3GPP access
    pub const RESULT_3GPP: u8 = 0x01;
}

impl MmMessage for RegistrationAccept {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::RegistrationAccept;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        put_lv(buf, &[self.registration_result])?;
        if let Some(guti) = self.guti {
            put_tlve(buf, Self::IEI_GUTI, &MobileIdentity::Guti(guti).encode_value()?)?;
        }
        if !self.tai_list.is_empty() {
            put_tlv(buf, Self::IEI_TAI_LIST, &encode_tai_list(&self.tai_list))?;
        }
        if !self.allowed_nssai.is_empty() {
            put_tlv(buf, Self::IEI_ALLOWED_NSSAI, &encode_nssai(&self.allowed_nssai))?;
        }
        if let Some(status) = &self.pdu_session_status {
            put_tlv(buf, Self::IEI_PDU_SESSION_STATUS, &status.encode_value())?;
        }
        if let Some(timer) = self.t3512 {
            put_tlv(buf, Self::IEI_T3512, &[timer])?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let result = get_lv(buf)?;
        let registration_result = *result.first().ok_or(CodecError::MissingIe("5GS registration result"))?;
        let ies = OptionalIes::decode(buf, &[])?;
        Ok(Self {
            registration_result,
            guti: optional_guti(&ies, Self::IEI_GUTI)?,
            tai_list: ies.get(Self::IEI_TAI_LIST).map(decode_tai_list).transpose()?.unwrap_or_default(),
            allowed_nssai: ies
                .get(Self::IEI_ALLOWED_NSSAI)
                .map(decode_nssai)
                .transpose()?
                .unwrap_or_default(),
            pdu_session_status: optional_status(&ies, Self::IEI_PDU_SESSION_STATUS)?,
            t3512: ies.get(Self::IEI_T3512).and_then(|v| v.first().copied()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReject {
    pub cause: MmCause,
}

impl MmMessage for RegistrationReject {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::RegistrationReject;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.cause.into());
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let cause = MmCause::from(get_u8(buf)?);
        OptionalIes::decode(buf, &[])?;
        Ok(Self { cause })
    }
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    pub ngksi: NasKeySetIdentifier,
    pub abba: Vec<u8>,
    pub rand: Option<[u8; 16]>,
    pub autn: Option<[u8; 16]>,
}

impl AuthenticationRequest {
    pub const IEI_RAND: u8 = 0x21;
    pub const IEI_AUTN: u8 = 0x20;
}

impl MmMessage for AuthenticationRequest {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::AuthenticationRequest;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.ngksi.to_nibble());
        put_lv(buf, &self.abba)?;
        if let Some(rand) = &self.rand {
            buf.push(Self::IEI_RAND);
            buf.extend_from_slice(rand);
        }
        if let Some(autn) = &self.autn {
            put_tlv(buf, Self::IEI_AUTN, autn)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let ngksi = NasKeySetIdentifier::from_nibble(get_u8(buf)? & 0x0F);
        let abba = get_lv(buf)?;
        let ies = OptionalIes::decode(buf, &[(Self::IEI_RAND, 16)])?;
        Ok(Self {
            ngksi,
            abba,
            rand: ies.get(Self::IEI_RAND).map(|v| fixed(v, "RAND")).transpose()?,
            autn: ies.get(Self::IEI_AUTN).map(|v| fixed(v, "AUTN")).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationResponse {
    pub res_star: Option<[u8; 16]>,
}

impl AuthenticationResponse {
    pub const IEI_RESPONSE_PARAMETER: u8 = 0x2D;
}

impl MmMessage for AuthenticationResponse {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::AuthenticationResponse;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        if let Some(res) = &self.res_star {
            put_tlv(buf, Self::IEI_RESPONSE_PARAMETER, res)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let ies = OptionalIes::decode(buf, &[])?;
        Ok(Self {
            res_star: ies
                .get(Self::IEI_RESPONSE_PARAMETER)
                .map(|v| fixed(v, "RES*"))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationFailure {
    pub cause: MmCause,
    /// Present for synch failure
    pub auts: Option<[u8; 14]>,
}

impl AuthenticationFailure {
    pub const IEI_FAILURE_PARAMETER: u8 = 0x30;
}

impl MmMessage for AuthenticationFailure {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::AuthenticationFailure;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.cause.into());
        if let Some(auts) = &self.auts {
            put_tlv(buf, Self::IEI_FAILURE_PARAMETER, auts)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let cause = MmCause::from(get_u8(buf)?);
        let ies = OptionalIes::decode(buf, &[])?;
        Ok(Self {
            cause,
            auts: ies.get(Self::IEI_FAILURE_PARAMETER).map(|v| fixed(v, "AUTS")).transpose()?,
        })
    }
}

// ============================================================================
// Identity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequest {
    pub identity_type: IdentityType,
}

impl MmMessage for IdentityRequest {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::IdentityRequest;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.identity_type.into());
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let value = get_u8(buf)? & 0x07;
        let identity_type = IdentityType::try_from(value).map_err(|_| CodecError::InvalidValue {
            field: "identity type",
            value: value.to_string(),
        })?;
        Ok(Self { identity_type })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResponse {
    pub mobile_identity: MobileIdentity,
}

impl MmMessage for IdentityResponse {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::IdentityResponse;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        put_lve(buf, &self.mobile_identity.encode_value()?)
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            mobile_identity: MobileIdentity::decode_value(&get_lve(buf)?)?,
        })
    }
}

// ============================================================================
// Security mode
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityModeCommand {
    pub selected_algorithms: NasSecurityAlgorithms,
    pub ngksi: NasKeySetIdentifier,
    pub replayed_ue_security_capability: UeSecurityCapability,
    pub imeisv_requested: bool,
    /// Additional 5G security information octet (IEI 0x36)
    pub additional_security_info: Option<u8>,
    pub abba: Option<Vec<u8>>,
}

impl SecurityModeCommand {
    pub const IEI_IMEISV_REQUEST: u8 = 0xE0;
    pub const IEI_SELECTED_EPS_ALGORITHMS: u8 = 0x57;
    pub const IEI_ADDITIONAL_SECURITY_INFO: u8 = 0x36;
    pub const IEI_ABBA: u8 = 0x38;
}

impl MmMessage for SecurityModeCommand {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::SecurityModeCommand;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.selected_algorithms.encode());
        buf.push(self.ngksi.to_nibble());
        put_lv(buf, &self.replayed_ue_security_capability.encode_value())?;
        if self.imeisv_requested {
            put_tv1(buf, Self::IEI_IMEISV_REQUEST, 1);
        }
        if let Some(info) = self.additional_security_info {
            put_tlv(buf, Self::IEI_ADDITIONAL_SECURITY_INFO, &[info])?;
        }
        if let Some(abba) = &self.abba {
            put_tlv(buf, Self::IEI_ABBA, abba)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let selected_algorithms = NasSecurityAlgorithms::decode(get_u8(buf)?)?;
        let ngksi = NasKeySetIdentifier::from_nibble(get_u8(buf)? & 0x0F);
        let replayed_ue_security_capability = UeSecurityCapability::decode_value(&get_lv(buf)?)?;
        let ies = OptionalIes::decode(buf, &[(Self::IEI_SELECTED_EPS_ALGORITHMS, 1)])?;
        Ok(Self {
            selected_algorithms,
            ngksi,
            replayed_ue_security_capability,
            imeisv_requested: ies.half(Self::IEI_IMEISV_REQUEST).is_some_and(|v| v & 0x07 == 1),
            additional_security_info: ies
                .get(Self::IEI_ADDITIONAL_SECURITY_INFO)
                .and_then(|v| v.first().copied()),
            abba: ies.get(Self::IEI_ABBA).map(<[u8]>::to_vec),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityModeComplete {
    pub imeisv: Option<MobileIdentity>,
    pub nas_message_container: Option<Vec<u8>>,
}

impl SecurityModeComplete {
    pub const IEI_IMEISV: u8 = 0x77;
    pub const IEI_NAS_MESSAGE_CONTAINER: u8 = 0x71;
}

impl MmMessage for SecurityModeComplete {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::SecurityModeComplete;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        if let Some(imeisv) = &self.imeisv {
            put_tlve(buf, Self::IEI_IMEISV, &imeisv.encode_value()?)?;
        }
        if let Some(container) = &self.nas_message_container {
            put_tlve(buf, Self::IEI_NAS_MESSAGE_CONTAINER, container)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let ies = OptionalIes::decode(buf, &[])?;
        Ok(Self {
            imeisv: ies.get(Self::IEI_IMEISV).map(MobileIdentity::decode_value).transpose()?,
            nas_message_container: ies.get(Self::IEI_NAS_MESSAGE_CONTAINER).map(<[u8]>::to_vec),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityModeReject {
    pub cause: MmCause,
}

impl MmMessage for SecurityModeReject {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::SecurityModeReject;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.cause.into());
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            cause: MmCause::from(get_u8(buf)?),
        })
    }
}

// ============================================================================
// Configuration update
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationUpdateCommand {
    /// Configuration update indication: acknowledgement requested
    pub acknowledgement_requested: bool,
    /// Configuration update indication: registration requested
    pub registration_requested: bool,
    pub guti: Option<Guti>,
    pub tai_list: Vec<Tai>,
    pub allowed_nssai: Vec<SNssai>,
}

impl ConfigurationUpdateCommand {
    pub const IEI_UPDATE_INDICATION: u8 = 0xD0;
    pub const IEI_GUTI: u8 = 0x77;
    pub const IEI_TAI_LIST: u8 = 0x54;
    pub const IEI_ALLOWED_NSSAI: u8 = 0x15;
    pub const IEI_LOCAL_TIME_ZONE: u8 = 0x46;
    pub const IEI_UNIVERSAL_TIME: u8 = 0x47;
}

impl MmMessage for ConfigurationUpdateCommand {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::ConfigurationUpdateCommand;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        if self.acknowledgement_requested || self.registration_requested {
            let value = u8::from(self.acknowledgement_requested) | (u8::from(self.registration_requested) << 1);
            put_tv1(buf, Self::IEI_UPDATE_INDICATION, value);
        }
        if let Some(guti) = self.guti {
            put_tlve(buf, Self::IEI_GUTI, &MobileIdentity::Guti(guti).encode_value()?)?;
        }
        if !self.tai_list.is_empty() {
            put_tlv(buf, Self::IEI_TAI_LIST, &encode_tai_list(&self.tai_list))?;
        }
        if !self.allowed_nssai.is_empty() {
            put_tlv(buf, Self::IEI_ALLOWED_NSSAI, &encode_nssai(&self.allowed_nssai))?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let ies = OptionalIes::decode(
            buf,
            &[(Self::IEI_LOCAL_TIME_ZONE, 1), (Self::IEI_UNIVERSAL_TIME, 7)],
        )?;
        let indication = ies.half(Self::IEI_UPDATE_INDICATION).unwrap_or(0);
        Ok(Self {
            acknowledgement_requested: indication & 0x01 != 0,
            registration_requested: indication & 0x02 != 0,
            guti: optional_guti(&ies, Self::IEI_GUTI)?,
            tai_list: ies.get(Self::IEI_TAI_LIST).map(decode_tai_list).transpose()?.unwrap_or_default(),
            allowed_nssai: ies
                .get(Self::IEI_ALLOWED_NSSAI)
                .map(decode_nssai)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

// ============================================================================
// NAS transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlNasTransport {
    pub payload_container_type: PayloadContainerType,
    pub payload_container: Vec<u8>,
    pub pdu_session_id: Option<u8>,
    pub request_type: Option<RequestType>,
    pub snssai: Option<SNssai>,
    pub dnn: Option<String>,
}

impl UlNasTransport {
    pub const IEI_PDU_SESSION_ID: u8 = 0x12;
    pub const IEI_OLD_PDU_SESSION_ID: u8 = 0x59;
    pub const IEI_REQUEST_TYPE: u8 = 0x80;
    pub const IEI_SNSSAI: u8 = 0x22;
    pub const IEI_DNN: u8 = 0x25;

    /// Wraps a 5GSM message for its PDU session.
    pub fn n1_sm(pdu_session_id: u8, sm_message: Vec<u8>) -> Self {
        Self {
            payload_container_type: PayloadContainerType::N1SmInformation,
            payload_container: sm_message,
            pdu_session_id: Some(pdu_session_id),
            request_type: None,
            snssai: None,
            dnn: None,
        }
    }
}

impl MmMessage for UlNasTransport {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::UlNasTransport;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(u8::from(self.payload_container_type) & 0x0F);
        put_lve(buf, &self.payload_container)?;
        if let Some(psi) = self.pdu_session_id {
            buf.extend_from_slice(&[Self::IEI_PDU_SESSION_ID, psi]);
        }
        if let Some(request_type) = self.request_type {
            put_tv1(buf, Self::IEI_REQUEST_TYPE, request_type.into());
        }
        if let Some(snssai) = &self.snssai {
            put_tlv(buf, Self::IEI_SNSSAI, &snssai.encode())?;
        }
        if let Some(dnn) = &self.dnn {
            put_tlv(buf, Self::IEI_DNN, &encode_dnn(dnn)?)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let pct = get_u8(buf)? & 0x0F;
        let payload_container_type = PayloadContainerType::try_from(pct).map_err(|_| CodecError::InvalidValue {
            field: "payload container type",
            value: pct.to_string(),
        })?;
        let payload_container = get_lve(buf)?;
        let ies = OptionalIes::decode(buf, &[(Self::IEI_PDU_SESSION_ID, 1), (Self::IEI_OLD_PDU_SESSION_ID, 1)])?;
        Ok(Self {
            payload_container_type,
            payload_container,
            pdu_session_id: ies.get(Self::IEI_PDU_SESSION_ID).and_then(|v| v.first().copied()),
            request_type: ies
                .half(Self::IEI_REQUEST_TYPE)
                .and_then(|v| RequestType::try_from(v & 0x07).ok()),
            snssai: ies
                .get(Self::IEI_SNSSAI)
                .map(|v| {
                    SNssai::decode(v).map_err(|e| CodecError::InvalidValue {
                        field: "S-NSSAI",
                        value: e.to_string(),
                    })
                })
                .transpose()?,
            dnn: ies.get(Self::IEI_DNN).map(decode_dnn).transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlNasTransport {
    pub payload_container_type: PayloadContainerType,
    pub payload_container: Vec<u8>,
    pub pdu_session_id: Option<u8>,
    pub cause: Option<MmCause>,
}

impl DlNasTransport {
    pub const IEI_PDU_SESSION_ID: u8 = 0x12;
    pub const IEI_CAUSE: u8 = 0x58;

    pub fn n1_sm(pdu_session_id: u8, sm_message: Vec<u8>) -> Self {
        Self {
            payload_container_type: PayloadContainerType::N1SmInformation,
            payload_container: sm_message,
            pdu_session_id: Some(pdu_session_id),
            cause: None,
        }
    }
}

impl MmMessage for DlNasTransport {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::DlNasTransport;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(u8::from(self.payload_container_type) & 0x0F);
        put_lve(buf, &self.payload_container)?;
        if let Some(psi) = self.pdu_session_id {
            buf.extend_from_slice(&[Self::IEI_PDU_SESSION_ID, psi]);
        }
        if let Some(cause) = self.cause {
            buf.extend_from_slice(&[Self::IEI_CAUSE, cause.into()]);
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let pct = get_u8(buf)? & 0x0F;
        let payload_container_type = PayloadContainerType::try_from(pct).map_err(|_| CodecError::InvalidValue {
            field: "payload container type",
            value: pct.to_string(),
        })?;
        let payload_container = get_lve(buf)?;
        let ies = OptionalIes::decode(buf, &[(Self::IEI_PDU_SESSION_ID, 1), (Self::IEI_CAUSE, 1)])?;
        Ok(Self {
            payload_container_type,
            payload_container,
            pdu_session_id: ies.get(Self::IEI_PDU_SESSION_ID).and_then(|v| v.first().copied()),
            cause: ies.get(Self::IEI_CAUSE).and_then(|v| v.first().copied()).map(MmCause::from),
        })
    }
}

// ============================================================================
// Service request
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub ngksi: NasKeySetIdentifier,
    pub service_type: ServiceType,
    pub s_tmsi: FiveGSTmsi,
    pub uplink_data_status: Option<PduSessionStatus>,
    pub pdu_session_status: Option<PduSessionStatus>,
    pub allowed_pdu_session_status: Option<PduSessionStatus>,
    pub nas_message_container: Option<Vec<u8>>,
}

impl ServiceRequest {
    pub const IEI_UPLINK_DATA_STATUS: u8 = 0x40;
    pub const IEI_PDU_SESSION_STATUS: u8 = 0x50;
    pub const IEI_ALLOWED_PDU_SESSION_STATUS: u8 = 0x25;
    pub const IEI_NAS_MESSAGE_CONTAINER: u8 = 0x71;
}

impl MmMessage for ServiceRequest {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::ServiceRequest;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push((u8::from(self.service_type) << 4) | self.ngksi.to_nibble());
        put_lve(buf, &MobileIdentity::STmsi(self.s_tmsi).encode_value()?)?;
        for (iei, status) in [
            (Self::IEI_UPLINK_DATA_STATUS, &self.uplink_data_status),
            (Self::IEI_PDU_SESSION_STATUS, &self.pdu_session_status),
            (Self::IEI_ALLOWED_PDU_SESSION_STATUS, &self.allowed_pdu_session_status),
        ] {
            if let Some(status) = status {
                put_tlv(buf, iei, &status.encode_value())?;
            }
        }
        if let Some(container) = &self.nas_message_container {
            put_tlve(buf, Self::IEI_NAS_MESSAGE_CONTAINER, container)?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let octet = get_u8(buf)?;
        let ngksi = NasKeySetIdentifier::from_nibble(octet & 0x0F);
        let service_type = ServiceType::try_from(octet >> 4).map_err(|_| CodecError::InvalidValue {
            field: "service type",
            value: (octet >> 4).to_string(),
        })?;
        let s_tmsi = match MobileIdentity::decode_value(&get_lve(buf)?)? {
            MobileIdentity::STmsi(s_tmsi) => s_tmsi,
            other => {
                return Err(CodecError::InvalidValue {
                    field: "5G-S-TMSI",
                    value: format!("{other:?}"),
                })
            }
        };
        let ies = OptionalIes::decode(buf, &[])?;
        Ok(Self {
            ngksi,
            service_type,
            s_tmsi,
            uplink_data_status: optional_status(&ies, Self::IEI_UPLINK_DATA_STATUS)?,
            pdu_session_status: optional_status(&ies, Self::IEI_PDU_SESSION_STATUS)?,
            allowed_pdu_session_status: optional_status(&ies, Self::IEI_ALLOWED_PDU_SESSION_STATUS)?,
            nas_message_container: ies.get(Self::IEI_NAS_MESSAGE_CONTAINER).map(<[u8]>::to_vec),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAccept {
    pub pdu_session_status: Option<PduSessionStatus>,
    pub reactivation_result: Option<PduSessionStatus>,
}

impl ServiceAccept {
    pub const IEI_PDU_SESSION_STATUS: u8 = 0x50;
    pub const IEI_REACTIVATION_RESULT: u8 = 0x26;
}

impl MmMessage for ServiceAccept {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::ServiceAccept;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        if let Some(status) = &self.pdu_session_status {
            put_tlv(buf, Self::IEI_PDU_SESSION_STATUS, &status.encode_value())?;
        }
        if let Some(result) = &self.reactivation_result {
            put_tlv(buf, Self::IEI_REACTIVATION_RESULT, &result.encode_value())?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let ies = OptionalIes::decode(buf, &[])?;
        Ok(Self {
            pdu_session_status: optional_status(&ies, Self::IEI_PDU_SESSION_STATUS)?,
            reactivation_result: optional_status(&ies, Self::IEI_REACTIVATION_RESULT)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReject {
    pub cause: MmCause,
    pub pdu_session_status: Option<PduSessionStatus>,
}

impl MmMessage for ServiceReject {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::ServiceReject;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.cause.into());
        if let Some(status) = &self.pdu_session_status {
            put_tlv(buf, ServiceAccept::IEI_PDU_SESSION_STATUS, &status.encode_value())?;
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let cause = MmCause::from(get_u8(buf)?);
        let ies = OptionalIes::decode(buf, &[])?;
        Ok(Self {
            cause,
            pdu_session_status: optional_status(&ies, ServiceAccept::IEI_PDU_SESSION_STATUS)?,
        })
    }
}

// ============================================================================
// Deregistration
// ============================================================================

/// De-registration type half-octet (9.11.3.20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeregistrationType {
    pub switch_off: bool,
    pub re_registration_required: bool,
    /// 1 = 3GPP, 2 = non-3GPP, 3 = both
    pub access_type: u8,
}

impl DeregistrationType {
    pub const ACCESS_3GPP: u8 = 1;

    pub fn to_nibble(self) -> u8 {
        (u8::from(self.switch_off) << 3) | (u8::from(self.re_registration_required) << 2) | (self.access_type & 0x03)
    }

    pub fn from_nibble(nibble: u8) -> Self {
        Self {
            switch_off: nibble & 0x08 != 0,
            re_registration_required: nibble & 0x04 != 0,
            access_type: nibble & 0x03,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeregistrationRequestUeOriginating {
    pub deregistration_type: DeregistrationType,
    pub ngksi: NasKeySetIdentifier,
    pub mobile_identity: MobileIdentity,
}

impl MmMessage for DeregistrationRequestUeOriginating {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::DeregistrationRequestUeOriginating;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push((self.ngksi.to_nibble() << 4) | self.deregistration_type.to_nibble());
        put_lve(buf, &self.mobile_identity.encode_value()?)
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let octet = get_u8(buf)?;
        Ok(Self {
            deregistration_type: DeregistrationType::from_nibble(octet & 0x0F),
            ngksi: NasKeySetIdentifier::from_nibble(octet >> 4),
            mobile_identity: MobileIdentity::decode_value(&get_lve(buf)?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeregistrationRequestUeTerminated {
    pub deregistration_type: DeregistrationType,
    pub cause: Option<MmCause>,
}

impl DeregistrationRequestUeTerminated {
    pub const IEI_CAUSE: u8 = 0x58;
}

impl MmMessage for DeregistrationRequestUeTerminated {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::DeregistrationRequestUeTerminated;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.deregistration_type.to_nibble());
        if let Some(cause) = self.cause {
            buf.extend_from_slice(&[Self::IEI_CAUSE, cause.into()]);
        }
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        let deregistration_type = DeregistrationType::from_nibble(get_u8(buf)? & 0x0F);
        let ies = OptionalIes::decode(buf, &[(Self::IEI_CAUSE, 1)])?;
        Ok(Self {
            deregistration_type,
            cause: ies.get(Self::IEI_CAUSE).and_then(|v| v.first().copied()).map(MmCause::from),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmStatus {
    pub cause: MmCause,
}

impl MmMessage for MmStatus {
    const MESSAGE_TYPE: MmMessageType = MmMessageType::FiveGMmStatus;

    fn encode_body(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.push(self.cause.into());
        Ok(())
    }

    fn decode_body(buf: &mut &[u8]) -> CodecResult<Self> {
        Ok(Self {
            cause: MmCause::from(get_u8(buf)?),
        })
    }
}
