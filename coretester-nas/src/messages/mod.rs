//! Plain NAS messages and decode dispatch

pub mod mm;
pub mod sm;

pub use mm::*;
pub use sm::*;

use crate::codec::{CodecError, CodecResult};
use crate::enums::{ExtendedProtocolDiscriminator, MessageType, MmMessageType, SmMessageType};
use crate::header::{PlainMmHeader, PlainSmHeader};

/// Every plain NAS message the engine understands.
///
/// Well-formed messages of other known types decode to
/// [`NasMessage::Unsupported`] so that callers can report them by type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NasMessage {
    RegistrationRequest(RegistrationRequest),
    RegistrationAccept(RegistrationAccept),
    RegistrationComplete(RegistrationComplete),
    RegistrationReject(RegistrationReject),
    AuthenticationRequest(AuthenticationRequest),
    AuthenticationResponse(AuthenticationResponse),
    AuthenticationReject(AuthenticationReject),
    AuthenticationFailure(AuthenticationFailure),
    IdentityRequest(IdentityRequest),
    IdentityResponse(IdentityResponse),
    SecurityModeCommand(SecurityModeCommand),
    SecurityModeComplete(SecurityModeComplete),
    SecurityModeReject(SecurityModeReject),
    ConfigurationUpdateCommand(ConfigurationUpdateCommand),
    ConfigurationUpdateComplete(ConfigurationUpdateComplete),
    UlNasTransport(UlNasTransport),
    DlNasTransport(DlNasTransport),
    ServiceRequest(ServiceRequest),
    ServiceAccept(ServiceAccept),
    ServiceReject(ServiceReject),
    DeregistrationRequestUeOriginating(DeregistrationRequestUeOriginating),
    DeregistrationAcceptUeOriginating(DeregistrationAcceptUeOriginating),
    DeregistrationRequestUeTerminated(DeregistrationRequestUeTerminated),
    DeregistrationAcceptUeTerminated(DeregistrationAcceptUeTerminated),
    MmStatus(MmStatus),
    PduSessionEstablishmentRequest(PduSessionEstablishmentRequest),
    PduSessionEstablishmentAccept(PduSessionEstablishmentAccept),
    PduSessionEstablishmentReject(PduSessionEstablishmentReject),
    Unsupported { message_type: MessageType, body: Vec<u8> },
}

macro_rules! mm_dispatch {
    ($ty:expr, $buf:expr, [$($variant:ident),* $(,)?]) => {
        match $ty {
            $(MmMessageType::$variant => NasMessage::$variant($variant::decode_body($buf)?),)*
            MmMessageType::DeregistrationRequestUeOriginating => NasMessage::DeregistrationRequestUeOriginating(
                DeregistrationRequestUeOriginating::decode_body($buf)?,
            ),
            MmMessageType::DeregistrationRequestUeTerminated => NasMessage::DeregistrationRequestUeTerminated(
                DeregistrationRequestUeTerminated::decode_body($buf)?,
            ),
            MmMessageType::FiveGMmStatus => NasMessage::MmStatus(MmStatus::decode_body($buf)?),
            other => NasMessage::Unsupported {
                message_type: MessageType::Mm(other),
                body: $buf.to_vec(),
            },
        }
    };
}

impl NasMessage {
    /// Decodes a plain (not security protected) NAS message.
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        let epd = *data.first().ok_or(CodecError::BufferTooShort { expected: 1, actual: 0 })?;
        let mut buf = data;
        match ExtendedProtocolDiscriminator::try_from(epd) {
            Ok(ExtendedProtocolDiscriminator::MobilityManagement) => {
                let header = PlainMmHeader::decode(&mut buf)?;
                Ok(mm_dispatch!(header.message_type, &mut buf, [
                    RegistrationRequest,
                    RegistrationAccept,
                    RegistrationComplete,
                    RegistrationReject,
                    AuthenticationRequest,
                    AuthenticationResponse,
                    AuthenticationReject,
                    AuthenticationFailure,
                    IdentityRequest,
                    IdentityResponse,
                    SecurityModeCommand,
                    SecurityModeComplete,
                    SecurityModeReject,
                    ConfigurationUpdateCommand,
                    ConfigurationUpdateComplete,
                    UlNasTransport,
                    DlNasTransport,
                    ServiceRequest,
                    ServiceAccept,
                    ServiceReject,
                    DeregistrationAcceptUeOriginating,
                    DeregistrationAcceptUeTerminated,
                ]))
            }
            Ok(ExtendedProtocolDiscriminator::SessionManagement) => {
                let header = PlainSmHeader::decode(&mut buf)?;
                let buf = &mut buf;
                Ok(match header.message_type {
                    SmMessageType::PduSessionEstablishmentRequest => NasMessage::PduSessionEstablishmentRequest(
                        PduSessionEstablishmentRequest::decode_body(&header, buf)?,
                    ),
                    SmMessageType::PduSessionEstablishmentAccept => NasMessage::PduSessionEstablishmentAccept(
                        PduSessionEstablishmentAccept::decode_body(&header, buf)?,
                    ),
                    SmMessageType::PduSessionEstablishmentReject => NasMessage::PduSessionEstablishmentReject(
                        PduSessionEstablishmentReject::decode_body(&header, buf)?,
                    ),
                    other => NasMessage::Unsupported {
                        message_type: MessageType::Sm(other),
                        body: buf.to_vec(),
                    },
                })
            }
            Err(_) => Err(CodecError::InvalidProtocolDiscriminator(epd)),
        }
    }

    pub fn message_type(&self) -> MessageType {
        use MmMessageType as Mm;
        use SmMessageType as Sm;
        let mm = |t| MessageType::Mm(t);
        match self {
            NasMessage::RegistrationRequest(_) => mm(Mm::RegistrationRequest),
            NasMessage::RegistrationAccept(_) => mm(Mm::RegistrationAccept),
            NasMessage::RegistrationComplete(_) => mm(Mm::RegistrationComplete),
            NasMessage::RegistrationReject(_) => mm(Mm::RegistrationReject),
            NasMessage::AuthenticationRequest(_) => mm(Mm::AuthenticationRequest),
            NasMessage::AuthenticationResponse(_) => mm(Mm::AuthenticationResponse),
            NasMessage::AuthenticationReject(_) => mm(Mm::AuthenticationReject),
            NasMessage::AuthenticationFailure(_) => mm(Mm::AuthenticationFailure),
            NasMessage::IdentityRequest(_) => mm(Mm::IdentityRequest),
            NasMessage::IdentityResponse(_) => mm(Mm::IdentityResponse),
            NasMessage::SecurityModeCommand(_) => mm(Mm::SecurityModeCommand),
            NasMessage::SecurityModeComplete(_) => mm(Mm::SecurityModeComplete),
            NasMessage::SecurityModeReject(_) => mm(Mm::SecurityModeReject),
            NasMessage::ConfigurationUpdateCommand(_) => mm(Mm::ConfigurationUpdateCommand),
            NasMessage::ConfigurationUpdateComplete(_) => mm(Mm::ConfigurationUpdateComplete),
            NasMessage::UlNasTransport(_) => mm(Mm::UlNasTransport),
            NasMessage::DlNasTransport(_) => mm(Mm::DlNasTransport),
            NasMessage::ServiceRequest(_) => mm(Mm::ServiceRequest),
            NasMessage::ServiceAccept(_) => mm(Mm::ServiceAccept),
            NasMessage::ServiceReject(_) => mm(Mm::ServiceReject),
            NasMessage::DeregistrationRequestUeOriginating(_) => mm(Mm::DeregistrationRequestUeOriginating),
            NasMessage::DeregistrationAcceptUeOriginating(_) => mm(Mm::DeregistrationAcceptUeOriginating),
            NasMessage::DeregistrationRequestUeTerminated(_) => mm(Mm::DeregistrationRequestUeTerminated),
            NasMessage::DeregistrationAcceptUeTerminated(_) => mm(Mm::DeregistrationAcceptUeTerminated),
            NasMessage::MmStatus(_) => mm(Mm::FiveGMmStatus),
            NasMessage::PduSessionEstablishmentRequest(_) => MessageType::Sm(Sm::PduSessionEstablishmentRequest),
            NasMessage::PduSessionEstablishmentAccept(_) => MessageType::Sm(Sm::PduSessionEstablishmentAccept),
            NasMessage::PduSessionEstablishmentReject(_) => MessageType::Sm(Sm::PduSessionEstablishmentReject),
            NasMessage::Unsupported { message_type, .. } => *message_type,
        }
    }
}
