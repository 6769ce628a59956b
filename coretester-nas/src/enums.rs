//! NAS protocol enumerations
//!
//! Values follow 3GPP TS 24.501 (sections 9.2, 9.3, 9.7 and 9.11).

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

/// Extended Protocol Discriminator (TS 24.501 9.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExtendedProtocolDiscriminator {
    /// 5GS Mobility Management messages
    MobilityManagement = 0x7E,
    /// 5GS Session Management messages
    SessionManagement = 0x2E,
}

/// Security header type (TS 24.501 9.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum SecurityHeaderType {
    /// Plain NAS message, not security protected
    #[default]
    NotProtected = 0x00,
    /// Integrity protected
    IntegrityProtected = 0x01,
    /// Integrity protected and ciphered
    IntegrityProtectedAndCiphered = 0x02,
    /// Integrity protected with new 5G NAS security context
    IntegrityProtectedWithNewSecurityContext = 0x03,
    /// Integrity protected and ciphered with new 5G NAS security context
    IntegrityProtectedAndCipheredWithNewSecurityContext = 0x04,
}

impl SecurityHeaderType {
    /// Returns true if the message is security protected
    pub fn is_protected(&self) -> bool {
        !matches!(self, SecurityHeaderType::NotProtected)
    }

    /// Returns true if the payload is ciphered
    pub fn is_ciphered(&self) -> bool {
        matches!(
            self,
            SecurityHeaderType::IntegrityProtectedAndCiphered
                | SecurityHeaderType::IntegrityProtectedAndCipheredWithNewSecurityContext
        )
    }

    /// Returns true if this indicates a new security context
    pub fn is_new_security_context(&self) -> bool {
        matches!(
            self,
            SecurityHeaderType::IntegrityProtectedWithNewSecurityContext
                | SecurityHeaderType::IntegrityProtectedAndCipheredWithNewSecurityContext
        )
    }
}

/// 5GMM message type (TS 24.501 9.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MmMessageType {
    RegistrationRequest = 0x41,
    RegistrationAccept = 0x42,
    RegistrationComplete = 0x43,
    RegistrationReject = 0x44,

    DeregistrationRequestUeOriginating = 0x45,
    DeregistrationAcceptUeOriginating = 0x46,
    DeregistrationRequestUeTerminated = 0x47,
    DeregistrationAcceptUeTerminated = 0x48,

    ServiceRequest = 0x4C,
    ServiceReject = 0x4D,
    ServiceAccept = 0x4E,

    ConfigurationUpdateCommand = 0x54,
    ConfigurationUpdateComplete = 0x55,

    AuthenticationRequest = 0x56,
    AuthenticationResponse = 0x57,
    AuthenticationReject = 0x58,
    AuthenticationFailure = 0x59,
    AuthenticationResult = 0x5A,

    IdentityRequest = 0x5B,
    IdentityResponse = 0x5C,

    SecurityModeCommand = 0x5D,
    SecurityModeComplete = 0x5E,
    SecurityModeReject = 0x5F,

    FiveGMmStatus = 0x64,
    Notification = 0x65,
    NotificationResponse = 0x66,

    UlNasTransport = 0x67,
    DlNasTransport = 0x68,
}

/// 5GSM message type (TS 24.501 9.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SmMessageType {
    PduSessionEstablishmentRequest = 0xC1,
    PduSessionEstablishmentAccept = 0xC2,
    PduSessionEstablishmentReject = 0xC3,

    PduSessionAuthenticationCommand = 0xC5,
    PduSessionAuthenticationComplete = 0xC6,
    PduSessionAuthenticationResult = 0xC7,

    PduSessionModificationRequest = 0xC9,
    PduSessionModificationReject = 0xCA,
    PduSessionModificationCommand = 0xCB,
    PduSessionModificationComplete = 0xCC,
    PduSessionModificationCommandReject = 0xCD,

    PduSessionReleaseRequest = 0xD1,
    PduSessionReleaseReject = 0xD2,
    PduSessionReleaseCommand = 0xD3,
    PduSessionReleaseComplete = 0xD4,

    FiveGSmStatus = 0xD6,
}

/// Combined NAS message type (MM or SM)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Mm(MmMessageType),
    Sm(SmMessageType),
}

impl MessageType {
    /// Raw message type octet
    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::Mm(mt) => (*mt).into(),
            MessageType::Sm(mt) => (*mt).into(),
        }
    }

    /// Resolves a raw message type under the given discriminator.
    pub fn from_epd_and_value(
        epd: ExtendedProtocolDiscriminator,
        value: u8,
    ) -> Result<Self, MessageTypeError> {
        match epd {
            ExtendedProtocolDiscriminator::MobilityManagement => MmMessageType::try_from(value)
                .map(MessageType::Mm)
                .map_err(|_| MessageTypeError::UnknownMmType(value)),
            ExtendedProtocolDiscriminator::SessionManagement => SmMessageType::try_from(value)
                .map(MessageType::Sm)
                .map_err(|_| MessageTypeError::UnknownSmType(value)),
        }
    }
}

/// Error type for message type parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MessageTypeError {
    #[error("Unknown 5GMM message type: 0x{0:02X}")]
    UnknownMmType(u8),
    #[error("Unknown 5GSM message type: 0x{0:02X}")]
    UnknownSmType(u8),
}

/// 5GMM cause (TS 24.501 9.11.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum MmCause {
    IllegalUe = 3,
    PeiNotAccepted = 5,
    IllegalMe = 6,
    FiveGsServicesNotAllowed = 7,
    UeIdentityCannotBeDerived = 9,
    ImplicitlyDeregistered = 10,
    PlmnNotAllowed = 11,
    TrackingAreaNotAllowed = 12,
    RoamingNotAllowedInTa = 13,
    NoSuitableCellsInTa = 15,
    MacFailure = 20,
    SynchFailure = 21,
    Congestion = 22,
    UeSecurityCapabilitiesMismatch = 23,
    SecurityModeRejectedUnspecified = 24,
    Non5gAuthenticationUnacceptable = 26,
    N1ModeNotAllowed = 27,
    RestrictedServiceArea = 28,
    LadnNotAvailable = 43,
    MaxPduSessionsReached = 65,
    InsufficientResourcesForSliceAndDnn = 67,
    InsufficientResourcesForSlice = 69,
    NgksiAlreadyInUse = 71,
    Non3gppAccessTo5gcnNotAllowed = 72,
    ServingNetworkNotAuthorized = 73,
    PayloadWasNotForwarded = 90,
    DnnNotSupportedOrNotSubscribedInSlice = 91,
    InsufficientUserPlaneResourcesForPduSession = 92,
    SemanticallyIncorrectMessage = 95,
    InvalidMandatoryInformation = 96,
    MessageTypeNonExistent = 97,
    MessageTypeNotCompatible = 98,
    IeNonExistent = 99,
    ConditionalIeError = 100,
    MessageNotCompatible = 101,
    ProtocolErrorUnspecified = 111,
    #[num_enum(catch_all)]
    Other(u8),
}

/// 5GSM cause (TS 24.501 9.11.4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum SmCause {
    OperatorDeterminedBarring = 8,
    InsufficientResources = 26,
    MissingOrUnknownDnn = 27,
    UnknownPduSessionType = 28,
    UserAuthenticationFailed = 29,
    RequestRejectedUnspecified = 31,
    ServiceOptionNotSupported = 32,
    RequestedServiceOptionNotSubscribed = 33,
    PtiAlreadyInUse = 35,
    RegularDeactivation = 36,
    NetworkFailure = 38,
    ReactivationRequested = 39,
    InvalidPduSessionIdentity = 43,
    PduTypeIpv4OnlyAllowed = 50,
    PduTypeIpv6OnlyAllowed = 51,
    PduSessionDoesNotExist = 54,
    InsufficientResourcesForSliceAndDnn = 67,
    NotSupportedSscMode = 68,
    InsufficientResourcesForSlice = 69,
    MissingOrUnknownDnnInSlice = 70,
    InvalidPtiValue = 81,
    SemanticallyIncorrectMessage = 95,
    InvalidMandatoryInformation = 96,
    ProtocolErrorUnspecified = 111,
    #[num_enum(catch_all)]
    Other(u8),
}

/// 5GS registration type value (TS 24.501 9.11.3.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum RegistrationType {
    #[default]
    InitialRegistration = 1,
    MobilityRegistrationUpdating = 2,
    PeriodicRegistrationUpdating = 3,
    EmergencyRegistration = 4,
}

/// Identity type requested by an Identity Request (TS 24.501 9.11.3.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IdentityType {
    NoIdentity = 0,
    Suci = 1,
    Guti = 2,
    Imei = 3,
    Tmsi = 4,
    Imeisv = 5,
    MacAddress = 6,
    Eui64 = 7,
}

/// Payload container type (TS 24.501 9.11.3.40)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum PayloadContainerType {
    #[default]
    N1SmInformation = 1,
    Sms = 2,
    LtePositioning = 3,
    SorTransparentContainer = 4,
    UePolicyContainer = 5,
    UeParametersUpdate = 6,
    LocationServices = 7,
    MultiplePayloads = 15,
}

/// Service type (TS 24.501 9.11.3.50)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum ServiceType {
    #[default]
    Signalling = 0,
    Data = 1,
    MobileTerminatedServices = 2,
    EmergencyServices = 3,
    EmergencyServicesFallback = 4,
    HighPriorityAccess = 5,
    ElevatedSignalling = 6,
}

/// Request type carried in UL NAS Transport (TS 24.501 9.11.3.47)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum RequestType {
    #[default]
    InitialRequest = 1,
    ExistingPduSession = 2,
    InitialEmergencyRequest = 3,
    ExistingEmergencyPduSession = 4,
    ModificationRequest = 5,
    MaPduRequest = 6,
}

/// PDU session type (TS 24.501 9.11.4.11)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum PduSessionType {
    #[default]
    Ipv4 = 1,
    Ipv6 = 2,
    Ipv4v6 = 3,
    Unstructured = 4,
    Ethernet = 5,
}
