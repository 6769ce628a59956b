//! UE error type

use coretester_common::WaitError;
use coretester_crypto::{KdfError, MilenageError, SidfError};
use coretester_nas::{CodecError, MessageType, MmCause, SecurityError, SmCause};
use thiserror::Error;

use crate::nas::mm::MmState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UeError {
    #[error("NAS codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("NAS security error: {0}")]
    Security(#[from] SecurityError),

    #[error("SUCI error: {0}")]
    Sidf(#[from] SidfError),

    #[error("key derivation error: {0}")]
    Kdf(#[from] KdfError),

    #[error("authentication challenge rejected: {0}")]
    Authentication(#[from] MilenageError),

    #[error("invalid UE configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Wait(#[from] WaitError),

    /// The UE security capability is absent or advertises nothing usable
    #[error("no supported {0} algorithm in UE security capability")]
    NoSupportedAlgorithm(&'static str),

    /// A protected message arrived before keys were derived
    #[error("NAS security context not established")]
    NoSecurityContext,

    /// "New security context" header on something other than a Security Mode Command
    #[error("new security context header on {0:?}")]
    UnexpectedNewContext(MessageType),

    #[error("received NAS message type {0:?}: not implemented")]
    Unimplemented(MessageType),

    #[error("missing {0} in NAS message")]
    MissingIe(&'static str),

    #[error("operation needs state {expected}, UE is in {actual}")]
    InvalidState { expected: MmState, actual: MmState },

    /// Service Request needs a registered UE whose connection was released
    #[error("UE is not in CM-IDLE")]
    NotIdle,

    #[error("UE has no NG connection")]
    NotConnected,

    #[error("registration rejected with 5GMM cause {0:?}")]
    RegistrationRejected(MmCause),

    #[error("authentication rejected by the network")]
    AuthenticationRejected,

    #[error("service request rejected with 5GMM cause {0:?}")]
    ServiceRejected(MmCause),

    #[error("PDU session {psi} rejected with 5GSM cause {cause:?}")]
    PduSessionRejected { psi: u8, cause: SmCause },

    /// No PTI left for a new session-management procedure
    #[error("no free procedure transaction identity")]
    PtiExhausted,

    #[error("uplink send failed: {0}")]
    Uplink(String),

    /// The UE's message loop has stopped
    #[error("UE {0} is stopped")]
    Stopped(String),
}

pub type Result<T> = std::result::Result<T, UeError>;
