//! gNB error type

use coretester_common::WaitError;
use coretester_gtp::TunnelError;
use coretester_ngap::ies::{Cause, TimeToWait};
use coretester_ngap::NgapError;
use coretester_sctp::SctpError;
use coretester_ue::UeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GnbError {
    #[error("NGAP error: {0}")]
    Ngap(#[from] NgapError),

    #[error("SCTP error: {0}")]
    Sctp(#[from] SctpError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("configuration error: {0}")]
    Config(#[from] coretester_common::Error),

    #[error("UE error: {0}")]
    Ue(#[from] UeError),

    /// The AMF answered NG Setup with NG Setup Failure
    #[error("NG Setup failed with cause {cause}")]
    NgSetupFailed {
        cause: Cause,
        time_to_wait: Option<TimeToWait>,
    },

    /// Path Switch Request Failure; each released session with its cause
    #[error("path switch of RAN-UE-NGAP-ID {ran_ue_ngap_id} failed")]
    PathSwitchFailed {
        ran_ue_ngap_id: u32,
        released: Vec<(u8, Cause)>,
    },

    #[error("no AMF association {0}")]
    UnknownAmf(usize),

    #[error("no AMF has completed NG Setup")]
    NoAmfReady,

    #[error("unknown RAN-UE-NGAP-ID {0}")]
    UnknownUe(u32),

    #[error("unknown AMF-UE-NGAP-ID {0}")]
    UnknownAmfUeNgapId(u64),

    #[error("RAN-UE-NGAP-ID {0} has no UE-associated NG connection")]
    NotConnected(u32),

    #[error("no PDU session {psi} for RAN-UE-NGAP-ID {ran_ue_ngap_id}")]
    UnknownSession { ran_ue_ngap_id: u32, psi: u8 },

    /// No handler exists for this (presence, procedure code) pair
    #[error("unexpected NGAP message {0}")]
    UnexpectedMessage(String),

    /// The awaited frame arrived but the gNB could not process it
    #[error("handling {message} failed: {error}")]
    Handler { message: String, error: String },

    #[error("no tunnel manager attached")]
    NoUserPlane,

    #[error("gNB is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, GnbError>;
