//! NGAP Procedures
//!
//! This module contains implementations for NGAP procedures as defined in 3GPP TS 38.413.
//! Builders that the gNB sends check their required parameters and fail with
//! [`NgapError::MissingParameter`] before anything is encoded.

use coretester_common::Plmn;

use crate::codec::{NgapError, NgapResult};
use crate::ies::{GlobalGnbId, UserLocationInfoNr};

pub mod error_indication;
pub mod initial_context_setup;
pub mod initial_ue_message;
pub mod nas_transport;
pub mod ng_reset;
pub mod ng_setup;
pub mod paging;
pub mod path_switch;
pub mod pdu_session_resource;
pub mod ue_context_release;

pub use error_indication::*;
pub use initial_context_setup::*;
pub use initial_ue_message::*;
pub use nas_transport::*;
pub use ng_reset::*;
pub use ng_setup::*;
pub use paging::*;
pub use path_switch::*;
pub use pdu_session_resource::*;
pub use ue_context_release::*;

pub(crate) fn require_plmn(plmn: &Plmn, what: &'static str) -> NgapResult<()> {
    if plmn.has_value() {
        Ok(())
    } else {
        Err(NgapError::MissingParameter(what))
    }
}

pub(crate) fn require_tac(tac: u32) -> NgapResult<()> {
    if tac == 0 {
        return Err(NgapError::MissingParameter("TAC"));
    }
    if tac > 0xFF_FFFF {
        return Err(NgapError::InvalidIeValue(format!("TAC {tac:#x} exceeds 24 bits")));
    }
    Ok(())
}

pub(crate) fn require_gnb_id(id: &GlobalGnbId) -> NgapResult<()> {
    if id.gnb_id == 0 {
        return Err(NgapError::MissingParameter("gNB ID"));
    }
    if !(22..=32).contains(&id.gnb_id_length) {
        return Err(NgapError::InvalidIeValue(format!(
            "gNB ID length {} outside 22..32",
            id.gnb_id_length
        )));
    }
    Ok(())
}

pub(crate) fn require_ran_ue_ngap_id(id: u32) -> NgapResult<()> {
    if id == 0 {
        Err(NgapError::MissingParameter("RAN-UE-NGAP-ID"))
    } else {
        Ok(())
    }
}

pub(crate) fn require_nas_pdu(nas: &[u8]) -> NgapResult<()> {
    if nas.is_empty() {
        Err(NgapError::MissingParameter("NAS-PDU"))
    } else {
        Ok(())
    }
}

/// PLMN, TAC and NR cell identity of a user location.
pub(crate) fn require_location(uli: &UserLocationInfoNr) -> NgapResult<()> {
    require_plmn(&uli.nr_cgi.plmn, "NR-CGI PLMN")?;
    require_plmn(&uli.tai.plmn, "TAI PLMN")?;
    require_tac(uli.tai.tac)?;
    if uli.nr_cgi.nr_cell_identity == 0 {
        return Err(NgapError::MissingParameter("NR cell identity"));
    }
    if uli.nr_cgi.nr_cell_identity >= 1 << 36 {
        return Err(NgapError::InvalidIeValue(format!(
            "NR cell identity {:#x} exceeds 36 bits",
            uli.nr_cgi.nr_cell_identity
        )));
    }
    Ok(())
}
