//! coretester UE
//!
//! A simulated UE driven by test scenarios:
//!
//! - [`Ue`]: the NAS engine, one per subscriber, with procedures
//!   (registration, service request, deregistration, PDU session request)
//!   and waits on their outcomes
//! - [`UeSecurityContext`]: 5G-AKA, NAS keys and COUNTs
//! - [`UplinkSender`] / [`DownlinkSender`]: the seam to the gNB relay
//!
//! The UE holds no radio stack; NAS bytes travel to the gNB through the
//! [`radio`] traits.

pub mod error;
pub mod nas;
pub mod radio;
pub mod security;
pub mod ue;

pub use error::{Result, UeError};
pub use nas::mm::{CmState, MmState, MmStateMachine, RmState};
pub use nas::sm::{PduSession, PduSessionTable, SessionTunnel, MAX_PDU_SESSIONS};
pub use radio::{DownlinkSender, UplinkSender};
pub use security::UeSecurityContext;
pub use ue::{Ue, UeEvent};
