//! UE-side NAS handling
//!
//! - `builders`: pure constructors for every uplink message the UE sends
//! - `mm`: 5GMM/RM/CM state machine (TS 24.501 Section 5.1.3)
//! - `sm`: PDU session records and PTI allocation

pub mod builders;
pub mod mm;
pub mod sm;
