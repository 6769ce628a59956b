//! 5GSM (5G Session Management)
//!
//! PDU session records and procedure transaction handling. PTI is used to
//! identify SM procedures; each UE-requested procedure gets one from the
//! range 1-254.

mod procedure;
mod session;

pub use procedure::*;
pub use session::*;

#[cfg(test)]
pub(crate) use session::tests::accept as test_accept;
