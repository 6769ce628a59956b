//! 5GMM state tracking for the UE engine
//!
//! [`MmStateMachine`] holds the RM, CM and 5GMM states together; the RM
//! state follows from the 5GMM state.

mod state;

pub use state::*;
