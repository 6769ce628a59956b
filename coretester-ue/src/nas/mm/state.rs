//! MM State Machine
//!
//! 5GMM states as per 3GPP TS 24.501 Section 5.1.3, reduced to what the
//! simulated UE walks through:
//!
//! ```text
//! Null -> RegisteredInitiated -> Registered -> ServiceRequestInitiated -> Registered
//!                                           -> DeregisteredInitiated  -> Deregistered
//! ```
//!
//! CM-IDLE while RM-REGISTERED is the idle substate: the RRC connection was
//! released but the NAS security context and PDU sessions are kept, so a
//! Service Request can bring the UE back.

use std::fmt;

/// Registration Management (RM) state.
///
/// 3GPP TS 24.501 Section 5.1.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RmState {
    #[default]
    Deregistered,
    Registered,
}

impl fmt::Display for RmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RmState::Deregistered => write!(f, "RM-DEREGISTERED"),
            RmState::Registered => write!(f, "RM-REGISTERED"),
        }
    }
}

/// Connection Management (CM) state.
///
/// 3GPP TS 24.501 Section 5.1.3.4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CmState {
    /// No NAS signalling connection
    #[default]
    Idle,
    /// NAS signalling connection established
    Connected,
}

impl fmt::Display for CmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmState::Idle => write!(f, "CM-IDLE"),
            CmState::Connected => write!(f, "CM-CONNECTED"),
        }
    }
}

/// Main MM state.
///
/// 3GPP TS 24.501 Section 5.1.3.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmState {
    /// 5GMM-NULL
    #[default]
    Null,
    /// 5GMM-DEREGISTERED
    Deregistered,
    /// 5GMM-REGISTERED-INITIATED
    RegisteredInitiated,
    /// 5GMM-REGISTERED
    Registered,
    /// 5GMM-DEREGISTERED-INITIATED
    DeregisteredInitiated,
    /// 5GMM-SERVICE-REQUEST-INITIATED
    ServiceRequestInitiated,
}

impl fmt::Display for MmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmState::Null => write!(f, "5GMM-NULL"),
            MmState::Deregistered => write!(f, "5GMM-DEREGISTERED"),
            MmState::RegisteredInitiated => write!(f, "5GMM-REGISTERED-INITIATED"),
            MmState::Registered => write!(f, "5GMM-REGISTERED"),
            MmState::DeregisteredInitiated => write!(f, "5GMM-DEREGISTERED-INITIATED"),
            MmState::ServiceRequestInitiated => write!(f, "5GMM-SERVICE-REQUEST-INITIATED"),
        }
    }
}

/// State transition event for MM state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmStateTransition {
    pub old_state: MmState,
    pub new_state: MmState,
}

/// State transition event for CM state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmStateTransition {
    pub old_state: CmState,
    pub new_state: CmState,
}

/// MM State Machine Manager.
///
/// # Example
///
/// ```
/// use coretester_ue::nas::mm::{CmState, MmState, MmStateMachine};
///
/// let mut sm = MmStateMachine::new();
/// assert!(sm.is_null());
///
/// sm.switch_mm_state(MmState::RegisteredInitiated);
/// sm.switch_cm_state(CmState::Connected);
/// sm.switch_mm_state(MmState::Registered);
/// assert!(sm.is_registered());
///
/// sm.switch_cm_state(CmState::Idle);
/// assert!(sm.is_idle());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MmStateMachine {
    rm_state: RmState,
    cm_state: CmState,
    mm_state: MmState,
}

impl MmStateMachine {
    /// Initial states: RM-DEREGISTERED, CM-IDLE, 5GMM-NULL.
    pub fn new() -> Self {
        Self::default()
    }

    // ========== State Getters ==========

    pub fn rm_state(&self) -> RmState {
        self.rm_state
    }

    pub fn cm_state(&self) -> CmState {
        self.cm_state
    }

    pub fn mm_state(&self) -> MmState {
        self.mm_state
    }

    // ========== State Predicates ==========

    pub fn is_null(&self) -> bool {
        self.mm_state == MmState::Null
    }

    pub fn is_registered(&self) -> bool {
        self.rm_state == RmState::Registered
    }

    pub fn is_deregistered(&self) -> bool {
        self.rm_state == RmState::Deregistered
    }

    pub fn is_connected(&self) -> bool {
        self.cm_state == CmState::Connected
    }

    /// Registered with the connection released.
    pub fn is_idle(&self) -> bool {
        self.is_registered() && self.cm_state == CmState::Idle
    }

    // ========== State Transitions ==========

    /// Switches the MM state and derives the RM state from it.
    ///
    /// Returns `None` when the state does not change.
    pub fn switch_mm_state(&mut self, state: MmState) -> Option<MmStateTransition> {
        self.rm_state = Self::derive_rm_state(state);
        if self.mm_state == state {
            return None;
        }
        let transition = MmStateTransition {
            old_state: self.mm_state,
            new_state: state,
        };
        self.mm_state = state;
        Some(transition)
    }

    pub fn switch_cm_state(&mut self, state: CmState) -> Option<CmStateTransition> {
        if self.cm_state == state {
            return None;
        }
        let transition = CmStateTransition {
            old_state: self.cm_state,
            new_state: state,
        };
        self.cm_state = state;
        Some(transition)
    }

    // ========== Helper Methods ==========

    /// Per 3GPP TS 24.501:
    /// - RM-DEREGISTERED: MM-NULL, MM-DEREGISTERED, MM-REGISTERED-INITIATED
    /// - RM-REGISTERED: MM-REGISTERED, MM-SERVICE-REQUEST-INITIATED, MM-DEREGISTERED-INITIATED
    fn derive_rm_state(mm_state: MmState) -> RmState {
        match mm_state {
            MmState::Null | MmState::Deregistered | MmState::RegisteredInitiated => RmState::Deregistered,
            MmState::Registered | MmState::ServiceRequestInitiated | MmState::DeregisteredInitiated => {
                RmState::Registered
            }
        }
    }
}

impl fmt::Display for MmStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MM[{}, {}, {}]", self.rm_state, self.cm_state, self.mm_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(RmState::Registered.to_string(), "RM-REGISTERED");
        assert_eq!(CmState::Idle.to_string(), "CM-IDLE");
        assert_eq!(MmState::ServiceRequestInitiated.to_string(), "5GMM-SERVICE-REQUEST-INITIATED");
        assert_eq!(
            MmStateMachine::new().to_string(),
            "MM[RM-DEREGISTERED, CM-IDLE, 5GMM-NULL]"
        );
    }

    #[test]
    fn test_initial_state() {
        let sm = MmStateMachine::new();
        assert!(sm.is_null());
        assert!(sm.is_deregistered());
        assert!(!sm.is_idle());
        assert!(!sm.is_connected());
    }

    #[test]
    fn test_mm_transition_updates_rm() {
        let mut sm = MmStateMachine::new();
        let t = sm.switch_mm_state(MmState::RegisteredInitiated).unwrap();
        assert_eq!(t.old_state, MmState::Null);
        assert!(sm.is_deregistered());

        sm.switch_mm_state(MmState::Registered);
        assert!(sm.is_registered());
        assert!(sm.switch_mm_state(MmState::Registered).is_none());

        sm.switch_mm_state(MmState::DeregisteredInitiated);
        assert!(sm.is_registered());
        sm.switch_mm_state(MmState::Deregistered);
        assert!(sm.is_deregistered());
    }

    #[test]
    fn test_idle_requires_registration() {
        let mut sm = MmStateMachine::new();
        sm.switch_cm_state(CmState::Connected);
        sm.switch_mm_state(MmState::Registered);
        assert!(!sm.is_idle());
        assert!(sm.switch_cm_state(CmState::Idle).is_some());
        assert!(sm.is_idle());
        assert!(sm.switch_cm_state(CmState::Idle).is_none());
    }
}
