//! Procedure Transaction Handling
//!
//! A Procedure Transaction Identity (PTI) ties a UE-requested 5GSM procedure
//! to the network's answer.
//!
//! # PTI Range
//!
//! - PTI 0: Reserved for network-initiated procedures
//! - PTI 1-254: Valid range for UE-initiated procedures

use std::fmt;

/// Minimum valid PTI value (1)
pub const PTI_MIN: u8 = 1;
/// Maximum valid PTI value (254)
pub const PTI_MAX: u8 = 254;
/// Reserved PTI for network-initiated procedures
pub const PTI_UNASSIGNED: u8 = 0;

/// Procedure Transaction state.
///
/// 3GPP TS 24.501 Section 6.1.3.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PtState {
    #[default]
    Inactive,
    /// Request sent, waiting for network response
    Pending,
}

impl fmt::Display for PtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtState::Inactive => write!(f, "INACTIVE"),
            PtState::Pending => write!(f, "PENDING"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ProcedureTransaction {
    state: PtState,
    psi: u8,
}

/// Result of matching a network answer against the pending transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtiValidationResult {
    Valid,
    InvalidPti,
    /// Nothing is pending under this PTI
    NotPending,
    PsiMismatch { expected: u8, received: u8 },
}

/// PTI table for one UE.
#[derive(Debug, Clone)]
pub struct ProcedureTransactionManager {
    transactions: Vec<ProcedureTransaction>,
}

impl Default for ProcedureTransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcedureTransactionManager {
    pub fn new() -> Self {
        Self {
            transactions: vec![ProcedureTransaction::default(); PTI_MAX as usize + 1],
        }
    }

    /// Reserves the lowest free PTI for a procedure on session `psi`.
    pub fn allocate(&mut self, psi: u8) -> Option<u8> {
        let pti = (PTI_MIN..=PTI_MAX).find(|&pti| self.transactions[pti as usize].state == PtState::Inactive)?;
        self.transactions[pti as usize] = ProcedureTransaction {
            state: PtState::Pending,
            psi,
        };
        Some(pti)
    }

    /// Returns a PTI to the pool.
    pub fn free(&mut self, pti: u8) {
        if (PTI_MIN..=PTI_MAX).contains(&pti) {
            self.transactions[pti as usize] = ProcedureTransaction::default();
        }
    }

    /// Checks PTI and PSI of a received 5GSM message.
    pub fn validate_pti_psi(&self, pti: u8, psi: u8) -> PtiValidationResult {
        if !(PTI_MIN..=PTI_MAX).contains(&pti) {
            return PtiValidationResult::InvalidPti;
        }
        let pt = &self.transactions[pti as usize];
        if pt.state != PtState::Pending {
            return PtiValidationResult::NotPending;
        }
        if pt.psi != psi {
            return PtiValidationResult::PsiMismatch {
                expected: pt.psi,
                received: psi,
            };
        }
        PtiValidationResult::Valid
    }

    pub fn pending_count(&self) -> usize {
        self.transactions.iter().filter(|pt| pt.state == PtState::Pending).count()
    }
}
