//! # Error Taxonomy
//!
//! Every engine error maps onto one of four kinds. Callers (and hosts that
//! decide whether to resubmit) should branch on [`ErrorKind`], not on
//! individual variants.
//!
//! | Kind            | Meaning                                           | Retry? |
//! |-----------------|---------------------------------------------------|--------|
//! | `Authorization` | bad signature, reused nonce, wrong signer or role | no     |
//! | `Phase`         | outside the legal window or status                | once the phase changes |
//! | `Invariant`     | below a floor, supply exceeded, double withdrawal | no     |
//! | `Resource`      | insufficient allowance or balance on a token      | no     |
//!
//! Every failure is a full revert: no engine leaves partial state behind.

use std::fmt;

use fundvault_protocol::ledger::LedgerError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Authorization,
    Phase,
    Invariant,
    Resource,
}

impl ErrorKind {
    /// Only phase errors can succeed later without changing the request.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Phase)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Authorization => write!(f, "AuthorizationError"),
            ErrorKind::Phase => write!(f, "PhaseError"),
            ErrorKind::Invariant => write!(f, "InvariantViolation"),
            ErrorKind::Resource => write!(f, "ResourceError"),
        }
    }
}

/// Classifies an error surfaced by one of the token ledgers.
pub fn ledger_error_kind(err: &LedgerError) -> ErrorKind {
    match err {
        LedgerError::InsufficientBalance { .. } | LedgerError::InsufficientAllowance { .. } => {
            ErrorKind::Resource
        }
        LedgerError::TransfersPaused | LedgerError::TransfersNotPaused => ErrorKind::Phase,
        LedgerError::NotWhitelisted(_) | LedgerError::Unauthorized(_) => ErrorKind::Authorization,
        LedgerError::ZeroAddress | LedgerError::Overflow | LedgerError::Observer(_) => {
            ErrorKind::Invariant
        }
    }
}
