//! # Fundvault Engines
//!
//! The accounting core of a tokenized pooled fund. Three engines share one
//! share vault and one validator key:
//!
//! - **Funding**: a time-boxed raise. Signed deposits mint shares at a fixed
//!   price minus a management fee, capped by max supply. Success is decided
//!   by a soft cap at the end of the window; a failed round refunds holders.
//! - **Dividend**: an index-based accumulator. Distributions bump a global
//!   per-share index; every share balance change settles the holder first, so
//!   nobody earns on shares they did not hold.
//! - **Redemption**: an epoch queue. Holders escrow shares, the manager
//!   locks the epoch, a settler funds it, holders claim pro rata.
//!
//! ## Design Principles
//!
//! 1. All monetary operations are checked. Overflow is an invariant
//!    violation, never a wrap.
//! 2. Every entry point validates and computes before its first external
//!    effect. A rejected call leaves no trace.
//! 3. Phases are enums, not flag soup.
//! 4. Every privileged amount carries a signature over a nonce that is
//!    consumed on success.

pub mod dividend;
pub mod error;
pub mod funding;
pub mod redemption;

pub use dividend::{DividendAccumulator, DividendError, DividendInit};
pub use error::ErrorKind;
pub use funding::{FundingEngine, FundingError, FundingInit, FundingPhase};
pub use redemption::{EpochStatus, RedemptionError, RedemptionInit, RedemptionQueue};
