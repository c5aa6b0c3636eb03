//! # Ledger Boundary
//!
//! The engines move two kinds of tokens and own neither:
//!
//! - an **asset token** (the stablecoin investors pay in and get paid out in),
//!   reached through [`AssetToken`];
//! - the fund's **share token**, reached through [`ShareVault`], which also
//!   answers "did the raise succeed?" and gates mint, burn and pause.
//!
//! Both traits use explicit principals instead of an ambient `msg.sender`:
//! `transfer(from, ..)` moves `from`'s own tokens, `transfer_from(spender, ..)`
//! spends an allowance. Engines pass their own address when acting for
//! themselves.
//!
//! The reverse direction is [`BalanceObserver`]: the share ledger calls every
//! observer *before* it mutates a balance, passing the balance as it was. The
//! dividend accumulator uses this to settle a holder's earnings at the old
//! balance, which is what makes lazy pro-rata accounting exact.
//!
//! [`AssetLedger`] and [`ShareToken`] are complete in-memory implementations.

pub mod asset;
pub mod share;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::access::AccessError;
use crate::types::{Address, Amount};

pub use asset::AssetLedger;
pub use share::{ShareToken, ShareTokenConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by either ledger. Display strings are the revert reasons.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance")]
    InsufficientBalance {
        account: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("insufficient allowance")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("token transfer while paused")]
    TransfersPaused,

    #[error("transfers are not paused")]
    TransfersNotPaused,

    #[error("not whitelisted")]
    NotWhitelisted(Address),

    #[error("zero address")]
    ZeroAddress,

    #[error(transparent)]
    Unauthorized(#[from] AccessError),

    #[error("arithmetic overflow")]
    Overflow,

    /// A balance observer refused the change.
    #[error("balance hook failed: {0}")]
    Observer(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// ERC-20-shaped asset token.
pub trait AssetToken: Send + Sync {
    fn address(&self) -> Address;

    fn balance_of(&self, account: &Address) -> Amount;

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    fn approve(&self, owner: &Address, spender: &Address, amount: Amount)
        -> Result<(), LedgerError>;

    /// Moves `amount` of `from`'s own balance to `to`.
    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// Moves `amount` from `from` to `to`, spending `spender`'s allowance.
    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Pre-flight for [`AssetToken::transfer_from`]: same checks, no effects.
    fn check_transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let allowed = self.allowance(from, spender);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                needed: amount,
                available: allowed,
            });
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                needed: amount,
                available,
            });
        }
        Ok(())
    }
}

/// The vault coordinator: the share ledger plus the fund-level switches the
/// engines consult.
pub trait ShareVault: Send + Sync {
    fn address(&self) -> Address;

    fn balance_of(&self, account: &Address) -> Amount;

    fn total_supply(&self) -> Amount;

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    fn approve(&self, owner: &Address, spender: &Address, amount: Amount)
        -> Result<(), LedgerError>;

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError>;

    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Mints to `to`. `minter` must hold the mint capability.
    fn mint(&self, minter: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// Everything [`ShareVault::mint`] checks, without minting.
    fn check_mint(&self, minter: &Address, to: &Address, amount: Amount)
        -> Result<(), LedgerError>;

    /// Burns `from`'s shares. `burner` must hold the burn capability.
    fn burn(&self, burner: &Address, from: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// Burns `from`'s shares, additionally spending `from`'s allowance to
    /// `burner`.
    fn burn_from(&self, burner: &Address, from: &Address, amount: Amount)
        -> Result<(), LedgerError>;

    fn transfers_paused(&self) -> bool;

    fn pause_transfers(&self, caller: &Address) -> Result<(), LedgerError>;

    fn unpause_transfers(&self, caller: &Address) -> Result<(), LedgerError>;

    /// Fresh read of the funding round's outcome as of `now`.
    fn is_funding_successful(&self, now: DateTime<Utc>) -> bool;
}

/// Called by the share ledger before a holder's balance changes.
pub trait BalanceObserver: Send + Sync {
    fn on_balance_will_change(&self, holder: &Address, old_balance: Amount)
        -> Result<(), LedgerError>;
}

/// Something that can report whether the raise succeeded.
pub trait FundingStatus: Send + Sync {
    fn is_funding_successful(&self, now: DateTime<Utc>) -> bool;
}
