//! In-memory ERC-20 asset ledger.
//!
//! Plain balances and allowances behind a `parking_lot::RwLock`. `mint` is an
//! unrestricted faucet: this type stands in for an external stablecoin, and
//! whoever controls the host controls its supply anyway.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::{AssetToken, LedgerError};
use crate::types::{Address, Amount};

#[derive(Debug, Default)]
struct AssetState {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    total_supply: Amount,
}

impl AssetState {
    fn debit(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balances.get(account).copied().unwrap_or(0);
        let remaining = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account: *account,
                needed: amount,
                available,
            })?;
        self.balances.insert(*account, remaining);
        Ok(())
    }

    fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    fn move_balance(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        // Validate the credit side first so a failed credit can't strand a debit.
        let to_balance = self.balances.get(to).copied().unwrap_or(0);
        if from != to {
            to_balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        }
        self.debit(from, amount)?;
        self.credit(to, amount)
    }
}

/// A fungible asset token (e.g. a USD stablecoin).
#[derive(Debug)]
pub struct AssetLedger {
    address: Address,
    symbol: String,
    decimals: u8,
    state: RwLock<AssetState>,
}

impl AssetLedger {
    pub fn new(address: Address, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            symbol: symbol.into(),
            decimals,
            state: RwLock::new(AssetState::default()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn total_supply(&self) -> Amount {
        self.state.read().total_supply
    }

    /// Creates `amount` new tokens for `to`.
    pub fn mint(&self, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        let mut state = self.state.write();
        let supply = state
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        state.credit(to, amount)?;
        state.total_supply = supply;
        debug!(token = %self.symbol, %to, amount, "asset minted");
        Ok(())
    }
}

impl AssetToken for AssetLedger {
    fn address(&self) -> Address {
        self.address
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.state.read().balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.state
            .read()
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    fn approve(&self, owner: &Address, spender: &Address, amount: Amount) -> Result<(), LedgerError> {
        if spender.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        self.state
            .write()
            .allowances
            .insert((*owner, *spender), amount);
        Ok(())
    }

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.state.write().move_balance(from, to, amount)?;
        debug!(token = %self.symbol, %from, %to, amount, "asset transfer");
        Ok(())
    }

    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        let key = (*from, *spender);
        let allowed = state.allowances.get(&key).copied().unwrap_or(0);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                needed: amount,
                available: allowed,
            });
        }
        state.move_balance(from, to, amount)?;
        if allowed != Amount::MAX {
            state.allowances.insert(key, allowed - amount);
        }
        debug!(token = %self.symbol, %spender, %from, %to, amount, "asset transfer_from");
        Ok(())
    }
}
