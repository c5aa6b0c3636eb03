//! # Share Token
//!
//! The fund's share ledger and vault coordinator in one: balances,
//! allowances, a transfer pause, an optional whitelist, capability-gated
//! mint/burn, balance-change observers, and a pluggable funding-status source.
//!
//! ## Hook ordering
//!
//! Every balance mutation runs in three steps:
//!
//! 1. Validate under a read lock and snapshot the affected balances.
//! 2. Call every [`BalanceObserver`] with the *old* balances, holding no lock.
//! 3. Apply the mutation under the write lock.
//!
//! Observers may call back into the token (`balance_of`, `total_supply`)
//! without deadlocking. The host executes transactions serially, so nothing
//! can change between steps 1 and 3.
//!
//! Shares start out non-transferable (paused) and stay that way until the
//! funding engine lifts the pause after a successful raise. Mint and burn
//! ignore the pause; they are how the raise and its refunds happen.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BalanceObserver, FundingStatus, LedgerError, ShareVault};
use crate::access::{Authorizer, Capability};
use crate::types::{Address, Amount};

/// Static parameters of a share token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareTokenConfig {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Whether transfers start paused. Funds normally want `true`.
    #[serde(default = "default_true")]
    pub paused_on_creation: bool,
    /// Whether mint and transfer receivers must be whitelisted.
    #[serde(default)]
    pub whitelist_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default)]
struct ShareState {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    total_supply: Amount,
    paused: bool,
    whitelist_enabled: bool,
    whitelist: HashSet<Address>,
}

impl ShareState {
    fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn check_receiver(&self, to: &Address) -> Result<(), LedgerError> {
        if to.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        if self.whitelist_enabled && !self.whitelist.contains(to) {
            return Err(LedgerError::NotWhitelisted(*to));
        }
        Ok(())
    }

    fn check_debit(&self, account: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let available = self.balance(account);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *account,
                needed: amount,
                available,
            });
        }
        Ok(available)
    }

    fn check_allowance(
        &self,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<Amount, LedgerError> {
        let allowed = self
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *owner,
                spender: *spender,
                needed: amount,
                available: allowed,
            });
        }
        Ok(allowed)
    }

    fn spend_allowance(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        let key = (*owner, *spender);
        if let Some(allowed) = self.allowances.get_mut(&key) {
            if *allowed != Amount::MAX {
                *allowed = allowed.saturating_sub(amount);
            }
        }
    }

    fn set_balance(&mut self, account: &Address, balance: Amount) {
        if balance == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, balance);
        }
    }
}

/// In-memory share token implementing [`ShareVault`].
pub struct ShareToken {
    config: ShareTokenConfig,
    authorizer: Arc<dyn Authorizer>,
    state: RwLock<ShareState>,
    observers: RwLock<Vec<Weak<dyn BalanceObserver>>>,
    funding_status: RwLock<Option<Weak<dyn FundingStatus>>>,
}

impl ShareToken {
    pub fn new(config: ShareTokenConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        let state = ShareState {
            paused: config.paused_on_creation,
            whitelist_enabled: config.whitelist_enabled,
            ..ShareState::default()
        };
        Self {
            config,
            authorizer,
            state: RwLock::new(state),
            observers: RwLock::new(Vec::new()),
            funding_status: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn decimals(&self) -> u8 {
        self.config.decimals
    }

    /// Registers a balance observer. Held weakly: the observer usually holds
    /// an `Arc` to this token, and a strong reference back would leak both.
    pub fn subscribe<T: BalanceObserver + 'static>(&self, observer: &Arc<T>) {
        let weak: Weak<dyn BalanceObserver> = Arc::downgrade(observer) as Weak<dyn BalanceObserver>;
        self.observers.write().push(weak);
    }

    /// Sets the source consulted by [`ShareVault::is_funding_successful`].
    pub fn set_funding_status<T: FundingStatus + 'static>(&self, source: &Arc<T>) {
        let weak: Weak<dyn FundingStatus> = Arc::downgrade(source) as Weak<dyn FundingStatus>;
        *self.funding_status.write() = Some(weak);
    }

    pub fn whitelist_enabled(&self) -> bool {
        self.state.read().whitelist_enabled
    }

    pub fn is_whitelisted(&self, account: &Address) -> bool {
        self.state.read().whitelist.contains(account)
    }

    /// Turns whitelist enforcement on or off. Admin only.
    pub fn set_whitelist_enabled(&self, caller: &Address, enabled: bool) -> Result<(), LedgerError> {
        self.authorizer.require(caller, Capability::Admin)?;
        self.state.write().whitelist_enabled = enabled;
        info!(token = %self.config.symbol, enabled, "whitelist enforcement changed");
        Ok(())
    }

    /// Adds accounts to the whitelist. Manager only.
    pub fn add_to_whitelist(&self, caller: &Address, accounts: &[Address]) -> Result<(), LedgerError> {
        self.authorizer.require(caller, Capability::Manager)?;
        let mut state = self.state.write();
        for account in accounts {
            if account.is_zero() {
                return Err(LedgerError::ZeroAddress);
            }
        }
        state.whitelist.extend(accounts.iter().copied());
        Ok(())
    }

    pub fn remove_from_whitelist(
        &self,
        caller: &Address,
        accounts: &[Address],
    ) -> Result<(), LedgerError> {
        self.authorizer.require(caller, Capability::Manager)?;
        let mut state = self.state.write();
        for account in accounts {
            state.whitelist.remove(account);
        }
        Ok(())
    }

    fn notify(&self, holders: &[(Address, Amount)]) -> Result<(), LedgerError> {
        let observers: Vec<Arc<dyn BalanceObserver>> = self
            .observers
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for observer in &observers {
            for (holder, old_balance) in holders {
                observer.on_balance_will_change(holder, *old_balance)?;
            }
        }
        Ok(())
    }

    fn validate_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(Amount, Amount), LedgerError> {
        let state = self.state.read();
        if state.paused {
            return Err(LedgerError::TransfersPaused);
        }
        state.check_receiver(to)?;
        let from_balance = state.check_debit(from, amount)?;
        let to_balance = state.balance(to);
        if from != to {
            to_balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        }
        Ok((from_balance, to_balance))
    }

    fn apply_transfer(&self, from: &Address, to: &Address, amount: Amount) {
        let mut state = self.state.write();
        let from_balance = state.balance(from) - amount;
        state.set_balance(from, from_balance);
        let to_balance = state.balance(to) + amount;
        state.set_balance(to, to_balance);
    }

    fn burn_inner(
        &self,
        burner: &Address,
        from: &Address,
        amount: Amount,
        spend_allowance: bool,
    ) -> Result<(), LedgerError> {
        self.authorizer.require(burner, Capability::Burn)?;
        let old_balance = {
            let state = self.state.read();
            if spend_allowance && burner != from {
                state.check_allowance(from, burner, amount)?;
            }
            state.check_debit(from, amount)?
        };

        self.notify(&[(*from, old_balance)])?;

        let mut state = self.state.write();
        if spend_allowance && burner != from {
            state.spend_allowance(from, burner, amount);
        }
        state.set_balance(from, old_balance - amount);
        state.total_supply -= amount;
        debug!(token = %self.config.symbol, %from, amount, "shares burned");
        Ok(())
    }
}

impl ShareVault for ShareToken {
    fn address(&self) -> Address {
        self.config.address
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.state.read().balance(account)
    }

    fn total_supply(&self) -> Amount {
        self.state.read().total_supply
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
        let (from_balance, to_balance) = self.validate_transfer(from, to, amount)?;
        self.notify(&[(*from, from_balance), (*to, to_balance)])?;
        self.apply_transfer(from, to, amount);
        debug!(token = %self.config.symbol, %from, %to, amount, "share transfer");
        Ok(())
    }

    fn transfer_from(
        &self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.state.read().check_allowance(from, spender, amount)?;
        let (from_balance, to_balance) = self.validate_transfer(from, to, amount)?;
        self.notify(&[(*from, from_balance), (*to, to_balance)])?;
        self.state.write().spend_allowance(from, spender, amount);
        self.apply_transfer(from, to, amount);
        debug!(token = %self.config.symbol, %spender, %from, %to, amount, "share transfer_from");
        Ok(())
    }

    fn mint(&self, minter: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.check_mint(minter, to, amount)?;
        let old_balance = self.balance_of(to);

        self.notify(&[(*to, old_balance)])?;

        let mut state = self.state.write();
        state.set_balance(to, old_balance + amount);
        state.total_supply += amount;
        debug!(token = %self.config.symbol, %to, amount, "shares minted");
        Ok(())
    }

    fn check_mint(&self, minter: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.authorizer.require(minter, Capability::Mint)?;
        let state = self.state.read();
        state.check_receiver(to)?;
        state
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    fn burn(&self, burner: &Address, from: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.burn_inner(burner, from, amount, false)
    }

    fn burn_from(&self, burner: &Address, from: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.burn_inner(burner, from, amount, true)
    }

    fn transfers_paused(&self) -> bool {
        self.state.read().paused
    }

    fn pause_transfers(&self, caller: &Address) -> Result<(), LedgerError> {
        self.authorizer.require(caller, Capability::Pause)?;
        let mut state = self.state.write();
        if state.paused {
            return Err(LedgerError::TransfersPaused);
        }
        state.paused = true;
        info!(token = %self.config.symbol, by = %caller, "share transfers paused");
        Ok(())
    }

    fn unpause_transfers(&self, caller: &Address) -> Result<(), LedgerError> {
        self.authorizer.require(caller, Capability::Pause)?;
        let mut state = self.state.write();
        if !state.paused {
            return Err(LedgerError::TransfersNotPaused);
        }
        state.paused = false;
        info!(token = %self.config.symbol, by = %caller, "share transfers unpaused");
        Ok(())
    }

    fn is_funding_successful(&self, now: DateTime<Utc>) -> bool {
        let source = self
            .funding_status
            .read()
            .as_ref()
            .and_then(Weak::upgrade);
        source.map_or(false, |status| status.is_funding_successful(now))
    }
}
