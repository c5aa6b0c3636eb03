//! # Dividend Accumulator
//!
//! Pro-rata yield distribution to share holders, O(1) per operation no matter
//! how many holders there are.
//!
//! ## How it works
//!
//! Each distribution bumps a global dividend-per-share index by
//! `amount * SCALE / total_supply`. Holders are never iterated. Instead, a
//! holder is *settled* whenever their balance is about to change (the share
//! ledger calls [`BalanceObserver::on_balance_will_change`] with the old
//! balance) and whenever they claim:
//!
//! ```text
//! accumulated += old_balance * (index - holder.last_index)
//! holder.last_index = index
//! ```
//!
//! so `pending = (accumulated + balance * (index - last_index)) / SCALE` is
//! exact for every interval of constant balance. Transfers between two
//! distributions credit the first distribution to the sender and the second
//! to the receiver, which is the whole point.
//!
//! Index truncation is carried forward into the next distribution instead of
//! being dropped, so the gap between what was distributed and what holders
//! can claim stays below `holders + supply / SCALE` reward units forever,
//! rather than growing with the number of distributions.
//!
//! The index and every scaled quantity are `U256`. A holder's balance was
//! part of the supply for every distribution since their last settlement, so
//! `balance * delta` never exceeds `total_dividend * SCALE`, which always fits.
//! Settlement therefore cannot fail on arithmetic, and a holder's shares can
//! never be frozen by the hook the ledger runs before each balance change.
//!
//! ## Escrow accounts
//!
//! Accounts registered as escrow (the redemption queue) hold shares on behalf
//! of someone else and never claim. Whatever they accrue is swept back to the
//! dividend treasury by the manager with
//! [`DividendAccumulator::sweep_escrow_reward`], ready to be distributed again.
//!
//! The accumulator must be subscribed to the share ledger before the first
//! share is minted.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fundvault_protocol::access::SignerRegistry;
use fundvault_protocol::config::{load_json_file, DIVIDEND_INDEX_SCALE};
use fundvault_protocol::crypto::{self, dividend_digest};
use fundvault_protocol::ledger::{AssetToken, BalanceObserver, LedgerError, ShareVault};
use fundvault_protocol::replay::ReplayGuard;
use fundvault_protocol::{Address, Amount, ExecutionContext, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ledger_error_kind, ErrorKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DividendError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("pool not active")]
    PoolNotActive,

    #[error("funding not successful")]
    FundingNotSuccessful,

    #[error("only {role}")]
    Unauthorized {
        caller: Address,
        role: &'static str,
    },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid dividend amount")]
    InvalidDividendAmount,

    /// Nobody holds shares, so there is nobody to distribute to.
    #[error("no shares outstanding")]
    NoSharesOutstanding,

    #[error("no pending reward")]
    NoPendingReward,

    #[error("zero address not allowed")]
    ZeroAddress,

    #[error("not an escrow account: {0}")]
    NotEscrowAccount(Address),

    #[error("arithmetic overflow")]
    Overflow,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DividendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DividendError::PoolNotActive | DividendError::FundingNotSuccessful => ErrorKind::Phase,
            DividendError::Unauthorized { .. } | DividendError::InvalidSignature => {
                ErrorKind::Authorization
            }
            DividendError::Ledger(err) => ledger_error_kind(err),
            _ => ErrorKind::Invariant,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividendInit {
    /// This engine's address: custody of undistributed rewards.
    pub address: Address,
    pub vault: Address,
    pub reward_token: Address,
    /// Toggles the pool and rotates the treasury.
    pub manager: Address,
    /// The only account allowed to fund distributions.
    pub dividend_treasury: Address,
}

impl DividendInit {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Loads the init block from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_json_file(path)
    }

    pub fn validate(&self) -> Result<(), DividendError> {
        if self.address.is_zero() {
            return Err(DividendError::InvalidConfig("invalid engine address"));
        }
        if self.vault.is_zero() {
            return Err(DividendError::InvalidConfig("invalid vault"));
        }
        if self.reward_token.is_zero() {
            return Err(DividendError::InvalidConfig("invalid reward token"));
        }
        if self.manager.is_zero() {
            return Err(DividendError::InvalidConfig("invalid manager"));
        }
        if self.dividend_treasury.is_zero() {
            return Err(DividendError::InvalidConfig("invalid dividend treasury"));
        }
        Ok(())
    }
}

/// Global distribution totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPool {
    pub reward_token: Address,
    pub share_token: Address,
    /// Sum of every distribution, ever.
    pub total_dividend: Amount,
    /// `Σ supply_at_distribution * amount`, saturating. Diagnostic only.
    pub total_accumulated_shares: U256,
    /// Scaled dividend-per-share index.
    pub dividend_per_share: U256,
    /// Truncated index numerator carried into the next distribution.
    pub index_remainder: U256,
    pub total_claimed: Amount,
    pub is_active: bool,
}

/// Per-holder bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserYieldInfo {
    /// Settled, unclaimed earnings, scaled by the index scale.
    pub accumulated_shares: U256,
    /// `total_dividend` as of the last settlement.
    pub last_claim_dividend: Amount,
    /// Index as of the last settlement.
    pub last_index: U256,
    pub total_claimed: Amount,
    pub last_claim_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DividendEvent {
    DividendDistributed {
        amount: Amount,
        nonce: u64,
        total_supply: Amount,
    },
    RewardClaimed {
        holder: Address,
        amount: Amount,
    },
    PoolStatusUpdated {
        active: bool,
    },
    ManagerUpdated {
        previous: Address,
        current: Address,
    },
    DividendTreasuryUpdated {
        previous: Address,
        current: Address,
    },
    EscrowRewardSwept {
        escrow: Address,
        treasury: Address,
        amount: Amount,
    },
}

fn index_scale() -> U256 {
    U256::from(DIVIDEND_INDEX_SCALE)
}

/// Unscales `scaled` into whole reward units, keeping the sub-unit dust.
fn unscale(scaled: U256) -> Result<(Amount, U256), DividendError> {
    let (units, dust) = scaled.div_mod(index_scale());
    if units.bits() > 128 {
        return Err(DividendError::Overflow);
    }
    Ok((units.low_u128(), dust))
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct DividendState {
    manager: Address,
    dividend_treasury: Address,
    pool: GlobalPool,
    users: HashMap<Address, UserYieldInfo>,
    events: Vec<DividendEvent>,
}

impl DividendState {
    /// Earnings of `info` at `balance` since its last settlement, scaled.
    fn accrued(&self, info: &UserYieldInfo, balance: Amount) -> Result<U256, DividendError> {
        let delta = self
            .pool
            .dividend_per_share
            .checked_sub(info.last_index)
            .ok_or(DividendError::Overflow)?;
        U256::from(balance)
            .checked_mul(delta)
            .and_then(|earned| earned.checked_add(info.accumulated_shares))
            .ok_or(DividendError::Overflow)
    }

    /// Folds everything `holder` earned at `balance` into their record.
    fn settle(&mut self, holder: &Address, balance: Amount) -> Result<(), DividendError> {
        let info = self.users.get(holder).cloned().unwrap_or_default();
        let accumulated = self.accrued(&info, balance)?;
        let entry = self.users.entry(*holder).or_default();
        entry.accumulated_shares = accumulated;
        entry.last_index = self.pool.dividend_per_share;
        entry.last_claim_dividend = self.pool.total_dividend;
        Ok(())
    }
}

/// The dividend accumulator. Register it with the share ledger via
/// `ShareToken::subscribe` before any shares exist.
pub struct DividendAccumulator {
    address: Address,
    vault: Arc<dyn ShareVault>,
    reward_token: Arc<dyn AssetToken>,
    signers: Arc<SignerRegistry>,
    nonces: ReplayGuard<Address>,
    escrow_accounts: HashSet<Address>,
    state: Mutex<DividendState>,
}

impl fmt::Debug for DividendAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DividendAccumulator")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl DividendAccumulator {
    pub fn builder(init: DividendInit) -> DividendAccumulatorBuilder {
        DividendAccumulatorBuilder::new(init)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Distributes `amount` of the reward token pro rata to current holders.
    ///
    /// Only the dividend treasury may call it, with the validator's signature
    /// over `(vault, amount, dividend_nonce)`. The treasury must have
    /// approved this engine for `amount`.
    pub fn distribute_dividend(
        &self,
        ctx: &ExecutionContext,
        amount: Amount,
        signature: &[u8],
    ) -> Result<(), DividendError> {
        let mut state = self.state.lock();
        if !state.pool.is_active {
            return Err(DividendError::PoolNotActive);
        }
        if ctx.caller != state.dividend_treasury {
            return Err(DividendError::Unauthorized {
                caller: ctx.caller,
                role: "dividend treasury",
            });
        }
        if amount == 0 {
            return Err(DividendError::InvalidDividendAmount);
        }
        let supply = self.vault.total_supply();
        if supply == 0 {
            return Err(DividendError::NoSharesOutstanding);
        }

        let vault = self.vault.address();
        let nonce = self.nonces.current(&vault);
        let digest = dividend_digest(&vault, amount, nonce);
        if !crypto::verify(&digest, signature, &self.signers.validator()) {
            warn!(caller = %ctx.caller, amount, nonce, "dividend signature rejected");
            return Err(DividendError::InvalidSignature);
        }

        let numerator = U256::from(amount)
            .checked_mul(index_scale())
            .and_then(|v| v.checked_add(state.pool.index_remainder))
            .ok_or(DividendError::Overflow)?;
        let (increment, remainder) = numerator.div_mod(U256::from(supply));
        let dividend_per_share = state
            .pool
            .dividend_per_share
            .checked_add(increment)
            .ok_or(DividendError::Overflow)?;
        let total_dividend = state
            .pool
            .total_dividend
            .checked_add(amount)
            .ok_or(DividendError::Overflow)?;
        let total_accumulated_shares = U256::from(supply)
            .saturating_mul(U256::from(amount))
            .saturating_add(state.pool.total_accumulated_shares);

        self.reward_token
            .check_transfer_from(&self.address, &ctx.caller, amount)?;
        self.reward_token
            .transfer_from(&self.address, &ctx.caller, &self.address, amount)?;

        state.pool.dividend_per_share = dividend_per_share;
        state.pool.index_remainder = remainder;
        state.pool.total_dividend = total_dividend;
        state.pool.total_accumulated_shares = total_accumulated_shares;
        self.nonces.next(&vault);
        state.events.push(DividendEvent::DividendDistributed {
            amount,
            nonce,
            total_supply: supply,
        });

        info!(amount, nonce, supply, total_dividend, "dividend distributed");
        Ok(())
    }

    /// Pays the caller everything they have earned so far.
    pub fn claim_reward(&self, ctx: &ExecutionContext) -> Result<Amount, DividendError> {
        let mut state = self.state.lock();
        if !state.pool.is_active {
            return Err(DividendError::PoolNotActive);
        }
        let holder = ctx.caller;
        let reward = self.pay_out(&mut state, &holder, &holder, ctx.timestamp)?;
        state.events.push(DividendEvent::RewardClaimed {
            holder,
            amount: reward,
        });

        info!(%holder, reward, "dividend claimed");
        Ok(reward)
    }

    /// Moves everything `escrow` has accrued to the dividend treasury.
    ///
    /// Manager only, and only for accounts registered as escrow when the
    /// accumulator was built. Works whether or not the pool is active.
    pub fn sweep_escrow_reward(
        &self,
        ctx: &ExecutionContext,
        escrow: Address,
    ) -> Result<Amount, DividendError> {
        let mut state = self.state.lock();
        if ctx.caller != state.manager {
            return Err(DividendError::Unauthorized {
                caller: ctx.caller,
                role: "manager",
            });
        }
        if !self.escrow_accounts.contains(&escrow) {
            return Err(DividendError::NotEscrowAccount(escrow));
        }
        let treasury = state.dividend_treasury;
        let amount = self.pay_out(&mut state, &escrow, &treasury, ctx.timestamp)?;
        state.events.push(DividendEvent::EscrowRewardSwept {
            escrow,
            treasury,
            amount,
        });

        info!(%escrow, %treasury, amount, "escrow dividends swept");
        Ok(amount)
    }

    /// Settles `holder`, transfers their whole-unit earnings to `to` and
    /// keeps the sub-unit dust on their record.
    fn pay_out(
        &self,
        state: &mut DividendState,
        holder: &Address,
        to: &Address,
        now: DateTime<Utc>,
    ) -> Result<Amount, DividendError> {
        let balance = self.vault.balance_of(holder);
        let info = state.users.get(holder).cloned().unwrap_or_default();
        let accumulated = state.accrued(&info, balance)?;
        let (reward, dust) = unscale(accumulated)?;
        if reward == 0 {
            return Err(DividendError::NoPendingReward);
        }
        let total_claimed = info
            .total_claimed
            .checked_add(reward)
            .ok_or(DividendError::Overflow)?;
        let pool_claimed = state
            .pool
            .total_claimed
            .checked_add(reward)
            .ok_or(DividendError::Overflow)?;

        self.reward_token.transfer(&self.address, to, reward)?;

        state.settle(holder, balance)?;
        state.pool.total_claimed = pool_claimed;
        let entry = state.users.entry(*holder).or_default();
        entry.accumulated_shares = dust;
        entry.total_claimed = total_claimed;
        entry.last_claim_time = Some(now);
        Ok(reward)
    }

    /// Activates or deactivates the pool. Manager only; activation requires
    /// a successful funding round.
    pub fn update_global_pool_status(
        &self,
        ctx: &ExecutionContext,
        active: bool,
    ) -> Result<(), DividendError> {
        // Read before taking our own lock: the funding engine may be holding
        // its lock while minting, which calls back into us.
        let funded = active && self.vault.is_funding_successful(ctx.timestamp);

        let mut state = self.state.lock();
        if ctx.caller != state.manager {
            return Err(DividendError::Unauthorized {
                caller: ctx.caller,
                role: "manager",
            });
        }
        if active && !funded {
            return Err(DividendError::FundingNotSuccessful);
        }
        state.pool.is_active = active;
        state.events.push(DividendEvent::PoolStatusUpdated { active });
        info!(active, "dividend pool status updated");
        Ok(())
    }

    pub fn set_manager(&self, ctx: &ExecutionContext, manager: Address) -> Result<(), DividendError> {
        let mut state = self.state.lock();
        if ctx.caller != state.manager {
            return Err(DividendError::Unauthorized {
                caller: ctx.caller,
                role: "manager",
            });
        }
        if manager.is_zero() {
            return Err(DividendError::ZeroAddress);
        }
        let previous = std::mem::replace(&mut state.manager, manager);
        state.events.push(DividendEvent::ManagerUpdated {
            previous,
            current: manager,
        });
        info!(%previous, current = %manager, "dividend manager rotated");
        Ok(())
    }

    pub fn set_dividend_treasury(
        &self,
        ctx: &ExecutionContext,
        treasury: Address,
    ) -> Result<(), DividendError> {
        let mut state = self.state.lock();
        if ctx.caller != state.manager {
            return Err(DividendError::Unauthorized {
                caller: ctx.caller,
                role: "manager",
            });
        }
        if treasury.is_zero() {
            return Err(DividendError::ZeroAddress);
        }
        let previous = std::mem::replace(&mut state.dividend_treasury, treasury);
        state.events.push(DividendEvent::DividendTreasuryUpdated {
            previous,
            current: treasury,
        });
        info!(%previous, current = %treasury, "dividend treasury rotated");
        Ok(())
    }

    // -- Views ----------------------------------------------------------------

    /// Claimable reward for `holder` right now.
    pub fn pending_reward(&self, holder: &Address) -> Amount {
        let balance = self.vault.balance_of(holder);
        let state = self.state.lock();
        let info = state.users.get(holder).cloned().unwrap_or_default();
        state
            .accrued(&info, balance)
            .and_then(unscale)
            .map_or(0, |(units, _)| units)
    }

    /// `holder`'s scaled earnings as if they had held `balance` since their
    /// last settlement.
    pub fn calculate_accumulated_shares(
        &self,
        holder: &Address,
        balance: Amount,
    ) -> Result<U256, DividendError> {
        let state = self.state.lock();
        let info = state.users.get(holder).cloned().unwrap_or_default();
        state.accrued(&info, balance)
    }

    pub fn global_pool(&self) -> GlobalPool {
        self.state.lock().pool.clone()
    }

    pub fn user_info(&self, holder: &Address) -> UserYieldInfo {
        self.state
            .lock()
            .users
            .get(holder)
            .cloned()
            .unwrap_or_default()
    }

    pub fn manager(&self) -> Address {
        self.state.lock().manager
    }

    pub fn is_escrow_account(&self, account: &Address) -> bool {
        self.escrow_accounts.contains(account)
    }

    pub fn dividend_treasury(&self) -> Address {
        self.state.lock().dividend_treasury
    }

    /// The nonce the next distribution signature must cover.
    pub fn dividend_nonce(&self) -> u64 {
        self.nonces.current(&self.vault.address())
    }

    /// The digest the validator must sign to distribute `amount` next.
    pub fn signing_digest(&self, amount: Amount) -> [u8; 32] {
        let vault = self.vault.address();
        dividend_digest(&vault, amount, self.nonces.current(&vault))
    }

    pub fn drain_events(&self) -> Vec<DividendEvent> {
        std::mem::take(&mut self.state.lock().events)
    }
}

impl BalanceObserver for DividendAccumulator {
    fn on_balance_will_change(&self, holder: &Address, old_balance: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state
            .settle(holder, old_balance)
            .map_err(|err| LedgerError::Observer(err.to_string()))?;
        debug!(%holder, old_balance, "holder settled before balance change");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct DividendAccumulatorBuilder {
    init: DividendInit,
    vault: Option<Arc<dyn ShareVault>>,
    reward_token: Option<Arc<dyn AssetToken>>,
    signers: Option<Arc<SignerRegistry>>,
    escrow_accounts: HashSet<Address>,
}

impl DividendAccumulatorBuilder {
    pub fn new(init: DividendInit) -> Self {
        Self {
            init,
            vault: None,
            reward_token: None,
            signers: None,
            escrow_accounts: HashSet::new(),
        }
    }

    pub fn vault(mut self, vault: Arc<dyn ShareVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn reward_token(mut self, token: Arc<dyn AssetToken>) -> Self {
        self.reward_token = Some(token);
        self
    }

    pub fn signers(mut self, signers: Arc<SignerRegistry>) -> Self {
        self.signers = Some(signers);
        self
    }

    /// Registers an account that holds shares for others and never claims,
    /// such as the redemption queue's escrow.
    pub fn escrow_account(mut self, account: Address) -> Self {
        self.escrow_accounts.insert(account);
        self
    }

    pub fn build(self) -> Result<DividendAccumulator, DividendError> {
        self.init.validate()?;
        let vault = self
            .vault
            .ok_or(DividendError::InvalidConfig("missing share vault"))?;
        let reward_token = self
            .reward_token
            .ok_or(DividendError::InvalidConfig("missing reward token"))?;
        let signers = self
            .signers
            .ok_or(DividendError::InvalidConfig("missing signer registry"))?;
        if vault.address() != self.init.vault {
            return Err(DividendError::InvalidConfig("vault address mismatch"));
        }
        if reward_token.address() != self.init.reward_token {
            return Err(DividendError::InvalidConfig("reward token address mismatch"));
        }
        if self.escrow_accounts.contains(&Address::ZERO) {
            return Err(DividendError::InvalidConfig("invalid escrow account"));
        }

        info!(engine = %self.init.address, vault = %self.init.vault, "dividend accumulator initialized");

        let pool = GlobalPool {
            reward_token: self.init.reward_token,
            share_token: self.init.vault,
            ..GlobalPool::default()
        };
        Ok(DividendAccumulator {
            address: self.init.address,
            vault,
            reward_token,
            signers,
            nonces: ReplayGuard::new(),
            escrow_accounts: self.escrow_accounts,
            state: Mutex::new(DividendState {
                manager: self.init.manager,
                dividend_treasury: self.init.dividend_treasury,
                pool,
                users: HashMap::new(),
                events: Vec::new(),
            }),
        })
    }
}
