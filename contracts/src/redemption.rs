//! # Redemption Epoch Queue
//!
//! Orderly wind-down of a successful fund. Holders queue share redemptions
//! into the current epoch; the manager closes epochs; a settler funds each
//! closed epoch with validator approval; holders then claim their pro-rata
//! slice of whatever the epoch was settled for.
//!
//! Epoch lifecycle, strictly sequential:
//!
//! ```text
//! Open ──change_epoch()──▶ Locked ──finish_redemption_epoch()──▶ Settled
//! ```
//!
//! - `change_epoch` locks the current epoch if it holds any requests and
//!   opens the next id. An epoch with no requests is left `Open` but is no
//!   longer current, so it can never receive requests or be settled.
//! - Requested shares are escrowed in the queue's own account and burned at
//!   claim time.
//! - `payout = request_shares * total_redemption_assets / total_shares`,
//!   rounded down, so claims can never exceed the settlement.
//! - The settlement payload `(vault, epoch_id, amount)` carries no nonce.
//!   A settlement signature is single-use because `Locked -> Settled` is
//!   one-way: once an epoch is settled, every later settlement of it fails
//!   with "Epoch must be locked", and the epoch id keeps the signature from
//!   applying to any other epoch.
//!
//! Nothing works until the manager sets a start time, and nothing mutating
//! works while paused.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fundvault_protocol::access::{AccessError, Authorizer, Capability, SignerRegistry};
use fundvault_protocol::config::load_json_file;
use fundvault_protocol::crypto::{self, epoch_settlement_digest};
use fundvault_protocol::ledger::{AssetToken, LedgerError, ShareVault};
use fundvault_protocol::{Address, Amount, ExecutionContext};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ledger_error_kind, ErrorKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedemptionError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("not started")]
    NotStarted,

    #[error("paused")]
    Paused,

    #[error("not paused")]
    NotPaused,

    #[error("funding not successful")]
    FundingNotSuccessful,

    #[error("invalid amount")]
    InvalidAmount,

    #[error("below minimum redemption amount")]
    BelowMinimumRedemption {
        requested: Amount,
        minimum: Amount,
    },

    #[error("no redemption request")]
    NoRequest,

    #[error("unknown epoch {0}")]
    UnknownEpoch(u64),

    #[error("Epoch must be locked")]
    EpochNotLocked {
        epoch_id: u64,
        status: EpochStatus,
    },

    #[error("epoch not settled")]
    EpochNotSettled {
        epoch_id: u64,
        status: EpochStatus,
    },

    #[error("already claimed")]
    AlreadyClaimed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("arithmetic overflow")]
    Overflow,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl RedemptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RedemptionError::NotStarted
            | RedemptionError::Paused
            | RedemptionError::NotPaused
            | RedemptionError::FundingNotSuccessful
            | RedemptionError::EpochNotLocked { .. }
            | RedemptionError::EpochNotSettled { .. } => ErrorKind::Phase,
            RedemptionError::InvalidSignature | RedemptionError::Access(_) => {
                ErrorKind::Authorization
            }
            RedemptionError::Ledger(err) => ledger_error_kind(err),
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
pub struct RedemptionInit {
    /// This engine's address: escrow for queued shares and custody for
    /// settlement assets.
    pub address: Address,
    pub vault: Address,
    pub asset: Address,
    pub min_redemption_amount: Amount,
    /// Requests are refused until this is set and reached.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

impl RedemptionInit {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Loads the init block from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_json_file(path)
    }

    pub fn validate(&self) -> Result<(), RedemptionError> {
        if self.address.is_zero() {
            return Err(RedemptionError::InvalidConfig("invalid engine address"));
        }
        if self.vault.is_zero() {
            return Err(RedemptionError::InvalidConfig("invalid vault"));
        }
        if self.asset.is_zero() {
            return Err(RedemptionError::InvalidConfig("invalid asset"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochStatus {
    /// Accepting requests (if current).
    Open,
    /// Closed to requests, awaiting settlement.
    Locked,
    /// Funded; holders may claim.
    Settled,
}

impl fmt::Display for EpochStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochStatus::Open => write!(f, "Open"),
            EpochStatus::Locked => write!(f, "Locked"),
            EpochStatus::Settled => write!(f, "Settled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEpoch {
    pub id: u64,
    pub status: EpochStatus,
    pub total_shares: Amount,
    pub total_redemption_assets: Amount,
    pub total_claimed_assets: Amount,
    pub request_count: u64,
    pub opened_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl RedemptionEpoch {
    fn open(id: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: EpochStatus::Open,
            total_shares: 0,
            total_redemption_assets: 0,
            total_claimed_assets: 0,
            request_count: 0,
            opened_at: now,
            locked_at: None,
            settled_at: None,
        }
    }

    fn payout_for(&self, shares: Amount) -> Result<Amount, RedemptionError> {
        if self.total_shares == 0 {
            return Ok(0);
        }
        shares
            .checked_mul(self.total_redemption_assets)
            .map(|v| v / self.total_shares)
            .ok_or(RedemptionError::Overflow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub user: Address,
    pub epoch_id: u64,
    pub request_shares: Amount,
    pub claim_shares: Amount,
    pub claim_assets: Amount,
    pub requested_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedemptionEvent {
    RedemptionRequested {
        user: Address,
        epoch_id: u64,
        shares: Amount,
        total_request_shares: Amount,
    },
    RedemptionCancelled {
        user: Address,
        epoch_id: u64,
        shares: Amount,
    },
    EpochChanged {
        closed_epoch: u64,
        closed_status: EpochStatus,
        opened_epoch: u64,
    },
    EpochSettled {
        epoch_id: u64,
        asset_amount: Amount,
    },
    RedemptionClaimed {
        user: Address,
        epoch_id: u64,
        shares: Amount,
        asset_amount: Amount,
    },
    StartTimeUpdated {
        start_time: Option<DateTime<Utc>>,
    },
    MinRedemptionAmountUpdated {
        amount: Amount,
    },
    Paused {
        by: Address,
    },
    Unpaused {
        by: Address,
    },
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct QueueState {
    current_epoch_id: u64,
    epochs: BTreeMap<u64, RedemptionEpoch>,
    requests: HashMap<(Address, u64), RedemptionRequest>,
    start_time: Option<DateTime<Utc>>,
    min_redemption_amount: Amount,
    paused: bool,
    events: Vec<RedemptionEvent>,
}

impl QueueState {
    fn ensure_running(&self, now: DateTime<Utc>) -> Result<(), RedemptionError> {
        if self.paused {
            return Err(RedemptionError::Paused);
        }
        match self.start_time {
            Some(start) if now >= start => Ok(()),
            _ => Err(RedemptionError::NotStarted),
        }
    }

    fn epoch(&self, epoch_id: u64) -> Result<&RedemptionEpoch, RedemptionError> {
        self.epochs
            .get(&epoch_id)
            .ok_or(RedemptionError::UnknownEpoch(epoch_id))
    }

    fn epoch_mut(&mut self, epoch_id: u64) -> Result<&mut RedemptionEpoch, RedemptionError> {
        self.epochs
            .get_mut(&epoch_id)
            .ok_or(RedemptionError::UnknownEpoch(epoch_id))
    }
}

/// The redemption queue. Share it behind an `Arc`.
pub struct RedemptionQueue {
    address: Address,
    vault: Arc<dyn ShareVault>,
    asset: Arc<dyn AssetToken>,
    signers: Arc<SignerRegistry>,
    authorizer: Arc<dyn Authorizer>,
    state: Mutex<QueueState>,
}

impl fmt::Debug for RedemptionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedemptionQueue")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// First epoch id handed out.
pub const FIRST_EPOCH_ID: u64 = 1;

impl RedemptionQueue {
    pub fn builder(init: RedemptionInit) -> RedemptionQueueBuilder {
        RedemptionQueueBuilder::new(init)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Queues `shares` of the caller's shares into the current epoch.
    ///
    /// The caller must have approved this engine on the share vault. A first
    /// request must meet the minimum on its own; a top-up only needs the
    /// cumulative total to.
    ///
    /// Escrowed shares stop earning dividends for the caller. Their accrual
    /// lands on this queue's address, which the dividend manager sweeps back
    /// to the treasury with `DividendAccumulator::sweep_escrow_reward`.
    pub fn request_redemption(
        &self,
        ctx: &ExecutionContext,
        shares: Amount,
    ) -> Result<(), RedemptionError> {
        let funded = self.vault.is_funding_successful(ctx.timestamp);

        let mut state = self.state.lock();
        state.ensure_running(ctx.timestamp)?;
        if !funded {
            return Err(RedemptionError::FundingNotSuccessful);
        }
        if shares == 0 {
            return Err(RedemptionError::InvalidAmount);
        }
        let user = ctx.caller;
        let epoch_id = state.current_epoch_id;
        let existing = state
            .requests
            .get(&(user, epoch_id))
            .map_or(0, |r| r.request_shares);
        let total_request = existing
            .checked_add(shares)
            .ok_or(RedemptionError::Overflow)?;
        if total_request < state.min_redemption_amount {
            return Err(RedemptionError::BelowMinimumRedemption {
                requested: total_request,
                minimum: state.min_redemption_amount,
            });
        }
        let epoch_total = state
            .epoch(epoch_id)?
            .total_shares
            .checked_add(shares)
            .ok_or(RedemptionError::Overflow)?;

        self.vault
            .transfer_from(&self.address, &user, &self.address, shares)?;

        let now = ctx.timestamp;
        let is_new = existing == 0;
        let request = state
            .requests
            .entry((user, epoch_id))
            .or_insert_with(|| RedemptionRequest {
                user,
                epoch_id,
                request_shares: 0,
                claim_shares: 0,
                claim_assets: 0,
                requested_at: now,
                claimed_at: None,
            });
        request.request_shares = total_request;
        request.requested_at = now;
        let epoch = state.epoch_mut(epoch_id)?;
        epoch.total_shares = epoch_total;
        if is_new {
            epoch.request_count += 1;
        }
        state.events.push(RedemptionEvent::RedemptionRequested {
            user,
            epoch_id,
            shares,
            total_request_shares: total_request,
        });

        info!(%user, epoch_id, shares, total_request, "redemption requested");
        Ok(())
    }

    /// Withdraws the caller's request from the current epoch and returns the
    /// escrowed shares.
    pub fn cancel_redemption(&self, ctx: &ExecutionContext) -> Result<Amount, RedemptionError> {
        let mut state = self.state.lock();
        state.ensure_running(ctx.timestamp)?;
        let user = ctx.caller;
        // The current epoch is always Open; locked epochs are never current.
        let epoch_id = state.current_epoch_id;
        let shares = state
            .requests
            .get(&(user, epoch_id))
            .map(|r| r.request_shares)
            .ok_or(RedemptionError::NoRequest)?;

        self.vault.transfer(&self.address, &user, shares)?;

        state.requests.remove(&(user, epoch_id));
        let epoch = state.epoch_mut(epoch_id)?;
        epoch.total_shares -= shares;
        epoch.request_count -= 1;
        state.events.push(RedemptionEvent::RedemptionCancelled {
            user,
            epoch_id,
            shares,
        });

        info!(%user, epoch_id, shares, "redemption cancelled");
        Ok(shares)
    }

    /// Closes the current epoch and opens the next one. Returns the new id.
    pub fn change_epoch(&self, ctx: &ExecutionContext) -> Result<u64, RedemptionError> {
        self.authorizer.require(&ctx.caller, Capability::Manager)?;
        let mut state = self.state.lock();
        state.ensure_running(ctx.timestamp)?;

        let closed_epoch = state.current_epoch_id;
        let opened_epoch = closed_epoch
            .checked_add(1)
            .ok_or(RedemptionError::Overflow)?;
        let epoch = state.epoch_mut(closed_epoch)?;
        if epoch.total_shares > 0 {
            epoch.status = EpochStatus::Locked;
            epoch.locked_at = Some(ctx.timestamp);
        }
        let closed_status = epoch.status;

        state
            .epochs
            .insert(opened_epoch, RedemptionEpoch::open(opened_epoch, ctx.timestamp));
        state.current_epoch_id = opened_epoch;
        state.events.push(RedemptionEvent::EpochChanged {
            closed_epoch,
            closed_status,
            opened_epoch,
        });

        info!(closed_epoch, %closed_status, opened_epoch, "redemption epoch changed");
        Ok(opened_epoch)
    }

    /// Funds a locked epoch with `asset_amount`, pulled from the caller.
    ///
    /// Requires the settle capability and the validator's signature over
    /// `(vault, epoch_id, asset_amount)`.
    pub fn finish_redemption_epoch(
        &self,
        ctx: &ExecutionContext,
        epoch_id: u64,
        asset_amount: Amount,
        signature: &[u8],
    ) -> Result<(), RedemptionError> {
        self.authorizer.require(&ctx.caller, Capability::Settle)?;
        let mut state = self.state.lock();
        state.ensure_running(ctx.timestamp)?;
        let status = state.epoch(epoch_id)?.status;
        if status != EpochStatus::Locked {
            return Err(RedemptionError::EpochNotLocked { epoch_id, status });
        }

        let vault = self.vault.address();
        let digest = epoch_settlement_digest(&vault, epoch_id, asset_amount);
        if !crypto::verify(&digest, signature, &self.signers.validator()) {
            warn!(caller = %ctx.caller, epoch_id, asset_amount, "settlement signature rejected");
            return Err(RedemptionError::InvalidSignature);
        }

        if asset_amount > 0 {
            self.asset
                .check_transfer_from(&self.address, &ctx.caller, asset_amount)?;
            self.asset
                .transfer_from(&self.address, &ctx.caller, &self.address, asset_amount)?;
        }

        let epoch = state.epoch_mut(epoch_id)?;
        epoch.total_redemption_assets = asset_amount;
        epoch.status = EpochStatus::Settled;
        epoch.settled_at = Some(ctx.timestamp);
        state.events.push(RedemptionEvent::EpochSettled {
            epoch_id,
            asset_amount,
        });

        info!(epoch_id, asset_amount, by = %ctx.caller, "redemption epoch settled");
        Ok(())
    }

    /// Claims the caller's payout from a settled epoch. At most once.
    pub fn claim_redemption(
        &self,
        ctx: &ExecutionContext,
        epoch_id: u64,
    ) -> Result<Amount, RedemptionError> {
        let mut state = self.state.lock();
        state.ensure_running(ctx.timestamp)?;
        let user = ctx.caller;
        let epoch = state.epoch(epoch_id)?;
        if epoch.status != EpochStatus::Settled {
            return Err(RedemptionError::EpochNotSettled {
                epoch_id,
                status: epoch.status,
            });
        }
        let request = state
            .requests
            .get(&(user, epoch_id))
            .ok_or(RedemptionError::NoRequest)?;
        if request.claimed_at.is_some() {
            return Err(RedemptionError::AlreadyClaimed);
        }
        let shares = request.request_shares;
        let payout = epoch.payout_for(shares)?;
        let total_claimed = epoch
            .total_claimed_assets
            .checked_add(payout)
            .filter(|total| *total <= epoch.total_redemption_assets)
            .ok_or(RedemptionError::Overflow)?;
        let custody = self.asset.balance_of(&self.address);
        if custody < payout {
            return Err(RedemptionError::Ledger(LedgerError::InsufficientBalance {
                account: self.address,
                needed: payout,
                available: custody,
            }));
        }

        self.vault.burn(&self.address, &self.address, shares)?;
        if payout > 0 {
            self.asset.transfer(&self.address, &user, payout)?;
        }

        let now = ctx.timestamp;
        if let Some(request) = state.requests.get_mut(&(user, epoch_id)) {
            request.claim_shares = shares;
            request.claim_assets = payout;
            request.claimed_at = Some(now);
        }
        state.epoch_mut(epoch_id)?.total_claimed_assets = total_claimed;
        state.events.push(RedemptionEvent::RedemptionClaimed {
            user,
            epoch_id,
            shares,
            asset_amount: payout,
        });

        info!(%user, epoch_id, shares, payout, "redemption claimed");
        Ok(payout)
    }

    // -- Administration -----------------------------------------------------

    /// Sets (or clears, with `None`) the time from which the queue operates.
    pub fn set_start_time(
        &self,
        ctx: &ExecutionContext,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<(), RedemptionError> {
        self.authorizer.require(&ctx.caller, Capability::Manager)?;
        let mut state = self.state.lock();
        state.start_time = start_time;
        state
            .events
            .push(RedemptionEvent::StartTimeUpdated { start_time });
        info!(?start_time, "redemption start time updated");
        Ok(())
    }

    pub fn set_min_redemption_amount(
        &self,
        ctx: &ExecutionContext,
        amount: Amount,
    ) -> Result<(), RedemptionError> {
        self.authorizer.require(&ctx.caller, Capability::Manager)?;
        let mut state = self.state.lock();
        state.min_redemption_amount = amount;
        state
            .events
            .push(RedemptionEvent::MinRedemptionAmountUpdated { amount });
        debug!(amount, "minimum redemption amount updated");
        Ok(())
    }

    pub fn pause(&self, ctx: &ExecutionContext) -> Result<(), RedemptionError> {
        self.authorizer.require(&ctx.caller, Capability::Pause)?;
        let mut state = self.state.lock();
        if state.paused {
            return Err(RedemptionError::Paused);
        }
        state.paused = true;
        state.events.push(RedemptionEvent::Paused { by: ctx.caller });
        info!(by = %ctx.caller, "redemption queue paused");
        Ok(())
    }

    pub fn unpause(&self, ctx: &ExecutionContext) -> Result<(), RedemptionError> {
        self.authorizer.require(&ctx.caller, Capability::Pause)?;
        let mut state = self.state.lock();
        if !state.paused {
            return Err(RedemptionError::NotPaused);
        }
        state.paused = false;
        state.events.push(RedemptionEvent::Unpaused { by: ctx.caller });
        info!(by = %ctx.caller, "redemption queue unpaused");
        Ok(())
    }

    // -- Views ----------------------------------------------------------------

    pub fn current_epoch_id(&self) -> u64 {
        self.state.lock().current_epoch_id
    }

    pub fn epoch(&self, epoch_id: u64) -> Option<RedemptionEpoch> {
        self.state.lock().epochs.get(&epoch_id).cloned()
    }

    pub fn request(&self, user: &Address, epoch_id: u64) -> Option<RedemptionRequest> {
        self.state.lock().requests.get(&(*user, epoch_id)).cloned()
    }

    /// What `user` would receive from `epoch_id` if they claimed now. Zero
    /// before settlement and after the claim.
    pub fn pending_redemption(&self, user: &Address, epoch_id: u64) -> Amount {
        let state = self.state.lock();
        let (Some(epoch), Some(request)) = (
            state.epochs.get(&epoch_id),
            state.requests.get(&(*user, epoch_id)),
        ) else {
            return 0;
        };
        if epoch.status != EpochStatus::Settled || request.claimed_at.is_some() {
            return 0;
        }
        epoch.payout_for(request.request_shares).unwrap_or(0)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().start_time
    }

    pub fn min_redemption_amount(&self) -> Amount {
        self.state.lock().min_redemption_amount
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// The digest the validator must sign to settle `epoch_id` for `amount`.
    pub fn signing_digest(&self, epoch_id: u64, asset_amount: Amount) -> [u8; 32] {
        epoch_settlement_digest(&self.vault.address(), epoch_id, asset_amount)
    }

    pub fn drain_events(&self) -> Vec<RedemptionEvent> {
        std::mem::take(&mut self.state.lock().events)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct RedemptionQueueBuilder {
    init: RedemptionInit,
    vault: Option<Arc<dyn ShareVault>>,
    asset: Option<Arc<dyn AssetToken>>,
    signers: Option<Arc<SignerRegistry>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl RedemptionQueueBuilder {
    pub fn new(init: RedemptionInit) -> Self {
        Self {
            init,
            vault: None,
            asset: None,
            signers: None,
            authorizer: None,
        }
    }

    pub fn vault(mut self, vault: Arc<dyn ShareVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn asset(mut self, asset: Arc<dyn AssetToken>) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn signers(mut self, signers: Arc<SignerRegistry>) -> Self {
        self.signers = Some(signers);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Wires the queue and opens the first epoch at `now`.
    pub fn build(self, now: DateTime<Utc>) -> Result<RedemptionQueue, RedemptionError> {
        self.init.validate()?;
        let vault = self
            .vault
            .ok_or(RedemptionError::InvalidConfig("missing share vault"))?;
        let asset = self
            .asset
            .ok_or(RedemptionError::InvalidConfig("missing asset token"))?;
        let signers = self
            .signers
            .ok_or(RedemptionError::InvalidConfig("missing signer registry"))?;
        let authorizer = self
            .authorizer
            .ok_or(RedemptionError::InvalidConfig("missing authorizer"))?;
        if vault.address() != self.init.vault {
            return Err(RedemptionError::InvalidConfig("vault address mismatch"));
        }
        if asset.address() != self.init.asset {
            return Err(RedemptionError::InvalidConfig("asset address mismatch"));
        }

        info!(engine = %self.init.address, vault = %self.init.vault, "redemption queue initialized");

        let mut epochs = BTreeMap::new();
        epochs.insert(FIRST_EPOCH_ID, RedemptionEpoch::open(FIRST_EPOCH_ID, now));
        Ok(RedemptionQueue {
            address: self.init.address,
            vault,
            asset,
            signers,
            authorizer,
            state: Mutex::new(QueueState {
                current_epoch_id: FIRST_EPOCH_ID,
                epochs,
                requests: HashMap::new(),
                start_time: self.init.start_time,
                min_redemption_amount: self.init.min_redemption_amount,
                paused: false,
                events: Vec::new(),
            }),
        })
    }
}
