//! # Funding Engine
//!
//! Runs a time-boxed capital raise against a share vault. The lifecycle is:
//!
//! 1. **Upcoming**: before `start_time`. Nothing is accepted.
//! 2. **Open**: `start_time <= now < end_time`. Investors deposit the asset
//!    token (manager-signed) and receive shares; the off-chain manager can
//!    record deposits settled outside the chain (validator-signed).
//! 3. **Closed**: `now >= end_time`. The round is **Successful** if the net
//!    amount raised (on-chain plus off-chain) reached the soft cap, otherwise
//!    **Unsuccessful**. The outcome can only be decided once, because nothing
//!    can add to the raise after the window closes.
//!
//! On success the funding receiver and fee receiver each withdraw once, and
//! share transfers can be unpaused. On failure investors redeem their shares
//! for a refund, and the off-chain manager unwinds off-chain positions.
//!
//! ## Pricing
//!
//! ```text
//! fee    = amount * fee_bps / 10_000
//! net    = amount - fee
//! shares = net * decimals_multiplier * 1e8 / share_price
//! ```
//!
//! A deposit that would overshoot `max_supply` is clamped to the remaining
//! supply, and only the proportional share of `amount` is pulled (rounded up,
//! so the fund is never short-changed by rounding).
//!
//! ## Atomicity
//!
//! Each entry point validates everything and computes every new total with
//! checked arithmetic before touching a token. Token effects are pre-flighted,
//! and the nonce is only consumed once all effects succeeded.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fundvault_protocol::access::{AccessError, Authorizer, Capability, SignerRegistry};
use fundvault_protocol::config::{
    load_json_file, BPS_DENOMINATOR, OP_DEPOSIT, OP_OFFCHAIN_DEPOSIT, OP_OFFCHAIN_REDEEM,
    OP_REDEEM, SHARE_PRICE_DENOMINATOR,
};
use fundvault_protocol::crypto::{self, FundingOperation};
use fundvault_protocol::ledger::{AssetToken, FundingStatus, LedgerError, ShareVault};
use fundvault_protocol::replay::ReplayGuard;
use fundvault_protocol::{Address, Amount, ExecutionContext};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ledger_error_kind, ErrorKind};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the funding engine. Display strings are revert reasons.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FundingError {
    /// The init struct failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    #[error("not in funding period")]
    NotInFundingPeriod,

    #[error("funding period not ended")]
    FundingNotEnded,

    #[error("funding was successful")]
    FundingWasSuccessful,

    #[error("funding not successful")]
    FundingNotSuccessful,

    /// Signature did not recover to the required signer for the caller's
    /// current nonce.
    #[error("invalid signature")]
    InvalidSignature,

    /// The caller is not the configured principal for this operation.
    #[error("only {role}")]
    Unauthorized {
        caller: Address,
        role: &'static str,
    },

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("invalid receiver")]
    InvalidReceiver,

    #[error("invalid amount")]
    InvalidAmount,

    #[error("amount below minimum deposit")]
    BelowMinimumDeposit {
        amount: Amount,
        minimum: Amount,
    },

    /// The deposit is too small to buy a single share.
    #[error("zero shares")]
    ZeroShares,

    #[error("max supply reached")]
    SupplyExhausted,

    /// The deposit would leave a remainder smaller than the minimum deposit
    /// can buy, which nobody could ever purchase.
    #[error("remaining supply not sellable")]
    RemainingSupplyNotSellable {
        remaining_after: Amount,
        minimum_purchase: Amount,
    },

    #[error("no shares to redeem")]
    NoSharesToRedeem,

    #[error("insufficient funding assets")]
    InsufficientCustody {
        needed: Amount,
        available: Amount,
    },

    #[error("funding assets already withdrawn")]
    FundingAssetsAlreadyWithdrawn,

    #[error("manage fee already withdrawn")]
    ManageFeeAlreadyWithdrawn,

    #[error("no funding assets")]
    NoFundingAssets,

    #[error("no manage fee")]
    NoManageFee,

    #[error("arithmetic overflow")]
    Overflow,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl FundingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FundingError::NotInFundingPeriod
            | FundingError::FundingNotEnded
            | FundingError::FundingWasSuccessful
            | FundingError::FundingNotSuccessful => ErrorKind::Phase,
            FundingError::InvalidSignature
            | FundingError::Unauthorized { .. }
            | FundingError::Access(_) => ErrorKind::Authorization,
            FundingError::Ledger(err) => ledger_error_kind(err),
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

/// Everything needed to stand up a funding round.
///
/// Deserializable so deployments can keep it in a JSON manifest; addresses
/// are `0x` hex strings and times are RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingInit {
    /// This engine's own address: the custody account for raised assets and
    /// the `contract` field of every signed payload.
    pub address: Address,
    pub chain_id: u64,
    pub vault: Address,
    pub asset: Address,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Hard cap on shares issued by this round.
    pub max_supply: Amount,
    /// Net asset amount that must be raised for the round to succeed.
    pub soft_cap: Amount,
    /// Asset units per share, scaled by 1e8.
    pub share_price: Amount,
    /// `10^(share_decimals - asset_decimals)`.
    pub decimals_multiplier: Amount,
    pub min_deposit: Amount,
    pub manage_fee_bps: u32,
    pub funding_receiver: Address,
    pub fee_receiver: Address,
    /// Signs end-user deposits and refunds.
    pub manager: Address,
    /// Submits off-chain deposits and redemptions.
    pub offchain_manager: Address,
}

impl FundingInit {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Loads the init block from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_json_file(path)
    }

    /// Checks the parameters for internal consistency as of `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), FundingError> {
        if self.address.is_zero() {
            return Err(FundingError::InvalidConfig("invalid engine address"));
        }
        if self.vault.is_zero() {
            return Err(FundingError::InvalidConfig("invalid vault"));
        }
        if self.asset.is_zero() {
            return Err(FundingError::InvalidConfig("invalid asset"));
        }
        if self.start_time >= self.end_time {
            return Err(FundingError::InvalidConfig("invalid time range"));
        }
        if self.end_time <= now {
            return Err(FundingError::InvalidConfig("end time in past"));
        }
        if u128::from(self.manage_fee_bps) > BPS_DENOMINATOR {
            return Err(FundingError::InvalidConfig("invalid manage fee"));
        }
        if self.share_price == 0 {
            return Err(FundingError::InvalidConfig("invalid share price"));
        }
        if self.decimals_multiplier == 0 {
            return Err(FundingError::InvalidConfig("invalid decimals multiplier"));
        }
        if self.max_supply == 0 {
            return Err(FundingError::InvalidConfig("invalid max supply"));
        }
        if self.funding_receiver.is_zero() || self.fee_receiver.is_zero() {
            return Err(FundingError::InvalidConfig("invalid receiver"));
        }
        if self.manager.is_zero() || self.offchain_manager.is_zero() {
            return Err(FundingError::InvalidConfig("invalid manager"));
        }
        let max_raise = shares_to_assets(self.max_supply, self.share_price, self.decimals_multiplier)
            .map_err(|_| FundingError::InvalidConfig("max supply too large"))?;
        if self.soft_cap > max_raise {
            return Err(FundingError::InvalidConfig("soft cap exceeds max supply"));
        }
        Ok(())
    }
}

/// Where the round is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingPhase {
    Upcoming,
    Open,
    Successful,
    Unsuccessful,
}

impl fmt::Display for FundingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingPhase::Upcoming => write!(f, "Upcoming"),
            FundingPhase::Open => write!(f, "Open"),
            FundingPhase::Successful => write!(f, "Successful"),
            FundingPhase::Unsuccessful => write!(f, "Unsuccessful"),
        }
    }
}

/// The outcome of pricing a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositQuote {
    /// Asset amount actually pulled (≤ the requested amount when clamped).
    pub asset_amount: Amount,
    pub fee: Amount,
    pub net: Amount,
    pub shares: Amount,
    /// Whether the purchase was cut down to the remaining supply.
    pub clamped: bool,
}

/// What a failed-round refund pays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundQuote {
    pub shares: Amount,
    /// Inverse-priced net asset amount.
    pub asset_amount: Amount,
    /// Proportional management fee returned alongside.
    pub fee: Amount,
}

impl RefundQuote {
    pub fn payout(&self) -> Amount {
        self.asset_amount + self.fee
    }
}

/// Events emitted by the funding engine, drained by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingEvent {
    Deposit {
        sender: Address,
        receiver: Address,
        amount: Amount,
        fee: Amount,
        net: Amount,
        shares: Amount,
    },
    OffChainDeposit {
        receiver: Address,
        amount: Amount,
        shares: Amount,
    },
    FundFailRedeem {
        sender: Address,
        receiver: Address,
        shares: Amount,
        asset_amount: Amount,
        fee: Amount,
    },
    OffChainRedeem {
        receiver: Address,
        shares: Amount,
        asset_amount: Amount,
    },
    FundingAssetsWithdrawn {
        receiver: Address,
        amount: Amount,
    },
    ManageFeeWithdrawn {
        receiver: Address,
        amount: Amount,
    },
    TransfersUnpaused,
    ManagerUpdated {
        previous: Address,
        current: Address,
    },
    OffChainManagerUpdated {
        previous: Address,
        current: Address,
    },
}

/// Point-in-time view of the round's books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRound {
    pub init: FundingInit,
    pub total_raised_net: Amount,
    pub manage_fee_accrued: Amount,
    pub offchain_raised_net: Amount,
    pub offchain_fee: Amount,
    pub shares_issued: Amount,
    pub total_asset_pulled: Amount,
    pub total_refunded: Amount,
    pub funding_assets_withdrawn: bool,
    pub manage_fee_withdrawn: bool,
}

// ---------------------------------------------------------------------------
// Share math
// ---------------------------------------------------------------------------

/// `shares = net * decimals_multiplier * 1e8 / share_price`
pub fn assets_to_shares(
    net: Amount,
    share_price: Amount,
    decimals_multiplier: Amount,
) -> Result<Amount, FundingError> {
    net.checked_mul(decimals_multiplier)
        .and_then(|v| v.checked_mul(SHARE_PRICE_DENOMINATOR))
        .and_then(|v| v.checked_div(share_price))
        .ok_or(FundingError::Overflow)
}

/// `assets = shares * share_price / 1e8 / decimals_multiplier`
pub fn shares_to_assets(
    shares: Amount,
    share_price: Amount,
    decimals_multiplier: Amount,
) -> Result<Amount, FundingError> {
    shares
        .checked_mul(share_price)
        .and_then(|v| v.checked_div(SHARE_PRICE_DENOMINATOR))
        .and_then(|v| v.checked_div(decimals_multiplier))
        .ok_or(FundingError::Overflow)
}

fn fee_of(amount: Amount, fee_bps: u32) -> Result<Amount, FundingError> {
    amount
        .checked_mul(u128::from(fee_bps))
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or(FundingError::Overflow)
}

/// Prices a deposit of `amount` against `remaining` unsold shares.
pub fn quote_deposit(
    amount: Amount,
    fee_bps: u32,
    share_price: Amount,
    decimals_multiplier: Amount,
    remaining: Amount,
) -> Result<DepositQuote, FundingError> {
    let fee = fee_of(amount, fee_bps)?;
    let net = amount - fee;
    let shares = assets_to_shares(net, share_price, decimals_multiplier)?;
    if shares == 0 {
        return Err(FundingError::ZeroShares);
    }
    if remaining == 0 {
        return Err(FundingError::SupplyExhausted);
    }
    if shares <= remaining {
        return Ok(DepositQuote {
            asset_amount: amount,
            fee,
            net,
            shares,
            clamped: false,
        });
    }

    // ceil(amount * remaining / shares)
    let scaled = amount.checked_mul(remaining).ok_or(FundingError::Overflow)?;
    let asset_amount = scaled / shares + u128::from(scaled % shares != 0);
    let fee = fee_of(asset_amount, fee_bps)?;
    Ok(DepositQuote {
        asset_amount,
        fee,
        net: asset_amount - fee,
        shares: remaining,
        clamped: true,
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FundingState {
    init: FundingInit,
    total_raised_net: Amount,
    manage_fee_accrued: Amount,
    offchain_raised_net: Amount,
    offchain_fee: Amount,
    shares_issued: Amount,
    total_asset_pulled: Amount,
    total_refunded: Amount,
    funding_assets_withdrawn: bool,
    manage_fee_withdrawn: bool,
    events: Vec<FundingEvent>,
}

impl FundingState {
    fn phase(&self, now: DateTime<Utc>) -> FundingPhase {
        if now < self.init.start_time {
            FundingPhase::Upcoming
        } else if now < self.init.end_time {
            FundingPhase::Open
        } else if self.total_raised() >= self.init.soft_cap {
            FundingPhase::Successful
        } else {
            FundingPhase::Unsuccessful
        }
    }

    fn total_raised(&self) -> Amount {
        self.total_raised_net.saturating_add(self.offchain_raised_net)
    }

    fn remaining_supply(&self) -> Amount {
        self.init.max_supply.saturating_sub(self.shares_issued)
    }

    fn ensure_open(&self, now: DateTime<Utc>) -> Result<(), FundingError> {
        match self.phase(now) {
            FundingPhase::Open => Ok(()),
            _ => Err(FundingError::NotInFundingPeriod),
        }
    }

    fn ensure_unsuccessful(&self, now: DateTime<Utc>) -> Result<(), FundingError> {
        match self.phase(now) {
            FundingPhase::Unsuccessful => Ok(()),
            FundingPhase::Successful => Err(FundingError::FundingWasSuccessful),
            FundingPhase::Upcoming | FundingPhase::Open => Err(FundingError::FundingNotEnded),
        }
    }

    fn ensure_successful(&self, now: DateTime<Utc>) -> Result<(), FundingError> {
        match self.phase(now) {
            FundingPhase::Successful => Ok(()),
            FundingPhase::Unsuccessful => Err(FundingError::FundingNotSuccessful),
            FundingPhase::Upcoming | FundingPhase::Open => Err(FundingError::FundingNotEnded),
        }
    }

    /// Prices a deposit and rejects purchases that would strand dust supply.
    fn quote(&self, amount: Amount) -> Result<DepositQuote, FundingError> {
        let init = &self.init;
        if amount < init.min_deposit {
            return Err(FundingError::BelowMinimumDeposit {
                amount,
                minimum: init.min_deposit,
            });
        }
        let remaining = self.remaining_supply();
        let quote = quote_deposit(
            amount,
            init.manage_fee_bps,
            init.share_price,
            init.decimals_multiplier,
            remaining,
        )?;

        let remaining_after = remaining - quote.shares;
        if remaining_after > 0 {
            let minimum_purchase = assets_to_shares(
                init.min_deposit - fee_of(init.min_deposit, init.manage_fee_bps)?,
                init.share_price,
                init.decimals_multiplier,
            )?;
            if remaining_after < minimum_purchase {
                return Err(FundingError::RemainingSupplyNotSellable {
                    remaining_after,
                    minimum_purchase,
                });
            }
        }
        Ok(quote)
    }

    fn refund_quote(&self, shares: Amount) -> Result<RefundQuote, FundingError> {
        let asset_amount =
            shares_to_assets(shares, self.init.share_price, self.init.decimals_multiplier)?;
        if asset_amount > self.total_raised_net {
            return Err(FundingError::InsufficientCustody {
                needed: asset_amount,
                available: self.total_raised_net,
            });
        }
        let fee = fee_of(asset_amount, self.init.manage_fee_bps)?.min(self.manage_fee_accrued);
        Ok(RefundQuote {
            shares,
            asset_amount,
            fee,
        })
    }

    fn snapshot(&self) -> FundingRound {
        FundingRound {
            init: self.init.clone(),
            total_raised_net: self.total_raised_net,
            manage_fee_accrued: self.manage_fee_accrued,
            offchain_raised_net: self.offchain_raised_net,
            offchain_fee: self.offchain_fee,
            shares_issued: self.shares_issued,
            total_asset_pulled: self.total_asset_pulled,
            total_refunded: self.total_refunded,
            funding_assets_withdrawn: self.funding_assets_withdrawn,
            manage_fee_withdrawn: self.manage_fee_withdrawn,
        }
    }
}

/// The funding engine. Share it behind an `Arc`; every entry point takes
/// `&self` and runs atomically under the engine's lock.
pub struct FundingEngine {
    address: Address,
    chain_id: u64,
    vault: Arc<dyn ShareVault>,
    asset: Arc<dyn AssetToken>,
    signers: Arc<SignerRegistry>,
    authorizer: Arc<dyn Authorizer>,
    nonces: ReplayGuard<Address>,
    state: Mutex<FundingState>,
}

impl fmt::Debug for FundingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FundingEngine")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl FundingEngine {
    pub fn builder(init: FundingInit) -> FundingEngineBuilder {
        FundingEngineBuilder::new(init)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn operation_digest(&self, op: &str, amount: Amount, receiver: Address, nonce: u64) -> [u8; 32] {
        FundingOperation {
            op,
            amount,
            receiver,
            nonce,
            chain_id: self.chain_id,
            contract: self.address,
        }
        .digest()
    }

    /// Verifies `signature` over `op` at `caller`'s current nonce.
    fn check_signature(
        &self,
        caller: &Address,
        op: &str,
        amount: Amount,
        receiver: Address,
        signer: &Address,
        signature: &[u8],
    ) -> Result<(), FundingError> {
        let nonce = self.nonces.current(caller);
        let digest = self.operation_digest(op, amount, receiver, nonce);
        if !crypto::verify(&digest, signature, signer) {
            warn!(%caller, op, nonce, "funding signature rejected");
            return Err(FundingError::InvalidSignature);
        }
        Ok(())
    }

    // -- Open window -------------------------------------------------------

    /// Buys shares for `receiver` with `amount` of the caller's asset.
    ///
    /// The caller must have approved this engine on the asset token, and
    /// `signature` must be the manager's over
    /// `("deposit", amount, receiver, nonce_of(caller), chain_id, engine)`.
    ///
    /// # Errors
    ///
    /// Phase: [`FundingError::NotInFundingPeriod`]. Authorization:
    /// [`FundingError::InvalidSignature`]. Invariant: below minimum, zero
    /// shares, supply exhausted, non-sellable remainder. Resource: asset
    /// allowance or balance.
    pub fn deposit(
        &self,
        ctx: &ExecutionContext,
        amount: Amount,
        receiver: Address,
        signature: &[u8],
    ) -> Result<DepositQuote, FundingError> {
        let mut state = self.state.lock();
        state.ensure_open(ctx.timestamp)?;
        if receiver.is_zero() {
            return Err(FundingError::InvalidReceiver);
        }
        let quote = state.quote(amount)?;
        let manager = state.init.manager;
        self.check_signature(&ctx.caller, OP_DEPOSIT, amount, receiver, &manager, signature)?;

        let total_raised_net = state
            .total_raised_net
            .checked_add(quote.net)
            .ok_or(FundingError::Overflow)?;
        let manage_fee_accrued = state
            .manage_fee_accrued
            .checked_add(quote.fee)
            .ok_or(FundingError::Overflow)?;
        let total_asset_pulled = state
            .total_asset_pulled
            .checked_add(quote.asset_amount)
            .ok_or(FundingError::Overflow)?;

        self.asset
            .check_transfer_from(&self.address, &ctx.caller, quote.asset_amount)?;
        self.vault.check_mint(&self.address, &receiver, quote.shares)?;

        self.asset
            .transfer_from(&self.address, &ctx.caller, &self.address, quote.asset_amount)?;
        if let Err(err) = self.vault.mint(&self.address, &receiver, quote.shares) {
            if let Err(refund_err) =
                self.asset
                    .transfer(&self.address, &ctx.caller, quote.asset_amount)
            {
                warn!(caller = %ctx.caller, %refund_err, "failed to return asset after mint failure");
            }
            return Err(err.into());
        }

        state.total_raised_net = total_raised_net;
        state.manage_fee_accrued = manage_fee_accrued;
        state.total_asset_pulled = total_asset_pulled;
        state.shares_issued += quote.shares;
        let nonce = self.nonces.next(&ctx.caller);
        state.events.push(FundingEvent::Deposit {
            sender: ctx.caller,
            receiver,
            amount: quote.asset_amount,
            fee: quote.fee,
            net: quote.net,
            shares: quote.shares,
        });

        info!(
            sender = %ctx.caller,
            %receiver,
            amount = quote.asset_amount,
            fee = quote.fee,
            shares = quote.shares,
            clamped = quote.clamped,
            nonce,
            "deposit accepted"
        );
        Ok(quote)
    }

    /// Records a deposit that settled outside the chain. Only the off-chain
    /// manager may call it, with the validator's signature over
    /// `("offChainDeposit", amount, receiver, nonce_of(caller), chain_id, engine)`.
    /// Shares are priced exactly like [`deposit`](Self::deposit); no asset moves.
    pub fn offchain_deposit(
        &self,
        ctx: &ExecutionContext,
        amount: Amount,
        receiver: Address,
        signature: &[u8],
    ) -> Result<DepositQuote, FundingError> {
        let mut state = self.state.lock();
        state.ensure_open(ctx.timestamp)?;
        if ctx.caller != state.init.offchain_manager {
            return Err(FundingError::Unauthorized {
                caller: ctx.caller,
                role: "offchain manager",
            });
        }
        if receiver.is_zero() {
            return Err(FundingError::InvalidReceiver);
        }
        let quote = state.quote(amount)?;
        let validator = self.signers.validator();
        self.check_signature(
            &ctx.caller,
            OP_OFFCHAIN_DEPOSIT,
            amount,
            receiver,
            &validator,
            signature,
        )?;

        let offchain_raised_net = state
            .offchain_raised_net
            .checked_add(quote.net)
            .ok_or(FundingError::Overflow)?;
        let offchain_fee = state
            .offchain_fee
            .checked_add(quote.fee)
            .ok_or(FundingError::Overflow)?;

        self.vault.mint(&self.address, &receiver, quote.shares)?;

        state.offchain_raised_net = offchain_raised_net;
        state.offchain_fee = offchain_fee;
        state.shares_issued += quote.shares;
        let nonce = self.nonces.next(&ctx.caller);
        state.events.push(FundingEvent::OffChainDeposit {
            receiver,
            amount: quote.asset_amount,
            shares: quote.shares,
        });

        info!(%receiver, amount = quote.asset_amount, shares = quote.shares, nonce, "off-chain deposit recorded");
        Ok(quote)
    }

    // -- Failed round -------------------------------------------------------

    /// Refunds `amount` of the caller's shares after an unsuccessful round.
    ///
    /// The caller must have approved this engine on the share vault. Pays the
    /// inverse-priced asset amount plus the proportional management fee to
    /// `receiver`.
    pub fn redeem(
        &self,
        ctx: &ExecutionContext,
        amount: Amount,
        receiver: Address,
        signature: &[u8],
    ) -> Result<RefundQuote, FundingError> {
        let mut state = self.state.lock();
        state.ensure_unsuccessful(ctx.timestamp)?;
        if receiver.is_zero() {
            return Err(FundingError::InvalidReceiver);
        }
        if amount == 0 {
            return Err(FundingError::InvalidAmount);
        }
        if self.vault.balance_of(&ctx.caller) == 0 {
            return Err(FundingError::NoSharesToRedeem);
        }
        let manager = state.init.manager;
        self.check_signature(&ctx.caller, OP_REDEEM, amount, receiver, &manager, signature)?;

        let refund = state.refund_quote(amount)?;
        let payout = refund.payout();
        let custody = self.asset.balance_of(&self.address);
        if custody < payout {
            return Err(FundingError::InsufficientCustody {
                needed: payout,
                available: custody,
            });
        }
        let total_refunded = state
            .total_refunded
            .checked_add(payout)
            .ok_or(FundingError::Overflow)?;

        self.vault.burn_from(&self.address, &ctx.caller, amount)?;
        self.asset.transfer(&self.address, &receiver, payout)?;

        state.total_raised_net -= refund.asset_amount;
        state.manage_fee_accrued -= refund.fee;
        state.total_refunded = total_refunded;
        state.shares_issued = state.shares_issued.saturating_sub(amount);
        let nonce = self.nonces.next(&ctx.caller);
        state.events.push(FundingEvent::FundFailRedeem {
            sender: ctx.caller,
            receiver,
            shares: amount,
            asset_amount: refund.asset_amount,
            fee: refund.fee,
        });

        info!(sender = %ctx.caller, %receiver, shares = amount, payout, nonce, "failed-round refund paid");
        Ok(refund)
    }

    /// Burns `receiver`'s entire balance after an unsuccessful round, for
    /// positions refunded outside the chain. Only the off-chain manager may
    /// call it; the validator signs
    /// `("offChainRedeem", balance, receiver, nonce_of(caller), chain_id, engine)`.
    ///
    /// Returns the number of shares burned.
    pub fn offchain_redeem(
        &self,
        ctx: &ExecutionContext,
        receiver: Address,
        signature: &[u8],
    ) -> Result<Amount, FundingError> {
        let mut state = self.state.lock();
        state.ensure_unsuccessful(ctx.timestamp)?;
        if ctx.caller != state.init.offchain_manager {
            return Err(FundingError::Unauthorized {
                caller: ctx.caller,
                role: "offchain manager",
            });
        }
        if receiver.is_zero() {
            return Err(FundingError::InvalidReceiver);
        }
        let shares = self.vault.balance_of(&receiver);
        if shares == 0 {
            return Err(FundingError::NoSharesToRedeem);
        }
        let validator = self.signers.validator();
        self.check_signature(
            &ctx.caller,
            OP_OFFCHAIN_REDEEM,
            shares,
            receiver,
            &validator,
            signature,
        )?;
        let asset_amount =
            shares_to_assets(shares, state.init.share_price, state.init.decimals_multiplier)?;

        self.vault.burn(&self.address, &receiver, shares)?;

        state.offchain_raised_net = state.offchain_raised_net.saturating_sub(asset_amount);
        state.shares_issued = state.shares_issued.saturating_sub(shares);
        let nonce = self.nonces.next(&ctx.caller);
        state.events.push(FundingEvent::OffChainRedeem {
            receiver,
            shares,
            asset_amount,
        });

        info!(%receiver, shares, asset_amount, nonce, "off-chain redemption recorded");
        Ok(shares)
    }

    // -- Successful round ---------------------------------------------------

    /// Pays the net raise to the funding receiver. Once.
    pub fn withdraw_funding_assets(&self, ctx: &ExecutionContext) -> Result<Amount, FundingError> {
        let mut state = self.state.lock();
        state.ensure_successful(ctx.timestamp)?;
        let receiver = state.init.funding_receiver;
        if ctx.caller != receiver {
            return Err(FundingError::Unauthorized {
                caller: ctx.caller,
                role: "funding receiver",
            });
        }
        if state.funding_assets_withdrawn {
            return Err(FundingError::FundingAssetsAlreadyWithdrawn);
        }
        let amount = state.total_raised_net;
        if amount == 0 {
            return Err(FundingError::NoFundingAssets);
        }

        self.asset.transfer(&self.address, &receiver, amount)?;

        state.funding_assets_withdrawn = true;
        state.events.push(FundingEvent::FundingAssetsWithdrawn { receiver, amount });
        info!(%receiver, amount, "funding assets withdrawn");
        Ok(amount)
    }

    /// Pays the accrued management fee to the fee receiver. Once.
    pub fn withdraw_manage_fee(&self, ctx: &ExecutionContext) -> Result<Amount, FundingError> {
        let mut state = self.state.lock();
        state.ensure_successful(ctx.timestamp)?;
        let receiver = state.init.fee_receiver;
        if ctx.caller != receiver {
            return Err(FundingError::Unauthorized {
                caller: ctx.caller,
                role: "fee receiver",
            });
        }
        if state.manage_fee_withdrawn {
            return Err(FundingError::ManageFeeAlreadyWithdrawn);
        }
        let amount = state.manage_fee_accrued;
        if amount == 0 {
            return Err(FundingError::NoManageFee);
        }

        self.asset.transfer(&self.address, &receiver, amount)?;

        state.manage_fee_withdrawn = true;
        state.events.push(FundingEvent::ManageFeeWithdrawn { receiver, amount });
        info!(%receiver, amount, "manage fee withdrawn");
        Ok(amount)
    }

    /// Lifts the share-transfer pause once the round has succeeded. Anyone
    /// may trigger it; calling it again after the pause is gone is a no-op.
    pub fn unpause_token_on_funding_success(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<(), FundingError> {
        let mut state = self.state.lock();
        state.ensure_successful(ctx.timestamp)?;
        if !self.vault.transfers_paused() {
            debug!("share transfers already unpaused");
            return Ok(());
        }
        self.vault.unpause_transfers(&self.address)?;
        state.events.push(FundingEvent::TransfersUnpaused);
        info!(by = %ctx.caller, "share transfers unpaused after successful funding");
        Ok(())
    }

    // -- Administration -----------------------------------------------------

    /// Rotates the key that signs end-user deposits and refunds.
    pub fn set_manager(&self, ctx: &ExecutionContext, manager: Address) -> Result<(), FundingError> {
        self.authorizer.require(&ctx.caller, Capability::Manager)?;
        if manager.is_zero() {
            return Err(FundingError::Access(AccessError::ZeroAddress));
        }
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.init.manager, manager);
        state.events.push(FundingEvent::ManagerUpdated {
            previous,
            current: manager,
        });
        info!(%previous, current = %manager, "funding manager rotated");
        Ok(())
    }

    pub fn set_offchain_manager(
        &self,
        ctx: &ExecutionContext,
        manager: Address,
    ) -> Result<(), FundingError> {
        self.authorizer.require(&ctx.caller, Capability::Manager)?;
        if manager.is_zero() {
            return Err(FundingError::Access(AccessError::ZeroAddress));
        }
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.init.offchain_manager, manager);
        state.events.push(FundingEvent::OffChainManagerUpdated {
            previous,
            current: manager,
        });
        info!(%previous, current = %manager, "off-chain manager rotated");
        Ok(())
    }

    // -- Views ----------------------------------------------------------------

    pub fn phase(&self, now: DateTime<Utc>) -> FundingPhase {
        self.state.lock().phase(now)
    }

    pub fn is_funding_period_active(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == FundingPhase::Open
    }

    pub fn remaining_supply(&self) -> Amount {
        self.state.lock().remaining_supply()
    }

    /// Net raised on-chain plus net recorded off-chain.
    pub fn total_raised(&self) -> Amount {
        self.state.lock().total_raised()
    }

    pub fn manage_fee_accrued(&self) -> Amount {
        self.state.lock().manage_fee_accrued
    }

    pub fn nonce_of(&self, caller: &Address) -> u64 {
        self.nonces.current(caller)
    }

    /// Preview of what [`deposit`](Self::deposit) would do with `amount` now.
    pub fn quote(&self, amount: Amount) -> Result<DepositQuote, FundingError> {
        self.state.lock().quote(amount)
    }

    /// The digest a signer must sign for `op` by `caller` at its current nonce.
    pub fn signing_digest(
        &self,
        caller: &Address,
        op: &str,
        amount: Amount,
        receiver: Address,
    ) -> [u8; 32] {
        self.operation_digest(op, amount, receiver, self.nonces.current(caller))
    }

    pub fn round(&self) -> FundingRound {
        self.state.lock().snapshot()
    }

    /// Takes every event emitted since the last drain.
    pub fn drain_events(&self) -> Vec<FundingEvent> {
        std::mem::take(&mut self.state.lock().events)
    }
}

impl FundingStatus for FundingEngine {
    fn is_funding_successful(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == FundingPhase::Successful
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`FundingEngine`] from its init struct and collaborators.
pub struct FundingEngineBuilder {
    init: FundingInit,
    vault: Option<Arc<dyn ShareVault>>,
    asset: Option<Arc<dyn AssetToken>>,
    signers: Option<Arc<SignerRegistry>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl FundingEngineBuilder {
    pub fn new(init: FundingInit) -> Self {
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

    /// Validates the init struct as of `now` and wires the engine.
    pub fn build(self, now: DateTime<Utc>) -> Result<FundingEngine, FundingError> {
        self.init.validate(now)?;
        let vault = self
            .vault
            .ok_or(FundingError::InvalidConfig("missing share vault"))?;
        let asset = self
            .asset
            .ok_or(FundingError::InvalidConfig("missing asset token"))?;
        let signers = self
            .signers
            .ok_or(FundingError::InvalidConfig("missing signer registry"))?;
        let authorizer = self
            .authorizer
            .ok_or(FundingError::InvalidConfig("missing authorizer"))?;
        if vault.address() != self.init.vault {
            return Err(FundingError::InvalidConfig("vault address mismatch"));
        }
        if asset.address() != self.init.asset {
            return Err(FundingError::InvalidConfig("asset address mismatch"));
        }

        info!(
            engine = %self.init.address,
            vault = %self.init.vault,
            start = %self.init.start_time,
            end = %self.init.end_time,
            max_supply = self.init.max_supply,
            soft_cap = self.init.soft_cap,
            "funding engine initialized"
        );

        Ok(FundingEngine {
            address: self.init.address,
            chain_id: self.init.chain_id,
            vault,
            asset,
            signers,
            authorizer,
            nonces: ReplayGuard::new(),
            state: Mutex::new(FundingState {
                init: self.init,
                total_raised_net: 0,
                manage_fee_accrued: 0,
                offchain_raised_net: 0,
                offchain_fee: 0,
                shares_issued: 0,
                total_asset_pulled: 0,
                total_refunded: 0,
                funding_assets_withdrawn: false,
                manage_fee_withdrawn: false,
                events: Vec::new(),
            }),
        })
    }
}
