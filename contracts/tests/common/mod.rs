//! Shared fixture for the engine integration tests.
//!
//! Wires one complete fund: a role registry, a 6-decimal asset, a 6-decimal
//! reward token, the share vault, and all three engines, plus the manager and
//! validator keys that sign for them. Shares and assets have the same
//! decimals and the share price is 1.0, so one asset unit buys one share unit
//! (minus fees).

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use fundvault_contracts::dividend::{DividendAccumulator, DividendError, DividendInit};
use fundvault_contracts::funding::{DepositQuote, FundingEngine, FundingError, FundingInit};
use fundvault_contracts::redemption::{RedemptionError, RedemptionInit, RedemptionQueue};
use fundvault_protocol::access::{Capability, RoleRegistry, SignerRegistry};
use fundvault_protocol::config::{CHAIN_ID_LOCAL, OP_DEPOSIT, SHARE_PRICE_DENOMINATOR};
use fundvault_protocol::crypto::{RecoverableSignature, SignerKey};
use fundvault_protocol::ledger::{AssetLedger, AssetToken, ShareToken, ShareTokenConfig, ShareVault};
use fundvault_protocol::logging::{try_init_logging, LogFormat};
use fundvault_protocol::{Address, Amount, ExecutionContext};

pub const ADMIN: Address = Address::from_low_u8(0x01);
pub const VAULT: Address = Address::from_low_u8(0x50);
pub const ASSET: Address = Address::from_low_u8(0xee);
pub const REWARD: Address = Address::from_low_u8(0xef);
pub const FUNDING: Address = Address::from_low_u8(0xf0);
pub const DIVIDEND: Address = Address::from_low_u8(0xd0);
pub const QUEUE: Address = Address::from_low_u8(0xa0);

pub const FUNDING_RECEIVER: Address = Address::from_low_u8(0x21);
pub const FEE_RECEIVER: Address = Address::from_low_u8(0x22);
pub const OFFCHAIN_MANAGER: Address = Address::from_low_u8(0x23);
pub const TREASURY: Address = Address::from_low_u8(0x24);
pub const SETTLER: Address = Address::from_low_u8(0x25);

pub const ALICE: Address = Address::from_low_u8(0x31);
pub const BOB: Address = Address::from_low_u8(0x32);
pub const CAROL: Address = Address::from_low_u8(0x33);

/// One whole token at 6 decimals.
pub const UNIT: Amount = 1_000_000;

/// Tunable round parameters. Everything else is fixed by the fixture.
#[derive(Debug, Clone)]
pub struct FundParams {
    pub manage_fee_bps: u32,
    pub max_supply: Amount,
    pub soft_cap: Amount,
    pub min_deposit: Amount,
    pub min_redemption_amount: Amount,
}

impl Default for FundParams {
    fn default() -> Self {
        Self {
            manage_fee_bps: 0,
            max_supply: 10_000 * UNIT,
            soft_cap: 1_000 * UNIT,
            min_deposit: UNIT,
            min_redemption_amount: UNIT,
        }
    }
}

pub struct Fund {
    pub roles: Arc<RoleRegistry>,
    pub signers: Arc<SignerRegistry>,
    pub asset: Arc<AssetLedger>,
    pub reward: Arc<AssetLedger>,
    pub shares: Arc<ShareToken>,
    pub funding: Arc<FundingEngine>,
    pub dividend: Arc<DividendAccumulator>,
    pub redemption: Arc<RedemptionQueue>,
    pub manager_key: SignerKey,
    pub validator_key: SignerKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub fn genesis() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn manager_key() -> SignerKey {
    SignerKey::from_bytes(&[0x11; 32]).unwrap()
}

pub fn validator_key() -> SignerKey {
    SignerKey::from_bytes(&[0x22; 32]).unwrap()
}

impl Fund {
    pub fn launch(params: FundParams) -> Self {
        // RUST_LOG=fundvault_contracts=debug to follow a failing test.
        try_init_logging("warn", LogFormat::Pretty);
        let start = genesis();
        let end = start + Duration::days(30);
        let manager_key = manager_key();
        let validator_key = validator_key();

        let roles = Arc::new(RoleRegistry::new(ADMIN));
        for capability in [Capability::Manager, Capability::Pause] {
            roles.grant(&ADMIN, capability, ADMIN).unwrap();
        }
        for capability in [Capability::Mint, Capability::Burn, Capability::Pause] {
            roles.grant(&ADMIN, capability, FUNDING).unwrap();
        }
        roles.grant(&ADMIN, Capability::Burn, QUEUE).unwrap();
        roles.grant(&ADMIN, Capability::Settle, SETTLER).unwrap();

        let signers = Arc::new(SignerRegistry::new(validator_key.address(), roles.clone()).unwrap());
        let asset = Arc::new(AssetLedger::new(ASSET, "USDC", 6));
        let reward = Arc::new(AssetLedger::new(REWARD, "USDT", 6));
        let shares = Arc::new(ShareToken::new(
            ShareTokenConfig {
                address: VAULT,
                name: "Fund Share".into(),
                symbol: "FUND".into(),
                decimals: 6,
                paused_on_creation: true,
                whitelist_enabled: false,
            },
            roles.clone(),
        ));

        let funding = Arc::new(
            FundingEngine::builder(FundingInit {
                address: FUNDING,
                chain_id: CHAIN_ID_LOCAL,
                vault: VAULT,
                asset: ASSET,
                start_time: start,
                end_time: end,
                max_supply: params.max_supply,
                soft_cap: params.soft_cap,
                share_price: SHARE_PRICE_DENOMINATOR,
                decimals_multiplier: 1,
                min_deposit: params.min_deposit,
                manage_fee_bps: params.manage_fee_bps,
                funding_receiver: FUNDING_RECEIVER,
                fee_receiver: FEE_RECEIVER,
                manager: manager_key.address(),
                offchain_manager: OFFCHAIN_MANAGER,
            })
            .vault(shares.clone())
            .asset(asset.clone())
            .signers(signers.clone())
            .authorizer(roles.clone())
            .build(start)
            .unwrap(),
        );

        let dividend = Arc::new(
            DividendAccumulator::builder(DividendInit {
                address: DIVIDEND,
                vault: VAULT,
                reward_token: REWARD,
                manager: ADMIN,
                dividend_treasury: TREASURY,
            })
            .vault(shares.clone())
            .reward_token(reward.clone())
            .signers(signers.clone())
            .escrow_account(QUEUE)
            .build()
            .unwrap(),
        );

        let redemption = Arc::new(
            RedemptionQueue::builder(RedemptionInit {
                address: QUEUE,
                vault: VAULT,
                asset: ASSET,
                min_redemption_amount: params.min_redemption_amount,
                start_time: None,
            })
            .vault(shares.clone())
            .asset(asset.clone())
            .signers(signers.clone())
            .authorizer(roles.clone())
            .build(start)
            .unwrap(),
        );

        shares.subscribe(&dividend);
        shares.set_funding_status(&funding);

        Self {
            roles,
            signers,
            asset,
            reward,
            shares,
            funding,
            dividend,
            redemption,
            manager_key,
            validator_key,
            start,
            end,
        }
    }

    // -- Clock ----------------------------------------------------------------

    /// A context one hour into the funding window.
    pub fn during(&self, caller: Address) -> ExecutionContext {
        ExecutionContext::new(caller, self.start + Duration::hours(1))
    }

    /// A context one day after the window closed.
    pub fn after(&self, caller: Address) -> ExecutionContext {
        ExecutionContext::new(caller, self.end + Duration::days(1))
    }

    // -- Funding --------------------------------------------------------------

    pub fn sign(key: &SignerKey, digest: [u8; 32]) -> RecoverableSignature {
        key.sign_digest(&digest).unwrap()
    }

    /// Manager signature for `op` by `caller` at its current nonce.
    pub fn manager_sig(&self, caller: &Address, op: &str, amount: Amount, receiver: Address) -> RecoverableSignature {
        let digest = self.funding.signing_digest(caller, op, amount, receiver);
        Self::sign(&self.manager_key, digest)
    }

    /// Validator signature for `op` by `caller` at its current nonce.
    pub fn validator_sig(&self, caller: &Address, op: &str, amount: Amount, receiver: Address) -> RecoverableSignature {
        let digest = self.funding.signing_digest(caller, op, amount, receiver);
        Self::sign(&self.validator_key, digest)
    }

    /// Faucets `amount` of asset to `user`, approves the funding engine and
    /// deposits on the user's own behalf.
    pub fn deposit(&self, user: Address, amount: Amount) -> Result<DepositQuote, FundingError> {
        self.asset.mint(&user, amount).unwrap();
        self.asset.approve(&user, &FUNDING, amount).unwrap();
        let sig = self.manager_sig(&user, OP_DEPOSIT, amount, user);
        self.funding.deposit(&self.during(user), amount, user, &sig)
    }

    /// Closes a successful round: lifts the transfer pause, activates the
    /// dividend pool and opens the redemption queue.
    pub fn close_successfully(&self) {
        let ctx = self.after(ADMIN);
        assert!(self.shares.is_funding_successful(ctx.timestamp), "round did not succeed");
        self.funding.unpause_token_on_funding_success(&ctx).unwrap();
        self.dividend.update_global_pool_status(&ctx, true).unwrap();
        self.redemption
            .set_start_time(&ctx, Some(self.end))
            .unwrap();
    }

    // -- Dividend -------------------------------------------------------------

    /// Funds the treasury and distributes `amount` with a validator signature.
    pub fn distribute(&self, amount: Amount) -> Result<(), DividendError> {
        self.reward.mint(&TREASURY, amount).unwrap();
        self.reward.approve(&TREASURY, &DIVIDEND, amount).unwrap();
        let sig = Self::sign(&self.validator_key, self.dividend.signing_digest(amount));
        self.dividend.distribute_dividend(&self.after(TREASURY), amount, &sig)
    }

    pub fn transfer_shares(&self, from: Address, to: Address, amount: Amount) {
        self.shares.transfer(&from, &to, amount).unwrap();
    }

    // -- Redemption -----------------------------------------------------------

    pub fn request_redemption(&self, user: Address, shares: Amount) -> Result<(), RedemptionError> {
        self.shares.approve(&user, &QUEUE, shares).unwrap();
        self.redemption.request_redemption(&self.after(user), shares)
    }

    pub fn change_epoch(&self) -> u64 {
        self.redemption.change_epoch(&self.after(ADMIN)).unwrap()
    }

    /// Funds the settler and settles `epoch_id` with a validator signature.
    pub fn settle_epoch(&self, epoch_id: u64, amount: Amount) -> Result<(), RedemptionError> {
        self.asset.mint(&SETTLER, amount).unwrap();
        self.asset.approve(&SETTLER, &QUEUE, amount).unwrap();
        let sig = Self::sign(&self.validator_key, self.redemption.signing_digest(epoch_id, amount));
        self.redemption
            .finish_redemption_epoch(&self.after(SETTLER), epoch_id, amount, &sig)
    }
}
