//! Integration tests for the funding engine.
//!
//! Every test runs against the full fixture in `common`, so share minting,
//! asset custody and the dividend hook are all real.

mod common;

use chrono::Duration;
use common::*;
use fundvault_contracts::error::ErrorKind;
use fundvault_contracts::funding::{FundingError, FundingEvent, FundingPhase};
use fundvault_protocol::config::{OP_DEPOSIT, OP_OFFCHAIN_DEPOSIT, OP_OFFCHAIN_REDEEM, OP_REDEEM};
use fundvault_protocol::ledger::{AssetToken, LedgerError, ShareVault};
use fundvault_protocol::ExecutionContext;

// ---------------------------------------------------------------------------
// Deposits
// ---------------------------------------------------------------------------

#[test]
fn deposit_splits_fee_and_mints_net_shares() {
    let fund = Fund::launch(FundParams {
        manage_fee_bps: 1_000,
        min_deposit: 1,
        ..FundParams::default()
    });

    let quote = fund.deposit(ALICE, 1_000).unwrap();
    assert_eq!(quote.fee, 100);
    assert_eq!(quote.net, 900);
    assert_eq!(quote.shares, 900);
    assert!(!quote.clamped);

    assert_eq!(fund.shares.balance_of(&ALICE), 900);
    assert_eq!(fund.funding.manage_fee_accrued(), 100);
    assert_eq!(fund.funding.total_raised(), 900);
    assert_eq!(fund.asset.balance_of(&FUNDING), 1_000);
    assert_eq!(fund.funding.nonce_of(&ALICE), 1);
}

#[test]
fn deposit_past_remaining_supply_is_clamped() {
    let fund = Fund::launch(FundParams {
        max_supply: 1_500,
        soft_cap: 1_000,
        min_deposit: 100,
        ..FundParams::default()
    });

    fund.deposit(ALICE, 1_000).unwrap();
    assert_eq!(fund.funding.remaining_supply(), 500);

    let quote = fund.deposit(BOB, 800).unwrap();
    assert!(quote.clamped);
    assert_eq!(quote.shares, 500);
    assert_eq!(quote.asset_amount, 500);

    assert_eq!(fund.shares.balance_of(&BOB), 500);
    assert_eq!(fund.asset.balance_of(&BOB), 300, "only the clamped amount is pulled");
    assert_eq!(fund.funding.remaining_supply(), 0);
    assert_eq!(fund.asset.balance_of(&FUNDING), 1_500);

    let err = fund.deposit(CAROL, 100).unwrap_err();
    assert_eq!(err, FundingError::SupplyExhausted);
}

#[test]
fn deposit_leaving_unsellable_remainder_is_rejected() {
    let fund = Fund::launch(FundParams {
        max_supply: 1_500,
        soft_cap: 1_000,
        min_deposit: 100,
        ..FundParams::default()
    });

    let err = fund.deposit(ALICE, 1_450).unwrap_err();
    assert!(matches!(
        err,
        FundingError::RemainingSupplyNotSellable {
            remaining_after: 50,
            minimum_purchase: 100
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Invariant);

    // Nothing moved and the signature is still good for the next attempt.
    assert_eq!(fund.shares.balance_of(&ALICE), 0);
    assert_eq!(fund.asset.balance_of(&ALICE), 1_450);
    assert_eq!(fund.funding.nonce_of(&ALICE), 0);

    // Buying out the whole supply is fine.
    let quote = fund.deposit(ALICE, 1_500).unwrap();
    assert_eq!(quote.shares, 1_500);
}

#[test]
fn deposit_below_minimum_is_rejected() {
    let fund = Fund::launch(FundParams::default());
    let err = fund.deposit(ALICE, UNIT - 1).unwrap_err();
    assert_eq!(
        err,
        FundingError::BelowMinimumDeposit {
            amount: UNIT - 1,
            minimum: UNIT
        }
    );
}

#[test]
fn deposit_outside_window_is_a_phase_error() {
    let fund = Fund::launch(FundParams::default());
    fund.asset.mint(&ALICE, 10 * UNIT).unwrap();
    fund.asset.approve(&ALICE, &FUNDING, 10 * UNIT).unwrap();
    let sig = fund.manager_sig(&ALICE, OP_DEPOSIT, 10 * UNIT, ALICE);

    let early = ExecutionContext::new(ALICE, fund.start - Duration::seconds(1));
    let err = fund.funding.deposit(&early, 10 * UNIT, ALICE, &sig).unwrap_err();
    assert_eq!(err, FundingError::NotInFundingPeriod);
    assert!(err.is_retryable());

    let late = ExecutionContext::new(ALICE, fund.end);
    let err = fund.funding.deposit(&late, 10 * UNIT, ALICE, &sig).unwrap_err();
    assert_eq!(err, FundingError::NotInFundingPeriod);
}

#[test]
fn deposit_without_allowance_is_a_resource_error() {
    let fund = Fund::launch(FundParams::default());
    fund.asset.mint(&ALICE, 10 * UNIT).unwrap();
    let sig = fund.manager_sig(&ALICE, OP_DEPOSIT, 10 * UNIT, ALICE);

    let err = fund
        .funding
        .deposit(&fund.during(ALICE), 10 * UNIT, ALICE, &sig)
        .unwrap_err();
    assert!(matches!(
        err,
        FundingError::Ledger(LedgerError::InsufficientAllowance { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.to_string(), "insufficient allowance");
    assert_eq!(fund.funding.nonce_of(&ALICE), 0);
}

#[test]
fn deposit_to_zero_receiver_is_rejected() {
    let fund = Fund::launch(FundParams::default());
    let sig = fund.manager_sig(&ALICE, OP_DEPOSIT, UNIT, fundvault_protocol::Address::ZERO);
    let err = fund
        .funding
        .deposit(&fund.during(ALICE), UNIT, fundvault_protocol::Address::ZERO, &sig)
        .unwrap_err();
    assert_eq!(err, FundingError::InvalidReceiver);
}

// ---------------------------------------------------------------------------
// Signatures and replay
// ---------------------------------------------------------------------------

#[test]
fn deposit_signature_cannot_be_replayed() {
    let fund = Fund::launch(FundParams::default());
    let amount = 10 * UNIT;
    fund.asset.mint(&ALICE, 2 * amount).unwrap();
    fund.asset.approve(&ALICE, &FUNDING, 2 * amount).unwrap();
    let sig = fund.manager_sig(&ALICE, OP_DEPOSIT, amount, ALICE);

    fund.funding
        .deposit(&fund.during(ALICE), amount, ALICE, &sig)
        .unwrap();
    let err = fund
        .funding
        .deposit(&fund.during(ALICE), amount, ALICE, &sig)
        .unwrap_err();
    assert_eq!(err, FundingError::InvalidSignature);
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(fund.shares.balance_of(&ALICE), amount);
}

#[test]
fn signature_is_bound_to_amount_receiver_and_nonce() {
    let fund = Fund::launch(FundParams::default());
    let amount = 10 * UNIT;
    fund.asset.mint(&BOB, amount * 3).unwrap();
    fund.asset.approve(&BOB, &FUNDING, amount * 3).unwrap();

    let sig = fund.manager_sig(&BOB, OP_DEPOSIT, amount, BOB);
    assert_eq!(
        fund.funding
            .deposit(&fund.during(BOB), amount * 2, BOB, &sig)
            .unwrap_err(),
        FundingError::InvalidSignature
    );
    assert_eq!(
        fund.funding
            .deposit(&fund.during(BOB), amount, CAROL, &sig)
            .unwrap_err(),
        FundingError::InvalidSignature
    );

    // Alice has never deposited, so her nonce is still 0; Bob's moves to 1.
    fund.funding
        .deposit(&fund.during(BOB), amount, BOB, &sig)
        .unwrap();
    let stale = sig;
    assert_eq!(
        fund.funding
            .deposit(&fund.during(BOB), amount, BOB, &stale)
            .unwrap_err(),
        FundingError::InvalidSignature
    );
    assert_eq!(fund.funding.nonce_of(&BOB), 1);
    assert_eq!(fund.funding.nonce_of(&ALICE), 0);
}

#[test]
fn deposit_signed_by_validator_is_rejected() {
    let fund = Fund::launch(FundParams::default());
    fund.asset.mint(&ALICE, UNIT).unwrap();
    fund.asset.approve(&ALICE, &FUNDING, UNIT).unwrap();
    let sig = fund.validator_sig(&ALICE, OP_DEPOSIT, UNIT, ALICE);
    let err = fund
        .funding
        .deposit(&fund.during(ALICE), UNIT, ALICE, &sig)
        .unwrap_err();
    assert_eq!(err, FundingError::InvalidSignature);
}

#[test]
fn manager_rotation_takes_effect_immediately() {
    let fund = Fund::launch(FundParams::default());
    let new_manager = fundvault_protocol::crypto::SignerKey::from_bytes(&[0x33; 32]).unwrap();
    fund.funding
        .set_manager(&fund.during(ADMIN), new_manager.address())
        .unwrap();

    fund.asset.mint(&ALICE, UNIT).unwrap();
    fund.asset.approve(&ALICE, &FUNDING, UNIT).unwrap();
    let stale = fund.manager_sig(&ALICE, OP_DEPOSIT, UNIT, ALICE);
    assert_eq!(
        fund.funding
            .deposit(&fund.during(ALICE), UNIT, ALICE, &stale)
            .unwrap_err(),
        FundingError::InvalidSignature
    );

    let digest = fund.funding.signing_digest(&ALICE, OP_DEPOSIT, UNIT, ALICE);
    let fresh = Fund::sign(&new_manager, digest);
    fund.funding
        .deposit(&fund.during(ALICE), UNIT, ALICE, &fresh)
        .unwrap();
}

#[test]
fn manager_rotation_requires_capability() {
    let fund = Fund::launch(FundParams::default());
    let err = fund
        .funding
        .set_manager(&fund.during(ALICE), BOB)
        .unwrap_err();
    assert!(matches!(err, FundingError::Access(_)));
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

// ---------------------------------------------------------------------------
// Conservation
// ---------------------------------------------------------------------------

#[test]
fn raised_plus_fees_equals_assets_pulled() {
    let fund = Fund::launch(FundParams {
        manage_fee_bps: 250,
        ..FundParams::default()
    });
    let deposits = [
        (ALICE, 1_234 * UNIT + 17),
        (BOB, 777 * UNIT + 3),
        (CAROL, 5 * UNIT + 999_999),
        (ALICE, 42 * UNIT),
    ];
    let mut minted = 0;
    for (user, amount) in deposits {
        minted += fund.deposit(user, amount).unwrap().shares;
    }

    assert_eq!(
        fund.funding.total_raised() + fund.funding.manage_fee_accrued(),
        fund.asset.balance_of(&FUNDING)
    );
    assert_eq!(fund.shares.total_supply(), minted);
    assert_eq!(fund.funding.round().shares_issued, minted);
}

// ---------------------------------------------------------------------------
// Off-chain flow
// ---------------------------------------------------------------------------

#[test]
fn offchain_deposit_counts_toward_soft_cap_but_not_custody() {
    let fund = Fund::launch(FundParams::default());
    let amount = 1_000 * UNIT;
    let sig = fund.validator_sig(&OFFCHAIN_MANAGER, OP_OFFCHAIN_DEPOSIT, amount, CAROL);
    fund.funding
        .offchain_deposit(&fund.during(OFFCHAIN_MANAGER), amount, CAROL, &sig)
        .unwrap();

    assert_eq!(fund.shares.balance_of(&CAROL), amount);
    assert_eq!(fund.asset.balance_of(&FUNDING), 0);
    assert_eq!(fund.funding.total_raised(), amount);
    assert_eq!(fund.funding.phase(fund.end), FundingPhase::Successful);

    let err = fund
        .funding
        .withdraw_funding_assets(&fund.after(FUNDING_RECEIVER))
        .unwrap_err();
    assert_eq!(err, FundingError::NoFundingAssets);
}

#[test]
fn offchain_deposit_requires_offchain_manager_and_validator() {
    let fund = Fund::launch(FundParams::default());
    let sig = fund.validator_sig(&ALICE, OP_OFFCHAIN_DEPOSIT, UNIT, ALICE);
    assert!(matches!(
        fund.funding
            .offchain_deposit(&fund.during(ALICE), UNIT, ALICE, &sig)
            .unwrap_err(),
        FundingError::Unauthorized { .. }
    ));

    let manager_signed = fund.manager_sig(&OFFCHAIN_MANAGER, OP_OFFCHAIN_DEPOSIT, UNIT, ALICE);
    assert_eq!(
        fund.funding
            .offchain_deposit(&fund.during(OFFCHAIN_MANAGER), UNIT, ALICE, &manager_signed)
            .unwrap_err(),
        FundingError::InvalidSignature
    );
}

#[test]
fn offchain_redeem_burns_entire_balance_after_failure() {
    let fund = Fund::launch(FundParams::default());
    let amount = 100 * UNIT;
    let sig = fund.validator_sig(&OFFCHAIN_MANAGER, OP_OFFCHAIN_DEPOSIT, amount, CAROL);
    fund.funding
        .offchain_deposit(&fund.during(OFFCHAIN_MANAGER), amount, CAROL, &sig)
        .unwrap();

    let ctx = fund.after(OFFCHAIN_MANAGER);
    assert_eq!(fund.funding.phase(ctx.timestamp), FundingPhase::Unsuccessful);
    let sig = fund.validator_sig(&OFFCHAIN_MANAGER, OP_OFFCHAIN_REDEEM, amount, CAROL);
    let burned = fund.funding.offchain_redeem(&ctx, CAROL, &sig).unwrap();

    assert_eq!(burned, amount);
    assert_eq!(fund.shares.balance_of(&CAROL), 0);
    assert_eq!(fund.shares.total_supply(), 0);

    let sig = fund.validator_sig(&OFFCHAIN_MANAGER, OP_OFFCHAIN_REDEEM, 0, CAROL);
    assert_eq!(
        fund.funding.offchain_redeem(&ctx, CAROL, &sig).unwrap_err(),
        FundingError::NoSharesToRedeem
    );
}

// ---------------------------------------------------------------------------
// Failed round
// ---------------------------------------------------------------------------

#[test]
fn failed_round_refunds_net_plus_proportional_fee() {
    let fund = Fund::launch(FundParams {
        manage_fee_bps: 1_000,
        soft_cap: 5_000 * UNIT,
        ..FundParams::default()
    });
    fund.deposit(ALICE, 1_000 * UNIT).unwrap();
    let shares = fund.shares.balance_of(&ALICE);
    assert_eq!(shares, 900 * UNIT);

    let ctx = fund.after(ALICE);
    assert_eq!(fund.funding.phase(ctx.timestamp), FundingPhase::Unsuccessful);
    assert!(!fund.shares.is_funding_successful(ctx.timestamp));

    fund.shares.approve(&ALICE, &FUNDING, shares).unwrap();
    let sig = fund.manager_sig(&ALICE, OP_REDEEM, shares, ALICE);
    let refund = fund.funding.redeem(&ctx, shares, ALICE, &sig).unwrap();

    assert_eq!(refund.asset_amount, 900 * UNIT);
    assert_eq!(refund.fee, 90 * UNIT);
    assert_eq!(fund.asset.balance_of(&ALICE), 990 * UNIT);
    assert_eq!(fund.shares.balance_of(&ALICE), 0);
    assert_eq!(fund.funding.total_raised(), 0);
    assert_eq!(fund.funding.manage_fee_accrued(), 10 * UNIT);
    assert_eq!(fund.asset.balance_of(&FUNDING), 10 * UNIT);

    let events = fund.funding.drain_events();
    assert!(matches!(events.last(), Some(FundingEvent::FundFailRedeem { .. })));
}

#[test]
fn redeem_requires_share_allowance() {
    let fund = Fund::launch(FundParams {
        soft_cap: 5_000 * UNIT,
        ..FundParams::default()
    });
    fund.deposit(ALICE, 100 * UNIT).unwrap();
    let ctx = fund.after(ALICE);
    let sig = fund.manager_sig(&ALICE, OP_REDEEM, 100 * UNIT, ALICE);
    let err = fund.funding.redeem(&ctx, 100 * UNIT, ALICE, &sig).unwrap_err();
    assert!(matches!(
        err,
        FundingError::Ledger(LedgerError::InsufficientAllowance { .. })
    ));
    assert_eq!(fund.shares.balance_of(&ALICE), 100 * UNIT);
    assert_eq!(fund.funding.nonce_of(&ALICE), 1, "only the deposit consumed a nonce");
}

#[test]
fn redeem_is_rejected_in_the_wrong_phase() {
    let fund = Fund::launch(FundParams::default());
    fund.deposit(ALICE, 1_000 * UNIT).unwrap();
    let sig = fund.manager_sig(&ALICE, OP_REDEEM, UNIT, ALICE);

    assert_eq!(
        fund.funding
            .redeem(&fund.during(ALICE), UNIT, ALICE, &sig)
            .unwrap_err(),
        FundingError::FundingNotEnded
    );
    assert_eq!(
        fund.funding
            .redeem(&fund.after(ALICE), UNIT, ALICE, &sig)
            .unwrap_err(),
        FundingError::FundingWasSuccessful
    );
}

// ---------------------------------------------------------------------------
// Successful round
// ---------------------------------------------------------------------------

#[test]
fn withdrawals_pay_out_once_each() {
    let fund = Fund::launch(FundParams {
        manage_fee_bps: 500,
        ..FundParams::default()
    });
    fund.deposit(ALICE, 2_000 * UNIT).unwrap();

    assert_eq!(
        fund.funding
            .withdraw_funding_assets(&fund.during(FUNDING_RECEIVER))
            .unwrap_err(),
        FundingError::FundingNotEnded
    );
    assert!(matches!(
        fund.funding
            .withdraw_funding_assets(&fund.after(ALICE))
            .unwrap_err(),
        FundingError::Unauthorized { .. }
    ));

    let paid = fund
        .funding
        .withdraw_funding_assets(&fund.after(FUNDING_RECEIVER))
        .unwrap();
    assert_eq!(paid, 1_900 * UNIT);
    assert_eq!(fund.asset.balance_of(&FUNDING_RECEIVER), 1_900 * UNIT);
    assert_eq!(
        fund.funding
            .withdraw_funding_assets(&fund.after(FUNDING_RECEIVER))
            .unwrap_err(),
        FundingError::FundingAssetsAlreadyWithdrawn
    );

    let fee = fund
        .funding
        .withdraw_manage_fee(&fund.after(FEE_RECEIVER))
        .unwrap();
    assert_eq!(fee, 100 * UNIT);
    assert_eq!(
        fund.funding
            .withdraw_manage_fee(&fund.after(FEE_RECEIVER))
            .unwrap_err(),
        FundingError::ManageFeeAlreadyWithdrawn
    );
    assert_eq!(fund.asset.balance_of(&FUNDING), 0);
}

#[test]
fn withdrawals_fail_after_unsuccessful_round() {
    let fund = Fund::launch(FundParams {
        soft_cap: 5_000 * UNIT,
        ..FundParams::default()
    });
    fund.deposit(ALICE, 100 * UNIT).unwrap();
    let err = fund
        .funding
        .withdraw_funding_assets(&fund.after(FUNDING_RECEIVER))
        .unwrap_err();
    assert_eq!(err, FundingError::FundingNotSuccessful);
    assert_eq!(err.kind(), ErrorKind::Phase);
}

#[test]
fn unpause_on_success_is_permissionless_and_idempotent() {
    let fund = Fund::launch(FundParams::default());
    fund.deposit(ALICE, 1_000 * UNIT).unwrap();
    assert!(fund.shares.transfers_paused());
    assert!(matches!(
        fund.shares.transfer(&ALICE, &BOB, UNIT).unwrap_err(),
        LedgerError::TransfersPaused
    ));

    assert_eq!(
        fund.funding
            .unpause_token_on_funding_success(&fund.during(CAROL))
            .unwrap_err(),
        FundingError::FundingNotEnded
    );

    fund.funding
        .unpause_token_on_funding_success(&fund.after(CAROL))
        .unwrap();
    assert!(!fund.shares.transfers_paused());
    fund.funding
        .unpause_token_on_funding_success(&fund.after(BOB))
        .unwrap();

    fund.shares.transfer(&ALICE, &BOB, UNIT).unwrap();
    assert_eq!(fund.shares.balance_of(&BOB), UNIT);
}
