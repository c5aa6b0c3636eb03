// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Fundvault Protocol: Shared Primitives
//!
//! Everything the fund accounting engines share but don't own: how a
//! signature is checked, how a nonce is consumed, who is allowed to do what,
//! and what a token looks like from the outside.
//!
//! ## Architecture
//!
//! - **types**: `Address`, `Amount`, and the per-call `ExecutionContext`.
//! - **crypto**: Keccak-256, EIP-191 wrapping, secp256k1 recovery, packed payloads.
//! - **replay**: Per-key nonces. Each signature is good for exactly one call.
//! - **access**: Capabilities, the role registry, and the validator key registry.
//! - **ledger**: Asset and share token traits, balance observers, in-memory ledgers.
//! - **config**: Protocol constants and the JSON config loader.
//! - **logging**: `tracing` subscriber bootstrap for hosts and tests.
//!
//! ## Design Philosophy
//!
//! 1. If a byte ends up inside a signed payload, it's defined in exactly one place.
//! 2. Engines get capabilities injected; they never decide who is an admin.
//! 3. Balances are `u128` and every operation on them is checked. Scaled
//!    fixed-point intermediates are `U256`.
//! 4. If it touches money, it has tests. Plural.

pub mod access;
pub mod config;
pub mod crypto;
pub mod ledger;
pub mod logging;
pub mod replay;
pub mod types;

pub use types::{Address, Amount, ExecutionContext, U256};
