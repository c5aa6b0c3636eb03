//! # Protocol Configuration & Constants
//!
//! Every magic number the engines agree on lives here. The pricing and
//! payload constants are part of the signed-message format: a manager key
//! signing off-chain and an engine verifying on-chain must agree on them to
//! the bit, so treat changes here as breaking.
//!
//! The bottom of the file has the small JSON loader used to read engine init
//! structs from disk.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

// ---------------------------------------------------------------------------
// Encoding Widths
// ---------------------------------------------------------------------------

/// Account identifiers are 20 bytes, EVM style.
pub const ADDRESS_LENGTH: usize = 20;

/// Width of a packed `uint256` word.
pub const WORD_LENGTH: usize = 32;

/// Keccak-256 digest length.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Recoverable secp256k1 signature: `r || s || v`. Always 65 bytes.
pub const SIGNATURE_LENGTH: usize = 65;

/// Offset added to the recovery id in the `v` byte (27 or 28 on the wire).
pub const RECOVERY_ID_OFFSET: u8 = 27;

/// The personal-message prefix wallets prepend before signing a 32-byte digest.
pub const ETH_SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Fees are expressed in basis points of this denominator.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Share prices carry 8 decimals: a price of `100_000_000` means one asset
/// unit (after decimal alignment) buys one share.
pub const SHARE_PRICE_DENOMINATOR: u128 = 100_000_000;

/// Fixed-point scale of the dividend-per-share index. 1e18 keeps rounding
/// loss below one reward unit per holder for any realistic supply.
pub const DIVIDEND_INDEX_SCALE: u128 = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Signed Operations
// ---------------------------------------------------------------------------

/// Operation tags embedded as raw UTF-8 in deposit/redeem payloads.
pub const OP_DEPOSIT: &str = "deposit";
pub const OP_REDEEM: &str = "redeem";
pub const OP_OFFCHAIN_DEPOSIT: &str = "offChainDeposit";
pub const OP_OFFCHAIN_REDEEM: &str = "offChainRedeem";

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

/// Ethereum mainnet.
pub const CHAIN_ID_MAINNET: u64 = 1;

/// Sepolia. Where we break things on purpose and call it "testing."
pub const CHAIN_ID_SEPOLIA: u64 = 11_155_111;

/// Local development chains (hardhat/anvil).
pub const CHAIN_ID_LOCAL: u64 = 31_337;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads and deserializes a JSON config file.
///
/// Used by hosts to load engine init structs; the error carries the path so
/// a typo in a deployment manifest is obvious from the log line alone.
pub fn load_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
