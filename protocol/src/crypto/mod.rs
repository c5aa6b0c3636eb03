//! # Cryptographic Primitives
//!
//! Everything signature-related the engines need, and nothing more:
//!
//! - **Keccak-256** for payload digests.
//! - **EIP-191** personal-message wrapping, because that's what wallets sign.
//! - **secp256k1 ECDSA** with public-key recovery, so a signature tells us
//!   *who* signed instead of us having to be told.
//! - **Tight packing** for the operation payloads.
//!
//! Everything here is a thin, type-safe wrapper around audited
//! implementations (`k256`, `sha3`). If you're tempted to optimize these
//! functions, please reconsider.

pub mod hash;
pub mod keys;
pub mod payload;
pub mod signatures;

pub use hash::{eth_signed_message_hash, keccak256};
pub use keys::{address_of, KeyError, RecoverableSignature, SignerKey};
pub use payload::{dividend_digest, epoch_settlement_digest, FundingOperation, PackedEncoder};
pub use signatures::{recover_signer, verify, SignatureError};
