//! # Hashing Utilities
//!
//! Keccak-256 and the wallet "personal message" wrapper around it. These are
//! the only two hashes the signed-payload format needs:
//!
//! - **Keccak-256** over the packed payload yields the operation digest.
//! - **EIP-191** prepends `"\x19Ethereum Signed Message:\n32"` to that digest
//!   and hashes again. This is what a manager or validator wallet actually
//!   signs, so it is what we recover against.
//!
//! Note that Keccak-256 is *not* NIST SHA3-256 (different padding). Mixing
//! them up produces digests that look perfectly plausible and verify nothing.

use sha3::{Digest, Keccak256};

use crate::config::{ETH_SIGNED_MESSAGE_PREFIX, HASH_OUTPUT_LENGTH};

/// Keccak-256 of `data`.
///
/// # Example
///
/// ```
/// use fundvault_protocol::crypto::keccak256;
///
/// let digest = keccak256(b"");
/// assert_eq!(
///     hex::encode(digest),
///     "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
/// );
/// ```
pub fn keccak256(data: &[u8]) -> [u8; HASH_OUTPUT_LENGTH] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Wraps a 32-byte digest in the EIP-191 personal-message envelope.
///
/// `keccak256("\x19Ethereum Signed Message:\n32" || digest)`
pub fn eth_signed_message_hash(digest: &[u8; HASH_OUTPUT_LENGTH]) -> [u8; HASH_OUTPUT_LENGTH] {
    let mut hasher = Keccak256::new();
    hasher.update(ETH_SIGNED_MESSAGE_PREFIX);
    hasher.update(digest);
    hasher.finalize().into()
}
