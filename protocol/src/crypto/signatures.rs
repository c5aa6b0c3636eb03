//! # Signature Recovery
//!
//! Recovers the signer of a 65-byte secp256k1 signature over an EIP-191
//! wrapped digest, and compares it against the address an engine expects.
//!
//! ## Strictness
//!
//! - Exactly 65 bytes, or it's rejected before any curve math happens.
//! - `v` may be `27/28` (wallet style) or `0/1` (raw recovery id). Anything
//!   else is rejected.
//! - High-S signatures fail: k256 refuses them during the post-recovery
//!   verification, which closes the classic malleability hole where one
//!   signature has two valid encodings.
//!
//! Errors are intentionally vague. A caller learns "this signature is not
//! from the expected signer", never which byte was wrong.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

use super::hash::eth_signed_message_hash;
use super::keys::address_of;
use crate::config::{HASH_OUTPUT_LENGTH, RECOVERY_ID_OFFSET, SIGNATURE_LENGTH};
use crate::types::Address;

/// Errors during signature recovery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature length: expected 65 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid signature recovery byte")]
    InvalidRecoveryId,

    #[error("malformed signature")]
    Malformed,

    #[error("signature recovery failed")]
    RecoveryFailed,
}

/// Recovers the address that signed `digest` (before EIP-191 wrapping).
pub fn recover_signer(
    digest: &[u8; HASH_OUTPUT_LENGTH],
    signature: &[u8],
) -> Result<Address, SignatureError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidLength(signature.len()));
    }

    let v = signature[64];
    let v = if v >= RECOVERY_ID_OFFSET {
        v - RECOVERY_ID_OFFSET
    } else {
        v
    };
    if v > 1 {
        return Err(SignatureError::InvalidRecoveryId);
    }
    let recovery_id = RecoveryId::from_byte(v).ok_or(SignatureError::InvalidRecoveryId)?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| SignatureError::Malformed)?;

    let prehash = eth_signed_message_hash(digest);
    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(address_of(&verifying_key))
}

/// Returns `true` iff `signature` over `digest` recovers to `expected`.
///
/// A zero `expected` never verifies; an unset signer slot must not turn
/// into "anything goes".
pub fn verify(digest: &[u8; HASH_OUTPUT_LENGTH], signature: &[u8], expected: &Address) -> bool {
    if expected.is_zero() {
        return false;
    }
    matches!(recover_signer(digest, signature), Ok(signer) if signer == *expected)
}
