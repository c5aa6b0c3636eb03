//! # Signer Keys
//!
//! secp256k1 signing keys for the off-chain side of the protocol: the
//! manager and validator services that authorize deposits, redemptions,
//! dividend distributions and epoch settlements.
//!
//! The engines themselves never hold a private key. They only recover
//! addresses from signatures (see [`super::signatures`]). [`SignerKey`]
//! exists so operators, tests, and benches can produce signatures in exactly
//! the format the engines accept.

use std::fmt;

use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{CryptoRngCore, OsRng};
use thiserror::Error;

use super::hash::{eth_signed_message_hash, keccak256};
use crate::config::{HASH_OUTPUT_LENGTH, RECOVERY_ID_OFFSET, SIGNATURE_LENGTH};
use crate::types::Address;

/// Errors from key construction or signing.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid secret key hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("signing failed")]
    SigningFailed,
}

/// A 65-byte recoverable signature: `r || s || v`, with `v ∈ {27, 28}`.
pub type RecoverableSignature = [u8; SIGNATURE_LENGTH];

/// A secp256k1 signing key with its derived address.
///
/// Deliberately not `Serialize`: secret keys don't go in JSON blobs. Use
/// [`SignerKey::to_bytes`] if you really mean to export one.
#[derive(Clone)]
pub struct SignerKey {
    signing_key: SigningKey,
    address: Address,
}

impl SignerKey {
    /// Generates a fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    /// Generates a key from the supplied RNG.
    pub fn generate_with(rng: &mut impl CryptoRngCore) -> Self {
        Self::from_signing_key(SigningKey::random(rng))
    }

    /// Loads a key from its 32-byte big-endian scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Loads a key from hex (with or without `0x`).
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        Self::from_bytes(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// The EVM address controlled by this key.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Signs a 32-byte operation digest the way a wallet's `personal_sign`
    /// would: EIP-191 envelope first, then recoverable ECDSA.
    ///
    /// The result is always low-S.
    pub fn sign_digest(
        &self,
        digest: &[u8; HASH_OUTPUT_LENGTH],
    ) -> Result<RecoverableSignature, KeyError> {
        let prehash = eth_signed_message_hash(digest);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&prehash)
            .map_err(|_| KeyError::SigningFailed)?;

        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte() + RECOVERY_ID_OFFSET;
        Ok(out)
    }

    /// Hashes an already-packed payload and signs it.
    pub fn sign_payload(&self, payload: &[u8]) -> Result<RecoverableSignature, KeyError> {
        self.sign_digest(&keccak256(payload))
    }
}

impl fmt::Debug for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Derives the EVM address of a public key: the last 20 bytes of the
/// keccak of the uncompressed point (without the `0x04` tag).
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let point = verifying_key.as_affine().to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known hardhat account #0.
    const HARDHAT_KEY_0: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const HARDHAT_ADDR_0: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn derives_known_address() {
        let key = SignerKey::from_hex(HARDHAT_KEY_0).unwrap();
        assert_eq!(key.address().to_hex(), HARDHAT_ADDR_0);
    }

    #[test]
    fn roundtrip_secret_bytes() {
        let key = SignerKey::generate();
        let restored = SignerKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key.address(), restored.address());
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let a = SignerKey::generate_with(&mut StdRng::seed_from_u64(9));
        let b = SignerKey::generate_with(&mut StdRng::seed_from_u64(9));
        let c = SignerKey::generate_with(&mut StdRng::seed_from_u64(10));
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), c.address());
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(SignerKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn signature_has_wallet_v_byte() {
        let key = SignerKey::generate();
        let sig = key.sign_payload(b"deposit").unwrap();
        assert!(sig[64] == 27 || sig[64] == 28);
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let key = SignerKey::from_hex(HARDHAT_KEY_0).unwrap();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(HARDHAT_KEY_0));
        assert!(rendered.contains(HARDHAT_ADDR_0));
    }
}
