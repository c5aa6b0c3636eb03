//! # Signed Payloads
//!
//! Canonical byte layouts for every operation that needs an off-chain
//! signature. The layout is tight packing: no length prefixes, no padding
//! between fields.
//!
//! | Field type | Encoding                      |
//! |------------|-------------------------------|
//! | string     | raw UTF-8 bytes               |
//! | uint256    | 32-byte big-endian word       |
//! | address    | 20 raw bytes                  |
//!
//! Wallet tooling that packs the same values produces the same bytes, so a
//! manager service can sign with any standard library and the engines will
//! agree. The three layouts:
//!
//! - deposit/redeem: `op, amount, receiver, nonce, chainId, contract`
//! - dividend:       `vault, amount, dividendNonce`
//! - epoch settle:   `vault, epochId, amount`

use super::hash::keccak256;
use crate::config::{HASH_OUTPUT_LENGTH, WORD_LENGTH};
use crate::types::{Address, Amount};

/// Incremental tight-packing encoder.
#[derive(Debug, Default, Clone)]
pub struct PackedEncoder {
    buf: Vec<u8>,
}

impl PackedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, value: &str) -> Self {
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    /// Appends `value` as a left-zero-padded 256-bit big-endian word.
    pub fn uint256(mut self, value: u128) -> Self {
        let mut word = [0u8; WORD_LENGTH];
        word[WORD_LENGTH - 16..].copy_from_slice(&value.to_be_bytes());
        self.buf.extend_from_slice(&word);
        self
    }

    pub fn address(mut self, value: &Address) -> Self {
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn digest(self) -> [u8; HASH_OUTPUT_LENGTH] {
        keccak256(&self.buf)
    }
}

/// An end-user or manager operation against a funding round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingOperation<'a> {
    /// Operation tag, e.g. [`crate::config::OP_DEPOSIT`].
    pub op: &'a str,
    pub amount: Amount,
    pub receiver: Address,
    pub nonce: u64,
    pub chain_id: u64,
    /// The engine the signature is scoped to.
    pub contract: Address,
}

impl FundingOperation<'_> {
    pub fn encode(&self) -> Vec<u8> {
        PackedEncoder::new()
            .string(self.op)
            .uint256(self.amount)
            .address(&self.receiver)
            .uint256(u128::from(self.nonce))
            .uint256(u128::from(self.chain_id))
            .address(&self.contract)
            .finish()
    }

    pub fn digest(&self) -> [u8; HASH_OUTPUT_LENGTH] {
        keccak256(&self.encode())
    }
}

/// `keccak256(pack(vault, amount, dividendNonce))`
pub fn dividend_digest(vault: &Address, amount: Amount, nonce: u64) -> [u8; HASH_OUTPUT_LENGTH] {
    PackedEncoder::new()
        .address(vault)
        .uint256(amount)
        .uint256(u128::from(nonce))
        .digest()
}

/// `keccak256(pack(vault, epochId, amount))`
pub fn epoch_settlement_digest(
    vault: &Address,
    epoch_id: u64,
    amount: Amount,
) -> [u8; HASH_OUTPUT_LENGTH] {
    PackedEncoder::new()
        .address(vault)
        .uint256(u128::from(epoch_id))
        .uint256(amount)
        .digest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CHAIN_ID_LOCAL, OP_DEPOSIT};

    #[test]
    fn uint256_is_left_padded_big_endian() {
        let bytes = PackedEncoder::new().uint256(0x0102).finish();
        assert_eq!(bytes.len(), 32);
        assert!(bytes[..30].iter().all(|b| *b == 0));
        assert_eq!(&bytes[30..], &[0x01, 0x02]);
    }

    #[test]
    fn funding_layout_is_tightly_packed() {
        let op = FundingOperation {
            op: OP_DEPOSIT,
            amount: 1_000,
            receiver: Address::from_low_u8(0xaa),
            nonce: 3,
            chain_id: CHAIN_ID_LOCAL,
            contract: Address::from_low_u8(0xcc),
        };
        let bytes = op.encode();

        // "deposit" + amount + receiver + nonce + chainId + contract
        assert_eq!(bytes.len(), 7 + 32 + 20 + 32 + 32 + 20);
        assert_eq!(&bytes[..7], b"deposit");
        assert_eq!(bytes[7 + 31], 0xe8); // 1000 = 0x03e8
        assert_eq!(bytes[7 + 30], 0x03);
        assert_eq!(bytes[7 + 32 + 19], 0xaa);
        assert_eq!(bytes[7 + 32 + 20 + 31], 3);
        assert_eq!(*bytes.last().unwrap(), 0xcc);
    }

    #[test]
    fn dividend_and_settlement_layouts_differ_by_field_order() {
        let vault = Address::from_low_u8(1);
        // Same numbers, swapped roles: the digests must not collide.
        assert_ne!(
            dividend_digest(&vault, 5, 9),
            epoch_settlement_digest(&vault, 5, 9)
        );
        assert_eq!(
            epoch_settlement_digest(&vault, 9, 5),
            PackedEncoder::new()
                .address(&vault)
                .uint256(9)
                .uint256(5)
                .digest()
        );
    }

    #[test]
    fn nonce_changes_digest() {
        let mut op = FundingOperation {
            op: OP_DEPOSIT,
            amount: 1,
            receiver: Address::from_low_u8(2),
            nonce: 0,
            chain_id: 1,
            contract: Address::from_low_u8(3),
        };
        let first = op.digest();
        op.nonce = 1;
        assert_ne!(first, op.digest());
    }
}
