//! # Core Types
//!
//! The handful of value types every engine speaks: a 20-byte [`Address`],
//! the [`Amount`] alias used for both asset and share quantities, and the
//! [`ExecutionContext`] the host hands to every entry point.
//!
//! Addresses are EVM-shaped. Signed payloads embed them as raw
//! 20-byte words, and off-chain signers derive them from secp256k1 keys the
//! same way an Ethereum wallet does, so a key that signs for a fund on one
//! side produces the exact same address on the other.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::config::ADDRESS_LENGTH;

/// Token quantities, in the token's smallest unit.
///
/// `u128` covers 18-decimal tokens up to ~3.4e20 whole units, which is more
/// than any fund we intend to run. All arithmetic on it is checked.
pub type Amount = u128;

/// Wide unsigned integer for fixed-point products that outgrow [`Amount`],
/// such as a balance times a scaled dividend index.
pub use primitive_types::U256;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Errors from parsing an [`Address`].
#[derive(Debug, Error, PartialEq)]
pub enum AddressError {
    #[error("invalid address hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidLength(usize),
}

/// A 20-byte account identifier.
///
/// Displays and serializes as lowercase `0x`-prefixed hex. Parsing accepts the
/// prefix optionally and any hex case.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address. Never a valid receiver, manager, or vault.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Builds an address from a slice, e.g. the tail of a keccak digest.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, AddressError> {
        let bytes: [u8; ADDRESS_LENGTH] = slice
            .try_into()
            .map_err(|_| AddressError::InvalidLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Convenience constructor for fixtures and well-known principals: the
    /// last byte set to `tag`, everything else zero.
    pub const fn from_low_u8(tag: u8) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes[ADDRESS_LENGTH - 1] = tag;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Lowercase hex with the `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let stripped = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(stripped)?;
        Self::try_from_slice(&bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Who is calling, and when.
///
/// The host executor supplies this for every transaction it applies. Engines
/// never read the wall clock themselves: all deadline checks compare against
/// `timestamp`, which keeps replays of the same transaction log deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    /// The authenticated principal submitting the call.
    pub caller: Address,
    /// The host's notion of "now" for this transaction.
    pub timestamp: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(caller: Address, timestamp: DateTime<Utc>) -> Self {
        Self { caller, timestamp }
    }

    /// Same timestamp, different caller. Handy when one engine acts on
    /// another's behalf within a single transaction.
    pub fn with_caller(&self, caller: Address) -> Self {
        Self {
            caller,
            timestamp: self.timestamp,
        }
    }
}
