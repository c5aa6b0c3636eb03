//! # Replay Guard
//!
//! Per-key monotonically increasing nonces. A signature is only ever valid
//! for the key's *current* nonce, and that nonce is consumed exactly once.
//!
//! Reading and consuming are separate steps: an engine reads
//! [`ReplayGuard::current`], builds the payload with it, verifies the
//! signature, runs every other check, and only then calls
//! [`ReplayGuard::next`]. A rejected call therefore leaves the nonce where it
//! was, and the signer can retry with the same signature once the blocking
//! condition clears.
//!
//! Keys are whatever the engine scopes nonces by: caller addresses for
//! deposits and redemptions, the vault address for dividend distributions.

use std::hash::Hash;

use dashmap::DashMap;

/// Nonce table keyed by `K`. Unknown keys start at zero.
#[derive(Debug)]
pub struct ReplayGuard<K: Eq + Hash> {
    nonces: DashMap<K, u64>,
}

impl<K: Eq + Hash> Default for ReplayGuard<K> {
    fn default() -> Self {
        Self {
            nonces: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> ReplayGuard<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The nonce the next signature for `key` must cover.
    pub fn current(&self, key: &K) -> u64 {
        self.nonces.get(key).map(|n| *n).unwrap_or(0)
    }

    /// Returns the current nonce for `key` and advances it by one.
    ///
    /// The returned value is the one the consumed signature covered.
    pub fn next(&self, key: &K) -> u64 {
        let mut entry = self.nonces.entry(key.clone()).or_insert(0);
        let consumed = *entry;
        *entry = consumed.saturating_add(1);
        consumed
    }

    /// Number of keys that have consumed at least one nonce.
    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }
}
