//! # Access Control
//!
//! Capability checks for privileged operations, and the shared registry of
//! signer keys.
//!
//! Engines never own a permission model. They ask an injected [`Authorizer`]
//! "does this principal hold this capability?" and act on the answer. The
//! host decides what sits behind that trait; [`RoleRegistry`] is the
//! in-process implementation used by tests and single-process deployments.
//!
//! Two unrelated notions of "manager" exist and should not be confused:
//!
//! - [`Capability::Manager`] is an RBAC grant (epoch control, key rotation).
//! - Each engine's *manager address* is a configuration field naming the
//!   key that signs end-user deposits and redemptions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    /// The principal lacks the capability the operation requires.
    #[error("{principal} is missing capability {capability}")]
    MissingCapability {
        principal: Address,
        capability: Capability,
    },

    #[error("zero address not allowed")]
    ZeroAddress,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// The fixed set of privileges the engines and the vault check for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Grants and revokes every other capability.
    Admin,
    /// Epoch advancement, start time, minimums, signer rotation.
    Manager,
    /// Pause and unpause.
    Pause,
    /// Settles redemption epochs.
    Settle,
    /// Mints shares on the vault.
    Mint,
    /// Burns shares on the vault.
    Burn,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Admin => write!(f, "ADMIN"),
            Capability::Manager => write!(f, "MANAGER"),
            Capability::Pause => write!(f, "PAUSE"),
            Capability::Settle => write!(f, "SETTLE"),
            Capability::Mint => write!(f, "MINT"),
            Capability::Burn => write!(f, "BURN"),
        }
    }
}

/// Answers capability queries. Implementations must be cheap and side-effect
/// free: engines call this inside their critical sections.
pub trait Authorizer: Send + Sync {
    fn has_capability(&self, principal: &Address, capability: Capability) -> bool;

    /// `Ok(())` if `principal` holds `capability`, otherwise the matching error.
    fn require(&self, principal: &Address, capability: Capability) -> Result<(), AccessError> {
        if self.has_capability(principal, capability) {
            Ok(())
        } else {
            Err(AccessError::MissingCapability {
                principal: *principal,
                capability,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// RoleRegistry
// ---------------------------------------------------------------------------

/// In-memory capability table. Only `Admin` holders may grant or revoke.
#[derive(Debug, Default)]
pub struct RoleRegistry {
    grants: RwLock<HashMap<Capability, HashSet<Address>>>,
}

impl RoleRegistry {
    /// Creates a registry with `admin` holding [`Capability::Admin`].
    pub fn new(admin: Address) -> Self {
        let registry = Self::default();
        registry
            .grants
            .write()
            .entry(Capability::Admin)
            .or_default()
            .insert(admin);
        registry
    }

    /// Grants `capability` to `account`. Idempotent.
    ///
    /// # Errors
    ///
    /// [`AccessError::MissingCapability`] unless `caller` is an admin.
    pub fn grant(
        &self,
        caller: &Address,
        capability: Capability,
        account: Address,
    ) -> Result<(), AccessError> {
        self.require(caller, Capability::Admin)?;
        if account.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        self.grants
            .write()
            .entry(capability)
            .or_default()
            .insert(account);
        info!(%capability, %account, granted_by = %caller, "capability granted");
        Ok(())
    }

    /// Revokes `capability` from `account`. Revoking something never granted
    /// is a no-op.
    pub fn revoke(
        &self,
        caller: &Address,
        capability: Capability,
        account: &Address,
    ) -> Result<(), AccessError> {
        self.require(caller, Capability::Admin)?;
        if let Some(holders) = self.grants.write().get_mut(&capability) {
            holders.remove(account);
        }
        info!(%capability, %account, revoked_by = %caller, "capability revoked");
        Ok(())
    }

    /// Drops one of the caller's own capabilities.
    pub fn renounce(&self, caller: &Address, capability: Capability) {
        if let Some(holders) = self.grants.write().get_mut(&capability) {
            holders.remove(caller);
        }
    }

    pub fn holders(&self, capability: Capability) -> Vec<Address> {
        let mut holders: Vec<Address> = self
            .grants
            .read()
            .get(&capability)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }
}

impl Authorizer for RoleRegistry {
    fn has_capability(&self, principal: &Address, capability: Capability) -> bool {
        self.grants
            .read()
            .get(&capability)
            .map_or(false, |holders| holders.contains(principal))
    }
}

// ---------------------------------------------------------------------------
// SignerRegistry
// ---------------------------------------------------------------------------

/// The validator key shared by every engine of a fund.
///
/// Rotation takes effect for the very next verification. Nonces already
/// issued are untouched: a signature from the old key over an unconsumed
/// nonce simply stops verifying, and the new key can sign that same nonce.
pub struct SignerRegistry {
    validator: RwLock<Address>,
    authorizer: Arc<dyn Authorizer>,
}

impl SignerRegistry {
    pub fn new(validator: Address, authorizer: Arc<dyn Authorizer>) -> Result<Self, AccessError> {
        if validator.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        Ok(Self {
            validator: RwLock::new(validator),
            authorizer,
        })
    }

    pub fn validator(&self) -> Address {
        *self.validator.read()
    }

    /// Rotates the validator key. Requires [`Capability::Manager`].
    pub fn set_validator(&self, caller: &Address, validator: Address) -> Result<(), AccessError> {
        self.authorizer.require(caller, Capability::Manager)?;
        if validator.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        let previous = std::mem::replace(&mut *self.validator.write(), validator);
        info!(%previous, current = %validator, "validator rotated");
        Ok(())
    }
}

impl fmt::Debug for SignerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerRegistry")
            .field("validator", &self.validator())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address::from_low_u8(tag)
    }

    #[test]
    fn admin_can_grant_and_revoke() {
        let roles = RoleRegistry::new(addr(1));
        roles.grant(&addr(1), Capability::Settle, addr(2)).unwrap();
        assert!(roles.has_capability(&addr(2), Capability::Settle));
        roles.revoke(&addr(1), Capability::Settle, &addr(2)).unwrap();
        assert!(!roles.has_capability(&addr(2), Capability::Settle));
    }

    #[test]
    fn non_admin_cannot_grant() {
        let roles = RoleRegistry::new(addr(1));
        let err = roles.grant(&addr(9), Capability::Mint, addr(9)).unwrap_err();
        assert_eq!(
            err,
            AccessError::MissingCapability {
                principal: addr(9),
                capability: Capability::Admin
            }
        );
    }

    #[test]
    fn renounce_drops_own_grant() {
        let roles = RoleRegistry::new(addr(1));
        roles.grant(&addr(1), Capability::Pause, addr(3)).unwrap();
        roles.renounce(&addr(3), Capability::Pause);
        assert!(roles.holders(Capability::Pause).is_empty());
    }

    #[test]
    fn validator_rotation_requires_manager() {
        let roles = Arc::new(RoleRegistry::new(addr(1)));
        let signers = SignerRegistry::new(addr(10), roles.clone()).unwrap();

        assert!(signers.set_validator(&addr(5), addr(11)).is_err());
        roles.grant(&addr(1), Capability::Manager, addr(5)).unwrap();
        signers.set_validator(&addr(5), addr(11)).unwrap();
        assert_eq!(signers.validator(), addr(11));

        assert_eq!(
            signers.set_validator(&addr(5), Address::ZERO),
            Err(AccessError::ZeroAddress)
        );
    }
}
