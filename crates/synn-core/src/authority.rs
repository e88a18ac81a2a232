use crate::error::AuthorityError;
use crate::interfaces::{Address, AuthorityNode, AuthorityProvider};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct AuthorityEntry {
    node: AuthorityNode,
    stake: u64,
}

/// Static validator registry for permissioned deployments and tests.
///
/// Authorities keep their registration order for life; deregistering or
/// slashing one flips its flag rather than removing it, so vote indexes stay
/// stable. An authority whose stake drops below the minimum is deactivated.
#[derive(Debug)]
pub struct StaticAuthority {
    own_keys: HashMap<String, Vec<u8>>,
    entries: RwLock<Vec<AuthorityEntry>>,
    loan_pool: Address,
    min_stake: u64,
}

impl StaticAuthority {
    pub fn new(loan_pool: Address) -> Self {
        StaticAuthority {
            own_keys: HashMap::new(),
            entries: RwLock::new(Vec::new()),
            loan_pool,
            min_stake: 1,
        }
    }

    /// Smallest stake an active authority may hold. Zero is treated as 1.
    pub fn with_min_stake(mut self, min_stake: u64) -> Self {
        self.min_stake = min_stake.max(1);
        self
    }

    pub fn min_stake(&self) -> u64 {
        self.min_stake
    }

    /// Set this node's public key for `role`.
    pub fn with_own_key(mut self, role: &str, pub_key: Vec<u8>) -> Self {
        self.own_keys.insert(role.to_string(), pub_key);
        self
    }

    /// Register an active authority. Returns its index.
    pub fn register(&self, pub_key: Vec<u8>, stake: u64) -> Result<u32, AuthorityError> {
        if stake < self.min_stake {
            return Err(AuthorityError::BelowMinimumStake {
                stake,
                min: self.min_stake,
            });
        }
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.node.pub_key == pub_key) {
            return Err(AuthorityError::AlreadyRegistered(hex::encode(&pub_key)));
        }
        entries.push(AuthorityEntry {
            node: AuthorityNode {
                pub_key,
                active: true,
            },
            stake,
        });
        Ok((entries.len() - 1) as u32)
    }

    pub fn set_active(&self, pub_key: &[u8], active: bool) -> Result<(), AuthorityError> {
        let mut entries = self.entries.write();
        let entry = find_mut(&mut entries, pub_key)?;
        entry.node.active = active;
        log::info!(
            "authority {} is now {}",
            hex::encode(pub_key),
            if active { "active" } else { "inactive" }
        );
        Ok(())
    }

    /// Deactivate an authority and release its stake. Returns the released amount.
    pub fn deregister(&self, pub_key: &[u8]) -> Result<u64, AuthorityError> {
        let mut entries = self.entries.write();
        let entry = find_mut(&mut entries, pub_key)?;
        let released = std::mem::take(&mut entry.stake);
        entry.node.active = false;
        log::info!("authority {} deregistered, released stake {}", hex::encode(pub_key), released);
        Ok(released)
    }

    /// Add `amount` to an authority's stake. Returns the new stake.
    ///
    /// Topping up does not reactivate an authority; use `set_active` for that.
    pub fn stake(&self, pub_key: &[u8], amount: u64) -> Result<u64, AuthorityError> {
        if amount == 0 {
            return Err(AuthorityError::ZeroAmount);
        }
        let mut entries = self.entries.write();
        let entry = find_mut(&mut entries, pub_key)?;
        entry.stake = entry.stake.saturating_add(amount);
        log::debug!("authority {} staked {} (total {})", hex::encode(pub_key), amount, entry.stake);
        Ok(entry.stake)
    }

    /// Withdraw `amount` of an authority's stake. Returns the remaining stake.
    pub fn unstake(&self, pub_key: &[u8], amount: u64) -> Result<u64, AuthorityError> {
        if amount == 0 {
            return Err(AuthorityError::ZeroAmount);
        }
        let mut entries = self.entries.write();
        let entry = find_mut(&mut entries, pub_key)?;
        if amount > entry.stake {
            return Err(AuthorityError::InsufficientStake {
                have: entry.stake,
                want: amount,
            });
        }
        entry.stake -= amount;
        self.deactivate_below_minimum(entry);
        Ok(entry.stake)
    }

    /// Burn up to `amount` of an authority's stake. Returns what was burned.
    pub fn slash(&self, pub_key: &[u8], amount: u64) -> Result<u64, AuthorityError> {
        let mut entries = self.entries.write();
        let entry = find_mut(&mut entries, pub_key)?;
        let slashed = amount.min(entry.stake);
        entry.stake -= slashed;
        log::warn!(
            "authority {} slashed by {} (remaining {})",
            hex::encode(pub_key),
            slashed,
            entry.stake
        );
        self.deactivate_below_minimum(entry);
        Ok(slashed)
    }

    /// Whether `pub_key` is registered and active.
    pub fn is_validator(&self, pub_key: &[u8]) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.node.pub_key == pub_key && e.node.active)
    }

    fn deactivate_below_minimum(&self, entry: &mut AuthorityEntry) {
        if entry.node.active && entry.stake < self.min_stake {
            entry.node.active = false;
            log::info!(
                "authority {} deactivated, stake {} below minimum {}",
                hex::encode(&entry.node.pub_key),
                entry.stake,
                self.min_stake
            );
        }
    }
}

fn find_mut<'a>(entries: &'a mut [AuthorityEntry], pub_key: &[u8]) -> Result<&'a mut AuthorityEntry, AuthorityError> {
    entries
        .iter_mut()
        .find(|e| e.node.pub_key == pub_key)
        .ok_or_else(|| AuthorityError::NotRegistered(hex::encode(pub_key)))
}

impl AuthorityProvider for StaticAuthority {
    fn validator_pub_key(&self, role: &str) -> Vec<u8> {
        self.own_keys.get(role).cloned().unwrap_or_default()
    }

    fn stake_of(&self, pub_key: &[u8]) -> u64 {
        self.entries
            .read()
            .iter()
            .find(|e| e.node.pub_key == pub_key)
            .map(|e| e.stake)
            .unwrap_or(0)
    }

    fn list_authorities(&self, active_only: bool) -> Result<Vec<AuthorityNode>, AuthorityError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| !active_only || e.node.active)
            .map(|e| e.node.clone())
            .collect())
    }

    fn loan_pool_address(&self) -> Address {
        self.loan_pool
    }
}
