//! Revocation lock manager
//!
//! A revocation lock is emitted for every participant when a relationship
//! is issued and is recorded only by its owner's vault. Until the owner
//! unlocks it, no party can revoke the relationship: the owner re-checks its
//! own lock before counter-signing any revocation.
//!
//! Status changes are local to the owner's vault; they never go through the
//! notary.

use crate::{
    query::QueryCriteria,
    state::{LockStatus, RevocationLock, StateAndRef},
    storage::StoredState,
    types::{LinearId, Party, StateRef, StateType},
    Error, Result, Vault,
};
use std::sync::Arc;

/// Owner-side lock operations over a vault
#[derive(Debug, Clone)]
pub struct RevocationLockManager {
    vault: Arc<Vault>,
}

impl RevocationLockManager {
    /// Manage the locks held in `vault`
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    /// A new lock for `owner` over `target`, to be emitted by a transaction
    pub fn create(owner: Party, target: LinearId, target_type: StateType) -> RevocationLock {
        RevocationLock::locked(owner, target, target_type)
    }

    /// One lock per participant, in participant order
    pub fn create_all<'a>(
        participants: impl IntoIterator<Item = &'a Party>,
        target: LinearId,
        target_type: StateType,
    ) -> Vec<RevocationLock> {
        participants
            .into_iter()
            .map(|p| Self::create(p.clone(), target, target_type))
            .collect()
    }

    /// The lock `owner` holds over `target`, if recorded here
    pub fn find_lock(&self, owner: &Party, target: &LinearId) -> Result<Option<StateAndRef>> {
        let criteria = QueryCriteria::new(StateType::RevocationLock)
            .owner(owner.clone())
            .pointer_linear_id(*target);
        self.vault.find_unique(&criteria)
    }

    /// Whether `owner` currently blocks revocation of `target`
    pub fn is_locked(&self, owner: &Party, target: &LinearId) -> Result<bool> {
        Ok(self
            .find_lock(owner, target)?
            .and_then(|s| s.state.as_lock().map(RevocationLock::is_locked))
            .unwrap_or(false))
    }

    /// Fail with `LockHeld` unless `owner`'s lock over `target` is absent or unlocked
    pub fn ensure_unlocked(&self, owner: &Party, target: &LinearId) -> Result<()> {
        if self.is_locked(owner, target)? {
            tracing::warn!(owner = %owner, target = %target, "Revocation blocked by lock");
            return Err(Error::LockHeld {
                owner: owner.clone(),
            });
        }
        Ok(())
    }

    /// Release a lock; only its owner may do this
    pub fn unlock(&self, caller: &Party, lock_ref: &StateRef) -> Result<RevocationLock> {
        self.set_status(caller, lock_ref, LockStatus::Unlocked)
    }

    /// Re-lock a previously released lock; only its owner may do this
    pub fn lock(&self, caller: &Party, lock_ref: &StateRef) -> Result<RevocationLock> {
        self.set_status(caller, lock_ref, LockStatus::Locked)
    }

    /// Delete an unlocked lock; only its owner may do this
    pub fn delete(&self, caller: &Party, lock_ref: &StateRef) -> Result<()> {
        let stored = self.owned_lock(caller, lock_ref)?;
        let lock = lock_of(&stored)?;
        if lock.is_locked() {
            return Err(Error::LockHeld {
                owner: lock.owner.clone(),
            });
        }

        self.vault.remove_state(&stored)?;
        tracing::info!(owner = %caller, lock = %lock_ref, target = %lock.target, "Revocation lock deleted");
        Ok(())
    }

    /// Delete whatever lock `owner` holds over `target`, releasing it first
    ///
    /// Used once a revocation of `target` has been finalized.
    pub fn release_and_delete(&self, owner: &Party, target: &LinearId) -> Result<bool> {
        let Some(found) = self.find_lock(owner, target)? else {
            return Ok(false);
        };
        if found.state.as_lock().map_or(false, RevocationLock::is_locked) {
            self.unlock(owner, &found.state_ref)?;
        }
        self.delete(owner, &found.state_ref)?;
        Ok(true)
    }

    fn set_status(
        &self,
        caller: &Party,
        lock_ref: &StateRef,
        status: LockStatus,
    ) -> Result<RevocationLock> {
        let mut stored = self.owned_lock(caller, lock_ref)?;
        let lock = stored
            .state_and_ref
            .state
            .as_lock_mut()
            .ok_or_else(|| Error::StateNotFound(format!("No revocation lock at {}", lock_ref)))?;
        lock.status = status;
        let updated = lock.clone();

        self.vault.update_state(&stored)?;
        tracing::info!(
            owner = %caller,
            lock = %lock_ref,
            target = %updated.target,
            status = %status,
            "Revocation lock updated"
        );
        Ok(updated)
    }

    fn owned_lock(&self, caller: &Party, lock_ref: &StateRef) -> Result<StoredState> {
        let stored = self
            .vault
            .stored_state(lock_ref)?
            .ok_or_else(|| Error::StateNotFound(format!("No revocation lock at {}", lock_ref)))?;
        let lock = lock_of(&stored)?;
        if &lock.owner != caller {
            return Err(Error::NotLockOwner(format!(
                "{} does not own lock {} (owner {})",
                caller, lock_ref, lock.owner
            )));
        }
        Ok(stored)
    }
}

fn lock_of(stored: &StoredState) -> Result<&RevocationLock> {
    stored.state_and_ref.state.as_lock().ok_or_else(|| {
        Error::StateNotFound(format!("No revocation lock at {}", stored.state_ref()))
    })
}
