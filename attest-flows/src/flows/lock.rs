//! Revocation lock operations
//!
//! Lock transitions are local to the owner's vault; only lock queries
//! cross the network.

use crate::{messages::FlowMessage, Node, Result};
use attest_core::{Error as CoreError, LinearId, Party, RevocationLock, StateAndRef};

impl Node {
    fn own_lock(&self, target: LinearId) -> Result<StateAndRef> {
        self.locks()
            .find_lock(self.party(), &target)?
            .ok_or_else(|| {
                CoreError::StateNotFound(format!(
                    "{} holds no revocation lock over {}",
                    self.party(),
                    target
                ))
                .into()
            })
    }

    /// Release this node's lock over `target`, allowing its revocation
    pub fn unlock_relationship(&self, target: LinearId) -> Result<RevocationLock> {
        let lock = self.own_lock(target)?;
        let unlocked = self.locks().unlock(self.party(), &lock.state_ref)?;
        tracing::info!(party = %self.party(), target = %target, "Revocation lock released");
        Ok(unlocked)
    }

    /// Block revocation of `target` again
    pub fn lock_relationship(&self, target: LinearId) -> Result<RevocationLock> {
        let lock = self.own_lock(target)?;
        let locked = self.locks().lock(self.party(), &lock.state_ref)?;
        tracing::info!(party = %self.party(), target = %target, "Revocation lock re-applied");
        Ok(locked)
    }

    /// Delete this node's released lock over `target`
    pub fn delete_lock(&self, target: LinearId) -> Result<()> {
        let lock = self.own_lock(target)?;
        self.locks().delete(self.party(), &lock.state_ref)?;
        tracing::info!(party = %self.party(), target = %target, "Revocation lock deleted");
        Ok(())
    }

    /// Ask `owner` whether it still blocks revocation of `target`
    pub async fn query_lock(&self, owner: &Party, target: LinearId) -> Result<bool> {
        let mut session = self.open_session(owner).await?;
        match session
            .send_and_receive::<FlowMessage, _>(&FlowMessage::LockQuery { target })
            .await?
        {
            FlowMessage::LockStatus { locked } => Ok(locked),
            FlowMessage::Rejected(refusal) => Err(refusal.into_error(owner.clone())),
            other => Err(other.unexpected("LockStatus")),
        }
    }
}
