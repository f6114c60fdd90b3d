//! Relationship issuance, amendment and revocation
//!
//! Every participant signs. Issuance emits a locked revocation lock per
//! participant, amendment one per newly added participant.

use super::{ensure_not_duplicate, live_state, Proposal};
use crate::{Error, FlowResult, Node, Result};
use attest_core::{
    ContractState, LinearId, Operation, Party, QueryCriteria, Relationship,
    RevocationLockManager, StateType, Versionable,
};
use futures::future::join_all;
use std::collections::BTreeSet;

fn locks_for<'a>(
    parties: impl IntoIterator<Item = &'a Party>,
    relationship: &Relationship,
) -> Vec<ContractState> {
    RevocationLockManager::create_all(parties, relationship.linear_id, StateType::Relationship)
        .into_iter()
        .map(ContractState::RevocationLock)
        .collect()
}

impl Node {
    /// Issue `relationship`, checking memberships if the node is configured to
    pub async fn issue_relationship(&self, relationship: Relationship) -> Result<FlowResult> {
        let check = self.config().check_membership;
        self.issue_relationship_with(relationship, check).await
    }

    /// Issue `relationship`; with `check_membership` every counterparty
    /// verifies the others' memberships before signing
    pub async fn issue_relationship_with(
        &self,
        relationship: Relationship,
        check_membership: bool,
    ) -> Result<FlowResult> {
        if relationship.previous_state_ref.is_some() {
            return Err(Error::Protocol(
                "A new relationship cannot name a previous version".to_string(),
            ));
        }
        let participants = relationship.participants();
        let locks = locks_for(&participants, &relationship);
        let network = check_membership.then(|| relationship.network.clone());

        let output = ContractState::Relationship(relationship);
        ensure_not_duplicate(self, &output)?;

        let mut proposal = Proposal::new(StateType::Relationship, Operation::Issue)
            .output(output)
            .signers(&participants);
        for lock in locks {
            proposal = proposal.output(lock);
        }
        self.propose("relationship.issue", proposal, network).await
    }

    /// Replace the live version of relationship `linear_id` with an amended one
    pub async fn amend_relationship<F>(&self, linear_id: LinearId, amend: F) -> Result<FlowResult>
    where
        F: FnOnce(&mut Relationship) + Send,
    {
        let current = live_state(self, StateType::Relationship, linear_id)?;
        let previous = current
            .state
            .as_relationship()
            .ok_or_else(|| Error::Protocol(format!("{} is not a relationship", linear_id)))?;
        let mut next = previous.successor(current.state_ref);
        amend(&mut next);

        let existing = previous.participants();
        let participants = next.participants();
        let added: BTreeSet<_> = participants.difference(&existing).cloned().collect();
        let locks = locks_for(&added, &next);
        let network = self
            .config()
            .check_membership
            .then(|| next.network.clone());

        let mut proposal = Proposal::new(StateType::Relationship, Operation::Amend)
            .input(current)
            .output(ContractState::Relationship(next))
            .signers(&participants);
        for lock in locks {
            proposal = proposal.output(lock);
        }
        self.propose("relationship.amend", proposal, network).await
    }

    /// Revoke relationship `linear_id`
    ///
    /// Fails with `LockHeld` before anything is signed if any other
    /// participant still holds its lock; this node's own lock is released.
    pub async fn revoke_relationship(&self, linear_id: LinearId) -> Result<FlowResult> {
        let current = live_state(self, StateType::Relationship, linear_id)?;
        let participants = current
            .state
            .as_relationship()
            .map(|r| r.participants())
            .ok_or_else(|| Error::Protocol(format!("{} is not a relationship", linear_id)))?;

        let others: Vec<_> = participants.iter().filter(|p| *p != self.party()).collect();
        let answers = join_all(others.iter().map(|p| self.query_lock(p, linear_id))).await;
        for (party, locked) in others.iter().zip(answers) {
            if locked? {
                tracing::info!(
                    party = %self.party(),
                    owner = %party,
                    relationship = %linear_id,
                    "Revocation blocked by counterparty lock"
                );
                return Err(attest_core::Error::LockHeld {
                    owner: (*party).clone(),
                }
                .into());
            }
        }

        let was_locked = self.locks().is_locked(self.party(), &linear_id)?;
        if was_locked {
            self.unlock_relationship(linear_id)?;
        }

        let proposal = Proposal::new(StateType::Relationship, Operation::Revoke)
            .input(current)
            .signers(&participants);
        let result = self.propose("relationship.revoke", proposal, None).await;
        if result.is_err() && was_locked {
            self.restore_lock(linear_id);
        }
        result
    }

    /// Put back the lock released for a revocation that did not commit
    fn restore_lock(&self, linear_id: LinearId) {
        let revoked = self
            .vault()
            .find_unique(&QueryCriteria::new(StateType::Relationship).linear_id(linear_id));
        if !matches!(revoked, Ok(Some(_))) {
            return;
        }
        if let Err(e) = self.lock_relationship(linear_id) {
            tracing::warn!(
                party = %self.party(),
                relationship = %linear_id,
                error = %e,
                "Could not restore revocation lock"
            );
        }
    }
}
