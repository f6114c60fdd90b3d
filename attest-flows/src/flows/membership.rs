//! Membership issuance, amendment and revocation

use super::{ensure_not_duplicate, live_state, Proposal};
use crate::{Error, FlowResult, Node, Result};
use attest_core::{ContractState, LinearId, Membership, Operation, StateType};
use std::collections::BTreeSet;

impl Node {
    /// Issue the first version of `membership`
    ///
    /// The holder signs; when someone else (typically the operator)
    /// initiates, the holder is asked to counter-sign.
    pub async fn issue_membership(&self, membership: Membership) -> Result<FlowResult> {
        if membership.previous_state_ref.is_some() {
            return Err(Error::Protocol(
                "A new membership cannot name a previous version".to_string(),
            ));
        }
        let signers = BTreeSet::from([membership.holder.clone(), self.party().clone()]);
        let output = ContractState::Membership(membership);
        ensure_not_duplicate(self, &output)?;

        let proposal = Proposal::new(StateType::Membership, Operation::Issue)
            .output(output)
            .signers(&signers);
        self.propose("membership.issue", proposal, None).await
    }

    /// Replace the live version of membership `linear_id` with an amended one
    ///
    /// The holder or the network operator may amend.
    pub async fn amend_membership<F>(&self, linear_id: LinearId, amend: F) -> Result<FlowResult>
    where
        F: FnOnce(&mut Membership) + Send,
    {
        let current = live_state(self, StateType::Membership, linear_id)?;
        let mut next = current
            .state
            .as_membership()
            .map(|m| m.successor(current.state_ref))
            .ok_or_else(|| Error::Protocol(format!("{} is not a membership", linear_id)))?;
        amend(&mut next);

        let proposal = Proposal::new(StateType::Membership, Operation::Amend)
            .input(current)
            .output(ContractState::Membership(next))
            .signers([self.party()]);
        self.propose("membership.amend", proposal, None).await
    }

    /// Revoke membership `linear_id`
    pub async fn revoke_membership(&self, linear_id: LinearId) -> Result<FlowResult> {
        let current = live_state(self, StateType::Membership, linear_id)?;
        let proposal = Proposal::new(StateType::Membership, Operation::Revoke)
            .input(current)
            .signers([self.party()]);
        self.propose("membership.revoke", proposal, None).await
    }
}
