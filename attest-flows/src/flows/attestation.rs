//! Attestations over memberships and relationships
//!
//! `accept_*`/`reject_*` issue the caller's attestation over the live
//! version of the target, or amend the caller's existing attestation to
//! point at it with the new status.

use super::{ensure_not_duplicate, live_state, Proposal};
use crate::{Error, FlowResult, Node, Result};
use attest_core::{
    Attestation, AttestationPointer, AttestationStatus, ContractState, LinearId, Operation,
    QueryCriteria, StateAndRef, StateType,
};

fn attestation_type(target_type: StateType) -> Result<StateType> {
    target_type
        .attestation_type()
        .ok_or_else(|| Error::Protocol(format!("{} cannot be attested", target_type)))
}

fn attestation_of(state: &StateAndRef) -> Result<&Attestation> {
    state
        .state
        .as_attestation()
        .ok_or_else(|| Error::Protocol(format!("{} is not an attestation", state.state_ref)))
}

fn live_attestation(node: &Node, linear_id: LinearId) -> Result<StateAndRef> {
    live_state(node, StateType::MembershipAttestation, linear_id)
        .or_else(|_| live_state(node, StateType::RelationshipAttestation, linear_id))
}

impl Node {
    /// Vouch for the live version of membership `membership`
    pub async fn accept_membership(&self, membership: LinearId) -> Result<FlowResult> {
        self.attest(StateType::Membership, membership, AttestationStatus::Accepted)
            .await
    }

    /// Refuse the live version of membership `membership`
    pub async fn reject_membership(&self, membership: LinearId) -> Result<FlowResult> {
        self.attest(StateType::Membership, membership, AttestationStatus::Rejected)
            .await
    }

    /// Vouch for the live version of relationship `relationship`
    pub async fn accept_relationship(&self, relationship: LinearId) -> Result<FlowResult> {
        self.attest(StateType::Relationship, relationship, AttestationStatus::Accepted)
            .await
    }

    /// Refuse the live version of relationship `relationship`
    pub async fn reject_relationship(&self, relationship: LinearId) -> Result<FlowResult> {
        self.attest(StateType::Relationship, relationship, AttestationStatus::Rejected)
            .await
    }

    /// Issue or amend this node's attestation over `target`
    pub async fn attest(
        &self,
        target_type: StateType,
        target: LinearId,
        status: AttestationStatus,
    ) -> Result<FlowResult> {
        let existing = self.vault().find_unique(
            &QueryCriteria::new(attestation_type(target_type)?)
                .attestor(self.party().clone())
                .pointer_linear_id(target),
        )?;
        match existing {
            Some(existing) => {
                let linear_id = attestation_of(&existing)?.linear_id;
                self.amend_attestation(linear_id, status).await
            }
            None => self.issue_attestation(target_type, target, status).await,
        }
    }

    /// Issue a first attestation over the live version of `target`
    pub async fn issue_attestation(
        &self,
        target_type: StateType,
        target: LinearId,
        status: AttestationStatus,
    ) -> Result<FlowResult> {
        let attested = live_state(self, target_type, target)?;
        let attestation = match &attested.state {
            ContractState::Membership(m) => {
                Attestation::over_membership(self.party().clone(), m, &attested, status)
            }
            ContractState::Relationship(r) => {
                Attestation::over_relationship(self.party().clone(), r, &attested, status)
            }
            _ => None,
        }
        .ok_or_else(|| Error::Protocol(format!("{} cannot be attested", target_type)))?;

        let output = ContractState::attestation(attestation);
        ensure_not_duplicate(self, &output)?;

        let proposal = Proposal::new(output.state_type(), Operation::Issue)
            .reference(attested)
            .output(output)
            .signers([self.party()]);
        self.propose("attestation.issue", proposal, None).await
    }

    /// Re-point attestation `linear_id` at the live version of its target
    /// with `status`
    pub async fn amend_attestation(
        &self,
        linear_id: LinearId,
        status: AttestationStatus,
    ) -> Result<FlowResult> {
        let current = live_attestation(self, linear_id)?;
        let previous = attestation_of(&current)?;
        let attested = live_state(self, previous.pointer.state_type, previous.pointer.linear_id)?;
        let pointer = AttestationPointer::to(&attested)
            .ok_or_else(|| Error::Protocol(format!("{} is not versioned", attested.state_ref)))?;
        let next = previous.successor(current.state_ref, pointer, status);
        let state_type = current.state.state_type();

        let proposal = Proposal::new(state_type, Operation::Amend)
            .input(current)
            .reference(attested)
            .output(ContractState::attestation(next))
            .signers([self.party()]);
        self.propose("attestation.amend", proposal, None).await
    }

    /// Revoke attestation `linear_id`
    pub async fn revoke_attestation(&self, linear_id: LinearId) -> Result<FlowResult> {
        let current = live_attestation(self, linear_id)?;
        let state_type = current.state.state_type();

        let proposal = Proposal::new(state_type, Operation::Revoke)
            .input(current)
            .signers([self.party()]);
        self.propose("attestation.revoke", proposal, None).await
    }
}
