//! Flow entry points
//!
//! Each entity's Issue/Amend/Revoke operations are methods on [`Node`]
//! that build the transaction and hand it to the choreographer.

mod attestation;
mod lock;
mod membership;
mod relationship;

use crate::{choreographer::Initiator, Node, Result};
use attest_core::{
    Command, ContractState, Error as CoreError, LinearId, Operation, Party, QueryCriteria,
    StateAndRef, StateType, TransactionBuilder, WireTransaction,
};

/// Live (unconsumed) version of the entity `linear_id`
pub(crate) fn live_state(
    node: &Node,
    state_type: StateType,
    linear_id: LinearId,
) -> Result<StateAndRef> {
    node.vault()
        .find_unique(&QueryCriteria::new(state_type).linear_id(linear_id))?
        .ok_or_else(|| {
            CoreError::StateNotFound(format!("No live {} with id {}", state_type, linear_id))
                .into()
        })
}

/// Refuse to issue a state whose content is already live in the vault
pub(crate) fn ensure_not_duplicate(node: &Node, state: &ContractState) -> Result<()> {
    let hash = state.content_hash();
    let existing = node
        .vault()
        .find_unique(&QueryCriteria::new(state.state_type()).content_hash(hash))?;
    if let Some(existing) = existing {
        tracing::info!(
            party = %node.party(),
            state_type = %state.state_type(),
            existing = %existing.state_ref,
            "Refusing duplicate issuance"
        );
        return Err(CoreError::DuplicateState(hash.to_hex()).into());
    }
    Ok(())
}

/// Parts of a transaction before it is built
pub(crate) struct Proposal {
    pub(crate) inputs: Vec<StateAndRef>,
    pub(crate) references: Vec<StateAndRef>,
    pub(crate) outputs: Vec<ContractState>,
    pub(crate) state_type: StateType,
    pub(crate) operation: Operation,
    pub(crate) signers: Vec<Party>,
}

impl Proposal {
    pub(crate) fn new(state_type: StateType, operation: Operation) -> Self {
        Self {
            inputs: Vec::new(),
            references: Vec::new(),
            outputs: Vec::new(),
            state_type,
            operation,
            signers: Vec::new(),
        }
    }

    pub(crate) fn input(mut self, state: StateAndRef) -> Self {
        self.inputs.push(state);
        self
    }

    pub(crate) fn reference(mut self, state: StateAndRef) -> Self {
        self.references.push(state);
        self
    }

    pub(crate) fn output(mut self, state: ContractState) -> Self {
        self.outputs.push(state);
        self
    }

    pub(crate) fn signers<'a>(mut self, parties: impl IntoIterator<Item = &'a Party>) -> Self {
        self.signers.extend(parties.into_iter().cloned());
        self
    }

    fn build(self, notary: Party) -> Result<WireTransaction> {
        let mut builder = TransactionBuilder::new(notary);
        for input in &self.inputs {
            builder = builder.add_input(input.state_ref);
        }
        for reference in &self.references {
            builder = builder.add_reference(reference.state_ref);
        }
        for output in self.outputs {
            builder = builder.add_output(output);
        }
        let command = Command::new(
            self.state_type,
            self.operation,
            self.signers.iter().map(|p| p.owning_key),
        );
        Ok(builder.command(command).build()?)
    }
}

impl Node {
    /// Build `proposal` and run it through the choreographer
    pub(crate) async fn propose(
        &self,
        flow: &'static str,
        proposal: Proposal,
        check_membership: Option<attest_core::NetworkIdentity>,
    ) -> Result<crate::FlowResult> {
        let mut initiator = Initiator::new(self, flow);
        initiator.generating();
        let wire = proposal.build(self.notary().party().clone())?;
        initiator.run(wire, check_membership).await
    }
}
