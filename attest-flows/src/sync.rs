//! Membership synchronisation
//!
//! Two nodes exchange the transactions behind their live memberships in a
//! network, together with the attestations over them, so that each can run
//! the membership pre-check against the other.

use crate::{
    messages::{FlowMessage, Refusal, SyncPackage},
    resolution,
    session::FlowSession,
    Error, Node, Result,
};
use attest_core::{
    NetworkIdentity, Party, QueryCriteria, SecureHash, SignedTransaction, StateRef, StateType,
};
use std::collections::HashSet;

/// What a synchronisation recorded from the counterparty
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Counterparty's live membership, if it has one
    pub membership: Option<StateRef>,
    /// Attestations received over it
    pub attestations: usize,
    /// Transactions newly recorded
    pub recorded: usize,
}

impl Node {
    /// Exchange membership evidence for `network` with `counterparty`
    pub async fn sync_membership(
        &self,
        counterparty: &Party,
        network: &NetworkIdentity,
    ) -> Result<SyncReport> {
        let package = build_package(self, network)?;
        tracing::info!(
            party = %self.party(),
            counterparty = %counterparty,
            network = %network,
            has_membership = package.has_membership(),
            "Synchronising membership"
        );

        let mut session = self.open_session(counterparty).await?;
        let request = FlowMessage::Sync {
            network: network.clone(),
            package,
        };
        match session.send_and_receive::<FlowMessage, _>(&request).await? {
            FlowMessage::SyncReply { package } => {
                match accept_package(self, counterparty, network, &package) {
                    Ok(report) => {
                        session.send(&FlowMessage::Ack).await?;
                        Ok(report)
                    }
                    Err(e) => {
                        session
                            .send(&FlowMessage::Rejected(refusal_for(&e)))
                            .await?;
                        Err(e)
                    }
                }
            }
            FlowMessage::Rejected(refusal) => Err(refusal.into_error(counterparty.clone())),
            other => Err(other.unexpected("SyncReply")),
        }
    }
}

/// Responder side of [`Node::sync_membership`]
pub(crate) async fn respond(
    node: &Node,
    session: &mut FlowSession,
    network: NetworkIdentity,
    package: SyncPackage,
) -> Result<()> {
    let counterparty = session.counterparty().clone();
    let reply = accept_package(node, &counterparty, &network, &package)
        .and_then(|_| build_package(node, &network));

    match reply {
        Ok(package) => {
            match session
                .send_and_receive::<FlowMessage, _>(&FlowMessage::SyncReply { package })
                .await?
            {
                FlowMessage::Ack => Ok(()),
                FlowMessage::Rejected(refusal) => Err(refusal.into_error(counterparty)),
                other => Err(other.unexpected("Ack")),
            }
        }
        Err(e) => {
            session
                .send(&FlowMessage::Rejected(refusal_for(&e)))
                .await?;
            Err(e)
        }
    }
}

fn refusal_for(err: &Error) -> Refusal {
    match err {
        Error::Protocol(reason) => Refusal::Membership(reason.clone()),
        other => Refusal::from_error(other),
    }
}

/// Collect this node's live membership in `network` and its evidence
fn build_package(node: &Node, network: &NetworkIdentity) -> Result<SyncPackage> {
    let vault = node.vault();
    let Some(membership) = vault.find_unique(
        &QueryCriteria::new(StateType::Membership)
            .holder(node.party().clone())
            .network_hash(network.hash()),
    )?
    else {
        return Ok(SyncPackage::default());
    };

    let membership_tx = vault.get_transaction(&membership.state_ref.tx_id)?;
    let attestations = vault.query_stored(
        &QueryCriteria::new(StateType::MembershipAttestation).pointer_ref(membership.state_ref),
    )?;

    let mut attestation_txs = Vec::new();
    let mut seen = HashSet::new();
    for stored in attestations {
        let tx_id = stored.state_and_ref.state_ref.tx_id;
        if seen.insert(tx_id) {
            attestation_txs.push(vault.get_transaction(&tx_id)?);
        }
    }

    let mut dependencies = Vec::new();
    let mut included: HashSet<SecureHash> = HashSet::new();
    for tx in std::iter::once(&membership_tx).chain(attestation_txs.iter()) {
        for dependency in vault.backchain(tx)? {
            if included.insert(dependency.id) {
                dependencies.push(dependency);
            }
        }
    }

    Ok(SyncPackage {
        membership: Some(membership_tx),
        attestations: attestation_txs,
        dependencies,
    })
}

/// Verify a counterparty's package describes its own membership in
/// `network`, then record it
fn accept_package(
    node: &Node,
    counterparty: &Party,
    network: &NetworkIdentity,
    package: &SyncPackage,
) -> Result<SyncReport> {
    let Some(membership_tx) = &package.membership else {
        if !package.attestations.is_empty() {
            return Err(Error::Protocol(format!(
                "{} sent attestations without a membership",
                counterparty
            )));
        }
        return Ok(SyncReport::default());
    };

    let membership_ref = membership_of(membership_tx, counterparty, network)?;
    for tx in &package.attestations {
        let points_at_membership = tx.tx.outputs.iter().any(|state| {
            state.state_type() == StateType::MembershipAttestation
                && state
                    .as_attestation()
                    .map_or(false, |a| a.pointer.state_ref == membership_ref)
        });
        if !points_at_membership {
            return Err(Error::Protocol(format!(
                "Transaction {} does not attest the membership of {}",
                tx.id, counterparty
            )));
        }
    }

    let mut recorded = resolution::record_chain(node, &package.dependencies)?;
    if resolution::record_finalized(node, membership_tx)? {
        recorded += 1;
    }
    recorded += resolution::record_chain(node, &package.attestations)?;

    tracing::info!(
        party = %node.party(),
        counterparty = %counterparty,
        membership = %membership_ref,
        attestations = package.attestations.len(),
        recorded,
        "Membership synchronised"
    );

    Ok(SyncReport {
        membership: Some(membership_ref),
        attestations: package.attestations.len(),
        recorded,
    })
}

/// Reference of the membership `tx` creates for `holder` in `network`
fn membership_of(
    tx: &SignedTransaction,
    holder: &Party,
    network: &NetworkIdentity,
) -> Result<StateRef> {
    tx.tx
        .outputs
        .iter()
        .enumerate()
        .find_map(|(index, state)| {
            state
                .as_membership()
                .filter(|m| &m.holder == holder && m.network.same_network(network))
                .map(|_| tx.out_ref(index))
        })
        .ok_or_else(|| {
            Error::Protocol(format!(
                "Transaction {} holds no membership of {} in {}",
                tx.id, holder, network
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{
        Command, ContractState, KeyPair, Membership, Operation, TransactionBuilder,
    };

    fn party(name: &str) -> Party {
        Party::new(name, KeyPair::generate().public_key())
    }

    #[test]
    fn test_membership_of_checks_holder_and_network() {
        let alice = party("Alice");
        let network = NetworkIdentity::new("Trade");
        let wire = TransactionBuilder::new(party("Notary"))
            .add_output(ContractState::Membership(Membership::new(
                network.clone(),
                alice.clone(),
            )))
            .command(Command::new(
                StateType::Membership,
                Operation::Issue,
                [alice.owning_key],
            ))
            .build()
            .unwrap();
        let tx = SignedTransaction::new(wire);

        assert_eq!(membership_of(&tx, &alice, &network).unwrap(), tx.out_ref(0));
        assert_eq!(
            membership_of(&tx, &alice, &NetworkIdentity::new(" TRADE ")).unwrap(),
            tx.out_ref(0)
        );
        assert!(matches!(
            membership_of(&tx, &party("Mallory"), &network),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            membership_of(&tx, &alice, &NetworkIdentity::new("Other")),
            Err(Error::Protocol(_))
        ));
    }
}
