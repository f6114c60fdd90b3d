//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Hash-chain linearity: an amendment must name exactly the consumed version
//! - Canonical networks: case and padding never change a network's hash
//! - Duplicate detection: content hashes ignore identity and annotations
//! - At most one successor: a version can be consumed once

use attest_core::{
    rules::ids, Command, ContractState, KeyPair, LedgerTransaction, Membership, NetworkIdentity,
    Notary, NotaryOutcome, Operation, Party, RuleEngine, SecureHash, SignedTransaction,
    StateAndRef, StateRef, StateType, TransactionBuilder, Versionable,
};
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for generating ASCII network names
fn network_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9 _-]{0,24}"
}

/// Strategy for generating ledger references
fn state_ref_strategy() -> impl Strategy<Value = StateRef> {
    (any::<[u8; 32]>(), 0u32..8).prop_map(|(bytes, index)| {
        StateRef::new(SecureHash::from_bytes(bytes), index)
    })
}

fn party(seed: u8) -> Party {
    Party::new(format!("Party {}", seed), KeyPair::from_seed(&[seed; 32]).public_key())
}

fn notary() -> Party {
    party(200)
}

/// Resolved amendment of `previous` whose output claims `claimed` as predecessor
fn amendment(previous: &StateAndRef, claimed: StateRef) -> LedgerTransaction {
    let membership = previous.state.as_membership().unwrap();
    let wire = TransactionBuilder::new(notary())
        .add_input(previous.state_ref)
        .add_output(ContractState::Membership(membership.successor(claimed)))
        .command(Command::new(
            StateType::Membership,
            Operation::Amend,
            [membership.holder.owning_key],
        ))
        .build()
        .unwrap();
    LedgerTransaction::new(&wire, vec![previous.clone()], Vec::new())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: an amendment naming the consumed version is accepted
    #[test]
    fn prop_chained_amendment_accepted(
        name in network_name_strategy(),
        at in state_ref_strategy(),
    ) {
        let engine = RuleEngine::default();
        let membership = Membership::new(NetworkIdentity::new(name), party(1));
        let previous = StateAndRef::new(ContractState::Membership(membership), at);

        prop_assert!(engine.validate(&amendment(&previous, at)).is_ok());
    }

    /// Property: any other predecessor is rejected with the previous-ref rule
    #[test]
    fn prop_forged_previous_ref_rejected(
        at in state_ref_strategy(),
        forged in state_ref_strategy(),
    ) {
        prop_assume!(at != forged);
        let engine = RuleEngine::default();
        let membership = Membership::new(NetworkIdentity::new("Trade"), party(1));
        let previous = StateAndRef::new(ContractState::Membership(membership), at);

        let rejection = engine.check(&amendment(&previous, forged)).unwrap_err();
        prop_assert_eq!(rejection.rule, ids::MEMBERSHIP_AMEND_PREVIOUS);
    }

    /// Property: case and surrounding whitespace never change a network's hash
    #[test]
    fn prop_network_hash_canonical(
        name in network_name_strategy(),
        left in 0usize..4,
        right in 0usize..4,
    ) {
        let plain = NetworkIdentity::new(name.clone());
        let shouted = NetworkIdentity::new(format!(
            "{}{}{}",
            " ".repeat(left),
            name.to_ascii_uppercase(),
            " ".repeat(right)
        ));

        prop_assert_eq!(plain.hash(), shouted.hash());
        prop_assert!(plain.same_network(&shouted));

        let operated = NetworkIdentity::with_operator(name, party(9));
        prop_assert_ne!(plain.hash(), operated.hash());
    }

    /// Property: equivalent memberships share a content hash regardless of
    /// linear id, roles and claims
    #[test]
    fn prop_duplicate_hash_stable(
        name in network_name_strategy(),
        roles in prop::collection::btree_set("[a-z]{1,8}", 0..4),
        holder in 0u8..50,
        other in 50u8..100,
    ) {
        let network = NetworkIdentity::new(name);
        let first = Membership::new(network.clone(), party(holder));
        let mut second = Membership::new(network.clone(), party(holder))
            .with_claim("lei", "5493001KJTIIGC8Y1R12");
        for role in roles {
            second = second.with_role(role);
        }

        prop_assert_ne!(first.linear_id, second.linear_id);
        prop_assert_eq!(first.content_hash(), second.content_hash());

        let stranger = Membership::new(network, party(other));
        prop_assert_ne!(first.content_hash(), stranger.content_hash());
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_at_most_one_successor() {
        let keys = KeyPair::from_seed(&[7; 32]);
        let notary_keys = KeyPair::generate();
        let notary = attest_core::spawn_notary("Notary", notary_keys, Duration::from_secs(5), None);
        let holder = Party::new("Alice", keys.public_key());
        let input = StateRef::new(SecureHash::sha256(b"membership-v1"), 0);
        let membership = Membership::new(NetworkIdentity::new("Trade"), holder.clone());

        let propose = |role: &str| {
            let wire = TransactionBuilder::new(notary.party().clone())
                .add_input(input)
                .add_output(ContractState::Membership(
                    membership.successor(input).with_role(role),
                ))
                .command(Command::new(
                    StateType::Membership,
                    Operation::Amend,
                    [holder.owning_key],
                ))
                .build()
                .unwrap();
            let mut tx = SignedTransaction::new(wire);
            tx.sign_with(&keys);
            tx
        };

        let first = propose("Buyer");
        let second = propose("Seller");
        let (a, b) = tokio::join!(notary.commit(&first), notary.commit(&second));

        let outcomes = [a.unwrap(), b.unwrap()];
        let committed = outcomes
            .iter()
            .filter(|o| matches!(o, NotaryOutcome::Committed(_)))
            .count();
        let conflicts = outcomes
            .iter()
            .filter(|o| matches!(o, NotaryOutcome::Conflict(refs) if refs == &vec![input]))
            .count();
        assert_eq!((committed, conflicts), (1, 1));
    }
}
