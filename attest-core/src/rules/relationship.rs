//! Relationship rules

use super::{ids, Rule, RuleContext};
use crate::state::{LockStatus, Relationship, Versionable};
use crate::types::{Party, StateType};
use std::collections::BTreeSet;

/// Minimum number of distinct members
const MIN_MEMBERS: usize = 2;

fn input<'a>(ctx: &RuleContext<'a>) -> Option<&'a Relationship> {
    ctx.single_input().and_then(|s| s.state.as_relationship())
}

fn output<'a>(ctx: &RuleContext<'a>) -> Option<&'a Relationship> {
    ctx.single_output().and_then(|s| s.state.as_relationship())
}

/// Owners of the lock outputs that target `relationship`, if all of them are
/// `Locked` and no owner appears twice
fn lock_owners(ctx: &RuleContext<'_>, relationship: &Relationship) -> Option<BTreeSet<Party>> {
    let locks: Vec<_> = ctx
        .tx
        .outputs_of(StateType::RevocationLock)
        .into_iter()
        .filter_map(|s| s.state.as_lock())
        .collect();

    let mut owners = BTreeSet::new();
    for lock in locks {
        let valid = lock.target == relationship.linear_id
            && lock.target_type == StateType::Relationship
            && lock.status == LockStatus::Locked;
        if !valid || !owners.insert(lock.owner.clone()) {
            return None;
        }
    }
    Some(owners)
}

fn all_signed(ctx: &RuleContext<'_>, parties: &BTreeSet<Party>) -> bool {
    parties.iter().all(|p| ctx.signed_by(p))
}

fn no_inputs(ctx: &RuleContext<'_>) -> bool {
    ctx.inputs().is_empty()
}

fn one_input(ctx: &RuleContext<'_>) -> bool {
    ctx.inputs().len() == 1
}

fn one_output(ctx: &RuleContext<'_>) -> bool {
    ctx.outputs().len() == 1
}

fn no_outputs(ctx: &RuleContext<'_>) -> bool {
    ctx.outputs().is_empty()
}

fn distinct_members(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, Relationship::has_distinct_members)
}

fn distinct_settings(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, Relationship::has_distinct_setting_keys)
}

fn min_members(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |r| {
        r.member_parties().collect::<BTreeSet<_>>().len() >= MIN_MEMBERS
    })
}

fn issue_previous_absent(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |r| r.previous_state_ref.is_none())
}

fn issue_locks(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |r| lock_owners(ctx, r) == Some(r.participants()))
}

fn issue_signed(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |r| all_signed(ctx, &r.participants()))
}

fn network_unchanged(ctx: &RuleContext<'_>) -> bool {
    match (input(ctx), output(ctx)) {
        (Some(i), Some(o)) => i.network.hash() == o.network.hash(),
        _ => false,
    }
}

fn linear_id_unchanged(ctx: &RuleContext<'_>) -> bool {
    match (input(ctx), output(ctx)) {
        (Some(i), Some(o)) => i.linear_id == o.linear_id,
        _ => false,
    }
}

fn previous_is_input(ctx: &RuleContext<'_>) -> bool {
    match (ctx.single_input(), output(ctx)) {
        (Some(i), Some(o)) => o.previous_state_ref == Some(i.state_ref),
        _ => false,
    }
}

fn amend_locks(ctx: &RuleContext<'_>) -> bool {
    match (input(ctx), output(ctx)) {
        (Some(i), Some(o)) => {
            let existing = i.participants();
            let added: BTreeSet<Party> = o
                .participants()
                .into_iter()
                .filter(|p| !existing.contains(p))
                .collect();
            lock_owners(ctx, o) == Some(added)
        }
        _ => false,
    }
}

fn amend_signed(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |r| all_signed(ctx, &r.participants()))
}

fn revoke_signed(ctx: &RuleContext<'_>) -> bool {
    input(ctx).map_or(false, |r| all_signed(ctx, &r.participants()))
}

pub(super) static ISSUE: &[Rule] = &[
    Rule {
        id: ids::RELATIONSHIP_ISSUE_INPUTS,
        message: "No relationships may be consumed when issuing a relationship",
        check: no_inputs,
    },
    Rule {
        id: ids::RELATIONSHIP_ISSUE_OUTPUTS,
        message: "Exactly one relationship must be created",
        check: one_output,
    },
    Rule {
        id: ids::RELATIONSHIP_ISSUE_DISTINCT_MEMBERS,
        message: "A party may appear only once among the members",
        check: distinct_members,
    },
    Rule {
        id: ids::RELATIONSHIP_ISSUE_DISTINCT_SETTINGS,
        message: "A member may not declare the same setting key twice",
        check: distinct_settings,
    },
    Rule {
        id: ids::RELATIONSHIP_ISSUE_MIN_MEMBERS,
        message: "A relationship needs at least two members",
        check: min_members,
    },
    Rule {
        id: ids::RELATIONSHIP_ISSUE_LOCKS,
        message: "Every participant must receive exactly one locked revocation lock on the relationship",
        check: issue_locks,
    },
    Rule {
        id: ids::RELATIONSHIP_ISSUE_PREVIOUS,
        message: "A new relationship must not reference a previous version",
        check: issue_previous_absent,
    },
    Rule {
        id: ids::RELATIONSHIP_ISSUE_SIGNERS,
        message: "All participants must sign a relationship issuance",
        check: issue_signed,
    },
];

pub(super) static AMEND: &[Rule] = &[
    Rule {
        id: ids::RELATIONSHIP_AMEND_INPUTS,
        message: "Exactly one relationship must be consumed",
        check: one_input,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_OUTPUTS,
        message: "Exactly one relationship must be created",
        check: one_output,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_NETWORK,
        message: "The network of a relationship cannot change",
        check: network_unchanged,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_LINEAR_ID,
        message: "The linear id of a relationship cannot change",
        check: linear_id_unchanged,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_DISTINCT_MEMBERS,
        message: "A party may appear only once among the members",
        check: distinct_members,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_DISTINCT_SETTINGS,
        message: "A member may not declare the same setting key twice",
        check: distinct_settings,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_MIN_MEMBERS,
        message: "A relationship needs at least two members",
        check: min_members,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_PREVIOUS,
        message: "The amended relationship must reference the consumed version",
        check: previous_is_input,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_LOCKS,
        message: "Every newly added participant, and only those, must receive a locked revocation lock",
        check: amend_locks,
    },
    Rule {
        id: ids::RELATIONSHIP_AMEND_SIGNERS,
        message: "All participants of the amended relationship must sign",
        check: amend_signed,
    },
];

pub(super) static REVOKE: &[Rule] = &[
    Rule {
        id: ids::RELATIONSHIP_REVOKE_INPUTS,
        message: "Exactly one relationship must be consumed",
        check: one_input,
    },
    Rule {
        id: ids::RELATIONSHIP_REVOKE_OUTPUTS,
        message: "No relationships may be created when revoking a relationship",
        check: no_outputs,
    },
    Rule {
        id: ids::RELATIONSHIP_REVOKE_SIGNERS,
        message: "All participants of the revoked relationship must sign",
        check: revoke_signed,
    },
];

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::{ids, RuleEngine};
    use crate::state::{ContractState, Relationship, RevocationLock, Setting, StateAndRef};
    use crate::transaction::{LedgerTransaction, Operation};
    use crate::types::{NetworkIdentity, Party, StateType};

    fn rule(tx: &LedgerTransaction) -> Option<&'static str> {
        RuleEngine::default().check(tx).err().map(|r| r.rule)
    }

    fn lock_for(owner: &Party, relationship: &Relationship) -> ContractState {
        ContractState::RevocationLock(RevocationLock::locked(
            owner.clone(),
            relationship.linear_id,
            StateType::Relationship,
        ))
    }

    fn issue_tx(relationship: &Relationship, lock_owners: &[&Party], signers: &[&Party]) -> LedgerTransaction {
        let mut fixture = TxFixture::new(StateType::Relationship, Operation::Issue)
            .output(ContractState::Relationship(relationship.clone()));
        for owner in lock_owners {
            fixture = fixture.output(lock_for(owner, relationship));
        }
        for signer in signers {
            fixture = fixture.signer(signer);
        }
        fixture.build()
    }

    #[test]
    fn test_issue_accepted_with_locks() {
        let alice = party("Alice");
        let bob = party("Bob");
        let rel = Relationship::new(NetworkIdentity::new("Trade"))
            .with_member(alice.clone())
            .with_member(bob.clone());

        assert_eq!(rule(&issue_tx(&rel, &[&alice, &bob], &[&alice, &bob])), None);
    }

    #[test]
    fn test_issue_requires_lock_per_participant() {
        let alice = party("Alice");
        let bob = party("Bob");
        let rel = Relationship::new(NetworkIdentity::new("Trade"))
            .with_member(alice.clone())
            .with_member(bob.clone());

        assert_eq!(
            rule(&issue_tx(&rel, &[&alice], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_LOCKS)
        );
        assert_eq!(
            rule(&issue_tx(&rel, &[&alice, &bob, &bob], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_LOCKS)
        );
    }

    #[test]
    fn test_issue_locks_checked_before_previous_ref() {
        let alice = party("Alice");
        let bob = party("Bob");
        let rel = Relationship::new(NetworkIdentity::new("Trade"))
            .with_member(alice.clone())
            .with_member(bob.clone())
            .successor(state_ref("r0", 0));

        assert_eq!(
            rule(&issue_tx(&rel, &[&alice], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_LOCKS)
        );
        assert_eq!(
            rule(&issue_tx(&rel, &[&alice, &bob], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_PREVIOUS)
        );
    }

    #[test]
    fn test_issue_operator_is_participant() {
        let operator = party("Operator");
        let alice = party("Alice");
        let bob = party("Bob");
        let rel = Relationship::new(NetworkIdentity::with_operator("Trade", operator.clone()))
            .with_member(alice.clone())
            .with_member(bob.clone());

        // Operator lock and signature are both required
        assert_eq!(
            rule(&issue_tx(&rel, &[&alice, &bob], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_LOCKS)
        );
        assert_eq!(
            rule(&issue_tx(&rel, &[&alice, &bob, &operator], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_SIGNERS)
        );
        assert_eq!(
            rule(&issue_tx(
                &rel,
                &[&alice, &bob, &operator],
                &[&alice, &bob, &operator]
            )),
            None
        );
    }

    #[test]
    fn test_issue_member_invariants_in_order() {
        let alice = party("Alice");
        let bob = party("Bob");
        let network = NetworkIdentity::new("Trade");

        let duplicate = Relationship::new(network.clone())
            .with_member(alice.clone())
            .with_member(alice.clone())
            .with_member(bob.clone());
        assert_eq!(
            rule(&issue_tx(&duplicate, &[&alice, &bob], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_DISTINCT_MEMBERS)
        );

        let settings = Relationship::new(network.clone())
            .with_member_settings(
                alice.clone(),
                vec![Setting::new("currency", "EUR"), Setting::new("currency", "USD")],
            )
            .with_member(bob.clone());
        assert_eq!(
            rule(&issue_tx(&settings, &[&alice, &bob], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_ISSUE_DISTINCT_SETTINGS)
        );

        let alone = Relationship::new(network).with_member(alice.clone());
        assert_eq!(
            rule(&issue_tx(&alone, &[&alice], &[&alice])),
            Some(ids::RELATIONSHIP_ISSUE_MIN_MEMBERS)
        );
    }

    #[test]
    fn test_amend_adds_member_with_lock() {
        let alice = party("Alice");
        let bob = party("Bob");
        let carol = party("Carol");
        let v1 = Relationship::new(NetworkIdentity::new("Trade"))
            .with_member(alice.clone())
            .with_member(bob.clone());
        let recorded = StateAndRef::new(ContractState::Relationship(v1.clone()), state_ref("r1", 0));
        let v2 = v1.successor(recorded.state_ref).with_member(carol.clone());

        let amend = |locks: &[&Party], signers: &[&Party]| {
            let mut fixture = TxFixture::new(StateType::Relationship, Operation::Amend)
                .input(recorded.clone())
                .output(ContractState::Relationship(v2.clone()));
            for owner in locks {
                fixture = fixture.output(lock_for(owner, &v2));
            }
            for signer in signers {
                fixture = fixture.signer(signer);
            }
            fixture.build()
        };

        assert_eq!(rule(&amend(&[&carol], &[&alice, &bob, &carol])), None);
        assert_eq!(
            rule(&amend(&[], &[&alice, &bob, &carol])),
            Some(ids::RELATIONSHIP_AMEND_LOCKS)
        );
        // Existing members already hold their locks
        assert_eq!(
            rule(&amend(&[&alice, &carol], &[&alice, &bob, &carol])),
            Some(ids::RELATIONSHIP_AMEND_LOCKS)
        );
        assert_eq!(
            rule(&amend(&[&carol], &[&alice, &bob])),
            Some(ids::RELATIONSHIP_AMEND_SIGNERS)
        );
    }

    #[test]
    fn test_amend_forged_previous_rejected() {
        let alice = party("Alice");
        let bob = party("Bob");
        let v1 = Relationship::new(NetworkIdentity::new("Trade"))
            .with_member(alice.clone())
            .with_member(bob.clone());
        let recorded = StateAndRef::new(ContractState::Relationship(v1.clone()), state_ref("r1", 0));

        let tx = TxFixture::new(StateType::Relationship, Operation::Amend)
            .input(recorded)
            .output(ContractState::Relationship(v1.successor(state_ref("r0", 0))))
            .signer(&alice)
            .signer(&bob)
            .build();
        assert_eq!(rule(&tx), Some(ids::RELATIONSHIP_AMEND_PREVIOUS));
    }

    #[test]
    fn test_revoke_requires_every_input_participant() {
        let alice = party("Alice");
        let bob = party("Bob");
        let v1 = Relationship::new(NetworkIdentity::new("Trade"))
            .with_member(alice.clone())
            .with_member(bob.clone());
        let recorded = StateAndRef::new(ContractState::Relationship(v1.clone()), state_ref("r1", 0));

        let partial = TxFixture::new(StateType::Relationship, Operation::Revoke)
            .input(recorded.clone())
            .signer(&alice)
            .build();
        assert_eq!(rule(&partial), Some(ids::RELATIONSHIP_REVOKE_SIGNERS));

        let full = TxFixture::new(StateType::Relationship, Operation::Revoke)
            .input(recorded.clone())
            .signer(&alice)
            .signer(&bob)
            .build();
        assert_eq!(rule(&full), None);

        // Locks may not ride along on a revocation
        let with_lock = TxFixture::new(StateType::Relationship, Operation::Revoke)
            .input(recorded)
            .output(lock_for(&alice, &v1))
            .signer(&alice)
            .signer(&bob)
            .build();
        assert_eq!(rule(&with_lock), Some(ids::FOREIGN_STATES));
    }
}
