//! Membership rules

use super::{ids, Rule, RuleContext};
use crate::state::Membership;

fn input<'a>(ctx: &RuleContext<'a>) -> Option<&'a Membership> {
    ctx.single_input().and_then(|s| s.state.as_membership())
}

fn output<'a>(ctx: &RuleContext<'a>) -> Option<&'a Membership> {
    ctx.single_output().and_then(|s| s.state.as_membership())
}

/// The operator, and only the operator, carries the operator role
fn operator_role_consistent(ctx: &RuleContext<'_>, membership: &Membership) -> bool {
    let has_role = membership.has_role(&ctx.config.network_operator_role);
    membership.is_network_operator() == has_role
}

fn holder_or_operator_signed(ctx: &RuleContext<'_>, membership: &Membership) -> bool {
    ctx.signed_by(&membership.holder)
        || membership
            .network
            .operator
            .as_ref()
            .map_or(false, |operator| ctx.signed_by(operator))
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

fn issue_previous_absent(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |m| m.previous_state_ref.is_none())
}

fn output_operator_role(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |m| operator_role_consistent(ctx, m))
}

fn issue_holder_signed(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |m| ctx.signed_by(&m.holder))
}

fn network_unchanged(ctx: &RuleContext<'_>) -> bool {
    match (input(ctx), output(ctx)) {
        (Some(i), Some(o)) => i.network.hash() == o.network.hash(),
        _ => false,
    }
}

fn holder_unchanged(ctx: &RuleContext<'_>) -> bool {
    match (input(ctx), output(ctx)) {
        (Some(i), Some(o)) => i.holder == o.holder,
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

fn amend_signed(ctx: &RuleContext<'_>) -> bool {
    input(ctx).map_or(false, |m| holder_or_operator_signed(ctx, m))
}

fn revoke_signed(ctx: &RuleContext<'_>) -> bool {
    input(ctx).map_or(false, |m| holder_or_operator_signed(ctx, m))
}

pub(super) static ISSUE: &[Rule] = &[
    Rule {
        id: ids::MEMBERSHIP_ISSUE_INPUTS,
        message: "No memberships may be consumed when issuing a membership",
        check: no_inputs,
    },
    Rule {
        id: ids::MEMBERSHIP_ISSUE_OUTPUTS,
        message: "Exactly one membership must be created",
        check: one_output,
    },
    Rule {
        id: ids::MEMBERSHIP_ISSUE_OPERATOR_ROLE,
        message: "Only the network operator may, and must, carry the network operator role",
        check: output_operator_role,
    },
    Rule {
        id: ids::MEMBERSHIP_ISSUE_PREVIOUS,
        message: "A new membership must not reference a previous version",
        check: issue_previous_absent,
    },
    Rule {
        id: ids::MEMBERSHIP_ISSUE_SIGNERS,
        message: "The holder must sign a membership issuance",
        check: issue_holder_signed,
    },
];

pub(super) static AMEND: &[Rule] = &[
    Rule {
        id: ids::MEMBERSHIP_AMEND_INPUTS,
        message: "Exactly one membership must be consumed",
        check: one_input,
    },
    Rule {
        id: ids::MEMBERSHIP_AMEND_OUTPUTS,
        message: "Exactly one membership must be created",
        check: one_output,
    },
    Rule {
        id: ids::MEMBERSHIP_AMEND_NETWORK,
        message: "The network of a membership cannot change",
        check: network_unchanged,
    },
    Rule {
        id: ids::MEMBERSHIP_AMEND_HOLDER,
        message: "The holder of a membership cannot change",
        check: holder_unchanged,
    },
    Rule {
        id: ids::MEMBERSHIP_AMEND_OPERATOR_ROLE,
        message: "Only the network operator may, and must, carry the network operator role",
        check: output_operator_role,
    },
    Rule {
        id: ids::MEMBERSHIP_AMEND_LINEAR_ID,
        message: "The linear id of a membership cannot change",
        check: linear_id_unchanged,
    },
    Rule {
        id: ids::MEMBERSHIP_AMEND_PREVIOUS,
        message: "The amended membership must reference the consumed version",
        check: previous_is_input,
    },
    Rule {
        id: ids::MEMBERSHIP_AMEND_SIGNERS,
        message: "The holder or the network operator must sign a membership amendment",
        check: amend_signed,
    },
];

pub(super) static REVOKE: &[Rule] = &[
    Rule {
        id: ids::MEMBERSHIP_REVOKE_INPUTS,
        message: "Exactly one membership must be consumed",
        check: one_input,
    },
    Rule {
        id: ids::MEMBERSHIP_REVOKE_OUTPUTS,
        message: "No memberships may be created when revoking a membership",
        check: no_outputs,
    },
    Rule {
        id: ids::MEMBERSHIP_REVOKE_SIGNERS,
        message: "The holder or the network operator must sign a membership revocation",
        check: revoke_signed,
    },
];

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::{ids, RuleEngine};
    use crate::state::{ContractState, Membership, StateAndRef};
    use crate::transaction::Operation;
    use crate::types::{NetworkIdentity, Party, StateType};

    fn rule(tx: &crate::transaction::LedgerTransaction) -> Option<&'static str> {
        RuleEngine::default().check(tx).err().map(|r| r.rule)
    }

    fn issue(membership: Membership, signers: &[&Party]) -> crate::transaction::LedgerTransaction {
        let mut fixture = TxFixture::new(StateType::Membership, Operation::Issue)
            .output(ContractState::Membership(membership));
        for signer in signers {
            fixture = fixture.signer(signer);
        }
        fixture.build()
    }

    fn recorded(membership: Membership) -> StateAndRef {
        StateAndRef::new(ContractState::Membership(membership), state_ref("m1", 0))
    }

    #[test]
    fn test_issue_accepted() {
        let alice = party("Alice");
        let membership = Membership::new(NetworkIdentity::new("Trade"), alice.clone());
        assert_eq!(rule(&issue(membership, &[&alice])), None);
    }

    #[test]
    fn test_issue_requires_holder_signature() {
        let alice = party("Alice");
        let bob = party("Bob");
        let membership = Membership::new(NetworkIdentity::new("Trade"), alice);
        assert_eq!(
            rule(&issue(membership, &[&bob])),
            Some(ids::MEMBERSHIP_ISSUE_SIGNERS)
        );
    }

    #[test]
    fn test_issue_rejects_previous_ref() {
        let alice = party("Alice");
        let membership =
            Membership::new(NetworkIdentity::new("Trade"), alice.clone()).successor(state_ref("x", 0));
        assert_eq!(
            rule(&issue(membership, &[&alice])),
            Some(ids::MEMBERSHIP_ISSUE_PREVIOUS)
        );
    }

    #[test]
    fn test_operator_role_both_directions() {
        let operator = party("Operator");
        let alice = party("Alice");
        let network = NetworkIdentity::with_operator("Trade", operator.clone());

        // Operator without the role
        let bare = Membership::new(network.clone(), operator.clone());
        assert_eq!(
            rule(&issue(bare, &[&operator])),
            Some(ids::MEMBERSHIP_ISSUE_OPERATOR_ROLE)
        );

        // Non-operator claiming the role
        let impostor = Membership::new(network.clone(), alice.clone()).with_role("Network Operator");
        assert_eq!(
            rule(&issue(impostor, &[&alice])),
            Some(ids::MEMBERSHIP_ISSUE_OPERATOR_ROLE)
        );

        let proper = Membership::new(network, operator.clone()).with_role("Network Operator");
        assert_eq!(rule(&issue(proper, &[&operator])), None);
    }

    #[test]
    fn test_operator_role_checked_before_previous_ref() {
        let operator = party("Operator");
        let alice = party("Alice");
        let network = NetworkIdentity::with_operator("Trade", operator);

        let impostor = Membership::new(network.clone(), alice.clone())
            .with_role("Network Operator")
            .successor(state_ref("x", 0));
        assert_eq!(
            rule(&issue(impostor, &[&alice])),
            Some(ids::MEMBERSHIP_ISSUE_OPERATOR_ROLE)
        );

        let v1 = recorded(Membership::new(network, alice.clone()));
        let m1 = v1.state.as_membership().unwrap().clone();
        let tx = TxFixture::new(StateType::Membership, Operation::Amend)
            .input(v1)
            .output(ContractState::Membership(
                m1.successor(state_ref("other", 0)).with_role("Network Operator"),
            ))
            .signer(&alice)
            .build();
        assert_eq!(rule(&tx), Some(ids::MEMBERSHIP_AMEND_OPERATOR_ROLE));
    }

    #[test]
    fn test_issue_rejects_two_outputs() {
        let alice = party("Alice");
        let network = NetworkIdentity::new("Trade");
        let tx = TxFixture::new(StateType::Membership, Operation::Issue)
            .output(ContractState::Membership(Membership::new(network.clone(), alice.clone())))
            .output(ContractState::Membership(Membership::new(network, alice.clone())))
            .signer(&alice)
            .build();
        assert_eq!(rule(&tx), Some(ids::MEMBERSHIP_ISSUE_OUTPUTS));
    }

    #[test]
    fn test_amend_chain() {
        let operator = party("Operator");
        let alice = party("Alice");
        let network = NetworkIdentity::with_operator("Trade", operator.clone());
        let v1 = recorded(Membership::new(network, alice.clone()));
        let m1 = v1.state.as_membership().unwrap().clone();

        // Operator may amend on the holder's behalf
        let ok = TxFixture::new(StateType::Membership, Operation::Amend)
            .input(v1.clone())
            .output(ContractState::Membership(m1.successor(v1.state_ref).with_role("Trader")))
            .signer(&operator)
            .build();
        assert_eq!(rule(&ok), None);

        // Forged previous pointer
        let forged = TxFixture::new(StateType::Membership, Operation::Amend)
            .input(v1.clone())
            .output(ContractState::Membership(m1.successor(state_ref("other", 0))))
            .signer(&alice)
            .build();
        assert_eq!(rule(&forged), Some(ids::MEMBERSHIP_AMEND_PREVIOUS));

        // Holder change
        let mut moved = m1.successor(v1.state_ref);
        moved.holder = party("Mallory");
        let tx = TxFixture::new(StateType::Membership, Operation::Amend)
            .input(v1.clone())
            .output(ContractState::Membership(moved))
            .signer(&alice)
            .build();
        assert_eq!(rule(&tx), Some(ids::MEMBERSHIP_AMEND_HOLDER));

        // Network change, compared by hash
        let mut renamed = m1.successor(v1.state_ref);
        renamed.network.value = "  TRADE ".to_string();
        let same = TxFixture::new(StateType::Membership, Operation::Amend)
            .input(v1.clone())
            .output(ContractState::Membership(renamed.clone()))
            .signer(&alice)
            .build();
        assert_eq!(rule(&same), None);

        renamed.network.value = "Other".to_string();
        let different = TxFixture::new(StateType::Membership, Operation::Amend)
            .input(v1)
            .output(ContractState::Membership(renamed))
            .signer(&alice)
            .build();
        assert_eq!(rule(&different), Some(ids::MEMBERSHIP_AMEND_NETWORK));
    }

    #[test]
    fn test_amend_requires_holder_or_operator() {
        let alice = party("Alice");
        let v1 = recorded(Membership::new(NetworkIdentity::new("Trade"), alice));
        let m1 = v1.state.as_membership().unwrap().clone();
        let stranger = party("Stranger");

        let tx = TxFixture::new(StateType::Membership, Operation::Amend)
            .input(v1.clone())
            .output(ContractState::Membership(m1.successor(v1.state_ref)))
            .signer(&stranger)
            .build();
        assert_eq!(rule(&tx), Some(ids::MEMBERSHIP_AMEND_SIGNERS));
    }

    #[test]
    fn test_revoke() {
        let alice = party("Alice");
        let v1 = recorded(Membership::new(NetworkIdentity::new("Trade"), alice.clone()));

        let ok = TxFixture::new(StateType::Membership, Operation::Revoke)
            .input(v1.clone())
            .signer(&alice)
            .build();
        assert_eq!(rule(&ok), None);

        let with_output = TxFixture::new(StateType::Membership, Operation::Revoke)
            .input(v1.clone())
            .output(v1.state.clone())
            .signer(&alice)
            .build();
        assert_eq!(rule(&with_output), Some(ids::MEMBERSHIP_REVOKE_OUTPUTS));

        let unsigned = TxFixture::new(StateType::Membership, Operation::Revoke)
            .input(v1)
            .build();
        assert_eq!(rule(&unsigned), Some(ids::MEMBERSHIP_REVOKE_SIGNERS));
    }
}
