//! Attestation rules
//!
//! The same tables serve both attestation variants; the attested variant is
//! derived from the command (`MembershipAttestation` attests `Membership`).

use super::{ids, Rule, RuleContext};
use crate::state::{Attestation, ContractState, StateAndRef, Versionable};
use crate::types::{Party, StateType};
use std::collections::BTreeSet;

fn input<'a>(ctx: &RuleContext<'a>) -> Option<&'a Attestation> {
    ctx.single_input().and_then(|s| s.state.as_attestation())
}

fn output<'a>(ctx: &RuleContext<'a>) -> Option<&'a Attestation> {
    ctx.single_output().and_then(|s| s.state.as_attestation())
}

fn target_type(ctx: &RuleContext<'_>) -> Option<StateType> {
    ctx.state_type().attested_type()
}

/// The single referenced state of the attested variant
fn target<'a>(ctx: &RuleContext<'a>) -> Option<&'a StateAndRef> {
    let references = ctx.tx.references_of(target_type(ctx)?);
    match references.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Output attestation together with the state it attests
fn output_and_target<'a>(ctx: &RuleContext<'a>) -> Option<(&'a Attestation, &'a StateAndRef)> {
    Some((output(ctx)?, target(ctx)?))
}

fn expected_attestees(attestor: &Party, target: &ContractState) -> Option<BTreeSet<Party>> {
    match target {
        ContractState::Membership(m) => Some(BTreeSet::from([m.holder.clone()])),
        ContractState::Relationship(r) => {
            let mut parties = r.participants();
            parties.remove(attestor);
            Some(parties)
        }
        _ => None,
    }
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

fn one_reference(ctx: &RuleContext<'_>) -> bool {
    target(ctx).is_some()
}

fn pointer_matches(ctx: &RuleContext<'_>) -> bool {
    match (output_and_target(ctx), target_type(ctx)) {
        (Some((attestation, target)), Some(expected)) => {
            attestation.pointer.state_type == expected && attestation.pointer.matches(target)
        }
        _ => false,
    }
}

fn issue_previous_absent(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |a| a.previous_state_ref.is_none())
}

fn same_network(ctx: &RuleContext<'_>) -> bool {
    output_and_target(ctx).map_or(false, |(attestation, target)| {
        target
            .state
            .network()
            .map_or(false, |network| network.hash() == attestation.network.hash())
    })
}

fn attestees_match(ctx: &RuleContext<'_>) -> bool {
    output_and_target(ctx).map_or(false, |(attestation, target)| {
        expected_attestees(&attestation.attestor, &target.state).as_ref()
            == Some(&attestation.attestees)
    })
}

/// Nobody attests their own membership
fn not_self_attested(ctx: &RuleContext<'_>) -> bool {
    output_and_target(ctx).map_or(false, |(attestation, target)| match &target.state {
        ContractState::Membership(m) => attestation.attestor != m.holder,
        _ => true,
    })
}

/// Operator-run networks accept membership attestations from the operator
/// only; relationship attestations come from a participant
fn attestor_authorised(ctx: &RuleContext<'_>) -> bool {
    output_and_target(ctx).map_or(false, |(attestation, target)| match &target.state {
        ContractState::Membership(m) => m
            .network
            .operator
            .as_ref()
            .map_or(true, |operator| operator == &attestation.attestor),
        ContractState::Relationship(r) => r.participants().contains(&attestation.attestor),
        _ => false,
    })
}

fn output_attestor_signed(ctx: &RuleContext<'_>) -> bool {
    output(ctx).map_or(false, |a| ctx.signed_by(&a.attestor))
}

fn previous_is_input(ctx: &RuleContext<'_>) -> bool {
    match (ctx.single_input(), output(ctx)) {
        (Some(i), Some(o)) => o.previous_state_ref == Some(i.state_ref),
        _ => false,
    }
}

fn attestor_unchanged(ctx: &RuleContext<'_>) -> bool {
    match (input(ctx), output(ctx)) {
        (Some(i), Some(o)) => i.attestor == o.attestor,
        _ => false,
    }
}

fn linear_id_unchanged(ctx: &RuleContext<'_>) -> bool {
    match (input(ctx), output(ctx)) {
        (Some(i), Some(o)) => i.linear_id == o.linear_id,
        _ => false,
    }
}

fn input_attestor_signed(ctx: &RuleContext<'_>) -> bool {
    input(ctx).map_or(false, |a| ctx.signed_by(&a.attestor))
}

pub(super) static ISSUE: &[Rule] = &[
    Rule {
        id: ids::ATTESTATION_ISSUE_INPUTS,
        message: "No attestations may be consumed when issuing an attestation",
        check: no_inputs,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_OUTPUTS,
        message: "Exactly one attestation must be created",
        check: one_output,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_REFERENCE,
        message: "Exactly one attested state must be referenced",
        check: one_reference,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_POINTER,
        message: "The attestation pointer must match the referenced state exactly",
        check: pointer_matches,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_PREVIOUS,
        message: "A new attestation must not reference a previous version",
        check: issue_previous_absent,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_NETWORK,
        message: "The attestation network must equal the attested state's network",
        check: same_network,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_ATTESTEES,
        message: "The attestees must be the attested state's parties other than the attestor",
        check: attestees_match,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_SELF_ATTESTATION,
        message: "A holder cannot attest their own membership",
        check: not_self_attested,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_ATTESTOR,
        message: "Only the network operator, or a relationship participant, may attest",
        check: attestor_authorised,
    },
    Rule {
        id: ids::ATTESTATION_ISSUE_SIGNERS,
        message: "The attestor must sign",
        check: output_attestor_signed,
    },
];

pub(super) static AMEND: &[Rule] = &[
    Rule {
        id: ids::ATTESTATION_AMEND_INPUTS,
        message: "Exactly one attestation must be consumed",
        check: one_input,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_OUTPUTS,
        message: "Exactly one attestation must be created",
        check: one_output,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_REFERENCE,
        message: "Exactly one attested state must be referenced",
        check: one_reference,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_POINTER,
        message: "The attestation pointer must match the referenced state exactly",
        check: pointer_matches,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_PREVIOUS,
        message: "The amended attestation must reference the consumed version",
        check: previous_is_input,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_NETWORK,
        message: "The attestation network must equal the attested state's network",
        check: same_network,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_ATTESTEES,
        message: "The attestees must be the attested state's parties other than the attestor",
        check: attestees_match,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_SELF_ATTESTATION,
        message: "A holder cannot attest their own membership",
        check: not_self_attested,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_ATTESTOR,
        message: "Only the network operator, or a relationship participant, may attest",
        check: attestor_authorised,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_ATTESTOR_UNCHANGED,
        message: "The attestor of an attestation cannot change",
        check: attestor_unchanged,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_LINEAR_ID,
        message: "The linear id of an attestation cannot change",
        check: linear_id_unchanged,
    },
    Rule {
        id: ids::ATTESTATION_AMEND_SIGNERS,
        message: "The attestor must sign",
        check: output_attestor_signed,
    },
];

pub(super) static REVOKE: &[Rule] = &[
    Rule {
        id: ids::ATTESTATION_REVOKE_INPUTS,
        message: "Exactly one attestation must be consumed",
        check: one_input,
    },
    Rule {
        id: ids::ATTESTATION_REVOKE_OUTPUTS,
        message: "No attestations may be created when revoking an attestation",
        check: no_outputs,
    },
    Rule {
        id: ids::ATTESTATION_REVOKE_SIGNERS,
        message: "The attestor must sign",
        check: input_attestor_signed,
    },
];
