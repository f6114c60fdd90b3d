//! Transition rule engine
//!
//! Rules are plain functions grouped in static tables keyed by
//! `(StateType, Operation)`. A transaction is accepted only when every rule
//! of its command passes; the first failing rule, in declared order, is the
//! rejection. Rules see nothing but the resolved [`LedgerTransaction`] and
//! the [`RulesConfig`] constants, so validation is deterministic and every
//! peer reaches the same verdict.

mod attestation;
mod membership;
mod relationship;

use crate::config::RulesConfig;
use crate::metrics::Metrics;
use crate::state::StateAndRef;
use crate::transaction::{LedgerTransaction, Operation};
use crate::types::{Party, StateType};
use crate::{Error, Result};
use std::fmt;

/// Rule identifiers, `<variant>.<operation>.<check>`
///
/// Each table's ids are listed in the order the table checks them.
#[allow(missing_docs)]
pub mod ids {
    /// Inputs and outputs must be of the command's variant
    pub const FOREIGN_STATES: &str = "transaction.foreign-states";
    /// The command has no rule table
    pub const NO_RULES: &str = "transaction.no-rules";

    pub const MEMBERSHIP_ISSUE_INPUTS: &str = "membership.issue.inputs";
    pub const MEMBERSHIP_ISSUE_OUTPUTS: &str = "membership.issue.outputs";
    pub const MEMBERSHIP_ISSUE_OPERATOR_ROLE: &str = "membership.issue.operator-role";
    pub const MEMBERSHIP_ISSUE_PREVIOUS: &str = "membership.issue.previous-ref";
    pub const MEMBERSHIP_ISSUE_SIGNERS: &str = "membership.issue.signers";

    pub const MEMBERSHIP_AMEND_INPUTS: &str = "membership.amend.inputs";
    pub const MEMBERSHIP_AMEND_OUTPUTS: &str = "membership.amend.outputs";
    pub const MEMBERSHIP_AMEND_NETWORK: &str = "membership.amend.network";
    pub const MEMBERSHIP_AMEND_HOLDER: &str = "membership.amend.holder";
    pub const MEMBERSHIP_AMEND_OPERATOR_ROLE: &str = "membership.amend.operator-role";
    pub const MEMBERSHIP_AMEND_LINEAR_ID: &str = "membership.amend.linear-id";
    pub const MEMBERSHIP_AMEND_PREVIOUS: &str = "membership.amend.previous-ref";
    pub const MEMBERSHIP_AMEND_SIGNERS: &str = "membership.amend.signers";

    pub const MEMBERSHIP_REVOKE_INPUTS: &str = "membership.revoke.inputs";
    pub const MEMBERSHIP_REVOKE_OUTPUTS: &str = "membership.revoke.outputs";
    pub const MEMBERSHIP_REVOKE_SIGNERS: &str = "membership.revoke.signers";

    pub const RELATIONSHIP_ISSUE_INPUTS: &str = "relationship.issue.inputs";
    pub const RELATIONSHIP_ISSUE_OUTPUTS: &str = "relationship.issue.outputs";
    pub const RELATIONSHIP_ISSUE_DISTINCT_MEMBERS: &str = "relationship.issue.distinct-members";
    pub const RELATIONSHIP_ISSUE_DISTINCT_SETTINGS: &str = "relationship.issue.distinct-settings";
    pub const RELATIONSHIP_ISSUE_MIN_MEMBERS: &str = "relationship.issue.min-members";
    pub const RELATIONSHIP_ISSUE_LOCKS: &str = "relationship.issue.locks";
    pub const RELATIONSHIP_ISSUE_PREVIOUS: &str = "relationship.issue.previous-ref";
    pub const RELATIONSHIP_ISSUE_SIGNERS: &str = "relationship.issue.signers";

    pub const RELATIONSHIP_AMEND_INPUTS: &str = "relationship.amend.inputs";
    pub const RELATIONSHIP_AMEND_OUTPUTS: &str = "relationship.amend.outputs";
    pub const RELATIONSHIP_AMEND_NETWORK: &str = "relationship.amend.network";
    pub const RELATIONSHIP_AMEND_LINEAR_ID: &str = "relationship.amend.linear-id";
    pub const RELATIONSHIP_AMEND_DISTINCT_MEMBERS: &str = "relationship.amend.distinct-members";
    pub const RELATIONSHIP_AMEND_DISTINCT_SETTINGS: &str = "relationship.amend.distinct-settings";
    pub const RELATIONSHIP_AMEND_MIN_MEMBERS: &str = "relationship.amend.min-members";
    pub const RELATIONSHIP_AMEND_PREVIOUS: &str = "relationship.amend.previous-ref";
    pub const RELATIONSHIP_AMEND_LOCKS: &str = "relationship.amend.locks";
    pub const RELATIONSHIP_AMEND_SIGNERS: &str = "relationship.amend.signers";

    pub const RELATIONSHIP_REVOKE_INPUTS: &str = "relationship.revoke.inputs";
    pub const RELATIONSHIP_REVOKE_OUTPUTS: &str = "relationship.revoke.outputs";
    pub const RELATIONSHIP_REVOKE_SIGNERS: &str = "relationship.revoke.signers";

    pub const ATTESTATION_ISSUE_INPUTS: &str = "attestation.issue.inputs";
    pub const ATTESTATION_ISSUE_OUTPUTS: &str = "attestation.issue.outputs";
    pub const ATTESTATION_ISSUE_REFERENCE: &str = "attestation.issue.reference";
    pub const ATTESTATION_ISSUE_POINTER: &str = "attestation.issue.pointer";
    pub const ATTESTATION_ISSUE_PREVIOUS: &str = "attestation.issue.previous-ref";
    pub const ATTESTATION_ISSUE_NETWORK: &str = "attestation.issue.network";
    pub const ATTESTATION_ISSUE_ATTESTEES: &str = "attestation.issue.attestees";
    pub const ATTESTATION_ISSUE_SELF_ATTESTATION: &str = "attestation.issue.self-attestation";
    pub const ATTESTATION_ISSUE_ATTESTOR: &str = "attestation.issue.attestor";
    pub const ATTESTATION_ISSUE_SIGNERS: &str = "attestation.issue.signers";

    pub const ATTESTATION_AMEND_INPUTS: &str = "attestation.amend.inputs";
    pub const ATTESTATION_AMEND_OUTPUTS: &str = "attestation.amend.outputs";
    pub const ATTESTATION_AMEND_REFERENCE: &str = "attestation.amend.reference";
    pub const ATTESTATION_AMEND_POINTER: &str = "attestation.amend.pointer";
    pub const ATTESTATION_AMEND_PREVIOUS: &str = "attestation.amend.previous-ref";
    pub const ATTESTATION_AMEND_NETWORK: &str = "attestation.amend.network";
    pub const ATTESTATION_AMEND_ATTESTEES: &str = "attestation.amend.attestees";
    pub const ATTESTATION_AMEND_SELF_ATTESTATION: &str = "attestation.amend.self-attestation";
    pub const ATTESTATION_AMEND_ATTESTOR: &str = "attestation.amend.attestor";
    pub const ATTESTATION_AMEND_ATTESTOR_UNCHANGED: &str = "attestation.amend.attestor-unchanged";
    pub const ATTESTATION_AMEND_LINEAR_ID: &str = "attestation.amend.linear-id";
    pub const ATTESTATION_AMEND_SIGNERS: &str = "attestation.amend.signers";

    pub const ATTESTATION_REVOKE_INPUTS: &str = "attestation.revoke.inputs";
    pub const ATTESTATION_REVOKE_OUTPUTS: &str = "attestation.revoke.outputs";
    pub const ATTESTATION_REVOKE_SIGNERS: &str = "attestation.revoke.signers";
}

/// A single named check
#[derive(Clone, Copy)]
pub struct Rule {
    /// Stable identifier
    pub id: &'static str,
    /// What the rule requires
    pub message: &'static str,
    /// Returns true when the transaction satisfies the rule
    pub check: fn(&RuleContext<'_>) -> bool,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("id", &self.id).finish()
    }
}

/// Everything a rule may look at
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Rule constants
    pub config: &'a RulesConfig,
    /// Transaction under validation
    pub tx: &'a LedgerTransaction,
}

impl<'a> RuleContext<'a> {
    /// Variant the command governs
    pub fn state_type(&self) -> StateType {
        self.tx.command.state_type
    }

    /// Consumed states of the command's variant
    pub fn inputs(&self) -> Vec<&'a StateAndRef> {
        self.tx.inputs_of(self.state_type())
    }

    /// Created states of the command's variant
    pub fn outputs(&self) -> Vec<&'a StateAndRef> {
        self.tx.outputs_of(self.state_type())
    }

    /// The consumed state, when there is exactly one
    pub fn single_input(&self) -> Option<&'a StateAndRef> {
        match self.inputs().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// The created state, when there is exactly one
    pub fn single_output(&self) -> Option<&'a StateAndRef> {
        match self.outputs().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Whether `party` is a declared signer
    pub fn signed_by(&self, party: &Party) -> bool {
        self.tx.is_signed_by(party)
    }
}

/// Result of a failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Identifier of the first failing rule
    pub rule: &'static str,
    /// Rule description
    pub message: &'static str,
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        Error::RuleViolation {
            rule: rejection.rule.to_string(),
            message: rejection.message.to_string(),
        }
    }
}

static COMMON: &[Rule] = &[Rule {
    id: ids::FOREIGN_STATES,
    message: "Inputs and outputs must be of the command's type",
    check: no_foreign_states,
}];

fn no_foreign_states(ctx: &RuleContext<'_>) -> bool {
    let state_type = ctx.state_type();
    let locks_allowed = state_type == StateType::Relationship
        && matches!(ctx.tx.command.operation, Operation::Issue | Operation::Amend);

    let inputs_ok = ctx
        .tx
        .inputs
        .iter()
        .all(|s| s.state.state_type() == state_type);
    let outputs_ok = ctx.tx.outputs.iter().all(|s| {
        let t = s.state.state_type();
        t == state_type || (locks_allowed && t == StateType::RevocationLock)
    });

    inputs_ok && outputs_ok
}

/// Rule table for a command
pub fn rules_for(state_type: StateType, operation: Operation) -> &'static [Rule] {
    match (state_type, operation) {
        (StateType::Membership, Operation::Issue) => membership::ISSUE,
        (StateType::Membership, Operation::Amend) => membership::AMEND,
        (StateType::Membership, Operation::Revoke) => membership::REVOKE,
        (StateType::Relationship, Operation::Issue) => relationship::ISSUE,
        (StateType::Relationship, Operation::Amend) => relationship::AMEND,
        (StateType::Relationship, Operation::Revoke) => relationship::REVOKE,
        (
            StateType::MembershipAttestation | StateType::RelationshipAttestation,
            Operation::Issue,
        ) => attestation::ISSUE,
        (
            StateType::MembershipAttestation | StateType::RelationshipAttestation,
            Operation::Amend,
        ) => attestation::AMEND,
        (
            StateType::MembershipAttestation | StateType::RelationshipAttestation,
            Operation::Revoke,
        ) => attestation::REVOKE,
        (StateType::RevocationLock, _) => &[],
    }
}

/// Validates transactions against the rule tables
#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: RulesConfig,
    metrics: Option<Metrics>,
}

impl RuleEngine {
    /// Create an engine with the given constants
    pub fn new(config: RulesConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Count rejections in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Rule constants
    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    /// Run every rule of the transaction's command, stopping at the first failure
    pub fn check(&self, tx: &LedgerTransaction) -> std::result::Result<(), Rejection> {
        let table = rules_for(tx.command.state_type, tx.command.operation);
        if table.is_empty() {
            return Err(Rejection {
                rule: ids::NO_RULES,
                message: "No rules are defined for this command",
            });
        }

        let ctx = RuleContext {
            config: &self.config,
            tx,
        };

        for rule in COMMON.iter().chain(table) {
            if !(rule.check)(&ctx) {
                return Err(Rejection {
                    rule: rule.id,
                    message: rule.message,
                });
            }
        }

        Ok(())
    }

    /// Validate a transaction, mapping a rejection to [`Error::RuleViolation`]
    pub fn validate(&self, tx: &LedgerTransaction) -> Result<()> {
        match self.check(tx) {
            Ok(()) => {
                tracing::debug!(tx_id = %tx.id, command = %tx.command, "Transaction passed rules");
                Ok(())
            }
            Err(rejection) => {
                tracing::info!(
                    tx_id = %tx.id,
                    command = %tx.command,
                    rule = rejection.rule,
                    "Transaction rejected"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(rejection.rule);
                }
                Err(rejection.into())
            }
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RulesConfig::default())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Helpers for building resolved transactions in rule tests

    use crate::crypto::{KeyPair, SecureHash};
    use crate::state::{ContractState, StateAndRef};
    use crate::transaction::{Command, LedgerTransaction, Operation};
    use crate::types::{Party, StateRef, StateType};
    use std::collections::BTreeSet;

    pub fn party(name: &str) -> Party {
        Party::new(name, KeyPair::generate().public_key())
    }

    pub fn state_ref(seed: &str, index: u32) -> StateRef {
        StateRef::new(SecureHash::sha256(seed.as_bytes()), index)
    }

    /// A resolved transaction with outputs numbered from a fixed id
    pub struct TxFixture {
        pub inputs: Vec<StateAndRef>,
        pub references: Vec<StateAndRef>,
        pub outputs: Vec<ContractState>,
        pub state_type: StateType,
        pub operation: Operation,
        pub signers: Vec<Party>,
    }

    impl TxFixture {
        pub fn new(state_type: StateType, operation: Operation) -> Self {
            Self {
                inputs: Vec::new(),
                references: Vec::new(),
                outputs: Vec::new(),
                state_type,
                operation,
                signers: Vec::new(),
            }
        }

        pub fn input(mut self, state: StateAndRef) -> Self {
            self.inputs.push(state);
            self
        }

        pub fn reference(mut self, state: StateAndRef) -> Self {
            self.references.push(state);
            self
        }

        pub fn output(mut self, state: ContractState) -> Self {
            self.outputs.push(state);
            self
        }

        pub fn signer(mut self, party: &Party) -> Self {
            self.signers.push(party.clone());
            self
        }

        pub fn build(self) -> LedgerTransaction {
            let id = SecureHash::sha256(b"fixture-tx");
            let signers: BTreeSet<_> = self.signers.iter().map(|p| p.owning_key).collect();
            LedgerTransaction {
                id,
                inputs: self.inputs,
                references: self.references,
                outputs: self
                    .outputs
                    .into_iter()
                    .enumerate()
                    .map(|(i, s)| StateAndRef::new(s, StateRef::new(id, i as u32)))
                    .collect(),
                command: Command::new(self.state_type, self.operation, signers.clone()),
                signers,
            }
        }
    }
}
