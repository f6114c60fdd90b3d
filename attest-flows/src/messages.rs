//! Session messages
//!
//! Every payload crossing a session is a [`FlowMessage`] encoded with
//! bincode. Nothing received is trusted: transactions are re-verified and
//! re-validated by the receiver before they are signed or recorded.

use crate::{Error, Result};
use attest_core::{
    LinearId, NetworkIdentity, Party, SignedTransaction, TransactionSignature,
};
use serde::{Deserialize, Serialize};

/// Why a counterparty refused to go on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Refusal {
    /// A transition rule failed
    Rule {
        /// Rule identifier
        rule: String,
        /// Rule description
        message: String,
    },
    /// The refusing party still holds its revocation lock
    LockHeld {
        /// Lock owner
        owner: Party,
    },
    /// A referenced version is no longer live
    StaleReference(String),
    /// A counterparty has no verified membership
    Membership(String),
    /// The refusing party timed out waiting for one of its own peers
    PeerTimeout(String),
    /// The refusing party could not reach one of its own peers
    PeerUnreachable(String),
    /// A query or pointer resolution timed out on the refusing party
    QueryTimeout(String),
    /// Anything else
    Other(String),
}

impl Refusal {
    /// Map a local failure to what the counterparty is told
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Core(attest_core::Error::RuleViolation { rule, message }) => Refusal::Rule {
                rule: rule.clone(),
                message: message.clone(),
            },
            Error::Core(attest_core::Error::LockHeld { owner }) => Refusal::LockHeld {
                owner: owner.clone(),
            },
            Error::Core(attest_core::Error::StaleReference(msg)) => {
                Refusal::StaleReference(msg.clone())
            }
            Error::Core(attest_core::Error::PeerTimeout(msg)) => Refusal::PeerTimeout(msg.clone()),
            Error::Core(attest_core::Error::PeerUnreachable(msg)) => {
                Refusal::PeerUnreachable(msg.clone())
            }
            Error::Core(attest_core::Error::QueryTimeout(msg)) => {
                Refusal::QueryTimeout(msg.clone())
            }
            other => Refusal::Other(other.to_string()),
        }
    }

    /// The error the initiator surfaces for a refusal by `party`
    pub fn into_error(self, party: Party) -> Error {
        match self {
            Refusal::Rule { rule, message } => {
                attest_core::Error::RuleViolation { rule, message }.into()
            }
            Refusal::LockHeld { owner } => attest_core::Error::LockHeld { owner }.into(),
            Refusal::StaleReference(msg) => attest_core::Error::StaleReference(msg).into(),
            Refusal::PeerTimeout(msg) => {
                attest_core::Error::PeerTimeout(format!("{}: {}", party, msg)).into()
            }
            Refusal::PeerUnreachable(msg) => {
                attest_core::Error::PeerUnreachable(format!("{}: {}", party, msg)).into()
            }
            Refusal::QueryTimeout(msg) => {
                attest_core::Error::QueryTimeout(format!("{}: {}", party, msg)).into()
            }
            Refusal::Membership(reason) | Refusal::Other(reason) => {
                Error::Aborted { party, reason }
            }
        }
    }
}

/// Everything a node shares about its membership in a network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPackage {
    /// Transaction that created the sender's live membership
    pub membership: Option<SignedTransaction>,
    /// Transactions that created the live attestations over it
    pub attestations: Vec<SignedTransaction>,
    /// Their transitive dependencies, oldest first
    pub dependencies: Vec<SignedTransaction>,
}

impl SyncPackage {
    /// Whether the sender holds a live membership
    pub fn has_membership(&self) -> bool {
        self.membership.is_some()
    }
}

/// Session payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowMessage {
    /// Verify counterparties' memberships before signing the coming proposal
    CheckMembership {
        /// Network to check
        network: NetworkIdentity,
    },
    /// Validate this transaction
    Proposal {
        /// Transaction signed by the initiator
        tx: SignedTransaction,
        /// Its dependencies, oldest first
        dependencies: Vec<SignedTransaction>,
    },
    /// Proposal passed the responder's checks
    Validated,
    /// Every party validated; sign now
    SignRequest,
    /// Responder's signature
    Signature(TransactionSignature),
    /// Responder refuses
    Rejected(Refusal),
    /// Initiator gives up; discard the proposal
    Aborted {
        /// Why
        reason: String,
    },
    /// Notarised transaction to record
    Finalized {
        /// Transaction with every signature
        tx: SignedTransaction,
        /// Its dependencies, oldest first
        dependencies: Vec<SignedTransaction>,
    },
    /// Generic acknowledgement
    Ack,
    /// Does the receiver hold a revocation lock over `target`?
    LockQuery {
        /// Locked entity
        target: LinearId,
    },
    /// Answer to [`FlowMessage::LockQuery`]
    LockStatus {
        /// Whether the receiver blocks revocation
        locked: bool,
    },
    /// Exchange membership evidence
    Sync {
        /// Network being synchronised
        network: NetworkIdentity,
        /// Sender's evidence
        package: SyncPackage,
    },
    /// Answer to [`FlowMessage::Sync`]
    SyncReply {
        /// Receiver's evidence
        package: SyncPackage,
    },
}

impl FlowMessage {
    /// Message kind, for logs and protocol errors
    pub fn kind(&self) -> &'static str {
        match self {
            FlowMessage::CheckMembership { .. } => "CheckMembership",
            FlowMessage::Proposal { .. } => "Proposal",
            FlowMessage::Validated => "Validated",
            FlowMessage::SignRequest => "SignRequest",
            FlowMessage::Signature(_) => "Signature",
            FlowMessage::Rejected(_) => "Rejected",
            FlowMessage::Aborted { .. } => "Aborted",
            FlowMessage::Finalized { .. } => "Finalized",
            FlowMessage::Ack => "Ack",
            FlowMessage::LockQuery { .. } => "LockQuery",
            FlowMessage::LockStatus { .. } => "LockStatus",
            FlowMessage::Sync { .. } => "Sync",
            FlowMessage::SyncReply { .. } => "SyncReply",
        }
    }

    /// Protocol error for receiving this message while waiting for `expected`
    pub fn unexpected(&self, expected: &'static str) -> Error {
        Error::UnexpectedMessage {
            expected,
            got: self.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::KeyPair;

    fn party(name: &str) -> Party {
        Party::new(name, KeyPair::generate().public_key())
    }

    #[test]
    fn test_refusal_maps_back_to_core_errors() {
        let bob = party("Bob");

        let held = Refusal::LockHeld { owner: bob.clone() }.into_error(bob.clone());
        assert!(matches!(
            held,
            Error::Core(attest_core::Error::LockHeld { ref owner }) if owner == &bob
        ));

        let rule = Refusal::Rule {
            rule: "relationship.revoke.signers".into(),
            message: "All participants must sign".into(),
        }
        .into_error(bob.clone());
        assert_eq!(rule.rule_id(), Some("relationship.revoke.signers"));

        let membership = Refusal::Membership("no membership".into()).into_error(bob.clone());
        assert!(matches!(membership, Error::Aborted { party, .. } if party == bob));
    }

    #[test]
    fn test_refusal_from_error() {
        let err: Error = attest_core::Error::StaleReference("gone".into()).into();
        assert_eq!(
            Refusal::from_error(&err),
            Refusal::StaleReference("gone".into())
        );

        let other = Error::Protocol("bad".into());
        assert!(matches!(Refusal::from_error(&other), Refusal::Other(_)));
    }

    #[test]
    fn test_responder_timeouts_stay_retryable() {
        let bob = party("Bob");
        let timeouts: [Error; 3] = [
            attest_core::Error::PeerTimeout("carol".into()).into(),
            attest_core::Error::PeerUnreachable("carol".into()).into(),
            attest_core::Error::QueryTimeout("membership lookup".into()).into(),
        ];

        for err in timeouts {
            let refusal = Refusal::from_error(&err);
            assert!(!matches!(refusal, Refusal::Other(_)));
            let surfaced = refusal.into_error(bob.clone());
            assert!(surfaced.is_retryable(), "{} should be retryable", surfaced);
            assert!(surfaced.to_string().contains("Bob"));
        }

        let slow = Error::from(attest_core::Error::QueryTimeout("slow".into()));
        let query = Refusal::from_error(&slow).into_error(bob);
        assert!(matches!(
            query,
            Error::Core(attest_core::Error::QueryTimeout(_))
        ));
    }

    #[test]
    fn test_message_survives_wire_encoding() {
        let msg = FlowMessage::Sync {
            network: NetworkIdentity::with_operator("Trade", party("Operator")),
            package: SyncPackage::default(),
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: FlowMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind(), "Sync");
    }
}
