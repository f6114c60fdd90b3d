//! Error types for attestation flows

use attest_core::Party;
use thiserror::Error;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Flow errors
#[derive(Error, Debug)]
pub enum Error {
    /// Core error (rules, vault, notary, locks)
    #[error(transparent)]
    Core(#[from] attest_core::Error),

    /// A counterparty refused the transaction; nothing was committed
    #[error("Transaction aborted by {party}: {reason}")]
    Aborted {
        /// Refusing counterparty
        party: Party,
        /// Reason given
        reason: String,
    },

    /// Counterparty broke the session protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message of the wrong kind for the current step
    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        /// What the step waits for
        expected: &'static str,
        /// What arrived
        got: &'static str,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the initiator may retry with a fresh proposal
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Core(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Rule identifier if a rule rejected the transaction
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Error::Core(e) => e.rule_id(),
            _ => None,
        }
    }

    /// Underlying core error, if any
    pub fn as_core(&self) -> Option<&attest_core::Error> {
        match self {
            Error::Core(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{KeyPair, StateRef};

    #[test]
    fn test_retryable_follows_core() {
        let timeout: Error = attest_core::Error::PeerTimeout("Bob".into()).into();
        assert!(timeout.is_retryable());

        let conflict: Error = attest_core::Error::Conflict(Vec::<StateRef>::new()).into();
        assert!(conflict.is_retryable());

        let aborted = Error::Aborted {
            party: Party::new("Bob", KeyPair::generate().public_key()),
            reason: "no".into(),
        };
        assert!(!aborted.is_retryable());
    }

    #[test]
    fn test_rule_id_passthrough() {
        let err: Error = attest_core::Error::RuleViolation {
            rule: "membership.issue.signers".into(),
            message: "Holder must sign".into(),
        }
        .into();
        assert_eq!(err.rule_id(), Some("membership.issue.signers"));
        assert!(err.to_string().contains("membership.issue.signers"));
    }
}
