//! Error types for the attestation core

use crate::types::{Party, StateRef};
use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Error, Debug)]
pub enum Error {
    /// A transaction failed a transition rule (deterministic, never retried)
    #[error("Rule violation [{rule}]: {message}")]
    RuleViolation {
        /// Rule identifier
        rule: String,
        /// Human readable rule description
        message: String,
    },

    /// An equivalent unconsumed entity is already recorded
    #[error("Duplicate state: an equivalent entity with hash {0} already exists")]
    DuplicateState(String),

    /// A revocation lock is still held by its owner
    #[error("Revocation locked by counterparty: {owner}")]
    LockHeld {
        /// Owner of the lock
        owner: Party,
    },

    /// Caller is not the owner of the lock it tried to change
    #[error("Only the lock owner may change a revocation lock: {0}")]
    NotLockOwner(String),

    /// A pointer or previous-version reference no longer matches the live ledger
    #[error("Stale reference: {0}")]
    StaleReference(String),

    /// Peer did not answer within the configured timeout
    #[error("Peer timeout: {0}")]
    PeerTimeout(String),

    /// Peer could not be reached
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Query or resolve operation timed out
    #[error("Query timeout: {0}")]
    QueryTimeout(String),

    /// Ordering service reported that an input was already consumed
    #[error("Conflict: inputs already consumed: {0:?}")]
    Conflict(Vec<StateRef>),

    /// State not found
    #[error("State not found: {0}")]
    StateNotFound(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Malformed or inconsistent transaction
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureError(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller may retry the same operation
    ///
    /// Timeouts and unreachable peers are transient. A `Conflict` is fatal for
    /// the attempt but a fresh proposal may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PeerTimeout(_)
                | Error::PeerUnreachable(_)
                | Error::QueryTimeout(_)
                | Error::Conflict(_)
        )
    }

    /// Rule identifier if this is a rule violation
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Error::RuleViolation { rule, .. } => Some(rule),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::PeerTimeout("bob".into()).is_retryable());
        assert!(Error::PeerUnreachable("bob".into()).is_retryable());
        assert!(Error::Conflict(vec![]).is_retryable());
        assert!(!Error::DuplicateState("00".into()).is_retryable());
        assert!(!Error::StaleReference("ref".into()).is_retryable());
        assert!(!Error::RuleViolation {
            rule: "membership.issue.inputs".into(),
            message: "no inputs".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_rule_id() {
        let err = Error::RuleViolation {
            rule: "membership.issue.signers".into(),
            message: "holder must sign".into(),
        };
        assert_eq!(err.rule_id(), Some("membership.issue.signers"));
        assert_eq!(Error::Other("x".into()).rule_id(), None);
    }
}
