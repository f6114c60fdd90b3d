//! Attest Core
//!
//! Versioned, hash-identified records (network memberships, relationships
//! and attestations over them) whose every change must satisfy a per-command
//! rule set and carry the signatures of every affected party.
//!
//! # Architecture
//!
//! - **Hash chain**: each new version names the exact ledger reference of the
//!   version it replaces
//! - **Rule engine**: table-driven, keyed by `(StateType, Operation)`
//! - **Revocation locks**: per-owner records blocking revocation of shared entities
//! - **Vault**: RocksDB projection of the ledger a node is party to
//! - **Notary**: single-writer actor preventing double spends
//!
//! # Invariants
//!
//! - Linear history: accepted versions of an identity form a total order
//! - At most one successor per version
//! - Exact-version pointers: attestations never silently follow amendments

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod notary;
pub mod query;
pub mod resolver;
pub mod rules;
pub mod state;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod vault;

// Re-exports
pub use config::{Config, RulesConfig, TimeoutConfig, DEFAULT_OPERATOR_ROLE};
pub use crypto::{KeyPair, PublicKey, SecureHash, Signature};
pub use error::{Error, Result};
pub use locks::RevocationLockManager;
pub use metrics::Metrics;
pub use notary::{spawn_notary, Notary, NotaryHandle, NotaryOutcome};
pub use query::{Page, QueryCriteria, QueryService};
pub use resolver::PointerResolver;
pub use rules::{Rejection, RuleEngine};
pub use state::{
    Attestation, AttestationPointer, AttestationStatus, ContractState, LockStatus, Membership,
    Relationship, RelationshipMember, RevocationLock, Setting, StateAndRef, Versionable,
};
pub use storage::Storage;
pub use transaction::{
    Command, LedgerTransaction, Operation, SignedTransaction, TransactionBuilder,
    TransactionSignature, WireTransaction,
};
pub use types::{LinearId, NetworkIdentity, Party, StateRef, StateStatus, StateType};
pub use vault::Vault;
