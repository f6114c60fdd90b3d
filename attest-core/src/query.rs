//! Query collaborator
//!
//! [`QueryCriteria`] always names the [`StateType`] it is looking for, so
//! callers never depend on runtime type inspection to build a query.

use crate::crypto::SecureHash;
use crate::state::StateAndRef;
use crate::types::{LinearId, Party, StateRef, StateStatus, StateType};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Predicates over stored states; unset fields match everything
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCriteria {
    /// Variant to search
    pub state_type: StateType,
    /// Lifecycle filter
    pub status: StateStatus,
    /// Linear identity
    pub linear_id: Option<LinearId>,
    /// Exact ledger reference
    pub state_ref: Option<StateRef>,
    /// Membership holder
    pub holder: Option<Party>,
    /// Revocation lock owner
    pub owner: Option<Party>,
    /// Network hash
    pub network_hash: Option<SecureHash>,
    /// Content hash
    pub content_hash: Option<SecureHash>,
    /// Attestor
    pub attestor: Option<Party>,
    /// Exact version an attestation points at
    pub pointer_ref: Option<StateRef>,
    /// Identity an attestation (or lock) points at
    pub pointer_linear_id: Option<LinearId>,
    /// Any participant
    pub participant: Option<Party>,
}

impl QueryCriteria {
    /// Match every unconsumed state of a variant
    pub fn new(state_type: StateType) -> Self {
        Self {
            state_type,
            status: StateStatus::Unconsumed,
            linear_id: None,
            state_ref: None,
            holder: None,
            owner: None,
            network_hash: None,
            content_hash: None,
            attestor: None,
            pointer_ref: None,
            pointer_linear_id: None,
            participant: None,
        }
    }

    /// Lifecycle filter
    pub fn status(mut self, status: StateStatus) -> Self {
        self.status = status;
        self
    }

    /// Linear identity
    pub fn linear_id(mut self, linear_id: LinearId) -> Self {
        self.linear_id = Some(linear_id);
        self
    }

    /// Exact ledger reference
    pub fn state_ref(mut self, state_ref: StateRef) -> Self {
        self.state_ref = Some(state_ref);
        self
    }

    /// Membership holder
    pub fn holder(mut self, holder: Party) -> Self {
        self.holder = Some(holder);
        self
    }

    /// Lock owner
    pub fn owner(mut self, owner: Party) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Network hash
    pub fn network_hash(mut self, hash: SecureHash) -> Self {
        self.network_hash = Some(hash);
        self
    }

    /// Content hash
    pub fn content_hash(mut self, hash: SecureHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    /// Attestor
    pub fn attestor(mut self, attestor: Party) -> Self {
        self.attestor = Some(attestor);
        self
    }

    /// Exact version an attestation points at
    pub fn pointer_ref(mut self, state_ref: StateRef) -> Self {
        self.pointer_ref = Some(state_ref);
        self
    }

    /// Identity an attestation or lock points at
    pub fn pointer_linear_id(mut self, linear_id: LinearId) -> Self {
        self.pointer_linear_id = Some(linear_id);
        self
    }

    /// Any participant
    pub fn participant(mut self, party: Party) -> Self {
        self.participant = Some(party);
        self
    }

    /// Whether a stored state satisfies every predicate
    pub fn matches(&self, state: &StateAndRef, consumed: bool, content_hash: &SecureHash) -> bool {
        let s = &state.state;
        if s.state_type() != self.state_type || !self.status.admits(consumed) {
            return false;
        }
        if self.state_ref.map_or(false, |r| r != state.state_ref) {
            return false;
        }
        if self.linear_id.is_some() && s.linear_id() != self.linear_id {
            return false;
        }
        if self.content_hash.map_or(false, |h| &h != content_hash) {
            return false;
        }
        if let Some(hash) = &self.network_hash {
            if s.network().map(|n| n.hash()).as_ref() != Some(hash) {
                return false;
            }
        }
        if let Some(holder) = &self.holder {
            if s.as_membership().map(|m| &m.holder) != Some(holder) {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if s.as_lock().map(|l| &l.owner) != Some(owner) {
                return false;
            }
        }
        if let Some(attestor) = &self.attestor {
            if s.as_attestation().map(|a| &a.attestor) != Some(attestor) {
                return false;
            }
        }
        if let Some(pointer_ref) = &self.pointer_ref {
            if s.as_attestation().map(|a| &a.pointer.state_ref) != Some(pointer_ref) {
                return false;
            }
        }
        if let Some(target) = &self.pointer_linear_id {
            let pointed = match s {
                crate::state::ContractState::RevocationLock(lock) => Some(lock.target),
                other => other.as_attestation().map(|a| a.pointer.linear_id),
            };
            if pointed.as_ref() != Some(target) {
                return false;
            }
        }
        if let Some(party) = &self.participant {
            if !s.participants().contains(party) {
                return false;
            }
        }
        true
    }
}

/// Page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Zero-based page number
    pub number: usize,
    /// Page size
    pub size: usize,
}

impl Page {
    /// Default page size
    pub const DEFAULT_SIZE: usize = 200;

    /// A page
    pub fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    /// First page of the default size
    pub fn first() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }

    /// Number of results skipped before this page
    pub fn offset(&self) -> usize {
        self.number.saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first()
    }
}

/// Read access to recorded states
#[async_trait]
pub trait QueryService: Send + Sync {
    /// The unique state matching `criteria`, if any
    async fn find_by_identity(&self, criteria: &QueryCriteria) -> Result<Option<StateAndRef>>;

    /// All states matching `criteria`, oldest first, one page at a time
    async fn find_all(&self, criteria: &QueryCriteria, page: Page) -> Result<Vec<StateAndRef>>;
}
