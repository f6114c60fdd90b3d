//! Identity types shared by every entity
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Total ordering, so sets of parties and keys iterate identically everywhere

use crate::crypto::{HashBuilder, PublicKey, SecureHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A named legal identity with its signing key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    /// Display name
    pub name: String,
    /// Key that signs on behalf of this party
    pub owning_key: PublicKey,
}

impl Party {
    /// Create a party
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }

    /// Feed this party into a content hash
    pub(crate) fn hash_into(&self, builder: &mut HashBuilder) {
        builder.update(self.name.as_bytes());
        builder.update(self.owning_key.as_bytes());
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Identity shared by every version of a linear entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinearId(Uuid);

impl LinearId {
    /// Fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LinearId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinearId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exact ledger reference: output `index` of transaction `tx_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    /// Transaction that created the state
    pub tx_id: SecureHash,
    /// Output index within that transaction
    pub index: u32,
}

impl StateRef {
    /// Create a reference
    pub fn new(tx_id: SecureHash, index: u32) -> Self {
        Self { tx_id, index }
    }

    /// Storage key: tx id followed by the big-endian index
    pub fn to_key(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(self.tx_id.as_bytes());
        key[32..].copy_from_slice(&self.index.to_be_bytes());
        key
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tx_id, self.index)
    }
}

/// Entity variant, supplied explicitly wherever a query or rule needs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum StateType {
    /// Network membership
    Membership = 1,
    /// Multi-party relationship
    Relationship = 2,
    /// Attestation over a membership
    MembershipAttestation = 3,
    /// Attestation over a relationship
    RelationshipAttestation = 4,
    /// Per-owner revocation lock
    RevocationLock = 5,
}

impl StateType {
    /// Stable name
    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Membership => "Membership",
            StateType::Relationship => "Relationship",
            StateType::MembershipAttestation => "MembershipAttestation",
            StateType::RelationshipAttestation => "RelationshipAttestation",
            StateType::RevocationLock => "RevocationLock",
        }
    }

    /// Whether this is one of the attestation variants
    pub fn is_attestation(&self) -> bool {
        matches!(
            self,
            StateType::MembershipAttestation | StateType::RelationshipAttestation
        )
    }

    /// Attestation variant that attests entities of this type
    pub fn attestation_type(&self) -> Option<StateType> {
        match self {
            StateType::Membership => Some(StateType::MembershipAttestation),
            StateType::Relationship => Some(StateType::RelationshipAttestation),
            _ => None,
        }
    }

    /// Entity type attested by this attestation variant
    pub fn attested_type(&self) -> Option<StateType> {
        match self {
            StateType::MembershipAttestation => Some(StateType::Membership),
            StateType::RelationshipAttestation => Some(StateType::Relationship),
            _ => None,
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle filter for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateStatus {
    /// Live states only
    Unconsumed,
    /// Superseded or revoked states only
    Consumed,
    /// Both
    All,
}

impl StateStatus {
    /// Whether a state with the given consumption flag passes this filter
    pub fn admits(&self, consumed: bool) -> bool {
        match self {
            StateStatus::Unconsumed => !consumed,
            StateStatus::Consumed => consumed,
            StateStatus::All => true,
        }
    }
}

/// Business network identity
///
/// The name is compared case-insensitively: it is trimmed and lower-cased
/// before it enters the hash, so equality must always go through [`NetworkIdentity::hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    /// Display name
    pub value: String,
    /// Network operator, if the network is centrally operated
    pub operator: Option<Party>,
}

impl NetworkIdentity {
    /// Decentralised network without an operator
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            operator: None,
        }
    }

    /// Network run by an operator
    pub fn with_operator(value: impl Into<String>, operator: Party) -> Self {
        Self {
            value: value.into(),
            operator: Some(operator),
        }
    }

    /// Canonical form of the name
    pub fn normalized_value(&self) -> String {
        self.value.trim().to_lowercase()
    }

    /// Canonical network hash
    pub fn hash(&self) -> SecureHash {
        let mut builder = HashBuilder::new("network");
        builder.update(self.normalized_value().as_bytes());
        match &self.operator {
            Some(operator) => {
                builder.update(&[1u8]);
                operator.hash_into(&mut builder);
            }
            None => {
                builder.update(&[0u8]);
            }
        }
        builder.finish()
    }

    /// Whether `party` operates this network
    pub fn is_operator(&self, party: &Party) -> bool {
        self.operator.as_ref() == Some(party)
    }

    /// Whether two identities denote the same network
    pub fn same_network(&self, other: &NetworkIdentity) -> bool {
        self.hash() == other.hash()
    }
}

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operator {
            Some(operator) => write!(f, "{} (operated by {})", self.value, operator),
            None => write!(f, "{}", self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn party(name: &str) -> Party {
        Party::new(name, KeyPair::generate().public_key())
    }

    #[test]
    fn test_network_hash_is_case_insensitive() {
        let a = NetworkIdentity::new("Trade Finance");
        let b = NetworkIdentity::new("  trade FINANCE ");
        assert_eq!(a.hash(), b.hash());
        assert!(a.same_network(&b));
    }

    #[test]
    fn test_network_hash_includes_operator() {
        let operator = party("Operator");
        let open = NetworkIdentity::new("Trade");
        let operated = NetworkIdentity::with_operator("Trade", operator.clone());

        assert_ne!(open.hash(), operated.hash());
        assert!(operated.is_operator(&operator));
        assert!(!open.is_operator(&operator));
    }

    #[test]
    fn test_state_ref_key_orders_by_tx_then_index() {
        let tx = SecureHash::sha256(b"tx");
        let first = StateRef::new(tx, 0).to_key();
        let second = StateRef::new(tx, 1).to_key();
        assert!(first < second);
        assert_eq!(&first[..32], tx.as_bytes());
    }

    #[test]
    fn test_status_filter() {
        assert!(StateStatus::Unconsumed.admits(false));
        assert!(!StateStatus::Unconsumed.admits(true));
        assert!(StateStatus::Consumed.admits(true));
        assert!(StateStatus::All.admits(true) && StateStatus::All.admits(false));
    }

    #[test]
    fn test_attestation_type_mapping() {
        assert_eq!(
            StateType::Membership.attestation_type(),
            Some(StateType::MembershipAttestation)
        );
        assert_eq!(
            StateType::RelationshipAttestation.attested_type(),
            Some(StateType::Relationship)
        );
        assert_eq!(StateType::RevocationLock.attestation_type(), None);
        assert!(StateType::MembershipAttestation.is_attestation());
    }
}
