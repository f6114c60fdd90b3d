//! Versioned ledger entities
//!
//! Memberships, relationships and attestations are linear: every version
//! shares a [`LinearId`] and names the exact [`StateRef`] of the version it
//! replaces. Revocation locks are per-owner records attached to a relationship.

use crate::crypto::{HashBuilder, SecureHash};
use crate::types::{LinearId, NetworkIdentity, Party, StateRef, StateType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Capabilities shared by every versioned entity
pub trait Versionable {
    /// Identity shared by all versions
    fn linear_id(&self) -> LinearId;

    /// Reference of the version this one replaces
    fn previous_state_ref(&self) -> Option<&StateRef>;

    /// Parties that must see (and by default sign) changes
    fn participants(&self) -> BTreeSet<Party>;

    /// Canonical content hash used for duplicate detection
    fn content_hash(&self) -> SecureHash;
}

fn hash_previous(builder: &mut HashBuilder, previous: Option<&StateRef>) {
    let key = previous.map(StateRef::to_key);
    builder.update_opt(key.as_ref().map(|k| &k[..]));
}

fn with_operator(mut parties: BTreeSet<Party>, network: &NetworkIdentity) -> BTreeSet<Party> {
    if let Some(operator) = &network.operator {
        parties.insert(operator.clone());
    }
    parties
}

/// A claim about the holder's identity, e.g. `("LEI", "5493...")`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityClaim {
    /// Claimed property
    pub property: String,
    /// Claimed value
    pub value: String,
}

impl IdentityClaim {
    /// Create a claim
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Membership of a party in a business network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Network the holder belongs to
    pub network: NetworkIdentity,
    /// Member
    pub holder: Party,
    /// Identity claims
    pub identity: BTreeSet<IdentityClaim>,
    /// Role tokens
    pub roles: BTreeSet<String>,
    /// Permission tokens
    pub permissions: BTreeSet<String>,
    /// Shared identity of all versions
    pub linear_id: LinearId,
    /// Version this one replaces
    pub previous_state_ref: Option<StateRef>,
}

impl Membership {
    /// First version of a membership
    pub fn new(network: NetworkIdentity, holder: Party) -> Self {
        Self {
            network,
            holder,
            identity: BTreeSet::new(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            linear_id: LinearId::new(),
            previous_state_ref: None,
        }
    }

    /// Add a role token
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Add a permission token
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Add an identity claim
    pub fn with_claim(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.identity.insert(IdentityClaim::new(property, value));
        self
    }

    /// Whether the holder operates the network
    pub fn is_network_operator(&self) -> bool {
        self.network.is_operator(&self.holder)
    }

    /// Whether the membership carries a role token
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Next version of this membership, chained to `previous`
    pub fn successor(&self, previous: StateRef) -> Self {
        Self {
            previous_state_ref: Some(previous),
            ..self.clone()
        }
    }
}

impl Versionable for Membership {
    fn linear_id(&self) -> LinearId {
        self.linear_id
    }

    fn previous_state_ref(&self) -> Option<&StateRef> {
        self.previous_state_ref.as_ref()
    }

    fn participants(&self) -> BTreeSet<Party> {
        with_operator(BTreeSet::from([self.holder.clone()]), &self.network)
    }

    fn content_hash(&self) -> SecureHash {
        let mut builder = HashBuilder::new("membership");
        builder.update(self.network.hash().as_bytes());
        self.holder.hash_into(&mut builder);
        hash_previous(&mut builder, self.previous_state_ref.as_ref());
        builder.finish()
    }
}

/// A key/value setting carried by a relationship member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Setting {
    /// Setting key, unique per member
    pub key: String,
    /// Setting value
    pub value: String,
}

impl Setting {
    /// Create a setting
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A member of a relationship with its settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMember {
    /// Member party
    pub party: Party,
    /// Per-member settings
    pub settings: Vec<Setting>,
}

/// Multi-party relationship inside a network
///
/// Members are kept as a list so that duplicate members and duplicate setting
/// keys are representable and can be rejected by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Network the relationship belongs to
    pub network: NetworkIdentity,
    /// Members and their settings
    pub members: Vec<RelationshipMember>,
    /// Shared identity of all versions
    pub linear_id: LinearId,
    /// Version this one replaces
    pub previous_state_ref: Option<StateRef>,
}

impl Relationship {
    /// First version of a relationship
    pub fn new(network: NetworkIdentity) -> Self {
        Self {
            network,
            members: Vec::new(),
            linear_id: LinearId::new(),
            previous_state_ref: None,
        }
    }

    /// Add a member without settings
    pub fn with_member(self, party: Party) -> Self {
        self.with_member_settings(party, Vec::new())
    }

    /// Add a member with settings
    pub fn with_member_settings(mut self, party: Party, settings: Vec<Setting>) -> Self {
        self.members.push(RelationshipMember { party, settings });
        self
    }

    /// Member parties in declaration order
    pub fn member_parties(&self) -> impl Iterator<Item = &Party> {
        self.members.iter().map(|m| &m.party)
    }

    /// Whether `party` is a member
    pub fn is_member(&self, party: &Party) -> bool {
        self.member_parties().any(|p| p == party)
    }

    /// Settings of one member
    pub fn settings_of(&self, party: &Party) -> Option<&[Setting]> {
        self.members
            .iter()
            .find(|m| &m.party == party)
            .map(|m| m.settings.as_slice())
    }

    /// No member party appears twice
    pub fn has_distinct_members(&self) -> bool {
        let distinct: BTreeSet<&Party> = self.member_parties().collect();
        distinct.len() == self.members.len()
    }

    /// No member declares the same setting key twice
    pub fn has_distinct_setting_keys(&self) -> bool {
        self.members.iter().all(|member| {
            let keys: BTreeSet<&str> = member.settings.iter().map(|s| s.key.as_str()).collect();
            keys.len() == member.settings.len()
        })
    }

    /// Next version of this relationship, chained to `previous`
    pub fn successor(&self, previous: StateRef) -> Self {
        Self {
            previous_state_ref: Some(previous),
            ..self.clone()
        }
    }
}

impl Versionable for Relationship {
    fn linear_id(&self) -> LinearId {
        self.linear_id
    }

    fn previous_state_ref(&self) -> Option<&StateRef> {
        self.previous_state_ref.as_ref()
    }

    fn participants(&self) -> BTreeSet<Party> {
        with_operator(self.member_parties().cloned().collect(), &self.network)
    }

    fn content_hash(&self) -> SecureHash {
        let mut builder = HashBuilder::new("relationship");
        builder.update(self.network.hash().as_bytes());
        let members: BTreeSet<&Party> = self.member_parties().collect();
        builder.update(&(members.len() as u64).to_be_bytes());
        for member in members {
            member.hash_into(&mut builder);
        }
        hash_previous(&mut builder, self.previous_state_ref.as_ref());
        builder.finish()
    }
}

/// Outcome recorded by an attestation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttestationStatus {
    /// Attestor vouches for the target
    Accepted,
    /// Attestor refuses the target
    Rejected,
}

impl fmt::Display for AttestationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttestationStatus::Accepted => write!(f, "Accepted"),
            AttestationStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Exact-version pointer to an attested entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationPointer {
    /// Identity of the target
    pub linear_id: LinearId,
    /// Exact version of the target
    pub state_ref: StateRef,
    /// Variant of the target
    pub state_type: StateType,
}

impl AttestationPointer {
    /// Point at an exact version of a linear entity
    pub fn to(target: &StateAndRef) -> Option<Self> {
        let linear_id = target.state.linear_id()?;
        Some(Self {
            linear_id,
            state_ref: target.state_ref,
            state_type: target.state.state_type(),
        })
    }

    /// Whether `target` is exactly the pointed-at version
    pub fn matches(&self, target: &StateAndRef) -> bool {
        self.state_ref == target.state_ref
            && self.state_type == target.state.state_type()
            && target.state.linear_id() == Some(self.linear_id)
    }
}

impl fmt::Display for AttestationPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.state_type, self.linear_id, self.state_ref)
    }
}

/// Attestation over a membership or relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Party vouching (or refusing)
    pub attestor: Party,
    /// Parties the attestation is about
    pub attestees: BTreeSet<Party>,
    /// Exact version attested
    pub pointer: AttestationPointer,
    /// Declared network; must equal the target's network
    pub network: NetworkIdentity,
    /// Outcome
    pub status: AttestationStatus,
    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
    /// Shared identity of all versions
    pub linear_id: LinearId,
    /// Version this one replaces
    pub previous_state_ref: Option<StateRef>,
}

impl Attestation {
    /// Attest a membership; the holder is the only attestee
    pub fn over_membership(
        attestor: Party,
        membership: &Membership,
        target: &StateAndRef,
        status: AttestationStatus,
    ) -> Option<Self> {
        Some(Self {
            attestor,
            attestees: BTreeSet::from([membership.holder.clone()]),
            pointer: AttestationPointer::to(target)?,
            network: membership.network.clone(),
            status,
            metadata: BTreeMap::new(),
            linear_id: LinearId::new(),
            previous_state_ref: None,
        })
    }

    /// Attest a relationship; every other participant is an attestee
    pub fn over_relationship(
        attestor: Party,
        relationship: &Relationship,
        target: &StateAndRef,
        status: AttestationStatus,
    ) -> Option<Self> {
        let mut attestees = relationship.participants();
        attestees.remove(&attestor);
        Some(Self {
            attestor,
            attestees,
            pointer: AttestationPointer::to(target)?,
            network: relationship.network.clone(),
            status,
            metadata: BTreeMap::new(),
            linear_id: LinearId::new(),
            previous_state_ref: None,
        })
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Next version: new status and pointer, chained to `previous`
    pub fn successor(
        &self,
        previous: StateRef,
        pointer: AttestationPointer,
        status: AttestationStatus,
    ) -> Self {
        Self {
            pointer,
            status,
            previous_state_ref: Some(previous),
            ..self.clone()
        }
    }
}

impl Versionable for Attestation {
    fn linear_id(&self) -> LinearId {
        self.linear_id
    }

    fn previous_state_ref(&self) -> Option<&StateRef> {
        self.previous_state_ref.as_ref()
    }

    fn participants(&self) -> BTreeSet<Party> {
        let mut parties = self.attestees.clone();
        parties.insert(self.attestor.clone());
        with_operator(parties, &self.network)
    }

    fn content_hash(&self) -> SecureHash {
        let mut builder = HashBuilder::new("attestation");
        self.attestor.hash_into(&mut builder);
        builder.update(self.pointer.linear_id.as_uuid().as_bytes());
        builder.update(self.pointer.state_type.as_str().as_bytes());
        hash_previous(&mut builder, self.previous_state_ref.as_ref());
        builder.finish()
    }
}

/// Status of a revocation lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockStatus {
    /// Revocation of the locked entity is blocked
    Locked,
    /// Owner has released the lock
    Unlocked,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStatus::Locked => write!(f, "Locked"),
            LockStatus::Unlocked => write!(f, "Unlocked"),
        }
    }
}

/// Per-owner record blocking revocation of a shared entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationLock {
    /// Only party allowed to change or delete the lock
    pub owner: Party,
    /// Identity of the locked entity
    pub target: LinearId,
    /// Variant of the locked entity
    pub target_type: StateType,
    /// Current status
    pub status: LockStatus,
}

impl RevocationLock {
    /// A new lock in `Locked` status
    pub fn locked(owner: Party, target: LinearId, target_type: StateType) -> Self {
        Self {
            owner,
            target,
            target_type,
            status: LockStatus::Locked,
        }
    }

    /// Whether revocation is currently blocked
    pub fn is_locked(&self) -> bool {
        self.status == LockStatus::Locked
    }

    /// Canonical content hash
    pub fn content_hash(&self) -> SecureHash {
        let mut builder = HashBuilder::new("revocation-lock");
        self.owner.hash_into(&mut builder);
        builder.update(self.target.as_uuid().as_bytes());
        builder.update(self.target_type.as_str().as_bytes());
        builder.finish()
    }
}

/// Any entity that can appear in a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractState {
    /// Network membership
    Membership(Membership),
    /// Multi-party relationship
    Relationship(Relationship),
    /// Attestation over a membership
    MembershipAttestation(Attestation),
    /// Attestation over a relationship
    RelationshipAttestation(Attestation),
    /// Revocation lock
    RevocationLock(RevocationLock),
}

impl ContractState {
    /// Variant tag
    pub fn state_type(&self) -> StateType {
        match self {
            ContractState::Membership(_) => StateType::Membership,
            ContractState::Relationship(_) => StateType::Relationship,
            ContractState::MembershipAttestation(_) => StateType::MembershipAttestation,
            ContractState::RelationshipAttestation(_) => StateType::RelationshipAttestation,
            ContractState::RevocationLock(_) => StateType::RevocationLock,
        }
    }

    /// Wrap an attestation in the variant matching its pointer
    pub fn attestation(attestation: Attestation) -> Self {
        match attestation.pointer.state_type {
            StateType::Relationship => ContractState::RelationshipAttestation(attestation),
            _ => ContractState::MembershipAttestation(attestation),
        }
    }

    /// Versioned view of the state; locks are not versioned
    pub fn as_versionable(&self) -> Option<&dyn Versionable> {
        match self {
            ContractState::Membership(m) => Some(m),
            ContractState::Relationship(r) => Some(r),
            ContractState::MembershipAttestation(a) | ContractState::RelationshipAttestation(a) => {
                Some(a)
            }
            ContractState::RevocationLock(_) => None,
        }
    }

    /// Linear identity, if versioned
    pub fn linear_id(&self) -> Option<LinearId> {
        self.as_versionable().map(|v| v.linear_id())
    }

    /// Previous-version pointer, if versioned and not a first version
    pub fn previous_state_ref(&self) -> Option<&StateRef> {
        self.as_versionable().and_then(|v| v.previous_state_ref())
    }

    /// Participants
    pub fn participants(&self) -> BTreeSet<Party> {
        match self {
            ContractState::RevocationLock(lock) => BTreeSet::from([lock.owner.clone()]),
            other => other
                .as_versionable()
                .map(|v| v.participants())
                .unwrap_or_default(),
        }
    }

    /// Content hash
    pub fn content_hash(&self) -> SecureHash {
        match self {
            ContractState::RevocationLock(lock) => lock.content_hash(),
            other => other
                .as_versionable()
                .map(|v| v.content_hash())
                .unwrap_or(SecureHash::ZERO),
        }
    }

    /// Network the state is tagged with
    pub fn network(&self) -> Option<&NetworkIdentity> {
        match self {
            ContractState::Membership(m) => Some(&m.network),
            ContractState::Relationship(r) => Some(&r.network),
            ContractState::MembershipAttestation(a) | ContractState::RelationshipAttestation(a) => {
                Some(&a.network)
            }
            ContractState::RevocationLock(_) => None,
        }
    }

    /// Membership view
    pub fn as_membership(&self) -> Option<&Membership> {
        match self {
            ContractState::Membership(m) => Some(m),
            _ => None,
        }
    }

    /// Relationship view
    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            ContractState::Relationship(r) => Some(r),
            _ => None,
        }
    }

    /// Attestation view (either variant)
    pub fn as_attestation(&self) -> Option<&Attestation> {
        match self {
            ContractState::MembershipAttestation(a) | ContractState::RelationshipAttestation(a) => {
                Some(a)
            }
            _ => None,
        }
    }

    /// Lock view
    pub fn as_lock(&self) -> Option<&RevocationLock> {
        match self {
            ContractState::RevocationLock(l) => Some(l),
            _ => None,
        }
    }

    /// Mutable lock view
    pub fn as_lock_mut(&mut self) -> Option<&mut RevocationLock> {
        match self {
            ContractState::RevocationLock(l) => Some(l),
            _ => None,
        }
    }
}

/// A state together with its exact ledger reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAndRef {
    /// The state
    pub state: ContractState,
    /// Where it was created
    pub state_ref: StateRef,
}

impl StateAndRef {
    /// Pair a state with its reference
    pub fn new(state: ContractState, state_ref: StateRef) -> Self {
        Self { state, state_ref }
    }
}
