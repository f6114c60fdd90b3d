//! Transactions
//!
//! A [`WireTransaction`] names the states it consumes and references by
//! [`StateRef`], carries its new states in full and declares one [`Command`]
//! with the keys that must sign. Its identifier is the Merkle root of its
//! component hashes. [`SignedTransaction`] adds signatures; a
//! [`LedgerTransaction`] is the fully resolved view the rule engine reads.

use crate::crypto::{merkle_root, KeyPair, PublicKey, SecureHash, Signature};
use crate::state::{ContractState, StateAndRef};
use crate::types::{Party, StateRef, StateType};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Lifecycle operation of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Create the first version
    Issue,
    /// Replace the current version with a successor
    Amend,
    /// Consume the current version with no successor
    Revoke,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Issue => write!(f, "Issue"),
            Operation::Amend => write!(f, "Amend"),
            Operation::Revoke => write!(f, "Revoke"),
        }
    }
}

/// Declared intent of a transaction and the keys required to sign it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Entity variant the command governs
    pub state_type: StateType,
    /// Operation
    pub operation: Operation,
    /// Keys that must sign
    pub signers: BTreeSet<PublicKey>,
}

impl Command {
    /// Create a command
    pub fn new(
        state_type: StateType,
        operation: Operation,
        signers: impl IntoIterator<Item = PublicKey>,
    ) -> Self {
        Self {
            state_type,
            operation,
            signers: signers.into_iter().collect(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.state_type, self.operation)
    }
}

/// Unsigned transaction as exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    /// States consumed
    pub inputs: Vec<StateRef>,
    /// States read but not consumed
    pub references: Vec<StateRef>,
    /// States created
    pub outputs: Vec<ContractState>,
    /// Declared command
    pub command: Command,
    /// Ordering service that must commit the transaction
    pub notary: Party,
    /// Random salt so that equal contents never share an id
    pub salt: Uuid,
}

impl WireTransaction {
    /// Canonical bytes of one component
    fn component_hash<T: Serialize>(tag: u8, value: &T) -> SecureHash {
        let mut bytes = vec![tag];
        bytes.extend(bincode::serialize(value).expect("serialization cannot fail"));
        SecureHash::sha256(&bytes)
    }

    /// Transaction identifier: Merkle root of the component hashes
    pub fn id(&self) -> SecureHash {
        let mut leaves = Vec::with_capacity(self.inputs.len() + self.outputs.len() + 4);
        leaves.extend(self.inputs.iter().map(|i| Self::component_hash(0, i)));
        leaves.extend(self.references.iter().map(|r| Self::component_hash(1, r)));
        leaves.extend(self.outputs.iter().map(|o| Self::component_hash(2, o)));
        leaves.push(Self::component_hash(3, &self.command));
        leaves.push(Self::component_hash(4, &self.notary));
        leaves.push(Self::component_hash(5, &self.salt));
        merkle_root(&leaves)
    }

    /// Reference of output `index` once this transaction is recorded
    pub fn out_ref(&self, index: usize) -> StateRef {
        StateRef::new(self.id(), index as u32)
    }

    /// All outputs paired with their future references
    pub fn output_states(&self) -> Vec<StateAndRef> {
        let id = self.id();
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, state)| StateAndRef::new(state.clone(), StateRef::new(id, i as u32)))
            .collect()
    }
}

/// Builder for wire transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    notary: Party,
    inputs: Vec<StateRef>,
    references: Vec<StateRef>,
    outputs: Vec<ContractState>,
    command: Option<Command>,
}

impl TransactionBuilder {
    /// Start a transaction for the given notary
    pub fn new(notary: Party) -> Self {
        Self {
            notary,
            inputs: Vec::new(),
            references: Vec::new(),
            outputs: Vec::new(),
            command: None,
        }
    }

    /// Consume a state
    pub fn add_input(mut self, state_ref: StateRef) -> Self {
        self.inputs.push(state_ref);
        self
    }

    /// Reference a state without consuming it
    pub fn add_reference(mut self, state_ref: StateRef) -> Self {
        self.references.push(state_ref);
        self
    }

    /// Create a state
    pub fn add_output(mut self, state: ContractState) -> Self {
        self.outputs.push(state);
        self
    }

    /// Set the command
    pub fn command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Finish the transaction
    pub fn build(self) -> Result<WireTransaction> {
        let command = self
            .command
            .ok_or_else(|| Error::InvalidTransaction("Transaction has no command".to_string()))?;

        Ok(WireTransaction {
            inputs: self.inputs,
            references: self.references,
            outputs: self.outputs,
            command,
            notary: self.notary,
            salt: Uuid::new_v4(),
        })
    }
}

/// A signature over a transaction id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    /// Signing key
    pub by: PublicKey,
    /// Signature over the transaction id bytes
    pub signature: Signature,
}

impl TransactionSignature {
    /// Sign a transaction id
    pub fn sign(keys: &KeyPair, tx_id: &SecureHash) -> Self {
        Self {
            by: keys.public_key(),
            signature: keys.sign(tx_id.as_bytes()),
        }
    }

    /// Verify against a transaction id
    pub fn verify(&self, tx_id: &SecureHash) -> bool {
        self.by.verify(tx_id.as_bytes(), &self.signature)
    }
}

/// Wire transaction with the signatures collected so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Transaction contents
    pub tx: WireTransaction,
    /// Claimed identifier, checked against the contents on receipt
    pub id: SecureHash,
    /// Party signatures
    pub signatures: Vec<TransactionSignature>,
    /// Ordering service signature, present once committed
    pub notary_signature: Option<TransactionSignature>,
}

impl SignedTransaction {
    /// Wrap an unsigned transaction
    pub fn new(tx: WireTransaction) -> Self {
        let id = tx.id();
        Self {
            tx,
            id,
            signatures: Vec::new(),
            notary_signature: None,
        }
    }

    /// Add this key pair's signature
    pub fn sign_with(&mut self, keys: &KeyPair) {
        let signature = TransactionSignature::sign(keys, &self.id);
        self.add_signature(signature);
    }

    /// Add a signature collected from a peer, ignoring duplicates
    pub fn add_signature(&mut self, signature: TransactionSignature) {
        if !self.signatures.iter().any(|s| s.by == signature.by) {
            self.signatures.push(signature);
        }
    }

    /// Keys that have signed
    pub fn signed_by(&self) -> BTreeSet<PublicKey> {
        self.signatures.iter().map(|s| s.by).collect()
    }

    /// Declared signers that have not signed yet
    pub fn missing_signers(&self) -> BTreeSet<PublicKey> {
        let signed = self.signed_by();
        self.tx
            .command
            .signers
            .iter()
            .filter(|k| !signed.contains(k))
            .copied()
            .collect()
    }

    /// Check the claimed id against the contents
    pub fn verify_id(&self) -> Result<()> {
        let computed = self.tx.id();
        if computed != self.id {
            return Err(Error::InvalidTransaction(format!(
                "Transaction id mismatch: claimed {}, computed {}",
                self.id, computed
            )));
        }
        Ok(())
    }

    /// Verify every attached signature, allowing the listed keys to be missing
    pub fn verify_signatures_except(&self, allowed_missing: &BTreeSet<PublicKey>) -> Result<()> {
        self.verify_id()?;

        for signature in &self.signatures {
            if !signature.verify(&self.id) {
                return Err(Error::SignatureError(format!(
                    "Invalid signature by {} on transaction {}",
                    signature.by, self.id
                )));
            }
        }

        let missing: Vec<PublicKey> = self
            .missing_signers()
            .into_iter()
            .filter(|k| !allowed_missing.contains(k))
            .collect();
        if !missing.is_empty() {
            return Err(Error::SignatureError(format!(
                "Transaction {} is missing signatures from {:?}",
                self.id, missing
            )));
        }

        Ok(())
    }

    /// Verify that every declared signer has signed
    pub fn verify_required_signatures(&self) -> Result<()> {
        self.verify_signatures_except(&BTreeSet::new())
    }

    /// Verify a finalized transaction: all parties and the notary have signed
    pub fn verify_finalized(&self) -> Result<()> {
        self.verify_required_signatures()?;

        let notary_signature = self.notary_signature.as_ref().ok_or_else(|| {
            Error::SignatureError(format!("Transaction {} is not notarised", self.id))
        })?;
        if notary_signature.by != self.tx.notary.owning_key || !notary_signature.verify(&self.id) {
            return Err(Error::SignatureError(format!(
                "Invalid notary signature on transaction {}",
                self.id
            )));
        }

        Ok(())
    }

    /// Reference of output `index`
    pub fn out_ref(&self, index: usize) -> StateRef {
        StateRef::new(self.id, index as u32)
    }

    /// Transactions this one depends on (inputs and references)
    pub fn dependencies(&self) -> BTreeSet<SecureHash> {
        self.tx
            .inputs
            .iter()
            .chain(self.tx.references.iter())
            .map(|r| r.tx_id)
            .collect()
    }
}

/// Fully resolved transaction view
#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    /// Transaction id
    pub id: SecureHash,
    /// Consumed states
    pub inputs: Vec<StateAndRef>,
    /// Referenced (read-only) states
    pub references: Vec<StateAndRef>,
    /// Created states with their references
    pub outputs: Vec<StateAndRef>,
    /// Declared command
    pub command: Command,
    /// Declared signing keys
    pub signers: BTreeSet<PublicKey>,
}

impl LedgerTransaction {
    /// Assemble a view from a wire transaction and its resolved states
    pub fn new(
        tx: &WireTransaction,
        inputs: Vec<StateAndRef>,
        references: Vec<StateAndRef>,
    ) -> Self {
        Self {
            id: tx.id(),
            inputs,
            references,
            outputs: tx.output_states(),
            command: tx.command.clone(),
            signers: tx.command.signers.clone(),
        }
    }

    /// Consumed states of one variant
    pub fn inputs_of(&self, state_type: StateType) -> Vec<&StateAndRef> {
        self.inputs
            .iter()
            .filter(|s| s.state.state_type() == state_type)
            .collect()
    }

    /// Created states of one variant
    pub fn outputs_of(&self, state_type: StateType) -> Vec<&StateAndRef> {
        self.outputs
            .iter()
            .filter(|s| s.state.state_type() == state_type)
            .collect()
    }

    /// Referenced states of one variant
    pub fn references_of(&self, state_type: StateType) -> Vec<&StateAndRef> {
        self.references
            .iter()
            .filter(|s| s.state.state_type() == state_type)
            .collect()
    }

    /// Whether `party`'s key is a declared signer
    pub fn is_signed_by(&self, party: &Party) -> bool {
        self.signers.contains(&party.owning_key)
    }

    /// Every party across inputs and outputs
    pub fn participants(&self) -> BTreeSet<Party> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .flat_map(|s| s.state.participants())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Membership;
    use crate::types::NetworkIdentity;

    fn notary() -> (KeyPair, Party) {
        let keys = KeyPair::generate();
        let party = Party::new("Notary", keys.public_key());
        (keys, party)
    }

    fn membership_tx(holder_keys: &KeyPair) -> WireTransaction {
        let holder = Party::new("Alice", holder_keys.public_key());
        let (_, notary) = notary();
        TransactionBuilder::new(notary)
            .add_output(ContractState::Membership(Membership::new(
                NetworkIdentity::new("Trade"),
                holder,
            )))
            .command(Command::new(
                StateType::Membership,
                Operation::Issue,
                [holder_keys.public_key()],
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_command() {
        let (_, notary) = notary();
        let result = TransactionBuilder::new(notary).build();
        assert!(matches!(result, Err(Error::InvalidTransaction(_))));
    }

    #[test]
    fn test_id_is_stable_and_salted() {
        let keys = KeyPair::generate();
        let tx = membership_tx(&keys);
        assert_eq!(tx.id(), tx.clone().id());

        let mut resalted = tx.clone();
        resalted.salt = Uuid::new_v4();
        assert_ne!(tx.id(), resalted.id());
    }

    #[test]
    fn test_signatures_and_missing_signers() {
        let keys = KeyPair::generate();
        let mut stx = SignedTransaction::new(membership_tx(&keys));

        assert_eq!(stx.missing_signers().len(), 1);
        assert!(stx.verify_required_signatures().is_err());
        assert!(stx
            .verify_signatures_except(&BTreeSet::from([keys.public_key()]))
            .is_ok());

        stx.sign_with(&keys);
        stx.sign_with(&keys);
        assert_eq!(stx.signatures.len(), 1);
        assert!(stx.verify_required_signatures().is_ok());
        assert!(stx.verify_finalized().is_err());
    }

    #[test]
    fn test_forged_signature_rejected() {
        let keys = KeyPair::generate();
        let mut stx = SignedTransaction::new(membership_tx(&keys));
        let forger = KeyPair::generate();
        stx.add_signature(TransactionSignature {
            by: keys.public_key(),
            signature: forger.sign(stx.id.as_bytes()),
        });
        assert!(matches!(
            stx.verify_required_signatures(),
            Err(Error::SignatureError(_))
        ));
    }

    #[test]
    fn test_tampered_contents_detected() {
        let keys = KeyPair::generate();
        let mut stx = SignedTransaction::new(membership_tx(&keys));
        stx.sign_with(&keys);
        stx.tx.salt = Uuid::new_v4();
        assert!(matches!(stx.verify_id(), Err(Error::InvalidTransaction(_))));
    }

    #[test]
    fn test_notary_signature_checked() {
        let keys = KeyPair::generate();
        let (notary_keys, _) = notary();
        let wire = membership_tx(&keys);
        let mut stx = SignedTransaction::new(wire);
        stx.sign_with(&keys);

        // Signature by a key other than the declared notary
        stx.notary_signature = Some(TransactionSignature::sign(&notary_keys, &stx.id));
        assert!(stx.verify_finalized().is_err());
    }

    #[test]
    fn test_output_refs_follow_id() {
        let keys = KeyPair::generate();
        let wire = membership_tx(&keys);
        let outputs = wire.output_states();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].state_ref, wire.out_ref(0));
        assert_eq!(SignedTransaction::new(wire).out_ref(0), outputs[0].state_ref);
    }
}
