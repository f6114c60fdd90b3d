//! Node vault
//!
//! The vault is a node's view of the ledger: every transaction the node is
//! party to, the states those transactions created, and whether each state
//! has since been consumed. It is the persisted-entity projection and the
//! local [`QueryService`].
//!
//! # Example
//!
//! ```no_run
//! use attest_core::{Config, Party, Vault, KeyPair};
//!
//! # fn main() -> attest_core::Result<()> {
//! let keys = KeyPair::generate();
//! let me = Party::new("Bank A", keys.public_key());
//! let vault = Vault::open(&Config::default(), me)?;
//! # Ok(())
//! # }
//! ```

use crate::{
    crypto::SecureHash,
    metrics::Metrics,
    query::{Page, QueryCriteria, QueryService},
    state::StateAndRef,
    storage::{Storage, StoredState},
    transaction::{LedgerTransaction, SignedTransaction, WireTransaction},
    types::{Party, StateRef},
    Config, Error, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// A node's ledger store
pub struct Vault {
    /// Storage backend
    storage: Arc<Storage>,

    /// Node identity; revocation locks are kept only when owned by it
    owner: Party,

    /// Serialises writers so consumption flags are read and written atomically
    write_lock: Mutex<()>,

    /// Metrics, if enabled
    metrics: Option<Metrics>,
}

impl Vault {
    /// Open the vault for `owner`
    pub fn open(config: &Config, owner: Party) -> Result<Self> {
        let storage = Arc::new(Storage::open(config)?);
        Ok(Self::new(storage, owner))
    }

    /// Wrap an open storage
    pub fn new(storage: Arc<Storage>, owner: Party) -> Self {
        Self {
            storage,
            owner,
            write_lock: Mutex::new(()),
            metrics: None,
        }
    }

    /// Count recorded transactions in `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Node identity
    pub fn owner(&self) -> &Party {
        &self.owner
    }

    /// Direct storage access
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Record a finalized transaction
    ///
    /// Marks locally known inputs consumed and stores the outputs, all in one
    /// write. Recording the same transaction twice is a no-op that returns
    /// `false`.
    pub fn record_transaction(&self, tx: &SignedTransaction) -> Result<bool> {
        let _guard = self.write_lock.lock();

        if self.storage.has_transaction(&tx.id)? {
            tracing::debug!(tx_id = %tx.id, "Transaction already recorded");
            return Ok(false);
        }

        let mut consumed = Vec::with_capacity(tx.tx.inputs.len());
        for input in &tx.tx.inputs {
            match self.storage.get_state(input)? {
                Some(mut stored) => {
                    stored.consumed = true;
                    consumed.push(stored);
                }
                None => {
                    tracing::debug!(tx_id = %tx.id, input = %input, "Input not held locally");
                }
            }
        }

        let now = Utc::now();
        let created: Vec<StoredState> = tx
            .tx
            .output_states()
            .into_iter()
            .filter(|s| match s.state.as_lock() {
                Some(lock) => lock.owner == self.owner,
                None => true,
            })
            .map(|state_and_ref| StoredState {
                content_hash: state_and_ref.state.content_hash(),
                state_and_ref,
                consumed: false,
                sequence: self.storage.next_sequence(),
                recorded_at: now,
            })
            .collect();

        self.storage.commit(tx, &created, &consumed)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_transaction();
        }

        tracing::info!(
            tx_id = %tx.id,
            command = %tx.tx.command,
            party = %self.owner,
            created = created.len(),
            consumed = consumed.len(),
            "Transaction recorded"
        );

        Ok(true)
    }

    /// Get a recorded transaction
    pub fn get_transaction(&self, id: &SecureHash) -> Result<SignedTransaction> {
        self.storage
            .get_transaction(id)?
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))
    }

    /// Whether a transaction is recorded
    pub fn has_transaction(&self, id: &SecureHash) -> Result<bool> {
        self.storage.has_transaction(id)
    }

    /// Stored record of a state
    pub fn stored_state(&self, state_ref: &StateRef) -> Result<Option<StoredState>> {
        self.storage.get_state(state_ref)
    }

    /// Resolve a reference to its state, consumed or not
    pub fn resolve(&self, state_ref: &StateRef) -> Result<StateAndRef> {
        self.storage
            .get_state(state_ref)?
            .map(|s| s.state_and_ref)
            .ok_or_else(|| Error::StateNotFound(state_ref.to_string()))
    }

    /// Whether a locally known state has been consumed
    pub fn is_consumed(&self, state_ref: &StateRef) -> Result<bool> {
        self.storage
            .get_state(state_ref)?
            .map(|s| s.consumed)
            .ok_or_else(|| Error::StateNotFound(state_ref.to_string()))
    }

    /// Resolve every input and reference of a wire transaction
    pub fn to_ledger_transaction(&self, tx: &WireTransaction) -> Result<LedgerTransaction> {
        let inputs = tx
            .inputs
            .iter()
            .map(|r| self.resolve(r))
            .collect::<Result<Vec<_>>>()?;
        let references = tx
            .references
            .iter()
            .map(|r| self.resolve(r))
            .collect::<Result<Vec<_>>>()?;

        Ok(LedgerTransaction::new(tx, inputs, references))
    }

    /// Transitive dependencies of `tx`, oldest first, excluding `tx` itself
    pub fn backchain(&self, tx: &SignedTransaction) -> Result<Vec<SignedTransaction>> {
        let mut visited: HashSet<SecureHash> = HashSet::new();
        let mut chain = Vec::new();
        // (id, dependencies already pushed)
        let mut stack: Vec<(SecureHash, bool)> =
            tx.dependencies().into_iter().rev().map(|id| (id, false)).collect();

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                chain.push(self.get_transaction(&id)?);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }

            let dependency = self.get_transaction(&id)?;
            stack.push((id, true));
            for dep in dependency.dependencies().into_iter().rev() {
                if !visited.contains(&dep) {
                    stack.push((dep, false));
                }
            }
        }

        Ok(chain)
    }

    /// Replace the record of a state (local lock transitions)
    pub fn update_state(&self, stored: &StoredState) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.storage.put_state(stored)
    }

    /// Remove a state from the vault (local lock deletion)
    pub fn remove_state(&self, stored: &StoredState) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.storage.delete_state(stored)
    }

    /// Stored records matching `criteria`, oldest first
    pub fn query_stored(&self, criteria: &QueryCriteria) -> Result<Vec<StoredState>> {
        let candidates = if let Some(state_ref) = &criteria.state_ref {
            self.storage.get_state(state_ref)?.into_iter().collect()
        } else if let Some(linear_id) = &criteria.linear_id {
            self.storage.states_by_linear_id(linear_id)?
        } else if let Some(hash) = &criteria.content_hash {
            self.storage.states_by_content_hash(hash)?
        } else {
            self.storage.states_by_type(criteria.state_type)?
        };

        Ok(candidates
            .into_iter()
            .filter(|s| criteria.matches(&s.state_and_ref, s.consumed, &s.content_hash))
            .collect())
    }

    /// States matching `criteria`, one page at a time
    pub fn query(&self, criteria: &QueryCriteria, page: Page) -> Result<Vec<StateAndRef>> {
        Ok(self
            .query_stored(criteria)?
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .map(|s| s.state_and_ref)
            .collect())
    }

    /// The state matching `criteria`; the newest one if several match
    pub fn find_unique(&self, criteria: &QueryCriteria) -> Result<Option<StateAndRef>> {
        let mut matches = self.query_stored(criteria)?;
        if matches.len() > 1 {
            tracing::warn!(
                state_type = %criteria.state_type,
                count = matches.len(),
                "Identity query matched several states, using the newest"
            );
        }
        Ok(matches.pop().map(|s| s.state_and_ref))
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("owner", &self.owner)
            .field("storage", &self.storage)
            .finish()
    }
}

#[async_trait]
impl QueryService for Vault {
    async fn find_by_identity(&self, criteria: &QueryCriteria) -> Result<Option<StateAndRef>> {
        self.find_unique(criteria)
    }

    async fn find_all(&self, criteria: &QueryCriteria, page: Page) -> Result<Vec<StateAndRef>> {
        self.query(criteria, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::state::{ContractState, Membership, Relationship, RevocationLock};
    use crate::transaction::{Command, Operation, TransactionBuilder};
    use crate::types::{NetworkIdentity, StateStatus, StateType};
    use tempfile::TempDir;

    struct Fixture {
        vault: Vault,
        me: Party,
        notary: Party,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let me = Party::new("Alice", KeyPair::generate().public_key());
        let notary = Party::new("Notary", KeyPair::generate().public_key());
        let vault = Vault::open(&Config::with_data_dir(temp.path()), me.clone()).unwrap();
        Fixture {
            vault,
            me,
            notary,
            _temp: temp,
        }
    }

    fn issue(f: &Fixture) -> SignedTransaction {
        let wire = TransactionBuilder::new(f.notary.clone())
            .add_output(ContractState::Membership(Membership::new(
                NetworkIdentity::new("Trade"),
                f.me.clone(),
            )))
            .command(Command::new(
                StateType::Membership,
                Operation::Issue,
                [f.me.owning_key],
            ))
            .build()
            .unwrap();
        SignedTransaction::new(wire)
    }

    fn amend(f: &Fixture, previous: &SignedTransaction) -> SignedTransaction {
        let prev_ref = previous.out_ref(0);
        let membership = previous.tx.outputs[0].as_membership().unwrap();
        let wire = TransactionBuilder::new(f.notary.clone())
            .add_input(prev_ref)
            .add_output(ContractState::Membership(membership.successor(prev_ref)))
            .command(Command::new(
                StateType::Membership,
                Operation::Amend,
                [f.me.owning_key],
            ))
            .build()
            .unwrap();
        SignedTransaction::new(wire)
    }

    #[test]
    fn test_record_marks_inputs_consumed() {
        let f = fixture();
        let v1 = issue(&f);
        assert!(f.vault.record_transaction(&v1).unwrap());
        assert!(!f.vault.record_transaction(&v1).unwrap());

        let v2 = amend(&f, &v1);
        f.vault.record_transaction(&v2).unwrap();

        assert!(f.vault.is_consumed(&v1.out_ref(0)).unwrap());
        assert!(!f.vault.is_consumed(&v2.out_ref(0)).unwrap());

        let live = f
            .vault
            .query(&QueryCriteria::new(StateType::Membership), Page::first())
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].state_ref, v2.out_ref(0));

        let all = f
            .vault
            .query(
                &QueryCriteria::new(StateType::Membership).status(StateStatus::All),
                Page::first(),
            )
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_ledger_transaction_resolution() {
        let f = fixture();
        let v1 = issue(&f);
        f.vault.record_transaction(&v1).unwrap();
        let v2 = amend(&f, &v1);

        let ltx = f.vault.to_ledger_transaction(&v2.tx).unwrap();
        assert_eq!(ltx.inputs.len(), 1);
        assert_eq!(ltx.inputs[0].state_ref, v1.out_ref(0));
        assert_eq!(ltx.outputs[0].state_ref, v2.out_ref(0));

        let v3 = amend(&f, &v2);
        assert!(matches!(
            f.vault.to_ledger_transaction(&v3.tx),
            Err(Error::StateNotFound(_))
        ));
    }

    #[test]
    fn test_backchain_oldest_first() {
        let f = fixture();
        let v1 = issue(&f);
        let v2 = amend(&f, &v1);
        let v3 = amend(&f, &v2);
        f.vault.record_transaction(&v1).unwrap();
        f.vault.record_transaction(&v2).unwrap();
        f.vault.record_transaction(&v3).unwrap();

        let v4 = amend(&f, &v3);
        let chain: Vec<_> = f
            .vault
            .backchain(&v4)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(chain, vec![v1.id, v2.id, v3.id]);
        assert!(f.vault.backchain(&v1).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_locks_not_stored() {
        let f = fixture();
        let bob = Party::new("Bob", KeyPair::generate().public_key());
        let relationship = Relationship::new(NetworkIdentity::new("Trade"))
            .with_member(f.me.clone())
            .with_member(bob.clone());
        let linear_id = relationship.linear_id;

        let wire = TransactionBuilder::new(f.notary.clone())
            .add_output(ContractState::Relationship(relationship))
            .add_output(ContractState::RevocationLock(RevocationLock::locked(
                f.me.clone(),
                linear_id,
                StateType::Relationship,
            )))
            .add_output(ContractState::RevocationLock(RevocationLock::locked(
                bob.clone(),
                linear_id,
                StateType::Relationship,
            )))
            .command(Command::new(
                StateType::Relationship,
                Operation::Issue,
                [f.me.owning_key, bob.owning_key],
            ))
            .build()
            .unwrap();
        let tx = SignedTransaction::new(wire);
        f.vault.record_transaction(&tx).unwrap();

        let locks = f
            .vault
            .query(&QueryCriteria::new(StateType::RevocationLock), Page::first())
            .unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].state.as_lock().unwrap().owner, f.me);
        assert!(f.vault.stored_state(&tx.out_ref(2)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_service_find_by_identity() {
        let f = fixture();
        let v1 = issue(&f);
        f.vault.record_transaction(&v1).unwrap();
        let linear_id = v1.tx.outputs[0].linear_id().unwrap();

        let found = f
            .vault
            .find_by_identity(&QueryCriteria::new(StateType::Membership).linear_id(linear_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.state_ref, v1.out_ref(0));

        let paged = f
            .vault
            .find_all(&QueryCriteria::new(StateType::Membership), Page::new(1, 10))
            .await
            .unwrap();
        assert!(paged.is_empty());
    }
}
