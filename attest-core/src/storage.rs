//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `transactions` - Signed transactions (key: tx id)
//! - `states` - Recorded states with their consumption flag (key: tx id || index)
//! - `indices` - Secondary indices for queries
//!
//! # Index keys
//!
//! - `T` || state type || seq || state ref - all states of a variant, oldest first
//! - `L` || linear id || seq || state ref - all versions of an entity, oldest first
//! - `H` || content hash || state ref - duplicate detection
//! - `S` - last assigned sequence number

use crate::{
    config::Config,
    crypto::SecureHash,
    error::{Error, Result},
    state::StateAndRef,
    transaction::SignedTransaction,
    types::{LinearId, StateRef, StateType},
};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Column family names
const CF_TRANSACTIONS: &str = "transactions";
const CF_STATES: &str = "states";
const CF_INDICES: &str = "indices";

const IDX_TYPE: u8 = b'T';
const IDX_LINEAR: u8 = b'L';
const IDX_HASH: u8 = b'H';
const KEY_SEQUENCE: &[u8] = b"S";

/// A state as stored in the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    /// State and its reference
    pub state_and_ref: StateAndRef,
    /// Whether a recorded transaction consumed it
    pub consumed: bool,
    /// Content hash at recording time
    pub content_hash: SecureHash,
    /// Insertion order
    pub sequence: u64,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

impl StoredState {
    /// Reference of the stored state
    pub fn state_ref(&self) -> StateRef {
        self.state_and_ref.state_ref
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sequence: AtomicU64,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_STATES, Self::cf_options_states()),
            ColumnFamilyDescriptor::new(
                CF_INDICES,
                Self::cf_options_indices(config.rocksdb.index_bloom_bits),
            ),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        let storage = Self {
            db: Arc::new(db),
            sequence: AtomicU64::new(0),
        };

        let last = storage.read_sequence()?;
        storage.sequence.store(last, Ordering::SeqCst);

        tracing::info!(path = ?path, sequence = last, "Opened vault storage");

        Ok(storage)
    }

    /// Open with default tuning at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&Config::with_data_dir(path.as_ref()))
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_states() -> Options {
        let mut opts = Options::default();
        // Read on every validation
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices(bloom_bits: f64) -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(bloom_bits, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn read_sequence(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(&cf, KEY_SEQUENCE)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt sequence counter".to_string()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Allocate the next insertion sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    // Transaction operations

    /// Get a transaction by id
    pub fn get_transaction(&self, id: &SecureHash) -> Result<Option<SignedTransaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Whether a transaction is recorded
    pub fn has_transaction(&self, id: &SecureHash) -> Result<bool> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        Ok(self.db.get_pinned_cf(&cf, id.as_bytes())?.is_some())
    }

    // State operations

    /// Get a state by reference
    pub fn get_state(&self, state_ref: &StateRef) -> Result<Option<StoredState>> {
        let cf = self.cf_handle(CF_STATES)?;
        match self.db.get_cf(&cf, state_ref.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All states of a variant, oldest first
    pub fn states_by_type(&self, state_type: StateType) -> Result<Vec<StoredState>> {
        self.scan_index(&[IDX_TYPE, state_type as u8])
    }

    /// All versions of a linear entity, oldest first
    pub fn states_by_linear_id(&self, linear_id: &LinearId) -> Result<Vec<StoredState>> {
        let mut prefix = vec![IDX_LINEAR];
        prefix.extend_from_slice(linear_id.as_uuid().as_bytes());
        self.scan_index(&prefix)
    }

    /// All states with a content hash
    pub fn states_by_content_hash(&self, hash: &SecureHash) -> Result<Vec<StoredState>> {
        let mut prefix = vec![IDX_HASH];
        prefix.extend_from_slice(hash.as_bytes());
        let mut states = self.scan_index(&prefix)?;
        states.sort_by_key(|s| s.sequence);
        Ok(states)
    }

    /// Resolve every index entry under `prefix`; the state ref is the key suffix
    fn scan_index(&self, prefix: &[u8]) -> Result<Vec<StoredState>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut states = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if key.len() < 36 {
                return Err(Error::Storage("Corrupt index key".to_string()));
            }

            let state_key = &key[key.len() - 36..];
            let tx_id: [u8; 32] = state_key[..32]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt index key".to_string()))?;
            let index: [u8; 4] = state_key[32..]
                .try_into()
                .map_err(|_| Error::Storage("Corrupt index key".to_string()))?;
            let state_ref = StateRef::new(SecureHash::from_bytes(tx_id), u32::from_be_bytes(index));

            let stored = self.get_state(&state_ref)?.ok_or_else(|| {
                Error::Storage(format!("Index points at missing state {}", state_ref))
            })?;
            states.push(stored);
        }

        Ok(states)
    }

    /// Overwrite the record of an already indexed state
    pub fn put_state(&self, stored: &StoredState) -> Result<()> {
        let cf = self.cf_handle(CF_STATES)?;
        self.db
            .put_cf(&cf, stored.state_ref().to_key(), bincode::serialize(stored)?)?;
        Ok(())
    }

    /// Remove a state and its index entries
    pub fn delete_state(&self, stored: &StoredState) -> Result<()> {
        let cf_states = self.cf_handle(CF_STATES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let state_key = stored.state_ref().to_key();

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_states, state_key);

        let state_type = stored.state_and_ref.state.state_type();
        batch.delete_cf(
            &cf_indices,
            Self::index_key(&[IDX_TYPE, state_type as u8], stored.sequence, &state_key),
        );
        if let Some(linear_id) = stored.state_and_ref.state.linear_id() {
            let mut prefix = vec![IDX_LINEAR];
            prefix.extend_from_slice(linear_id.as_uuid().as_bytes());
            batch.delete_cf(
                &cf_indices,
                Self::index_key(&prefix, stored.sequence, &state_key),
            );
        }
        let mut hash_key = vec![IDX_HASH];
        hash_key.extend_from_slice(stored.content_hash.as_bytes());
        hash_key.extend_from_slice(&state_key);
        batch.delete_cf(&cf_indices, hash_key);

        self.db.write(batch)?;
        Ok(())
    }

    // Batch operations (atomic)

    /// Write a transaction, its newly created states and the consumption of
    /// its inputs in one atomic batch
    pub fn commit(
        &self,
        tx: &SignedTransaction,
        created: &[StoredState],
        consumed: &[StoredState],
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(&cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);

        let cf_states = self.cf_handle(CF_STATES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        for stored in consumed {
            batch.put_cf(
                &cf_states,
                stored.state_ref().to_key(),
                bincode::serialize(stored)?,
            );
        }

        let mut max_sequence = None;
        for stored in created {
            let state_key = stored.state_ref().to_key();
            batch.put_cf(&cf_states, state_key, bincode::serialize(stored)?);

            let state_type = stored.state_and_ref.state.state_type();
            batch.put_cf(
                &cf_indices,
                Self::index_key(&[IDX_TYPE, state_type as u8], stored.sequence, &state_key),
                b"",
            );

            if let Some(linear_id) = stored.state_and_ref.state.linear_id() {
                let mut prefix = vec![IDX_LINEAR];
                prefix.extend_from_slice(linear_id.as_uuid().as_bytes());
                batch.put_cf(
                    &cf_indices,
                    Self::index_key(&prefix, stored.sequence, &state_key),
                    b"",
                );
            }

            let mut hash_key = vec![IDX_HASH];
            hash_key.extend_from_slice(stored.content_hash.as_bytes());
            hash_key.extend_from_slice(&state_key);
            batch.put_cf(&cf_indices, hash_key, b"");

            max_sequence = max_sequence.max(Some(stored.sequence));
        }

        if let Some(sequence) = max_sequence {
            batch.put_cf(&cf_indices, KEY_SEQUENCE, sequence.to_be_bytes());
        }

        self.db.write(batch)?;

        tracing::debug!(
            tx_id = %tx.id,
            created = created.len(),
            consumed = consumed.len(),
            "Transaction committed to storage"
        );

        Ok(())
    }

    fn index_key(prefix: &[u8], sequence: u64, state_key: &[u8; 36]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 8 + 36);
        key.extend_from_slice(prefix);
        key.extend_from_slice(&sequence.to_be_bytes());
        key.extend_from_slice(state_key);
        key
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_states = self.cf_handle(CF_STATES)?;

        let total_transactions = self
            .db
            .property_int_value_cf(&cf_transactions, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        let total_states = self
            .db
            .property_int_value_cf(&cf_states, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(StorageStats {
            total_transactions,
            total_states,
            last_sequence: self.sequence.load(Ordering::SeqCst),
        })
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish()
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of transactions
    pub total_transactions: u64,
    /// Approximate number of states
    pub total_states: u64,
    /// Last assigned insertion sequence
    pub last_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::state::{ContractState, Membership};
    use crate::transaction::{Command, Operation, TransactionBuilder};
    use crate::types::{NetworkIdentity, Party};
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open_path(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn membership_tx(holder: &Party, notary: &Party) -> SignedTransaction {
        let wire = TransactionBuilder::new(notary.clone())
            .add_output(ContractState::Membership(Membership::new(
                NetworkIdentity::new("Trade"),
                holder.clone(),
            )))
            .command(Command::new(
                StateType::Membership,
                Operation::Issue,
                [holder.owning_key],
            ))
            .build()
            .unwrap();
        SignedTransaction::new(wire)
    }

    fn stored(storage: &Storage, state_and_ref: StateAndRef) -> StoredState {
        StoredState {
            content_hash: state_and_ref.state.content_hash(),
            state_and_ref,
            consumed: false,
            sequence: storage.next_sequence(),
            recorded_at: Utc::now(),
        }
    }

    fn party(name: &str) -> Party {
        Party::new(name, KeyPair::generate().public_key())
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_TRANSACTIONS).is_some());
        assert!(storage.db.cf_handle(CF_STATES).is_some());
        assert!(storage.db.cf_handle(CF_INDICES).is_some());
    }

    #[test]
    fn test_commit_and_read_back() {
        let (storage, _temp) = test_storage();
        let tx = membership_tx(&party("Alice"), &party("Notary"));
        let created: Vec<_> = tx
            .tx
            .output_states()
            .into_iter()
            .map(|s| stored(&storage, s))
            .collect();

        storage.commit(&tx, &created, &[]).unwrap();

        assert!(storage.has_transaction(&tx.id).unwrap());
        assert_eq!(storage.get_transaction(&tx.id).unwrap(), Some(tx.clone()));

        let state = storage.get_state(&tx.out_ref(0)).unwrap().unwrap();
        assert!(!state.consumed);

        let by_type = storage.states_by_type(StateType::Membership).unwrap();
        assert_eq!(by_type.len(), 1);
        assert!(storage.states_by_type(StateType::Relationship).unwrap().is_empty());

        let linear_id = state.state_and_ref.state.linear_id().unwrap();
        assert_eq!(storage.states_by_linear_id(&linear_id).unwrap().len(), 1);
        assert_eq!(
            storage
                .states_by_content_hash(&state.content_hash)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_type_index_is_insertion_ordered() {
        let (storage, _temp) = test_storage();
        let notary = party("Notary");
        let mut expected = Vec::new();

        for name in ["A", "B", "C"] {
            let tx = membership_tx(&party(name), &notary);
            let created: Vec<_> = tx
                .tx
                .output_states()
                .into_iter()
                .map(|s| stored(&storage, s))
                .collect();
            storage.commit(&tx, &created, &[]).unwrap();
            expected.push(tx.out_ref(0));
        }

        let refs: Vec<_> = storage
            .states_by_type(StateType::Membership)
            .unwrap()
            .iter()
            .map(|s| s.state_ref())
            .collect();
        assert_eq!(refs, expected);
    }

    #[test]
    fn test_delete_state_removes_indices() {
        let (storage, _temp) = test_storage();
        let tx = membership_tx(&party("Alice"), &party("Notary"));
        let created: Vec<_> = tx
            .tx
            .output_states()
            .into_iter()
            .map(|s| stored(&storage, s))
            .collect();
        storage.commit(&tx, &created, &[]).unwrap();

        storage.delete_state(&created[0]).unwrap();
        assert!(storage.get_state(&tx.out_ref(0)).unwrap().is_none());
        assert!(storage.states_by_type(StateType::Membership).unwrap().is_empty());
        assert!(storage
            .states_by_content_hash(&created[0].content_hash)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = Storage::open_path(temp_dir.path()).unwrap();
            let tx = membership_tx(&party("Alice"), &party("Notary"));
            let created: Vec<_> = tx
                .tx
                .output_states()
                .into_iter()
                .map(|s| stored(&storage, s))
                .collect();
            storage.commit(&tx, &created, &[]).unwrap();
        }

        let reopened = Storage::open_path(temp_dir.path()).unwrap();
        assert_eq!(reopened.get_stats().unwrap().last_sequence, 1);
        assert_eq!(reopened.next_sequence(), 2);
    }
}
