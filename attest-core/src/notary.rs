//! Ordering service
//!
//! The notary guarantees that every state is consumed at most once across
//! the whole network. It is a single-writer actor: one task owns the map of
//! consumed inputs and processes commit requests one at a time, so two
//! transactions racing for the same input are strictly ordered and exactly
//! one of them wins.
//!
//! ```text
//!   NodeA ─┐                         ┌──────────────────────────┐
//!          │   NotaryHandle (Clone)  │  NotaryActor (one task)  │
//!   NodeB ─┼──── mpsc (bounded) ────▶│  consumed: ref → tx id   │
//!          │                         │  committed: tx id → sig  │
//!   NodeC ─┘ ◀─── oneshot reply ─────└──────────────────────────┘
//! ```

use crate::{
    crypto::{KeyPair, SecureHash},
    metrics::Metrics,
    transaction::{SignedTransaction, TransactionSignature},
    types::{Party, StateRef},
    Error, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

/// Default mailbox size
pub const DEFAULT_MAILBOX_SIZE: usize = 1000;

/// Result of a commit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotaryOutcome {
    /// The transaction now owns its inputs; carries the notary's signature
    Committed(TransactionSignature),
    /// Another transaction already consumed these inputs
    Conflict(Vec<StateRef>),
    /// These reference states have been consumed since the proposal was built
    StaleReference(Vec<StateRef>),
}

impl NotaryOutcome {
    /// Turn a refusal into the matching error
    pub fn into_signature(self) -> Result<TransactionSignature> {
        match self {
            NotaryOutcome::Committed(signature) => Ok(signature),
            NotaryOutcome::Conflict(refs) => Err(Error::Conflict(refs)),
            NotaryOutcome::StaleReference(refs) => Err(Error::StaleReference(format!(
                "References already consumed: {:?}",
                refs
            ))),
        }
    }
}

/// Ordering collaborator
#[async_trait]
pub trait Notary: Send + Sync {
    /// Identity transactions must name as their notary
    fn party(&self) -> &Party;

    /// Commit a fully peer-signed transaction
    async fn commit(&self, tx: &SignedTransaction) -> Result<NotaryOutcome>;
}

/// Message sent to the notary actor
#[derive(Debug)]
pub enum NotaryMessage {
    /// Commit a transaction
    Commit {
        /// Transaction carrying every participant signature
        tx: Box<SignedTransaction>,
        /// Reply channel
        response: oneshot::Sender<Result<NotaryOutcome>>,
    },

    /// Ask which transaction consumed a state
    ConsumedBy {
        /// State to look up
        state_ref: StateRef,
        /// Reply channel
        response: oneshot::Sender<Option<SecureHash>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor owning the consumed-input map
pub struct NotaryActor {
    keys: KeyPair,
    party: Party,
    mailbox: mpsc::Receiver<NotaryMessage>,
    consumed: HashMap<StateRef, SecureHash>,
    committed: HashMap<SecureHash, TransactionSignature>,
    metrics: Option<Metrics>,
}

impl NotaryActor {
    /// Create new actor
    pub fn new(
        keys: KeyPair,
        party: Party,
        mailbox: mpsc::Receiver<NotaryMessage>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            keys,
            party,
            mailbox,
            consumed: HashMap::new(),
            committed: HashMap::new(),
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                NotaryMessage::Commit { tx, response } => {
                    let result = self.commit(&tx);
                    if let Err(e) = &result {
                        tracing::error!(tx_id = %tx.id, error = %e, "Notary refused transaction");
                    }
                    let _ = response.send(result);
                }
                NotaryMessage::ConsumedBy {
                    state_ref,
                    response,
                } => {
                    let _ = response.send(self.consumed.get(&state_ref).copied());
                }
                NotaryMessage::Shutdown => break,
            }
        }
        tracing::debug!(notary = %self.party, "Notary stopped");
    }

    fn commit(&mut self, tx: &SignedTransaction) -> Result<NotaryOutcome> {
        if tx.tx.notary != self.party {
            return Err(Error::InvalidTransaction(format!(
                "Transaction {} names notary {}, not {}",
                tx.id, tx.tx.notary, self.party
            )));
        }
        tx.verify_required_signatures()?;

        // Re-submission of an already committed transaction
        if let Some(signature) = self.committed.get(&tx.id) {
            return Ok(NotaryOutcome::Committed(signature.clone()));
        }

        let conflicts: Vec<StateRef> = tx
            .tx
            .inputs
            .iter()
            .filter(|input| self.consumed.get(input).map_or(false, |by| by != &tx.id))
            .copied()
            .collect();
        if !conflicts.is_empty() {
            if let Some(metrics) = &self.metrics {
                metrics.record_conflict();
            }
            tracing::warn!(tx_id = %tx.id, conflicts = ?conflicts, "Double spend refused");
            return Ok(NotaryOutcome::Conflict(conflicts));
        }

        let stale: Vec<StateRef> = tx
            .tx
            .references
            .iter()
            .filter(|r| self.consumed.contains_key(r))
            .copied()
            .collect();
        if !stale.is_empty() {
            tracing::warn!(tx_id = %tx.id, stale = ?stale, "Stale reference refused");
            return Ok(NotaryOutcome::StaleReference(stale));
        }

        for input in &tx.tx.inputs {
            self.consumed.insert(*input, tx.id);
        }
        let signature = TransactionSignature::sign(&self.keys, &tx.id);
        self.committed.insert(tx.id, signature.clone());

        if let Some(metrics) = &self.metrics {
            metrics.record_commit();
        }
        tracing::info!(tx_id = %tx.id, inputs = tx.tx.inputs.len(), "Transaction notarised");

        Ok(NotaryOutcome::Committed(signature))
    }
}

impl std::fmt::Debug for NotaryActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotaryActor")
            .field("party", &self.party)
            .field("consumed", &self.consumed.len())
            .field("committed", &self.committed.len())
            .finish()
    }
}

/// Handle for sending messages to the notary actor
#[derive(Debug, Clone)]
pub struct NotaryHandle {
    sender: mpsc::Sender<NotaryMessage>,
    party: Party,
    timeout: Duration,
}

impl NotaryHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<NotaryMessage>, party: Party, timeout: Duration) -> Self {
        Self {
            sender,
            party,
            timeout,
        }
    }

    /// The transaction that consumed `state_ref`, if any
    pub async fn consumed_by(&self, state_ref: StateRef) -> Result<Option<SecureHash>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotaryMessage::ConsumedBy {
                state_ref,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Notary mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(NotaryMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Notary mailbox closed".to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Notary for NotaryHandle {
    fn party(&self) -> &Party {
        &self.party
    }

    async fn commit(&self, tx: &SignedTransaction) -> Result<NotaryOutcome> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(NotaryMessage::Commit {
                tx: Box::new(tx.clone()),
                response: reply,
            })
            .await
            .map_err(|_| Error::Concurrency("Notary mailbox closed".to_string()))?;

        tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| Error::PeerTimeout(format!("Notary {} did not answer", self.party)))?
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }
}

/// Spawn a notary actor named `name`
pub fn spawn_notary(
    name: &str,
    keys: KeyPair,
    timeout: Duration,
    metrics: Option<Metrics>,
) -> NotaryHandle {
    let party = Party::new(name, keys.public_key());
    let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_SIZE);
    let actor = NotaryActor::new(keys, party.clone(), rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    NotaryHandle::new(tx, party, timeout)
}
