//! Recording transactions received from peers
//!
//! A finalized transaction is recorded only after its signatures (parties and
//! notary) verify and the rule engine accepts it against the receiver's own
//! vault. Dependencies travel oldest first so each one resolves against
//! those recorded before it.

use crate::{Error, Node, Result};
use attest_core::{Operation, SignedTransaction, StateType};

/// Verify and record a dependency chain; returns how many were new
pub(crate) fn record_chain(node: &Node, chain: &[SignedTransaction]) -> Result<usize> {
    let mut recorded = 0;
    for tx in chain {
        if record_finalized(node, tx)? {
            recorded += 1;
        }
    }
    if recorded > 0 {
        tracing::debug!(party = %node.party(), recorded, "Dependencies recorded");
    }
    Ok(recorded)
}

/// Verify and record one finalized transaction
///
/// Returns `false` if it was already recorded.
pub(crate) fn record_finalized(node: &Node, tx: &SignedTransaction) -> Result<bool> {
    let vault = node.vault();
    if vault.has_transaction(&tx.id)? {
        return Ok(false);
    }

    if &tx.tx.notary != node.notary().party() {
        return Err(Error::Protocol(format!(
            "Transaction {} names unknown notary {}",
            tx.id, tx.tx.notary
        )));
    }
    tx.verify_finalized()?;

    let ltx = vault.to_ledger_transaction(&tx.tx)?;
    node.rules().validate(&ltx)?;

    let recorded = vault.record_transaction(tx)?;
    if recorded {
        after_record(node, tx)?;
    }
    Ok(recorded)
}

/// Local bookkeeping once a transaction is on the ledger
fn after_record(node: &Node, tx: &SignedTransaction) -> Result<()> {
    let command = &tx.tx.command;
    if command.state_type == StateType::Relationship && command.operation == Operation::Revoke {
        for input in &tx.tx.inputs {
            let Some(stored) = node.vault().stored_state(input)? else {
                continue;
            };
            if let Some(linear_id) = stored.state_and_ref.state.linear_id() {
                if node.locks().release_and_delete(node.party(), &linear_id)? {
                    tracing::info!(
                        party = %node.party(),
                        relationship = %linear_id,
                        "Revocation lock removed after revoke"
                    );
                }
            }
        }
    }
    Ok(())
}
