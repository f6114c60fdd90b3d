//! Transaction choreography
//!
//! Initiator and responder state machines for collecting signatures across
//! peers. The protocol is two-phase so that nobody signs before everybody
//! has validated:
//!
//! ```text
//!  Initiator                                Responder (per signer)
//!  ─────────                                ─────────────────────
//!  Generating / LocalValidating / Signing
//!  [CheckMembership] ─────────────────────▶ remember instruction
//!                    ◀───────────────────── Ack
//!  Proposal{tx, deps} ────────────────────▶ RemoteValidating
//!                    ◀───────────────────── Validated | Rejected
//!  SignRequest ───────────────────────────▶ Countersigning
//!                    ◀───────────────────── Signature
//!  Finalizing: notary commit, record
//!  Finalized{tx, deps} ───────────────────▶ verify, record
//!                    ◀───────────────────── Ack
//! ```
//!
//! Participants that do not sign receive only `Finalized`.

use crate::{
    messages::{FlowMessage, Refusal},
    resolution,
    session::FlowSession,
    Error, Node, Result,
};
use attest_core::{
    AttestationStatus, LedgerTransaction, LinearId, NetworkIdentity, Operation, Party,
    QueryCriteria, SignedTransaction, StateAndRef, StateRef, StateType, TransactionSignature,
    WireTransaction,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

/// Steps of the choreography state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStep {
    /// Flow created
    Initializing,
    /// Building inputs, outputs and command
    Generating,
    /// Running the rule engine locally
    LocalValidating,
    /// Signing with the local key
    Signing,
    /// Telling counterparties to verify memberships
    BroadcastCheckInstruction,
    /// Counterparties validating the proposal
    RemoteValidating,
    /// Collecting counterparty signatures
    Countersigning,
    /// Notarising, recording and distributing
    Finalizing,
    /// Finished
    Done,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStep::Initializing => "Initializing",
            FlowStep::Generating => "Generating",
            FlowStep::LocalValidating => "LocalValidating",
            FlowStep::Signing => "Signing",
            FlowStep::BroadcastCheckInstruction => "BroadcastCheckInstruction",
            FlowStep::RemoteValidating => "RemoteValidating",
            FlowStep::Countersigning => "Countersigning",
            FlowStep::Finalizing => "Finalizing",
            FlowStep::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Records and logs the steps a flow passes through
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    flow: &'static str,
    party: Party,
    steps: Vec<FlowStep>,
}

impl ProgressTracker {
    /// Start tracking in [`FlowStep::Initializing`]
    pub fn new(flow: &'static str, party: Party) -> Self {
        tracing::debug!(flow, party = %party, step = %FlowStep::Initializing, "Flow step");
        Self {
            flow,
            party,
            steps: vec![FlowStep::Initializing],
        }
    }

    /// Move to `step`
    pub fn advance(&mut self, step: FlowStep) {
        tracing::debug!(flow = self.flow, party = %self.party, step = %step, "Flow step");
        self.steps.push(step);
    }

    /// Current step
    pub fn current(&self) -> FlowStep {
        self.steps.last().copied().unwrap_or(FlowStep::Initializing)
    }

    /// Every step so far, in order
    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }
}

/// Outcome of an initiated flow
#[derive(Debug, Clone)]
pub struct FlowResult {
    /// The finalized transaction
    pub tx: SignedTransaction,
    /// Steps the initiator went through
    pub steps: Vec<FlowStep>,
    /// When the initiator finished distributing
    pub completed_at: DateTime<Utc>,
}

impl FlowResult {
    /// Reference of output `index`
    pub fn out_ref(&self, index: usize) -> StateRef {
        self.tx.out_ref(index)
    }

    /// Output `index` with its reference
    pub fn output(&self, index: usize) -> Option<StateAndRef> {
        self.tx
            .tx
            .outputs
            .get(index)
            .map(|state| StateAndRef::new(state.clone(), self.tx.out_ref(index)))
    }

    /// Linear identity of the first versioned output
    pub fn linear_id(&self) -> Option<LinearId> {
        self.tx.tx.outputs.iter().find_map(|s| s.linear_id())
    }
}

/// Initiator side of one transaction
#[derive(Debug)]
pub(crate) struct Initiator<'a> {
    node: &'a Node,
    flow: &'static str,
    progress: ProgressTracker,
    started: Instant,
}

impl<'a> Initiator<'a> {
    pub(crate) fn new(node: &'a Node, flow: &'static str) -> Self {
        Self {
            node,
            flow,
            progress: ProgressTracker::new(flow, node.party().clone()),
            started: Instant::now(),
        }
    }

    /// Enter [`FlowStep::Generating`]
    pub(crate) fn generating(&mut self) {
        self.progress.advance(FlowStep::Generating);
    }

    /// Validate, sign, collect signatures, notarise and distribute
    pub(crate) async fn run(
        mut self,
        wire: WireTransaction,
        check_membership: Option<NetworkIdentity>,
    ) -> Result<FlowResult> {
        let node = self.node;
        let me = node.party().clone();

        self.progress.advance(FlowStep::LocalValidating);
        let ltx = node.vault().to_ledger_transaction(&wire)?;
        node.rules().validate(&ltx)?;
        let (counterparties, observers) = split_parties(&ltx, &me)?;

        self.progress.advance(FlowStep::Signing);
        let mut tx = SignedTransaction::new(wire);
        tx.sign_with(node.keys());
        let dependencies = node.vault().backchain(&tx)?;
        tracing::info!(
            flow = self.flow,
            tx_id = %tx.id,
            party = %me,
            counterparties = counterparties.len(),
            "Proposing transaction"
        );

        let mut sessions = Vec::with_capacity(counterparties.len());
        for party in &counterparties {
            sessions.push(node.open_session(party).await?);
        }

        let checking = match check_membership {
            Some(network) if !sessions.is_empty() => {
                self.progress.advance(FlowStep::BroadcastCheckInstruction);
                let instruction = FlowMessage::CheckMembership { network };
                let replies = join_all(
                    sessions
                        .iter_mut()
                        .map(|s| s.send_and_receive::<FlowMessage, _>(&instruction)),
                )
                .await;
                self.expect_all(&sessions, replies, "Ack", |m| matches!(m, FlowMessage::Ack))
                    .await?;
                self.progress.advance(FlowStep::RemoteValidating);
                true
            }
            _ => {
                self.progress.advance(FlowStep::Countersigning);
                false
            }
        };

        let proposal = FlowMessage::Proposal {
            tx: tx.clone(),
            dependencies: dependencies.clone(),
        };
        let replies = join_all(
            sessions
                .iter_mut()
                .map(|s| s.send_and_receive::<FlowMessage, _>(&proposal)),
        )
        .await;
        self.expect_all(&sessions, replies, "Validated", |m| {
            matches!(m, FlowMessage::Validated)
        })
        .await?;

        if checking {
            self.progress.advance(FlowStep::Countersigning);
        }
        let replies = join_all(
            sessions
                .iter_mut()
                .map(|s| s.send_and_receive::<FlowMessage, _>(&FlowMessage::SignRequest)),
        )
        .await;
        for (session, reply) in sessions.iter().zip(replies) {
            let signature = match reply {
                Ok(FlowMessage::Signature(signature)) => signature,
                Ok(FlowMessage::Rejected(refusal)) => {
                    let err = refusal.into_error(session.counterparty().clone());
                    abort(&sessions, &err).await;
                    return Err(err);
                }
                Ok(other) => {
                    let err = other.unexpected("Signature");
                    abort(&sessions, &err).await;
                    return Err(err);
                }
                Err(err) => {
                    abort(&sessions, &err).await;
                    return Err(err);
                }
            };
            if let Err(err) = check_signature(&tx, session.counterparty(), &signature) {
                abort(&sessions, &err).await;
                return Err(err);
            }
            tx.add_signature(signature);
        }

        self.progress.advance(FlowStep::Finalizing);
        if let Err(err) = tx.verify_required_signatures() {
            let err = Error::from(err);
            abort(&sessions, &err).await;
            return Err(err);
        }
        let notarised = match node.notary().commit(&tx).await {
            Ok(outcome) => outcome.into_signature(),
            Err(err) => Err(err),
        };
        let notary_signature = match notarised {
            Ok(signature) => signature,
            Err(err) => {
                let err = Error::from(err);
                abort(&sessions, &err).await;
                return Err(err);
            }
        };
        tx.notary_signature = Some(notary_signature);

        // Irrevocable from here on: distribution failures are only logged
        resolution::record_finalized(node, &tx)?;
        let finalized = FlowMessage::Finalized {
            tx: tx.clone(),
            dependencies,
        };
        let acks = join_all(
            sessions
                .iter_mut()
                .map(|s| s.send_and_receive::<FlowMessage, _>(&finalized)),
        )
        .await;
        for (session, ack) in sessions.iter().zip(acks) {
            if !matches!(ack, Ok(FlowMessage::Ack)) {
                tracing::warn!(tx_id = %tx.id, party = %session.counterparty(), "Counterparty did not acknowledge finalization");
            }
        }
        for observer in &observers {
            if let Err(e) = notify_observer(node, observer, &finalized).await {
                tracing::warn!(tx_id = %tx.id, party = %observer, error = %e, "Observer not notified");
            }
        }

        self.progress.advance(FlowStep::Done);
        node.metrics()
            .record_flow_duration(self.flow, self.started.elapsed().as_secs_f64());
        tracing::info!(flow = self.flow, tx_id = %tx.id, party = %me, "Transaction finalized");

        Ok(FlowResult {
            tx,
            steps: self.progress.steps().to_vec(),
            completed_at: Utc::now(),
        })
    }

    /// Fail (and abort every session) unless every reply satisfies `ok`
    async fn expect_all(
        &self,
        sessions: &[FlowSession],
        replies: Vec<Result<FlowMessage>>,
        expected: &'static str,
        ok: impl Fn(&FlowMessage) -> bool,
    ) -> Result<()> {
        let mut failure = None;
        for (session, reply) in sessions.iter().zip(replies) {
            let err = match reply {
                Ok(msg) if ok(&msg) => continue,
                Ok(FlowMessage::Rejected(refusal)) => {
                    refusal.into_error(session.counterparty().clone())
                }
                Ok(other) => other.unexpected(expected),
                Err(err) => err,
            };
            tracing::info!(
                flow = self.flow,
                party = %session.counterparty(),
                error = %err,
                "Counterparty refused"
            );
            if failure.is_none() {
                failure = Some(err);
            }
        }

        match failure {
            Some(err) => {
                abort(sessions, &err).await;
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// Signing counterparties and non-signing observers of a transaction
fn split_parties(ltx: &LedgerTransaction, me: &Party) -> Result<(Vec<Party>, Vec<Party>)> {
    let participants = ltx.participants();
    let by_key: BTreeMap<_, &Party> = participants.iter().map(|p| (p.owning_key, p)).collect();

    if !ltx.signers.contains(&me.owning_key) {
        return Err(Error::Protocol(format!(
            "{} is not a required signer of {}",
            me, ltx.command
        )));
    }

    let mut counterparties = Vec::new();
    for key in &ltx.signers {
        if key == &me.owning_key {
            continue;
        }
        let party = by_key.get(key).ok_or_else(|| {
            Error::Protocol(format!("Signer {} is not a participant of {}", key, ltx.id))
        })?;
        counterparties.push((*party).clone());
    }

    let observers = participants
        .iter()
        .filter(|p| *p != me && !ltx.signers.contains(&p.owning_key))
        .cloned()
        .collect();

    Ok((counterparties, observers))
}

fn check_signature(
    tx: &SignedTransaction,
    party: &Party,
    signature: &TransactionSignature,
) -> Result<()> {
    if signature.by != party.owning_key || !signature.verify(&tx.id) {
        return Err(Error::Protocol(format!(
            "{} returned an invalid signature for {}",
            party, tx.id
        )));
    }
    Ok(())
}

async fn abort(sessions: &[FlowSession], err: &Error) {
    let message = FlowMessage::Aborted {
        reason: err.to_string(),
    };
    for session in sessions {
        // The refusing side may already have closed its end
        let _ = session.send(&message).await;
    }
}

async fn notify_observer(node: &Node, observer: &Party, finalized: &FlowMessage) -> Result<()> {
    let mut session = node.open_session(observer).await?;
    match session.send_and_receive::<FlowMessage, _>(finalized).await? {
        FlowMessage::Ack => Ok(()),
        FlowMessage::Rejected(refusal) => Err(refusal.into_error(observer.clone())),
        other => Err(other.unexpected("Ack")),
    }
}

/// Answer a session opened by a peer
pub(crate) async fn respond(node: Node, mut session: FlowSession) {
    let counterparty = session.counterparty().clone();
    if let Err(e) = dispatch(&node, &mut session).await {
        tracing::warn!(
            party = %node.party(),
            counterparty = %counterparty,
            session = %session.id(),
            error = %e,
            "Responder flow failed"
        );
    }
}

async fn dispatch(node: &Node, session: &mut FlowSession) -> Result<()> {
    let first: FlowMessage = session.receive().await?;
    tracing::debug!(party = %node.party(), counterparty = %session.counterparty(), message = first.kind(), "Session opened by peer");

    match first {
        FlowMessage::CheckMembership { network } => {
            session.send(&FlowMessage::Ack).await?;
            match session.receive::<FlowMessage>().await? {
                FlowMessage::Proposal { tx, dependencies } => {
                    respond_to_proposal(node, session, tx, dependencies, Some(network)).await
                }
                FlowMessage::Aborted { reason } => {
                    tracing::info!(party = %node.party(), reason = %reason, "Initiator aborted");
                    Ok(())
                }
                other => Err(other.unexpected("Proposal")),
            }
        }
        FlowMessage::Proposal { tx, dependencies } => {
            respond_to_proposal(node, session, tx, dependencies, None).await
        }
        FlowMessage::Finalized { tx, dependencies } => {
            match record_received(node, &tx, &dependencies) {
                Ok(()) => session.send(&FlowMessage::Ack).await,
                Err(e) => {
                    session
                        .send(&FlowMessage::Rejected(Refusal::from_error(&e)))
                        .await?;
                    Err(e)
                }
            }
        }
        FlowMessage::LockQuery { target } => {
            let locked = node.locks().is_locked(node.party(), &target)?;
            session.send(&FlowMessage::LockStatus { locked }).await
        }
        FlowMessage::Sync { network, package } => {
            crate::sync::respond(node, session, network, package).await
        }
        other => {
            session
                .send(&FlowMessage::Rejected(Refusal::Other(format!(
                    "Cannot open a session with {}",
                    other.kind()
                ))))
                .await?;
            Err(other.unexpected("session opener"))
        }
    }
}

fn record_received(
    node: &Node,
    tx: &SignedTransaction,
    dependencies: &[SignedTransaction],
) -> Result<()> {
    resolution::record_chain(node, dependencies)?;
    resolution::record_finalized(node, tx)?;
    Ok(())
}

async fn respond_to_proposal(
    node: &Node,
    session: &mut FlowSession,
    tx: SignedTransaction,
    dependencies: Vec<SignedTransaction>,
    check_membership: Option<NetworkIdentity>,
) -> Result<()> {
    let mut progress = ProgressTracker::new("responder", node.party().clone());
    progress.advance(FlowStep::RemoteValidating);

    let initiator = session.counterparty().clone();
    let revoking =
        match validate_proposal(node, &initiator, &tx, &dependencies, check_membership.as_ref()) {
            Ok(revoking) => revoking,
            Err(refusal) => {
                tracing::info!(
                    party = %node.party(),
                    tx_id = %tx.id,
                    refusal = ?refusal,
                    "Refusing proposal"
                );
                session.send(&FlowMessage::Rejected(refusal)).await?;
                return Ok(());
            }
        };
    session.send(&FlowMessage::Validated).await?;

    progress.advance(FlowStep::Countersigning);
    match session.receive::<FlowMessage>().await? {
        FlowMessage::SignRequest => {
            // The lock may have been re-applied since validation
            if let Err(refusal) = ensure_released(node, &revoking) {
                tracing::info!(
                    party = %node.party(),
                    tx_id = %tx.id,
                    refusal = ?refusal,
                    "Refusing to counter-sign"
                );
                session.send(&FlowMessage::Rejected(refusal)).await?;
                return Ok(());
            }
            let signature = TransactionSignature::sign(node.keys(), &tx.id);
            session.send(&FlowMessage::Signature(signature)).await?;
        }
        FlowMessage::Aborted { reason } => {
            tracing::info!(party = %node.party(), tx_id = %tx.id, reason = %reason, "Initiator aborted");
            return Ok(());
        }
        other => return Err(other.unexpected("SignRequest")),
    }

    progress.advance(FlowStep::Finalizing);
    match session.receive::<FlowMessage>().await? {
        FlowMessage::Finalized {
            tx: finalized,
            dependencies,
        } => {
            if finalized.id != tx.id {
                return Err(Error::Protocol(format!(
                    "Finalized {} differs from proposal {}",
                    finalized.id, tx.id
                )));
            }
            record_received(node, &finalized, &dependencies)?;
            session.send(&FlowMessage::Ack).await?;
        }
        FlowMessage::Aborted { reason } => {
            tracing::info!(party = %node.party(), tx_id = %tx.id, reason = %reason, "Initiator aborted");
            return Ok(());
        }
        other => return Err(other.unexpected("Finalized")),
    }

    progress.advance(FlowStep::Done);
    tracing::info!(party = %node.party(), tx_id = %tx.id, "Counter-signed transaction recorded");
    Ok(())
}

/// Every check a responder runs before agreeing to sign
///
/// Returns the relationships the proposal revokes, whose locks must still be
/// released when the signature is requested.
fn validate_proposal(
    node: &Node,
    initiator: &Party,
    tx: &SignedTransaction,
    dependencies: &[SignedTransaction],
    check_membership: Option<&NetworkIdentity>,
) -> std::result::Result<Vec<LinearId>, Refusal> {
    let refuse = |e: Error| Refusal::from_error(&e);
    let me = node.party();

    if &tx.tx.notary != node.notary().party() {
        return Err(Refusal::Other(format!("Unknown notary {}", tx.tx.notary)));
    }
    if !tx.tx.command.signers.contains(&me.owning_key) {
        return Err(Refusal::Other(format!("{} is not a required signer", me)));
    }
    if !tx.signed_by().contains(&initiator.owning_key) {
        return Err(Refusal::Other(format!("{} has not signed its proposal", initiator)));
    }
    tx.verify_signatures_except(&tx.missing_signers())
        .map_err(|e| refuse(e.into()))?;

    resolution::record_chain(node, dependencies).map_err(refuse)?;
    let ltx = node
        .vault()
        .to_ledger_transaction(&tx.tx)
        .map_err(|e| refuse(e.into()))?;
    node.rules().validate(&ltx).map_err(|e| refuse(e.into()))?;

    // Authoritative lock check: only this node knows its own lock
    let revoking: Vec<LinearId> = if ltx.command.state_type == StateType::Relationship
        && ltx.command.operation == Operation::Revoke
    {
        ltx.inputs.iter().filter_map(|i| i.state.linear_id()).collect()
    } else {
        Vec::new()
    };
    ensure_released(node, &revoking)?;

    if let Some(network) = check_membership {
        check_counterparty_memberships(node, &ltx, network)?;
    }
    Ok(revoking)
}

/// Refuse with `LockHeld` while this node locks any of `relationships`
fn ensure_released(node: &Node, relationships: &[LinearId]) -> std::result::Result<(), Refusal> {
    for linear_id in relationships {
        node.locks()
            .ensure_unlocked(node.party(), linear_id)
            .map_err(|e| Refusal::from_error(&Error::from(e)))?;
    }
    Ok(())
}

/// Every non-local participant (the operator aside) must hold a live
/// membership carrying an accepted attestation by this node, or by the
/// operator in an operated network
fn check_counterparty_memberships(
    node: &Node,
    ltx: &LedgerTransaction,
    network: &NetworkIdentity,
) -> std::result::Result<(), Refusal> {
    let me = node.party();
    if ltx
        .outputs
        .iter()
        .filter_map(|s| s.state.network())
        .any(|n| !n.same_network(network))
    {
        return Err(Refusal::Membership(format!(
            "Transaction is not in network {}",
            network
        )));
    }

    let attestor = network.operator.as_ref().unwrap_or(me);
    let parties: BTreeSet<Party> = ltx
        .outputs
        .iter()
        .chain(ltx.inputs.iter())
        .flat_map(|s| s.state.participants())
        .filter(|p| p != me && !network.is_operator(p))
        .collect();

    for party in parties {
        let membership = node
            .vault()
            .find_unique(
                &QueryCriteria::new(StateType::Membership)
                    .holder(party.clone())
                    .network_hash(network.hash()),
            )
            .map_err(|e| Refusal::from_error(&Error::from(e)))?
            .ok_or_else(|| {
                Refusal::Membership(format!("{} has no membership in {}", party, network))
            })?;

        let attestation = node
            .vault()
            .find_unique(
                &QueryCriteria::new(StateType::MembershipAttestation)
                    .attestor(attestor.clone())
                    .pointer_ref(membership.state_ref),
            )
            .map_err(|e| Refusal::from_error(&Error::from(e)))?;
        let accepted = attestation
            .as_ref()
            .and_then(|a| a.state.as_attestation())
            .map_or(false, |a| a.status == AttestationStatus::Accepted);
        if !accepted {
            return Err(Refusal::Membership(format!(
                "Membership of {} is not attested by {}",
                party, attestor
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{Command, ContractState, KeyPair, Membership, TransactionBuilder};

    fn party(name: &str) -> Party {
        Party::new(name, KeyPair::generate().public_key())
    }

    #[test]
    fn test_progress_tracker_records_order() {
        let mut progress = ProgressTracker::new("test", party("Alice"));
        assert_eq!(progress.current(), FlowStep::Initializing);
        progress.advance(FlowStep::Generating);
        progress.advance(FlowStep::LocalValidating);
        assert_eq!(progress.current(), FlowStep::LocalValidating);
        assert_eq!(
            progress.steps(),
            &[
                FlowStep::Initializing,
                FlowStep::Generating,
                FlowStep::LocalValidating
            ]
        );
        assert_eq!(FlowStep::BroadcastCheckInstruction.to_string(), "BroadcastCheckInstruction");
    }

    #[test]
    fn test_split_parties() {
        let operator = party("Operator");
        let alice = party("Alice");
        let network = NetworkIdentity::with_operator("Trade", operator.clone());
        let wire = TransactionBuilder::new(party("Notary"))
            .add_output(ContractState::Membership(Membership::new(network, alice.clone())))
            .command(Command::new(
                StateType::Membership,
                Operation::Issue,
                [alice.owning_key],
            ))
            .build()
            .unwrap();
        let ltx = LedgerTransaction::new(&wire, Vec::new(), Vec::new());

        let (counterparties, observers) = split_parties(&ltx, &alice).unwrap();
        assert!(counterparties.is_empty());
        assert_eq!(observers, vec![operator.clone()]);

        assert!(matches!(
            split_parties(&ltx, &operator),
            Err(Error::Protocol(_))
        ));
    }
}
