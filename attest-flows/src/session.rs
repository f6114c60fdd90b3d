//! Peer sessions
//!
//! A session is a private, ordered, bidirectional channel between two nodes.
//! Flows are written purely against [`FlowSession`]: they suspend at every
//! `send`/`receive` boundary and nowhere else.

use crate::{Error, Result};
use async_trait::async_trait;
use attest_core::Party;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Peer messaging collaborator
#[async_trait]
pub trait PeerMessaging: Send + Sync {
    /// Identity of the local node
    fn local_party(&self) -> &Party;

    /// Open a session to `counterparty`
    async fn open_session(&self, counterparty: &Party) -> Result<FlowSession>;
}

/// One end of a session
#[derive(Debug)]
pub struct FlowSession {
    id: Uuid,
    counterparty: Party,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<Vec<u8>>,
    timeout: Duration,
}

impl FlowSession {
    /// Connected pair of session ends: the first for `a`, the second for `b`
    pub fn pair(a: Party, b: Party, capacity: usize, timeout: Duration) -> (Self, Self) {
        let id = Uuid::new_v4();
        let (to_b, from_a) = mpsc::channel(capacity);
        let (to_a, from_b) = mpsc::channel(capacity);

        let a_end = Self {
            id,
            counterparty: b,
            outbound: to_b,
            inbound: from_b,
            timeout,
        };
        let b_end = Self {
            id,
            counterparty: a,
            outbound: to_a,
            inbound: from_a,
            timeout,
        };
        (a_end, b_end)
    }

    /// Session identifier shared by both ends
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Party at the other end
    pub fn counterparty(&self) -> &Party {
        &self.counterparty
    }

    /// Send a payload
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let bytes = bincode::serialize(payload)?;
        self.outbound.send(bytes).await.map_err(|_| {
            Error::from(attest_core::Error::PeerUnreachable(format!(
                "{} closed session {}",
                self.counterparty, self.id
            )))
        })
    }

    /// Wait for the next payload
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = tokio::time::timeout(self.timeout, self.inbound.recv())
            .await
            .map_err(|_| {
                Error::from(attest_core::Error::PeerTimeout(format!(
                    "{} did not answer within {:?}",
                    self.counterparty, self.timeout
                )))
            })?
            .ok_or_else(|| {
                Error::from(attest_core::Error::PeerUnreachable(format!(
                    "{} closed session {}",
                    self.counterparty, self.id
                )))
            })?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Send a payload and wait for the answer
    pub async fn send_and_receive<T, U>(&mut self, payload: &U) -> Result<T>
    where
        T: DeserializeOwned,
        U: Serialize + ?Sized,
    {
        self.send(payload).await?;
        self.receive().await
    }
}
