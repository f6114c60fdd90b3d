//! In-memory peer network
//!
//! Every node joining the network gets an inbox of incoming sessions.
//! Opening a session creates a connected [`FlowSession`] pair and delivers
//! the far end to the counterparty's inbox.

use crate::{
    session::{FlowSession, PeerMessaging},
    Error, Result,
};
use async_trait::async_trait;
use attest_core::Party;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Buffered incoming sessions per node
const INBOX_CAPACITY: usize = 64;

/// What a transport hands a node when it joins
pub struct Endpoint {
    /// Outgoing side
    pub messaging: Arc<dyn PeerMessaging>,
    /// Sessions opened by peers
    pub inbox: mpsc::Receiver<FlowSession>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("party", self.messaging.local_party())
            .finish_non_exhaustive()
    }
}

struct NetworkInner {
    inboxes: DashMap<Party, mpsc::Sender<FlowSession>>,
    channel_capacity: usize,
    session_timeout: Duration,
}

/// Reliable request/response network living in one process
#[derive(Clone)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl InMemoryNetwork {
    /// Create a network whose sessions buffer `channel_capacity` messages
    /// and wait at most `session_timeout` for an answer
    pub fn new(channel_capacity: usize, session_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                inboxes: DashMap::new(),
                channel_capacity,
                session_timeout,
            }),
        }
    }

    /// Register `party`, replacing any previous registration
    pub fn join(&self, party: Party) -> Endpoint {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inner.inboxes.insert(party.clone(), tx);
        tracing::debug!(party = %party, "Joined network");

        Endpoint {
            messaging: Arc::new(InMemoryEndpoint {
                network: self.clone(),
                local: party,
            }),
            inbox: rx,
        }
    }

    /// Take `party` off the network; its peers see it as unreachable
    pub fn disconnect(&self, party: &Party) -> bool {
        let removed = self.inner.inboxes.remove(party).is_some();
        if removed {
            tracing::debug!(party = %party, "Left network");
        }
        removed
    }

    /// Whether `party` is reachable
    pub fn is_connected(&self, party: &Party) -> bool {
        self.inner.inboxes.contains_key(party)
    }

    fn connect(&self, from: &Party, to: &Party) -> Result<FlowSession> {
        // Release the map guard before delivering
        let inbox = self
            .inner
            .inboxes
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::from(attest_core::Error::PeerUnreachable(format!(
                    "{} is not on the network",
                    to
                )))
            })?;

        let (local, remote) = FlowSession::pair(
            from.clone(),
            to.clone(),
            self.inner.channel_capacity,
            self.inner.session_timeout,
        );
        inbox.try_send(remote).map_err(|e| {
            Error::from(attest_core::Error::PeerUnreachable(format!(
                "{} cannot accept sessions: {}",
                to, e
            )))
        })?;

        tracing::debug!(from = %from, to = %to, session = %local.id(), "Session opened");
        Ok(local)
    }
}

impl std::fmt::Debug for InMemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryNetwork")
            .field("nodes", &self.inner.inboxes.len())
            .field("session_timeout", &self.inner.session_timeout)
            .finish()
    }
}

struct InMemoryEndpoint {
    network: InMemoryNetwork,
    local: Party,
}

#[async_trait]
impl PeerMessaging for InMemoryEndpoint {
    fn local_party(&self) -> &Party {
        &self.local
    }

    async fn open_session(&self, counterparty: &Party) -> Result<FlowSession> {
        self.network.connect(&self.local, counterparty)
    }
}
