//! A participant node
//!
//! A node bundles one party's keys, vault, rule engine, lock manager and
//! pointer resolver with its view of the notary and the peer network. It
//! initiates flows through the methods in [`crate::flows`] and answers
//! sessions opened by peers on a background task.

use crate::{
    choreographer,
    config::FlowConfig,
    network::Endpoint,
    session::{FlowSession, PeerMessaging},
    Error, Result,
};
use attest_core::{
    KeyPair, Metrics, Notary, Party, PointerResolver, QueryService, RevocationLockManager,
    RuleEngine, Vault,
};
use std::sync::Arc;
use tokio::sync::mpsc;

struct NodeInner {
    party: Party,
    keys: KeyPair,
    vault: Arc<Vault>,
    locks: RevocationLockManager,
    rules: RuleEngine,
    resolver: PointerResolver,
    notary: Arc<dyn Notary>,
    messaging: Arc<dyn PeerMessaging>,
    config: FlowConfig,
    metrics: Metrics,
}

/// Handle to a running node
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Open the node's vault and start answering peer sessions
    pub fn start(
        keys: KeyPair,
        name: &str,
        config: &attest_core::Config,
        flow_config: FlowConfig,
        notary: Arc<dyn Notary>,
        endpoint: Endpoint,
    ) -> Result<Self> {
        Self::launch(keys, name, config, flow_config, notary, endpoint, None)
    }

    /// Like [`Node::start`], but pointers not held locally are resolved
    /// through `remote`
    pub fn start_with_remote(
        keys: KeyPair,
        name: &str,
        config: &attest_core::Config,
        flow_config: FlowConfig,
        notary: Arc<dyn Notary>,
        endpoint: Endpoint,
        remote: Arc<dyn QueryService>,
    ) -> Result<Self> {
        Self::launch(keys, name, config, flow_config, notary, endpoint, Some(remote))
    }

    fn launch(
        keys: KeyPair,
        name: &str,
        config: &attest_core::Config,
        flow_config: FlowConfig,
        notary: Arc<dyn Notary>,
        endpoint: Endpoint,
        remote: Option<Arc<dyn QueryService>>,
    ) -> Result<Self> {
        let party = Party::new(name, keys.public_key());
        if endpoint.messaging.local_party() != &party {
            return Err(Error::Config(format!(
                "Endpoint belongs to {}, not {}",
                endpoint.messaging.local_party(),
                party
            )));
        }

        let metrics = Metrics::new().map_err(|e| Error::Config(e.to_string()))?;
        let vault = Arc::new(Vault::open(config, party.clone())?.with_metrics(metrics.clone()));
        let rules = RuleEngine::new(config.rules.clone()).with_metrics(metrics.clone());
        let mut resolver = PointerResolver::new(vault.clone(), config.timeouts.query());
        if let Some(remote) = remote {
            resolver = resolver.with_remote(remote);
        }

        let node = Self {
            inner: Arc::new(NodeInner {
                party,
                keys,
                locks: RevocationLockManager::new(vault.clone()),
                vault,
                rules,
                resolver,
                notary,
                messaging: endpoint.messaging,
                config: flow_config,
                metrics,
            }),
        };

        node.spawn_responder(endpoint.inbox);
        tracing::info!(
            party = %node.party(),
            data_dir = ?config.data_dir,
            remote_queries = node.inner.resolver.has_remote(),
            "Node started"
        );
        Ok(node)
    }

    fn spawn_responder(&self, mut inbox: mpsc::Receiver<FlowSession>) {
        let node = self.clone();
        tokio::spawn(async move {
            while let Some(session) = inbox.recv().await {
                let node = node.clone();
                tokio::spawn(async move {
                    choreographer::respond(node, session).await;
                });
            }
            tracing::debug!(party = %node.party(), "Inbox closed");
        });
    }

    /// Identity of this node
    pub fn party(&self) -> &Party {
        &self.inner.party
    }

    pub(crate) fn keys(&self) -> &KeyPair {
        &self.inner.keys
    }

    /// Local vault
    pub fn vault(&self) -> &Arc<Vault> {
        &self.inner.vault
    }

    /// Revocation locks owned by this node
    pub fn locks(&self) -> &RevocationLockManager {
        &self.inner.locks
    }

    /// Rule engine
    pub fn rules(&self) -> &RuleEngine {
        &self.inner.rules
    }

    /// Pointer resolver over the local vault and any remote query service
    pub fn resolver(&self) -> &PointerResolver {
        &self.inner.resolver
    }

    /// Ordering service
    pub fn notary(&self) -> &Arc<dyn Notary> {
        &self.inner.notary
    }

    /// Flow configuration
    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    /// Node metrics
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Open a session to `counterparty`
    pub async fn open_session(&self, counterparty: &Party) -> Result<FlowSession> {
        self.inner.messaging.open_session(counterparty).await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("party", &self.inner.party)
            .field("notary", self.inner.notary.party())
            .finish_non_exhaustive()
    }
}
