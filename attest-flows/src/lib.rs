//! Attestation Flows
//!
//! Multi-party choreography on top of [`attest_core`]: peer sessions, the
//! initiator and responder state machines that collect signatures, the
//! per-entity flow entry points and membership synchronisation.
//!
//! # Architecture
//!
//! Every participant runs a [`Node`]. A node initiates flows through its
//! methods (`issue_membership`, `accept_membership`, `issue_relationship`,
//! `revoke_relationship`, ...) and answers sessions opened by its peers on
//! a background task:
//!
//! 1. **Generating**: build inputs, references, outputs and the command
//! 2. **Validating**: run the rule engine locally, then on every signer
//! 3. **Countersigning**: collect signatures once everyone has validated
//! 4. **Finalizing**: notarise, record and distribute to every participant
//!
//! # Example
//!
//! ```no_run
//! use attest_core::{spawn_notary, Config, KeyPair, Membership, NetworkIdentity, Party};
//! use attest_flows::{FlowConfig, InMemoryNetwork, Node};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> attest_flows::Result<()> {
//!     let flow_config = FlowConfig::default();
//!     let network = InMemoryNetwork::new(flow_config.channel_capacity, flow_config.session_timeout());
//!     let notary = Arc::new(spawn_notary("Notary", KeyPair::generate(), Config::default().timeouts.notary(), None));
//!
//!     let keys = KeyPair::generate();
//!     let alice = Party::new("Alice", keys.public_key());
//!     let endpoint = network.join(alice.clone());
//!     let node = Node::start(keys, "Alice", &Config::with_data_dir("./alice"), flow_config, notary, endpoint)?;
//!
//!     let issued = node
//!         .issue_membership(Membership::new(NetworkIdentity::new("Trade"), alice))
//!         .await?;
//!     println!("Membership {}", issued.out_ref(0));
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod choreographer;
pub mod config;
pub mod error;
pub mod messages;
pub mod network;
pub mod node;
pub mod session;
pub mod sync;

mod flows;
mod resolution;

// Re-exports
pub use choreographer::{FlowResult, FlowStep, ProgressTracker};
pub use config::{FlowConfig, LogFormat};
pub use error::{Error, Result};
pub use messages::{FlowMessage, Refusal, SyncPackage};
pub use network::{Endpoint, InMemoryNetwork};
pub use node::Node;
pub use session::{FlowSession, PeerMessaging};
pub use sync::SyncReport;
