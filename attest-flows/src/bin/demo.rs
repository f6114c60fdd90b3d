//! Attestation lifecycle demo
//!
//! Runs an operator and two members on an in-memory network through the
//! membership, attestation, relationship and revocation-lock lifecycle.

use anyhow::Context;
use attest_core::{
    spawn_notary, Config, KeyPair, Membership, NetworkIdentity, Party, Relationship, Setting,
    DEFAULT_OPERATOR_ROLE,
};
use attest_flows::{FlowConfig, InMemoryNetwork, LogFormat, Node};
use std::path::Path;
use std::sync::Arc;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn start_node(
    name: &str,
    base: &Config,
    flow_config: &FlowConfig,
    network: &InMemoryNetwork,
    notary: Arc<dyn attest_core::Notary>,
) -> anyhow::Result<Node> {
    let keys = KeyPair::generate();
    let party = Party::new(name, keys.public_key());
    let config = Config {
        data_dir: base.data_dir.join(name.to_lowercase()),
        ..base.clone()
    };
    let endpoint = network.join(party);
    Node::start(keys, name, &config, flow_config.clone(), notary, endpoint)
        .with_context(|| format!("starting node {}", name))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flow_config = FlowConfig::from_env()?;
    init_tracing(flow_config.log_format);

    let mut base = Config::from_env()?;
    let scratch = std::env::var_os("ATTEST_DATA_DIR").is_none();
    if scratch {
        base.data_dir = std::env::temp_dir().join(format!("attest-demo-{}", uuid::Uuid::new_v4()));
    }
    tracing::info!(data_dir = %base.data_dir.display(), "Starting attestation demo");

    let network = InMemoryNetwork::new(flow_config.channel_capacity, flow_config.session_timeout());
    let notary: Arc<dyn attest_core::Notary> = Arc::new(spawn_notary(
        "Notary",
        KeyPair::generate(),
        base.timeouts.notary(),
        None,
    ));

    let operator = start_node("Operator", &base, &flow_config, &network, notary.clone())?;
    let alice = start_node("Alice", &base, &flow_config, &network, notary.clone())?;
    let bob = start_node("Bob", &base, &flow_config, &network, notary.clone())?;

    let result = run(&operator, &alice, &bob).await;

    if scratch {
        remove_scratch(&base.data_dir);
    }
    result
}

async fn run(operator: &Node, alice: &Node, bob: &Node) -> anyhow::Result<()> {
    let trade = NetworkIdentity::with_operator("Trade Finance", operator.party().clone());

    // Memberships
    operator
        .issue_membership(
            Membership::new(trade.clone(), operator.party().clone())
                .with_role(DEFAULT_OPERATOR_ROLE),
        )
        .await?;
    let alice_membership = alice
        .issue_membership(
            Membership::new(trade.clone(), alice.party().clone()).with_claim("lei", "ALICE-0001"),
        )
        .await?;
    let bob_membership = bob
        .issue_membership(
            Membership::new(trade.clone(), bob.party().clone()).with_claim("lei", "BOB-0002"),
        )
        .await?;
    let alice_id = alice_membership
        .linear_id()
        .context("membership has no linear id")?;
    let bob_id = bob_membership
        .linear_id()
        .context("membership has no linear id")?;

    // Only the operator vouches for members
    match alice.accept_membership(alice_id).await {
        Ok(_) => anyhow::bail!("self-attestation was accepted"),
        Err(e) => tracing::info!(rule = ?e.rule_id(), "Self-attestation refused as expected"),
    }
    operator.accept_membership(alice_id).await?;
    operator.accept_membership(bob_id).await?;

    let report = alice.sync_membership(bob.party(), &trade).await?;
    tracing::info!(
        attestations = report.attestations,
        recorded = report.recorded,
        "Alice and Bob exchanged membership evidence"
    );

    // Relationship, checked against attested memberships
    let relationship = alice
        .issue_relationship_with(
            Relationship::new(trade.clone())
                .with_member_settings(
                    alice.party().clone(),
                    vec![Setting::new("currency", "EUR")],
                )
                .with_member(bob.party().clone()),
            true,
        )
        .await?;
    let relationship_id = relationship
        .linear_id()
        .context("relationship has no linear id")?;
    alice.accept_relationship(relationship_id).await?;

    // Locks
    match alice.revoke_relationship(relationship_id).await {
        Ok(_) => anyhow::bail!("revocation ignored the counterparty locks"),
        Err(e) => tracing::info!(error = %e, "Revocation blocked as expected"),
    }
    bob.unlock_relationship(relationship_id)?;
    operator.unlock_relationship(relationship_id)?;
    let revoked = alice.revoke_relationship(relationship_id).await?;

    let summary = serde_json::json!({
        "relationship": relationship_id.to_string(),
        "revoked_by": revoked.tx.id.to_string(),
        "steps": revoked.steps.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "completed_at": revoked.completed_at.to_rfc3339(),
    });
    tracing::info!(summary = %summary, "Lifecycle complete");
    Ok(())
}

fn remove_scratch(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "Could not remove demo data");
    }
}
