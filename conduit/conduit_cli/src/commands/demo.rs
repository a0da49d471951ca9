use anyhow::{bail, Context, Result};
use conduit_core::{NodeIdentifier, User, WorkflowState};
use conduit_network::VirtualTransportProvider;
use conduit_runtime::components::DELAY_COMPONENT;
use conduit_runtime::{Node, NodeConfig};
use conduit_workflow::notification::workflow_state_topic;
use conduit_workflow::{
    ComponentDescription, Connection, NotificationService, WorkflowControl, WorkflowDescription,
    WorkflowNode,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

fn node_config(node: &str, peers: &[&str]) -> NodeConfig {
    let mut config = NodeConfig::for_node(node);
    config.display_name = Some(format!("demo {}", node));
    config.server_contact_points = vec![format!("virtual:{}:7000", node)];
    config.remote_contact_points = peers
        .iter()
        .map(|peer| format!("virtual:{}:7000", peer))
        .collect();
    config
}

fn step(identifier: &str, node: &NodeIdentifier, configuration: Value) -> WorkflowNode {
    WorkflowNode {
        identifier: identifier.to_string(),
        name: identifier.to_string(),
        component: ComponentDescription {
            component_id: DELAY_COMPONENT.to_string(),
            name: "Delay".to_string(),
            node: node.clone(),
            configuration,
        },
    }
}

/// Two nodes, one workflow: `produce` runs on alpha, `consume` on beta.
pub async fn run_demo(duration_ms: u64, fail: bool) -> Result<()> {
    let transport = Arc::new(VirtualTransportProvider::new(true));
    let beta = Node::new(node_config("beta", &[]))?;
    beta.add_transport_provider(transport.clone())?;
    beta.start().await?;
    let alpha = Node::new(node_config("alpha", &["beta"]))?;
    alpha.add_transport_provider(transport.clone())?;
    alpha.start().await?;
    info!("Demo nodes {} and {} are up", alpha.id(), beta.id());

    let mut description = WorkflowDescription::new("demo").with_name("Demo workflow");
    description.add_node(step("produce", alpha.id(), json!({ "duration_ms": duration_ms })))?;
    description.add_node(step(
        "consume",
        beta.id(),
        json!({ "duration_ms": duration_ms, "fail": fail }),
    ))?;
    description.add_connection(Connection {
        source: "produce".to_string(),
        output: "out".to_string(),
        target: "consume".to_string(),
        input: "in".to_string(),
    })?;

    let user = User::new("demo");
    let information = alpha
        .workflows()
        .create_workflow_instance(&user, &description, None, BTreeMap::new(), alpha.id())
        .await
        .context("Failed to create the demo workflow")?;
    println!("Created workflow {}", information.identifier);
    for node in information.involved_nodes() {
        println!("  involves node {}", node);
    }

    let mut states = alpha
        .notifications()
        .subscribe(&workflow_state_topic(&information.identifier), None)?
        .receiver;
    let workflow = alpha.workflows().workflow(&information);
    workflow.start(&user).await?;

    let limit = Duration::from_millis(duration_ms * 4 + 5_000);
    let outcome = timeout(limit, async {
        while let Some(notification) = states.recv().await {
            println!("  state -> {}", notification.body);
            match notification.body.as_str() {
                Some("FINISHED") => return Some(WorkflowState::Finished),
                Some("FAILED") => return Some(WorkflowState::Failed),
                _ => {}
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    alpha
        .workflows()
        .dispose_workflow_instance(&user, &information.identifier, alpha.id())
        .await?;
    alpha.shutdown();
    beta.shutdown();

    match outcome {
        Some(state) => {
            println!("Workflow ended in state {}", state);
            Ok(())
        }
        None => bail!("Workflow did not reach a final state within {:?}", limit),
    }
}
