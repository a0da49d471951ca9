use anyhow::{Context, Result};
use conduit_core::NodeConfigurationProvider;
use conduit_runtime::NodeConfig;

/// Load `path`, validate it and print what the node would do.
pub async fn check_config(path: &str) -> Result<()> {
    let config = NodeConfig::load(path)
        .await
        .with_context(|| format!("Configuration {} is not usable", path))?;

    println!("Node:            {}", config.own_node_information().log_description());
    println!("Workflow host:   {}", config.is_workflow_host);
    println!("Log level:       {}", config.log_level);
    println!("Request timeout: {} ms", config.communication.request_timeout_ms);
    println!(
        "Health checks:   every {} ms, timeout {} ms, failure limit {}",
        config.communication.health_check_interval_ms,
        config.communication.health_check_timeout_ms,
        config.communication.health_check_failure_limit
    );

    let servers = config.server_contact_points();
    println!("Servers ({}):", servers.len());
    for contact_point in &servers {
        println!("  {}", contact_point);
    }
    let remotes = config.remote_contact_points();
    println!("Peers ({}):", remotes.len());
    for contact_point in &remotes {
        println!("  {}", contact_point);
    }

    let ignored = config.server_contact_points.len() + config.remote_contact_points.len()
        - servers.len()
        - remotes.len();
    if ignored > 0 {
        println!("{} invalid contact point(s) ignored", ignored);
    }
    println!("Configuration OK");
    Ok(())
}
