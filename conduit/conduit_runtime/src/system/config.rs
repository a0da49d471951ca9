//! Node configuration.
//!
//! A node is configured from a TOML file. Every field except `node_id` has a
//! default, and the `communication` table carries the network tunables.

use conduit_core::{
    CommunicationConfig, ConfigError, NetworkNodeInformation, NodeConfigurationProvider,
    NodeIdentifier,
};
use conduit_network::NetworkContactPoint;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// Configuration of one Conduit node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique id of this node in the network
    #[serde(default)]
    pub node_id: String,

    /// Human-readable name shown in logs
    #[serde(default)]
    pub display_name: Option<String>,

    /// Whether this node accepts workflow instances
    #[serde(default = "default_is_workflow_host")]
    pub is_workflow_host: bool,

    /// Contact points to serve on, as `transport:host:port`
    #[serde(default)]
    pub server_contact_points: Vec<String>,

    /// Contact points of peers to connect to on startup
    #[serde(default)]
    pub remote_contact_points: Vec<String>,

    /// Default log filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub communication: CommunicationConfig,
}

fn default_is_workflow_host() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            display_name: None,
            is_workflow_host: default_is_workflow_host(),
            server_contact_points: Vec::new(),
            remote_contact_points: Vec::new(),
            log_level: default_log_level(),
            communication: CommunicationConfig::default(),
        }
    }
}

impl NodeConfig {
    /// A valid configuration with defaults for the given node id.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Load and validate a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading node configuration from {}", path.display());
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("node_id cannot be empty".to_string()));
        }
        if self.communication.health_check_failure_limit == 0 {
            return Err(ConfigError::Invalid(
                "health_check_failure_limit cannot be zero".to_string(),
            ));
        }
        if self.communication.max_parallel_queries == 0 {
            warn!("max_parallel_queries is zero, falling back to sequential queries");
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeIdentifier {
        NodeIdentifier::new(self.node_id.clone())
    }

    pub fn server_contact_points(&self) -> Vec<NetworkContactPoint> {
        parse_contact_points("server", &self.server_contact_points)
    }

    pub fn remote_contact_points(&self) -> Vec<NetworkContactPoint> {
        parse_contact_points("remote", &self.remote_contact_points)
    }
}

fn parse_contact_points(kind: &str, entries: &[String]) -> Vec<NetworkContactPoint> {
    entries
        .iter()
        .filter_map(|entry| match entry.parse::<NetworkContactPoint>() {
            Ok(contact_point) => Some(contact_point),
            Err(e) => {
                warn!("Ignoring invalid {} contact point {:?}: {}", kind, entry, e);
                None
            }
        })
        .collect()
}

impl NodeConfigurationProvider for NodeConfig {
    fn own_node_information(&self) -> NetworkNodeInformation {
        let information =
            NetworkNodeInformation::new(self.node_id()).with_workflow_host(self.is_workflow_host);
        match &self.display_name {
            Some(name) => information.with_display_name(name.clone()),
            None => information,
        }
    }

    fn request_timeout(&self) -> Duration {
        self.communication.request_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
node_id = "alpha"
display_name = "Alpha"
server_contact_points = ["virtual:alpha:7000", "nonsense"]
remote_contact_points = ["virtual:beta:7000"]

[communication]
health_check_failure_limit = 5
request_timeout_ms = 1000
"#
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).await.unwrap();
        assert_eq!(config.node_id(), NodeIdentifier::new("alpha"));
        assert!(config.is_workflow_host);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.communication.health_check_failure_limit, 5);
        assert_eq!(config.communication.health_check_interval_ms, 15_000);
        assert_eq!(config.request_timeout(), Duration::from_secs(1));

        assert_eq!(config.server_contact_points().len(), 1);
        assert_eq!(
            config.remote_contact_points(),
            vec![NetworkContactPoint::new("virtual", "beta", 7000)]
        );

        let information = config.own_node_information();
        assert_eq!(information.log_description(), "Alpha [alpha]");
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_load() {
        let err = NodeConfig::load("/definitely/not/here.toml").await.unwrap_err();
        assert!(matches!(err, ConfigError::LoadFailed(_)));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            NodeConfig::default().validate(),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = NodeConfig::for_node("alpha");
        assert!(config.validate().is_ok());
        config.communication.health_check_failure_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            NodeConfig::parse("node_id = 7"),
            Err(ConfigError::ParseFailed(_))
        ));
    }
}
