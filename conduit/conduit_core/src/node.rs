//! Node identity and published node information.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Globally unique identity of a participant node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentifier(String);

impl NodeIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeIdentifier {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Information a node publishes about itself during the connection handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNodeInformation {
    pub node_id: NodeIdentifier,
    pub display_name: Option<String>,
    pub is_workflow_host: bool,
    pub software_version: Option<String>,
    pub protocol_version: Option<String>,
}

impl NetworkNodeInformation {
    pub fn new(node_id: NodeIdentifier) -> Self {
        Self {
            node_id,
            display_name: None,
            is_workflow_host: false,
            software_version: None,
            protocol_version: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_workflow_host(mut self, is_workflow_host: bool) -> Self {
        self.is_workflow_host = is_workflow_host;
        self
    }

    /// Renders `"name [id]"` for log output.
    pub fn log_description(&self) -> String {
        format!(
            "{} [{}]",
            self.display_name.as_deref().unwrap_or("<unnamed>"),
            self.node_id
        )
    }
}

/// Cache of what is known about every node seen so far.
///
/// The registry is an ordinary value owned by the top-level wiring and passed
/// by reference to whoever needs it; independent instances never share state.
#[derive(Debug, Default)]
pub struct NodeInformationRegistry {
    nodes: RwLock<HashMap<NodeIdentifier, NetworkNodeInformation>>,
}

impl NodeInformationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored information for `id`, creating an empty entry on demand.
    pub fn writable(&self, id: &NodeIdentifier) -> NetworkNodeInformation {
        self.nodes
            .write()
            .entry(id.clone())
            .or_insert_with(|| NetworkNodeInformation::new(id.clone()))
            .clone()
    }

    pub fn get(&self, id: &NodeIdentifier) -> Option<NetworkNodeInformation> {
        self.nodes.read().get(id).cloned()
    }

    /// Merge freshly received information into the stored entry.
    ///
    /// Only the display name and the workflow-host flag are copied; version
    /// strings are kept from the first handshake that supplied them.
    pub fn update_from(&self, info: &NetworkNodeInformation) {
        let mut nodes = self.nodes.write();
        let entry = nodes
            .entry(info.node_id.clone())
            .or_insert_with(|| NetworkNodeInformation::new(info.node_id.clone()));
        entry.display_name = info.display_name.clone();
        entry.is_workflow_host = info.is_workflow_host;
        if entry.software_version.is_none() {
            entry.software_version = info.software_version.clone();
        }
        if entry.protocol_version.is_none() {
            entry.protocol_version = info.protocol_version.clone();
        }
    }

    pub fn known_nodes(&self) -> Vec<NodeIdentifier> {
        let mut ids: Vec<_> = self.nodes.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn workflow_hosts(&self) -> Vec<NodeIdentifier> {
        let mut ids: Vec<_> = self
            .nodes
            .read()
            .values()
            .filter(|info| info.is_workflow_host)
            .map(|info| info.node_id.clone())
            .collect();
        ids.sort();
        ids
    }
}
