use conduit_core::{NodeIdentifier, User, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The component a workflow node runs and where it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescription {
    pub component_id: String,
    pub name: String,
    /// Node the component is instantiated on
    pub node: NodeIdentifier,
    #[serde(default)]
    pub configuration: serde_json::Value,
}

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub identifier: String,
    pub name: String,
    pub component: ComponentDescription,
}

/// Edge from a named output of one node to a named input of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: String,
    pub output: String,
    pub target: String,
    pub input: String,
}

/// User-authored workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub identifier: String,
    pub name: Option<String>,
    pub additional_information: Option<String>,
    /// Set when the description is cloned for an instantiation
    pub owner: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    pub connections: Vec<Connection>,
}

impl WorkflowDescription {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            additional_information: None,
            owner: None,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> Result<(), WorkflowError> {
        if self.node(&node.identifier).is_some() {
            return Err(WorkflowError::InvalidDescription(format!(
                "duplicate node {}",
                node.identifier
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_connection(&mut self, connection: Connection) -> Result<(), WorkflowError> {
        self.check_connection(&connection)?;
        self.connections.push(connection);
        Ok(())
    }

    fn check_connection(&self, connection: &Connection) -> Result<(), WorkflowError> {
        for endpoint in [&connection.source, &connection.target] {
            if self.node(endpoint).is_none() {
                return Err(WorkflowError::InvalidDescription(format!(
                    "connection references unknown node {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.identifier.as_str()) {
                return Err(WorkflowError::InvalidDescription(format!(
                    "duplicate node {}",
                    node.identifier
                )));
            }
        }
        self.connections
            .iter()
            .try_for_each(|connection| self.check_connection(connection))
    }

    pub fn node(&self, identifier: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| node.identifier == identifier)
    }

    pub fn connections_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.connections
            .iter()
            .filter(move |connection| connection.source == node)
    }

    pub fn has_incoming(&self, node: &str) -> bool {
        self.connections
            .iter()
            .any(|connection| connection.target == node)
    }

    /// Deep copy owned by `user`, so instances never share mutable state.
    pub fn clone_for(&self, user: &User) -> Self {
        let mut copy = self.clone();
        copy.owner = Some(user.id.clone());
        copy
    }
}
