use crate::model::description::WorkflowDescription;
use chrono::{DateTime, Utc};
use conduit_core::{ComponentInstanceId, NodeIdentifier, User, WorkflowInstanceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identity and hosting node of one instantiated component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentInstanceDescriptor {
    pub identifier: ComponentInstanceId,
    pub name: String,
    pub component_id: String,
    pub node: NodeIdentifier,
    pub workflow_instance: WorkflowInstanceId,
    /// Key of the workflow node this instance was created for
    pub workflow_node: String,
}

/// One live workflow instance as seen by registries and observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInformation {
    pub identifier: WorkflowInstanceId,
    pub name: String,
    pub user: String,
    /// Node running the instance's orchestrator
    pub controller_node: NodeIdentifier,
    pub description: WorkflowDescription,
    pub instantiation_time: DateTime<Utc>,
    pub additional_information: Option<String>,
    pub configuration: BTreeMap<String, String>,
    pub component_instances: Vec<ComponentInstanceDescriptor>,
}

impl WorkflowInformation {
    pub fn new(
        identifier: WorkflowInstanceId,
        name: Option<String>,
        user: &User,
        controller_node: NodeIdentifier,
        description: WorkflowDescription,
        configuration: BTreeMap<String, String>,
    ) -> Self {
        Self {
            identifier,
            name: name.unwrap_or_default(),
            user: user.id.clone(),
            controller_node,
            additional_information: description.additional_information.clone(),
            description,
            instantiation_time: Utc::now(),
            configuration,
            component_instances: Vec::new(),
        }
    }

    /// Every node taking part: the controller plus all component hosts.
    pub fn involved_nodes(&self) -> BTreeSet<NodeIdentifier> {
        std::iter::once(self.controller_node.clone())
            .chain(
                self.component_instances
                    .iter()
                    .map(|descriptor| descriptor.node.clone()),
            )
            .collect()
    }

    pub fn component_instance(
        &self,
        name: &str,
        component_id: &str,
    ) -> Option<&ComponentInstanceDescriptor> {
        self.component_instances
            .iter()
            .find(|descriptor| descriptor.name == name && descriptor.component_id == component_id)
    }
}
