use super::{LocalWorkflowRegistry, WorkflowRegistry};
use crate::instance::WorkflowControl;
use crate::model::{WorkflowDescription, WorkflowInformation};
use crate::remote::{RemoteWorkflowInstance, RemoteWorkflowRegistry};
use conduit_core::{NodeIdentifier, NodeInformationRegistry, User, WorkflowError, WorkflowInstanceId};
use conduit_network::ServiceCaller;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Workflow registry view spanning every known workflow host.
pub struct DistributedWorkflowRegistry {
    local: Arc<LocalWorkflowRegistry>,
    caller: ServiceCaller,
    node_registry: Arc<NodeInformationRegistry>,
    max_parallel_queries: usize,
    /// Last aggregated result per user
    cache: Mutex<HashMap<String, Arc<Vec<WorkflowInformation>>>>,
}

impl DistributedWorkflowRegistry {
    pub fn new(
        local: Arc<LocalWorkflowRegistry>,
        caller: ServiceCaller,
        node_registry: Arc<NodeInformationRegistry>,
        max_parallel_queries: usize,
    ) -> Self {
        Self {
            local,
            caller,
            node_registry,
            max_parallel_queries: max_parallel_queries.max(1),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn local(&self) -> &Arc<LocalWorkflowRegistry> {
        &self.local
    }

    /// The registry of `node`, local or remote.
    pub fn registry_for(&self, node: &NodeIdentifier) -> Arc<dyn WorkflowRegistry> {
        if self.caller.is_local(node) {
            self.local.clone()
        } else {
            Arc::new(RemoteWorkflowRegistry::new(self.caller.clone(), node.clone()))
        }
    }

    pub async fn create_workflow_instance(
        &self,
        user: &User,
        description: &WorkflowDescription,
        name: Option<String>,
        configuration: BTreeMap<String, String>,
        node: &NodeIdentifier,
    ) -> Result<WorkflowInformation, WorkflowError> {
        self.registry_for(node)
            .create_workflow_instance(user, description, name, configuration)
            .await
            .inspect_err(|e| {
                error!("Failed to create workflow instance on {}: {}", node, e);
            })
    }

    pub async fn dispose_workflow_instance(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
        node: &NodeIdentifier,
    ) -> Result<(), WorkflowError> {
        self.registry_for(node)
            .dispose_workflow_instance(user, id)
            .await
            .inspect_err(|e| {
                error!("Failed to dispose workflow instance {} on {}: {}", id, node, e);
            })
    }

    pub async fn workflow_information(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
        node: &NodeIdentifier,
    ) -> Result<Option<WorkflowInformation>, WorkflowError> {
        self.registry_for(node).workflow_information(user, id).await
    }

    /// Fresh information of `user`'s instances on every workflow host.
    pub async fn workflow_informations(&self, user: &User) -> Vec<WorkflowInformation> {
        self.all_workflow_informations(user, true).await.to_vec()
    }

    /// Aggregated information of `user`'s instances across the network.
    ///
    /// Without `force_refresh` the last aggregated snapshot is returned as is.
    /// A node that fails to answer is skipped.
    pub async fn all_workflow_informations(
        &self,
        user: &User,
        force_refresh: bool,
    ) -> Arc<Vec<WorkflowInformation>> {
        if !force_refresh {
            if let Some(cached) = self.cache.lock().get(&user.id) {
                return cached.clone();
            }
        }

        let nodes: BTreeSet<NodeIdentifier> = self
            .node_registry
            .workflow_hosts()
            .into_iter()
            .chain(std::iter::once(self.caller.own_node_id().clone()))
            .collect();
        debug!("Querying workflow instances on {} node(s)", nodes.len());

        let results: Vec<(NodeIdentifier, Result<Vec<WorkflowInformation>, WorkflowError>)> =
            stream::iter(nodes)
                .map(|node| async move {
                    let result = self.registry_for(&node).workflow_informations(user).await;
                    (node, result)
                })
                .buffer_unordered(self.max_parallel_queries)
                .collect()
                .await;

        let mut merged = BTreeMap::new();
        for (node, result) in results {
            match result {
                Ok(informations) => {
                    for information in informations {
                        merged.insert(information.identifier, information);
                    }
                }
                Err(e) => warn!("Skipping workflow instances of node {}: {}", node, e),
            }
        }

        let snapshot = Arc::new(merged.into_values().collect::<Vec<_>>());
        self.cache.lock().insert(user.id.clone(), snapshot.clone());
        snapshot
    }

    /// Control handle for the instance described by `information`.
    pub fn workflow(&self, information: &WorkflowInformation) -> Arc<dyn WorkflowControl> {
        if self.caller.is_local(&information.controller_node) {
            if let Some(instance) = self.local.workflow(&information.identifier) {
                return Arc::new(instance);
            }
        }
        Arc::new(RemoteWorkflowInstance::new(
            self.caller.clone(),
            information.controller_node.clone(),
            information.identifier,
        ))
    }
}
