//! Component controllers and the registry that instantiates them.

use crate::model::{ComponentDescription, ComponentInstanceDescriptor};
use crate::remote::{RemoteComponentController, COMPONENT_REGISTRY_SERVICE};
use async_trait::async_trait;
use conduit_core::{
    ComponentInstanceId, ComponentState, NodeIdentifier, ServiceError, User, WorkflowError,
    WorkflowInstanceId,
};
use conduit_network::service::to_value;
use conduit_network::ServiceCaller;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where one output of a component delivers its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    pub output: String,
    pub target: ComponentInstanceDescriptor,
    pub input: String,
}

/// Drives the lifecycle of one component instance.
///
/// Lifecycle calls return once the command is accepted;
/// [`wait_for_lifecycle_phase_finished`](Self::wait_for_lifecycle_phase_finished)
/// blocks until the component has completed the current phase.
#[async_trait]
pub trait ComponentController: Send + Sync {
    async fn prepare(&self, user: &User, outputs: Vec<OutputBinding>) -> Result<(), ServiceError>;

    async fn start(&self, user: &User) -> Result<(), ServiceError>;

    async fn pause(&self, user: &User) -> Result<(), ServiceError>;

    async fn resume(&self, user: &User) -> Result<(), ServiceError>;

    async fn cancel(&self, user: &User) -> Result<(), ServiceError>;

    async fn dispose(&self, user: &User) -> Result<(), ServiceError>;

    async fn finished(&self, user: &User) -> Result<(), ServiceError>;

    async fn wait_for_lifecycle_phase_finished(&self) -> Result<(), ServiceError>;

    async fn state(&self) -> Result<ComponentState, ServiceError>;
}

/// Everything a node needs to instantiate one component of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstantiation {
    pub workflow_instance: WorkflowInstanceId,
    pub workflow_node: String,
    pub name: String,
    pub component: ComponentDescription,
    pub input_connected: bool,
    pub controller_node: NodeIdentifier,
}

/// Node-local factory for component instances.
#[async_trait]
pub trait ComponentRegistry: Send + Sync {
    async fn create_component_instance(
        &self,
        user: &User,
        instantiation: ComponentInstantiation,
    ) -> Result<ComponentInstanceDescriptor, ServiceError>;

    async fn dispose_component_instance(
        &self,
        user: &User,
        instance: &ComponentInstanceId,
    ) -> Result<(), ServiceError>;

    fn controller(&self, instance: &ComponentInstanceId) -> Option<Arc<dyn ComponentController>>;
}

/// Instantiates components on whichever node hosts them and resolves the
/// matching controller, local or remote.
pub struct DistributedComponentRegistry {
    local: Arc<dyn ComponentRegistry>,
    caller: ServiceCaller,
}

impl DistributedComponentRegistry {
    pub fn new(local: Arc<dyn ComponentRegistry>, caller: ServiceCaller) -> Self {
        Self { local, caller }
    }

    pub async fn create_component_instance(
        &self,
        user: &User,
        instantiation: ComponentInstantiation,
        node: &NodeIdentifier,
    ) -> Result<ComponentInstanceDescriptor, ServiceError> {
        if self.caller.is_local(node) {
            return self
                .local
                .create_component_instance(user, instantiation)
                .await;
        }
        self.caller
            .call(
                node,
                COMPONENT_REGISTRY_SERVICE,
                "create",
                vec![to_value(user)?, to_value(&instantiation)?],
            )
            .await
            .into_result()
    }

    pub async fn dispose_component_instance(
        &self,
        user: &User,
        descriptor: &ComponentInstanceDescriptor,
    ) -> Result<(), ServiceError> {
        if self.caller.is_local(&descriptor.node) {
            return self
                .local
                .dispose_component_instance(user, &descriptor.identifier)
                .await;
        }
        self.caller
            .call(
                &descriptor.node,
                COMPONENT_REGISTRY_SERVICE,
                "dispose",
                vec![to_value(user)?, to_value(&descriptor.identifier)?],
            )
            .await
            .into_result()
    }

    pub fn controller(
        &self,
        descriptor: &ComponentInstanceDescriptor,
    ) -> Result<Arc<dyn ComponentController>, WorkflowError> {
        if self.caller.is_local(&descriptor.node) {
            self.local
                .controller(&descriptor.identifier)
                .ok_or(WorkflowError::ComponentNotFound(descriptor.identifier))
        } else {
            Ok(Arc::new(RemoteComponentController::new(
                self.caller.clone(),
                descriptor.node.clone(),
                descriptor.identifier,
            )))
        }
    }
}
