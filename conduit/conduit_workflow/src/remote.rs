//! Network access to registries, workflow instances and component
//! controllers on other nodes.
//!
//! Every remotely reachable object has two halves: a proxy implementing the
//! local trait by issuing service calls, and a [`RemotableService`] adapter
//! on the hosting node that decodes those calls and invokes the real object.

use crate::component::{
    ComponentController, ComponentInstantiation, ComponentRegistry, OutputBinding,
};
use crate::instance::{WorkflowControl, WorkflowInstance};
use crate::model::{ComponentInstanceDescriptor, WorkflowDescription, WorkflowInformation};
use crate::notification::NotificationService;
use crate::registry::WorkflowRegistry;
use async_trait::async_trait;
use conduit_core::{
    ComponentInstanceId, ComponentState, NodeIdentifier, ServiceError, User, WorkflowError,
    WorkflowInstanceId, WorkflowState,
};
use conduit_network::service::{argument, to_value};
use conduit_network::{CallOutcome, RemotableService, ServiceCaller, ServiceRegistry};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub const WORKFLOW_REGISTRY_SERVICE: &str = "WorkflowRegistry";
pub const COMPONENT_REGISTRY_SERVICE: &str = "ComponentRegistry";

/// Service key of one workflow instance.
pub fn workflow_service_key(id: &WorkflowInstanceId) -> String {
    format!("workflow:{}", id)
}

/// Service key of one component controller.
pub fn component_service_key(id: &ComponentInstanceId) -> String {
    format!("component:{}", id)
}

/// Recover the domain error carried by a failed component call.
pub fn into_workflow_error(fault: ServiceError) -> WorkflowError {
    match fault {
        ServiceError::Workflow(e) => e,
        ServiceError::Unreachable(message) => WorkflowError::Communication(message),
        other => WorkflowError::ComponentFailed(other.to_string()),
    }
}

/// Unwrap a remote registry or instance call so remote failures look like
/// local ones.
pub fn into_workflow_result<T>(outcome: CallOutcome<T>) -> Result<T, WorkflowError> {
    match outcome {
        CallOutcome::Ok(value) => Ok(value),
        CallOutcome::RoutingError(message) => Err(WorkflowError::Communication(message)),
        CallOutcome::DestinationError(ServiceError::Workflow(e)) => Err(e),
        CallOutcome::DestinationError(other) => {
            Err(WorkflowError::Communication(other.to_string()))
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, WorkflowError> {
    to_value(value).map_err(|e| WorkflowError::Communication(e.to_string()))
}

fn unknown_method(service: &str, method: &str) -> ServiceError {
    ServiceError::UnknownMethod {
        service: service.to_string(),
        method: method.to_string(),
    }
}

/// [`WorkflowRegistry`] of another node.
pub struct RemoteWorkflowRegistry {
    caller: ServiceCaller,
    node: NodeIdentifier,
}

impl RemoteWorkflowRegistry {
    pub fn new(caller: ServiceCaller, node: NodeIdentifier) -> Self {
        Self { caller, node }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<T, WorkflowError> {
        into_workflow_result(
            self.caller
                .call(&self.node, WORKFLOW_REGISTRY_SERVICE, method, arguments)
                .await,
        )
    }
}

#[async_trait]
impl WorkflowRegistry for RemoteWorkflowRegistry {
    async fn create_workflow_instance(
        &self,
        user: &User,
        description: &WorkflowDescription,
        name: Option<String>,
        configuration: BTreeMap<String, String>,
    ) -> Result<WorkflowInformation, WorkflowError> {
        self.call(
            "create",
            vec![
                encode(user)?,
                encode(description)?,
                encode(&name)?,
                encode(&configuration)?,
            ],
        )
        .await
    }

    async fn dispose_workflow_instance(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
    ) -> Result<(), WorkflowError> {
        self.call("dispose", vec![encode(user)?, encode(id)?]).await
    }

    async fn workflow_information(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
    ) -> Result<Option<WorkflowInformation>, WorkflowError> {
        self.call("information", vec![encode(user)?, encode(id)?])
            .await
    }

    async fn workflow_informations(
        &self,
        user: &User,
    ) -> Result<Vec<WorkflowInformation>, WorkflowError> {
        self.call("informations", vec![encode(user)?]).await
    }

    async fn is_creator(
        &self,
        id: &WorkflowInstanceId,
        user: &User,
    ) -> Result<bool, WorkflowError> {
        self.call("isCreator", vec![encode(id)?, encode(user)?])
            .await
    }
}

/// Publishes a node's [`WorkflowRegistry`].
pub struct WorkflowRegistryService {
    registry: Arc<dyn WorkflowRegistry>,
}

impl WorkflowRegistryService {
    pub fn new(registry: Arc<dyn WorkflowRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RemotableService for WorkflowRegistryService {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        caller: &NodeIdentifier,
    ) -> Result<Value, ServiceError> {
        debug!("Registry call {} from {}", method, caller);
        let user: User = match method {
            "isCreator" => argument(&arguments, 1)?,
            _ => argument(&arguments, 0)?,
        };
        match method {
            "create" => {
                let description: WorkflowDescription = argument(&arguments, 1)?;
                let name: Option<String> = argument(&arguments, 2)?;
                let configuration: BTreeMap<String, String> = argument(&arguments, 3)?;
                let information = self
                    .registry
                    .create_workflow_instance(&user, &description, name, configuration)
                    .await?;
                to_value(&information)
            }
            "dispose" => {
                let id: WorkflowInstanceId = argument(&arguments, 1)?;
                self.registry.dispose_workflow_instance(&user, &id).await?;
                Ok(Value::Null)
            }
            "information" => {
                let id: WorkflowInstanceId = argument(&arguments, 1)?;
                to_value(&self.registry.workflow_information(&user, &id).await?)
            }
            "informations" => to_value(&self.registry.workflow_informations(&user).await?),
            "isCreator" => {
                let id: WorkflowInstanceId = argument(&arguments, 0)?;
                to_value(&self.registry.is_creator(&id, &user).await?)
            }
            _ => Err(unknown_method(WORKFLOW_REGISTRY_SERVICE, method)),
        }
    }
}

/// [`WorkflowControl`] for an instance whose orchestrator runs on another node.
pub struct RemoteWorkflowInstance {
    caller: ServiceCaller,
    node: NodeIdentifier,
    id: WorkflowInstanceId,
}

impl RemoteWorkflowInstance {
    pub fn new(caller: ServiceCaller, node: NodeIdentifier, id: WorkflowInstanceId) -> Self {
        Self { caller, node, id }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<T, WorkflowError> {
        into_workflow_result(
            self.caller
                .call(&self.node, &workflow_service_key(&self.id), method, arguments)
                .await,
        )
    }

    pub async fn state_of_component(
        &self,
        user: &User,
        component: &ComponentInstanceId,
    ) -> Result<ComponentState, WorkflowError> {
        self.call("componentState", vec![encode(user)?, encode(component)?])
            .await
    }

    pub async fn component_instance_descriptors(
        &self,
        user: &User,
    ) -> Result<Vec<ComponentInstanceDescriptor>, WorkflowError> {
        self.call("componentInstances", vec![encode(user)?]).await
    }
}

#[async_trait]
impl WorkflowControl for RemoteWorkflowInstance {
    fn identifier(&self) -> WorkflowInstanceId {
        self.id
    }

    async fn start(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.call("start", vec![encode(user)?]).await
    }

    async fn pause(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.call("pause", vec![encode(user)?]).await
    }

    async fn resume(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.call("resume", vec![encode(user)?]).await
    }

    async fn cancel(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.call("cancel", vec![encode(user)?]).await
    }

    async fn finished(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.call("finished", vec![encode(user)?]).await
    }

    async fn dispose(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.call("dispose", vec![encode(user)?]).await
    }

    async fn state(&self, user: &User) -> Result<WorkflowState, WorkflowError> {
        self.call("state", vec![encode(user)?]).await
    }
}

/// Publishes one [`WorkflowInstance`].
pub struct WorkflowInstanceService {
    instance: WorkflowInstance,
}

impl WorkflowInstanceService {
    pub fn new(instance: WorkflowInstance) -> Self {
        Self { instance }
    }
}

#[async_trait]
impl RemotableService for WorkflowInstanceService {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        _caller: &NodeIdentifier,
    ) -> Result<Value, ServiceError> {
        let user: User = argument(&arguments, 0)?;
        let instance = &self.instance;
        let state = match method {
            "start" => instance.start(&user).await?,
            "pause" => instance.pause(&user).await?,
            "resume" => instance.resume(&user).await?,
            "cancel" => instance.cancel(&user).await?,
            "finished" => instance.finished(&user).await?,
            "dispose" => instance.dispose(&user).await?,
            "state" => instance.state(&user).await?,
            "componentState" => {
                let component: ComponentInstanceId = argument(&arguments, 1)?;
                return to_value(&instance.state_of_component(&user, &component).await?);
            }
            "componentInstances" => {
                return to_value(&instance.component_instance_descriptors(&user)?);
            }
            _ => {
                return Err(unknown_method(
                    &workflow_service_key(&instance.id()),
                    method,
                ))
            }
        };
        to_value(&state)
    }
}

/// [`ComponentController`] of a component hosted by another node.
pub struct RemoteComponentController {
    caller: ServiceCaller,
    node: NodeIdentifier,
    key: String,
}

impl RemoteComponentController {
    pub fn new(caller: ServiceCaller, node: NodeIdentifier, id: ComponentInstanceId) -> Self {
        Self {
            caller,
            node,
            key: component_service_key(&id),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<T, ServiceError> {
        self.caller
            .call(&self.node, &self.key, method, arguments)
            .await
            .into_result()
    }
}

#[async_trait]
impl ComponentController for RemoteComponentController {
    async fn prepare(&self, user: &User, outputs: Vec<OutputBinding>) -> Result<(), ServiceError> {
        self.call("prepare", vec![to_value(user)?, to_value(&outputs)?])
            .await
    }

    async fn start(&self, user: &User) -> Result<(), ServiceError> {
        self.call("start", vec![to_value(user)?]).await
    }

    async fn pause(&self, user: &User) -> Result<(), ServiceError> {
        self.call("pause", vec![to_value(user)?]).await
    }

    async fn resume(&self, user: &User) -> Result<(), ServiceError> {
        self.call("resume", vec![to_value(user)?]).await
    }

    async fn cancel(&self, user: &User) -> Result<(), ServiceError> {
        self.call("cancel", vec![to_value(user)?]).await
    }

    async fn dispose(&self, user: &User) -> Result<(), ServiceError> {
        self.call("dispose", vec![to_value(user)?]).await
    }

    async fn finished(&self, user: &User) -> Result<(), ServiceError> {
        self.call("finished", vec![to_value(user)?]).await
    }

    async fn wait_for_lifecycle_phase_finished(&self) -> Result<(), ServiceError> {
        self.call("waitForLifecyclePhaseFinished", Vec::new()).await
    }

    async fn state(&self) -> Result<ComponentState, ServiceError> {
        self.call("state", Vec::new()).await
    }
}

/// Publishes one component controller.
pub struct ComponentControllerService {
    controller: Arc<dyn ComponentController>,
}

impl ComponentControllerService {
    pub fn new(controller: Arc<dyn ComponentController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl RemotableService for ComponentControllerService {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        _caller: &NodeIdentifier,
    ) -> Result<Value, ServiceError> {
        let controller = &self.controller;
        match method {
            "waitForLifecyclePhaseFinished" => {
                controller.wait_for_lifecycle_phase_finished().await?;
                return Ok(Value::Null);
            }
            "state" => return to_value(&controller.state().await?),
            _ => {}
        }

        let user: User = argument(&arguments, 0)?;
        match method {
            "prepare" => {
                let outputs: Vec<OutputBinding> = argument(&arguments, 1)?;
                controller.prepare(&user, outputs).await?;
            }
            "start" => controller.start(&user).await?,
            "pause" => controller.pause(&user).await?,
            "resume" => controller.resume(&user).await?,
            "cancel" => controller.cancel(&user).await?,
            "dispose" => controller.dispose(&user).await?,
            "finished" => controller.finished(&user).await?,
            _ => return Err(unknown_method("ComponentController", method)),
        }
        Ok(Value::Null)
    }
}

/// Publishes the node's [`ComponentRegistry`] and the controllers of the
/// instances it creates.
pub struct ComponentRegistryService {
    registry: Arc<dyn ComponentRegistry>,
    services: Weak<ServiceRegistry>,
}

impl ComponentRegistryService {
    pub fn new(registry: Arc<dyn ComponentRegistry>, services: &Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            services: Arc::downgrade(services),
        }
    }
}

#[async_trait]
impl RemotableService for ComponentRegistryService {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        caller: &NodeIdentifier,
    ) -> Result<Value, ServiceError> {
        let user: User = argument(&arguments, 0)?;
        match method {
            "create" => {
                let instantiation: ComponentInstantiation = argument(&arguments, 1)?;
                debug!(
                    "Creating component {} for workflow {} on behalf of {}",
                    instantiation.name, instantiation.workflow_instance, caller
                );
                let descriptor = self
                    .registry
                    .create_component_instance(&user, instantiation)
                    .await?;
                let controller = self
                    .registry
                    .controller(&descriptor.identifier)
                    .ok_or(WorkflowError::ComponentNotFound(descriptor.identifier))?;
                if let Some(services) = self.services.upgrade() {
                    services.register(
                        component_service_key(&descriptor.identifier),
                        Arc::new(ComponentControllerService::new(controller)),
                    );
                }
                to_value(&descriptor)
            }
            "dispose" => {
                let id: ComponentInstanceId = argument(&arguments, 1)?;
                self.registry.dispose_component_instance(&user, &id).await?;
                if let Some(services) = self.services.upgrade() {
                    services.unregister(&component_service_key(&id));
                }
                Ok(Value::Null)
            }
            _ => Err(unknown_method(COMPONENT_REGISTRY_SERVICE, method)),
        }
    }
}

pub const NOTIFICATION_SERVICE: &str = "NotificationService";

/// Sends notifications to the notification service of any node.
pub struct NotificationRelay {
    caller: ServiceCaller,
    notifications: Arc<dyn NotificationService>,
}

impl NotificationRelay {
    pub fn new(caller: ServiceCaller, notifications: Arc<dyn NotificationService>) -> Self {
        Self {
            caller,
            notifications,
        }
    }

    /// Publish `body` on `topic` at `node`. Delivery failures are logged.
    pub async fn send_to(&self, node: &NodeIdentifier, topic: &str, body: Value) {
        if self.caller.is_local(node) {
            self.notifications.send(topic, body);
            return;
        }
        let outcome: CallOutcome<()> = self
            .caller
            .call(node, NOTIFICATION_SERVICE, "send", vec![Value::from(topic), body])
            .await;
        if let Err(e) = outcome.into_result() {
            warn!("Failed to deliver notification on {} to {}: {}", topic, node, e);
        }
    }
}

/// Accepts notifications sent by other nodes' relays.
pub struct NotificationRelayService {
    notifications: Arc<dyn NotificationService>,
}

impl NotificationRelayService {
    pub fn new(notifications: Arc<dyn NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl RemotableService for NotificationRelayService {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        _caller: &NodeIdentifier,
    ) -> Result<Value, ServiceError> {
        match method {
            "send" => {
                let topic: String = argument(&arguments, 0)?;
                let body: Value = argument(&arguments, 1)?;
                self.notifications.send(&topic, body);
                Ok(Value::Null)
            }
            _ => Err(unknown_method(NOTIFICATION_SERVICE, method)),
        }
    }
}
