//! In-process execution of component instances.
//!
//! A [`ComponentHost`] is the [`ComponentRegistry`] of a node that runs
//! components itself. Components are created by registered factories and
//! driven through [`HostedComponent`], which reports completion or failure
//! to the notification service of the workflow's controller node.

use crate::component::{
    ComponentController, ComponentInstantiation, ComponentRegistry, OutputBinding,
};
use crate::model::ComponentInstanceDescriptor;
use crate::notification::{component_failed_topic, component_finished_topic};
use crate::remote::NotificationRelay;
use async_trait::async_trait;
use conduit_core::{
    ComponentInstanceId, ComponentState, NodeIdentifier, ServiceError, User, WorkflowError,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The behavior of one component instance.
#[async_trait]
pub trait Component: Send + Sync {
    /// Called once the targets of the component's outputs are known.
    async fn prepare(&self, _outputs: &[OutputBinding]) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Run to completion.
    async fn run(&self) -> Result<(), ServiceError>;
}

/// Creates components of one component id.
pub trait ComponentFactory: Send + Sync {
    fn create(&self, instantiation: &ComponentInstantiation)
        -> Result<Arc<dyn Component>, ServiceError>;
}

/// Controller of a component running on this node.
pub struct HostedComponent {
    me: Weak<HostedComponent>,
    descriptor: ComponentInstanceDescriptor,
    controller_node: NodeIdentifier,
    component: Arc<dyn Component>,
    state: RwLock<ComponentState>,
    paused: watch::Sender<bool>,
    run: Mutex<Option<JoinHandle<()>>>,
    relay: Arc<NotificationRelay>,
}

impl HostedComponent {
    fn new(
        descriptor: ComponentInstanceDescriptor,
        controller_node: NodeIdentifier,
        component: Arc<dyn Component>,
        relay: Arc<NotificationRelay>,
    ) -> Arc<Self> {
        let (paused, _) = watch::channel(false);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            descriptor,
            controller_node,
            component,
            state: RwLock::new(ComponentState::Instantiated),
            paused,
            run: Mutex::new(None),
            relay,
        })
    }

    pub fn descriptor(&self) -> &ComponentInstanceDescriptor {
        &self.descriptor
    }

    fn current_state(&self) -> ComponentState {
        *self.state.read()
    }

    fn require(&self, operation: &str, allowed: &[ComponentState]) -> Result<(), ServiceError> {
        let state = self.current_state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(ServiceError::Failed(format!(
                "cannot {} component {} in state {:?}",
                operation, self.descriptor.name, state
            )))
        }
    }

    fn set_state(&self, state: ComponentState) {
        debug!("Component {} is now {:?}", self.descriptor.name, state);
        *self.state.write() = state;
    }

    fn stop_run(&self) {
        if let Some(run) = self.run.lock().take() {
            run.abort();
        }
    }

    async fn complete(&self, result: Result<(), ServiceError>) {
        // Reports are held back while paused.
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|paused| !*paused).await;

        if self.current_state() != ComponentState::Running {
            return;
        }
        let workflow = self.descriptor.workflow_instance;
        let id = Value::String(self.descriptor.identifier.to_string());
        match result {
            Ok(()) => {
                self.set_state(ComponentState::Finished);
                info!("Component {} finished", self.descriptor.name);
                self.relay
                    .send_to(
                        &self.controller_node,
                        &component_finished_topic(&workflow),
                        id,
                    )
                    .await;
            }
            Err(e) => {
                self.set_state(ComponentState::Failed);
                warn!("Component {} failed: {}", self.descriptor.name, e);
                self.relay
                    .send_to(
                        &self.controller_node,
                        &component_failed_topic(&workflow),
                        Value::String(format!("{}: {}", self.descriptor.name, e)),
                    )
                    .await;
            }
        }
    }
}

#[async_trait]
impl ComponentController for HostedComponent {
    async fn prepare(&self, _user: &User, outputs: Vec<OutputBinding>) -> Result<(), ServiceError> {
        self.require("prepare", &[ComponentState::Instantiated])?;
        self.component.prepare(&outputs).await?;
        self.set_state(ComponentState::Prepared);
        Ok(())
    }

    async fn start(&self, _user: &User) -> Result<(), ServiceError> {
        self.require("start", &[ComponentState::Prepared])?;
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| ServiceError::Failed("component is being dropped".to_string()))?;
        self.set_state(ComponentState::Running);
        let run = tokio::spawn(async move {
            let result = me.component.run().await;
            me.complete(result).await;
        });
        *self.run.lock() = Some(run);
        Ok(())
    }

    async fn pause(&self, _user: &User) -> Result<(), ServiceError> {
        self.require("pause", &[ComponentState::Running])?;
        self.paused.send_replace(true);
        self.set_state(ComponentState::Paused);
        Ok(())
    }

    async fn resume(&self, _user: &User) -> Result<(), ServiceError> {
        self.require("resume", &[ComponentState::Paused])?;
        self.set_state(ComponentState::Running);
        self.paused.send_replace(false);
        Ok(())
    }

    async fn cancel(&self, _user: &User) -> Result<(), ServiceError> {
        match self.current_state() {
            ComponentState::Finished | ComponentState::Failed | ComponentState::Disposed => {}
            _ => {
                self.stop_run();
                self.set_state(ComponentState::Canceled);
            }
        }
        self.paused.send_replace(false);
        Ok(())
    }

    async fn dispose(&self, _user: &User) -> Result<(), ServiceError> {
        self.stop_run();
        self.set_state(ComponentState::Disposed);
        Ok(())
    }

    async fn finished(&self, _user: &User) -> Result<(), ServiceError> {
        if self.current_state() == ComponentState::Running {
            self.stop_run();
            self.set_state(ComponentState::Finished);
        }
        Ok(())
    }

    async fn wait_for_lifecycle_phase_finished(&self) -> Result<(), ServiceError> {
        match self.current_state() {
            ComponentState::Failed => Err(ServiceError::Failed(format!(
                "component {} failed",
                self.descriptor.name
            ))),
            _ => Ok(()),
        }
    }

    async fn state(&self) -> Result<ComponentState, ServiceError> {
        Ok(self.current_state())
    }
}

/// [`ComponentRegistry`] running components in this process.
pub struct ComponentHost {
    node: NodeIdentifier,
    factories: DashMap<String, Arc<dyn ComponentFactory>>,
    instances: DashMap<ComponentInstanceId, Arc<HostedComponent>>,
    relay: Arc<NotificationRelay>,
}

impl ComponentHost {
    pub fn new(node: NodeIdentifier, relay: Arc<NotificationRelay>) -> Self {
        Self {
            node,
            factories: DashMap::new(),
            instances: DashMap::new(),
            relay,
        }
    }

    pub fn register_factory(&self, component_id: impl Into<String>, factory: Arc<dyn ComponentFactory>) {
        self.factories.insert(component_id.into(), factory);
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[async_trait]
impl ComponentRegistry for ComponentHost {
    async fn create_component_instance(
        &self,
        user: &User,
        instantiation: ComponentInstantiation,
    ) -> Result<ComponentInstanceDescriptor, ServiceError> {
        if !user.is_valid() {
            return Err(WorkflowError::InvalidUser(user.id.clone()).into());
        }
        let component_id = &instantiation.component.component_id;
        let factory = self
            .factories
            .get(component_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ServiceError::Failed(format!(
                    "component {} is not available on node {}",
                    component_id, self.node
                ))
            })?;
        let component = factory.create(&instantiation)?;

        let descriptor = ComponentInstanceDescriptor {
            identifier: ComponentInstanceId::new(),
            name: instantiation.name.clone(),
            component_id: component_id.clone(),
            node: self.node.clone(),
            workflow_instance: instantiation.workflow_instance,
            workflow_node: instantiation.workflow_node.clone(),
        };
        let hosted = HostedComponent::new(
            descriptor.clone(),
            instantiation.controller_node,
            component,
            self.relay.clone(),
        );
        self.instances.insert(descriptor.identifier, hosted);
        debug!(
            "Instantiated component {} ({}) for workflow {}",
            descriptor.name, descriptor.identifier, descriptor.workflow_instance
        );
        Ok(descriptor)
    }

    async fn dispose_component_instance(
        &self,
        _user: &User,
        instance: &ComponentInstanceId,
    ) -> Result<(), ServiceError> {
        if let Some((_, hosted)) = self.instances.remove(instance) {
            hosted.stop_run();
            debug!("Released component instance {}", instance);
        }
        Ok(())
    }

    fn controller(&self, instance: &ComponentInstanceId) -> Option<Arc<dyn ComponentController>> {
        self.instances
            .get(instance)
            .map(|entry| entry.value().clone() as Arc<dyn ComponentController>)
    }
}
