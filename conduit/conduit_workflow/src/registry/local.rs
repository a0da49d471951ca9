use super::WorkflowRegistry;
use crate::component::DistributedComponentRegistry;
use crate::instance::{WorkflowControl, WorkflowInstance};
use crate::model::{WorkflowDescription, WorkflowInformation};
use crate::notification::{workflow_state_topic, NotificationService};
use crate::remote::{workflow_service_key, WorkflowInstanceService};
use async_trait::async_trait;
use conduit_core::{NodeIdentifier, User, WorkflowError, WorkflowInstanceId, WorkflowState};
use conduit_network::ServiceRegistry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Number of state notifications retained per instance.
const STATE_HISTORY_SIZE: usize = 16;

/// Instances hosted by this node.
///
/// Each instance is also published as a service under
/// [`workflow_service_key`] so other nodes can drive it.
pub struct LocalWorkflowRegistry {
    node: NodeIdentifier,
    components: Arc<DistributedComponentRegistry>,
    notifications: Arc<dyn NotificationService>,
    services: Weak<ServiceRegistry>,
    instances: DashMap<WorkflowInstanceId, WorkflowInstance>,
    owners: DashMap<WorkflowInstanceId, User>,
    informations: DashMap<WorkflowInstanceId, WorkflowInformation>,
}

impl LocalWorkflowRegistry {
    pub fn new(
        node: NodeIdentifier,
        components: Arc<DistributedComponentRegistry>,
        notifications: Arc<dyn NotificationService>,
        services: &Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            node,
            components,
            notifications,
            services: Arc::downgrade(services),
            instances: DashMap::new(),
            owners: DashMap::new(),
            informations: DashMap::new(),
        }
    }

    pub fn node(&self) -> &NodeIdentifier {
        &self.node
    }

    /// The instance itself, for callers on this node.
    pub fn workflow(&self, id: &WorkflowInstanceId) -> Option<WorkflowInstance> {
        self.instances.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn remove(&self, id: &WorkflowInstanceId) {
        self.instances.remove(id);
        self.owners.remove(id);
        self.informations.remove(id);
        if let Some(services) = self.services.upgrade() {
            services.unregister(&workflow_service_key(id));
        }
    }
}

#[async_trait]
impl WorkflowRegistry for LocalWorkflowRegistry {
    async fn create_workflow_instance(
        &self,
        user: &User,
        description: &WorkflowDescription,
        name: Option<String>,
        configuration: BTreeMap<String, String>,
    ) -> Result<WorkflowInformation, WorkflowError> {
        if !user.is_valid() {
            return Err(WorkflowError::InvalidUser(user.id.clone()));
        }
        description.validate()?;

        let id = WorkflowInstanceId::new();
        let information = WorkflowInformation::new(
            id,
            name,
            user,
            self.node.clone(),
            description.clone_for(user),
            configuration,
        );
        let state_topic = workflow_state_topic(&id);
        self.notifications
            .register_publisher(&state_topic, STATE_HISTORY_SIZE);

        let instance = WorkflowInstance::spawn(
            information,
            user.clone(),
            self.components.clone(),
            self.notifications.clone(),
        );
        if let Err(e) = instance.initialize(user).await {
            warn!("Failed to create workflow instance {}: {}", id, e);
            self.notifications.remove_publisher(&state_topic);
            return Err(e);
        }

        let information = instance.information();
        self.owners.insert(id, user.clone());
        self.informations.insert(id, information.clone());
        if let Some(services) = self.services.upgrade() {
            services.register(
                workflow_service_key(&id),
                Arc::new(WorkflowInstanceService::new(instance.clone())),
            );
        }
        self.instances.insert(id, instance);

        info!(
            "Created workflow instance {} ({}) for {}",
            information.name, id, user
        );
        Ok(information)
    }

    async fn dispose_workflow_instance(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
    ) -> Result<(), WorkflowError> {
        let Some(owner) = self.owners.get(id).map(|entry| entry.value().clone()) else {
            debug!("Ignoring disposal of unknown workflow instance {}", id);
            return Ok(());
        };
        crate::instance::authorize(&owner, user)?;

        // Whoever removes the owner entry performs the disposal.
        if self.owners.remove(id).is_none() {
            debug!("Workflow instance {} is already being disposed", id);
            return Ok(());
        }

        if let Some(instance) = self.workflow(id) {
            if let Err(e) = shut_down(&instance, user).await {
                self.owners.insert(*id, owner);
                return Err(e);
            }
        }

        self.remove(id);
        info!("Disposed workflow instance {}", id);
        Ok(())
    }

    async fn workflow_information(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
    ) -> Result<Option<WorkflowInformation>, WorkflowError> {
        let Some(owner) = self.owners.get(id).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        crate::instance::authorize(&owner, user)?;
        Ok(self.informations.get(id).map(|entry| entry.value().clone()))
    }

    async fn workflow_informations(
        &self,
        user: &User,
    ) -> Result<Vec<WorkflowInformation>, WorkflowError> {
        if !user.is_valid() {
            return Err(WorkflowError::InvalidUser(user.id.clone()));
        }
        let mut informations: Vec<WorkflowInformation> = self
            .informations
            .iter()
            .filter(|entry| {
                self.owners
                    .get(entry.key())
                    .is_some_and(|owner| owner.same(user))
            })
            .map(|entry| entry.value().clone())
            .collect();
        informations.sort_by_key(|information| information.identifier);
        Ok(informations)
    }

    async fn is_creator(
        &self,
        id: &WorkflowInstanceId,
        user: &User,
    ) -> Result<bool, WorkflowError> {
        Ok(self
            .owners
            .get(id)
            .is_some_and(|owner| owner.same(user)))
    }
}

/// Cancel `instance` if it is still active, then dispose it.
async fn shut_down(instance: &WorkflowInstance, user: &User) -> Result<(), WorkflowError> {
    let state = instance.current_state();
    if !state.is_final() && !state.is_disposable() {
        instance.cancel(user).await?;
    }
    if matches!(
        instance.current_state(),
        WorkflowState::Disposing | WorkflowState::Disposed
    ) {
        return Ok(());
    }
    match instance.dispose(user).await {
        Ok(_)
        | Err(WorkflowError::StateConflict {
            actual: WorkflowState::Disposing | WorkflowState::Disposed,
            ..
        }) => Ok(()),
        Err(e) => Err(e),
    }
}
