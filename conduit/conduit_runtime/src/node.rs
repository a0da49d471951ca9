//! Top-level wiring of one Conduit node.
//!
//! [`Node`] constructs every collaborator explicitly and owns them for the
//! node's lifetime: the connection service, the service registry with the
//! registry and notification services, the component host and the
//! distributed workflow registry.

use crate::components::{DelayComponentFactory, DELAY_COMPONENT};
use crate::system::config::NodeConfig;
use anyhow::{Context, Result};
use conduit_core::{
    CommunicationError, NodeConfigurationProvider, NodeIdentifier, NodeInformationRegistry,
};
use conduit_network::{
    ConnectionRef, NetworkConnectionService, NetworkContactPoint, NetworkTransportProvider,
    ServiceCallPayloadHandler, ServiceCaller, ServiceRegistry,
};
use conduit_workflow::{
    ComponentFactory, ComponentHost, ComponentRegistryService, DistributedComponentRegistry,
    DistributedWorkflowRegistry, LocalNotificationService, LocalWorkflowRegistry,
    NotificationRelay, NotificationRelayService, WorkflowRegistryService,
    COMPONENT_REGISTRY_SERVICE, NOTIFICATION_SERVICE, WORKFLOW_REGISTRY_SERVICE,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Node {
    config: NodeConfig,
    connections: NetworkConnectionService,
    services: Arc<ServiceRegistry>,
    notifications: Arc<LocalNotificationService>,
    component_host: Arc<ComponentHost>,
    workflows: Arc<DistributedWorkflowRegistry>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Build a node from a validated configuration. Nothing is started yet.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate().context("Invalid node configuration")?;
        let node_id = config.node_id();
        info!("Initializing node {}", config.own_node_information().log_description());

        let services = Arc::new(ServiceRegistry::new());
        let connections = NetworkConnectionService::new(
            config.own_node_information(),
            config.communication.clone(),
            Arc::new(NodeInformationRegistry::new()),
            Arc::new(ServiceCallPayloadHandler::new(
                services.clone(),
                config.communication.slow_service_call_threshold(),
            )),
        );
        let caller = ServiceCaller::new(connections.clone());

        let notifications = Arc::new(LocalNotificationService::new(node_id.clone()));
        let relay = Arc::new(NotificationRelay::new(caller.clone(), notifications.clone()));
        let component_host = Arc::new(ComponentHost::new(node_id.clone(), relay));
        component_host.register_factory(DELAY_COMPONENT, Arc::new(DelayComponentFactory));

        let components = Arc::new(DistributedComponentRegistry::new(
            component_host.clone(),
            caller.clone(),
        ));
        let local = Arc::new(LocalWorkflowRegistry::new(
            node_id,
            components,
            notifications.clone(),
            &services,
        ));

        if config.is_workflow_host {
            services.register(
                WORKFLOW_REGISTRY_SERVICE,
                Arc::new(WorkflowRegistryService::new(local.clone())),
            );
        }
        services.register(
            COMPONENT_REGISTRY_SERVICE,
            Arc::new(ComponentRegistryService::new(
                component_host.clone(),
                &services,
            )),
        );
        services.register(
            NOTIFICATION_SERVICE,
            Arc::new(NotificationRelayService::new(notifications.clone())),
        );

        let workflows = Arc::new(DistributedWorkflowRegistry::new(
            local,
            caller,
            connections.node_registry().clone(),
            config.communication.max_parallel_queries,
        ));

        Ok(Self {
            config,
            connections,
            services,
            notifications,
            component_host,
            workflows,
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &NodeIdentifier {
        self.connections.own_node_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn connections(&self) -> &NetworkConnectionService {
        &self.connections
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn notifications(&self) -> &Arc<LocalNotificationService> {
        &self.notifications
    }

    pub fn workflows(&self) -> &Arc<DistributedWorkflowRegistry> {
        &self.workflows
    }

    pub fn local_workflows(&self) -> &Arc<LocalWorkflowRegistry> {
        self.workflows.local()
    }

    pub fn component_host(&self) -> &Arc<ComponentHost> {
        &self.component_host
    }

    pub fn add_transport_provider(
        &self,
        provider: Arc<dyn NetworkTransportProvider>,
    ) -> Result<(), CommunicationError> {
        self.connections.add_transport_provider(provider)
    }

    /// Make a component available for instantiation on this node.
    pub fn register_component(&self, component_id: &str, factory: Arc<dyn ComponentFactory>) {
        self.component_host.register_factory(component_id, factory);
    }

    /// Start the configured servers, connect to the configured peers and
    /// begin periodic health checks.
    ///
    /// A server that cannot start aborts startup; an unreachable peer does not.
    pub async fn start(&self) -> Result<()> {
        info!("Starting node {}", self.id());

        for contact_point in self.config.server_contact_points() {
            self.connections
                .start_server(&contact_point)
                .with_context(|| format!("Failed to start server at {}", contact_point))?;
        }

        for contact_point in self.config.remote_contact_points() {
            if let Err(e) = self.connect(&contact_point).await {
                warn!("Could not connect to {}: {}", contact_point, e);
            }
        }

        self.background
            .lock()
            .push(self.connections.spawn_health_check_timer());
        info!("Node {} started", self.id());
        Ok(())
    }

    /// Open a duplex connection to a peer.
    pub async fn connect(
        &self,
        contact_point: &NetworkContactPoint,
    ) -> Result<ConnectionRef, CommunicationError> {
        self.connections.connect(contact_point, true)?.await
    }

    /// Stop background work, close all connections and stop all servers.
    pub fn shutdown(&self) {
        info!("Shutting down node {}", self.id());
        for task in self.background.lock().drain(..) {
            task.abort();
        }
        self.connections.shutdown();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for task in self.background.get_mut().drain(..) {
            task.abort();
        }
    }
}
