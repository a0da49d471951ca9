#![allow(dead_code)]

use async_trait::async_trait;
use conduit_core::{
    CommunicationConfig, NetworkNodeInformation, NodeIdentifier, NodeInformationRegistry,
    ServiceError, User, WorkflowState,
};
use conduit_network::{
    NetworkConnectionService, NetworkContactPoint, ServiceCallPayloadHandler, ServiceCaller,
    ServiceRegistry, VirtualTransportProvider, VIRTUAL_TRANSPORT_ID,
};
use conduit_workflow::notification::workflow_state_topic;
use conduit_workflow::{
    Component, ComponentDescription, ComponentFactory, ComponentHost, ComponentInstantiation,
    ComponentRegistryService, Connection, DistributedComponentRegistry,
    DistributedWorkflowRegistry, LocalNotificationService, LocalWorkflowRegistry,
    NotificationRelay, NotificationRelayService, NotificationService, OutputBinding,
    WorkflowDescription, WorkflowInformation, WorkflowNode, WorkflowRegistryService,
    COMPONENT_REGISTRY_SERVICE, NOTIFICATION_SERVICE, WORKFLOW_REGISTRY_SERVICE,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

pub const TEST_COMPONENT: &str = "test";

pub fn user(id: &str) -> User {
    User::new(id)
}

pub fn config() -> CommunicationConfig {
    CommunicationConfig {
        health_check_max_jitter_ms: 0,
        request_timeout_ms: 2_000,
        ..CommunicationConfig::default()
    }
}

/// Log output for failing tests, filtered through `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn connection_service(node: &str, services: &Arc<ServiceRegistry>) -> NetworkConnectionService {
    init_tracing();
    NetworkConnectionService::new(
        NetworkNodeInformation::new(node.into())
            .with_display_name(node)
            .with_workflow_host(true),
        config(),
        Arc::new(NodeInformationRegistry::new()),
        Arc::new(ServiceCallPayloadHandler::new(
            services.clone(),
            Duration::from_secs(10),
        )),
    )
}

/// Component configured through its description:
/// `run_ms` (default 10), `fail` ("prepare" or "run") and `hold`.
struct TestComponent {
    run_ms: u64,
    fail: Option<String>,
    hold: bool,
}

#[async_trait]
impl Component for TestComponent {
    async fn prepare(&self, _outputs: &[OutputBinding]) -> Result<(), ServiceError> {
        if self.fail.as_deref() == Some("prepare") {
            return Err(ServiceError::Failed("prepare failed".to_string()));
        }
        Ok(())
    }

    async fn run(&self) -> Result<(), ServiceError> {
        if self.hold {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(self.run_ms)).await;
        if self.fail.as_deref() == Some("run") {
            return Err(ServiceError::Failed("run failed".to_string()));
        }
        Ok(())
    }
}

struct TestFactory;

impl ComponentFactory for TestFactory {
    fn create(
        &self,
        instantiation: &ComponentInstantiation,
    ) -> Result<Arc<dyn Component>, ServiceError> {
        let configuration = &instantiation.component.configuration;
        Ok(Arc::new(TestComponent {
            run_ms: configuration
                .get("run_ms")
                .and_then(Value::as_u64)
                .unwrap_or(10),
            fail: configuration
                .get("fail")
                .and_then(Value::as_str)
                .map(str::to_string),
            hold: configuration
                .get("hold")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }))
    }
}

/// One fully wired node.
pub struct TestNode {
    pub id: NodeIdentifier,
    pub connections: NetworkConnectionService,
    pub services: Arc<ServiceRegistry>,
    pub notifications: Arc<LocalNotificationService>,
    pub host: Arc<ComponentHost>,
    pub local: Arc<LocalWorkflowRegistry>,
    pub registry: DistributedWorkflowRegistry,
}

impl TestNode {
    pub fn new(node: &str, transport: &Arc<VirtualTransportProvider>) -> Self {
        let id = NodeIdentifier::new(node);
        let services = Arc::new(ServiceRegistry::new());
        let connections = connection_service(node, &services);
        connections
            .add_transport_provider(transport.clone())
            .unwrap();
        let caller = ServiceCaller::new(connections.clone());
        let notifications = Arc::new(LocalNotificationService::new(id.clone()));

        let relay = Arc::new(NotificationRelay::new(caller.clone(), notifications.clone()));
        let host = Arc::new(ComponentHost::new(id.clone(), relay));
        host.register_factory(TEST_COMPONENT, Arc::new(TestFactory));
        let components = Arc::new(DistributedComponentRegistry::new(
            host.clone(),
            caller.clone(),
        ));
        let local = Arc::new(LocalWorkflowRegistry::new(
            id.clone(),
            components,
            notifications.clone(),
            &services,
        ));

        services.register(
            WORKFLOW_REGISTRY_SERVICE,
            Arc::new(WorkflowRegistryService::new(local.clone())),
        );
        services.register(
            COMPONENT_REGISTRY_SERVICE,
            Arc::new(ComponentRegistryService::new(host.clone(), &services)),
        );
        services.register(
            NOTIFICATION_SERVICE,
            Arc::new(NotificationRelayService::new(notifications.clone())),
        );

        let registry = DistributedWorkflowRegistry::new(
            local.clone(),
            caller,
            connections.node_registry().clone(),
            4,
        );

        Self {
            id,
            connections,
            services,
            notifications,
            host,
            local,
            registry,
        }
    }

    pub fn contact_point(&self) -> NetworkContactPoint {
        NetworkContactPoint::new(VIRTUAL_TRANSPORT_ID, self.id.as_str(), 7000)
    }
}

/// Two nodes "a" and "b" with a duplex connection from a to b.
pub async fn two_nodes() -> (TestNode, TestNode) {
    let transport = Arc::new(VirtualTransportProvider::new(true));
    let a = TestNode::new("a", &transport);
    let b = TestNode::new("b", &transport);
    b.connections.start_server(&b.contact_point()).unwrap();
    a.connections
        .connect(&b.contact_point(), true)
        .unwrap()
        .await
        .unwrap();
    (a, b)
}

/// A chain `first -> second -> ...` of test components, each on the given node.
pub fn chain(name: &str, components: &[(&str, &str, Value)]) -> WorkflowDescription {
    let mut description = WorkflowDescription::new(format!("{}-description", name)).with_name(name);
    for (identifier, node, configuration) in components {
        description
            .add_node(WorkflowNode {
                identifier: identifier.to_string(),
                name: identifier.to_string(),
                component: ComponentDescription {
                    component_id: TEST_COMPONENT.to_string(),
                    name: identifier.to_string(),
                    node: NodeIdentifier::new(*node),
                    configuration: configuration.clone(),
                },
            })
            .unwrap();
    }
    for pair in components.windows(2) {
        description
            .add_connection(Connection {
                source: pair[0].0.to_string(),
                output: "out".to_string(),
                target: pair[1].0.to_string(),
                input: "in".to_string(),
            })
            .unwrap();
    }
    description
}

pub fn quick() -> Value {
    json!({ "run_ms": 10 })
}

pub fn held() -> Value {
    json!({ "hold": true })
}

/// Wait until a notification carrying `state` arrives.
pub async fn wait_for_state(
    receiver: &mut mpsc::UnboundedReceiver<conduit_workflow::Notification>,
    state: WorkflowState,
) {
    let expected = Value::String(state.name().to_string());
    timeout(Duration::from_secs(5), async {
        while let Some(notification) = receiver.recv().await {
            if notification.body == expected {
                return;
            }
        }
        panic!("notification stream ended before {}", state);
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", state));
}

pub fn state_subscription(
    node: &TestNode,
    information: &WorkflowInformation,
) -> mpsc::UnboundedReceiver<conduit_workflow::Notification> {
    node.notifications
        .subscribe(&workflow_state_topic(&information.identifier), None)
        .unwrap()
        .receiver
}
