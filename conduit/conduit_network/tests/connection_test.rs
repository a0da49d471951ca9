use async_trait::async_trait;
use conduit_core::{
    CommunicationConfig, CommunicationError, ConnectionId, NetworkNodeInformation, NodeIdentifier,
    NodeInformationRegistry, ServiceError,
};
use conduit_network::handler::NetworkRequestHandler;
use conduit_network::service::{argument, to_value};
use conduit_network::{
    BrokenConnectionListener, CallOutcome, ConnectionRef, EndpointHandler, MetaData,
    NetworkConnection, NetworkConnectionListener, NetworkConnectionService, NetworkContactPoint,
    NetworkRequest, NetworkResponse, NetworkTransportProvider, RawResponseHandler,
    RemotableService, ResultCode, ServerContactPoint, ServiceCallPayloadHandler, ServiceCaller,
    ServiceRegistry,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SCRIPTED: &str = "scripted";

/// Delay before a `Slow` connection echoes a request.
const SLOW_ECHO: Duration = Duration::from_millis(30);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Echo,
    WrongToken,
    Garbled,
    Silent,
    Slow,
}

struct ScriptedConnection {
    id: ConnectionId,
    remote: NetworkNodeInformation,
    behavior: Mutex<Behavior>,
    pending: Mutex<Vec<Arc<dyn RawResponseHandler>>>,
    requests: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl NetworkConnection for ScriptedConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn initiated_by_remote(&self) -> bool {
        false
    }

    fn remote_node_information(&self) -> NetworkNodeInformation {
        self.remote.clone()
    }

    fn send_request(
        &self,
        request: NetworkRequest,
        handler: Arc<dyn RawResponseHandler>,
        _timeout: Duration,
    ) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match *self.behavior.lock() {
            Behavior::Echo => {
                handler.on_response_available(NetworkResponse::success(&request, request.content.clone()))
            }
            Behavior::WrongToken => handler.on_response_available(NetworkResponse::success(
                &request,
                b"\"not the token\"".to_vec(),
            )),
            Behavior::Garbled => handler
                .on_response_available(NetworkResponse::success(&request, b"{{{".to_vec())),
            Behavior::Silent => self.pending.lock().push(handler),
            Behavior::Slow => {
                let in_flight = self.in_flight.clone();
                let max_in_flight = self.max_in_flight.clone();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                let response = NetworkResponse::success(&request, request.content.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(SLOW_ECHO).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    handler.on_response_available(response);
                });
            }
        }
    }

    fn close(&self) {}
}

struct ScriptedTransport {
    connection: Mutex<Option<Arc<ScriptedConnection>>>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connection: Mutex::new(None),
        })
    }

    fn connection(&self) -> Arc<ScriptedConnection> {
        self.connection.lock().clone().expect("not connected")
    }

    fn set_behavior(&self, behavior: Behavior) {
        if let Some(connection) = self.connection.lock().as_ref() {
            *connection.behavior.lock() = behavior;
        }
    }
}

#[async_trait]
impl NetworkTransportProvider for ScriptedTransport {
    fn transport_id(&self) -> &str {
        SCRIPTED
    }

    async fn connect(
        &self,
        contact_point: &NetworkContactPoint,
        _own: &NetworkNodeInformation,
        _allow_duplex: bool,
        _endpoint: Arc<dyn EndpointHandler>,
        _broken: Arc<dyn BrokenConnectionListener>,
    ) -> Result<ConnectionRef, CommunicationError> {
        if contact_point.host == "unreachable" {
            return Err(CommunicationError::ConnectFailed {
                contact_point: contact_point.to_string(),
                reason: "refused".to_string(),
            });
        }
        let connection = Arc::new(ScriptedConnection {
            id: ConnectionId::new(),
            remote: NetworkNodeInformation::new(NodeIdentifier::new(contact_point.host.clone())),
            behavior: Mutex::new(Behavior::Echo),
            pending: Mutex::new(Vec::new()),
            requests: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        });
        *self.connection.lock() = Some(connection.clone());
        Ok(connection)
    }

    fn supports_remote_initiated_connections(&self) -> bool {
        false
    }

    fn start_server(&self, _server: Arc<ServerContactPoint>) -> Result<(), CommunicationError> {
        Ok(())
    }

    fn stop_server(&self, _server: &ServerContactPoint) {}
}

#[derive(Default)]
struct CountingListener {
    established: AtomicUsize,
    terminated: AtomicUsize,
}

impl NetworkConnectionListener for CountingListener {
    fn on_outgoing_connection_established(&self, _connection: &ConnectionRef) {
        self.established.fetch_add(1, Ordering::SeqCst);
    }

    fn on_outgoing_connection_terminated(&self, _connection: &ConnectionRef) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config() -> CommunicationConfig {
    CommunicationConfig {
        health_check_max_jitter_ms: 0,
        health_check_timeout_ms: 50,
        health_check_failure_limit: 3,
        request_timeout_ms: 500,
        ..CommunicationConfig::default()
    }
}

fn service_for(node: &str, services: Arc<ServiceRegistry>) -> NetworkConnectionService {
    NetworkConnectionService::new(
        NetworkNodeInformation::new(node.into()).with_display_name(node),
        test_config(),
        Arc::new(NodeInformationRegistry::new()),
        Arc::new(ServiceCallPayloadHandler::new(
            services,
            Duration::from_secs(10),
        )),
    )
}

async fn scripted_setup() -> (
    NetworkConnectionService,
    Arc<ScriptedTransport>,
    Arc<CountingListener>,
    ConnectionRef,
) {
    init_tracing();
    let service = service_for("local", Arc::new(ServiceRegistry::new()));
    let transport = ScriptedTransport::new();
    service.add_transport_provider(transport.clone()).unwrap();
    let listener = Arc::new(CountingListener::default());
    service.add_connection_listener(listener.clone());
    let connection = service
        .connect(&NetworkContactPoint::new(SCRIPTED, "remote", 1), false)
        .unwrap()
        .await
        .unwrap();
    (service, transport, listener, connection)
}

async fn run_health_checks(service: &NetworkConnectionService) {
    for handle in service.trigger_connection_health_checks() {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_connect_registers_and_notifies() {
    let (service, _transport, listener, connection) = scripted_setup().await;
    assert_eq!(listener.established.load(Ordering::SeqCst), 1);
    assert!(service.is_live(&connection.connection_id()));
    assert_eq!(service.connection_state(&connection.connection_id()).unwrap().failure_count(), 0);
    assert!(service.node_registry().get(&"remote".into()).is_some());
    assert!(service.connection_to(&"remote".into()).is_some());
}

#[tokio::test]
async fn test_connect_failure_reaches_the_future() {
    let (service, _transport, _listener, _connection) = scripted_setup().await;
    let result = service
        .connect(&NetworkContactPoint::new(SCRIPTED, "unreachable", 1), false)
        .unwrap()
        .await;
    assert!(matches!(result, Err(CommunicationError::ConnectFailed { .. })));
    assert_eq!(service.outgoing_connections().len(), 1);
}

#[tokio::test]
async fn test_unknown_and_duplicate_transports_fail_immediately() {
    let (service, transport, _listener, _connection) = scripted_setup().await;

    let result = service.connect(&NetworkContactPoint::new("carrier-pigeon", "x", 1), false);
    assert!(matches!(result, Err(CommunicationError::UnknownTransport(_))));

    let result = service.start_server(&NetworkContactPoint::new("carrier-pigeon", "x", 1));
    assert!(matches!(result, Err(CommunicationError::UnknownTransport(_))));

    assert_eq!(
        service.add_transport_provider(transport).unwrap_err(),
        CommunicationError::DuplicateTransport(SCRIPTED.to_string())
    );
    assert!(service.remove_transport_provider(SCRIPTED).is_ok());
    assert_eq!(
        service.remove_transport_provider(SCRIPTED).unwrap_err(),
        CommunicationError::TransportNotRegistered(SCRIPTED.to_string())
    );
}

#[tokio::test]
async fn test_broken_connection_is_removed_and_notified_once() {
    let (service, _transport, listener, connection) = scripted_setup().await;

    service.handle_broken_outgoing_connection(&connection);
    service.handle_broken_outgoing_connection(&connection);

    assert_eq!(listener.terminated.load(Ordering::SeqCst), 1);
    assert!(service.outgoing_connections().is_empty());
    assert!(service.connection_to(&"remote".into()).is_none());
    assert!(!service.is_live(&connection.connection_id()));
}

#[tokio::test]
async fn test_health_check_success_keeps_counter_at_zero() {
    let (service, transport, _listener, connection) = scripted_setup().await;
    let state = service.connection_state(&connection.connection_id()).unwrap();

    run_health_checks(&service).await;
    assert_eq!(state.failure_count(), 0);

    transport.set_behavior(Behavior::WrongToken);
    run_health_checks(&service).await;
    assert_eq!(state.failure_count(), 0, "a wrong echo does not fail the check");
}

#[tokio::test]
async fn test_health_check_recovery_resets_counter() {
    let (service, transport, listener, connection) = scripted_setup().await;
    let state = service.connection_state(&connection.connection_id()).unwrap();

    transport.set_behavior(Behavior::Silent);
    run_health_checks(&service).await;
    transport.set_behavior(Behavior::Garbled);
    run_health_checks(&service).await;
    assert_eq!(state.failure_count(), 2);
    assert!(service.is_live(&connection.connection_id()));

    transport.set_behavior(Behavior::Echo);
    run_health_checks(&service).await;
    assert_eq!(state.failure_count(), 0);
    assert_eq!(listener.terminated.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_check_threshold_removes_connection() {
    let (service, transport, listener, connection) = scripted_setup().await;
    transport.set_behavior(Behavior::Silent);

    for _ in 0..3 {
        run_health_checks(&service).await;
    }

    assert!(!service.is_live(&connection.connection_id()));
    assert!(service.outgoing_connections().is_empty());
    assert_eq!(listener.terminated.load(Ordering::SeqCst), 1);

    // nothing left to check
    assert!(service.trigger_connection_health_checks().is_empty());
}

#[tokio::test]
async fn test_overlapping_health_checks_run_one_at_a_time() {
    let (service, transport, _listener, connection) = scripted_setup().await;
    transport.set_behavior(Behavior::Slow);
    let scripted = transport.connection();
    let before = scripted.requests.load(Ordering::SeqCst);

    let mut rounds = service.trigger_connection_health_checks();
    rounds.extend(service.trigger_connection_health_checks());
    assert_eq!(rounds.len(), 2);
    for round in rounds {
        round.await.unwrap();
    }

    assert_eq!(scripted.requests.load(Ordering::SeqCst) - before, 2);
    assert_eq!(scripted.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(
        service
            .connection_state(&connection.connection_id())
            .unwrap()
            .failure_count(),
        0
    );
}

#[tokio::test]
async fn test_close_all_and_listener_removal() {
    let (service, _transport, listener, _connection) = scripted_setup().await;
    let as_dyn: Arc<dyn NetworkConnectionListener> = listener.clone();
    assert!(service.remove_connection_listener(&as_dyn));
    assert!(!service.remove_connection_listener(&as_dyn));

    service.close_all_outgoing_connections();
    assert!(service.outgoing_connections().is_empty());
    assert_eq!(listener.terminated.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unmatched_request_gets_no_matching_handler() {
    let service = service_for("local", Arc::new(ServiceRegistry::new()));
    let request = NetworkRequest::new(
        b"{\"hello\":1}".to_vec(),
        MetaData::new().category("unheard-of").into_map(),
    );
    let response = service
        .endpoint_handler()
        .on_raw_request_received(request.clone(), "peer".into())
        .await;
    assert_eq!(response.result_code(), ResultCode::NoMatchingHandler);
    assert_eq!(response.request_id, request.request_id);
}

struct Failing {
    panic: bool,
}

#[async_trait]
impl NetworkRequestHandler for Failing {
    async fn handle_request(
        &self,
        _request: &NetworkRequest,
        _source: &NodeIdentifier,
    ) -> Result<NetworkResponse, CommunicationError> {
        if self.panic {
            panic!("handler bug");
        }
        Err(CommunicationError::Internal("boom".to_string()))
    }
}

#[tokio::test]
async fn test_handler_failures_become_routing_exceptions() {
    let service = service_for("local", Arc::new(ServiceRegistry::new()));
    service.add_request_handler(
        "erring",
        conduit_network::category_predicate("err"),
        Arc::new(Failing { panic: false }),
    );
    service.add_request_handler(
        "panicking",
        conduit_network::category_predicate("panic"),
        Arc::new(Failing { panic: true }),
    );

    for category in ["err", "panic"] {
        let request = NetworkRequest::new(Vec::new(), MetaData::new().category(category).into_map());
        let response = service
            .endpoint_handler()
            .on_raw_request_received(request, "peer".into())
            .await;
        assert_eq!(response.result_code(), ResultCode::ExceptionWhileRouting);
    }
}

struct Greeter;

#[async_trait]
impl RemotableService for Greeter {
    async fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        caller: &NodeIdentifier,
    ) -> Result<Value, ServiceError> {
        match method {
            "greet" => {
                let name: String = argument(&arguments, 0)?;
                to_value(&format!("hello {} from {}", name, caller))
            }
            _ => Err(ServiceError::Failed("no such greeting".to_string())),
        }
    }
}

fn virtual_node(
    node: &str,
    transport: &Arc<conduit_network::VirtualTransportProvider>,
) -> NetworkConnectionService {
    virtual_node_with(node, transport, test_config())
}

fn virtual_node_with(
    node: &str,
    transport: &Arc<conduit_network::VirtualTransportProvider>,
    config: CommunicationConfig,
) -> NetworkConnectionService {
    let services = Arc::new(ServiceRegistry::new());
    services.register("greeter", Arc::new(Greeter));
    let service = NetworkConnectionService::new(
        NetworkNodeInformation::new(node.into()).with_display_name(node),
        config,
        Arc::new(NodeInformationRegistry::new()),
        Arc::new(ServiceCallPayloadHandler::new(
            services,
            Duration::from_secs(10),
        )),
    );
    service.add_transport_provider(transport.clone()).unwrap();
    service
}

fn contact(host: &str) -> NetworkContactPoint {
    NetworkContactPoint::new(conduit_network::VIRTUAL_TRANSPORT_ID, host, 7000)
}

#[tokio::test]
async fn test_service_calls_over_virtual_transport() {
    let transport = Arc::new(conduit_network::VirtualTransportProvider::new(true));
    let a = virtual_node("a", &transport);
    let b = virtual_node("b", &transport);
    b.start_server(&contact("b")).unwrap();

    a.connect(&contact("b"), true).unwrap().await.unwrap();

    let caller = ServiceCaller::new(a.clone());
    let outcome: CallOutcome<String> = caller
        .call(&"b".into(), "greeter", "greet", vec!["ann".into()])
        .await;
    assert_eq!(outcome, CallOutcome::Ok("hello ann from a".to_string()));

    let outcome: CallOutcome<String> = caller.call(&"b".into(), "greeter", "wave", vec![]).await;
    assert!(matches!(outcome, CallOutcome::DestinationError(ServiceError::Failed(_))));

    // local calls do not need a connection
    let outcome: CallOutcome<String> = caller
        .call(&"a".into(), "greeter", "greet", vec!["me".into()])
        .await;
    assert_eq!(outcome, CallOutcome::Ok("hello me from a".to_string()));

    // the duplex back channel lets b call a
    let back = ServiceCaller::new(b.clone());
    let outcome: CallOutcome<String> = back
        .call(&"a".into(), "greeter", "greet", vec!["bo".into()])
        .await;
    assert_eq!(outcome, CallOutcome::Ok("hello bo from b".to_string()));

    let outcome: CallOutcome<String> = caller.call(&"zed".into(), "greeter", "greet", vec![]).await;
    assert!(matches!(outcome, CallOutcome::RoutingError(_)));
}

#[tokio::test]
async fn test_request_on_crashed_node_yields_routing_exception() {
    let transport = Arc::new(conduit_network::VirtualTransportProvider::new(false));
    let a = virtual_node("a", &transport);
    let b = virtual_node("b", &transport);
    let server = b.start_server(&contact("b")).unwrap();
    let listener = Arc::new(CountingListener::default());
    a.add_connection_listener(listener.clone());
    let connection = a.connect(&contact("b"), false).unwrap().await.unwrap();

    server.set_accepting(false);
    let response = a
        .send_request(Vec::new(), MetaData::new().category(MetaData::CATEGORY_HEALTH_CHECK).into_map(), &connection)
        .await
        .unwrap();

    assert_eq!(response.result_code(), ResultCode::ExceptionWhileRouting);
    assert!(a.outgoing_connections().is_empty());
    assert_eq!(listener.terminated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_service_call_is_forwarded_by_intermediate_node() {
    let transport = Arc::new(conduit_network::VirtualTransportProvider::new(false));
    let a = virtual_node("a", &transport);
    let b = virtual_node("b", &transport);
    let c = virtual_node("c", &transport);
    b.start_server(&contact("b")).unwrap();
    c.start_server(&contact("c")).unwrap();
    b.connect(&contact("c"), false).unwrap().await.unwrap();
    let to_b = a.connect(&contact("b"), false).unwrap().await.unwrap();

    let call = conduit_network::ServiceCall {
        target_node: "c".into(),
        calling_node: "a".into(),
        service: "greeter".to_string(),
        method: "greet".to_string(),
        arguments: vec!["di".into()],
    };
    let metadata = MetaData::new()
        .category(MetaData::CATEGORY_SERVICE_CALL)
        .receiver(&"c".into())
        .into_map();
    let response = a
        .send_request(serde_json::to_vec(&call).unwrap(), metadata, &to_b)
        .await
        .unwrap();
    assert_eq!(
        response.into_outcome::<String>(),
        CallOutcome::Ok("hello di from a".to_string())
    );
}

#[tokio::test]
async fn test_hop_limit_is_enforced() {
    let service = service_for("local", Arc::new(ServiceRegistry::new()));
    let metadata = MetaData::new()
        .category(MetaData::CATEGORY_SERVICE_CALL)
        .receiver(&"elsewhere".into())
        .hop_count(16)
        .into_map();
    let response = service
        .endpoint_handler()
        .on_raw_request_received(NetworkRequest::new(Vec::new(), metadata), "peer".into())
        .await;
    assert_eq!(response.result_code(), ResultCode::ExceptionWhileRouting);
}

#[tokio::test]
async fn test_forwarding_at_the_largest_hop_count_does_not_overflow() {
    let unlimited = CommunicationConfig {
        max_request_hops: u32::MAX,
        ..test_config()
    };
    let transport = Arc::new(conduit_network::VirtualTransportProvider::new(false));
    let a = virtual_node_with("a", &transport, unlimited.clone());
    let b = virtual_node_with("b", &transport, unlimited);
    b.start_server(&contact("b")).unwrap();
    a.connect(&contact("b"), false).unwrap().await.unwrap();

    let call = conduit_network::ServiceCall {
        target_node: "b".into(),
        calling_node: "peer".into(),
        service: "greeter".to_string(),
        method: "greet".to_string(),
        arguments: vec!["max".into()],
    };
    let metadata = MetaData::new()
        .category(MetaData::CATEGORY_SERVICE_CALL)
        .receiver(&"b".into())
        .hop_count(u32::MAX)
        .into_map();
    let response = a
        .endpoint_handler()
        .on_raw_request_received(
            NetworkRequest::new(serde_json::to_vec(&call).unwrap(), metadata),
            "peer".into(),
        )
        .await;
    assert_eq!(
        response.into_outcome::<String>(),
        CallOutcome::Ok("hello max from peer".to_string())
    );
}
