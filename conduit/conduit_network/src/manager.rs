//! Network connection manager.
//!
//! [`NetworkConnectionService`] owns the live outgoing connections of a node,
//! performs connect/close, runs active health checks, and plumbs requests and
//! responses between callers, transports and the request-handler chain.

use crate::handler::{
    category_predicate, HealthCheckRequestHandler, NetworkRequestHandler, RequestHandlerChain,
    RequestPredicate,
};
use crate::listener::{NetworkConnectionListener, NetworkResponseHandler, NetworkTrafficListener};
use crate::model::{
    self, describe_payload, MetaData, NetworkContactPoint, NetworkRequest, NetworkResponse,
};
use crate::service::RequestPayloadHandler;
use crate::transport::{
    BrokenConnectionListener, ConnectionRef, EndpointHandler, NetworkConnection,
    NetworkTransportProvider, RawResponseHandler, ServerContactPoint,
};
use async_trait::async_trait;
use conduit_core::{
    CommunicationConfig, CommunicationError, ConnectionId, NetworkNodeInformation, NodeIdentifier,
    NodeInformationRegistry,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Future resolving to the response of a request.
pub type ResponseFuture = BoxFuture<'static, Result<NetworkResponse, CommunicationError>>;

/// Future resolving to a newly established connection.
pub type ConnectFuture = BoxFuture<'static, Result<ConnectionRef, CommunicationError>>;

/// Health-check bookkeeping for one connection.
#[derive(Default)]
pub struct ConnectionState {
    consecutive_failures: AtomicU32,
    health_check_in_progress: tokio::sync::Mutex<()>,
}

impl ConnectionState {
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reset_failures(&self) -> u32 {
        self.consecutive_failures.swap(0, Ordering::SeqCst)
    }
}

/// State entry that does not keep its connection alive.
struct TrackedState {
    connection: Weak<dyn NetworkConnection>,
    state: Arc<ConnectionState>,
}

struct Shared {
    own_node_information: NetworkNodeInformation,
    config: CommunicationConfig,
    node_registry: Arc<NodeInformationRegistry>,
    payload_handler: Arc<dyn RequestPayloadHandler>,
    transports: RwLock<HashMap<String, Arc<dyn NetworkTransportProvider>>>,
    handler_chain: RequestHandlerChain,
    connection_listeners: Mutex<Vec<Arc<dyn NetworkConnectionListener>>>,
    traffic_listeners: Mutex<Vec<Arc<dyn NetworkTrafficListener>>>,
    outgoing_connections: Mutex<HashMap<ConnectionId, ConnectionRef>>,
    connection_states: Mutex<HashMap<ConnectionId, TrackedState>>,
    servers: Mutex<Vec<Arc<ServerContactPoint>>>,
}

/// Handle to a node's connection manager. Cloning is cheap and all clones
/// share the same state.
#[derive(Clone)]
pub struct NetworkConnectionService {
    shared: Arc<Shared>,
}

impl NetworkConnectionService {
    /// Create the service with the built-in health-check responder and
    /// service-call router already in its request-handler chain.
    pub fn new(
        own_node_information: NetworkNodeInformation,
        config: CommunicationConfig,
        node_registry: Arc<NodeInformationRegistry>,
        payload_handler: Arc<dyn RequestPayloadHandler>,
    ) -> Self {
        node_registry.update_from(&own_node_information);
        let service = Self {
            shared: Arc::new(Shared {
                own_node_information,
                config,
                node_registry,
                payload_handler,
                transports: RwLock::new(HashMap::new()),
                handler_chain: RequestHandlerChain::new(),
                connection_listeners: Mutex::new(Vec::new()),
                traffic_listeners: Mutex::new(Vec::new()),
                outgoing_connections: Mutex::new(HashMap::new()),
                connection_states: Mutex::new(HashMap::new()),
                servers: Mutex::new(Vec::new()),
            }),
        };

        service.add_request_handler(
            "health check",
            category_predicate(MetaData::CATEGORY_HEALTH_CHECK),
            Arc::new(HealthCheckRequestHandler),
        );
        service.add_request_handler(
            "service call",
            category_predicate(MetaData::CATEGORY_SERVICE_CALL),
            Arc::new(ServiceCallRouter {
                shared: Arc::downgrade(&service.shared),
            }),
        );
        service
    }

    fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    pub fn own_node_information(&self) -> &NetworkNodeInformation {
        &self.shared.own_node_information
    }

    pub fn own_node_id(&self) -> &NodeIdentifier {
        &self.shared.own_node_information.node_id
    }

    pub fn config(&self) -> &CommunicationConfig {
        &self.shared.config
    }

    pub fn node_registry(&self) -> &Arc<NodeInformationRegistry> {
        &self.shared.node_registry
    }

    /// The endpoint handler transports call back into for this node.
    pub fn endpoint_handler(&self) -> Arc<dyn EndpointHandler> {
        Arc::new(ConnectionEndpoint {
            shared: Arc::downgrade(&self.shared),
            own_node_id: self.own_node_id().clone(),
        })
    }

    fn broken_connection_listener(&self) -> Arc<dyn BrokenConnectionListener> {
        Arc::new(BrokenConnectionHandler {
            shared: Arc::downgrade(&self.shared),
        })
    }

    // Transport providers

    pub fn add_transport_provider(
        &self,
        provider: Arc<dyn NetworkTransportProvider>,
    ) -> Result<(), CommunicationError> {
        let id = provider.transport_id().to_string();
        let mut transports = self.shared.transports.write();
        if transports.contains_key(&id) {
            return Err(CommunicationError::DuplicateTransport(id));
        }
        info!("Registered transport provider {}", id);
        transports.insert(id, provider);
        Ok(())
    }

    pub fn remove_transport_provider(&self, transport_id: &str) -> Result<(), CommunicationError> {
        match self.shared.transports.write().remove(transport_id) {
            Some(_) => {
                info!("Unregistered transport provider {}", transport_id);
                Ok(())
            }
            None => Err(CommunicationError::TransportNotRegistered(
                transport_id.to_string(),
            )),
        }
    }

    fn transport(
        &self,
        transport_id: &str,
    ) -> Result<Arc<dyn NetworkTransportProvider>, CommunicationError> {
        self.shared
            .transports
            .read()
            .get(transport_id)
            .cloned()
            .ok_or_else(|| CommunicationError::UnknownTransport(transport_id.to_string()))
    }

    // Connections

    /// Connect to `contact_point` on a background task.
    ///
    /// An unknown transport id fails immediately; transport failures are
    /// logged and delivered through the returned future.
    pub fn connect(
        &self,
        contact_point: &NetworkContactPoint,
        allow_duplex: bool,
    ) -> Result<ConnectFuture, CommunicationError> {
        let transport = self.transport(&contact_point.transport_id)?;
        let service = self.clone();
        let contact_point = contact_point.clone();

        let task = tokio::spawn(async move {
            let connected = transport
                .connect(
                    &contact_point,
                    service.own_node_information(),
                    allow_duplex,
                    service.endpoint_handler(),
                    service.broken_connection_listener(),
                )
                .await;
            match connected {
                Ok(connection) => {
                    let remote = connection.remote_node_information();
                    service.shared.node_registry.update_from(&remote);
                    service.register_outgoing_connection(&connection);
                    debug!(
                        "Established connection {} to {} via {}",
                        connection.connection_id(),
                        remote.log_description(),
                        contact_point
                    );
                    Ok(connection)
                }
                Err(e) => {
                    error!("Failed to connect to {}: {}", contact_point, e);
                    Err(e)
                }
            }
        });

        Ok(async move {
            task.await
                .map_err(|e| CommunicationError::Internal(e.to_string()))?
        }
        .boxed())
    }

    fn register_outgoing_connection(&self, connection: &ConnectionRef) {
        let id = connection.connection_id();
        {
            let mut states = self.shared.connection_states.lock();
            states.retain(|_, tracked| tracked.connection.strong_count() > 0);
            states.insert(
                id,
                TrackedState {
                    connection: Arc::downgrade(connection),
                    state: Arc::new(ConnectionState::default()),
                },
            );
        }
        self.shared
            .outgoing_connections
            .lock()
            .insert(id, connection.clone());

        for listener in self.connection_listeners() {
            listener.on_outgoing_connection_established(connection);
        }
    }

    /// Snapshot of the live outgoing connections.
    pub fn outgoing_connections(&self) -> Vec<ConnectionRef> {
        self.shared
            .outgoing_connections
            .lock()
            .values()
            .cloned()
            .collect()
    }

    pub fn is_live(&self, connection_id: &ConnectionId) -> bool {
        self.shared
            .outgoing_connections
            .lock()
            .contains_key(connection_id)
    }

    /// A live connection whose remote end is `node`.
    pub fn connection_to(&self, node: &NodeIdentifier) -> Option<ConnectionRef> {
        self.shared
            .outgoing_connections
            .lock()
            .values()
            .find(|connection| &connection.remote_node_information().node_id == node)
            .cloned()
    }

    pub fn connection_state(&self, connection_id: &ConnectionId) -> Option<Arc<ConnectionState>> {
        self.shared
            .connection_states
            .lock()
            .get(connection_id)
            .filter(|tracked| tracked.connection.strong_count() > 0)
            .map(|tracked| tracked.state.clone())
    }

    pub fn close_outgoing_connection(&self, connection: &ConnectionRef) {
        connection.close();
        let removed = self
            .shared
            .outgoing_connections
            .lock()
            .remove(&connection.connection_id())
            .is_some();
        if removed {
            debug!("Closed connection {}", connection.connection_id());
            for listener in self.connection_listeners() {
                listener.on_outgoing_connection_terminated(connection);
            }
        }
    }

    pub fn close_all_outgoing_connections(&self) {
        for connection in self.outgoing_connections() {
            self.close_outgoing_connection(&connection);
        }
        let remaining = self.shared.outgoing_connections.lock().len();
        if remaining > 0 {
            error!(
                "Consistency error: {} outgoing connection(s) left after closing all",
                remaining
            );
        }
    }

    /// Remove a broken connection from the live set and notify listeners.
    ///
    /// Repeated calls for the same connection are no-ops.
    pub fn handle_broken_outgoing_connection(&self, connection: &ConnectionRef) {
        let removed = self
            .shared
            .outgoing_connections
            .lock()
            .remove(&connection.connection_id())
            .is_some();
        if !removed {
            debug!(
                "Connection {} was already removed, ignoring broken-connection event",
                connection.connection_id()
            );
            return;
        }

        warn!(
            "Connection {} to {} is broken",
            connection.connection_id(),
            connection.remote_node_information().log_description()
        );
        for listener in self.connection_listeners() {
            listener.on_outgoing_connection_terminated(connection);
        }
    }

    // Listeners and handlers

    pub fn add_request_handler(
        &self,
        name: impl Into<String>,
        predicate: RequestPredicate,
        handler: Arc<dyn NetworkRequestHandler>,
    ) {
        self.shared.handler_chain.add(name, predicate, handler);
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn NetworkConnectionListener>) {
        self.shared.connection_listeners.lock().push(listener);
    }

    /// Returns whether the listener was registered.
    pub fn remove_connection_listener(&self, listener: &Arc<dyn NetworkConnectionListener>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut listeners = self.shared.connection_listeners.lock();
        let before = listeners.len();
        listeners.retain(|registered| Arc::as_ptr(registered) as *const () != target);
        listeners.len() != before
    }

    pub fn add_traffic_listener(&self, listener: Arc<dyn NetworkTrafficListener>) {
        self.shared.traffic_listeners.lock().push(listener);
    }

    fn connection_listeners(&self) -> Vec<Arc<dyn NetworkConnectionListener>> {
        self.shared.connection_listeners.lock().clone()
    }

    fn traffic_listeners(&self) -> Vec<Arc<dyn NetworkTrafficListener>> {
        self.shared.traffic_listeners.lock().clone()
    }

    // Requests

    /// Send a request and report the response to `handler`.
    ///
    /// If the connection breaks while the request is pending, the handler
    /// receives a synthetic exception-while-routing response.
    pub fn send_request_with_handler(
        &self,
        content: Vec<u8>,
        metadata: HashMap<String, String>,
        connection: &ConnectionRef,
        handler: Arc<dyn NetworkResponseHandler>,
    ) {
        self.submit(NetworkRequest::new(content, metadata), connection, handler);
    }

    /// Send a request; the returned future resolves with the response.
    pub fn send_request(
        &self,
        content: Vec<u8>,
        metadata: HashMap<String, String>,
        connection: &ConnectionRef,
    ) -> ResponseFuture {
        self.send_prepared(NetworkRequest::new(content, metadata), connection)
    }

    fn send_prepared(&self, request: NetworkRequest, connection: &ConnectionRef) -> ResponseFuture {
        let (sender, receiver) = oneshot::channel();
        self.submit(
            request,
            connection,
            Arc::new(OneshotResponseHandler {
                sender: Mutex::new(Some(sender)),
            }),
        );
        async move {
            receiver.await.map_err(|_| {
                CommunicationError::ConnectionClosed("response handler dropped".to_string())
            })
        }
        .boxed()
    }

    fn submit(
        &self,
        request: NetworkRequest,
        connection: &ConnectionRef,
        handler: Arc<dyn NetworkResponseHandler>,
    ) {
        let wrapped = Arc::new(BrokenAwareResponseHandler {
            shared: Arc::downgrade(&self.shared),
            own_node_id: self.own_node_id().clone(),
            connection: connection.clone(),
            handler,
        });
        connection.send_request(request, wrapped, self.shared.config.request_timeout());
    }

    /// Execute a request addressed to this node without a connection.
    pub async fn handle_local_request(&self, request: &NetworkRequest) -> NetworkResponse {
        self.shared.payload_handler.handle_request(request).await
    }

    async fn dispatch_incoming(
        &self,
        request: NetworkRequest,
        source: NodeIdentifier,
    ) -> NetworkResponse {
        let traffic_listeners = self.traffic_listeners();
        for listener in &traffic_listeners {
            listener.on_request_received(&request, &source);
        }

        let response = match self.shared.handler_chain.find(&request) {
            Some((name, handler)) => {
                debug!(
                    "Dispatching request {} from {} to handler '{}'",
                    request.request_id, source, name
                );
                match AssertUnwindSafe(handler.handle_request(&request, &source))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!(
                            "Handler '{}' failed on request {}: {}",
                            name, request.request_id, e
                        );
                        NetworkResponse::exception_while_routing(
                            &request,
                            self.own_node_id(),
                            &e.to_string(),
                        )
                    }
                    Err(_) => {
                        error!(
                            "Handler '{}' panicked on request {}",
                            name, request.request_id
                        );
                        NetworkResponse::exception_while_routing(
                            &request,
                            self.own_node_id(),
                            "request handler panicked",
                        )
                    }
                }
            }
            None => {
                warn!(
                    "No matching handler for request {} from {}; metadata: {:?}, payload: {}",
                    request.request_id,
                    source,
                    request.metadata,
                    describe_payload(&request.content)
                );
                NetworkResponse::no_matching_handler(&request)
            }
        };

        for listener in &traffic_listeners {
            listener.on_response_generated(&response, &request, &source);
        }
        response
    }

    async fn route_service_call(
        &self,
        request: &NetworkRequest,
    ) -> Result<NetworkResponse, CommunicationError> {
        let metadata = request.metadata();
        let hops = metadata.get_hop_count();
        let max_hops = self.shared.config.max_request_hops;
        if hops > max_hops {
            return Err(CommunicationError::HopLimitExceeded(max_hops));
        }

        let receiver = match metadata.get_receiver() {
            Some(receiver) if &receiver != self.own_node_id() => receiver,
            _ => return Ok(self.handle_local_request(request).await),
        };

        let connection = self
            .connection_to(&receiver)
            .ok_or_else(|| CommunicationError::NoConnection(receiver.clone()))?;
        let next_hop = hops.saturating_add(1);
        debug!(
            "Forwarding request {} to {} (hop {})",
            request.request_id, receiver, next_hop
        );
        let forwarded = NetworkRequest {
            request_id: request.request_id,
            content: request.content.clone(),
            metadata: metadata.hop_count(next_hop).into_map(),
        };
        let forwarding_timeout = self.shared.config.forwarding_timeout_ms;
        timeout(
            Duration::from_millis(forwarding_timeout),
            self.send_prepared(forwarded, &connection),
        )
        .await
        .map_err(|_| CommunicationError::Timeout(forwarding_timeout))?
    }

    // Servers

    /// Start accepting inbound connections on `contact_point`.
    pub fn start_server(
        &self,
        contact_point: &NetworkContactPoint,
    ) -> Result<Arc<ServerContactPoint>, CommunicationError> {
        let transport = self.transport(&contact_point.transport_id)?;
        let server = Arc::new(ServerContactPoint::new(
            contact_point.clone(),
            self.endpoint_handler(),
        ));
        transport.start_server(server.clone())?;
        server.set_accepting(true);
        self.shared.servers.lock().push(server.clone());
        info!("Started server at {}", contact_point);
        Ok(server)
    }

    pub fn stop_server(&self, server: &Arc<ServerContactPoint>) {
        server.set_accepting(false);
        if let Ok(transport) = self.transport(&server.contact_point().transport_id) {
            transport.stop_server(server);
        }
        self.shared
            .servers
            .lock()
            .retain(|running| !Arc::ptr_eq(running, server));
        info!("Stopped server at {}", server.contact_point());
    }

    /// Close every outgoing connection and stop every server.
    pub fn shutdown(&self) {
        self.close_all_outgoing_connections();
        let servers = self.shared.servers.lock().clone();
        for server in &servers {
            self.stop_server(server);
        }
    }

    // Health checks

    /// Schedule one jittered health check per live outgoing connection.
    pub fn trigger_connection_health_checks(&self) -> Vec<JoinHandle<()>> {
        let max_jitter = self.shared.config.health_check_max_jitter_ms;
        self.outgoing_connections()
            .into_iter()
            .map(|connection| {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter));
                let service = self.clone();
                tokio::spawn(async move {
                    sleep(jitter).await;
                    service.run_health_check(connection).await;
                })
            })
            .collect()
    }

    async fn run_health_check(&self, connection: ConnectionRef) {
        let id = connection.connection_id();
        let Some(state) = self.connection_state(&id) else {
            return;
        };
        let _in_progress = state.health_check_in_progress.lock().await;
        if !self.is_live(&id) {
            return;
        }

        if self.perform_connection_health_check(&connection).await {
            let previous_failures = state.reset_failures();
            if previous_failures > 0 {
                info!(
                    "Connection {} to {} passed its health check after {} previous failures",
                    id,
                    connection.remote_node_information().log_description(),
                    previous_failures
                );
            } else {
                debug!("Connection {} passed its health check", id);
            }
        } else {
            let failures = state.record_failure();
            warn!(
                "Connection {} to {} failed its health check ({} consecutive failures)",
                id,
                connection.remote_node_information().log_description(),
                failures
            );
            if failures >= self.shared.config.health_check_failure_limit {
                self.handle_broken_outgoing_connection(&connection);
            }
        }
    }

    /// Send a random token and expect it echoed back in time.
    ///
    /// A mismatching echo is logged but still counts as a pass.
    pub async fn perform_connection_health_check(&self, connection: &ConnectionRef) -> bool {
        let token = rand::thread_rng().gen::<u32>().to_string();
        let content = match model::serialize(&token) {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to encode health-check token: {}", e);
                return false;
            }
        };
        let metadata = MetaData::new()
            .category(MetaData::CATEGORY_HEALTH_CHECK)
            .sender(self.own_node_id())
            .into_map();

        let check_timeout = self.shared.config.health_check_timeout();
        match timeout(check_timeout, self.send_request(content, metadata, connection)).await {
            Ok(Ok(response)) if response.is_success() => {
                match model::deserialize::<String>(&response.content) {
                    Ok(echo) => {
                        if echo != token {
                            warn!(
                                "Health check on connection {} returned {} instead of {}",
                                connection.connection_id(),
                                echo,
                                token
                            );
                        }
                        true
                    }
                    Err(e) => {
                        warn!(
                            "Undecodable health-check response on connection {}: {}",
                            connection.connection_id(),
                            e
                        );
                        false
                    }
                }
            }
            Ok(Ok(response)) => {
                warn!(
                    "Health check on connection {} returned result code {:?}",
                    connection.connection_id(),
                    response.result_code()
                );
                false
            }
            Ok(Err(e)) => {
                debug!(
                    "Health check on connection {} failed: {}",
                    connection.connection_id(),
                    e
                );
                false
            }
            Err(_) => {
                debug!(
                    "Health check on connection {} timed out after {} ms",
                    connection.connection_id(),
                    check_timeout.as_millis()
                );
                false
            }
        }
    }

    /// Trigger health checks every configured interval until the service is dropped.
    pub fn spawn_health_check_timer(&self) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.config.health_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match Self::upgrade(&shared) {
                    Some(service) => {
                        service.trigger_connection_health_checks();
                    }
                    None => break,
                }
            }
        })
    }
}

/// Converts a broken-connection signal into a routing-exception response.
struct BrokenAwareResponseHandler {
    shared: Weak<Shared>,
    own_node_id: NodeIdentifier,
    connection: ConnectionRef,
    handler: Arc<dyn NetworkResponseHandler>,
}

impl RawResponseHandler for BrokenAwareResponseHandler {
    fn on_response_available(&self, response: NetworkResponse) {
        self.handler.on_response_available(response);
    }

    fn on_connection_broken(&self, request: &NetworkRequest) {
        if let Some(service) = NetworkConnectionService::upgrade(&self.shared) {
            service.handle_broken_outgoing_connection(&self.connection);
        }
        let cause = CommunicationError::ConnectionClosed(format!(
            "connection {} broke while waiting for a response",
            self.connection.connection_id()
        ));
        self.handler
            .on_response_available(NetworkResponse::exception_while_routing(
                request,
                &self.own_node_id,
                &cause.to_string(),
            ));
    }
}

struct OneshotResponseHandler {
    sender: Mutex<Option<oneshot::Sender<NetworkResponse>>>,
}

impl NetworkResponseHandler for OneshotResponseHandler {
    fn on_response_available(&self, response: NetworkResponse) {
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(response);
        }
    }
}

struct BrokenConnectionHandler {
    shared: Weak<Shared>,
}

impl BrokenConnectionListener for BrokenConnectionHandler {
    fn on_connection_broken(&self, connection: &ConnectionRef) {
        if connection.initiated_by_remote() {
            warn!(
                "Ignoring broken-connection event for remote-initiated connection {}",
                connection.connection_id()
            );
            return;
        }
        if let Some(service) = NetworkConnectionService::upgrade(&self.shared) {
            service.handle_broken_outgoing_connection(connection);
        }
    }
}

struct ServiceCallRouter {
    shared: Weak<Shared>,
}

#[async_trait]
impl NetworkRequestHandler for ServiceCallRouter {
    async fn handle_request(
        &self,
        request: &NetworkRequest,
        _source: &NodeIdentifier,
    ) -> Result<NetworkResponse, CommunicationError> {
        let service = NetworkConnectionService::upgrade(&self.shared)
            .ok_or_else(|| CommunicationError::Internal("node is shutting down".to_string()))?;
        service.route_service_call(request).await
    }
}

struct ConnectionEndpoint {
    shared: Weak<Shared>,
    own_node_id: NodeIdentifier,
}

#[async_trait]
impl EndpointHandler for ConnectionEndpoint {
    fn exchange_node_information(&self, remote: &NetworkNodeInformation) -> NetworkNodeInformation {
        match NetworkConnectionService::upgrade(&self.shared) {
            Some(service) => {
                service.shared.node_registry.update_from(remote);
                service.own_node_information().clone()
            }
            None => NetworkNodeInformation::new(self.own_node_id.clone()),
        }
    }

    fn on_remote_initiated_connection_established(&self, connection: ConnectionRef) {
        if !connection.initiated_by_remote() {
            error!(
                "Connection {} was reported as remote-initiated but is not",
                connection.connection_id()
            );
            return;
        }
        if let Some(service) = NetworkConnectionService::upgrade(&self.shared) {
            debug!(
                "Remote node {} opened connection {}",
                connection.remote_node_information().log_description(),
                connection.connection_id()
            );
            service.register_outgoing_connection(&connection);
        }
    }

    fn on_incoming_connection_closed(&self, connection: &ConnectionRef) {
        debug!("Incoming connection {} was closed", connection.connection_id());
        if let Some(service) = NetworkConnectionService::upgrade(&self.shared) {
            service.handle_broken_outgoing_connection(connection);
        }
    }

    async fn on_raw_request_received(
        &self,
        request: NetworkRequest,
        source: NodeIdentifier,
    ) -> NetworkResponse {
        match NetworkConnectionService::upgrade(&self.shared) {
            Some(service) => service.dispatch_incoming(request, source).await,
            None => NetworkResponse::exception_while_routing(
                &request,
                &self.own_node_id,
                "node is shutting down",
            ),
        }
    }

    async fn on_request_arrived_at_destination(&self, request: NetworkRequest) -> NetworkResponse {
        match NetworkConnectionService::upgrade(&self.shared) {
            Some(service) => service.handle_local_request(&request).await,
            None => NetworkResponse::exception_while_routing(
                &request,
                &self.own_node_id,
                "node is shutting down",
            ),
        }
    }
}
