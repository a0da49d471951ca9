//! Contract between the connection manager and pluggable transports.
//!
//! A transport provides [`NetworkConnection`]s; the core provides the
//! [`EndpointHandler`] and [`BrokenConnectionListener`] the transport calls
//! back into.

use crate::model::{NetworkContactPoint, NetworkRequest, NetworkResponse};
use async_trait::async_trait;
use conduit_core::{CommunicationError, ConnectionId, NetworkNodeInformation, NodeIdentifier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to a live connection.
pub type ConnectionRef = Arc<dyn NetworkConnection>;

/// A live logical channel to exactly one remote node.
pub trait NetworkConnection: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    /// True for the passive side of a connection some other node opened.
    fn initiated_by_remote(&self) -> bool;

    fn remote_node_information(&self) -> NetworkNodeInformation;

    /// Send without waiting. The transport reports exactly one of a response
    /// or a broken connection to `handler`.
    fn send_request(
        &self,
        request: NetworkRequest,
        handler: Arc<dyn RawResponseHandler>,
        timeout: Duration,
    );

    fn close(&self);
}

/// Receives the transport-level result of one request.
pub trait RawResponseHandler: Send + Sync {
    fn on_response_available(&self, response: NetworkResponse);

    fn on_connection_broken(&self, request: &NetworkRequest);
}

/// Notified once per connection failure.
pub trait BrokenConnectionListener: Send + Sync {
    fn on_connection_broken(&self, connection: &ConnectionRef);
}

/// Callbacks the transport invokes on the node that owns a connection endpoint.
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    /// Handshake: record the remote node's information and return our own.
    fn exchange_node_information(&self, remote: &NetworkNodeInformation) -> NetworkNodeInformation;

    fn on_remote_initiated_connection_established(&self, connection: ConnectionRef);

    fn on_incoming_connection_closed(&self, connection: &ConnectionRef);

    async fn on_raw_request_received(
        &self,
        request: NetworkRequest,
        source: NodeIdentifier,
    ) -> NetworkResponse;

    async fn on_request_arrived_at_destination(&self, request: NetworkRequest) -> NetworkResponse;
}

/// A pluggable transport.
#[async_trait]
pub trait NetworkTransportProvider: Send + Sync {
    fn transport_id(&self) -> &str;

    async fn connect(
        &self,
        contact_point: &NetworkContactPoint,
        own_node_information: &NetworkNodeInformation,
        allow_duplex: bool,
        endpoint_handler: Arc<dyn EndpointHandler>,
        broken_connection_listener: Arc<dyn BrokenConnectionListener>,
    ) -> Result<ConnectionRef, CommunicationError>;

    fn supports_remote_initiated_connections(&self) -> bool;

    fn start_server(&self, server: Arc<ServerContactPoint>) -> Result<(), CommunicationError>;

    fn stop_server(&self, server: &ServerContactPoint);
}

/// A contact point this node accepts inbound connections on.
pub struct ServerContactPoint {
    contact_point: NetworkContactPoint,
    endpoint_handler: Arc<dyn EndpointHandler>,
    accepting: AtomicBool,
}

impl ServerContactPoint {
    pub fn new(contact_point: NetworkContactPoint, endpoint_handler: Arc<dyn EndpointHandler>) -> Self {
        Self {
            contact_point,
            endpoint_handler,
            accepting: AtomicBool::new(false),
        }
    }

    pub fn contact_point(&self) -> &NetworkContactPoint {
        &self.contact_point
    }

    pub fn endpoint_handler(&self) -> &Arc<dyn EndpointHandler> {
        &self.endpoint_handler
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Also used to simulate a crashed node in tests.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ServerContactPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContactPoint")
            .field("contact_point", &self.contact_point)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
