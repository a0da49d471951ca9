//! In-process transport connecting nodes that live in the same process.
//!
//! Servers are looked up by contact point in a table owned by the provider, so
//! every node that should reach another must share one provider instance.

use crate::model::{NetworkContactPoint, NetworkRequest, NetworkResponse};
use crate::transport::{
    BrokenConnectionListener, ConnectionRef, EndpointHandler, NetworkConnection,
    NetworkTransportProvider, RawResponseHandler, ServerContactPoint,
};
use async_trait::async_trait;
use conduit_core::{CommunicationError, ConnectionId, NetworkNodeInformation, NodeIdentifier};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub const VIRTUAL_TRANSPORT_ID: &str = "virtual";

pub struct VirtualTransportProvider {
    supports_duplex: bool,
    servers: RwLock<HashMap<NetworkContactPoint, Arc<ServerContactPoint>>>,
}

impl VirtualTransportProvider {
    pub fn new(supports_duplex: bool) -> Self {
        Self {
            supports_duplex,
            servers: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl NetworkTransportProvider for VirtualTransportProvider {
    fn transport_id(&self) -> &str {
        VIRTUAL_TRANSPORT_ID
    }

    async fn connect(
        &self,
        contact_point: &NetworkContactPoint,
        own_node_information: &NetworkNodeInformation,
        allow_duplex: bool,
        endpoint_handler: Arc<dyn EndpointHandler>,
        broken_connection_listener: Arc<dyn BrokenConnectionListener>,
    ) -> Result<ConnectionRef, CommunicationError> {
        let server = self
            .servers
            .read()
            .get(contact_point)
            .cloned()
            .ok_or_else(|| CommunicationError::ConnectFailed {
                contact_point: contact_point.to_string(),
                reason: "no server registered".to_string(),
            })?;
        if !server.is_accepting() {
            return Err(CommunicationError::ConnectFailed {
                contact_point: contact_point.to_string(),
                reason: "server is not accepting connections".to_string(),
            });
        }

        let remote_information = server
            .endpoint_handler()
            .exchange_node_information(own_node_information);

        let active = VirtualConnection::new(
            remote_information.clone(),
            own_node_information.node_id.clone(),
            false,
            server.endpoint_handler().clone(),
            Some(Arc::downgrade(&server)),
            Some(broken_connection_listener),
        );

        if allow_duplex && self.supports_duplex {
            let passive = VirtualConnection::new(
                own_node_information.clone(),
                remote_information.node_id.clone(),
                true,
                endpoint_handler,
                None,
                None,
            );
            server
                .endpoint_handler()
                .on_remote_initiated_connection_established(passive);
        }

        Ok(active)
    }

    fn supports_remote_initiated_connections(&self) -> bool {
        self.supports_duplex
    }

    fn start_server(&self, server: Arc<ServerContactPoint>) -> Result<(), CommunicationError> {
        let mut servers = self.servers.write();
        let contact_point = server.contact_point().clone();
        if servers.contains_key(&contact_point) {
            return Err(CommunicationError::ConnectFailed {
                contact_point: contact_point.to_string(),
                reason: "address already in use".to_string(),
            });
        }
        servers.insert(contact_point, server);
        Ok(())
    }

    fn stop_server(&self, server: &ServerContactPoint) {
        self.servers.write().remove(server.contact_point());
    }
}

/// One direction of an in-process connection.
pub struct VirtualConnection {
    id: ConnectionId,
    remote_information: NetworkNodeInformation,
    local_node_id: NodeIdentifier,
    initiated_by_remote: bool,
    remote_endpoint: Arc<dyn EndpointHandler>,
    // None for passive connections, whose remote side has no server
    remote_server: Option<Weak<ServerContactPoint>>,
    broken_listener: Option<Arc<dyn BrokenConnectionListener>>,
    closed: AtomicBool,
    broken_reported: AtomicBool,
    self_ref: Weak<VirtualConnection>,
}

impl VirtualConnection {
    fn new(
        remote_information: NetworkNodeInformation,
        local_node_id: NodeIdentifier,
        initiated_by_remote: bool,
        remote_endpoint: Arc<dyn EndpointHandler>,
        remote_server: Option<Weak<ServerContactPoint>>,
        broken_listener: Option<Arc<dyn BrokenConnectionListener>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: ConnectionId::new(),
            remote_information,
            local_node_id,
            initiated_by_remote,
            remote_endpoint,
            remote_server,
            broken_listener,
            closed: AtomicBool::new(false),
            broken_reported: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    fn remote_reachable(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match &self.remote_server {
            Some(server) => server
                .upgrade()
                .map(|server| server.is_accepting())
                .unwrap_or(false),
            None => true,
        }
    }

    fn report_broken(&self) {
        if self.broken_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(listener), Some(connection)) = (&self.broken_listener, self.self_ref.upgrade())
        {
            let connection: ConnectionRef = connection;
            listener.on_connection_broken(&connection);
        }
    }
}

impl NetworkConnection for VirtualConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn initiated_by_remote(&self) -> bool {
        self.initiated_by_remote
    }

    fn remote_node_information(&self) -> NetworkNodeInformation {
        self.remote_information.clone()
    }

    fn send_request(
        &self,
        request: NetworkRequest,
        handler: Arc<dyn RawResponseHandler>,
        request_timeout: Duration,
    ) {
        if !self.remote_reachable() {
            debug!("Virtual connection {} is broken", self.id);
            handler.on_connection_broken(&request);
            self.report_broken();
            return;
        }

        let remote_endpoint = self.remote_endpoint.clone();
        let source = self.local_node_id.clone();
        tokio::spawn(async move {
            let delivered = timeout(
                request_timeout,
                remote_endpoint.on_raw_request_received(request.clone(), source.clone()),
            )
            .await;
            match delivered {
                Ok(response) => handler.on_response_available(response),
                Err(_) => handler.on_response_available(NetworkResponse::exception_while_routing(
                    &request,
                    &source,
                    &format!("no response within {} ms", request_timeout.as_millis()),
                )),
            }
        });
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed virtual connection {}", self.id);
        }
    }
}
