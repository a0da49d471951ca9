//! Typed service calls to a node.

use crate::manager::NetworkConnectionService;
use crate::model::{self, CallOutcome, MetaData, NetworkRequest};
use crate::service::ServiceCall;
use conduit_core::NodeIdentifier;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

/// Invokes [`RemotableService`](crate::service::RemotableService) methods on
/// any node, including this one.
#[derive(Clone)]
pub struct ServiceCaller {
    connections: NetworkConnectionService,
}

impl ServiceCaller {
    pub fn new(connections: NetworkConnectionService) -> Self {
        Self { connections }
    }

    pub fn own_node_id(&self) -> &NodeIdentifier {
        self.connections.own_node_id()
    }

    pub fn is_local(&self, node: &NodeIdentifier) -> bool {
        node == self.own_node_id()
    }

    /// Call `service.method(arguments)` on `node`.
    ///
    /// Calls addressed to this node skip the network and go straight to the
    /// local payload handler.
    pub async fn call<T: DeserializeOwned>(
        &self,
        node: &NodeIdentifier,
        service: &str,
        method: &str,
        arguments: Vec<Value>,
    ) -> CallOutcome<T> {
        let call = ServiceCall {
            target_node: node.clone(),
            calling_node: self.own_node_id().clone(),
            service: service.to_string(),
            method: method.to_string(),
            arguments,
        };
        let content = match model::serialize(&call) {
            Ok(content) => content,
            Err(e) => return CallOutcome::RoutingError(e.to_string()),
        };
        let metadata = MetaData::new()
            .category(MetaData::CATEGORY_SERVICE_CALL)
            .sender(self.own_node_id())
            .receiver(node)
            .hop_count(0)
            .into_map();

        if self.is_local(node) {
            let request = NetworkRequest::new(content, metadata);
            return self
                .connections
                .handle_local_request(&request)
                .await
                .into_outcome();
        }

        let Some(connection) = self.connections.connection_to(node) else {
            return CallOutcome::RoutingError(format!("no connection to node {}", node));
        };
        debug!("Calling {}.{} on {}", service, method, node);

        let request_timeout = self.connections.config().request_timeout();
        let pending = self.connections.send_request(content, metadata, &connection);
        match timeout(request_timeout, pending).await {
            Ok(Ok(response)) => response.into_outcome(),
            Ok(Err(e)) => CallOutcome::RoutingError(e.to_string()),
            Err(_) => CallOutcome::RoutingError(format!(
                "no response from {} within {} ms",
                node,
                request_timeout.as_millis()
            )),
        }
    }
}
