//! Observer interfaces for connection and traffic events.

use crate::model::{NetworkRequest, NetworkResponse};
use crate::transport::ConnectionRef;
use conduit_core::NodeIdentifier;

pub trait NetworkConnectionListener: Send + Sync {
    fn on_outgoing_connection_established(&self, connection: &ConnectionRef);

    fn on_outgoing_connection_terminated(&self, connection: &ConnectionRef);
}

pub trait NetworkTrafficListener: Send + Sync {
    fn on_request_received(&self, request: &NetworkRequest, source: &NodeIdentifier);

    fn on_response_generated(
        &self,
        response: &NetworkResponse,
        request: &NetworkRequest,
        source: &NodeIdentifier,
    );
}

/// Caller-side callback for one response.
pub trait NetworkResponseHandler: Send + Sync {
    fn on_response_available(&self, response: NetworkResponse);
}

impl<F> NetworkResponseHandler for F
where
    F: Fn(NetworkResponse) + Send + Sync,
{
    fn on_response_available(&self, response: NetworkResponse) {
        self(response)
    }
}
