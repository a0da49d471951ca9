//! # Conduit Network
//!
//! Node-to-node communication: the connection manager with active health
//! checks, the request-handler chain, the service-call payload handler and
//! typed service calls, plus the transport contract and an in-process
//! transport.

pub mod caller;
pub mod handler;
pub mod listener;
pub mod manager;
pub mod model;
pub mod service;
pub mod transport;
pub mod virtual_transport;

pub use caller::ServiceCaller;
pub use handler::{category_predicate, NetworkRequestHandler, RequestHandlerChain};
pub use listener::{NetworkConnectionListener, NetworkResponseHandler, NetworkTrafficListener};
pub use manager::{ConnectionState, NetworkConnectionService, ResponseFuture};
pub use model::{
    CallOutcome, MetaData, NetworkContactPoint, NetworkRequest, NetworkResponse, ResultCode,
};
pub use service::{
    RemotableService, RequestPayloadHandler, ServiceCall, ServiceCallPayloadHandler,
    ServiceRegistry,
};
pub use transport::{
    BrokenConnectionListener, ConnectionRef, EndpointHandler, NetworkConnection,
    NetworkTransportProvider, RawResponseHandler, ServerContactPoint,
};
pub use virtual_transport::{VirtualTransportProvider, VIRTUAL_TRANSPORT_ID};
