//! Error types for the Conduit system.
//!
//! Each subsystem has its own error enum; the root [`Error`] wraps all of
//! them for uniform handling at the top level. [`WorkflowError`] and
//! [`ServiceError`] are serializable because they travel inside
//! exception-at-destination responses and are re-raised on the calling node.

use crate::id::{ComponentInstanceId, WorkflowInstanceId};
use crate::node::NodeIdentifier;
use crate::types::WorkflowState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root error type for Conduit.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport and connection errors
    #[error("Communication error: {0}")]
    Communication(#[from] CommunicationError),

    /// Workflow lifecycle and registry errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Errors raised by a called service
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors related to transports and connections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommunicationError {
    /// No transport provider is registered for the id
    #[error("Unknown transport id: {0}")]
    UnknownTransport(String),

    /// A transport provider with the same id is already registered
    #[error("Duplicate transport provider registration: {0}")]
    DuplicateTransport(String),

    /// Removal of a transport provider that was never registered
    #[error("Transport provider not registered: {0}")]
    TransportNotRegistered(String),

    /// The transport failed to establish a connection
    #[error("Failed to connect to {contact_point}: {reason}")]
    ConnectFailed {
        contact_point: String,
        reason: String,
    },

    /// The connection was closed or broke while in use
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// No response arrived within the allotted time
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// There is no live connection to the node
    #[error("No connection to node {0}")]
    NoConnection(NodeIdentifier),

    /// A contact point string could not be parsed
    #[error("Invalid contact point: {0}")]
    InvalidContactPoint(String),

    /// The request travelled more hops than allowed
    #[error("Request exceeded {0} hops")]
    HopLimitExceeded(u32),

    /// Payload (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Background task failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CommunicationError {
    fn from(err: serde_json::Error) -> Self {
        CommunicationError::Serialization(err.to_string())
    }
}

/// Errors related to workflow instances and registries.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowError {
    /// A lifecycle operation was requested in the wrong state
    #[error("Cannot {operation} workflow: state must be {required}, but is {actual}")]
    StateConflict {
        operation: String,
        required: String,
        actual: WorkflowState,
    },

    /// The caller is not the owner of the workflow instance
    #[error("User {0} is not authorized to access this workflow")]
    NotAuthorized(String),

    /// The presented credentials are not valid
    #[error("Invalid user: {0}")]
    InvalidUser(String),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),

    #[error("Component instance not found: {0}")]
    ComponentNotFound(ComponentInstanceId),

    /// The workflow description is inconsistent
    #[error("Invalid workflow description: {0}")]
    InvalidDescription(String),

    #[error("Instantiation failed: {0}")]
    InstantiationFailed(String),

    /// A component controller failed during a lifecycle phase
    #[error("Component failed: {0}")]
    ComponentFailed(String),

    /// The remote node could not be reached
    #[error("Communication failure: {0}")]
    Communication(String),

    /// The instance's command queue is no longer running
    #[error("Command queue of workflow {0} is closed")]
    QueueClosed(WorkflowInstanceId),
}

/// Errors raised by a service invoked through a service call.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown method {method} on service {service}")]
    UnknownMethod { service: String, method: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The call never reached its destination
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors in node configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
