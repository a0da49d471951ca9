//! # Conduit Core
//!
//! `conduit_core` holds the vocabulary shared by every Conduit crate: typed
//! identifiers, node identity and the node information registry, users,
//! the lifecycle state enums, communication settings, and the error
//! hierarchy.
//!
//! ## Crate Structure
//!
//! - **id**: Strongly-typed identifier types
//! - **node**: Node identity, published node information and its registry
//! - **user**: Credentials presented to lifecycle operations
//! - **types**: Workflow and component lifecycle states
//! - **config**: Communication tunables and the node configuration provider
//! - **error**: Error types for all Conduit components

pub mod config;
pub mod error;
pub mod id;
pub mod node;
pub mod types;
pub mod user;

pub use config::{CommunicationConfig, NodeConfigurationProvider};
pub use error::{
    CommunicationError, ConfigError, Error, Result, ServiceError, WorkflowError,
};
pub use id::{ComponentInstanceId, ConnectionId, RequestId, WorkflowInstanceId};
pub use node::{NetworkNodeInformation, NodeIdentifier, NodeInformationRegistry};
pub use types::{ComponentState, WorkflowState};
pub use user::User;
