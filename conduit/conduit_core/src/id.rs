//! Strongly-typed identifiers.
//!
//! Every identifier is a UUID wrapped in [`Id`] with a phantom marker so a
//! workflow instance id can never be passed where a connection id is
//! expected.
//!
//! ```
//! use conduit_core::id::{ConnectionId, WorkflowInstanceId};
//! use std::str::FromStr;
//!
//! let id_str = "550e8400-e29b-41d4-a716-446655440000";
//! let workflow = WorkflowInstanceId::from_str(id_str).unwrap();
//! assert_eq!(workflow.to_string(), id_str);
//! assert!(!ConnectionId::new().is_nil());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: std::marker::PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID, e.g. one received over the wire.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: std::marker::PhantomData,
        }
    }

    /// Get the underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The all-zero identifier.
    pub fn nil() -> Self {
        Self::from_uuid(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.uuid.is_nil()
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

/// Marker type for workflow instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowInstanceMarker;
/// Identifier for one live workflow instance.
pub type WorkflowInstanceId = Id<WorkflowInstanceMarker>;

/// Marker type for component instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentInstanceMarker;
/// Identifier for one instantiated component of a workflow.
pub type ComponentInstanceId = Id<ComponentInstanceMarker>;

/// Marker type for network connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionMarker;
/// Identifier for a logical connection to a remote node.
pub type ConnectionId = Id<ConnectionMarker>;

/// Marker type for network requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestMarker;
/// Identifier correlating a request with its response.
pub type RequestId = Id<RequestMarker>;
