//! # Conduit Workflow
//!
//! Workflow orchestration on top of the Conduit network: the instance state
//! machine with its serial command queue, topic-based notifications, the
//! component controller contract with an in-process component host, and the
//! local and distributed workflow registries.

pub mod component;
pub mod host;
pub mod instance;
pub mod model;
pub mod notification;
pub mod registry;
pub mod remote;

pub use component::{
    ComponentController, ComponentInstantiation, ComponentRegistry, DistributedComponentRegistry,
    OutputBinding,
};
pub use host::{Component, ComponentFactory, ComponentHost, HostedComponent};
pub use instance::{authorize, WorkflowControl, WorkflowInstance};
pub use model::{
    ComponentDescription, ComponentInstanceDescriptor, Connection, WorkflowDescription,
    WorkflowInformation, WorkflowNode,
};
pub use notification::{LocalNotificationService, Notification, NotificationService, Subscription};
pub use registry::{DistributedWorkflowRegistry, LocalWorkflowRegistry, WorkflowRegistry};
pub use remote::{
    ComponentRegistryService, NotificationRelay, NotificationRelayService, RemoteWorkflowInstance,
    WorkflowRegistryService, COMPONENT_REGISTRY_SERVICE, NOTIFICATION_SERVICE,
    WORKFLOW_REGISTRY_SERVICE,
};
