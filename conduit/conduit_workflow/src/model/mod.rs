//! Workflow data model.

pub mod description;
pub mod information;

pub use description::{ComponentDescription, Connection, WorkflowDescription, WorkflowNode};
pub use information::{ComponentInstanceDescriptor, WorkflowInformation};
