//! Workflow registries.
//!
//! [`LocalWorkflowRegistry`] owns the instances hosted by this node;
//! [`DistributedWorkflowRegistry`] delegates to the registry of any node and
//! aggregates instance information across the network.

pub mod distributed;
pub mod local;

pub use distributed::DistributedWorkflowRegistry;
pub use local::LocalWorkflowRegistry;

use crate::model::{WorkflowDescription, WorkflowInformation};
use async_trait::async_trait;
use conduit_core::{User, WorkflowError, WorkflowInstanceId};
use std::collections::BTreeMap;

/// Registry of the workflow instances hosted by one node.
#[async_trait]
pub trait WorkflowRegistry: Send + Sync {
    /// Instantiate `description` for `user` and bring it to `READY`.
    async fn create_workflow_instance(
        &self,
        user: &User,
        description: &WorkflowDescription,
        name: Option<String>,
        configuration: BTreeMap<String, String>,
    ) -> Result<WorkflowInformation, WorkflowError>;

    /// Dispose an instance owned by `user`. Unknown identifiers are ignored.
    async fn dispose_workflow_instance(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
    ) -> Result<(), WorkflowError>;

    async fn workflow_information(
        &self,
        user: &User,
        id: &WorkflowInstanceId,
    ) -> Result<Option<WorkflowInformation>, WorkflowError>;

    /// Information of every instance owned by `user`.
    async fn workflow_informations(
        &self,
        user: &User,
    ) -> Result<Vec<WorkflowInformation>, WorkflowError>;

    async fn is_creator(&self, id: &WorkflowInstanceId, user: &User)
        -> Result<bool, WorkflowError>;
}
