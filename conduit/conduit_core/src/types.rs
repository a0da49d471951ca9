//! Lifecycle states shared between the orchestrator and component controllers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Init,
    Ready,
    Preparing,
    Running,
    Pausing,
    Paused,
    Resuming,
    Canceling,
    Canceled,
    Finished,
    Failed,
    Disposing,
    Disposed,
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Init => "INIT",
            WorkflowState::Ready => "READY",
            WorkflowState::Preparing => "PREPARING",
            WorkflowState::Running => "RUNNING",
            WorkflowState::Pausing => "PAUSING",
            WorkflowState::Paused => "PAUSED",
            WorkflowState::Resuming => "RESUMING",
            WorkflowState::Canceling => "CANCELING",
            WorkflowState::Canceled => "CANCELED",
            WorkflowState::Finished => "FINISHED",
            WorkflowState::Failed => "FAILED",
            WorkflowState::Disposing => "DISPOSING",
            WorkflowState::Disposed => "DISPOSED",
        }
    }

    /// States from which `dispose` is allowed.
    pub fn is_disposable(&self) -> bool {
        matches!(
            self,
            WorkflowState::Finished | WorkflowState::Canceled | WorkflowState::Failed
        )
    }

    /// States a cancel request can no longer act on.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            WorkflowState::Canceled
                | WorkflowState::Finished
                | WorkflowState::Disposing
                | WorkflowState::Disposed
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one component instance as reported by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    Instantiated,
    Prepared,
    Running,
    Paused,
    Canceled,
    Finished,
    Failed,
    Disposed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
