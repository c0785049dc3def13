// Workflow-specific failures, folded into the runtime taxonomy at the
// run-scope boundary.

use runloom_runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("step name must not be empty")]
    EmptyStepName,

    #[error("step '{0}' is already registered")]
    DuplicateStep(String),

    #[error("step name '{0}' is a reserved directive")]
    ReservedStep(String),

    #[error("step '{0}' does not exist")]
    UnknownStep(String),

    #[error("workflow '{0}' has no steps")]
    NoSteps(String),
}

impl From<WorkflowError> for RuntimeError {
    fn from(err: WorkflowError) -> Self {
        RuntimeError::Workflow {
            message: err.to_string(),
        }
    }
}
