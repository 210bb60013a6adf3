//! Engine-level error types.

use thiserror::Error;

/// Errors produced while building or validating a DAG's graph.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("duplicate step name: '{0}'")]
    DuplicateStepName(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("DAG graph contains a cycle")]
    CycleDetected,

    #[error("executor error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
