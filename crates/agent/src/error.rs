//! Typed error type for the `agent` crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("DAG '{0}' is already running")]
    AlreadyRunning(String),

    #[error("no token secret available from any provider")]
    NoTokenSecret,
}
