//! Typed error type for the `queue` crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("queue '{0}' is empty")]
    Empty(String),
}
