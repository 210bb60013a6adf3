//! `executor` crate — the narrow capability boundary for running one step
//! attempt, plus the cooperative cancellation token shared by
//! the engine's Scheduler and Node.

pub mod cancel;
pub mod error;
pub mod local;
pub mod signal;

pub use cancel::CancelToken;
pub use error::ExecutorError;
pub use local::{Backend, ExecOutcome, ExecRequest, LocalExecutor};
pub use signal::Signal;
