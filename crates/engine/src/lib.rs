//! `engine` crate — the in-process DAG execution engine:
//! Graph, Node, Scheduler, plus the precondition/interpolation helpers
//! they share. Persistence and process supervision are layered above this
//! crate by `store` and `agent` respectively — the engine itself only
//! knows how to drive one Graph to a terminal status and, optionally,
//! stream Node state changes out through a channel.

pub mod error;
pub mod graph;
pub mod interpolate;
pub mod model;
pub mod node;
pub mod scheduler;

pub use error::EngineError;
pub use graph::Graph;
pub use model::{
    ContinueOn, Dag, Handlers, Precondition, RepeatMode, RepeatPolicy, RetryPolicy, Schedule,
    Step, TriggerKind,
};
pub use node::{Node, NodeId, NodeSnapshot, NodeState};
pub use scheduler::{RunStatus, Scheduler, SchedulerConfig};
