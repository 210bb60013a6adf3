//! Graph — the in-memory DAG of Nodes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::model::Step;
use crate::node::{Node, NodeId, NodeSnapshot, NodeState};

/// An in-memory DAG: Nodes plus predecessor/successor adjacency.
pub struct Graph {
    nodes: Vec<Arc<Node>>,
    by_name: HashMap<String, NodeId>,
    predecessors: HashMap<NodeId, Vec<NodeId>>,
    successors: HashMap<NodeId, Vec<NodeId>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    /// Output variables published by finished Nodes, visible to later
    /// Nodes and lifecycle handlers. Append-only within a run.
    outputs: Mutex<HashMap<String, String>>,
}

impl Graph {
    /// Build a fresh Graph from a DAG's steps. Rejects duplicate step
    /// names, edges to nonexistent steps, and cycles (DFS gray/black
    /// coloring).
    pub fn build(steps: Vec<Step>) -> Result<Self, EngineError> {
        let mut by_name = HashMap::new();
        for (idx, step) in steps.iter().enumerate() {
            if by_name.insert(step.name.clone(), idx).is_some() {
                return Err(EngineError::DuplicateStepName(step.name.clone()));
            }
        }

        let mut predecessors: HashMap<NodeId, Vec<NodeId>> =
            (0..steps.len()).map(|i| (i, Vec::new())).collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            (0..steps.len()).map(|i| (i, Vec::new())).collect();

        for (idx, step) in steps.iter().enumerate() {
            for dep in &step.depends {
                let dep_id = by_name.get(dep).ok_or_else(|| EngineError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                })?;
                predecessors.get_mut(&idx).unwrap().push(*dep_id);
                successors.get_mut(dep_id).unwrap().push(idx);
            }
        }

        detect_cycle(&successors, steps.len())?;

        let nodes = steps
            .into_iter()
            .enumerate()
            .map(|(idx, step)| Arc::new(Node::new(idx, step)))
            .collect();

        Ok(Self {
            nodes,
            by_name,
            predecessors,
            successors,
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
            outputs: Mutex::new(HashMap::new()),
        })
    }

    /// Rehydrate a Graph from a prior run's node snapshots, resetting
    /// every non-terminal non-`Skipped` node to `None` while preserving
    /// `Success` and `Skipped` (used when retrying a failed run).
    pub fn build_for_retry(
        steps: Vec<Step>,
        snapshots: &HashMap<String, NodeSnapshot>,
    ) -> Result<Self, EngineError> {
        let mut by_name = HashMap::new();
        for (idx, step) in steps.iter().enumerate() {
            if by_name.insert(step.name.clone(), idx).is_some() {
                return Err(EngineError::DuplicateStepName(step.name.clone()));
            }
        }

        let mut predecessors: HashMap<NodeId, Vec<NodeId>> =
            (0..steps.len()).map(|i| (i, Vec::new())).collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> =
            (0..steps.len()).map(|i| (i, Vec::new())).collect();

        for (idx, step) in steps.iter().enumerate() {
            for dep in &step.depends {
                let dep_id = by_name.get(dep).ok_or_else(|| EngineError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                })?;
                predecessors.get_mut(&idx).unwrap().push(*dep_id);
                successors.get_mut(dep_id).unwrap().push(idx);
            }
        }

        detect_cycle(&successors, steps.len())?;

        let nodes = steps
            .into_iter()
            .enumerate()
            .map(|(idx, step)| {
                let snap = snapshots.get(&step.name);
                match snap {
                    Some(s) => Arc::new(Node::from_snapshot(idx, step, s)),
                    None => Arc::new(Node::new(idx, step)),
                }
            })
            .collect();

        Ok(Self {
            nodes,
            by_name,
            predecessors,
            successors,
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
            outputs: Mutex::new(HashMap::new()),
        })
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Arc<Node>> {
        self.by_name.get(name).map(|id| &self.nodes[*id])
    }

    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.predecessors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.successors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub async fn mark_started(&self) {
        let mut started = self.started_at.lock().await;
        if started.is_none() {
            *started = Some(Utc::now());
        }
    }

    pub async fn mark_finished(&self) {
        *self.finished_at.lock().await = Some(Utc::now());
    }

    pub async fn started(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().await
    }

    pub async fn finished(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock().await
    }

    pub async fn is_running(&self) -> bool {
        for node in &self.nodes {
            if node.state().await == NodeState::Running {
                return true;
            }
        }
        false
    }

    /// Publish a Node's captured output variables so successors and
    /// lifecycle handlers can interpolate them.
    pub async fn publish_output(&self, kv: HashMap<String, String>) {
        let mut outputs = self.outputs.lock().await;
        outputs.extend(kv);
    }

    pub async fn outputs(&self) -> HashMap<String, String> {
        self.outputs.lock().await.clone()
    }

    pub async fn snapshots(&self) -> HashMap<String, NodeSnapshot> {
        let mut out = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            out.insert(node.step.name.clone(), node.snapshot().await);
        }
        out
    }
}

/// DFS with gray/black coloring: gray = on the current recursion stack,
/// black = fully explored. A back-edge to a gray node means a cycle.
fn detect_cycle(successors: &HashMap<NodeId, Vec<NodeId>>, n: usize) -> Result<(), EngineError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color = vec![Color::White; n];

    fn visit(
        id: NodeId,
        successors: &HashMap<NodeId, Vec<NodeId>>,
        color: &mut Vec<Color>,
    ) -> Result<(), EngineError> {
        color[id] = Color::Gray;
        if let Some(next) = successors.get(&id) {
            for &succ in next {
                match color[succ] {
                    Color::Gray => return Err(EngineError::CycleDetected),
                    Color::White => visit(succ, successors, color)?,
                    Color::Black => {}
                }
            }
        }
        color[id] = Color::Black;
        Ok(())
    }

    for id in 0..n {
        if color[id] == Color::White {
            visit(id, successors, &mut color)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Step;

    fn step(name: &str, depends: &[&str]) -> Step {
        Step {
            name: name.to_string(),
            command: Some("true".to_string()),
            args: vec![],
            script: None,
            dir: None,
            env: HashMap::new(),
            depends: depends.iter().map(|s| s.to_string()).collect(),
            retry: Default::default(),
            repeat: Default::default(),
            continue_on: Default::default(),
            preconditions: vec![],
            timeout_secs: None,
            signal_on_stop: None,
            output: None,
        }
    }

    #[test]
    fn linear_dag_builds() {
        let graph = Graph::build(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
        ])
        .unwrap();
        assert_eq!(graph.nodes().len(), 3);
        assert_eq!(graph.predecessors(1), &[0]);
        assert_eq!(graph.successors(0), &[1]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let err = Graph::build(vec![step("a", &[]), step("a", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateStepName(n) if n == "a"));
    }

    #[test]
    fn dangling_dependency_rejected() {
        let err = Graph::build(vec![step("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDependency { dependency, .. } if dependency == "ghost"));
    }

    #[test]
    fn cycle_rejected() {
        let err = Graph::build(vec![step("a", &["b"]), step("b", &["a"])]).unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected));
    }

    #[test]
    fn diamond_dag_builds() {
        let graph = Graph::build(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ])
        .unwrap();
        assert_eq!(graph.predecessors(3).len(), 2);
    }
}
