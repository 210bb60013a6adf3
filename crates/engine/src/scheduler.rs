//! Per-run scheduler: drives a [`Graph`] to a terminal run
//! status by repeatedly scanning for ready Nodes and dispatching them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use executor::{Backend, CancelToken, ExecRequest, Signal};

use crate::graph::Graph;
use crate::interpolate::{check_precondition, interpolate, interpolate_env};
use crate::model::{Dag, Handlers, RepeatMode, RepeatPolicy, RetryPolicy, Step};
use crate::node::{Node, NodeSnapshot, NodeState};

/// The run-level status the scheduler converges to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    None,
    Running,
    Success,
    Error,
    Cancel,
}

/// Tuning knobs for the scheduling loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// `0` means unbounded.
    pub max_active_steps: u32,
    /// Delay between launching two newly-ready Nodes in the same scan.
    pub inter_launch_delay: Duration,
    /// Pause between scans of the Node set.
    pub poll_interval: Duration,
    /// Grace period between the configured stop signal and SIGKILL.
    pub cleanup_window: Duration,
    pub run_id: String,
    pub log_dir: std::path::PathBuf,
}

impl SchedulerConfig {
    pub fn from_dag(dag: &Dag, run_id: String, log_dir: std::path::PathBuf) -> Self {
        Self {
            max_active_steps: dag.max_active_steps,
            inter_launch_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
            cleanup_window: Duration::from_secs(30),
            run_id,
            log_dir,
        }
    }
}

/// Everything a spawned per-Node task needs, independent of the
/// `Scheduler` it was launched from. Cheap to clone — every field is
/// either `Arc`-backed or small.
#[derive(Clone)]
struct NodeTaskCtx {
    graph: Arc<Graph>,
    dag_env: HashMap<String, String>,
    backend: Arc<dyn Backend>,
    cleanup_window: Duration,
    scheduler_cancel: CancelToken,
    running: Arc<Mutex<HashSet<usize>>>,
    events: Option<tokio::sync::mpsc::UnboundedSender<NodeSnapshot>>,
}

impl NodeTaskCtx {
    async fn emit(&self, node: &Node) {
        if let Some(tx) = &self.events {
            let _ = tx.send(node.snapshot().await);
        }
    }
}

/// Drives one Graph to completion. Construct one Scheduler per run.
pub struct Scheduler {
    graph: Arc<Graph>,
    dag_env: HashMap<String, String>,
    backend: Arc<dyn Backend>,
    config: SchedulerConfig,
    cancel: CancelToken,
    /// Ids of Nodes with a task currently in flight, for the concurrency cap.
    running: Arc<Mutex<HashSet<usize>>>,
    /// Streams a snapshot of every Node whenever its state changes, so an
    /// Agent's status writer can persist incremental progress.
    events: Option<tokio::sync::mpsc::UnboundedSender<NodeSnapshot>>,
}

impl Scheduler {
    pub fn new(
        graph: Arc<Graph>,
        dag_env: HashMap<String, String>,
        backend: Arc<dyn Backend>,
        config: SchedulerConfig,
        events: Option<tokio::sync::mpsc::UnboundedSender<NodeSnapshot>>,
    ) -> Self {
        Self {
            graph,
            dag_env,
            backend,
            config,
            cancel: CancelToken::new(),
            running: Arc::new(Mutex::new(HashSet::new())),
            events,
        }
    }

    /// Cooperative run-level cancellation. Idempotent.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Forward `sig` to every Node that is not mid-repeat; repeating Nodes
    /// finish their current attempt then stop. `Cancel()` is `Signal(Term)`
    /// followed by marking the scheduler cancelled.
    pub async fn signal(&self, sig: Signal) {
        if matches!(sig, Signal::Term | Signal::Int) {
            self.cancel.cancel();
        }
        for node in self.graph.nodes() {
            if node.is_awaiting_repeat().await {
                continue;
            }
            if let Some(token) = node.current_cancel_token().await {
                token.cancel();
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the scheduling loop until every Node is terminal or the run is
    /// cancelled, then return the aggregated run status.
    #[instrument(skip(self), fields(run_id = %self.config.run_id))]
    pub async fn run(&self) -> RunStatus {
        self.graph.mark_started().await;

        loop {
            if self.cancel.is_cancelled() {
                self.cancel_all_ready_nodes().await;
            }

            if self.all_terminal().await {
                break;
            }

            let ready = self.collect_ready().await;
            for node in ready {
                if self.cancel.is_cancelled() {
                    break;
                }
                if !self.has_capacity().await {
                    break;
                }
                self.dispatch(node).await;
                if !self.config.inter_launch_delay.is_zero() {
                    tokio::time::sleep(self.config.inter_launch_delay).await;
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        self.graph.mark_finished().await;
        self.run_status().await
    }

    async fn all_terminal(&self) -> bool {
        for node in self.graph.nodes() {
            if !node.state().await.is_terminal() {
                return false;
            }
        }
        true
    }

    async fn has_capacity(&self) -> bool {
        if self.config.max_active_steps == 0 {
            return true;
        }
        let running = self.running.lock().await;
        (running.len() as u32) < self.config.max_active_steps
    }

    /// Apply the readiness rule to every `None` Node, resolving predecessor
    /// cascades (Skipped/Error/Cancel propagation) in place and returning
    /// the subset that is actually ready to launch.
    async fn collect_ready(&self) -> Vec<Arc<Node>> {
        let mut ready = Vec::new();
        for node in self.graph.nodes() {
            if node.state().await != NodeState::None {
                continue;
            }

            let preds = self.graph.predecessors(node.id);
            let mut is_ready = true;
            let mut becomes_skipped: Option<&'static str> = None;
            let mut becomes_cancel: Option<&'static str> = None;

            for &pred_id in preds {
                let pred = &self.graph.nodes()[pred_id];
                match pred.state().await {
                    NodeState::Success => {}
                    NodeState::Skipped => {
                        if !node.step.continue_on.skipped {
                            becomes_skipped = Some("upstream skipped");
                        }
                    }
                    NodeState::Error => {
                        if !node.step.continue_on.failure {
                            becomes_cancel = Some("upstream failed");
                        }
                    }
                    NodeState::Cancel => {
                        becomes_cancel = Some("upstream cancelled");
                    }
                    NodeState::None | NodeState::Running => {
                        is_ready = false;
                    }
                }
                if becomes_skipped.is_some() || becomes_cancel.is_some() {
                    is_ready = false;
                    break;
                }
            }

            if let Some(reason) = becomes_skipped {
                node.mark_skipped(reason).await;
                self.emit(&node).await;
                continue;
            }
            if let Some(reason) = becomes_cancel {
                node.mark_cancel(reason).await;
                self.emit(&node).await;
                continue;
            }
            if is_ready {
                ready.push(node.clone());
            }
        }
        ready
    }

    async fn cancel_all_ready_nodes(&self) {
        for node in self.graph.nodes() {
            if node.state().await == NodeState::None {
                node.mark_cancel("run cancelled").await;
                self.emit(node).await;
            }
        }
    }

    async fn emit(&self, node: &Arc<Node>) {
        if let Some(tx) = &self.events {
            let _ = tx.send(node.snapshot().await);
        }
    }

    /// Evaluate this Node's preconditions, transition it to `Running`, and
    /// spawn an independent task that carries it through Setup → Execute →
    /// the retry/repeat decision → Teardown. Nodes run concurrently, up to
    /// the configured cap.
    async fn dispatch(&self, node: Arc<Node>) {
        let vars = self.graph.outputs().await;
        for pre in &node.step.preconditions {
            if !check_precondition(pre, &vars).await {
                node.mark_skipped(format!(
                    "precondition failed: `{}` != `{}`",
                    pre.condition, pre.expected
                ))
                .await;
                self.emit(&node).await;
                return;
            }
        }

        self.running.lock().await.insert(node.id);
        node.mark_running().await;
        self.emit(&node).await;

        let ctx = NodeTaskCtx {
            graph: self.graph.clone(),
            dag_env: self.dag_env.clone(),
            backend: self.backend.clone(),
            cleanup_window: self.config.cleanup_window,
            scheduler_cancel: self.cancel.clone(),
            running: self.running.clone(),
            events: self.events.clone(),
        };
        let log_dir = self.config.log_dir.clone();
        let run_id = self.config.run_id.clone();

        tokio::spawn(async move {
            if let Err(err) = node.setup(&log_dir, &run_id).await {
                node.mark_error(format!("setup failed: {err}")).await;
                ctx.emit(&node).await;
            } else {
                run_node_task(&ctx, &node).await;
            }
            ctx.running.lock().await.remove(&node.id);
        });
    }

    /// Compute the aggregated run status across all nodes.
    async fn run_status(&self) -> RunStatus {
        if self.cancel.is_cancelled() {
            for node in self.graph.nodes() {
                if node.state().await == NodeState::Cancel {
                    return RunStatus::Cancel;
                }
            }
        }

        let mut any_error = false;
        for node in self.graph.nodes() {
            match node.state().await {
                NodeState::Error => any_error = true,
                NodeState::Cancel => return RunStatus::Cancel,
                _ => {}
            }
        }
        if any_error {
            RunStatus::Error
        } else {
            RunStatus::Success
        }
    }

    /// Run exactly one of `on_success`/`on_failure`/`on_cancel`, then
    /// always `on_exit`. Handler failures are logged and surfaced in the
    /// returned snapshot's `last_error`, never fatal to the run status.
    /// Returns a snapshot per handler that actually ran, keyed by
    /// `on_success`/`on_failure`/`on_cancel`/`on_exit`.
    pub async fn run_lifecycle_handlers(
        &self,
        handlers: &Handlers,
        status: RunStatus,
    ) -> HashMap<String, NodeSnapshot> {
        let mut out = HashMap::new();

        let primary = match status {
            RunStatus::Success => handlers.on_success.as_ref().map(|s| ("on_success", s)),
            RunStatus::Error => handlers.on_failure.as_ref().map(|s| ("on_failure", s)),
            RunStatus::Cancel => handlers.on_cancel.as_ref().map(|s| ("on_cancel", s)),
            RunStatus::None | RunStatus::Running => None,
        };
        if let Some((key, step)) = primary {
            out.insert(key.to_string(), self.run_handler_step(step).await);
        }
        if let Some(step) = &handlers.on_exit {
            out.insert("on_exit".to_string(), self.run_handler_step(step).await);
        }
        out
    }

    /// Runs a single lifecycle step to completion (no retry/repeat — the
    /// spec defines those per-step policies only for graph Nodes) and
    /// returns its snapshot. The handler's own captured output is
    /// published to the graph so a later handler (e.g. `on_exit` after
    /// `on_success`) can see it.
    async fn run_handler_step(&self, step: &Step) -> NodeSnapshot {
        let node = Node::new(0, step.clone());
        if let Err(err) = node.setup(&self.config.log_dir, &self.config.run_id).await {
            node.mark_error(format!("setup failed: {err}")).await;
            error!(step = %step.name, %err, "lifecycle handler setup failed");
            return node.snapshot().await;
        }

        let outputs = self.graph.outputs().await;
        let mut env = self.dag_env.clone();
        env.extend(step.env.clone());
        let env = interpolate_env(&env, &outputs);

        let (command, args) = match &step.script {
            Some(script) => ("sh".to_string(), vec!["-c".to_string(), interpolate(script, &outputs)]),
            None => {
                let command = step.command.clone().map(|c| interpolate(&c, &outputs)).unwrap_or_default();
                let args = step.args.iter().map(|a| interpolate(a, &outputs)).collect();
                (command, args)
            }
        };

        node.mark_running().await;
        let snapshot = node.snapshot().await;

        let req = ExecRequest {
            command,
            args,
            dir: step.dir.clone().map(std::path::PathBuf::from),
            env,
            stdout_path: snapshot.stdout_path.clone().unwrap_or_default(),
            stderr_path: snapshot.stderr_path.clone().unwrap_or_default(),
            cancel: CancelToken::new(),
            timeout: step.timeout_secs.map(Duration::from_secs),
            signal_on_stop: step.signal_on_stop.as_deref().and_then(Signal::parse).unwrap_or_default(),
            cleanup_window: self.config.cleanup_window,
        };

        match self.backend.run(req).await {
            Ok(outcome) if outcome.exit_code == 0 => {
                debug!(step = %step.name, "lifecycle handler succeeded");
                if let Some(name) = &step.output {
                    let captured = read_captured_output(&snapshot).await;
                    self.graph.publish_output(HashMap::from([(name.clone(), captured)])).await;
                }
                node.mark_success().await;
            }
            Ok(outcome) => {
                warn!(step = %step.name, exit_code = outcome.exit_code, "lifecycle handler exited non-zero");
                node.mark_error(format!("exit code {}", outcome.exit_code)).await;
            }
            Err(err) => {
                error!(step = %step.name, %err, "lifecycle handler failed");
                node.mark_error(format!("executor error: {err}")).await;
            }
        }
        node.teardown().await;
        node.snapshot().await
    }
}

/// Setup has already run; carry `node` through Execute → the retry/repeat
/// decision → Teardown, looping in place for retries and repeats.
async fn run_node_task(ctx: &NodeTaskCtx, node: &Arc<Node>) {
    loop {
        let outputs = ctx.graph.outputs().await;
        let mut env = ctx.dag_env.clone();
        env.extend(node.step.env.clone());
        let env = interpolate_env(&env, &outputs);

        let (command, args) = match &node.step.script {
            Some(script) => ("sh".to_string(), vec!["-c".to_string(), interpolate(script, &outputs)]),
            None => {
                let command = node
                    .step
                    .command
                    .clone()
                    .map(|c| interpolate(&c, &outputs))
                    .unwrap_or_default();
                let args = node.step.args.iter().map(|a| interpolate(a, &outputs)).collect();
                (command, args)
            }
        };

        let snapshot = node.snapshot().await;
        let cancel = node.current_cancel_token().await.unwrap_or_else(CancelToken::new);
        if ctx.scheduler_cancel.is_cancelled() {
            cancel.cancel();
        }

        let signal_on_stop = node
            .step
            .signal_on_stop
            .as_deref()
            .and_then(Signal::parse)
            .unwrap_or_default();

        let req = ExecRequest {
            command,
            args,
            dir: node.step.dir.clone().map(std::path::PathBuf::from),
            env,
            stdout_path: snapshot.stdout_path.clone().unwrap_or_default(),
            stderr_path: snapshot.stderr_path.clone().unwrap_or_default(),
            cancel,
            timeout: node.step.timeout_secs.map(Duration::from_secs),
            signal_on_stop,
            cleanup_window: ctx.cleanup_window,
        };

        let outcome = ctx.backend.run(req).await;
        node.teardown().await;

        match outcome {
            Err(executor::ExecutorError::Cancelled) => {
                node.mark_cancel("cancelled").await;
                ctx.emit(node).await;
                return;
            }
            Err(err) => {
                node.mark_error(format!("executor error: {err}")).await;
                ctx.emit(node).await;
                return;
            }
            Ok(outcome) => {
                let success = outcome.exit_code == 0
                    || node.step.continue_on.exit_codes.contains(&outcome.exit_code);

                if !success {
                    if ctx.scheduler_cancel.is_cancelled() {
                        node.mark_error("cancelled").await;
                        ctx.emit(node).await;
                        return;
                    }
                    if retry_applies(&node.step.retry, node.retry_count().await, outcome.exit_code) {
                        let delay = retry_delay(&node.step.retry, node.retry_count().await);
                        info!(
                            step = %node.step.name,
                            attempt = node.retry_count().await + 1,
                            ?delay,
                            "retrying after non-zero exit"
                        );
                        node.schedule_retry().await;
                        ctx.emit(node).await;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if node.step.continue_on.mark_success {
                        node.mark_success().await;
                    } else {
                        node.mark_error(format!("exit code {}", outcome.exit_code)).await;
                    }
                    ctx.emit(node).await;
                    return;
                }

                if let Some(name) = &node.step.output {
                    let captured = read_captured_output(&snapshot).await;
                    ctx.graph
                        .publish_output(HashMap::from([(name.clone(), captured)]))
                        .await;
                }

                if should_repeat(node, &ctx.graph).await {
                    node.record_repeat_execution().await;
                    ctx.emit(node).await;
                    node.set_awaiting_repeat(true).await;
                    let delay = repeat_delay(&node.step.repeat, node.done_count().await);
                    tokio::time::sleep(delay).await;
                    node.set_awaiting_repeat(false).await;
                    continue;
                }

                node.mark_success().await;
                ctx.emit(node).await;
                return;
            }
        }
    }
}

fn retry_applies(policy: &RetryPolicy, retry_count: u32, exit_code: i32) -> bool {
    if retry_count >= policy.limit {
        return false;
    }
    match &policy.on_exit_codes {
        Some(codes) => codes.contains(&exit_code),
        None => true,
    }
}

fn retry_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let secs = (policy.interval_secs as f64) * policy.backoff.powi(attempt as i32);
    let capped = if policy.max_interval_secs > 0 {
        secs.min(policy.max_interval_secs as f64)
    } else {
        secs
    };
    Duration::from_secs_f64(capped.max(0.0))
}

fn repeat_delay(policy: &RepeatPolicy, done_count: u32) -> Duration {
    let secs = (policy.interval_secs as f64) * policy.backoff.powi(done_count as i32);
    Duration::from_secs_f64(secs.max(0.0))
}

async fn should_repeat(node: &Node, graph: &Graph) -> bool {
    let policy = &node.step.repeat;
    if policy.mode == RepeatMode::None {
        return false;
    }
    if let Some(limit) = policy.limit {
        // `done_count` doesn't yet include the execution that just
        // completed (recorded by the caller only once we return `true`),
        // so count it here or a `limit=N` step runs N+1 times.
        if node.done_count().await + 1 >= limit {
            return false;
        }
    }
    let holds = match &policy.condition {
        Some(pre) => check_precondition(pre, &graph.outputs().await).await,
        None => true,
    };
    match policy.mode {
        RepeatMode::While => holds,
        RepeatMode::Until => !holds,
        RepeatMode::None => false,
    }
}

/// Read back a step's captured stdout for publishing under its `output`
/// variable name.
async fn read_captured_output(snapshot: &NodeSnapshot) -> String {
    match &snapshot.stdout_path {
        Some(path) => tokio::fs::read_to_string(path).await.unwrap_or_default().trim().to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::model::{ContinueOn, Precondition, Step};
    use async_trait::async_trait;
    use executor::{Backend, ExecOutcome, ExecRequest as Req};
    use std::sync::atomic::{AtomicI32, Ordering};

    struct ScriptedBackend {
        exit_code: AtomicI32,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(exit_code: i32) -> Self {
            Self {
                exit_code: AtomicI32::new(exit_code),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn run(&self, req: Req) -> Result<ExecOutcome, executor::ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = tokio::fs::write(&req.stdout_path, "ok\n").await;
            Ok(ExecOutcome {
                exit_code: self.exit_code.load(Ordering::SeqCst),
            })
        }
    }

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
            continue_on: ContinueOn::default(),
            preconditions: vec![],
            timeout_secs: None,
            signal_on_stop: None,
            output: None,
        }
    }

    #[tokio::test]
    async fn linear_run_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(
            Graph::build(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]).unwrap(),
        );
        let backend: Arc<dyn Backend> = Arc::new(ScriptedBackend::new(0));
        let config = SchedulerConfig {
            max_active_steps: 0,
            inter_launch_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            cleanup_window: Duration::from_millis(50),
            run_id: "run1".to_string(),
            log_dir: dir.path().to_path_buf(),
        };
        let scheduler = Scheduler::new(graph.clone(), HashMap::new(), backend, config, None);

        let status = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .expect("scheduler should converge");
        assert_eq!(status, RunStatus::Success);
    }

    #[tokio::test]
    async fn failed_predecessor_skips_successor() {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(Graph::build(vec![step("a", &[]), step("b", &["a"])]).unwrap());
        let backend: Arc<dyn Backend> = Arc::new(ScriptedBackend::new(1));
        let config = SchedulerConfig {
            max_active_steps: 0,
            inter_launch_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            cleanup_window: Duration::from_millis(50),
            run_id: "run2".to_string(),
            log_dir: dir.path().to_path_buf(),
        };
        let scheduler = Scheduler::new(graph.clone(), HashMap::new(), backend, config, None);

        let status = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .expect("scheduler should converge");
        assert_eq!(status, RunStatus::Error);
        assert_eq!(graph.node_by_name("b").unwrap().state().await, NodeState::Cancel);
    }

    #[tokio::test]
    async fn precondition_failure_skips_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = step("a", &[]);
        a.preconditions.push(Precondition {
            condition: "echo no".to_string(),
            expected: "yes".to_string(),
        });
        let graph = Arc::new(Graph::build(vec![a]).unwrap());
        let backend: Arc<dyn Backend> = Arc::new(ScriptedBackend::new(0));
        let config = SchedulerConfig {
            max_active_steps: 0,
            inter_launch_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            cleanup_window: Duration::from_millis(50),
            run_id: "run3".to_string(),
            log_dir: dir.path().to_path_buf(),
        };
        let scheduler = Scheduler::new(graph.clone(), HashMap::new(), backend, config, None);

        let status = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .expect("scheduler should converge");
        assert_eq!(status, RunStatus::Success);
        assert_eq!(graph.node_by_name("a").unwrap().state().await, NodeState::Skipped);
    }

    #[tokio::test]
    async fn repeat_while_with_limit_executes_exactly_limit_times() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = step("a", &[]);
        a.repeat = RepeatPolicy {
            mode: RepeatMode::While,
            interval_secs: 0,
            limit: Some(3),
            backoff: 1.0,
            condition: None,
            exit_codes: None,
        };
        let graph = Arc::new(Graph::build(vec![a]).unwrap());
        let backend = Arc::new(ScriptedBackend::new(0));
        let config = SchedulerConfig {
            max_active_steps: 0,
            inter_launch_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(5),
            cleanup_window: Duration::from_millis(50),
            run_id: "run4".to_string(),
            log_dir: dir.path().to_path_buf(),
        };
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let scheduler = Scheduler::new(graph.clone(), HashMap::new(), dyn_backend, config, None);

        let status = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .expect("scheduler should converge");
        assert_eq!(status, RunStatus::Success);
        assert_eq!(backend.call_count(), 3);
        assert_eq!(graph.node_by_name("a").unwrap().done_count().await, 3);
    }
}
