use crate::artifacts::{check_plot, outs_path_present, ArtifactStore};
use crate::fingerprint::{self, FingerprintStore};
use crate::graph::{Graph, NodeInstance};
use crate::layout::StateLayout;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use graphcore::{
    AttrRef, Binding, BuildEvent, BuildId, BuildReport, EventBus, ExecutionError, NodeContext, NodeError, NodeId, NodeOutcome,
    NodeState, Role, Value,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;

/// Executes a closed graph, running dirty nodes and skipping clean ones
pub struct BuildExecutor {
    max_parallel: usize,
    layout: StateLayout,
    fingerprints: FingerprintStore,
    artifacts: ArtifactStore,
}

/// Clean/dirty verdict for one node, produced by a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub definition: String,
    pub clean: bool,
    pub reason: String,
    pub fingerprint: Option<String>,
}

enum Freshness {
    Clean(BTreeMap<String, Value>),
    Dirty(String),
}

/// Mutable bookkeeping of one build, indexed by graph position.
struct BuildRun {
    states: Vec<NodeState>,
    fingerprints: Vec<Option<String>>,
    outputs: Vec<BTreeMap<String, Value>>,
    reasons: Vec<String>,
    durations: Vec<u64>,
    root_failure: Vec<Option<usize>>,
    errors: Vec<ExecutionError>,
}

impl BuildRun {
    fn new(len: usize) -> Self {
        Self {
            states: vec![NodeState::Pending; len],
            fingerprints: vec![None; len],
            outputs: vec![BTreeMap::new(); len],
            reasons: vec![String::new(); len],
            durations: vec![0; len],
            root_failure: vec![None; len],
            errors: Vec::new(),
        }
    }

    fn transition(&mut self, position: usize, next: NodeState) {
        debug_assert!(self.states[position].can_transition_to(next));
        self.states[position] = next;
    }
}

type TaskResult = Result<(NodeContext, Result<(), NodeError>), JoinError>;

impl BuildExecutor {
    pub fn new(layout: StateLayout, max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            fingerprints: FingerprintStore::new(layout.clone()),
            artifacts: ArtifactStore::new(layout.clone()),
            layout,
        }
    }

    /// Run the graph to completion and return the report.
    ///
    /// Nodes are visited in topological order. A node is dispatched once all
    /// of its predecessors are Skipped or Succeeded; it is Blocked as soon as
    /// one of them is Failed or Blocked. Independent nodes run concurrently
    /// up to `max_parallel`. All persistence happens here, on the driver, so
    /// no two tasks ever write state for the same node.
    pub async fn execute(&self, graph: &Graph, event_bus: &EventBus) -> BuildReport {
        let build_id = BuildId::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        event_bus.emit(BuildEvent::BuildStarted {
            build_id,
            node_count: graph.len(),
            timestamp: Utc::now(),
        });
        tracing::info!("Starting build {} with {} nodes", build_id, graph.len());

        let mut run = BuildRun::new(graph.len());
        let mut running = FuturesUnordered::new();

        loop {
            for &position in graph.order() {
                if run.states[position] != NodeState::Pending {
                    continue;
                }
                let preds = graph.predecessors(position);

                if let Some(&failed) = preds
                    .iter()
                    .find(|p| matches!(run.states[**p], NodeState::Failed | NodeState::Blocked))
                {
                    self.block(graph, &mut run, position, failed, event_bus, build_id);
                    continue;
                }
                if !preds.iter().all(|p| run.states[*p].is_ok()) || running.len() >= self.max_parallel {
                    continue;
                }

                let instance = graph.instance(position);
                let upstream: Vec<&str> = preds.iter().filter_map(|p| run.fingerprints[*p].as_deref()).collect();
                let fingerprint = match fingerprint::compute(instance, &upstream) {
                    Ok(fp) => fp,
                    Err(e) => {
                        self.fail(&mut run, position, NodeError::from(e).into_execution(&instance.id), event_bus, build_id);
                        continue;
                    }
                };
                run.fingerprints[position] = Some(fingerprint.clone());

                let reason = match self.freshness(instance, &fingerprint) {
                    Freshness::Clean(stored) => {
                        tracing::info!("Node {} is up to date, skipping", instance.id);
                        run.transition(position, NodeState::Skipped);
                        run.outputs[position] = stored;
                        run.reasons[position] = "up to date".to_string();
                        event_bus.emit(BuildEvent::NodeSkipped {
                            build_id,
                            node_id: instance.id.clone(),
                            fingerprint,
                            timestamp: Utc::now(),
                        });
                        continue;
                    }
                    Freshness::Dirty(reason) => reason,
                };

                let mut ctx = match self.prepare(graph, &run, instance, event_bus, build_id) {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        self.fail(&mut run, position, e.into_execution(&instance.id), event_bus, build_id);
                        continue;
                    }
                };

                tracing::info!("Running node {} ({})", instance.id, reason);
                run.transition(position, NodeState::Running);
                run.reasons[position] = reason.clone();
                event_bus.emit(BuildEvent::NodeStarted {
                    build_id,
                    node_id: instance.id.clone(),
                    definition: instance.definition.name().to_string(),
                    reason,
                    timestamp: Utc::now(),
                });

                let node = Arc::clone(instance.node());
                running.push(async move {
                    let start = Instant::now();
                    let joined: TaskResult = tokio::spawn(async move {
                        let result = node.run(&mut ctx).await;
                        (ctx, result)
                    })
                    .await;
                    (position, joined, start.elapsed().as_millis() as u64)
                });
            }

            // Nothing in flight means nothing more can become ready
            if running.is_empty() {
                break;
            }

            if let Some((position, joined, duration_ms)) = running.next().await {
                self.complete(graph, &mut run, position, joined, duration_ms, event_bus, build_id);
            }
        }

        let outcomes = graph
            .order()
            .iter()
            .map(|&position| NodeOutcome {
                node_id: graph.instance(position).id.clone(),
                state: run.states[position],
                reason: std::mem::take(&mut run.reasons[position]),
                fingerprint: run.fingerprints[position].clone(),
                duration_ms: run.durations[position],
            })
            .collect();
        let report = BuildReport {
            build_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            errors: run.errors,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        event_bus.emit(BuildEvent::BuildCompleted {
            build_id,
            success: report.is_success(),
            duration_ms,
            timestamp: Utc::now(),
        });
        if report.is_success() {
            tracing::info!("Build {} finished in {}ms: {}", build_id, duration_ms, report.summary());
        } else {
            tracing::error!("Build {} failed after {}ms: {}", build_id, duration_ms, report.summary());
        }
        report
    }

    /// Recompute every fingerprint with the current files and report which
    /// nodes a build would run. Nothing is executed or written.
    pub fn status(&self, graph: &Graph) -> Vec<NodeStatus> {
        let mut fingerprints: Vec<Option<String>> = vec![None; graph.len()];
        let mut statuses = Vec::with_capacity(graph.len());

        for &position in graph.order() {
            let instance = graph.instance(position);
            let upstream: Vec<&str> = graph
                .predecessors(position)
                .iter()
                .filter_map(|p| fingerprints[*p].as_deref())
                .collect();

            let (fingerprint, clean, reason) = match fingerprint::compute(instance, &upstream) {
                Ok(fp) => match self.freshness(instance, &fp) {
                    Freshness::Clean(_) => (Some(fp), true, "up to date".to_string()),
                    Freshness::Dirty(reason) => (Some(fp), false, reason),
                },
                Err(e) => (None, false, format!("cannot fingerprint inputs: {}", e)),
            };
            fingerprints[position] = fingerprint.clone();

            statuses.push(NodeStatus {
                node_id: instance.id.clone(),
                definition: instance.definition.name().to_string(),
                clean,
                reason,
                fingerprint,
            });
        }
        statuses
    }

    /// Loads the stored value of one output.
    pub fn load_output(&self, instance: &NodeInstance, attribute: &str) -> Option<Value> {
        let role = &instance.definition.attribute(attribute)?.role;
        if *role == Role::OutsPath {
            return instance
                .paths
                .get(attribute)
                .filter(|p| outs_path_present(p))
                .map(|p| Value::String(p.display().to_string()));
        }
        match self.artifacts.load(&instance.id, attribute) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    fn freshness(&self, instance: &NodeInstance, fingerprint: &str) -> Freshness {
        match self.fingerprints.load(&instance.id) {
            Ok(None) => return Freshness::Dirty("no previous run".to_string()),
            Ok(Some(record)) if record.fingerprint != fingerprint => {
                return Freshness::Dirty("fingerprint changed".to_string())
            }
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::warn!("{}; recomputing", e);
                return Freshness::Dirty(e.to_string());
            }
        }

        let mut stored = BTreeMap::new();
        for attr in instance.definition.attributes() {
            if attr.role == Role::OutsPath {
                if !instance.paths.get(&attr.name).is_some_and(|p| outs_path_present(p)) {
                    return Freshness::Dirty(format!("output '{}' is missing", attr.name));
                }
            } else if attr.role.is_stored_value() {
                match self.artifacts.load(&instance.id, &attr.name) {
                    Ok(Some(value)) => {
                        stored.insert(attr.name.clone(), value);
                    }
                    Ok(None) => return Freshness::Dirty(format!("output '{}' is missing", attr.name)),
                    Err(e) => {
                        tracing::warn!("{}; recomputing", e);
                        return Freshness::Dirty(e.to_string());
                    }
                }
            }
        }
        Freshness::Clean(stored)
    }

    /// Clears stale state, creates the working directory and resolves the
    /// node's inputs from finished upstream nodes.
    fn prepare(
        &self,
        graph: &Graph,
        run: &BuildRun,
        instance: &NodeInstance,
        event_bus: &EventBus,
        build_id: BuildId,
    ) -> Result<NodeContext, NodeError> {
        self.fingerprints.invalidate(&instance.id)?;
        self.artifacts.remove_values(&instance.id)?;

        let nwd = self.layout.nwd(&instance.id);
        std::fs::create_dir_all(&nwd)?;
        for attr in instance.definition.with_role(|r| *r == Role::OutsPath) {
            if let Some(parent) = instance.paths.get(&attr.name).and_then(|p| p.parent()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut ctx = NodeContext::new(
            instance.id.clone(),
            nwd,
            event_bus.create_emitter(build_id, instance.id.clone()),
        );
        ctx.params = instance.params.clone();
        ctx.paths = instance.paths.clone();
        for attr in instance.definition.with_role(|r| *r == Role::Dependency) {
            let Some(binding) = instance.bindings.get(&attr.name) else {
                continue;
            };
            let value = match binding {
                Binding::One(r) => resolve(graph, run, r)?,
                Binding::Many(refs) => {
                    Value::Array(refs.iter().map(|r| resolve(graph, run, r)).collect::<Result<_, _>>()?)
                }
            };
            ctx.deps.insert(attr.name.clone(), value);
        }
        Ok(ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        graph: &Graph,
        run: &mut BuildRun,
        position: usize,
        joined: TaskResult,
        duration_ms: u64,
        event_bus: &EventBus,
        build_id: BuildId,
    ) {
        let instance = graph.instance(position);
        run.durations[position] = duration_ms;

        let result = match joined {
            Ok((mut ctx, Ok(()))) => {
                let fingerprint = run.fingerprints[position].clone().unwrap_or_default();
                self.record_success(instance, &mut ctx, &fingerprint)
            }
            Ok((_, Err(cause))) => Err(cause.into_execution(&instance.id)),
            Err(join_error) => Err(NodeError::Panicked(panic_message(join_error)).into_execution(&instance.id)),
        };

        match result {
            Ok(stored) => {
                tracing::info!("Node {} succeeded in {}ms", instance.id, duration_ms);
                run.transition(position, NodeState::Succeeded);
                run.outputs[position] = stored;
                event_bus.emit(BuildEvent::NodeSucceeded {
                    build_id,
                    node_id: instance.id.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(error) => self.fail(run, position, error, event_bus, build_id),
        }
    }

    /// Checks declared outputs and persists values, then the fingerprint.
    fn record_success(
        &self,
        instance: &NodeInstance,
        ctx: &mut NodeContext,
        fingerprint: &str,
    ) -> Result<BTreeMap<String, Value>, ExecutionError> {
        let id = &instance.id;
        let missing = |attribute: &str| ExecutionError::MissingOutput {
            node_id: id.clone(),
            attribute: attribute.to_string(),
        };
        let persist = |e: std::io::Error| ExecutionError::Persist {
            node_id: id.clone(),
            message: e.to_string(),
        };

        let mut produced = ctx.take_outputs();
        let mut stored = BTreeMap::new();
        for attr in instance.definition.attributes() {
            match &attr.role {
                Role::OutsPath => {
                    if !instance.paths.get(&attr.name).is_some_and(|p| outs_path_present(p)) {
                        return Err(missing(&attr.name));
                    }
                }
                Role::OutsValue => {
                    let value = produced.remove(&attr.name).ok_or_else(|| missing(&attr.name))?;
                    stored.insert(attr.name.clone(), value);
                }
                Role::Plot { x, y } => {
                    let value = produced.remove(&attr.name).ok_or_else(|| missing(&attr.name))?;
                    check_plot(&value, x, y).map_err(|reason| ExecutionError::InvalidPlot {
                        node_id: id.clone(),
                        attribute: attr.name.clone(),
                        reason,
                    })?;
                    stored.insert(attr.name.clone(), value);
                }
                _ => {}
            }
        }
        for extra in produced.keys() {
            tracing::warn!("Node {} set undeclared output '{}', ignoring it", id, extra);
        }

        for (name, value) in &stored {
            let role = instance
                .definition
                .attribute(name)
                .map(|a| a.role.clone())
                .unwrap_or(Role::OutsValue);
            self.artifacts.save(id, name, &role, value).map_err(persist)?;
        }
        self.fingerprints.persist(id, fingerprint, &instance.params).map_err(persist)?;
        Ok(stored)
    }

    fn fail(&self, run: &mut BuildRun, position: usize, error: ExecutionError, event_bus: &EventBus, build_id: BuildId) {
        tracing::error!("{}", error);
        if run.states[position] == NodeState::Pending {
            run.transition(position, NodeState::Running);
        }
        run.transition(position, NodeState::Failed);
        run.reasons[position] = error.to_string();
        event_bus.emit(BuildEvent::NodeFailed {
            build_id,
            node_id: error.node_id().clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        run.errors.push(error);
    }

    fn block(
        &self,
        graph: &Graph,
        run: &mut BuildRun,
        position: usize,
        predecessor: usize,
        event_bus: &EventBus,
        build_id: BuildId,
    ) {
        let root = run.root_failure[predecessor].unwrap_or(predecessor);
        let root_id = graph.instance(root).id.clone();
        let id = graph.instance(position).id.clone();

        tracing::warn!("Node {} blocked by failed node {}", id, root_id);
        run.transition(position, NodeState::Blocked);
        run.root_failure[position] = Some(root);
        run.reasons[position] = format!("blocked by '{}'", root_id);
        event_bus.emit(BuildEvent::NodeBlocked {
            build_id,
            node_id: id,
            blocked_by: root_id,
            timestamp: Utc::now(),
        });
    }
}

/// Value of one upstream output. `OutsPath` outputs resolve to their path.
fn resolve(graph: &Graph, run: &BuildRun, r: &AttrRef) -> Result<Value, NodeError> {
    let position = graph
        .position(r.node.as_str())
        .ok_or_else(|| NodeError::MissingInput(r.to_string()))?;
    let upstream = graph.instance(position);
    let is_path = upstream
        .definition
        .attribute(&r.attribute)
        .is_some_and(|a| a.role == Role::OutsPath);
    if is_path {
        if let Some(path) = upstream.paths.get(&r.attribute) {
            return Ok(Value::String(path.display().to_string()));
        }
    }
    run.outputs[position]
        .get(&r.attribute)
        .cloned()
        .ok_or_else(|| NodeError::MissingInput(r.to_string()))
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panicked".to_string()),
        Err(error) => error.to_string(),
    }
}

trait IntoExecution {
    fn into_execution(self, node_id: &NodeId) -> ExecutionError;
}

impl IntoExecution for NodeError {
    fn into_execution(self, node_id: &NodeId) -> ExecutionError {
        ExecutionError::NodeExecution {
            node_id: node_id.clone(),
            cause: self,
        }
    }
}
