//! Flow scheduler: the single writer in front of the flow graph.
//!
//! The `FlowScheduler` is the control loop that:
//! - Applies topology and job events to the graph, one at a time
//! - Drains the change log into the solver's mirror of the network
//! - Runs the solver off the async runtime, without holding the lock
//! - Applies the resulting placements back to the graph
//!
//! Every event, and every applied round, bumps a mutation epoch. A round
//! whose solver run overlapped with either is superseded: its placements
//! are discarded and the next round solves the updated network.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::config::{FlowConfig, SchedulerConfig};
use crate::dimacs;
use crate::error::{FlowError, FlowResult};
use crate::graph::{FlowGraph, JobUpdate};
use crate::mirror::GraphMirror;
use crate::node::{FlowNodeId, FlowNodeType};
use crate::types::{JobDescriptor, JobId, ResourceId, ResourceTopologyNode, TaskId};

/// A placement chosen by the solver, in node ids of the network it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeBinding {
    pub task_node: FlowNodeId,
    pub resource_node: FlowNodeId,
}

/// Computes placements for a flow network.
///
/// Implementations run on a blocking thread and must not touch the graph.
pub trait FlowSolver: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        "solver"
    }

    fn solve(&self, network: &GraphMirror) -> anyhow::Result<Vec<NodeBinding>>;
}

/// What an applied round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Change entries shipped to the solver.
    pub changes: usize,
    /// Placements applied to the graph.
    pub bound: Vec<(TaskId, ResourceId)>,
    /// Placements that no longer matched a live task or resource.
    pub rejected: Vec<NodeBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    Applied(RoundReport),
    /// The graph changed while the solver ran; its placements were dropped.
    Superseded { discarded: usize },
}

struct SchedulerState {
    graph: FlowGraph,
    /// The network exactly as the solver last saw it.
    mirror: GraphMirror,
    /// Bumped by every external event and every applied round.
    epoch: u64,
}

/// Which task or leaf resource each node id stood for when a network was
/// handed to the solver.
struct RoundSnapshot {
    tasks: HashMap<FlowNodeId, TaskId>,
    leaves: HashMap<FlowNodeId, ResourceId>,
}

impl RoundSnapshot {
    fn capture(graph: &FlowGraph) -> Self {
        let tasks = graph
            .task_node_ids()
            .iter()
            .filter_map(|&id| Some((id, graph.node(id)?.task_id?)))
            .collect();
        let leaves = graph
            .leaf_node_ids()
            .iter()
            .filter_map(|&id| Some((id, graph.node(id)?.resource_id.clone()?)))
            .collect();
        Self { tasks, leaves }
    }
}

impl SchedulerState {
    /// Translate a binding back to the task and leaf resource the solver
    /// saw. Both must still own the same node ids in the live graph.
    fn resolve(&self, snapshot: &RoundSnapshot, binding: &NodeBinding) -> Option<(TaskId, ResourceId)> {
        let task = *snapshot.tasks.get(&binding.task_node)?;
        let resource = snapshot.leaves.get(&binding.resource_node)?;
        let task_node = self.graph.node_for_task_id(task)?;
        let resource_node = self.graph.node_for_resource_id(resource)?;
        let still_owned = task_node.id == binding.task_node
            && resource_node.id == binding.resource_node
            && resource_node.node_type == FlowNodeType::Pu;
        still_owned.then(|| (task, resource.clone()))
    }
}

#[derive(Clone)]
pub struct FlowScheduler {
    state: Arc<Mutex<SchedulerState>>,
    solver: Arc<dyn FlowSolver>,
    config: SchedulerConfig,
}

impl FlowScheduler {
    pub fn new(graph: FlowGraph, solver: Arc<dyn FlowSolver>, config: SchedulerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                graph,
                mirror: GraphMirror::new(),
                epoch: 0,
            })),
            solver,
            config,
        }
    }

    pub fn from_config(config: &FlowConfig, solver: Arc<dyn FlowSolver>) -> Self {
        Self::new(FlowGraph::from_config(config), solver, config.scheduler.clone())
    }

    // ── Events ──────────────────────────────────────────────────────

    pub async fn register_resource(&self, topology: &ResourceTopologyNode) -> FlowResult<()> {
        self.mutate(|graph| graph.add_resource_topology(topology)).await
    }

    /// Remove a resource subtree. Returns the tasks evicted from it.
    pub async fn deregister_resource(&self, resource: &ResourceId) -> FlowResult<Vec<TaskId>> {
        self.mutate(|graph| graph.delete_resource_node(resource)).await
    }

    pub async fn add_job(&self, job: &JobDescriptor) -> FlowResult<JobUpdate> {
        self.mutate(|graph| graph.add_or_update_job_nodes(job)).await
    }

    pub async fn handle_task_completion(&self, task: TaskId) -> FlowResult<()> {
        self.mutate(|graph| graph.delete_task_node(task)).await
    }

    pub async fn handle_task_eviction(&self, task: TaskId) -> FlowResult<()> {
        self.mutate(|graph| graph.update_arcs_for_evicted_task(task)).await
    }

    pub async fn remove_job(&self, job: &JobId) -> FlowResult<usize> {
        self.mutate(|graph| graph.delete_nodes_for_job(job)).await
    }

    /// Read-only access to the live graph.
    pub async fn with_graph<R>(&self, f: impl FnOnce(&FlowGraph) -> R) -> R {
        let state = self.state.lock().await;
        f(&state.graph)
    }

    /// The live network rendered as DIMACS text.
    pub async fn network_dimacs(&self) -> FlowResult<String> {
        let state = self.state.lock().await;
        let mut buf = Vec::new();
        dimacs::write_network(&GraphMirror::from_graph(&state.graph), &mut buf)
            .map_err(|e| FlowError::Solver(e.into()))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // ── Rounds ──────────────────────────────────────────────────────

    /// Run one scheduling round.
    pub async fn run_round(&self) -> FlowResult<RoundOutcome> {
        let (network, snapshot, epoch, changes) = {
            let mut state = self.state.lock().await;
            let changes = state.graph.reset_changes();
            state.mirror.apply_all(&changes)?;
            let snapshot = RoundSnapshot::capture(&state.graph);
            (state.mirror.clone(), snapshot, state.epoch, changes.len())
        };

        let solver = Arc::clone(&self.solver);
        let bindings = tokio::task::spawn_blocking(move || solver.solve(&network))
            .await
            .map_err(|e| FlowError::Solver(anyhow::anyhow!("solver task failed: {e}")))??;

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            warn!(
                solved_epoch = epoch,
                current_epoch = state.epoch,
                discarded = bindings.len(),
                "graph changed during solve, discarding placements"
            );
            return Ok(RoundOutcome::Superseded {
                discarded: bindings.len(),
            });
        }

        state.epoch += 1;
        let mut report = RoundReport {
            changes,
            ..RoundReport::default()
        };
        for binding in bindings {
            let Some((task, resource)) = state.resolve(&snapshot, &binding) else {
                warn!(
                    task_node = binding.task_node,
                    resource_node = binding.resource_node,
                    "placement does not match a live task and resource"
                );
                report.rejected.push(binding);
                continue;
            };
            match state.graph.update_arcs_for_bound_task(task, &resource) {
                Ok(()) => report.bound.push((task, resource)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(task, resource = %resource, error = %e, "placement rejected");
                    report.rejected.push(binding);
                }
            }
        }

        debug!(
            changes = report.changes,
            bound = report.bound.len(),
            rejected = report.rejected.len(),
            "scheduling round applied"
        );
        Ok(RoundOutcome::Applied(report))
    }

    /// Run rounds at the configured interval until shutdown.
    ///
    /// A fatal graph error stops the loop and is returned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> FlowResult<()> {
        let interval = self.config.round_interval();
        info!(
            interval_ms = interval.as_millis() as u64,
            solver = self.solver.name(),
            "flow scheduler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.run_round().await {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "flow graph invariant violated, scheduler halting");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "scheduling round failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("flow scheduler shutting down");
                    return Ok(());
                }
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn mutate<R>(&self, f: impl FnOnce(&mut FlowGraph) -> FlowResult<R>) -> FlowResult<R> {
        let mut state = self.state.lock().await;
        state.epoch += 1;
        let result = f(&mut state.graph);
        if let Err(e) = &result
            && e.is_fatal()
        {
            error!(error = %e, "flow graph invariant violated");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::graph::test_support::*;

    struct NoopSolver;

    impl FlowSolver for NoopSolver {
        fn solve(&self, _network: &GraphMirror) -> anyhow::Result<Vec<NodeBinding>> {
            Ok(Vec::new())
        }
    }

    struct FixedSolver(Vec<NodeBinding>);

    impl FlowSolver for FixedSolver {
        fn solve(&self, _network: &GraphMirror) -> anyhow::Result<Vec<NodeBinding>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSolver;

    impl FlowSolver for FailingSolver {
        fn solve(&self, _network: &GraphMirror) -> anyhow::Result<Vec<NodeBinding>> {
            anyhow::bail!("no feasible flow")
        }
    }

    #[test]
    fn bindings_resolve_only_to_the_owners_the_solver_saw() {
        let mut graph = trivial_graph();
        graph.add_resource_topology(&machine("m0", 1)).unwrap();
        graph.add_or_update_job_nodes(&job("j1", &[1, 2])).unwrap();
        let snapshot = RoundSnapshot::capture(&graph);
        let root_node = graph.node_for_task_id(1).unwrap().id;
        let freed_node = graph.node_for_task_id(2).unwrap().id;
        let pu = graph.node_for_resource_id(&"m0-pu0".to_string()).unwrap().id;
        let m0 = graph.node_for_resource_id(&"m0".to_string()).unwrap().id;

        graph.delete_task_node(2).unwrap();
        graph.add_or_update_job_nodes(&job("j1", &[1, 3])).unwrap();
        assert_eq!(graph.node_for_task_id(3).unwrap().id, freed_node);

        let state = SchedulerState {
            graph,
            mirror: GraphMirror::new(),
            epoch: 0,
        };
        let bind = |task_node, resource_node| NodeBinding {
            task_node,
            resource_node,
        };
        assert_eq!(
            state.resolve(&snapshot, &bind(root_node, pu)),
            Some((1, "m0-pu0".to_string()))
        );
        assert_eq!(state.resolve(&snapshot, &bind(freed_node, pu)), None);
        assert_eq!(state.resolve(&snapshot, &bind(root_node, m0)), None);
    }

    #[tokio::test]
    async fn first_round_ships_whole_graph() {
        let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(NoopSolver), SchedulerConfig::default());
        scheduler.register_resource(&machine("m0", 2)).await.unwrap();

        let RoundOutcome::Applied(report) = scheduler.run_round().await.unwrap() else {
            panic!("round should apply");
        };
        assert!(report.changes > 0);

        let RoundOutcome::Applied(report) = scheduler.run_round().await.unwrap() else {
            panic!("round should apply");
        };
        assert_eq!(report.changes, 0);
    }

    #[tokio::test]
    async fn stale_bindings_are_rejected() {
        let solver = FixedSolver(vec![NodeBinding {
            task_node: 999,
            resource_node: 1,
        }]);
        let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(solver), SchedulerConfig::default());

        let RoundOutcome::Applied(report) = scheduler.run_round().await.unwrap() else {
            panic!("round should apply");
        };
        assert!(report.bound.is_empty());
        assert_eq!(report.rejected.len(), 1);
    }

    #[tokio::test]
    async fn solver_errors_are_not_fatal() {
        let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(FailingSolver), SchedulerConfig::default());
        let err = scheduler.run_round().await.unwrap_err();
        assert!(matches!(err, FlowError::Solver(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let config = SchedulerConfig { round_interval_ms: 5 };
        let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(NoopSolver), config);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn network_dimacs_lists_sink_demand() {
        let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(NoopSolver), SchedulerConfig::default());
        scheduler.add_job(&job("j1", &[1, 2])).await.unwrap();

        let text = scheduler.network_dimacs().await.unwrap();
        let sink = scheduler.with_graph(|g| g.sink_node().id).await;
        assert!(text.lines().any(|l| l == format!("n {sink} -2")));
    }
}
