//! Scheduling rounds against a simple in-process solver.

mod common;

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use common::*;
use warpgrid_flow::config::SchedulerConfig;
use warpgrid_flow::{
    FlowArcType, FlowNodeId, FlowNodeType, FlowScheduler, FlowSolver, GraphMirror, NodeBinding,
    RoundOutcome,
};

/// Places unbound tasks on free processing units, lowest ids first.
struct GreedySolver;

impl FlowSolver for GreedySolver {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn solve(&self, network: &GraphMirror) -> anyhow::Result<Vec<NodeBinding>> {
        let occupied: BTreeSet<FlowNodeId> = network
            .arcs()
            .filter(|(_, arc)| arc.arc_type == FlowArcType::Running)
            .map(|((_, dst), _)| dst)
            .collect();
        let free = network
            .nodes()
            .filter(|(id, node)| node.node_type == FlowNodeType::Pu && !occupied.contains(id))
            .map(|(id, _)| id);
        let unbound = network
            .nodes()
            .filter(|(_, node)| {
                matches!(node.node_type, FlowNodeType::RootTask | FlowNodeType::UnscheduledTask)
            })
            .filter(|(id, _)| {
                network
                    .outgoing(*id)
                    .all(|(_, arc)| arc.arc_type != FlowArcType::Running)
            })
            .map(|(id, _)| id);

        Ok(unbound
            .zip(free)
            .map(|(task_node, resource_node)| NodeBinding {
                task_node,
                resource_node,
            })
            .collect())
    }
}

/// Greedy placements, but only after the test lets the solve proceed.
struct GatedSolver {
    started: Mutex<mpsc::Sender<()>>,
    proceed: Mutex<mpsc::Receiver<()>>,
}

impl FlowSolver for GatedSolver {
    fn solve(&self, network: &GraphMirror) -> anyhow::Result<Vec<NodeBinding>> {
        self.started.lock().unwrap().send(())?;
        self.proceed.lock().unwrap().recv()?;
        GreedySolver.solve(network)
    }
}

/// Block until the gated solver has picked up a network, handing the
/// receiver back so later solves can still signal.
async fn wait_started(started: mpsc::Receiver<()>) -> mpsc::Receiver<()> {
    tokio::task::spawn_blocking(move || {
        started.recv().unwrap();
        started
    })
    .await
    .unwrap()
}

fn gated_solver() -> (GatedSolver, mpsc::Receiver<()>, mpsc::Sender<()>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let solver = GatedSolver {
        started: Mutex::new(started_tx),
        proceed: Mutex::new(proceed_rx),
    };
    (solver, started_rx, proceed_tx)
}

fn applied(outcome: RoundOutcome) -> warpgrid_flow::RoundReport {
    match outcome {
        RoundOutcome::Applied(report) => report,
        other => panic!("expected an applied round, got {other:?}"),
    }
}

#[tokio::test]
async fn rounds_fill_free_slots() {
    let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(GreedySolver), SchedulerConfig::default());
    scheduler.register_resource(&machine("m0", 2)).await.unwrap();
    let update = scheduler.add_job(&job("j1", &[10, 11, 12])).await.unwrap();
    assert_eq!(update.added.len(), 3);

    let report = applied(scheduler.run_round().await.unwrap());
    assert_eq!(report.bound.len(), 2);
    assert!(report.rejected.is_empty());
    let (first_task, first_pu) = &report.bound[0];
    assert_eq!((*first_task, first_pu.as_str()), (10, "m0-pu0"));
    assert_eq!(scheduler.with_graph(|g| unsched_capacity(g, "j1")).await, 1);

    let report = applied(scheduler.run_round().await.unwrap());
    assert!(report.bound.is_empty());

    scheduler.handle_task_completion(10).await.unwrap();
    let report = applied(scheduler.run_round().await.unwrap());
    assert_eq!(report.bound, vec![(12, "m0-pu0".to_string())]);
    assert_eq!(scheduler.with_graph(|g| unsched_capacity(g, "j1")).await, 0);
}

#[tokio::test]
async fn evicted_tasks_are_placed_again() {
    let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(GreedySolver), SchedulerConfig::default());
    scheduler.register_resource(&machine("m0", 1)).await.unwrap();
    scheduler.register_resource(&machine("m1", 1)).await.unwrap();
    scheduler.add_job(&job("j1", &[10])).await.unwrap();

    let report = applied(scheduler.run_round().await.unwrap());
    assert_eq!(report.bound, vec![(10, "m0-pu0".to_string())]);

    let evicted = scheduler.deregister_resource(&"m0".to_string()).await.unwrap();
    assert_eq!(evicted, vec![10]);

    let report = applied(scheduler.run_round().await.unwrap());
    assert_eq!(report.bound, vec![(10, "m1-pu0".to_string())]);

    let removed = scheduler.remove_job(&"j1".to_string()).await.unwrap();
    assert_eq!(removed, 1);
    assert!(scheduler.remove_job(&"j1".to_string()).await.is_err());
}

#[tokio::test]
async fn placements_from_a_superseded_round_are_discarded() {
    let (solver, started_rx, proceed_tx) = gated_solver();
    let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(solver), SchedulerConfig::default());
    scheduler.register_resource(&machine("m0", 2)).await.unwrap();
    scheduler.add_job(&job("j1", &[10])).await.unwrap();

    let round = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_round().await }
    });
    let _started_rx = wait_started(started_rx).await;

    scheduler.add_job(&job("j2", &[20])).await.unwrap();
    proceed_tx.send(()).unwrap();

    let outcome = round.await.unwrap().unwrap();
    assert_eq!(outcome, RoundOutcome::Superseded { discarded: 1 });
    let bound = scheduler
        .with_graph(|g| g.node_for_task_id(10).unwrap().bound_to.clone())
        .await;
    assert!(bound.is_none());

    // The next round sees both jobs.
    proceed_tx.send(()).unwrap();
    let report = applied(scheduler.run_round().await.unwrap());
    assert_eq!(report.bound.len(), 2);
}

#[tokio::test]
async fn recycled_node_ids_are_not_bound_from_a_stale_solve() {
    let (solver, started_rx, proceed_tx) = gated_solver();
    let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(solver), SchedulerConfig::default());
    scheduler.register_resource(&machine("m0", 1)).await.unwrap();
    scheduler.add_job(&job("j1", &[10])).await.unwrap();
    let solved_node = scheduler.with_graph(|g| g.node_for_task_id(10).unwrap().id).await;

    let round = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_round().await }
    });
    let _started_rx = wait_started(started_rx).await;

    scheduler.handle_task_completion(10).await.unwrap();
    scheduler.add_job(&job("j1", &[99])).await.unwrap();
    let reused = scheduler.with_graph(|g| g.node_for_task_id(99).unwrap().id).await;
    assert_eq!(reused, solved_node);
    proceed_tx.send(()).unwrap();

    let outcome = round.await.unwrap().unwrap();
    assert_eq!(outcome, RoundOutcome::Superseded { discarded: 1 });
    let bound = scheduler
        .with_graph(|g| g.node_for_task_id(99).unwrap().bound_to.clone())
        .await;
    assert!(bound.is_none());
}

#[tokio::test]
async fn concurrent_rounds_apply_once() {
    let (solver, started_rx, proceed_tx) = gated_solver();
    let scheduler = FlowScheduler::new(trivial_graph(), Arc::new(solver), SchedulerConfig::default());
    scheduler.register_resource(&machine("m0", 2)).await.unwrap();
    scheduler.add_job(&job("j1", &[10])).await.unwrap();

    let spawn_round = || {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_round().await })
    };
    let first = spawn_round();
    let second = spawn_round();
    let started_rx = wait_started(started_rx).await;
    let _started_rx = wait_started(started_rx).await;
    proceed_tx.send(()).unwrap();
    proceed_tx.send(()).unwrap();

    let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
    let applied: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            RoundOutcome::Applied(report) => Some(report.bound.clone()),
            RoundOutcome::Superseded { .. } => None,
        })
        .collect();
    assert_eq!(applied, vec![vec![(10, "m0-pu0".to_string())]]);
    assert!(outcomes.contains(&RoundOutcome::Superseded { discarded: 1 }));
}
