//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use warpgrid_flow::config::{GraphConfig, TrivialCostConfig};
use warpgrid_flow::types::{
    JobDescriptor, ResourceDescriptor, ResourceKind, ResourceTopologyNode, ResourceVector,
    TaskDescriptor, TaskId, TaskState,
};
use warpgrid_flow::{FlowGraph, GraphMirror, TrivialCostModel};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn trivial_graph() -> FlowGraph {
    init_tracing();
    FlowGraph::new(
        Box::new(TrivialCostModel::new(TrivialCostConfig::default())),
        GraphConfig::default(),
    )
}

pub fn resource(id: &str, kind: ResourceKind, parent: Option<&str>) -> ResourceTopologyNode {
    ResourceTopologyNode {
        descriptor: ResourceDescriptor {
            id: id.to_string(),
            kind,
            friendly_name: id.to_string(),
            capacity: ResourceVector {
                cpu_millis: 4000,
                ram_mb: 8192,
            },
        },
        parent_id: parent.map(str::to_string),
        children: Vec::new(),
    }
}

/// A machine with `pus` processing units named `<id>-pu<N>`.
pub fn machine(id: &str, pus: usize) -> ResourceTopologyNode {
    let mut root = resource(id, ResourceKind::Machine, None);
    root.children = (0..pus)
        .map(|i| resource(&format!("{id}-pu{i}"), ResourceKind::Pu, Some(id)))
        .collect();
    root
}

pub fn task(id: TaskId, job: &str) -> TaskDescriptor {
    TaskDescriptor {
        id,
        job_id: job.to_string(),
        state: TaskState::Runnable,
        name: format!("task-{id}"),
        resource_request: ResourceVector::default(),
        scheduled_to: None,
        spawned: Vec::new(),
    }
}

/// A job whose root task is `ids[0]` and which spawned the rest.
pub fn job(id: &str, ids: &[TaskId]) -> JobDescriptor {
    let mut root = task(ids[0], id);
    root.spawned = ids[1..].iter().map(|&t| task(t, id)).collect();
    JobDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        root_task: root,
    }
}

pub fn unsched_capacity(graph: &FlowGraph, job: &str) -> u64 {
    let agg = graph.get_unsched_agg_for_job(&job.to_string()).unwrap().id;
    graph.arc(agg, graph.sink_node().id).unwrap().cap_upper_bound
}

/// Every arc endpoint is a live node and adjacency agrees with the arc set.
pub fn assert_no_dangling_arcs(graph: &FlowGraph) {
    for arc in graph.arcs() {
        let src = graph.node(arc.src).expect("arc source must be live");
        let dst = graph.node(arc.dst).expect("arc destination must be live");
        assert!(src.outgoing().any(|d| d == arc.dst));
        assert!(dst.incoming().any(|s| s == arc.src));
    }
    let adjacency: usize = graph.nodes().map(|n| n.outgoing().count()).sum();
    assert_eq!(adjacency, graph.num_arcs());
}

/// The sink's demand matches the number of task nodes.
pub fn assert_supply_balanced(graph: &FlowGraph) {
    let supply: i64 = graph.nodes().map(|n| n.excess).sum();
    assert_eq!(supply, 0);
    assert_eq!(graph.sink_node().excess, -(graph.task_node_ids().len() as i64));
}

/// Feed the pending changes to `mirror` and check it now equals the graph.
pub fn assert_replay_matches(graph: &mut FlowGraph, mirror: &mut GraphMirror) {
    mirror.apply_all(&graph.reset_changes()).unwrap();
    assert_eq!(*mirror, GraphMirror::from_graph(graph));
}
