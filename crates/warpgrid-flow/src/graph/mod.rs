//! The flow graph: an incrementally maintained min-cost flow network.
//!
//! The graph mirrors the live cluster. Tasks are supply nodes; every unit of
//! flow leaves a task through one of its outgoing arcs and ends at the
//! single sink:
//!
//! ```text
//! task ──> unscheduled aggregator (per job) ─────────────────────> sink
//!   ├────> cluster aggregator ──> machine ──> ... ──> PU ──────────> sink
//!   ├────> equivalence class ──> machine / PU
//!   └────> preferred resource
//! ```
//!
//! Nodes live in an arena keyed by integer id; deleted ids are recycled FIFO.
//! Every structural effect of a mutation is appended to the change log, which
//! the scheduler drains once per round. Topology and job level operations
//! live in `resources` and `jobs`; this module holds the node/arc primitives
//! and the indices they keep in sync.

mod jobs;
mod resources;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::arc::{ArcKey, FlowArc, FlowArcType};
use crate::change::{ChangeLog, GraphChange};
use crate::config::{FlowConfig, GraphConfig};
use crate::cost::CostModel;
use crate::error::{FlowError, FlowResult};
use crate::node::{FlowNode, FlowNodeId, FlowNodeType, IdAllocator};
use crate::types::{EquivClass, JobId, ResourceId, TaskId};

pub use jobs::JobUpdate;

pub struct FlowGraph {
    cost_model: Box<dyn CostModel>,
    config: GraphConfig,
    ids: IdAllocator,
    nodes: HashMap<FlowNodeId, FlowNode>,
    arcs: BTreeMap<ArcKey, FlowArc>,
    cluster_agg_id: FlowNodeId,
    sink_id: FlowNodeId,

    task_to_node: HashMap<TaskId, FlowNodeId>,
    resource_to_node: HashMap<ResourceId, FlowNodeId>,
    /// Parent of every non-root resource, used to walk capacity changes
    /// upward without keeping the topology tree around.
    resource_to_parent: HashMap<ResourceId, ResourceId>,
    task_to_equiv_class_node: HashMap<TaskId, FlowNodeId>,
    equiv_class_to_node: HashMap<EquivClass, FlowNodeId>,
    /// A job is represented by its unscheduled aggregator.
    job_to_unsched_agg: HashMap<JobId, FlowNodeId>,
    job_to_tasks: HashMap<JobId, BTreeSet<TaskId>>,

    leaf_nodes: BTreeSet<FlowNodeId>,
    task_nodes: BTreeSet<FlowNodeId>,
    unsched_agg_nodes: BTreeSet<FlowNodeId>,

    changes: ChangeLog,
}

impl FlowGraph {
    /// Create a graph holding only the cluster aggregator and the sink.
    pub fn new(cost_model: Box<dyn CostModel>, config: GraphConfig) -> Self {
        let mut graph = Self {
            cost_model,
            config,
            ids: IdAllocator::new(),
            nodes: HashMap::new(),
            arcs: BTreeMap::new(),
            cluster_agg_id: 0,
            sink_id: 0,
            task_to_node: HashMap::new(),
            resource_to_node: HashMap::new(),
            resource_to_parent: HashMap::new(),
            task_to_equiv_class_node: HashMap::new(),
            equiv_class_to_node: HashMap::new(),
            job_to_unsched_agg: HashMap::new(),
            job_to_tasks: HashMap::new(),
            leaf_nodes: BTreeSet::new(),
            task_nodes: BTreeSet::new(),
            unsched_agg_nodes: BTreeSet::new(),
            changes: ChangeLog::new(),
        };
        graph.cluster_agg_id = graph.add_node(FlowNodeType::JobAggregator);
        graph.sink_id = graph.add_node(FlowNodeType::Sink);
        debug!(
            cost_model = graph.cost_model.name(),
            cluster_agg = graph.cluster_agg_id,
            sink = graph.sink_id,
            "flow graph created"
        );
        graph
    }

    pub fn from_config(config: &FlowConfig) -> Self {
        Self::new(config.build_cost_model(), config.graph.clone())
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn node(&self, id: FlowNodeId) -> Option<&FlowNode> {
        self.nodes.get(&id)
    }

    pub fn arc(&self, src: FlowNodeId, dst: FlowNodeId) -> Option<&FlowArc> {
        self.arcs.get(&(src, dst))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    /// All arcs, ordered by (src, dst).
    pub fn arcs(&self) -> impl Iterator<Item = &FlowArc> {
        self.arcs.values()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_arcs(&self) -> usize {
        self.arcs.len()
    }

    /// Highest node id handed out so far.
    pub fn max_node_id(&self) -> FlowNodeId {
        self.ids.high_water()
    }

    pub fn sink_node(&self) -> &FlowNode {
        &self.nodes[&self.sink_id]
    }

    pub fn cluster_agg_node(&self) -> &FlowNode {
        &self.nodes[&self.cluster_agg_id]
    }

    pub fn leaf_node_ids(&self) -> &BTreeSet<FlowNodeId> {
        &self.leaf_nodes
    }

    pub fn task_node_ids(&self) -> &BTreeSet<FlowNodeId> {
        &self.task_nodes
    }

    pub fn unsched_agg_ids(&self) -> &BTreeSet<FlowNodeId> {
        &self.unsched_agg_nodes
    }

    pub fn node_for_task_id(&self, task: TaskId) -> Option<&FlowNode> {
        self.task_to_node.get(&task).and_then(|id| self.nodes.get(id))
    }

    pub fn node_for_resource_id(&self, resource: &ResourceId) -> Option<&FlowNode> {
        self.resource_to_node.get(resource).and_then(|id| self.nodes.get(id))
    }

    pub fn get_unsched_agg_for_job(&self, job: &JobId) -> Option<&FlowNode> {
        self.job_to_unsched_agg.get(job).and_then(|id| self.nodes.get(id))
    }

    pub fn equiv_class_node_for_task(&self, task: TaskId) -> Option<&FlowNode> {
        self.task_to_equiv_class_node
            .get(&task)
            .and_then(|id| self.nodes.get(id))
    }

    pub fn node_for_equiv_class(&self, class: EquivClass) -> Option<&FlowNode> {
        self.equiv_class_to_node.get(&class).and_then(|id| self.nodes.get(id))
    }

    pub fn parent_of_resource(&self, resource: &ResourceId) -> Option<&ResourceId> {
        self.resource_to_parent.get(resource)
    }

    /// Task ids currently represented for a job.
    pub fn tasks_for_job(&self, job: &JobId) -> Vec<TaskId> {
        self.job_to_tasks
            .get(job)
            .map(|tasks| tasks.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn check_node_type(&self, id: FlowNodeId, node_type: FlowNodeType) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.node_type == node_type)
    }

    pub fn cost_model(&self) -> &dyn CostModel {
        self.cost_model.as_ref()
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    // ── Change tracking ───────────────────────────────────────────

    /// Changes recorded since the last [`reset_changes`](Self::reset_changes).
    pub fn graph_changes(&self) -> &[GraphChange] {
        self.changes.entries()
    }

    /// Drain the change log. Safe to call when it is empty.
    pub fn reset_changes(&mut self) -> Vec<GraphChange> {
        let drained = self.changes.drain();
        if !drained.is_empty() {
            debug!(changes = drained.len(), "change log drained");
        }
        drained
    }

    // ── Node and arc primitives ───────────────────────────────────

    pub fn add_node(&mut self, node_type: FlowNodeType) -> FlowNodeId {
        self.add_node_with_excess(node_type, 0)
    }

    pub(crate) fn add_node_with_excess(&mut self, node_type: FlowNodeType, excess: i64) -> FlowNodeId {
        let id = self.ids.allocate();
        debug_assert!(!self.nodes.contains_key(&id), "recycled id {id} is still live");
        let mut node = FlowNode::new(id, node_type);
        node.excess = excess;
        self.nodes.insert(id, node);
        self.changes.push(GraphChange::AddNode {
            id,
            node_type,
            excess,
        });
        id
    }

    pub fn add_arc(
        &mut self,
        src: FlowNodeId,
        dst: FlowNodeId,
        lower: u64,
        upper: u64,
        cost: i64,
        arc_type: FlowArcType,
    ) -> FlowResult<ArcKey> {
        if lower > upper {
            return Err(FlowError::InvalidCapacity { lower, upper });
        }
        if !self.nodes.contains_key(&src) || !self.nodes.contains_key(&dst) {
            return Err(FlowError::InvalidEndpoint { src, dst });
        }
        if self.arcs.contains_key(&(src, dst)) {
            return Err(FlowError::DuplicateArc { src, dst });
        }

        let arc = FlowArc {
            src,
            dst,
            cap_lower_bound: lower,
            cap_upper_bound: upper,
            cost,
            arc_type,
        };
        self.changes.push(GraphChange::add_arc(&arc));
        self.arcs.insert((src, dst), arc);
        if let Some(node) = self.nodes.get_mut(&src) {
            node.outgoing.insert(dst);
        }
        if let Some(node) = self.nodes.get_mut(&dst) {
            node.incoming.insert(src);
        }
        Ok((src, dst))
    }

    /// Update an arc's capacity and cost in place.
    ///
    /// Returns `false` without logging anything when the arc already carries
    /// these values.
    pub fn change_arc(
        &mut self,
        src: FlowNodeId,
        dst: FlowNodeId,
        lower: u64,
        upper: u64,
        cost: i64,
    ) -> FlowResult<bool> {
        if lower > upper {
            return Err(FlowError::InvalidCapacity { lower, upper });
        }
        let arc = self
            .arcs
            .get_mut(&(src, dst))
            .ok_or(FlowError::UnknownArc { src, dst })?;
        if arc.matches(lower, upper, cost) {
            return Ok(false);
        }
        arc.cap_lower_bound = lower;
        arc.cap_upper_bound = upper;
        arc.cost = cost;
        self.changes.push(GraphChange::change_arc(arc));
        Ok(true)
    }

    pub fn delete_arc(&mut self, src: FlowNodeId, dst: FlowNodeId) -> FlowResult<FlowArc> {
        let arc = self
            .arcs
            .remove(&(src, dst))
            .ok_or(FlowError::UnknownArc { src, dst })?;
        if let Some(node) = self.nodes.get_mut(&src) {
            node.outgoing.remove(&dst);
        }
        if let Some(node) = self.nodes.get_mut(&dst) {
            node.incoming.remove(&src);
        }
        self.changes.push(GraphChange::DeleteArc { src, dst });
        Ok(arc)
    }

    /// Remove a node that no longer has any arcs.
    ///
    /// Every index entry referencing the node is purged before its id goes
    /// back to the allocator.
    pub fn delete_node(&mut self, id: FlowNodeId) -> FlowResult<FlowNode> {
        if id == self.sink_id || id == self.cluster_agg_id {
            return Err(FlowError::PermanentNode(id));
        }
        let degree = self
            .nodes
            .get(&id)
            .ok_or(FlowError::UnknownNode(id))?
            .degree();
        if degree > 0 {
            return Err(FlowError::NodeHasLiveArcs { id, arcs: degree });
        }

        let node = self.nodes.remove(&id).ok_or(FlowError::UnknownNode(id))?;
        self.purge_indices(&node);
        self.changes.push(GraphChange::DeleteNode { id });
        self.ids.release(id);
        Ok(node)
    }

    // ── Internal helpers ──────────────────────────────────────────

    fn purge_indices(&mut self, node: &FlowNode) {
        let id = node.id;
        self.leaf_nodes.remove(&id);
        self.task_nodes.remove(&id);
        self.unsched_agg_nodes.remove(&id);

        if let Some(task) = node.task_id {
            if self.task_to_node.get(&task) == Some(&id) {
                self.task_to_node.remove(&task);
            }
            self.task_to_equiv_class_node.remove(&task);
            if let Some(job) = &node.job_id
                && let Some(tasks) = self.job_to_tasks.get_mut(job)
            {
                tasks.remove(&task);
            }
        }
        if let Some(resource) = &node.resource_id
            && self.resource_to_node.get(resource) == Some(&id)
        {
            self.resource_to_node.remove(resource);
            self.resource_to_parent.remove(resource);
        }
        if let Some(class) = node.equiv_class
            && self.equiv_class_to_node.get(&class) == Some(&id)
        {
            self.equiv_class_to_node.remove(&class);
        }
        if node.node_type == FlowNodeType::UnscheduledAggregator
            && let Some(job) = &node.job_id
            && self.job_to_unsched_agg.get(job) == Some(&id)
        {
            self.job_to_unsched_agg.remove(job);
        }
    }

    fn node_ref(&self, id: FlowNodeId) -> FlowResult<&FlowNode> {
        self.nodes.get(&id).ok_or(FlowError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: FlowNodeId) -> FlowResult<&mut FlowNode> {
        self.nodes.get_mut(&id).ok_or(FlowError::UnknownNode(id))
    }

    /// Add the arc, or bring an existing one to the given values.
    /// Returns whether anything changed.
    fn set_arc(
        &mut self,
        src: FlowNodeId,
        dst: FlowNodeId,
        upper: u64,
        cost: i64,
        arc_type: FlowArcType,
    ) -> FlowResult<bool> {
        if self.arcs.contains_key(&(src, dst)) {
            self.change_arc(src, dst, 0, upper, cost)
        } else {
            self.add_arc(src, dst, 0, upper, cost, arc_type)?;
            Ok(true)
        }
    }

    /// Change a live node's type and/or excess, logging one entry if either
    /// actually changed.
    fn update_node(
        &mut self,
        id: FlowNodeId,
        node_type: FlowNodeType,
        excess_delta: i64,
    ) -> FlowResult<()> {
        let node = self.node_mut(id)?;
        if node.node_type == node_type && excess_delta == 0 {
            return Ok(());
        }
        node.node_type = node_type;
        node.excess += excess_delta;
        let change = GraphChange::ChangeNode {
            id,
            node_type,
            excess: node.excess,
        };
        self.changes.push(change);
        Ok(())
    }

    fn adjust_sink_excess(&mut self, delta: i64) -> FlowResult<()> {
        self.update_node(self.sink_id, FlowNodeType::Sink, delta)
    }

    /// Delete every arc leaving `id`.
    fn delete_outgoing_arcs(&mut self, id: FlowNodeId) -> FlowResult<Vec<FlowArc>> {
        let targets: Vec<FlowNodeId> = self.node_ref(id)?.outgoing().collect();
        targets
            .into_iter()
            .map(|dst| self.delete_arc(id, dst))
            .collect()
    }
}

impl std::fmt::Debug for FlowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowGraph")
            .field("cost_model", &self.cost_model.name())
            .field("nodes", &self.nodes.len())
            .field("arcs", &self.arcs.len())
            .field("pending_changes", &self.changes.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::TrivialCostConfig;
    use crate::cost::TrivialCostModel;
    use crate::types::{
        JobDescriptor, ResourceDescriptor, ResourceKind, ResourceTopologyNode, ResourceVector,
        TaskDescriptor, TaskState,
    };

    pub fn trivial_graph() -> FlowGraph {
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
                friendly_name: String::new(),
                capacity: ResourceVector {
                    cpu_millis: 4000,
                    ram_mb: 8192,
                },
            },
            parent_id: parent.map(str::to_string),
            children: Vec::new(),
        }
    }

    /// A machine with `pus` leaf processing units.
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

    /// A job whose root task spawned `ids[1..]`.
    pub fn job(id: &str, ids: &[TaskId]) -> JobDescriptor {
        let mut root = task(ids[0], id);
        root.spawned = ids[1..].iter().map(|&t| task(t, id)).collect();
        JobDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            root_task: root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn new_graph_has_cluster_agg_and_sink() {
        let graph = trivial_graph();
        assert_eq!(graph.num_nodes(), 2);
        assert_eq!(graph.cluster_agg_node().node_type, FlowNodeType::JobAggregator);
        assert_eq!(graph.sink_node().node_type, FlowNodeType::Sink);
        assert_eq!(graph.graph_changes().len(), 2);
    }

    #[test]
    fn add_arc_rejects_dead_endpoints() {
        let mut graph = trivial_graph();
        let a = graph.add_node(FlowNodeType::Machine);
        let err = graph
            .add_arc(a, 999, 0, 1, 0, FlowArcType::ResourceToResource)
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidEndpoint { src, dst } if src == a && dst == 999));
        assert!(err.is_fatal());
    }

    #[test]
    fn add_arc_rejects_inverted_capacity_and_duplicates() {
        let mut graph = trivial_graph();
        let a = graph.add_node(FlowNodeType::Machine);
        let b = graph.add_node(FlowNodeType::Pu);
        assert!(matches!(
            graph.add_arc(a, b, 3, 1, 0, FlowArcType::ResourceToResource),
            Err(FlowError::InvalidCapacity { lower: 3, upper: 1 })
        ));
        graph.add_arc(a, b, 0, 1, 0, FlowArcType::ResourceToResource).unwrap();
        assert!(matches!(
            graph.add_arc(a, b, 0, 1, 0, FlowArcType::ResourceToResource),
            Err(FlowError::DuplicateArc { .. })
        ));
    }

    #[test]
    fn change_arc_in_place_and_noop_when_equal() {
        let mut graph = trivial_graph();
        let a = graph.add_node(FlowNodeType::Machine);
        let b = graph.add_node(FlowNodeType::Pu);
        graph.add_arc(a, b, 0, 1, 4, FlowArcType::ResourceToResource).unwrap();
        graph.reset_changes();

        assert!(graph.change_arc(a, b, 0, 3, 7).unwrap());
        assert!(!graph.change_arc(a, b, 0, 3, 7).unwrap());

        let arc = graph.arc(a, b).unwrap();
        assert_eq!((arc.cap_upper_bound, arc.cost), (3, 7));
        assert_eq!(
            graph.reset_changes(),
            vec![GraphChange::ChangeArc { src: a, dst: b, lower: 0, upper: 3, cost: 7 }]
        );
    }

    #[test]
    fn delete_node_with_live_arcs_fails() {
        let mut graph = trivial_graph();
        let a = graph.add_node(FlowNodeType::Machine);
        let b = graph.add_node(FlowNodeType::Pu);
        graph.add_arc(a, b, 0, 1, 0, FlowArcType::ResourceToResource).unwrap();

        assert!(matches!(
            graph.delete_node(b),
            Err(FlowError::NodeHasLiveArcs { arcs: 1, .. })
        ));
        graph.delete_arc(a, b).unwrap();
        graph.delete_node(b).unwrap();
        assert!(graph.node(b).is_none());
        assert!(graph.node(a).unwrap().outgoing().next().is_none());
    }

    #[test]
    fn permanent_nodes_cannot_be_deleted() {
        let mut graph = trivial_graph();
        let sink = graph.sink_node().id;
        assert!(matches!(graph.delete_node(sink), Err(FlowError::PermanentNode(_))));
    }

    #[test]
    fn deleted_ids_are_recycled_without_collisions() {
        let mut graph = trivial_graph();
        let ids: Vec<FlowNodeId> = (0..4).map(|_| graph.add_node(FlowNodeType::Machine)).collect();
        graph.delete_node(ids[1]).unwrap();
        graph.delete_node(ids[3]).unwrap();

        let reused_first = graph.add_node(FlowNodeType::Pu);
        let reused_second = graph.add_node(FlowNodeType::Pu);
        let fresh = graph.add_node(FlowNodeType::Pu);

        assert_eq!(reused_first, ids[1]);
        assert_eq!(reused_second, ids[3]);
        assert_eq!(fresh, ids[3] + 1);

        let live: BTreeSet<FlowNodeId> = graph.nodes().map(|n| n.id).collect();
        assert_eq!(live.len(), graph.num_nodes());
    }

    #[test]
    fn reset_changes_on_empty_log_is_noop() {
        let mut graph = trivial_graph();
        graph.reset_changes();
        assert!(graph.reset_changes().is_empty());
        assert!(graph.graph_changes().is_empty());
    }
}
