//! Flow graph vertices.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{EquivClass, JobId, ResourceId, TaskId};

/// Identity of a node in the flow graph. Ids start at 1.
pub type FlowNodeId = u64;

/// Role of a node in the flow network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowNodeType {
    RootTask,
    UnscheduledTask,
    ScheduledTask,
    EquivalenceClass,
    /// Internal resource node (machine, socket, core, ...).
    Machine,
    /// Leaf resource: one processing unit.
    Pu,
    UnscheduledAggregator,
    /// The cluster-wide aggregator every task may route through.
    JobAggregator,
    Sink,
}

impl FlowNodeType {
    pub fn is_task(&self) -> bool {
        matches!(
            self,
            FlowNodeType::RootTask | FlowNodeType::UnscheduledTask | FlowNodeType::ScheduledTask
        )
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, FlowNodeType::Machine | FlowNodeType::Pu)
    }

    /// Numeric code used in DIMACS node descriptor lines.
    pub fn code(&self) -> u8 {
        match self {
            FlowNodeType::RootTask => 0,
            FlowNodeType::ScheduledTask => 1,
            FlowNodeType::UnscheduledTask => 2,
            FlowNodeType::JobAggregator => 3,
            FlowNodeType::Sink => 4,
            FlowNodeType::EquivalenceClass => 5,
            FlowNodeType::Machine => 6,
            FlowNodeType::Pu => 7,
            FlowNodeType::UnscheduledAggregator => 8,
        }
    }
}

/// A vertex of the flow network.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowNode {
    pub id: FlowNodeId,
    pub node_type: FlowNodeType,
    /// Supply (positive) or demand (negative) seen by the solver.
    pub excess: i64,
    pub task_id: Option<TaskId>,
    pub resource_id: Option<ResourceId>,
    pub job_id: Option<JobId>,
    pub equiv_class: Option<EquivClass>,
    /// Resource a task node is pinned to.
    pub bound_to: Option<ResourceId>,
    /// Destinations of outgoing arcs.
    pub(crate) outgoing: BTreeSet<FlowNodeId>,
    /// Sources of incoming arcs.
    pub(crate) incoming: BTreeSet<FlowNodeId>,
}

impl FlowNode {
    pub fn new(id: FlowNodeId, node_type: FlowNodeType) -> Self {
        Self {
            id,
            node_type,
            excess: 0,
            task_id: None,
            resource_id: None,
            job_id: None,
            equiv_class: None,
            bound_to: None,
            outgoing: BTreeSet::new(),
            incoming: BTreeSet::new(),
        }
    }

    pub fn outgoing(&self) -> impl Iterator<Item = FlowNodeId> + '_ {
        self.outgoing.iter().copied()
    }

    pub fn incoming(&self) -> impl Iterator<Item = FlowNodeId> + '_ {
        self.incoming.iter().copied()
    }

    /// Number of arcs touching this node, in either direction.
    pub fn degree(&self) -> usize {
        self.outgoing.len() + self.incoming.len()
    }
}

/// Hands out node ids, recycling released ones in FIFO order before
/// advancing the counter.
#[derive(Debug)]
pub struct IdAllocator {
    next: FlowNodeId,
    unused: VecDeque<FlowNodeId>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: 1,
            unused: VecDeque::new(),
        }
    }

    pub fn allocate(&mut self) -> FlowNodeId {
        match self.unused.pop_front() {
            Some(id) => id,
            None => {
                let id = self.next;
                self.next += 1;
                id
            }
        }
    }

    /// Return an id to the pool. The caller guarantees nothing references it.
    pub fn release(&mut self, id: FlowNodeId) {
        debug_assert!(id < self.next, "releasing an id that was never handed out");
        debug_assert!(!self.unused.contains(&id), "double release of node id {id}");
        self.unused.push_back(id);
    }

    /// Highest id ever handed out (0 if none).
    pub fn high_water(&self) -> FlowNodeId {
        self.next - 1
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
