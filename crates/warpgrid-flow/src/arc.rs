//! Flow graph edges.

use serde::{Deserialize, Serialize};

use crate::node::FlowNodeId;

/// An arc is identified by its ordered endpoint pair; the graph never holds
/// two arcs between the same source and destination.
pub type ArcKey = (FlowNodeId, FlowNodeId);

/// What relationship an arc models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlowArcType {
    TaskToUnscheduledAgg,
    UnscheduledAggToSink,
    TaskToClusterAgg,
    /// Preference arc from a task straight to a resource.
    TaskToResource,
    /// A bound task pinned to the resource it runs on.
    Running,
    TaskToEquivClass,
    EquivClassToResource,
    ClusterAggToResource,
    ResourceToResource,
    LeafToSink,
}

/// A directed edge with a capacity range and a cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowArc {
    pub src: FlowNodeId,
    pub dst: FlowNodeId,
    pub cap_lower_bound: u64,
    pub cap_upper_bound: u64,
    pub cost: i64,
    pub arc_type: FlowArcType,
}

impl FlowArc {
    pub fn key(&self) -> ArcKey {
        (self.src, self.dst)
    }

    /// Whether applying these values would change nothing.
    pub fn matches(&self, lower: u64, upper: u64, cost: i64) -> bool {
        self.cap_lower_bound == lower && self.cap_upper_bound == upper && self.cost == cost
    }
}
