//! Solver-side replica of the flow network.
//!
//! A [`GraphMirror`] is rebuilt purely from the change stream, the way an
//! external solver adapter keeps its own copy of the network. Applying a
//! change that does not fit the current replica is an error, so the mirror
//! doubles as a validator for the stream.

use std::collections::BTreeMap;

use crate::arc::{ArcKey, FlowArcType};
use crate::change::GraphChange;
use crate::error::{FlowError, FlowResult};
use crate::graph::FlowGraph;
use crate::node::{FlowNodeId, FlowNodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorNode {
    pub node_type: FlowNodeType,
    pub excess: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorArc {
    pub lower: u64,
    pub upper: u64,
    pub cost: i64,
    pub arc_type: FlowArcType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphMirror {
    nodes: BTreeMap<FlowNodeId, MirrorNode>,
    arcs: BTreeMap<ArcKey, MirrorArc>,
}

impl GraphMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a live graph directly, bypassing the change stream.
    pub fn from_graph(graph: &FlowGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|n| {
                (
                    n.id,
                    MirrorNode {
                        node_type: n.node_type,
                        excess: n.excess,
                    },
                )
            })
            .collect();
        let arcs = graph
            .arcs()
            .map(|a| {
                (
                    a.key(),
                    MirrorArc {
                        lower: a.cap_lower_bound,
                        upper: a.cap_upper_bound,
                        cost: a.cost,
                        arc_type: a.arc_type,
                    },
                )
            })
            .collect();
        Self { nodes, arcs }
    }

    pub fn apply(&mut self, change: &GraphChange) -> FlowResult<()> {
        match *change {
            GraphChange::AddNode { id, node_type, excess } => {
                if self.nodes.contains_key(&id) {
                    return Err(FlowError::DuplicateNode(id));
                }
                self.nodes.insert(id, MirrorNode { node_type, excess });
            }
            GraphChange::DeleteNode { id } => {
                let arcs = self.arcs.keys().filter(|(s, d)| *s == id || *d == id).count();
                if arcs > 0 {
                    return Err(FlowError::NodeHasLiveArcs { id, arcs });
                }
                self.nodes.remove(&id).ok_or(FlowError::UnknownNode(id))?;
            }
            GraphChange::ChangeNode { id, node_type, excess } => {
                let node = self.nodes.get_mut(&id).ok_or(FlowError::UnknownNode(id))?;
                *node = MirrorNode { node_type, excess };
            }
            GraphChange::AddArc {
                src,
                dst,
                lower,
                upper,
                cost,
                arc_type,
            } => {
                if !self.nodes.contains_key(&src) || !self.nodes.contains_key(&dst) {
                    return Err(FlowError::InvalidEndpoint { src, dst });
                }
                if self.arcs.contains_key(&(src, dst)) {
                    return Err(FlowError::DuplicateArc { src, dst });
                }
                self.arcs.insert(
                    (src, dst),
                    MirrorArc {
                        lower,
                        upper,
                        cost,
                        arc_type,
                    },
                );
            }
            GraphChange::DeleteArc { src, dst } => {
                self.arcs
                    .remove(&(src, dst))
                    .ok_or(FlowError::UnknownArc { src, dst })?;
            }
            GraphChange::ChangeArc {
                src,
                dst,
                lower,
                upper,
                cost,
            } => {
                let arc = self
                    .arcs
                    .get_mut(&(src, dst))
                    .ok_or(FlowError::UnknownArc { src, dst })?;
                arc.lower = lower;
                arc.upper = upper;
                arc.cost = cost;
            }
        }
        Ok(())
    }

    pub fn apply_all<'a>(&mut self, changes: impl IntoIterator<Item = &'a GraphChange>) -> FlowResult<()> {
        changes.into_iter().try_for_each(|change| self.apply(change))
    }

    pub fn node(&self, id: FlowNodeId) -> Option<&MirrorNode> {
        self.nodes.get(&id)
    }

    pub fn arc(&self, src: FlowNodeId, dst: FlowNodeId) -> Option<&MirrorArc> {
        self.arcs.get(&(src, dst))
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = (FlowNodeId, &MirrorNode)> {
        self.nodes.iter().map(|(&id, node)| (id, node))
    }

    /// Arcs in ascending (src, dst) order.
    pub fn arcs(&self) -> impl Iterator<Item = (ArcKey, &MirrorArc)> {
        self.arcs.iter().map(|(&key, arc)| (key, arc))
    }

    pub fn outgoing(&self, src: FlowNodeId) -> impl Iterator<Item = (FlowNodeId, &MirrorArc)> {
        self.arcs
            .range((src, FlowNodeId::MIN)..=(src, FlowNodeId::MAX))
            .map(|(&(_, dst), arc)| (dst, arc))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_arcs(&self) -> usize {
        self.arcs.len()
    }

    pub fn max_node_id(&self) -> FlowNodeId {
        self.nodes.keys().next_back().copied().unwrap_or(0)
    }
}
