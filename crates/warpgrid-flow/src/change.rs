//! Structural deltas emitted by the flow graph.
//!
//! Every node or arc level effect of a graph mutation appends exactly one
//! [`GraphChange`]. The log only shrinks when it is drained, which the
//! scheduler does once per round after the solver side has consumed it.

use serde::{Deserialize, Serialize};

use crate::arc::{FlowArc, FlowArcType};
use crate::node::{FlowNodeId, FlowNodeType};

/// One structural delta, replayable against an external representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphChange {
    AddNode {
        id: FlowNodeId,
        node_type: FlowNodeType,
        excess: i64,
    },
    DeleteNode {
        id: FlowNodeId,
    },
    /// Type or excess of a live node changed (task bound, sink demand, ...).
    ChangeNode {
        id: FlowNodeId,
        node_type: FlowNodeType,
        excess: i64,
    },
    AddArc {
        src: FlowNodeId,
        dst: FlowNodeId,
        lower: u64,
        upper: u64,
        cost: i64,
        arc_type: FlowArcType,
    },
    DeleteArc {
        src: FlowNodeId,
        dst: FlowNodeId,
    },
    ChangeArc {
        src: FlowNodeId,
        dst: FlowNodeId,
        lower: u64,
        upper: u64,
        cost: i64,
    },
}

impl GraphChange {
    pub(crate) fn add_arc(arc: &FlowArc) -> Self {
        GraphChange::AddArc {
            src: arc.src,
            dst: arc.dst,
            lower: arc.cap_lower_bound,
            upper: arc.cap_upper_bound,
            cost: arc.cost,
            arc_type: arc.arc_type,
        }
    }

    pub(crate) fn change_arc(arc: &FlowArc) -> Self {
        GraphChange::ChangeArc {
            src: arc.src,
            dst: arc.dst,
            lower: arc.cap_lower_bound,
            upper: arc.cap_upper_bound,
            cost: arc.cost,
        }
    }
}

/// Ordered, append-only list of changes since the last drain.
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: Vec<GraphChange>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: GraphChange) {
        self.entries.push(change);
    }

    pub fn entries(&self) -> &[GraphChange] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every pending change, leaving the log empty.
    pub fn drain(&mut self) -> Vec<GraphChange> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_log() {
        let mut log = ChangeLog::new();
        log.push(GraphChange::AddNode {
            id: 1,
            node_type: FlowNodeType::Sink,
            excess: 0,
        });
        log.push(GraphChange::DeleteNode { id: 1 });

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert!(log.is_empty());
        assert!(log.drain().is_empty());
    }
}
