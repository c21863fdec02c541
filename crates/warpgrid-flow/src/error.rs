//! Flow graph error types.

use thiserror::Error;

use crate::cost::CostModelError;
use crate::node::FlowNodeId;
use crate::types::{JobId, ResourceId, TaskId};

/// Errors that can occur while mutating the flow graph or running a
/// scheduling round.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("arc endpoint is not a live node: {src} -> {dst}")]
    InvalidEndpoint { src: FlowNodeId, dst: FlowNodeId },

    #[error("node not found: {0}")]
    UnknownNode(FlowNodeId),

    #[error("node already exists: {0}")]
    DuplicateNode(FlowNodeId),

    #[error("arc not found: {src} -> {dst}")]
    UnknownArc { src: FlowNodeId, dst: FlowNodeId },

    #[error("arc already exists: {src} -> {dst}")]
    DuplicateArc { src: FlowNodeId, dst: FlowNodeId },

    #[error("invalid capacity range [{lower}, {upper}]")]
    InvalidCapacity { lower: u64, upper: u64 },

    #[error("node {id} still has {arcs} live arcs")]
    NodeHasLiveArcs { id: FlowNodeId, arcs: usize },

    #[error("node {0} is permanent and cannot be deleted")]
    PermanentNode(FlowNodeId),

    #[error("unscheduled capacity of job {job} would drop below zero (delta {delta})")]
    CapacityUnderflow { job: JobId, delta: i64 },

    #[error("task not found: {0}")]
    UnknownTask(TaskId),

    #[error("resource not found: {0}")]
    UnknownResource(ResourceId),

    #[error("resource {0} is not a leaf and cannot run tasks")]
    NotALeaf(ResourceId),

    #[error("job not found: {0}")]
    UnknownJob(JobId),

    #[error("cost model error: {0}")]
    CostModel(#[from] CostModelError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("solver error: {0}")]
    Solver(#[from] anyhow::Error),
}

impl FlowError {
    /// Whether this error means the graph bookkeeping itself is broken.
    ///
    /// Fatal errors must stop the scheduling loop: continuing would hand a
    /// corrupted network to the solver. Everything else is a lookup miss or a
    /// per-entity failure that can be retried next round.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidEndpoint { .. }
                | FlowError::UnknownNode(_)
                | FlowError::DuplicateNode(_)
                | FlowError::UnknownArc { .. }
                | FlowError::DuplicateArc { .. }
                | FlowError::InvalidCapacity { .. }
                | FlowError::NodeHasLiveArcs { .. }
                | FlowError::PermanentNode(_)
                | FlowError::CapacityUnderflow { .. }
        )
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
