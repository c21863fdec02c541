//! Pluggable cost models.
//!
//! The flow graph never computes a cost itself: whenever it creates or
//! refreshes an arc it asks the [`CostModel`] it was built with. Task-side
//! queries are fallible because a model may lack data for a particular
//! task; a failure skips that task for the round. The unscheduled arc and
//! resource-side queries are infallible: the model is told about every
//! resource before any arc touching it is built.
//!
//! # Models
//!
//! - **`trivial`**: constant costs, no equivalence classes
//! - **`request_class`**: tasks grouped by resource request, preference arcs
//!   to machines that fit the request (best fit first)

pub mod request_class;
pub mod trivial;

use thiserror::Error;

use crate::types::{EquivClass, JobId, ResourceDescriptor, ResourceId, TaskDescriptor, TaskId};

pub use request_class::RequestClassCostModel;
pub use trivial::TrivialCostModel;

/// Arc cost as seen by the solver.
pub type Cost = i64;

/// Errors a cost model may report for a single entity.
#[derive(Debug, Error)]
pub enum CostModelError {
    #[error("no cost data for task {0}")]
    UnknownTask(TaskId),

    #[error("no cost data for resource {0}")]
    UnknownResource(ResourceId),

    #[error("cost model unavailable: {0}")]
    Unavailable(String),
}

pub type CostResult<T> = Result<T, CostModelError>;

/// Computes costs and capacities for the arcs of the flow network.
pub trait CostModel: Send + Sync {
    fn name(&self) -> &'static str;

    // ── Task arcs ─────────────────────────────────────────────────

    /// Cost of leaving the task unscheduled. Infallible: every task must
    /// always be able to route its flow through its job's aggregator.
    fn task_to_unscheduled_agg_cost(&self, task: TaskId) -> Cost;

    fn task_to_cluster_agg_cost(&self, task: TaskId) -> CostResult<Cost>;

    fn task_to_resource_cost(&self, task: TaskId, resource: &ResourceId) -> CostResult<Cost>;

    /// Cost of keeping a bound task where it runs.
    fn task_continuation_cost(&self, task: TaskId, resource: &ResourceId) -> CostResult<Cost>;

    /// Resources the task should get direct preference arcs to.
    fn task_preference_arcs(&self, _task: &TaskDescriptor) -> Vec<ResourceId> {
        Vec::new()
    }

    // ── Equivalence classes ───────────────────────────────────────

    /// The class this task belongs to, if the model groups tasks.
    fn task_equiv_class(&self, _task: &TaskDescriptor) -> Option<EquivClass> {
        None
    }

    fn task_to_equiv_class_cost(&self, _task: TaskId, _class: EquivClass) -> CostResult<Cost> {
        Ok(0)
    }

    fn equiv_class_preference_arcs(&self, _class: EquivClass) -> Vec<ResourceId> {
        Vec::new()
    }

    fn equiv_class_to_resource_cost(&self, _class: EquivClass, _resource: &ResourceId) -> Cost {
        0
    }

    // ── Aggregators and resources ─────────────────────────────────

    fn unscheduled_agg_to_sink_cost(&self, _job: &JobId) -> Cost {
        0
    }

    fn cluster_agg_to_resource_cost(&self, _resource: &ResourceId) -> Cost {
        0
    }

    fn resource_to_resource_cost(&self, _parent: &ResourceId, _child: &ResourceId) -> Cost {
        0
    }

    fn leaf_to_sink_cost(&self, _resource: &ResourceId) -> Cost {
        0
    }

    /// Task slots offered by a leaf resource.
    fn leaf_capacity(&self, _resource: &ResourceDescriptor) -> u64 {
        1
    }

    /// Capacity a branch resource forwards, given the capacities of the arcs
    /// to its children.
    fn aggregate_capacity(&self, children: &[u64]) -> u64 {
        children.iter().sum()
    }

    // ── Topology notifications ────────────────────────────────────

    fn add_resource(&mut self, _resource: &ResourceDescriptor) {}

    fn remove_resource(&mut self, _resource: &ResourceId) {}
}
