//! Trivial cost model: every arc of a kind costs the same.

use crate::config::TrivialCostConfig;
use crate::cost::{Cost, CostModel, CostResult};
use crate::types::{ResourceDescriptor, ResourceId, TaskId};

#[derive(Debug, Clone, Default)]
pub struct TrivialCostModel {
    config: TrivialCostConfig,
}

impl TrivialCostModel {
    pub fn new(config: TrivialCostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrivialCostConfig {
        &self.config
    }
}

impl CostModel for TrivialCostModel {
    fn name(&self) -> &'static str {
        "trivial"
    }

    fn task_to_unscheduled_agg_cost(&self, _task: TaskId) -> Cost {
        self.config.unscheduled_cost
    }

    fn task_to_cluster_agg_cost(&self, _task: TaskId) -> CostResult<Cost> {
        Ok(self.config.cluster_agg_cost)
    }

    fn task_to_resource_cost(&self, _task: TaskId, _resource: &ResourceId) -> CostResult<Cost> {
        Ok(self.config.preference_cost)
    }

    fn task_continuation_cost(&self, _task: TaskId, _resource: &ResourceId) -> CostResult<Cost> {
        Ok(self.config.continuation_cost)
    }

    fn leaf_capacity(&self, _resource: &ResourceDescriptor) -> u64 {
        self.config.leaf_capacity
    }
}
