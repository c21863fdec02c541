//! Request-class cost model.
//!
//! Tasks with the same resource request are interchangeable for placement,
//! so they share one equivalence class. The class id encodes the request
//! itself (CPU millicores in the high 32 bits, memory in the low 32 bits),
//! which lets the model recover the request from the class alone.
//!
//! Each class gets preference arcs to the machines whose capacity fits the
//! request, best fit first. The arc cost is the percentage of the machine's
//! CPU left idle after placing one task, so tight fits are cheaper.

use std::collections::BTreeMap;

use tracing::debug;

use crate::cost::{Cost, CostModel, CostResult, TrivialCostModel};
use crate::types::{
    EquivClass, ResourceDescriptor, ResourceId, ResourceKind, ResourceVector, TaskDescriptor,
    TaskId,
};

#[derive(Debug, Clone)]
pub struct RequestClassCostModel {
    base: TrivialCostModel,
    /// Machines known to the model and their capacity.
    machines: BTreeMap<ResourceId, ResourceVector>,
    max_preference_arcs: usize,
}

impl RequestClassCostModel {
    pub fn new(base: TrivialCostModel, max_preference_arcs: usize) -> Self {
        Self {
            base,
            machines: BTreeMap::new(),
            max_preference_arcs,
        }
    }

    /// Class id for a request, or `None` for tasks that request nothing.
    pub fn class_for_request(request: &ResourceVector) -> Option<EquivClass> {
        if *request == ResourceVector::default() {
            return None;
        }
        let cpu = request.cpu_millis.min(u64::from(u32::MAX));
        let ram = request.ram_mb.min(u64::from(u32::MAX));
        Some((cpu << 32) | ram)
    }

    pub fn request_for_class(class: EquivClass) -> ResourceVector {
        ResourceVector {
            cpu_millis: class >> 32,
            ram_mb: class & u64::from(u32::MAX),
        }
    }

    /// Idle CPU share, in percent, after placing `request` on `capacity`.
    fn slack(capacity: &ResourceVector, request: &ResourceVector) -> Cost {
        if capacity.cpu_millis == 0 {
            return 100;
        }
        let idle = capacity.cpu_millis.saturating_sub(request.cpu_millis);
        (u128::from(idle) * 100 / u128::from(capacity.cpu_millis)) as Cost
    }
}

impl CostModel for RequestClassCostModel {
    fn name(&self) -> &'static str {
        "request_class"
    }

    fn task_to_unscheduled_agg_cost(&self, task: TaskId) -> Cost {
        self.base.task_to_unscheduled_agg_cost(task)
    }

    fn task_to_cluster_agg_cost(&self, task: TaskId) -> CostResult<Cost> {
        self.base.task_to_cluster_agg_cost(task)
    }

    fn task_to_resource_cost(&self, task: TaskId, resource: &ResourceId) -> CostResult<Cost> {
        self.base.task_to_resource_cost(task, resource)
    }

    fn task_continuation_cost(&self, task: TaskId, resource: &ResourceId) -> CostResult<Cost> {
        self.base.task_continuation_cost(task, resource)
    }

    fn task_equiv_class(&self, task: &TaskDescriptor) -> Option<EquivClass> {
        Self::class_for_request(&task.resource_request)
    }

    fn equiv_class_preference_arcs(&self, class: EquivClass) -> Vec<ResourceId> {
        let request = Self::request_for_class(class);
        let mut fitting: Vec<(Cost, &ResourceId)> = self
            .machines
            .iter()
            .filter(|(_, capacity)| capacity.fits(&request))
            .map(|(id, capacity)| (Self::slack(capacity, &request), id))
            .collect();
        fitting.sort();
        fitting
            .into_iter()
            .take(self.max_preference_arcs)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn equiv_class_to_resource_cost(&self, class: EquivClass, resource: &ResourceId) -> Cost {
        let request = Self::request_for_class(class);
        match self.machines.get(resource) {
            Some(capacity) => Self::slack(capacity, &request),
            None => self.base.config().unscheduled_cost,
        }
    }

    fn leaf_capacity(&self, resource: &ResourceDescriptor) -> u64 {
        self.base.leaf_capacity(resource)
    }

    fn add_resource(&mut self, resource: &ResourceDescriptor) {
        if resource.kind == ResourceKind::Machine {
            debug!(resource = %resource.id, "request-class model tracking machine");
            self.machines.insert(resource.id.clone(), resource.capacity);
        }
    }

    fn remove_resource(&mut self, resource: &ResourceId) {
        self.machines.remove(resource);
    }
}
