//! Job and task ingestion.
//!
//! Each runnable task is a unit of supply. Until it is bound it may route
//! its flow to its job's unscheduled aggregator, to the cluster aggregator,
//! to preferred resources, or through an equivalence class. Binding replaces
//! all of that with a single running arc. The capacity of the aggregator's
//! sink arc always equals the number of unbound tasks of the job.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::arc::FlowArcType;
use crate::cost::{Cost, CostResult};
use crate::error::{FlowError, FlowResult};
use crate::graph::FlowGraph;
use crate::node::{FlowNodeId, FlowNodeType};
use crate::types::{EquivClass, JobDescriptor, JobId, ResourceId, TaskDescriptor, TaskId};

/// What [`FlowGraph::add_or_update_job_nodes`] did to a job's tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    /// Tasks that got a new, unbound node.
    pub added: Vec<TaskId>,
    /// Unbound tasks whose arcs changed.
    pub refreshed: Vec<TaskId>,
    /// Tasks pinned to the resource they already run on.
    pub pinned: Vec<TaskId>,
    /// Tasks left untouched this round because the cost model failed.
    pub skipped: Vec<TaskId>,
}

impl JobUpdate {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.refreshed.is_empty()
            && self.pinned.is_empty()
            && self.skipped.is_empty()
    }
}

enum TaskSync {
    Added,
    Refreshed,
    Pinned,
    Unchanged,
}

/// Every cost an unbound task needs, gathered before the graph is touched so
/// a failing cost model leaves no partial state behind.
struct TaskArcPlan {
    unscheduled_cost: Cost,
    cluster_agg_cost: Cost,
    preferences: Vec<(FlowNodeId, Cost)>,
    equiv_class: Option<(EquivClass, Cost)>,
}

impl FlowGraph {
    /// Bring the job's task nodes in line with its descriptor, breadth-first
    /// from the root task.
    pub fn add_or_update_job_nodes(&mut self, job: &JobDescriptor) -> FlowResult<JobUpdate> {
        let mut update = JobUpdate::default();
        for task in job.tasks() {
            match self.sync_task(job, task) {
                Ok(TaskSync::Added) => update.added.push(task.id),
                Ok(TaskSync::Refreshed) => update.refreshed.push(task.id),
                Ok(TaskSync::Pinned) => update.pinned.push(task.id),
                Ok(TaskSync::Unchanged) => {}
                Err(FlowError::CostModel(e)) => {
                    warn!(job = %job.id, task = task.id, error = %e, "cost model failed, task skipped");
                    update.skipped.push(task.id);
                }
                Err(e) => return Err(e),
            }
        }

        if !update.is_empty() {
            info!(
                job = %job.id,
                added = update.added.len(),
                refreshed = update.refreshed.len(),
                pinned = update.pinned.len(),
                skipped = update.skipped.len(),
                "job nodes updated"
            );
        }
        Ok(update)
    }

    /// Shift the capacity of the job's aggregator→sink arc by `delta`.
    pub fn adjust_unscheduled_agg_to_sink_capacity(&mut self, job: &JobId, delta: i64) -> FlowResult<()> {
        let agg = self
            .job_to_unsched_agg
            .get(job)
            .copied()
            .ok_or_else(|| FlowError::UnknownJob(job.clone()))?;
        let sink = self.sink_id;
        let arc = self
            .arcs
            .get(&(agg, sink))
            .ok_or(FlowError::UnknownArc { src: agg, dst: sink })?;
        let upper = arc
            .cap_upper_bound
            .checked_add_signed(delta)
            .ok_or_else(|| FlowError::CapacityUnderflow {
                job: job.clone(),
                delta,
            })?;
        let (lower, cost) = (arc.cap_lower_bound, arc.cost);
        self.change_arc(agg, sink, lower, upper, cost)?;
        Ok(())
    }

    /// Pin a task to the resource it was placed on.
    ///
    /// All outgoing arcs are replaced by one running arc and the task leaves
    /// its equivalence class. Binding an already bound task to the same
    /// resource does nothing.
    pub fn update_arcs_for_bound_task(&mut self, task: TaskId, resource: &ResourceId) -> FlowResult<()> {
        let node_id = self.task_node_id(task)?;
        let res_node = self.resource_node_id(resource)?;
        if !self.leaf_nodes.contains(&res_node) {
            return Err(FlowError::NotALeaf(resource.clone()));
        }
        let node = self.node_ref(node_id)?;
        if node.bound_to.as_ref() == Some(resource) {
            return Ok(());
        }
        let was_unbound = node.bound_to.is_none();
        let job = node.job_id.clone();
        let cost = self.cost_model.task_continuation_cost(task, resource)?;

        self.release_equiv_class(node_id, task)?;
        self.delete_outgoing_arcs(node_id)?;
        self.pin_task(node_id, resource, res_node, cost)?;
        if was_unbound && let Some(job) = &job {
            self.adjust_unscheduled_agg_to_sink_capacity(job, -1)?;
        }
        debug!(task, node = node_id, resource = %resource, "task bound");
        Ok(())
    }

    /// Undo a binding: the running arc goes away and the task can again
    /// route through its job's unscheduled aggregator and the cluster
    /// aggregator. Preference and class arcs return on the job's next
    /// update. Unbound tasks are left alone.
    pub fn update_arcs_for_evicted_task(&mut self, task: TaskId) -> FlowResult<()> {
        let node_id = self.task_node_id(task)?;
        if self.node_ref(node_id)?.bound_to.is_none() {
            return Ok(());
        }
        self.evict_task(task)
    }

    /// Remove a task's node and every arc it owns.
    pub fn delete_task_node(&mut self, task: TaskId) -> FlowResult<()> {
        let node_id = self.task_node_id(task)?;
        let node = self.node_ref(node_id)?;
        let unbound = node.bound_to.is_none();
        let job = node.job_id.clone();

        self.release_equiv_class(node_id, task)?;
        self.delete_outgoing_arcs(node_id)?;
        let incoming: Vec<FlowNodeId> = self.node_ref(node_id)?.incoming().collect();
        for src in incoming {
            self.delete_arc(src, node_id)?;
        }
        self.delete_node(node_id)?;
        self.adjust_sink_excess(1)?;
        if unbound && let Some(job) = &job {
            self.adjust_unscheduled_agg_to_sink_capacity(job, -1)?;
        }
        debug!(task, node = node_id, "task node deleted");
        Ok(())
    }

    /// Remove every task of the job, then its unscheduled aggregator.
    /// Returns the number of task nodes removed.
    pub fn delete_nodes_for_job(&mut self, job: &JobId) -> FlowResult<usize> {
        let tasks = self.job_to_tasks.get(job).cloned();
        let agg = self.job_to_unsched_agg.get(job).copied();
        if tasks.is_none() && agg.is_none() {
            return Err(FlowError::UnknownJob(job.clone()));
        }

        let tasks = tasks.unwrap_or_default();
        for &task in &tasks {
            self.delete_task_node(task)?;
        }
        if let Some(agg) = agg {
            self.delete_outgoing_arcs(agg)?;
            let incoming: Vec<FlowNodeId> = self.node_ref(agg)?.incoming().collect();
            for src in incoming {
                self.delete_arc(src, agg)?;
            }
            self.delete_node(agg)?;
        }
        self.job_to_tasks.remove(job);
        self.job_to_unsched_agg.remove(job);

        info!(job = %job, tasks = tasks.len(), "job nodes deleted");
        Ok(tasks.len())
    }

    // ── Internals ─────────────────────────────────────────────────

    pub(super) fn task_node_id(&self, task: TaskId) -> FlowResult<FlowNodeId> {
        self.task_to_node
            .get(&task)
            .copied()
            .ok_or(FlowError::UnknownTask(task))
    }

    fn sync_task(&mut self, job: &JobDescriptor, task: &TaskDescriptor) -> FlowResult<TaskSync> {
        let existing = self.task_to_node.get(&task.id).copied();

        if task.state.is_placed()
            && let Some(resource) = &task.scheduled_to
            && let Some(&res_node) = self.resource_to_node.get(resource)
            && self.leaf_nodes.contains(&res_node)
        {
            let bound_here = match existing {
                Some(id) => self.node_ref(id)?.bound_to.as_ref() == Some(resource),
                None => false,
            };
            return match existing {
                Some(_) if bound_here => Ok(TaskSync::Unchanged),
                Some(_) => {
                    self.update_arcs_for_bound_task(task.id, resource)?;
                    Ok(TaskSync::Pinned)
                }
                None => {
                    let cost = self.cost_model.task_continuation_cost(task.id, resource)?;
                    let id = self.create_task_node(job, task)?;
                    self.pin_task(id, resource, res_node, cost)?;
                    Ok(TaskSync::Pinned)
                }
            };
        }

        if !task.state.wants_node() {
            return Ok(TaskSync::Unchanged);
        }

        match existing {
            Some(id) if self.node_ref(id)?.bound_to.is_some() => Ok(TaskSync::Unchanged),
            Some(id) => {
                let plan = self.plan_task_arcs(task)?;
                if self.install_unbound_arcs(id, task.id, &job.id, &plan)? {
                    Ok(TaskSync::Refreshed)
                } else {
                    Ok(TaskSync::Unchanged)
                }
            }
            None => {
                let plan = self.plan_task_arcs(task)?;
                let id = self.create_task_node(job, task)?;
                self.install_unbound_arcs(id, task.id, &job.id, &plan)?;
                self.adjust_unscheduled_agg_to_sink_capacity(&job.id, 1)?;
                Ok(TaskSync::Added)
            }
        }
    }

    fn plan_task_arcs(&self, task: &TaskDescriptor) -> CostResult<TaskArcPlan> {
        let model = self.cost_model.as_ref();
        let mut preferences = Vec::new();
        for resource in model
            .task_preference_arcs(task)
            .into_iter()
            .take(self.config.max_preference_arcs)
        {
            let Some(&node) = self.resource_to_node.get(&resource) else {
                debug!(task = task.id, resource = %resource, "preferred resource not in graph");
                continue;
            };
            preferences.push((node, model.task_to_resource_cost(task.id, &resource)?));
        }
        let equiv_class = match model.task_equiv_class(task) {
            Some(class) => Some((class, model.task_to_equiv_class_cost(task.id, class)?)),
            None => None,
        };

        Ok(TaskArcPlan {
            unscheduled_cost: model.task_to_unscheduled_agg_cost(task.id),
            cluster_agg_cost: model.task_to_cluster_agg_cost(task.id)?,
            preferences,
            equiv_class,
        })
    }

    /// Node for a task of `job`, with its supply and the matching sink demand.
    fn create_task_node(&mut self, job: &JobDescriptor, task: &TaskDescriptor) -> FlowResult<FlowNodeId> {
        self.ensure_unsched_agg(&job.id)?;
        let node_type = if task.id == job.root_task.id {
            FlowNodeType::RootTask
        } else {
            FlowNodeType::UnscheduledTask
        };
        let id = self.add_node_with_excess(node_type, 1);
        let node = self.node_mut(id)?;
        node.task_id = Some(task.id);
        node.job_id = Some(job.id.clone());

        self.task_to_node.insert(task.id, id);
        self.task_nodes.insert(id);
        self.job_to_tasks.entry(job.id.clone()).or_default().insert(task.id);
        self.adjust_sink_excess(-1)?;
        debug!(job = %job.id, task = task.id, node = id, "task node created");
        Ok(id)
    }

    fn ensure_unsched_agg(&mut self, job: &JobId) -> FlowResult<FlowNodeId> {
        if let Some(&agg) = self.job_to_unsched_agg.get(job) {
            return Ok(agg);
        }
        let agg = self.add_node(FlowNodeType::UnscheduledAggregator);
        self.node_mut(agg)?.job_id = Some(job.clone());
        self.job_to_unsched_agg.insert(job.clone(), agg);
        self.unsched_agg_nodes.insert(agg);
        let cost = self.cost_model.unscheduled_agg_to_sink_cost(job);
        self.add_arc(agg, self.sink_id, 0, 0, cost, FlowArcType::UnscheduledAggToSink)?;
        debug!(job = %job, node = agg, "unscheduled aggregator created");
        Ok(agg)
    }

    /// Install or reconcile the arcs of an unbound task. Returns whether
    /// anything changed.
    fn install_unbound_arcs(
        &mut self,
        node: FlowNodeId,
        task: TaskId,
        job: &JobId,
        plan: &TaskArcPlan,
    ) -> FlowResult<bool> {
        let agg = self.ensure_unsched_agg(job)?;
        let mut changed = self.set_arc(
            node,
            agg,
            1,
            plan.unscheduled_cost,
            FlowArcType::TaskToUnscheduledAgg,
        )?;
        changed |= self.set_arc(
            node,
            self.cluster_agg_id,
            1,
            plan.cluster_agg_cost,
            FlowArcType::TaskToClusterAgg,
        )?;

        let wanted: BTreeSet<FlowNodeId> = plan.preferences.iter().map(|&(dst, _)| dst).collect();
        for &(dst, cost) in &plan.preferences {
            changed |= self.set_arc(node, dst, 1, cost, FlowArcType::TaskToResource)?;
        }
        let stale: Vec<FlowNodeId> = self
            .node_ref(node)?
            .outgoing()
            .filter(|dst| !wanted.contains(dst))
            .filter(|&dst| {
                self.arcs
                    .get(&(node, dst))
                    .is_some_and(|arc| arc.arc_type == FlowArcType::TaskToResource)
            })
            .collect();
        for dst in stale {
            self.delete_arc(node, dst)?;
            changed = true;
        }

        changed |= self.sync_task_equiv_class(node, task, plan.equiv_class)?;
        Ok(changed)
    }

    fn sync_task_equiv_class(
        &mut self,
        node: FlowNodeId,
        task: TaskId,
        wanted: Option<(EquivClass, Cost)>,
    ) -> FlowResult<bool> {
        let current = self.task_to_equiv_class_node.get(&task).copied();
        if let (Some(ec_node), Some((class, cost))) = (current, wanted)
            && self.nodes.get(&ec_node).and_then(|n| n.equiv_class) == Some(class)
        {
            let changed = self.set_arc(node, ec_node, 1, cost, FlowArcType::TaskToEquivClass)?;
            return Ok(self.refresh_equiv_class_arcs(ec_node)? || changed);
        }

        let mut changed = false;
        if current.is_some() {
            self.release_equiv_class(node, task)?;
            changed = true;
        }
        if let Some((class, cost)) = wanted {
            let ec_node = self.ensure_equiv_class_node(class);
            self.add_arc(node, ec_node, 0, 1, cost, FlowArcType::TaskToEquivClass)?;
            self.task_to_equiv_class_node.insert(task, ec_node);
            self.refresh_equiv_class_arcs(ec_node)?;
            changed = true;
        }
        Ok(changed)
    }

    fn ensure_equiv_class_node(&mut self, class: EquivClass) -> FlowNodeId {
        if let Some(&id) = self.equiv_class_to_node.get(&class) {
            return id;
        }
        let id = self.add_node(FlowNodeType::EquivalenceClass);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.equiv_class = Some(class);
        }
        self.equiv_class_to_node.insert(class, id);
        debug!(class, node = id, "equivalence class node created");
        id
    }

    /// Drop the task's membership in its class, deleting the class node when
    /// it has no members left.
    fn release_equiv_class(&mut self, node: FlowNodeId, task: TaskId) -> FlowResult<()> {
        let Some(ec_node) = self.task_to_equiv_class_node.remove(&task) else {
            return Ok(());
        };
        if self.arcs.contains_key(&(node, ec_node)) {
            self.delete_arc(node, ec_node)?;
        }
        self.refresh_equiv_class_arcs(ec_node)?;
        Ok(())
    }

    /// Recompute a class node's resource arcs. Each carries one unit of
    /// capacity per member task. Returns whether anything changed.
    fn refresh_equiv_class_arcs(&mut self, ec_node: FlowNodeId) -> FlowResult<bool> {
        let node = self.node_ref(ec_node)?;
        let members = node.incoming.len() as u64;
        let Some(class) = node.equiv_class else {
            return Err(FlowError::UnknownNode(ec_node));
        };

        if members == 0 {
            self.delete_outgoing_arcs(ec_node)?;
            self.delete_node(ec_node)?;
            debug!(class, node = ec_node, "equivalence class node deleted");
            return Ok(true);
        }

        let model = self.cost_model.as_ref();
        let wanted: Vec<(FlowNodeId, Cost)> = model
            .equiv_class_preference_arcs(class)
            .into_iter()
            .take(self.config.max_preference_arcs)
            .filter_map(|resource| {
                let node = self.resource_to_node.get(&resource)?;
                Some((*node, model.equiv_class_to_resource_cost(class, &resource)))
            })
            .collect();

        let keep: BTreeSet<FlowNodeId> = wanted.iter().map(|&(dst, _)| dst).collect();
        let stale: Vec<FlowNodeId> = self
            .node_ref(ec_node)?
            .outgoing()
            .filter(|dst| !keep.contains(dst))
            .collect();
        let mut changed = !stale.is_empty();
        for dst in stale {
            self.delete_arc(ec_node, dst)?;
        }
        for (dst, cost) in wanted {
            changed |= self.set_arc(ec_node, dst, members, cost, FlowArcType::EquivClassToResource)?;
        }
        Ok(changed)
    }

    fn pin_task(
        &mut self,
        node: FlowNodeId,
        resource: &ResourceId,
        res_node: FlowNodeId,
        cost: Cost,
    ) -> FlowResult<()> {
        self.add_arc(node, res_node, 0, 1, cost, FlowArcType::Running)?;
        let task_node = self.node_mut(node)?;
        task_node.bound_to = Some(resource.clone());
        let node_type = if task_node.node_type == FlowNodeType::RootTask {
            FlowNodeType::RootTask
        } else {
            FlowNodeType::ScheduledTask
        };
        self.update_node(node, node_type, 0)
    }

    /// Move a bound task back to the unbound state.
    pub(super) fn evict_task(&mut self, task: TaskId) -> FlowResult<()> {
        let node_id = self.task_node_id(task)?;
        let node = self.node_ref(node_id)?;
        let job = node.job_id.clone().ok_or(FlowError::UnknownTask(task))?;
        let node_type = if node.node_type == FlowNodeType::RootTask {
            FlowNodeType::RootTask
        } else {
            FlowNodeType::UnscheduledTask
        };

        self.delete_outgoing_arcs(node_id)?;
        self.node_mut(node_id)?.bound_to = None;
        self.update_node(node_id, node_type, 0)?;

        let agg = self.ensure_unsched_agg(&job)?;
        let unscheduled = self.cost_model.task_to_unscheduled_agg_cost(task);
        self.add_arc(node_id, agg, 0, 1, unscheduled, FlowArcType::TaskToUnscheduledAgg)?;
        match self.cost_model.task_to_cluster_agg_cost(task) {
            Ok(cost) => {
                self.add_arc(node_id, self.cluster_agg_id, 0, 1, cost, FlowArcType::TaskToClusterAgg)?;
            }
            Err(e) => warn!(task, error = %e, "no cluster aggregator arc for evicted task"),
        }
        self.adjust_unscheduled_agg_to_sink_capacity(&job, 1)?;
        debug!(task, node = node_id, "task evicted");
        Ok(())
    }
}
