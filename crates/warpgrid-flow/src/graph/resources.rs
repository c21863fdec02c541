//! Resource topology ingestion.
//!
//! Every resource becomes one node. A leaf (`Pu`) drains into the sink with
//! the capacity the cost model grants it; a branch (`Machine`) forwards the
//! aggregate of its children's capacities. Capacity changes walk upward
//! through the resource→parent index until an arc no longer changes.

use tracing::{debug, info};

use crate::arc::FlowArcType;
use crate::error::{FlowError, FlowResult};
use crate::graph::FlowGraph;
use crate::node::{FlowNodeId, FlowNodeType};
use crate::types::{ResourceId, ResourceTopologyNode, TaskId};

impl FlowGraph {
    /// Add a whole resource hierarchy.
    ///
    /// The root hangs off the cluster aggregator unless it names a parent
    /// already in the graph. Entries that already exist are updated in place.
    pub fn add_resource_topology(&mut self, root: &ResourceTopologyNode) -> FlowResult<()> {
        let node = self.attach_subtree(root)?;
        info!(
            resource = %root.id(),
            node,
            resources = root.walk().count(),
            "resource topology added"
        );
        Ok(())
    }

    /// Bring an existing hierarchy up to date. Unknown entries are added,
    /// known ones only change where capacity or cost differ. Feeding the
    /// same tree twice records nothing the second time.
    pub fn update_resource_topology(&mut self, root: &ResourceTopologyNode) -> FlowResult<()> {
        let before = self.changes.len();
        self.attach_subtree(root)?;
        debug!(
            resource = %root.id(),
            changes = self.changes.len() - before,
            "resource topology updated"
        );
        Ok(())
    }

    /// Attach a single resource (and any children it carries) under its
    /// parent, then propagate the new capacity upward.
    pub fn add_resource_node(&mut self, resource: &ResourceTopologyNode) -> FlowResult<FlowNodeId> {
        let node = self.attach_subtree(resource)?;
        info!(resource = %resource.id(), node, "resource node added");
        Ok(node)
    }

    pub fn update_resource_node(&mut self, resource: &ResourceTopologyNode) -> FlowResult<FlowNodeId> {
        self.attach_subtree(resource)
    }

    /// Remove a resource and everything below it.
    ///
    /// Tasks running on a removed resource are evicted back to their job's
    /// unscheduled aggregator and returned.
    pub fn delete_resource_node(&mut self, resource: &ResourceId) -> FlowResult<Vec<TaskId>> {
        let node = self.resource_node_id(resource)?;
        let parent = self.resource_to_parent.get(resource).cloned();

        let mut evicted = Vec::new();
        self.delete_resource_subtree(node, &mut evicted)?;
        if let Some(parent) = parent {
            self.propagate_capacity(&parent)?;
        }

        info!(
            resource = %resource,
            evicted = evicted.len(),
            "resource node deleted"
        );
        Ok(evicted)
    }

    /// Current capacity of the arc feeding this resource from above.
    pub fn resource_capacity(&self, resource: &ResourceId) -> Option<u64> {
        self.resource_to_node
            .get(resource)
            .map(|&id| self.node_capacity(id))
    }

    // ── Internals ─────────────────────────────────────────────────

    pub(super) fn resource_node_id(&self, resource: &ResourceId) -> FlowResult<FlowNodeId> {
        self.resource_to_node
            .get(resource)
            .copied()
            .ok_or_else(|| FlowError::UnknownResource(resource.clone()))
    }

    fn attach_subtree(&mut self, root: &ResourceTopologyNode) -> FlowResult<FlowNodeId> {
        let parent = root
            .parent_id
            .clone()
            .or_else(|| self.resource_to_parent.get(root.id()).cloned());

        if let Some(parent) = &parent {
            let parent_node = self.resource_node_id(parent)?;
            if self.check_node_type(parent_node, FlowNodeType::Pu) {
                self.convert_leaf_to_branch(parent_node)?;
            }
        }

        let (node, capacity) = self.sync_resource(root, parent.as_ref())?;
        self.link_to_parent(root.id(), node, parent.as_ref(), capacity)?;
        if let Some(parent) = &parent {
            self.propagate_capacity(parent)?;
        }
        Ok(node)
    }

    /// Create or refresh the node for `rtnd` and, recursively, its children.
    /// Returns the node id and the capacity it offers to its parent.
    fn sync_resource(
        &mut self,
        rtnd: &ResourceTopologyNode,
        parent: Option<&ResourceId>,
    ) -> FlowResult<(FlowNodeId, u64)> {
        let resource = rtnd.id();
        let node = match self.resource_to_node.get(resource) {
            Some(&id) => {
                self.detach_from_old_parent(resource, id, parent)?;
                id
            }
            None => self.create_resource_node(rtnd)?,
        };
        match parent {
            Some(parent) => {
                self.resource_to_parent.insert(resource.clone(), parent.clone());
            }
            None => {
                self.resource_to_parent.remove(resource);
            }
        }
        self.cost_model.add_resource(&rtnd.descriptor);

        if self.check_node_type(node, FlowNodeType::Pu) && !rtnd.children.is_empty() {
            self.convert_leaf_to_branch(node)?;
        }

        if self.check_node_type(node, FlowNodeType::Pu) {
            let capacity = self.cost_model.leaf_capacity(&rtnd.descriptor);
            let cost = self.cost_model.leaf_to_sink_cost(resource);
            self.set_arc(node, self.sink_id, capacity, cost, FlowArcType::LeafToSink)?;
            return Ok((node, capacity));
        }

        for child in &rtnd.children {
            let (child_node, capacity) = self.sync_resource(child, Some(resource))?;
            self.link_to_parent(child.id(), child_node, Some(resource), capacity)?;
        }
        Ok((node, self.node_capacity(node)))
    }

    fn create_resource_node(&mut self, rtnd: &ResourceTopologyNode) -> FlowResult<FlowNodeId> {
        let node_type = if rtnd.is_leaf() {
            FlowNodeType::Pu
        } else {
            FlowNodeType::Machine
        };
        let id = self.add_node(node_type);
        self.node_mut(id)?.resource_id = Some(rtnd.id().clone());
        self.resource_to_node.insert(rtnd.id().clone(), id);
        if node_type == FlowNodeType::Pu {
            self.leaf_nodes.insert(id);
        }
        debug!(resource = %rtnd.id(), node = id, kind = ?rtnd.descriptor.kind, "resource node created");
        Ok(id)
    }

    /// A leaf that gains a child stops draining into the sink.
    fn convert_leaf_to_branch(&mut self, node: FlowNodeId) -> FlowResult<()> {
        if self.arcs.contains_key(&(node, self.sink_id)) {
            self.delete_arc(node, self.sink_id)?;
        }
        self.leaf_nodes.remove(&node);
        self.update_node(node, FlowNodeType::Machine, 0)?;
        debug!(node, "leaf resource converted to branch");
        Ok(())
    }

    /// A known resource that moves under a new parent drops the arc from its
    /// old one, and the old parent's chain gives up its capacity.
    fn detach_from_old_parent(
        &mut self,
        resource: &ResourceId,
        node: FlowNodeId,
        parent: Option<&ResourceId>,
    ) -> FlowResult<()> {
        let old = self.resource_to_parent.get(resource).cloned();
        if old.as_ref() == parent {
            return Ok(());
        }
        let src = match &old {
            Some(old) => self.resource_node_id(old)?,
            None => self.cluster_agg_id,
        };
        if self.arcs.contains_key(&(src, node)) {
            self.delete_arc(src, node)?;
        }
        self.resource_to_parent.remove(resource);
        if let Some(old) = &old {
            self.propagate_capacity(old)?;
        }
        debug!(resource = %resource, from = ?old, to = ?parent, "resource re-parented");
        Ok(())
    }

    /// Set the arc feeding `resource` from its parent, or from the cluster
    /// aggregator for a root. Returns whether the arc changed.
    fn link_to_parent(
        &mut self,
        resource: &ResourceId,
        node: FlowNodeId,
        parent: Option<&ResourceId>,
        capacity: u64,
    ) -> FlowResult<bool> {
        let (src, cost, arc_type) = match parent {
            Some(parent) => (
                self.resource_node_id(parent)?,
                self.cost_model.resource_to_resource_cost(parent, resource),
                FlowArcType::ResourceToResource,
            ),
            None => (
                self.cluster_agg_id,
                self.cost_model.cluster_agg_to_resource_cost(resource),
                FlowArcType::ClusterAggToResource,
            ),
        };
        self.set_arc(src, node, capacity, cost, arc_type)
    }

    /// Walk up from `from`, refreshing each arc into the current resource,
    /// until one is already correct.
    fn propagate_capacity(&mut self, from: &ResourceId) -> FlowResult<()> {
        let mut current = from.clone();
        loop {
            let node = self.resource_node_id(&current)?;
            let capacity = self.node_capacity(node);
            let parent = self.resource_to_parent.get(&current).cloned();
            let changed = self.link_to_parent(&current, node, parent.as_ref(), capacity)?;
            match parent {
                Some(parent) if changed => current = parent,
                _ => return Ok(()),
            }
        }
    }

    fn node_capacity(&self, id: FlowNodeId) -> u64 {
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        if node.node_type == FlowNodeType::Pu {
            return self
                .arcs
                .get(&(id, self.sink_id))
                .map_or(0, |arc| arc.cap_upper_bound);
        }
        let children: Vec<u64> = node
            .outgoing()
            .filter_map(|dst| self.arcs.get(&(id, dst)))
            .filter(|arc| arc.arc_type == FlowArcType::ResourceToResource)
            .map(|arc| arc.cap_upper_bound)
            .collect();
        self.cost_model.aggregate_capacity(&children)
    }

    fn delete_resource_subtree(
        &mut self,
        node: FlowNodeId,
        evicted: &mut Vec<TaskId>,
    ) -> FlowResult<()> {
        let sink = self.sink_id;
        let children: Vec<FlowNodeId> = self
            .node_ref(node)?
            .outgoing()
            .filter(|&dst| dst != sink)
            .collect();
        for child in children {
            self.delete_resource_subtree(child, evicted)?;
        }

        let incoming: Vec<FlowNodeId> = self.node_ref(node)?.incoming().collect();
        for src in incoming {
            let running = self
                .arcs
                .get(&(src, node))
                .is_some_and(|arc| arc.arc_type == FlowArcType::Running);
            match self.nodes.get(&src).and_then(|n| n.task_id) {
                Some(task) if running => {
                    self.evict_task(task)?;
                    evicted.push(task);
                }
                _ => {
                    self.delete_arc(src, node)?;
                }
            }
        }
        self.delete_outgoing_arcs(node)?;

        let removed = self.delete_node(node)?;
        if let Some(resource) = removed.resource_id {
            self.cost_model.remove_resource(&resource);
            debug!(resource = %resource, node, "resource node removed");
        }
        Ok(())
    }
}
