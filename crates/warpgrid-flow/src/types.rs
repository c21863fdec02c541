//! Cluster descriptors consumed by the flow graph.
//!
//! These are read-only views of the resource topology and of job/task
//! state. The graph reads ids, parent/child links and resource requests
//! from them but never owns or persists them.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
pub type TaskId = u64;

/// Unique identifier for a resource (machine, socket, core, PU, ...).
pub type ResourceId = String;

/// Unique identifier for a job.
pub type JobId = String;

/// Identifier of a task equivalence class, as computed by the cost model.
pub type EquivClass = u64;

// ── Resources ─────────────────────────────────────────────────────

/// Kind of a resource in the topology tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Coordinator,
    Machine,
    NumaNode,
    Socket,
    Cache,
    Core,
    Pu,
}

/// Resource quantities: either a capacity or a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceVector {
    /// CPU in millicores.
    pub cpu_millis: u64,
    /// Memory in megabytes.
    pub ram_mb: u64,
}

impl ResourceVector {
    /// Whether `request` fits entirely within this vector.
    pub fn fits(&self, request: &ResourceVector) -> bool {
        request.cpu_millis <= self.cpu_millis && request.ram_mb <= self.ram_mb
    }
}

/// A single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub kind: ResourceKind,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub capacity: ResourceVector,
}

/// A node of the resource topology tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceTopologyNode {
    pub descriptor: ResourceDescriptor,
    /// Parent resource, if this entry hangs below another one.
    #[serde(default)]
    pub parent_id: Option<ResourceId>,
    #[serde(default)]
    pub children: Vec<ResourceTopologyNode>,
}

impl ResourceTopologyNode {
    pub fn id(&self) -> &ResourceId {
        &self.descriptor.id
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Visit every entry of the tree, parents before children.
    pub fn walk(&self) -> impl Iterator<Item = &ResourceTopologyNode> {
        let mut queue: VecDeque<&ResourceTopologyNode> = VecDeque::from([self]);
        std::iter::from_fn(move || {
            let next = queue.pop_front()?;
            queue.extend(next.children.iter());
            Some(next)
        })
    }
}

// ── Jobs and tasks ────────────────────────────────────────────────

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Blocked,
    Runnable,
    Assigned,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl TaskState {
    /// Only tasks that can run, or already do, get a node in the graph.
    pub fn wants_node(&self) -> bool {
        matches!(self, TaskState::Runnable | TaskState::Assigned | TaskState::Running)
    }

    pub fn is_placed(&self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Running)
    }
}

/// A task and the tasks it spawned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub job_id: JobId,
    pub state: TaskState,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resource_request: ResourceVector,
    /// Resource the task is currently bound to, if any.
    #[serde(default)]
    pub scheduled_to: Option<ResourceId>,
    #[serde(default)]
    pub spawned: Vec<TaskDescriptor>,
}

/// A job: a root task and its spawn tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescriptor {
    pub id: JobId,
    #[serde(default)]
    pub name: String,
    pub root_task: TaskDescriptor,
}

impl JobDescriptor {
    /// Breadth-first iteration over every task of the job, root first.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDescriptor> {
        let mut queue: VecDeque<&TaskDescriptor> = VecDeque::from([&self.root_task]);
        std::iter::from_fn(move || {
            let next = queue.pop_front()?;
            queue.extend(next.spawned.iter());
            Some(next)
        })
    }
}
