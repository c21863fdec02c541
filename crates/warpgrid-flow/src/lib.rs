//! warpgrid-flow: flow-based cluster scheduling.
//!
//! Models the cluster as a min-cost flow network and keeps it up to date
//! incrementally as machines, jobs and tasks come and go. Every structural
//! effect is recorded as a [`GraphChange`] so an external min-cost flow
//! solver can track the network without rebuilding it. The crate:
//!
//! - Maintains the network: resource hierarchy, per-job aggregators, task
//!   nodes, equivalence classes
//! - Delegates arc costs and leaf capacities to a pluggable [`CostModel`]
//! - Exports the network and change batches as DIMACS text
//! - Drives scheduling rounds against a [`FlowSolver`]
//!
//! # Architecture
//!
//! ```text
//! FlowScheduler (single writer, tokio Mutex)
//!   ├── FlowGraph
//!   │     ├── CostModel (trivial / request_class)
//!   │     ├── nodes + arcs (arena keyed by node id, FIFO id reuse)
//!   │     └── ChangeLog (drained once per round)
//!   ├── GraphMirror (the network as the solver sees it)
//!   └── FlowSolver (runs on a blocking thread)
//! ```

pub mod arc;
pub mod change;
pub mod config;
pub mod cost;
pub mod dimacs;
pub mod error;
pub mod graph;
pub mod mirror;
pub mod node;
pub mod scheduler;
pub mod types;

pub use arc::{ArcKey, FlowArc, FlowArcType};
pub use change::{ChangeLog, GraphChange};
pub use config::FlowConfig;
pub use cost::{CostModel, CostModelError, RequestClassCostModel, TrivialCostModel};
pub use error::{FlowError, FlowResult};
pub use graph::{FlowGraph, JobUpdate};
pub use mirror::GraphMirror;
pub use node::{FlowNode, FlowNodeId, FlowNodeType};
pub use scheduler::{FlowScheduler, FlowSolver, NodeBinding, RoundOutcome, RoundReport};
