//! flow.toml configuration.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below.
//!
//! ```toml
//! [graph]
//! max_preference_arcs = 16
//!
//! [cost_model]
//! kind = "request_class"
//!
//! [cost_model.trivial]
//! unscheduled_cost = 5
//!
//! [scheduler]
//! round_interval_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cost::{Cost, CostModel, RequestClassCostModel, TrivialCostModel};
use crate::error::{FlowError, FlowResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlowConfig {
    pub graph: GraphConfig,
    pub cost_model: CostModelConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    /// Upper bound on preference arcs per task and per equivalence class.
    pub max_preference_arcs: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_preference_arcs: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostModelKind {
    #[default]
    Trivial,
    RequestClass,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostModelConfig {
    pub kind: CostModelKind,
    pub trivial: TrivialCostConfig,
}

/// Constant costs used by the trivial model, and as base costs by the
/// request-class model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrivialCostConfig {
    pub unscheduled_cost: Cost,
    pub cluster_agg_cost: Cost,
    pub preference_cost: Cost,
    pub continuation_cost: Cost,
    pub leaf_capacity: u64,
}

impl Default for TrivialCostConfig {
    fn default() -> Self {
        Self {
            unscheduled_cost: 5,
            cluster_agg_cost: 2,
            preference_cost: 1,
            continuation_cost: 0,
            leaf_capacity: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between scheduling rounds in the run loop.
    pub round_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            round_interval_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }
}

impl FlowConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> FlowResult<Self> {
        let config: FlowConfig =
            toml::from_str(content).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.cost_model.trivial.leaf_capacity == 0 {
            return Err(FlowError::Config(
                "cost_model.trivial.leaf_capacity must be at least 1".to_string(),
            ));
        }
        if self.cost_model.trivial.unscheduled_cost < 0 {
            return Err(FlowError::Config(
                "cost_model.trivial.unscheduled_cost must not be negative".to_string(),
            ));
        }
        if self.scheduler.round_interval_ms == 0 {
            return Err(FlowError::Config(
                "scheduler.round_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Instantiate the configured cost model.
    pub fn build_cost_model(&self) -> Box<dyn CostModel> {
        let base = TrivialCostModel::new(self.cost_model.trivial.clone());
        match self.cost_model.kind {
            CostModelKind::Trivial => Box::new(base),
            CostModelKind::RequestClass => Box::new(RequestClassCostModel::new(
                base,
                self.graph.max_preference_arcs,
            )),
        }
    }
}
