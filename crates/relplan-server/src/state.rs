//! # Application State
//!
//! Shared state available to every request handler. It is built once at startup
//! and shared behind an `Arc`.
//!
//! - **Rule Registry**: resolved from the rule manifest once. Rules are stateless,
//!   so every request plans against the same registry.
//! - **Planner Config**: default limits and conventions; a request may send its
//!   own.
//! - **Cost Model**: scores the alternatives conversion rules propose.

use relplan_core::cost::{CostModel, DefaultCostModel};
use relplan_core::error::PlanError;
use relplan_core::{PlannerConfig, RuleManifest, RuleRegistry};
use std::path::Path;
use std::sync::Arc;

/// Failure while assembling the server state.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid planner setup: {0}")]
    Plan(#[from] PlanError),
    #[error("server I/O: {0}")]
    Io(#[from] std::io::Error),
}

pub struct AppState {
    pub registry: Arc<RuleRegistry>,
    pub config: PlannerConfig,
    pub cost_model: Arc<dyn CostModel>,
}

impl AppState {
    pub fn new(registry: RuleRegistry, config: PlannerConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            cost_model: Arc::new(DefaultCostModel::default()),
        }
    }

    /// Built-in catalogue, optionally rearranged by a manifest file, with planner
    /// defaults optionally overridden by a config file.
    pub fn load(manifest: Option<&Path>, config: Option<&Path>) -> Result<Self, StartupError> {
        let manifest = match manifest {
            Some(path) => RuleManifest::load(path)?,
            None => relplan_rules::default_manifest()?,
        };
        let registry = RuleRegistry::from_manifest(&manifest, &relplan_rules::default_catalog()?)?;
        let config = match config {
            Some(path) => PlannerConfig::load(path)?,
            None => PlannerConfig::default(),
        };
        tracing::info!(
            rules = registry.len(),
            max_passes = config.max_passes,
            target = %config.target_convention,
            "planner state ready"
        );
        Ok(Self::new(registry, config))
    }
}
