//! # Planner Configuration
//!
//! Two documents configure planning, both TOML:
//!
//! - [`PlannerConfig`]: limits and conventions for one planner (pass budget,
//!   wall-clock budget, target and root conventions, the rewrite programs).
//! - [`RuleManifest`]: which rules make up each [`RuleGroup`], in order.
//!
//! ```toml
//! # planner.toml
//! max_passes = 50
//! max_planning_time_ms = 2000
//! target_convention = { physical = "stream" }
//! root_convention = { physical = "enumerable" }
//!
//! [[rewrite_programs]]
//! name = "logical"
//! groups = ["logical", "pruning"]
//! ```
//!
//! ```toml
//! # rules.toml
//! [groups]
//! logical = ["FilterIntoJoin", "ProjectMerge"]
//! conversion = ["StreamCalc", "StreamTableScan"]
//! ```

use crate::error::{PlanError, Result};
use crate::node::{Backend, Convention};
use crate::rule::RuleGroup;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One rewrite program: the groups composed into a rule set that runs to its
/// own fixpoint before the next program starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteProgram {
    pub name: String,
    pub groups: Vec<RuleGroup>,
}

impl RewriteProgram {
    pub fn new(name: impl Into<String>, groups: Vec<RuleGroup>) -> Self {
        Self {
            name: name.into(),
            groups,
        }
    }
}

/// Configuration knobs for one planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Upper bound on rewrite passes per program.
    pub max_passes: usize,
    /// Optional wall-clock budget for the whole planning call.
    pub max_planning_time_ms: Option<u64>,
    /// Convention every node must carry after conversion.
    pub target_convention: Convention,
    /// Convention requested at the root, if different from the target.
    pub root_convention: Option<Convention>,
    /// Rewrite programs, run in order.
    pub rewrite_programs: Vec<RewriteProgram>,
    /// Check every candidate's row type against the matched node. Always on in
    /// debug builds.
    pub verify_equivalence: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_passes: 100,
            max_planning_time_ms: None,
            target_convention: Convention::Physical(Backend::Stream),
            root_convention: None,
            rewrite_programs: vec![
                RewriteProgram::new("logical", vec![RuleGroup::Logical, RuleGroup::Pruning]),
                RewriteProgram::new("calc", vec![RuleGroup::Calc]),
            ],
            verify_equivalence: cfg!(debug_assertions),
        }
    }
}

impl PlannerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: PlannerConfig =
            toml::from_str(s).map_err(|e| PlanError::Config(format!("planner config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    /// Reject configurations the planner cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(PlanError::Config("max_passes must be at least 1".into()));
        }
        if self.target_convention.is_logical() {
            return Err(PlanError::Config(
                "target_convention must be a physical convention".into(),
            ));
        }
        if self.root_convention.is_some_and(|c| c.is_logical()) {
            return Err(PlanError::Config(
                "root_convention must be a physical convention".into(),
            ));
        }
        if let Some(p) = self.rewrite_programs.iter().find(|p| {
            p.groups
                .iter()
                .any(|g| matches!(g, RuleGroup::Conversion | RuleGroup::RootAdapter))
        }) {
            return Err(PlanError::Config(format!(
                "rewrite program '{}' names a conversion group",
                p.name
            )));
        }
        Ok(())
    }

    /// Convention of the final root.
    pub fn final_root_convention(&self) -> Convention {
        self.root_convention.unwrap_or(self.target_convention)
    }
}

/// Rule names per group, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestGroups {
    pub logical: Vec<String>,
    pub pruning: Vec<String>,
    pub calc: Vec<String>,
    pub conversion: Vec<String>,
    pub root_adapter: Vec<String>,
}

/// Rule-selection manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleManifest {
    pub groups: ManifestGroups,
}

impl RuleManifest {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PlanError::Config(format!("rule manifest: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    pub fn rules(&self, group: RuleGroup) -> &[String] {
        let g = &self.groups;
        match group {
            RuleGroup::Logical => &g.logical,
            RuleGroup::Pruning => &g.pruning,
            RuleGroup::Calc => &g.calc,
            RuleGroup::Conversion => &g.conversion,
            RuleGroup::RootAdapter => &g.root_adapter,
        }
    }

    /// Every `(group, rule names)` pair in group order.
    pub fn entries(&self) -> impl Iterator<Item = (RuleGroup, &[String])> {
        RuleGroup::ALL.into_iter().map(move |g| (g, self.rules(g)))
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PlanError::Config(format!("cannot read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PlannerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rewrite_programs.len(), 2);
        assert_eq!(
            config.final_root_convention(),
            Convention::Physical(Backend::Stream)
        );
    }

    #[test]
    fn test_parse_planner_config() {
        let config = PlannerConfig::from_toml_str(
            r#"
            max_passes = 7
            max_planning_time_ms = 250
            root_convention = { physical = "enumerable" }

            [[rewrite_programs]]
            name = "only"
            groups = ["logical"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_passes, 7);
        assert_eq!(config.max_planning_time_ms, Some(250));
        assert_eq!(
            config.final_root_convention(),
            Convention::Physical(Backend::Enumerable)
        );
        assert_eq!(config.rewrite_programs[0].groups, vec![RuleGroup::Logical]);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(matches!(
            PlannerConfig::from_toml_str("max_passes = 0"),
            Err(PlanError::Config(_))
        ));
        assert!(matches!(
            PlannerConfig::from_toml_str(r#"target_convention = "logical""#),
            Err(PlanError::Config(_))
        ));
        assert!(matches!(
            PlannerConfig::from_toml_str("unknown_knob = 1"),
            Err(PlanError::Config(_))
        ));
        let bad_program = r#"
            [[rewrite_programs]]
            name = "convert"
            groups = ["conversion"]
        "#;
        assert!(matches!(
            PlannerConfig::from_toml_str(bad_program),
            Err(PlanError::Config(_))
        ));
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = RuleManifest::from_toml_str(
            r#"
            [groups]
            logical = ["FilterIntoJoin", "ProjectMerge"]
            root_adapter = ["EnumerableConverter"]
            "#,
        )
        .unwrap();
        assert_eq!(manifest.rules(RuleGroup::Logical).len(), 2);
        assert!(manifest.rules(RuleGroup::Calc).is_empty());
        assert_eq!(manifest.entries().count(), 5);

        assert!(RuleManifest::from_toml_str("[groups]\nphysical = []").is_err());
    }
}
