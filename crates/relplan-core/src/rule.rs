//! # Rule System
//!
//! This module defines the rule trait, ordered rule sets and the registry that
//! groups rules by purpose.
//!
//! ## Rule Types
//!
//! - **Transformation rules** (`RuleType::Transformation`): rewrite a logical
//!   subtree into an equivalent logical subtree, e.g. pushing a filter below a join
//!   or folding a filter and a projection into a Calc.
//!
//! - **Conversion rules** (`RuleType::Conversion`): produce physical counterparts of
//!   a logical node whose inputs are already converted, or adapt a physical root to
//!   another convention. A conversion rule may return several candidates (e.g. hash
//!   join and nested loop); the planner keeps them as one equivalence class and the
//!   cost model picks one.
//!
//! ## Contract
//!
//! `apply` is only called when `matches` is true. It never mutates its input, and
//! every node it returns must have exactly the input's row type. An empty vector
//! means the rule declined.
//!
//! ## Rule Sets and Groups
//!
//! A `RuleSet` is an ordered, duplicate-free list. Order matters: when several rules
//! match one node, the first to produce a non-empty result wins for that node in
//! that pass. Each set keeps an index from root operator kind to rule positions so
//! the matcher never tries a Join rule on a Filter.
//!
//! The `RuleRegistry` holds one set per `RuleGroup`. Planners compose the groups
//! they need into a single set per rewrite program. A registry is built once,
//! usually from a `RuleManifest` resolved through a `RuleCatalog`, and shared
//! between planners behind an `Arc`.

use crate::config::RuleManifest;
use crate::cost::CostModel;
use crate::error::{PlanError, Result};
use crate::node::{Convention, OpKind, RelNode};
use crate::pattern::{self, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Classification of rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    /// Logical → logical rewrite.
    Transformation,
    /// Logical → physical, or physical → physical across conventions.
    Conversion,
}

/// Context passed to rules during application.
pub struct RuleContext<'a> {
    /// Convention conversion rules produce.
    pub target: Convention,
    pub cost_model: &'a dyn CostModel,
}

/// A rule rewrites or converts subtrees.
pub trait Rule: Send + Sync {
    /// Unique name of this rule. Manifests refer to rules by this name.
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    /// Pattern that this rule matches against.
    fn pattern(&self) -> Pattern;

    /// Whether the rule applies to `node`. Side-effect free.
    fn matches(&self, node: &RelNode) -> bool {
        pattern::matches(node, &self.pattern())
    }

    /// Produce equivalent replacements for `node`. Empty means declined.
    fn apply(&self, node: &Arc<RelNode>, ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>>;
}

pub type RuleRef = Arc<dyn Rule>;

/// Ordered, duplicate-free collection of rules with a kind index.
#[derive(Clone, Default)]
pub struct RuleSet {
    name: String,
    rules: Vec<RuleRef>,
    by_kind: HashMap<OpKind, Vec<usize>>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            by_kind: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a rule. Fails with `DuplicateRule` if one with the same name exists.
    pub fn register(&mut self, rule: RuleRef) -> Result<()> {
        if self.contains(rule.name()) {
            return Err(PlanError::DuplicateRule {
                rule: rule.name().to_string(),
            });
        }
        let position = self.rules.len();
        match rule.pattern().root_kind() {
            Some(kind) => self.by_kind.entry(kind).or_default().push(position),
            None => {
                for kind in OpKind::ALL {
                    self.by_kind.entry(kind).or_default().push(position);
                }
            }
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.name() == name)
    }

    pub fn rules(&self) -> &[RuleRef] {
        &self.rules
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules whose root pattern can match a node of `kind`, in registration order.
    pub fn candidates(&self, kind: OpKind) -> impl Iterator<Item = &RuleRef> {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .map(|&i| &self.rules[i])
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("name", &self.name)
            .field("rules", &self.names())
            .finish()
    }
}

/// Purpose-named partitions of the registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    /// Logical rewrites: pushdowns, transposes, merges, set-op and aggregate rules.
    Logical,
    /// Rewrites that replace subtrees known to be empty.
    Pruning,
    /// Normalization of filters and projections into Calc.
    Calc,
    /// Logical → target convention.
    Conversion,
    /// Target convention at the root → root convention.
    RootAdapter,
}

impl RuleGroup {
    pub const ALL: [RuleGroup; 5] = [
        RuleGroup::Logical,
        RuleGroup::Pruning,
        RuleGroup::Calc,
        RuleGroup::Conversion,
        RuleGroup::RootAdapter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleGroup::Logical => "logical",
            RuleGroup::Pruning => "pruning",
            RuleGroup::Calc => "calc",
            RuleGroup::Conversion => "conversion",
            RuleGroup::RootAdapter => "root_adapter",
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry of rules, one ordered set per group.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    groups: BTreeMap<RuleGroup, RuleSet>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, group: RuleGroup, rule: RuleRef) -> Result<()> {
        self.groups
            .entry(group)
            .or_insert_with(|| RuleSet::new(group.as_str()))
            .register(rule)
    }

    /// Rules of `group` in registration order.
    pub fn rules_for(&self, group: RuleGroup) -> &[RuleRef] {
        self.groups.get(&group).map(|s| s.rules()).unwrap_or(&[])
    }

    pub fn group(&self, group: RuleGroup) -> Option<&RuleSet> {
        self.groups.get(&group)
    }

    /// Total number of registered rules across groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate groups, preserving order. A rule present in two of the
    /// composed groups fails with `DuplicateRule`.
    pub fn compose(&self, groups: &[RuleGroup]) -> Result<RuleSet> {
        let name = groups
            .iter()
            .map(|g| g.as_str())
            .collect::<Vec<_>>()
            .join("+");
        let mut set = RuleSet::new(name);
        for &group in groups {
            for rule in self.rules_for(group) {
                set.register(rule.clone())?;
            }
        }
        Ok(set)
    }

    /// Build a registry from a manifest, resolving names through `catalog`.
    pub fn from_manifest(manifest: &RuleManifest, catalog: &RuleCatalog) -> Result<Self> {
        let mut registry = RuleRegistry::new();
        for (group, names) in manifest.entries() {
            for name in names {
                registry.add_rule(group, catalog.build(name)?)?;
            }
        }
        Ok(registry)
    }
}

/// Constructor for a catalogued rule.
pub type RuleConstructor = fn() -> RuleRef;

/// Name → constructor map from which manifests are resolved.
#[derive(Clone, Default)]
pub struct RuleCatalog {
    entries: BTreeMap<String, RuleConstructor>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule under the name its instance reports.
    pub fn add(&mut self, constructor: RuleConstructor) -> Result<()> {
        let name = constructor().name().to_string();
        if self.entries.contains_key(&name) {
            return Err(PlanError::DuplicateRule { rule: name });
        }
        self.entries.insert(name, constructor);
        Ok(())
    }

    pub fn build(&self, name: &str) -> Result<RuleRef> {
        self.entries
            .get(name)
            .map(|c| c())
            .ok_or_else(|| PlanError::UnknownRule {
                rule: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}

impl fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManifestGroups;
    use crate::node::Backend;

    struct Named(&'static str, Pattern);

    impl Rule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }

        fn pattern(&self) -> Pattern {
            self.1.clone()
        }

        fn apply(&self, _node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
            Ok(vec![])
        }
    }

    fn filter_rule() -> RuleRef {
        Arc::new(Named("F", Pattern::filter()))
    }

    fn join_rule() -> RuleRef {
        Arc::new(Named("J", Pattern::join()))
    }

    fn wildcard_rule() -> RuleRef {
        Arc::new(Named("W", Pattern::physical(Backend::Stream)))
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut set = RuleSet::new("t");
        set.register(filter_rule()).unwrap();
        let err = set.register(filter_rule()).unwrap_err();
        assert_eq!(err, PlanError::DuplicateRule { rule: "F".into() });
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_kind_index_preserves_order() {
        let mut set = RuleSet::new("t");
        set.register(join_rule()).unwrap();
        set.register(wildcard_rule()).unwrap();
        set.register(filter_rule()).unwrap();

        let for_filter: Vec<_> = set.candidates(OpKind::Filter).map(|r| r.name()).collect();
        assert_eq!(for_filter, vec!["W", "F"]);
        let for_join: Vec<_> = set.candidates(OpKind::Join).map(|r| r.name()).collect();
        assert_eq!(for_join, vec!["J", "W"]);
    }

    #[test]
    fn test_compose_rejects_cross_group_duplicates() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(RuleGroup::Logical, filter_rule()).unwrap();
        registry.add_rule(RuleGroup::Pruning, join_rule()).unwrap();
        registry.add_rule(RuleGroup::Calc, filter_rule()).unwrap();

        let set = registry
            .compose(&[RuleGroup::Logical, RuleGroup::Pruning])
            .unwrap();
        assert_eq!(set.names(), vec!["F", "J"]);
        assert!(matches!(
            registry.compose(&[RuleGroup::Logical, RuleGroup::Calc]),
            Err(PlanError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn test_from_manifest() {
        let mut catalog = RuleCatalog::new();
        catalog.add(filter_rule).unwrap();
        catalog.add(join_rule).unwrap();
        assert!(catalog.add(filter_rule).is_err());

        let manifest = RuleManifest {
            groups: ManifestGroups {
                logical: vec!["J".into(), "F".into()],
                ..Default::default()
            },
        };
        let registry = RuleRegistry::from_manifest(&manifest, &catalog).unwrap();
        let names: Vec<_> = registry
            .rules_for(RuleGroup::Logical)
            .iter()
            .map(|r| r.name())
            .collect();
        assert_eq!(names, vec!["J", "F"]);
        assert!(registry.rules_for(RuleGroup::Conversion).is_empty());

        let unknown = RuleManifest {
            groups: ManifestGroups {
                calc: vec!["Nope".into()],
                ..Default::default()
            },
        };
        assert_eq!(
            RuleRegistry::from_manifest(&unknown, &catalog).unwrap_err(),
            PlanError::UnknownRule { rule: "Nope".into() }
        );
    }
}
