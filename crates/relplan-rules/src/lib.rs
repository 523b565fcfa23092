//! # Built-in Planning Rules
//!
//! This crate provides the default rule catalogue for the relplan planner and
//! the manifest that arranges it into groups. Rules fall into five groups:
//!
//! ## Logical (Logical -> Logical)
//!
//! Pushdowns and normalizations that move predicates and projections toward the
//! scans and simplify aggregates and unions:
//!
//! - **`filter_join`**: `FilterIntoJoin`, `JoinConditionPush`.
//! - **`filter_transpose`**: Filter below Aggregate, set operations and Project.
//! - **`project_transpose`**: Project into `UNION ALL`, below Filter and Sort,
//!   and `ProjectMerge`.
//! - **`join_push_expressions`**: computed join keys become columns of the inputs.
//! - **`union`**: `UnionEliminator`, `UnionToDistinct`.
//! - **`aggregate`**: merge with Project, removal over distinct inputs, and
//!   transposes through joins and unions.
//!
//! ## Pruning
//!
//! - **`prune_empty`**: operators over known-empty inputs become empty `Values`.
//!
//! ## Calc
//!
//! - **`calc`**: fold Filters and Projects into Calc, the only row-level operator
//!   the stream backend implements.
//!
//! ## Conversion (Logical -> Physical)
//!
//! - **`convert`**: one converter per operator into the stream backend. Joins get
//!   hash and nested-loop candidates scored by the cost model.
//!
//! ## Root adapter
//!
//! - **`adapter`**: wraps a stream root in an `EnumerableConverter`.

pub mod adapter;
pub mod aggregate;
pub mod calc;
pub mod convert;
pub mod filter_join;
pub mod filter_transpose;
pub mod join_push_expressions;
pub mod plan_util;
pub mod project_transpose;
pub mod prune_empty;
pub mod union;

#[cfg(test)]
mod test_util;

use relplan_core::config::RuleManifest;
use relplan_core::error::Result;
use relplan_core::rule::{RuleCatalog, RuleConstructor, RuleRegistry};
use std::sync::Arc;

/// The manifest shipped with this crate.
pub const DEFAULT_MANIFEST: &str = include_str!("../rules.toml");

/// Constructors of every built-in rule.
const BUILTIN_RULES: &[RuleConstructor] = &[
    // Logical
    || Arc::new(filter_join::FilterIntoJoin),
    || Arc::new(filter_join::JoinConditionPush),
    || Arc::new(filter_transpose::FilterAggregateTranspose),
    || Arc::new(filter_transpose::FilterSetOpTranspose),
    || Arc::new(filter_transpose::FilterProjectTranspose),
    || Arc::new(project_transpose::ProjectSetOpTranspose),
    || Arc::new(project_transpose::ProjectFilterTranspose),
    || Arc::new(project_transpose::ProjectMerge),
    || Arc::new(project_transpose::SortProjectTranspose),
    || Arc::new(project_transpose::ProjectSortTranspose),
    || Arc::new(join_push_expressions::JoinPushExpressions),
    || Arc::new(union::UnionEliminator),
    || Arc::new(union::UnionToDistinct),
    || Arc::new(aggregate::AggregateProjectMerge),
    || Arc::new(aggregate::AggregateRemove),
    || Arc::new(aggregate::AggregateJoinTranspose),
    || Arc::new(aggregate::AggregateUnionAggregate),
    // Pruning
    || Arc::new(prune_empty::PruneEmptyAggregate),
    || Arc::new(prune_empty::PruneEmptyFilter),
    || Arc::new(prune_empty::PruneEmptyJoinLeft),
    || Arc::new(prune_empty::PruneEmptyJoinRight),
    || Arc::new(prune_empty::PruneEmptyProject),
    || Arc::new(prune_empty::PruneEmptySort),
    || Arc::new(prune_empty::PruneEmptyUnion),
    // Calc
    || Arc::new(calc::FilterCalcMerge),
    || Arc::new(calc::ProjectCalcMerge),
    || Arc::new(calc::FilterToCalc),
    || Arc::new(calc::ProjectToCalc),
    || Arc::new(calc::CalcRemove),
    || Arc::new(calc::CalcMerge),
    // Conversion
    convert::stream_calc,
    convert::stream_aggregate,
    convert::stream_sort,
    convert::stream_values,
    convert::stream_intersect,
    convert::stream_minus,
    convert::stream_union,
    convert::stream_uncollect,
    convert::stream_unnest,
    || Arc::new(convert::StreamJoin),
    convert::stream_table_scan,
    // Root adapter
    || Arc::new(adapter::EnumerableConverterRule),
];

/// Every built-in rule, by name.
pub fn default_catalog() -> Result<RuleCatalog> {
    let mut catalog = RuleCatalog::new();
    for &constructor in BUILTIN_RULES {
        catalog.add(constructor)?;
    }
    Ok(catalog)
}

pub fn default_manifest() -> Result<RuleManifest> {
    RuleManifest::from_toml_str(DEFAULT_MANIFEST)
}

/// Registry built from the default manifest and catalogue.
///
/// Custom rules can be added to the returned registry with
/// [`RuleRegistry::add_rule`], or a different manifest can be resolved against
/// [`default_catalog`].
pub fn default_rule_registry() -> Result<RuleRegistry> {
    RuleRegistry::from_manifest(&default_manifest()?, &default_catalog()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relplan_core::rule::{RuleGroup, RuleType};

    #[test]
    fn test_default_registry_builds() {
        let registry = default_rule_registry().unwrap();
        assert_eq!(registry.rules_for(RuleGroup::Logical).len(), 17);
        assert_eq!(registry.rules_for(RuleGroup::Pruning).len(), 7);
        assert_eq!(registry.rules_for(RuleGroup::Calc).len(), 6);
        assert_eq!(registry.rules_for(RuleGroup::Conversion).len(), 11);
        assert_eq!(registry.rules_for(RuleGroup::RootAdapter).len(), 1);
        assert_eq!(registry.len(), 42);
    }

    #[test]
    fn test_every_catalogued_rule_is_in_the_manifest() {
        let catalog = default_catalog().unwrap();
        let manifest = default_manifest().unwrap();
        let listed: Vec<&String> = manifest.entries().flat_map(|(_, names)| names).collect();
        assert_eq!(catalog.names().count(), listed.len());
        for name in catalog.names() {
            assert!(listed.iter().any(|l| l.as_str() == name), "{name} not in manifest");
        }
    }

    #[test]
    fn test_group_rule_types() {
        let registry = default_rule_registry().unwrap();
        for group in [RuleGroup::Logical, RuleGroup::Pruning, RuleGroup::Calc] {
            assert!(registry
                .rules_for(group)
                .iter()
                .all(|r| r.rule_type() == RuleType::Transformation));
        }
        for group in [RuleGroup::Conversion, RuleGroup::RootAdapter] {
            assert!(registry
                .rules_for(group)
                .iter()
                .all(|r| r.rule_type() == RuleType::Conversion));
        }
    }
}
