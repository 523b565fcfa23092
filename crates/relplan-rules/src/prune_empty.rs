//! # Empty-Relation Pruning
//!
//! Operators whose input is known to be empty are replaced by an empty `Values`
//! with the operator's row type. Emptiness starts at `Values` with no tuples and
//! at filters that can never pass a row, and propagates upward as each operator
//! above is pruned in turn.
//!
//! Not every operator is empty over an empty input:
//!
//! - A global Aggregate (no grouping columns) returns one row.
//! - The preserved side of an outer join still produces rows, padded with NULLs.
//! - An anti join with an empty right input returns its whole left input.

use crate::plan_util::empty_like;
use relplan_core::error::Result;
use relplan_core::expr::JoinType;
use relplan_core::metadata::is_empty;
use relplan_core::node::{OpKind, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

macro_rules! transformation_rule {
    ($rule:ident, $name:literal, $pattern:expr) => {
        impl Rule for $rule {
            fn name(&self) -> &str {
                $name
            }

            fn rule_type(&self) -> RuleType {
                RuleType::Transformation
            }

            fn pattern(&self) -> Pattern {
                $pattern
            }

            fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
                self.prune(node)
            }
        }
    };
}

pub struct PruneEmptyAggregate;
transformation_rule!(PruneEmptyAggregate, "PruneEmptyAggregate", Pattern::aggregate());

impl PruneEmptyAggregate {
    fn prune(&self, node: &Arc<RelNode>) -> Result<Vec<Arc<RelNode>>> {
        match node.op() {
            Operator::Aggregate { group_keys, .. }
                if !group_keys.is_empty() && is_empty(node.input(0)) =>
            {
                Ok(vec![empty_like(node)?])
            }
            _ => Ok(vec![]),
        }
    }
}

pub struct PruneEmptyFilter;
transformation_rule!(PruneEmptyFilter, "PruneEmptyFilter", Pattern::filter());

impl PruneEmptyFilter {
    fn prune(&self, node: &Arc<RelNode>) -> Result<Vec<Arc<RelNode>>> {
        match node.op() {
            Operator::Filter { predicate }
                if predicate.is_never_true() || is_empty(node.input(0)) =>
            {
                Ok(vec![empty_like(node)?])
            }
            _ => Ok(vec![]),
        }
    }
}

/// Join whose left input is empty.
pub struct PruneEmptyJoinLeft;
transformation_rule!(PruneEmptyJoinLeft, "PruneEmptyJoinLeft", Pattern::join());

impl PruneEmptyJoinLeft {
    fn prune(&self, node: &Arc<RelNode>) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Join { join_type, .. } = node.op() else {
            return Ok(vec![]);
        };
        if !is_empty(node.input(0)) {
            return Ok(vec![]);
        }
        match join_type {
            JoinType::Inner
            | JoinType::Left
            | JoinType::Semi
            | JoinType::Anti
            | JoinType::Cross => Ok(vec![empty_like(node)?]),
            JoinType::Right | JoinType::Full => Ok(vec![]),
        }
    }
}

/// Join whose right input is empty.
pub struct PruneEmptyJoinRight;
transformation_rule!(PruneEmptyJoinRight, "PruneEmptyJoinRight", Pattern::join());

impl PruneEmptyJoinRight {
    fn prune(&self, node: &Arc<RelNode>) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Join { join_type, .. } = node.op() else {
            return Ok(vec![]);
        };
        if !is_empty(node.input(1)) {
            return Ok(vec![]);
        }
        match join_type {
            JoinType::Inner | JoinType::Right | JoinType::Semi | JoinType::Cross => {
                Ok(vec![empty_like(node)?])
            }
            // No right row can match: every left row survives.
            JoinType::Anti => Ok(vec![node.input(0).clone()]),
            JoinType::Left | JoinType::Full => Ok(vec![]),
        }
    }
}

pub struct PruneEmptyProject;
transformation_rule!(PruneEmptyProject, "PruneEmptyProject", Pattern::project());

impl PruneEmptyProject {
    fn prune(&self, node: &Arc<RelNode>) -> Result<Vec<Arc<RelNode>>> {
        if is_empty(node.input(0)) {
            Ok(vec![empty_like(node)?])
        } else {
            Ok(vec![])
        }
    }
}

pub struct PruneEmptySort;
transformation_rule!(PruneEmptySort, "PruneEmptySort", Pattern::sort());

impl PruneEmptySort {
    fn prune(&self, node: &Arc<RelNode>) -> Result<Vec<Arc<RelNode>>> {
        let limit_zero = matches!(node.op(), Operator::Sort { fetch: Some(0), .. });
        if limit_zero || is_empty(node.input(0)) {
            Ok(vec![empty_like(node)?])
        } else {
            Ok(vec![])
        }
    }
}

/// Drop empty inputs of a Union.
pub struct PruneEmptyUnion;
transformation_rule!(
    PruneEmptyUnion,
    "PruneEmptyUnion",
    Pattern::logical_variadic(OpKind::Union)
);

impl PruneEmptyUnion {
    fn prune(&self, node: &Arc<RelNode>) -> Result<Vec<Arc<RelNode>>> {
        let kept: Vec<_> = node
            .inputs()
            .iter()
            .filter(|i| !is_empty(i))
            .cloned()
            .collect();
        if kept.len() == node.inputs().len() {
            return Ok(vec![]);
        }
        if kept.is_empty() {
            return Ok(vec![empty_like(node)?]);
        }
        let pruned = node.with_inputs(kept)?;
        // Names and nullability may come from the dropped inputs.
        if pruned.row_type() != node.row_type() {
            tracing::trace!("union pruning would change the row type");
            return Ok(vec![]);
        }
        Ok(vec![pruned])
    }
}
