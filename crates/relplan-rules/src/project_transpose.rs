//! # Project Rules
//!
//! Rules that move, merge or split projections.
//!
//! - **`ProjectSetOpTranspose`**: a Project above a `UNION ALL` is copied into
//!   every input. Only `UNION ALL` qualifies: projecting before a distinct set
//!   operation would deduplicate on fewer columns.
//! - **`ProjectFilterTranspose`**: a column-dropping Project above a Filter on a
//!   leaf is split so that the columns neither the Project nor the Filter needs are
//!   dropped before filtering.
//! - **`ProjectMerge`**: two stacked Projects become one.
//! - **`SortProjectTranspose`** / **`ProjectSortTranspose`**: a Sort and a Project
//!   trade places. The Sort goes below a Project that computes or keeps columns,
//!   and a Project that only drops columns goes below the Sort.
//!
//! ```text
//! ProjectFilterTranspose
//! Before: Project(a, Filter(b > 1, Scan(a, b, c, d)))
//! After:  Project(a, Filter(b > 1, Project(a, b, Scan(a, b, c, d))))
//! ```
//!
//! The Sort rules split projections by the same "only drops columns" test, so at
//! most one of them applies to any Sort/Project pair.

use crate::plan_util::{as_columns, inputs_typed_like, is_narrowing};
use relplan_core::error::Result;
use relplan_core::expr::{Expr, SortKey};
use relplan_core::node::{OpKind, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

/// Copy a Project above `UNION ALL` into each input.
pub struct ProjectSetOpTranspose;

impl Rule for ProjectSetOpTranspose {
    fn name(&self) -> &str {
        "ProjectSetOpTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Project, Pattern::logical_variadic(OpKind::Union))
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Project { exprs, aliases } = node.op() else {
            return Ok(vec![]);
        };
        let union = node.input(0);
        if !matches!(union.op(), Operator::Union { all: true }) || !inputs_typed_like(union) {
            return Ok(vec![]);
        }
        let inputs = union
            .inputs()
            .iter()
            .map(|i| RelNode::project(i.clone(), exprs.clone(), aliases.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(vec![union.with_inputs(inputs)?])
    }
}

/// Drop unused leaf columns below a Filter.
pub struct ProjectFilterTranspose;

impl Rule for ProjectFilterTranspose {
    fn name(&self) -> &str {
        "ProjectFilterTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        // Match: Project(Filter(Leaf))
        Pattern::on_top_of(
            OpKind::Project,
            Pattern::on_top_of(OpKind::Filter, Pattern::Leaf),
        )
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Project { exprs, aliases } = node.op() else {
            return Ok(vec![]);
        };
        let filter = node.input(0);
        let Operator::Filter { predicate } = filter.op() else {
            return Ok(vec![]);
        };
        let leaf = filter.input(0);
        let width = leaf.row_type().len();
        if !is_narrowing(exprs, width) {
            return Ok(vec![]);
        }
        let Some(columns) = as_columns(exprs) else {
            return Ok(vec![]);
        };

        let predicate_columns = predicate.column_indexes();
        let mut needed: Vec<usize> = columns
            .iter()
            .copied()
            .chain(predicate_columns.iter().copied())
            .collect();
        needed.sort_unstable();
        needed.dedup();
        if needed.len() == width {
            return Ok(vec![]);
        }

        let ascending = columns.windows(2).all(|w| w[0] < w[1]);
        if ascending && predicate_columns.iter().all(|c| columns.contains(c)) {
            // The Project itself can go below the Filter.
            let mapping = positions(&columns, width);
            let Some(predicate) = predicate.remap(&mapping) else {
                return Ok(vec![]);
            };
            let below = RelNode::project(leaf.clone(), exprs.clone(), aliases.clone())?;
            return Ok(vec![RelNode::filter(below, predicate)?]);
        }

        let mapping = positions(&needed, width);
        let (Some(predicate), Some(top)) = (
            predicate.remap(&mapping),
            exprs
                .iter()
                .map(|e| e.remap(&mapping))
                .collect::<Option<Vec<Expr>>>(),
        ) else {
            return Ok(vec![]);
        };
        let below = RelNode::project_columns(leaf.clone(), &needed)?;
        let filtered = RelNode::filter(below, predicate)?;
        Ok(vec![RelNode::project(filtered, top, aliases.clone())?])
    }
}

/// `mapping[old] = position of old in columns`.
fn positions(columns: &[usize], width: usize) -> Vec<Option<usize>> {
    let mut mapping = vec![None; width];
    for (pos, &c) in columns.iter().enumerate() {
        if mapping[c].is_none() {
            mapping[c] = Some(pos);
        }
    }
    mapping
}

/// Merge a Project into the Project beneath it.
pub struct ProjectMerge;

impl Rule for ProjectMerge {
    fn name(&self) -> &str {
        "ProjectMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Project, Pattern::project())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Project { exprs, aliases } = node.op() else {
            return Ok(vec![]);
        };
        let bottom = node.input(0);
        let Operator::Project {
            exprs: bottom_exprs,
            ..
        } = bottom.op()
        else {
            return Ok(vec![]);
        };
        let merged = exprs.iter().map(|e| e.substitute(bottom_exprs)).collect();
        Ok(vec![RelNode::project(
            bottom.input(0).clone(),
            merged,
            aliases.clone(),
        )?])
    }
}

/// Sort below a Project that does more than drop columns.
pub struct SortProjectTranspose;

impl Rule for SortProjectTranspose {
    fn name(&self) -> &str {
        "SortProjectTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Sort, Pattern::project())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Sort {
            collation,
            offset,
            fetch,
        } = node.op()
        else {
            return Ok(vec![]);
        };
        let project = node.input(0);
        let Operator::Project { exprs, aliases } = project.op() else {
            return Ok(vec![]);
        };
        let input = project.input(0);
        if is_narrowing(exprs, input.row_type().len()) {
            return Ok(vec![]);
        }
        // Every sort key must be a plain input column.
        let Some(keys) = collation
            .iter()
            .map(|k| {
                exprs[k.column].as_column().map(|column| SortKey {
                    column,
                    ..k.clone()
                })
            })
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(vec![]);
        };

        let sorted = RelNode::logical(
            Operator::Sort {
                collation: keys,
                offset: *offset,
                fetch: *fetch,
            },
            vec![input.clone()],
        )?;
        Ok(vec![RelNode::project(sorted, exprs.clone(), aliases.clone())?])
    }
}

/// Column-dropping Project below a Sort.
pub struct ProjectSortTranspose;

impl Rule for ProjectSortTranspose {
    fn name(&self) -> &str {
        "ProjectSortTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Project, Pattern::sort())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Project { exprs, aliases } = node.op() else {
            return Ok(vec![]);
        };
        let sort = node.input(0);
        let Operator::Sort {
            collation,
            offset,
            fetch,
        } = sort.op()
        else {
            return Ok(vec![]);
        };
        let width = sort.row_type().len();
        if !is_narrowing(exprs, width) {
            return Ok(vec![]);
        }
        let Some(columns) = as_columns(exprs) else {
            return Ok(vec![]);
        };
        let mapping = positions(&columns, width);
        let Some(keys) = collation
            .iter()
            .map(|k| {
                mapping[k.column].map(|column| SortKey {
                    column,
                    ..k.clone()
                })
            })
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(vec![]);
        };

        let projected = RelNode::project(sort.input(0).clone(), exprs.clone(), aliases.clone())?;
        Ok(vec![RelNode::logical(
            Operator::Sort {
                collation: keys,
                offset: *offset,
                fetch: *fetch,
            },
            vec![projected],
        )?])
    }
}
