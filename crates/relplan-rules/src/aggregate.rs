//! # Aggregate Rules
//!
//! - **`AggregateProjectMerge`**: an Aggregate reading only bare columns of the
//!   Project beneath it reads them from the Project's input directly.
//! - **`AggregateRemove`**: a grouping Aggregate without aggregate calls over an
//!   input that is already unique on the grouping columns is a projection.
//! - **`AggregateJoinTranspose`**: a distinct Aggregate above an inner join also
//!   deduplicates each join input on the columns that input contributes.
//! - **`AggregateUnionAggregate`**: a distinct Aggregate over `UNION ALL` makes
//!   distinct Aggregates on the union's inputs redundant.
//!
//! A "distinct" Aggregate here is one with grouping columns and no calls: it
//! returns each distinct combination of its keys once.

use crate::plan_util::{is_identity, project_named};
use relplan_core::error::Result;
use relplan_core::expr::{AggCall, JoinType};
use relplan_core::metadata::{is_distinct_on, KeySet};
use relplan_core::node::{OpKind, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

fn is_distinct_aggregate(group_keys: &[usize], calls: &[AggCall]) -> bool {
    !group_keys.is_empty() && calls.is_empty()
}

/// Read an Aggregate's columns through the Project beneath it.
pub struct AggregateProjectMerge;

impl Rule for AggregateProjectMerge {
    fn name(&self) -> &str {
        "AggregateProjectMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Aggregate, Pattern::project())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Aggregate { group_keys, calls } = node.op() else {
            return Ok(vec![]);
        };
        let project = node.input(0);
        let Operator::Project { exprs, .. } = project.op() else {
            return Ok(vec![]);
        };
        let column = |i: usize| exprs[i].as_column();

        let Some(new_keys) = group_keys
            .iter()
            .map(|&k| column(k))
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(vec![]);
        };
        let distinct_keys: KeySet = new_keys.iter().copied().collect();
        if distinct_keys.len() != new_keys.len() {
            return Ok(vec![]);
        }
        let Some(new_calls) = calls
            .iter()
            .map(|call| {
                let args = call
                    .args
                    .iter()
                    .map(|&a| column(a))
                    .collect::<Option<Vec<_>>>()?;
                Some(AggCall {
                    args,
                    ..call.clone()
                })
            })
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(vec![]);
        };

        let aggregate = RelNode::aggregate(project.input(0).clone(), new_keys, new_calls)?;
        if aggregate.row_type() == node.row_type() {
            return Ok(vec![aggregate]);
        }
        // Group columns take the input's names; restore the Project's.
        let names = node.row_type().names().map(str::to_string).collect();
        let columns: Vec<usize> = (0..aggregate.row_type().len()).collect();
        Ok(vec![project_named(aggregate, &columns, names)?])
    }
}

/// Drop a distinct Aggregate over an input that is already distinct.
pub struct AggregateRemove;

impl Rule for AggregateRemove {
    fn name(&self) -> &str {
        "AggregateRemove"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate()
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Aggregate { group_keys, calls } = node.op() else {
            return Ok(vec![]);
        };
        if !is_distinct_aggregate(group_keys, calls) {
            return Ok(vec![]);
        }
        let input = node.input(0);
        if !is_distinct_on(input, &group_keys.iter().copied().collect()) {
            return Ok(vec![]);
        }
        let project = RelNode::project_columns(input.clone(), group_keys)?;
        if let Operator::Project { exprs, aliases } = project.op() {
            if is_identity(exprs, aliases, input.row_type()) {
                return Ok(vec![input.clone()]);
            }
        }
        Ok(vec![project])
    }
}

/// Deduplicate the inputs of an inner join below a distinct Aggregate.
pub struct AggregateJoinTranspose;

impl Rule for AggregateJoinTranspose {
    fn name(&self) -> &str {
        "AggregateJoinTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Aggregate, Pattern::join())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Aggregate { group_keys, calls } = node.op() else {
            return Ok(vec![]);
        };
        if !is_distinct_aggregate(group_keys, calls) {
            return Ok(vec![]);
        }
        let join = node.input(0);
        let Operator::Join {
            join_type: JoinType::Inner,
            condition,
            algorithm,
        } = join.op()
        else {
            return Ok(vec![]);
        };
        let (left, right) = (join.input(0), join.input(1));
        let left_width = left.row_type().len();

        // Columns each side must keep: its group columns and condition columns.
        let mut needed_left = KeySet::new();
        let mut needed_right = KeySet::new();
        for c in group_keys.iter().copied().chain(condition.column_indexes()) {
            if c < left_width {
                needed_left.insert(c);
            } else {
                needed_right.insert(c - left_width);
            }
        }
        // A side that contributes no columns keeps its rows: a keyless distinct
        // Aggregate would return one row even over empty input.
        let push_left = !needed_left.is_empty() && !is_distinct_on(left, &needed_left);
        let push_right = !needed_right.is_empty() && !is_distinct_on(right, &needed_right);
        if !push_left && !push_right {
            return Ok(vec![]);
        }

        let (new_left, left_map) = distinct_side(left, &needed_left, push_left)?;
        let (new_right, right_map) = distinct_side(right, &needed_right, push_right)?;
        let new_left_width = new_left.row_type().len();
        let mapping: Vec<Option<usize>> = left_map
            .into_iter()
            .chain(right_map.into_iter().map(|m| m.map(|j| j + new_left_width)))
            .collect();

        let (Some(condition), Some(keys)) = (
            condition.remap(&mapping),
            group_keys
                .iter()
                .map(|&k| mapping[k])
                .collect::<Option<Vec<_>>>(),
        ) else {
            return Ok(vec![]);
        };
        let new_join = RelNode::logical(
            Operator::Join {
                join_type: JoinType::Inner,
                condition,
                algorithm: *algorithm,
            },
            vec![new_left, new_right],
        )?;
        Ok(vec![RelNode::aggregate(new_join, keys, vec![])?])
    }
}

/// The side itself, or a distinct Aggregate of it on `needed`, with the mapping
/// from the side's columns to the result's.
fn distinct_side(
    side: &Arc<RelNode>,
    needed: &KeySet,
    push: bool,
) -> Result<(Arc<RelNode>, Vec<Option<usize>>)> {
    let width = side.row_type().len();
    if !push {
        return Ok((side.clone(), (0..width).map(Some).collect()));
    }
    let mut mapping = vec![None; width];
    for (pos, &c) in needed.iter().enumerate() {
        mapping[c] = Some(pos);
    }
    let keys = needed.iter().copied().collect();
    Ok((RelNode::aggregate(side.clone(), keys, vec![])?, mapping))
}

/// Remove distinct Aggregates from the inputs of a distinct `UNION ALL`.
pub struct AggregateUnionAggregate;

impl Rule for AggregateUnionAggregate {
    fn name(&self) -> &str {
        "AggregateUnionAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Aggregate, Pattern::logical_variadic(OpKind::Union))
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Aggregate { group_keys, calls } = node.op() else {
            return Ok(vec![]);
        };
        let union = node.input(0);
        let width = union.row_type().len();
        if !is_distinct_aggregate(group_keys, calls)
            || group_keys.len() != width
            || !matches!(union.op(), Operator::Union { all: true })
        {
            return Ok(vec![]);
        }

        let mut changed = false;
        let mut inputs = Vec::with_capacity(union.inputs().len());
        for input in union.inputs() {
            match input.op() {
                Operator::Aggregate {
                    group_keys: inner_keys,
                    calls: inner_calls,
                } if inner_calls.is_empty() => {
                    changed = true;
                    let below = input.input(0);
                    let project = RelNode::project_columns(below.clone(), inner_keys)?;
                    let replacement = match project.op() {
                        Operator::Project { exprs, aliases }
                            if is_identity(exprs, aliases, below.row_type()) =>
                        {
                            below.clone()
                        }
                        _ => project,
                    };
                    inputs.push(replacement);
                }
                _ => inputs.push(input.clone()),
            }
        }
        if !changed {
            return Ok(vec![]);
        }
        let new_union = union.with_inputs(inputs)?;
        if new_union.row_type() != union.row_type() {
            return Ok(vec![]);
        }
        Ok(vec![node.with_inputs(vec![new_union])?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use relplan_core::expr::{AggFunc, Expr};
    use relplan_core::metadata::is_empty;

    #[test]
    fn test_aggregate_reads_through_project() {
        let s = scan("t", &["a", "b", "c"]);
        let project = RelNode::project_columns(s, &[2, 0]).unwrap();
        let agg = RelNode::aggregate(
            project,
            vec![0],
            vec![AggCall::new(AggFunc::Sum, vec![1], "total")],
        )
        .unwrap();
        let out = apply_one(&AggregateProjectMerge, &agg);
        let Operator::Aggregate { group_keys, calls } = out.op() else {
            panic!("expected aggregate, got {}", out.kind());
        };
        assert_eq!(group_keys, &vec![2]);
        assert_eq!(calls[0].args, vec![0]);
        assert_eq!(out.input(0).kind(), OpKind::TableScan);
    }

    #[test]
    fn test_renamed_group_column_keeps_name() {
        let s = scan("t", &["a", "b"]);
        let project = RelNode::project(s, vec![col(1, "b")], vec!["renamed".into()]).unwrap();
        let agg = RelNode::aggregate(project, vec![0], vec![]).unwrap();
        let out = apply_one(&AggregateProjectMerge, &agg);
        assert_eq!(out.kind(), OpKind::Project);
        assert_eq!(out.input(0).kind(), OpKind::Aggregate);
    }

    #[test]
    fn test_computed_group_key_declines() {
        let s = scan("t", &["a"]);
        let project = RelNode::project(
            s,
            vec![Expr::binary(relplan_core::expr::BinaryOp::Add, col(0, "a"), int(1))],
            vec!["a1".into()],
        )
        .unwrap();
        let agg = RelNode::aggregate(project, vec![0], vec![]).unwrap();
        assert!(declines(&AggregateProjectMerge, &agg));
    }

    #[test]
    fn test_aggregate_over_unique_input_removed() {
        let s = keyed_scan("t", &["id", "v"], &[0]);
        let agg = RelNode::aggregate(s.clone(), vec![0, 1], vec![]).unwrap();
        let out = apply_one(&AggregateRemove, &agg);
        assert!(Arc::ptr_eq(&out, &s));

        let narrower = RelNode::aggregate(s, vec![0], vec![]).unwrap();
        let out = apply_one(&AggregateRemove, &narrower);
        assert_eq!(out.kind(), OpKind::Project);
    }

    #[test]
    fn test_aggregate_remove_needs_uniqueness() {
        let agg = RelNode::aggregate(scan("t", &["a"]), vec![0], vec![]).unwrap();
        assert!(declines(&AggregateRemove, &agg));
        let with_call = RelNode::aggregate(
            keyed_scan("t", &["id", "v"], &[0]),
            vec![0],
            vec![AggCall::new(AggFunc::Count, vec![], "n")],
        )
        .unwrap();
        assert!(declines(&AggregateRemove, &with_call));
    }

    #[test]
    fn test_distinct_pushed_to_non_unique_side() {
        let left = keyed_scan("l", &["k", "a"], &[0]);
        let right = scan("r", &["k", "b", "c"]);
        let joined = join(left, right, JoinType::Inner);
        let agg = RelNode::aggregate(joined, vec![1, 3], vec![]).unwrap();

        let out = apply_one(&AggregateJoinTranspose, &agg);
        let new_join = out.input(0);
        assert_eq!(new_join.input(0).kind(), OpKind::TableScan);
        let right_side = new_join.input(1);
        let Operator::Aggregate { group_keys, .. } = right_side.op() else {
            panic!("expected aggregate on the right, got {}", right_side.kind());
        };
        // Join key k and group column b; c is dropped.
        assert_eq!(group_keys, &vec![0, 1]);

        assert!(declines(&AggregateJoinTranspose, &out));
    }

    #[test]
    fn test_side_without_columns_is_not_deduplicated() {
        let never = RelNode::filter(scan("l", &["a"]), Expr::boolean(false)).unwrap();
        let right = scan("r", &["b", "c"]);
        let joined = RelNode::join(never, right, JoinType::Inner, Expr::boolean(true)).unwrap();
        let agg = RelNode::aggregate(joined, vec![1], vec![]).unwrap();
        assert!(is_empty(&agg));

        let out = apply_one(&AggregateJoinTranspose, &agg);
        let new_join = out.input(0);
        assert_eq!(new_join.input(0).kind(), OpKind::Filter);
        assert_eq!(new_join.input(1).kind(), OpKind::Aggregate);
        assert!(is_empty(&out));
    }

    #[test]
    fn test_cross_join_with_distinct_contributing_side_declines() {
        let left = scan("l", &["a"]);
        let right = keyed_scan("r", &["b", "c"], &[0]);
        let joined = RelNode::join(left, right, JoinType::Inner, Expr::boolean(true)).unwrap();
        let agg = RelNode::aggregate(joined, vec![1], vec![]).unwrap();
        assert!(declines(&AggregateJoinTranspose, &agg));
    }

    #[test]
    fn test_inner_aggregates_under_distinct_union_removed() {
        let inner = RelNode::aggregate(scan("a", &["x", "y"]), vec![1], vec![]).unwrap();
        let union = RelNode::union(vec![inner, scan("b", &["y"])], true).unwrap();
        let agg = RelNode::aggregate(union, vec![0], vec![]).unwrap();

        let out = apply_one(&AggregateUnionAggregate, &agg);
        let new_union = out.input(0);
        assert_eq!(new_union.input(0).kind(), OpKind::Project);
        assert!(declines(&AggregateUnionAggregate, &out));
    }
}
