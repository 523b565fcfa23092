//! # Filter Transpose Rules
//!
//! These rules move a Filter below the operator it sits on, so that predicates
//! reach the scans and every operator in between sees fewer rows.
//!
//! - **`FilterAggregateTranspose`**: conjuncts that only reference grouping
//!   columns are evaluated before grouping.
//! - **`FilterSetOpTranspose`**: the filter is copied into every input of a
//!   Union, Minus or Intersect.
//! - **`FilterProjectTranspose`**: the predicate is rewritten in terms of the
//!   projection's input and evaluated first.
//!
//! ```text
//! Before: Filter(x > 5, Project(x = a + 1, Scan))
//! After:  Project(x = a + 1, Filter(a + 1 > 5, Scan))
//! ```
//!
//! `FilterProjectTranspose` declines a column-dropping Project directly over a
//! TableScan or Values. `ProjectFilterTranspose` produces exactly that shape, and
//! without the exception the two rules would undo each other forever.

use crate::plan_util::{filter_if_any, inputs_typed_like, is_narrowing, is_set_op};
use relplan_core::error::Result;
use relplan_core::expr::Expr;
use relplan_core::node::{Convention, OpKind, Operator, RelNode};
use relplan_core::pattern::{OpMatcher, Pattern};
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

/// Push grouping-column predicates below an Aggregate.
pub struct FilterAggregateTranspose;

impl Rule for FilterAggregateTranspose {
    fn name(&self) -> &str {
        "FilterAggregateTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Filter, Pattern::aggregate())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Filter { predicate } = node.op() else {
            return Ok(vec![]);
        };
        let aggregate = node.input(0);
        let Operator::Aggregate { group_keys, .. } = aggregate.op() else {
            return Ok(vec![]);
        };
        if group_keys.is_empty() {
            return Ok(vec![]);
        }

        // Output position i < group_keys.len() is input column group_keys[i].
        let mapping: Vec<Option<usize>> = (0..aggregate.row_type().len())
            .map(|i| group_keys.get(i).copied())
            .collect();
        let mut pushed = Vec::new();
        let mut kept = Vec::new();
        for conjunct in predicate.owned_conjuncts() {
            let remapped = if conjunct.column_indexes().is_empty() {
                None
            } else {
                conjunct.remap(&mapping)
            };
            match remapped {
                Some(below) => pushed.push(below),
                None => kept.push(conjunct),
            }
        }
        if pushed.is_empty() {
            return Ok(vec![]);
        }

        let new_input = filter_if_any(aggregate.input(0).clone(), pushed)?;
        let new_aggregate = aggregate.with_inputs(vec![new_input])?;
        Ok(vec![filter_if_any(new_aggregate, kept)?])
    }
}

/// Push a Filter into every input of a set operation.
pub struct FilterSetOpTranspose;

impl Rule for FilterSetOpTranspose {
    fn name(&self) -> &str {
        "FilterSetOpTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(
            OpKind::Filter,
            Pattern::Variadic(OpMatcher::AnyKind(Convention::Logical)),
        )
    }

    fn matches(&self, node: &RelNode) -> bool {
        relplan_core::pattern::matches(node, &self.pattern()) && is_set_op(node.input(0).op())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Filter { predicate } = node.op() else {
            return Ok(vec![]);
        };
        let set_op = node.input(0);
        if !inputs_typed_like(set_op) {
            return Ok(vec![]);
        }
        let inputs = set_op
            .inputs()
            .iter()
            .map(|i| RelNode::filter(i.clone(), predicate.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(vec![set_op.with_inputs(inputs)?])
    }
}

/// Evaluate a Filter before the Project beneath it.
pub struct FilterProjectTranspose;

impl Rule for FilterProjectTranspose {
    fn name(&self) -> &str {
        "FilterProjectTranspose"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Filter, Pattern::project())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Filter { predicate } = node.op() else {
            return Ok(vec![]);
        };
        let project = node.input(0);
        let Operator::Project { exprs, aliases } = project.op() else {
            return Ok(vec![]);
        };
        let input = project.input(0);
        if input.is_leaf() && is_narrowing(exprs, input.row_type().len()) {
            return Ok(vec![]);
        }

        let below: Expr = predicate.substitute(exprs);
        let filtered = RelNode::filter(input.clone(), below)?;
        Ok(vec![RelNode::project(filtered, exprs.clone(), aliases.clone())?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use relplan_core::expr::{AggCall, AggFunc, BinaryOp};
    use relplan_core::node::TableRef;
    use relplan_core::types::{DataType, Field, RowType};

    #[test]
    fn test_filter_below_aggregate() {
        let agg = RelNode::aggregate(
            scan("t", &["a", "g", "v"]),
            vec![1],
            vec![AggCall::new(AggFunc::Sum, vec![2], "total")],
        )
        .unwrap();
        let pred = Expr::And(vec![gt(col(0, "g"), 3), gt(col(1, "total"), 100)]);
        let filtered = RelNode::filter(agg, pred).unwrap();

        let out = apply_one(&FilterAggregateTranspose, &filtered);
        assert_eq!(out.kind(), OpKind::Filter);
        let below = out.input(0).input(0);
        let Operator::Filter { predicate } = below.op() else {
            panic!("expected filter below aggregate");
        };
        // Group column 0 is input column 1.
        assert_eq!(predicate.column_indexes().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_aggregate_predicate_stays() {
        let agg = RelNode::aggregate(
            scan("t", &["g", "v"]),
            vec![0],
            vec![AggCall::new(AggFunc::Sum, vec![1], "total")],
        )
        .unwrap();
        let filtered = RelNode::filter(agg, gt(col(1, "total"), 1)).unwrap();
        assert!(declines(&FilterAggregateTranspose, &filtered));
    }

    #[test]
    fn test_filter_into_union_inputs() {
        let union = RelNode::union(vec![scan("a", &["x"]), scan("b", &["y"])], true).unwrap();
        let filtered = RelNode::filter(union, gt(col(0, "x"), 0)).unwrap();
        let out = apply_one(&FilterSetOpTranspose, &filtered);
        assert_eq!(out.kind(), OpKind::Union);
        assert!(out.inputs().iter().all(|i| i.kind() == OpKind::Filter));

        // A filter over something that is not a set operation does not match.
        let plain = RelNode::filter(scan("a", &["x"]), gt(col(0, "x"), 0)).unwrap();
        assert!(!FilterSetOpTranspose.matches(&plain));
    }

    #[test]
    fn test_set_op_with_untyped_input_declines() {
        let nulls = RelNode::values(
            RowType::new(vec![Field::new("x", DataType::Null, true)]),
            vec![vec![relplan_core::expr::ScalarValue::Null]],
        )
        .unwrap();
        let typed = RelNode::table_scan(
            TableRef::new("s", "t"),
            RowType::new(vec![Field::new("x", DataType::Int64, true)]),
        )
        .unwrap();
        let union = RelNode::union(vec![typed, nulls], true).unwrap();
        let filtered = RelNode::filter(union, gt(col(0, "x"), 0)).unwrap();
        assert!(declines(&FilterSetOpTranspose, &filtered));
    }

    #[test]
    fn test_filter_below_computing_project() {
        let s = scan("t", &["a", "b"]);
        let project = RelNode::project(
            s,
            vec![Expr::binary(BinaryOp::Add, col(0, "a"), int(1))],
            vec!["x".into()],
        )
        .unwrap();
        let filtered = RelNode::filter(project, gt(col(0, "x"), 5)).unwrap();
        let out = apply_one(&FilterProjectTranspose, &filtered);
        assert_eq!(out.kind(), OpKind::Project);
        assert_eq!(out.input(0).kind(), OpKind::Filter);
    }

    #[test]
    fn test_narrowing_project_over_leaf_declines() {
        let project = RelNode::project_columns(scan("t", &["a", "b"]), &[0]).unwrap();
        let filtered = RelNode::filter(project.clone(), gt(col(0, "a"), 5)).unwrap();
        assert!(declines(&FilterProjectTranspose, &filtered));

        // The same projection over a non-leaf is transposed.
        let over_filter = RelNode::project_columns(
            RelNode::filter(scan("t", &["a", "b"]), gt(col(1, "b"), 0)).unwrap(),
            &[0],
        )
        .unwrap();
        let filtered = RelNode::filter(over_filter, gt(col(0, "a"), 5)).unwrap();
        assert!(!declines(&FilterProjectTranspose, &filtered));
    }
}
