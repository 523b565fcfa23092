//! Union rewrites.
//!
//! `UnionToDistinct` expresses a distinct Union as a `UNION ALL` under a
//! grouping Aggregate, which lets the aggregate rules treat the duplicate
//! elimination like any other. `UnionEliminator` removes a `UNION ALL` that has
//! a single input.

use relplan_core::error::Result;
use relplan_core::node::{OpKind, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

pub struct UnionEliminator;

impl Rule for UnionEliminator {
    fn name(&self) -> &str {
        "UnionEliminator"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical_variadic(OpKind::Union)
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Union { all: true } = node.op() else {
            return Ok(vec![]);
        };
        match node.inputs() {
            [only] if only.row_type() == node.row_type() => Ok(vec![only.clone()]),
            _ => Ok(vec![]),
        }
    }
}

pub struct UnionToDistinct;

impl Rule for UnionToDistinct {
    fn name(&self) -> &str {
        "UnionToDistinct"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical_variadic(OpKind::Union)
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Union { all: false } = node.op() else {
            return Ok(vec![]);
        };
        let union_all = RelNode::union(node.inputs().to_vec(), true)?;
        let group_keys = (0..node.row_type().len()).collect();
        tracing::trace!(inputs = node.inputs().len(), "distinct union to aggregate");
        Ok(vec![RelNode::aggregate(union_all, group_keys, vec![])?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn test_single_input_union_all_removed() {
        let s = scan("t", &["a", "b"]);
        let union = RelNode::union(vec![s.clone()], true).unwrap();
        let out = apply_one(&UnionEliminator, &union);
        assert!(Arc::ptr_eq(&out, &s));

        let two = RelNode::union(vec![s.clone(), s.clone()], true).unwrap();
        assert!(declines(&UnionEliminator, &two));
        let distinct = RelNode::union(vec![s], false).unwrap();
        assert!(declines(&UnionEliminator, &distinct));
    }

    #[test]
    fn test_distinct_union_becomes_aggregate() {
        let union = RelNode::union(vec![scan("a", &["x"]), scan("b", &["x"])], false).unwrap();
        let out = apply_one(&UnionToDistinct, &union);
        let Operator::Aggregate { group_keys, calls } = out.op() else {
            panic!("expected aggregate, got {}", out.kind());
        };
        assert_eq!(group_keys, &vec![0]);
        assert!(calls.is_empty());
        assert_eq!(out.input(0).op(), &Operator::Union { all: true });
    }
}
