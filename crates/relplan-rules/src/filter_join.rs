//! # Filter / Join Pushdown Rules
//!
//! Predicate pushdown is one of the most impactful rewrites because it reduces the
//! amount of data flowing through the plan as early as possible. Two rules cover
//! the join case:
//!
//! ## FilterIntoJoin
//!
//! A Filter directly above a Join is split into conjuncts. Conjuncts that reference
//! only one input are pushed into a Filter on that input; conjuncts spanning both
//! inputs are merged into the join condition.
//!
//! ```text
//! Before: Filter(l.a > 5 AND l.k = r.k, Join(L, R, TRUE))
//! After:  Join(Filter(a > 5, L), R, l.k = r.k)
//! ```
//!
//! ## JoinConditionPush
//!
//! Conjuncts of the join condition that reference only one input are pushed into a
//! Filter on that input.
//!
//! ## Outer Joins
//!
//! Pushing a predicate to an input is only legal when that input does not generate
//! NULLs: a predicate above a Left join may go to the left input, never to the
//! right. Predicates above an outer join that cannot be pushed stay in a Filter
//! above it. Inside the join condition it is the opposite: a Left join's condition
//! may filter the right input but not the left, since unmatched left rows survive.

use crate::plan_util::{filter_if_any, split_for_join};
use relplan_core::error::Result;
use relplan_core::expr::{Expr, JoinType};
use relplan_core::node::{JoinAlgorithm, OpKind, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

/// Push a Filter above a Join into the join and its inputs.
pub struct FilterIntoJoin;

impl Rule for FilterIntoJoin {
    fn name(&self) -> &str {
        "FilterIntoJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        // Match: Filter(Join(A, B))
        Pattern::on_top_of(OpKind::Filter, Pattern::join())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Filter { predicate } = node.op() else {
            return Ok(vec![]);
        };
        let join = node.input(0);
        let Operator::Join {
            join_type,
            condition,
            ..
        } = join.op()
        else {
            return Ok(vec![]);
        };
        let (left, right) = (join.input(0), join.input(1));
        let left_width = left.row_type().len();

        // Which inputs may receive predicates from above, and whether spanning
        // predicates may join the condition.
        let (to_left, to_right, into_condition) = match join_type {
            JoinType::Inner | JoinType::Cross => (true, true, true),
            JoinType::Left => (true, false, false),
            JoinType::Right => (false, true, false),
            JoinType::Semi | JoinType::Anti => (true, false, false),
            JoinType::Full => return Ok(vec![]),
        };

        let split = split_for_join(predicate.owned_conjuncts(), left_width, to_left, to_right);
        let (mut merged, above): (Vec<Expr>, Vec<Expr>) = if into_condition {
            (split.rest, vec![])
        } else {
            (vec![], split.rest)
        };
        if split.left.is_empty() && split.right.is_empty() && merged.is_empty() {
            return Ok(vec![]);
        }

        let new_left = filter_if_any(left.clone(), split.left)?;
        let new_right = filter_if_any(right.clone(), split.right)?;

        let mut conjuncts = condition.owned_conjuncts();
        conjuncts.append(&mut merged);
        let new_type = match join_type {
            JoinType::Cross if !conjuncts.is_empty() => JoinType::Inner,
            other => *other,
        };
        let new_join = RelNode::logical(
            Operator::Join {
                join_type: new_type,
                condition: Expr::conjunction_or_true(conjuncts),
                algorithm: JoinAlgorithm::Unspecified,
            },
            vec![new_left, new_right],
        )?;
        Ok(vec![filter_if_any(new_join, above)?])
    }
}

/// Push single-input conjuncts of a join condition into Filters on the inputs.
pub struct JoinConditionPush;

impl Rule for JoinConditionPush {
    fn name(&self) -> &str {
        "JoinConditionPush"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Join {
            join_type,
            condition,
            algorithm,
        } = node.op()
        else {
            return Ok(vec![]);
        };
        let (to_left, to_right) = match join_type {
            JoinType::Inner | JoinType::Cross | JoinType::Semi => (true, true),
            JoinType::Left | JoinType::Anti => (false, true),
            JoinType::Right => (true, false),
            JoinType::Full => return Ok(vec![]),
        };
        let left_width = node.input(0).row_type().len();
        let split = split_for_join(condition.owned_conjuncts(), left_width, to_left, to_right);
        if split.left.is_empty() && split.right.is_empty() {
            return Ok(vec![]);
        }

        let new_left = filter_if_any(node.input(0).clone(), split.left)?;
        let new_right = filter_if_any(node.input(1).clone(), split.right)?;
        let new_join = RelNode::logical(
            Operator::Join {
                join_type: *join_type,
                condition: Expr::conjunction_or_true(split.rest),
                algorithm: *algorithm,
            },
            vec![new_left, new_right],
        )?;
        Ok(vec![new_join])
    }
}
