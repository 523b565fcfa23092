//! # JoinPushExpressions
//!
//! An equality between a computed expression on one input and anything on the
//! other cannot be used as a hash key as written. The rule computes such operands
//! in a Project on the input they reference, compares plain columns in the join,
//! and restores the original output with a Project on top.
//!
//! ```text
//! Before: Join(L, R, l.a + 1 = r.b)
//! After:  Project(l.*, r.*,
//!           Join(Project(l.*, $f = a + 1, L), R, $f = r.b))
//! ```

use crate::plan_util::{side_of, Side};
use relplan_core::error::Result;
use relplan_core::expr::{BinaryOp, Expr};
use relplan_core::node::{Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

pub struct JoinPushExpressions;

/// Expressions computed on top of one input, appended after its columns.
struct Pushed {
    width: usize,
    exprs: Vec<Expr>,
}

impl Pushed {
    fn new(width: usize) -> Self {
        Pushed {
            width,
            exprs: Vec::new(),
        }
    }

    /// Column of the widened input that holds `expr`. Bare columns stay where
    /// they are.
    fn column_for(&mut self, expr: &Expr, input: &RelNode) -> Expr {
        if let Some(i) = expr.as_column() {
            return Expr::column(i, input.row_type().fields()[i].name.clone());
        }
        let at = match self.exprs.iter().position(|e| e == expr) {
            Some(at) => at,
            None => {
                self.exprs.push(expr.clone());
                self.exprs.len() - 1
            }
        };
        let position = self.width + at;
        Expr::column(position, format!("$f{position}"))
    }

    fn widen(self, input: &Arc<RelNode>) -> Result<Arc<RelNode>> {
        if self.exprs.is_empty() {
            return Ok(input.clone());
        }
        let mut exprs = Vec::with_capacity(self.width + self.exprs.len());
        let mut aliases = Vec::with_capacity(self.width + self.exprs.len());
        for (i, field) in input.row_type().fields().iter().enumerate() {
            exprs.push(Expr::column(i, field.name.clone()));
            aliases.push(field.name.clone());
        }
        for (i, e) in self.exprs.into_iter().enumerate() {
            exprs.push(e);
            aliases.push(format!("$f{}", self.width + i));
        }
        RelNode::project(input.clone(), exprs, aliases)
    }
}

/// A conjunct of the rewritten condition.
enum Conjunct {
    /// Kept as is, over the original inputs.
    Kept(Expr),
    /// Equality of a left column and a right column, each over its own
    /// widened input.
    Columns(Expr, Expr),
}

impl Rule for JoinPushExpressions {
    fn name(&self) -> &str {
        "JoinPushExpressions"
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
        let (left, right) = (node.input(0), node.input(1));
        let left_width = left.row_type().len();
        let right_width = right.row_type().len();

        let mut left_pushed = Pushed::new(left_width);
        let mut right_pushed = Pushed::new(right_width);
        let mut conjuncts = Vec::new();
        for conjunct in condition.owned_conjuncts() {
            match pushable_operands(&conjunct, left_width) {
                Some((l, r)) => {
                    let l = left_pushed.column_for(l, left);
                    let r = right_pushed.column_for(&r.shift(-(left_width as isize)), right);
                    conjuncts.push(Conjunct::Columns(l, r));
                }
                None => conjuncts.push(Conjunct::Kept(conjunct)),
            }
        }
        if left_pushed.exprs.is_empty() && right_pushed.exprs.is_empty() {
            return Ok(vec![]);
        }

        // Right references move past the columns added to the left input.
        let new_left_width = left_width + left_pushed.exprs.len();
        let shift_right = |e: &Expr| {
            e.map_columns(&mut |c| {
                let index = if c.index >= left_width {
                    c.index - left_width + new_left_width
                } else {
                    c.index
                };
                Expr::column(index, c.name.clone())
            })
        };
        let condition = Expr::conjunction_or_true(
            conjuncts
                .into_iter()
                .map(|c| match c {
                    Conjunct::Kept(e) => shift_right(&e),
                    Conjunct::Columns(l, r) => {
                        Expr::equals(l, r.shift(new_left_width as isize))
                    }
                })
                .collect(),
        );

        let join = RelNode::logical(
            Operator::Join {
                join_type: *join_type,
                condition,
                algorithm: *algorithm,
            },
            vec![left_pushed.widen(left)?, right_pushed.widen(right)?],
        )?;

        let mut columns: Vec<usize> = (0..left_width).collect();
        if join_type.projects_right() {
            columns.extend((0..right_width).map(|j| new_left_width + j));
        }
        let names: Vec<String> = node.row_type().names().map(str::to_string).collect();
        let exprs = columns
            .iter()
            .zip(&names)
            .map(|(&c, n)| Expr::column(c, n.clone()))
            .collect();
        Ok(vec![RelNode::project(join, exprs, names)?])
    }
}

/// `(left operand, right operand)` of an equality with one operand per input,
/// at least one of them computed.
fn pushable_operands(conjunct: &Expr, left_width: usize) -> Option<(&Expr, &Expr)> {
    let Expr::BinaryOp {
        op: BinaryOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    let (l, r) = match (side_of(left, left_width), side_of(right, left_width)) {
        (Side::Left, Side::Right) => (left.as_ref(), right.as_ref()),
        (Side::Right, Side::Left) => (right.as_ref(), left.as_ref()),
        _ => return None,
    };
    if l.as_column().is_some() && r.as_column().is_some() {
        return None;
    }
    Some((l, r))
}
