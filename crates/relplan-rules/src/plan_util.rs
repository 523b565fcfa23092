//! Helpers shared by the rewrite rules: conjunct classification, projection
//! shapes and small node builders.

use relplan_core::error::Result;
use relplan_core::expr::Expr;
use relplan_core::node::{Operator, RelNode};
use relplan_core::types::RowType;
use std::sync::Arc;

/// Which join input a conjunct references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// No column references at all.
    Neither,
    Left,
    Right,
    Both,
}

/// Classify `expr` against a join whose left input is `left_width` wide.
pub fn side_of(expr: &Expr, left_width: usize) -> Side {
    let cols = expr.column_indexes();
    let (Some(&min), Some(&max)) = (cols.first(), cols.last()) else {
        return Side::Neither;
    };
    if max < left_width {
        Side::Left
    } else if min >= left_width {
        Side::Right
    } else {
        Side::Both
    }
}

/// Conjuncts split by the join input they reference. Right conjuncts are
/// shifted to the right input's positions.
#[derive(Debug, Default)]
pub struct SplitConjuncts {
    pub left: Vec<Expr>,
    pub right: Vec<Expr>,
    pub rest: Vec<Expr>,
}

/// Split `conjuncts` for pushing into join inputs. `to_left`/`to_right` say
/// whether each side may receive predicates; everything else lands in `rest`.
pub fn split_for_join(
    conjuncts: Vec<Expr>,
    left_width: usize,
    to_left: bool,
    to_right: bool,
) -> SplitConjuncts {
    let mut split = SplitConjuncts::default();
    for c in conjuncts {
        match side_of(&c, left_width) {
            Side::Left if to_left => split.left.push(c),
            Side::Right if to_right => split.right.push(c.shift(-(left_width as isize))),
            _ => split.rest.push(c),
        }
    }
    split
}

/// Wrap `input` in a filter over the conjunction, or return it unchanged when
/// there is nothing to filter.
pub fn filter_if_any(input: Arc<RelNode>, conjuncts: Vec<Expr>) -> Result<Arc<RelNode>> {
    match Expr::conjunction(conjuncts) {
        Some(predicate) => RelNode::filter(input, predicate),
        None => Ok(input),
    }
}

/// Input positions if every expression is a bare column reference.
pub fn as_columns(exprs: &[Expr]) -> Option<Vec<usize>> {
    exprs.iter().map(|e| e.as_column()).collect()
}

/// A projection that only drops columns: every expression is a bare column
/// reference, and there are fewer of them than input columns.
pub fn is_narrowing(exprs: &[Expr], input_width: usize) -> bool {
    as_columns(exprs).is_some() && exprs.len() < input_width
}

/// A projection that reproduces its input exactly, names included.
pub fn is_identity(exprs: &[Expr], aliases: &[String], input: &RowType) -> bool {
    exprs.len() == input.len()
        && exprs
            .iter()
            .zip(aliases)
            .zip(input.fields())
            .enumerate()
            .all(|(i, ((e, a), f))| e.as_column() == Some(i) && *a == f.name)
}

/// Expressions and aliases of the identity projection over `row_type`.
pub fn identity_projection(row_type: &RowType) -> (Vec<Expr>, Vec<String>) {
    row_type
        .fields()
        .iter()
        .enumerate()
        .map(|(i, f)| (Expr::column(i, f.name.clone()), f.name.clone()))
        .unzip()
}

/// Project `input` onto `columns`, naming the outputs `names`.
pub fn project_named(input: Arc<RelNode>, columns: &[usize], names: Vec<String>) -> Result<Arc<RelNode>> {
    let exprs = columns
        .iter()
        .zip(&names)
        .map(|(&c, n)| Expr::column(c, n.clone()))
        .collect();
    RelNode::project(input, exprs, names)
}

/// Whether every input of a set operation has exactly the set operation's
/// column types, so a predicate or projection typed against the output also
/// types against each input.
pub fn inputs_typed_like(node: &RelNode) -> bool {
    let out = node.row_type().fields();
    node.inputs().iter().all(|i| {
        i.row_type()
            .fields()
            .iter()
            .zip(out)
            .all(|(a, b)| a.data_type == b.data_type)
    })
}

/// Whether `op` is one of the set operations.
pub fn is_set_op(op: &Operator) -> bool {
    matches!(
        op,
        Operator::Union { .. } | Operator::Minus { .. } | Operator::Intersect { .. }
    )
}

/// Empty relation with `node`'s row type.
pub fn empty_like(node: &RelNode) -> Result<Arc<RelNode>> {
    RelNode::empty(node.row_type().clone())
}
