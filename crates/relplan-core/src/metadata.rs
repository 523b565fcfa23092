//! # Relational Metadata
//!
//! Facts derived from a subtree's shape that rules consult before rewriting:
//!
//! - **Known-empty**: the subtree provably returns no rows. The root of that
//!   knowledge is `Values` with zero tuples; pruning rules turn operators over such
//!   inputs into empty `Values` themselves, so emptiness propagates upward.
//! - **Unique keys**: column sets on which the output has no duplicate rows. An
//!   empty key set means the output has at most one row.
//!
//! Derivation is structural and conservative. "Unknown" is always reported as
//! "not empty" and "no keys".

use crate::expr::{BinaryOp, Expr, JoinType};
use crate::node::{Operator, RelNode};
use std::collections::BTreeSet;

pub type KeySet = BTreeSet<usize>;

/// Whether `node` is known to produce no rows.
pub fn is_empty(node: &RelNode) -> bool {
    match node.op() {
        Operator::Values { tuples, .. } => tuples.is_empty(),
        Operator::TableScan { .. } => false,
        Operator::Filter { predicate } => predicate.is_never_true() || is_empty(node.input(0)),
        Operator::Calc { condition, .. } => {
            condition.as_ref().is_some_and(|c| c.is_never_true()) || is_empty(node.input(0))
        }
        Operator::Sort { fetch: Some(0), .. } => true,
        Operator::Project { .. }
        | Operator::Sort { .. }
        | Operator::Uncollect { .. }
        | Operator::Unnest { .. }
        | Operator::EnumerableConverter { .. } => is_empty(node.input(0)),
        Operator::Join { join_type, .. } => {
            let (l, r) = (is_empty(node.input(0)), is_empty(node.input(1)));
            match join_type {
                JoinType::Inner | JoinType::Cross | JoinType::Semi => l || r,
                JoinType::Left | JoinType::Anti => l,
                JoinType::Right => r,
                JoinType::Full => l && r,
            }
        }
        // A global aggregate returns one row even over empty input.
        Operator::Aggregate { group_keys, .. } => {
            !group_keys.is_empty() && is_empty(node.input(0))
        }
        Operator::Union { .. } => node.inputs().iter().all(|i| is_empty(i)),
        Operator::Minus { .. } => is_empty(node.input(0)),
        Operator::Intersect { .. } => node.inputs().iter().any(|i| is_empty(i)),
    }
}

/// Column sets on which `node`'s output is unique.
pub fn unique_keys(node: &RelNode) -> Vec<KeySet> {
    let all_columns = || -> KeySet { (0..node.row_type().len()).collect() };
    match node.op() {
        Operator::TableScan { unique_keys, .. } => unique_keys
            .iter()
            .map(|k| k.iter().copied().collect())
            .collect(),
        Operator::Values { tuples, .. } => {
            if tuples.len() <= 1 {
                vec![KeySet::new()]
            } else {
                let distinct: std::collections::HashSet<_> = tuples.iter().collect();
                if distinct.len() == tuples.len() {
                    vec![all_columns()]
                } else {
                    vec![]
                }
            }
        }
        Operator::Aggregate { group_keys, .. } => vec![(0..group_keys.len()).collect()],
        Operator::Filter { .. } | Operator::Sort { .. } | Operator::EnumerableConverter { .. } => {
            unique_keys(node.input(0))
        }
        Operator::Project { exprs, .. } => project_keys(node, exprs),
        Operator::Calc { projects, .. } => project_keys(node, projects),
        Operator::Join {
            join_type,
            condition,
            ..
        } => join_keys(node, *join_type, condition),
        Operator::Union { all: false } | Operator::Intersect { all: false } => vec![all_columns()],
        Operator::Minus { all } => {
            let mut keys = unique_keys(node.input(0));
            if !all {
                keys.push(all_columns());
            }
            keys
        }
        Operator::Union { all: true }
        | Operator::Intersect { all: true }
        | Operator::Uncollect { .. }
        | Operator::Unnest { .. } => vec![],
    }
}

/// Whether `node` has no two rows that agree on every column in `columns`.
pub fn is_distinct_on(node: &RelNode, columns: &KeySet) -> bool {
    unique_keys(node).iter().any(|k| k.is_subset(columns))
}

/// Keys of a projection's input that survive as bare column references,
/// renumbered to output positions.
fn project_keys(node: &RelNode, exprs: &[Expr]) -> Vec<KeySet> {
    let mut mapping = vec![None; node.input(0).row_type().len()];
    for (out, e) in exprs.iter().enumerate() {
        if let Some(i) = e.as_column() {
            if mapping[i].is_none() {
                mapping[i] = Some(out);
            }
        }
    }
    unique_keys(node.input(0))
        .into_iter()
        .filter_map(|key| key.iter().map(|&c| mapping[c]).collect::<Option<KeySet>>())
        .collect()
}

fn join_keys(node: &RelNode, join_type: JoinType, condition: &Expr) -> Vec<KeySet> {
    let left = node.input(0);
    let right = node.input(1);
    let left_keys = unique_keys(left);
    match join_type {
        JoinType::Semi | JoinType::Anti => left_keys,
        JoinType::Inner => {
            let width = left.row_type().len();
            let (pairs, _) = equi_join_keys(condition, width);
            let left_cols: KeySet = pairs.iter().map(|(l, _)| *l).collect();
            let right_cols: KeySet = pairs.iter().map(|(_, r)| *r).collect();
            let mut keys = Vec::new();
            // Each left row meets at most one right row: left keys survive.
            if is_distinct_on(right, &right_cols) {
                keys.extend(left_keys);
            }
            if is_distinct_on(left, &left_cols) {
                keys.extend(
                    unique_keys(right)
                        .into_iter()
                        .map(|k| k.into_iter().map(|c| c + width).collect()),
                );
            }
            keys
        }
        _ => vec![],
    }
}

/// Split a join condition into `left = right` column pairs and the remaining
/// conjuncts. Right positions are relative to the right input.
pub fn equi_join_keys(condition: &Expr, left_width: usize) -> (Vec<(usize, usize)>, Vec<Expr>) {
    let mut pairs = Vec::new();
    let mut rest = Vec::new();
    for conjunct in condition.owned_conjuncts() {
        if let Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } = &conjunct
        {
            if let (Some(a), Some(b)) = (left.as_column(), right.as_column()) {
                if a < left_width && b >= left_width {
                    pairs.push((a, b - left_width));
                    continue;
                }
                if b < left_width && a >= left_width {
                    pairs.push((b, a - left_width));
                    continue;
                }
            }
        }
        rest.push(conjunct);
    }
    (pairs, rest)
}
