//! Tree builders for rule tests.

use relplan_core::cost::DefaultCostModel;
use relplan_core::expr::{BinaryOp, Expr, JoinType, ScalarValue};
use relplan_core::node::{Backend, Convention, Operator, RelNode, TableRef};
use relplan_core::rule::{Rule, RuleContext};
use relplan_core::types::{DataType, Field, RowType};
use std::sync::{Arc, OnceLock};

pub fn ctx() -> RuleContext<'static> {
    static COST_MODEL: OnceLock<DefaultCostModel> = OnceLock::new();
    RuleContext {
        target: Convention::Physical(Backend::Stream),
        cost_model: COST_MODEL.get_or_init(DefaultCostModel::default),
    }
}

pub fn int_row_type(cols: &[&str]) -> RowType {
    cols.iter()
        .map(|c| Field::required(*c, DataType::Int64))
        .collect()
}

/// Table `s.<name>` with non-nullable BIGINT columns.
pub fn scan(name: &str, cols: &[&str]) -> Arc<RelNode> {
    RelNode::table_scan(TableRef::new("s", name), int_row_type(cols)).unwrap()
}

/// Table with a unique key.
pub fn keyed_scan(name: &str, cols: &[&str], key: &[usize]) -> Arc<RelNode> {
    RelNode::logical(
        Operator::TableScan {
            table: TableRef::new("s", name),
            row_type: int_row_type(cols),
            unique_keys: vec![key.to_vec()],
        },
        vec![],
    )
    .unwrap()
}

pub fn col(index: usize, name: &str) -> Expr {
    Expr::column(index, name)
}

pub fn int(v: i64) -> Expr {
    Expr::literal(ScalarValue::Int64(v))
}

pub fn gt(e: Expr, v: i64) -> Expr {
    Expr::binary(BinaryOp::Gt, e, int(v))
}

/// Join on the first column of each input.
pub fn join(left: Arc<RelNode>, right: Arc<RelNode>, join_type: JoinType) -> Arc<RelNode> {
    let width = left.row_type().len();
    let l = left.row_type().fields()[0].name.clone();
    let r = right.row_type().fields()[0].name.clone();
    let cond = Expr::equals(col(0, &l), col(width, &r));
    RelNode::join(left, right, join_type, cond).unwrap()
}

pub fn empty(cols: &[&str]) -> Arc<RelNode> {
    RelNode::empty(int_row_type(cols)).unwrap()
}

/// Apply a rule that must match and produce exactly one candidate.
pub fn apply_one(rule: &dyn Rule, node: &Arc<RelNode>) -> Arc<RelNode> {
    assert!(rule.matches(node), "{} does not match {}", rule.name(), node.kind());
    let mut out = rule.apply(node, &ctx()).unwrap();
    assert_eq!(out.len(), 1, "{} produced {} candidates", rule.name(), out.len());
    let candidate = out.remove(0);
    assert_eq!(candidate.row_type(), node.row_type(), "{} changed the row type", rule.name());
    candidate
}

/// Whether the rule declines (does not match, or matches and returns nothing).
pub fn declines(rule: &dyn Rule, node: &Arc<RelNode>) -> bool {
    !rule.matches(node) || rule.apply(node, &ctx()).unwrap().is_empty()
}
