//! # Stream Converters
//!
//! Conversion rules that produce the stream backend's counterpart of a logical
//! node whose inputs are already in the stream convention. Most operators have a
//! single physical form and convert by re-tagging; joins produce one candidate
//! per algorithm and leave the choice to the cost model.
//!
//! The stream backend has no Filter or Project: the calc program folds them into
//! Calc before conversion, and a plan that still carries one fails to convert.
//!
//! Every converter declines unless the planner targets the stream convention.

use relplan_core::error::Result;
use relplan_core::metadata::equi_join_keys;
use relplan_core::node::{Backend, BuildSide, Convention, JoinAlgorithm, OpKind, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleRef, RuleType};
use std::sync::Arc;

const STREAM: Convention = Convention::Physical(Backend::Stream);

/// Converter for an operator with one physical form in the stream backend.
pub struct StreamConverter {
    name: String,
    kind: OpKind,
}

impl StreamConverter {
    pub fn new(kind: OpKind) -> Self {
        Self {
            name: format!("Stream{kind}"),
            kind,
        }
    }
}

impl Rule for StreamConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Conversion
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical_variadic(self.kind)
    }

    fn apply(&self, node: &Arc<RelNode>, ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        if ctx.target != STREAM {
            return Ok(vec![]);
        }
        Ok(vec![node.with_convention(STREAM)?])
    }
}

pub fn stream_calc() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Calc))
}

pub fn stream_aggregate() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Aggregate))
}

pub fn stream_sort() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Sort))
}

pub fn stream_values() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Values))
}

pub fn stream_intersect() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Intersect))
}

pub fn stream_minus() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Minus))
}

pub fn stream_union() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Union))
}

pub fn stream_uncollect() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Uncollect))
}

pub fn stream_unnest() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::Unnest))
}

pub fn stream_table_scan() -> RuleRef {
    Arc::new(StreamConverter::new(OpKind::TableScan))
}

/// Join converter. Equi-joins get a hash join per build side and a nested
/// loop; any other condition only a nested loop.
pub struct StreamJoin;

impl Rule for StreamJoin {
    fn name(&self) -> &str {
        "StreamJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Conversion
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical_variadic(OpKind::Join)
    }

    fn apply(&self, node: &Arc<RelNode>, ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        if ctx.target != STREAM {
            return Ok(vec![]);
        }
        let Operator::Join {
            join_type,
            condition,
            ..
        } = node.op()
        else {
            return Ok(vec![]);
        };
        let (pairs, _) = equi_join_keys(condition, node.input(0).row_type().len());
        let algorithms = if pairs.is_empty() {
            vec![JoinAlgorithm::NestedLoop]
        } else {
            vec![
                JoinAlgorithm::Hash {
                    build: BuildSide::Right,
                },
                JoinAlgorithm::Hash {
                    build: BuildSide::Left,
                },
                JoinAlgorithm::NestedLoop,
            ]
        };
        algorithms
            .into_iter()
            .map(|algorithm| {
                RelNode::new(
                    Operator::Join {
                        join_type: *join_type,
                        condition: condition.clone(),
                        algorithm,
                    },
                    node.inputs().to_vec(),
                    STREAM,
                )
            })
            .collect()
    }
}
