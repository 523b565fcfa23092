//! Root adaptation from the stream backend to the enumerable convention.

use relplan_core::error::Result;
use relplan_core::node::{Backend, Convention, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

/// Wraps a stream plan in an `EnumerableConverter` so its rows can be pulled
/// one at a time by a caller outside the stream runtime.
pub struct EnumerableConverterRule;

impl Rule for EnumerableConverterRule {
    fn name(&self) -> &str {
        "EnumerableConverter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Conversion
    }

    fn pattern(&self) -> Pattern {
        Pattern::physical(Backend::Stream)
    }

    fn apply(&self, node: &Arc<RelNode>, ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let enumerable = Convention::Physical(Backend::Enumerable);
        if ctx.target != enumerable {
            return Ok(vec![]);
        }
        tracing::debug!(root = %node.kind(), "adapting stream root to enumerable");
        Ok(vec![RelNode::new(
            Operator::EnumerableConverter {
                from: Backend::Stream,
            },
            vec![node.clone()],
            enumerable,
        )?])
    }
}
