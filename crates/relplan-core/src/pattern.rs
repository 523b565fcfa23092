//! # Declarative Pattern Matching for Rewrite Rules
//!
//! Each rule declares a `Pattern` that describes the shape of subtrees it can
//! rewrite. The matcher checks the pattern before calling `apply()`, so rules
//! only see nodes of the shape they expect and can destructure them directly.
//!
//! ## Pattern Language
//!
//! - `Pattern::Operator(matcher, children)`: matches a node whose operator kind and
//!   convention satisfy `matcher` and whose inputs match the child patterns one for
//!   one. The input count must equal the number of child patterns.
//!
//! - `Pattern::Variadic(matcher)`: matches a node satisfying `matcher` with any
//!   number of inputs. Used for set operations and for conversion rules, which
//!   only care about the root.
//!
//! - `Pattern::Any`: matches any subtree.
//!
//! - `Pattern::Leaf`: matches only nodes without inputs (TableScan, Values).
//!
//! ## Conventions
//!
//! Every operator matcher names the convention the node must carry. Logical
//! rewrite rules therefore never see a physical node, and root adapters never see
//! a logical one.

use crate::node::{Backend, Convention, OpKind, RelNode};

/// Pattern for matching subtrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Match an operator with child patterns.
    Operator(OpMatcher, Vec<Pattern>),
    /// Match an operator regardless of its inputs.
    Variadic(OpMatcher),
    /// Match any subtree.
    Any,
    /// Match a leaf node (no inputs).
    Leaf,
}

/// Matcher for a single node's kind and convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMatcher {
    Kind(OpKind, Convention),
    AnyKind(Convention),
}

impl OpMatcher {
    pub fn matches(&self, node: &RelNode) -> bool {
        match self {
            OpMatcher::Kind(kind, convention) => {
                node.kind() == *kind && node.convention() == *convention
            }
            OpMatcher::AnyKind(convention) => node.convention() == *convention,
        }
    }
}

impl Pattern {
    /// Logical node of `kind` with the given child patterns.
    pub fn logical(kind: OpKind, children: Vec<Pattern>) -> Self {
        Pattern::Operator(OpMatcher::Kind(kind, Convention::Logical), children)
    }

    /// Logical node of `kind` over a single unconstrained input.
    pub fn unary(kind: OpKind) -> Self {
        Pattern::logical(kind, vec![Pattern::Any])
    }

    /// Logical node of `kind` with any inputs.
    pub fn logical_variadic(kind: OpKind) -> Self {
        Pattern::Variadic(OpMatcher::Kind(kind, Convention::Logical))
    }

    /// Any node in the given physical backend.
    pub fn physical(backend: Backend) -> Self {
        Pattern::Variadic(OpMatcher::AnyKind(Convention::Physical(backend)))
    }

    /// Match a logical filter with one child.
    pub fn filter() -> Self {
        Pattern::unary(OpKind::Filter)
    }

    /// Match a logical project with one child.
    pub fn project() -> Self {
        Pattern::unary(OpKind::Project)
    }

    pub fn aggregate() -> Self {
        Pattern::unary(OpKind::Aggregate)
    }

    pub fn sort() -> Self {
        Pattern::unary(OpKind::Sort)
    }

    pub fn calc() -> Self {
        Pattern::unary(OpKind::Calc)
    }

    /// Match a logical join with two any-children.
    pub fn join() -> Self {
        Pattern::logical(OpKind::Join, vec![Pattern::Any, Pattern::Any])
    }

    /// Match a logical `parent` directly on top of a logical `child`.
    pub fn on_top_of(parent: OpKind, child: Pattern) -> Self {
        Pattern::logical(parent, vec![child])
    }

    /// Root operator kind, if the pattern pins one. Wildcard roots return `None`
    /// and are tried against every node.
    pub fn root_kind(&self) -> Option<OpKind> {
        match self {
            Pattern::Operator(OpMatcher::Kind(kind, _), _)
            | Pattern::Variadic(OpMatcher::Kind(kind, _)) => Some(*kind),
            _ => None,
        }
    }
}

/// Check if a node matches a pattern.
pub fn matches(node: &RelNode, pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Any => true,
        Pattern::Leaf => node.is_leaf(),
        Pattern::Variadic(matcher) => matcher.matches(node),
        Pattern::Operator(matcher, child_patterns) => {
            if !matcher.matches(node) || node.inputs().len() != child_patterns.len() {
                return false;
            }
            node.inputs()
                .iter()
                .zip(child_patterns)
                .all(|(child, p)| matches(child, p))
        }
    }
}
