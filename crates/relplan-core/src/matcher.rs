//! Post-order matching of rule sets against trees.
//!
//! A position is the path of input indexes from the root to a node; the root is
//! `[]` and its second input is `[1]`. Matching is a pure function of the tree:
//! it never calls `apply` and never allocates nodes.

use crate::node::RelNode;
use crate::rule::{RuleRef, RuleSet};
use std::sync::Arc;

/// Path of input indexes from the root.
pub type Position = Vec<usize>;

/// One `(position, rule)` pair whose pattern matches the node at `position`.
#[derive(Clone)]
pub struct Match<'r> {
    pub position: Position,
    pub rule: &'r RuleRef,
}

impl std::fmt::Debug for Match<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:?}", self.rule.name(), self.position)
    }
}

/// Rules of `rules` matching `node`, in registration order.
pub fn matching_rules<'r>(node: &RelNode, rules: &'r RuleSet) -> Vec<&'r RuleRef> {
    rules
        .candidates(node.kind())
        .filter(|r| r.matches(node))
        .collect()
}

/// Every match in the tree, children before parents and, per node, rules in
/// registration order.
pub fn find_matches<'r>(root: &Arc<RelNode>, rules: &'r RuleSet) -> Vec<Match<'r>> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    collect(root, rules, &mut path, &mut out);
    out
}

fn collect<'r>(node: &RelNode, rules: &'r RuleSet, path: &mut Position, out: &mut Vec<Match<'r>>) {
    for (i, input) in node.inputs().iter().enumerate() {
        path.push(i);
        collect(input, rules, path, out);
        path.pop();
    }
    for rule in matching_rules(node, rules) {
        out.push(Match {
            position: path.clone(),
            rule,
        });
    }
}

/// Positions of every node, children before parents.
pub fn post_order(root: &RelNode) -> Vec<Position> {
    fn walk(node: &RelNode, path: &mut Position, out: &mut Vec<Position>) {
        for (i, input) in node.inputs().iter().enumerate() {
            path.push(i);
            walk(input, path, out);
            path.pop();
        }
        out.push(path.clone());
    }
    let mut out = Vec::new();
    walk(root, &mut Vec::new(), &mut out);
    out
}
