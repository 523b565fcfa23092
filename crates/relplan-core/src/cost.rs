//! # Cost Model
//!
//! This module defines the cost abstraction the planner uses to choose between the
//! candidates of one equivalence class.
//!
//! ## Multi-Dimensional Cost Model
//!
//! The `DefaultCostModel` weighs three dimensions and collapses them into a single
//! comparable `Cost` value:
//!
//! ```text
//! total_cost = cpu_weight * cpu_cost + memory_weight * memory_cost + network_weight * network_cost
//! ```
//!
//! Row counts are heuristic: tables default to a fixed cardinality (overridable per
//! table), filters keep a constant fraction of their input and grouping shrinks it.
//! There are no statistics behind these numbers; they only need to rank
//! alternatives such as the build side of a hash join.
//!
//! ## Cost Accumulation
//!
//! Costs are **additive**: the cost of a subtree is its root's local cost plus the
//! accumulated costs of its inputs. The planner finalizes children before costing
//! a parent, so the cost of a candidate is always computed over already-chosen
//! inputs.

use crate::expr::JoinType;
use crate::node::{BuildSide, JoinAlgorithm, Operator, RelNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fraction of rows a filter or Calc condition is assumed to keep.
pub const DEFAULT_SELECTIVITY: f64 = 0.5;

/// Rows assumed per array element expansion in Uncollect/Unnest.
const EXPANSION_FACTOR: f64 = 10.0;

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// The total weighted cost. Lower is better.
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

/// Trait for pluggable cost models.
pub trait CostModel: Send + Sync {
    /// Estimated output rows of `node`.
    fn estimate_rows(&self, node: &RelNode) -> f64;

    /// Cost of running `node` alone, given the estimated rows of its inputs.
    fn local_cost(&self, node: &RelNode, input_rows: &[f64]) -> Cost;

    /// Cost of the whole subtree rooted at `node`.
    fn cost(&self, node: &RelNode) -> Cost {
        let input_rows: Vec<f64> = node.inputs().iter().map(|i| self.estimate_rows(i)).collect();
        let children: f64 = node.inputs().iter().map(|i| self.cost(i).total).sum();
        Cost::new(children + self.local_cost(node, &input_rows).total)
    }
}

/// Default heuristic cost model.
///
/// The default weights make network 10x more expensive than CPU or memory; the
/// only operator that moves rows off the pipeline is the enumerable adapter at
/// the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultCostModel {
    /// Weight for CPU-bound operations (row processing, comparisons).
    pub cpu_weight: f64,
    /// Weight for memory-bound operations (hash tables, sort buffers).
    pub memory_weight: f64,
    /// Weight for rows handed across a backend boundary.
    pub network_weight: f64,
    /// Cardinality assumed for a table without an override.
    pub default_table_rows: f64,
    /// Per-table cardinality overrides keyed by `schema.name`.
    #[serde(default)]
    pub table_rows: BTreeMap<String, f64>,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            cpu_weight: 1.0,
            memory_weight: 1.0,
            network_weight: 10.0,
            default_table_rows: 1000.0,
            table_rows: BTreeMap::new(),
        }
    }
}

impl DefaultCostModel {
    pub fn with_table_rows(mut self, table: impl Into<String>, rows: f64) -> Self {
        self.table_rows.insert(table.into(), rows);
        self
    }
}

impl CostModel for DefaultCostModel {
    fn estimate_rows(&self, node: &RelNode) -> f64 {
        let input = |i: usize| self.estimate_rows(node.input(i));
        let rows = match node.op() {
            Operator::TableScan { table, .. } => self
                .table_rows
                .get(&table.to_string())
                .copied()
                .unwrap_or(self.default_table_rows),
            Operator::Values { tuples, .. } => tuples.len() as f64,
            Operator::Filter { .. } => input(0) * DEFAULT_SELECTIVITY,
            Operator::Calc { condition, .. } => match condition {
                Some(_) => input(0) * DEFAULT_SELECTIVITY,
                None => input(0),
            },
            Operator::Project { .. } | Operator::EnumerableConverter { .. } => input(0),
            Operator::Join { join_type, condition, .. } => {
                let (l, r) = (input(0), input(1));
                match join_type {
                    JoinType::Semi | JoinType::Anti => l * DEFAULT_SELECTIVITY,
                    _ if condition.is_true() => l * r,
                    JoinType::Inner => l.max(r),
                    JoinType::Left => l,
                    JoinType::Right => r,
                    JoinType::Full => l + r,
                    JoinType::Cross => l * r,
                }
            }
            Operator::Aggregate { group_keys, .. } => {
                if group_keys.is_empty() {
                    1.0
                } else {
                    (input(0) * 0.1).max(1.0)
                }
            }
            Operator::Sort { offset, fetch, .. } => {
                let rows = (input(0) - offset.unwrap_or(0) as f64).max(0.0);
                match fetch {
                    Some(n) => rows.min(*n as f64),
                    None => rows,
                }
            }
            Operator::Union { .. } => (0..node.inputs().len()).map(input).sum(),
            Operator::Minus { .. } => input(0),
            Operator::Intersect { .. } => (0..node.inputs().len())
                .map(input)
                .fold(f64::MAX, f64::min),
            Operator::Uncollect { .. } | Operator::Unnest { .. } => input(0) * EXPANSION_FACTOR,
        };
        rows.max(0.0)
    }

    fn local_cost(&self, node: &RelNode, input_rows: &[f64]) -> Cost {
        let first = input_rows.first().copied().unwrap_or(0.0);
        let cost = match node.op() {
            Operator::TableScan { .. } | Operator::Values { .. } => {
                self.cpu_weight * self.estimate_rows(node)
            }
            Operator::Filter { .. }
            | Operator::Project { .. }
            | Operator::Calc { .. }
            | Operator::Uncollect { .. }
            | Operator::Unnest { .. } => self.cpu_weight * first,
            // HashJoin: CPU for hashing the build side and probing with the other,
            // memory for the hash table. Building on the smaller side wins.
            // NestedLoop: O(n * m) comparisons, buffering the right input.
            Operator::Join { algorithm, .. } => {
                let (l, r) = (first, input_rows.get(1).copied().unwrap_or(0.0));
                match algorithm {
                    JoinAlgorithm::Hash { build } => {
                        let build_rows = match build {
                            BuildSide::Left => l,
                            BuildSide::Right => r,
                        };
                        self.cpu_weight * (l + r) + self.memory_weight * build_rows
                    }
                    JoinAlgorithm::NestedLoop | JoinAlgorithm::Unspecified => {
                        self.cpu_weight * l * r + self.memory_weight * r
                    }
                }
            }
            Operator::Aggregate { .. } => {
                self.cpu_weight * first + self.memory_weight * self.estimate_rows(node)
            }
            // Sort: O(n log n) comparisons plus a buffer of the whole input.
            Operator::Sort { .. } => {
                let n_log_n = if first > 1.0 { first * first.log2() } else { 1.0 };
                self.cpu_weight * n_log_n + self.memory_weight * first
            }
            Operator::Union { .. } => self.cpu_weight * input_rows.iter().sum::<f64>(),
            Operator::Minus { .. } | Operator::Intersect { .. } => {
                let total: f64 = input_rows.iter().sum();
                self.cpu_weight * total + self.memory_weight * (total - first)
            }
            Operator::EnumerableConverter { .. } => self.network_weight * first,
        };
        Cost::new(cost)
    }
}
