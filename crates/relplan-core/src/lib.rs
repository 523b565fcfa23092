//! # relplan-core: Rule-Driven Relational Plan Transformation
//!
//! This crate implements the core data structures and algorithms of a rule-based
//! planner: an immutable relational tree, pluggable rewrite and conversion rules,
//! and a fixpoint driver that rewrites a logical tree and converts it into a
//! physical plan for one execution backend.
//!
//! ## Module Overview
//!
//! - **`types`**: Row types and column data types; row-type equality is exact.
//! - **`expr`**: Scalar expressions over positional column references, join types,
//!   aggregate calls and sort keys.
//! - **`node`**: The relational node (`RelNode`), its operators and conventions.
//!   Construction validates and derives the row type.
//! - **`metadata`**: Derived facts rules consult (known-empty, unique keys).
//! - **`pattern`**: Declarative pattern matching for rule applicability checks.
//! - **`rule`**: The Rule trait, ordered rule sets, groups, registry and catalogue.
//! - **`matcher`**: Post-order matching of a rule set against a tree.
//! - **`cost`**: Cost model trait and heuristic default implementation.
//! - **`planner`**: The fixpoint driver and its state machine.
//! - **`config`**: Planner limits and the TOML rule manifest.
//! - **`error`**: The `PlanError` enum shared by every module.

pub mod config;
pub mod cost;
pub mod error;
pub mod expr;
pub mod matcher;
pub mod metadata;
pub mod node;
pub mod pattern;
pub mod planner;
pub mod rule;
pub mod types;

pub use config::{PlannerConfig, RewriteProgram, RuleManifest};
pub use error::{PlanError, Result};
pub use node::{Backend, Convention, OpKind, Operator, RelNode};
pub use planner::{PlanOutcome, Planner, PlannerState};
pub use rule::{Rule, RuleCatalog, RuleContext, RuleGroup, RuleRegistry, RuleSet, RuleType};
