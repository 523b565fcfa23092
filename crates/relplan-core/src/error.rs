//! # Planning Errors
//!
//! Every failure the engine can report is a variant of [`PlanError`]. Each variant
//! names the operator kind or rule responsible so a failed plan can be traced back
//! to the node or catalogue entry that caused it.
//!
//! | Variant                  | Raised by                          | Scope            |
//! |--------------------------|------------------------------------|------------------|
//! | `SchemaMismatch`         | node construction                  | one query        |
//! | `ConventionMismatch`     | node construction, planner start   | one query        |
//! | `DuplicateRule`          | rule set / registry construction   | whole process    |
//! | `UnknownRule`            | manifest resolution                | whole process    |
//! | `EquivalenceViolation`   | planner (rule returned bad result) | one query (bug)  |
//! | `NoFixpoint`             | rewriting phase                    | one query        |
//! | `NoApplicableConverter`  | converting phase                   | one query        |
//! | `PlanningTimeout`        | any phase                          | one query        |
//! | `Config`                 | manifest / config loading          | whole process    |

use crate::node::OpKind;
use crate::types::RowType;

/// Convenience alias used throughout the crate.
pub type Result<T, E = PlanError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    /// A node's attributes are incompatible with its children's row types.
    #[error("schema mismatch in {kind:?}: {reason}")]
    SchemaMismatch { kind: OpKind, reason: String },

    /// A child's convention cannot be accepted by its parent, or the planner was
    /// handed a tree that is not in the source convention.
    #[error("convention mismatch in {kind:?}: {reason}")]
    ConventionMismatch { kind: OpKind, reason: String },

    /// The same rule was registered twice in one rule set.
    #[error("rule '{rule}' is already registered")]
    DuplicateRule { rule: String },

    /// A manifest named a rule that the catalogue does not provide.
    #[error("unknown rule '{rule}'")]
    UnknownRule { rule: String },

    /// A rule produced a candidate whose row type differs from the matched node.
    #[error("rule '{rule}' broke equivalence on {kind:?}: expected {expected}, got {actual}")]
    EquivalenceViolation {
        rule: String,
        kind: OpKind,
        expected: RowType,
        actual: RowType,
    },

    /// Rewriting did not reach a fixpoint within the pass budget.
    #[error("rewrite program '{program}' did not converge after {passes} passes")]
    NoFixpoint { program: String, passes: usize },

    /// No conversion rule produced a physical node for this operator.
    #[error("no converter for {kind:?} into {target}")]
    NoApplicableConverter { kind: OpKind, target: String },

    /// The wall-clock budget was exhausted.
    #[error("planning exceeded {budget_ms}ms (elapsed {elapsed_ms}ms)")]
    PlanningTimeout { elapsed_ms: u64, budget_ms: u64 },

    /// Malformed manifest or configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PlanError {
    pub fn schema(kind: OpKind, reason: impl Into<String>) -> Self {
        PlanError::SchemaMismatch {
            kind,
            reason: reason.into(),
        }
    }

    pub fn convention(kind: OpKind, reason: impl Into<String>) -> Self {
        PlanError::ConventionMismatch {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether the error reflects a broken catalogue rather than a bad query.
    pub fn is_catalogue_error(&self) -> bool {
        matches!(
            self,
            PlanError::DuplicateRule { .. } | PlanError::UnknownRule { .. } | PlanError::Config(_)
        )
    }
}
