//! # Scalar Expressions
//!
//! Scalar expressions compute one value per row. They appear inside operator
//! payloads: a Filter's predicate, a Project's or Calc's output list, a Join's
//! condition. Columns are referenced *positionally*: `Column { index: 2 }` is the
//! third field of the operator's input row type (for a Join, of the concatenated
//! left ++ right row type). The name carried next to the index is only for display.
//!
//! Positional references make the common rewrites mechanical:
//!
//! - pushing a predicate to the right side of a join shifts every index down by the
//!   left width ([`Expr::shift`]);
//! - pushing a predicate below a projection replaces each reference with the
//!   projected expression ([`Expr::substitute`]);
//! - merging two projections is substitution applied to every output expression.
//!
//! Every expression has a deterministic type given its input row type
//! ([`Expr::derive_type`]); the node layer uses this to compute row types once at
//! construction.

use crate::types::{DataType, RowType};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Positional reference to an input column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub index: usize,
    #[serde(default)]
    pub name: String,
}

impl ColumnRef {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.index)
    }
}

/// Scalar value for literals.
///
/// Uses `OrderedFloat` for `f64` so that literals can participate in Eq/Hash,
/// which node digests and equivalence checks rely on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
    /// Microseconds since 1970-01-01T00:00:00.
    Timestamp(i64),
}

impl ScalarValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Bool(_) => DataType::Boolean,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Date(_) => DataType::Date,
            ScalarValue::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
            Self::Timestamp(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{}", v.0),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Date(v) => write!(f, "DATE({v})"),
            ScalarValue::Timestamp(v) => write!(f, "TIMESTAMP({v})"),
        }
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Positional reference to an input column.
    Column(ColumnRef),
    /// Constant literal value.
    Literal(ScalarValue),
    /// Binary operation (e.g., `a + b`, `x = y`, `price > 100`).
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (e.g., `NOT flag`, `-value`, `IS NULL`).
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// Resolved function call. The resolver fixes the return type; the planner
    /// never infers it.
    Function {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
    },
    /// Explicit type conversion.
    Cast { expr: Box<Expr>, to: DataType },
    /// Conjunction, kept flat to make predicate splitting trivial.
    And(Vec<Expr>),
    /// Disjunction.
    Or(Vec<Expr>),
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

impl Expr {
    pub fn column(index: usize, name: impl Into<String>) -> Expr {
        Expr::Column(ColumnRef::new(index, name))
    }

    pub fn literal(value: ScalarValue) -> Expr {
        Expr::Literal(value)
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::Literal(ScalarValue::Bool(value))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    /// Rebuild a conjunction from a list of conjuncts. An empty list yields `None`
    /// (no predicate), a single conjunct is returned unwrapped.
    pub fn conjunction(mut conjuncts: Vec<Expr>) -> Option<Expr> {
        match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Expr::And(conjuncts)),
        }
    }

    /// Like [`Expr::conjunction`] but an empty list becomes literal TRUE.
    pub fn conjunction_or_true(conjuncts: Vec<Expr>) -> Expr {
        Expr::conjunction(conjuncts).unwrap_or_else(|| Expr::boolean(true))
    }

    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Cast { expr, .. } => expr.collect_columns(out),
            Expr::Function { args, .. } | Expr::And(args) | Expr::Or(args) => {
                for a in args {
                    a.collect_columns(out);
                }
            }
        }
    }

    /// Distinct input positions referenced by this expression, ascending.
    pub fn column_indexes(&self) -> BTreeSet<usize> {
        self.columns().into_iter().map(|c| c.index).collect()
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Owned version of [`Expr::conjuncts`], dropping literal TRUE.
    pub fn owned_conjuncts(&self) -> Vec<Expr> {
        self.conjuncts()
            .into_iter()
            .filter(|e| !e.is_true())
            .cloned()
            .collect()
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(true)))
    }

    /// Literal FALSE or NULL: a predicate that never passes a row.
    pub fn is_never_true(&self) -> bool {
        matches!(
            self,
            Expr::Literal(ScalarValue::Bool(false)) | Expr::Literal(ScalarValue::Null)
        )
    }

    /// Index of the referenced column if this expression is a bare column reference.
    pub fn as_column(&self) -> Option<usize> {
        match self {
            Expr::Column(c) => Some(c.index),
            _ => None,
        }
    }

    /// Rebuild the expression, replacing every column reference with `f(column)`.
    pub fn map_columns<F>(&self, f: &mut F) -> Expr
    where
        F: FnMut(&ColumnRef) -> Expr,
    {
        match self {
            Expr::Column(c) => f(c),
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
                op: *op,
                left: Box::new(left.map_columns(f)),
                right: Box::new(right.map_columns(f)),
            },
            Expr::UnaryOp { op, operand } => Expr::UnaryOp {
                op: *op,
                operand: Box::new(operand.map_columns(f)),
            },
            Expr::Function {
                name,
                args,
                return_type,
            } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.map_columns(f)).collect(),
                return_type: return_type.clone(),
            },
            Expr::Cast { expr, to } => Expr::Cast {
                expr: Box::new(expr.map_columns(f)),
                to: to.clone(),
            },
            Expr::And(exprs) => Expr::And(exprs.iter().map(|e| e.map_columns(f)).collect()),
            Expr::Or(exprs) => Expr::Or(exprs.iter().map(|e| e.map_columns(f)).collect()),
        }
    }

    /// Shift every column index by `offset`. Callers guarantee the result is
    /// non-negative (e.g. shifting right-side references of a join by `-left_width`).
    pub fn shift(&self, offset: isize) -> Expr {
        self.map_columns(&mut |c| {
            Expr::Column(ColumnRef::new(
                (c.index as isize + offset) as usize,
                c.name.clone(),
            ))
        })
    }

    /// Replace `Column(i)` with `exprs[i]`: rewrites an expression over a
    /// projection's output into one over the projection's input.
    pub fn substitute(&self, exprs: &[Expr]) -> Expr {
        self.map_columns(&mut |c| {
            exprs
                .get(c.index)
                .cloned()
                .unwrap_or_else(|| Expr::Column(c.clone()))
        })
    }

    /// Renumber columns through `mapping[old] = new`. Returns `None` if a
    /// referenced column has no mapping.
    pub fn remap(&self, mapping: &[Option<usize>]) -> Option<Expr> {
        let mut missing = false;
        let out = self.map_columns(&mut |c| match mapping.get(c.index).copied().flatten() {
            Some(new) => Expr::Column(ColumnRef::new(new, c.name.clone())),
            None => {
                missing = true;
                Expr::Column(c.clone())
            }
        });
        (!missing).then_some(out)
    }

    /// Derive `(type, nullable)` of this expression over `input`.
    pub fn derive_type(&self, input: &RowType) -> Result<(DataType, bool), String> {
        match self {
            Expr::Column(c) => input
                .field(c.index)
                .map(|f| (f.data_type.clone(), f.nullable))
                .ok_or_else(|| {
                    format!(
                        "column ${} out of range for input of width {}",
                        c.index,
                        input.len()
                    )
                }),
            Expr::Literal(v) => Ok((v.data_type(), v.is_null())),
            Expr::BinaryOp { op, left, right } => {
                let (lt, ln) = left.derive_type(input)?;
                let (rt, rn) = right.derive_type(input)?;
                let nullable = ln || rn;
                if op.is_comparison() {
                    let comparable = lt.is_compatible_with(&rt) || (lt.is_numeric() && rt.is_numeric());
                    if !comparable {
                        return Err(format!("cannot compare {lt} {} {rt}", op.symbol()));
                    }
                    return Ok((DataType::Boolean, nullable));
                }
                match (&lt, &rt) {
                    (DataType::Int64, DataType::Int64) => Ok((DataType::Int64, nullable)),
                    (a, b) if a.is_numeric() && b.is_numeric() => Ok((DataType::Float64, nullable)),
                    (DataType::Null, b) if b.is_numeric() => Ok((b.clone(), true)),
                    (a, DataType::Null) if a.is_numeric() => Ok((a.clone(), true)),
                    _ => Err(format!("invalid operands {lt} {} {rt}", op.symbol())),
                }
            }
            Expr::UnaryOp { op, operand } => {
                let (t, n) = operand.derive_type(input)?;
                match op {
                    UnaryOp::Not if t == DataType::Boolean || t == DataType::Null => {
                        Ok((DataType::Boolean, n))
                    }
                    UnaryOp::Neg if t.is_numeric() => Ok((t, n)),
                    UnaryOp::IsNull | UnaryOp::IsNotNull => Ok((DataType::Boolean, false)),
                    _ => Err(format!("invalid operand {t} for {op:?}")),
                }
            }
            Expr::Function {
                args, return_type, ..
            } => {
                let mut nullable = false;
                for a in args {
                    nullable |= a.derive_type(input)?.1;
                }
                Ok((return_type.clone(), nullable))
            }
            Expr::Cast { expr, to } => {
                let (_, n) = expr.derive_type(input)?;
                Ok((to.clone(), n))
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                let mut nullable = false;
                for e in exprs {
                    let (t, n) = e.derive_type(input)?;
                    if t != DataType::Boolean && t != DataType::Null {
                        return Err(format!("boolean connective over {t}"));
                    }
                    nullable |= n;
                }
                Ok((DataType::Boolean, nullable))
            }
        }
    }

    /// Check that this expression is a valid predicate over `input`.
    pub fn check_predicate(&self, input: &RowType) -> Result<(), String> {
        match self.derive_type(input)?.0 {
            DataType::Boolean | DataType::Null => Ok(()),
            other => Err(format!("predicate has type {other}, expected BOOLEAN")),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Function { name, args, .. } => {
                write!(f, "{name}(")?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::Cast { expr, to } => write!(f, "CAST({expr} AS {to})"),
            Expr::And(exprs) => {
                write!(f, "AND(")?;
                write_list(f, exprs, ", ")?;
                write!(f, ")")
            }
            Expr::Or(exprs) => {
                write!(f, "OR(")?;
                write_list(f, exprs, ", ")?;
                write!(f, ")")
            }
        }
    }
}

pub(crate) fn write_list<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: &[T],
    sep: &str,
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// SQL join types.
///
/// The join type decides which rows survive and therefore which rewrites are
/// legal: a predicate on the null-generating side of an outer join cannot be
/// pushed below it, and Semi/Anti joins only expose the left input's columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
    Cross,
}

impl JoinType {
    /// Whether rows of the left input may be padded with NULLs on the right.
    pub fn generates_nulls_on_right(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    pub fn generates_nulls_on_left(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    /// Whether the output contains the right input's columns.
    pub fn projects_right(&self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate call in an Aggregate node. Arguments are input positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggCall {
    pub func: AggFunc,
    pub args: Vec<usize>,
    #[serde(default)]
    pub distinct: bool,
    pub name: String,
}

impl AggCall {
    pub fn new(func: AggFunc, args: Vec<usize>, name: impl Into<String>) -> Self {
        Self {
            func,
            args,
            distinct: false,
            name: name.into(),
        }
    }

    /// Output `(type, nullable)` of this call. `grouped` is false for a global
    /// aggregate, which yields one row even over empty input.
    pub fn derive_type(&self, input: &RowType, grouped: bool) -> Result<(DataType, bool), String> {
        let arg = match self.args.first() {
            Some(&i) => Some(input.field(i).ok_or_else(|| {
                format!("aggregate argument ${i} out of range for width {}", input.len())
            })?),
            None => None,
        };
        match (self.func, arg) {
            (AggFunc::Count, _) => Ok((DataType::Int64, false)),
            (_, None) => Err(format!("{:?} requires an argument", self.func)),
            (AggFunc::Sum, Some(f)) if f.data_type.is_numeric() => {
                Ok((f.data_type.clone(), f.nullable || !grouped))
            }
            (AggFunc::Avg, Some(f)) if f.data_type.is_numeric() => {
                Ok((DataType::Float64, f.nullable || !grouped))
            }
            (AggFunc::Min | AggFunc::Max, Some(f)) => {
                Ok((f.data_type.clone(), f.nullable || !grouped))
            }
            (func, Some(f)) => Err(format!("{func:?} over non-numeric {}", f.data_type)),
        }
    }
}

impl fmt::Display for AggCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(", self.func)?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "${a}")?;
        }
        write!(f, ")")
    }
}

/// Sort key on an input position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default)]
    pub nulls_first: bool,
}

fn default_true() -> bool {
    true
}

impl SortKey {
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            ascending: true,
            nulls_first: false,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${} {}",
            self.column,
            if self.ascending { "ASC" } else { "DESC" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;

    fn input() -> RowType {
        RowType::new(vec![
            Field::required("a", DataType::Int64),
            Field::new("b", DataType::Float64, true),
            Field::required("c", DataType::Utf8),
        ])
    }

    #[test]
    fn test_derive_arithmetic_and_comparison() {
        let sum = Expr::binary(BinaryOp::Add, Expr::column(0, "a"), Expr::column(1, "b"));
        assert_eq!(sum.derive_type(&input()).unwrap(), (DataType::Float64, true));

        let cmp = Expr::binary(
            BinaryOp::Gt,
            Expr::column(0, "a"),
            Expr::literal(ScalarValue::Int64(5)),
        );
        assert_eq!(cmp.derive_type(&input()).unwrap(), (DataType::Boolean, false));

        let bad = Expr::binary(BinaryOp::Add, Expr::column(0, "a"), Expr::column(2, "c"));
        assert!(bad.derive_type(&input()).is_err());
        assert!(Expr::column(3, "d").derive_type(&input()).is_err());
    }

    #[test]
    fn test_shift_substitute_remap() {
        let pred = Expr::equals(Expr::column(3, "x"), Expr::column(4, "y"));
        assert_eq!(pred.shift(-3).column_indexes().into_iter().collect::<Vec<_>>(), vec![0, 1]);

        let projected = vec![
            Expr::binary(BinaryOp::Mul, Expr::column(2, "p"), Expr::literal(ScalarValue::Int64(2))),
            Expr::column(0, "q"),
        ];
        let over_output = Expr::binary(
            BinaryOp::Gt,
            Expr::column(0, "p2"),
            Expr::column(1, "q"),
        );
        let over_input = over_output.substitute(&projected);
        assert_eq!(over_input.column_indexes().into_iter().collect::<Vec<_>>(), vec![0, 2]);

        let mapping = vec![None, Some(0), Some(1)];
        assert!(Expr::column(0, "gone").remap(&mapping).is_none());
        assert_eq!(Expr::column(2, "k").remap(&mapping).unwrap().as_column(), Some(1));
    }

    #[test]
    fn test_conjunction_helpers() {
        let a = Expr::boolean(true);
        let nested = Expr::And(vec![
            Expr::column(0, "a"),
            Expr::And(vec![Expr::column(1, "b"), a.clone()]),
        ]);
        assert_eq!(nested.conjuncts().len(), 3);
        assert_eq!(nested.owned_conjuncts().len(), 2);
        assert!(Expr::conjunction(vec![]).is_none());
        assert!(Expr::conjunction_or_true(vec![]).is_true());
    }

    #[test]
    fn test_aggregate_types() {
        let sum = AggCall::new(AggFunc::Sum, vec![0], "s");
        assert_eq!(sum.derive_type(&input(), true).unwrap(), (DataType::Int64, false));
        assert_eq!(sum.derive_type(&input(), false).unwrap(), (DataType::Int64, true));
        let count = AggCall::new(AggFunc::Count, vec![], "n");
        assert_eq!(count.derive_type(&input(), false).unwrap(), (DataType::Int64, false));
        let bad = AggCall::new(AggFunc::Avg, vec![2], "x");
        assert!(bad.derive_type(&input(), true).is_err());
    }
}
