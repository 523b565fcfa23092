//! # Relational Nodes
//!
//! A [`RelNode`] is one immutable relational operator: its [`Operator`] payload,
//! its ordered inputs, its derived [`RowType`] and its [`Convention`]. Nodes are
//! shared through `Arc`, so a rewrite that replaces one subtree rebuilds only the
//! spine above it and every untouched subtree is structurally shared between the
//! old and the new tree. Keeping the old root alive is therefore enough to roll a
//! plan back.
//!
//! ## Construction Is Validation
//!
//! [`RelNode::new`] is the only way to build a node. It checks input arity,
//! child conventions and every expression against the input row types, then
//! derives the output row type once and caches it. A node that exists is valid;
//! rules cannot produce a malformed tree without getting a `SchemaMismatch` back.
//!
//! ## Conventions
//!
//! The convention says which execution model a node belongs to. The planner starts
//! with a tree that is entirely `Logical` and finishes with one that is entirely
//! `Physical(target)`. A logical parent accepts children in any convention (during
//! conversion the bottom of the tree is physical before the top is), while a
//! physical parent only accepts children of its own backend. The single bridge is
//! `EnumerableConverter`, which accepts `Physical(from)` children and is itself
//! `Physical(Enumerable)`.

use crate::error::{PlanError, Result};
use crate::expr::{write_list, AggCall, Expr, JoinType, ScalarValue, SortKey};
use crate::types::{DataType, Field, RowType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Physical execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Distributed pipeline backend; the usual conversion target.
    Stream,
    /// In-process row iterator backend consumed at the root of a plan.
    Enumerable,
}

/// Execution convention of a node.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    #[default]
    Logical,
    Physical(Backend),
}

impl Convention {
    pub fn is_logical(&self) -> bool {
        matches!(self, Convention::Logical)
    }

    /// Whether a node in this convention may have a child in `child`.
    pub fn accepts(&self, child: Convention) -> bool {
        match self {
            Convention::Logical => true,
            Convention::Physical(_) => *self == child,
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Logical => write!(f, "logical"),
            Convention::Physical(Backend::Stream) => write!(f, "stream"),
            Convention::Physical(Backend::Enumerable) => write!(f, "enumerable"),
        }
    }
}

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Build side for hash joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildSide {
    Left,
    Right,
}

/// Physical join strategy. Logical joins carry `Unspecified`; the join
/// converter proposes the concrete alternatives and the cost model picks one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinAlgorithm {
    #[default]
    Unspecified,
    Hash { build: BuildSide },
    NestedLoop,
}

/// Relational operator payload.
///
/// Children are not stored here; they live in [`RelNode::inputs`]. The payload is
/// everything else that defines the operator's semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Base table read. The resolver supplies the row type and any known unique
    /// keys; the planner never consults a catalog.
    TableScan {
        table: TableRef,
        row_type: RowType,
        #[serde(default)]
        unique_keys: Vec<Vec<usize>>,
    },
    /// Inline rows. Zero tuples means the relation is known to be empty.
    Values {
        row_type: RowType,
        tuples: Vec<Vec<ScalarValue>>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    /// Fused filter and projection. The condition is evaluated over the input and
    /// the projections are computed for surviving rows.
    Calc {
        projects: Vec<Expr>,
        aliases: Vec<String>,
        condition: Option<Expr>,
    },
    Join {
        join_type: JoinType,
        condition: Expr,
        #[serde(default)]
        algorithm: JoinAlgorithm,
    },
    /// Grouping on input positions; output is group columns followed by one
    /// column per call.
    Aggregate {
        group_keys: Vec<usize>,
        calls: Vec<AggCall>,
    },
    Sort {
        collation: Vec<SortKey>,
        #[serde(default)]
        offset: Option<u64>,
        #[serde(default)]
        fetch: Option<u64>,
    },
    Union {
        all: bool,
    },
    Minus {
        all: bool,
    },
    Intersect {
        all: bool,
    },
    /// Expands a single array column into one row per element.
    Uncollect {
        alias: String,
        #[serde(default)]
        with_ordinality: bool,
    },
    /// Correlated expansion: each input row is repeated once per element of its
    /// array column `column`, with the element appended.
    Unnest {
        column: usize,
        alias: String,
    },
    /// Adapts a physical subtree to the enumerable convention.
    EnumerableConverter {
        from: Backend,
    },
}

/// Kind discriminant for pattern matching (without data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    TableScan,
    Values,
    Filter,
    Project,
    Calc,
    Join,
    Aggregate,
    Sort,
    Union,
    Minus,
    Intersect,
    Uncollect,
    Unnest,
    EnumerableConverter,
}

impl OpKind {
    pub const ALL: [OpKind; 14] = [
        OpKind::TableScan,
        OpKind::Values,
        OpKind::Filter,
        OpKind::Project,
        OpKind::Calc,
        OpKind::Join,
        OpKind::Aggregate,
        OpKind::Sort,
        OpKind::Union,
        OpKind::Minus,
        OpKind::Intersect,
        OpKind::Uncollect,
        OpKind::Unnest,
        OpKind::EnumerableConverter,
    ];

    /// Allowed number of inputs as `(min, max)`.
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            OpKind::TableScan | OpKind::Values => (0, Some(0)),
            OpKind::Join => (2, Some(2)),
            OpKind::Union => (1, None),
            OpKind::Minus | OpKind::Intersect => (2, None),
            _ => (1, Some(1)),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Operator {
    pub fn kind(&self) -> OpKind {
        match self {
            Operator::TableScan { .. } => OpKind::TableScan,
            Operator::Values { .. } => OpKind::Values,
            Operator::Filter { .. } => OpKind::Filter,
            Operator::Project { .. } => OpKind::Project,
            Operator::Calc { .. } => OpKind::Calc,
            Operator::Join { .. } => OpKind::Join,
            Operator::Aggregate { .. } => OpKind::Aggregate,
            Operator::Sort { .. } => OpKind::Sort,
            Operator::Union { .. } => OpKind::Union,
            Operator::Minus { .. } => OpKind::Minus,
            Operator::Intersect { .. } => OpKind::Intersect,
            Operator::Uncollect { .. } => OpKind::Uncollect,
            Operator::Unnest { .. } => OpKind::Unnest,
            Operator::EnumerableConverter { .. } => OpKind::EnumerableConverter,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::TableScan { table, .. } => write!(f, "TableScan(table={table})"),
            Operator::Values { tuples, .. } => write!(f, "Values(rows={})", tuples.len()),
            Operator::Filter { predicate } => write!(f, "Filter(condition={predicate})"),
            Operator::Project { exprs, aliases } => {
                write!(f, "Project(")?;
                write_aliased(f, exprs, aliases)?;
                write!(f, ")")
            }
            Operator::Calc {
                projects,
                aliases,
                condition,
            } => {
                write!(f, "Calc(")?;
                write_aliased(f, projects, aliases)?;
                if let Some(c) = condition {
                    write!(f, ", condition={c}")?;
                }
                write!(f, ")")
            }
            Operator::Join {
                join_type,
                condition,
                algorithm,
            } => {
                write!(f, "Join(type={join_type:?}, condition={condition}")?;
                match algorithm {
                    JoinAlgorithm::Unspecified => {}
                    JoinAlgorithm::Hash { build } => write!(f, ", algorithm=hash(build={build:?})")?,
                    JoinAlgorithm::NestedLoop => write!(f, ", algorithm=nested_loop")?,
                }
                write!(f, ")")
            }
            Operator::Aggregate { group_keys, calls } => {
                write!(f, "Aggregate(group={group_keys:?}")?;
                if !calls.is_empty() {
                    write!(f, ", calls=[")?;
                    write_list(f, calls, ", ")?;
                    write!(f, "]")?;
                }
                write!(f, ")")
            }
            Operator::Sort {
                collation,
                offset,
                fetch,
            } => {
                write!(f, "Sort(keys=[")?;
                write_list(f, collation, ", ")?;
                write!(f, "]")?;
                if let Some(o) = offset {
                    write!(f, ", offset={o}")?;
                }
                if let Some(n) = fetch {
                    write!(f, ", fetch={n}")?;
                }
                write!(f, ")")
            }
            Operator::Union { all } => write!(f, "Union(all={all})"),
            Operator::Minus { all } => write!(f, "Minus(all={all})"),
            Operator::Intersect { all } => write!(f, "Intersect(all={all})"),
            Operator::Uncollect {
                alias,
                with_ordinality,
            } => write!(f, "Uncollect(alias={alias}, ordinality={with_ordinality})"),
            Operator::Unnest { column, alias } => write!(f, "Unnest(column=${column}, alias={alias})"),
            Operator::EnumerableConverter { from } => write!(f, "EnumerableConverter(from={from:?})"),
        }
    }
}

fn write_aliased(f: &mut fmt::Formatter<'_>, exprs: &[Expr], aliases: &[String]) -> fmt::Result {
    for (i, (e, a)) in exprs.iter().zip(aliases.iter()).enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}={e}")?;
    }
    Ok(())
}

/// An immutable relational node.
///
/// Equality and hashing are structural over the whole subtree, which is what the
/// planner's determinism and fixpoint checks compare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelNode {
    op: Operator,
    inputs: Vec<Arc<RelNode>>,
    row_type: RowType,
    convention: Convention,
}

impl RelNode {
    /// Validate and build a node.
    pub fn new(
        op: Operator,
        inputs: Vec<Arc<RelNode>>,
        convention: Convention,
    ) -> Result<Arc<RelNode>> {
        let kind = op.kind();

        let (min, max) = kind.arity();
        if inputs.len() < min || max.is_some_and(|m| inputs.len() > m) {
            return Err(PlanError::schema(
                kind,
                format!("expected {min}..{max:?} inputs, got {}", inputs.len()),
            ));
        }

        check_conventions(&op, &inputs, convention)?;

        let row_type = derive_row_type(&op, &inputs).map_err(|reason| PlanError::schema(kind, reason))?;

        Ok(Arc::new(RelNode {
            op,
            inputs,
            row_type,
            convention,
        }))
    }

    /// Build a logical node.
    pub fn logical(op: Operator, inputs: Vec<Arc<RelNode>>) -> Result<Arc<RelNode>> {
        RelNode::new(op, inputs, Convention::Logical)
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn inputs(&self) -> &[Arc<RelNode>] {
        &self.inputs
    }

    pub fn input(&self, i: usize) -> &Arc<RelNode> {
        &self.inputs[i]
    }

    pub fn row_type(&self) -> &RowType {
        &self.row_type
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn is_leaf(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Re-tag: a copy of this node in another convention, same inputs.
    pub fn with_convention(&self, convention: Convention) -> Result<Arc<RelNode>> {
        RelNode::new(self.op.clone(), self.inputs.clone(), convention)
    }

    /// A copy of this node over new inputs, same payload and convention.
    pub fn with_inputs(&self, inputs: Vec<Arc<RelNode>>) -> Result<Arc<RelNode>> {
        RelNode::new(self.op.clone(), inputs, self.convention)
    }

    /// Node at the given child path (`[]` is this node).
    pub fn at(self: &Arc<Self>, path: &[usize]) -> Option<&Arc<RelNode>> {
        let mut node = self;
        for &i in path {
            node = node.inputs.get(i)?;
        }
        Some(node)
    }

    /// Number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        1 + self.inputs.iter().map(|i| i.node_count()).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.inputs.iter().map(|i| i.depth()).max().unwrap_or(0)
    }

    /// Whether every node in this subtree carries `convention`.
    pub fn all_in(&self, convention: Convention) -> bool {
        self.convention == convention && self.inputs.iter().all(|i| i.all_in(convention))
    }

    /// Kinds of every node in pre-order.
    pub fn kinds(&self) -> Vec<OpKind> {
        let mut out = Vec::new();
        self.collect_kinds(&mut out);
        out
    }

    fn collect_kinds(&self, out: &mut Vec<OpKind>) {
        out.push(self.kind());
        for i in &self.inputs {
            i.collect_kinds(out);
        }
    }

    /// Single-line fingerprint of the subtree: operators, conventions and shape.
    /// Structurally equal trees always have equal digests.
    pub fn digest(&self) -> String {
        let mut out = format!("{}<{}>", self.op, self.convention);
        if !self.inputs.is_empty() {
            out.push('(');
            for (i, input) in self.inputs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&input.digest());
            }
            out.push(')');
        }
        out
    }

    /// Multi-line rendering of the subtree, one node per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(0, &mut out);
        out
    }

    fn explain_into(&self, indent: usize, out: &mut String) {
        use std::fmt::Write;
        let _ = writeln!(
            out,
            "{}{} [{}]",
            "  ".repeat(indent),
            self.op,
            self.convention
        );
        for i in &self.inputs {
            i.explain_into(indent + 1, out);
        }
    }

    // ------------------------------------------------------------------
    // Logical constructors, for resolvers, rules and tests.
    // ------------------------------------------------------------------

    pub fn table_scan(table: TableRef, row_type: RowType) -> Result<Arc<RelNode>> {
        RelNode::logical(
            Operator::TableScan {
                table,
                row_type,
                unique_keys: vec![],
            },
            vec![],
        )
    }

    pub fn values(row_type: RowType, tuples: Vec<Vec<ScalarValue>>) -> Result<Arc<RelNode>> {
        RelNode::logical(Operator::Values { row_type, tuples }, vec![])
    }

    /// Known-empty relation with the given row type.
    pub fn empty(row_type: RowType) -> Result<Arc<RelNode>> {
        RelNode::values(row_type, vec![])
    }

    pub fn filter(input: Arc<RelNode>, predicate: Expr) -> Result<Arc<RelNode>> {
        RelNode::logical(Operator::Filter { predicate }, vec![input])
    }

    pub fn project(
        input: Arc<RelNode>,
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    ) -> Result<Arc<RelNode>> {
        RelNode::logical(Operator::Project { exprs, aliases }, vec![input])
    }

    /// Project that keeps the given input columns under their input names.
    pub fn project_columns(input: Arc<RelNode>, columns: &[usize]) -> Result<Arc<RelNode>> {
        let rt = input.row_type().clone();
        let mut exprs = Vec::with_capacity(columns.len());
        let mut aliases = Vec::with_capacity(columns.len());
        for &c in columns {
            let field = rt
                .field(c)
                .ok_or_else(|| PlanError::schema(OpKind::Project, format!("column ${c} out of range")))?;
            exprs.push(Expr::column(c, field.name.clone()));
            aliases.push(field.name.clone());
        }
        RelNode::project(input, exprs, aliases)
    }

    pub fn calc(
        input: Arc<RelNode>,
        projects: Vec<Expr>,
        aliases: Vec<String>,
        condition: Option<Expr>,
    ) -> Result<Arc<RelNode>> {
        RelNode::logical(
            Operator::Calc {
                projects,
                aliases,
                condition,
            },
            vec![input],
        )
    }

    pub fn join(
        left: Arc<RelNode>,
        right: Arc<RelNode>,
        join_type: JoinType,
        condition: Expr,
    ) -> Result<Arc<RelNode>> {
        RelNode::logical(
            Operator::Join {
                join_type,
                condition,
                algorithm: JoinAlgorithm::Unspecified,
            },
            vec![left, right],
        )
    }

    pub fn aggregate(
        input: Arc<RelNode>,
        group_keys: Vec<usize>,
        calls: Vec<AggCall>,
    ) -> Result<Arc<RelNode>> {
        RelNode::logical(Operator::Aggregate { group_keys, calls }, vec![input])
    }

    pub fn sort(input: Arc<RelNode>, collation: Vec<SortKey>) -> Result<Arc<RelNode>> {
        RelNode::logical(
            Operator::Sort {
                collation,
                offset: None,
                fetch: None,
            },
            vec![input],
        )
    }

    pub fn union(inputs: Vec<Arc<RelNode>>, all: bool) -> Result<Arc<RelNode>> {
        RelNode::logical(Operator::Union { all }, inputs)
    }
}

fn check_conventions(op: &Operator, inputs: &[Arc<RelNode>], convention: Convention) -> Result<()> {
    let kind = op.kind();
    if let Operator::EnumerableConverter { from } = op {
        if convention != Convention::Physical(Backend::Enumerable) {
            return Err(PlanError::convention(
                kind,
                format!("converter must be enumerable, not {convention}"),
            ));
        }
        let expected = Convention::Physical(*from);
        if let Some(bad) = inputs.iter().find(|i| i.convention != expected) {
            return Err(PlanError::convention(
                kind,
                format!("converter from {expected} over {} input", bad.convention),
            ));
        }
        return Ok(());
    }
    for input in inputs {
        if !convention.accepts(input.convention) {
            return Err(PlanError::convention(
                kind,
                format!(
                    "{convention} node cannot consume {} input {}",
                    input.convention,
                    input.kind()
                ),
            ));
        }
    }
    Ok(())
}

/// Derive the output row type of `op` over `inputs`. Arity is already checked.
fn derive_row_type(op: &Operator, inputs: &[Arc<RelNode>]) -> std::result::Result<RowType, String> {
    match op {
        Operator::TableScan {
            row_type,
            unique_keys,
            ..
        } => {
            if let Some(bad) = unique_keys.iter().flatten().find(|&&k| k >= row_type.len()) {
                return Err(format!("unique key column ${bad} out of range"));
            }
            Ok(row_type.clone())
        }
        Operator::Values { row_type, tuples } => {
            for (r, tuple) in tuples.iter().enumerate() {
                if tuple.len() != row_type.len() {
                    return Err(format!(
                        "row {r} has {} values, expected {}",
                        tuple.len(),
                        row_type.len()
                    ));
                }
                for (value, field) in tuple.iter().zip(row_type.fields()) {
                    if value.is_null() {
                        if !field.nullable {
                            return Err(format!("NULL in non-nullable column {}", field.name));
                        }
                    } else if value.data_type() != field.data_type {
                        return Err(format!(
                            "value {value} does not fit column {}",
                            field
                        ));
                    }
                }
            }
            Ok(row_type.clone())
        }
        Operator::Filter { predicate } => {
            let input = inputs[0].row_type();
            predicate.check_predicate(input)?;
            Ok(input.clone())
        }
        Operator::Project { exprs, aliases } => project_row_type(exprs, aliases, inputs[0].row_type()),
        Operator::Calc {
            projects,
            aliases,
            condition,
        } => {
            let input = inputs[0].row_type();
            if let Some(c) = condition {
                c.check_predicate(input)?;
            }
            project_row_type(projects, aliases, input)
        }
        Operator::Join {
            join_type,
            condition,
            ..
        } => {
            let left = inputs[0].row_type();
            let right = inputs[1].row_type();
            condition.check_predicate(&left.concat(right))?;
            let left_out = if join_type.generates_nulls_on_left() {
                left.to_nullable()
            } else {
                left.clone()
            };
            if !join_type.projects_right() {
                return Ok(left_out);
            }
            let right_out = if join_type.generates_nulls_on_right() {
                right.to_nullable()
            } else {
                right.clone()
            };
            Ok(left_out.concat(&right_out))
        }
        Operator::Aggregate { group_keys, calls } => {
            let input = inputs[0].row_type();
            let mut fields = Vec::with_capacity(group_keys.len() + calls.len());
            for (pos, &k) in group_keys.iter().enumerate() {
                if group_keys[..pos].contains(&k) {
                    return Err(format!("duplicate group key ${k}"));
                }
                let field = input
                    .field(k)
                    .ok_or_else(|| format!("group key ${k} out of range"))?;
                fields.push(field.clone());
            }
            let grouped = !group_keys.is_empty();
            for call in calls {
                let (data_type, nullable) = call.derive_type(input, grouped)?;
                fields.push(Field::new(call.name.clone(), data_type, nullable));
            }
            Ok(RowType::new(fields))
        }
        Operator::Sort { collation, .. } => {
            let input = inputs[0].row_type();
            if let Some(k) = collation.iter().find(|k| k.column >= input.len()) {
                return Err(format!("sort key ${} out of range", k.column));
            }
            Ok(input.clone())
        }
        Operator::Union { .. } => set_op_row_type(inputs, |ns| ns.iter().any(|&n| n)),
        Operator::Intersect { .. } => set_op_row_type(inputs, |ns| ns.iter().all(|&n| n)),
        Operator::Minus { .. } => set_op_row_type(inputs, |ns| ns[0]),
        Operator::Uncollect {
            alias,
            with_ordinality,
        } => {
            let input = inputs[0].row_type();
            if input.len() != 1 {
                return Err(format!("uncollect expects one array column, got {}", input.len()));
            }
            let element = element_of(&input.fields()[0])?;
            let mut fields = vec![Field::new(alias.clone(), element, true)];
            if *with_ordinality {
                fields.push(Field::required("ordinality", DataType::Int64));
            }
            Ok(RowType::new(fields))
        }
        Operator::Unnest { column, alias } => {
            let input = inputs[0].row_type();
            let field = input
                .field(*column)
                .ok_or_else(|| format!("unnest column ${column} out of range"))?;
            let element = element_of(field)?;
            let mut fields = input.fields().to_vec();
            fields.push(Field::new(alias.clone(), element, true));
            Ok(RowType::new(fields))
        }
        Operator::EnumerableConverter { .. } => Ok(inputs[0].row_type().clone()),
    }
}

fn project_row_type(
    exprs: &[Expr],
    aliases: &[String],
    input: &RowType,
) -> std::result::Result<RowType, String> {
    if exprs.len() != aliases.len() {
        return Err(format!(
            "{} expressions but {} aliases",
            exprs.len(),
            aliases.len()
        ));
    }
    exprs
        .iter()
        .zip(aliases)
        .map(|(e, a)| {
            let (data_type, nullable) = e.derive_type(input)?;
            Ok(Field::new(a.clone(), data_type, nullable))
        })
        .collect::<std::result::Result<Vec<_>, String>>()
        .map(RowType::new)
}

/// Column-wise unification of set-operation inputs. Names come from the first
/// input; `nullable` decides the output nullability from the inputs'.
fn set_op_row_type(
    inputs: &[Arc<RelNode>],
    nullable: impl Fn(&[bool]) -> bool,
) -> std::result::Result<RowType, String> {
    let first = inputs[0].row_type();
    for (i, input) in inputs.iter().enumerate().skip(1) {
        if input.row_type().len() != first.len() {
            return Err(format!(
                "input {i} has {} columns, expected {}",
                input.row_type().len(),
                first.len()
            ));
        }
    }
    let mut fields = Vec::with_capacity(first.len());
    for (c, head) in first.fields().iter().enumerate() {
        let mut data_type = head.data_type.clone();
        let mut nulls = Vec::with_capacity(inputs.len());
        for input in inputs {
            let field = &input.row_type().fields()[c];
            if !field.data_type.is_compatible_with(&data_type) {
                return Err(format!(
                    "column {c} has incompatible types {data_type} and {}",
                    field.data_type
                ));
            }
            if data_type == DataType::Null {
                data_type = field.data_type.clone();
            }
            nulls.push(field.nullable || field.data_type == DataType::Null);
        }
        fields.push(Field::new(head.name.clone(), data_type, nullable(&nulls)));
    }
    Ok(RowType::new(fields))
}

fn element_of(field: &Field) -> std::result::Result<DataType, String> {
    field
        .data_type
        .element_type()
        .cloned()
        .ok_or_else(|| format!("column {} is not an array", field.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AggFunc, BinaryOp};

    fn scan(name: &str, cols: &[&str]) -> Arc<RelNode> {
        let rt = cols
            .iter()
            .map(|c| Field::required(*c, DataType::Int64))
            .collect();
        RelNode::table_scan(TableRef::new("s", name), rt).unwrap()
    }

    #[test]
    fn test_join_row_type_and_nullability() {
        let l = scan("l", &["k", "a"]);
        let r = scan("r", &["k", "b"]);
        let cond = Expr::equals(Expr::column(0, "k"), Expr::column(2, "k"));

        let inner = RelNode::join(l.clone(), r.clone(), JoinType::Inner, cond.clone()).unwrap();
        assert_eq!(inner.row_type().len(), 4);
        assert!(inner.row_type().fields().iter().all(|f| !f.nullable));

        let left = RelNode::join(l.clone(), r.clone(), JoinType::Left, cond.clone()).unwrap();
        assert!(!left.row_type().fields()[1].nullable);
        assert!(left.row_type().fields()[3].nullable);

        let semi = RelNode::join(l, r, JoinType::Semi, cond).unwrap();
        assert_eq!(semi.row_type().names().collect::<Vec<_>>(), vec!["k", "a"]);
    }

    #[test]
    fn test_schema_mismatch_on_bad_expression() {
        let l = scan("l", &["k"]);
        let r = scan("r", &["k"]);
        let err = RelNode::join(l.clone(), r, JoinType::Inner, Expr::column(5, "x")).unwrap_err();
        assert!(matches!(err, PlanError::SchemaMismatch { kind: OpKind::Join, .. }));

        let err = RelNode::filter(l, Expr::column(0, "k")).unwrap_err();
        assert!(matches!(err, PlanError::SchemaMismatch { kind: OpKind::Filter, .. }));
    }

    #[test]
    fn test_set_op_requires_matching_width() {
        let a = scan("a", &["x"]);
        let b = scan("b", &["x", "y"]);
        assert!(RelNode::union(vec![a.clone(), b], true).is_err());
        assert!(RelNode::logical(Operator::Minus { all: false }, vec![a.clone()]).is_err());
        let u = RelNode::union(vec![a.clone(), a], false).unwrap();
        assert_eq!(u.row_type().len(), 1);
    }

    #[test]
    fn test_physical_parent_rejects_logical_child() {
        let s = scan("t", &["x"]);
        let pred = Expr::binary(
            BinaryOp::Gt,
            Expr::column(0, "x"),
            Expr::literal(ScalarValue::Int64(1)),
        );
        let err = RelNode::new(
            Operator::Filter { predicate: pred.clone() },
            vec![s.clone()],
            Convention::Physical(Backend::Stream),
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::ConventionMismatch { .. }));

        let physical_scan = s.with_convention(Convention::Physical(Backend::Stream)).unwrap();
        let logical_parent = RelNode::filter(physical_scan.clone(), pred).unwrap();
        assert_eq!(logical_parent.convention(), Convention::Logical);

        let adapter = RelNode::new(
            Operator::EnumerableConverter { from: Backend::Stream },
            vec![physical_scan],
            Convention::Physical(Backend::Enumerable),
        )
        .unwrap();
        assert_eq!(adapter.row_type(), s.row_type());
    }

    #[test]
    fn test_aggregate_and_unnest_row_types() {
        let s = scan("t", &["g", "v"]);
        let agg = RelNode::aggregate(
            s,
            vec![0],
            vec![AggCall::new(AggFunc::Sum, vec![1], "total")],
        )
        .unwrap();
        assert_eq!(agg.row_type().names().collect::<Vec<_>>(), vec!["g", "total"]);

        let arr = RelNode::table_scan(
            TableRef::new("s", "arr"),
            RowType::new(vec![
                Field::required("id", DataType::Int64),
                Field::required("tags", DataType::Array(Box::new(DataType::Utf8))),
            ]),
        )
        .unwrap();
        let unnest = RelNode::logical(
            Operator::Unnest {
                column: 1,
                alias: "tag".into(),
            },
            vec![arr.clone()],
        )
        .unwrap();
        assert_eq!(unnest.row_type().fields()[2].data_type, DataType::Utf8);
        assert!(RelNode::logical(
            Operator::Unnest {
                column: 0,
                alias: "x".into()
            },
            vec![arr]
        )
        .is_err());
    }

    #[test]
    fn test_structural_sharing_and_paths() {
        let l = scan("l", &["k"]);
        let r = scan("r", &["k"]);
        let cond = Expr::equals(Expr::column(0, "k"), Expr::column(1, "k"));
        let join = RelNode::join(l.clone(), r.clone(), JoinType::Inner, cond).unwrap();
        assert!(Arc::ptr_eq(join.at(&[1]).unwrap(), &r));
        assert!(join.at(&[2]).is_none());
        assert_eq!(join.node_count(), 3);
        assert_eq!(join.depth(), 2);
        assert_eq!(join.kinds(), vec![OpKind::Join, OpKind::TableScan, OpKind::TableScan]);
    }
}
