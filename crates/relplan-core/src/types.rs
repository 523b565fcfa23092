//! # Row Types
//!
//! A [`RowType`] is the ordered list of output columns of a relational node. Row
//! types are compared exactly: two row types are equal only if they have the same
//! number of fields and every field agrees on name, data type and nullability, in
//! order. This is the equality the planner enforces between a rewritten node and
//! every candidate a rule proposes for it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column data types understood by the planner.
///
/// The set is deliberately small: the engine never evaluates expressions, it only
/// needs enough type information to derive row types and to check that rewritten
/// trees keep them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Days since the Unix epoch.
    Date,
    /// Microseconds since the Unix epoch.
    Timestamp,
    /// Type of an untyped NULL literal.
    Null,
    /// Collection of values, the input of Uncollect and Unnest.
    Array(Box<DataType>),
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }

    /// Element type of an array, if this is one.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            DataType::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// Types that set operations may line up column-by-column.
    ///
    /// `Null` unifies with anything so that `VALUES (NULL)` can be unioned with a
    /// typed input; everything else must match exactly.
    pub fn is_compatible_with(&self, other: &DataType) -> bool {
        self == other || *self == DataType::Null || *other == DataType::Null
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Int64 => write!(f, "BIGINT"),
            DataType::Float64 => write!(f, "DOUBLE"),
            DataType::Utf8 => write!(f, "VARCHAR"),
            DataType::Date => write!(f, "DATE"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Null => write!(f, "NULL"),
            DataType::Array(inner) => write!(f, "{inner} ARRAY"),
        }
    }
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    /// Non-nullable field shorthand.
    pub fn required(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, false)
    }

    pub fn with_nullable(&self, nullable: bool) -> Self {
        Self {
            nullable,
            ..self.clone()
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Ordered output columns of a relational node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowType {
    fields: Vec<Field>,
}

impl RowType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Position of the first column with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Concatenate two row types, as a join does.
    pub fn concat(&self, other: &RowType) -> RowType {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        RowType { fields }
    }

    /// Mark every field nullable (the null-generating side of an outer join).
    pub fn to_nullable(&self) -> RowType {
        RowType {
            fields: self.fields.iter().map(|f| f.with_nullable(true)).collect(),
        }
    }

    /// Select a subset of columns by position.
    pub fn project(&self, indexes: &[usize]) -> Option<RowType> {
        indexes
            .iter()
            .map(|&i| self.fields.get(i).cloned())
            .collect::<Option<Vec<_>>>()
            .map(RowType::new)
    }

    /// Same types and nullability, names ignored.
    pub fn equal_ignoring_names(&self, other: &RowType) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.data_type == b.data_type && a.nullable == b.nullable)
    }
}

impl FromIterator<Field> for RowType {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        RowType::new(iter.into_iter().collect())
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "]")
    }
}
