use crate::flatten::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column type in the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataKind {
    Integer,
    Float,
    Boolean,
    String,
    Timestamp,
}

impl DataKind {
    /// Kind of a single value, `None` for null.
    pub fn of(value: &Scalar) -> Option<DataKind> {
        match value {
            Scalar::Null => None,
            Scalar::Bool(_) => Some(DataKind::Boolean),
            Scalar::Number(n) if n.is_i64() => Some(DataKind::Integer),
            Scalar::Number(_) => Some(DataKind::Float),
            Scalar::String(_) => Some(DataKind::String),
            Scalar::Timestamp(_) => Some(DataKind::Timestamp),
        }
    }

    /// Narrowest kind able to hold values of both kinds.
    pub fn widen(self, other: DataKind) -> DataKind {
        match (self, other) {
            (a, b) if a == b => a,
            (DataKind::Integer, DataKind::Float) | (DataKind::Float, DataKind::Integer) => {
                DataKind::Float
            }
            _ => DataKind::String,
        }
    }

    /// Whether a column of this kind holds `incoming` values without narrowing.
    pub fn accepts(self, incoming: DataKind) -> bool {
        self.widen(incoming) == self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Integer => "INTEGER",
            DataKind::Float => "FLOAT",
            DataKind::Boolean => "BOOLEAN",
            DataKind::String => "STRING",
            DataKind::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: DataKind,
    pub nullable: bool,
    /// No non-null value was seen, so `kind` is a default rather than evidence
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub defaulted: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: DataKind, nullable: bool) -> Self {
        ColumnDef {
            name: name.into(),
            kind,
            nullable,
            defaulted: false,
        }
    }

    pub fn nullable(name: impl Into<String>, kind: DataKind) -> Self {
        ColumnDef::new(name, kind, true)
    }

    pub fn required(name: impl Into<String>, kind: DataKind) -> Self {
        ColumnDef::new(name, kind, false)
    }
}

/// Ordered column definitions, unique by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSchema {
    columns: Vec<ColumnDef>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let mut schema = ColumnSchema::default();
        for column in columns {
            schema.push(column);
        }
        schema
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add a column, replacing any column with the same name in place.
    pub fn push(&mut self, column: ColumnDef) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => *slot = column,
            None => self.columns.push(column),
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<ColumnDef> for ColumnSchema {
    fn from_iter<I: IntoIterator<Item = ColumnDef>>(iter: I) -> Self {
        ColumnSchema::new(iter.into_iter().collect())
    }
}

/// Why an append cannot go ahead without changing the existing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "conflict", rename_all = "snake_case")]
pub enum SchemaConflict {
    /// Incoming values are wider than the existing column
    Kind {
        column: String,
        existing: DataKind,
        incoming: DataKind,
    },
    /// A required column would receive nulls
    Nullability { column: String },
}

impl SchemaConflict {
    pub fn column(&self) -> &str {
        match self {
            SchemaConflict::Kind { column, .. } | SchemaConflict::Nullability { column } => column,
        }
    }
}

impl fmt::Display for SchemaConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaConflict::Kind {
                column,
                existing,
                incoming,
            } => write!(
                f,
                "column `{column}` is {existing} but incoming values are {incoming}"
            ),
            SchemaConflict::Nullability { column } => {
                write!(f, "column `{column}` is REQUIRED but incoming rows leave it null")
            }
        }
    }
}
