//! Reconciling an incoming schema with the table that already exists.

use super::types::{ColumnDef, ColumnSchema, DataKind, SchemaConflict};
use crate::flatten::{FlatRow, Scalar};
use crate::table::StorageMode;
use serde::Serialize;
use serde_json::Number;

/// What a load has to do to the table schema, and whether it may proceed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaPlan {
    pub mode: StorageMode,
    pub existing_found: bool,
    /// Columns the table gains
    pub additions: Vec<ColumnDef>,
    /// Columns the table loses (replace only)
    pub removed: Vec<ColumnDef>,
    pub conflicts: Vec<SchemaConflict>,
    /// Schema of the table once the load commits
    pub target: ColumnSchema,
    pub compatible: bool,
}

impl SchemaPlan {
    pub fn reconcile(
        existing: Option<&ColumnSchema>,
        incoming: &ColumnSchema,
        mode: StorageMode,
    ) -> Self {
        match (existing, mode) {
            (None, _) => SchemaPlan::create(incoming, mode),
            (Some(existing), StorageMode::Append) => SchemaPlan::append(existing, incoming),
            (Some(existing), StorageMode::Replace) => SchemaPlan::replace(existing, incoming),
        }
    }

    fn create(incoming: &ColumnSchema, mode: StorageMode) -> Self {
        let target: ColumnSchema = incoming.iter().map(as_nullable).collect();
        SchemaPlan {
            mode,
            existing_found: false,
            additions: target.columns().to_vec(),
            removed: Vec::new(),
            conflicts: Vec::new(),
            target,
            compatible: true,
        }
    }

    fn append(existing: &ColumnSchema, incoming: &ColumnSchema) -> Self {
        let mut conflicts = Vec::new();

        for column in existing.iter() {
            match incoming.get(&column.name) {
                Some(inc) => {
                    if !inc.defaulted && !column.kind.accepts(inc.kind) {
                        conflicts.push(SchemaConflict::Kind {
                            column: column.name.clone(),
                            existing: column.kind,
                            incoming: inc.kind,
                        });
                    }
                    if !column.nullable && inc.nullable {
                        conflicts.push(SchemaConflict::Nullability {
                            column: column.name.clone(),
                        });
                    }
                }
                None if !column.nullable => conflicts.push(SchemaConflict::Nullability {
                    column: column.name.clone(),
                }),
                None => {}
            }
        }

        let additions: Vec<ColumnDef> = incoming
            .iter()
            .filter(|column| !existing.contains(&column.name))
            .map(as_nullable)
            .collect();

        let mut target = existing.clone();
        for column in &additions {
            target.push(column.clone());
        }

        SchemaPlan {
            mode: StorageMode::Append,
            existing_found: true,
            additions,
            removed: Vec::new(),
            compatible: conflicts.is_empty(),
            conflicts,
            target,
        }
    }

    fn replace(existing: &ColumnSchema, incoming: &ColumnSchema) -> Self {
        let target: ColumnSchema = incoming.iter().map(as_nullable).collect();
        let additions = target
            .iter()
            .filter(|column| !existing.contains(&column.name))
            .cloned()
            .collect();
        let removed = existing
            .iter()
            .filter(|column| !target.contains(&column.name))
            .cloned()
            .collect();

        SchemaPlan {
            mode: StorageMode::Replace,
            existing_found: true,
            additions,
            removed,
            conflicts: Vec::new(),
            target,
            compatible: true,
        }
    }

    pub fn addition_names(&self) -> Vec<String> {
        self.additions.iter().map(|c| c.name.clone()).collect()
    }
}

/// Free-function form of [`SchemaPlan::reconcile`]
pub fn reconcile(
    existing: Option<&ColumnSchema>,
    incoming: &ColumnSchema,
    mode: StorageMode,
) -> SchemaPlan {
    SchemaPlan::reconcile(existing, incoming, mode)
}

// Tables created by a load accept nulls everywhere, so a later batch that
// lacks a column still appends cleanly.
fn as_nullable(column: &ColumnDef) -> ColumnDef {
    ColumnDef {
        nullable: true,
        ..column.clone()
    }
}

/// Convert a value to the kind of the column it is written into.
pub fn coerce(value: &Scalar, kind: DataKind) -> Scalar {
    match (value, kind) {
        (Scalar::Null, _) => Scalar::Null,
        (Scalar::Number(n), DataKind::Float) if !n.is_f64() => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Scalar::Number)
            .unwrap_or_else(|| value.clone()),
        (Scalar::String(_), DataKind::String) => value.clone(),
        (_, DataKind::String) => Scalar::String(value.render()),
        _ => value.clone(),
    }
}

/// Lay `row` out in `schema` order, filling missing columns with null and
/// coercing every value to its column kind. Columns outside the schema are dropped.
pub fn conform(row: &FlatRow, schema: &ColumnSchema) -> FlatRow {
    schema
        .iter()
        .map(|column| {
            let value = row
                .get(&column.name)
                .map(|value| coerce(value, column.kind))
                .unwrap_or(Scalar::Null);
            (column.name.clone(), value)
        })
        .collect()
}
