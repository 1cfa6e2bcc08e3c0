//! Streaming column-schema inference.
//!
//! Rows are folded into per-column statistics one at a time and the schema is
//! built once at the end, so inference never holds more than the counters.

use super::types::{ColumnDef, ColumnSchema, DataKind};
use crate::flatten::{FlatRow, RowSet};
use std::collections::HashMap;

/// Statistics accumulated for one column
#[derive(Debug, Default)]
struct ColumnStats {
    // Count of each non-null kind seen
    kind_counts: HashMap<DataKind, usize>,
    null_count: usize,
    // Rows that carried the column at all
    present_count: usize,
}

impl ColumnStats {
    fn add_value(&mut self, value: &crate::flatten::Scalar) {
        self.present_count += 1;
        match DataKind::of(value) {
            Some(kind) => *self.kind_counts.entry(kind).or_insert(0) += 1,
            None => self.null_count += 1,
        }
    }

    fn kind(&self) -> Option<DataKind> {
        self.kind_counts.keys().copied().reduce(DataKind::widen)
    }
}

/// Accumulates rows and builds their [`ColumnSchema`]
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<(String, ColumnStats)>,
    index: HashMap<String, usize>,
    row_count: usize,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        SchemaBuilder::default()
    }

    /// Add a row, accumulating statistics for each of its columns
    pub fn add_row(&mut self, row: &FlatRow) {
        self.row_count += 1;
        for (name, value) in row.iter() {
            let slot = match self.index.get(name) {
                Some(&slot) => slot,
                None => {
                    self.columns.push((name.to_string(), ColumnStats::default()));
                    self.index.insert(name.to_string(), self.columns.len() - 1);
                    self.columns.len() - 1
                }
            };
            self.columns[slot].1.add_value(value);
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Build the final schema. Columns keep first-seen order.
    pub fn build(self) -> ColumnSchema {
        let row_count = self.row_count;
        self.columns
            .into_iter()
            .map(|(name, stats)| {
                let nullable = stats.null_count > 0 || stats.present_count < row_count;
                match stats.kind() {
                    Some(kind) => ColumnDef::new(name, kind, nullable),
                    None => ColumnDef {
                        name,
                        kind: DataKind::String,
                        nullable: true,
                        defaulted: true,
                    },
                }
            })
            .collect()
    }
}

/// Infer the schema of a row-set
pub fn infer(rows: &RowSet) -> ColumnSchema {
    let mut builder = SchemaBuilder::new();
    for row in &rows.rows {
        builder.add_row(row);
    }
    builder.build()
}
