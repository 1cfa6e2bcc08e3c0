//! Nested JSON to named row-sets.

pub mod flattener;
pub mod timestamp;
pub mod types;

pub use flattener::Flattener;
pub use types::{FlatRow, FlattenConfig, RowSet, Scalar, Tables, SERVER_TIMESTAMP};

use crate::error::Result;
use serde_json::Value;
use std::io::BufRead;

/// Flatten newline-delimited JSON documents into one set of tables.
/// Blank lines are skipped.
pub fn flatten_lines<R: BufRead>(
    reader: R,
    flattener: &Flattener,
    root_table: &str,
) -> Result<Tables> {
    let mut tables = Tables::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document: Value = serde_json::from_str(&line)?;
        merge_tables(&mut tables, flattener.flatten(&document, root_table, None)?);
    }

    Ok(tables)
}

/// Append the rows of `other` onto `tables`, table by table.
pub fn merge_tables(tables: &mut Tables, other: Tables) {
    for (name, set) in other {
        match tables.get_mut(&name) {
            Some(existing) => existing.rows.extend(set.rows),
            None => {
                tables.insert(name, set);
            }
        }
    }
}
