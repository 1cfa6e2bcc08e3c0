//! Warehouse contract and the bundled implementations.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlWarehouse;
pub use memory::{MemoryWarehouse, StoredTable};

use crate::flatten::FlatRow;
use crate::schema::{ColumnDef, ColumnSchema};
use crate::table::TableRef;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    /// Network, quota or contention problems worth retrying
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl WarehouseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WarehouseError::Transient(_))
    }

    pub(crate) fn from_io(err: std::io::Error, context: impl fmt::Display) -> Self {
        use std::io::ErrorKind;
        let message = format!("{context}: {err}");
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                WarehouseError::Transient(message)
            }
            _ => WarehouseError::Permanent(message),
        }
    }

    pub(crate) fn not_found(table: &TableRef) -> Self {
        WarehouseError::Permanent(format!("table {table} does not exist"))
    }
}

/// Storage the loader writes into. Every call is a suspension point and may
/// fail transiently.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Current schema, or `None` when the table does not exist.
    async fn get_schema(&self, table: &TableRef) -> Result<Option<ColumnSchema>, WarehouseError>;

    async fn create_table(&self, table: &TableRef, schema: &ColumnSchema)
        -> Result<(), WarehouseError>;

    /// Add nullable columns. Existing rows read the new columns as null.
    async fn add_columns(&self, table: &TableRef, columns: &[ColumnDef])
        -> Result<(), WarehouseError>;

    /// Append rows already conformed to `schema`.
    async fn write_rows(
        &self,
        table: &TableRef,
        schema: &ColumnSchema,
        rows: &[FlatRow],
    ) -> Result<(), WarehouseError>;

    async fn row_count(&self, table: &TableRef) -> Result<u64, WarehouseError>;

    /// Atomically move `from` onto `to`, replacing whatever `to` held.
    async fn rename_table(&self, from: &TableRef, to: &TableRef) -> Result<(), WarehouseError>;

    /// Drop a table. Dropping a missing table succeeds.
    async fn drop_table(&self, table: &TableRef) -> Result<(), WarehouseError>;
}

/// Warehouse operations, used for retry labels and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSchema,
    CreateTable,
    AddColumns,
    WriteRows,
    RowCount,
    RenameTable,
    DropTable,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GetSchema => "get_schema",
            Operation::CreateTable => "create_table",
            Operation::AddColumns => "add_columns",
            Operation::WriteRows => "write_rows",
            Operation::RowCount => "row_count",
            Operation::RenameTable => "rename_table",
            Operation::DropTable => "drop_table",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject rows holding columns the schema does not define.
pub(crate) fn check_rows(
    table: &TableRef,
    schema: &ColumnSchema,
    rows: &[FlatRow],
) -> Result<(), WarehouseError> {
    for row in rows {
        if let Some(unknown) = row.column_names().find(|name| !schema.contains(name)) {
            return Err(WarehouseError::Permanent(format!(
                "table {table} has no column `{unknown}`"
            )));
        }
    }
    Ok(())
}
