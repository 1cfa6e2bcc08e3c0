use super::{check_rows, Operation, Warehouse, WarehouseError};
use crate::flatten::FlatRow;
use crate::schema::{ColumnDef, ColumnSchema};
use crate::table::TableRef;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredTable {
    pub schema: ColumnSchema,
    pub rows: Vec<FlatRow>,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(WarehouseError),
    Stall,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableRef, StoredTable>,
    faults: HashMap<Operation, VecDeque<Fault>>,
    calls: Vec<(Operation, TableRef)>,
}

/// In-process warehouse with scriptable failures
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        MemoryWarehouse::default()
    }

    /// Seed a table, replacing any existing one.
    pub async fn insert_table(&self, table: TableRef, stored: StoredTable) {
        self.state.lock().await.tables.insert(table, stored);
    }

    pub async fn table(&self, table: &TableRef) -> Option<StoredTable> {
        self.state.lock().await.tables.get(table).cloned()
    }

    /// All tables, sorted
    pub async fn table_refs(&self) -> Vec<TableRef> {
        let mut refs: Vec<TableRef> = self.state.lock().await.tables.keys().cloned().collect();
        refs.sort();
        refs
    }

    /// Make the next call of `operation` fail with `error`. Calls queue up.
    pub async fn fail_next(&self, operation: Operation, error: WarehouseError) {
        self.push_fault(operation, Fault::Fail(error)).await;
    }

    /// Make the next call of `operation` never complete.
    pub async fn stall_next(&self, operation: Operation) {
        self.push_fault(operation, Fault::Stall).await;
    }

    /// Every call made so far, in order
    pub async fn calls(&self) -> Vec<(Operation, TableRef)> {
        self.state.lock().await.calls.clone()
    }

    async fn push_fault(&self, operation: Operation, fault: Fault) {
        self.state
            .lock()
            .await
            .faults
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    async fn begin(
        &self,
        operation: Operation,
        table: &TableRef,
    ) -> Result<MutexGuard<'_, State>, WarehouseError> {
        let mut state = self.state.lock().await;
        state.calls.push((operation, table.clone()));
        match state.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            None => Ok(state),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Stall) => {
                drop(state);
                let never: Infallible = std::future::pending().await;
                match never {}
            }
        }
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn get_schema(&self, table: &TableRef) -> Result<Option<ColumnSchema>, WarehouseError> {
        let state = self.begin(Operation::GetSchema, table).await?;
        Ok(state.tables.get(table).map(|stored| stored.schema.clone()))
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &ColumnSchema,
    ) -> Result<(), WarehouseError> {
        let mut state = self.begin(Operation::CreateTable, table).await?;
        if state.tables.contains_key(table) {
            return Err(WarehouseError::Permanent(format!("table {table} already exists")));
        }
        state.tables.insert(
            table.clone(),
            StoredTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn add_columns(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
    ) -> Result<(), WarehouseError> {
        let mut state = self.begin(Operation::AddColumns, table).await?;
        let stored = state
            .tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::not_found(table))?;
        if let Some(dup) = columns.iter().find(|c| stored.schema.contains(&c.name)) {
            return Err(WarehouseError::Permanent(format!(
                "table {table} already has column `{}`",
                dup.name
            )));
        }
        for column in columns {
            stored.schema.push(ColumnDef {
                nullable: true,
                ..column.clone()
            });
        }
        Ok(())
    }

    async fn write_rows(
        &self,
        table: &TableRef,
        _schema: &ColumnSchema,
        rows: &[FlatRow],
    ) -> Result<(), WarehouseError> {
        let mut state = self.begin(Operation::WriteRows, table).await?;
        let stored = state
            .tables
            .get_mut(table)
            .ok_or_else(|| WarehouseError::not_found(table))?;
        check_rows(table, &stored.schema, rows)?;
        stored.rows.extend_from_slice(rows);
        Ok(())
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64, WarehouseError> {
        let state = self.begin(Operation::RowCount, table).await?;
        state
            .tables
            .get(table)
            .map(|stored| stored.rows.len() as u64)
            .ok_or_else(|| WarehouseError::not_found(table))
    }

    async fn rename_table(&self, from: &TableRef, to: &TableRef) -> Result<(), WarehouseError> {
        let mut state = self.begin(Operation::RenameTable, from).await?;
        let stored = state
            .tables
            .remove(from)
            .ok_or_else(|| WarehouseError::not_found(from))?;
        state.tables.insert(to.clone(), stored);
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> Result<(), WarehouseError> {
        let mut state = self.begin(Operation::DropTable, table).await?;
        state.tables.remove(table);
        Ok(())
    }
}
