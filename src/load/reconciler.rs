use super::retry::{with_retry, RetryPolicy};
use crate::error::Error;
use crate::flatten::{FlatRow, RowSet};
use crate::schema::{conform, SchemaPlan};
use crate::table::{StorageMode, TableRef};
use crate::warehouse::{Operation, Warehouse, WarehouseError};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Progress of one table load. The last three states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Planned,
    SchemaApplied,
    Staged,
    Committed,
    Failed,
    RolledBack,
}

impl LoadState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::Planned => "planned",
            LoadState::SchemaApplied => "schema_applied",
            LoadState::Staged => "staged",
            LoadState::Committed => "committed",
            LoadState::Failed => "failed",
            LoadState::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoadState::Committed | LoadState::Failed | LoadState::RolledBack
        )
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub table: TableRef,
    pub mode: StorageMode,
    pub state: LoadState,
    pub rows_written: usize,
    pub columns_added: Vec<String>,
    /// Staging table used by a replace
    pub staging_table: Option<TableRef>,
}

/// A load that ended in `Failed` or `RolledBack`
#[derive(Debug, Error)]
#[error("load into {table} {state}: {source}")]
pub struct LoadError {
    pub table: TableRef,
    pub state: LoadState,
    #[source]
    pub source: Error,
}

impl LoadError {
    fn new(table: &TableRef, state: LoadState, source: Error) -> Self {
        LoadError {
            table: table.clone(),
            state,
            source,
        }
    }
}

/// Staging-table drops started by abandoned replace loads. Clones share one
/// set, and [`StagingCleanups::wait`] returns once every drop has finished.
#[derive(Debug, Clone, Default)]
pub struct StagingCleanups {
    pending: Arc<Mutex<PendingDrops>>,
}

/// Tasks still running when the last handle goes away are detached, not aborted
#[derive(Debug, Default)]
struct PendingDrops(JoinSet<()>);

impl Drop for PendingDrops {
    fn drop(&mut self) {
        self.0.detach_all();
    }
}

impl StagingCleanups {
    fn pending(&self) -> MutexGuard<'_, PendingDrops> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.pending().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every drop started so far, including ones started while waiting.
    pub async fn wait(&self) {
        loop {
            let mut drops = PendingDrops(std::mem::take(&mut self.pending().0));
            if drops.0.is_empty() {
                return;
            }
            while let Some(joined) = drops.0.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "staging cleanup task did not finish");
                }
            }
        }
    }
}

/// Drops the staging table if the load is abandoned before it finishes.
struct StagingGuard {
    warehouse: Arc<dyn Warehouse>,
    table: TableRef,
    cleanups: StagingCleanups,
    armed: bool,
}

impl StagingGuard {
    fn new(warehouse: Arc<dyn Warehouse>, table: TableRef, cleanups: StagingCleanups) -> Self {
        StagingGuard {
            warehouse,
            table,
            cleanups,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let table = self.table.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(staging = %table, "load abandoned, dropping staging table");
                let warehouse = Arc::clone(&self.warehouse);
                let drop_staging = async move {
                    if let Err(err) = warehouse.drop_table(&table).await {
                        warn!(staging = %table, error = %err, "failed to drop abandoned staging table");
                    }
                };
                self.cleanups.pending().0.spawn_on(drop_staging, &handle);
            }
            Err(_) => {
                warn!(staging = %table, "load abandoned outside a runtime, staging table left behind");
            }
        }
    }
}

/// `<table>__staging_<8 hex>`
pub fn staging_table(target: &TableRef) -> TableRef {
    let suffix = Uuid::new_v4().simple().to_string();
    target.with_table(format!("{}__staging_{}", target.table, &suffix[..8]))
}

/// Applies a [`SchemaPlan`] and writes a row-set according to the storage mode
pub struct LoadReconciler {
    warehouse: Arc<dyn Warehouse>,
    retry: RetryPolicy,
    cleanups: StagingCleanups,
}

impl LoadReconciler {
    pub fn new(warehouse: Arc<dyn Warehouse>, retry: RetryPolicy) -> Self {
        LoadReconciler {
            warehouse,
            retry,
            cleanups: StagingCleanups::default(),
        }
    }

    /// Record staging drops of abandoned loads in `cleanups`.
    pub fn with_cleanups(mut self, cleanups: StagingCleanups) -> Self {
        self.cleanups = cleanups;
        self
    }

    pub fn cleanups(&self) -> &StagingCleanups {
        &self.cleanups
    }

    pub async fn load(
        &self,
        rows: &RowSet,
        plan: &SchemaPlan,
        target: &TableRef,
        mode: StorageMode,
    ) -> Result<LoadResult, LoadError> {
        debug!(
            table = %target,
            mode = %mode,
            rows = rows.len(),
            state = %LoadState::Planned,
            "load planned"
        );
        self.check(rows, plan, target, mode)
            .map_err(|source| LoadError::new(target, LoadState::Failed, source))?;

        match mode {
            StorageMode::Append => self.append(rows, plan, target).await,
            StorageMode::Replace => self.replace(rows, plan, target).await,
        }
    }

    fn check(
        &self,
        rows: &RowSet,
        plan: &SchemaPlan,
        target: &TableRef,
        mode: StorageMode,
    ) -> Result<(), Error> {
        if plan.mode != mode {
            return Err(Error::InvalidPlan(format!(
                "plan was built for {} but the load is {}",
                plan.mode, mode
            )));
        }
        if !plan.compatible {
            return Err(Error::SchemaConflict {
                table: target.to_string(),
                conflicts: plan.conflicts.clone(),
            });
        }
        if rows.is_empty() {
            return Err(Error::EmptyRowSet {
                table: target.to_string(),
            });
        }
        Ok(())
    }

    async fn append(
        &self,
        rows: &RowSet,
        plan: &SchemaPlan,
        target: &TableRef,
    ) -> Result<LoadResult, LoadError> {
        let failed = |source| LoadError::new(target, LoadState::Failed, source);

        if !plan.existing_found {
            self.call(Operation::CreateTable, || {
                self.warehouse.create_table(target, &plan.target)
            })
            .await
            .map_err(failed)?;
        } else if !plan.additions.is_empty() {
            self.call(Operation::AddColumns, || {
                self.warehouse.add_columns(target, &plan.additions)
            })
            .await
            .map_err(failed)?;
        }
        debug!(
            table = %target,
            state = %LoadState::SchemaApplied,
            columns_added = plan.additions.len(),
            "schema applied"
        );

        let conformed = conform_rows(rows, plan);
        self.call(Operation::WriteRows, || {
            self.warehouse.write_rows(target, &plan.target, &conformed)
        })
        .await
        .map_err(failed)?;

        info!(table = %target, mode = "append", rows = conformed.len(), "load committed");
        Ok(LoadResult {
            table: target.clone(),
            mode: StorageMode::Append,
            state: LoadState::Committed,
            rows_written: conformed.len(),
            columns_added: plan.addition_names(),
            staging_table: None,
        })
    }

    async fn replace(
        &self,
        rows: &RowSet,
        plan: &SchemaPlan,
        target: &TableRef,
    ) -> Result<LoadResult, LoadError> {
        let staging = staging_table(target);
        let mut guard = StagingGuard::new(
            Arc::clone(&self.warehouse),
            staging.clone(),
            self.cleanups.clone(),
        );

        match self.stage_and_swap(rows, plan, target, &staging).await {
            Ok(written) => {
                guard.disarm();
                info!(
                    table = %target,
                    mode = "replace",
                    rows = written,
                    staging = %staging,
                    "load committed"
                );
                Ok(LoadResult {
                    table: target.clone(),
                    mode: StorageMode::Replace,
                    state: LoadState::Committed,
                    rows_written: written,
                    columns_added: plan.addition_names(),
                    staging_table: Some(staging),
                })
            }
            Err((reached, source)) => {
                warn!(
                    table = %target,
                    staging = %staging,
                    state = %reached,
                    error = %source,
                    "replace failed, rolling back"
                );
                // The guard stays armed until the drop finishes
                if let Err(err) = self
                    .call(Operation::DropTable, || self.warehouse.drop_table(&staging))
                    .await
                {
                    warn!(staging = %staging, error = %err, "failed to drop staging table");
                }
                guard.disarm();
                Err(LoadError::new(target, LoadState::RolledBack, source))
            }
        }
    }

    /// Stage the rows and rename over the target. On failure reports the
    /// last state reached.
    async fn stage_and_swap(
        &self,
        rows: &RowSet,
        plan: &SchemaPlan,
        target: &TableRef,
        staging: &TableRef,
    ) -> Result<usize, (LoadState, Error)> {
        let mut reached = LoadState::Planned;

        self.call(Operation::CreateTable, || {
            self.warehouse.create_table(staging, &plan.target)
        })
        .await
        .map_err(|e| (reached, e))?;
        reached = LoadState::SchemaApplied;
        debug!(table = %target, staging = %staging, state = %reached, "staging table created");

        let conformed = conform_rows(rows, plan);
        self.call(Operation::WriteRows, || {
            self.warehouse.write_rows(staging, &plan.target, &conformed)
        })
        .await
        .map_err(|e| (reached, e))?;
        reached = LoadState::Staged;
        debug!(table = %target, staging = %staging, state = %reached, rows = conformed.len(), "rows staged");

        self.validate(staging, plan, conformed.len())
            .await
            .map_err(|e| (reached, e))?;

        self.call(Operation::RenameTable, || {
            self.warehouse.rename_table(staging, target)
        })
        .await
        .map_err(|e| (reached, e))?;

        Ok(conformed.len())
    }

    async fn validate(&self, staging: &TableRef, plan: &SchemaPlan, expected: usize) -> Result<(), Error> {
        let count = self
            .call(Operation::RowCount, || self.warehouse.row_count(staging))
            .await?;
        if count != expected as u64 {
            return Err(Error::StagingValidation {
                table: staging.to_string(),
                detail: format!("expected {expected} rows, found {count}"),
            });
        }

        let schema = self
            .call(Operation::GetSchema, || self.warehouse.get_schema(staging))
            .await?;
        match schema {
            Some(schema) if schema.names() == plan.target.names() => Ok(()),
            Some(schema) => Err(Error::StagingValidation {
                table: staging.to_string(),
                detail: format!(
                    "columns {:?} do not match planned {:?}",
                    schema.names(),
                    plan.target.names()
                ),
            }),
            None => Err(Error::StagingValidation {
                table: staging.to_string(),
                detail: "staging table is missing".into(),
            }),
        }
    }

    async fn call<T, F, Fut>(&self, operation: Operation, op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WarehouseError>>,
    {
        with_retry(&self.retry, operation.as_str(), op)
            .await
            .map_err(Error::from)
    }
}

fn conform_rows(rows: &RowSet, plan: &SchemaPlan) -> Vec<FlatRow> {
    rows.rows.iter().map(|row| conform(row, &plan.target)).collect()
}
