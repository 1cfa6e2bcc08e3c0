//! Error types for endpoint runs.
//!
//! Every failure is scoped to a single endpoint run. [`Error::is_transient`]
//! decides whether an operation is worth retrying and [`Error::kind`] gives a
//! stable label for log lines.

use crate::fetch::FetchError;
use crate::load::LoadError;
use crate::schema::SchemaConflict;
use crate::warehouse::WarehouseError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("column `{column}` is produced by both `{first}` and `{second}`")]
    FlattenConflict {
        column: String,
        first: String,
        second: String,
    },

    #[error("schema conflict on {table}: {}", join_conflicts(.conflicts))]
    SchemaConflict {
        table: String,
        conflicts: Vec<SchemaConflict>,
    },

    #[error("load plan does not match request: {0}")]
    InvalidPlan(String),

    #[error("no rows to load into {table}")]
    EmptyRowSet { table: String },

    #[error("staging table {table} failed validation: {detail}")]
    StagingValidation { table: String, detail: String },

    #[error("transient warehouse error: {0}")]
    TransientWarehouse(String),

    #[error("warehouse error: {0}")]
    PermanentWarehouse(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Load(Box<LoadError>),

    #[error("run timed out after {0:?}")]
    Timeout(Duration),

    #[error("endpoint task aborted: {0}")]
    TaskAborted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable snake_case label used in log fields and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidDocument(_) => "invalid_document",
            Error::FlattenConflict { .. } => "flatten_conflict",
            Error::SchemaConflict { .. } => "schema_conflict",
            Error::InvalidPlan(_) => "invalid_plan",
            Error::EmptyRowSet { .. } => "empty_row_set",
            Error::StagingValidation { .. } => "staging_validation",
            Error::TransientWarehouse(_) => "transient_warehouse",
            Error::PermanentWarehouse(_) => "permanent_warehouse",
            Error::Fetch(FetchError::Transient(_)) => "fetch_transient",
            Error::Fetch(FetchError::Permanent(_)) => "fetch_permanent",
            Error::Load(err) => err.source.kind(),
            Error::Timeout(_) => "timeout",
            Error::TaskAborted(_) => "task_aborted",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientWarehouse(_) => true,
            Error::Fetch(err) => err.is_transient(),
            Error::Load(err) => err.source.is_transient(),
            _ => false,
        }
    }
}

impl From<WarehouseError> for Error {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Transient(msg) => Error::TransientWarehouse(msg),
            WarehouseError::Permanent(msg) => Error::PermanentWarehouse(msg),
        }
    }
}

impl From<LoadError> for Error {
    fn from(err: LoadError) -> Self {
        Error::Load(Box::new(err))
    }
}

fn join_conflicts(conflicts: &[SchemaConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
