//! Warehouse table identifiers and storage modes.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap()
});

/// Fully qualified warehouse table: `project.dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        TableRef {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Parse `table`, `dataset.table` or `project.dataset.table`, filling the
    /// missing leading parts from the defaults.
    pub fn parse_with_defaults(value: &str, project: &str, dataset: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split('.').collect();
        let table = match parts.as_slice() {
            [table] => TableRef::new(project, dataset, *table),
            [ds, table] => TableRef::new(project, *ds, *table),
            [proj, ds, table] => TableRef::new(*proj, *ds, *table),
            _ => {
                return Err(Error::Config(format!(
                    "invalid table id `{value}`, expected project.dataset.table"
                )))
            }
        };
        table.validate()?;
        Ok(table)
    }

    /// Same project and dataset, different table name.
    pub fn with_table(&self, table: impl Into<String>) -> Self {
        TableRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        for part in [&self.project, &self.dataset, &self.table] {
            if !IDENTIFIER_REGEX.is_match(part) {
                return Err(Error::Config(format!(
                    "invalid identifier `{part}` in table id `{self}`"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.split('.').count() != 3 {
            return Err(Error::Config(format!(
                "invalid table id `{s}`, expected project.dataset.table"
            )));
        }
        TableRef::parse_with_defaults(s, "", "")
    }
}

/// How a load reconciles new rows against the existing table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Add rows to the table, widening its schema with new columns
    #[default]
    Append,
    /// Atomically swap the table contents for the new rows
    Replace,
}

impl StorageMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::Append => "append",
            StorageMode::Replace => "replace",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "append" => Ok(StorageMode::Append),
            "replace" => Ok(StorageMode::Replace),
            other => Err(Error::Config(format!(
                "invalid storage mode `{other}`, must be `append` or `replace`"
            ))),
        }
    }
}
