use super::{check_rows, Warehouse, WarehouseError};
use crate::flatten::FlatRow;
use crate::schema::{ColumnDef, ColumnSchema};
use crate::table::TableRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// First line of every table file
#[derive(Debug, Serialize, Deserialize)]
struct Header {
    schema: ColumnSchema,
}

/// Warehouse backed by a directory of JSON Lines files, one per table.
///
/// Every mutation writes a sibling temp file and renames it into place, so a
/// reader sees either the old file or the new one. Mutations of one table are
/// serialized by a per-table lock shared between clones.
#[derive(Debug, Clone)]
pub struct JsonlWarehouse {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<TableRef, Arc<Mutex<()>>>>>,
}

impl JsonlWarehouse {
    /// Open a warehouse rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, WarehouseError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| WarehouseError::from_io(e, format!("creating {}", root.display())))?;
        Ok(JsonlWarehouse {
            root,
            locks: Arc::default(),
        })
    }

    /// Hold this while reading and rewriting a table file.
    async fn lock(&self, table: &TableRef) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(table.clone()).or_default().clone();
        lock.lock_owned().await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &TableRef) -> PathBuf {
        self.root.join(format!("{table}.jsonl"))
    }

    fn temp_path(&self, table: &TableRef) -> PathBuf {
        self.root
            .join(format!(".{table}.jsonl.{}.tmp", Uuid::new_v4().simple()))
    }

    /// Rows of a table as JSON objects, for inspection.
    pub async fn read_rows(&self, table: &TableRef) -> Result<Vec<Map<String, Value>>, WarehouseError> {
        let contents = self.read_table(table).await?;
        contents
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    WarehouseError::Permanent(format!("corrupt row in {table}: {e}"))
                })
            })
            .collect()
    }

    async fn read_table(&self, table: &TableRef) -> Result<String, WarehouseError> {
        let path = self.table_path(table);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(WarehouseError::not_found(table)),
            Err(e) => Err(WarehouseError::from_io(e, format!("reading {}", path.display()))),
        }
    }

    async fn exists(&self, table: &TableRef) -> Result<bool, WarehouseError> {
        let path = self.table_path(table);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| WarehouseError::from_io(e, format!("checking {}", path.display())))
    }

    /// Write `contents` to a temp file and rename it over the table file.
    async fn replace_contents(&self, table: &TableRef, contents: &str) -> Result<(), WarehouseError> {
        let temp = self.temp_path(table);
        if let Err(e) = tokio::fs::write(&temp, contents).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(WarehouseError::from_io(e, format!("writing {}", temp.display())));
        }
        let path = self.table_path(table);
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(WarehouseError::from_io(e, format!("replacing {}", path.display())));
        }
        debug!(table = %table, bytes = contents.len(), "table file replaced");
        Ok(())
    }
}

fn split_header<'a>(table: &TableRef, contents: &'a str) -> Result<(ColumnSchema, &'a str), WarehouseError> {
    let (first, rest) = contents.split_once('\n').unwrap_or((contents, ""));
    let header: Header = serde_json::from_str(first)
        .map_err(|e| WarehouseError::Permanent(format!("corrupt header in {table}: {e}")))?;
    Ok((header.schema, rest))
}

fn header_line(schema: &ColumnSchema) -> Result<String, WarehouseError> {
    serde_json::to_string(&Header {
        schema: schema.clone(),
    })
    .map_err(|e| WarehouseError::Permanent(format!("serializing schema: {e}")))
}

#[async_trait]
impl Warehouse for JsonlWarehouse {
    async fn get_schema(&self, table: &TableRef) -> Result<Option<ColumnSchema>, WarehouseError> {
        if !self.exists(table).await? {
            return Ok(None);
        }
        let contents = self.read_table(table).await?;
        split_header(table, &contents).map(|(schema, _)| Some(schema))
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &ColumnSchema,
    ) -> Result<(), WarehouseError> {
        let _guard = self.lock(table).await;
        if self.exists(table).await? {
            return Err(WarehouseError::Permanent(format!("table {table} already exists")));
        }
        let mut contents = header_line(schema)?;
        contents.push('\n');
        self.replace_contents(table, &contents).await
    }

    async fn add_columns(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
    ) -> Result<(), WarehouseError> {
        let _guard = self.lock(table).await;
        let contents = self.read_table(table).await?;
        let (mut schema, rows) = split_header(table, &contents)?;
        for column in columns {
            if schema.contains(&column.name) {
                return Err(WarehouseError::Permanent(format!(
                    "table {table} already has column `{}`",
                    column.name
                )));
            }
            schema.push(ColumnDef {
                nullable: true,
                ..column.clone()
            });
        }

        let mut updated = header_line(&schema)?;
        updated.push('\n');
        updated.push_str(rows);
        self.replace_contents(table, &updated).await
    }

    async fn write_rows(
        &self,
        table: &TableRef,
        _schema: &ColumnSchema,
        rows: &[FlatRow],
    ) -> Result<(), WarehouseError> {
        let _guard = self.lock(table).await;
        let mut contents = self.read_table(table).await?;
        let (stored, _) = split_header(table, &contents)?;
        check_rows(table, &stored, rows)?;

        if !contents.ends_with('\n') {
            contents.push('\n');
        }
        for row in rows {
            let line = serde_json::to_string(row)
                .map_err(|e| WarehouseError::Permanent(format!("serializing row: {e}")))?;
            contents.push_str(&line);
            contents.push('\n');
        }
        self.replace_contents(table, &contents).await
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64, WarehouseError> {
        let contents = self.read_table(table).await?;
        let count = contents
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .count();
        Ok(count as u64)
    }

    async fn rename_table(&self, from: &TableRef, to: &TableRef) -> Result<(), WarehouseError> {
        // Fixed order so two opposite renames cannot deadlock
        let (first, second) = if from <= to { (from, to) } else { (to, from) };
        let _first = self.lock(first).await;
        let _second = if first != second {
            Some(self.lock(second).await)
        } else {
            None
        };
        if !self.exists(from).await? {
            return Err(WarehouseError::not_found(from));
        }
        let (source, target) = (self.table_path(from), self.table_path(to));
        tokio::fs::rename(&source, &target).await.map_err(|e| {
            WarehouseError::from_io(e, format!("renaming {} to {}", source.display(), target.display()))
        })
    }

    async fn drop_table(&self, table: &TableRef) -> Result<(), WarehouseError> {
        let _guard = self.lock(table).await;
        let path = self.table_path(table);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WarehouseError::from_io(e, format!("removing {}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::Scalar;
    use crate::schema::DataKind;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnDef::nullable("id", DataKind::Integer),
            ColumnDef::nullable("at", DataKind::Timestamp),
        ])
    }

    fn row(id: i64) -> FlatRow {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        vec![
            ("id".to_string(), Scalar::from(id)),
            ("at".to_string(), Scalar::from(at)),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_table_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let t = TableRef::new("p", "d", "events");

        assert_eq!(wh.get_schema(&t).await.unwrap(), None);
        wh.create_table(&t, &schema()).await.unwrap();
        assert!(wh.table_path(&t).ends_with("p.d.events.jsonl"));
        assert_eq!(wh.get_schema(&t).await.unwrap(), Some(schema()));

        wh.write_rows(&t, &schema(), &[row(1), row(2)]).await.unwrap();
        wh.write_rows(&t, &schema(), &[row(3)]).await.unwrap();
        assert_eq!(wh.row_count(&t).await.unwrap(), 3);

        let rows = wh.read_rows(&t).await.unwrap();
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"id": 1, "at": "2024-01-01T00:00:00Z"})
        );
    }

    #[tokio::test]
    async fn test_add_columns_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let t = TableRef::new("p", "d", "events");
        wh.create_table(&t, &schema()).await.unwrap();
        wh.write_rows(&t, &schema(), &[row(1)]).await.unwrap();

        wh.add_columns(&t, &[ColumnDef::required("extra", DataKind::String)])
            .await
            .unwrap();

        let stored = wh.get_schema(&t).await.unwrap().unwrap();
        assert_eq!(stored.names(), vec!["id", "at", "extra"]);
        assert!(stored.get("extra").unwrap().nullable);
        assert_eq!(wh.row_count(&t).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rename_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let target = TableRef::new("p", "d", "members");
        let staging = target.with_table("members__staging_0001");

        wh.create_table(&target, &schema()).await.unwrap();
        wh.write_rows(&target, &schema(), &[row(1)]).await.unwrap();
        wh.create_table(&staging, &schema()).await.unwrap();
        wh.write_rows(&staging, &schema(), &[row(7), row(8)]).await.unwrap();

        wh.rename_table(&staging, &target).await.unwrap();
        assert_eq!(wh.row_count(&target).await.unwrap(), 2);
        assert_eq!(wh.get_schema(&staging).await.unwrap(), None);

        wh.drop_table(&target).await.unwrap();
        wh.drop_table(&target).await.unwrap();
        assert_eq!(wh.get_schema(&target).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let t = TableRef::new("p", "d", "t");
        wh.create_table(&t, &schema()).await.unwrap();
        wh.write_rows(&t, &schema(), &[row(1)]).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["p.d.t.jsonl".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_keep_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let t = TableRef::new("p", "d", "shared");
        wh.create_table(&t, &schema()).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for id in 0..32 {
            let (wh, t) = (wh.clone(), t.clone());
            tasks.spawn(async move { wh.write_rows(&t, &schema(), &[row(id)]).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(wh.row_count(&t).await.unwrap(), 32);
        let mut ids: Vec<i64> = wh
            .read_rows(&t)
            .await
            .unwrap()
            .iter()
            .map(|row| row["id"].as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_add_columns_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let t = TableRef::new("p", "d", "widening");
        wh.create_table(&t, &schema()).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for id in 0..8 {
            let (wh, t) = (wh.clone(), t.clone());
            tasks.spawn(async move {
                wh.add_columns(&t, &[ColumnDef::nullable(format!("c{id}"), DataKind::String)])
                    .await?;
                wh.write_rows(&t, &schema(), &[row(id)]).await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let stored = wh.get_schema(&t).await.unwrap().unwrap();
        assert_eq!(stored.names().len(), 10);
        assert_eq!(wh.row_count(&t).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_missing_table_errors() {
        let dir = tempfile::tempdir().unwrap();
        let wh = JsonlWarehouse::open(dir.path()).await.unwrap();
        let t = TableRef::new("p", "d", "nope");

        assert!(wh.row_count(&t).await.is_err());
        assert!(wh.write_rows(&t, &schema(), &[row(1)]).await.is_err());
        assert!(wh.rename_table(&t, &t.with_table("other")).await.is_err());
    }
}
