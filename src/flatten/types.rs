use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Name of the synthetic fetch-time column on every row
pub const SERVER_TIMESTAMP: &str = "server_timestamp";

/// Row-sets produced by one flatten call, keyed by table name
pub type Tables = BTreeMap<String, RowSet>;

/// A single flattened cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    /// Kept as the parsed JSON number so integers and decimals survive untouched
    Number(Number),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    /// Convert a non-container JSON value. Arrays and objects return `None`.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            Value::String(s) => Some(Scalar::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Text form used for delimited lists and string coercion.
    /// Null renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
            Scalar::String(s) => s.clone(),
            Scalar::Timestamp(ts) => format_timestamp(ts),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::String(s) => Value::String(s.clone()),
            Scalar::Timestamp(ts) => Value::String(format_timestamp(ts)),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value.into())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(value: DateTime<Utc>) -> Self {
        Scalar::Timestamp(value)
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// One output row: column names in insertion order, each name at most once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    columns: Vec<(String, Scalar)>,
}

impl FlatRow {
    pub fn new() -> Self {
        FlatRow::default()
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| column == name)
    }

    /// Set a column. An existing column keeps its position and the old value
    /// is returned.
    pub fn insert(&mut self, name: impl Into<String>, value: Scalar) -> Option<Scalar> {
        let name = name.into();
        match self.columns.iter_mut().find(|(column, _)| *column == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.columns.push((name, value));
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_json(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

impl FromIterator<(String, Scalar)> for FlatRow {
    fn from_iter<I: IntoIterator<Item = (String, Scalar)>>(iter: I) -> Self {
        let mut row = FlatRow::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

impl IntoIterator for FlatRow {
    type Item = (String, Scalar);
    type IntoIter = std::vec::IntoIter<(String, Scalar)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl Serialize for FlatRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// All rows destined for one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSet {
    pub table: String,
    pub rows: Vec<FlatRow>,
}

impl RowSet {
    pub fn new(table: impl Into<String>) -> Self {
        RowSet {
            table: table.into(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: FlatRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of column names across rows, in first-seen order
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for row in &self.rows {
            for name in row.column_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// Configuration for flattening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenConfig {
    /// Separator between path segments in column and child table names
    pub separator: String,

    /// Delimiter used when joining arrays of scalars
    pub list_delimiter: String,

    /// Fields converted to timestamps, matched on column name or leaf key
    pub timestamp_fields: Vec<String>,

    /// Objects keyed by id that should be exploded like arrays of objects
    pub keyed_collections: Vec<String>,

    /// Column receiving the key of a keyed-collection entry
    pub collection_key_column: String,

    /// Deepest nesting accepted before the document is rejected
    pub max_depth: usize,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        FlattenConfig {
            separator: String::from("_"),
            list_delimiter: String::from(","),
            timestamp_fields: vec![],
            keyed_collections: vec![],
            collection_key_column: String::from("id"),
            max_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_insert_keeps_position() {
        let mut row = FlatRow::new();
        row.insert("a", Scalar::from(1));
        row.insert("b", Scalar::from(2));
        let old = row.insert("a", Scalar::from(3));

        assert_eq!(old, Some(Scalar::from(1)));
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.get("a"), Some(&Scalar::from(3)));
    }

    #[test]
    fn test_render() {
        assert_eq!(Scalar::Null.render(), "");
        assert_eq!(Scalar::from(true).render(), "true");
        assert_eq!(Scalar::Number(Number::from_f64(1.5).unwrap()).render(), "1.5");

        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(Scalar::from(ts).render(), "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_row_serializes_in_order() {
        let row: FlatRow = vec![
            ("z".to_string(), Scalar::from(1)),
            ("a".to_string(), Scalar::Null),
        ]
        .into_iter()
        .collect();
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"z":1,"a":null}"#);
    }

    #[test]
    fn test_column_names_union() {
        let mut set = RowSet::new("t");
        set.push(vec![("a".to_string(), Scalar::from(1))].into_iter().collect());
        set.push(
            vec![
                ("b".to_string(), Scalar::from(1)),
                ("a".to_string(), Scalar::from(2)),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(set.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_config_partial_override() {
        let config: FlattenConfig =
            serde_json::from_value(json!({"timestamp_fields": ["created_at"]})).unwrap();
        assert_eq!(config.separator, "_");
        assert_eq!(config.timestamp_fields, vec!["created_at"]);
    }
}
