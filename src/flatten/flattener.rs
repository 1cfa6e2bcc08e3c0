use super::timestamp;
use super::types::{FlatRow, FlattenConfig, RowSet, Scalar, Tables, SERVER_TIMESTAMP};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

const FETCH_TIME_SOURCE: &str = "<fetch time>";
const ROOT_SOURCE: &str = "<root>";

/// Flattens nested JSON documents into named row-sets.
///
/// Nested objects merge into the current row, arrays of objects become child
/// tables carrying every parent column, and arrays of scalars are joined into
/// one delimited string.
pub struct Flattener {
    config: FlattenConfig,
}

/// A row under construction, remembering the source path of each column
#[derive(Debug, Clone, Default)]
struct RowBuilder {
    row: FlatRow,
    sources: HashMap<String, String>,
}

impl RowBuilder {
    fn insert(&mut self, column: String, source: String, value: Scalar) -> Result<()> {
        if let Some(first) = self.sources.get(&column) {
            return Err(Error::FlattenConflict {
                column,
                first: first.clone(),
                second: source,
            });
        }
        self.row.insert(column.clone(), value);
        self.sources.insert(column, source);
        Ok(())
    }
}

/// Objects waiting to be exploded into rows of a child table
struct ChildArray<'a> {
    table: String,
    source: String,
    /// Nesting depth of the elements, counted from the document root
    depth: usize,
    elements: Vec<(Option<&'a str>, &'a Map<String, Value>)>,
}

/// Tables being filled, plus the source path that owns each table name
#[derive(Default)]
struct Output {
    tables: Tables,
    owners: HashMap<String, String>,
}

impl Output {
    fn push(&mut self, table: &str, source: &str, row: FlatRow) -> Result<()> {
        match self.owners.get(table) {
            Some(owner) if owner != source => {
                return Err(Error::FlattenConflict {
                    column: table.to_string(),
                    first: owner.clone(),
                    second: source.to_string(),
                })
            }
            Some(_) => {}
            None => {
                self.owners.insert(table.to_string(), source.to_string());
            }
        }
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| RowSet::new(table))
            .push(row);
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ArrayShape {
    Empty,
    Objects,
    Scalars,
    Mixed,
}

impl ArrayShape {
    fn of(items: &[Value]) -> Self {
        if items.is_empty() {
            return ArrayShape::Empty;
        }
        let (mut objects, mut scalars) = (0usize, 0usize);
        for item in items {
            match item {
                Value::Null => {}
                Value::Object(_) => objects += 1,
                Value::Array(_) => return ArrayShape::Mixed,
                _ => scalars += 1,
            }
        }
        match (objects, scalars) {
            (0, _) => ArrayShape::Scalars,
            (_, 0) => ArrayShape::Objects,
            _ => ArrayShape::Mixed,
        }
    }
}

impl Flattener {
    pub fn new(config: FlattenConfig) -> Self {
        Flattener { config }
    }

    pub fn config(&self) -> &FlattenConfig {
        &self.config
    }

    /// Flatten one document. The root object becomes a row of `root_table`
    /// and `server_timestamp`, when given, is its first column.
    pub fn flatten(
        &self,
        document: &Value,
        root_table: &str,
        server_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Tables> {
        let root = match document {
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidDocument(format!(
                    "expected a JSON object at the root, found {}",
                    type_name(other)
                )))
            }
        };
        if root_table.is_empty() {
            return Err(Error::InvalidDocument("root table name is empty".into()));
        }

        let mut builder = RowBuilder::default();
        let synthetic = usize::from(server_timestamp.is_some());
        if let Some(ts) = server_timestamp {
            builder.insert(
                SERVER_TIMESTAMP.to_string(),
                FETCH_TIME_SOURCE.to_string(),
                Scalar::Timestamp(ts),
            )?;
        }

        let mut output = Output::default();
        let mut children = Vec::new();
        self.extract_from_object(root, &[], "", 0, root_table, &mut builder, &mut children)?;

        // A root holding nothing but the fetch time carries no data
        if builder.row.len() > synthetic {
            output.push(root_table, ROOT_SOURCE, builder.row.clone())?;
        }
        for child in children {
            self.extract_from_array(child, &builder, &mut output)?;
        }

        debug!(
            root_table,
            tables = output.tables.len(),
            rows = output.tables.values().map(RowSet::len).sum::<usize>(),
            "document flattened"
        );
        Ok(output.tables)
    }

    /// Merge the fields of `object` into `builder`, queueing arrays of objects
    /// as child tables.
    #[allow(clippy::too_many_arguments)]
    fn extract_from_object<'a>(
        &self,
        object: &'a Map<String, Value>,
        prefix: &[&'a str],
        base: &str,
        depth: usize,
        table: &str,
        builder: &mut RowBuilder,
        children: &mut Vec<ChildArray<'a>>,
    ) -> Result<()> {
        self.check_depth(depth)?;

        for (key, value) in object {
            let mut path = prefix.to_vec();
            path.push(key.as_str());
            let column = path.join(&self.config.separator);
            let source = source_path(base, &path);

            match value {
                Value::Object(map) => match self.keyed_elements(&column, key, map) {
                    Some(elements) => {
                        if !elements.is_empty() {
                            children.push(ChildArray {
                                table: self.child_table(table, &column),
                                source,
                                depth: depth + 1,
                                elements,
                            });
                        }
                    }
                    None => {
                        self.extract_from_object(
                            map,
                            &path,
                            base,
                            depth + 1,
                            table,
                            builder,
                            children,
                        )?;
                    }
                },
                Value::Array(items) => match ArrayShape::of(items) {
                    ArrayShape::Empty => {}
                    ArrayShape::Objects => children.push(ChildArray {
                        table: self.child_table(table, &column),
                        source,
                        depth: depth + 1,
                        elements: items
                            .iter()
                            .filter_map(Value::as_object)
                            .map(|element| (None, element))
                            .collect(),
                    }),
                    ArrayShape::Scalars => {
                        let joined = self.join_scalars(items);
                        builder.insert(column, source, Scalar::String(joined))?;
                    }
                    ArrayShape::Mixed => {
                        let text = serde_json::to_string(items)?;
                        builder.insert(column, source, Scalar::String(text))?;
                    }
                },
                _ => {
                    let scalar = Scalar::from_json(value).unwrap_or(Scalar::Null);
                    let scalar = if self.is_timestamp_field(&column, key) {
                        timestamp::to_timestamp(&scalar).unwrap_or(scalar)
                    } else {
                        scalar
                    };
                    builder.insert(column, source, scalar)?;
                }
            }
        }

        Ok(())
    }

    /// Emit one child row per element, each carrying the parent's columns.
    /// A field that lands on a carried column name is a conflict.
    fn extract_from_array(
        &self,
        child: ChildArray<'_>,
        parent: &RowBuilder,
        output: &mut Output,
    ) -> Result<()> {
        self.check_depth(child.depth)?;
        let base = format!("{}[]", child.source);

        for (key, object) in child.elements {
            let mut builder = parent.clone();
            let mut nested = Vec::new();
            if let Some(key) = key {
                builder.insert(
                    self.config.collection_key_column.clone(),
                    format!("{base}.<key>"),
                    collection_key(key),
                )?;
            }
            self.extract_from_object(
                object,
                &[],
                &base,
                child.depth,
                &child.table,
                &mut builder,
                &mut nested,
            )?;
            if !builder.row.is_empty() {
                output.push(&child.table, &child.source, builder.row.clone())?;
            }
            for grandchild in nested {
                self.extract_from_array(grandchild, &builder, output)?;
            }
        }

        Ok(())
    }

    /// Entries of a configured keyed collection, or `None` when `map` should
    /// be merged as an ordinary nested object.
    fn keyed_elements<'a>(
        &self,
        column: &str,
        key: &str,
        map: &'a Map<String, Value>,
    ) -> Option<Vec<(Option<&'a str>, &'a Map<String, Value>)>> {
        if !matches_field(&self.config.keyed_collections, column, key) {
            return None;
        }
        map.iter()
            .map(|(id, value)| value.as_object().map(|entry| (Some(id.as_str()), entry)))
            .collect()
    }

    fn is_timestamp_field(&self, column: &str, key: &str) -> bool {
        matches_field(&self.config.timestamp_fields, column, key)
    }

    fn child_table(&self, table: &str, column: &str) -> String {
        format!("{}{}{}", table, self.config.separator, column)
    }

    fn join_scalars(&self, items: &[Value]) -> String {
        items
            .iter()
            .map(|item| Scalar::from_json(item).map(|s| s.render()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(&self.config.list_delimiter)
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(Error::InvalidDocument(format!(
                "document nests deeper than {} levels",
                self.config.max_depth
            )));
        }
        Ok(())
    }
}

fn matches_field(fields: &[String], column: &str, key: &str) -> bool {
    fields.iter().any(|field| field == column || field == key)
}

fn source_path(base: &str, path: &[&str]) -> String {
    let joined = path.join(".");
    if base.is_empty() {
        joined
    } else {
        format!("{base}.{joined}")
    }
}

fn collection_key(key: &str) -> Scalar {
    if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(id) = key.parse::<i64>() {
            return Scalar::from(id);
        }
    }
    Scalar::from(key)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn flatten(input: Value) -> Tables {
        Flattener::new(FlattenConfig::default())
            .flatten(&input, "root", None)
            .unwrap()
    }

    fn rows(tables: &Tables, table: &str) -> Vec<Value> {
        tables[table]
            .rows
            .iter()
            .map(|row| Value::Object(row.to_json()))
            .collect()
    }

    #[test]
    fn test_simple_object() {
        let tables = flatten(json!({"id": 1, "name": "Alice"}));

        assert_eq!(tables.len(), 1);
        assert_eq!(rows(&tables, "root"), vec![json!({"id": 1, "name": "Alice"})]);
    }

    #[test]
    fn test_nested_objects_merge_into_row() {
        let tables = flatten(json!({
            "id": 7,
            "user": {"name": "Bob", "stats": {"level": 3}}
        }));

        let row = &tables["root"].rows[0];
        assert_eq!(
            row.column_names().collect::<Vec<_>>(),
            vec!["id", "user_name", "user_stats_level"]
        );
        assert_eq!(row.get("user_stats_level"), Some(&Scalar::from(3)));
    }

    #[test]
    fn test_array_explosion() {
        let tables = flatten(json!({"id": 1, "items": [{"a": 1}, {"a": 2}]}));

        assert_eq!(
            rows(&tables, "root_items"),
            vec![json!({"id": 1, "a": 1}), json!({"id": 1, "a": 2})]
        );
    }

    #[test]
    fn test_crimes_slots() {
        let input = json!({
            "crime_id": 5,
            "slots": [{"pos": 1, "user": 10}, {"pos": 2, "user": null}]
        });
        let tables = Flattener::new(FlattenConfig::default())
            .flatten(&input, "crimes", None)
            .unwrap();

        assert_eq!(rows(&tables, "crimes"), vec![json!({"crime_id": 5})]);
        assert_eq!(
            rows(&tables, "crimes_slots"),
            vec![
                json!({"crime_id": 5, "pos": 1, "user": 10}),
                json!({"crime_id": 5, "pos": 2, "user": null}),
            ]
        );
        let first = &tables["crimes_slots"].rows[0];
        assert_eq!(first.column_names().collect::<Vec<_>>(), vec!["crime_id", "pos", "user"]);
    }

    #[test]
    fn test_path_conflict() {
        let err = Flattener::new(FlattenConfig::default())
            .flatten(&json!({"a": {"b": 1}, "a_b": 2}), "root", None)
            .unwrap_err();

        match err {
            Error::FlattenConflict { column, first, second } => {
                assert_eq!(column, "a_b");
                assert_eq!(first, "a.b");
                assert_eq!(second, "a_b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_conflict_inside_array_reports_element_paths() {
        let err = Flattener::new(FlattenConfig::default())
            .flatten(&json!({"xs": [{"a": {"b": 1}, "a_b": 2}]}), "root", None)
            .unwrap_err();

        match err {
            Error::FlattenConflict { first, second, .. } => {
                assert_eq!(first, "xs[].a.b");
                assert_eq!(second, "xs[].a_b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_child_field_shadowing_parent_column_is_conflict() {
        let err = Flattener::new(FlattenConfig::default())
            .flatten(
                &json!({"id": 1, "members": [{"name": "a"}, {"id": 10, "name": "b"}]}),
                "root",
                None,
            )
            .unwrap_err();

        match err {
            Error::FlattenConflict { column, first, second } => {
                assert_eq!(column, "id");
                assert_eq!(first, "id");
                assert_eq!(second, "members[].id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_grandchild_field_shadowing_carried_column_is_conflict() {
        let err = Flattener::new(FlattenConfig::default())
            .flatten(
                &json!({
                    "orders": [
                        {"order": "A", "lines": [{"order": "x"}]},
                        {"order": "B", "lines": [{"sku": "y"}]}
                    ]
                }),
                "root",
                None,
            )
            .unwrap_err();

        match err {
            Error::FlattenConflict { column, first, second } => {
                assert_eq!(column, "order");
                assert_eq!(first, "orders[].order");
                assert_eq!(second, "orders[].lines[].order");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_carried_column_keeps_its_meaning_across_documents() {
        let flattener = Flattener::new(FlattenConfig::default());

        let plain = flattener
            .flatten(&json!({"id": 1, "members": [{"name": "a"}]}), "root", None)
            .unwrap();
        assert_eq!(rows(&plain, "root_members"), vec![json!({"id": 1, "name": "a"})]);

        let shadowing = flattener.flatten(&json!({"id": 1, "members": [{"id": 10}]}), "root", None);
        assert!(matches!(shadowing, Err(Error::FlattenConflict { ref column, .. }) if column == "id"));
    }

    #[test]
    fn test_keyed_collection_key_shadowing_parent_is_conflict() {
        let config = FlattenConfig {
            keyed_collections: vec!["members".into()],
            ..FlattenConfig::default()
        };
        let err = Flattener::new(config)
            .flatten(&json!({"id": 1, "members": {"7": {"name": "a"}}}), "root", None)
            .unwrap_err();
        assert!(matches!(err, Error::FlattenConflict { ref second, .. } if second == "members[].<key>"));
    }

    #[test]
    fn test_scalar_array() {
        let tables = flatten(json!({"id": 1, "tags": ["rust", null, 3, true]}));

        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables["root"].rows[0].get("tags"),
            Some(&Scalar::from("rust,,3,true"))
        );
    }

    #[test]
    fn test_custom_list_delimiter() {
        let config = FlattenConfig {
            list_delimiter: "|".into(),
            ..FlattenConfig::default()
        };
        let tables = Flattener::new(config)
            .flatten(&json!({"tags": ["a", "b"]}), "root", None)
            .unwrap();
        assert_eq!(tables["root"].rows[0].get("tags"), Some(&Scalar::from("a|b")));
    }

    #[test]
    fn test_empty_array_contributes_nothing() {
        let tables = flatten(json!({"id": 1, "items": []}));

        assert_eq!(tables.len(), 1);
        assert!(!tables["root"].rows[0].contains("items"));
    }

    #[test]
    fn test_mixed_array_kept_as_json_text() {
        let tables = flatten(json!({"mixed": [1, {"a": 2}], "nested": [[1, 2], [3]]}));

        let row = &tables["root"].rows[0];
        assert_eq!(row.get("mixed"), Some(&Scalar::from(r#"[1,{"a":2}]"#)));
        assert_eq!(row.get("nested"), Some(&Scalar::from("[[1,2],[3]]")));
    }

    #[test]
    fn test_nested_arrays_recurse() {
        let tables = flatten(json!({
            "id": 1,
            "orders": [
                {"order": "A", "lines": [{"sku": "x"}, {"sku": "y"}]},
                {"order": "B", "lines": []}
            ]
        }));

        assert_eq!(tables["root_orders"].len(), 2);
        assert_eq!(
            rows(&tables, "root_orders_lines"),
            vec![
                json!({"id": 1, "order": "A", "sku": "x"}),
                json!({"id": 1, "order": "A", "sku": "y"}),
            ]
        );
    }

    #[test]
    fn test_null_and_empty_string_stay_distinct() {
        let tables = flatten(json!({"a": null, "b": ""}));

        let row = &tables["root"].rows[0];
        assert_eq!(row.get("a"), Some(&Scalar::Null));
        assert_eq!(row.get("b"), Some(&Scalar::from("")));
    }

    #[test]
    fn test_server_timestamp_first_and_inherited() {
        let fetched = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let tables = Flattener::new(FlattenConfig::default())
            .flatten(&json!({"id": 1, "xs": [{"v": 1}]}), "root", Some(fetched))
            .unwrap();

        for set in tables.values() {
            for row in &set.rows {
                assert_eq!(row.column_names().next(), Some(SERVER_TIMESTAMP));
                assert_eq!(row.get(SERVER_TIMESTAMP), Some(&Scalar::Timestamp(fetched)));
            }
        }
    }

    #[test]
    fn test_server_timestamp_in_document_conflicts() {
        let err = Flattener::new(FlattenConfig::default())
            .flatten(&json!({"server_timestamp": 1}), "root", Some(Utc::now()))
            .unwrap_err();
        assert!(matches!(err, Error::FlattenConflict { .. }));
    }

    #[test]
    fn test_root_row_skipped_without_data() {
        let tables = Flattener::new(FlattenConfig::default())
            .flatten(&json!({"crimes": [{"id": 1}]}), "faction", Some(Utc::now()))
            .unwrap();

        assert!(!tables.contains_key("faction"));
        assert_eq!(tables["faction_crimes"].len(), 1);
    }

    #[test]
    fn test_root_must_be_object() {
        let flattener = Flattener::new(FlattenConfig::default());
        for input in [json!([1, 2]), json!("x"), json!(null)] {
            let err = flattener.flatten(&input, "root", None).unwrap_err();
            assert!(matches!(err, Error::InvalidDocument(_)));
        }
    }

    #[test]
    fn test_timestamp_fields() {
        let config = FlattenConfig {
            timestamp_fields: vec!["created_at".into(), "meta_ready_at".into()],
            ..FlattenConfig::default()
        };
        let input = json!({
            "created_at": 1_700_000_000,
            "meta": {"ready_at": 0, "created_at": "2024-01-01 00:00:00"},
            "other_at": 1_700_000_000,
            "bad": {"created_at": "never"}
        });
        let tables = Flattener::new(config).flatten(&input, "root", None).unwrap();
        let row = &tables["root"].rows[0];

        assert_eq!(
            row.get("created_at"),
            Some(&Scalar::Timestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap()))
        );
        assert_eq!(row.get("meta_ready_at"), Some(&Scalar::Null));
        assert_eq!(
            row.get("meta_created_at"),
            Some(&Scalar::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
        );
        assert_eq!(row.get("other_at"), Some(&Scalar::from(1_700_000_000)));
        assert_eq!(row.get("bad_created_at"), Some(&Scalar::from("never")));
    }

    #[test]
    fn test_keyed_collection() {
        let config = FlattenConfig {
            keyed_collections: vec!["members".into()],
            ..FlattenConfig::default()
        };
        let input = json!({
            "faction": "X",
            "members": {
                "123": {"name": "a", "level": 5},
                "abc": {"name": "b", "level": 7}
            }
        });
        let tables = Flattener::new(config).flatten(&input, "faction", None).unwrap();

        assert_eq!(
            rows(&tables, "faction_members"),
            vec![
                json!({"faction": "X", "id": 123, "name": "a", "level": 5}),
                json!({"faction": "X", "id": "abc", "name": "b", "level": 7}),
            ]
        );
    }

    #[test]
    fn test_keyed_collection_with_scalars_merges() {
        let config = FlattenConfig {
            keyed_collections: vec!["counts".into()],
            ..FlattenConfig::default()
        };
        let tables = Flattener::new(config)
            .flatten(&json!({"counts": {"a": 1, "b": 2}}), "root", None)
            .unwrap();
        assert_eq!(rows(&tables, "root"), vec![json!({"counts_a": 1, "counts_b": 2})]);
    }

    #[test]
    fn test_child_table_name_collision() {
        let err = Flattener::new(FlattenConfig::default())
            .flatten(
                &json!({"a_b": [{"x": 1}], "a": {"b": [{"x": 2}]}}),
                "root",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::FlattenConflict { ref column, .. } if column == "root_a_b"));
    }

    #[test]
    fn test_depth_limit() {
        let config = FlattenConfig {
            max_depth: 2,
            ..FlattenConfig::default()
        };
        let err = Flattener::new(config)
            .flatten(&json!({"a": {"b": {"c": {"d": 1}}}}), "root", None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    #[test]
    fn test_depth_limit_counts_from_root_through_arrays() {
        let config = FlattenConfig {
            max_depth: 3,
            ..FlattenConfig::default()
        };
        let flattener = Flattener::new(config);

        // elements of c sit at depth 3, so d is at 4
        let err = flattener
            .flatten(&json!({"a": {"b": {"c": [{"d": {"e": 1}}]}}}), "root", None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));

        let tables = flattener
            .flatten(&json!({"a": {"b": {"c": [{"d": 1}]}}}), "root", None)
            .unwrap();
        assert_eq!(rows(&tables, "root_a_b_c"), vec![json!({"d": 1})]);
    }

    #[test]
    fn test_depth_limit_applies_to_nested_arrays() {
        let config = FlattenConfig {
            max_depth: 2,
            ..FlattenConfig::default()
        };
        let err = Flattener::new(config)
            .flatten(&json!({"xs": [{"ys": [{"zs": [{"v": 1}]}]}]}), "root", None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z ]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-d]{1,3}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<u64>().prop_map(|n| json!(n)),
            ".{0,12}".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn flatten_is_deterministic(
            doc in prop::collection::btree_map("[a-d]{1,3}", arb_json(), 0..5)
                .prop_map(|m| Value::Object(m.into_iter().collect()))
        ) {
            let flattener = Flattener::new(FlattenConfig::default());
            let fetched = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let first = flattener.flatten(&doc, "root", Some(fetched));
            let second = flattener.flatten(&doc, "root", Some(fetched));
            match (first, second) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
                (a, b) => prop_assert!(false, "outcomes differ: {:?} vs {:?}", a.is_ok(), b.is_ok()),
            }
        }

        #[test]
        fn scalar_object_keeps_every_field(
            fields in prop::collection::btree_map("[a-z]{1,6}", arb_scalar(), 1..8)
        ) {
            let doc = Value::Object(fields.clone().into_iter().collect());
            let tables = Flattener::new(FlattenConfig::default())
                .flatten(&doc, "root", None)
                .unwrap();

            prop_assert_eq!(tables.len(), 1);
            let row = &tables["root"].rows[0];
            prop_assert_eq!(row.len(), fields.len());
            for (key, value) in &fields {
                let expected = Scalar::from_json(value);
                prop_assert_eq!(row.get(key), expected.as_ref());
            }
        }
    }
}
