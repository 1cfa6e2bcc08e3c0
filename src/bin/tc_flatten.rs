//! tc-flatten: Flatten JSON documents into the tables tcdatalogger would load
//!
//! Usage:
//!   # Read from file, one NDJSON line per row on stdout
//!   tc-flatten crimes.json --root v2_faction_crimes
//!
//!   # Read from stdin
//!   echo '{"crime_id": 5, "slots": [{"pos": 1}]}' | tc-flatten --root crimes
//!
//!   # Inferred column schema per table instead of rows
//!   tc-flatten --ndjson --schema events.jsonl

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use tcdatalogger::flatten::{flatten_lines, merge_tables, FlattenConfig, Flattener, Tables};
use tcdatalogger::schema::infer;

#[derive(Parser, Debug)]
#[command(name = "tc-flatten")]
#[command(about = "Flatten nested JSON into tcdatalogger tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Name of the root table; child tables are named after it
    #[arg(long, default_value = "root")]
    root: String,

    /// Process newline-delimited JSON (one JSON object per line)
    #[arg(long)]
    ndjson: bool,

    /// Print the inferred schema of each table instead of its rows
    #[arg(long)]
    schema: bool,

    /// Comma-separated fields converted to timestamps
    #[arg(long)]
    timestamp_fields: Option<String>,

    /// Comma-separated id-keyed objects exploded into child tables
    #[arg(long)]
    keyed_collections: Option<String>,

    /// Separator for nested column and table names (default: "_")
    #[arg(long)]
    separator: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = FlattenConfig::default();
    if let Some(fields) = &args.timestamp_fields {
        config.timestamp_fields = split_list(fields);
    }
    if let Some(fields) = &args.keyed_collections {
        config.keyed_collections = split_list(fields);
    }
    if let Some(sep) = args.separator.clone() {
        config.separator = sep;
    }
    let flattener = Flattener::new(config);

    let reader = if let Some(file_path) = &args.input {
        Box::new(BufReader::new(
            File::open(file_path).with_context(|| format!("Failed to open {file_path}"))?,
        )) as Box<dyn Read>
    } else {
        Box::new(std::io::stdin()) as Box<dyn Read>
    };

    let tables = if args.ndjson {
        flatten_lines(BufReader::new(reader), &flattener, &args.root)?
    } else {
        flatten_reader(reader, &flattener, &args.root)?
    };

    let mut out = BufWriter::new(std::io::stdout().lock());
    if args.schema {
        write_schemas(&mut out, &tables)?;
    } else {
        write_rows(&mut out, &tables)?;
    }
    out.flush()?;
    Ok(())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Flatten one document, or each element of a top-level array
fn flatten_reader(reader: Box<dyn Read>, flattener: &Flattener, root: &str) -> Result<Tables> {
    let mut content = Vec::new();
    BufReader::new(reader).read_to_end(&mut content)?;

    let document = parse_document(&mut content)?;
    let mut tables = Tables::new();
    match document {
        Value::Array(items) => {
            for item in &items {
                merge_tables(&mut tables, flattener.flatten(item, root, None)?);
            }
        }
        other => merge_tables(&mut tables, flattener.flatten(&other, root, None)?),
    }
    Ok(tables)
}

/// SIMD parse straight into `serde_json::Value` so key order survives,
/// falling back to serde_json for input simd-json rejects.
fn parse_document(content: &mut [u8]) -> Result<Value> {
    let fallback = content.to_vec();
    match simd_json::serde::from_slice::<Value>(content) {
        Ok(value) => Ok(value),
        Err(_) => serde_json::from_slice(&fallback).context("Failed to parse JSON"),
    }
}

fn write_rows(out: &mut impl Write, tables: &Tables) -> Result<()> {
    for (name, set) in tables {
        for row in &set.rows {
            let mut object = serde_json::Map::new();
            object.insert("_table".to_string(), Value::String(name.clone()));
            object.extend(row.to_json());
            serde_json::to_writer(&mut *out, &object)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_schemas(out: &mut impl Write, tables: &Tables) -> Result<()> {
    for (name, set) in tables {
        let line = json!({
            "table": name,
            "rows": set.len(),
            "schema": infer(set),
        });
        serde_json::to_writer(&mut *out, &line)?;
        writeln!(out)?;
    }
    Ok(())
}
