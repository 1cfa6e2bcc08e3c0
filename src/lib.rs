//! # tcdatalogger - API to warehouse data logger
//!
//! Polls configured JSON API endpoints, flattens each response into tables
//! and loads them into a warehouse, either appending or atomically replacing.
//!
//! ## Modules
//!
//! - **flatten**: nested JSON to named row-sets, with child tables for arrays
//! - **schema**: column kind inference and reconciliation against the warehouse
//! - **load**: the append / stage-and-swap load state machine with retries
//! - **runner**: per-endpoint orchestration with timeouts and isolation
//! - **config**: endpoint and API key configuration
//! - **fetch** / **warehouse**: the external collaborators and their implementations
//!
//! ## Quick Start
//!
//! ```rust
//! use tcdatalogger::flatten::{FlattenConfig, Flattener, Scalar};
//! use tcdatalogger::schema::infer;
//! use serde_json::json;
//!
//! # fn main() -> tcdatalogger::Result<()> {
//! let document = json!({
//!     "crime_id": 5,
//!     "slots": [
//!         {"pos": 1, "user": 10},
//!         {"pos": 2, "user": null}
//!     ]
//! });
//!
//! let flattener = Flattener::new(FlattenConfig::default());
//! let tables = flattener.flatten(&document, "crimes", None)?;
//!
//! // crimes_slots rows carry the parent's crime_id
//! let slots = &tables["crimes_slots"];
//! assert_eq!(slots.len(), 2);
//! assert_eq!(slots.rows[1].get("crime_id"), Some(&Scalar::from(5)));
//!
//! let schema = infer(slots);
//! assert_eq!(schema.names(), vec!["crime_id", "pos", "user"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod flatten;
pub mod load;
pub mod runner;
pub mod schema;
pub mod table;
pub mod warehouse;

// Re-export commonly used types for convenience
pub use config::{AppConfig, EndpointSpec};
pub use error::{Error, Result};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use flatten::{FlatRow, FlattenConfig, Flattener, RowSet, Scalar, Tables};
pub use load::{LoadReconciler, LoadResult, LoadState, RetryPolicy};
pub use runner::{EndpointReport, EndpointRunner, RunnerConfig};
pub use schema::{ColumnDef, ColumnSchema, DataKind, SchemaPlan};
pub use table::{StorageMode, TableRef};
pub use warehouse::{JsonlWarehouse, MemoryWarehouse, Warehouse, WarehouseError};
