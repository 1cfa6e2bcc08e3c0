//! Column schema inference and reconciliation
//!
//! [`infer`] derives a [`ColumnSchema`] from a row-set and [`reconcile`]
//! compares it with the schema the warehouse already holds, producing the
//! [`SchemaPlan`] a load follows.

pub mod builder;
pub mod plan;
pub mod types;

pub use builder::{infer, SchemaBuilder};
pub use plan::{coerce, conform, reconcile, SchemaPlan};
pub use types::{ColumnDef, ColumnSchema, DataKind, SchemaConflict};
