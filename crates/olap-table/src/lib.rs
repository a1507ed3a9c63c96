//! Loaded relational tables for the OLAP engine.
//!
//! The data-acquisition layer (CSV readers, database connections) hands the engine fully loaded
//! tables. This crate focuses on:
//! - Typed column schemas and row ingestion with arity/type validation.
//! - Column-oriented access for scans over fact tables.
//! - [`RowBitmap`], the row-set representation used when filtering fact rows.

#![forbid(unsafe_code)]

mod bitmap;
mod table;
mod types;

pub use crate::bitmap::RowBitmap;
pub use crate::table::{ColumnSchema, Table, TableError};
pub use crate::types::{ColumnType, Value};
