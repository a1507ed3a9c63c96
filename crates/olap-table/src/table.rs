#![forbid(unsafe_code)]

use crate::types::{ColumnType, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("duplicate column {table}[{column}]")]
    DuplicateColumn { table: String, column: String },

    #[error("unknown column {table}[{column}]")]
    UnknownColumn { table: String, column: String },

    #[error("schema mismatch for {table}: expected {expected} values, got {actual}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch in {table}[{column}] at row {row}: expected {expected}, got {actual}")]
    TypeMismatch {
        table: String,
        column: String,
        row: usize,
        expected: ColumnType,
        actual: ColumnType,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A loaded table stored column by column.
///
/// Rows are validated on ingestion: every row must provide one value per column and each
/// non-null value must match the declared column type.
#[derive(Clone, Debug)]
pub struct Table {
    name: String,
    schema: Vec<ColumnSchema>,
    column_index: HashMap<String, usize>,
    columns: Vec<Vec<Value>>,
    rows: usize,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Vec<ColumnSchema>) -> Result<Self, TableError> {
        let name = name.into();
        let mut column_index = HashMap::with_capacity(schema.len());
        for (idx, column) in schema.iter().enumerate() {
            if column_index.insert(column.name.clone(), idx).is_some() {
                return Err(TableError::DuplicateColumn {
                    table: name,
                    column: column.name.clone(),
                });
            }
        }
        let columns = vec![Vec::new(); schema.len()];
        Ok(Self {
            name,
            schema,
            column_index,
            columns,
            rows: 0,
        })
    }

    /// Build a table from `(column name, type)` pairs and row-major values.
    pub fn from_rows<N: Into<String>>(
        name: impl Into<String>,
        columns: Vec<(N, ColumnType)>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, TableError> {
        let schema = columns
            .into_iter()
            .map(|(name, column_type)| ColumnSchema::new(name, column_type))
            .collect();
        let mut table = Self::new(name, schema)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Resolve a column by name. Exact matches win; otherwise the lookup is ASCII
    /// case-insensitive.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        if let Some(idx) = self.column_index.get(column) {
            return Some(*idx);
        }
        self.schema
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    /// Like [`Table::column_index`] but reports a missing column as an error.
    pub fn require_column(&self, column: &str) -> Result<usize, TableError> {
        self.column_index(column)
            .ok_or_else(|| TableError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    pub fn column_type(&self, idx: usize) -> Option<ColumnType> {
        self.schema.get(idx).map(|c| c.column_type)
    }

    pub fn column(&self, idx: usize) -> Option<&[Value]> {
        self.columns.get(idx).map(Vec::as_slice)
    }

    pub fn get_cell(&self, row: usize, idx: usize) -> Option<&Value> {
        self.columns.get(idx)?.get(row)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.schema.len() {
            return Err(TableError::SchemaMismatch {
                table: self.name.clone(),
                expected: self.schema.len(),
                actual: row.len(),
            });
        }

        for (column, value) in self.schema.iter().zip(row.iter()) {
            let Some(actual) = value.column_type() else {
                continue;
            };
            if actual != column.column_type {
                return Err(TableError::TypeMismatch {
                    table: self.name.clone(),
                    column: column.name.clone(),
                    row: self.rows,
                    expected: column.column_type,
                    actual,
                });
            }
        }

        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        self.rows += 1;
        Ok(())
    }
}
