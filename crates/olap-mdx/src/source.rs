//! Declarations the data-acquisition layer hands to the cube builder.
//!
//! A [`CubeSource`] describes the star schema layout (which table is the fact table, how each
//! dimension table maps onto levels, which fact columns are measures). The tables themselves
//! travel separately in a [`DataSource`] so the same layout can be rebound to fresh data.

use crate::error::{MdxError, MdxResult, SchemaError};
use olap_table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeSource {
    pub name: String,
    pub fact_table: String,
    #[serde(default)]
    pub dimensions: Vec<DimensionSource>,
    #[serde(default)]
    pub measures: Vec<MeasureSource>,
}

impl CubeSource {
    pub fn new(name: impl Into<String>, fact_table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fact_table: fact_table.into(),
            dimensions: Vec::new(),
            measures: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, dimension: DimensionSource) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn with_measure(mut self, measure: MeasureSource) -> Self {
        self.measures.push(measure);
        self
    }

    /// Parse a cube layout from its JSON form.
    pub fn from_json(json: &str) -> MdxResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| MdxError::Schema(SchemaError::InvalidDefinition(err.to_string())))
    }
}

/// One dimension table and how its columns become levels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSource {
    pub name: String,
    pub table: String,
    /// Primary key of the dimension table.
    pub key_column: String,
    /// Fact table column referencing `key_column`.
    pub foreign_key: String,
    /// Level columns ordered shallow to deep. Parent-child dimensions declare one caption column.
    pub level_columns: Vec<String>,
    /// Self-referencing parent key column for parent-child dimensions.
    #[serde(default)]
    pub parent_column: Option<String>,
    /// Caption of the synthetic All member; defaults to `All <dimension>`.
    #[serde(default)]
    pub all_caption: Option<String>,
}

impl DimensionSource {
    pub fn new<L: Into<String>>(
        name: impl Into<String>,
        table: impl Into<String>,
        key_column: impl Into<String>,
        foreign_key: impl Into<String>,
        level_columns: Vec<L>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key_column: key_column.into(),
            foreign_key: foreign_key.into(),
            level_columns: level_columns.into_iter().map(Into::into).collect(),
            parent_column: None,
            all_caption: None,
        }
    }

    pub fn with_parent_column(mut self, column: impl Into<String>) -> Self {
        self.parent_column = Some(column.into());
        self
    }

    pub fn with_all_caption(mut self, caption: impl Into<String>) -> Self {
        self.all_caption = Some(caption.into());
        self
    }

    pub(crate) fn all_caption(&self) -> String {
        self.all_caption
            .clone()
            .unwrap_or_else(|| format!("All {}", self.name))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureSource {
    pub name: String,
    pub column: String,
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
    #[serde(default)]
    pub format_string: Option<String>,
}

fn default_aggregation() -> String {
    "sum".to_string()
}

impl MeasureSource {
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            aggregation: default_aggregation(),
            format_string: None,
        }
    }

    pub fn with_aggregation(mut self, aggregation: impl Into<String>) -> Self {
        self.aggregation = aggregation.into();
        self
    }

    pub fn with_format_string(mut self, format_string: impl Into<String>) -> Self {
        self.format_string = Some(format_string.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    Sum,
    Count,
    Average,
    Min,
    Max,
    DistinctCount,
}

impl AggregationKind {
    /// Parse an aggregation function name (case-insensitive, common aliases accepted).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Some(AggregationKind::Sum),
            "count" => Some(AggregationKind::Count),
            "average" | "avg" | "mean" => Some(AggregationKind::Average),
            "min" => Some(AggregationKind::Min),
            "max" => Some(AggregationKind::Max),
            "distinctcount" | "distinct_count" | "distinct-count" => {
                Some(AggregationKind::DistinctCount)
            }
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregationKind::Sum => "sum",
            AggregationKind::Count => "count",
            AggregationKind::Average => "average",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
            AggregationKind::DistinctCount => "distinctcount",
        }
    }

    /// Counting aggregations produce `0` instead of null over an empty row set.
    pub fn is_counting(self) -> bool {
        matches!(self, AggregationKind::Count | AggregationKind::DistinctCount)
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The loaded tables a cube is built from.
#[derive(Clone, Debug, Default)]
pub struct DataSource {
    tables: HashMap<String, Arc<Table>>,
}

impl DataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) -> MdxResult<()> {
        self.add_shared_table(Arc::new(table))
    }

    pub fn add_shared_table(&mut self, table: Arc<Table>) -> MdxResult<()> {
        let name = table.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(SchemaError::DuplicateTable(name).into());
        }
        self.tables.insert(name, table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.get(name)
    }

    pub(crate) fn require_table(&self, name: &str) -> MdxResult<&Arc<Table>> {
        self.table(name)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_source_reads_json_with_defaults() {
        let source = CubeSource::from_json(
            r#"{
                "name": "sales",
                "factTable": "facts",
                "dimensions": [{
                    "name": "Geography",
                    "table": "geography",
                    "keyColumn": "id",
                    "foreignKey": "geography_id",
                    "levelColumns": ["Continent", "Country", "City"]
                }],
                "measures": [{ "name": "Amount", "column": "Amount" }]
            }"#,
        )
        .unwrap();

        assert_eq!(source.dimensions[0].parent_column, None);
        assert_eq!(source.dimensions[0].all_caption(), "All Geography");
        assert_eq!(source.measures[0].aggregation, "sum");
    }

    #[test]
    fn malformed_json_is_a_schema_error() {
        let err = CubeSource::from_json("{\"name\": 1}").unwrap_err();
        assert!(matches!(
            err,
            MdxError::Schema(SchemaError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn aggregation_names_accept_aliases() {
        assert_eq!(AggregationKind::parse("AVG"), Some(AggregationKind::Average));
        assert_eq!(
            AggregationKind::parse("distinct-count"),
            Some(AggregationKind::DistinctCount)
        );
        assert_eq!(AggregationKind::parse("median"), None);
    }
}
