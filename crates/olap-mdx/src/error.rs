use olap_table::TableError;

pub type MdxResult<T> = Result<T, MdxError>;

/// Failures raised while turning loaded tables into a cube.
///
/// Any of these is fatal to the data-source binding: the engine refuses queries until a
/// successful rebuild.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("dimension {dimension} has an empty table {table}")]
    EmptyDimensionTable { dimension: String, table: String },

    #[error("dimension {dimension} declares no level columns")]
    NoLevels { dimension: String },

    #[error("parent-child dimension {dimension} must declare exactly one level column")]
    ParentChildLevels { dimension: String },

    #[error("duplicate dimension: {0}")]
    DuplicateDimension(String),

    #[error("`{0}` is reserved and cannot name a dimension")]
    ReservedName(String),

    #[error("duplicate measure: {0}")]
    DuplicateMeasure(String),

    #[error("cube {0} declares no measures")]
    NoMeasures(String),

    #[error("measure {measure} uses non-numeric column {column}")]
    NonNumericMeasure { measure: String, column: String },

    #[error("duplicate key {key} in {table}[{column}]")]
    DuplicateKey {
        table: String,
        column: String,
        key: String,
    },

    #[error("duplicate member {unique_name}")]
    DuplicateMember { unique_name: String },

    #[error("row with key {key} in {table} references unknown parent {parent}")]
    UnknownParent {
        table: String,
        key: String,
        parent: String,
    },

    #[error("parent chain of key {key} in {table} is cyclic")]
    ParentCycle { table: String, key: String },

    #[error(
        "fact row {row} has key {key} in {fact_table}[{column}] with no match in dimension {dimension}"
    )]
    UnmatchedForeignKey {
        fact_table: String,
        column: String,
        row: usize,
        key: String,
        dimension: String,
    },

    #[error("invalid cube definition: {0}")]
    InvalidDefinition(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MdxError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("parse error at position {position} near {token:?}: {message}")]
    Parse {
        position: usize,
        token: String,
        message: String,
    },

    #[error("unresolved name {path}")]
    Resolution { path: String },

    #[error("tuple {tuple} uses hierarchy {hierarchy} more than once")]
    Tuple { tuple: String, hierarchy: String },

    #[error("aggregation error for measure {measure}: {reason}")]
    Aggregation { measure: String, reason: String },

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("no cube is bound to the engine")]
    NoCube,
}

impl From<TableError> for MdxError {
    fn from(err: TableError) -> Self {
        MdxError::Schema(SchemaError::Table(err))
    }
}
