//! MDX query evaluation over a star schema.
//!
//! A [`Cube`] is built from loaded tables and a [`CubeSource`] declaration. Queries are parsed
//! into a [`SelectStatement`], their axes are evaluated into ordered tuple sets, each cell
//! coordinate is aggregated over the fact table, and the result is returned as a [`Cellset`].
//!
//! ```ignore
//! let engine = MdxEngine::new();
//! engine.bind(&source, &data)?;
//! let cellset = engine.execute(
//!     "SELECT FROM [sales] WHERE ([Measures].[Amount])",
//!     &QueryOptions::default(),
//! )?;
//! ```

#![forbid(unsafe_code)]

mod aggregate;
mod ast;
mod builder;
mod calc;
mod cellset;
mod engine;
mod error;
mod eval;
mod format;
mod model;
mod parser;
mod resolve;
mod source;

pub use crate::builder::build_cube;
pub use crate::engine::{execute, parse, MdxEngine, QueryOptions};
pub use crate::error::{MdxError, MdxResult, SchemaError};
pub use crate::format::format_value;
pub use crate::source::{AggregationKind, CubeSource, DataSource, DimensionSource, MeasureSource};

pub use crate::model::{
    Cube, Dimension, DimensionId, Hierarchy, HierarchyId, HierarchyKind, Level, LevelId, Measure,
    MeasureId, Member, MemberId, ObjectRef, MEMBER_DISPLAY_INFO,
};

pub use crate::cellset::{
    Axis, AxisMember, Cell, Cellset, DEFAULT_BACK_COLOR, DEFAULT_FONT_FLAGS, DEFAULT_FORE_COLOR,
    MEASURES_LEVEL_UNIQUE_NAME,
};

pub use crate::ast::{
    AxisExpression, BinaryOp, CalculatedMemberDef, Expr, Flag, Function, NamedSetDef, Path,
    Property, SelectStatement, UnaryOp, WithClause,
};
pub use crate::calc::{CalculatedMember, NamedSet, QueryScope};
pub use crate::eval::{
    add_calculated_members, crossjoin, distinct, drilldown_level, drilldown_member, eval_set,
    except, hierarchize, union, EvalContext, HierarchyKey, MemberRef, Tuple, TupleSet,
};
pub use crate::parser::parse_expression;
