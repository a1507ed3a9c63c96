use crate::model::quote_segment;
use std::fmt;

/// A parsed `SELECT` statement.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectStatement {
    pub with: Vec<WithClause>,
    /// Axes ordered by axis index; indices are contiguous from 0.
    pub axes: Vec<AxisExpression>,
    pub cube: String,
    pub slicer: Option<Expr>,
    pub cell_properties: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WithClause {
    Member(CalculatedMemberDef),
    Set(NamedSetDef),
}

/// `WITH MEMBER <path> AS <expr> [, FORMAT_STRING = ...] [, SOLVE_ORDER = ...]`
#[derive(Clone, Debug, PartialEq)]
pub struct CalculatedMemberDef {
    pub path: Path,
    pub expr: Expr,
    pub format_string: Option<String>,
    pub solve_order: i32,
}

/// `WITH SET <name> AS <set>`
#[derive(Clone, Debug, PartialEq)]
pub struct NamedSetDef {
    pub path: Path,
    pub expr: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AxisExpression {
    pub axis: usize,
    pub non_empty: bool,
    pub set: Expr,
    pub dimension_properties: Vec<String>,
}

/// A dotted name such as `[Geography].[Geography].[Continent].[America]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    pub segments: Vec<String>,
    /// Byte offset of the first segment in the query text.
    pub position: usize,
}

impl Path {
    pub fn new<S: Into<String>>(segments: Vec<S>) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            position: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Property {
    Members,
    AllMembers,
    Children,
    Parent,
}

impl Property {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MEMBERS" => Some(Property::Members),
            "ALLMEMBERS" => Some(Property::AllMembers),
            "CHILDREN" => Some(Property::Children),
            "PARENT" => Some(Property::Parent),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Property::Members => "Members",
            Property::AllMembers => "AllMembers",
            Property::Children => "Children",
            Property::Parent => "Parent",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Hierarchize,
    AddCalculatedMembers,
    DrilldownMember,
    DrilldownLevel,
    CrossJoin,
    Union,
    Except,
    Distinct,
}

impl Function {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "HIERARCHIZE" => Some(Function::Hierarchize),
            "ADDCALCULATEDMEMBERS" => Some(Function::AddCalculatedMembers),
            "DRILLDOWNMEMBER" => Some(Function::DrilldownMember),
            "DRILLDOWNLEVEL" => Some(Function::DrilldownLevel),
            "CROSSJOIN" => Some(Function::CrossJoin),
            "UNION" => Some(Function::Union),
            "EXCEPT" => Some(Function::Except),
            "DISTINCT" => Some(Function::Distinct),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Hierarchize => "Hierarchize",
            Function::AddCalculatedMembers => "AddCalculatedMembers",
            Function::DrilldownMember => "DrilldownMember",
            Function::DrilldownLevel => "DrilldownLevel",
            Function::CrossJoin => "CrossJoin",
            Function::Union => "Union",
            Function::Except => "Except",
            Function::Distinct => "Distinct",
        }
    }

    /// Accepted argument counts as `(min, max)`; `None` means unbounded.
    pub(crate) fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::Hierarchize => (1, Some(2)),
            Function::AddCalculatedMembers => (1, Some(1)),
            Function::DrilldownMember => (2, Some(3)),
            Function::DrilldownLevel => (1, Some(2)),
            Function::CrossJoin => (2, None),
            Function::Union => (2, None),
            Function::Except => (2, Some(2)),
            Function::Distinct => (1, Some(1)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flag {
    Post,
    Recursive,
}

impl Flag {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("POST") {
            Some(Flag::Post)
        } else if name.eq_ignore_ascii_case("RECURSIVE") {
            Some(Flag::Recursive)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Path(Path),
    Property {
        path: Path,
        property: Property,
    },
    /// `{a, b, ...}`
    Set(Vec<Expr>),
    /// `(a, b, ...)` with at least two elements.
    Tuple(Vec<Expr>),
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    Number(f64),
    String(String),
    Flag(Flag),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

pub(crate) fn axis_name(axis: usize) -> String {
    match axis {
        0 => "COLUMNS".to_string(),
        1 => "ROWS".to_string(),
        2 => "PAGES".to_string(),
        3 => "SECTIONS".to_string(),
        4 => "CHAPTERS".to_string(),
        n => format!("AXIS({n})"),
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Property names are bracketed so names that are not plain identifiers read back unchanged.
fn write_names(f: &mut fmt::Formatter<'_>, names: &[String]) -> fmt::Result {
    for (idx, name) in names.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&quote_segment(name))?;
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, segment) in self.segments.iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            f.write_str(&quote_segment(segment))?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Path(path) => write!(f, "{path}"),
            Expr::Property { path, property } => write!(f, "{path}.{}", property.name()),
            Expr::Set(items) => {
                f.write_str("{")?;
                write_list(f, items)?;
                f.write_str("}")
            }
            Expr::Tuple(items) => {
                f.write_str("(")?;
                write_list(f, items)?;
                f.write_str(")")
            }
            Expr::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Number(n) => write!(f, "{n}"),
            Expr::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Expr::Flag(Flag::Post) => f.write_str("POST"),
            Expr::Flag(Flag::Recursive) => f.write_str("RECURSIVE"),
            Expr::Unary {
                op: UnaryOp::Negate,
                expr,
            } => write!(f, "-{expr}"),
            Expr::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
        }
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.with.is_empty() {
            f.write_str("WITH")?;
            for clause in &self.with {
                match clause {
                    WithClause::Member(def) => {
                        write!(f, " MEMBER {} AS {}", def.path, def.expr)?;
                        if let Some(format_string) = &def.format_string {
                            write!(
                                f,
                                ", FORMAT_STRING = \"{}\"",
                                format_string.replace('"', "\"\"")
                            )?;
                        }
                        if def.solve_order != 0 {
                            write!(f, ", SOLVE_ORDER = {}", def.solve_order)?;
                        }
                    }
                    WithClause::Set(def) => write!(f, " SET {} AS {}", def.path, def.expr)?,
                }
            }
            f.write_str(" ")?;
        }
        f.write_str("SELECT")?;
        for (idx, axis) in self.axes.iter().enumerate() {
            f.write_str(if idx == 0 { " " } else { ", " })?;
            if axis.non_empty {
                f.write_str("NON EMPTY ")?;
            }
            write!(f, "{}", axis.set)?;
            if !axis.dimension_properties.is_empty() {
                f.write_str(" DIMENSION PROPERTIES ")?;
                write_names(f, &axis.dimension_properties)?;
            }
            write!(f, " ON {}", axis_name(axis.axis))?;
        }
        write!(f, " FROM {}", quote_segment(&self.cube))?;
        if let Some(slicer) = &self.slicer {
            write!(f, " WHERE {slicer}")?;
        }
        if !self.cell_properties.is_empty() {
            f.write_str(" CELL PROPERTIES ")?;
            write_names(f, &self.cell_properties)?;
        }
        Ok(())
    }
}
