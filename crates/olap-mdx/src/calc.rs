//! Query-scoped definitions from `WITH MEMBER` and `WITH SET`, and the scalar formulas of
//! calculated members.

use crate::ast::{BinaryOp, Expr, Path, UnaryOp, WithClause};
use crate::error::{MdxError, MdxResult};
use crate::eval::{eval_set, EvalContext, HierarchyKey, MemberRef, Tuple, TupleSet};
use crate::model::{Cube, MemberId};
use crate::resolve::{resolve_path, Resolved};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct CalculatedMember {
    pub caption: String,
    pub unique_name: String,
    pub hierarchy: HierarchyKey,
    /// `None` for calculated measures.
    pub parent: Option<MemberId>,
    pub format_string: Option<String>,
    pub solve_order: i32,
    pub(crate) formula: ScalarExpr,
}

#[derive(Clone, Debug)]
pub struct NamedSet {
    pub name: String,
    pub tuples: TupleSet,
}

/// Calculated members and named sets visible to one query.
#[derive(Clone, Debug, Default)]
pub struct QueryScope {
    members: Vec<CalculatedMember>,
    sets: Vec<NamedSet>,
    member_index: HashMap<String, usize>,
    set_index: HashMap<String, usize>,
}

fn scope_key(path: &Path) -> String {
    path.to_string().to_lowercase()
}

impl QueryScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `WITH` clauses of a statement.
    ///
    /// Calculated member headers are declared first so formulas and named sets may refer to any
    /// calculated member regardless of declaration order; named sets see the sets declared
    /// before them.
    pub fn build(cube: &Cube, clauses: &[WithClause]) -> MdxResult<Self> {
        let mut scope = Self::new();
        for clause in clauses {
            if let WithClause::Member(def) = clause {
                scope.declare_member(cube, &def.path, def.format_string.clone(), def.solve_order)?;
            }
        }

        let mut member_idx = 0;
        for clause in clauses {
            match clause {
                WithClause::Member(def) => {
                    let formula = compile(&EvalContext::new(cube, &scope), &def.expr)?;
                    scope.members[member_idx].formula = formula;
                    member_idx += 1;
                }
                WithClause::Set(def) => {
                    let tuples = eval_set(&EvalContext::new(cube, &scope), &def.expr)?;
                    let key = scope_key(&def.path);
                    if scope.set_index.contains_key(&key) {
                        return Err(MdxError::Eval(format!("set {} is defined twice", def.path)));
                    }
                    scope.set_index.insert(key, scope.sets.len());
                    scope.sets.push(NamedSet {
                        name: def.path.to_string(),
                        tuples,
                    });
                }
            }
        }
        Ok(scope)
    }

    fn declare_member(
        &mut self,
        cube: &Cube,
        path: &Path,
        format_string: Option<String>,
        solve_order: i32,
    ) -> MdxResult<()> {
        let Some((caption, prefix)) = path.segments.split_last() else {
            return Err(MdxError::Resolution {
                path: path.to_string(),
            });
        };
        if prefix.is_empty() {
            return Err(MdxError::Eval(format!(
                "calculated member {path} must be qualified by a hierarchy or parent member"
            )));
        }
        let prefix = Path {
            segments: prefix.to_vec(),
            position: path.position,
        };

        let (hierarchy, parent) = match resolve_path(&EvalContext::new(cube, self), &prefix)? {
            Resolved::Measures => (HierarchyKey::Measures, None),
            Resolved::Member(MemberRef::Member(parent)) => (
                HierarchyKey::Hierarchy(cube.member(parent).hierarchy),
                Some(parent),
            ),
            Resolved::Hierarchy(h) => (
                HierarchyKey::Hierarchy(h),
                Some(cube.hierarchy(h).all_member),
            ),
            Resolved::Dimension(d) => {
                let Some(h) = cube.dimension(d).hierarchies.first().copied() else {
                    return Err(MdxError::Resolution {
                        path: prefix.to_string(),
                    });
                };
                (
                    HierarchyKey::Hierarchy(h),
                    Some(cube.hierarchy(h).all_member),
                )
            }
            _ => {
                return Err(MdxError::Eval(format!(
                    "calculated member {path} must be defined on a hierarchy, a member or [Measures]"
                )))
            }
        };

        let unique_name = path.to_string();
        let key = scope_key(path);
        if self.member_index.contains_key(&key) || cube.find(&unique_name).is_some() {
            return Err(MdxError::Eval(format!("member {unique_name} is already defined")));
        }
        if hierarchy == HierarchyKey::Measures && cube.measure_by_name(caption).is_some() {
            return Err(MdxError::Eval(format!("member {unique_name} is already defined")));
        }

        self.member_index.insert(key, self.members.len());
        self.members.push(CalculatedMember {
            caption: caption.clone(),
            unique_name,
            hierarchy,
            parent,
            format_string,
            solve_order,
            formula: ScalarExpr::Null,
        });
        Ok(())
    }

    pub fn calculated_members(&self) -> &[CalculatedMember] {
        &self.members
    }

    pub fn calculated_member(&self, idx: usize) -> &CalculatedMember {
        &self.members[idx]
    }

    pub fn named_set(&self, idx: usize) -> &NamedSet {
        &self.sets[idx]
    }

    pub(crate) fn find_member(&self, path: &Path) -> Option<usize> {
        self.member_index.get(&scope_key(path)).copied()
    }

    pub(crate) fn find_set(&self, path: &Path) -> Option<usize> {
        self.set_index.get(&scope_key(path)).copied()
    }
}

/// A compiled calculated-member formula. Member references are resolved once, at compile time.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ScalarExpr {
    Null,
    Number(f64),
    String(String),
    /// Evaluate the current coordinate with these members substituted.
    Tuple(Tuple),
    Negate(Box<ScalarExpr>),
    Binary(BinaryOp, Box<ScalarExpr>, Box<ScalarExpr>),
}

fn compile(ctx: &EvalContext<'_>, expr: &Expr) -> MdxResult<ScalarExpr> {
    match expr {
        Expr::Number(n) => Ok(ScalarExpr::Number(*n)),
        Expr::String(s) => Ok(ScalarExpr::String(s.clone())),
        Expr::Path(_) | Expr::Property { .. } | Expr::Tuple(_) => {
            let set = eval_set(ctx, expr)?;
            match <[Tuple; 1]>::try_from(set) {
                Ok([tuple]) => Ok(ScalarExpr::Tuple(tuple)),
                Err(_) => Err(MdxError::Eval(format!(
                    "{expr} must denote a single member or tuple"
                ))),
            }
        }
        Expr::Unary {
            op: UnaryOp::Negate,
            expr,
        } => Ok(ScalarExpr::Negate(Box::new(compile(ctx, expr)?))),
        Expr::Binary { op, left, right } => Ok(ScalarExpr::Binary(
            *op,
            Box::new(compile(ctx, left)?),
            Box::new(compile(ctx, right)?),
        )),
        Expr::Set(_) | Expr::Call { .. } | Expr::Flag(_) => Err(MdxError::Eval(format!(
            "expected a scalar expression, found {expr}"
        ))),
    }
}

/// A value produced while evaluating a cell.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Scalar {
    Null,
    Number(f64),
    String(String),
}

impl Scalar {
    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

/// Arithmetic with null propagation: a null addend acts as zero (two nulls stay null), while a
/// null factor or a zero divisor yields null.
pub(crate) fn apply_binary(
    op: BinaryOp,
    left: Scalar,
    right: Scalar,
    member: &str,
) -> MdxResult<Scalar> {
    let number = |value: &Scalar| -> MdxResult<Option<f64>> {
        match value {
            Scalar::Null => Ok(None),
            Scalar::Number(n) => Ok(Some(*n)),
            Scalar::String(s) => Err(MdxError::Aggregation {
                measure: member.to_string(),
                reason: format!("cannot use text {s:?} in arithmetic"),
            }),
        }
    };
    let (l, r) = (number(&left)?, number(&right)?);
    let value = match op {
        BinaryOp::Add | BinaryOp::Subtract => {
            let sign = if op == BinaryOp::Add { 1.0 } else { -1.0 };
            match (l, r) {
                (None, None) => None,
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(sign * r),
                (Some(l), Some(r)) => Some(l + sign * r),
            }
        }
        BinaryOp::Multiply => l.zip(r).map(|(l, r)| l * r),
        BinaryOp::Divide => match (l, r) {
            (Some(_), Some(r)) if r == 0.0 => None,
            (Some(l), Some(r)) => Some(l / r),
            _ => None,
        },
    };
    Ok(value.map_or(Scalar::Null, Scalar::Number))
}

pub(crate) fn apply_negate(value: Scalar, member: &str) -> MdxResult<Scalar> {
    match value {
        Scalar::Null => Ok(Scalar::Null),
        Scalar::Number(n) => Ok(Scalar::Number(-n)),
        Scalar::String(s) => Err(MdxError::Aggregation {
            measure: member.to_string(),
            reason: format!("cannot negate text {s:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: f64) -> Scalar {
        Scalar::Number(v)
    }

    #[test]
    fn null_addends_act_as_zero() {
        assert_eq!(apply_binary(BinaryOp::Add, Scalar::Null, n(3.0), "m").unwrap(), n(3.0));
        assert_eq!(
            apply_binary(BinaryOp::Subtract, Scalar::Null, n(3.0), "m").unwrap(),
            n(-3.0)
        );
        assert_eq!(
            apply_binary(BinaryOp::Add, Scalar::Null, Scalar::Null, "m").unwrap(),
            Scalar::Null
        );
    }

    #[test]
    fn null_factors_and_zero_divisors_yield_null() {
        assert_eq!(
            apply_binary(BinaryOp::Multiply, Scalar::Null, n(3.0), "m").unwrap(),
            Scalar::Null
        );
        assert_eq!(
            apply_binary(BinaryOp::Divide, n(3.0), n(0.0), "m").unwrap(),
            Scalar::Null
        );
        assert_eq!(apply_binary(BinaryOp::Divide, n(3.0), n(2.0), "m").unwrap(), n(1.5));
    }

    #[test]
    fn text_operands_are_aggregation_errors() {
        let err = apply_binary(BinaryOp::Add, Scalar::String("x".into()), n(1.0), "[Measures].[X]")
            .unwrap_err();
        assert!(matches!(err, MdxError::Aggregation { ref measure, .. } if measure == "[Measures].[X]"));
    }
}
