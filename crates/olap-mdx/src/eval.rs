//! Set evaluation: turns set expressions into ordered tuple sequences.
//!
//! The set functions (`hierarchize`, `crossjoin`, `drilldown_member`, ...) are public so hosts and
//! tests can apply them to tuple sets directly; [`eval_set`] dispatches AST nodes onto them.

use crate::ast::{BinaryOp, Expr, Flag, Function, Path, Property};
use crate::calc::QueryScope;
use crate::error::{MdxError, MdxResult};
use crate::model::{
    compare_paths_post, compare_paths_pre, Cube, HierarchyId, LevelId, MeasureId, MemberId,
};
use crate::resolve::{resolve_path, Resolved};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Offset separating calculated members from stored siblings in hierarchy order.
const CALCULATED_POSITION_BASE: usize = usize::MAX / 2;

/// A member of a tuple: stored, a measure, or a query-scoped calculated member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberRef {
    Member(MemberId),
    Measure(MeasureId),
    /// Index into the query's calculated members.
    Calculated(usize),
}

/// The hierarchy a member belongs to; `Measures` is the pseudo-hierarchy of measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HierarchyKey {
    Measures,
    Hierarchy(HierarchyId),
}

pub type Tuple = Vec<MemberRef>;
pub type TupleSet = Vec<Tuple>;

/// Everything a set expression can observe: the cube and the query's `WITH` definitions.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub(crate) cube: &'a Cube,
    pub(crate) scope: &'a QueryScope,
}

impl<'a> EvalContext<'a> {
    pub fn new(cube: &'a Cube, scope: &'a QueryScope) -> Self {
        Self { cube, scope }
    }

    pub fn cube(&self) -> &'a Cube {
        self.cube
    }

    pub fn hierarchy_of(&self, member: MemberRef) -> HierarchyKey {
        match member {
            MemberRef::Member(id) => HierarchyKey::Hierarchy(self.cube.member(id).hierarchy),
            MemberRef::Measure(_) => HierarchyKey::Measures,
            MemberRef::Calculated(idx) => self.scope.calculated_member(idx).hierarchy,
        }
    }

    pub fn parent_of(&self, member: MemberRef) -> Option<MemberRef> {
        match member {
            MemberRef::Member(id) => self.cube.member(id).parent.map(MemberRef::Member),
            MemberRef::Measure(_) => None,
            MemberRef::Calculated(idx) => self
                .scope
                .calculated_member(idx)
                .parent
                .map(MemberRef::Member),
        }
    }

    /// Stored children in source order. Measures and calculated members have none.
    pub fn children_of(&self, member: MemberRef) -> Vec<MemberRef> {
        match member {
            MemberRef::Member(id) => self
                .cube
                .member_children(id)
                .iter()
                .copied()
                .map(MemberRef::Member)
                .collect(),
            MemberRef::Measure(_) | MemberRef::Calculated(_) => Vec::new(),
        }
    }

    pub fn unique_name(&self, member: MemberRef) -> &'a str {
        match member {
            MemberRef::Member(id) => &self.cube.member(id).unique_name,
            MemberRef::Measure(id) => &self.cube.measure(id).unique_name,
            MemberRef::Calculated(idx) => &self.scope.calculated_member(idx).unique_name,
        }
    }

    pub fn caption(&self, member: MemberRef) -> &'a str {
        match member {
            MemberRef::Member(id) => &self.cube.member(id).caption,
            MemberRef::Measure(id) => &self.cube.measure(id).name,
            MemberRef::Calculated(idx) => &self.scope.calculated_member(idx).caption,
        }
    }

    pub fn hierarchy_unique_name(&self, key: HierarchyKey) -> &'a str {
        match key {
            HierarchyKey::Measures => "[Measures]",
            HierarchyKey::Hierarchy(id) => &self.cube.hierarchy(id).unique_name,
        }
    }

    /// Level number of `member`: 0 for All members and measures.
    pub fn depth(&self, member: MemberRef) -> usize {
        match member {
            MemberRef::Member(id) => self.cube.member_depth(id),
            MemberRef::Measure(_) => 0,
            MemberRef::Calculated(idx) => match self.scope.calculated_member(idx).parent {
                Some(parent) => self.cube.member_depth(parent) + 1,
                None => 0,
            },
        }
    }

    fn path_key(&self, member: MemberRef) -> Vec<usize> {
        match member {
            MemberRef::Member(id) => self.cube.member_path_key(id),
            MemberRef::Measure(id) => vec![id.index()],
            MemberRef::Calculated(idx) => match self.scope.calculated_member(idx).parent {
                Some(parent) => {
                    let mut path = self.cube.member_path_key(parent);
                    path.push(CALCULATED_POSITION_BASE + idx);
                    path
                }
                None => vec![self.cube.measure_count() + idx],
            },
        }
    }

    pub fn tuple_hierarchies(&self, tuple: &[MemberRef]) -> Vec<HierarchyKey> {
        tuple.iter().map(|m| self.hierarchy_of(*m)).collect()
    }

    pub fn render_tuple(&self, tuple: &[MemberRef]) -> String {
        let names: Vec<&str> = tuple.iter().map(|m| self.unique_name(*m)).collect();
        format!("({})", names.join(", "))
    }

    /// Every stored member of a hierarchy, level by level in source order.
    pub(crate) fn hierarchy_members(&self, hierarchy: HierarchyId) -> TupleSet {
        self.cube
            .hierarchy(hierarchy)
            .levels
            .iter()
            .flat_map(|level| self.cube.level(*level).members.iter())
            .map(|m| vec![MemberRef::Member(*m)])
            .collect()
    }

    pub(crate) fn measure_members(&self) -> TupleSet {
        self.cube
            .measures()
            .map(|(id, _)| vec![MemberRef::Measure(id)])
            .collect()
    }

    fn default_member(&self, hierarchy: HierarchyId) -> MemberRef {
        MemberRef::Member(self.cube.hierarchy(hierarchy).all_member)
    }

    /// Fail when two members of `tuple` share a hierarchy.
    pub(crate) fn check_tuple(&self, tuple: &[MemberRef]) -> MdxResult<()> {
        let mut seen = HashSet::new();
        for member in tuple {
            let key = self.hierarchy_of(*member);
            if !seen.insert(key) {
                return Err(MdxError::Tuple {
                    tuple: self.render_tuple(tuple),
                    hierarchy: self.hierarchy_unique_name(key).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fail unless every tuple of `set` spans the same hierarchies in the same order.
    pub(crate) fn check_uniform(&self, set: &[Tuple], expr: &Expr) -> MdxResult<()> {
        let Some(first) = set.first() else {
            return Ok(());
        };
        let signature = self.tuple_hierarchies(first);
        for tuple in &set[1..] {
            if self.tuple_hierarchies(tuple) != signature {
                return Err(MdxError::Eval(format!(
                    "set {expr} mixes tuples of different hierarchies: {} and {}",
                    self.render_tuple(first),
                    self.render_tuple(tuple)
                )));
            }
        }
        Ok(())
    }
}

/// Order `set` parents-before-descendants (or descendants-first with `post`), siblings in source
/// order. Multi-member tuples compare member by member; equal tuples keep their relative order.
pub fn hierarchize(ctx: &EvalContext<'_>, set: &[Tuple], post: bool) -> TupleSet {
    let compare = if post {
        compare_paths_post
    } else {
        compare_paths_pre
    };
    let mut keyed: Vec<(Vec<Vec<usize>>, &Tuple)> = set
        .iter()
        .map(|tuple| (tuple.iter().map(|m| ctx.path_key(*m)).collect(), tuple))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| {
        for (x, y) in a.iter().zip(b.iter()) {
            match compare(x, y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        a.len().cmp(&b.len())
    });
    keyed.into_iter().map(|(_, tuple)| tuple.clone()).collect()
}

/// Ordered Cartesian product: position `i * |b| + j` holds `a[i] ++ b[j]`.
pub fn crossjoin(ctx: &EvalContext<'_>, a: &[Tuple], b: &[Tuple]) -> MdxResult<TupleSet> {
    let (Some(left), Some(right)) = (a.first(), b.first()) else {
        return Ok(Vec::new());
    };
    let mut joined = left.clone();
    joined.extend_from_slice(right);
    ctx.check_tuple(&joined)?;

    let mut out = Vec::with_capacity(a.len() * b.len());
    for left in a {
        for right in b {
            let mut tuple = Vec::with_capacity(left.len() + right.len());
            tuple.extend_from_slice(left);
            tuple.extend_from_slice(right);
            out.push(tuple);
        }
    }
    Ok(out)
}

/// Follow every tuple holding a target member with one tuple per child of that member.
///
/// Children already in `set`, or already emitted, are skipped. Tuples without a target pass
/// through in place. With `recursive`, emitted children that are themselves targets are
/// drilled as well.
pub fn drilldown_member(
    ctx: &EvalContext<'_>,
    set: &[Tuple],
    targets: &[Tuple],
    recursive: bool,
) -> TupleSet {
    let targets: HashSet<MemberRef> = targets.iter().flatten().copied().collect();
    let present: HashSet<&Tuple> = set.iter().collect();
    let mut emitted: HashSet<Tuple> = HashSet::new();
    let mut out = Vec::with_capacity(set.len());

    for tuple in set {
        out.push(tuple.clone());
        emitted.insert(tuple.clone());
        drill_tuple(
            ctx,
            tuple,
            &targets,
            &present,
            &mut emitted,
            &mut out,
            recursive,
        );
    }
    out
}

fn drill_tuple(
    ctx: &EvalContext<'_>,
    tuple: &Tuple,
    targets: &HashSet<MemberRef>,
    present: &HashSet<&Tuple>,
    emitted: &mut HashSet<Tuple>,
    out: &mut TupleSet,
    recursive: bool,
) {
    let Some(position) = tuple.iter().position(|m| targets.contains(m)) else {
        return;
    };
    for child in ctx.children_of(tuple[position]) {
        let mut child_tuple = tuple.clone();
        child_tuple[position] = child;
        if present.contains(&child_tuple) || emitted.contains(&child_tuple) {
            continue;
        }
        out.push(child_tuple.clone());
        emitted.insert(child_tuple.clone());
        if recursive && targets.contains(&child) {
            drill_tuple(ctx, &child_tuple, targets, present, emitted, out, recursive);
        }
    }
}

/// Drill every first-hierarchy member at `level` (default: the deepest level present).
pub fn drilldown_level(ctx: &EvalContext<'_>, set: &[Tuple], level: Option<LevelId>) -> TupleSet {
    let target_depth = match level {
        Some(level) => Some(ctx.cube.level(level).ordinal),
        None => set
            .iter()
            .filter_map(|t| t.first())
            .filter(|m| matches!(m, MemberRef::Member(_)))
            .map(|m| ctx.depth(*m))
            .max(),
    };
    let Some(target_depth) = target_depth else {
        return set.to_vec();
    };
    let target_hierarchy = level.map(|l| ctx.cube.level(l).hierarchy);

    let present: HashSet<&Tuple> = set.iter().collect();
    let mut emitted: HashSet<Tuple> = HashSet::new();
    let mut out = Vec::with_capacity(set.len());
    for tuple in set {
        out.push(tuple.clone());
        emitted.insert(tuple.clone());
        let Some(MemberRef::Member(first)) = tuple.first().copied() else {
            continue;
        };
        let member = ctx.cube.member(first);
        if ctx.cube.member_depth(first) != target_depth
            || target_hierarchy.is_some_and(|h| h != member.hierarchy)
        {
            continue;
        }
        for child in ctx.children_of(MemberRef::Member(first)) {
            let mut child_tuple = tuple.clone();
            child_tuple[0] = child;
            if present.contains(&child_tuple) || !emitted.insert(child_tuple.clone()) {
                continue;
            }
            out.push(child_tuple);
        }
    }
    out
}

/// Insert each calculated member whose siblings appear in `set` right after the last tuple
/// holding one of them.
pub fn add_calculated_members(ctx: &EvalContext<'_>, set: &[Tuple]) -> TupleSet {
    let mut out = set.to_vec();
    let Some(first) = set.first() else {
        return out;
    };
    let signature = ctx.tuple_hierarchies(first);

    for (idx, calc) in ctx.scope.calculated_members().iter().enumerate() {
        let Some(position) = signature.iter().position(|h| *h == calc.hierarchy) else {
            continue;
        };
        let calc_ref = MemberRef::Calculated(idx);
        if out.iter().any(|t| t.get(position) == Some(&calc_ref)) {
            continue;
        }
        let is_sibling = |member: MemberRef| match calc.parent {
            None => ctx.hierarchy_of(member) == calc.hierarchy && ctx.parent_of(member).is_none(),
            Some(parent) => ctx.parent_of(member) == Some(MemberRef::Member(parent)),
        };
        let Some(last) = out
            .iter()
            .rposition(|t| t.get(position).is_some_and(|m| is_sibling(*m)))
        else {
            continue;
        };
        let mut tuple = out[last].clone();
        tuple[position] = calc_ref;
        out.insert(last + 1, tuple);
    }
    out
}

fn dedupe(set: impl IntoIterator<Item = Tuple>) -> TupleSet {
    let mut seen = HashSet::new();
    set.into_iter()
        .filter(|tuple| seen.insert(tuple.clone()))
        .collect()
}

/// Concatenation without duplicates, keeping first occurrences.
pub fn union(sets: &[TupleSet]) -> TupleSet {
    dedupe(sets.iter().flatten().cloned())
}

/// Distinct tuples of `a` that do not appear in `b`.
pub fn except(a: &[Tuple], b: &[Tuple]) -> TupleSet {
    let remove: HashSet<&Tuple> = b.iter().collect();
    dedupe(a.iter().filter(|t| !remove.contains(t)).cloned())
}

pub fn distinct(set: &[Tuple]) -> TupleSet {
    dedupe(set.iter().cloned())
}

/// Evaluate a set expression into its ordered tuples.
pub fn eval_set(ctx: &EvalContext<'_>, expr: &Expr) -> MdxResult<TupleSet> {
    match expr {
        Expr::Path(path) => resolved_to_set(ctx, resolve_path(ctx, path)?),
        Expr::Property { path, property } => eval_property(ctx, path, *property),
        Expr::Set(items) => {
            let mut out = Vec::new();
            for item in items {
                out.extend(eval_set(ctx, item)?);
            }
            ctx.check_uniform(&out, expr)?;
            Ok(out)
        }
        Expr::Tuple(items) => {
            let mut tuple = Vec::with_capacity(items.len());
            for item in items {
                let set = eval_set(ctx, item)?;
                match <[Tuple; 1]>::try_from(set) {
                    Ok([members]) => tuple.extend(members),
                    Err(set) => {
                        return Err(MdxError::Eval(format!(
                            "tuple element {item} must be a single member, found {} tuples",
                            set.len()
                        )))
                    }
                }
            }
            ctx.check_tuple(&tuple)?;
            Ok(vec![tuple])
        }
        Expr::Call { function, args } => eval_call(ctx, *function, args),
        Expr::Binary {
            op: BinaryOp::Multiply,
            left,
            right,
        } => crossjoin(ctx, &eval_set(ctx, left)?, &eval_set(ctx, right)?),
        Expr::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } => {
            let sets = [eval_set(ctx, left)?, eval_set(ctx, right)?];
            let out = union(&sets);
            ctx.check_uniform(&out, expr)?;
            Ok(out)
        }
        Expr::Binary { .. }
        | Expr::Unary { .. }
        | Expr::Number(_)
        | Expr::String(_)
        | Expr::Flag(_) => Err(MdxError::Eval(format!(
            "expected a set expression, found {expr}"
        ))),
    }
}

fn resolved_to_set(ctx: &EvalContext<'_>, resolved: Resolved) -> MdxResult<TupleSet> {
    Ok(match resolved {
        Resolved::Member(member) => vec![vec![member]],
        Resolved::Level(level) => ctx
            .cube
            .level(level)
            .members
            .iter()
            .map(|m| vec![MemberRef::Member(*m)])
            .collect(),
        Resolved::Hierarchy(hierarchy) => vec![vec![ctx.default_member(hierarchy)]],
        Resolved::Dimension(dimension) => ctx
            .cube
            .dimension(dimension)
            .hierarchies
            .first()
            .map(|h| vec![vec![ctx.default_member(*h)]])
            .unwrap_or_default(),
        Resolved::Measures => vec![vec![MemberRef::Measure(ctx.cube.default_measure())]],
        Resolved::NamedSet(idx) => ctx.scope.named_set(idx).tuples.clone(),
    })
}

fn calculated_on<'a>(
    ctx: &EvalContext<'a>,
    hierarchy: HierarchyKey,
) -> impl Iterator<Item = Tuple> + 'a {
    ctx.scope
        .calculated_members()
        .iter()
        .enumerate()
        .filter(move |(_, calc)| calc.hierarchy == hierarchy)
        .map(|(idx, _)| vec![MemberRef::Calculated(idx)])
}

fn hierarchy_with_calculated(
    ctx: &EvalContext<'_>,
    hierarchy: HierarchyId,
    property: Property,
) -> TupleSet {
    let mut out = ctx.hierarchy_members(hierarchy);
    if property == Property::AllMembers {
        out.extend(calculated_on(ctx, HierarchyKey::Hierarchy(hierarchy)));
    }
    out
}

fn eval_property(ctx: &EvalContext<'_>, path: &Path, property: Property) -> MdxResult<TupleSet> {
    let resolved = resolve_path(ctx, path)?;
    match (property, resolved) {
        (Property::Members | Property::Children, Resolved::Member(member)) => {
            Ok(ctx.children_of(member).into_iter().map(|m| vec![m]).collect())
        }
        (Property::Parent, Resolved::Member(member)) => {
            Ok(ctx.parent_of(member).map(|p| vec![vec![p]]).unwrap_or_default())
        }
        (Property::Members | Property::AllMembers, Resolved::Measures) => {
            let mut out = ctx.measure_members();
            if property == Property::AllMembers {
                out.extend(calculated_on(ctx, HierarchyKey::Measures));
            }
            Ok(out)
        }
        (Property::Members | Property::AllMembers, Resolved::Hierarchy(hierarchy)) => {
            Ok(hierarchy_with_calculated(ctx, hierarchy, property))
        }
        (Property::Members | Property::AllMembers, Resolved::Dimension(dimension)) => {
            let hierarchy = ctx
                .cube
                .dimension(dimension)
                .hierarchies
                .first()
                .copied()
                .ok_or_else(|| MdxError::Resolution {
                    path: path.to_string(),
                })?;
            Ok(hierarchy_with_calculated(ctx, hierarchy, property))
        }
        (Property::Members | Property::AllMembers, Resolved::Level(level)) => {
            let mut out = resolved_to_set(ctx, Resolved::Level(level))?;
            if property == Property::AllMembers {
                let level = ctx.cube.level(level);
                let key = HierarchyKey::Hierarchy(level.hierarchy);
                out.extend(calculated_on(ctx, key).filter(|t| ctx.depth(t[0]) == level.ordinal));
            }
            Ok(out)
        }
        (Property::Members | Property::AllMembers, Resolved::NamedSet(idx)) => {
            Ok(ctx.scope.named_set(idx).tuples.clone())
        }
        (property, _) => Err(MdxError::Eval(format!(
            "{} is not valid on {path}",
            property.name()
        ))),
    }
}

fn arg(function: Function, args: &[Expr], idx: usize) -> MdxResult<&Expr> {
    args.get(idx).ok_or_else(|| {
        MdxError::Eval(format!(
            "{} is missing argument {}",
            function.name(),
            idx + 1
        ))
    })
}

fn eval_call(ctx: &EvalContext<'_>, function: Function, args: &[Expr]) -> MdxResult<TupleSet> {
    let flag = |idx: usize, expected: Flag| -> MdxResult<bool> {
        match args.get(idx) {
            None => Ok(false),
            Some(Expr::Flag(flag)) if *flag == expected => Ok(true),
            Some(other) => Err(MdxError::Eval(format!(
                "unexpected argument {other} to {}",
                function.name()
            ))),
        }
    };

    match function {
        Function::Hierarchize => {
            let set = eval_set(ctx, arg(function, args, 0)?)?;
            Ok(hierarchize(ctx, &set, flag(1, Flag::Post)?))
        }
        Function::AddCalculatedMembers => {
            let set = eval_set(ctx, arg(function, args, 0)?)?;
            Ok(add_calculated_members(ctx, &set))
        }
        Function::DrilldownMember => {
            let set = eval_set(ctx, arg(function, args, 0)?)?;
            let targets = eval_set(ctx, arg(function, args, 1)?)?;
            Ok(drilldown_member(
                ctx,
                &set,
                &targets,
                flag(2, Flag::Recursive)?,
            ))
        }
        Function::DrilldownLevel => {
            let set = eval_set(ctx, arg(function, args, 0)?)?;
            let level = match args.get(1) {
                None => None,
                Some(Expr::Path(path)) => match resolve_path(ctx, path)? {
                    Resolved::Level(level) => Some(level),
                    _ => {
                        return Err(MdxError::Eval(format!(
                            "DrilldownLevel expects a level, found {path}"
                        )))
                    }
                },
                Some(other) => {
                    return Err(MdxError::Eval(format!(
                        "DrilldownLevel expects a level, found {other}"
                    )))
                }
            };
            Ok(drilldown_level(ctx, &set, level))
        }
        Function::CrossJoin => {
            let mut out = eval_set(ctx, arg(function, args, 0)?)?;
            for next in args.iter().skip(1) {
                out = crossjoin(ctx, &out, &eval_set(ctx, next)?)?;
            }
            Ok(out)
        }
        Function::Union => {
            let sets = args
                .iter()
                .map(|item| eval_set(ctx, item))
                .collect::<MdxResult<Vec<_>>>()?;
            let out = union(&sets);
            if let Some(first) = args.first() {
                ctx.check_uniform(&out, first)?;
            }
            Ok(out)
        }
        Function::Except => {
            let a = eval_set(ctx, arg(function, args, 0)?)?;
            let b = eval_set(ctx, arg(function, args, 1)?)?;
            Ok(except(&a, &b))
        }
        Function::Distinct => Ok(distinct(&eval_set(ctx, arg(function, args, 0)?)?)),
    }
}
