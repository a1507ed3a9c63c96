use crate::ast::Path;
use crate::error::{MdxError, MdxResult};
use crate::eval::{EvalContext, MemberRef};
use crate::model::{Cube, DimensionId, HierarchyId, LevelId, MemberId, ObjectRef};

/// What a name denotes in the context of one query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resolved {
    Dimension(DimensionId),
    Hierarchy(HierarchyId),
    Level(LevelId),
    Member(MemberRef),
    /// The `[Measures]` pseudo-dimension.
    Measures,
    NamedSet(usize),
}

fn unresolved(path: &Path) -> MdxError {
    MdxError::Resolution {
        path: path.to_string(),
    }
}

/// Resolve a dotted name, case-insensitively.
///
/// Query-scoped definitions win over cube objects. Cube objects are looked up by exact unique
/// name first, then walked structurally (dimension, optional hierarchy, optional level, then the
/// caption path from the top level), and finally as an abbreviated path that omits the
/// dimension and hierarchy.
pub(crate) fn resolve_path(ctx: &EvalContext<'_>, path: &Path) -> MdxResult<Resolved> {
    if path.segments.is_empty() {
        return Err(unresolved(path));
    }
    if let Some(idx) = ctx.scope.find_member(path) {
        return Ok(Resolved::Member(MemberRef::Calculated(idx)));
    }
    if let Some(idx) = ctx.scope.find_set(path) {
        return Ok(Resolved::NamedSet(idx));
    }

    let cube = ctx.cube;
    if path.segments[0].eq_ignore_ascii_case("Measures") {
        return match &path.segments[1..] {
            [] => Ok(Resolved::Measures),
            [name] => cube
                .measure_by_name(name)
                .map(|m| Resolved::Member(MemberRef::Measure(m)))
                .ok_or_else(|| unresolved(path)),
            _ => Err(unresolved(path)),
        };
    }

    if let Some(obj) = cube.find(&path.to_string()) {
        return Ok(match obj {
            ObjectRef::Dimension(id) => Resolved::Dimension(id),
            ObjectRef::Hierarchy(id) => Resolved::Hierarchy(id),
            ObjectRef::Level(id) => Resolved::Level(id),
            ObjectRef::Member(id) => Resolved::Member(MemberRef::Member(id)),
            ObjectRef::Measure(id) => Resolved::Member(MemberRef::Measure(id)),
        });
    }

    if let Some(dimension) = cube.dimension_by_name(&path.segments[0]) {
        return resolve_in_dimension(cube, dimension, &path.segments[1..])
            .ok_or_else(|| unresolved(path));
    }

    let mut matches = cube
        .hierarchies()
        .filter_map(|(id, _)| resolve_in_hierarchy(cube, id, &path.segments, false));
    let first = matches.next().ok_or_else(|| unresolved(path))?;
    if matches.next().is_some() {
        log::warn!("abbreviated name {path} is ambiguous; using the first matching hierarchy");
    }
    Ok(first)
}

fn resolve_in_dimension(cube: &Cube, dimension: DimensionId, rest: &[String]) -> Option<Resolved> {
    let Some(first) = rest.first() else {
        return Some(Resolved::Dimension(dimension));
    };
    let hierarchies = &cube.dimension(dimension).hierarchies;
    if let Some(hierarchy) = hierarchies
        .iter()
        .copied()
        .find(|h| cube.hierarchy(*h).name.eq_ignore_ascii_case(first))
    {
        if let Some(found) = resolve_in_hierarchy(cube, hierarchy, &rest[1..], true) {
            return Some(found);
        }
    }
    hierarchies
        .iter()
        .find_map(|h| resolve_in_hierarchy(cube, *h, rest, false))
}

/// Resolve `rest` below a hierarchy: an optional level segment, then captions from the top
/// level (optionally starting at the All caption).
fn resolve_in_hierarchy(
    cube: &Cube,
    hierarchy: HierarchyId,
    rest: &[String],
    named: bool,
) -> Option<Resolved> {
    let Some(first) = rest.first() else {
        return named.then_some(Resolved::Hierarchy(hierarchy));
    };
    let h = cube.hierarchy(hierarchy);

    if let Some(level) = h
        .levels
        .iter()
        .copied()
        .find(|l| cube.level(*l).name.eq_ignore_ascii_case(first))
    {
        let captions = &rest[1..];
        if captions.is_empty() {
            return Some(Resolved::Level(level));
        }
        if let Some(member) = walk_from_all(cube, h.all_member, captions) {
            return Some(Resolved::Member(MemberRef::Member(member)));
        }
        if let [caption] = captions {
            if let Some(member) = match_caption(cube, &cube.level(level).members, caption) {
                return Some(Resolved::Member(MemberRef::Member(member)));
            }
        }
        return None;
    }

    walk_from_all(cube, h.all_member, rest).map(|m| Resolved::Member(MemberRef::Member(m)))
}

/// Follow `captions` from the All member, which may itself be named first.
fn walk_from_all(cube: &Cube, all_member: MemberId, captions: &[String]) -> Option<MemberId> {
    let all = cube.member(all_member);
    let captions = match captions.split_first() {
        Some((first, rest)) if all.caption.eq_ignore_ascii_case(first) => rest,
        _ => captions,
    };
    let mut current = all_member;
    for caption in captions {
        current = match_caption(cube, cube.member_children(current), caption)?;
    }
    Some(current)
}

/// The member captioned exactly `caption`, else the first one matching it case-insensitively.
fn match_caption(cube: &Cube, members: &[MemberId], caption: &str) -> Option<MemberId> {
    let caption_of = |m: MemberId| cube.member(m).caption.as_str();
    members
        .iter()
        .copied()
        .find(|m| caption_of(*m) == caption)
        .or_else(|| {
            members
                .iter()
                .copied()
                .find(|m| caption_of(*m).eq_ignore_ascii_case(caption))
        })
}
