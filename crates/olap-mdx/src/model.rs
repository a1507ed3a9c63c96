use crate::source::AggregationKind;
use olap_table::Table;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Display-info bitmask reported for stored members.
pub const MEMBER_DISPLAY_INFO: u32 = 131_076;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(idx: usize) -> Self {
                Self(idx as u32)
            }
        }
    };
}

arena_id!(DimensionId);
arena_id!(HierarchyId);
arena_id!(LevelId);
arena_id!(MemberId);
arena_id!(MeasureId);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HierarchyKind {
    /// One level per declared column.
    Regular,
    /// Levels derived from a self-referencing parent key.
    ParentChild,
}

#[derive(Clone, Debug)]
pub struct Dimension {
    pub name: String,
    pub unique_name: String,
    pub table: String,
    pub hierarchies: Vec<HierarchyId>,
}

#[derive(Clone, Debug)]
pub struct Hierarchy {
    pub name: String,
    pub unique_name: String,
    pub dimension: DimensionId,
    pub kind: HierarchyKind,
    /// Level 0 is the `(All)` level, so a level's ordinal equals its index here.
    pub levels: Vec<LevelId>,
    pub all_member: MemberId,
}

#[derive(Clone, Debug)]
pub struct Level {
    pub name: String,
    pub unique_name: String,
    pub hierarchy: HierarchyId,
    pub ordinal: usize,
    /// Members in source order.
    pub members: Vec<MemberId>,
    pub source_column: Option<String>,
}

#[derive(Debug)]
pub struct Member {
    pub caption: String,
    pub unique_name: String,
    pub level: LevelId,
    pub hierarchy: HierarchyId,
    pub parent: Option<MemberId>,
    /// Position within the member's level.
    pub position: usize,
    pub display_info: u32,
    pub(crate) children: OnceLock<Vec<MemberId>>,
}

impl Member {
    pub fn is_all(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct Measure {
    pub name: String,
    pub unique_name: String,
    pub column: String,
    pub(crate) column_idx: usize,
    pub aggregation: AggregationKind,
    pub format_string: Option<String>,
}

/// A tagged reference to any named object of a cube.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Dimension(DimensionId),
    Hierarchy(HierarchyId),
    Level(LevelId),
    Member(MemberId),
    Measure(MeasureId),
}

/// The immutable multidimensional model built from a data-source binding.
///
/// Objects live in id-indexed arenas; parent and child links are ids. The only state mutated
/// after construction is the per-member children memo.
#[derive(Debug)]
pub struct Cube {
    pub(crate) name: String,
    pub(crate) dimensions: Vec<Dimension>,
    pub(crate) hierarchies: Vec<Hierarchy>,
    pub(crate) levels: Vec<Level>,
    pub(crate) members: Vec<Member>,
    pub(crate) measures: Vec<Measure>,
    pub(crate) fact_table: Arc<Table>,
    /// Fact rows bound directly to each member (not including descendants).
    pub(crate) member_fact_rows: Vec<Vec<u32>>,
    /// Unique name -> object.
    pub(crate) names: HashMap<String, ObjectRef>,
    /// Lower-cased unique name -> first object registered under it.
    pub(crate) folded_names: HashMap<String, ObjectRef>,
}

impl Cube {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fact_table(&self) -> &Table {
        &self.fact_table
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (DimensionId, &Dimension)> + '_ {
        self.dimensions
            .iter()
            .enumerate()
            .map(|(idx, d)| (DimensionId::from_index(idx), d))
    }

    pub fn hierarchies(&self) -> impl Iterator<Item = (HierarchyId, &Hierarchy)> + '_ {
        self.hierarchies
            .iter()
            .enumerate()
            .map(|(idx, h)| (HierarchyId::from_index(idx), h))
    }

    pub fn measures(&self) -> impl Iterator<Item = (MeasureId, &Measure)> + '_ {
        self.measures
            .iter()
            .enumerate()
            .map(|(idx, m)| (MeasureId::from_index(idx), m))
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn dimension(&self, id: DimensionId) -> &Dimension {
        &self.dimensions[id.index()]
    }

    pub fn hierarchy(&self, id: HierarchyId) -> &Hierarchy {
        &self.hierarchies[id.index()]
    }

    pub fn level(&self, id: LevelId) -> &Level {
        &self.levels[id.index()]
    }

    pub fn member(&self, id: MemberId) -> &Member {
        &self.members[id.index()]
    }

    pub fn measure(&self, id: MeasureId) -> &Measure {
        &self.measures[id.index()]
    }

    /// The first declared measure.
    pub fn default_measure(&self) -> MeasureId {
        MeasureId(0)
    }

    pub fn dimension_by_name(&self, name: &str) -> Option<DimensionId> {
        self.dimensions
            .iter()
            .position(|d| d.name.eq_ignore_ascii_case(name))
            .map(DimensionId::from_index)
    }

    pub fn measure_by_name(&self, name: &str) -> Option<MeasureId> {
        self.measures
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(name))
            .map(MeasureId::from_index)
    }

    /// Look up any object by its unique name. An exact match wins; otherwise the name is matched
    /// case-insensitively against the first object registered under it.
    pub fn find(&self, unique_name: &str) -> Option<ObjectRef> {
        self.names
            .get(unique_name)
            .or_else(|| self.folded_names.get(&unique_name.to_lowercase()))
            .copied()
    }

    /// Immediate children of `member` in source order, computed on first request.
    pub fn member_children(&self, member: MemberId) -> &[MemberId] {
        let m = self.member(member);
        m.children.get_or_init(|| {
            let level = self.level(m.level);
            let hierarchy = self.hierarchy(m.hierarchy);
            let Some(next) = hierarchy.levels.get(level.ordinal + 1) else {
                return Vec::new();
            };
            self.level(*next)
                .members
                .iter()
                .copied()
                .filter(|child| self.member(*child).parent == Some(member))
                .collect()
        })
    }

    /// Ids of `member` and every member below it.
    pub fn descendants_inclusive(&self, member: MemberId) -> Vec<MemberId> {
        let mut out = vec![member];
        let mut idx = 0;
        while idx < out.len() {
            let current = out[idx];
            out.extend_from_slice(self.member_children(current));
            idx += 1;
        }
        out
    }

    /// `true` when `ancestor` is `member` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: MemberId, member: MemberId) -> bool {
        let mut current = Some(member);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.member(id).parent;
        }
        false
    }

    /// Level positions along the path from the top level down to `member`. The All member has
    /// an empty path, so ancestors are prefixes of their descendants' paths.
    pub(crate) fn member_path_key(&self, member: MemberId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = member;
        loop {
            let m = self.member(current);
            let Some(parent) = m.parent else {
                break;
            };
            path.push(m.position);
            current = parent;
        }
        path.reverse();
        path
    }

    pub(crate) fn member_depth(&self, member: MemberId) -> usize {
        self.level(self.member(member).level).ordinal
    }

    pub fn unique_name(&self, obj: ObjectRef) -> &str {
        match obj {
            ObjectRef::Dimension(id) => &self.dimension(id).unique_name,
            ObjectRef::Hierarchy(id) => &self.hierarchy(id).unique_name,
            ObjectRef::Level(id) => &self.level(id).unique_name,
            ObjectRef::Member(id) => &self.member(id).unique_name,
            ObjectRef::Measure(id) => &self.measure(id).unique_name,
        }
    }

    pub fn caption(&self, obj: ObjectRef) -> &str {
        match obj {
            ObjectRef::Dimension(id) => &self.dimension(id).name,
            ObjectRef::Hierarchy(id) => &self.hierarchy(id).name,
            ObjectRef::Level(id) => &self.level(id).name,
            ObjectRef::Member(id) => &self.member(id).caption,
            ObjectRef::Measure(id) => &self.measure(id).name,
        }
    }

    pub fn parent(&self, obj: ObjectRef) -> Option<ObjectRef> {
        match obj {
            ObjectRef::Dimension(_) | ObjectRef::Measure(_) => None,
            ObjectRef::Hierarchy(id) => Some(ObjectRef::Dimension(self.hierarchy(id).dimension)),
            ObjectRef::Level(id) => Some(ObjectRef::Hierarchy(self.level(id).hierarchy)),
            ObjectRef::Member(id) => self.member(id).parent.map(ObjectRef::Member),
        }
    }

    pub fn children(&self, obj: ObjectRef) -> Vec<ObjectRef> {
        match obj {
            ObjectRef::Dimension(id) => self
                .dimension(id)
                .hierarchies
                .iter()
                .copied()
                .map(ObjectRef::Hierarchy)
                .collect(),
            ObjectRef::Hierarchy(id) => self
                .hierarchy(id)
                .levels
                .iter()
                .copied()
                .map(ObjectRef::Level)
                .collect(),
            ObjectRef::Level(id) => self
                .level(id)
                .members
                .iter()
                .copied()
                .map(ObjectRef::Member)
                .collect(),
            ObjectRef::Member(id) => self
                .member_children(id)
                .iter()
                .copied()
                .map(ObjectRef::Member)
                .collect(),
            ObjectRef::Measure(_) => Vec::new(),
        }
    }
}

/// Pre-order comparison of two path keys: ancestors sort before their descendants.
pub(crate) fn compare_paths_pre(a: &[usize], b: &[usize]) -> Ordering {
    a.cmp(b)
}

/// Post-order comparison: descendants sort before their ancestors, siblings keep source order.
pub(crate) fn compare_paths_post(a: &[usize], b: &[usize]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    b.len().cmp(&a.len())
}

/// Bracket one name segment, doubling any closing bracket.
pub(crate) fn quote_segment(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_order_puts_descendants_first() {
        assert_eq!(compare_paths_post(&[0], &[0, 1]), Ordering::Greater);
        assert_eq!(compare_paths_post(&[0, 1], &[1]), Ordering::Less);
        assert_eq!(compare_paths_post(&[], &[2]), Ordering::Greater);
        assert_eq!(compare_paths_pre(&[], &[2]), Ordering::Less);
    }

    #[test]
    fn segments_escape_closing_brackets() {
        assert_eq!(quote_segment("a]b"), "[a]]b]");
    }
}
