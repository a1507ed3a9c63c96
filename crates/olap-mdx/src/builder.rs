use crate::error::{MdxError, MdxResult, SchemaError};
use crate::model::{
    quote_segment, Cube, Dimension, DimensionId, Hierarchy, HierarchyId, HierarchyKind, Level,
    LevelId, Measure, MeasureId, Member, MemberId, ObjectRef, MEMBER_DISPLAY_INFO,
};
use crate::source::{AggregationKind, CubeSource, DataSource, DimensionSource};
use olap_table::{Table, Value};
use ordered_float::OrderedFloat;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

const BLANK_CAPTION: &str = "(Blank)";

/// Hashable form of a key or level value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum MemberKey {
    Null,
    Number(OrderedFloat<f64>),
    Boolean(bool),
    String(Arc<str>),
}

impl MemberKey {
    /// Key of a level value. A literal `(Blank)` is the same member as a null value.
    fn level_value(value: &Value) -> Self {
        match value {
            Value::String(s) if &**s == BLANK_CAPTION => MemberKey::Null,
            other => MemberKey::from(other),
        }
    }
}

impl From<&Value> for MemberKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => MemberKey::Null,
            Value::Number(n) => MemberKey::Number(OrderedFloat(*n)),
            Value::Boolean(b) => MemberKey::Boolean(*b),
            Value::String(s) => MemberKey::String(s.clone()),
        }
    }
}

fn caption_of(value: &Value) -> String {
    if value.is_null() {
        BLANK_CAPTION.to_string()
    } else {
        value.to_string()
    }
}

/// Build the cube graph for `source` over the tables in `data`.
pub fn build_cube(source: &CubeSource, data: &DataSource) -> MdxResult<Cube> {
    let fact = data.require_table(&source.fact_table)?.clone();
    if source.measures.is_empty() {
        return Err(SchemaError::NoMeasures(source.name.clone()).into());
    }

    let mut builder = CubeBuilder::new(source.name.clone(), fact);
    for dimension in &source.dimensions {
        builder.add_dimension(dimension, data)?;
    }
    for measure in &source.measures {
        builder.add_measure(
            &measure.name,
            &measure.column,
            &measure.aggregation,
            measure.format_string.clone(),
        )?;
    }

    let cube = builder.finish();
    log::debug!(
        "built cube {}: {} dimensions, {} members, {} measures, {} fact rows",
        cube.name,
        cube.dimensions.len(),
        cube.members.len(),
        cube.measures.len(),
        cube.fact_table.row_count()
    );
    Ok(cube)
}

struct CubeBuilder {
    name: String,
    fact: Arc<Table>,
    dimensions: Vec<Dimension>,
    hierarchies: Vec<Hierarchy>,
    levels: Vec<Level>,
    members: Vec<Member>,
    /// Bracketed caption chain below the All member, per member.
    member_paths: Vec<String>,
    measures: Vec<Measure>,
    member_fact_rows: Vec<Vec<u32>>,
    names: HashMap<String, ObjectRef>,
    folded_names: HashMap<String, ObjectRef>,
}

impl CubeBuilder {
    fn new(name: String, fact: Arc<Table>) -> Self {
        Self {
            name,
            fact,
            dimensions: Vec::new(),
            hierarchies: Vec::new(),
            levels: Vec::new(),
            members: Vec::new(),
            member_paths: Vec::new(),
            measures: Vec::new(),
            member_fact_rows: Vec::new(),
            names: HashMap::new(),
            folded_names: HashMap::new(),
        }
    }

    fn finish(self) -> Cube {
        Cube {
            name: self.name,
            dimensions: self.dimensions,
            hierarchies: self.hierarchies,
            levels: self.levels,
            members: self.members,
            measures: self.measures,
            fact_table: self.fact,
            member_fact_rows: self.member_fact_rows,
            names: self.names,
            folded_names: self.folded_names,
        }
    }

    fn register(&mut self, unique_name: &str, obj: ObjectRef) -> MdxResult<()> {
        self.folded_names
            .entry(unique_name.to_lowercase())
            .or_insert(obj);
        if self.names.insert(unique_name.to_string(), obj).is_some() {
            return Err(SchemaError::DuplicateMember {
                unique_name: unique_name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn add_dimension(&mut self, source: &DimensionSource, data: &DataSource) -> MdxResult<()> {
        if source.name.eq_ignore_ascii_case("Measures") {
            return Err(SchemaError::ReservedName(source.name.clone()).into());
        }
        if self
            .dimensions
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(&source.name))
        {
            return Err(SchemaError::DuplicateDimension(source.name.clone()).into());
        }
        if source.level_columns.is_empty() {
            return Err(SchemaError::NoLevels {
                dimension: source.name.clone(),
            }
            .into());
        }
        if source.parent_column.is_some() && source.level_columns.len() != 1 {
            return Err(SchemaError::ParentChildLevels {
                dimension: source.name.clone(),
            }
            .into());
        }

        let table = data.require_table(&source.table)?.clone();
        if table.is_empty() {
            return Err(SchemaError::EmptyDimensionTable {
                dimension: source.name.clone(),
                table: source.table.clone(),
            }
            .into());
        }
        let key_idx = table.require_column(&source.key_column)?;
        let rows_by_key = key_rows(&table, key_idx, &source.key_column)?;

        let dimension_id = DimensionId::from_index(self.dimensions.len());
        let hierarchy_id = HierarchyId::from_index(self.hierarchies.len());
        let dimension_unique = quote_segment(&source.name);
        let hierarchy_unique = format!("{dimension_unique}.{}", quote_segment(&source.name));
        self.register(&dimension_unique, ObjectRef::Dimension(dimension_id))?;
        self.register(&hierarchy_unique, ObjectRef::Hierarchy(hierarchy_id))?;
        self.dimensions.push(Dimension {
            name: source.name.clone(),
            unique_name: dimension_unique,
            table: source.table.clone(),
            hierarchies: vec![hierarchy_id],
        });

        let kind = if source.parent_column.is_some() {
            HierarchyKind::ParentChild
        } else {
            HierarchyKind::Regular
        };
        let all_level = self.add_level(hierarchy_id, &hierarchy_unique, "(All)", 0, None)?;
        // `all_member` is patched once the All member exists.
        self.hierarchies.push(Hierarchy {
            name: source.name.clone(),
            unique_name: hierarchy_unique.clone(),
            dimension: dimension_id,
            kind,
            levels: vec![all_level],
            all_member: MemberId(0),
        });
        let all_caption = source.all_caption();
        let all_unique = format!("{hierarchy_unique}.{}", quote_segment(&all_caption));
        let all_member = self.push_member(
            all_caption,
            all_unique,
            all_level,
            hierarchy_id,
            None,
            String::new(),
        )?;
        self.hierarchies[hierarchy_id.index()].all_member = all_member;

        let row_members = match &source.parent_column {
            None => self.add_regular_levels(source, &table, hierarchy_id, all_member)?,
            Some(parent_column) => self.add_parent_child_levels(
                source,
                &table,
                parent_column,
                &rows_by_key,
                hierarchy_id,
                all_member,
            )?,
        };

        self.bind_facts(source, &rows_by_key, &row_members)
    }

    fn add_level(
        &mut self,
        hierarchy: HierarchyId,
        hierarchy_unique: &str,
        name: &str,
        ordinal: usize,
        source_column: Option<String>,
    ) -> MdxResult<LevelId> {
        let id = LevelId::from_index(self.levels.len());
        let unique_name = format!("{hierarchy_unique}.{}", quote_segment(name));
        self.register(&unique_name, ObjectRef::Level(id))?;
        self.levels.push(Level {
            name: name.to_string(),
            unique_name,
            hierarchy,
            ordinal,
            members: Vec::new(),
            source_column,
        });
        if let Some(h) = self.hierarchies.get_mut(hierarchy.index()) {
            h.levels.push(id);
        }
        Ok(id)
    }

    fn push_member(
        &mut self,
        caption: String,
        unique_name: String,
        level: LevelId,
        hierarchy: HierarchyId,
        parent: Option<MemberId>,
        path: String,
    ) -> MdxResult<MemberId> {
        let id = MemberId::from_index(self.members.len());
        self.register(&unique_name, ObjectRef::Member(id))?;
        let position = self.levels[level.index()].members.len();
        self.levels[level.index()].members.push(id);
        self.members.push(Member {
            caption,
            unique_name,
            level,
            hierarchy,
            parent,
            position,
            display_info: MEMBER_DISPLAY_INFO,
            children: OnceLock::new(),
        });
        self.member_paths.push(path);
        self.member_fact_rows.push(Vec::new());
        Ok(id)
    }

    /// Create a member below `parent` on `level`, deriving its unique name from the caption
    /// chain.
    fn push_child(
        &mut self,
        caption: String,
        level: LevelId,
        hierarchy: HierarchyId,
        parent: MemberId,
    ) -> MdxResult<MemberId> {
        let parent_path = &self.member_paths[parent.index()];
        let path = if parent_path.is_empty() {
            quote_segment(&caption)
        } else {
            format!("{parent_path}.{}", quote_segment(&caption))
        };
        let unique_name = format!("{}.{path}", self.levels[level.index()].unique_name);
        self.push_member(caption, unique_name, level, hierarchy, Some(parent), path)
    }

    /// One level per declared column; returns the deepest member of every dimension row.
    fn add_regular_levels(
        &mut self,
        source: &DimensionSource,
        table: &Table,
        hierarchy: HierarchyId,
        all_member: MemberId,
    ) -> MdxResult<Vec<MemberId>> {
        let hierarchy_unique = self.hierarchies[hierarchy.index()].unique_name.clone();
        let mut levels = Vec::with_capacity(source.level_columns.len());
        for (depth, column) in source.level_columns.iter().enumerate() {
            let column_idx = table.require_column(column)?;
            let level = self.add_level(
                hierarchy,
                &hierarchy_unique,
                column,
                depth + 1,
                Some(column.clone()),
            )?;
            levels.push((level, column_idx));
        }

        let mut child_index: HashMap<(MemberId, MemberKey), MemberId> = HashMap::new();
        let mut row_members = Vec::with_capacity(table.row_count());
        for row in 0..table.row_count() {
            let mut parent = all_member;
            for &(level, column_idx) in &levels {
                let value = table.get_cell(row, column_idx).unwrap_or(&Value::Null);
                let key = (parent, MemberKey::level_value(value));
                parent = match child_index.get(&key) {
                    Some(existing) => *existing,
                    None => {
                        let id = self.push_child(caption_of(value), level, hierarchy, parent)?;
                        child_index.insert(key, id);
                        id
                    }
                };
            }
            row_members.push(parent);
        }
        Ok(row_members)
    }

    /// One member per dimension row, nested through the parent key column; levels are created
    /// per depth.
    fn add_parent_child_levels(
        &mut self,
        source: &DimensionSource,
        table: &Table,
        parent_column: &str,
        rows_by_key: &HashMap<MemberKey, usize>,
        hierarchy: HierarchyId,
        all_member: MemberId,
    ) -> MdxResult<Vec<MemberId>> {
        let parent_idx = table.require_column(parent_column)?;
        let key_idx = table.require_column(&source.key_column)?;
        let caption_column = &source.level_columns[0];
        let caption_idx = table.require_column(caption_column)?;

        let key_text = |row: usize| {
            table
                .get_cell(row, key_idx)
                .map(ToString::to_string)
                .unwrap_or_default()
        };

        let mut parents: Vec<Option<usize>> = Vec::with_capacity(table.row_count());
        for row in 0..table.row_count() {
            let parent = table.get_cell(row, parent_idx).unwrap_or(&Value::Null);
            if parent.is_null() {
                parents.push(None);
                continue;
            }
            match rows_by_key.get(&MemberKey::from(parent)) {
                Some(parent_row) => parents.push(Some(*parent_row)),
                None => {
                    return Err(SchemaError::UnknownParent {
                        table: table.name().to_string(),
                        key: key_text(row),
                        parent: parent.to_string(),
                    }
                    .into())
                }
            }
        }

        let mut depths: Vec<Option<usize>> = vec![None; table.row_count()];
        for row in 0..table.row_count() {
            let mut chain = Vec::new();
            let mut on_chain = HashSet::new();
            let mut current = Some(row);
            let mut base = 0;
            while let Some(r) = current {
                if let Some(depth) = depths[r] {
                    base = depth;
                    break;
                }
                if !on_chain.insert(r) {
                    return Err(SchemaError::ParentCycle {
                        table: table.name().to_string(),
                        key: key_text(r),
                    }
                    .into());
                }
                chain.push(r);
                current = parents[r];
            }
            for (offset, r) in chain.iter().rev().enumerate() {
                depths[*r] = Some(base + offset + 1);
            }
        }
        let depths: Vec<usize> = depths.into_iter().map(|d| d.unwrap_or(1)).collect();
        let max_depth = depths.iter().copied().max().unwrap_or(0);

        let hierarchy_unique = self.hierarchies[hierarchy.index()].unique_name.clone();
        let mut levels = Vec::with_capacity(max_depth);
        for depth in 1..=max_depth {
            levels.push(self.add_level(
                hierarchy,
                &hierarchy_unique,
                &format!("Level {depth:02}"),
                depth,
                Some(caption_column.clone()),
            )?);
        }

        let mut row_members = vec![all_member; table.row_count()];
        for depth in 1..=max_depth {
            for row in (0..table.row_count()).filter(|r| depths[*r] == depth) {
                let parent = parents[row].map_or(all_member, |p| row_members[p]);
                let value = table.get_cell(row, caption_idx).unwrap_or(&Value::Null);
                row_members[row] =
                    self.push_child(caption_of(value), levels[depth - 1], hierarchy, parent)?;
            }
        }
        Ok(row_members)
    }

    fn bind_facts(
        &mut self,
        source: &DimensionSource,
        rows_by_key: &HashMap<MemberKey, usize>,
        row_members: &[MemberId],
    ) -> MdxResult<()> {
        let fact = self.fact.clone();
        let fk_idx = fact.require_column(&source.foreign_key)?;
        let Some(keys) = fact.column(fk_idx) else {
            return Ok(());
        };
        for (row, key) in keys.iter().enumerate() {
            let Some(dim_row) = rows_by_key.get(&MemberKey::from(key)) else {
                return Err(SchemaError::UnmatchedForeignKey {
                    fact_table: fact.name().to_string(),
                    column: source.foreign_key.clone(),
                    row,
                    key: key.to_string(),
                    dimension: source.name.clone(),
                }
                .into());
            };
            let member = row_members[*dim_row];
            self.member_fact_rows[member.index()].push(row as u32);
        }
        Ok(())
    }

    fn add_measure(
        &mut self,
        name: &str,
        column: &str,
        aggregation: &str,
        format_string: Option<String>,
    ) -> MdxResult<()> {
        if self
            .measures
            .iter()
            .any(|m| m.name.eq_ignore_ascii_case(name))
        {
            return Err(SchemaError::DuplicateMeasure(name.to_string()).into());
        }
        let column_idx = self.fact.require_column(column)?;
        if !self
            .fact
            .column_type(column_idx)
            .is_some_and(|t| t.is_numeric())
        {
            return Err(SchemaError::NonNumericMeasure {
                measure: name.to_string(),
                column: column.to_string(),
            }
            .into());
        }
        let aggregation =
            AggregationKind::parse(aggregation).ok_or_else(|| MdxError::Aggregation {
                measure: name.to_string(),
                reason: format!("unsupported aggregation function {aggregation:?}"),
            })?;

        let id = MeasureId::from_index(self.measures.len());
        let unique_name = format!("[Measures].{}", quote_segment(name));
        self.register(&unique_name, ObjectRef::Measure(id))?;
        self.measures.push(Measure {
            name: name.to_string(),
            unique_name,
            column: column.to_string(),
            column_idx,
            aggregation,
            format_string,
        });
        Ok(())
    }
}

fn key_rows(
    table: &Table,
    key_idx: usize,
    key_column: &str,
) -> MdxResult<HashMap<MemberKey, usize>> {
    let mut rows = HashMap::with_capacity(table.row_count());
    for (row, value) in table.column(key_idx).unwrap_or(&[]).iter().enumerate() {
        if rows.insert(MemberKey::from(value), row).is_some() {
            return Err(SchemaError::DuplicateKey {
                table: table.name().to_string(),
                column: key_column.to_string(),
                key: value.to_string(),
            }
            .into());
        }
    }
    Ok(rows)
}
