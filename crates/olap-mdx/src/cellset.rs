//! Assembles evaluated axes and aggregated cells into a [`Cellset`].

use crate::aggregate::{leading_calculated, Aggregator, CellValue, Coordinate, Slot};
use crate::ast::{axis_name, SelectStatement};
use crate::calc::{QueryScope, Scalar};
use crate::engine::QueryOptions;
use crate::error::{MdxError, MdxResult};
use crate::eval::{eval_set, EvalContext, HierarchyKey, MemberRef, Tuple, TupleSet};
use crate::format::format_value;
use crate::model::Cube;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MEASURES_LEVEL_UNIQUE_NAME: &str = "[Measures].[MeasuresLevel]";
pub const DEFAULT_BACK_COLOR: u32 = 16_777_215;
pub const DEFAULT_FORE_COLOR: u32 = 0;
pub const DEFAULT_FONT_FLAGS: u32 = 0;

/// One member of an axis tuple, with the properties pivot clients display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisMember {
    pub unique_name: String,
    pub caption: String,
    pub level_unique_name: String,
    pub level_number: usize,
    pub parent_unique_name: Option<String>,
    pub hierarchy_unique_name: String,
    pub display_info: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Axis {
    pub name: String,
    /// Unique names of the hierarchies every tuple spans, in tuple order.
    pub hierarchies: Vec<String>,
    pub tuples: Vec<Vec<AxisMember>>,
    pub dimension_properties: Vec<String>,
}

impl Axis {
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn unique_names(&self) -> Vec<Vec<&str>> {
        self.tuples
            .iter()
            .map(|tuple| tuple.iter().map(|m| m.unique_name.as_str()).collect())
            .collect()
    }

    pub fn captions(&self) -> Vec<Vec<&str>> {
        self.tuples
            .iter()
            .map(|tuple| tuple.iter().map(|m| m.caption.as_str()).collect())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub ordinal: usize,
    pub value: Option<f64>,
    pub formatted_value: String,
    pub format_string: String,
    pub language: u32,
    pub back_color: u32,
    pub fore_color: u32,
    pub font_flags: u32,
}

/// The result of a query: axes plus cells addressed by ordinal, Axis 0 varying fastest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cellset {
    pub cube: String,
    pub axes: Vec<Axis>,
    pub slicer: Axis,
    pub cells: Vec<Cell>,
    pub cell_properties: Vec<String>,
}

impl Cellset {
    pub fn axis(&self, idx: usize) -> Option<&Axis> {
        self.axes.get(idx)
    }

    pub fn cell(&self, ordinal: usize) -> Option<&Cell> {
        self.cells.get(ordinal)
    }

    /// The cell at one tuple position per axis, Axis 0 first.
    pub fn cell_at(&self, positions: &[usize]) -> Option<&Cell> {
        if positions.len() != self.axes.len() {
            return None;
        }
        let mut ordinal = 0;
        let mut stride = 1;
        for (axis, position) in self.axes.iter().zip(positions) {
            if *position >= axis.len() {
                return None;
            }
            ordinal += position * stride;
            stride *= axis.len();
        }
        self.cell(ordinal)
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.cells.iter().map(|c| c.value).collect()
    }
}

/// Evaluate `stmt` against `cube`.
pub(crate) fn build_cellset(
    cube: &Cube,
    stmt: &SelectStatement,
    options: &QueryOptions,
) -> MdxResult<Cellset> {
    let scope = QueryScope::build(cube, &stmt.with)?;
    let ctx = EvalContext::new(cube, &scope);

    let mut axis_sets = Vec::with_capacity(stmt.axes.len());
    let mut used: BTreeMap<HierarchyKey, usize> = BTreeMap::new();
    for axis in &stmt.axes {
        let set = eval_set(&ctx, &axis.set)?;
        if let Some(first) = set.first() {
            for hierarchy in ctx.tuple_hierarchies(first) {
                if let Some(previous) = used.insert(hierarchy, axis.axis) {
                    log::debug!(
                        "hierarchy {} appears on {} and {}",
                        ctx.hierarchy_unique_name(hierarchy),
                        axis_name(previous),
                        axis_name(axis.axis)
                    );
                    return Err(MdxError::Tuple {
                        tuple: ctx.render_tuple(first),
                        hierarchy: ctx.hierarchy_unique_name(hierarchy).to_string(),
                    });
                }
            }
        }
        axis_sets.push(set);
    }

    let slicer_set = match &stmt.slicer {
        Some(expr) => Some(eval_set(&ctx, expr)?),
        None => None,
    };
    let base = slicer_coordinate(&ctx, slicer_set.as_deref().unwrap_or_default())?;
    // An explicit but empty slicer selects nothing.
    let slicer_empty = slicer_set.as_ref().is_some_and(|s| s.is_empty());

    let sizes: Vec<usize> = axis_sets.iter().map(Vec::len).collect();
    let total: usize = sizes.iter().product();
    let mut aggregator = Aggregator::new(ctx);
    let mut grid: Vec<(Coordinate, CellValue)> = Vec::with_capacity(total);
    for ordinal in 0..total {
        let mut coordinate = base.clone();
        for (set, position) in axis_sets.iter().zip(positions_of(ordinal, &sizes)) {
            for member in &set[position] {
                coordinate.insert(ctx.hierarchy_of(*member), Slot::One(*member));
            }
        }
        let cell = if slicer_empty {
            CellValue {
                value: Scalar::Null,
                empty: true,
            }
        } else {
            aggregator.evaluate(&coordinate)?
        };
        grid.push((coordinate, cell));
    }

    let keep = non_empty_masks(stmt, &sizes, &grid);
    let kept: Vec<Vec<usize>> = keep
        .iter()
        .map(|mask| (0..mask.len()).filter(|i| mask[*i]).collect())
        .collect();
    let kept_sizes: Vec<usize> = kept.iter().map(Vec::len).collect();
    let kept_total: usize = kept_sizes.iter().product();

    let mut cells = Vec::with_capacity(kept_total);
    for ordinal in 0..kept_total {
        let mut source = 0;
        let mut stride = 1;
        for (axis, position) in positions_of(ordinal, &kept_sizes).into_iter().enumerate() {
            source += kept[axis][position] * stride;
            stride *= sizes[axis];
        }
        let (coordinate, cell) = &grid[source];
        cells.push(make_cell(&ctx, ordinal, coordinate, cell, options));
    }

    let axes = stmt
        .axes
        .iter()
        .zip(&axis_sets)
        .zip(&kept)
        .map(|((axis, set), kept)| {
            let tuples: TupleSet = kept.iter().map(|i| set[*i].clone()).collect();
            make_axis(
                &ctx,
                axis_name(axis.axis),
                set.first(),
                &tuples,
                axis.dimension_properties.clone(),
                options,
            )
        })
        .collect();
    let slicer_tuples = slicer_set.unwrap_or_default();
    let slicer = make_axis(
        &ctx,
        "SlicerAxis".to_string(),
        slicer_tuples.first(),
        &slicer_tuples,
        Vec::new(),
        options,
    );

    let stats = aggregator.stats();
    log::debug!(
        "query on {}: axes {:?} -> {:?}, {} cells evaluated ({} value hits, {} row-set hits)",
        cube.name(),
        sizes,
        kept_sizes,
        stats.cells,
        stats.value_hits,
        stats.row_set_hits
    );

    Ok(Cellset {
        cube: cube.name().to_string(),
        axes,
        slicer,
        cells,
        cell_properties: stmt.cell_properties.clone(),
    })
}

/// Per-axis tuple positions of `ordinal`, Axis 0 varying fastest.
fn positions_of(ordinal: usize, sizes: &[usize]) -> Vec<usize> {
    let mut rest = ordinal;
    sizes
        .iter()
        .map(|size| {
            let position = rest % size;
            rest /= size;
            position
        })
        .collect()
}

/// Which tuples of each axis survive `NON EMPTY`: those with a non-empty cell against some
/// combination of the other axes. Axes without `NON EMPTY` keep everything.
fn non_empty_masks(
    stmt: &SelectStatement,
    sizes: &[usize],
    grid: &[(Coordinate, CellValue)],
) -> Vec<Vec<bool>> {
    let mut masks: Vec<Vec<bool>> = stmt
        .axes
        .iter()
        .zip(sizes)
        .map(|(axis, size)| vec![!axis.non_empty; *size])
        .collect();
    if stmt.axes.iter().all(|axis| !axis.non_empty) {
        return masks;
    }
    for (ordinal, (_, cell)) in grid.iter().enumerate() {
        if cell.empty {
            continue;
        }
        for (mask, position) in masks.iter_mut().zip(positions_of(ordinal, sizes)) {
            mask[position] = true;
        }
    }
    masks
}

/// Group slicer members by hierarchy: one member filters as itself, several OR together.
fn slicer_coordinate(ctx: &EvalContext<'_>, tuples: &[Tuple]) -> MdxResult<Coordinate> {
    let mut grouped: BTreeMap<HierarchyKey, Vec<MemberRef>> = BTreeMap::new();
    for member in tuples.iter().flatten() {
        let members = grouped.entry(ctx.hierarchy_of(*member)).or_default();
        if !members.contains(member) {
            members.push(*member);
        }
    }

    let mut coordinate = Coordinate::new();
    for (hierarchy, members) in grouped {
        let slot = match <[MemberRef; 1]>::try_from(members) {
            Ok([member]) => Slot::One(member),
            Err(members) => {
                if hierarchy == HierarchyKey::Measures {
                    return Err(MdxError::Eval(
                        "the slicer may select at most one measure".to_string(),
                    ));
                }
                if let Some(calc) = members.iter().find(|m| matches!(m, MemberRef::Calculated(_))) {
                    return Err(MdxError::Eval(format!(
                        "calculated member {} cannot be combined with other slicer members",
                        ctx.unique_name(*calc)
                    )));
                }
                Slot::Any(members)
            }
        };
        coordinate.insert(hierarchy, slot);
    }
    Ok(coordinate)
}

fn format_string_for(
    ctx: &EvalContext<'_>,
    coordinate: &Coordinate,
    options: &QueryOptions,
) -> String {
    if let Some(idx) = leading_calculated(ctx.scope, coordinate) {
        if let Some(format) = &ctx.scope.calculated_member(idx).format_string {
            return format.clone();
        }
    }
    let measure = match coordinate.get(&HierarchyKey::Measures) {
        Some(Slot::One(MemberRef::Measure(id))) => Some(*id),
        None => Some(ctx.cube.default_measure()),
        Some(_) => None,
    };
    measure
        .and_then(|id| ctx.cube.measure(id).format_string.clone())
        .unwrap_or_else(|| options.default_format_string.clone())
}

fn make_cell(
    ctx: &EvalContext<'_>,
    ordinal: usize,
    coordinate: &Coordinate,
    cell: &CellValue,
    options: &QueryOptions,
) -> Cell {
    let value = match cell.value {
        Scalar::Number(n) => Some(n),
        Scalar::Null | Scalar::String(_) => None,
    };
    let format_string = format_string_for(ctx, coordinate, options);
    Cell {
        ordinal,
        value,
        formatted_value: format_value(value, &format_string),
        format_string,
        language: options.locale,
        back_color: DEFAULT_BACK_COLOR,
        fore_color: DEFAULT_FORE_COLOR,
        font_flags: DEFAULT_FONT_FLAGS,
    }
}

fn make_axis(
    ctx: &EvalContext<'_>,
    name: String,
    signature: Option<&Tuple>,
    tuples: &[Tuple],
    dimension_properties: Vec<String>,
    options: &QueryOptions,
) -> Axis {
    let hierarchies = signature
        .map(|tuple| {
            ctx.tuple_hierarchies(tuple)
                .into_iter()
                .map(|h| ctx.hierarchy_unique_name(h).to_string())
                .collect()
        })
        .unwrap_or_default();
    let tuples = tuples
        .iter()
        .map(|tuple| {
            tuple
                .iter()
                .map(|m| axis_member(ctx, *m, options))
                .collect()
        })
        .collect();
    Axis {
        name,
        hierarchies,
        tuples,
        dimension_properties,
    }
}

fn axis_member(ctx: &EvalContext<'_>, member: MemberRef, options: &QueryOptions) -> AxisMember {
    let cube = ctx.cube;
    let hierarchy = ctx.hierarchy_of(member);
    let (level_unique_name, display_info) = match member {
        MemberRef::Member(id) => {
            let m = cube.member(id);
            (cube.level(m.level).unique_name.clone(), m.display_info)
        }
        MemberRef::Measure(_) => (MEASURES_LEVEL_UNIQUE_NAME.to_string(), options.display_info),
        MemberRef::Calculated(idx) => {
            let level = match ctx.scope.calculated_member(idx).parent {
                None => MEASURES_LEVEL_UNIQUE_NAME.to_string(),
                Some(parent) => {
                    let parent_level = cube.level(cube.member(parent).level);
                    let levels = &cube.hierarchy(parent_level.hierarchy).levels;
                    let level = levels
                        .get(parent_level.ordinal + 1)
                        .map_or(parent_level, |l| cube.level(*l));
                    level.unique_name.clone()
                }
            };
            (level, options.display_info)
        }
    };
    AxisMember {
        unique_name: ctx.unique_name(member).to_string(),
        caption: ctx.caption(member).to_string(),
        level_unique_name,
        level_number: ctx.depth(member),
        parent_unique_name: ctx
            .parent_of(member)
            .map(|parent| ctx.unique_name(parent).to_string()),
        hierarchy_unique_name: ctx.hierarchy_unique_name(hierarchy).to_string(),
        display_info,
    }
}
