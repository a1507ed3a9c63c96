use crate::calc::{apply_binary, apply_negate, QueryScope, Scalar, ScalarExpr};
use crate::error::{MdxError, MdxResult};
use crate::eval::{EvalContext, HierarchyKey, MemberRef};
use crate::model::{Cube, MeasureId, MemberId};
use crate::source::AggregationKind;
use olap_table::RowBitmap;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Calculated members may reference each other at most this deep.
pub(crate) const MAX_CALC_DEPTH: usize = 32;

/// What one hierarchy contributes to a coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Slot {
    One(MemberRef),
    /// Multi-member slicer: rows matching any of the members.
    Any(Vec<MemberRef>),
}

/// A cell address: at most one slot per hierarchy, ordered by hierarchy.
pub(crate) type Coordinate = BTreeMap<HierarchyKey, Slot>;

/// Stored members filtering one hierarchy, sorted.
type FilterKey = Vec<MemberId>;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CellValue {
    pub value: Scalar,
    /// No fact rows contributed, or the value is null.
    pub empty: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct AggregationStats {
    pub cells: usize,
    pub row_set_hits: usize,
    pub value_hits: usize,
}

/// Evaluates coordinates against the fact table, caching filtered row sets and values for the
/// lifetime of one query.
pub(crate) struct Aggregator<'a> {
    ctx: EvalContext<'a>,
    subtree_rows: HashMap<MemberId, Arc<RowBitmap>>,
    /// Row sets keyed by the leading filters of a coordinate.
    prefix_rows: HashMap<Vec<FilterKey>, Arc<RowBitmap>>,
    values: HashMap<(Vec<FilterKey>, MeasureId), (Scalar, usize)>,
    stats: AggregationStats,
}

impl<'a> Aggregator<'a> {
    pub(crate) fn new(ctx: EvalContext<'a>) -> Self {
        Self {
            ctx,
            subtree_rows: HashMap::new(),
            prefix_rows: HashMap::new(),
            values: HashMap::new(),
            stats: AggregationStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> AggregationStats {
        self.stats
    }

    pub(crate) fn evaluate(&mut self, coordinate: &Coordinate) -> MdxResult<CellValue> {
        self.stats.cells += 1;
        self.evaluate_at(coordinate, 0)
    }

    fn evaluate_at(&mut self, coordinate: &Coordinate, depth: usize) -> MdxResult<CellValue> {
        if depth > MAX_CALC_DEPTH {
            return Err(MdxError::Eval(format!(
                "calculated members nest deeper than {MAX_CALC_DEPTH} levels"
            )));
        }

        let scope = self.ctx.scope;
        if let Some(idx) = leading_calculated(scope, coordinate) {
            let calc = scope.calculated_member(idx);
            let value = self.eval_scalar(&calc.formula, coordinate, depth, &calc.unique_name)?;
            if let Scalar::String(text) = &value {
                return Err(MdxError::Aggregation {
                    measure: calc.unique_name.clone(),
                    reason: format!("formula produced text {text:?} instead of a number"),
                });
            }
            return Ok(CellValue {
                empty: value.is_null(),
                value,
            });
        }

        let measure = self.measure_of(coordinate)?;
        let key = filter_key(self.ctx.cube, coordinate);
        if let Some((value, rows)) = self.values.get(&(key.clone(), measure)) {
            self.stats.value_hits += 1;
            return Ok(CellValue {
                empty: *rows == 0 || value.is_null(),
                value: value.clone(),
            });
        }

        let rows = self.rows_for(&key);
        let value = self.aggregate(measure, &rows);
        log::trace!(
            "coordinate {key:?} measure {} -> {} rows",
            self.ctx.cube.measure(measure).name,
            rows.count()
        );
        self.values.insert((key, measure), (value.clone(), rows.count()));
        Ok(CellValue {
            empty: rows.is_empty() || value.is_null(),
            value,
        })
    }

    fn eval_scalar(
        &mut self,
        expr: &ScalarExpr,
        coordinate: &Coordinate,
        depth: usize,
        member: &str,
    ) -> MdxResult<Scalar> {
        match expr {
            ScalarExpr::Null => Ok(Scalar::Null),
            ScalarExpr::Number(n) => Ok(Scalar::Number(*n)),
            ScalarExpr::String(s) => Ok(Scalar::String(s.clone())),
            ScalarExpr::Tuple(members) => {
                let mut target = coordinate.clone();
                for m in members {
                    target.insert(self.ctx.hierarchy_of(*m), Slot::One(*m));
                }
                Ok(self.evaluate_at(&target, depth + 1)?.value)
            }
            ScalarExpr::Negate(inner) => {
                let value = self.eval_scalar(inner, coordinate, depth, member)?;
                apply_negate(value, member)
            }
            ScalarExpr::Binary(op, left, right) => {
                let left = self.eval_scalar(left, coordinate, depth, member)?;
                let right = self.eval_scalar(right, coordinate, depth, member)?;
                apply_binary(*op, left, right, member)
            }
        }
    }

    fn measure_of(&self, coordinate: &Coordinate) -> MdxResult<MeasureId> {
        match coordinate.get(&HierarchyKey::Measures) {
            None => Ok(self.ctx.cube.default_measure()),
            Some(Slot::One(MemberRef::Measure(m))) => Ok(*m),
            Some(Slot::Any(members)) => match members.as_slice() {
                [MemberRef::Measure(m)] => Ok(*m),
                _ => Err(MdxError::Eval(
                    "a coordinate cannot aggregate several measures at once".to_string(),
                )),
            },
            Some(Slot::One(other)) => Err(MdxError::Eval(format!(
                "{} is not a measure",
                self.ctx.unique_name(*other)
            ))),
        }
    }

    fn subtree(&mut self, member: MemberId) -> Arc<RowBitmap> {
        if let Some(rows) = self.subtree_rows.get(&member) {
            return rows.clone();
        }
        let cube = self.ctx.cube;
        let total = cube.fact_table.row_count();
        let rows = cube
            .descendants_inclusive(member)
            .into_iter()
            .flat_map(|m| cube.member_fact_rows[m.index()].iter().map(|r| *r as usize));
        let bitmap = Arc::new(RowBitmap::from_rows(total, rows));
        self.subtree_rows.insert(member, bitmap.clone());
        bitmap
    }

    fn filter_rows(&mut self, filter: &[MemberId]) -> RowBitmap {
        let total = self.ctx.cube.fact_table.row_count();
        let mut out = RowBitmap::empty(total);
        for member in filter {
            out.union_with(&self.subtree(*member));
        }
        out
    }

    /// Fact rows matching every filter in `key`, built from the longest cached prefix.
    fn rows_for(&mut self, key: &[FilterKey]) -> Arc<RowBitmap> {
        if let Some(rows) = self.prefix_rows.get(key) {
            self.stats.row_set_hits += 1;
            return rows.clone();
        }

        let total = self.ctx.cube.fact_table.row_count();
        let unfiltered: &[FilterKey] = &[];
        let mut current = match self.prefix_rows.get(unfiltered) {
            Some(rows) => rows.clone(),
            None => {
                let full = Arc::new(RowBitmap::full(total));
                self.prefix_rows.insert(Vec::new(), full.clone());
                full
            }
        };
        for len in 1..=key.len() {
            let prefix = &key[..len];
            if let Some(rows) = self.prefix_rows.get(prefix) {
                self.stats.row_set_hits += 1;
                current = rows.clone();
                continue;
            }
            let mut next = (*current).clone();
            if !next.is_empty() {
                next.intersect_with(&self.filter_rows(&key[len - 1]));
            }
            let next = Arc::new(next);
            self.prefix_rows.insert(prefix.to_vec(), next.clone());
            current = next;
        }
        current
    }

    fn aggregate(&self, measure: MeasureId, rows: &RowBitmap) -> Scalar {
        let measure = self.ctx.cube.measure(measure);
        let Some(column) = self.ctx.cube.fact_table.column(measure.column_idx) else {
            return Scalar::Null;
        };
        let values = rows.iter().filter_map(|row| column.get(row)?.as_number());
        aggregate_values(measure.aggregation, values)
    }
}

/// The calculated member of a coordinate with the highest solve order; ties go to the first in
/// hierarchy order.
pub(crate) fn leading_calculated(scope: &QueryScope, coordinate: &Coordinate) -> Option<usize> {
    let mut best: Option<usize> = None;
    for slot in coordinate.values() {
        if let Slot::One(MemberRef::Calculated(idx)) = slot {
            let wins = best.map_or(true, |current| {
                scope.calculated_member(*idx).solve_order
                    > scope.calculated_member(current).solve_order
            });
            if wins {
                best = Some(*idx);
            }
        }
    }
    best
}

/// Apply an aggregation to non-null values. Empty input is null, except counts which are 0.
pub(crate) fn aggregate_values(kind: AggregationKind, values: impl Iterator<Item = f64>) -> Scalar {
    let result = match kind {
        AggregationKind::Count => {
            let count = values.count();
            (count > 0).then_some(count as f64)
        }
        AggregationKind::DistinctCount => {
            let distinct = values.map(OrderedFloat).collect::<HashSet<_>>().len();
            (distinct > 0).then_some(distinct as f64)
        }
        AggregationKind::Sum => values.fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v)),
        AggregationKind::Min => values.fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        }),
        AggregationKind::Max => values.fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        }),
        AggregationKind::Average => {
            let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            (count > 0).then(|| sum / count as f64)
        }
    };
    match result {
        Some(value) => Scalar::Number(value),
        None if kind.is_counting() => Scalar::Number(0.0),
        None => Scalar::Null,
    }
}

/// The stored-member filters of a coordinate; hierarchies at their All member do not filter.
fn filter_key(cube: &Cube, coordinate: &Coordinate) -> Vec<FilterKey> {
    let mut key = Vec::new();
    for (hierarchy, slot) in coordinate {
        if *hierarchy == HierarchyKey::Measures {
            continue;
        }
        let members: &[MemberRef] = match slot {
            Slot::One(member) => std::slice::from_ref(member),
            Slot::Any(members) => members,
        };
        let mut ids: Vec<MemberId> = members
            .iter()
            .filter_map(|m| match m {
                MemberRef::Member(id) => Some(*id),
                _ => None,
            })
            .collect();
        if ids.is_empty() || ids.iter().any(|id| cube.member(*id).is_all()) {
            continue;
        }
        ids.sort();
        ids.dedup();
        key.push(ids);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_cube;
    use crate::eval::eval_set;
    use crate::parser::parse_expression;
    use crate::source::{CubeSource, DataSource, DimensionSource, MeasureSource};
    use olap_table::{ColumnType, Table, Value};

    fn region_year_cube() -> Cube {
        let mut data = DataSource::new();
        data.add_table(
            Table::from_rows(
                "Store",
                vec![
                    ("id", ColumnType::Number),
                    ("Region", ColumnType::String),
                    ("City", ColumnType::String),
                ],
                vec![
                    vec![1.into(), "North".into(), "Oslo".into()],
                    vec![2.into(), "North".into(), "Bergen".into()],
                    vec![3.into(), "South".into(), "Rome".into()],
                ],
            )
            .unwrap(),
        )
        .unwrap();
        data.add_table(
            Table::from_rows(
                "Calendar",
                vec![("id", ColumnType::Number), ("Year", ColumnType::Number)],
                vec![vec![1.into(), 2020.into()], vec![2.into(), 2021.into()]],
            )
            .unwrap(),
        )
        .unwrap();
        let facts: Vec<Vec<Value>> = (0..12)
            .map(|i| {
                vec![
                    ((i % 3 + 1) as f64).into(),
                    ((i % 2 + 1) as f64).into(),
                    (i as f64).into(),
                ]
            })
            .collect();
        data.add_table(
            Table::from_rows(
                "Sales",
                vec![
                    ("store_id", ColumnType::Number),
                    ("year_id", ColumnType::Number),
                    ("Units", ColumnType::Number),
                ],
                facts,
            )
            .unwrap(),
        )
        .unwrap();
        let source = CubeSource::new("sales", "Sales")
            .with_dimension(DimensionSource::new(
                "Store",
                "Store",
                "id",
                "store_id",
                vec!["Region", "City"],
            ))
            .with_dimension(DimensionSource::new(
                "Calendar",
                "Calendar",
                "id",
                "year_id",
                vec!["Year"],
            ))
            .with_measure(MeasureSource::new("Units", "Units"))
            .with_measure(MeasureSource::new("Rows", "Units").with_aggregation("count"));
        build_cube(&source, &data).unwrap()
    }

    #[test]
    fn grid_reuses_row_sets_and_values() {
        let cube = region_year_cube();
        let scope = QueryScope::new();
        let ctx = EvalContext::new(&cube, &scope);
        let grid = eval_set(
            &ctx,
            &parse_expression(
                "CrossJoin([Measures].Members, [Store].[Store].Members, [Calendar].[Year].Members)",
            )
            .unwrap(),
        )
        .unwrap();
        let coordinates: Vec<Coordinate> = grid
            .iter()
            .map(|tuple| {
                tuple
                    .iter()
                    .map(|m| (ctx.hierarchy_of(*m), Slot::One(*m)))
                    .collect()
            })
            .collect();

        let mut cached = Aggregator::new(ctx);
        let first: Vec<CellValue> = coordinates
            .iter()
            .map(|c| cached.evaluate(c).unwrap())
            .collect();
        let second: Vec<CellValue> = coordinates
            .iter()
            .map(|c| cached.evaluate(c).unwrap())
            .collect();
        let fresh: Vec<CellValue> = coordinates
            .iter()
            .map(|c| Aggregator::new(ctx).evaluate(c).unwrap())
            .collect();

        assert_eq!(first, fresh);
        assert_eq!(second, fresh);
        let stats = cached.stats();
        assert_eq!(stats.cells, coordinates.len() * 2);
        assert!(stats.row_set_hits > 0, "{stats:?}");
        assert!(stats.value_hits >= coordinates.len(), "{stats:?}");

        // North in 2020 holds Oslo and Bergen rows with an even index.
        let north_2020 = coordinates
            .iter()
            .zip(&fresh)
            .find(|(c, _)| {
                let names: Vec<String> = c
                    .values()
                    .map(|slot| match slot {
                        Slot::One(m) => ctx.caption(*m).to_string(),
                        Slot::Any(_) => String::new(),
                    })
                    .collect();
                names == ["Units", "North", "2020"]
            })
            .map(|(_, cell)| cell.value.clone());
        assert_eq!(north_2020, Some(Scalar::Number(0.0 + 4.0 + 6.0 + 10.0)));
    }

    #[test]
    fn empty_input_is_null_except_for_counts() {
        for kind in [
            AggregationKind::Sum,
            AggregationKind::Average,
            AggregationKind::Min,
            AggregationKind::Max,
        ] {
            assert_eq!(aggregate_values(kind, std::iter::empty()), Scalar::Null);
        }
        assert_eq!(
            aggregate_values(AggregationKind::Count, std::iter::empty()),
            Scalar::Number(0.0)
        );
        assert_eq!(
            aggregate_values(AggregationKind::DistinctCount, std::iter::empty()),
            Scalar::Number(0.0)
        );
    }

    #[test]
    fn aggregations_over_values() {
        let values = [4.0, 1.0, 4.0, 7.0];
        let run = |kind| aggregate_values(kind, values.iter().copied());
        assert_eq!(run(AggregationKind::Sum), Scalar::Number(16.0));
        assert_eq!(run(AggregationKind::Count), Scalar::Number(4.0));
        assert_eq!(run(AggregationKind::Average), Scalar::Number(4.0));
        assert_eq!(run(AggregationKind::Min), Scalar::Number(1.0));
        assert_eq!(run(AggregationKind::Max), Scalar::Number(7.0));
        assert_eq!(run(AggregationKind::DistinctCount), Scalar::Number(3.0));
    }
}
