#![allow(dead_code)]

use olap_mdx::{
    build_cube, Cellset, Cube, CubeSource, DataSource, DimensionSource, MdxResult, MeasureSource,
    QueryOptions,
};
use olap_table::{ColumnType, Table, Value};

/// Sales star schema: three dimensions, `Amount` and `Count` measures, total Amount 1023.
///
/// Asia/Japan/Tokyo exists in the dimension table but has no facts, and every fact lands in
/// 2010, so `NON EMPTY` has something to prune.
pub fn sales_data() -> DataSource {
    let geography = Table::from_rows(
        "Geography",
        vec![
            ("id", ColumnType::Number),
            ("Continent", ColumnType::String),
            ("Country", ColumnType::String),
            ("City", ColumnType::String),
        ],
        vec![
            row([1.into(), "America".into(), "United States".into(), "New York".into()]),
            row([2.into(), "Europe".into(), "France".into(), "Paris".into()]),
            row([3.into(), "Europe".into(), "Spain".into(), "Barcelona".into()]),
            row([4.into(), "Europe".into(), "Spain".into(), "Madrid".into()]),
            row([5.into(), "Europe".into(), "Switzerland".into(), "Lausanne".into()]),
            row([6.into(), "Asia".into(), "Japan".into(), "Tokyo".into()]),
        ],
    )
    .unwrap();

    let product = Table::from_rows(
        "Product",
        vec![
            ("id", ColumnType::Number),
            ("Company", ColumnType::String),
            ("Article", ColumnType::String),
        ],
        vec![vec![1.into(), "Crazy Development".into(), "olapy".into()]],
    )
    .unwrap();

    let time = Table::from_rows(
        "Time",
        vec![
            ("id", ColumnType::Number),
            ("Year", ColumnType::Number),
            ("Quarter", ColumnType::String),
        ],
        vec![
            vec![1.into(), 2010.into(), "Q1".into()],
            vec![2.into(), 2011.into(), "Q1".into()],
            vec![3.into(), 2012.into(), "Q1".into()],
        ],
    )
    .unwrap();

    let facts = Table::from_rows(
        "Facts",
        vec![
            ("geography_id", ColumnType::Number),
            ("product_id", ColumnType::Number),
            ("time_id", ColumnType::Number),
            ("Amount", ColumnType::Number),
            ("Count", ColumnType::Number),
        ],
        vec![
            vec![1.into(), 1.into(), 1.into(), 768.into(), 576.into()],
            vec![2.into(), 1.into(), 1.into(), 4.into(), 2.into()],
            vec![3.into(), 1.into(), 1.into(), 2.into(), 600.into()],
            vec![4.into(), 1.into(), 1.into(), 1.into(), 325.into()],
            vec![5.into(), 1.into(), 1.into(), 248.into(), 377.into()],
        ],
    )
    .unwrap();

    let mut data = DataSource::new();
    for table in [geography, product, time, facts] {
        data.add_table(table).unwrap();
    }
    data
}

fn row(values: [Value; 4]) -> Vec<Value> {
    values.to_vec()
}

pub fn sales_source() -> CubeSource {
    CubeSource::new("sales", "Facts")
        .with_dimension(
            DimensionSource::new(
                "Geography",
                "Geography",
                "id",
                "geography_id",
                vec!["Continent", "Country", "City"],
            )
            .with_all_caption("All Continent"),
        )
        .with_dimension(DimensionSource::new(
            "Product",
            "Product",
            "id",
            "product_id",
            vec!["Company", "Article"],
        ))
        .with_dimension(DimensionSource::new(
            "Time",
            "Time",
            "id",
            "time_id",
            vec!["Year", "Quarter"],
        ))
        .with_measure(MeasureSource::new("Amount", "Amount"))
        .with_measure(MeasureSource::new("Count", "Count"))
}

pub fn sales_cube() -> Cube {
    build_cube(&sales_source(), &sales_data()).unwrap()
}

pub fn run(cube: &Cube, query: &str) -> MdxResult<Cellset> {
    let stmt = olap_mdx::parse(query)?;
    olap_mdx::execute(cube, &stmt, &QueryOptions::default())
}

pub fn query(cube: &Cube, query: &str) -> Cellset {
    run(cube, query).unwrap_or_else(|err| panic!("query failed: {err}\n{query}"))
}

pub fn values(cellset: &Cellset) -> Vec<f64> {
    cellset
        .values()
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect()
}

/// Unique names of a one-hierarchy axis.
pub fn members(cellset: &Cellset, axis: usize) -> Vec<String> {
    cellset
        .axis(axis)
        .map(|axis| {
            axis.tuples
                .iter()
                .map(|tuple| {
                    tuple
                        .iter()
                        .map(|m| m.unique_name.as_str())
                        .collect::<Vec<_>>()
                        .join(" * ")
                })
                .collect()
        })
        .unwrap_or_default()
}
