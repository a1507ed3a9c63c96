use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use olap_mdx::{
    build_cube, execute, parse, Cube, CubeSource, DataSource, DimensionSource, MeasureSource,
    QueryOptions,
};
use olap_table::{ColumnType, Table, Value};
use std::time::Duration;

fn bench_rows() -> usize {
    std::env::var("OLAP_MDX_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (10_000..=2_000_000).contains(&v))
        .unwrap_or(200_000)
}

fn build_star_schema_cube(rows: usize) -> Cube {
    let stores = 2_000usize;
    let regions = 10usize;
    let countries_per_region = 5usize;
    let products = 1_000usize;
    let categories = 20usize;

    let store_table = Table::from_rows(
        "Stores",
        vec![
            ("StoreId", ColumnType::Number),
            ("Region", ColumnType::String),
            ("Country", ColumnType::String),
            ("City", ColumnType::String),
        ],
        (0..stores)
            .map(|id| {
                let region = id % regions;
                let country = (id / regions) % countries_per_region;
                vec![
                    Value::from(id as f64),
                    Value::from(format!("Region_{region:02}")),
                    Value::from(format!("Country_{region:02}_{country}")),
                    Value::from(format!("City_{id:04}")),
                ]
            })
            .collect(),
    )
    .unwrap();

    let product_table = Table::from_rows(
        "Products",
        vec![
            ("ProductId", ColumnType::Number),
            ("Category", ColumnType::String),
        ],
        (0..products)
            .map(|id| {
                vec![
                    Value::from(id as f64),
                    Value::from(format!("Category_{:02}", id % categories)),
                ]
            })
            .collect(),
    )
    .unwrap();

    let sales_table = Table::from_rows(
        "Sales",
        vec![
            ("StoreId", ColumnType::Number),
            ("ProductId", ColumnType::Number),
            ("Amount", ColumnType::Number),
            ("Quantity", ColumnType::Number),
        ],
        (0..rows)
            .map(|i| {
                // Mix the product id so the two dimensions are not aligned.
                let product = i.wrapping_mul(13) % products;
                vec![
                    Value::from((i % stores) as f64),
                    Value::from(product as f64),
                    Value::from((i % 100) as f64),
                    Value::from((i % 7 + 1) as f64),
                ]
            })
            .collect(),
    )
    .unwrap();

    let mut data = DataSource::new();
    for table in [store_table, product_table, sales_table] {
        data.add_table(table).unwrap();
    }

    let source = CubeSource::new("retail", "Sales")
        .with_dimension(DimensionSource::new(
            "Store",
            "Stores",
            "StoreId",
            "StoreId",
            vec!["Region", "Country", "City"],
        ))
        .with_dimension(DimensionSource::new(
            "Product",
            "Products",
            "ProductId",
            "ProductId",
            vec!["Category"],
        ))
        .with_measure(MeasureSource::new("Amount", "Amount"))
        .with_measure(MeasureSource::new("Quantity", "Quantity"));

    build_cube(&source, &data).unwrap()
}

const QUERIES: &[(&str, &str)] = &[
    (
        "region_by_category",
        "SELECT NON EMPTY [Store].[Region].Members ON 0, \
         NON EMPTY [Product].[Category].Members ON 1 FROM [retail] \
         WHERE [Measures].[Amount]",
    ),
    (
        "drilldown_calculated",
        "WITH MEMBER [Measures].[Avg Price] AS '[Measures].[Amount] / [Measures].[Quantity]' \
         SELECT {[Measures].[Amount], [Measures].[Avg Price]} ON 0, \
         Hierarchize(DrilldownLevel([Store].[Region].Members)) ON 1 FROM [retail]",
    ),
    (
        "city_crossjoin",
        "SELECT NON EMPTY CrossJoin([Store].[City].Members, {[Product].[Category].[Category_03]}) \
         ON 0 FROM [retail]",
    ),
];

fn bench_cellset_star_schema(c: &mut Criterion) {
    let rows = bench_rows();
    let cube = build_star_schema_cube(rows);
    let options = QueryOptions::default();

    // Sanity check: the grand total matches the generated facts.
    let total = execute(&cube, &parse("SELECT FROM [retail]").unwrap(), &options).unwrap();
    let expected: f64 = (0..rows).map(|i| (i % 100) as f64).sum();
    assert_eq!(total.values(), vec![Some(expected)]);

    let mut group = c.benchmark_group("cellset_star_schema");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    group.bench_with_input(BenchmarkId::new("build_cube", rows), &rows, |b, &rows| {
        b.iter(|| black_box(build_star_schema_cube(rows)))
    });

    for (name, query) in QUERIES {
        let stmt = parse(query).unwrap();
        group.bench_with_input(BenchmarkId::new(*name, rows), &stmt, |b, stmt| {
            b.iter(|| black_box(execute(&cube, stmt, &options).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cellset_star_schema);
criterion_main!(benches);
