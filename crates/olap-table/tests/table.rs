use olap_table::{ColumnSchema, ColumnType, RowBitmap, Table, TableError, Value};
use pretty_assertions::assert_eq;

fn geography() -> Table {
    Table::from_rows(
        "Geography",
        vec![
            ("id", ColumnType::Number),
            ("Continent", ColumnType::String),
            ("Country", ColumnType::String),
        ],
        vec![
            vec![1.into(), "America".into(), "United States".into()],
            vec![2.into(), "Europe".into(), "France".into()],
            vec![3.into(), "Europe".into(), Value::Null],
        ],
    )
    .unwrap()
}

#[test]
fn rows_are_stored_column_by_column() {
    let table = geography();
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.column_count(), 3);

    let continent = table.column_index("Continent").unwrap();
    assert_eq!(
        table.column(continent).unwrap(),
        &[
            Value::from("America"),
            Value::from("Europe"),
            Value::from("Europe")
        ]
    );
    assert_eq!(table.get_cell(2, 2), Some(&Value::Null));
    assert_eq!(table.get_cell(3, 0), None);
}

#[test]
fn column_lookup_falls_back_to_case_insensitive_match() {
    let table = geography();
    assert_eq!(table.column_index("country"), Some(2));
    assert_eq!(
        table.require_column("City"),
        Err(TableError::UnknownColumn {
            table: "Geography".to_string(),
            column: "City".to_string(),
        })
    );
}

#[test]
fn push_row_rejects_wrong_arity_and_types() {
    let mut table = geography();
    assert_eq!(
        table.push_row(vec![4.into()]),
        Err(TableError::SchemaMismatch {
            table: "Geography".to_string(),
            expected: 3,
            actual: 1,
        })
    );
    assert_eq!(
        table.push_row(vec!["x".into(), "Asia".into(), "Japan".into()]),
        Err(TableError::TypeMismatch {
            table: "Geography".to_string(),
            column: "id".to_string(),
            row: 3,
            expected: ColumnType::Number,
            actual: ColumnType::String,
        })
    );
    // Failed pushes leave the table untouched.
    assert_eq!(table.row_count(), 3);
}

#[test]
fn duplicate_column_names_are_rejected() {
    let err = Table::new(
        "Facts",
        vec![
            ColumnSchema::new("Amount", ColumnType::Number),
            ColumnSchema::new("Amount", ColumnType::Number),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, TableError::DuplicateColumn { .. }));
}

#[test]
fn bitmap_rows_select_table_rows() {
    let table = geography();
    let country = table.column_index("Country").unwrap();
    let values = table.column(country).unwrap();
    let non_null = RowBitmap::from_rows(
        table.row_count(),
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(row, _)| row),
    );
    assert_eq!(non_null.iter().collect::<Vec<_>>(), vec![0, 1]);
}
