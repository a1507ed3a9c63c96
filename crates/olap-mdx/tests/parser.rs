use olap_mdx::{
    parse, parse_expression, BinaryOp, Expr, Function, MdxError, Path, Property, WithClause,
};
use pretty_assertions::assert_eq;

fn path(segments: &[&str], position: usize) -> Path {
    Path {
        segments: segments.iter().map(|s| s.to_string()).collect(),
        position,
    }
}

fn parse_error(query: &str) -> (usize, String, String) {
    match parse(query).unwrap_err() {
        MdxError::Parse {
            position,
            token,
            message,
        } => (position, token, message),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn parses_axes_slicer_and_cell_properties() {
    let stmt = parse(
        "SELECT NON EMPTY {[Time].[Year].Members} DIMENSION PROPERTIES PARENT_UNIQUE_NAME ON COLUMNS \
         FROM [sales] WHERE ([Measures].[Amount]) CELL PROPERTIES VALUE, FORMAT_STRING",
    )
    .unwrap();

    assert_eq!(stmt.cube, "sales");
    assert_eq!(stmt.axes.len(), 1);
    let axis = &stmt.axes[0];
    assert_eq!(axis.axis, 0);
    assert!(axis.non_empty);
    assert_eq!(axis.dimension_properties, vec!["PARENT_UNIQUE_NAME"]);
    assert_eq!(
        axis.set,
        Expr::Set(vec![Expr::Property {
            path: path(&["Time", "Year"], 18),
            property: Property::Members,
        }])
    );
    let Some(Expr::Path(slicer)) = &stmt.slicer else {
        panic!("expected a path slicer, got {:?}", stmt.slicer);
    };
    assert_eq!(slicer.segments, vec!["Measures", "Amount"]);
    assert_eq!(stmt.cell_properties, vec!["VALUE", "FORMAT_STRING"]);
}

#[test]
fn axes_are_ordered_by_index() {
    let stmt = parse("SELECT [a] ON ROWS, [b] ON COLUMNS, [c] ON AXIS(2) FROM [x]").unwrap();
    let axes: Vec<usize> = stmt.axes.iter().map(|a| a.axis).collect();
    assert_eq!(axes, vec![0, 1, 2]);
    assert_eq!(stmt.axes[0].set, Expr::Path(path(&["b"], 20)));
}

#[test]
fn axes_must_be_contiguous_and_unique() {
    assert!(matches!(
        parse("SELECT [a] ON 0, [b] ON 0 FROM [x]"),
        Err(MdxError::Parse { .. })
    ));
    assert!(matches!(
        parse("SELECT [a] ON 1 FROM [x]"),
        Err(MdxError::Parse { .. })
    ));
}

#[test]
fn keywords_and_functions_are_case_insensitive() {
    let stmt =
        parse("select non empty crossjoin([a].members, [b].children) on columns from [x]").unwrap();
    let Expr::Call { function, args } = &stmt.axes[0].set else {
        panic!("expected a call");
    };
    assert_eq!(*function, Function::CrossJoin);
    assert_eq!(args.len(), 2);
    assert!(matches!(
        args[1],
        Expr::Property {
            property: Property::Children,
            ..
        }
    ));
}

#[test]
fn arithmetic_binds_tighter_for_products() {
    let expr = parse_expression("1 + 2 * -3").unwrap();
    assert_eq!(expr.to_string(), "(1 + (2 * -3))");
    let Expr::Binary { op, .. } = expr else {
        panic!("expected a binary expression");
    };
    assert_eq!(op, BinaryOp::Add);
}

#[test]
fn with_clauses_are_collected_in_order() {
    let stmt = parse(
        "WITH MEMBER [Measures].[Average] AS '[Measures].[Amount] / [Measures].[Count]', \
         FORMAT_STRING = 'Fixed', SOLVE_ORDER = -2 \
         SET [Top] AS {[Geography].[America]} \
         SELECT [Top] ON 0 FROM [sales]",
    )
    .unwrap();

    assert_eq!(stmt.with.len(), 2);
    let WithClause::Member(member) = &stmt.with[0] else {
        panic!("expected a calculated member");
    };
    assert_eq!(member.path.segments, vec!["Measures", "Average"]);
    assert_eq!(member.format_string.as_deref(), Some("Fixed"));
    assert_eq!(member.solve_order, -2);
    assert!(matches!(
        member.expr,
        Expr::Binary {
            op: BinaryOp::Divide,
            ..
        }
    ));
    assert!(matches!(&stmt.with[1], WithClause::Set(set) if set.path.segments == ["Top"]));
}

#[test]
fn unsupported_functions_report_their_position() {
    let (position, token, message) = parse_error("SELECT TopCount([a], 3) ON 0 FROM [x]");
    assert_eq!(position, 7);
    assert_eq!(token, "TopCount");
    assert_eq!(message, "unsupported function");
}

#[test]
fn wrong_arity_is_a_parse_error() {
    let (position, _, message) = parse_error("SELECT CrossJoin([a]) ON 0 FROM [x]");
    assert_eq!(position, 7);
    assert_eq!(message, "CrossJoin expects at least 2 arguments, got 1");
}

#[test]
fn unterminated_brackets_and_strings_fail() {
    let (position, _, message) = parse_error("SELECT {[Geography} ON 0");
    assert_eq!(position, 8);
    assert!(message.starts_with("unterminated"), "{message}");
    assert!(matches!(
        parse("WITH MEMBER [Measures].[X] AS 'oops SELECT FROM [x]"),
        Err(MdxError::Parse { .. })
    ));
}

#[test]
fn trailing_tokens_are_rejected() {
    let (_, token, message) = parse_error("SELECT FROM [x] [y]");
    assert_eq!(token, "[y]");
    assert_eq!(message, "unexpected token after statement");
}

#[test]
fn statements_render_back_to_query_text() {
    let query = "SELECT NON EMPTY Hierarchize({[Time].[Year].Members}) ON COLUMNS FROM [sales] \
                 WHERE [Measures].[Amount]";
    let stmt = parse(query).unwrap();
    let rendered = stmt.to_string();
    let reparsed = parse(&rendered).unwrap();
    assert_eq!(reparsed.cube, stmt.cube);
    assert_eq!(reparsed.axes.len(), 1);
    assert_eq!(reparsed.axes[0].set.to_string(), stmt.axes[0].set.to_string());
}

#[test]
fn unbalanced_braces_and_parentheses_fail_at_the_offending_token() {
    assert_eq!(
        parse_error("SELECT {[Time] ON 0 FROM [sales]"),
        (15, "ON".to_string(), "expected '}'".to_string())
    );
    assert_eq!(
        parse_error("SELECT {[Time]}} ON 0 FROM [sales]"),
        (15, "}".to_string(), "expected ON".to_string())
    );
    assert_eq!(
        parse_error("SELECT CrossJoin({[a]}, {[b]} ON 0 FROM [x]"),
        (30, "ON".to_string(), "expected ')'".to_string())
    );
}

#[test]
fn deep_nesting_is_a_parse_error() {
    let depth = 10_000;
    let nested = format!("{}[Time]{}", "{".repeat(depth), "}".repeat(depth));
    let MdxError::Parse {
        position, message, ..
    } = parse_expression(&nested).unwrap_err()
    else {
        panic!("expected a parse error");
    };
    assert_eq!(position, 128);
    assert!(message.contains("nests deeper"), "{message}");

    let query = format!("SELECT {nested} ON 0 FROM [sales]");
    assert!(matches!(parse(&query), Err(MdxError::Parse { .. })));

    let shallow = format!("{}[Time]{}", "{".repeat(100), "}".repeat(100));
    assert!(parse_expression(&shallow).is_ok());
}
