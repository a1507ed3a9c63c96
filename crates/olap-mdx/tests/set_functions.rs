mod common;

use common::sales_cube;
use olap_mdx::{
    crossjoin, drilldown_member, eval_set, except, hierarchize, parse_expression, union, Cube,
    EvalContext, MdxError, MdxResult, QueryScope, TupleSet,
};
use pretty_assertions::assert_eq;

fn eval(cube: &Cube, text: &str) -> MdxResult<TupleSet> {
    let scope = QueryScope::new();
    let ctx = EvalContext::new(cube, &scope);
    eval_set(&ctx, &parse_expression(text)?)
}

fn captions(cube: &Cube, set: &TupleSet) -> Vec<String> {
    let scope = QueryScope::new();
    let ctx = EvalContext::new(cube, &scope);
    set.iter()
        .map(|tuple| {
            tuple
                .iter()
                .map(|m| ctx.caption(*m))
                .collect::<Vec<_>>()
                .join(" * ")
        })
        .collect()
}

fn eval_captions(cube: &Cube, text: &str) -> Vec<String> {
    let set = eval(cube, text).unwrap_or_else(|err| panic!("{text}: {err}"));
    captions(cube, &set)
}

#[test]
fn names_resolve_in_every_supported_form() {
    let cube = sales_cube();
    for text in [
        "[Geography].[Geography].[Continent].[America]",
        "[geography].[GEOGRAPHY].[continent].[america]",
        "[Geography].[Continent].[America]",
        "[Geography].[America]",
        "[Continent].[America]",
        "[Geography].[Geography].[All Continent].[America]",
    ] {
        assert_eq!(eval_captions(&cube, text), vec!["America"], "{text}");
    }
    assert_eq!(eval_captions(&cube, "[Geography]"), vec!["All Continent"]);
    assert_eq!(eval_captions(&cube, "[Geography].[Geography]"), vec!["All Continent"]);
    assert_eq!(eval_captions(&cube, "[Measures]"), vec!["Amount"]);
}

#[test]
fn member_properties() {
    let cube = sales_cube();
    assert_eq!(
        eval_captions(&cube, "[Geography].[Geography].[Continent].Members"),
        vec!["America", "Europe", "Asia"]
    );
    assert_eq!(
        eval_captions(&cube, "[Geography].[Geography].[Continent].[Europe].Children"),
        vec!["France", "Spain", "Switzerland"]
    );
    assert_eq!(
        eval_captions(&cube, "[Geography].[Geography].[Country].[Europe].[Spain].Parent"),
        vec!["Europe"]
    );
    assert_eq!(eval_captions(&cube, "[Measures].Members"), vec!["Amount", "Count"]);
    assert_eq!(eval(&cube, "[Geography].[Geography].Members").unwrap().len(), 15);
}

#[test]
fn hierarchize_orders_parents_before_children() {
    let cube = sales_cube();
    let set = "{[Geography].[City].[America].[United States].[New York], [Geography].[Europe], \
               [Geography].[America].[United States], [Geography].[America]}";
    assert_eq!(
        eval_captions(&cube, &format!("Hierarchize({set})")),
        vec!["America", "United States", "New York", "Europe"]
    );
    assert_eq!(
        eval_captions(&cube, &format!("Hierarchize({set}, POST)")),
        vec!["New York", "United States", "America", "Europe"]
    );
}

#[test]
fn hierarchize_orders_tuples_member_by_member() {
    let cube = sales_cube();
    let scope = QueryScope::new();
    let ctx = EvalContext::new(&cube, &scope);
    let set = eval(
        &cube,
        "CrossJoin({[Geography].[Europe], [Geography].[America]}, \
         {[Time].[Year].[2011], [Time].[Year].[2010]})",
    )
    .unwrap();
    assert_eq!(
        captions(&cube, &hierarchize(&ctx, &set, false)),
        vec![
            "America * 2010",
            "America * 2011",
            "Europe * 2010",
            "Europe * 2011"
        ]
    );
}

#[test]
fn crossjoin_is_left_major() {
    let cube = sales_cube();
    let scope = QueryScope::new();
    let ctx = EvalContext::new(&cube, &scope);
    let a = eval(&cube, "[Geography].[Continent].Members").unwrap();
    let b = eval(&cube, "[Time].[Year].Members").unwrap();
    let joined = crossjoin(&ctx, &a, &b).unwrap();

    assert_eq!(joined.len(), a.len() * b.len());
    for (i, left) in a.iter().enumerate() {
        for (j, right) in b.iter().enumerate() {
            let expected: Vec<_> = left.iter().chain(right).copied().collect();
            assert_eq!(joined[i * b.len() + j], expected);
        }
    }
    assert!(crossjoin(&ctx, &a, &[]).unwrap().is_empty());
}

#[test]
fn crossjoin_of_one_hierarchy_with_itself_fails() {
    let cube = sales_cube();
    let err = eval(
        &cube,
        "CrossJoin([Time].[Year].Members, {[Time].[Year].[2010]})",
    )
    .unwrap_err();
    assert!(
        matches!(err, MdxError::Tuple { ref hierarchy, .. } if hierarchy == "[Time].[Time]"),
        "{err:?}"
    );

    let err = eval(&cube, "([Time].[Year].[2010], [Time].[Year].[2011])").unwrap_err();
    assert!(matches!(err, MdxError::Tuple { .. }), "{err:?}");
}

#[test]
fn star_operator_crossjoins_and_plus_unions() {
    let cube = sales_cube();
    assert_eq!(
        eval_captions(
            &cube,
            "{[Geography].[America]} * {[Time].[Year].[2010], [Time].[Year].[2011]}"
        ),
        vec!["America * 2010", "America * 2011"]
    );
    assert_eq!(
        eval_captions(&cube, "{[Geography].[America]} + {[Geography].[Asia], [Geography].[America]}"),
        vec!["America", "Asia"]
    );
}

#[test]
fn drilldown_member_expands_targets_in_place() {
    let cube = sales_cube();
    assert_eq!(
        eval_captions(
            &cube,
            "DrilldownMember([Geography].[Continent].Members, {[Geography].[Europe]})"
        ),
        vec!["America", "Europe", "France", "Spain", "Switzerland", "Asia"]
    );
    // Children already in the set are not repeated.
    assert_eq!(
        eval_captions(
            &cube,
            "DrilldownMember({[Geography].[Europe], [Geography].[Europe].[Spain]}, {[Geography].[Europe]})"
        ),
        vec!["Europe", "France", "Switzerland", "Spain"]
    );
    assert_eq!(
        eval_captions(
            &cube,
            "DrilldownMember({[Geography].[America]}, \
             {[Geography].[America], [Geography].[America].[United States]}, RECURSIVE)"
        ),
        vec!["America", "United States", "New York"]
    );
}

#[test]
fn drilldown_member_drills_the_matching_position_of_tuples() {
    let cube = sales_cube();
    let scope = QueryScope::new();
    let ctx = EvalContext::new(&cube, &scope);
    let set = eval(
        &cube,
        "CrossJoin({[Geography].[America], [Geography].[Asia]}, {[Time].[Year].[2010]})",
    )
    .unwrap();
    let targets = eval(&cube, "{[Geography].[Asia]}").unwrap();
    assert_eq!(
        captions(&cube, &drilldown_member(&ctx, &set, &targets, false)),
        vec!["America * 2010", "Asia * 2010", "Japan * 2010"]
    );
}

#[test]
fn drilldown_level_drills_the_deepest_level_present() {
    let cube = sales_cube();
    assert_eq!(
        eval_captions(
            &cube,
            "DrilldownLevel({[Geography].[America], [Geography].[Europe].[Spain]})"
        ),
        vec!["America", "Spain", "Barcelona", "Madrid"]
    );
    assert_eq!(
        eval_captions(
            &cube,
            "DrilldownLevel({[Geography].[America], [Geography].[Europe].[Spain]}, \
             [Geography].[Geography].[Continent])"
        ),
        vec!["America", "United States", "Spain"]
    );
}

#[test]
fn union_except_and_distinct_remove_duplicates() {
    let cube = sales_cube();
    assert_eq!(
        eval_captions(
            &cube,
            "Union({[Geography].[Europe], [Geography].[America]}, {[Geography].[America], [Geography].[Asia]})"
        ),
        vec!["Europe", "America", "Asia"]
    );
    assert_eq!(
        eval_captions(
            &cube,
            "Except([Geography].[Continent].Members, {[Geography].[Europe]})"
        ),
        vec!["America", "Asia"]
    );
    assert_eq!(
        eval_captions(
            &cube,
            "Distinct({[Geography].[Asia], [Geography].[Asia], [Geography].[America]})"
        ),
        vec!["Asia", "America"]
    );

    let a = eval(&cube, "{[Geography].[Asia], [Geography].[America]}").unwrap();
    let b = eval(&cube, "{[Geography].[America]}").unwrap();
    assert_eq!(union(&[a.clone(), b.clone()]), a);
    assert_eq!(captions(&cube, &except(&a, &b)), vec!["Asia"]);
}

#[test]
fn sets_must_be_uniform() {
    let cube = sales_cube();
    let err = eval(&cube, "{[Geography].[America], [Time].[Year].[2010]}").unwrap_err();
    assert!(matches!(err, MdxError::Eval(_)), "{err:?}");
}

#[test]
fn scalars_are_not_sets() {
    let cube = sales_cube();
    assert!(matches!(eval(&cube, "1 + 2"), Err(MdxError::Eval(_))));
    assert!(matches!(
        eval(&cube, "Hierarchize({[Geography].[America]}, RECURSIVE)"),
        Err(MdxError::Eval(_))
    ));
}

#[test]
fn unknown_names_report_the_full_path() {
    let cube = sales_cube();
    assert_eq!(
        eval(&cube, "[Geography].[Atlantis].Children").unwrap_err(),
        MdxError::Resolution {
            path: "[Geography].[Atlantis]".to_string()
        }
    );
}
