#![allow(missing_docs)]

use std::sync::Arc;

use qmodel::expr::{BinaryOp, Expr, ExprRef, LambdaExpr, MethodRef, ParameterExpr};
use qmodel::model::{BodyClause, OrderingDirection, ResultOperator, StreamedData};
use qmodel::types::{DataType, Member};
use qmodel::{ParserConfig, QueryParser};

fn course() -> DataType {
    DataType::record(
        "Course",
        [
            Member::new("title", DataType::String),
            Member::new("credits", DataType::Int32),
        ],
    )
}

fn student() -> DataType {
    DataType::record(
        "Student",
        [
            Member::new("name", DataType::String),
            Member::new("age", DataType::Int32),
            Member::new("courses", DataType::sequence(course())),
        ],
    )
}

fn students() -> ExprRef {
    Expr::source("students", student())
}

fn call(name: &str, source: ExprRef, args: Vec<ExprRef>) -> ExprRef {
    let mut all = vec![source];
    all.extend(args);
    Expr::call(None, MethodRef::new("Queryable", name, DataType::Unknown), all)
}

fn lambda(name: &str, ty: DataType, body: impl FnOnce(&ExprRef) -> ExprRef) -> ExprRef {
    let param = ParameterExpr::new(name, ty);
    let body = body(&param.to_expr());
    Expr::quote(LambdaExpr::new(vec![param], body).to_expr())
}

fn lambda2(
    names: (&str, &str),
    types: (DataType, DataType),
    body: impl FnOnce(&ExprRef, &ExprRef) -> ExprRef,
) -> ExprRef {
    let a = ParameterExpr::new(names.0, types.0);
    let b = ParameterExpr::new(names.1, types.1);
    let body = body(&a.to_expr(), &b.to_expr());
    Expr::quote(LambdaExpr::new(vec![a, b], body).to_expr())
}

fn field(target: &ExprRef, name: &str) -> ExprRef {
    Expr::field(target, name).expect("member exists")
}

fn int(v: i64) -> ExprRef {
    Expr::constant(v, DataType::Int32)
}

#[test]
fn where_select_count_folds_into_one_model() {
    let chain = call(
        "Where",
        students(),
        vec![lambda("s", student(), |s| {
            Expr::binary(BinaryOp::GreaterThan, field(s, "age"), int(17))
        })],
    );
    let chain = call(
        "Select",
        chain,
        vec![lambda("s", student(), |s| field(s, "name"))],
    );
    let chain = call("Count", chain, vec![]);

    let model = QueryParser::new().parse(&chain, student()).unwrap();

    assert_eq!(model.main_from().item_name, "s");
    assert_eq!(model.main_from().item_type, student());
    assert!(matches!(model.body_clauses(), [BodyClause::Where(_)]));
    let selector = &model.select_clause().selector;
    match selector.as_ref() {
        Expr::MemberAccess { target, member } => {
            assert_eq!(member.name, "name");
            let reference = target.as_source_ref().expect("source reference");
            assert_eq!(reference.id, model.main_from().id());
        }
        other => panic!("expected member access, got {other:?}"),
    }
    assert_eq!(model.result_operators(), &[ResultOperator::Count]);
    assert_eq!(
        model.output_shape().unwrap(),
        StreamedData::scalar(DataType::Int32)
    );
    assert_eq!(
        model.to_string(),
        "from Student s in students where ([s].age > 17) select [s].name => Count()"
    );
}

#[test]
fn predicate_overload_expands_to_filter() {
    let chain = call(
        "FirstOrDefault",
        students(),
        vec![lambda("s", student(), |s| {
            Expr::binary(BinaryOp::Equal, field(s, "age"), int(20))
        })],
    );
    let model = QueryParser::new().parse(&chain, student()).unwrap();
    assert!(matches!(model.body_clauses(), [BodyClause::Where(_)]));
    assert_eq!(
        model.result_operators(),
        &[ResultOperator::First {
            return_default_when_empty: true
        }]
    );
    assert_eq!(model.output_shape().unwrap().kind(), "single");
}

#[test]
fn selector_overload_expands_to_projection() {
    let chain = call(
        "Average",
        students(),
        vec![lambda("s", student(), |s| field(s, "age"))],
    );
    let model = QueryParser::new().parse(&chain, student()).unwrap();
    assert_eq!(model.select_clause().selector.to_string(), "[s].age");
    assert_eq!(
        model.output_shape().unwrap(),
        StreamedData::scalar(DataType::Float64)
    );
}

#[test]
fn clause_after_result_operator_wraps_subquery() {
    let chain = call("Take", students(), vec![int(5)]);
    let chain = call(
        "Select",
        chain,
        vec![lambda("t", student(), |t| field(t, "name"))],
    );
    let model = QueryParser::new().parse(&chain, student()).unwrap();

    let inner = model
        .main_from()
        .from_expression
        .as_subquery()
        .expect("wrapped subquery");
    assert_eq!(inner.result_operators().len(), 1);
    assert!(inner.body_clauses().is_empty());
    assert_eq!(model.main_from().item_name, "t");
    assert_eq!(model.main_from().item_type, student());
    assert!(model.result_operators().is_empty());
    assert_eq!(model.select_clause().selector.to_string(), "[t].name");
}

#[test]
fn orderings_append_and_then_by_extends() {
    let chain = call(
        "OrderBy",
        students(),
        vec![lambda("s", student(), |s| field(s, "age"))],
    );
    let chain = call(
        "ThenByDescending",
        chain,
        vec![lambda("s", student(), |s| field(s, "name"))],
    );
    let chain = call(
        "OrderBy",
        chain,
        vec![lambda("s", student(), |s| field(s, "name"))],
    );
    let model = QueryParser::new().parse(&chain, student()).unwrap();

    let orderings: Vec<Vec<OrderingDirection>> = model
        .body_clauses()
        .iter()
        .map(|clause| match clause {
            BodyClause::OrderBy(c) => c.orderings.iter().map(|o| o.direction).collect(),
            other => panic!("unexpected clause {other}"),
        })
        .collect();
    assert_eq!(
        orderings,
        vec![
            vec![OrderingDirection::Asc, OrderingDirection::Desc],
            vec![OrderingDirection::Asc]
        ]
    );
}

#[test]
fn then_by_without_ordering_is_unrecognized() {
    let chain = call(
        "OrderBy",
        students(),
        vec![lambda("s", student(), |s| field(s, "age"))],
    );
    let chain = call(
        "Where",
        chain,
        vec![lambda("s", student(), |s| {
            Expr::binary(BinaryOp::GreaterThan, field(s, "age"), int(3))
        })],
    );
    let chain = call(
        "ThenBy",
        chain,
        vec![lambda("s", student(), |s| field(s, "name"))],
    );
    let err = QueryParser::new().parse(&chain, student()).unwrap_err();
    assert_eq!(err.code(), "UnrecognizedChainShape");
    assert!(err.to_string().contains("ThenBy"));
}

#[test]
fn select_many_composite_is_reduced_away() {
    let pair_ty = DataType::anonymous_record([
        Member::new("s", student()),
        Member::new("c", course()),
    ]);
    let chain = call(
        "SelectMany",
        students(),
        vec![
            lambda("s", student(), |s| field(s, "courses")),
            lambda2(("s", "c"), (student(), course()), |s, c| {
                Expr::record([("s", Arc::clone(s)), ("c", Arc::clone(c))])
            }),
        ],
    );
    let chain = call(
        "Where",
        chain,
        vec![lambda("x", pair_ty.clone(), |x| {
            Expr::binary(
                BinaryOp::GreaterThan,
                field(&field(x, "c"), "credits"),
                int(3),
            )
        })],
    );
    let chain = call(
        "Select",
        chain,
        vec![lambda("x", pair_ty, |x| field(&field(x, "s"), "name"))],
    );

    let model = QueryParser::new().parse(&chain, student()).unwrap();
    match model.body_clauses() {
        [BodyClause::AdditionalFrom(from), BodyClause::Where(filter)] => {
            assert_eq!(from.item_name, "c");
            assert_eq!(from.item_type, course());
            assert_eq!(from.from_expression.to_string(), "[s].courses");
            assert_eq!(filter.predicate.to_string(), "([c].credits > 3)");
        }
        other => panic!("unexpected clauses {other:?}"),
    }
    assert_eq!(model.select_clause().selector.to_string(), "[s].name");
}

#[test]
fn nested_chain_becomes_correlated_subquery() {
    let chain = call(
        "Where",
        students(),
        vec![lambda("s", student(), |s| {
            let credits = call(
                "Where",
                field(s, "courses"),
                vec![lambda("c", course(), |c| {
                    Expr::binary(BinaryOp::GreaterThan, field(c, "credits"), int(3))
                })],
            );
            call("Any", credits, vec![])
        })],
    );
    let model = QueryParser::new().parse(&chain, student()).unwrap();

    let BodyClause::Where(filter) = &model.body_clauses()[0] else {
        panic!("expected a filter");
    };
    let nested = filter.predicate.as_subquery().expect("subquery predicate");
    assert_eq!(nested.main_from().item_name, "c");
    assert_eq!(nested.result_operators(), &[ResultOperator::Any]);
    assert!(nested.outer_scope().contains(&model.main_from().id()));
    assert!(model.free_references().is_empty());
}

#[test]
fn subquery_detection_can_be_disabled() {
    let chain = call(
        "Select",
        students(),
        vec![lambda("s", student(), |s| call("Count", field(s, "courses"), vec![]))],
    );
    let config = ParserConfig {
        detect_subqueries: false,
        ..ParserConfig::default()
    };
    let model = QueryParser::with_config(config)
        .parse(&chain, student())
        .unwrap();
    assert!(model.select_clause().selector.as_call().is_some());
}

fn course_count(s: &ExprRef) -> ExprRef {
    Expr::call(
        None,
        MethodRef::new("Queryable", "Count", DataType::Int32),
        vec![field(s, "courses")],
    )
}

#[test]
fn projected_subquery_shared_by_later_clause_folds() {
    let projected = call("Select", students(), vec![lambda("s", student(), course_count)]);
    let chain = call(
        "Where",
        projected,
        vec![lambda("n", DataType::Int32, |n| {
            Expr::binary(BinaryOp::GreaterThan, Arc::clone(n), int(1))
        })],
    );
    let model = QueryParser::new().parse(&chain, DataType::Int32).unwrap();

    let BodyClause::Where(filter) = &model.body_clauses()[0] else {
        panic!("expected a filter");
    };
    let nested = model.select_clause().selector.as_subquery().expect("subquery selector");
    assert_eq!(nested.result_operators(), &[ResultOperator::Count]);
    assert!(filter.predicate.to_string().contains("Count()"));
    assert!(model.validate().is_ok());
    assert!(model.deep_clone().is_ok());
}

#[test]
fn member_of_projected_record_reduces_to_shared_subquery() {
    let s = ParameterExpr::new("s", student());
    let row = Expr::record([
        ("n", course_count(&s.to_expr())),
        ("name", field(&s.to_expr(), "name")),
    ]);
    let row_type = row.data_type();
    let projector = Expr::quote(LambdaExpr::new(vec![s], row).to_expr());
    let chain = call(
        "OrderBy",
        call("Select", students(), vec![projector]),
        vec![lambda("x", row_type.clone(), |x| field(x, "n"))],
    );
    let model = QueryParser::new().parse(&chain, row_type).unwrap();

    let BodyClause::OrderBy(order_by) = &model.body_clauses()[0] else {
        panic!("expected an ordering");
    };
    let key = order_by.orderings[0].expression.as_subquery().expect("subquery key");
    assert_eq!(key.result_operators(), &[ResultOperator::Count]);
    assert!(model.validate().is_ok());
}

#[test]
fn distinct_models_reusing_a_source_id_are_still_cyclic() {
    let model = QueryParser::new()
        .parse(
            &call("Select", students(), vec![lambda("s", student(), course_count)]),
            DataType::Int32,
        )
        .unwrap();
    let nested = model.select_clause().selector.as_subquery().unwrap().clone();
    let pair = Expr::binary(
        BinaryOp::Add,
        Expr::subquery(nested.clone()),
        Expr::subquery(nested),
    );
    let mut rewritten = model.clone();
    let err = rewritten
        .transform_expressions(|expr| {
            Ok(if expr.as_subquery().is_some() {
                Arc::clone(&pair)
            } else {
                Arc::clone(expr)
            })
        })
        .unwrap_err();
    assert_eq!(err.code(), "CyclicModel");
    assert_eq!(rewritten, model);
}

#[test]
fn aggregate_func_is_stored_over_opaque_item() {
    let chain = call(
        "Select",
        students(),
        vec![lambda("s", student(), |s| field(s, "age"))],
    );
    let chain = call(
        "Aggregate",
        chain,
        vec![
            int(0),
            lambda2(("acc", "a"), (DataType::Int32, DataType::Int32), |acc, a| {
                Expr::binary(BinaryOp::Add, Arc::clone(acc), Arc::clone(a))
            }),
        ],
    );
    let model = QueryParser::new().parse(&chain, student()).unwrap();
    match model.result_operators() {
        [ResultOperator::AggregateFromSeed { func, .. }] => {
            assert_eq!(func.to_expr().to_string(), "(acc, input) => (acc + input)");
        }
        other => panic!("unexpected operators {other:?}"),
    }
    assert_eq!(
        model.output_shape().unwrap(),
        StreamedData::scalar(DataType::Int32)
    );
}

#[test]
fn group_by_names_the_group_for_later_clauses() {
    let chain = call(
        "GroupBy",
        students(),
        vec![lambda("s", student(), |s| field(s, "age"))],
    );
    let grouping = DataType::grouping(DataType::Int32, student());
    let chain = call(
        "Select",
        chain,
        vec![lambda("g", grouping, |g| field(g, "key"))],
    );
    let model = QueryParser::new().parse(&chain, student()).unwrap();
    assert_eq!(model.main_from().item_name, "g");
    assert_eq!(
        model.main_from().item_type,
        DataType::grouping(DataType::Int32, student())
    );
    assert_eq!(model.select_clause().selector.to_string(), "[g].key");
}
