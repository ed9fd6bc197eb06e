#![allow(missing_docs)]

use qmodel::expr::{BinaryOp, Expr, ExprRef};
use qmodel::model::{
    AdditionalFromClause, BodyClause, MainFromClause, QueryModel, ResultOperator, SelectClause,
};
use qmodel::types::{DataType, Member};

fn order() -> DataType {
    DataType::record("Order", [Member::new("total", DataType::Int32)])
}

fn customer() -> DataType {
    DataType::record(
        "Customer",
        [
            Member::new("name", DataType::String),
            Member::new("orders", DataType::sequence(order())),
        ],
    )
}

fn int(v: i64) -> ExprRef {
    Expr::constant(v, DataType::Int32)
}

/// `from c in customers from o in c.orders where o.total > 10 select c.name`
fn model_with_additional_source() -> (QueryModel, AdditionalFromClause) {
    let main = MainFromClause::new("c", customer(), Expr::source("customers", customer()));
    let c = main.reference();
    let select = SelectClause::new(Expr::field(&c, "name").unwrap());
    let mut model = QueryModel::new(main, select).unwrap();

    let orders = AdditionalFromClause::new("o", order(), Expr::field(&c, "orders").unwrap());
    model
        .add_body_clause(BodyClause::AdditionalFrom(orders.clone()))
        .unwrap();
    let o = orders.reference();
    model
        .add_body_clause(BodyClause::filter(Expr::binary(
            BinaryOp::GreaterThan,
            Expr::field(&o, "total").unwrap(),
            int(10),
        )))
        .unwrap();
    (model, orders)
}

#[test]
fn removing_referenced_source_is_rejected_atomically() {
    let (mut model, orders) = model_with_additional_source();
    let before = model.clone();

    let err = model.remove_body_clause(0).unwrap_err();
    assert_eq!(err.code(), "DanglingReference");
    let message = err.to_string();
    assert!(message.contains(&format!("o{}", orders.id())), "{message}");
    assert!(message.contains("where"), "{message}");
    assert_eq!(model, before);
}

#[test]
fn removing_dependents_first_succeeds() {
    let (mut model, _) = model_with_additional_source();
    let removed = model.remove_body_clause(1).unwrap();
    assert_eq!(removed.kind(), "where");
    let removed = model.remove_body_clause(0).unwrap();
    assert_eq!(removed.kind(), "from");
    assert!(model.body_clauses().is_empty());
    assert!(model.validate().is_ok());
}

#[test]
fn forward_reference_insert_is_rejected() {
    let (mut model, orders) = model_with_additional_source();
    let o = orders.reference();
    let early_filter = BodyClause::filter(Expr::binary(
        BinaryOp::LessThan,
        Expr::field(&o, "total").unwrap(),
        int(100),
    ));
    let before = model.clone();
    let err = model.insert_body_clause(0, early_filter).unwrap_err();
    assert_eq!(err.code(), "DanglingReference");
    assert_eq!(model, before);

    let late_filter = BodyClause::filter(Expr::binary(
        BinaryOp::LessThan,
        Expr::field(&o, "total").unwrap(),
        int(100),
    ));
    model.insert_body_clause(1, late_filter).unwrap();
    assert_eq!(model.body_clauses().len(), 3);
}

#[test]
fn select_referring_to_unknown_source_is_rejected() {
    let (mut model, _) = model_with_additional_source();
    let stray = AdditionalFromClause::new("x", order(), Expr::source("elsewhere", order()));
    let err = model
        .set_select_clause(SelectClause::new(stray.reference()))
        .unwrap_err();
    assert_eq!(err.code(), "DanglingReference");
    assert_eq!(model.select_clause().selector.to_string(), "[c].name");
}

#[test]
fn result_operators_are_shape_checked() {
    let (mut model, _) = model_with_additional_source();
    model.add_result_operator(ResultOperator::Count).unwrap();

    let err = model.add_result_operator(ResultOperator::Distinct).unwrap_err();
    assert_eq!(err.code(), "ShapeMismatch");
    assert_eq!(model.result_operators(), &[ResultOperator::Count]);

    model.insert_result_operator(0, ResultOperator::Distinct).unwrap();
    assert_eq!(
        model.result_operators(),
        &[ResultOperator::Distinct, ResultOperator::Count]
    );

    let err = model.remove_result_operator(5).unwrap_err();
    assert_eq!(err.code(), "InvalidArgument");
}

#[test]
fn sum_over_strings_is_rejected() {
    let (mut model, _) = model_with_additional_source();
    let err = model.add_result_operator(ResultOperator::Sum).unwrap_err();
    assert_eq!(err.code(), "ShapeMismatch");
    assert!(model.result_operators().is_empty());
}

#[test]
fn transform_failure_leaves_model_unchanged() {
    let (mut model, _) = model_with_additional_source();
    let before = model.clone();
    let err = model
        .transform_expressions(|expr| match expr.as_ref() {
            Expr::Constant { .. } => Err(qmodel::QueryModelError::invalid("test", "boom")),
            _ => Ok(expr.clone()),
        })
        .unwrap_err();
    assert_eq!(err.code(), "InvalidArgument");
    assert_eq!(model, before);
}

#[test]
fn reinserting_a_declared_source_is_cyclic() {
    let (mut model, orders) = model_with_additional_source();
    let err = model
        .add_body_clause(BodyClause::AdditionalFrom(orders))
        .unwrap_err();
    assert_eq!(err.code(), "CyclicModel");
}
