#![allow(missing_docs)]

use std::sync::Arc;

use qmodel::expr::{BinaryOp, Expr, ExprRef};
use qmodel::model::{
    BodyClause, MainFromClause, QueryModel, QuerySourceMapping, SelectClause, SourceId,
};
use qmodel::resolve::{replace_references, replace_references_in_model};
use qmodel::types::{DataType, Member};

fn int(v: i64) -> ExprRef {
    Expr::constant(v, DataType::Int32)
}

#[test]
fn strict_replacement_names_unmapped_source() {
    let s1 = SourceId::next();
    let s2 = SourceId::next();
    let expr = Expr::binary(
        BinaryOp::Add,
        Expr::source_ref(s1, "s1", DataType::Int32),
        Expr::source_ref(s2, "s2", DataType::Int32),
    );
    let mut mapping = QuerySourceMapping::new();
    mapping.insert(s1, int(42));

    let err = replace_references(&expr, &mapping, true).unwrap_err();
    assert_eq!(err.code(), "UnmappedReference");
    let message = err.to_string();
    assert!(message.contains(&format!("s2{s2}")), "{message}");
    assert!(!message.contains(&format!("s1{s1}")), "{message}");
}

#[test]
fn lenient_replacement_keeps_unmapped_source() {
    let s1 = SourceId::next();
    let s2 = SourceId::next();
    let kept = Expr::source_ref(s2, "s2", DataType::Int32);
    let expr = Expr::binary(
        BinaryOp::Add,
        Expr::source_ref(s1, "s1", DataType::Int32),
        Arc::clone(&kept),
    );
    let mut mapping = QuerySourceMapping::new();
    mapping.insert(s1, int(42));

    let out = replace_references(&expr, &mapping, false).unwrap();
    assert_eq!(out.to_string(), "(42 + [s2])");
    match out.as_ref() {
        Expr::Binary { right, .. } => assert!(Arc::ptr_eq(right, &kept)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn untouched_expression_is_returned_as_is() {
    let s1 = SourceId::next();
    let expr = Expr::binary(BinaryOp::Add, int(1), int(2));
    let mut mapping = QuerySourceMapping::new();
    mapping.insert(s1, int(42));
    let out = replace_references(&expr, &mapping, true).unwrap();
    assert!(Arc::ptr_eq(&out, &expr));
}

#[test]
fn flattening_subquery_maps_correlated_reference() {
    let order = DataType::record("Order", [Member::new("total", DataType::Int32)]);
    let customer = DataType::record(
        "Customer",
        [Member::new("orders", DataType::sequence(order.clone()))],
    );

    let outer = MainFromClause::new("c", customer.clone(), Expr::source("customers", customer));
    let outer_ref = outer.reference();

    let inner_main = MainFromClause::new(
        "o",
        order,
        Expr::field(&outer_ref, "orders").unwrap(),
    );
    let inner_ref = inner_main.reference();
    let mut nested = QueryModel::from_parts(
        inner_main,
        Vec::new(),
        SelectClause::new(Expr::field(&inner_ref, "total").unwrap()),
        Vec::new(),
        [outer.id()].into_iter().collect(),
    )
    .unwrap();
    nested
        .add_body_clause(BodyClause::filter(Expr::binary(
            BinaryOp::GreaterThan,
            Expr::field(&inner_ref, "total").unwrap(),
            int(10),
        )))
        .unwrap();
    assert!(nested.free_references().contains(&outer.id()));

    let mut mapping = QuerySourceMapping::new();
    mapping.insert(
        outer.id(),
        Expr::source("vip_customer", DataType::Unknown),
    );
    let flat = replace_references_in_model(&nested, &mapping, true).unwrap();
    assert!(flat.free_references().is_empty());
    assert!(flat.outer_scope().is_empty());
    assert_eq!(flat.main_from().id(), nested.main_from().id());
    assert_eq!(flat.main_from().from_expression.to_string(), "vip_customer.orders");
}
