#![allow(missing_docs)]

use std::sync::Arc;

use qmodel::expr::{same_node, BinaryOp, Expr, ExprRef, LambdaExpr, ParameterExpr};
use qmodel::model::SourceId;
use qmodel::resolve::{find_accessor, resolve_lambda, reverse_resolve, reverse_resolve_lambda};
use qmodel::types::DataType;

fn reference(name: &str, ty: DataType) -> ExprRef {
    Expr::source_ref(SourceId::next(), name, ty)
}

fn nested_shape(s1: &ExprRef, s2: &ExprRef) -> ExprRef {
    let inner = Expr::record([
        ("c", Arc::clone(s2)),
        ("d", Expr::constant("lit", DataType::String)),
    ]);
    Expr::record([("a", Arc::clone(s1)), ("b", inner)])
}

#[test]
fn accessor_reaches_nested_reference() {
    let s1 = reference("s1", DataType::Int32);
    let s2 = reference("s2", DataType::String);
    let shape = nested_shape(&s1, &s2);
    let input = ParameterExpr::new("input", shape.data_type());

    let accessor = find_accessor(&s2, &shape, &input).unwrap();
    assert_eq!(accessor.to_expr().to_string(), "input => input.b.c");
    assert_eq!(accessor.body.data_type(), DataType::String);

    let accessor = find_accessor(&s1, &shape, &input).unwrap();
    assert_eq!(accessor.body.to_string(), "input.a");
}

#[test]
fn missing_reference_reports_both_expressions() {
    let s1 = reference("s1", DataType::Int32);
    let s2 = reference("s2", DataType::String);
    let stray = reference("s3", DataType::Bool);
    let shape = nested_shape(&s1, &s2);
    let input = ParameterExpr::new("input", shape.data_type());

    let err = find_accessor(&stray, &shape, &input).unwrap_err();
    assert_eq!(err.code(), "AccessorNotFound");
    let message = err.to_string();
    assert!(message.contains("[s3]"), "{message}");
    assert!(message.contains("[s1]"), "{message}");
}

#[test]
fn accessor_substituted_into_shape_yields_reference() {
    let s1 = reference("s1", DataType::Int32);
    let s2 = reference("s2", DataType::String);
    let shape = nested_shape(&s1, &s2);
    let input = ParameterExpr::new("input", shape.data_type());

    for searched in [&s1, &s2] {
        let accessor = find_accessor(searched, &shape, &input).unwrap();
        let roundtrip = resolve_lambda(&accessor, &[Arc::clone(&shape)]).unwrap();
        assert!(Arc::ptr_eq(&roundtrip, searched));
    }
}

#[test]
fn opaque_leaves_are_not_entered() {
    let s1 = reference("s1", DataType::Int32);
    let sum = Expr::binary(BinaryOp::Add, Arc::clone(&s1), Expr::constant(1i64, DataType::Int32));
    let shape = Expr::record([("total", sum)]);
    let input = ParameterExpr::new("input", shape.data_type());
    let err = find_accessor(&s1, &shape, &input).unwrap_err();
    assert_eq!(err.code(), "AccessorNotFound");
}

#[test]
fn coercion_is_traversed_and_undone() {
    let s1 = reference("s1", DataType::Int32);
    let shape = Expr::record([("wide", Expr::convert(Arc::clone(&s1), DataType::Int64))]);
    let input = ParameterExpr::new("input", shape.data_type());
    let accessor = find_accessor(&s1, &shape, &input).unwrap();
    assert_eq!(accessor.body.to_string(), "Convert(input.wide, i32)");
    assert_eq!(accessor.body.data_type(), DataType::Int32);
}

#[test]
fn reverse_resolution_rewrites_every_reference() {
    let s1 = reference("s1", DataType::Int32);
    let s2 = reference("s2", DataType::Int32);
    let shape = Expr::record([("x", Arc::clone(&s1)), ("y", Arc::clone(&s2))]);
    let resolved = Expr::binary(BinaryOp::Multiply, Arc::clone(&s1), Arc::clone(&s2));

    let lambda = reverse_resolve(&shape, &resolved).unwrap();
    assert_eq!(lambda.to_expr().to_string(), "input => (input.x * input.y)");

    let back = resolve_lambda(&lambda, &[Arc::clone(&shape)]).unwrap();
    match back.as_ref() {
        Expr::Binary { left, right, .. } => {
            assert!(same_node(left, &s1));
            assert!(same_node(right, &s2));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn reverse_resolution_failure_wraps_accessor_error() {
    let s1 = reference("s1", DataType::Int32);
    let other = reference("other", DataType::Int32);
    let shape = Expr::record([("x", Arc::clone(&s1))]);
    let err = reverse_resolve(&shape, &other).unwrap_err();
    assert_eq!(err.code(), "ReverseResolution");
    assert!(err.to_string().contains("[other]"));
}

#[test]
fn insert_form_keeps_existing_parameters() {
    let s1 = reference("s1", DataType::Int32);
    let shape = Expr::record([("x", Arc::clone(&s1))]);
    let acc = ParameterExpr::new("input", DataType::Int32);
    let func = LambdaExpr::new(
        vec![acc.clone()],
        Expr::binary(BinaryOp::Add, acc.to_expr(), Arc::clone(&s1)),
    );
    let out = reverse_resolve_lambda(&shape, &func, 1).unwrap();
    assert_eq!(
        out.to_expr().to_string(),
        "(input, input1) => (input + input1.x)"
    );
}
