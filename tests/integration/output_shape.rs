#![allow(missing_docs)]

use qmodel::expr::Expr;
use qmodel::model::{compose, ResultOperator, SetOperationKind, ShapeChain, StreamedData};
use qmodel::types::DataType;

fn ints() -> StreamedData {
    StreamedData::sequence(DataType::Int32)
}

#[test]
fn counting_and_quantifiers_yield_scalars() {
    let cases = [
        (ResultOperator::Count, DataType::Int32),
        (ResultOperator::LongCount, DataType::Int64),
        (ResultOperator::Any, DataType::Bool),
        (
            ResultOperator::Contains {
                item: Expr::constant(3i64, DataType::Int32),
            },
            DataType::Bool,
        ),
    ];
    for (op, expected) in cases {
        assert_eq!(
            op.output_shape(&ints()).unwrap(),
            StreamedData::scalar(expected),
            "{}",
            op.name()
        );
    }
}

#[test]
fn average_widens_integers_and_keeps_nullability() {
    let shape = ResultOperator::Average.output_shape(&ints()).unwrap();
    assert_eq!(shape, StreamedData::scalar(DataType::Float64));

    let nullable = StreamedData::sequence(DataType::nullable(DataType::Int64));
    let shape = ResultOperator::Average.output_shape(&nullable).unwrap();
    assert_eq!(shape.to_string(), "scalar<f64?>");

    let decimals = StreamedData::sequence(DataType::Decimal);
    let shape = ResultOperator::Sum.output_shape(&decimals).unwrap();
    assert_eq!(shape, StreamedData::scalar(DataType::Decimal));
}

#[test]
fn element_operators_track_default_flag() {
    let shape = ResultOperator::First {
        return_default_when_empty: true,
    }
    .output_shape(&ints())
    .unwrap();
    assert_eq!(shape.to_string(), "single_or_default<i32>");

    let shape = ResultOperator::Max.output_shape(&ints()).unwrap();
    assert_eq!(shape.to_string(), "single<i32>");
}

#[test]
fn item_preserving_operators_keep_the_sequence() {
    let ops = [
        ResultOperator::Distinct,
        ResultOperator::Reverse,
        ResultOperator::Take(Expr::constant(2i64, DataType::Int32)),
        ResultOperator::SetOperation {
            kind: SetOperationKind::Union,
            source2: Expr::source("more", DataType::Int32),
        },
    ];
    assert_eq!(compose(ints(), &ops).unwrap(), ints());
    assert!(ops.iter().all(ResultOperator::is_item_preserving));
}

#[test]
fn cast_replaces_the_item_type() {
    let shape = ResultOperator::Cast {
        target: DataType::Int64,
    }
    .output_shape(&ints())
    .unwrap();
    assert_eq!(shape, StreamedData::sequence(DataType::Int64));
    assert!(!ResultOperator::Cast {
        target: DataType::Int64
    }
    .is_item_preserving());
}

#[test]
fn operators_after_a_scalar_are_rejected() {
    let err = compose(ints(), &[ResultOperator::Count, ResultOperator::Sum]).unwrap_err();
    assert_eq!(err.code(), "ShapeMismatch");
    let message = err.to_string();
    assert!(message.starts_with("Sum expects"), "{message}");
    assert!(message.contains("scalar<i32>"), "{message}");
}

#[test]
fn numeric_aggregates_reject_strings() {
    let strings = StreamedData::sequence(DataType::String);
    for op in [ResultOperator::Sum, ResultOperator::Average] {
        let err = op.output_shape(&strings).unwrap_err();
        assert_eq!(err.code(), "ShapeMismatch");
        assert!(err.to_string().contains("string"));
    }
}

#[test]
fn cached_chain_tracks_appends_and_truncation() {
    let ops = [
        ResultOperator::Skip(Expr::constant(1i64, DataType::Int32)),
        ResultOperator::Cast {
            target: DataType::Float32,
        },
        ResultOperator::Average,
    ];
    let mut chain = ShapeChain::new(ints());
    assert!(chain.is_empty());
    for (idx, op) in ops.iter().enumerate() {
        let incremental = chain.push(op).unwrap().clone();
        assert_eq!(incremental, compose(ints(), &ops[..=idx]).unwrap());
    }
    assert_eq!(chain.len(), 3);
    assert_eq!(chain.current(), &StreamedData::scalar(DataType::Float32));

    chain.truncate(2);
    assert_eq!(chain.current(), &StreamedData::sequence(DataType::Int32));
    chain.truncate(10);
    assert_eq!(chain.current(), &ints());

    assert!(chain.push(&ResultOperator::Count).is_ok());
    assert!(chain.push(&ResultOperator::Count).is_err());
    assert_eq!(chain.len(), 1);
}
