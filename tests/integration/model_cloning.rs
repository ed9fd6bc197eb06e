#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use qmodel::expr::{walk, BinaryOp, Expr, ExprRef, LambdaExpr, MethodRef, ParameterExpr};
use qmodel::model::{BodyClause, QueryModel, QuerySourceMapping, SourceId};
use qmodel::types::{DataType, Member};
use qmodel::QueryParser;

fn course() -> DataType {
    DataType::record("Course", [Member::new("credits", DataType::Int32)])
}

fn student() -> DataType {
    DataType::record(
        "Student",
        [
            Member::new("age", DataType::Int32),
            Member::new("courses", DataType::sequence(course())),
        ],
    )
}

fn call(name: &str, source: ExprRef, args: Vec<ExprRef>) -> ExprRef {
    let mut all = vec![source];
    all.extend(args);
    Expr::call(None, MethodRef::new("Queryable", name, DataType::Unknown), all)
}

fn lambda(name: &str, ty: DataType, body: impl FnOnce(&ExprRef) -> ExprRef) -> ExprRef {
    let param = ParameterExpr::new(name, ty);
    let body = body(&param.to_expr());
    LambdaExpr::new(vec![param], body).to_expr()
}

/// `students.Where(s => s.courses.Where(c => c.credits > s.age).Any())`
fn correlated_model() -> QueryModel {
    let chain = call(
        "Where",
        Expr::source("students", student()),
        vec![lambda("s", student(), |s| {
            let courses = Expr::field(s, "courses").unwrap();
            let hard = call(
                "Where",
                courses,
                vec![lambda("c", course(), |c| {
                    Expr::binary(
                        BinaryOp::GreaterThan,
                        Expr::field(c, "credits").unwrap(),
                        Expr::field(s, "age").unwrap(),
                    )
                })],
            );
            call("Any", hard, vec![])
        })],
    );
    QueryParser::new().parse(&chain, student()).unwrap()
}

fn nested_of(model: &QueryModel) -> &QueryModel {
    match &model.body_clauses()[0] {
        BodyClause::Where(filter) => filter.predicate.as_subquery().expect("subquery"),
        other => panic!("unexpected clause {other}"),
    }
}

/// Sources declared anywhere in the tree, and sources referenced anywhere.
fn identities(model: &QueryModel) -> (BTreeSet<SourceId>, BTreeSet<SourceId>) {
    let mut declared: BTreeSet<SourceId> = model.sources().iter().map(|s| s.id()).collect();
    let mut referenced = BTreeSet::new();
    let mut copy = model.clone();
    copy.transform_expressions(|expr| {
        walk(expr, &mut |node| {
            match node.as_ref() {
                Expr::SourceRef(reference) => {
                    referenced.insert(reference.id);
                }
                Expr::Subquery(nested) => {
                    declared.extend(nested.sources().iter().map(|s| s.id()));
                }
                _ => {}
            }
            true
        });
        Ok(Arc::clone(expr))
    })
    .unwrap();
    (declared, referenced)
}

#[test]
fn correlated_reference_follows_outer_clone() {
    let original = correlated_model();
    let clone = original.deep_clone().unwrap();

    let outer_id = clone.main_from().id();
    assert_ne!(outer_id, original.main_from().id());

    let nested = nested_of(&clone);
    assert!(nested.outer_scope().contains(&outer_id));
    assert!(!nested
        .outer_scope()
        .contains(&original.main_from().id()));
    assert_eq!(
        nested.main_from().from_expression.as_ref(),
        &Expr::MemberAccess {
            target: Expr::source_ref(outer_id, "s", student()),
            member: Member::new("courses", DataType::sequence(course())),
        }
    );
    assert_ne!(
        nested.main_from().id(),
        nested_of(&original).main_from().id()
    );
}

#[test]
fn clone_shares_no_identity_and_stays_closed() {
    let original = correlated_model();
    let clone = original.deep_clone().unwrap();

    let (original_declared, _) = identities(&original);
    let (clone_declared, clone_referenced) = identities(&clone);
    assert!(original_declared.is_disjoint(&clone_declared));
    assert!(clone_referenced.is_subset(&clone_declared));
    assert_eq!(original_declared.len(), clone_declared.len());

    assert_eq!(clone.body_clauses().len(), original.body_clauses().len());
    assert_eq!(clone.result_operators(), original.result_operators());
    assert_eq!(clone.output_shape().unwrap(), original.output_shape().unwrap());
    assert!(clone.validate().is_ok());
}

#[test]
fn nested_clone_keeps_outer_scope_references() {
    let outer = correlated_model();
    let nested = nested_of(&outer);
    let copy = nested.deep_clone().unwrap();
    assert_eq!(copy.outer_scope(), nested.outer_scope());
    assert_eq!(copy.free_references(), nested.free_references());
}

#[test]
fn nested_clone_with_mapping_retargets_outer_scope() {
    let outer = correlated_model();
    let nested = nested_of(&outer);
    let replacement = SourceId::next();
    let mut mapping = QuerySourceMapping::new();
    mapping.insert(
        outer.main_from().id(),
        Expr::source_ref(replacement, "s", student()),
    );
    let copy = nested.deep_clone_with(&mut mapping).unwrap();
    assert_eq!(copy.outer_scope(), &BTreeSet::from([replacement]));
    assert!(mapping.contains(nested.main_from().id()));
}

#[test]
fn cloning_into_a_mapping_that_already_holds_the_source_fails() {
    let model = correlated_model();
    let mut mapping = QuerySourceMapping::new();
    mapping.insert(
        model.main_from().id(),
        Expr::source_ref(SourceId::next(), "s", student()),
    );
    let err = model.deep_clone_with(&mut mapping).unwrap_err();
    assert_eq!(err.code(), "CyclicModel");
}
