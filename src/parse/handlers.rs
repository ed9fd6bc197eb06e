//! Handlers for the standard sequence operators.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{QueryModelError, Result};
use crate::expr::{Expr, ExprRef, LambdaExpr, Value};
use crate::model::{
    AdditionalFromClause, BodyClause, JoinClause, OrderByClause, Ordering, OrderingDirection,
    ResultOperator, SetOperationKind,
};
use crate::resolve::{reverse_resolve_lambda, substitute_parameters};
use crate::types::DataType;

use super::context::ChainContext;
use super::registry::{ArgShape, ChainCall, ChainHandler, HandlerRegistry, MethodSignature};

use ArgShape::{Lambda, NotLambda};

/// Pins a closure to the handler signature.
fn handler<F>(f: F) -> F
where
    F: Fn(&ChainCall<'_>, &mut ChainContext<'_>) -> Result<()> + Send + Sync + 'static,
{
    f
}

pub(crate) fn register_standard(registry: &mut HandlerRegistry) {
    let mut add = |name: &str, args: &[ArgShape], h: Box<dyn ChainHandler>| {
        registry.register_boxed(MethodSignature::new(name, args), h);
    };

    add("Where", &[Lambda(1)], Box::new(handler(where_clause)));
    add("Select", &[Lambda(1)], Box::new(handler(select)));
    add("SelectMany", &[Lambda(1)], Box::new(handler(select_many)));
    add("SelectMany", &[Lambda(1), Lambda(2)], Box::new(handler(select_many)));
    add(
        "Join",
        &[NotLambda, Lambda(1), Lambda(1), Lambda(2)],
        Box::new(handler(join)),
    );
    add("OrderBy", &[Lambda(1)], Box::new(handler(order_by_asc)));
    add("OrderByDescending", &[Lambda(1)], Box::new(handler(order_by_desc)));
    add("ThenBy", &[Lambda(1)], Box::new(handler(then_by_asc)));
    add("ThenByDescending", &[Lambda(1)], Box::new(handler(then_by_desc)));

    let plain = [
        ("Count", ResultOperator::Count),
        ("LongCount", ResultOperator::LongCount),
        ("Distinct", ResultOperator::Distinct),
        ("Reverse", ResultOperator::Reverse),
        ("Min", ResultOperator::Min),
        ("Max", ResultOperator::Max),
        ("Sum", ResultOperator::Sum),
        ("Average", ResultOperator::Average),
        ("Any", ResultOperator::Any),
    ];
    for (name, op) in plain {
        add(name, &[], Box::new(operator(op)));
    }

    let elements = [
        ("First", ResultOperator::First { return_default_when_empty: false }),
        ("FirstOrDefault", ResultOperator::First { return_default_when_empty: true }),
        ("Last", ResultOperator::Last { return_default_when_empty: false }),
        ("LastOrDefault", ResultOperator::Last { return_default_when_empty: true }),
        ("Single", ResultOperator::Single { return_default_when_empty: false }),
        ("SingleOrDefault", ResultOperator::Single { return_default_when_empty: true }),
    ];
    for (name, op) in elements {
        add(name, &[], Box::new(operator(op.clone())));
        add(name, &[Lambda(1)], Box::new(filtered(op)));
    }
    for (name, op) in [
        ("Count", ResultOperator::Count),
        ("LongCount", ResultOperator::LongCount),
        ("Any", ResultOperator::Any),
    ] {
        add(name, &[Lambda(1)], Box::new(filtered(op)));
    }
    for (name, op) in [
        ("Min", ResultOperator::Min),
        ("Max", ResultOperator::Max),
        ("Sum", ResultOperator::Sum),
        ("Average", ResultOperator::Average),
    ] {
        add(name, &[Lambda(1)], Box::new(projected(op)));
    }

    add("All", &[Lambda(1)], Box::new(handler(all)));
    add("Take", &[NotLambda], Box::new(handler(take)));
    add("Skip", &[NotLambda], Box::new(handler(skip)));
    add("Contains", &[NotLambda], Box::new(handler(contains)));
    add("DefaultIfEmpty", &[], Box::new(handler(default_if_empty)));
    add("DefaultIfEmpty", &[NotLambda], Box::new(handler(default_if_empty)));
    add("Cast", &[], Box::new(handler(cast)));
    add("OfType", &[], Box::new(handler(of_type)));

    for kind in [
        SetOperationKind::Union,
        SetOperationKind::Concat,
        SetOperationKind::Intersect,
        SetOperationKind::Except,
    ] {
        add(kind.name(), &[NotLambda], Box::new(set_operation(kind)));
    }

    add("GroupBy", &[Lambda(1)], Box::new(handler(group_by)));
    add("GroupBy", &[Lambda(1), Lambda(1)], Box::new(handler(group_by)));
    add("Aggregate", &[Lambda(2)], Box::new(handler(aggregate)));
    add("Aggregate", &[NotLambda, Lambda(2)], Box::new(handler(aggregate)));
    add(
        "Aggregate",
        &[NotLambda, Lambda(2), Lambda(1)],
        Box::new(handler(aggregate)),
    );
}

fn operator(
    op: ResultOperator,
) -> impl Fn(&ChainCall<'_>, &mut ChainContext<'_>) -> Result<()> + Send + Sync + 'static {
    handler(move |_, ctx| ctx.add_result_operator(op.clone()))
}

/// `Op(x => p)` is `Where(x => p).Op()`.
fn filtered(
    op: ResultOperator,
) -> impl Fn(&ChainCall<'_>, &mut ChainContext<'_>) -> Result<()> + Send + Sync + 'static {
    handler(move |call, ctx| {
        where_clause(call, ctx)?;
        ctx.add_result_operator(op.clone())
    })
}

/// `Op(x => s)` is `Select(x => s).Op()`.
fn projected(
    op: ResultOperator,
) -> impl Fn(&ChainCall<'_>, &mut ChainContext<'_>) -> Result<()> + Send + Sync + 'static {
    handler(move |call, ctx| {
        select(call, ctx)?;
        ctx.add_result_operator(op.clone())
    })
}

fn set_operation(
    kind: SetOperationKind,
) -> impl Fn(&ChainCall<'_>, &mut ChainContext<'_>) -> Result<()> + Send + Sync + 'static {
    handler(move |call, ctx| {
        let source2 = ctx.prepare_argument(call.arg(0)?)?;
        ctx.add_result_operator(ResultOperator::SetOperation { kind, source2 })
    })
}

fn where_clause(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let predicate = call.lambda(0)?;
    ctx.begin_clause(predicate.param_name(0))?;
    let predicate = ctx.resolve(predicate)?;
    ctx.add_body_clause(BodyClause::filter(predicate));
    Ok(())
}

fn select(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let selector = call.lambda(0)?;
    ctx.begin_clause(selector.param_name(0))?;
    let selector = ctx.resolve(selector)?;
    ctx.set_selector(selector);
    Ok(())
}

fn element_type_of(sequence: &ExprRef) -> DataType {
    sequence
        .data_type()
        .element_type()
        .cloned()
        .unwrap_or(DataType::Unknown)
}

fn select_many(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let collection = call.lambda(0)?;
    let result = match call.args.len() {
        1 => None,
        _ => Some(call.lambda(1)?),
    };
    ctx.begin_clause(collection.param_name(0))?;
    let from_expression = ctx.resolve(collection)?;
    let name = match result.and_then(|r| r.param_name(1)) {
        Some(name) => name.to_owned(),
        None => ctx.fresh_name(),
    };
    let clause = AdditionalFromClause::new(name, element_type_of(&from_expression), from_expression);
    let reference = clause.reference();
    let current = Arc::clone(ctx.current_item());
    ctx.add_body_clause(BodyClause::AdditionalFrom(clause));
    let selector = match result {
        Some(result) => ctx.resolve_with(result, &[current, reference])?,
        None => reference,
    };
    ctx.set_selector(selector);
    Ok(())
}

fn join(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let outer_key = call.lambda(1)?;
    let inner_key = call.lambda(2)?;
    let result = call.lambda(3)?;
    ctx.begin_clause(outer_key.param_name(0))?;
    let inner_sequence = ctx.prepare_argument(call.arg(0)?)?;
    let outer = ctx.resolve(outer_key)?;
    let name = match result.param_name(1).or_else(|| inner_key.param_name(0)) {
        Some(name) => name.to_owned(),
        None => ctx.fresh_name(),
    };
    let item_type = element_type_of(&inner_sequence);
    let mut clause = JoinClause::new(
        name,
        item_type,
        inner_sequence,
        outer,
        Expr::constant(Value::Null, DataType::Unknown),
    );
    let reference = clause.reference();
    clause.inner_key = ctx.resolve_with(inner_key, &[Arc::clone(&reference)])?;
    let current = Arc::clone(ctx.current_item());
    ctx.add_body_clause(BodyClause::Join(clause));
    let selector = ctx.resolve_with(result, &[current, reference])?;
    ctx.set_selector(selector);
    Ok(())
}

fn start_ordering(
    call: &ChainCall<'_>,
    ctx: &mut ChainContext<'_>,
    direction: OrderingDirection,
) -> Result<()> {
    let key = call.lambda(0)?;
    ctx.begin_clause(key.param_name(0))?;
    let expression = ctx.resolve(key)?;
    ctx.add_body_clause(BodyClause::OrderBy(OrderByClause {
        orderings: vec![Ordering {
            expression,
            direction,
        }],
    }));
    Ok(())
}

fn extend_ordering(
    call: &ChainCall<'_>,
    ctx: &mut ChainContext<'_>,
    direction: OrderingDirection,
) -> Result<()> {
    let misplaced = || {
        QueryModelError::unrecognized(
            call.expr,
            format!("{} must directly follow OrderBy or ThenBy", call.name()),
        )
    };
    if ctx.last_ordering().is_none() {
        return Err(misplaced());
    }
    let expression = ctx.resolve(call.lambda(0)?)?;
    ctx.last_ordering()
        .ok_or_else(misplaced)?
        .orderings
        .push(Ordering {
            expression,
            direction,
        });
    Ok(())
}

fn order_by_asc(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    start_ordering(call, ctx, OrderingDirection::Asc)
}

fn order_by_desc(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    start_ordering(call, ctx, OrderingDirection::Desc)
}

fn then_by_asc(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    extend_ordering(call, ctx, OrderingDirection::Asc)
}

fn then_by_desc(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    extend_ordering(call, ctx, OrderingDirection::Desc)
}

fn all(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let predicate = call.lambda(0)?;
    ctx.prepare_lambda_scope(predicate.param_name(0))?;
    let predicate = ctx.resolve(predicate)?;
    ctx.add_result_operator(ResultOperator::All { predicate })
}

fn take(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let count = ctx.prepare_argument(call.arg(0)?)?;
    ctx.add_result_operator(ResultOperator::Take(count))
}

fn skip(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let count = ctx.prepare_argument(call.arg(0)?)?;
    ctx.add_result_operator(ResultOperator::Skip(count))
}

fn contains(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let item = ctx.prepare_argument(call.arg(0)?)?;
    ctx.add_result_operator(ResultOperator::Contains { item })
}

fn default_if_empty(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let default_value = match call.args.first() {
        Some(arg) => Some(ctx.prepare_argument(arg)?),
        None => None,
    };
    ctx.add_result_operator(ResultOperator::DefaultIfEmpty { default_value })
}

fn cast(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let target = call.type_arg(0)?.clone();
    ctx.add_result_operator(ResultOperator::Cast { target })
}

fn of_type(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let target = call.type_arg(0)?.clone();
    ctx.add_result_operator(ResultOperator::OfType { target })
}

fn group_by(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let key = call.lambda(0)?;
    ctx.prepare_lambda_scope(key.param_name(0))?;
    let key_selector = ctx.resolve(key)?;
    let element_selector = match call.args.len() {
        1 => Arc::clone(ctx.current_item()),
        _ => ctx.resolve(call.lambda(1)?)?,
    };
    let item_name = ctx.fresh_name();
    ctx.add_result_operator(ResultOperator::GroupBy {
        item_name,
        key_selector,
        element_selector,
    })
}

/// The accumulating function stays a lambda over `(acc, item)`: the item
/// parameter is resolved against the current item, then read back out of an
/// opaque item with reverse resolution.
fn aggregate(call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
    let (seed, func, result_selector) = match call.args.len() {
        1 => (None, call.lambda(0)?, None),
        2 => (Some(call.arg(0)?), call.lambda(1)?, None),
        _ => (Some(call.arg(0)?), call.lambda(1)?, Some(call.lambda(2)?)),
    };
    let [acc, item_param] = func.params.as_slice() else {
        return Err(QueryModelError::unrecognized(
            call.expr,
            "the accumulating function must take (acc, item)",
        ));
    };
    ctx.prepare_lambda_scope(Some(item_param.name.as_str()))?;
    let item = Arc::clone(ctx.current_item());

    let mut bindings = FxHashMap::default();
    bindings.insert(item_param.name.clone(), Arc::clone(&item));
    let body = substitute_parameters(&func.body, &bindings)?;
    let body = ctx.prepare_argument(&body)?;
    let partial = LambdaExpr::new(vec![acc.clone()], body);
    let func = reverse_resolve_lambda(&item, &partial, 1)?;

    let op = match seed {
        None => ResultOperator::Aggregate { func },
        Some(seed) => ResultOperator::AggregateFromSeed {
            seed: ctx.prepare_argument(seed)?,
            func,
            result_selector: result_selector.cloned(),
        },
    };
    ctx.add_result_operator(op)
}
