//! Explain tree of a query model.
//!
//! The tree reads like an operator plan: the root is the last result operator
//! and each node's first input is the stage feeding it, down to the main
//! source. Subqueries found in a stage's expressions are attached as further
//! inputs of that stage.

use serde::Serialize;

use crate::expr::ExprRef;

use super::{subqueries, BodyClause, QueryModel};

/// Explain node representing one stage with optional metadata.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainNode {
    /// Stage name
    pub op: String,
    /// Additional properties describing the stage
    pub props: Vec<ExplainProp>,
    /// Input stages
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a new explain node with the given stage name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    fn prop(mut self, key: &str, value: impl ToString) -> Self {
        self.props.push(ExplainProp {
            key: key.to_owned(),
            value: value.to_string(),
        });
        self
    }

    fn with_input(mut self, input: ExplainNode) -> Self {
        self.inputs.push(input);
        self
    }

    fn with_subqueries<'a>(mut self, exprs: impl IntoIterator<Item = &'a ExprRef>) -> Self {
        for expr in exprs {
            for nested in subqueries(expr) {
                self.inputs
                    .push(ExplainNode::new("Subquery").with_input(nested.explain().root));
            }
        }
        self
    }

    /// Renders the tree as indented text, one stage per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.op);
        if !self.props.is_empty() {
            let props: Vec<String> = self
                .props
                .iter()
                .map(|p| format!("{}={}", p.key, p.value))
                .collect();
            out.push_str(&format!(" [{}]", props.join(", ")));
        }
        out.push('\n');
        for input in &self.inputs {
            input.render_into(out, depth + 1);
        }
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
}

/// Explain tree plus the model's output shape.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelExplain {
    /// Root stage.
    pub root: ExplainNode,
    /// Rendered output shape, or the shape error.
    pub output_shape: String,
}

impl QueryModel {
    /// Builds the explain tree.
    pub fn explain(&self) -> ModelExplain {
        let main = &self.main_from;
        let mut node = ExplainNode::new("MainFrom")
            .prop("item", &main.item_name)
            .prop("type", &main.item_type)
            .prop("source", &main.from_expression)
            .with_subqueries([&main.from_expression]);

        for clause in &self.body_clauses {
            let stage = match clause {
                BodyClause::Where(c) => ExplainNode::new("Where").prop("predicate", &c.predicate),
                BodyClause::OrderBy(c) => c.orderings.iter().fold(
                    ExplainNode::new("OrderBy"),
                    |stage, ordering| {
                        stage.prop(
                            "key",
                            format!("{} {}", ordering.expression, ordering.direction),
                        )
                    },
                ),
                BodyClause::AdditionalFrom(c) => ExplainNode::new("AdditionalFrom")
                    .prop("item", &c.item_name)
                    .prop("type", &c.item_type)
                    .prop("source", &c.from_expression),
                BodyClause::Join(c) => ExplainNode::new("Join")
                    .prop("item", &c.item_name)
                    .prop("type", &c.item_type)
                    .prop("inner", &c.inner_sequence)
                    .prop("outer_key", &c.outer_key)
                    .prop("inner_key", &c.inner_key),
            };
            node = stage
                .with_input(node)
                .with_subqueries(clause.expressions().into_iter().map(|(expr, _)| expr));
        }

        node = ExplainNode::new("Select")
            .prop("selector", &self.select.selector)
            .with_input(node)
            .with_subqueries([&self.select.selector]);

        for op in &self.result_operators {
            node = ExplainNode::new(op.name())
                .prop("operator", op)
                .with_input(node)
                .with_subqueries(op.expressions());
        }

        let output_shape = match self.output_shape() {
            Ok(shape) => shape.to_string(),
            Err(err) => err.to_string(),
        };
        ModelExplain {
            root: node,
            output_shape,
        }
    }
}
