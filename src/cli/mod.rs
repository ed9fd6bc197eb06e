//! Command implementations behind the `qmodel` binary.
//!
//! Each command loads a JSON tree file (see [`input`]), folds it with a
//! [`QueryParser`], and returns a serializable report; rendering is left to
//! the binary.

pub mod input;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, ParserConfig};
use crate::error::{ErrorWithCode, QueryModelError};
use crate::model::{ModelExplain, QueryModel, StreamedData};
use crate::parse::QueryParser;

use input::{InputError, TreeFile};

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Tree file problems.
    #[error(transparent)]
    Input(#[from] InputError),
    /// Configuration problems.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The tree does not fold into a valid model.
    #[error("{}", ErrorWithCode(.0))]
    Model(#[from] QueryModelError),
}

/// Output of `qmodel parse`.
#[derive(Clone, Debug, Serialize)]
pub struct ParseReport {
    /// One-line rendering of the model.
    pub model: String,
    /// Sources the model declares, main source first.
    pub sources: Vec<String>,
    /// Explain tree plus output shape.
    pub explain: ModelExplain,
}

/// Output of `qmodel shape`.
#[derive(Clone, Debug, Serialize)]
pub struct ShapeReport {
    /// Output shape of the model.
    pub shape: StreamedData,
    /// Rendered shape.
    pub rendered: String,
    /// Result operators in application order.
    pub result_operators: Vec<String>,
}

/// Loads the tree at `path` and folds it into a model.
pub fn load_model(path: &Path, config: ParserConfig) -> Result<QueryModel, CliError> {
    let tree = TreeFile::load(path)?;
    let root = tree.root.build()?;
    let parser = QueryParser::with_config(config);
    Ok(parser.parse(&root, tree.element_type)?)
}

/// `qmodel parse`.
pub fn run_parse(path: &Path, config: ParserConfig) -> Result<ParseReport, CliError> {
    let model = load_model(path, config)?;
    Ok(ParseReport {
        model: model.to_string(),
        sources: model
            .sources()
            .iter()
            .map(|source| format!("{} {}: {}", source.id(), source.item_name(), source.item_type()))
            .collect(),
        explain: model.explain(),
    })
}

/// `qmodel shape`.
pub fn run_shape(path: &Path, config: ParserConfig) -> Result<ShapeReport, CliError> {
    let model = load_model(path, config)?;
    let shape = model.output_shape()?;
    Ok(ShapeReport {
        rendered: shape.to_string(),
        shape,
        result_operators: model
            .result_operators()
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}
