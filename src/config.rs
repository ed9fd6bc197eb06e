//! Recognizer configuration, optionally loaded from a TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Knobs of the node-chain recognizer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    /// Declaring types whose calls are query operators. Calls declared
    /// elsewhere are treated as opaque sources.
    pub operator_owners: Vec<String>,
    /// Upper bound on the number of operator calls in one chain.
    pub max_chain_length: usize,
    /// Parse call chains nested inside lambda bodies as subqueries.
    pub detect_subqueries: bool,
    /// Prefix of item names invented for sources no lambda names.
    pub generated_name_prefix: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            operator_owners: vec!["Queryable".to_owned(), "Enumerable".to_owned()],
            max_chain_length: 1024,
            detect_subqueries: true,
            generated_name_prefix: "<generated>_".to_owned(),
        }
    }
}

impl ParserConfig {
    /// Parses a configuration from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })
    }

    /// Reads the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }

    /// Reads `explicit` if given, else the default location when it exists,
    /// else returns the defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Whether calls declared by `owner` are query operators.
    pub fn is_operator_owner(&self, owner: &str) -> bool {
        self.operator_owners.iter().any(|o| o == owner)
    }
}

/// Errors raised while loading a [`ParserConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read parser config {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`ParserConfig`].
    #[error("failed to parse parser config{}: {source}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        /// Offending file, when parsed from disk.
        path: Option<PathBuf>,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// `<config dir>/qmodel/parser.toml`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("qmodel").join("parser.toml"))
}
