//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned while loading cxgraph settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A settings file exists but could not be read
    #[error("cannot read cxgraph settings from '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A settings file is not valid TOML or has a mistyped key
    #[error("malformed cxgraph settings in '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The merged settings hold a value the indexer cannot use
    #[error("bad value for '{key}': {message}")]
    InvalidValue { key: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid_value(key: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            message: message.into(),
        }
    }
}
