//! Error types shared by the validator, scanner and index cache

use std::path::PathBuf;
use thiserror::Error;

/// A record violated a structural or semantic constraint.
///
/// `locator` names the source (usually a path relative to the corpus root),
/// `path` the offending field, e.g. `paramInformation["80"].options[1].label`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{locator}: {path}: {message}")]
pub struct ValidationError {
    pub locator: String,
    pub path: String,
    pub message: String,
}

/// The guard collaborator failed while evaluating a `$if` condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{locator}: {path}: failed to evaluate condition \"{predicate}\": {reason}")]
pub struct PredicateError {
    pub locator: String,
    pub path: String,
    pub predicate: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Predicate(#[from] PredicateError),
    #[error("Index file {path} is corrupt: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },
    #[error("IO error on {path}: {source}")]
    CorpusIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CorpusIo {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the record content rather than the environment
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
