//! Reading raw record files into untyped JSON trees

use serde_json::Value;
use std::path::Path;

use crate::error::{ConfigError, Result, ValidationError};

/// Produces the raw tree the validator consumes
pub trait RecordReader {
    /// Read `path`; `locator` names the file in diagnostics
    fn read(&self, path: &Path, locator: &str) -> Result<Value>;
}

impl<T: RecordReader + ?Sized> RecordReader for &T {
    fn read(&self, path: &Path, locator: &str) -> Result<Value> {
        (**self).read(path, locator)
    }
}

/// Plain JSON reader that tolerates whole-line `//` comments
#[derive(Debug, Clone, Default)]
pub struct JsonFileReader;

impl JsonFileReader {
    pub fn new() -> Self {
        Self
    }

    /// Parse JSON text, reporting syntax errors as validation errors
    pub fn parse(content: &str, locator: &str) -> Result<Value> {
        serde_json::from_str(&strip_line_comments(content)).map_err(|e| {
            ConfigError::Validation(ValidationError {
                locator: locator.to_string(),
                path: "<root>".to_string(),
                message: format!("invalid JSON: {}", e),
            })
        })
    }
}

impl RecordReader for JsonFileReader {
    fn read(&self, path: &Path, locator: &str) -> Result<Value> {
        let bytes = std::fs::read(path).map_err(|e| ConfigError::io(path, e))?;
        let content = String::from_utf8(bytes).map_err(|e| {
            ConfigError::Validation(ValidationError {
                locator: locator.to_string(),
                path: "<root>".to_string(),
                message: format!("invalid UTF-8: {}", e.utf8_error()),
            })
        })?;
        Self::parse(&content, locator)
    }
}

/// Blank out lines whose first non-blank characters are `//`.
///
/// Lines are kept (emptied) so parser positions still match the file.
pub(crate) fn strip_line_comments(content: &str) -> String {
    content
        .lines()
        .map(|line| if line.trim_start().starts_with("//") { "" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}
