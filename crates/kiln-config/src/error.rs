//! Error types for build configuration parsing and loading.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("build configuration must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("build configuration has no `entry` field")]
    MissingEntry,

    /// The entry field (or one named bundle inside it) is neither a module
    /// path, a list of module paths, nor a map of named bundles.
    #[error(
        "unrecognized entry shape{}: expected a module path, a list of module paths or a map of named bundles, found {found}",
        .bundle.as_ref().map(|b| format!(" for bundle '{b}'")).unwrap_or_default()
    )]
    UnrecognizedEntry {
        bundle: Option<String>,
        found: &'static str,
    },

    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("failed to read build configuration {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in build configuration {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Human-readable name of a JSON value's type, used in error messages.
pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
