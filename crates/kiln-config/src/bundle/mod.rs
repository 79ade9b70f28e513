//! The build configuration handed to the bundler.
//!
//! Only the fields the orchestrator rewrites are modelled: `entry`,
//! `output.path`, `output.publicPath`, `output.filename` and `plugins`.
//! Everything else (loader rules, caching flags, resolver settings) is kept
//! verbatim in `rest` and written back untouched.

mod defaults;
mod entry;
mod plugin;

pub use entry::{Entry, EntryPoint};
pub use plugin::*;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::{json_kind, ConfigurationError, Result};

fn default_public_path() -> String {
    crate::options::PUBLIC_PATH.to_string()
}

fn default_filename() -> String {
    "[name]-[hash].js".to_string()
}

/// Output descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub path: PathBuf,
    #[serde(default = "default_public_path")]
    pub public_path: String,
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Output {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            public_path: default_public_path(),
            filename: default_filename(),
            rest: Map::new(),
        }
    }
}

/// A bundler configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildConfiguration {
    pub entry: Entry,
    pub output: Output,
    pub plugins: Vec<Plugin>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl BuildConfiguration {
    /// Parse a raw JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` when the value is not an object, the
    /// entry is missing or has an unrecognized shape, or `output`/`plugins`
    /// are malformed.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = json_kind(&value);
        let Value::Object(mut fields) = value else {
            return Err(ConfigurationError::NotAnObject(kind));
        };

        let entry = fields
            .remove("entry")
            .ok_or(ConfigurationError::MissingEntry)?;
        let entry = Entry::from_value(&entry)?;

        let output = fields
            .remove("output")
            .ok_or_else(|| ConfigurationError::InvalidField {
                field: "output".to_string(),
                reason: "missing output descriptor".to_string(),
            })?;
        let output: Output =
            serde_json::from_value(output).map_err(|e| ConfigurationError::InvalidField {
                field: "output".to_string(),
                reason: e.to_string(),
            })?;

        let plugins = match fields.remove("plugins") {
            Some(value) => Plugin::parse_list(&value)?,
            None => Vec::new(),
        };

        Ok(Self {
            entry,
            output,
            plugins,
            rest: fields,
        })
    }

    /// Serialize back to the JSON shape the bundler consumes.
    pub fn to_value(&self) -> Value {
        // Every field is a JSON-native type, so serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name == name)
    }

    /// Append a plugin unless one with the same name is already present.
    ///
    /// Returns `true` if the plugin was added.
    pub fn add_plugin_once(&mut self, plugin: Plugin) -> bool {
        if self.has_plugin(&plugin.name) {
            return false;
        }
        self.plugins.push(plugin);
        true
    }

    /// Remove every plugin with the given name.
    pub fn remove_plugin(&mut self, name: &str) {
        self.plugins.retain(|p| p.name != name);
    }
}
