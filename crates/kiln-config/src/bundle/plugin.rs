//! Bundler plugin descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{json_kind, ConfigurationError, Result};

/// Hot module replacement runtime plugin.
pub const HOT_MODULE_REPLACEMENT: &str = "HotModuleReplacementPlugin";
/// Minifying plugin used for production builds.
pub const UGLIFY_JS: &str = "UglifyJsPlugin";
/// Human-readable module ids for development builds.
pub const NAMED_MODULES: &str = "NamedModulesPlugin";
pub const LOADER_OPTIONS: &str = "LoaderOptionsPlugin";
pub const ENVIRONMENT: &str = "EnvironmentPlugin";
pub const HTML: &str = "HtmlWebpackPlugin";

/// A plugin reference by name, with optional constructor options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
}

impl Plugin {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(name: impl Into<String>, options: Value) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    /// Parse a plugin list. A bare string is shorthand for a plugin without
    /// options.
    pub(crate) fn parse_list(value: &Value) -> Result<Vec<Plugin>> {
        let Value::Array(items) = value else {
            return Err(ConfigurationError::InvalidField {
                field: "plugins".to_string(),
                reason: format!("expected an array, found {}", json_kind(value)),
            });
        };

        items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::String(name) => Ok(Plugin::named(name.clone())),
                Value::Object(_) => serde_json::from_value(item.clone()).map_err(|e| {
                    ConfigurationError::InvalidField {
                        field: format!("plugins[{index}]"),
                        reason: e.to_string(),
                    }
                }),
                other => Err(ConfigurationError::InvalidField {
                    field: format!("plugins[{index}]"),
                    reason: format!("expected a name or an object, found {}", json_kind(other)),
                }),
            })
            .collect()
    }
}
