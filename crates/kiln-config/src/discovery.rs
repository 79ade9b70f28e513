//! File-based discovery of the base build configuration.
//!
//! Looks for a JSON bundler configuration in the app root. When the project
//! has none, the default configuration is synthesized from the options.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::bundle::BuildConfiguration;
use crate::error::{ConfigurationError, Result};
use crate::options::BuildOptions;

/// Default bundler configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "webpack.config.json";

/// Where a base configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseConfigSource {
    File(PathBuf),
    Default,
}

/// A raw base configuration, ready for composition.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    pub value: Value,
    pub source: BaseConfigSource,
}

/// Base configuration discovery rooted at the app root.
///
/// # Example
///
/// ```no_run
/// use kiln_config::{BuildOptions, ConfigDiscovery};
///
/// let options = BuildOptions::new("/proj");
/// let base = ConfigDiscovery::new("/proj").load(&options, Vec::new()).unwrap();
/// ```
pub struct ConfigDiscovery {
    root: PathBuf,
    file_name: PathBuf,
}

impl ConfigDiscovery {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            file_name: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Use a different configuration file, relative to the root.
    pub fn with_file_name(mut self, file_name: impl Into<PathBuf>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Path of the configuration file, if it exists.
    pub fn find(&self) -> Option<PathBuf> {
        let path = self.root.join(&self.file_name);
        path.is_file().then_some(path)
    }

    /// Load the base configuration, falling back to the default one.
    ///
    /// A configuration object may be wrapped under a top-level `default`
    /// key, as produced by module-style exports.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Read` or `ConfigurationError::Parse`
    /// when the file exists but cannot be read or is not valid JSON.
    pub fn load(&self, options: &BuildOptions, env_keys: Vec<String>) -> Result<BaseConfig> {
        let Some(path) = self.find() else {
            debug!(root = %self.root.display(), "no bundler configuration, using default");
            return Ok(BaseConfig {
                value: BuildConfiguration::default_for(options, env_keys).to_value(),
                source: BaseConfigSource::Default,
            });
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigurationError::Read {
            path: path.clone(),
            source,
        })?;
        let value: Value =
            serde_json::from_str(&content).map_err(|source| ConfigurationError::Parse {
                path: path.clone(),
                source,
            })?;

        let value = match value {
            Value::Object(mut fields)
                if !fields.contains_key("entry")
                    && matches!(fields.get("default"), Some(Value::Object(_))) =>
            {
                fields.remove("default").unwrap_or_default()
            }
            other => other,
        };

        debug!(path = %path.display(), "loaded bundler configuration");
        Ok(BaseConfig {
            value,
            source: BaseConfigSource::File(path),
        })
    }
}
