//! Orchestrator settings loaded from several sources.
//!
//! Priority: CLI > `KILN_*` environment > kiln.config.json > defaults

mod defaults;
mod loading;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use kiln_config::{BuildOptions, Environment, HtmlOptions, Mode};

pub use defaults::*;
pub use loading::ConfigOverrides;

/// Kiln settings, from kiln.config.json, the environment and CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KilnConfig {
    /// Project root. Discovered when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_root_path: Option<PathBuf>,

    /// Client entry, relative to the project root
    #[serde(default = "default_entry_path")]
    pub entry_path: PathBuf,

    /// Application server entry, relative to the project root. Resolved from
    /// package.json when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_path: Option<PathBuf>,

    /// Port for the asset dev server
    #[serde(default = "default_dev_server_port")]
    pub dev_server_port: u16,

    /// Port for the application server
    #[serde(default = "default_app_port")]
    pub app_port: u16,

    /// Composition environment. Taken from NODE_ENV when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    /// HTML template for the default configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,

    /// Favicon for the default configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<PathBuf>,

    /// Page title for the default configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Trace deprecations in the bundler instead of silencing them
    #[serde(default)]
    pub show_deprecations: bool,

    /// Base bundler configuration file, relative to the project root
    #[serde(default = "default_bundler_config")]
    pub bundler_config: PathBuf,

    /// Command that runs the bundler
    #[serde(default = "default_bundler")]
    pub bundler: Vec<String>,

    /// Module injected after the HMR runtime in hot builds. Empty disables it.
    #[serde(default = "default_hot_patch_shim")]
    pub hot_patch_shim: String,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl KilnConfig {
    /// Generate JSON Schema for kiln.config.json.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(KilnConfig);
        serde_json::to_value(schema).unwrap_or_default()
    }

    /// Environment to compose for, falling back to `NODE_ENV`.
    pub fn environment(&self) -> Environment {
        self.environment.unwrap_or_else(|| {
            Environment::from_selector(std::env::var("NODE_ENV").ok().as_deref())
        })
    }

    /// Per-run options for `root`.
    pub fn build_options(&self, mode: Mode, root: &Path) -> BuildOptions {
        let mut options = BuildOptions::new(root)
            .with_mode(mode)
            .with_environment(self.environment())
            .with_dev_server_port(self.dev_server_port);
        options.entry_path = self.entry_path.clone();
        options.server_path = self.server_path.clone();
        options.hot_patch_shim = Some(self.hot_patch_shim.clone()).filter(|s| !s.is_empty());
        options.html = HtmlOptions {
            template: self.template.clone(),
            favicon: self.favicon.clone(),
            title: self.title.clone(),
        };
        options
    }
}
