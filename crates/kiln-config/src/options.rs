//! Per-run build options.
//!
//! `BuildOptions` is immutable for the duration of a pipeline run. Fields that
//! depend on the filesystem (the app root, the server entry) are resolved by
//! the CLI before the options are constructed.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default port of the live asset server.
pub const DEFAULT_DEV_SERVER_PORT: u16 = 5050;

/// Default port the supervised application server listens on.
pub const DEFAULT_APP_PORT: u16 = 5000;

/// Client entry used by the default base configuration.
pub const DEFAULT_ENTRY_PATH: &str = "app/client/index.js";

/// Conventional server entry, used when the manifest does not name one.
pub const DEFAULT_SERVER_PATH: &str = "app/server";

/// Output directory, relative to the app root.
pub const OUTPUT_DIR: &str = "build";

/// Public path assets are served under.
pub const PUBLIC_PATH: &str = "/assets/";

/// Directory under the app root holding files kiln generates for the
/// bundler. Lives outside the output directory so cleaning never removes it.
pub const STATE_DIR: &str = ".kiln";

/// Live-reload client module, inside [`STATE_DIR`].
pub const HMR_CLIENT_FILE: &str = "hmr-client.js";

/// Build mode selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One-shot build, process exits when the pipeline completes
    #[default]
    Normal,
    /// Build, then serve with hot reload until interrupted
    Hot,
}

/// Execution environment the configuration is composed for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Interpret a `NODE_ENV`-style selector. Only `production` (any case)
    /// selects production.
    pub fn from_selector(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// Options forwarded to the HTML page plugin of the default configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HtmlOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl HtmlOptions {
    pub fn is_empty(&self) -> bool {
        self.template.is_none() && self.favicon.is_none() && self.title.is_none()
    }
}

/// Options for a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub mode: Mode,
    pub environment: Environment,
    /// Absolute project root
    pub app_root_path: PathBuf,
    /// Client entry, relative to the root
    pub entry_path: PathBuf,
    /// Server entry, relative to the root. `None` until resolved.
    pub server_path: Option<PathBuf>,
    pub dev_server_port: u16,
    /// Language-specific hot-patch module injected after the HMR runtime
    pub hot_patch_shim: Option<String>,
    pub html: HtmlOptions,
}

impl BuildOptions {
    /// Options with every field at its documented default.
    pub fn new(app_root_path: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Normal,
            environment: Environment::Development,
            app_root_path: app_root_path.into(),
            entry_path: PathBuf::from(DEFAULT_ENTRY_PATH),
            server_path: None,
            dev_server_port: DEFAULT_DEV_SERVER_PORT,
            hot_patch_shim: Some(crate::compose::HOT_PATCH_SHIM.to_string()),
            html: HtmlOptions::default(),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_dev_server_port(mut self, port: u16) -> Self {
        self.dev_server_port = port;
        self
    }

    pub fn with_server_path(mut self, server_path: impl Into<PathBuf>) -> Self {
        self.server_path = Some(server_path.into());
        self
    }

    pub fn is_hot(&self) -> bool {
        matches!(self.mode, Mode::Hot)
    }

    /// Origin of the live asset server, e.g. `http://localhost:5050`.
    pub fn dev_server_origin(&self) -> String {
        format!("http://localhost:{}", self.dev_server_port)
    }

    /// Default output directory (`<root>/build`).
    pub fn output_path(&self) -> PathBuf {
        self.app_root_path.join(OUTPUT_DIR)
    }

    /// Generated files directory (`<root>/.kiln`).
    pub fn state_dir(&self) -> PathBuf {
        self.app_root_path.join(STATE_DIR)
    }

    /// Live-reload client module injected into hot entries.
    pub fn hmr_client_module(&self) -> PathBuf {
        self.state_dir().join(HMR_CLIENT_FILE)
    }

    /// Resolve `path` against the app root unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve(&self.app_root_path, path)
    }

    /// Absolute client entry.
    pub fn entry(&self) -> PathBuf {
        resolve(&self.app_root_path, &self.entry_path)
    }

    /// Absolute server entry, if one has been resolved.
    pub fn server_entry(&self) -> Option<PathBuf> {
        self.server_path
            .as_deref()
            .map(|p| resolve(&self.app_root_path, p))
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
