//! Files generated under `<root>/.kiln` for each compilation.
//!
//! - `bundle.config.json`: the composed configuration, plugins as
//!   `{name, options}` descriptors
//! - `webpack.config.cjs`: the file handed to the bundler, which loads the
//!   JSON and instantiates the plugins
//! - `hmr-client.js`: the live-reload client hot entries start with

use std::path::{Path, PathBuf};

use kiln_config::{BuildConfiguration, HMR_CLIENT_FILE, STATE_DIR};

use crate::dev::HMR_CLIENT_SCRIPT;
use crate::error::BuildError;

/// Composed configuration, as JSON.
pub const COMPOSED_CONFIG_FILE: &str = "bundle.config.json";

/// Configuration module passed to the bundler with `--config`.
pub const BUNDLER_ADAPTER_FILE: &str = "webpack.config.cjs";

/// Environment variable naming the composed JSON for the adapter, or for a
/// custom bundler command that reads it directly.
pub const BUNDLE_CONFIG_VAR: &str = "KILN_BUNDLE_CONFIG";

const BUNDLER_ADAPTER: &str = include_str!("../../assets/webpack-adapter.cjs");

/// Path of the composed configuration for `root`.
pub fn composed_config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(COMPOSED_CONFIG_FILE)
}

/// Where the support files for one compilation were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportFiles {
    pub config: PathBuf,
    pub adapter: PathBuf,
    pub hmr_client: PathBuf,
}

impl SupportFiles {
    pub fn for_root(root: &Path) -> Self {
        let dir = root.join(STATE_DIR);
        Self {
            config: composed_config_path(root),
            adapter: dir.join(BUNDLER_ADAPTER_FILE),
            hmr_client: dir.join(HMR_CLIENT_FILE),
        }
    }

    /// Write every file, creating `.kiln` when needed.
    ///
    /// # Errors
    ///
    /// `BuildError::Compile` naming the file that could not be written.
    pub async fn write(root: &Path, config: &BuildConfiguration) -> Result<Self, BuildError> {
        let files = Self::for_root(root);
        let json = serde_json::to_vec_pretty(&config.to_value()).map_err(|e| {
            BuildError::invocation(format!("failed to serialize configuration: {e}"))
        })?;

        let dir = root.join(STATE_DIR);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            BuildError::invocation(format!("failed to create {}: {e}", dir.display()))
        })?;

        write_file(&files.config, &json).await?;
        write_file(&files.adapter, BUNDLER_ADAPTER.as_bytes()).await?;
        write_file(&files.hmr_client, HMR_CLIENT_SCRIPT.as_bytes()).await?;
        Ok(files)
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), BuildError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| BuildError::invocation(format!("failed to write {}: {e}", path.display())))
}
