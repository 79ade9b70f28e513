use std::path::PathBuf;

use kiln_config::{
    DEFAULT_APP_PORT, DEFAULT_DEV_SERVER_PORT, DEFAULT_ENTRY_PATH,
    discovery::DEFAULT_CONFIG_FILE,
};

use crate::build::DEFAULT_BUNDLER;

/// Settings file looked up in the working directory.
pub const SETTINGS_FILE: &str = "kiln.config.json";

/// Prefix for settings taken from the environment.
pub const ENV_PREFIX: &str = "KILN_";

pub fn default_entry_path() -> PathBuf {
    PathBuf::from(DEFAULT_ENTRY_PATH)
}

pub fn default_dev_server_port() -> u16 {
    DEFAULT_DEV_SERVER_PORT
}

pub fn default_app_port() -> u16 {
    DEFAULT_APP_PORT
}

pub fn default_bundler_config() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

pub fn default_bundler() -> Vec<String> {
    DEFAULT_BUNDLER.iter().map(|s| s.to_string()).collect()
}

pub fn default_hot_patch_shim() -> String {
    kiln_config::compose::HOT_PATCH_SHIM.to_string()
}
