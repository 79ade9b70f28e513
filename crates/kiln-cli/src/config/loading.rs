use figment::{
    providers::{Env, Format as _, Json, Serialized},
    value::{Uncased, UncasedStr},
    Figment,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

use kiln_config::Environment;

use crate::cli::BuildArgs;
use crate::config::{KilnConfig, ENV_PREFIX, SETTINGS_FILE};
use crate::error::{ConfigError, Result};

/// Settings given on the command line. Only present values override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_root_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_server_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_deprecations: Option<bool>,
}

impl From<&BuildArgs> for ConfigOverrides {
    fn from(args: &BuildArgs) -> Self {
        Self {
            app_root_path: args.app_root.clone(),
            entry_path: args.entry.clone(),
            server_path: args.server.clone(),
            dev_server_port: args.dev_server_port,
            app_port: args.app_port,
            environment: args.environment.map(Into::into),
            template: args.template.clone(),
            favicon: args.favicon.clone(),
            show_deprecations: args.show_deprecations.then_some(true),
        }
    }
}

/// Settings fields that may come from `KILN_*` variables, in snake case.
const ENV_FIELDS: &[&str] = &[
    "app_root_path",
    "entry_path",
    "server_path",
    "dev_server_port",
    "app_port",
    "environment",
    "template",
    "favicon",
    "title",
    "show_deprecations",
    "bundler_config",
    "bundler",
    "hot_patch_shim",
];

/// Map `dev_server_port` to `devServerPort`; unknown keys are dropped so
/// unrelated `KILN_*` variables cannot break loading.
fn env_field(key: &UncasedStr) -> Option<Uncased<'_>> {
    let key = key.as_str().to_ascii_lowercase();
    if !ENV_FIELDS.contains(&key.as_str()) {
        return None;
    }
    let mut field = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            field.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            field.push(c);
        }
    }
    Some(Uncased::from(field))
}

impl KilnConfig {
    /// Load settings from every source.
    ///
    /// `config_path` names the settings file explicitly; otherwise
    /// `<cwd>/kiln.config.json` is used when it exists.
    ///
    /// # Errors
    ///
    /// `ConfigError::NotFound` when an explicit file is missing, and
    /// `ConfigError::InvalidValue` when a source has bad syntax, an unknown
    /// field or a value of the wrong type.
    pub fn load(overrides: &ConfigOverrides, config_path: Option<&Path>, cwd: &Path) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default_config()));

        let config_file = match config_path {
            Some(path) => {
                let path = crate::paths::resolve_path(path, cwd);
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path).into());
                }
                Some(path)
            }
            None => {
                let default_path = cwd.join(SETTINGS_FILE);
                default_path.is_file().then_some(default_path)
            }
        };

        if let Some(path) = config_file {
            tracing::debug!(path = %path.display(), "loading settings file");
            figment = figment.merge(Json::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).filter_map(env_field));
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(|e| {
            ConfigError::InvalidValue {
                field: "configuration".to_string(),
                value: e.to_string(),
                hint: "Check kiln.config.json syntax and field types".to_string(),
            }
            .into()
        })
    }

    /// Built-in defaults.
    pub(crate) fn default_config() -> Self {
        use crate::config::defaults::*;

        Self {
            app_root_path: None,
            entry_path: default_entry_path(),
            server_path: None,
            dev_server_port: default_dev_server_port(),
            app_port: default_app_port(),
            environment: None,
            template: None,
            favicon: None,
            title: None,
            show_deprecations: false,
            bundler_config: default_bundler_config(),
            bundler: default_bundler(),
            hot_patch_shim: default_hot_patch_shim(),
        }
    }
}
