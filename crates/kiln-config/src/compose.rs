//! Hot-reload and environment composition of a base configuration.
//!
//! In hot mode every entry is prefixed, in this order, with the live-reload
//! client (pointed at the asset server), the HMR runtime and the optional
//! hot-patch shim. The public path is rewritten to the asset server's origin
//! and the HMR plugin is appended once.
//!
//! In normal mode entries and public path are left alone and exactly one of
//! the minifying plugin (production) or the named-modules plugin
//! (development) is present.
//!
//! In both modes a relative `output.path` is resolved against the app root.
//!
//! Previously injected modules are stripped before the prelude is prepended,
//! so composing twice gives the same result as composing once.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::bundle::{
    BuildConfiguration, Entry, EntryPoint, Plugin, HOT_MODULE_REPLACEMENT, NAMED_MODULES,
    UGLIFY_JS,
};
use crate::error::Result;
use crate::options::{BuildOptions, Mode, HMR_CLIENT_FILE, PUBLIC_PATH, STATE_DIR};

/// HMR runtime that applies updates without falling back to a full reload.
pub const HMR_RUNTIME: &str = "webpack/hot/only-dev-server";
/// Default language-specific hot-patch shim.
pub const HOT_PATCH_SHIM: &str = "react-hot-loader/patch";

/// The ordered set of modules injected in front of every hot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmrModules {
    /// `<client module>?<asset server origin>`
    pub client: String,
    pub runtime: String,
    pub shim: Option<String>,
}

impl HmrModules {
    /// `client_module` is the kiln live-reload client; the bundler hands
    /// the origin to it as the module's resource query.
    pub fn new(client_module: &Path, dev_server_origin: &str, shim: Option<String>) -> Self {
        Self {
            client: format!("{}?{dev_server_origin}", client_module.display()),
            runtime: HMR_RUNTIME.to_string(),
            shim,
        }
    }

    pub fn for_options(options: &BuildOptions) -> Self {
        Self::new(
            &options.hmr_client_module(),
            &options.dev_server_origin(),
            options.hot_patch_shim.clone(),
        )
    }

    /// Injected modules in prepend order.
    pub fn prelude(&self) -> Vec<String> {
        let mut modules = vec![self.client.clone(), self.runtime.clone()];
        modules.extend(self.shim.clone());
        modules
    }

    /// Whether `module` is something a previous composition injected.
    ///
    /// Any live-reload client is recognized regardless of its origin or app
    /// root, so a configuration composed for another port is re-pointed
    /// rather than given a second client.
    pub fn is_injected(&self, module: &str) -> bool {
        is_client_module(module) || module == self.runtime || self.shim.as_deref() == Some(module)
    }

    fn prepend_to(&self, modules: Vec<String>) -> Vec<String> {
        let mut out = self.prelude();
        out.extend(modules.into_iter().filter(|m| !self.is_injected(m)));
        out
    }

    fn apply(&self, entry: Entry) -> Entry {
        match entry {
            Entry::Single(module) => Entry::List(self.prepend_to(vec![module])),
            Entry::List(modules) => Entry::List(self.prepend_to(modules)),
            Entry::Named(bundles) => Entry::Named(
                bundles
                    .into_iter()
                    .map(|(name, point)| {
                        (name, EntryPoint::List(self.prepend_to(point.into_modules())))
                    })
                    .collect(),
            ),
        }
    }
}

fn is_client_module(module: &str) -> bool {
    module.split_once('?').is_some_and(|(path, _)| {
        Path::new(path).ends_with(PathBuf::from(STATE_DIR).join(HMR_CLIENT_FILE))
    })
}

/// Compose a raw base configuration for the given options.
///
/// # Errors
///
/// Returns `ConfigurationError` when the base configuration is not an object
/// or its entry field is missing or of an unrecognized shape.
pub fn compose(base: &Value, options: &BuildOptions) -> Result<BuildConfiguration> {
    let config = BuildConfiguration::from_value(base.clone())?;
    Ok(compose_config(config, options))
}

/// Compose an already parsed configuration. Infallible.
pub fn compose_config(mut config: BuildConfiguration, options: &BuildOptions) -> BuildConfiguration {
    config.output.path = options.resolve(&config.output.path);

    match options.mode {
        Mode::Hot => {
            let hmr = HmrModules::for_options(options);
            config.entry = hmr.apply(config.entry);
            config.output.public_path =
                format!("{}{}", options.dev_server_origin(), PUBLIC_PATH);
            config.add_plugin_once(Plugin::named(HOT_MODULE_REPLACEMENT));
            debug!(
                public_path = %config.output.public_path,
                "composed hot configuration"
            );
        }
        Mode::Normal => {
            let (wanted, unwanted) = if options.environment.is_production() {
                (UGLIFY_JS, NAMED_MODULES)
            } else {
                (NAMED_MODULES, UGLIFY_JS)
            };
            config.remove_plugin(unwanted);
            config.add_plugin_once(Plugin::named(wanted));
            debug!(plugin = wanted, "composed {} configuration", options.environment.as_str());
        }
    }
    config
}
