//! The base configuration used when a project ships none of its own.

use serde_json::{json, Map};

use super::{BuildConfiguration, Entry, EntryPoint, Output, Plugin, ENVIRONMENT, HTML, LOADER_OPTIONS};
use crate::options::BuildOptions;
use indexmap::IndexMap;

impl BuildConfiguration {
    /// Synthesize the default base configuration for a project.
    ///
    /// Produces a single `client` bundle built from the configured entry,
    /// written to `<root>/build` and served under `/assets/`. `env_keys` are
    /// the environment variable names exposed to client code.
    pub fn default_for(options: &BuildOptions, env_keys: Vec<String>) -> Self {
        let mut bundles = IndexMap::new();
        bundles.insert(
            "client".to_string(),
            EntryPoint::List(vec![options.entry().to_string_lossy().into_owned()]),
        );

        let mut plugins = vec![
            Plugin::with_options(
                LOADER_OPTIONS,
                json!({"options": {"postcss": ["autoprefixer"]}}),
            ),
            Plugin::with_options(ENVIRONMENT, json!(env_keys)),
        ];

        let html = serde_json::to_value(&options.html).unwrap_or_default();
        if options.html.is_empty() {
            plugins.push(Plugin::named(HTML));
        } else {
            plugins.push(Plugin::with_options(HTML, html));
        }

        let mut rest = Map::new();
        rest.insert("cache".to_string(), json!(true));
        rest.insert("mode".to_string(), json!(options.environment.as_str()));

        Self {
            entry: Entry::Named(bundles),
            output: Output::new(options.output_path()),
            plugins,
            rest,
        }
    }
}
