//! Process environment handed to the compiler and the application server.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// File of `KEY=VALUE` lines loaded from the project root.
pub const DOTENV_FILE: &str = ".env";

/// Parse `.env` text with the usual dotenv rules: comments, `export `
/// prefixes, quoting, escapes and multiline double-quoted values.
/// Malformed entries are skipped with a warning.
pub fn parse_dotenv(text: &str) -> Vec<(String, String)> {
    collect_pairs(dotenvy::from_read_iter(text.as_bytes()), Path::new(DOTENV_FILE))
}

fn collect_pairs<R: Read>(entries: dotenvy::Iter<R>, origin: &Path) -> Vec<(String, String)> {
    entries
        .filter_map(|entry| match entry {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!("skipping entry in {}: {e}", origin.display());
                None
            }
        })
        .collect()
}

/// Pairs from `<root>/.env` that are not already set in this process.
/// A missing file yields nothing.
pub fn load_dotenv(root: &Path) -> Vec<(String, String)> {
    let path = root.join(DOTENV_FILE);
    let entries = match dotenvy::from_path_iter(&path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => return Vec::new(),
        Err(e) => {
            warn!("ignoring {}: {e}", path.display());
            return Vec::new();
        }
    };

    let pairs: Vec<_> = collect_pairs(entries, &path)
        .into_iter()
        .filter(|(key, _)| std::env::var_os(key).is_none())
        .collect();
    debug!(count = pairs.len(), "loaded {}", path.display());
    pairs
}

/// Names of every variable visible to child processes, sorted.
pub fn environment_keys(extra: &[(String, String)]) -> Vec<String> {
    std::env::vars_os()
        .filter_map(|(key, _)| key.into_string().ok())
        .chain(extra.iter().map(|(key, _)| key.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
