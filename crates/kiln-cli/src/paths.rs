//! Project root discovery and server entry resolution.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use kiln_config::DEFAULT_SERVER_PATH;

use crate::error::{CliError, Result};
use crate::supervisor::ModuleRegistry;

/// Environment variable that overrides root discovery.
pub const ROOT_OVERRIDE_VAR: &str = "APP_ROOT";

/// Upper bound on directories inspected while walking up.
pub const MAX_ROOT_DEPTH: usize = 50;

/// Dependency manifest marking a project root.
pub const MANIFEST_FILE: &str = "package.json";

/// Dependency install directory marking a project root.
pub const DEPENDENCY_DIR: &str = "node_modules";

/// Resolve a path relative to a working directory.
pub fn resolve_path(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Get the current working directory.
pub fn get_cwd() -> Result<PathBuf> {
    env::current_dir().map_err(|e| {
        CliError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to get current directory: {}", e),
        ))
    })
}

/// Locate the project root: `APP_ROOT` when set, otherwise the nearest
/// ancestor of the working directory holding a manifest or dependency
/// directory.
///
/// # Errors
///
/// `CliError::RootNotFound` when no marker is found within
/// [`MAX_ROOT_DEPTH`] levels.
pub fn resolve_root() -> Result<PathBuf> {
    if let Some(root) = env::var_os(ROOT_OVERRIDE_VAR).filter(|v| !v.is_empty()) {
        let root = resolve_path(Path::new(&root), &get_cwd()?);
        debug!(root = %root.display(), "project root from {ROOT_OVERRIDE_VAR}");
        return Ok(root);
    }
    find_root(&get_cwd()?, MAX_ROOT_DEPTH)
}

/// Walk up from `start`, inspecting at most `max_depth` directories.
pub fn find_root(start: &Path, max_depth: usize) -> Result<PathBuf> {
    for dir in start.ancestors().take(max_depth) {
        if dir.join(MANIFEST_FILE).is_file() || dir.join(DEPENDENCY_DIR).is_dir() {
            debug!(root = %dir.display(), "project root found");
            return Ok(dir.to_path_buf());
        }
    }
    Err(CliError::RootNotFound {
        start: start.to_path_buf(),
        levels: max_depth,
    })
}

#[derive(Deserialize)]
struct Manifest {
    main: Option<String>,
}

/// The server entry declared by the manifest's `main`, relative to `root`.
fn declared_main(root: &Path) -> Option<PathBuf> {
    let text = fs::read_to_string(root.join(MANIFEST_FILE)).ok()?;
    let manifest: Manifest = serde_json::from_str(&text).ok()?;
    let main = manifest.main?;
    let main = main.trim_start_matches("./");
    let main = main.strip_suffix("/index.js").unwrap_or(main);
    (!main.is_empty()).then(|| PathBuf::from(main))
}

/// Find the application server entry, relative to `root`.
///
/// Uses the manifest's `main` when it loads and exports something with
/// `listen()`; otherwise falls back to `app/server`. Never fails.
pub async fn resolve_server_entry(root: &Path, registry: &dyn ModuleRegistry) -> PathBuf {
    let Some(main) = declared_main(root) else {
        debug!("no usable manifest main, using {DEFAULT_SERVER_PATH}");
        return PathBuf::from(DEFAULT_SERVER_PATH);
    };

    let module = match registry.load(&root.join(&main)) {
        Ok(module) => module,
        Err(e) => {
            debug!("manifest main failed to load ({e}), using {DEFAULT_SERVER_PATH}");
            return PathBuf::from(DEFAULT_SERVER_PATH);
        }
    };
    let Some(listener) = module.listener() else {
        debug!(entry = %main.display(), "manifest main cannot listen, using {DEFAULT_SERVER_PATH}");
        return PathBuf::from(DEFAULT_SERVER_PATH);
    };

    match listener.verify().await {
        Ok(()) => {
            debug!(entry = %main.display(), "server entry from manifest");
            main
        }
        Err(e) => {
            debug!(entry = %main.display(), "manifest main rejected ({e}), using {DEFAULT_SERVER_PATH}");
            PathBuf::from(DEFAULT_SERVER_PATH)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ListenError, ServerError};
    use crate::supervisor::{Listenable, Module, ProcessRegistry, ServerHandle};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_path() {
        let cwd = Path::new("/proj");
        assert_eq!(resolve_path(Path::new("a/b"), cwd), PathBuf::from("/proj/a/b"));
        assert_eq!(resolve_path(Path::new("/x"), cwd), PathBuf::from("/x"));
    }

    #[test]
    fn test_find_root_by_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{}").unwrap();
        let nested = dir.path().join("app/client/components");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_root(&nested, MAX_ROOT_DEPTH).unwrap(), dir.path());
    }

    #[test]
    fn test_find_root_by_dependency_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(DEPENDENCY_DIR)).unwrap();
        let nested = dir.path().join("src");
        fs::create_dir(&nested).unwrap();

        assert_eq!(find_root(&nested, MAX_ROOT_DEPTH).unwrap(), dir.path());
    }

    #[test]
    fn test_find_root_respects_depth_cap() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "{}").unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();

        // Root is 4 levels up counting the start directory.
        assert!(find_root(&nested, 3).is_err());
        assert!(find_root(&nested, 4).is_ok());
    }

    #[test]
    fn test_declared_main_strips_index() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"main": "./server/index.js"}"#,
        )
        .unwrap();
        assert_eq!(declared_main(dir.path()), Some(PathBuf::from("server")));
    }

    /// Resolves every path to one module whose export check passes or not.
    struct Exports(bool);

    #[async_trait]
    impl Listenable for Exports {
        async fn listen(&self, _addr: SocketAddr) -> Result<Box<dyn ServerHandle>, ListenError> {
            Err(ListenError::Contract)
        }

        async fn verify(&self) -> Result<(), ListenError> {
            if self.0 {
                Ok(())
            } else {
                Err(ListenError::Contract)
            }
        }
    }

    impl ModuleRegistry for Exports {
        fn invalidate(&self, _prefix: &Path) -> usize {
            0
        }

        fn load(&self, path: &Path) -> Result<Module, ServerError> {
            Ok(Module::listenable(path, Arc::new(Exports(self.0))))
        }
    }

    fn manifest_main(dir: &TempDir, main: &str) {
        fs::write(
            dir.path().join(MANIFEST_FILE),
            format!(r#"{{"main": "{main}"}}"#),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_server_entry_from_manifest() {
        let dir = TempDir::new().unwrap();
        manifest_main(&dir, "server/index.js");

        assert_eq!(
            resolve_server_entry(dir.path(), &Exports(true)).await,
            PathBuf::from("server")
        );
    }

    #[tokio::test]
    async fn test_manifest_main_without_listen_falls_back() {
        let dir = TempDir::new().unwrap();
        manifest_main(&dir, "lib/index.js");

        assert_eq!(
            resolve_server_entry(dir.path(), &Exports(false)).await,
            PathBuf::from(DEFAULT_SERVER_PATH)
        );
    }

    #[tokio::test]
    async fn test_server_entry_falls_back() {
        let dir = TempDir::new().unwrap();
        let registry = ProcessRegistry::new(dir.path(), Vec::new());

        // No manifest.
        assert_eq!(
            resolve_server_entry(dir.path(), &registry).await,
            PathBuf::from(DEFAULT_SERVER_PATH)
        );

        // Malformed manifest.
        fs::write(dir.path().join(MANIFEST_FILE), "{not json").unwrap();
        assert_eq!(
            resolve_server_entry(dir.path(), &registry).await,
            PathBuf::from(DEFAULT_SERVER_PATH)
        );

        // Main points nowhere.
        fs::write(dir.path().join(MANIFEST_FILE), r#"{"main": "missing.js"}"#).unwrap();
        assert_eq!(
            resolve_server_entry(dir.path(), &registry).await,
            PathBuf::from(DEFAULT_SERVER_PATH)
        );

        // Main cannot listen.
        fs::write(dir.path().join("readme.txt"), "hi").unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), r#"{"main": "readme.txt"}"#).unwrap();
        assert_eq!(
            resolve_server_entry(dir.path(), &registry).await,
            PathBuf::from(DEFAULT_SERVER_PATH)
        );
    }
}
