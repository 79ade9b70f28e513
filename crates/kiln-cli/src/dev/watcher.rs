//! File system watcher feeding restart and rebuild triggers.
//!
//! Filters out hidden paths, paths outside the watched root and configured
//! ignore patterns, and drops repeats of the same path inside the debounce
//! window.

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::error::{CliError, Result};

/// A change that should trigger a restart or rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The changed path, when the watcher reported one.
    pub path: Option<PathBuf>,
}

impl WatchEvent {
    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A trigger not tied to a particular file.
    pub fn unspecified() -> Self {
        Self { path: None }
    }
}

/// Recursive watcher over a file or directory.
///
/// Events arrive on the receiver returned by [`FileWatcher::new`] for as long
/// as the watcher is alive.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Watch `root`.
    ///
    /// Patterns without a `/` match any path component (`node_modules`),
    /// patterns starting with `*` match a suffix (`*.log`) and anything else
    /// matches a path prefix relative to `root` (`app/server`).
    ///
    /// # Errors
    ///
    /// `CliError::FileNotFound` if `root` does not exist, `CliError::Watch`
    /// if the platform watcher cannot be created.
    pub fn new(
        root: PathBuf,
        ignore_patterns: Vec<String>,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<WatchEvent>)> {
        if !root.exists() {
            return Err(CliError::FileNotFound(root));
        }

        let (tx, rx) = mpsc::channel(100);

        let debounce = Duration::from_millis(debounce_ms);
        let mut last_event: Option<(PathBuf, Instant)> = None;
        let watch_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_)
                    | notify::EventKind::Modify(_)
                    | notify::EventKind::Remove(_)
            ) {
                return;
            }

            for path in &event.paths {
                if should_ignore(path, &watch_root, &ignore_patterns) {
                    continue;
                }

                let now = Instant::now();
                if let Some((last_path, last_time)) = &last_event {
                    if last_path == path && now.duration_since(*last_time) < debounce {
                        continue;
                    }
                }
                last_event = Some((path.clone(), now));

                let _ = tx.blocking_send(WatchEvent::changed(path.clone()));
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Whether a change at `path` should be dropped.
pub fn should_ignore(path: &Path, root: &Path, ignore_patterns: &[String]) -> bool {
    let Ok(rel_path) = path.strip_prefix(root) else {
        return true;
    };
    let path_str = rel_path.to_string_lossy();

    for pattern in ignore_patterns {
        if let Some(suffix) = pattern.strip_prefix('*') {
            if path_str.ends_with(suffix) {
                return true;
            }
        } else if pattern.contains('/') {
            if rel_path.starts_with(pattern) {
                return true;
            }
        } else if rel_path.components().any(|c| c.as_os_str() == pattern.as_str()) {
            return true;
        }
    }

    rel_path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| name.starts_with('.') && name != "." && name != "..")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ignore_component_pattern() {
        let root = PathBuf::from("/project");
        let patterns = patterns(&["node_modules"]);

        assert!(should_ignore(
            Path::new("/project/node_modules/pkg/index.js"),
            &root,
            &patterns
        ));
        assert!(should_ignore(
            Path::new("/project/app/node_modules/x.js"),
            &root,
            &patterns
        ));
        assert!(!should_ignore(Path::new("/project/src/index.js"), &root, &patterns));
    }

    #[test]
    fn test_ignore_prefix_pattern_is_component_wise() {
        let root = PathBuf::from("/project");
        let patterns = patterns(&["app/server"]);

        assert!(should_ignore(
            Path::new("/project/app/server/routes.js"),
            &root,
            &patterns
        ));
        assert!(!should_ignore(
            Path::new("/project/app/server2/routes.js"),
            &root,
            &patterns
        ));
        assert!(!should_ignore(
            Path::new("/project/app/client/index.js"),
            &root,
            &patterns
        ));
    }

    #[test]
    fn test_ignore_extension() {
        let root = PathBuf::from("/project");
        let patterns = patterns(&["*.log"]);
        assert!(should_ignore(Path::new("/project/debug.log"), &root, &patterns));
        assert!(!should_ignore(Path::new("/project/src/index.js"), &root, &patterns));
    }

    #[test]
    fn test_ignore_hidden_and_outside() {
        let root = PathBuf::from("/project");
        assert!(should_ignore(Path::new("/project/.git/config"), &root, &[]));
        assert!(should_ignore(Path::new("/project/.kiln/bundle.config.json"), &root, &[]));
        assert!(should_ignore(Path::new("/other/file.js"), &root, &[]));
    }

    #[test]
    fn test_watching_a_single_file() {
        let root = PathBuf::from("/project/server.js");
        assert!(!should_ignore(&root, &root, &[]));
    }

    #[test]
    fn test_missing_root() {
        let result = FileWatcher::new(PathBuf::from("/definitely/not/here"), vec![], 50);
        assert!(matches!(result, Err(CliError::FileNotFound(_))));
    }
}
