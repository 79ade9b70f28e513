//! Loading supervised server modules.
//!
//! A module is whatever a server entry path resolves to. The registry caches
//! resolutions; the supervisor invalidates the entry subtree before every
//! load so edits on disk are never masked by a stale resolution.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::handle::Listenable;
use super::process::{Launcher, ProcessServer};
use crate::error::ServerError;

/// Files tried, in order, when an entry path names a directory.
pub const INDEX_FILES: &[&str] = &["index.js", "index.mjs", "index.cjs"];

/// Extensions tried, in order, when an entry path names neither a file nor a
/// directory.
pub const MODULE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

const DEFAULT_SCRIPT_RUNTIME: &str = "node";

/// A loaded server module.
#[derive(Clone)]
pub struct Module {
    path: PathBuf,
    listener: Option<Arc<dyn Listenable>>,
}

impl Module {
    /// A module that can be bound to an address.
    pub fn listenable(path: impl Into<PathBuf>, listener: Arc<dyn Listenable>) -> Self {
        Self {
            path: path.into(),
            listener: Some(listener),
        }
    }

    /// A module that loaded but exposes nothing to listen with.
    pub fn inert(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            listener: None,
        }
    }

    /// File the entry resolved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn listener(&self) -> Option<&Arc<dyn Listenable>> {
        self.listener.as_ref()
    }

    pub fn can_listen(&self) -> bool {
        self.listener.is_some()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("listenable", &self.can_listen())
            .finish()
    }
}

/// Source of server modules, with explicit cache control.
pub trait ModuleRegistry: Send + Sync {
    /// Drop every cached module whose requested or resolved path starts with
    /// `prefix`. Returns how many were dropped.
    fn invalidate(&self, prefix: &Path) -> usize;

    /// Load the module at `path`, from cache when present.
    fn load(&self, path: &Path) -> Result<Module, ServerError>;
}

/// Registry of server modules run as child processes.
///
/// Script modules (see [`MODULE_EXTENSIONS`]) are imported by a loader
/// under the script runtime, which calls their exported `listen()`. Files
/// with a registered interpreter are run as plain programs by it, and any
/// other executable file is started directly. Anything else resolves to an
/// inert module.
pub struct ProcessRegistry {
    cwd: PathBuf,
    env: Vec<(String, String)>,
    runtime: String,
    interpreters: HashMap<String, String>,
    cache: Mutex<HashMap<PathBuf, Module>>,
}

impl ProcessRegistry {
    /// `cwd` is the working directory of spawned servers and `env` is added
    /// to their environment.
    pub fn new(cwd: impl Into<PathBuf>, env: Vec<(String, String)>) -> Self {
        Self {
            cwd: cwd.into(),
            env,
            runtime: DEFAULT_SCRIPT_RUNTIME.to_string(),
            interpreters: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Import script modules with `program` instead of `node`.
    pub fn with_runtime(mut self, program: &str) -> Self {
        self.runtime = program.to_string();
        self
    }

    /// Use `program` to run files with extension `ext` as plain scripts.
    pub fn with_interpreter(mut self, ext: &str, program: &str) -> Self {
        self.interpreters.insert(ext.to_string(), program.to_string());
        self
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    fn launcher_for(&self, file: &Path) -> Option<Launcher> {
        let ext = file.extension().and_then(|ext| ext.to_str());
        let interpreter = ext.and_then(|ext| self.interpreters.get(ext));
        let is_module = ext.is_some_and(|ext| MODULE_EXTENSIONS.contains(&ext));

        let (program, args, module) = match interpreter {
            Some(program) => (PathBuf::from(program), vec![file.display().to_string()], None),
            None if is_module => (PathBuf::from(&self.runtime), Vec::new(), Some(file.to_path_buf())),
            None if is_executable(file) => (file.to_path_buf(), Vec::new(), None),
            None => return None,
        };

        Some(Launcher {
            program,
            args,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            module,
        })
    }
}

impl ModuleRegistry for ProcessRegistry {
    fn invalidate(&self, prefix: &Path) -> usize {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|requested, module| {
            !requested.starts_with(prefix) && !module.path.starts_with(prefix)
        });
        before - cache.len()
    }

    fn load(&self, path: &Path) -> Result<Module, ServerError> {
        if let Some(module) = self.cache.lock().get(path) {
            return Ok(module.clone());
        }

        let file = resolve_entry(path).ok_or_else(|| ServerError::Load {
            path: path.to_path_buf(),
            reason: "no such file, directory index or script".to_string(),
        })?;

        let module = match self.launcher_for(&file) {
            Some(launcher) => {
                debug!(entry = %path.display(), launcher = %launcher, "loaded server module");
                Module::listenable(&file, Arc::new(ProcessServer::new(launcher)))
            }
            None => {
                debug!(entry = %path.display(), file = %file.display(), "module has no launcher");
                Module::inert(&file)
            }
        };

        self.cache.lock().insert(path.to_path_buf(), module.clone());
        Ok(module)
    }
}

/// Resolve an entry path the way a script runtime would: the file itself, a
/// directory index, or the path with a script extension appended.
pub fn resolve_entry(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if path.is_dir() {
        return INDEX_FILES
            .iter()
            .map(|name| path.join(name))
            .find(|candidate| candidate.is_file());
    }
    MODULE_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(".");
            candidate.push(ext);
            PathBuf::from(candidate)
        })
        .find(|candidate| candidate.is_file())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}
