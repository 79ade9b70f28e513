//! Error handling for the kiln orchestrator.
//!
//! The hierarchy mirrors the pipeline:
//! - **Top-level errors** (`CliError`) are what commands return
//! - **Stage errors** (`BuildError`, `ServerError`) carry the detail a stage
//!   needs to report its failure
//! - **Settings errors** (`ConfigError`) cover `kiln.config.json` and flags
//!
//! Malformed bundler configurations surface as
//! [`kiln_config::ConfigurationError`] and are wrapped unchanged.
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln_cli::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_manifest(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_path(path)
//!         .with_hint("Run kiln from inside the project")
//! }
//! ```

mod report;

pub use report::{cli_error_to_miette, format_compile_failure};

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::supervisor::SupervisorState;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Settings errors (kiln.config.json, environment, flags)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The bundler configuration is malformed
    #[error("Invalid build configuration: {0}")]
    Configuration(#[from] kiln_config::ConfigurationError),

    /// Clean or compile failures
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Asset server and supervised server failures
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// No project root above the starting directory
    #[error(
        "Project root not found from {} (searched {levels} levels for package.json or node_modules)\n\nHint: Run kiln inside your project or set APP_ROOT",
        .start.display()
    )]
    RootNotFound { start: PathBuf, levels: usize },

    /// File or directory not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with custom messages
    #[error("{0}")]
    Custom(String),
}

/// Settings errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Explicitly requested settings file doesn't exist
    #[error("Config file not found: {}\n\nHint: Create kiln.config.json or drop the --config flag", .0.display())]
    NotFound(PathBuf),

    /// Invalid value for a settings field
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Clean and compile failures.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Output directory could not be emptied
    #[error("Failed to clean {}: {source}\n\nHint: Check output directory permissions", .path.display())]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compiler reported errors, or could not be invoked at all.
    /// Warnings are carried for display only.
    #[error("Compilation failed with {} error(s)", .errors.len())]
    Compile {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
}

impl BuildError {
    /// A compile failure with a single diagnostic, used when the compiler
    /// itself could not run.
    pub fn invocation(message: impl Into<String>) -> Self {
        BuildError::Compile {
            errors: vec![message.into()],
            warnings: Vec::new(),
        }
    }
}

/// Asset server and supervised server failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server module could not be loaded
    #[error("Failed to load server module {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    /// The server module loaded but cannot listen
    #[error("{} exists but does not respond to 'listen()'\n\nHint: Point serverPath at a runnable server entry", .path.display())]
    Contract { path: PathBuf },

    /// The supervised server could not bind the application port
    #[error("Application server failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The asset server could not bind its address
    #[error("Dev server failed to bind {addr}: {source}\n\nHint: Is another process using the port? Set devServerPort to change it")]
    DevServerBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle operation was requested in a state that does not allow it
    #[error("Cannot {action} the application server while it is {from}")]
    InvalidTransition {
        from: SupervisorState,
        action: &'static str,
    },
}

/// Why a server module could not be brought up to listening.
///
/// The supervisor attaches the entry path and address when it turns this
/// into a [`ServerError`].
#[derive(Debug, Error)]
pub enum ListenError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The module loaded but exposes no `listen` function
    #[error("module does not respond to 'listen()'")]
    Contract,

    /// The module failed to load, crashed or never accepted connections
    #[error("{0}")]
    Load(String),
}

/// Result type alias using `CliError` as the default error type.
pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Extension trait for adding context to `Result` types.
pub trait ResultExt<T> {
    /// Turn "not found" I/O errors into `FileNotFound` for `path`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Append a hint to the error message.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| match e.into() {
            CliError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                CliError::FileNotFound(path.as_ref().to_path_buf())
            }
            other => other,
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }
}
