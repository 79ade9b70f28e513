//! Kiln - build and dev-server orchestrator.
//!
//! Kiln runs a web project's build as a pipeline of stages: it empties the
//! output directory, compiles the client bundle with an external bundler
//! and, in hot mode, keeps serving. While serving it runs two things side by
//! side: an asset server that pushes rebuilds to the browser, and the
//! project's own application server, which is drained and restarted whenever
//! its sources change.
//!
//! # Architecture
//!
//! - [`cli`] - command-line surface
//! - [`config`] - layered settings (`kiln.config.json`, `KILN_*`, flags)
//! - [`paths`] - project root and server entry discovery
//! - [`build`] - one compilation pass through a [`build::Compiler`]
//! - [`supervisor`] - the application server state machine
//! - [`dev`] - the asset server and file watching
//! - [`pipeline`] - Clean, Build and Run
//! - [`error`], [`logger`], [`ui`] - diagnostics and presentation
//!
//! Bundler configuration itself lives in the `kiln-config` crate.
//!
//! # Example
//!
//! ```rust
//! use kiln_cli::{error::Result, logger};
//!
//! fn main() -> Result<()> {
//!     logger::init_logger(false, false, false);
//!     // CLI command implementations...
//!     Ok(())
//! }
//! ```

pub mod build;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dev;
pub mod env;
pub mod error;
pub mod logger;
pub mod paths;
pub mod pipeline;
pub mod supervisor;
pub mod ui;

pub use error::{BuildError, CliError, ConfigError, ListenError, Result, ResultExt, ServerError};
pub use pipeline::{Pipeline, PipelineContext, StageEvent, StageReporter};
pub use supervisor::{ServerSupervisor, SupervisorState};
