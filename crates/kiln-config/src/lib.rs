//! Build options and bundler configuration for kiln.
//!
//! This crate owns the data side of the orchestrator:
//!
//! - [`BuildOptions`] - per-run options (mode, environment, paths, ports)
//! - [`BuildConfiguration`] - the structure handed to the bundler
//! - [`compose`] - rewrites a base configuration for hot or normal builds
//! - [`ConfigDiscovery`] - finds the base configuration on disk, or
//!   synthesizes the default one
//!
//! Composition is pure: it never touches the filesystem (relative output
//! paths are resolved against the app root by joining, not by lookup) and composing an
//! already composed configuration yields the same configuration.

pub mod bundle;
pub mod compose;
pub mod discovery;
pub mod error;
pub mod options;

// Re-export main types
pub use bundle::*;
pub use compose::{compose, compose_config, HmrModules};
pub use discovery::{BaseConfig, BaseConfigSource, ConfigDiscovery};
pub use error::*;
pub use options::*;
