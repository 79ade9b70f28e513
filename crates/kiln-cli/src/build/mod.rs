//! One compilation pass, with structured results and progress.

mod process;
mod progress;
mod support;

pub use process::{parse_progress_line, parse_stats, ProcessCompiler, DEFAULT_BUNDLER};
pub use support::{
    composed_config_path, SupportFiles, BUNDLER_ADAPTER_FILE, BUNDLE_CONFIG_VAR,
    COMPOSED_CONFIG_FILE,
};
pub use progress::{ProgressReporter, ProgressUpdate};

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use kiln_config::BuildConfiguration;

use crate::error::BuildError;

/// Raw outcome reported by a compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerStats {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Compile time as measured by the compiler itself, when reported.
    pub time: Option<Duration>,
}

/// A compiler the runner can drive.
///
/// Implementations report progress through `progress` and map their own
/// invocation failures to [`BuildError::Compile`].
#[async_trait]
pub trait Compiler: Send {
    async fn compile(
        &mut self,
        config: &BuildConfiguration,
        progress: &mut ProgressReporter,
    ) -> Result<CompilerStats, BuildError>;
}

/// Outcome of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl BuildResult {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }
}

/// Drives a compiler one pass at a time.
///
/// `run` takes `&mut self`, so a runner cannot start a second pass on the
/// same compiler while one is in flight.
pub struct BuildRunner {
    compiler: Box<dyn Compiler>,
}

impl BuildRunner {
    pub fn new(compiler: Box<dyn Compiler>) -> Self {
        Self { compiler }
    }

    /// Compile `config` once.
    ///
    /// # Errors
    ///
    /// `BuildError::Compile` when the compiler reports any error, even if it
    /// also reports warnings, or when it cannot be invoked at all.
    pub async fn run(
        &mut self,
        config: &BuildConfiguration,
        mut progress: ProgressReporter,
    ) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        let stats = self.compiler.compile(config, &mut progress).await?;
        let elapsed = started.elapsed();
        progress.finish();

        if !stats.errors.is_empty() {
            debug!(
                errors = stats.errors.len(),
                warnings = stats.warnings.len(),
                "compilation failed"
            );
            return Err(BuildError::Compile {
                errors: stats.errors,
                warnings: stats.warnings,
            });
        }

        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            warnings = stats.warnings.len(),
            "compilation finished"
        );
        Ok(BuildResult {
            errors: Vec::new(),
            warnings: stats.warnings,
            elapsed,
        })
    }
}
