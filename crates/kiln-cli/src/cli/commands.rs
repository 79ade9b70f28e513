use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use kiln_config::{Environment, Mode};

/// Available kiln subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clean, build and optionally run with hot reload
    ///
    /// Without a mode the pipeline cleans the output directory, compiles once
    /// and exits. With `hot` it then starts the asset server and the
    /// application server and keeps running until interrupted.
    Build(BuildArgs),

    /// Print the JSON Schema for kiln.config.json
    Schema(SchemaArgs),
}

/// Pipeline mode
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeArg {
    /// Build once and exit
    #[default]
    Normal,
    /// Build, then serve with hot reload
    Hot,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Normal => Mode::Normal,
            ModeArg::Hot => Mode::Hot,
        }
    }
}

/// Execution environment
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentArg {
    Development,
    Production,
}

impl From<EnvironmentArg> for Environment {
    fn from(env: EnvironmentArg) -> Self {
        match env {
            EnvironmentArg::Development => Environment::Development,
            EnvironmentArg::Production => Environment::Production,
        }
    }
}

/// Arguments for the build command
#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Pipeline mode
    #[arg(value_enum, default_value = "normal", value_name = "MODE")]
    pub mode: ModeArg,

    /// Project root (default: APP_ROOT, or the nearest directory with
    /// package.json or node_modules)
    #[arg(long, value_name = "DIR")]
    pub app_root: Option<PathBuf>,

    /// Client entry, relative to the project root
    #[arg(long, value_name = "PATH")]
    pub entry: Option<PathBuf>,

    /// Application server entry, relative to the project root
    ///
    /// Defaults to the package.json main module when it can listen, else
    /// app/server.
    #[arg(long, value_name = "PATH")]
    pub server: Option<PathBuf>,

    /// Port for the asset dev server
    #[arg(long, value_name = "PORT")]
    pub dev_server_port: Option<u16>,

    /// Port for the application server
    #[arg(long, value_name = "PORT")]
    pub app_port: Option<u16>,

    /// Compose for this environment (default: from NODE_ENV)
    #[arg(long, value_enum)]
    pub environment: Option<EnvironmentArg>,

    /// HTML template for the default configuration
    #[arg(long, value_name = "FILE")]
    pub template: Option<PathBuf>,

    /// Favicon for the default configuration
    #[arg(long, value_name = "FILE")]
    pub favicon: Option<PathBuf>,

    /// Trace deprecation warnings from the bundler
    #[arg(long)]
    pub show_deprecations: bool,

    /// Path to kiln.config.json
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Arguments for the schema command
#[derive(Args, Debug, Default)]
pub struct SchemaArgs {
    /// Write the schema to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}
