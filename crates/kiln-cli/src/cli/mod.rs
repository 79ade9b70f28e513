//! Command-line interface definition.
//!
//! - `kiln build [hot]` - clean, compile and, in hot mode, serve
//! - `kiln schema` - print the JSON Schema for `kiln.config.json`

mod commands;

use clap::Parser;

pub use commands::{BuildArgs, Command, EnvironmentArg, ModeArg, SchemaArgs};

/// Kiln - build and dev-server orchestrator
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "Build and dev-server orchestrator",
    long_about = "Kiln cleans the output directory, compiles your client bundle and, in hot\n\
                  mode, serves assets with hot reload while supervising your application\n\
                  server, restarting it whenever its source changes."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}
