//! Miette diagnostic conversion for CLI errors.

use crate::error::{BuildError, CliError};
use miette::Report;

/// Convert CliError to miette Report.
///
/// Compile failures list every error, then every warning.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Build(BuildError::Compile { errors, warnings }) => {
            miette::miette!("{}", format_compile_failure(&errors, &warnings))
        }
        _ => miette::miette!("{}", err),
    }
}

/// Render a compile failure with one block per diagnostic.
pub fn format_compile_failure(errors: &[String], warnings: &[String]) -> String {
    let mut out = format!("Compilation failed with {} error(s)", errors.len());
    for (i, error) in errors.iter().enumerate() {
        out.push_str(&format!("\n\nERROR {}/{}:\n{}", i + 1, errors.len(), error.trim_end()));
    }
    for (i, warning) in warnings.iter().enumerate() {
        out.push_str(&format!(
            "\n\nWARNING {}/{}:\n{}",
            i + 1,
            warnings.len(),
            warning.trim_end()
        ));
    }
    out
}
