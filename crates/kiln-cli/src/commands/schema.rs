//! `kiln schema`.

use std::fs;

use crate::cli::SchemaArgs;
use crate::config::KilnConfig;
use crate::error::{Result, ResultExt};
use crate::ui;

/// Print the JSON Schema for kiln.config.json, or write it to `--output`.
pub fn execute(args: SchemaArgs) -> Result<()> {
    let schema = serde_json::to_string_pretty(&KilnConfig::json_schema())?;

    match args.output {
        Some(path) => {
            fs::write(&path, format!("{schema}\n"))
                .with_path(&path)
                .with_hint("Check that the target directory exists")?;
            ui::success(&format!("Schema written to {}", path.display()));
        }
        None => println!("{schema}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.schema.json");

        execute(SchemaArgs {
            output: Some(path.clone()),
        })
        .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written["properties"]["devServerPort"].is_object());
    }

    #[test]
    fn test_missing_directory_names_file_and_hint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/kiln.schema.json");

        let msg = execute(SchemaArgs { output: Some(path) }).unwrap_err().to_string();
        assert!(msg.starts_with("File not found: "));
        assert!(msg.contains("missing/kiln.schema.json"));
        assert!(msg.ends_with("Hint: Check that the target directory exists"));
    }
}
