//! Running the bundler as a child process.
//!
//! The composed configuration and its adapter are written under
//! `<root>/.kiln` (see [`super::support`]) and the bundler is run as
//! `<command...> --config .kiln/webpack.config.cjs --json --progress`.
//! Stats JSON is read from stdout; stderr lines carrying a percentage become
//! progress.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use kiln_config::BuildConfiguration;

use super::support::{SupportFiles, BUNDLE_CONFIG_VAR};
use super::{Compiler, CompilerStats, ProgressReporter};
use crate::error::BuildError;

/// Default bundler command.
pub const DEFAULT_BUNDLER: &[&str] = &["npx", "webpack"];

/// How many trailing stderr lines to keep for failure messages.
const STDERR_TAIL: usize = 20;

/// A [`Compiler`] that shells out to the bundler.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    command: Vec<String>,
    root: PathBuf,
    env: Vec<(String, String)>,
    show_deprecations: bool,
}

impl ProcessCompiler {
    pub fn new(command: Vec<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            command,
            root: root.into(),
            env: Vec::new(),
            show_deprecations: false,
        }
    }

    /// Extra variables for the bundler process.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_deprecations(mut self, show: bool) -> Self {
        self.show_deprecations = show;
        self
    }

    fn node_options(&self) -> String {
        let flag = if self.show_deprecations {
            "--trace-deprecation"
        } else {
            "--no-deprecation"
        };
        match std::env::var("NODE_OPTIONS") {
            Ok(existing) if !existing.trim().is_empty() => format!("{existing} {flag}"),
            _ => flag.to_string(),
        }
    }
}

#[async_trait]
impl Compiler for ProcessCompiler {
    async fn compile(
        &mut self,
        config: &BuildConfiguration,
        progress: &mut ProgressReporter,
    ) -> Result<CompilerStats, BuildError> {
        let files = SupportFiles::write(&self.root, config).await?;
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| BuildError::invocation("no bundler command configured"))?;

        debug!(bundler = %self.command.join(" "), config = %files.config.display(), "starting compilation");
        let mut child = Command::new(program)
            .args(args)
            .arg("--config")
            .arg(&files.adapter)
            .args(["--json", "--progress"])
            .current_dir(&self.root)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env("NODE_OPTIONS", self.node_options())
            .env(BUNDLE_CONFIG_VAR, &files.config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::invocation(format!("failed to launch {program}: {e}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuildError::invocation("bundler stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BuildError::invocation("bundler stderr unavailable"))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).await.map(|_| buf)
        });

        let mut tail: Vec<String> = Vec::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_progress_line(&line) {
                Some((fraction, phase)) => progress.report(fraction, phase.as_deref()),
                None if !line.trim().is_empty() => {
                    debug!(target: "kiln::bundler", "{line}");
                    if tail.len() == STDERR_TAIL {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                None => {}
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| BuildError::invocation(format!("failed to wait for bundler: {e}")))?;
        let stdout = match stdout_task.await {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => return Err(BuildError::invocation(format!("failed to read bundler output: {e}"))),
            Err(e) => return Err(BuildError::invocation(format!("bundler output reader failed: {e}"))),
        };

        parse_stats(&stdout).ok_or_else(|| {
            let mut message = format!("bundler exited with {status} without reporting stats");
            if !tail.is_empty() {
                message.push_str(":\n");
                message.push_str(&tail.join("\n"));
            }
            BuildError::invocation(message)
        })
    }
}

/// Parse a progress line such as `45% building 12/20 modules`, possibly with
/// a prefix before the percentage.
pub fn parse_progress_line(line: &str) -> Option<(f64, Option<String>)> {
    let mut tokens = line.split_whitespace();
    let percent = tokens.by_ref().find_map(|token| {
        token
            .strip_suffix('%')
            .and_then(|number| number.parse::<f64>().ok())
    })?;
    let phase = tokens.collect::<Vec<_>>().join(" ");
    Some((percent / 100.0, (!phase.is_empty()).then_some(phase)))
}

/// Parse a stats object `{errors, warnings, time}` from bundler stdout.
///
/// Diagnostics may be plain strings or objects with a `message`. Output
/// printed before the JSON object is skipped.
pub fn parse_stats(stdout: &str) -> Option<CompilerStats> {
    let start = stdout.find('{')?;
    let value: Value = serde_json::from_str(stdout[start..].trim_end()).ok()?;
    let stats = value.as_object()?;

    let diagnostics = |key: &str| -> Vec<String> {
        stats
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().map(diagnostic_text).collect())
            .unwrap_or_default()
    };

    Some(CompilerStats {
        errors: diagnostics("errors"),
        warnings: diagnostics("warnings"),
        time: stats
            .get("time")
            .and_then(Value::as_u64)
            .map(Duration::from_millis),
    })
}

fn diagnostic_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(fields) => {
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            match fields.get("moduleName").and_then(Value::as_str) {
                Some(module) => format!("{module}\n{message}"),
                None => message.to_string(),
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(
            parse_progress_line("45% building 12/20 modules"),
            Some((0.45, Some("building 12/20 modules".to_string())))
        );
        assert_eq!(
            parse_progress_line("<s> [webpack.Progress] 100%"),
            Some((1.0, None))
        );
        assert_eq!(parse_progress_line("Hash: 1234abcd"), None);
    }

    #[test]
    fn test_parse_stats_strings() {
        let stats = parse_stats(r#"{"errors": ["boom"], "warnings": [], "time": 1500}"#).unwrap();
        assert_eq!(stats.errors, vec!["boom".to_string()]);
        assert!(stats.warnings.is_empty());
        assert_eq!(stats.time, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_stats_objects_and_noise() {
        let stdout = format!(
            "some banner\n{}",
            json!({
                "errors": [],
                "warnings": [{"moduleName": "./a.js", "message": "unused export"}]
            })
        );
        let stats = parse_stats(&stdout).unwrap();
        assert_eq!(stats.warnings, vec!["./a.js\nunused export".to_string()]);
        assert_eq!(stats.time, None);
    }

    #[test]
    fn test_parse_stats_rejects_garbage() {
        assert!(parse_stats("").is_none());
        assert!(parse_stats("error: unknown option").is_none());
        assert!(parse_stats("[1, 2]").is_none());
    }

    #[tokio::test]
    async fn test_missing_bundler_is_compile_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut compiler = ProcessCompiler::new(
            vec!["/nonexistent/kiln-bundler".to_string()],
            dir.path(),
        );
        let config = BuildConfiguration::from_value(
            json!({"entry": "./a.js", "output": {"path": dir.path().join("build")}}),
        )
        .unwrap();

        let err = compiler
            .compile(&config, &mut ProgressReporter::silent())
            .await
            .unwrap_err();
        match err {
            BuildError::Compile { errors, .. } => {
                assert!(errors[0].contains("failed to launch"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(SupportFiles::for_root(dir.path()).config.is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stats_and_progress_from_script() {
        use std::os::unix::fs::PermissionsExt;
        use std::sync::{Arc, Mutex};

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-bundler.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '10% compiling' >&2\necho '90% emitting' >&2\necho '{\"errors\":[],\"warnings\":[\"big\"],\"time\":20}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut progress = ProgressReporter::new(move |u| sink.lock().unwrap().push(u.fraction));

        let mut compiler = ProcessCompiler::new(vec![script.display().to_string()], dir.path());
        let config = BuildConfiguration::from_value(
            json!({"entry": "./a.js", "output": {"path": dir.path().join("build")}}),
        )
        .unwrap();
        let stats = compiler.compile(&config, &mut progress).await.unwrap();

        assert_eq!(stats.warnings, vec!["big".to_string()]);
        assert_eq!(*seen.lock().unwrap(), vec![0.1, 0.9]);
    }
}
