//! `kiln build [hot]`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use kiln_config::{compose, BaseConfigSource, ConfigDiscovery, Mode};

use crate::build::{BuildRunner, ProcessCompiler};
use crate::cli::BuildArgs;
use crate::config::{ConfigOverrides, KilnConfig};
use crate::env;
use crate::error::Result;
use crate::paths;
use crate::pipeline::{
    BuildStage, CleanStage, Pipeline, PipelineContext, PipelineReport, RunStage, StageReporter,
};
use crate::supervisor::{ModuleRegistry, ProcessRegistry};
use crate::ui;

/// Execute the build command.
///
/// # Process
///
/// 1. Load settings (CLI > `KILN_*` > kiln.config.json > defaults)
/// 2. Resolve the project root and read its `.env`
/// 3. Discover and compose the bundler configuration
/// 4. Run Clean, Build and, in hot mode, Run
///
/// # Errors
///
/// Settings and configuration errors are returned before any stage runs.
/// Otherwise the first stage failure is returned.
pub async fn execute(args: BuildArgs) -> Result<()> {
    let cwd = paths::get_cwd()?;
    let settings = KilnConfig::load(&ConfigOverrides::from(&args), args.config.as_deref(), &cwd)?;
    let mode: Mode = args.mode.into();

    let reporter: Arc<dyn StageReporter> = Arc::new(ui::StageProgress::for_terminal());
    let report = run(&settings, mode, &cwd, reporter).await?;

    for (i, warning) in report.warnings.iter().enumerate() {
        ui::warning(&format!(
            "WARNING {}/{}:\n{}",
            i + 1,
            report.warnings.len(),
            warning.trim_end()
        ));
    }
    Ok(())
}

/// Prepare and run the pipeline for `settings`.
///
/// # Errors
///
/// See [`execute`].
pub async fn run(
    settings: &KilnConfig,
    mode: Mode,
    cwd: &Path,
    reporter: Arc<dyn StageReporter>,
) -> Result<PipelineReport> {
    let root = project_root(settings, cwd)?;
    debug!(root = %root.display(), "project root");

    let dotenv = env::load_dotenv(&root);
    let options = settings.build_options(mode, &root);

    let base = ConfigDiscovery::new(&root)
        .with_file_name(settings.bundler_config.clone())
        .load(&options, env::environment_keys(&dotenv))?;
    match &base.source {
        BaseConfigSource::File(path) => info!(path = %path.display(), "bundler configuration"),
        BaseConfigSource::Default => info!("using default bundler configuration"),
    }
    let config = compose(&base.value, &options)?;

    let mut child_env = dotenv.clone();
    if std::env::var_os("NODE_ENV").is_none() {
        child_env.push(("NODE_ENV".to_string(), options.environment.as_str().to_string()));
    }
    let compiler = || {
        ProcessCompiler::new(settings.bundler.clone(), &root)
            .with_env(child_env.clone())
            .with_deprecations(settings.show_deprecations)
    };
    let registry: Arc<dyn ModuleRegistry> = Arc::new(ProcessRegistry::new(&root, child_env.clone()));
    let app_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.app_port);

    let mut pipeline = Pipeline::new(reporter)
        .stage(CleanStage)
        .stage(BuildStage::new(BuildRunner::new(Box::new(compiler()))))
        .stage(
            RunStage::new(registry, BuildRunner::new(Box::new(compiler()))).with_app_addr(app_addr),
        );

    let ctx = PipelineContext::new(options, config);
    pipeline.run(&ctx).await
}

fn project_root(settings: &KilnConfig, cwd: &Path) -> Result<PathBuf> {
    match &settings.app_root_path {
        Some(path) => Ok(paths::resolve_path(path, cwd)),
        None => paths::resolve_root(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, CliError};
    use crate::pipeline::NullReporter;

    #[test]
    fn test_explicit_root_is_relative_to_cwd() {
        let settings = KilnConfig {
            app_root_path: Some(PathBuf::from("site")),
            ..KilnConfig::default()
        };
        let root = project_root(&settings, Path::new("/work")).unwrap();
        assert_eq!(root, PathBuf::from("/work/site"));
    }

    #[tokio::test]
    async fn test_malformed_bundler_config_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("keep.js"), "x").unwrap();
        std::fs::write(
            dir.path().join("webpack.config.json"),
            r#"{"entry": 42, "output": {"path": "build"}}"#,
        )
        .unwrap();

        let settings = KilnConfig {
            app_root_path: Some(dir.path().to_path_buf()),
            ..KilnConfig::default()
        };
        let err = run(&settings, Mode::Normal, dir.path(), Arc::new(NullReporter))
            .await
            .unwrap_err();

        assert!(matches!(err, CliError::Configuration(_)));
        assert!(out.join("keep.js").exists());
    }

    #[tokio::test]
    async fn test_missing_bundler_fails_build_stage() {
        let dir = tempfile::tempdir().unwrap();
        let settings = KilnConfig {
            app_root_path: Some(dir.path().to_path_buf()),
            bundler: vec!["kiln-test-no-such-bundler".to_string()],
            ..KilnConfig::default()
        };

        let err = run(&settings, Mode::Normal, dir.path(), Arc::new(NullReporter))
            .await
            .unwrap_err();

        assert!(matches!(err, CliError::Build(BuildError::Compile { .. })));
        assert!(dir.path().join("build").is_dir());
    }

    #[tokio::test]
    async fn test_relative_output_path_is_cleaned_under_root_not_cwd() {
        let cwd = tempfile::tempdir().unwrap();
        let elsewhere = cwd.path().join("build");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::write(elsewhere.join("keep.txt"), "x").unwrap();

        let root = tempfile::tempdir().unwrap();
        std::fs::write(
            root.path().join("webpack.config.json"),
            r#"{"entry": "./a.js", "output": {"path": "build"}}"#,
        )
        .unwrap();

        let settings = KilnConfig {
            app_root_path: Some(root.path().to_path_buf()),
            bundler: vec!["kiln-test-no-such-bundler".to_string()],
            ..KilnConfig::default()
        };
        let err = run(&settings, Mode::Normal, cwd.path(), Arc::new(NullReporter))
            .await
            .unwrap_err();

        assert!(matches!(err, CliError::Build(_)));
        assert!(elsewhere.join("keep.txt").exists());
        assert!(root.path().join("build").is_dir());
    }
}
