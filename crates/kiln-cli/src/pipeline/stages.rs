//! The three pipeline stages.

use async_trait::async_trait;
use owo_colors::{OwoColorize, Stream, Style};
use std::fs;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use kiln_config::DEFAULT_APP_PORT;

use super::session::{DevSession, SessionConfig, SessionEvent, SessionObserver};
use super::{PipelineContext, Stage, StageReport, StageStatus};
use crate::build::{BuildRunner, ProgressReporter};
use crate::dev::DevEvent;
use crate::error::{BuildError, CliError, Result};
use crate::paths::{resolve_path, resolve_server_entry};
use crate::supervisor::ModuleRegistry;
use crate::ui::{finished_in, now_label};

const STOP_HINT: &str = "Press Ctrl+C to stop";

/// Empty `out_dir`, keeping the directory itself. Creates it if missing.
///
/// # Errors
///
/// `BuildError::Clean` if the path is not a directory or anything in it
/// cannot be removed.
pub fn clean_output_dir(out_dir: &Path) -> std::result::Result<(), BuildError> {
    let clean_error = |source: io::Error| BuildError::Clean {
        path: out_dir.to_path_buf(),
        source,
    };

    if !out_dir.exists() {
        return fs::create_dir_all(out_dir).map_err(clean_error);
    }
    if !out_dir.is_dir() {
        return Err(clean_error(io::Error::other("output path is not a directory")));
    }

    for entry in fs::read_dir(out_dir).map_err(clean_error)? {
        let path = entry.map_err(clean_error)?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(clean_error)?;
        } else {
            fs::remove_file(&path).map_err(clean_error)?;
        }
    }
    Ok(())
}

/// Removes prior output.
pub struct CleanStage;

#[async_trait]
impl Stage for CleanStage {
    fn title(&self, _ctx: &PipelineContext) -> String {
        "Clean".to_string()
    }

    async fn run(&mut self, ctx: &PipelineContext, status: &StageStatus) -> Result<StageReport> {
        let out_dir = &ctx.config.output.path;
        status.annotate(Some(out_dir.display().to_string()));
        clean_output_dir(out_dir)?;
        debug!(path = %out_dir.display(), "output cleaned");
        status.annotate(None);
        Ok(StageReport::default())
    }
}

/// Compiles the composed configuration once.
pub struct BuildStage {
    runner: BuildRunner,
}

impl BuildStage {
    pub fn new(runner: BuildRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Stage for BuildStage {
    fn title(&self, ctx: &PipelineContext) -> String {
        if ctx.options.is_hot() {
            let hot = Style::new().truecolor(255, 106, 0).bold();
            format!(
                "Building with {}",
                "hot reload".if_supports_color(Stream::Stderr, |t| t.style(hot))
            )
        } else {
            "Building".to_string()
        }
    }

    async fn run(&mut self, ctx: &PipelineContext, status: &StageStatus) -> Result<StageReport> {
        let progress = if ctx.options.environment.is_production() {
            ProgressReporter::silent()
        } else {
            let status = status.clone();
            ProgressReporter::new(move |update| status.annotate(update.annotation()))
        };

        let result = self.runner.run(&ctx.config, progress).await?;
        status.annotate(None);

        if let Some(suffix) = finished_in(
            result.elapsed_ms(),
            result.errors.len(),
            result.warnings.len(),
        ) {
            status.set_title(format!(
                "{} {}",
                status.title(),
                suffix.if_supports_color(Stream::Stderr, |t| t.dimmed())
            ));
        }

        Ok(StageReport {
            warnings: result.warnings,
        })
    }
}

type Shutdown = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serves the application and its assets until interrupted.
pub struct RunStage {
    registry: Arc<dyn ModuleRegistry>,
    runner: Option<BuildRunner>,
    app_addr: SocketAddr,
    dev_host: String,
    shutdown: Option<Shutdown>,
}

impl RunStage {
    /// `runner` drives rebuilds of client assets while the stage runs.
    pub fn new(registry: Arc<dyn ModuleRegistry>, runner: BuildRunner) -> Self {
        Self {
            registry,
            runner: Some(runner),
            app_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_APP_PORT),
            dev_host: "localhost".to_string(),
            shutdown: None,
        }
    }

    pub fn with_app_addr(mut self, addr: SocketAddr) -> Self {
        self.app_addr = addr;
        self
    }

    pub fn with_dev_host(mut self, host: impl Into<String>) -> Self {
        self.dev_host = host.into();
        self
    }

    /// Stop when `signal` resolves instead of on Ctrl+C.
    pub fn with_shutdown(mut self, signal: impl Future<Output = ()> + Send + 'static) -> Self {
        self.shutdown = Some(Box::pin(signal));
        self
    }

    fn running_title(&self) -> String {
        format!("Running at http://localhost:{}", self.app_addr.port())
    }
}

fn updated(running: &str) -> String {
    let label = format!("updated at {}", now_label());
    format!(
        "{running} {}",
        label.if_supports_color(Stream::Stderr, |t| t.dimmed())
    )
}

fn observe(status: StageStatus, running: String, show_progress: bool) -> SessionObserver {
    Arc::new(move |event| match event {
        SessionEvent::Restarted(_) => {
            status.set_title(updated(&running));
            status.annotate(Some(STOP_HINT.to_string()));
        }
        SessionEvent::RestartFailed(reason) => {
            status.set_title(format!("{running} (server stopped)"));
            status.annotate(Some(reason));
        }
        SessionEvent::Assets(DevEvent::BuildCompleted { .. }) => {
            status.set_title(updated(&running));
            status.annotate(Some(STOP_HINT.to_string()));
        }
        SessionEvent::Assets(DevEvent::BuildFailed { errors, .. }) => {
            status.annotate(Some(format!("Rebuild failed with {} error(s)", errors.len())));
        }
        SessionEvent::Assets(event) => {
            if let Some(annotation) = event
                .as_progress()
                .filter(|_| show_progress)
                .and_then(|update| update.annotation())
            {
                status.annotate(Some(annotation));
            }
        }
    })
}

#[async_trait]
impl Stage for RunStage {
    fn title(&self, _ctx: &PipelineContext) -> String {
        "Run".to_string()
    }

    fn enabled(&self, ctx: &PipelineContext) -> bool {
        ctx.options.is_hot()
    }

    async fn run(&mut self, ctx: &PipelineContext, status: &StageStatus) -> Result<StageReport> {
        let root = &ctx.options.app_root_path;
        let server_path = match &ctx.options.server_path {
            Some(path) => path.clone(),
            None => resolve_server_entry(root, self.registry.as_ref()).await,
        };
        let entry = resolve_path(&server_path, root);
        debug!(entry = %entry.display(), "server entry");

        let runner = self
            .runner
            .take()
            .ok_or_else(|| CliError::Custom("the run stage can only run once".to_string()))?;

        let develop = !ctx.options.environment.is_production();
        let config = SessionConfig::new(
            entry,
            self.app_addr,
            &self.dev_host,
            ctx.options.dev_server_port,
        )
        .watch_server(develop)
        .client_root(develop.then(|| root.clone()));

        let running = self.running_title();
        let observer = observe(status.clone(), running.clone(), develop);
        let session = DevSession::start(
            config,
            ctx.config.clone(),
            self.registry.clone(),
            runner,
            observer,
        )
        .await?;

        status.set_title(running);
        status.annotate(Some(STOP_HINT.to_string()));

        match self.shutdown.take() {
            Some(signal) => signal.await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    debug!("cannot listen for Ctrl+C: {e}");
                    std::future::pending::<()>().await;
                }
            }
        }

        session.shutdown().await;
        Ok(StageReport::default())
    }
}
