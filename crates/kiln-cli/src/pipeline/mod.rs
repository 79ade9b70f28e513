//! Ordered build stages: Clean, Build and, in hot mode, Run.
//!
//! Stages run one after another. The first failure stops the pipeline,
//! every stage after it is reported as skipped, and the failure becomes the
//! pipeline's result.

mod session;
mod stages;

pub use session::{DevSession, SessionConfig, SessionEvent, SessionObserver};
pub use stages::{clean_output_dir, BuildStage, CleanStage, RunStage};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};

use kiln_config::{BuildConfiguration, BuildOptions};

use crate::error::Result;

/// What a stage reports while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    Started { title: String },
    /// The stage's title changed
    Title(String),
    /// Secondary status line; `None` clears it
    Annotation(Option<String>),
    Finished { title: String },
    Failed { title: String, error: String },
    /// Not run because an earlier stage failed
    Skipped { title: String },
}

/// Receives stage events, e.g. to draw them in a terminal.
pub trait StageReporter: Send + Sync {
    fn report(&self, index: usize, event: StageEvent);
}

/// Reporter that drops every event.
pub struct NullReporter;

impl StageReporter for NullReporter {
    fn report(&self, _index: usize, _event: StageEvent) {}
}

/// A running stage's handle on its own title and annotation.
///
/// Clones share the same title, so a stage can hand one to a background
/// task.
#[derive(Clone)]
pub struct StageStatus {
    index: usize,
    title: Arc<Mutex<String>>,
    reporter: Arc<dyn StageReporter>,
}

impl StageStatus {
    fn new(index: usize, title: String, reporter: Arc<dyn StageReporter>) -> Self {
        Self {
            index,
            title: Arc::new(Mutex::new(title)),
            reporter,
        }
    }

    pub fn title(&self) -> String {
        self.title.lock().clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        *self.title.lock() = title.clone();
        self.reporter.report(self.index, StageEvent::Title(title));
    }

    pub fn annotate(&self, annotation: Option<String>) {
        self.reporter
            .report(self.index, StageEvent::Annotation(annotation));
    }
}

/// Inputs shared by every stage of one run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub options: BuildOptions,
    /// Composed configuration handed to the bundler
    pub config: BuildConfiguration,
}

impl PipelineContext {
    pub fn new(options: BuildOptions, config: BuildConfiguration) -> Self {
        Self { options, config }
    }
}

/// What a finished stage hands back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub warnings: Vec<String>,
}

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send {
    /// Title shown when the stage starts.
    fn title(&self, ctx: &PipelineContext) -> String;

    fn enabled(&self, _ctx: &PipelineContext) -> bool {
        true
    }

    async fn run(&mut self, ctx: &PipelineContext, status: &StageStatus) -> Result<StageReport>;
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Titles of the stages that ran, as they ended
    pub completed: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    reporter: Arc<dyn StageReporter>,
}

impl Pipeline {
    pub fn new(reporter: Arc<dyn StageReporter>) -> Self {
        Self {
            stages: Vec::new(),
            reporter,
        }
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every enabled stage in order.
    ///
    /// # Errors
    ///
    /// The first stage failure. Later stages do not run.
    pub async fn run(&mut self, ctx: &PipelineContext) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        for index in 0..self.stages.len() {
            let stage = &mut self.stages[index];
            if !stage.enabled(ctx) {
                debug!(stage = %stage.title(ctx), "stage disabled");
                continue;
            }

            let title = stage.title(ctx);
            self.reporter
                .report(index, StageEvent::Started { title: title.clone() });
            let status = StageStatus::new(index, title, self.reporter.clone());

            match stage.run(ctx, &status).await {
                Ok(stage_report) => {
                    let title = status.title();
                    self.reporter
                        .report(index, StageEvent::Finished { title: title.clone() });
                    report.completed.push(title);
                    report.warnings.extend(stage_report.warnings);
                }
                Err(e) => {
                    error!(stage = %status.title(), "stage failed: {e}");
                    self.reporter.report(
                        index,
                        StageEvent::Failed {
                            title: status.title(),
                            error: e.to_string(),
                        },
                    );
                    self.skip_after(index, ctx);
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    fn skip_after(&self, failed: usize, ctx: &PipelineContext) {
        for (index, stage) in self.stages.iter().enumerate().skip(failed + 1) {
            if stage.enabled(ctx) {
                self.reporter.report(
                    index,
                    StageEvent::Skipped {
                        title: stage.title(ctx),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, CliError};
    use kiln_config::Mode;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(usize, StageEvent)>>);

    impl StageReporter for Recorder {
        fn report(&self, index: usize, event: StageEvent) {
            self.0.lock().push((index, event));
        }
    }

    struct Step {
        name: &'static str,
        fail: bool,
        hot_only: bool,
        ran: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for Step {
        fn title(&self, _ctx: &PipelineContext) -> String {
            self.name.to_string()
        }

        fn enabled(&self, ctx: &PipelineContext) -> bool {
            !self.hot_only || ctx.options.is_hot()
        }

        async fn run(&mut self, _ctx: &PipelineContext, status: &StageStatus) -> Result<StageReport> {
            self.ran.lock().push(self.name);
            if self.fail {
                return Err(BuildError::invocation("boom").into());
            }
            status.set_title(format!("{} done", self.name));
            Ok(StageReport {
                warnings: vec![format!("{} warning", self.name)],
            })
        }
    }

    fn ctx(mode: Mode) -> PipelineContext {
        let config =
            BuildConfiguration::from_value(json!({"entry": "./a.js", "output": {"path": "/b"}}))
                .unwrap();
        PipelineContext::new(BuildOptions::new("/proj").with_mode(mode), config)
    }

    fn pipeline(
        reporter: Arc<Recorder>,
        steps: &[(&'static str, bool, bool)],
        ran: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Pipeline {
        steps
            .iter()
            .fold(Pipeline::new(reporter), |p, &(name, fail, hot_only)| {
                p.stage(Step {
                    name,
                    fail,
                    hot_only,
                    ran: ran.clone(),
                })
            })
    }

    #[tokio::test]
    async fn test_all_stages_run_in_order() {
        let reporter = Arc::new(Recorder::default());
        let ran = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            reporter.clone(),
            &[("Clean", false, false), ("Build", false, false)],
            &ran,
        );

        let report = p.run(&ctx(Mode::Normal)).await.unwrap();
        assert_eq!(*ran.lock(), vec!["Clean", "Build"]);
        assert_eq!(report.completed, vec!["Clean done", "Build done"]);
        assert_eq!(report.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_skips_later_stages() {
        let reporter = Arc::new(Recorder::default());
        let ran = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            reporter.clone(),
            &[
                ("Clean", false, false),
                ("Build", true, false),
                ("Run", false, true),
            ],
            &ran,
        );

        let err = p.run(&ctx(Mode::Hot)).await.unwrap_err();
        assert!(matches!(err, CliError::Build(BuildError::Compile { .. })));
        assert_eq!(*ran.lock(), vec!["Clean", "Build"]);

        let events = reporter.0.lock().clone();
        assert!(events.contains(&(
            1,
            StageEvent::Failed {
                title: "Build".into(),
                error: "Build error: Compilation failed with 1 error(s)".into()
            }
        )));
        assert!(events.contains(&(2, StageEvent::Skipped { title: "Run".into() })));
    }

    #[tokio::test]
    async fn test_disabled_stage_is_silent() {
        let reporter = Arc::new(Recorder::default());
        let ran = Arc::new(Mutex::new(Vec::new()));
        let mut p = pipeline(
            reporter.clone(),
            &[("Build", false, false), ("Run", false, true)],
            &ran,
        );

        p.run(&ctx(Mode::Normal)).await.unwrap();
        assert_eq!(*ran.lock(), vec!["Build"]);
        assert!(reporter.0.lock().iter().all(|(index, _)| *index == 0));
    }
}
