//! Terminal stage reporter: one spinner per pipeline stage.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::time::Duration;

use crate::pipeline::{StageEvent, StageReporter};

/// Renders pipeline stages as indicatif spinners, or as plain status lines
/// when stderr is not attended (CI, pipes).
///
/// Each stage gets a title line and an annotation line underneath it.
pub struct StageProgress {
    multi: MultiProgress,
    bars: Mutex<Vec<Option<ProgressBar>>>,
    interactive: bool,
}

impl StageProgress {
    pub fn new(interactive: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(Vec::new()),
            interactive,
        }
    }

    /// Reporter for the current terminal.
    pub fn for_terminal() -> Self {
        Self::new(Self::should_show())
    }

    /// Returns `false` in CI environments or when output is not a TTY.
    pub fn should_show() -> bool {
        console::user_attended_stderr() && !super::is_ci()
    }

    fn spinner(&self, title: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.blue} {prefix}\n  {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"]),
        );
        pb.set_prefix(title.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn with_bar(&self, index: usize, f: impl FnOnce(&ProgressBar)) {
        let bars = self.bars.lock();
        if let Some(Some(pb)) = bars.get(index) {
            f(pb);
        }
    }

    fn render_plain(&self, event: &StageEvent) {
        match event {
            StageEvent::Started { title } => super::info(title),
            StageEvent::Title(title) => super::info(title),
            StageEvent::Annotation(_) => {}
            StageEvent::Finished { title } => super::success(title),
            StageEvent::Failed { title, error } => {
                super::error(&format!("{title}: {error}"));
            }
            StageEvent::Skipped { title } => eprintln!("{}", super::skipped_line(title)),
        }
    }
}

impl StageReporter for StageProgress {
    fn report(&self, index: usize, event: StageEvent) {
        if !self.interactive {
            self.render_plain(&event);
            return;
        }

        match event {
            StageEvent::Started { title } => {
                let pb = self.spinner(&title);
                let mut bars = self.bars.lock();
                if bars.len() <= index {
                    bars.resize(index + 1, None);
                }
                bars[index] = Some(pb);
            }
            StageEvent::Title(title) => self.with_bar(index, |pb| pb.set_prefix(title)),
            StageEvent::Annotation(text) => self.with_bar(index, |pb| {
                pb.set_message(text.map(|t| t.dimmed().to_string()).unwrap_or_default())
            }),
            StageEvent::Finished { title } => self.with_bar(index, |pb| {
                pb.set_prefix(format!("{}", title.green()));
                pb.finish_with_message(String::new());
            }),
            StageEvent::Failed { title, error } => self.with_bar(index, |pb| {
                pb.set_prefix(format!("{} {}", "✗".red(), title.red()));
                pb.abandon_with_message(error.red().to_string());
            }),
            StageEvent::Skipped { title } => {
                let _ = self.multi.println(super::skipped_line(&title));
            }
        }
    }
}

impl Drop for StageProgress {
    fn drop(&mut self) {
        for pb in self.bars.lock().iter().flatten() {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
    }
}
