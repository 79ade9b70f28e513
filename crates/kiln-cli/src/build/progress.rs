//! Compilation progress.

use std::fmt;

/// One progress notification: a fraction in `[0, 1]` and an optional phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub fraction: f64,
    pub phase: Option<String>,
}

impl ProgressUpdate {
    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }

    /// Status annotation such as `45% (building modules)`; `None` once the
    /// compilation is complete.
    pub fn annotation(&self) -> Option<String> {
        if self.is_complete() {
            return None;
        }
        Some(self.to_string())
    }
}

impl fmt::Display for ProgressUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let percent = (self.fraction * 100.0).floor() as u32;
        match &self.phase {
            Some(phase) => write!(f, "{percent}% ({phase})"),
            None => write!(f, "{percent}%"),
        }
    }
}

type Sink = Box<dyn FnMut(ProgressUpdate) + Send>;

/// Forwards progress to a sink, never letting the fraction go backwards or
/// leave `[0, 1]`.
pub struct ProgressReporter {
    last: f64,
    sink: Option<Sink>,
}

impl ProgressReporter {
    pub fn new(sink: impl FnMut(ProgressUpdate) + Send + 'static) -> Self {
        Self {
            last: 0.0,
            sink: Some(Box::new(sink)),
        }
    }

    /// Reporter that discards everything.
    pub fn silent() -> Self {
        Self {
            last: 0.0,
            sink: None,
        }
    }

    pub fn report(&mut self, fraction: f64, phase: Option<&str>) {
        let fraction = if fraction.is_nan() {
            self.last
        } else {
            fraction.clamp(0.0, 1.0).max(self.last)
        };
        self.last = fraction;

        if let Some(sink) = self.sink.as_mut() {
            sink(ProgressUpdate {
                fraction,
                phase: phase.filter(|p| !p.is_empty()).map(str::to_string),
            });
        }
    }

    /// Report completion unless already there.
    pub fn finish(&mut self) {
        if self.last < 1.0 {
            self.report(1.0, None);
        }
    }

    /// Last fraction forwarded.
    pub fn fraction(&self) -> f64 {
        self.last
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::silent()
    }
}
