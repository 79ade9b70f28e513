//! Live asset server for hot mode.
//!
//! Serves the compiled output directory, pushes build events to connected
//! browsers over Server-Sent Events and recompiles client sources when they
//! change.

mod server;
mod state;
mod watcher;

pub use server::{
    mount_path, AssetDevServer, DevNotifier, DevObserver, HMR_CLIENT_SCRIPT, HMR_PATH,
    HMR_SCRIPT_PATH, WARMUP,
};
pub use state::{BuildStatus, ClientRegistry, DevServerState, SharedState};
pub use watcher::{should_ignore, FileWatcher, WatchEvent};

use serde::Serialize;

use crate::build::ProgressUpdate;

/// Event pushed to HMR clients and to the orchestrator's observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DevEvent {
    BuildStarted,
    BuildProgress {
        fraction: f64,
        phase: Option<String>,
    },
    BuildCompleted {
        duration_ms: u64,
        warnings: Vec<String>,
    },
    BuildFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    ClientConnected {
        id: usize,
    },
}

impl DevEvent {
    /// The progress update carried by a `BuildProgress` event.
    pub fn as_progress(&self) -> Option<ProgressUpdate> {
        match self {
            DevEvent::BuildProgress { fraction, phase } => Some(ProgressUpdate {
                fraction: *fraction,
                phase: phase.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DevEvent::BuildFailed { .. })
    }
}

impl From<ProgressUpdate> for DevEvent {
    fn from(update: ProgressUpdate) -> Self {
        DevEvent::BuildProgress {
            fraction: update.fraction,
            phase: update.phase,
        }
    }
}
