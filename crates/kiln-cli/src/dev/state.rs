//! Shared state for the asset dev server.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::DevEvent;

/// Status of the most recent compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    /// Nothing compiled since the server started
    Idle,
    InProgress { started_at: Instant },
    Success { duration_ms: u64, warnings: usize },
    Failed { errors: Vec<String> },
}

impl BuildStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, BuildStatus::InProgress { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success { .. })
    }

    pub fn errors(&self) -> Option<&[String]> {
        match self {
            BuildStatus::Failed { errors } => Some(errors),
            _ => None,
        }
    }

    /// Short label for the status endpoint.
    pub fn label(&self) -> &'static str {
        match self {
            BuildStatus::Idle => "idle",
            BuildStatus::InProgress { .. } => "building",
            BuildStatus::Success { .. } => "ok",
            BuildStatus::Failed { .. } => "failed",
        }
    }
}

/// Per-client senders for Server-Sent Events.
pub type ClientRegistry = Arc<RwLock<HashMap<usize, mpsc::Sender<String>>>>;

/// State shared between the HTTP handlers and the rebuild loop.
pub struct DevServerState {
    status: RwLock<BuildStatus>,
    clients: ClientRegistry,
    next_client_id: AtomicUsize,
    out_dir: PathBuf,
}

impl DevServerState {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            status: RwLock::new(BuildStatus::Idle),
            clients: Arc::new(RwLock::new(HashMap::new())),
            next_client_id: AtomicUsize::new(0),
            out_dir,
        }
    }

    pub fn start_build(&self) {
        *self.status.write() = BuildStatus::InProgress {
            started_at: Instant::now(),
        };
    }

    pub fn complete_build(&self, duration_ms: u64, warnings: usize) {
        *self.status.write() = BuildStatus::Success {
            duration_ms,
            warnings,
        };
    }

    pub fn fail_build(&self, errors: Vec<String>) {
        *self.status.write() = BuildStatus::Failed { errors };
    }

    pub fn status(&self) -> BuildStatus {
        self.status.read().clone()
    }

    /// Register a new SSE client.
    pub fn register_client(&self) -> (usize, mpsc::Receiver<String>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(100);
        self.clients.write().insert(id, tx);
        (id, rx)
    }

    pub fn unregister_client(&self, id: usize) {
        self.clients.write().remove(&id);
    }

    /// Disconnect every SSE client, ending their streams.
    pub fn disconnect_all(&self) {
        self.clients.write().clear();
    }

    /// Send an event to every client without waiting.
    ///
    /// Closed clients are dropped; a client whose buffer is full misses this
    /// event.
    pub fn broadcast(&self, event: &DevEvent) {
        let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());

        let mut closed = Vec::new();
        for (id, tx) in self.clients.read().iter() {
            if let Err(TrySendError::Closed(_)) = tx.try_send(json.clone()) {
                closed.push(*id);
            }
        }

        if !closed.is_empty() {
            let mut clients = self.clients.write();
            for id in closed {
                clients.remove(&id);
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

/// Shared state handle.
pub type SharedState = Arc<DevServerState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_lifecycle() {
        let state = DevServerState::new(PathBuf::from("build"));
        assert_eq!(state.status(), BuildStatus::Idle);

        state.start_build();
        assert!(state.status().is_in_progress());

        state.complete_build(120, 1);
        assert!(state.status().is_success());

        state.fail_build(vec!["boom".to_string()]);
        assert_eq!(state.status().errors(), Some(&["boom".to_string()][..]));
        assert_eq!(state.status().label(), "failed");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_clients_and_prunes_closed() {
        let state = DevServerState::new(PathBuf::from("build"));
        let (_a, mut rx_a) = state.register_client();
        let (_b, rx_b) = state.register_client();
        drop(rx_b);

        state.broadcast(&DevEvent::BuildStarted);

        let message = rx_a.recv().await.unwrap();
        assert!(message.contains("BuildStarted"));
        assert_eq!(state.client_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_ends_streams() {
        let state = DevServerState::new(PathBuf::from("build"));
        let (_id, mut rx) = state.register_client();
        state.disconnect_all();
        assert_eq!(rx.recv().await, None);
    }
}
