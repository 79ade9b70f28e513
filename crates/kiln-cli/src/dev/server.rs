//! The asset dev server: axum router, SSE channel and rebuild notifications.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{sse::Event, sse::KeepAlive, IntoResponse, Json, Sse},
    routing::get,
    Router,
};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use kiln_config::{BuildConfiguration, PUBLIC_PATH};

use super::state::{DevServerState, SharedState};
use super::DevEvent;
use crate::build::{BuildResult, BuildRunner, ProgressReporter};
use crate::error::{BuildError, ServerError};

/// SSE endpoint for build events.
pub const HMR_PATH: &str = "/__kiln_hmr__";
/// Browser client for the SSE endpoint.
pub const HMR_SCRIPT_PATH: &str = "/__kiln_hmr__.js";
/// Source of the live-reload client. Hot entries bundle it from
/// `.kiln/hmr-client.js`; pages without a bundle can load it from
/// [`HMR_SCRIPT_PATH`].
pub const HMR_CLIENT_SCRIPT: &str = include_str!("../../assets/hmr-client.js");
pub const STATUS_PATH: &str = "/__kiln_status__";

/// Progress and completion are not forwarded to the observer for this long
/// after the server starts.
pub const WARMUP: Duration = Duration::from_secs(5);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Receives every event the server emits, after warm-up gating.
pub type DevObserver = Arc<dyn Fn(DevEvent) + Send + Sync>;

/// Running asset server.
pub struct AssetDevServer {
    state: SharedState,
    local_addr: SocketAddr,
    started_at: Instant,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl AssetDevServer {
    /// Bind `host:port` and start serving `config`'s output directory.
    ///
    /// # Errors
    ///
    /// `ServerError::DevServerBind` if the address cannot be bound.
    pub async fn listen(
        config: &BuildConfiguration,
        host: &str,
        port: u16,
    ) -> Result<Self, ServerError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::DevServerBind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::DevServerBind { addr, source })?;

        let state = Arc::new(DevServerState::new(config.output.path.clone()));
        let app = router(state.clone(), &mount_path(&config.output.public_path));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(%local_addr, "asset server listening");
        Ok(Self {
            state,
            local_addr,
            started_at: Instant::now(),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Handle for announcing rebuilds. `observer` also receives events,
    /// except progress and completion during the warm-up window.
    pub fn notifier(&self, observer: Option<DevObserver>) -> DevNotifier {
        DevNotifier {
            state: self.state.clone(),
            observer,
            started_at: self.started_at,
            warmup: WARMUP,
        }
    }

    /// Disconnect HMR clients and stop serving.
    pub async fn shutdown(mut self) {
        self.state.disconnect_all();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => debug!("asset server stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "asset server stopped with an error"),
            Ok(Err(e)) => warn!(error = %e, "asset server task failed"),
            Err(_) => {
                warn!("asset server did not stop in time; aborting");
                task.abort();
            }
        }
    }
}

impl Drop for AssetDevServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Announces builds to HMR clients and the observer.
#[derive(Clone)]
pub struct DevNotifier {
    state: SharedState,
    observer: Option<DevObserver>,
    started_at: Instant,
    warmup: Duration,
}

impl DevNotifier {
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn in_warmup(&self) -> bool {
        self.started_at.elapsed() < self.warmup
    }

    pub fn notify(&self, event: DevEvent) {
        self.state.broadcast(&event);

        let gated = matches!(
            event,
            DevEvent::BuildProgress { .. } | DevEvent::BuildCompleted { .. }
        ) && self.in_warmup();
        if gated {
            return;
        }
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }

    /// Recompile with `runner`, publishing start, progress and the outcome.
    pub async fn rebuild(
        &self,
        runner: &mut BuildRunner,
        config: &BuildConfiguration,
    ) -> Result<BuildResult, BuildError> {
        self.state.start_build();
        self.notify(DevEvent::BuildStarted);

        let progress = {
            let notifier = self.clone();
            ProgressReporter::new(move |update| notifier.notify(DevEvent::from(update)))
        };

        let outcome = runner.run(config, progress).await;
        match &outcome {
            Ok(result) => {
                self.state
                    .complete_build(result.elapsed_ms(), result.warnings.len());
                self.notify(DevEvent::BuildCompleted {
                    duration_ms: result.elapsed_ms(),
                    warnings: result.warnings.clone(),
                });
            }
            Err(BuildError::Compile { errors, warnings }) => {
                self.state.fail_build(errors.clone());
                self.notify(DevEvent::BuildFailed {
                    errors: errors.clone(),
                    warnings: warnings.clone(),
                });
            }
            Err(other) => {
                self.state.fail_build(vec![other.to_string()]);
                self.notify(DevEvent::BuildFailed {
                    errors: vec![other.to_string()],
                    warnings: Vec::new(),
                });
            }
        }
        outcome
    }
}

/// Path prefix the output directory is served under, taken from a public
/// path that may carry an origin (`http://localhost:5050/assets/`).
pub fn mount_path(public_path: &str) -> String {
    let path = match public_path.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
        None => public_path,
    };
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "/" {
        PUBLIC_PATH.trim_end_matches('/').to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn router(state: SharedState, mount: &str) -> Router {
    let assets: PathBuf = state.out_dir().to_path_buf();

    Router::new()
        .route(HMR_PATH, get(handle_sse))
        .route(HMR_SCRIPT_PATH, get(handle_hmr_script))
        .route(STATUS_PATH, get(handle_status))
        .nest_service(mount, ServeDir::new(assets))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn handle_sse(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.register_client();
    debug!(client = id, "hmr client connected");
    state.broadcast(&DevEvent::ClientConnected { id });

    let stream = ReceiverStream::new(rx).map(|data| Ok(Event::default().data(data)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

async fn handle_hmr_script() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        HMR_CLIENT_SCRIPT,
    )
}

async fn handle_status(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.status();
    Json(json!({
        "status": status.label(),
        "errors": status.errors().unwrap_or_default(),
        "clients": state.client_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{Compiler, CompilerStats};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    fn config(out: &std::path::Path) -> BuildConfiguration {
        BuildConfiguration::from_value(json!({
            "entry": "./index.js",
            "output": {"path": out, "publicPath": "http://localhost:5050/assets/"}
        }))
        .unwrap()
    }

    struct Fixed(CompilerStats);

    #[async_trait]
    impl Compiler for Fixed {
        async fn compile(
            &mut self,
            _config: &BuildConfiguration,
            progress: &mut ProgressReporter,
        ) -> Result<CompilerStats, BuildError> {
            progress.report(0.5, Some("emitting"));
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_mount_path() {
        assert_eq!(mount_path("http://localhost:5050/assets/"), "/assets");
        assert_eq!(mount_path("/assets/"), "/assets");
        assert_eq!(mount_path("static"), "/static");
        assert_eq!(mount_path("http://localhost:5050"), "/assets");
        assert_eq!(mount_path("/"), "/assets");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_dev_server_bind_error() {
        let dir = tempfile::tempdir().unwrap();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = AssetDevServer::listen(&config(dir.path()), "127.0.0.1", port).await;
        assert!(matches!(result, Err(ServerError::DevServerBind { .. })));
    }

    #[tokio::test]
    async fn test_warmup_gates_progress_but_not_failures() {
        let dir = tempfile::tempdir().unwrap();
        let server = AssetDevServer::listen(&config(dir.path()), "127.0.0.1", 0)
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: DevObserver = Arc::new(move |event| sink.lock().push(event));
        let notifier = server.notifier(Some(observer));
        assert!(notifier.in_warmup());

        notifier.notify(DevEvent::BuildProgress {
            fraction: 0.2,
            phase: None,
        });
        notifier.notify(DevEvent::BuildFailed {
            errors: vec!["boom".into()],
            warnings: vec![],
        });

        let events = seen.lock().clone();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_failure());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_rebuild_publishes_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let server = AssetDevServer::listen(&config(dir.path()), "127.0.0.1", 0)
            .await
            .unwrap();
        let (_id, mut rx) = server.state().register_client();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: DevObserver = Arc::new(move |event| sink.lock().push(event));
        let notifier = server.notifier(Some(observer)).with_warmup(Duration::ZERO);

        let mut runner = BuildRunner::new(Box::new(Fixed(CompilerStats {
            warnings: vec!["careful".into()],
            ..Default::default()
        })));
        let result = notifier
            .rebuild(&mut runner, &config(dir.path()))
            .await
            .unwrap();
        assert_eq!(result.warnings, vec!["careful".to_string()]);
        assert!(server.state().status().is_success());

        let first = rx.recv().await.unwrap();
        assert!(first.contains("BuildStarted"));

        let events = seen.lock().clone();
        assert!(events.iter().any(|e| e.as_progress().is_some()));
        assert!(matches!(
            events.last(),
            Some(DevEvent::BuildCompleted { warnings, .. }) if warnings.len() == 1
        ));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_rebuild_records_errors() {
        let dir = tempfile::tempdir().unwrap();
        let server = AssetDevServer::listen(&config(dir.path()), "127.0.0.1", 0)
            .await
            .unwrap();
        let notifier = server.notifier(None);

        let mut runner = BuildRunner::new(Box::new(Fixed(CompilerStats {
            errors: vec!["syntax error".into()],
            ..Default::default()
        })));
        let result = notifier.rebuild(&mut runner, &config(dir.path())).await;

        assert!(matches!(result, Err(BuildError::Compile { .. })));
        assert_eq!(
            server.state().status().errors(),
            Some(&["syntax error".to_string()][..])
        );
        server.shutdown().await;
    }
}
