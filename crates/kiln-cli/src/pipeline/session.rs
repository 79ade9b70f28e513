//! A hot-mode session: the asset server and the supervised application
//! server running side by side, each fed by its own file watcher.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kiln_config::BuildConfiguration;

use crate::build::BuildRunner;
use crate::dev::{AssetDevServer, DevEvent, DevNotifier, DevObserver, FileWatcher, WatchEvent};
use crate::error::{format_compile_failure, BuildError, Result};
use crate::supervisor::{
    resolve_entry, CoalescingSlot, ModuleRegistry, RestartOutcome, ServerSupervisor,
    SupervisorState,
};

const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Addresses and watch settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Absolute server entry
    pub entry: PathBuf,
    pub app_addr: SocketAddr,
    pub dev_host: String,
    pub dev_port: u16,
    /// Restart the server when its sources change
    pub watch_server: bool,
    /// Rebuild client assets when sources under this root change
    pub client_root: Option<PathBuf>,
    pub debounce_ms: u64,
}

impl SessionConfig {
    pub fn new(entry: impl Into<PathBuf>, app_addr: SocketAddr, dev_host: &str, dev_port: u16) -> Self {
        Self {
            entry: entry.into(),
            app_addr,
            dev_host: dev_host.to_string(),
            dev_port,
            watch_server: false,
            client_root: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }

    pub fn watch_server(mut self, watch: bool) -> Self {
        self.watch_server = watch;
        self
    }

    pub fn client_root(mut self, root: Option<PathBuf>) -> Self {
        self.client_root = root;
        self
    }
}

/// Something the session wants shown.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The application server is listening again after a change
    Restarted(SocketAddr),
    /// A restart failed; the server is stopped until the next change
    RestartFailed(String),
    Assets(DevEvent),
}

pub type SessionObserver = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Live session. Dropping it without [`DevSession::shutdown`] aborts the
/// background tasks; the supervised server is stopped by its process guard.
pub struct DevSession {
    supervisor: Arc<ServerSupervisor>,
    assets: Option<AssetDevServer>,
    assets_addr: SocketAddr,
    app_addr: SocketAddr,
    restarts: Arc<CoalescingSlot<WatchEvent>>,
    rebuilds: Arc<CoalescingSlot<WatchEvent>>,
    restart_task: JoinHandle<()>,
    rebuild_task: JoinHandle<()>,
    pumps: Vec<JoinHandle<()>>,
    watchers: Vec<FileWatcher>,
}

impl DevSession {
    /// Bind the asset server and start the application server.
    ///
    /// Both are started concurrently; the session only exists once both are
    /// up. If either fails the other is torn down again.
    ///
    /// # Errors
    ///
    /// `ServerError::DevServerBind` when the asset server cannot bind (this
    /// wins when both fail), otherwise the supervisor's start error. Watcher
    /// setup errors are returned after both servers are stopped.
    pub async fn start(
        config: SessionConfig,
        build: BuildConfiguration,
        registry: Arc<dyn ModuleRegistry>,
        runner: BuildRunner,
        observer: SessionObserver,
    ) -> Result<Self> {
        let supervisor = Arc::new(ServerSupervisor::new(registry));

        let (assets, app) = tokio::join!(
            AssetDevServer::listen(&build, &config.dev_host, config.dev_port),
            supervisor.start(&config.entry, config.app_addr),
        );
        let (assets, app_addr) = match (assets, app) {
            (Ok(assets), Ok(addr)) => (assets, addr),
            (Err(e), Ok(_)) => {
                supervisor.stop().await;
                return Err(e.into());
            }
            (Ok(assets), Err(e)) => {
                assets.shutdown().await;
                return Err(e.into());
            }
            (Err(e), Err(_)) => return Err(e.into()),
        };
        info!(app = %app_addr, assets = %assets.local_addr(), "session ready");

        let restarts = Arc::new(CoalescingSlot::new());
        let rebuilds = Arc::new(CoalescingSlot::new());

        let restart_task = tokio::spawn(restart_loop(
            supervisor.clone(),
            restarts.clone(),
            config.entry.clone(),
            app_addr,
            observer.clone(),
        ));

        let forward: DevObserver = {
            let observer = observer.clone();
            Arc::new(move |event| observer(SessionEvent::Assets(event)))
        };
        let notifier = assets.notifier(Some(forward));
        let rebuild_task = tokio::spawn(rebuild_loop(notifier, rebuilds.clone(), runner, build.clone()));

        let mut session = Self {
            supervisor,
            assets_addr: assets.local_addr(),
            assets: Some(assets),
            app_addr,
            restarts,
            rebuilds,
            restart_task,
            rebuild_task,
            pumps: Vec::new(),
            watchers: Vec::new(),
        };

        if let Err(e) = session.watch(&config, &build) {
            session.shutdown().await;
            return Err(e);
        }
        Ok(session)
    }

    fn watch(&mut self, config: &SessionConfig, build: &BuildConfiguration) -> Result<()> {
        let server_target = server_watch_target(&config.entry);

        if config.watch_server {
            let (watcher, rx) = FileWatcher::new(server_target.clone(), Vec::new(), config.debounce_ms)?;
            debug!(path = %watcher.root().display(), "watching server sources");
            self.pumps.push(pump(rx, self.restarts.clone()));
            self.watchers.push(watcher);
        }

        if let Some(root) = &config.client_root {
            let mut ignore = vec!["node_modules".to_string()];
            ignore.extend(relative_pattern(&build.output.path, root));
            ignore.extend(relative_pattern(&server_target, root));

            let (watcher, rx) = FileWatcher::new(root.clone(), ignore, config.debounce_ms)?;
            debug!(path = %watcher.root().display(), "watching client sources");
            self.pumps.push(pump(rx, self.rebuilds.clone()));
            self.watchers.push(watcher);
        }
        Ok(())
    }

    pub fn app_addr(&self) -> SocketAddr {
        self.app_addr
    }

    pub fn assets_addr(&self) -> SocketAddr {
        self.assets_addr
    }

    pub fn supervisor(&self) -> &Arc<ServerSupervisor> {
        &self.supervisor
    }

    pub fn assets(&self) -> Option<&AssetDevServer> {
        self.assets.as_ref()
    }

    /// Queue a server restart as if its sources had changed.
    pub fn server_changed(&self, event: WatchEvent) {
        self.restarts.offer(event);
    }

    /// Queue a client rebuild as if its sources had changed.
    pub fn client_changed(&self, event: WatchEvent) {
        self.rebuilds.offer(event);
    }

    /// Stop watching, drain the application server and stop the asset
    /// server. An in-flight restart is allowed to finish first; an in-flight
    /// rebuild is abandoned.
    pub async fn shutdown(mut self) {
        self.watchers.clear();
        for pump in self.pumps.drain(..) {
            pump.abort();
        }

        self.restarts.close();
        if let Err(e) = (&mut self.restart_task).await {
            warn!(error = %e, "restart loop ended abnormally");
        }
        self.rebuilds.close();
        self.rebuild_task.abort();

        self.supervisor.stop().await;
        if let Some(assets) = self.assets.take() {
            assets.shutdown().await;
        }
        info!("session stopped");
    }
}

impl Drop for DevSession {
    fn drop(&mut self) {
        self.restart_task.abort();
        self.rebuild_task.abort();
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Watch a directory entry as a whole; a file-like entry through the file
/// it resolves to.
fn server_watch_target(entry: &Path) -> PathBuf {
    if entry.is_dir() {
        return entry.to_path_buf();
    }
    resolve_entry(entry).unwrap_or_else(|| entry.to_path_buf())
}

fn relative_pattern(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel.to_string_lossy().replace('\\', "/");
    (!rel.is_empty()).then_some(rel)
}

fn pump(mut rx: mpsc::Receiver<WatchEvent>, slot: Arc<CoalescingSlot<WatchEvent>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if slot.offer(event) {
                debug!("change coalesced into pending trigger");
            }
        }
    })
}

async fn restart_loop(
    supervisor: Arc<ServerSupervisor>,
    slot: Arc<CoalescingSlot<WatchEvent>>,
    entry: PathBuf,
    addr: SocketAddr,
    observer: SessionObserver,
) {
    while let Some(event) = slot.next().await {
        debug!(path = ?event.path, "server sources changed");

        let result = match supervisor.state() {
            SupervisorState::Stopped => supervisor.start(&entry, addr).await,
            _ => match supervisor.restart(&entry, addr).await {
                Ok(RestartOutcome::Restarted(addr)) => Ok(addr),
                Ok(RestartOutcome::Coalesced) => continue,
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(addr) => {
                info!(%addr, "application server restarted");
                observer(SessionEvent::Restarted(addr));
            }
            Err(e) => {
                warn!("application server restart failed: {e}");
                observer(SessionEvent::RestartFailed(e.to_string()));
            }
        }
    }
}

async fn rebuild_loop(
    notifier: DevNotifier,
    slot: Arc<CoalescingSlot<WatchEvent>>,
    mut runner: BuildRunner,
    config: BuildConfiguration,
) {
    while let Some(event) = slot.next().await {
        debug!(path = ?event.path, "client sources changed");
        match notifier.rebuild(&mut runner, &config).await {
            Ok(_) => {}
            Err(BuildError::Compile { errors, warnings }) => {
                warn!("rebuild failed\n{}", format_compile_failure(&errors, &warnings));
            }
            Err(e) => warn!("rebuild failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_pattern() {
        let root = Path::new("/proj");
        assert_eq!(
            relative_pattern(Path::new("/proj/app/server"), root),
            Some("app/server".to_string())
        );
        assert_eq!(relative_pattern(Path::new("/elsewhere/build"), root), None);
        assert_eq!(relative_pattern(Path::new("/proj"), root), None);
    }

    #[test]
    fn test_server_watch_target_prefers_resolved_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.js"), "").unwrap();
        std::fs::create_dir(dir.path().join("api")).unwrap();

        assert_eq!(
            server_watch_target(&dir.path().join("server")),
            dir.path().join("server.js")
        );
        assert_eq!(server_watch_target(&dir.path().join("api")), dir.path().join("api"));
        assert_eq!(
            server_watch_target(&dir.path().join("missing")),
            dir.path().join("missing")
        );
    }
}
