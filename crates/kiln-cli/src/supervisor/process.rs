//! Supervised servers running as child processes.
//!
//! The child listens on an internal loopback port handed to it as `PORT`.
//! The application port is owned by a proxy in this process, so every
//! client connection is visible here and can be closed on restart.
//!
//! Script modules are not run directly: a small loader imports the module,
//! checks that it exports something with `listen()` and calls it. A start
//! only succeeds once the child accepts connections; a child that exits
//! first is a load failure carrying the tail of its stderr.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handle::{ConnectionServer, Listenable, ServerHandle};
use crate::error::ListenError;

/// How long a started server may take to accept its first connection.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Module path handed to the loader.
pub const SERVER_MODULE_VAR: &str = "KILN_SERVER_MODULE";

/// When set, the loader exits after checking the export.
const CHECK_ONLY_VAR: &str = "KILN_CHECK_ONLY";

/// Loader exit code for a module without `listen()`.
const CONTRACT_EXIT: i32 = 78;

const SERVE_MODULE: &str = include_str!("../../assets/serve-module.js");

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL: Duration = Duration::from_millis(50);
const STDERR_TAIL_LINES: usize = 20;
const STDERR_DRAIN: Duration = Duration::from_millis(500);
const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How to start a server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Script module run through the loader. `program` is then the script
    /// runtime rather than the server itself.
    pub module: Option<PathBuf>,
}

impl Launcher {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(module) = &self.module {
            cmd.arg("-e").arg(SERVE_MODULE).env(SERVER_MODULE_VAR, module);
        }
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn checks_contract(&self) -> bool {
        self.module.is_some()
    }
}

impl fmt::Display for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        if let Some(module) = &self.module {
            write!(f, " {}", module.display())?;
        }
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A server module backed by a child process.
pub struct ProcessServer {
    launcher: Launcher,
    start_timeout: Duration,
}

impl ProcessServer {
    pub fn new(launcher: Launcher) -> Self {
        Self {
            launcher,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    fn spawn(&self, cmd: &mut Command) -> Result<Child, ListenError> {
        cmd.spawn()
            .map_err(|e| ListenError::Load(format!("failed to launch {}: {e}", self.launcher)))
    }

    /// Wait until `upstream` accepts a connection, the child exits or the
    /// start timeout passes.
    async fn wait_ready(
        &self,
        child: &mut Child,
        upstream: SocketAddr,
        stderr: StderrTail,
    ) -> Result<(), ListenError> {
        let started = tokio::time::timeout(self.start_timeout, async {
            tokio::select! {
                status = child.wait() => Some(status),
                () = accepting(upstream) => None,
            }
        })
        .await;

        match started {
            Ok(None) => Ok(()),
            Ok(Some(status)) => {
                let output = stderr.finish().await;
                Err(exit_error(status, self.launcher.checks_contract(), &output))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to stop unresponsive application server: {e}");
                }
                Err(ListenError::Load(format!(
                    "did not accept connections within {}s",
                    self.start_timeout.as_secs_f32()
                )))
            }
        }
    }
}

#[async_trait]
impl Listenable for ProcessServer {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn ServerHandle>, ListenError> {
        let listener = TcpListener::bind(addr).await?;
        let internal = reserve_loopback_port().await?;

        let mut cmd = self.launcher.command();
        cmd.env("PORT", internal.to_string());
        let mut child = self.spawn(&mut cmd)?;
        let stderr = StderrTail::capture(&mut child);
        info!(pid = ?child.id(), launcher = %self.launcher, "application server started");

        let upstream = SocketAddr::from(([127, 0, 0, 1], internal));
        self.wait_ready(&mut child, upstream, stderr).await?;
        debug!(%upstream, "application server accepting connections");

        let proxy = ConnectionServer::spawn(listener, move |client, _| forward(client, upstream))?;
        let (stop, monitor) = monitor(child);

        Ok(Box::new(ProcessHandle {
            proxy,
            stop,
            monitor,
        }))
    }

    async fn verify(&self) -> Result<(), ListenError> {
        if !self.launcher.checks_contract() {
            return Ok(());
        }

        let mut cmd = self.launcher.command();
        cmd.env(CHECK_ONLY_VAR, "1")
            .env("PORT", "0")
            .stdout(Stdio::null());
        let child = self.spawn(&mut cmd)?;
        let output = tokio::time::timeout(CHECK_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                ListenError::Load(format!(
                    "did not finish loading within {}s",
                    CHECK_TIMEOUT.as_secs()
                ))
            })??;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(exit_error(Ok(output.status), true, stderr.trim_end()))
    }
}

fn exit_error(status: io::Result<ExitStatus>, checks_contract: bool, stderr: &str) -> ListenError {
    match status {
        Ok(status) if checks_contract && status.code() == Some(CONTRACT_EXIT) => ListenError::Contract,
        Ok(status) if stderr.is_empty() => ListenError::Load(format!("exited ({status})")),
        Ok(status) => ListenError::Load(format!("exited ({status}):\n{stderr}")),
        Err(e) => ListenError::Load(format!("failed to wait for the server process: {e}")),
    }
}

/// Forwards a child's stderr to ours and keeps its last lines for error
/// reports.
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    reader: Option<JoinHandle<()>>,
}

impl StderrTail {
    fn capture(child: &mut Child) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let reader = child.stderr.take().map(|stderr| {
            let tail = lines.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    eprintln!("{line}");
                    let mut kept = tail.lock();
                    if kept.len() == STDERR_TAIL_LINES {
                        kept.pop_front();
                    }
                    kept.push_back(line);
                }
            })
        });
        Self { lines, reader }
    }

    /// Wait briefly for the pipe to close, then return what was kept.
    async fn finish(mut self) -> String {
        if let Some(reader) = self.reader.take() {
            let _ = tokio::time::timeout(STDERR_DRAIN, reader).await;
        }
        Vec::from(self.lines.lock().clone()).join("\n")
    }
}

/// Handle for a running child process and its proxy.
struct ProcessHandle {
    proxy: ConnectionServer,
    stop: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

#[async_trait]
impl ServerHandle for ProcessHandle {
    fn local_addr(&self) -> SocketAddr {
        self.proxy.local_addr()
    }

    fn active_connections(&self) -> usize {
        self.proxy.active_connections()
    }

    async fn destroy(self: Box<Self>) {
        let ProcessHandle {
            proxy,
            stop,
            monitor,
        } = *self;
        proxy.shutdown().await;
        let _ = stop.send(());
        if let Err(e) = monitor.await {
            error!("process monitor failed: {e}");
        }
    }
}

/// Watch the child until it exits on its own or is asked to stop.
///
/// An unexpected exit is logged; the proxy stays up and reports connection
/// failures until the next restart.
fn monitor(mut child: Child) -> (oneshot::Sender<()>, JoinHandle<()>) {
    let (stop, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop_rx => None,
        };

        match exited {
            Some(Ok(status)) => warn!(%status, "application server exited"),
            Some(Err(e)) => error!("failed to wait for application server: {e}"),
            None => match child.kill().await {
                Ok(()) => debug!("application server stopped"),
                Err(e) => warn!("failed to stop application server: {e}"),
            },
        }
    });
    (stop, task)
}

async fn reserve_loopback_port() -> io::Result<u16> {
    let spare = TcpListener::bind("127.0.0.1:0").await?;
    Ok(spare.local_addr()?.port())
}

/// Resolves once `addr` accepts a connection.
async fn accepting(addr: SocketAddr) {
    while TcpStream::connect(addr).await.is_err() {
        tokio::time::sleep(READY_POLL).await;
    }
}

async fn forward(mut client: TcpStream, upstream: SocketAddr) -> io::Result<()> {
    let mut server = connect_with_retry(upstream).await?;
    tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    Ok(())
}

/// The child may be restarting its listener when a client arrives.
async fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(_) if attempt < CONNECT_ATTEMPTS => {
                attempt += 1;
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
