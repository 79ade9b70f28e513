//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kiln_cli::build::{Compiler, CompilerStats, ProgressReporter};
use kiln_cli::error::{BuildError, ListenError, ServerError};
use kiln_cli::supervisor::{ConnectionServer, Listenable, Module, ModuleRegistry, ServerHandle};
use kiln_config::BuildConfiguration;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Counters observed by [`LoopbackServer`] and its handles.
#[derive(Default)]
pub struct Counters {
    pub listens: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
}

impl Counters {
    pub fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Binds a real loopback socket whose connections idle until closed.
pub struct LoopbackServer {
    pub counters: Arc<Counters>,
    pub listen_delay: Duration,
    pub destroy_delay: Duration,
}

impl LoopbackServer {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self {
            counters,
            listen_delay: Duration::ZERO,
            destroy_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Listenable for LoopbackServer {
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn ServerHandle>, ListenError> {
        tokio::time::sleep(self.listen_delay).await;
        let listener = TcpListener::bind(addr).await?;
        let server = ConnectionServer::spawn(listener, |mut stream, _| async move {
            let mut buf = [0u8; 64];
            while stream.read(&mut buf).await? > 0 {}
            Ok::<_, io::Error>(())
        })?;

        self.counters.listens.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(CountedHandle {
            inner: server,
            counters: self.counters.clone(),
            destroy_delay: self.destroy_delay,
        }))
    }
}

struct CountedHandle {
    inner: ConnectionServer,
    counters: Arc<Counters>,
    destroy_delay: Duration,
}

#[async_trait]
impl ServerHandle for CountedHandle {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    fn active_connections(&self) -> usize {
        self.inner.active_connections()
    }

    async fn destroy(self: Box<Self>) {
        tokio::time::sleep(self.destroy_delay).await;
        self.inner.shutdown().await;
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry serving one module and counting loads and invalidations.
pub struct FakeRegistry {
    module: Option<Module>,
    pub loads: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl FakeRegistry {
    pub fn listening(path: impl Into<PathBuf>, server: LoopbackServer) -> Arc<Self> {
        Arc::new(Self {
            module: Some(Module::listenable(path, Arc::new(server))),
            loads: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl ModuleRegistry for FakeRegistry {
    fn invalidate(&self, _prefix: &Path) -> usize {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        1
    }

    fn load(&self, path: &Path) -> Result<Module, ServerError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.module.clone().ok_or_else(|| ServerError::Load {
            path: path.to_path_buf(),
            reason: "not found".to_string(),
        })
    }
}

/// Compiler returning fixed stats after reporting some progress.
pub struct FixedCompiler(pub CompilerStats);

#[async_trait]
impl Compiler for FixedCompiler {
    async fn compile(
        &mut self,
        _config: &BuildConfiguration,
        progress: &mut ProgressReporter,
    ) -> Result<CompilerStats, BuildError> {
        progress.report(0.5, Some("building modules"));
        Ok(self.0.clone())
    }
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Minimal HTTP/1.1 GET; returns the raw response.
pub async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nOrigin: http://example.com\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Open an SSE stream and return it once the server greeted the client.
pub async fn open_sse(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nAccept: text/event-stream\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    read_until(&mut stream, "ClientConnected").await;
    stream
}

/// Read from `stream` until the accumulated text contains `needle`.
pub async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut seen = String::new();
    let mut buf = [0u8; 1024];
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while !seen.contains(needle) {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed before {needle:?} arrived; got {seen:?}");
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    })
    .await;
    assert!(finished.is_ok(), "timed out waiting for {needle:?}; got {seen:?}");
    seen
}
