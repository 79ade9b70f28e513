//! Server handles and the connection-tracking accept loop behind them.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

use crate::error::ListenError;

/// Something that can be bound to an address, producing a running server.
///
/// A loaded module without this capability cannot be supervised.
#[async_trait]
pub trait Listenable: Send + Sync {
    /// Bind `addr` and return once the server accepts connections.
    async fn listen(&self, addr: SocketAddr) -> Result<Box<dyn ServerHandle>, ListenError>;

    /// Check that the module honours the listen contract without binding
    /// anything.
    async fn verify(&self) -> Result<(), ListenError> {
        Ok(())
    }
}

/// One running server instance and its open connections.
#[async_trait]
pub trait ServerHandle: Send + Sync {
    /// Address actually bound.
    fn local_addr(&self) -> SocketAddr;

    /// Number of client connections currently open.
    fn active_connections(&self) -> usize;

    /// Stop accepting, close every open connection immediately and release
    /// the listening socket. Returns once all of that has happened.
    async fn destroy(self: Box<Self>);
}

/// Decrements the live connection count when a connection task ends,
/// whether it returned, failed or was aborted.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A TCP accept loop that tracks every connection it spawns so they can be
/// torn down together.
///
/// Each accepted stream is handed to `handler` on its own task. A handler
/// that fails or panics is logged and does not affect the loop.
pub struct ConnectionServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ConnectionServer {
    pub fn spawn<F, Fut>(listener: TcpListener, handler: F) -> io::Result<Self>
    where
        F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let count = connections.clone();

        let task = tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            count.fetch_add(1, Ordering::SeqCst);
                            let guard = ConnectionGuard(count.clone());
                            let fut = handler(stream, peer);
                            tasks.spawn(async move {
                                let _guard = guard;
                                if let Err(e) = fut.await {
                                    debug!(%peer, "connection closed with error: {e}");
                                }
                            });
                        }
                        Err(e) => warn!(%addr, "accept failed: {e}"),
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                error!(%addr, "connection handler panicked");
                            }
                        }
                    }
                }
            }

            drop(listener);
            let open = tasks.len();
            tasks.shutdown().await;
            debug!(%addr, closed = open, "listener released");
        });

        Ok(Self {
            addr,
            connections,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close the listener and abort every connection task, waiting for both.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!(addr = %self.addr, "accept loop panicked");
            }
        }
    }
}

#[async_trait]
impl ServerHandle for ConnectionServer {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn active_connections(&self) -> usize {
        ConnectionServer::active_connections(self)
    }

    async fn destroy(self: Box<Self>) {
        (*self).shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn echo_server() -> ConnectionServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        ConnectionServer::spawn(listener, |mut stream, _| async move {
            let mut buf = [0u8; 64];
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<_, io::Error>(());
                }
                stream.write_all(&buf[..n]).await?;
            }
        })
        .unwrap()
    }

    async fn wait_for_connections(server: &ConnectionServer, n: usize) {
        for _ in 0..100 {
            if server.active_connections() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} connections, saw {}", server.active_connections());
    }

    #[tokio::test]
    async fn test_counts_open_connections() {
        let server = echo_server().await;
        let mut a = TcpStream::connect(server.local_addr()).await.unwrap();
        let _b = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_connections(&server, 2).await;

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(a);
        wait_for_connections(&server, 1).await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let server = echo_server().await;
        let addr = server.local_addr();
        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_connections(&server, 1).await;

        server.shutdown().await;

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("connection should be closed, not hang");
        assert!(matches!(read, Ok(0) | Err(_)));

        // The port is free again.
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_accepting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = ConnectionServer::spawn(listener, |_stream, _| async move {
            if true {
                panic!("handler bug");
            }
            Ok::<_, io::Error>(())
        })
        .unwrap();

        for _ in 0..3 {
            let _ = TcpStream::connect(server.local_addr()).await.unwrap();
        }
        wait_for_connections(&server, 0).await;
        assert!(TcpStream::connect(server.local_addr()).await.is_ok());
        server.shutdown().await;
    }
}
