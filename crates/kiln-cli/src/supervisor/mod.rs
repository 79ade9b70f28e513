//! Supervision of the application server.
//!
//! [`ServerSupervisor`] is a small state machine:
//!
//! ```text
//!            start                 bind ok
//! Stopped ─────────► Starting ──────────────► Listening
//!    ▲                  │  bind/load failed       │ restart
//!    └──────────────────┘                         ▼
//!                       ◄──────────────────── Draining
//!                          old handle destroyed
//! ```
//!
//! Only one [`ServerHandle`] exists at a time. A restart destroys the old
//! handle, closing every open connection and releasing the port, before the
//! module is loaded again and bound.

mod coalesce;
mod handle;
mod process;
mod registry;

pub use coalesce::CoalescingSlot;
pub use handle::{ConnectionServer, Listenable, ServerHandle};
pub use process::{Launcher, ProcessServer, DEFAULT_START_TIMEOUT};
pub use registry::{resolve_entry, Module, ModuleRegistry, ProcessRegistry, INDEX_FILES};

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{ListenError, ServerError};

/// Lifecycle state of the supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Listening,
    Draining,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SupervisorState::Stopped => "stopped",
            SupervisorState::Starting => "starting",
            SupervisorState::Listening => "listening",
            SupervisorState::Draining => "draining",
        })
    }
}

/// What a restart request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The old server was drained and a new one is listening here.
    Restarted(SocketAddr),
    /// A restart was already draining; this request was folded into it.
    Coalesced,
}

/// How long [`ServerSupervisor::stop`] waits for an in-flight start or
/// restart to finish before stopping regardless.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the application server: start, drain-and-restart, stop.
pub struct ServerSupervisor {
    registry: Arc<dyn ModuleRegistry>,
    state: watch::Sender<SupervisorState>,
    handle: Mutex<Option<Box<dyn ServerHandle>>>,
    settle_timeout: Duration,
}

impl ServerSupervisor {
    pub fn new(registry: Arc<dyn ModuleRegistry>) -> Self {
        Self {
            registry,
            state: watch::Sender::new(SupervisorState::Stopped),
            handle: Mutex::new(None),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Address of the current server, if one is listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.lock().await.as_ref().map(|h| h.local_addr())
    }

    /// Load `entry` fresh and bind it to `addr`.
    ///
    /// Valid only from `Stopped`. On failure the supervisor is `Stopped`
    /// again.
    ///
    /// # Errors
    ///
    /// `ServerError::Load` when the module cannot be loaded,
    /// `ServerError::Contract` when it cannot listen, `ServerError::Listen`
    /// when binding fails.
    pub async fn start(&self, entry: &Path, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        self.transition(SupervisorState::Starting, "start", |s| {
            s == SupervisorState::Stopped
        })?;
        self.launch(entry, addr).await
    }

    /// Drain the current server and start `entry` again.
    ///
    /// A request that arrives while a restart is already draining is
    /// coalesced: it returns immediately and the in-flight restart picks up
    /// whatever is on disk.
    ///
    /// # Errors
    ///
    /// `ServerError::InvalidTransition` from `Stopped` or `Starting`, or any
    /// error `start` can return. A failed restart leaves the supervisor
    /// `Stopped`.
    pub async fn restart(
        &self,
        entry: &Path,
        addr: SocketAddr,
    ) -> Result<RestartOutcome, ServerError> {
        match self.transition(SupervisorState::Draining, "restart", |s| {
            s == SupervisorState::Listening
        }) {
            Ok(()) => {}
            Err(ServerError::InvalidTransition {
                from: SupervisorState::Draining,
                ..
            }) => {
                debug!("restart already draining, coalescing request");
                return Ok(RestartOutcome::Coalesced);
            }
            Err(e) => return Err(e),
        }

        self.drain().await;
        self.transition(SupervisorState::Starting, "restart", |s| {
            s == SupervisorState::Draining
        })?;
        self.launch(entry, addr).await.map(RestartOutcome::Restarted)
    }

    /// Drain the current server, if any, and end `Stopped`.
    ///
    /// A start or restart in flight is waited for, up to the settle timeout,
    /// so the server it brings up is stopped too. Past the timeout the
    /// supervisor is stopped anyway and a late start discards its server.
    pub async fn stop(&self) {
        let deadline = tokio::time::Instant::now() + self.settle_timeout;
        let mut states = self.state.subscribe();
        loop {
            match self.transition(SupervisorState::Draining, "stop", |s| {
                s == SupervisorState::Listening
            }) {
                Ok(()) => break,
                Err(ServerError::InvalidTransition {
                    from: SupervisorState::Stopped,
                    ..
                }) => {
                    debug!("nothing to stop");
                    return;
                }
                Err(_) => {}
            }

            let timed_out = tokio::time::timeout_at(
                deadline,
                states.wait_for(|s| {
                    matches!(s, SupervisorState::Listening | SupervisorState::Stopped)
                }),
            )
            .await
            .is_err();
            if timed_out {
                warn!(state = %self.state(), "application server did not settle, stopping anyway");
                self.state.send_replace(SupervisorState::Draining);
                break;
            }
        }

        self.drain().await;
        self.state.send_replace(SupervisorState::Stopped);
        info!("application server stopped");
    }

    /// Atomically move to `next` if `allowed` holds for the current state.
    fn transition(
        &self,
        next: SupervisorState,
        action: &'static str,
        allowed: impl FnOnce(SupervisorState) -> bool,
    ) -> Result<(), ServerError> {
        let mut from = SupervisorState::Stopped;
        let moved = self.state.send_if_modified(|state| {
            from = *state;
            if allowed(*state) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(%from, to = %next, "supervisor transition");
            Ok(())
        } else {
            Err(ServerError::InvalidTransition { from, action })
        }
    }

    async fn drain(&self) {
        let old = self.handle.lock().await.take();
        if let Some(old) = old {
            let addr = old.local_addr();
            let open = old.active_connections();
            old.destroy().await;
            debug!(%addr, closed = open, "application server drained");
        }
    }

    /// From `Starting`: load, bind and publish, or fall back to `Stopped`.
    ///
    /// A server bound after `stop` gave up waiting is destroyed, not
    /// published.
    async fn launch(&self, entry: &Path, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        let handle = match self.bind(entry, addr).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.transition(SupervisorState::Stopped, "fail", |s| {
                    s == SupervisorState::Starting
                });
                warn!("application server failed to start: {e}");
                return Err(e);
            }
        };

        let local = handle.local_addr();
        let mut slot = self.handle.lock().await;
        if let Err(e) = self.transition(SupervisorState::Listening, "start", |s| {
            s == SupervisorState::Starting
        }) {
            drop(slot);
            handle.destroy().await;
            debug!(addr = %local, "stopped while starting, new server discarded");
            return Err(e);
        }
        *slot = Some(handle);
        drop(slot);

        info!(addr = %local, "application server listening");
        Ok(local)
    }

    async fn bind(&self, entry: &Path, addr: SocketAddr) -> Result<Box<dyn ServerHandle>, ServerError> {
        let purged = self.registry.invalidate(entry);
        debug!(entry = %entry.display(), purged, "module cache invalidated");

        let module = self.registry.load(entry)?;
        let listener = module.listener().ok_or_else(|| ServerError::Contract {
            path: entry.to_path_buf(),
        })?;

        listener.listen(addr).await.map_err(|e| match e {
            ListenError::Io(source) => ServerError::Listen { addr, source },
            ListenError::Contract => ServerError::Contract {
                path: module.path().to_path_buf(),
            },
            ListenError::Load(reason) => ServerError::Load {
                path: module.path().to_path_buf(),
                reason,
            },
        })
    }
}
