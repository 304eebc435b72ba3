//! Connection supervisor.
//!
//! This module provides the `DropServer` that owns the accept loop and the
//! per-connection tasks. Its lifecycle is
//! `Idle -> Serving -> Stopping -> Stopped`:
//!
//! - `serve*` moves `Idle` to `Serving` and runs the accept loop.
//! - `close` moves `Serving` to `Stopping` and signals every task. It is a
//!   no-op in any other state.
//! - `serve*` returns after all connection tasks have drained, in `Stopped`.
//!
//! Each connection runs the handshake, password authentication and
//! subsystem negotiation, then one [`FileTransferSession`] over a fresh
//! ownership tracker.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::messages::{
    AuthResult, ChannelOpenResult, ChannelRequestResult, Disconnect, SESSION_CHANNEL,
};
use protocol::{Credential, HostIdentity, Message};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatcher::OperationDispatcher;
use crate::files::{
    DirectoryPolicy, FilesystemGateway, FsError, PathConfiner, SessionOwnershipTracker,
};
use crate::session::FileTransferSession;
use crate::transport::{SecureChannel, TransportError};

/// Delay before retrying after a failed accept.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet serving.
    Idle,
    /// Accepting connections.
    Serving,
    /// Close requested, draining connection tasks.
    Stopping,
    /// Drained. Terminal.
    Stopped,
}

/// Events emitted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Lifecycle state changed.
    StateChanged(ServerState),
    /// A connection was accepted.
    ConnectionOpened { peer: String },
    /// A connection task finished.
    ConnectionClosed { peer: String, remaining: usize },
    /// A login attempt was rejected.
    AuthenticationFailed { peer: String },
}

/// Errors raised by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("data root {0} does not exist")]
    RootMissing(PathBuf),

    #[error("data root {0} is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("server cannot start from state {0:?}")]
    InvalidState(ServerState),

    #[error("listener error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Settings for a [`DropServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The single identity allowed to log in.
    pub credential: Credential,
    /// Host key; also the server's static Noise key.
    pub host_key: HostIdentity,
    /// Data root. Must exist and be a directory.
    pub root: PathBuf,
    /// Reserved storage quota. Not enforced.
    pub max_bytes: u64,
    /// Mode for created files.
    pub file_mode: u32,
    /// Mode for created directories.
    pub dir_mode: u32,
    /// Whether `mkdir` claims the new directory.
    pub directory_policy: DirectoryPolicy,
    /// Fixed delay applied to every authentication attempt.
    pub auth_delay: Duration,
    /// Attempts allowed per connection.
    pub max_auth_attempts: u32,
    /// Bound on handshake, login and subsystem negotiation together.
    pub handshake_timeout: Duration,
    /// When set, the server closes itself this long after the last
    /// connection ends, unless a new one arrived meanwhile.
    pub idle_grace: Option<Duration>,
}

impl ServerConfig {
    /// Settings with the default modes, delays and policies.
    pub fn new(credential: Credential, host_key: HostIdentity, root: impl Into<PathBuf>) -> Self {
        Self {
            credential,
            host_key,
            root: root.into(),
            max_bytes: 0,
            file_mode: 0o660,
            dir_mode: 0o770,
            directory_policy: DirectoryPolicy::ClaimOnCreate,
            auth_delay: Duration::from_millis(500),
            max_auth_attempts: 3,
            handshake_timeout: Duration::from_secs(10),
            idle_grace: None,
        }
    }

    /// Settings taken from a loaded configuration file.
    pub fn from_config(config: &Config, credential: Credential, host_key: HostIdentity) -> Self {
        Self {
            credential,
            host_key,
            root: config.storage.root.clone(),
            max_bytes: config.storage.max_bytes,
            file_mode: config.storage.file_mode,
            dir_mode: config.storage.dir_mode,
            directory_policy: DirectoryPolicy::from_claim_setting(
                config.storage.claim_new_directories,
            ),
            auth_delay: Duration::from_millis(config.auth.delay_ms),
            max_auth_attempts: config.auth.max_attempts,
            handshake_timeout: Duration::from_secs(config.server.handshake_timeout_secs),
            idle_grace: config
                .server
                .exit_when_idle
                .then(|| Duration::from_secs(config.server.idle_grace_secs)),
        }
    }
}

/// Future returned by [`Acceptor::accept`].
pub type AcceptFuture<'a, S> = Pin<Box<dyn Future<Output = io::Result<(S, String)>> + Send + 'a>>;

/// A source of incoming connections.
pub trait Acceptor: Send + 'static {
    /// Stream type of accepted connections.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Waits for the next connection and returns it with a peer label.
    fn accept(&mut self) -> AcceptFuture<'_, Self::Stream>;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> AcceptFuture<'_, TcpStream> {
        Box::pin(async move {
            let (stream, addr) = TcpListener::accept(self).await?;
            Ok((stream, addr.to_string()))
        })
    }
}

/// In-process acceptor fed by a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    incoming: mpsc::Receiver<tokio::io::DuplexStream>,
    accepted: usize,
}

/// Client side of a [`MemoryAcceptor`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    outgoing: mpsc::Sender<tokio::io::DuplexStream>,
}

/// Creates a connected in-memory acceptor and connector pair.
pub fn memory_pair() -> (MemoryConnector, MemoryAcceptor) {
    let (outgoing, incoming) = mpsc::channel(16);
    (
        MemoryConnector { outgoing },
        MemoryAcceptor {
            incoming,
            accepted: 0,
        },
    )
}

impl MemoryConnector {
    /// Opens a new connection to the acceptor.
    pub async fn connect(&self) -> io::Result<tokio::io::DuplexStream> {
        let (client, server) = tokio::io::duplex(256 * 1024);
        self.outgoing
            .send(server)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "acceptor closed"))?;
        Ok(client)
    }
}

impl Acceptor for MemoryAcceptor {
    type Stream = tokio::io::DuplexStream;

    fn accept(&mut self) -> AcceptFuture<'_, Self::Stream> {
        Box::pin(async move {
            match self.incoming.recv().await {
                Some(stream) => {
                    self.accepted += 1;
                    Ok((stream, format!("memory-{}", self.accepted)))
                }
                // No connector left; wait for shutdown.
                None => std::future::pending().await,
            }
        })
    }
}

struct Inner {
    config: ServerConfig,
    confiner: Arc<PathConfiner>,
    state: RwLock<ServerState>,
    active: AtomicUsize,
    /// Bumped on every accepted connection; an idle timer only fires if
    /// the epoch it started in is still current.
    idle_epoch: AtomicU64,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    event_tx: broadcast::Sender<ServerEvent>,
}

/// The file-drop server. Cheap to clone; clones share one server.
#[derive(Clone)]
pub struct DropServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DropServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropServer")
            .field("root", &self.inner.confiner.root())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

impl DropServer {
    /// Creates a server in the `Idle` state.
    ///
    /// The root is canonicalized so that confinement compares against the
    /// real directory.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let metadata = match std::fs::metadata(&config.root) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ServerError::RootMissing(config.root.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_dir() {
            return Err(ServerError::RootNotDirectory(config.root.clone()));
        }

        let root = config.root.canonicalize()?;
        let confiner = Arc::new(PathConfiner::new(&root)?);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            root = %root.display(),
            user = %config.credential.username(),
            host_key = %config.host_key.fingerprint(),
            "server configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                confiner,
                state: RwLock::new(ServerState::Idle),
                active: AtomicUsize::new(0),
                idle_epoch: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                event_tx,
            }),
        })
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.inner.state.read().await
    }

    /// Returns the number of connections currently being handled.
    pub fn active_connections(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Returns a receiver for server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Returns the confined data root.
    pub fn root(&self) -> &std::path::Path {
        self.inner.confiner.root()
    }

    /// Binds `endpoint` and serves until closed.
    pub async fn serve_tcp(&self, endpoint: &str) -> Result<(), ServerError> {
        let listener = TcpListener::bind(endpoint).await?;
        info!(addr = %listener.local_addr()?, "listening");
        self.serve(listener).await
    }

    /// Serves on an already bound listener, e.g. one adopted from systemd.
    pub async fn serve_std(&self, listener: std::net::TcpListener) -> Result<(), ServerError> {
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        info!(addr = %listener.local_addr()?, "serving on inherited listener");
        self.serve(listener).await
    }

    /// Runs the accept loop on `acceptor` until closed, then drains.
    pub async fn serve<A: Acceptor>(&self, mut acceptor: A) -> Result<(), ServerError> {
        {
            let mut state = self.inner.state.write().await;
            if *state != ServerState::Idle {
                return Err(ServerError::InvalidState(*state));
            }
            *state = ServerState::Serving;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::Serving));
        info!("server accepting connections");

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = acceptor.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept failed, retrying");
                        tokio::select! {
                            _ = self.inner.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                        }
                    }
                },
            }
        }

        drop(acceptor);
        debug!(
            active = self.active_connections(),
            "listener closed, draining connections"
        );
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        *self.inner.state.write().await = ServerState::Stopped;
        self.emit_event(ServerEvent::StateChanged(ServerState::Stopped));
        info!("server stopped");
        Ok(())
    }

    /// Requests a graceful stop. No-op unless serving.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.write().await;
            if *state != ServerState::Serving {
                debug!(state = ?*state, "close ignored");
                return;
            }
            *state = ServerState::Stopping;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::Stopping));
        info!("server stopping");
        self.inner.shutdown.cancel();
    }

    fn spawn_connection<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.inner.idle_epoch.fetch_add(1, Ordering::SeqCst);
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        info!(peer = %peer, active, "connection accepted");
        self.emit_event(ServerEvent::ConnectionOpened { peer: peer.clone() });

        let server = self.clone();
        self.inner.tasks.spawn(async move {
            match server.handle_connection(stream, &peer).await {
                Ok(()) => debug!(peer = %peer, "connection finished"),
                Err(e) => info!(peer = %peer, error = %e, "connection ended with error"),
            }
            server.connection_finished(peer);
        });
    }

    fn connection_finished(&self, peer: String) {
        let remaining = self.inner.active.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(peer = %peer, remaining, "connection closed");
        self.emit_event(ServerEvent::ConnectionClosed { peer, remaining });

        if remaining != 0 {
            return;
        }
        if let Some(grace) = self.inner.config.idle_grace {
            let epoch = self.inner.idle_epoch.load(Ordering::SeqCst);
            let server = self.clone();
            tokio::spawn(async move { server.idle_timer(grace, epoch).await });
        }
    }

    /// Closes the server if no connection arrived within `grace`.
    async fn idle_timer(&self, grace: Duration, epoch: u64) {
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => {}
            _ = tokio::time::sleep(grace) => {
                let current = self.inner.idle_epoch.load(Ordering::SeqCst);
                if current == epoch && self.active_connections() == 0 {
                    info!(grace_secs = grace.as_secs_f64(), "idle, shutting down");
                    self.close().await;
                } else {
                    debug!("new connection arrived during idle grace");
                }
            }
        }
    }

    async fn handle_connection<S>(&self, stream: S, peer: &str) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let config = &self.inner.config;
        let timeout = config.handshake_timeout;
        let login = tokio::time::timeout(timeout, self.login(stream, peer));
        let channel = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return Ok(()),
            result = login => result.map_err(|_| TransportError::HandshakeTimeout(timeout))??,
        };
        let Some(mut channel) = channel else {
            return Ok(());
        };

        let gateway = FilesystemGateway::new(Arc::clone(&self.inner.confiner));
        let tracker = SessionOwnershipTracker::new(gateway, config.directory_policy);
        let dispatcher = OperationDispatcher::new(tracker, config.file_mode, config.dir_mode);
        info!(peer = %peer, "file-transfer session started");

        FileTransferSession::new(dispatcher)
            .run(&mut channel, self.inner.shutdown.child_token())
            .await?;

        let _ = channel.shutdown().await;
        Ok(())
    }

    /// Runs the handshake, authentication and subsystem negotiation.
    /// Returns `None` when the peer gave up or was refused.
    async fn login<S>(
        &self,
        stream: S,
        peer: &str,
    ) -> Result<Option<SecureChannel<S>>, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut channel = SecureChannel::accept(stream, &self.inner.config.host_key).await?;
        debug!(peer = %peer, "secure channel established");

        if !self.authenticate(&mut channel, peer).await? {
            return Ok(None);
        }
        if !self.negotiate_subsystem(&mut channel, peer).await? {
            return Ok(None);
        }
        Ok(Some(channel))
    }

    /// Password authentication. Every attempt waits the same fixed delay
    /// before its answer, whatever the outcome.
    async fn authenticate<S>(
        &self,
        channel: &mut SecureChannel<S>,
        peer: &str,
    ) -> Result<bool, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let config = &self.inner.config;
        let mut remaining = config.max_auth_attempts;

        while remaining > 0 {
            let Some(message) = self.recv_or_shutdown(channel).await? else {
                return Ok(false);
            };
            let request = match message {
                Message::AuthRequest(request) => request,
                Message::Disconnect(_) => return Ok(false),
                other => {
                    warn!(peer = %peer, message = ?other, "message before authentication");
                    return Ok(false);
                }
            };

            let deadline = Instant::now() + config.auth_delay;
            let accepted = config.credential.verify(&request.username, &request.password);
            tokio::time::sleep_until(deadline).await;

            remaining -= 1;
            channel
                .send(Message::AuthResult(AuthResult {
                    accepted,
                    remaining_attempts: remaining,
                }))
                .await?;

            if accepted {
                info!(peer = %peer, "authenticated");
                return Ok(true);
            }
            info!(peer = %peer, remaining, "authentication rejected");
            self.emit_event(ServerEvent::AuthenticationFailed {
                peer: peer.to_string(),
            });
        }

        channel
            .send(Message::Disconnect(Disconnect {
                reason: "too many authentication failures".to_string(),
            }))
            .await?;
        Ok(false)
    }

    /// Accepts one `session` channel, then waits for a subsystem request
    /// naming the file-transfer subsystem. Everything else is rejected and
    /// the wait continues.
    async fn negotiate_subsystem<S>(
        &self,
        channel: &mut SecureChannel<S>,
        peer: &str,
    ) -> Result<bool, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut session_open = false;

        loop {
            let Some(message) = self.recv_or_shutdown(channel).await? else {
                return Ok(false);
            };
            match message {
                Message::ChannelOpen(open) => {
                    let accepted = !session_open && open.channel_type == SESSION_CHANNEL;
                    if accepted {
                        session_open = true;
                    } else {
                        debug!(peer = %peer, channel_type = %open.channel_type, "channel rejected");
                    }
                    channel
                        .send(Message::ChannelOpenResult(ChannelOpenResult {
                            accepted,
                            reason: (!accepted).then(|| "unsupported channel".to_string()),
                        }))
                        .await?;
                }
                Message::ChannelRequest(request) => {
                    let accepted = session_open && request.is_file_transfer();
                    if !accepted {
                        debug!(
                            peer = %peer,
                            request_type = %request.request_type,
                            name = ?request.name,
                            "channel request rejected"
                        );
                    }
                    channel
                        .send(Message::ChannelRequestResult(ChannelRequestResult { accepted }))
                        .await?;
                    if accepted {
                        return Ok(true);
                    }
                }
                Message::Disconnect(_) => return Ok(false),
                other => {
                    warn!(peer = %peer, message = ?other, "unexpected message before subsystem");
                    return Ok(false);
                }
            }
        }
    }

    async fn recv_or_shutdown<S>(
        &self,
        channel: &mut SecureChannel<S>,
    ) -> Result<Option<Message>, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => Ok(None),
            message = channel.recv() => message,
        }
    }

    fn emit_event(&self, event: ServerEvent) {
        let _ = self.inner.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> ServerConfig {
        let mut config = ServerConfig::new(
            Credential::from_password("tester", "secret"),
            HostIdentity::generate(),
            dir.path(),
        );
        config.auth_delay = Duration::from_millis(10);
        config
    }

    struct FlakyAcceptor {
        failures: usize,
        inner: MemoryAcceptor,
    }

    impl Acceptor for FlakyAcceptor {
        type Stream = tokio::io::DuplexStream;

        fn accept(&mut self) -> AcceptFuture<'_, Self::Stream> {
            if self.failures > 0 {
                self.failures -= 1;
                return Box::pin(async {
                    Err(io::Error::new(io::ErrorKind::Other, "transient"))
                });
            }
            self.inner.accept()
        }
    }

    #[tokio::test]
    async fn test_missing_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.root = dir.path().join("missing");
        assert!(matches!(
            DropServer::new(config),
            Err(ServerError::RootMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_file_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        let mut config = test_config(&dir);
        config.root = file;
        assert!(matches!(
            DropServer::new(config),
            Err(ServerError::RootNotDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_close_when_idle_is_noop() {
        let dir = TempDir::new().unwrap();
        let server = DropServer::new(test_config(&dir)).unwrap();

        server.close().await;
        assert_eq!(server.state().await, ServerState::Idle);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let dir = TempDir::new().unwrap();
        let server = DropServer::new(test_config(&dir)).unwrap();
        let mut events = server.subscribe();
        let (_connector, acceptor) = memory_pair();

        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(acceptor).await }
        });

        assert_eq!(
            events.recv().await.unwrap(),
            ServerEvent::StateChanged(ServerState::Serving)
        );
        assert_eq!(server.state().await, ServerState::Serving);

        server.close().await;
        serving.await.unwrap().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ServerEvent::StateChanged(ServerState::Stopping)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ServerEvent::StateChanged(ServerState::Stopped)
        );
        assert_eq!(server.state().await, ServerState::Stopped);

        // Stopped is terminal.
        server.close().await;
        assert_eq!(server.state().await, ServerState::Stopped);
        let (_connector, acceptor) = memory_pair();
        assert!(matches!(
            server.serve(acceptor).await,
            Err(ServerError::InvalidState(ServerState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_accept_errors_are_retried() {
        let dir = TempDir::new().unwrap();
        let server = DropServer::new(test_config(&dir)).unwrap();
        let mut events = server.subscribe();
        let (connector, inner) = memory_pair();
        let acceptor = FlakyAcceptor { failures: 1, inner };

        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(acceptor).await }
        });
        let _stream = connector.connect().await.unwrap();

        loop {
            if let ServerEvent::ConnectionOpened { peer } = events.recv().await.unwrap() {
                assert_eq!(peer, "memory-1");
                break;
            }
        }

        server.close().await;
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut config = Config::default();
        config.server.exit_when_idle = true;
        config.server.idle_grace_secs = 7;
        config.storage.claim_new_directories = false;
        config.auth.delay_ms = 250;

        let server_config = ServerConfig::from_config(
            &config,
            Credential::from_password("tester", "secret"),
            HostIdentity::generate(),
        );
        assert_eq!(server_config.idle_grace, Some(Duration::from_secs(7)));
        assert_eq!(server_config.directory_policy, DirectoryPolicy::Unclaimed);
        assert_eq!(server_config.auth_delay, Duration::from_millis(250));
        assert_eq!(server_config.root, config.storage.root);

        config.server.exit_when_idle = false;
        let server_config = ServerConfig::from_config(
            &config,
            Credential::from_password("tester", "secret"),
            HostIdentity::generate(),
        );
        assert!(server_config.idle_grace.is_none());
    }
}
