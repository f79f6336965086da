#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::error::WsError;
use super::log::{Level, LogContext, Logger};
use super::registry::RegistryInner;
use super::retry::{RetryAction, RetryPolicy};
use super::socket::{Dialer, Endpoints, Socket, SocketReader, SocketWriter};
use super::traits::Handler;
use crate::Result;
use crate::error::Error;

const LOG_PREFIX: &str = "[websocket]";

/// Upper bound on the graceful close handshake of a discarded socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket is bound yet, or a server connection's peer went away
    Idle,
    /// Dialing for the first time
    Connecting,
    /// A socket is installed and the reader and dispatcher are running
    Connected {
        /// When the socket was installed
        since: Instant,
    },
    /// Dialing again after the previous socket failed
    Reconnecting {
        /// Current dial attempt number
        attempt: u32,
    },
    /// Closed explicitly or out of retries. Terminal.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Item on the receive queue.
enum Inbound {
    Message(Vec<u8>),
    /// The reader of `session` hit an error and stopped.
    Failed { session: u64 },
}

/// Queues that outlive individual sockets. Moved into the dispatcher while a session runs
/// and handed back when it ends.
struct Queues {
    send_rx: mpsc::Receiver<Vec<u8>>,
    recv_tx: mpsc::Sender<Inbound>,
    recv_rx: mpsc::Receiver<Inbound>,
    pending: Option<Vec<u8>>,
}

enum SessionExit {
    /// The socket failed; a client dials again, a server gives up.
    Reconnect,
    /// Closed, or superseded by a newly bound socket.
    Stop,
}

enum Mode {
    Client {
        url: RwLock<String>,
        policy: RetryPolicy,
    },
    Server,
}

struct ConnectionInner {
    name: String,
    mode: Mode,
    handler: Arc<dyn Handler>,
    logger: Arc<dyn Logger>,
    send_tx: mpsc::Sender<Vec<u8>>,
    /// `None` once the connection can no longer deliver anything.
    queues: AsyncMutex<Option<Queues>>,
    /// Server socket waiting for [`Connection::accept`].
    socket: Mutex<Option<Socket>>,
    endpoints: RwLock<Endpoints>,
    quit: CancellationToken,
    /// Token of the running session, a child of `quit`.
    session: Mutex<CancellationToken>,
    sessions: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    registry: Weak<RegistryInner>,
}

/// A named, bidirectional message channel that may outlive any single socket.
///
/// Client connections own a dial supervisor that reconnects whenever the socket fails, for as
/// long as the retry budget allows. Server connections run on a socket supplied by the caller
/// and serve it from [`Connection::accept`] until the peer goes away.
///
/// Handles are cheap to clone; clones refer to the same connection and compare equal.
///
/// ```ignore
/// let registry = Registry::default();
/// let connection = registry.connect_as_client(
///     "feed",
///     "ws://127.0.0.1:8080",
///     Config::default(),
///     |_: &Connection, payload: Vec<u8>| println!("{}", String::from_utf8_lossy(&payload)),
/// )?;
///
/// connection.send(b"hello".to_vec()).await?;
/// connection.close();
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn client(
        name: &str,
        url: String,
        config: Config,
        handler: Arc<dyn Handler>,
        logger: Arc<dyn Logger>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        let mode = Mode::Client {
            url: RwLock::new(url),
            policy: config.into(),
        };
        Self::new(name, mode, config.queue_size, None, handler, logger, registry)
    }

    pub(crate) fn server(
        name: &str,
        socket: Option<Socket>,
        queue_size: usize,
        handler: Arc<dyn Handler>,
        logger: Arc<dyn Logger>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self::new(name, Mode::Server, queue_size, socket, handler, logger, registry)
    }

    fn new(
        name: &str,
        mode: Mode,
        queue_size: usize,
        socket: Option<Socket>,
        handler: Arc<dyn Handler>,
        logger: Arc<dyn Logger>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        let (send_tx, send_rx) = mpsc::channel(queue_size);
        let (recv_tx, recv_rx) = mpsc::channel(queue_size);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let endpoints = socket.as_ref().map(Socket::endpoints).unwrap_or_default();
        let quit = CancellationToken::new();

        Self {
            inner: Arc::new(ConnectionInner {
                name: name.to_owned(),
                mode,
                handler,
                logger,
                send_tx,
                queues: AsyncMutex::new(Some(Queues {
                    send_rx,
                    recv_tx,
                    recv_rx,
                    pending: None,
                })),
                socket: Mutex::new(socket),
                endpoints: RwLock::new(endpoints),
                session: Mutex::new(quit.child_token()),
                quit,
                sessions: AtomicU64::new(0),
                state_tx,
                registry,
            }),
        }
    }

    /// Spawn the dial supervisor of a client connection.
    pub(crate) fn start(&self, dialer: Arc<dyn Dialer>) {
        tokio::spawn(self.clone().supervise(dialer));
    }

    /// Install a newly accepted socket on a server connection, retiring the running session.
    pub(crate) fn rebind(&self, socket: Socket) -> Result<()> {
        if self.is_client() {
            return Err(Error::validation(format!(
                "connection {} is a client connection and cannot be rebound",
                self.inner.name
            )));
        }

        {
            let mut slot = self
                .inner
                .socket
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = Some(socket);
            self.inner
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cancel();
        }
        self.log(Level::Debug, "rebound to a new socket");

        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// URL currently dialed by a client connection; `None` for server connections.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        match &self.inner.mode {
            Mode::Client { url, .. } => {
                Some(url.read().unwrap_or_else(PoisonError::into_inner).clone())
            }
            Mode::Server => None,
        }
    }

    #[must_use]
    pub fn is_client(&self) -> bool {
        matches!(self.inner.mode, Mode::Client { .. })
    }

    /// Addresses of the most recently installed socket.
    #[must_use]
    pub fn endpoints(&self) -> Endpoints {
        *self
            .inner
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Queue `payload` for delivery, waiting while the send queue is full.
    ///
    /// Success means the payload was queued, not delivered. Fails once the connection is
    /// closed or has run out of retries.
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        if self.inner.quit.is_cancelled() {
            return Err(WsError::ConnectionClosed.into());
        }

        tokio::select! {
            () = self.inner.quit.cancelled() => Err(WsError::ConnectionClosed.into()),
            sent = self.inner.send_tx.send(payload) => {
                sent.map_err(|_e| Error::from(WsError::ConnectionClosed))
            }
        }
    }

    /// Queue `payload` without waiting; fails with [`WsError::QueueFull`] when the queue is full.
    pub fn try_send(&self, payload: Vec<u8>) -> Result<()> {
        if self.inner.quit.is_cancelled() {
            return Err(WsError::ConnectionClosed.into());
        }

        self.inner.send_tx.try_send(payload).map_err(|e| {
            Error::from(match e {
                TrySendError::Full(_) => WsError::QueueFull,
                TrySendError::Closed(_) => WsError::ConnectionClosed,
            })
        })
    }

    /// Serve the bound socket of a server connection.
    ///
    /// Runs the reader and dispatcher and returns once the peer goes away, the connection is
    /// closed, or a new socket is bound under the same name. A later call serves the socket
    /// bound since; calls are serialized.
    pub async fn accept(&self) {
        if self.is_client() {
            self.log(Level::Error, "accept called on a client connection");
            return;
        }

        let mut slot = self.inner.queues.lock().await;
        let Some(queues) = slot.take() else {
            return;
        };
        let Some((socket, token)) = self.claim_socket() else {
            self.log(Level::Error, "accept called without a bound socket");
            *slot = Some(queues);
            return;
        };

        self.set_endpoints(socket.endpoints());
        let (queues, _) = self.run_session(socket, queues, token).await;

        if self.inner.quit.is_cancelled() {
            *slot = None;
        } else {
            *slot = queues;
            self.set_state(ConnectionState::Idle);
            self.log(Level::Info, "session ended");
        }
    }

    /// Close the connection: unregister it, stop its workers and close its socket.
    ///
    /// Messages still queued are discarded. Calling this more than once has no further effect.
    pub fn close(&self) {
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove_connection(self);
        }

        let first = !self.inner.quit.is_cancelled();
        self.inner.quit.cancel();
        drop(self.take_socket());
        if let Ok(mut queues) = self.inner.queues.try_lock() {
            *queues = None;
        }
        self.set_state(ConnectionState::Closed);

        if first {
            self.log(Level::Info, "closed");
        }
    }

    /// Dial supervisor: owns the queues for the connection's whole life.
    async fn supervise(self, dialer: Arc<dyn Dialer>) {
        let Some(policy) = self.policy() else {
            return;
        };

        let mut slot = self.inner.queues.lock().await;
        let mut reconnecting = false;

        while let Some(socket) = self.connect(dialer.as_ref(), policy, reconnecting).await {
            self.set_endpoints(socket.endpoints());
            self.log(
                Level::Info,
                if reconnecting {
                    "reconnect succeeded"
                } else {
                    "connect succeeded"
                },
            );

            let Some(queues) = slot.take() else {
                break;
            };
            let token = self.begin_session();
            let (queues, exit) = self.run_session(socket, queues, token).await;
            *slot = queues;

            if matches!(exit, SessionExit::Stop) || slot.is_none() {
                break;
            }

            reconnecting = true;
            self.set_state(ConnectionState::Reconnecting { attempt: 0 });
        }

        *slot = None;
        drop(slot);
        self.close();
    }

    /// Dial until a socket is established, the retry budget runs out, or the connection is
    /// closed.
    async fn connect(
        &self,
        dialer: &dyn Dialer,
        policy: RetryPolicy,
        reconnecting: bool,
    ) -> Option<Socket> {
        let mut attempts = 0_u32;

        loop {
            if self.inner.quit.is_cancelled() {
                return None;
            }
            if policy.exhausted(attempts) {
                self.log(
                    Level::Error,
                    &format!("giving up after {attempts} failed connect attempts"),
                );
                return None;
            }

            self.set_state(if reconnecting || attempts > 0 {
                ConnectionState::Reconnecting {
                    attempt: attempts.saturating_add(1),
                }
            } else {
                ConnectionState::Connecting
            });

            let url = self.url().unwrap_or_default();
            let result = tokio::select! {
                () = self.inner.quit.cancelled() => return None,
                result = dialer.dial(&url, policy.connect_timeout()) => result,
            };
            let error = match result {
                Ok(socket) => return Some(socket),
                Err(e) => e,
            };

            self.log(Level::Error, &format!("connect err: {error}"));

            match policy.classify(&url, &error) {
                RetryAction::UpgradeScheme(upgraded) => {
                    self.log(
                        Level::Info,
                        &format!("peer requires TLS, retrying with {upgraded}"),
                    );
                    self.set_url(upgraded);
                }
                RetryAction::Retry { delay } => {
                    attempts = attempts.saturating_add(1);
                    if !delay.is_zero() && !policy.exhausted(attempts) {
                        tokio::select! {
                            () = self.inner.quit.cancelled() => return None,
                            () = sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    /// Serve `socket` until the dispatcher stops. Callers install its endpoints first.
    ///
    /// Returns the queues, or `None` if they were lost with a panicking handler.
    async fn run_session(
        &self,
        socket: Socket,
        queues: Queues,
        token: CancellationToken,
    ) -> (Option<Queues>, SessionExit) {
        let session = self.inner.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let (reader, writer, _) = socket.into_parts();

        self.set_state(ConnectionState::Connected {
            since: Instant::now(),
        });

        let recv_tx = queues.recv_tx.clone();
        let reader = tokio::spawn(self.clone().read_loop(reader, recv_tx, session, token.clone()));
        let dispatcher = tokio::spawn(self.clone().dispatch(writer, queues, session, token.clone()));

        let joined = dispatcher.await;
        token.cancel();
        _ = reader.await;

        match joined {
            Ok((queues, mut writer, exit)) => {
                _ = timeout(CLOSE_TIMEOUT, writer.close()).await;
                (Some(queues), exit)
            }
            Err(e) => {
                self.log(Level::Fatal, &format!("dispatcher stopped abnormally: {e}"));
                self.close();
                (None, SessionExit::Stop)
            }
        }
    }

    /// Reader: moves socket messages onto the receive queue until the socket fails.
    async fn read_loop(
        self,
        mut reader: Box<dyn SocketReader>,
        recv_tx: mpsc::Sender<Inbound>,
        session: u64,
        token: CancellationToken,
    ) {
        loop {
            let inbound = tokio::select! {
                () = token.cancelled() => return,
                result = reader.read_message() => match result {
                    Ok(payload) => Inbound::Message(payload),
                    Err(e) => {
                        self.log(Level::Error, &format!("read err: {e}"));
                        Inbound::Failed { session }
                    }
                },
            };
            let failed = matches!(inbound, Inbound::Failed { .. });

            tokio::select! {
                () = token.cancelled() => return,
                sent = recv_tx.send(inbound) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }

            if failed {
                return;
            }
        }
    }

    /// Dispatcher: hands received messages to the handler and writes queued ones.
    async fn dispatch(
        self,
        mut writer: Box<dyn SocketWriter>,
        mut queues: Queues,
        session: u64,
        token: CancellationToken,
    ) -> (Queues, Box<dyn SocketWriter>, SessionExit) {
        if queues.pending.is_some() {
            let exit = tokio::select! {
                () = token.cancelled() => Some(SessionExit::Stop),
                written = self.flush(writer.as_mut(), &mut queues.pending) => {
                    (!written).then_some(SessionExit::Reconnect)
                }
            };
            if let Some(exit) = exit {
                return (queues, writer, exit);
            }
        }

        let exit = loop {
            tokio::select! {
                () = token.cancelled() => break SessionExit::Stop,
                Some(inbound) = queues.recv_rx.recv() => match inbound {
                    Inbound::Message(payload) => self.inner.handler.handle(&self, payload),
                    Inbound::Failed { session: failed } if failed == session => {
                        break SessionExit::Reconnect;
                    }
                    // Left behind by the reader of an earlier socket.
                    Inbound::Failed { .. } => {}
                },
                Some(payload) = queues.send_rx.recv() => {
                    queues.pending = Some(payload);
                    let written = tokio::select! {
                        () = token.cancelled() => break SessionExit::Stop,
                        written = self.flush(writer.as_mut(), &mut queues.pending) => written,
                    };
                    if !written {
                        break SessionExit::Reconnect;
                    }
                }
            }
        };

        (queues, writer, exit)
    }

    /// Write the message held in `pending`, clearing the slot once it is written or rejected
    /// as too big. Returns `false` when the socket failed; the message then stays in `pending`,
    /// as it does when the write is cancelled.
    async fn flush(&self, writer: &mut dyn SocketWriter, pending: &mut Option<Vec<u8>>) -> bool {
        let Some(payload) = pending.as_deref() else {
            return true;
        };

        match writer.write_message(payload).await {
            Ok(()) => {
                *pending = None;
                true
            }
            Err(e) if e.close_code() == Some(CloseCode::Size) => {
                self.log(
                    Level::Error,
                    &format!("dropping message of {} bytes: {e}", payload.len()),
                );
                *pending = None;
                true
            }
            Err(e) => {
                self.log(Level::Error, &format!("write err: {e}"));
                false
            }
        }
    }

    fn policy(&self) -> Option<RetryPolicy> {
        match &self.inner.mode {
            Mode::Client { policy, .. } => Some(*policy),
            Mode::Server => None,
        }
    }

    fn set_url(&self, upgraded: String) {
        if let Mode::Client { url, .. } = &self.inner.mode {
            *url.write().unwrap_or_else(PoisonError::into_inner) = upgraded;
        }
    }

    fn set_endpoints(&self, endpoints: Endpoints) {
        *self
            .inner
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner) = endpoints;
    }

    fn take_socket(&self) -> Option<Socket> {
        self.inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Take the bound server socket together with a fresh session token. A concurrent
    /// [`Connection::rebind`] either lands before and is served, or cancels the returned token.
    fn claim_socket(&self) -> Option<(Socket, CancellationToken)> {
        let mut slot = self
            .inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let socket = slot.take()?;
        Some((socket, self.begin_session()))
    }

    fn begin_session(&self) -> CancellationToken {
        let token = self.inner.quit.child_token();
        *self
            .inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    /// `Closed` is terminal and never overwritten.
    fn set_state(&self, state: ConnectionState) {
        self.inner.state_tx.send_if_modified(|current| {
            if current.is_closed() || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn log(&self, level: Level, message: &str) {
        self.inner.logger.log(level, self, message);
    }
}

impl LogContext for Connection {
    fn prefix(&self) -> String {
        LOG_PREFIX.to_owned()
    }

    fn suffix(&self) -> String {
        let endpoints = self.endpoints();
        let local = display_addr(endpoints.local);
        let peer = display_addr(endpoints.peer);

        match self.url() {
            Some(url) => format!(
                ", Websocket[{}] Url: {url} Client: {local} Server: {peer}",
                self.inner.name
            ),
            None => format!(
                ", Websocket[{}] Client: {peer} Server: {local}",
                self.inner.name
            ),
        }
    }
}

fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "-".to_owned(), |addr| addr.to_string())
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("url", &self.url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
