#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use wsconn::types::CloseCode;
use wsconn::ws::{
    Connection, ConnectionState, Dialer, Endpoints, Level, LogContext, Logger, Socket,
    SocketReader, SocketWriter, WsError,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Outcome of one dial attempt made through [`ScriptedDialer`].
pub enum Dial {
    /// Fail as if the TCP connection was refused
    Refuse,
    /// Fail with a transport timeout
    Timeout,
    /// Fail with a TLS-handshake close
    RequireTls,
    /// Succeed with this socket
    Connect(Socket),
    /// Succeed once the socket arrives on this channel
    Deferred(oneshot::Receiver<Socket>),
    /// Never complete
    Hang,
}

/// [`Dialer`] replaying a script of outcomes; refuses once the script is exhausted.
#[derive(Default)]
pub struct ScriptedDialer {
    script: Mutex<VecDeque<Dial>>,
    attempts: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedDialer {
    pub fn new(script: Vec<Dial>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            attempts: Mutex::default(),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, url: &str, _handshake_timeout: Duration) -> Result<Socket, WsError> {
        self.attempts
            .lock()
            .unwrap()
            .push((Instant::now(), url.to_owned()));
        let next = self.script.lock().unwrap().pop_front();

        match next.unwrap_or(Dial::Refuse) {
            Dial::Refuse => Err(WsError::ConnectionClosed),
            Dial::Timeout => Err(WsError::Timeout),
            Dial::RequireTls => Err(WsError::Close {
                code: CloseCode::Tls,
                reason: "TLS handshake required".to_owned(),
            }),
            Dial::Connect(socket) => Ok(socket),
            Dial::Deferred(rx) => rx.await.map_err(|_e| WsError::ConnectionClosed),
            Dial::Hang => std::future::pending().await,
        }
    }
}

/// How the next write on a [`MockPeer`]'s socket fails.
#[derive(Debug, Clone, Copy)]
pub enum WriteFault {
    Broken,
    TooBig,
    /// Never completes, like a write stuck behind a peer that stopped reading
    Stall,
}

/// Remote end of an in-memory socket.
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    faults: Arc<Mutex<VecDeque<WriteFault>>>,
    closed: watch::Receiver<bool>,
}

impl MockPeer {
    /// Deliver `payload` to the connection.
    pub fn push(&self, payload: &[u8]) {
        self.inbound
            .as_ref()
            .unwrap()
            .send(payload.to_vec())
            .unwrap();
    }

    /// Make the connection's next write fail.
    pub fn fail_next_write(&self, fault: WriteFault) {
        self.faults.lock().unwrap().push_back(fault);
    }

    /// Break the socket: the connection's reader sees an error.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Next payload the connection wrote to this peer.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        timeout(WAIT, self.outbound.recv()).await.ok().flatten()
    }

    /// Whether nothing arrives within `within`.
    pub async fn stays_silent(&mut self, within: Duration) -> bool {
        timeout(within, self.outbound.recv()).await.is_err()
    }

    /// Wait until the connection closed its end of the socket.
    pub async fn closed(&mut self) -> bool {
        timeout(WAIT, self.closed.wait_for(|closed| *closed))
            .await
            .is_ok()
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl SocketReader for MockReader {
    async fn read_message(&mut self) -> Result<Vec<u8>, WsError> {
        self.rx.recv().await.ok_or(WsError::ConnectionClosed)
    }
}

struct MockWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    faults: Arc<Mutex<VecDeque<WriteFault>>>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl SocketWriter for MockWriter {
    async fn write_message(&mut self, payload: &[u8]) -> Result<(), WsError> {
        let fault = self.faults.lock().unwrap().pop_front();
        match fault {
            Some(WriteFault::Broken) => Err(WsError::ConnectionClosed),
            Some(WriteFault::TooBig) => Err(WsError::Close {
                code: CloseCode::Size,
                reason: "message too big".to_owned(),
            }),
            Some(WriteFault::Stall) => std::future::pending().await,
            None => self
                .tx
                .send(payload.to_vec())
                .map_err(|_e| WsError::ConnectionClosed),
        }
    }

    async fn close(&mut self) {
        self.closed.send_replace(true);
    }
}

/// An in-memory socket and the peer on its other end.
pub fn socket_pair() -> (Socket, MockPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let faults = Arc::new(Mutex::new(VecDeque::new()));

    let socket = Socket::new(
        MockReader { rx: inbound_rx },
        MockWriter {
            tx: outbound_tx,
            faults: Arc::clone(&faults),
            closed: closed_tx,
        },
        Endpoints::new(
            Some("127.0.0.1:40000".parse().unwrap()),
            Some("127.0.0.1:8080".parse().unwrap()),
        ),
    );
    let peer = MockPeer {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        faults,
        closed: closed_rx,
    };

    (socket, peer)
}

/// [`Logger`] that keeps every line it is given.
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|(at, line)| *at == level && line.contains(needle))
    }
}

impl Logger for RecordingLogger {
    fn log(&self, level: Level, ctx: &dyn LogContext, message: &str) {
        self.lines.lock().unwrap().push((
            level,
            format!("{} {message}{}", ctx.prefix(), ctx.suffix()),
        ));
    }
}

/// Handler forwarding every payload to the returned receiver.
pub fn collecting_handler() -> (
    impl Fn(&Connection, Vec<u8>) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |_: &Connection, payload: Vec<u8>| {
        drop(tx.send(payload));
    };
    (handler, rx)
}

pub async fn recv_within(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Option<Vec<u8>> {
    timeout(WAIT, rx.recv()).await.ok().flatten()
}

/// Wait until `connection` reaches a state matching `predicate`.
pub async fn wait_for_state<F>(connection: &Connection, predicate: F) -> bool
where
    F: FnMut(&ConnectionState) -> bool,
{
    let mut states = connection.state_receiver();
    timeout(WAIT, states.wait_for(predicate)).await.is_ok_and(|r| r.is_ok())
}

pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}
