//! The framed-socket capability connections are built on.
//!
//! A [`Socket`] is one established WebSocket, already split into a read half and a write half
//! so the reader and dispatcher can own one each. [`Dialer`] produces sockets for client
//! connections; server connections receive a socket the caller accepted itself.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::error::WsError;

#[async_trait]
pub trait SocketReader: Send + 'static {
    /// Wait for the next data message.
    async fn read_message(&mut self) -> Result<Vec<u8>, WsError>;
}

#[async_trait]
pub trait SocketWriter: Send + 'static {
    async fn write_message(&mut self, payload: &[u8]) -> Result<(), WsError>;

    /// Close the socket. Errors are ignored, the socket is discarded either way.
    async fn close(&mut self);
}

#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Open a socket to `url`, failing if the handshake takes longer than `handshake_timeout`.
    async fn dial(&self, url: &str, handshake_timeout: Duration) -> Result<Socket, WsError>;
}

/// Local and remote addresses of a socket, when the transport knows them.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub local: Option<SocketAddr>,
    pub peer: Option<SocketAddr>,
}

impl Endpoints {
    #[must_use]
    pub const fn new(local: Option<SocketAddr>, peer: Option<SocketAddr>) -> Self {
        Self { local, peer }
    }

    fn of(tcp: &TcpStream) -> Self {
        Self::new(tcp.local_addr().ok(), tcp.peer_addr().ok())
    }
}

pub struct Socket {
    reader: Box<dyn SocketReader>,
    writer: Box<dyn SocketWriter>,
    endpoints: Endpoints,
}

impl Socket {
    pub fn new<R: SocketReader, W: SocketWriter>(reader: R, writer: W, endpoints: Endpoints) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            endpoints,
        }
    }

    /// Wrap any tungstenite stream.
    pub fn from_stream<S>(stream: WebSocketStream<S>, endpoints: Endpoints) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = stream.split();
        Self::new(StreamReader { stream }, StreamWriter { sink }, endpoints)
    }

    #[must_use]
    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub(crate) fn into_parts(self) -> (Box<dyn SocketReader>, Box<dyn SocketWriter>, Endpoints) {
        (self.reader, self.writer, self.endpoints)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

/// Server side: a stream returned by `tokio_tungstenite::accept_async`.
impl From<WebSocketStream<TcpStream>> for Socket {
    fn from(stream: WebSocketStream<TcpStream>) -> Self {
        let endpoints = Endpoints::of(stream.get_ref());
        Self::from_stream(stream, endpoints)
    }
}

/// Client side: a stream returned by `tokio_tungstenite::connect_async`.
impl From<WebSocketStream<MaybeTlsStream<TcpStream>>> for Socket {
    fn from(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let endpoints = match stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => Endpoints::of(tcp),
            MaybeTlsStream::Rustls(tls) => Endpoints::of(tls.get_ref().0),
            _ => Endpoints::default(),
        };
        Self::from_stream(stream, endpoints)
    }
}

struct StreamReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> SocketReader for StreamReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Vec<u8>, WsError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    return Err(frame.map_or(WsError::ConnectionClosed, WsError::from_close_frame));
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite itself.
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(WsError::ConnectionClosed),
            }
        }
    }
}

struct StreamWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> SocketWriter for StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, payload: &[u8]) -> Result<(), WsError> {
        let message = match std::str::from_utf8(payload) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(payload.to_vec().into()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) {
        _ = self.sink.close().await;
    }
}

/// [`Dialer`] backed by `tokio_tungstenite::connect_async`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, url: &str, handshake_timeout: Duration) -> Result<Socket, WsError> {
        let (stream, _) = timeout(handshake_timeout, connect_async(url))
            .await
            .map_err(|_elapsed| WsError::Timeout)??;
        Ok(Socket::from(stream))
    }
}
