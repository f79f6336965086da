#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::io;

use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket peer
    Connection(TungsteniteError),
    /// Connection was closed, or refused during the handshake, with a close code
    Close {
        /// Close code reported by the peer or derived from the transport failure
        code: CloseCode,
        /// Human readable reason accompanying the code
        reason: String,
    },
    /// Operation timed out
    Timeout,
    /// WebSocket connection was closed
    ConnectionClosed,
    /// The send queue is full and the caller asked not to wait
    QueueFull,
}

impl WsError {
    /// Close code carried by this error, if it is a close-level failure.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Close { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error is a transport-level timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    pub(crate) fn from_close_frame(frame: CloseFrame) -> Self {
        Self::Close {
            code: frame.code,
            reason: frame.reason.as_str().to_owned(),
        }
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Close { code, reason } if reason.is_empty() => {
                write!(f, "WebSocket closed with code {}", u16::from(*code))
            }
            Self::Close { code, reason } => {
                write!(f, "WebSocket closed with code {}: {reason}", u16::from(*code))
            }
            Self::Timeout => write!(f, "WebSocket operation timed out"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::QueueFull => write!(f, "WebSocket send queue is full"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TungsteniteError> for WsError {
    fn from(e: TungsteniteError) -> Self {
        if let TungsteniteError::Io(io_error) = &e
            && io_error.kind() == io::ErrorKind::TimedOut
        {
            return Self::Timeout;
        }

        match e {
            TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed => {
                Self::ConnectionClosed
            }
            TungsteniteError::Tls(tls) => Self::Close {
                code: CloseCode::Tls,
                reason: tls.to_string(),
            },
            TungsteniteError::Capacity(capacity) => Self::Close {
                code: CloseCode::Size,
                reason: capacity.to_string(),
            },
            other => Self::Connection(other),
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<TungsteniteError> for crate::error::Error {
    fn from(e: TungsteniteError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::from(e))
    }
}
