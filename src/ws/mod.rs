//! Named WebSocket connections.
//!
//! A [`Connection`] is a logical, named channel that survives socket failures. Callers look
//! connections up by name in a [`Registry`], queue outbound messages with
//! [`Connection::send`], and receive inbound messages through a [`Handler`].
//!
//! # Architecture
//!
//! Each connection runs up to three cooperating tasks:
//!
//! - **dial supervisor** (clients only): dials, redials on failure under a [`RetryPolicy`],
//!   and installs each new socket before any worker touches it;
//! - **reader**: moves socket messages onto the bounded receive queue;
//! - **dispatcher**: hands received messages to the handler and writes queued outbound
//!   messages. A message whose write failed is kept and written first on the next socket.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::default();
//! let connection = registry.connect_as_client("feed", "ws://127.0.0.1:8080", Config::default(), handler)?;
//!
//! // Same name, same connection
//! assert_eq!(connection, registry.connect_as_client("feed", "ws://ignored", Config::default(), handler)?);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod log;
pub mod registry;
pub mod retry;
pub mod socket;
pub mod traits;

pub use config::Config;
pub use connection::{Connection, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use log::{Level, LogContext, Logger, TracingLogger};
pub use registry::Registry;
pub use retry::{RetryAction, RetryPolicy};
pub use socket::{Dialer, Endpoints, Socket, SocketReader, SocketWriter, TungsteniteDialer};
pub use traits::*;
