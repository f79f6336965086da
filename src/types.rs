//! Re-exported types from external crates for convenience.
//!
//! These types appear in this crate's public API and are re-exported here
//! so users don't need to add these dependencies to their `Cargo.toml`.

/// WebSocket close codes, as carried by [`crate::ws::WsError::Close`].
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
/// Stream type accepted by [`crate::ws::Socket::from_stream`].
pub use tokio_tungstenite::WebSocketStream;
/// Server-side handshake for turning an accepted TCP stream into a [`WebSocketStream`].
pub use tokio_tungstenite::accept_async;
