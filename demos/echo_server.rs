//! Server that binds every accepted WebSocket to the connection named `a`.
//!
//! A second client replaces the first one's socket; queued messages carry over. Run with:
//! ```sh
//! RUST_LOG=info cargo run --example echo_server
//! ```

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{info, warn};
use wsconn::types::accept_async;
use wsconn::ws::{Connection, Registry, Socket};

const ADDR: &str = "127.0.0.1:8080";
const NAME: &str = "a";

fn handler(connection: &Connection, payload: Vec<u8>) {
    info!(
        connection = connection.name(),
        message = %String::from_utf8_lossy(&payload),
        "received"
    );
}

async fn count_up(connection: Connection) {
    for i in 0..100_000_u32 {
        if connection.send(i.to_string().into_bytes()).await.is_err() {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let registry = Registry::default();
    let listener = TcpListener::bind(ADDR).await?;
    info!(addr = ADDR, "listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            accepted = listener.accept() => accepted?,
        };

        let ws_stream = match accept_async(stream).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                warn!(%peer, error = %e, "handshake failed");
                continue;
            }
        };

        let first = registry.get(NAME).is_none();
        let connection = registry.bind_as_server(NAME, Socket::from(ws_stream), 1024, handler)?;
        if first {
            tokio::spawn(count_up(connection.clone()));
        }

        tokio::spawn(async move { connection.accept().await });
    }

    for name in registry.names() {
        if let Some(connection) = registry.get(&name) {
            connection.close();
        }
    }

    Ok(())
}
