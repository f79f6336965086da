//! Client connection that keeps sending a counter to a WebSocket server.
//!
//! Start `echo_server` first, then run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example echo_client
//! ```
//!
//! Stop and restart the server while this runs: numbers sent while it is down are delivered
//! once the connection is re-established, as long as the retry budget lasts.

use std::time::Duration;

use tokio::time::sleep;
use tracing::info;
use wsconn::ws::{Config, Connection, Registry};

const URL: &str = "ws://127.0.0.1:8080";

fn handler(connection: &Connection, payload: Vec<u8>) {
    info!(
        connection = connection.name(),
        message = %String::from_utf8_lossy(&payload),
        "received"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let registry = Registry::default();
    let config = Config::builder()
        .connect_timeout(Duration::from_secs(3))
        .max_retries(3)
        .queue_size(1024)
        .build();
    let connection = registry.connect_as_client("a", URL, config, handler)?;

    let mut states = connection.state_receiver();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            info!(state = ?*states.borrow_and_update(), "connection state");
        }
    });

    for i in 0..100_000_u32 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            sent = connection.send(i.to_string().into_bytes()) => {
                if sent.is_err() {
                    info!("connection closed, stopping");
                    break;
                }
            }
        }
        sleep(Duration::from_millis(10)).await;
    }

    connection.close();
    Ok(())
}
