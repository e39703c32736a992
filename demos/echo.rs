//! Keeps a connection to an echo server alive and sends a numbered message every second.
//!
//! Messages sent while the connection is down are held and delivered after it comes back.
//!
//! Run with:
//! ```sh
//! RUST_LOG=debug cargo run --example echo -- wss://echo.websocket.org
//! ```
//!
use std::time::Duration;

use serde::Serialize;
use tracing::info;
use ws_tether::ws::{ConnectionConfig, ConnectionManager, Frame, Hooks};

#[derive(Serialize)]
struct Greeting<'a> {
    seq: u32,
    text: &'a str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let hooks = Hooks::default()
        .on_open(|| info!("connected"))
        .on_message(|frame: &Frame| info!(?frame, "echoed"))
        .on_close(|close| info!(code = close.code, reason = %close.reason, "closed"))
        .on_error(|error| info!(%error, "transport error"));

    let config = ConnectionConfig::builder()
        .address(address)
        .reconnect_interval(Duration::from_secs(1))
        .hooks(hooks)
        .build();
    let connection = ConnectionManager::connect(config);

    connection.ready().await?;

    for seq in 1..=5 {
        connection.send_message(&Greeting { seq, text: "hello" });
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    connection.close();
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}
