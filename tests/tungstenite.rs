#![cfg(feature = "tungstenite")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WireCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing_subscriber::EnvFilter;
use ws_tether::error::Error;
use ws_tether::ws::{
    CloseFrame, ConnectionConfig, ConnectionManager, ConnectionState, Frame, Hooks, WsError,
};

use crate::common::recorder;

#[derive(Debug, Clone)]
enum Command {
    Text(String),
    Close(u16),
}

#[derive(Debug, PartialEq, Eq)]
enum Received {
    Text(String),
    Close(Option<u16>),
}

/// Mock WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    /// Commands applied to ALL connected clients
    command_tx: broadcast::Sender<Command>,
    /// Frames received from clients
    received_rx: mpsc::UnboundedReceiver<Received>,
    /// One entry per accepted connection
    connections_rx: mpsc::UnboundedReceiver<()>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<Received>();
        let (connections_tx, connections_rx) = mpsc::unbounded_channel::<()>();

        let broadcast_tx = command_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let mut command_rx = broadcast_tx.subscribe();
                // Only announce once commands can reach this connection
                drop(connections_tx.send(()));

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received_tx.send(Received::Text(text.to_string())));
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        let code = frame.map(|f| u16::from(f.code));
                                        drop(received_tx.send(Received::Close(code)));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = command_rx.recv() => {
                                let message = match command {
                                    Ok(Command::Text(text)) => Message::Text(text.into()),
                                    Ok(Command::Close(code)) => Message::Close(Some(WireCloseFrame {
                                        code: CloseCode::from(code),
                                        reason: "bye".into(),
                                    })),
                                    Err(_) => break,
                                };
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            received_rx,
            connections_rx,
        }
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    fn send(&self, text: &str) {
        drop(self.command_tx.send(Command::Text(text.to_owned())));
    }

    fn close_all(&self, code: u16) {
        drop(self.command_tx.send(Command::Close(code)));
    }

    async fn recv(&mut self) -> Option<Received> {
        timeout(Duration::from_secs(2), self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn accepted(&mut self) -> bool {
        timeout(Duration::from_secs(2), self.connections_rx.recv())
            .await
            .is_ok_and(|accepted| accepted.is_some())
    }
}

fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(address: String, hooks: Hooks) -> ConnectionConfig {
    init_tracing();

    ConnectionConfig::builder()
        .address(address)
        .max_reconnect_attempts(2)
        .reconnect_interval(Duration::from_millis(10))
        .hooks(hooks)
        .build()
}

#[tokio::test]
async fn message_sent_before_handshake_is_delivered() {
    let mut server = MockWsServer::start().await;
    let manager = ConnectionManager::connect(config(server.ws_url("/feed"), Hooks::default()));

    manager.send_message(&json!({ "type": "subscribe", "channel": "ticker" }));

    assert!(server.accepted().await);
    assert_eq!(
        server.recv().await,
        Some(Received::Text(
            r#"{"type":"subscribe","channel":"ticker"}"#.to_owned()
        ))
    );
    assert!(manager.state().is_open());
}

#[tokio::test]
async fn server_frames_reach_on_message() {
    let mut server = MockWsServer::start().await;
    let (on_message, mut messages) = recorder();
    let hooks = Hooks::default()
        .on_message(move |frame: &Frame| drop(on_message.send(frame.clone())));
    let manager = ConnectionManager::connect(config(server.ws_url("/"), hooks));

    manager.ready().await.unwrap();
    assert!(server.accepted().await);
    server.send("update");

    assert_eq!(messages.next().await, Frame::Text("update".to_owned()));
}

#[tokio::test]
async fn abnormal_server_close_reconnects() {
    let mut server = MockWsServer::start().await;
    let (on_close, mut closes) = recorder();
    let hooks = Hooks::default()
        .on_close(move |frame: &CloseFrame| drop(on_close.send(frame.code)));
    let manager = ConnectionManager::connect(config(server.ws_url("/"), hooks));

    manager.ready().await.unwrap();
    assert!(server.accepted().await);

    server.close_all(4000);

    assert_eq!(closes.next().await, 4000);
    assert!(server.accepted().await, "client must reconnect");
    manager.ready().await.unwrap();
    assert_eq!(manager.status().generation, 2);
}

#[tokio::test]
async fn manual_close_sends_normal_close_code() {
    let mut server = MockWsServer::start().await;
    let (on_close, mut closes) = recorder();
    let hooks = Hooks::default()
        .on_close(move |frame: &CloseFrame| drop(on_close.send(frame.code)));
    let manager = ConnectionManager::connect(config(server.ws_url("/"), hooks));

    manager.ready().await.unwrap();
    assert!(server.accepted().await);
    manager.close();

    assert_eq!(server.recv().await, Some(Received::Close(Some(1000))));
    assert_eq!(closes.next().await, 1000);
    assert!(
        !server.accepted().await,
        "a manually closed manager must not reconnect"
    );
}

#[tokio::test]
async fn invalid_address_is_reported_as_construction_fault() {
    let (on_error, mut errors) = recorder();
    let hooks = Hooks::default().on_error(move |error: &Error| {
        let invalid = matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::InvalidAddress { .. })
        );
        drop(on_error.send(invalid));
    });
    init_tracing();
    let manager = ConnectionManager::connect(
        ConnectionConfig::builder()
            .address("definitely not a url")
            .max_reconnect_attempts(0)
            .hooks(hooks)
            .build(),
    );

    assert!(errors.next().await);
    assert_eq!(manager.state(), ConnectionState::Closed { code: None });
}

#[tokio::test]
async fn unreachable_server_is_retried_then_abandoned() {
    // Reserve a port, then free it so nothing is listening
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let (on_close, mut closes) = recorder();
    let hooks = Hooks::default()
        .on_close(move |frame: &CloseFrame| drop(on_close.send(frame.code)));
    let manager = ConnectionManager::connect(config(format!("ws://{addr}"), hooks));

    for _ in 0..4 {
        assert_eq!(closes.next().await, 1006);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(closes.drain().is_empty(), "gives up after three reconnects");
    let status = manager.status();
    assert_eq!(status.attempts, 3);
    assert!(!status.reconnect_pending);
}
