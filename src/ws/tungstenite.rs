//! [`Connector`] backed by `tokio-tungstenite`.
#![expect(
    clippy::module_name_repetitions,
    reason = "The connector is named after the library it wraps"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WireCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use url::Url;

use super::error::WsError;
use super::traits::{Connector, Events, Frame, TransportHandle};
use crate::Result;

/// Status reported when a connection ends without a close handshake.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Opens `ws://` and `wss://` connections with `tokio-tungstenite`.
///
/// Each attempt runs in its own task. Dropping the returned handle tears the connection
/// down without reporting further events.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, address: &str, events: Events) -> Result<Box<dyn TransportHandle>> {
        let url = parse_address(address)?;
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(drive(url, outgoing_rx, events, Arc::clone(&open)));

        Ok(Box::new(TungsteniteHandle {
            outgoing_tx,
            open,
        }))
    }
}

fn parse_address(address: &str) -> Result<Url> {
    let invalid = |reason: String| WsError::InvalidAddress {
        address: address.to_owned(),
        reason,
    };

    let url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme `{scheme}`")).into()),
    }
}

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close(u16),
}

#[derive(Debug)]
struct TungsteniteHandle {
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    /// Set once the handshake completed, cleared when closing starts
    open: Arc<AtomicBool>,
}

impl TransportHandle for TungsteniteHandle {
    fn send(&mut self, text: &str) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(WsError::NotOpen.into());
        }

        self.outgoing_tx
            .send(Outgoing::Text(text.to_owned()))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    fn close(&mut self, code: u16) -> Result<()> {
        self.outgoing_tx
            .send(Outgoing::Close(code))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }
}

/// Run one connection attempt to completion, reporting through `events`.
async fn drive(
    url: Url,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    events: Events,
    open: Arc<AtomicBool>,
) {
    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                events.error(e);
                events.close(ABNORMAL_CLOSURE, "handshake failed");
                return;
            }
        },
        request = outgoing_rx.recv() => {
            // Text is refused before open, so this is a close request or a dropped handle
            if let Some(Outgoing::Close(code)) = request {
                events.close(code, "closed before handshake completed");
            }
            return;
        }
    };

    open.store(true, Ordering::Release);
    events.open();

    let (mut write, mut read) = ws_stream.split();
    let mut received_close: Option<(u16, String)> = None;
    let mut requested_close: Option<u16> = None;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(text = text.as_str(), "Received WebSocket text message");
                    events.message(Frame::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => events.message(Frame::Binary(bytes.to_vec())),
                Some(Ok(Message::Close(frame))) => {
                    open.store(false, Ordering::Release);
                    events.closing();
                    received_close = Some(frame.map_or((ABNORMAL_CLOSURE, String::new()), |f| {
                        (u16::from(f.code), f.reason.as_str().to_owned())
                    }));
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite itself
                }
                Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed))
                | None => break,
                Some(Err(e)) => {
                    open.store(false, Ordering::Release);
                    events.error(e);
                    break;
                }
            },

            request = outgoing_rx.recv() => match request {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        events.error(e);
                    }
                }
                Some(Outgoing::Close(code)) => {
                    open.store(false, Ordering::Release);
                    events.closing();
                    requested_close = Some(code);
                    let frame = WireCloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Unable to send close frame: {e}");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        break;
                    }
                }
                None => {
                    // The manager replaced or dropped this handle
                    _ = write.close().await;
                    return;
                }
            }
        }
    }

    open.store(false, Ordering::Release);
    let (code, reason) = received_close
        .or_else(|| requested_close.map(|code| (code, String::new())))
        .unwrap_or((ABNORMAL_CLOSURE, String::new()));
    events.close(code, reason);
}
