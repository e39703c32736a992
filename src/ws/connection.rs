#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::ops::ControlFlow;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use super::bus::ReadyBus;
use super::config::{ConnectionConfig, Hooks};
use super::error::WsError;
use super::gate::{Admission, admit};
use super::heartbeat::Heartbeat;
use super::traits::{CloseFrame, Connector, Events, TransportEvent, TransportHandle};
use crate::Result;
use crate::error::Error;

/// Connection state tracking, mirrored from transport events.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in progress
    Connecting,
    /// Handshake completed
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// The connection is shutting down
    Closing,
    /// No usable connection
    Closed {
        /// Status code of the last closure, `None` if the attempt never produced a handle
        code: Option<u16>,
    },
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Snapshot of a [`ConnectionManager`]'s internals, published after every event.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    /// Consecutive reconnects since the last successful open
    pub attempts: u32,
    /// A reconnect timer is scheduled and has not fired yet
    pub reconnect_pending: bool,
    pub heartbeat_active: bool,
    /// Sends and [`ConnectionManager::ready`] calls waiting for the next ready signal
    pub pending_ready: usize,
    /// Identifier of the current connection attempt, starting at 1
    pub generation: u64,
    /// [`ConnectionManager::close`] was called
    pub shut_down: bool,
}

/// Everything the event loop reacts to.
#[derive(Debug)]
pub(crate) enum Signal {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Send(String),
    Ready(oneshot::Sender<()>),
    Close,
    ReconnectDue,
    Heartbeat {
        generation: u64,
    },
}

/// Keeps one logical WebSocket channel alive.
///
/// The manager runs a single event loop task that owns the transport handle and every piece
/// of connection state:
/// - Opens the first connection as soon as it is created
/// - Reconnects after abnormal closures, waiting `n × reconnect_interval` before the n-th
///   consecutive retry (the first retry is immediate) and giving up once the count exceeds
///   `max_reconnect_attempts`
/// - Probes liveness with the heartbeat payload until the handshake is confirmed
/// - Holds outbound messages until the connection is ready, and revives a channel that gave
///   up retrying when something is sent through it
///
/// Dropping the manager closes it.
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(config, TungsteniteConnector::default());
///
/// // Queued until the handshake completes
/// manager.send_message(&json!({ "type": "subscribe", "channel": "ticker" }));
///
/// manager.ready().await?;
/// ```
#[derive(Debug)]
pub struct ConnectionManager {
    /// Sender half of the event loop's queue
    signal_tx: mpsc::UnboundedSender<Signal>,
    /// Latest published [`Status`]
    status_rx: watch::Receiver<Status>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the event loop.
    ///
    /// The first connection attempt is made before this returns. Must be called from within a
    /// tokio runtime.
    pub fn new<C: Connector>(config: ConnectionConfig, connector: C) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let mut machine = StateMachine {
            config,
            connector: Box::new(connector),
            signal_tx: signal_tx.clone(),
            status_tx: watch::Sender::new(Status {
                state: ConnectionState::Connecting,
                attempts: 0,
                reconnect_pending: false,
                heartbeat_active: false,
                pending_ready: 0,
                generation: 0,
                shut_down: false,
            }),
            handle: None,
            generation: 0,
            state: ConnectionState::Connecting,
            attempts: 0,
            reconnect: None,
            heartbeat: Heartbeat::default(),
            ready: ReadyBus::default(),
            shut_down: false,
        };
        machine.open();
        machine.publish_status();

        let status_rx = machine.status_tx.subscribe();
        tokio::spawn(machine.run(signal_rx));

        Self {
            signal_tx,
            status_rx,
        }
    }

    /// Create a manager that connects through
    /// [`TungsteniteConnector`](super::tungstenite::TungsteniteConnector).
    #[cfg(feature = "tungstenite")]
    pub fn connect(config: ConnectionConfig) -> Self {
        Self::new(config, super::tungstenite::TungsteniteConnector::default())
    }

    /// Send `payload` as a JSON text frame.
    ///
    /// The payload is encoded now; if the connection is not ready the encoded text is held
    /// until it is. Encoding failures are logged and the message is dropped.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                let error = Error::from(e);
                #[cfg(feature = "tracing")]
                tracing::error!("Unable to encode outbound message: {error}");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
            }
        }
    }

    /// Send an already encoded text frame with the same readiness rules as
    /// [`Self::send_message`].
    pub fn send_text<S: Into<String>>(&self, text: S) {
        self.signal(Signal::Send(text.into()));
    }

    /// Close the channel for good.
    ///
    /// Cancels a pending reconnect, drops messages still waiting for the connection and
    /// closes the current connection with the normal closure code. The final close event is
    /// still reported to `on_close`.
    pub fn close(&self) {
        self.signal(Signal::Close);
    }

    /// Wait until the connection is open.
    ///
    /// Resolves immediately when it already is, otherwise on the next ready signal.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::ConnectionClosed`] if the manager is closed first.
    pub async fn ready(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.signal_tx
            .send(Signal::Ready(tx))
            .map_err(|_e| WsError::ConnectionClosed)?;
        rx.await.map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    #[must_use]
    pub fn status(&self) -> Status {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes.
    ///
    /// A new value is published after every event the manager processes, which makes this
    /// the hook for detecting reconnections.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.status_rx.clone()
    }

    fn signal(&self, signal: Signal) {
        if self.signal_tx.send(signal).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Connection manager is closed, ignoring request");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        _ = self.signal_tx.send(Signal::Close);
    }
}

/// State owned by the event loop.
struct StateMachine {
    config: ConnectionConfig,
    connector: Box<dyn Connector>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    status_tx: watch::Sender<Status>,
    /// The only live handle, replaced on every reconnect
    handle: Option<Box<dyn TransportHandle>>,
    generation: u64,
    state: ConnectionState,
    attempts: u32,
    /// Scheduled reconnect; `Some` means a reconnect is in flight
    reconnect: Option<CancellationToken>,
    heartbeat: Heartbeat,
    ready: ReadyBus,
    shut_down: bool,
}

impl StateMachine {
    async fn run(mut self, mut signal_rx: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = signal_rx.recv().await {
            let flow = self.handle_signal(signal);
            self.publish_status();
            if flow.is_break() {
                break;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(generation = self.generation, "Connection manager stopped");
    }

    fn handle_signal(&mut self, signal: Signal) -> ControlFlow<()> {
        match signal {
            Signal::Transport { generation, event } if generation == self.generation => {
                return self.on_transport_event(event);
            }
            Signal::Transport { generation, event } => {
                #[cfg(feature = "tracing")]
                tracing::trace!(
                    generation,
                    current = self.generation,
                    ?event,
                    "Dropping event from a replaced connection"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = (generation, event);
            }
            Signal::Send(text) => self.on_send(text),
            Signal::Ready(tx) => self.on_ready_request(tx),
            Signal::Close => return self.on_close_request(),
            Signal::ReconnectDue => self.on_reconnect_due(),
            Signal::Heartbeat { generation } => self.on_heartbeat(generation),
        }

        ControlFlow::Continue(())
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Closing => {
                if !matches!(self.state, ConnectionState::Closed { .. }) {
                    self.state = ConnectionState::Closing;
                }
            }
            TransportEvent::Message(frame) => {
                if !frame.is_empty() {
                    self.config.hooks().message(&frame);
                }
            }
            TransportEvent::Close(frame) => return self.on_closed(&frame),
            TransportEvent::Error(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(generation = self.generation, "WebSocket error: {error}");
                self.config.hooks().errored(&error);
                self.heartbeat.stop();
            }
        }

        ControlFlow::Continue(())
    }

    fn on_open(&mut self) {
        if self.shut_down {
            return;
        }

        self.attempts = 0;
        self.heartbeat.stop();
        self.state = ConnectionState::Open {
            since: Instant::now(),
        };

        if let Some(handle) = self.handle.as_deref_mut() {
            let fired = self.ready.publish(handle);
            #[cfg(feature = "tracing")]
            tracing::info!(
                generation = self.generation,
                flushed = fired,
                "WebSocket connection open"
            );
            #[cfg(not(feature = "tracing"))]
            let _ = fired;
        }

        self.config.hooks().opened();
    }

    fn on_closed(&mut self, frame: &CloseFrame) -> ControlFlow<()> {
        #[cfg(feature = "tracing")]
        {
            if frame.code == self.config.normal_close_code() {
                tracing::debug!(code = frame.code, reason = %frame.reason, "WebSocket closed");
            } else {
                tracing::warn!(
                    code = frame.code,
                    reason = %frame.reason,
                    "WebSocket closed abnormally"
                );
            }
        }

        self.config.hooks().closed(frame);
        self.heartbeat.stop();
        self.handle = None;
        self.state = ConnectionState::Closed {
            code: Some(frame.code),
        };

        if self.shut_down {
            return ControlFlow::Break(());
        }

        self.recover(Some(frame.code));
        ControlFlow::Continue(())
    }

    fn on_send(&mut self, text: String) {
        if self.shut_down {
            #[cfg(feature = "tracing")]
            tracing::warn!("Connection manager is closed, dropping outbound message");
            return;
        }

        match admit(
            self.state,
            self.attempts,
            self.config.max_reconnect_attempts(),
        ) {
            Admission::SendNow => {
                if let Some(handle) = self.handle.as_deref_mut() {
                    write(handle, &text, self.config.hooks());
                }
            }
            Admission::Wait => self.hold(text),
            Admission::Wake => {
                #[cfg(feature = "tracing")]
                tracing::info!(state = ?self.state, "Reviving connection for outbound message");
                self.attempts = 0;
                self.reconnect();
                self.hold(text);
            }
        }
    }

    fn hold(&mut self, text: String) {
        let hooks = self.config.hooks().clone();
        self.ready.subscribe(move |handle| write(handle, &text, &hooks));
    }

    fn on_ready_request(&mut self, tx: oneshot::Sender<()>) {
        if self.shut_down {
            return;
        }

        if self.state.is_open() {
            _ = tx.send(());
        } else {
            self.ready.subscribe(move |_| {
                _ = tx.send(());
            });
        }
    }

    fn on_close_request(&mut self) -> ControlFlow<()> {
        if self.shut_down {
            return ControlFlow::Continue(());
        }

        #[cfg(feature = "tracing")]
        tracing::info!(generation = self.generation, "Closing connection manager");

        self.shut_down = true;
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
        self.heartbeat.stop();
        let dropped = self.ready.clear();
        #[cfg(feature = "tracing")]
        {
            if dropped > 0 {
                tracing::warn!(dropped, "Dropping messages that were waiting for the connection");
            }
        }
        #[cfg(not(feature = "tracing"))]
        let _ = dropped;

        let Some(handle) = self.handle.as_deref_mut() else {
            return ControlFlow::Break(());
        };

        match handle.close(self.config.normal_close_code()) {
            Ok(()) => {
                self.state = ConnectionState::Closing;
                ControlFlow::Continue(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Unable to close WebSocket cleanly: {e}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.handle = None;
                self.state = ConnectionState::Closed { code: None };
                ControlFlow::Break(())
            }
        }
    }

    fn on_reconnect_due(&mut self) {
        if self.shut_down {
            return;
        }

        self.attempts = self.attempts.saturating_add(1);
        self.reconnect = None;
        self.open();
    }

    fn on_heartbeat(&mut self, generation: u64) {
        if generation != self.generation || !self.heartbeat.is_active() {
            return;
        }

        if let Some(handle) = self.handle.as_deref_mut() {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, "Sending heartbeat");
            if let Err(e) = handle.send(self.config.heartbeat_payload()) {
                #[cfg(feature = "tracing")]
                tracing::debug!(generation, "Heartbeat probe failed: {e}");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Replace the current handle with a fresh connection attempt.
    fn open(&mut self) {
        self.heartbeat.stop();
        self.handle = None;
        self.generation = self.generation.saturating_add(1);
        self.state = ConnectionState::Connecting;

        let address = self.config.address();
        #[cfg(feature = "tracing")]
        tracing::debug!(generation = self.generation, address, "Connecting");

        let connected = if address.trim().is_empty() {
            Err(Error::validation("address must not be empty"))
        } else {
            let events = Events::new(self.generation, self.signal_tx.clone());
            self.connector.connect(address, events)
        };
        match connected {
            Ok(handle) => {
                self.handle = Some(handle);
                self.heartbeat.start(
                    self.config.heartbeat_interval(),
                    self.generation,
                    self.signal_tx.clone(),
                );
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(address, "Unable to create WebSocket: {e}");
                self.config.hooks().errored(&e);
                self.state = ConnectionState::Closed { code: None };
                self.recover(None);
            }
        }
    }

    /// Decide whether a closure with `code` (`None` for a construction fault) is retried.
    fn recover(&mut self, code: Option<u16>) {
        let max = self.config.max_reconnect_attempts();

        if code == Some(self.config.normal_close_code()) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Normal closure, not reconnecting");
        } else if self.attempts <= max {
            self.reconnect();
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                attempts = self.attempts,
                max,
                "Reconnect attempts exhausted, staying closed"
            );
        }
    }

    /// Schedule [`Self::open`] after `attempts × reconnect_interval`. Single-flight.
    fn reconnect(&mut self) {
        if self.reconnect.is_some() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Reconnect already scheduled");
            return;
        }

        let delay = self.config.reconnect_delay(self.attempts);
        #[cfg(feature = "tracing")]
        tracing::info!(
            attempt = self.attempts.saturating_add(1),
            ?delay,
            "Scheduling reconnect"
        );

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let signal_tx = self.signal_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = sleep(delay) => {
                    _ = signal_tx.send(Signal::ReconnectDue);
                }
            }
        });

        self.reconnect = Some(token);
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(Status {
            state: self.state,
            attempts: self.attempts,
            reconnect_pending: self.reconnect.is_some(),
            heartbeat_active: self.heartbeat.is_active(),
            pending_ready: self.ready.len(),
            generation: self.generation,
            shut_down: self.shut_down,
        });
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
    }
}

/// Write `text` and report a failure to the error hook. Never retried.
fn write(handle: &mut dyn TransportHandle, text: &str, hooks: &Hooks) {
    if let Err(e) = handle.send(text) {
        #[cfg(feature = "tracing")]
        tracing::error!("Unable to send WebSocket message: {e}");
        hooks.errored(&e);
    }
}
