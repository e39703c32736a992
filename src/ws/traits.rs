//! Transport seam between the connection manager and a concrete socket implementation.

use tokio::sync::mpsc;

use super::connection::Signal;
use crate::Result;
use crate::error::Error;

/// Opens physical connections on behalf of a [`ConnectionManager`](super::ConnectionManager).
///
/// Every call to [`Connector::connect`] represents one connection attempt. The returned handle
/// must report its lifecycle through the supplied [`Events`]: exactly one of
/// [`Events::open`] or [`Events::close`] for the handshake, then any number of messages, and
/// finally [`Events::close`]. Errors may be reported at any point and are expected to be
/// followed by a close.
///
/// # Example
///
/// ```ignore
/// struct Loopback;
///
/// impl Connector for Loopback {
///     fn connect(&self, _address: &str, events: Events) -> Result<Box<dyn TransportHandle>> {
///         events.open();
///         Ok(Box::new(LoopbackHandle(events)))
///     }
/// }
/// ```
pub trait Connector: Send + Sync + 'static {
    /// Start a new connection attempt against `address`.
    ///
    /// Must not block. Failing here is a construction fault: no handle is retained and the
    /// manager treats it like an abnormal closure.
    fn connect(&self, address: &str, events: Events) -> Result<Box<dyn TransportHandle>>;
}

/// One physical connection attempt, exclusively owned by the connection manager.
pub trait TransportHandle: Send + 'static {
    /// Write a text frame.
    fn send(&mut self, text: &str) -> Result<()>;

    /// Begin closing the connection with the given status code.
    fn close(&mut self, code: u16) -> Result<()>;
}

/// An inbound data frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Frames without payload are not delivered to `on_message`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Binary(bytes) => bytes.is_empty(),
        }
    }
}

/// Status reported when a connection closes.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum TransportEvent {
    Open,
    Closing,
    Message(Frame),
    Close(CloseFrame),
    Error(Error),
}

/// Event sink handed to a [`Connector`] for one connection attempt.
///
/// Events are tagged with the attempt's generation, so anything reported after the manager
/// has moved on to a newer handle is discarded. Reporting after the manager shut down is a
/// no-op.
#[derive(Debug, Clone)]
pub struct Events {
    generation: u64,
    tx: mpsc::UnboundedSender<Signal>,
}

impl Events {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the connection attempt this sink belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The handshake completed and the connection is ready for traffic.
    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    /// The connection started an orderly shutdown that has not completed yet.
    pub fn closing(&self) {
        self.emit(TransportEvent::Closing);
    }

    pub fn message(&self, frame: Frame) {
        self.emit(TransportEvent::Message(frame));
    }

    pub fn close<S: Into<String>>(&self, code: u16, reason: S) {
        self.emit(TransportEvent::Close(CloseFrame::new(code, reason)));
    }

    pub fn error<E: Into<Error>>(&self, error: E) {
        self.emit(TransportEvent::Error(error.into()));
    }

    fn emit(&self, event: TransportEvent) {
        _ = self.tx.send(Signal::Transport {
            generation: self.generation,
            event,
        });
    }
}
