#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(unused, reason = "Not every test binary uses every helper")]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use ws_tether::Result;
use ws_tether::error::Error;
use ws_tether::ws::{ConnectionManager, Connector, Events, Status, TransportHandle};

/// How long helpers wait for something expected. Tests run on paused time, so this only
/// needs to exceed the longest timer involved.
pub const PATIENCE: Duration = Duration::from_secs(30);

/// What the manager wrote to a mock handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(u16),
}

/// One call to [`Connector::connect`].
#[derive(Debug)]
pub struct Attempt {
    pub address: String,
    pub at: Instant,
    pub events: Events,
    /// `None` when the connector was told to fail
    pub outbound: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl Attempt {
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        let outbound = self.outbound.as_mut()?;
        timeout(PATIENCE, outbound.recv()).await.ok().flatten()
    }

    /// True if nothing is written to this handle for `wait`. A dropped handle is silent.
    pub async fn silent_for(&mut self, wait: Duration) -> bool {
        let outbound = self.outbound.as_mut().unwrap();
        !matches!(timeout(wait, outbound.recv()).await, Ok(Some(_)))
    }
}

/// Receiving side of a [`MockConnector`].
#[derive(Debug)]
pub struct Attempts(mpsc::UnboundedReceiver<Attempt>);

impl Attempts {
    pub async fn next(&mut self) -> Attempt {
        timeout(PATIENCE, self.0.recv())
            .await
            .expect("connection attempt within timeout")
            .expect("connector alive")
    }

    /// True if no connection attempt is made for `wait`. A stopped manager makes none.
    pub async fn none_within(&mut self, wait: Duration) -> bool {
        !matches!(timeout(wait, self.0.recv()).await, Ok(Some(_)))
    }
}

/// Connector that hands every attempt to the test instead of opening a socket.
#[derive(Debug, Clone)]
pub struct MockConnector {
    attempts_tx: mpsc::UnboundedSender<Attempt>,
    fail_connect: Arc<AtomicBool>,
    reject_sends: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> (Self, Attempts) {
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let connector = Self {
            attempts_tx,
            fail_connect: Arc::new(AtomicBool::new(false)),
            reject_sends: Arc::new(AtomicBool::new(false)),
        };
        (connector, Attempts(attempts_rx))
    }

    /// Every `connect` call fails, as if the address were malformed.
    #[must_use]
    pub fn failing(self) -> Self {
        self.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Handles refuse every `send`.
    #[must_use]
    pub fn rejecting_sends(self) -> Self {
        self.reject_sends.store(true, Ordering::SeqCst);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&self, address: &str, events: Events) -> Result<Box<dyn TransportHandle>> {
        let mut attempt = Attempt {
            address: address.to_owned(),
            at: Instant::now(),
            events,
            outbound: None,
        };

        if self.fail_connect.load(Ordering::SeqCst) {
            drop(self.attempts_tx.send(attempt));
            return Err(Error::validation(format!("cannot connect to {address}")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        attempt.outbound = Some(rx);
        drop(self.attempts_tx.send(attempt));

        Ok(Box::new(MockHandle {
            tx,
            reject_sends: Arc::clone(&self.reject_sends),
        }))
    }
}

struct MockHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    reject_sends: Arc<AtomicBool>,
}

impl TransportHandle for MockHandle {
    fn send(&mut self, text: &str) -> Result<()> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(Error::validation("send rejected"));
        }
        drop(self.tx.send(Outbound::Text(text.to_owned())));
        Ok(())
    }

    fn close(&mut self, code: u16) -> Result<()> {
        drop(self.tx.send(Outbound::Close(code)));
        Ok(())
    }
}

/// Wait until the manager publishes a status matching `predicate`.
pub async fn status_where<F>(manager: &ConnectionManager, predicate: F) -> Status
where
    F: FnMut(&Status) -> bool,
{
    let mut rx = manager.status_receiver();
    let status = timeout(PATIENCE, rx.wait_for(predicate))
        .await
        .expect("status within timeout")
        .expect("manager alive");
    *status
}

/// Channel-backed counter for hook invocations.
pub fn recorder<T>() -> (mpsc::UnboundedSender<T>, Recorded<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Recorded(rx))
}

#[derive(Debug)]
pub struct Recorded<T>(mpsc::UnboundedReceiver<T>);

impl<T> Recorded<T> {
    pub async fn next(&mut self) -> T {
        timeout(PATIENCE, self.0.recv())
            .await
            .expect("hook within timeout")
            .expect("hook sender alive")
    }

    /// Everything recorded so far, without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = self.0.try_recv() {
            items.push(item);
        }
        items
    }
}
