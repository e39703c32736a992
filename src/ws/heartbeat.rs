//! Liveness probing for connections that have not opened yet.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::connection::Signal;

/// Liveness probe timer for a connection that has not confirmed its handshake yet.
///
/// The timer runs as a background task that posts [`Signal::Heartbeat`] ticks to the
/// connection manager's event loop; the manager owns the handle and performs the actual
/// write. The task is cancelled on [`Heartbeat::stop`] or when this value is dropped.
#[derive(Debug, Default)]
pub(crate) struct Heartbeat {
    token: Option<CancellationToken>,
}

impl Heartbeat {
    /// (Re)start probing for `generation`. The first tick fires one `period` from now.
    pub(crate) fn start(
        &mut self,
        period: Duration,
        generation: u64,
        tx: mpsc::UnboundedSender<Signal>,
    ) {
        self.stop();

        if period.is_zero() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Heartbeat interval is zero, probing disabled");
            return;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Signal::Heartbeat { generation }).is_err() {
                            // Event loop is gone
                            break;
                        }
                    }
                }
            }
        });

        self.token = Some(token);
    }

    /// Cancel the timer. Returns whether one was running.
    pub(crate) fn stop(&mut self) -> bool {
        match self.token.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
