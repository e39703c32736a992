//! Readiness decision for outbound sends.

use super::connection::ConnectionState;

/// What the connection manager does with an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The connection is confirmed open: write right away.
    SendNow,
    /// Hold the frame until the next ready signal.
    Wait,
    /// Automatic recovery will not happen on its own. Reset the attempt counter, force a
    /// reconnect, then hold the frame until ready.
    Wake,
}

/// Decide how to treat a send issued in `state` after `attempts` consecutive reconnects,
/// given the configured ceiling.
pub(crate) fn admit(state: ConnectionState, attempts: u32, max_attempts: u32) -> Admission {
    match state {
        ConnectionState::Open { .. } => Admission::SendNow,
        ConnectionState::Closing => Admission::Wake,
        ConnectionState::Closed { .. } if attempts > max_attempts => Admission::Wake,
        ConnectionState::Connecting | ConnectionState::Closed { .. } => Admission::Wait,
    }
}
